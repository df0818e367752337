//! Scripted stand-in for a real WebRTC peer.
//!
//! Emits a canned local SDP and a fixed candidate script, and records
//! every call it receives. The standalone source and viewer run on it,
//! and tests assert against its call log.

use rws_core::peer::{PeerEvents, WebRtcPeer};
use rws_core::{ice, SignalResult};
use std::sync::{Arc, Mutex};

/// Minimal sendonly video SDP for the test-pattern source.
pub const TEST_PATTERN_SDP: &str = "v=0\r\n\
o=- 0 0 IN IP4 0.0.0.0\r\n\
s=test pattern\r\n\
t=0 0\r\n\
m=video 9 UDP/TLS/RTP/SAVPF 96\r\n\
a=rtpmap:96 VP8/90000\r\n\
a=sendonly\r\n";

/// Matching recvonly answer for the viewer side.
pub const VIEWER_ANSWER_SDP: &str = "v=0\r\n\
o=- 0 0 IN IP4 0.0.0.0\r\n\
s=viewer\r\n\
t=0 0\r\n\
m=video 9 UDP/TLS/RTP/SAVPF 96\r\n\
a=rtpmap:96 VP8/90000\r\n\
a=recvonly\r\n";

/// Calls a [`ScriptedPeer`] received, shared with the test that owns it.
#[derive(Debug, Default)]
pub struct PeerCalls {
    pub remote_sdp: Vec<String>,
    pub candidates: Vec<(u32, String)>,
    pub play_calls: u32,
    pub stop_calls: u32,
}

/// A peer that follows a fixed script on `prepare`: one `Prepared`
/// event, the configured candidates, then `a=end-of-candidates`.
pub struct ScriptedPeer {
    local_sdp: Option<String>,
    candidates: Vec<(u32, String)>,
    calls: Arc<Mutex<PeerCalls>>,
}

impl ScriptedPeer {
    pub fn new(local_sdp: &str) -> Self {
        ScriptedPeer {
            local_sdp: Some(local_sdp.to_string()),
            candidates: Vec::new(),
            calls: Arc::new(Mutex::new(PeerCalls::default())),
        }
    }

    /// A peer whose preparation yields no SDP (failure-path tests).
    pub fn without_sdp() -> Self {
        ScriptedPeer {
            local_sdp: None,
            candidates: Vec::new(),
            calls: Arc::new(Mutex::new(PeerCalls::default())),
        }
    }

    /// Candidates to trickle right after `Prepared`.
    pub fn with_candidates(mut self, candidates: Vec<(u32, String)>) -> Self {
        self.candidates = candidates;
        self
    }

    /// Handle on the call log, kept alive after the peer is boxed away.
    pub fn calls(&self) -> Arc<Mutex<PeerCalls>> {
        self.calls.clone()
    }
}

impl WebRtcPeer for ScriptedPeer {
    fn prepare(&mut self, _ice_servers: &[String], events: PeerEvents) {
        events.prepared();
        for (mline_index, candidate) in &self.candidates {
            events.ice_candidate(*mline_index, candidate);
        }
        events.ice_candidate(0, ice::END_OF_CANDIDATES);
    }

    fn sdp(&self) -> Option<String> {
        self.local_sdp.clone()
    }

    fn set_remote_sdp(&mut self, sdp: &str) -> SignalResult<()> {
        self.calls.lock().unwrap().remote_sdp.push(sdp.to_string());
        Ok(())
    }

    fn add_ice_candidate(&mut self, mline_index: u32, candidate: &str) -> SignalResult<()> {
        self.calls
            .lock()
            .unwrap()
            .candidates
            .push((mline_index, candidate.to_string()));
        Ok(())
    }

    fn play(&mut self) {
        self.calls.lock().unwrap().play_calls += 1;
    }

    fn stop(&mut self) {
        self.calls.lock().unwrap().stop_calls += 1;
    }
}
