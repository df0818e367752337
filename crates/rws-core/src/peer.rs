//! Abstract WebRTC peer capability.
//!
//! The signalling layer never touches SDP or ICE internals; it drives a
//! [`WebRtcPeer`] and reacts to the events it emits. Events travel over an
//! mpsc channel tagged with the identifiers the owning session needs to
//! re-enter the right state (CSeq for a pending DESCRIBE/ANNOUNCE,
//! SessionId for a live media session), so peers never hold a reference to
//! their session and a late event for a dead session lands in a closed
//! channel.

use crate::error::SignalResult;
use crate::message::{CSeq, SessionId};
use tokio::sync::mpsc;

/// Event emitted by a peer while negotiating or streaming.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    /// Local SDP is ready to be fetched via [`WebRtcPeer::sdp`].
    Prepared,
    /// A trickled local ICE candidate to forward to the remote.
    IceCandidate { mline_index: u32, candidate: String },
    /// The media stream ended.
    Eos,
}

/// A [`PeerEvent`] tagged with the identifiers of its originating session.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerSignal {
    /// SessionId of the owning media session.
    pub session: SessionId,
    /// CSeq of the request whose preparation this peer serves; 0 when the
    /// peer belongs to a client-role session.
    pub cseq: CSeq,
    pub event: PeerEvent,
}

/// Tagging handle a session hands to each peer it creates.
///
/// Sends are best-effort: once the owning session is gone the channel is
/// closed and events are silently dropped.
#[derive(Debug, Clone)]
pub struct PeerEvents {
    session: SessionId,
    cseq: CSeq,
    tx: mpsc::UnboundedSender<PeerSignal>,
}

impl PeerEvents {
    pub fn new(session: SessionId, cseq: CSeq, tx: mpsc::UnboundedSender<PeerSignal>) -> Self {
        PeerEvents { session, cseq, tx }
    }

    pub fn prepared(&self) {
        self.send(PeerEvent::Prepared);
    }

    pub fn ice_candidate(&self, mline_index: u32, candidate: &str) {
        self.send(PeerEvent::IceCandidate {
            mline_index,
            candidate: candidate.to_string(),
        });
    }

    pub fn eos(&self) {
        self.send(PeerEvent::Eos);
    }

    fn send(&self, event: PeerEvent) {
        let _ = self.tx.send(PeerSignal {
            session: self.session.clone(),
            cseq: self.cseq,
            event,
        });
    }
}

/// The peer capability the signalling layer is written against.
///
/// Implementations wrap a real WebRTC stack (or a scripted stand-in for
/// tests). All methods are synchronous from the session's point of view;
/// anything slow happens behind [`prepare`](WebRtcPeer::prepare) and is
/// reported through the [`PeerEvents`] handle.
pub trait WebRtcPeer: Send {
    /// Begin asynchronous preparation (ICE gathering, local SDP).
    /// `Prepared` must be emitted exactly once on success.
    fn prepare(&mut self, ice_servers: &[String], events: PeerEvents);

    /// Local SDP, once prepared. `None` or empty means preparation failed.
    fn sdp(&self) -> Option<String>;

    fn set_remote_sdp(&mut self, sdp: &str) -> SignalResult<()>;

    /// Apply one remote candidate. Implementations must treat the
    /// literal `a=end-of-candidates` as the end-of-trickle marker.
    fn add_ice_candidate(&mut self, mline_index: u32, candidate: &str) -> SignalResult<()>;

    /// Start the media flow (both playback and recording peers).
    fn play(&mut self);

    /// Stop the media flow and release resources. Idempotent.
    fn stop(&mut self);
}

/// Factory producing a peer for a stream URI; `None` means the URI is not
/// servable and the originating request must be rejected.
pub type PeerFactory = Box<dyn Fn(&str) -> Option<Box<dyn WebRtcPeer>> + Send>;
