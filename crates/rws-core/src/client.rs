//! Client-role signalling state machine.
//!
//! Drives OPTIONS → DESCRIBE → SETUP → PLAY against a server-role remote,
//! answers the server's trickled ICE SETUP requests, and treats TEARDOWN
//! in either direction as the end of the session.

use crate::error::{SignalError, SignalResult};
use crate::ice;
use crate::message::{Message, Request, Response, Method, SessionId};
use crate::peer::{PeerEvent, PeerEvents, PeerSignal, WebRtcPeer};
use crate::session::SessionCtx;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Progress of the client-role exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Idle,
    OptionsSent,
    Described,
    SdpAnswered,
    Playing,
    TornDown,
}

/// A client-role endpoint playing one remote stream.
pub struct ClientSession {
    uri: String,
    state: ClientState,
    session: SessionId,
    peer: Box<dyn WebRtcPeer>,
    ice_servers: Vec<String>,
    ctx: SessionCtx,
    peer_tx: mpsc::UnboundedSender<PeerSignal>,
}

impl ClientSession {
    /// `uri` is the stream to request (through the proxy:
    /// `"<source>/<stream>"`). Peer events must be pumped back in through
    /// [`on_peer_signal`](Self::on_peer_signal).
    pub fn new(
        uri: impl Into<String>,
        peer: Box<dyn WebRtcPeer>,
        ice_servers: Vec<String>,
        msg_tx: mpsc::UnboundedSender<Message>,
        peer_tx: mpsc::UnboundedSender<PeerSignal>,
    ) -> Self {
        ClientSession {
            uri: uri.into(),
            state: ClientState::Idle,
            session: SessionId::new(),
            peer,
            ice_servers,
            ctx: SessionCtx::new(msg_tx),
            peer_tx,
        }
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn session(&self) -> &str {
        &self.session
    }

    pub fn ctx(&self) -> &SessionCtx {
        &self.ctx
    }

    /// Transport connected: open the exchange with `OPTIONS *`.
    pub fn on_connected(&mut self) -> SignalResult<()> {
        self.ctx.request_options("*");
        self.state = ClientState::OptionsSent;
        Ok(())
    }

    /// Dispatch one inbound message.
    pub fn handle_message(&mut self, msg: Message) -> SignalResult<()> {
        match msg {
            Message::Response(resp) => {
                let request = self.ctx.correlate(&resp)?;
                self.handle_response(request, resp)
            }
            Message::Request(req) => self.handle_request(req),
        }
    }

    fn handle_response(&mut self, request: Request, response: Response) -> SignalResult<()> {
        match request.method {
            Method::Options => self.on_options_response(response),
            Method::Describe => self.on_describe_response(response),
            Method::Setup => self.on_setup_response(request, response),
            Method::Play => self.on_play_response(response),
            Method::Teardown => self.on_teardown_response(response),
            other => Err(SignalError::protocol(format!(
                "unexpected response to {other}"
            ))),
        }
    }

    fn on_options_response(&mut self, response: Response) -> SignalResult<()> {
        if self.state != ClientState::OptionsSent || !response.is_success() {
            return Err(SignalError::protocol("unexpected OPTIONS response"));
        }
        self.ctx.request_describe(&self.uri);
        Ok(())
    }

    fn on_describe_response(&mut self, response: Response) -> SignalResult<()> {
        if self.state != ClientState::OptionsSent || !response.is_success() {
            return Err(SignalError::protocol("unexpected DESCRIBE response"));
        }
        if response.session.is_empty() {
            return Err(SignalError::protocol("DESCRIBE response without session"));
        }
        if response.body.is_empty() {
            return Err(SignalError::protocol("DESCRIBE response without SDP"));
        }

        self.session = response.session.clone();
        self.peer.set_remote_sdp(&response.body)?;
        self.peer.prepare(
            &self.ice_servers,
            PeerEvents::new(self.session.clone(), 0, self.peer_tx.clone()),
        );
        self.state = ClientState::Described;
        Ok(())
    }

    fn on_setup_response(&mut self, request: Request, response: Response) -> SignalResult<()> {
        if !response.is_success() || response.session != self.session {
            return Err(SignalError::protocol("unexpected SETUP response"));
        }
        // Only the SDP answer advances the exchange; ICE SETUP responses
        // are plain acks.
        if request.content_type() == Some("application/sdp") {
            self.ctx.request_play(&self.uri, self.session.clone());
        }
        Ok(())
    }

    fn on_play_response(&mut self, response: Response) -> SignalResult<()> {
        if !response.is_success() || response.session != self.session {
            return Err(SignalError::protocol("unexpected PLAY response"));
        }
        self.peer.play();
        self.state = ClientState::Playing;
        Ok(())
    }

    fn on_teardown_response(&mut self, response: Response) -> SignalResult<()> {
        if response.session != self.session {
            return Err(SignalError::protocol("TEARDOWN response session mismatch"));
        }
        self.state = ClientState::TornDown;
        Err(SignalError::Terminated)
    }

    /// Server-initiated requests: trickled ICE via SETUP, and TEARDOWN
    /// when the remote stream ends.
    fn handle_request(&mut self, request: Request) -> SignalResult<()> {
        if request.session != self.session || self.session.is_empty() {
            return Err(SignalError::protocol("request session mismatch"));
        }

        match request.method {
            Method::Setup => self.on_setup_request(request),
            Method::Teardown => {
                self.peer.stop();
                self.ctx.send_ok_response(request.cseq, self.session.clone());
                self.state = ClientState::TornDown;
                Err(SignalError::Terminated)
            }
            other => Err(SignalError::protocol(format!("unexpected request: {other}"))),
        }
    }

    fn on_setup_request(&mut self, request: Request) -> SignalResult<()> {
        if request.content_type() != Some(ice::CONTENT_TYPE) {
            return Err(SignalError::protocol("SETUP request with unexpected content type"));
        }

        let (mline_index, candidate) = parse_candidate_line(&request.body)?;
        if candidate == ice::END_OF_CANDIDATES {
            trace!("remote finished trickling candidates");
        } else {
            self.peer.add_ice_candidate(mline_index, &candidate)?;
        }

        self.ctx.send_ok_response(request.cseq, self.session.clone());
        Ok(())
    }

    /// Dispatch one event from the local peer.
    pub fn on_peer_signal(&mut self, signal: PeerSignal) -> SignalResult<()> {
        match signal.event {
            PeerEvent::Prepared => {
                let sdp = self.peer.sdp().filter(|s| !s.is_empty()).ok_or_else(|| {
                    SignalError::Peer("peer prepared without local sdp".into())
                })?;
                self.ctx.request_setup(
                    &self.uri,
                    "application/sdp",
                    self.session.clone(),
                    sdp,
                );
                self.state = ClientState::SdpAnswered;
                Ok(())
            }
            PeerEvent::IceCandidate {
                mline_index,
                candidate,
            } => {
                self.ctx.request_setup(
                    &self.uri,
                    ice::CONTENT_TYPE,
                    self.session.clone(),
                    ice::format_candidate(mline_index, &candidate),
                );
                Ok(())
            }
            PeerEvent::Eos => {
                debug!(session = %signal.session, "local peer reached end of stream");
                Err(SignalError::Terminated)
            }
        }
    }
}

/// Parse the single `"<idx>/<candidate>\r\n"` line of an inbound
/// candidate body. Only the first line counts; anything after its
/// terminator is ignored.
fn parse_candidate_line(body: &str) -> SignalResult<(u32, String)> {
    let sep = body
        .find('/')
        .filter(|&pos| pos > 0)
        .ok_or_else(|| SignalError::protocol("ice candidate line without index"))?;
    let line_end = body[sep + 1..]
        .find("\r\n")
        .map(|pos| sep + 1 + pos)
        .ok_or_else(|| SignalError::protocol("unterminated ice candidate line"))?;

    let mline_index = body[..sep]
        .parse::<u32>()
        .map_err(|_| SignalError::protocol(format!("bad mline index: {:?}", &body[..sep])))?;
    let candidate = &body[sep + 1..line_end];
    if candidate.is_empty() {
        return Err(SignalError::protocol("empty ice candidate"));
    }
    Ok((mline_index, candidate.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::status;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct PeerLog {
        remote_sdp: Vec<String>,
        candidates: Vec<(u32, String)>,
        played: u32,
        stopped: u32,
    }

    struct TestPeer {
        sdp: Option<String>,
        log: Arc<Mutex<PeerLog>>,
    }

    impl TestPeer {
        fn new(sdp: Option<&str>) -> (Box<dyn WebRtcPeer>, Arc<Mutex<PeerLog>>) {
            let log = Arc::new(Mutex::new(PeerLog::default()));
            (
                Box::new(TestPeer {
                    sdp: sdp.map(str::to_string),
                    log: log.clone(),
                }),
                log,
            )
        }
    }

    impl WebRtcPeer for TestPeer {
        fn prepare(&mut self, _ice_servers: &[String], events: PeerEvents) {
            events.prepared();
        }

        fn sdp(&self) -> Option<String> {
            self.sdp.clone()
        }

        fn set_remote_sdp(&mut self, sdp: &str) -> SignalResult<()> {
            self.log.lock().unwrap().remote_sdp.push(sdp.to_string());
            Ok(())
        }

        fn add_ice_candidate(&mut self, mline_index: u32, candidate: &str) -> SignalResult<()> {
            self.log
                .lock()
                .unwrap()
                .candidates
                .push((mline_index, candidate.to_string()));
            Ok(())
        }

        fn play(&mut self) {
            self.log.lock().unwrap().played += 1;
        }

        fn stop(&mut self) {
            self.log.lock().unwrap().stopped += 1;
        }
    }

    struct Rig {
        session: ClientSession,
        msg_rx: mpsc::UnboundedReceiver<Message>,
        peer_rx: mpsc::UnboundedReceiver<PeerSignal>,
        log: Arc<Mutex<PeerLog>>,
    }

    fn rig(sdp: Option<&str>) -> Rig {
        let (msg_tx, msg_rx) = mpsc::unbounded_channel();
        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        let (peer, log) = TestPeer::new(sdp);
        Rig {
            session: ClientSession::new("source1/bars", peer, Vec::new(), msg_tx, peer_tx),
            msg_rx,
            peer_rx,
            log,
        }
    }

    fn next_request(rx: &mut mpsc::UnboundedReceiver<Message>) -> Request {
        match rx.try_recv().unwrap() {
            Message::Request(req) => req,
            other => panic!("expected request, got {other:?}"),
        }
    }

    fn next_response(rx: &mut mpsc::UnboundedReceiver<Message>) -> Response {
        match rx.try_recv().unwrap() {
            Message::Response(resp) => resp,
            other => panic!("expected response, got {other:?}"),
        }
    }

    fn ok_for(req: &Request, session: &str) -> Message {
        Message::Response(Response::ok(req.cseq, session.to_string()))
    }

    /// Drive the exchange up to the DESCRIBE response and return the
    /// prepared signal the peer emitted.
    fn describe(rig: &mut Rig) -> PeerSignal {
        rig.session.on_connected().unwrap();
        let options = next_request(&mut rig.msg_rx);
        assert_eq!(options.method, Method::Options);
        assert_eq!(options.uri, "*");

        rig.session.handle_message(ok_for(&options, "")).unwrap();
        let describe = next_request(&mut rig.msg_rx);
        assert_eq!(describe.method, Method::Describe);
        assert_eq!(describe.uri, "source1/bars");

        let mut resp = Response::ok(describe.cseq, "1".to_string());
        resp.headers.add("Content-Type", "application/sdp");
        resp.body = "v=0\r\n".to_string();
        rig.session.handle_message(Message::Response(resp)).unwrap();

        assert_eq!(rig.session.state(), ClientState::Described);
        assert_eq!(rig.session.session(), "1");
        rig.peer_rx.try_recv().unwrap()
    }

    #[test]
    fn happy_playback_reaches_playing() {
        let mut rig = rig(Some("v=0\r\nanswer\r\n"));
        let prepared = describe(&mut rig);
        assert_eq!(prepared.event, PeerEvent::Prepared);
        assert_eq!(rig.log.lock().unwrap().remote_sdp, vec!["v=0\r\n"]);

        rig.session.on_peer_signal(prepared).unwrap();
        let setup = next_request(&mut rig.msg_rx);
        assert_eq!(setup.method, Method::Setup);
        assert_eq!(setup.content_type(), Some("application/sdp"));
        assert_eq!(setup.body, "v=0\r\nanswer\r\n");
        assert_eq!(setup.session, "1");
        assert_eq!(rig.session.state(), ClientState::SdpAnswered);

        rig.session.handle_message(ok_for(&setup, "1")).unwrap();
        let play = next_request(&mut rig.msg_rx);
        assert_eq!(play.method, Method::Play);

        rig.session.handle_message(ok_for(&play, "1")).unwrap();
        assert_eq!(rig.session.state(), ClientState::Playing);
        assert_eq!(rig.log.lock().unwrap().played, 1);
    }

    #[test]
    fn empty_local_sdp_disconnects() {
        let mut rig = rig(None);
        let prepared = describe(&mut rig);
        assert!(matches!(
            rig.session.on_peer_signal(prepared),
            Err(SignalError::Peer(_))
        ));
    }

    #[test]
    fn describe_response_without_session_rejected() {
        let mut rig = rig(Some("v=0\r\n"));
        rig.session.on_connected().unwrap();
        let options = next_request(&mut rig.msg_rx);
        rig.session.handle_message(ok_for(&options, "")).unwrap();
        let describe = next_request(&mut rig.msg_rx);

        let mut resp = Response::ok(describe.cseq, SessionId::new());
        resp.body = "v=0\r\n".to_string();
        assert!(rig.session.handle_message(Message::Response(resp)).is_err());
    }

    #[test]
    fn non_ok_response_disconnects() {
        let mut rig = rig(Some("v=0\r\n"));
        rig.session.on_connected().unwrap();
        let options = next_request(&mut rig.msg_rx);
        let resp = Response::with_status(status::SERVICE_UNAVAILABLE, options.cseq, SessionId::new());
        assert!(rig.session.handle_message(Message::Response(resp)).is_err());
    }

    #[test]
    fn ice_candidate_signal_emits_setup() {
        let mut rig = rig(Some("v=0\r\n"));
        let prepared = describe(&mut rig);
        rig.session.on_peer_signal(prepared).unwrap();
        next_request(&mut rig.msg_rx); // SETUP with the answer

        rig.session
            .on_peer_signal(PeerSignal {
                session: "1".to_string(),
                cseq: 0,
                event: PeerEvent::IceCandidate {
                    mline_index: 0,
                    candidate: "candidate:1".to_string(),
                },
            })
            .unwrap();

        let setup = next_request(&mut rig.msg_rx);
        assert_eq!(setup.content_type(), Some(ice::CONTENT_TYPE));
        assert_eq!(setup.body, "0/candidate:1\r\n");
    }

    #[test]
    fn inbound_ice_setup_applies_candidate_and_acks() {
        let mut rig = rig(Some("v=0\r\n"));
        let prepared = describe(&mut rig);
        rig.session.on_peer_signal(prepared).unwrap();
        next_request(&mut rig.msg_rx);

        let mut req = Request::new(Method::Setup, "source1/bars", 7);
        req.session = "1".to_string();
        req.headers.add("Content-Type", ice::CONTENT_TYPE);
        req.body = "0/candidate:1\r\n".to_string();
        rig.session.handle_message(Message::Request(req)).unwrap();

        let resp = next_response(&mut rig.msg_rx);
        assert_eq!(resp.status, status::OK);
        assert_eq!(resp.cseq, 7);
        assert_eq!(
            rig.log.lock().unwrap().candidates,
            vec![(0, "candidate:1".to_string())]
        );
    }

    #[test]
    fn end_of_candidates_is_acked_without_peer_call() {
        let mut rig = rig(Some("v=0\r\n"));
        let prepared = describe(&mut rig);
        rig.session.on_peer_signal(prepared).unwrap();
        next_request(&mut rig.msg_rx);

        let mut req = Request::new(Method::Setup, "source1/bars", 8);
        req.session = "1".to_string();
        req.headers.add("Content-Type", ice::CONTENT_TYPE);
        req.body = ice::format_candidate(0, ice::END_OF_CANDIDATES);
        rig.session.handle_message(Message::Request(req)).unwrap();

        assert_eq!(next_response(&mut rig.msg_rx).status, status::OK);
        assert!(rig.log.lock().unwrap().candidates.is_empty());
    }

    #[test]
    fn inbound_ice_setup_reads_only_the_first_line() {
        let mut rig = rig(Some("v=0\r\n"));
        let prepared = describe(&mut rig);
        rig.session.on_peer_signal(prepared).unwrap();
        next_request(&mut rig.msg_rx);

        // Anything after the first line's terminator is ignored, even
        // when it would not parse as a candidate.
        let mut req = Request::new(Method::Setup, "source1/bars", 10);
        req.session = "1".to_string();
        req.headers.add("Content-Type", ice::CONTENT_TYPE);
        req.body = "0/candidate:1\r\n1/candidate:2\r\ngarbage".to_string();
        rig.session.handle_message(Message::Request(req)).unwrap();

        assert_eq!(next_response(&mut rig.msg_rx).status, status::OK);
        assert_eq!(
            rig.log.lock().unwrap().candidates,
            vec![(0, "candidate:1".to_string())]
        );
    }

    #[test]
    fn inbound_ice_setup_without_line_terminator_rejected() {
        let mut rig = rig(Some("v=0\r\n"));
        let prepared = describe(&mut rig);
        rig.session.on_peer_signal(prepared).unwrap();
        next_request(&mut rig.msg_rx);

        let mut req = Request::new(Method::Setup, "source1/bars", 10);
        req.session = "1".to_string();
        req.headers.add("Content-Type", ice::CONTENT_TYPE);
        req.body = "0/candidate:1".to_string();
        assert!(rig.session.handle_message(Message::Request(req)).is_err());
        assert!(rig.log.lock().unwrap().candidates.is_empty());
    }

    #[test]
    fn inbound_setup_with_wrong_session_rejected() {
        let mut rig = rig(Some("v=0\r\n"));
        let prepared = describe(&mut rig);
        rig.session.on_peer_signal(prepared).unwrap();
        next_request(&mut rig.msg_rx);

        let mut req = Request::new(Method::Setup, "source1/bars", 9);
        req.session = "2".to_string();
        req.headers.add("Content-Type", ice::CONTENT_TYPE);
        req.body = "0/candidate:1\r\n".to_string();
        assert!(rig.session.handle_message(Message::Request(req)).is_err());
    }

    #[test]
    fn teardown_response_is_terminal() {
        let mut rig = rig(Some("v=0\r\n"));
        let prepared = describe(&mut rig);
        rig.session.on_peer_signal(prepared).unwrap();
        next_request(&mut rig.msg_rx);

        let cseq = rig.session.ctx.request_teardown("source1/bars", "1".to_string());
        next_request(&mut rig.msg_rx);
        let resp = Response::ok(cseq, "1".to_string());
        assert!(matches!(
            rig.session.handle_message(Message::Response(resp)),
            Err(SignalError::Terminated)
        ));
        assert_eq!(rig.session.state(), ClientState::TornDown);
    }

    #[test]
    fn inbound_teardown_acks_and_terminates() {
        let mut rig = rig(Some("v=0\r\n"));
        let prepared = describe(&mut rig);
        rig.session.on_peer_signal(prepared).unwrap();
        next_request(&mut rig.msg_rx);

        let mut req = Request::new(Method::Teardown, "source1/bars", 11);
        req.session = "1".to_string();
        assert!(matches!(
            rig.session.handle_message(Message::Request(req)),
            Err(SignalError::Terminated)
        ));
        assert_eq!(next_response(&mut rig.msg_rx).status, status::OK);
        assert_eq!(rig.log.lock().unwrap().stopped, 1);
    }

    #[test]
    fn eos_terminates() {
        let mut rig = rig(Some("v=0\r\n"));
        let prepared = describe(&mut rig);
        rig.session.on_peer_signal(prepared).unwrap();
        next_request(&mut rig.msg_rx);

        assert!(matches!(
            rig.session.on_peer_signal(PeerSignal {
                session: "1".to_string(),
                cseq: 0,
                event: PeerEvent::Eos,
            }),
            Err(SignalError::Terminated)
        ));
    }
}
