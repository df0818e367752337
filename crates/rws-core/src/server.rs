//! Server-role signalling state machine.
//!
//! Accepts DESCRIBE (playback) and ANNOUNCE (record), each spawning a
//! media session whose peer prepares asynchronously; answers SETUP, PLAY,
//! RECORD, and TEARDOWN against live media sessions; trickles local ICE
//! candidates to the remote as SETUP requests; and turns peer end-of-stream
//! into a TEARDOWN toward the remote.

use crate::error::{SignalError, SignalResult};
use crate::ice;
use crate::message::{status, CSeq, Message, Method, Request, Response, SessionId};
use crate::peer::{PeerEvent, PeerEvents, PeerFactory, PeerSignal, WebRtcPeer};
use crate::session::SessionCtx;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// One live media exchange, keyed by its SessionId.
struct MediaSession {
    recorder: bool,
    uri: String,
    /// The DESCRIBE or ANNOUNCE that spawned this session, retained until
    /// the remote's first SDP SETUP finalizes the answer.
    create_request: Option<Request>,
    peer: Box<dyn WebRtcPeer>,
}

impl Drop for MediaSession {
    fn drop(&mut self) {
        self.peer.stop();
    }
}

/// A DESCRIBE or ANNOUNCE waiting for its peer to prepare.
struct PendingRequest {
    request: Request,
    session: SessionId,
}

/// A server-role endpoint: drives one or more media sessions for a single
/// remote client.
pub struct ServerSession {
    ctx: SessionCtx,
    peer_tx: mpsc::UnboundedSender<PeerSignal>,
    create_peer: PeerFactory,
    create_record_peer: Option<PeerFactory>,
    ice_servers: Vec<String>,
    describe_requests: HashMap<CSeq, PendingRequest>,
    announce_requests: HashMap<CSeq, PendingRequest>,
    media_sessions: HashMap<SessionId, MediaSession>,
    next_session: u32,
}

impl ServerSession {
    /// `create_record_peer` being `None` disables the ANNOUNCE/RECORD
    /// path entirely.
    pub fn new(
        create_peer: PeerFactory,
        create_record_peer: Option<PeerFactory>,
        ice_servers: Vec<String>,
        msg_tx: mpsc::UnboundedSender<Message>,
        peer_tx: mpsc::UnboundedSender<PeerSignal>,
    ) -> Self {
        ServerSession {
            ctx: SessionCtx::new(msg_tx),
            peer_tx,
            create_peer,
            create_record_peer,
            ice_servers,
            describe_requests: HashMap::new(),
            announce_requests: HashMap::new(),
            media_sessions: HashMap::new(),
            next_session: 1,
        }
    }

    pub fn ctx(&self) -> &SessionCtx {
        &self.ctx
    }

    pub fn ctx_mut(&mut self) -> &mut SessionCtx {
        &mut self.ctx
    }

    /// Replace the ICE server list handed to peers prepared from now on.
    /// Sources learn theirs from the rendezvous at registration time.
    pub fn set_ice_servers(&mut self, ice_servers: Vec<String>) {
        self.ice_servers = ice_servers;
    }

    /// Number of live media sessions.
    pub fn session_count(&self) -> usize {
        self.media_sessions.len()
    }

    /// Number of DESCRIBE/ANNOUNCE requests still awaiting peer
    /// preparation.
    pub fn pending_count(&self) -> usize {
        self.describe_requests.len() + self.announce_requests.len()
    }

    fn record_enabled(&self) -> bool {
        self.create_record_peer.is_some()
    }

    /// SessionIds are decimal renderings of a counter starting at 1,
    /// never reused within the connection.
    fn alloc_session(&mut self) -> SessionId {
        let session = self.next_session.to_string();
        self.next_session += 1;
        session
    }

    /// Dispatch one inbound message.
    pub fn handle_message(&mut self, msg: Message) -> SignalResult<()> {
        match msg {
            Message::Request(req) => match req.method {
                Method::Options => self.on_options_request(req),
                Method::Describe => self.on_describe_request(req),
                Method::Announce => self.on_announce_request(req),
                Method::Setup => self.on_setup_request(req),
                Method::Play => self.on_play_request(req),
                Method::Record => self.on_record_request(req),
                Method::Teardown => self.on_teardown_request(req),
                other => Err(SignalError::protocol(format!(
                    "unsupported request method: {other}"
                ))),
            },
            Message::Response(resp) => {
                let request = self.ctx.correlate(&resp)?;
                self.handle_response(request, resp)
            }
        }
    }

    /// Responses to the requests this endpoint issues itself (ICE SETUP
    /// trickles and the EOS TEARDOWN).
    fn handle_response(&mut self, request: Request, response: Response) -> SignalResult<()> {
        match request.method {
            Method::Setup => {
                if !response.is_success() {
                    return Err(SignalError::protocol("ice SETUP rejected by remote"));
                }
                // A response racing a teardown is dropped, not an error.
                if !self.media_sessions.contains_key(&response.session) {
                    trace!(session = %response.session, "dropping SETUP response for torn-down session");
                }
                Ok(())
            }
            Method::Teardown => Ok(()),
            other => Err(SignalError::protocol(format!(
                "unexpected response to {other}"
            ))),
        }
    }

    fn on_options_request(&mut self, request: Request) -> SignalResult<()> {
        let mut response = Response::ok(request.cseq, SessionId::new());
        response.headers.add(
            "Public",
            if self.record_enabled() {
                "DESCRIBE, ANNOUNCE, SETUP, PLAY, RECORD, TEARDOWN"
            } else {
                "DESCRIBE, SETUP, PLAY, TEARDOWN"
            },
        );
        self.ctx.send_response(response);
        Ok(())
    }

    fn on_describe_request(&mut self, request: Request) -> SignalResult<()> {
        if self.describe_requests.contains_key(&request.cseq) {
            return Err(SignalError::protocol("DESCRIBE with duplicate CSeq"));
        }

        let peer = (self.create_peer)(&request.uri)
            .ok_or_else(|| SignalError::Peer(format!("no peer for uri {:?}", request.uri)))?;

        let session = self.alloc_session();
        self.spawn_media_session(request, session, peer, false)
    }

    fn on_announce_request(&mut self, request: Request) -> SignalResult<()> {
        let Some(create_record_peer) = &self.create_record_peer else {
            // Recording disabled: the request is still addressable, so
            // answer 405 instead of dropping the connection.
            self.ctx.send_response(Response::with_status(
                status::METHOD_NOT_ALLOWED,
                request.cseq,
                SessionId::new(),
            ));
            return Ok(());
        };

        if request.content_type() != Some("application/sdp") {
            return Err(SignalError::protocol("ANNOUNCE without sdp content type"));
        }
        if request.body.is_empty() {
            return Err(SignalError::protocol("ANNOUNCE without sdp body"));
        }
        if self.announce_requests.contains_key(&request.cseq) {
            return Err(SignalError::protocol("ANNOUNCE with duplicate CSeq"));
        }

        let mut peer = create_record_peer(&request.uri)
            .ok_or_else(|| SignalError::Peer(format!("no record peer for uri {:?}", request.uri)))?;
        peer.set_remote_sdp(&request.body)?;

        let session = self.alloc_session();
        self.spawn_media_session(request, session, peer, true)
    }

    /// Shared tail of DESCRIBE/ANNOUNCE: insert the pending entry and the
    /// media session, then start peer preparation. Every failure return
    /// erases what was inserted, so a pending entry can never leak.
    fn spawn_media_session(
        &mut self,
        request: Request,
        session: SessionId,
        peer: Box<dyn WebRtcPeer>,
        recorder: bool,
    ) -> SignalResult<()> {
        let cseq = request.cseq;
        let uri = request.uri.clone();
        let pending = if recorder {
            &mut self.announce_requests
        } else {
            &mut self.describe_requests
        };
        pending.insert(
            cseq,
            PendingRequest {
                request,
                session: session.clone(),
            },
        );

        if self.media_sessions.contains_key(&session) {
            self.erase_pending(recorder, cseq);
            return Err(SignalError::protocol("session id collision"));
        }
        self.media_sessions.insert(
            session.clone(),
            MediaSession {
                recorder,
                uri,
                create_request: None,
                peer,
            },
        );

        let media = self
            .media_sessions
            .get_mut(&session)
            .expect("media session just inserted");
        media.peer.prepare(
            &self.ice_servers,
            PeerEvents::new(session, cseq, self.peer_tx.clone()),
        );
        Ok(())
    }

    fn erase_pending(&mut self, recorder: bool, cseq: CSeq) {
        if recorder {
            self.announce_requests.remove(&cseq);
        } else {
            self.describe_requests.remove(&cseq);
        }
    }

    fn on_setup_request(&mut self, request: Request) -> SignalResult<()> {
        let session = request.session.clone();
        let media = self
            .media_sessions
            .get_mut(&session)
            .ok_or_else(|| SignalError::SessionNotFound(session.clone()))?;

        match request.content_type() {
            Some("application/sdp") => {
                media.peer.set_remote_sdp(&request.body)?;
                // The answer is finalized; the spawning request is done.
                media.create_request = None;
                self.ctx.send_ok_response(request.cseq, session);
                Ok(())
            }
            Some(ice::CONTENT_TYPE) => {
                // All-or-nothing: parse the whole body before the first
                // peer call so a bad line cannot partially apply.
                let candidates = ice::parse_candidates(&request.body)?;
                for (mline_index, candidate) in candidates {
                    trace!(mline_index, candidate = %candidate, "adding ice candidate");
                    media.peer.add_ice_candidate(mline_index, &candidate)?;
                }
                self.ctx.send_ok_response(request.cseq, session);
                Ok(())
            }
            _ => Err(SignalError::protocol("SETUP with unexpected content type")),
        }
    }

    fn on_play_request(&mut self, request: Request) -> SignalResult<()> {
        if request.session.is_empty() {
            return Err(SignalError::protocol("PLAY without session"));
        }
        let media = self
            .media_sessions
            .get_mut(&request.session)
            .ok_or_else(|| SignalError::SessionNotFound(request.session.clone()))?;
        if media.recorder {
            return Err(SignalError::protocol("PLAY on a record session"));
        }

        media.peer.play();
        self.ctx.send_ok_response(request.cseq, request.session);
        Ok(())
    }

    fn on_record_request(&mut self, request: Request) -> SignalResult<()> {
        if !self.record_enabled() {
            return Err(SignalError::protocol("RECORD while recording disabled"));
        }
        if request.session.is_empty() {
            return Err(SignalError::protocol("RECORD without session"));
        }
        let media = self
            .media_sessions
            .get_mut(&request.session)
            .ok_or_else(|| SignalError::SessionNotFound(request.session.clone()))?;
        if !media.recorder {
            return Err(SignalError::protocol("RECORD on a playback session"));
        }

        media.peer.play();
        self.ctx.send_ok_response(request.cseq, request.session);
        Ok(())
    }

    fn on_teardown_request(&mut self, request: Request) -> SignalResult<()> {
        let mut media = self
            .media_sessions
            .remove(&request.session)
            .ok_or_else(|| SignalError::SessionNotFound(request.session.clone()))?;

        media.peer.stop();
        self.ctx.send_ok_response(request.cseq, request.session);
        Ok(())
    }

    /// Dispatch one event from a media session's peer.
    pub fn on_peer_signal(&mut self, signal: PeerSignal) -> SignalResult<()> {
        match signal.event {
            PeerEvent::Prepared => self.on_prepared(signal.cseq),
            PeerEvent::IceCandidate {
                mline_index,
                candidate,
            } => self.on_ice_candidate(signal.session, mline_index, candidate),
            PeerEvent::Eos => self.on_eos(signal.session),
        }
    }

    /// Peer preparation finished: answer the pending DESCRIBE/ANNOUNCE
    /// with the local SDP.
    ///
    /// The pending entry is removed up front, so it is gone exactly once
    /// whether the validation below succeeds or closes the connection.
    fn on_prepared(&mut self, cseq: CSeq) -> SignalResult<()> {
        let (pending, recorder) = if let Some(p) = self.describe_requests.remove(&cseq) {
            (p, false)
        } else if let Some(p) = self.announce_requests.remove(&cseq) {
            (p, true)
        } else {
            return Err(SignalError::protocol("prepared with no pending request"));
        };

        let media = self
            .media_sessions
            .get_mut(&pending.session)
            .ok_or_else(|| SignalError::SessionNotFound(pending.session.clone()))?;
        if media.recorder != recorder {
            return Err(SignalError::protocol("prepared session role mismatch"));
        }

        let sdp = media
            .peer
            .sdp()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| SignalError::Peer("peer prepared without local sdp".into()))?;

        let mut response = Response::ok(pending.request.cseq, pending.session.clone());
        response.headers.add("Content-Type", "application/sdp");
        response.body = sdp;
        self.ctx.send_response(response);

        media.create_request = Some(pending.request);
        Ok(())
    }

    fn on_ice_candidate(
        &mut self,
        session: SessionId,
        mline_index: u32,
        candidate: String,
    ) -> SignalResult<()> {
        let media = self
            .media_sessions
            .get(&session)
            .ok_or_else(|| SignalError::SessionNotFound(session.clone()))?;

        let uri = media.uri.clone();
        self.ctx.request_setup(
            &uri,
            ice::CONTENT_TYPE,
            session,
            ice::format_candidate(mline_index, &candidate),
        );
        Ok(())
    }

    /// End of stream: tear the session down toward the remote. A late EOS
    /// for an already-destroyed session is a no-op.
    fn on_eos(&mut self, session: SessionId) -> SignalResult<()> {
        let Some(mut media) = self.media_sessions.remove(&session) else {
            debug!(session = %session, "eos for unknown session, ignoring");
            return Ok(());
        };

        media.peer.stop();
        let uri = media.uri.clone();
        self.ctx.request_teardown(&uri, session);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
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
        session: ServerSession,
        msg_rx: mpsc::UnboundedReceiver<Message>,
        peer_rx: mpsc::UnboundedReceiver<PeerSignal>,
        log: Arc<Mutex<PeerLog>>,
    }

    fn factory(sdp: Option<&str>, log: Arc<Mutex<PeerLog>>) -> PeerFactory {
        let sdp = sdp.map(str::to_string);
        Box::new(move |_uri| {
            Some(Box::new(TestPeer {
                sdp: sdp.clone(),
                log: log.clone(),
            }) as Box<dyn WebRtcPeer>)
        })
    }

    fn rig_with(sdp: Option<&str>, record: bool) -> Rig {
        let (msg_tx, msg_rx) = mpsc::unbounded_channel();
        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        let log = Arc::new(Mutex::new(PeerLog::default()));
        let record_factory = record.then(|| factory(sdp, log.clone()));
        Rig {
            session: ServerSession::new(
                factory(sdp, log.clone()),
                record_factory,
                Vec::new(),
                msg_tx,
                peer_tx,
            ),
            msg_rx,
            peer_rx,
            log,
        }
    }

    fn rig(sdp: Option<&str>) -> Rig {
        rig_with(sdp, false)
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

    fn describe(rig: &mut Rig, cseq: CSeq) -> SignalResult<()> {
        let req = Request::new(Method::Describe, "bars", cseq);
        rig.session.handle_message(Message::Request(req))?;
        let signal = rig.peer_rx.try_recv().unwrap();
        rig.session.on_peer_signal(signal)
    }

    #[test]
    fn options_lists_playback_methods() {
        let mut rig = rig(Some("v=0\r\n"));
        rig.session
            .handle_message(Message::Request(Request::new(Method::Options, "*", 1)))
            .unwrap();
        let resp = next_response(&mut rig.msg_rx);
        assert_eq!(resp.status, status::OK);
        assert_eq!(
            resp.headers.get("Public"),
            Some("DESCRIBE, SETUP, PLAY, TEARDOWN")
        );
    }

    #[test]
    fn options_lists_record_methods_when_enabled() {
        let mut rig = rig_with(Some("v=0\r\n"), true);
        rig.session
            .handle_message(Message::Request(Request::new(Method::Options, "*", 1)))
            .unwrap();
        let resp = next_response(&mut rig.msg_rx);
        assert_eq!(
            resp.headers.get("Public"),
            Some("DESCRIBE, ANNOUNCE, SETUP, PLAY, RECORD, TEARDOWN")
        );
    }

    #[test]
    fn describe_answers_with_sdp_and_session() {
        let mut rig = rig(Some("v=0\r\noffer\r\n"));
        describe(&mut rig, 2).unwrap();

        let resp = next_response(&mut rig.msg_rx);
        assert_eq!(resp.status, status::OK);
        assert_eq!(resp.cseq, 2);
        assert_eq!(resp.session, "1");
        assert_eq!(resp.content_type(), Some("application/sdp"));
        assert_eq!(resp.body, "v=0\r\noffer\r\n");

        assert_eq!(rig.session.describe_requests.len(), 0);
        let media = &rig.session.media_sessions["1"];
        assert!(!media.recorder);
        assert!(media.create_request.is_some());
    }

    #[test]
    fn empty_sdp_after_prepare_disconnects() {
        let mut rig = rig(None);
        assert!(matches!(describe(&mut rig, 2), Err(SignalError::Peer(_))));
        // The pending entry must not leak on the failure path.
        assert_eq!(rig.session.describe_requests.len(), 0);
        assert!(rig.msg_rx.try_recv().is_err());
    }

    #[test]
    fn prepared_with_no_pending_request_disconnects() {
        let mut rig = rig(Some("v=0\r\n"));
        let signal = PeerSignal {
            session: "1".to_string(),
            cseq: 9,
            event: PeerEvent::Prepared,
        };
        assert!(rig.session.on_peer_signal(signal).is_err());
    }

    #[test]
    fn duplicate_describe_cseq_rejected_before_peer_creation() {
        let (msg_tx, _msg_rx) = mpsc::unbounded_channel();
        let (peer_tx, _peer_rx) = mpsc::unbounded_channel();
        let log = Arc::new(Mutex::new(PeerLog::default()));
        let created = Arc::new(Mutex::new(0u32));
        let create_peer: PeerFactory = Box::new({
            let log = log.clone();
            let created = created.clone();
            move |_uri| {
                *created.lock().unwrap() += 1;
                Some(Box::new(TestPeer {
                    sdp: Some("v=0\r\n".to_string()),
                    log: log.clone(),
                }) as Box<dyn WebRtcPeer>)
            }
        });
        let mut session = ServerSession::new(create_peer, None, Vec::new(), msg_tx, peer_tx);

        let req = Request::new(Method::Describe, "bars", 2);
        session.handle_message(Message::Request(req)).unwrap();

        // The first DESCRIBE is still pending; its CSeq must be refused
        // without constructing (and silently dropping) another peer.
        let dup = Request::new(Method::Describe, "bars", 2);
        assert!(session.handle_message(Message::Request(dup)).is_err());
        assert_eq!(*created.lock().unwrap(), 1);
        assert_eq!(session.describe_requests.len(), 1);
    }

    #[test]
    fn session_ids_increase_per_describe() {
        let mut rig = rig(Some("v=0\r\n"));
        describe(&mut rig, 2).unwrap();
        describe(&mut rig, 3).unwrap();
        assert_eq!(next_response(&mut rig.msg_rx).session, "1");
        assert_eq!(next_response(&mut rig.msg_rx).session, "2");
    }

    #[test]
    fn setup_sdp_reaches_peer_and_releases_create_request() {
        let mut rig = rig(Some("v=0\r\n"));
        describe(&mut rig, 2).unwrap();
        next_response(&mut rig.msg_rx);

        let mut req = Request::new(Method::Setup, "bars", 3);
        req.session = "1".to_string();
        req.headers.add("Content-Type", "application/sdp");
        req.body = "v=0\r\nanswer\r\n".to_string();
        rig.session.handle_message(Message::Request(req)).unwrap();

        assert_eq!(next_response(&mut rig.msg_rx).status, status::OK);
        assert_eq!(
            rig.log.lock().unwrap().remote_sdp,
            vec!["v=0\r\nanswer\r\n"]
        );
        assert!(rig.session.media_sessions["1"].create_request.is_none());
    }

    #[test]
    fn setup_ice_applies_every_candidate() {
        let mut rig = rig(Some("v=0\r\n"));
        describe(&mut rig, 2).unwrap();
        next_response(&mut rig.msg_rx);

        let mut req = Request::new(Method::Setup, "bars", 3);
        req.session = "1".to_string();
        req.headers.add("Content-Type", ice::CONTENT_TYPE);
        req.body = "0/candidate:1\r\n1/candidate:2\r\n".to_string();
        rig.session.handle_message(Message::Request(req)).unwrap();

        assert_eq!(next_response(&mut rig.msg_rx).status, status::OK);
        assert_eq!(
            rig.log.lock().unwrap().candidates,
            vec![(0, "candidate:1".to_string()), (1, "candidate:2".to_string())]
        );
    }

    #[test]
    fn setup_ice_bad_line_applies_nothing() {
        let mut rig = rig(Some("v=0\r\n"));
        describe(&mut rig, 2).unwrap();
        next_response(&mut rig.msg_rx);

        let mut req = Request::new(Method::Setup, "bars", 3);
        req.session = "1".to_string();
        req.headers.add("Content-Type", ice::CONTENT_TYPE);
        req.body = "0/candidate:1\r\n-2/candidate:2\r\n".to_string();
        assert!(rig.session.handle_message(Message::Request(req)).is_err());
        assert!(rig.log.lock().unwrap().candidates.is_empty());
    }

    #[test]
    fn setup_ice_unterminated_body_rejected() {
        let mut rig = rig(Some("v=0\r\n"));
        describe(&mut rig, 2).unwrap();
        next_response(&mut rig.msg_rx);

        let mut req = Request::new(Method::Setup, "bars", 3);
        req.session = "1".to_string();
        req.headers.add("Content-Type", ice::CONTENT_TYPE);
        req.body = "0/candidate:1".to_string();
        assert!(rig.session.handle_message(Message::Request(req)).is_err());
    }

    #[test]
    fn setup_unknown_session_disconnects() {
        let mut rig = rig(Some("v=0\r\n"));
        let mut req = Request::new(Method::Setup, "bars", 3);
        req.session = "9".to_string();
        req.headers.add("Content-Type", "application/sdp");
        req.body = "v=0\r\n".to_string();
        assert!(matches!(
            rig.session.handle_message(Message::Request(req)),
            Err(SignalError::SessionNotFound(_))
        ));
    }

    #[test]
    fn play_starts_peer() {
        let mut rig = rig(Some("v=0\r\n"));
        describe(&mut rig, 2).unwrap();
        next_response(&mut rig.msg_rx);

        let mut req = Request::new(Method::Play, "bars", 4);
        req.session = "1".to_string();
        rig.session.handle_message(Message::Request(req)).unwrap();

        assert_eq!(next_response(&mut rig.msg_rx).status, status::OK);
        assert_eq!(rig.log.lock().unwrap().played, 1);
    }

    #[test]
    fn play_without_session_disconnects() {
        let mut rig = rig(Some("v=0\r\n"));
        let req = Request::new(Method::Play, "bars", 4);
        assert!(rig.session.handle_message(Message::Request(req)).is_err());
    }

    #[test]
    fn announce_disabled_answers_405() {
        let mut rig = rig(Some("v=0\r\n"));
        let mut req = Request::new(Method::Announce, "uplink", 2);
        req.headers.add("Content-Type", "application/sdp");
        req.body = "v=0\r\n".to_string();
        rig.session.handle_message(Message::Request(req)).unwrap();
        assert_eq!(
            next_response(&mut rig.msg_rx).status,
            status::METHOD_NOT_ALLOWED
        );
    }

    #[test]
    fn announce_flow_creates_record_session() {
        let mut rig = rig_with(Some("v=0\r\nanswer\r\n"), true);
        let mut req = Request::new(Method::Announce, "uplink", 2);
        req.headers.add("Content-Type", "application/sdp");
        req.body = "v=0\r\noffer\r\n".to_string();
        rig.session.handle_message(Message::Request(req)).unwrap();
        let signal = rig.peer_rx.try_recv().unwrap();
        rig.session.on_peer_signal(signal).unwrap();

        let resp = next_response(&mut rig.msg_rx);
        assert_eq!(resp.status, status::OK);
        assert_eq!(resp.session, "1");
        assert_eq!(resp.body, "v=0\r\nanswer\r\n");
        assert!(rig.session.media_sessions["1"].recorder);
        assert_eq!(rig.session.announce_requests.len(), 0);
        assert_eq!(rig.log.lock().unwrap().remote_sdp, vec!["v=0\r\noffer\r\n"]);

        // RECORD starts the media flow; PLAY is refused on a recorder.
        let mut record = Request::new(Method::Record, "uplink", 3);
        record.session = "1".to_string();
        rig.session
            .handle_message(Message::Request(record))
            .unwrap();
        assert_eq!(next_response(&mut rig.msg_rx).status, status::OK);
        assert_eq!(rig.log.lock().unwrap().played, 1);

        let mut play = Request::new(Method::Play, "uplink", 4);
        play.session = "1".to_string();
        assert!(rig.session.handle_message(Message::Request(play)).is_err());
    }

    #[test]
    fn record_on_playback_session_disconnects() {
        let mut rig = rig_with(Some("v=0\r\n"), true);
        describe(&mut rig, 2).unwrap();
        next_response(&mut rig.msg_rx);

        let mut req = Request::new(Method::Record, "bars", 3);
        req.session = "1".to_string();
        assert!(rig.session.handle_message(Message::Request(req)).is_err());
    }

    #[test]
    fn teardown_stops_peer_and_erases_session() {
        let mut rig = rig(Some("v=0\r\n"));
        describe(&mut rig, 2).unwrap();
        next_response(&mut rig.msg_rx);

        let mut req = Request::new(Method::Teardown, "bars", 5);
        req.session = "1".to_string();
        rig.session.handle_message(Message::Request(req)).unwrap();

        assert_eq!(next_response(&mut rig.msg_rx).status, status::OK);
        assert!(rig.session.media_sessions.is_empty());
        assert!(rig.log.lock().unwrap().stopped >= 1);

        // The id is never reused.
        describe(&mut rig, 6).unwrap();
        assert_eq!(next_response(&mut rig.msg_rx).session, "2");
    }

    #[test]
    fn teardown_unknown_session_disconnects() {
        let mut rig = rig(Some("v=0\r\n"));
        let mut req = Request::new(Method::Teardown, "bars", 5);
        req.session = "9".to_string();
        assert!(matches!(
            rig.session.handle_message(Message::Request(req)),
            Err(SignalError::SessionNotFound(_))
        ));
        assert!(rig.msg_rx.try_recv().is_err());
    }

    #[test]
    fn ice_candidate_signal_emits_setup_request() {
        let mut rig = rig(Some("v=0\r\n"));
        describe(&mut rig, 2).unwrap();
        next_response(&mut rig.msg_rx);

        rig.session
            .on_peer_signal(PeerSignal {
                session: "1".to_string(),
                cseq: 0,
                event: PeerEvent::IceCandidate {
                    mline_index: 0,
                    candidate: "candidate:1 1 UDP 2130706431 10.0.0.1 5000 typ host".to_string(),
                },
            })
            .unwrap();

        let req = next_request(&mut rig.msg_rx);
        assert_eq!(req.method, Method::Setup);
        assert_eq!(req.uri, "bars");
        assert_eq!(req.session, "1");
        assert_eq!(req.content_type(), Some(ice::CONTENT_TYPE));
        assert_eq!(
            req.body,
            "0/candidate:1 1 UDP 2130706431 10.0.0.1 5000 typ host\r\n"
        );
    }

    #[test]
    fn eos_sends_teardown_and_erases_session() {
        let mut rig = rig(Some("v=0\r\n"));
        describe(&mut rig, 2).unwrap();
        next_response(&mut rig.msg_rx);

        rig.session
            .on_peer_signal(PeerSignal {
                session: "1".to_string(),
                cseq: 0,
                event: PeerEvent::Eos,
            })
            .unwrap();

        let req = next_request(&mut rig.msg_rx);
        assert_eq!(req.method, Method::Teardown);
        assert_eq!(req.session, "1");
        assert!(rig.session.media_sessions.is_empty());

        // A second EOS for the same session is a no-op.
        rig.session
            .on_peer_signal(PeerSignal {
                session: "1".to_string(),
                cseq: 0,
                event: PeerEvent::Eos,
            })
            .unwrap();
    }

    #[test]
    fn late_setup_response_after_teardown_is_dropped() {
        let mut rig = rig(Some("v=0\r\n"));
        describe(&mut rig, 2).unwrap();
        next_response(&mut rig.msg_rx);

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
        let ice_setup = next_request(&mut rig.msg_rx);

        let mut teardown = Request::new(Method::Teardown, "bars", 9);
        teardown.session = "1".to_string();
        rig.session
            .handle_message(Message::Request(teardown))
            .unwrap();
        next_response(&mut rig.msg_rx);

        // The ICE SETUP response arrives after the session is gone.
        let resp = Response::ok(ice_setup.cseq, "1".to_string());
        rig.session
            .handle_message(Message::Response(resp))
            .unwrap();
        assert_eq!(rig.session.ctx.outstanding_len(), 0);
    }
}
