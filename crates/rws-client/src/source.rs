//! The back-source client: registers at the rendezvous and serves
//! streams through it.
//!
//! `SourceSession` wraps the core server-role state machine with the
//! registration handshake: on connect it sends a SET_PARAMETER carrying
//! the pre-shared token, adopts the ICE servers the rendezvous answers
//! with, and only then lets traffic through to the inner session.

use crate::peer::{ScriptedPeer, TEST_PATTERN_SDP};
use crate::ws::{self, Endpoint};
use rws_core::message::{self, Message, Method, Response};
use rws_core::peer::{PeerSignal, WebRtcPeer};
use rws_core::server::ServerSession;
use rws_core::{SignalError, SignalResult};
use tokio::sync::mpsc;
use tracing::{info, warn};

pub struct SourceSession {
    name: String,
    token: String,
    registered: bool,
    inner: ServerSession,
}

impl SourceSession {
    /// `streams` are the stream paths this source serves; a DESCRIBE for
    /// anything else is rejected.
    pub fn new(
        name: &str,
        token: &str,
        streams: Vec<String>,
        msg_tx: mpsc::UnboundedSender<Message>,
        peer_tx: mpsc::UnboundedSender<PeerSignal>,
    ) -> Self {
        let create_peer = Box::new(move |uri: &str| {
            streams
                .iter()
                .any(|stream| stream == uri)
                .then(|| Box::new(ScriptedPeer::new(TEST_PATTERN_SDP)) as Box<dyn WebRtcPeer>)
        });

        SourceSession {
            name: name.to_string(),
            token: token.to_string(),
            registered: false,
            inner: ServerSession::new(create_peer, None, Vec::new(), msg_tx, peer_tx),
        }
    }

    pub fn registered(&self) -> bool {
        self.registered
    }

    fn on_register_response(&mut self, response: Response) -> SignalResult<()> {
        if !response.is_success() {
            return Err(SignalError::Unauthorized(format!(
                "registration rejected with {}",
                response.status
            )));
        }

        if response.content_type() == Some(message::TEXT_PARAMETERS) {
            let servers: Vec<String> = message::parse_parameters(&response.body)
                .into_iter()
                .filter(|(key, _)| key == "ice-server")
                .map(|(_, value)| value)
                .collect();
            if !servers.is_empty() {
                info!(count = servers.len(), "using ice servers from rendezvous");
                self.inner.set_ice_servers(servers);
            }
        }

        self.registered = true;
        info!(name = %self.name, "registered at rendezvous");
        Ok(())
    }
}

impl Endpoint for SourceSession {
    fn on_connected(&mut self) -> SignalResult<()> {
        let body = message::format_parameter("token", &self.token);
        self.inner
            .ctx_mut()
            .request_set_parameter(&self.name, message::TEXT_PARAMETERS, body);
        Ok(())
    }

    fn handle_message(&mut self, msg: Message) -> SignalResult<()> {
        // Intercept the registration answer; everything else belongs to
        // the inner server session.
        if let Message::Response(resp) = &msg {
            if self.inner.ctx().peek_method(resp.cseq) == Some(Method::SetParameter) {
                let Message::Response(resp) = msg else { unreachable!() };
                self.inner.ctx_mut().correlate(&resp)?;
                return self.on_register_response(resp);
            }
        }

        if !self.registered {
            return Err(SignalError::protocol("traffic before registration completed"));
        }
        self.inner.handle_message(msg)
    }

    fn on_peer_signal(&mut self, signal: PeerSignal) -> SignalResult<()> {
        self.inner.on_peer_signal(signal)
    }
}

/// Connection settings for a standalone source.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub server: String,
    pub port: u16,
    pub name: String,
    pub token: String,
    pub streams: Vec<String>,
}

/// Run a source against the rendezvous, reconnecting forever on a fixed
/// timer.
pub async fn run_source(config: SourceConfig) -> ! {
    let url = format!("ws://{}:{}/", config.server, config.port);
    loop {
        let (msg_tx, mut msg_rx) = mpsc::unbounded_channel();
        let (peer_tx, mut peer_rx) = mpsc::unbounded_channel();
        let mut session = SourceSession::new(
            &config.name,
            &config.token,
            config.streams.clone(),
            msg_tx,
            peer_tx,
        );

        match ws::run_session(&url, &mut session, &mut msg_rx, &mut peer_rx).await {
            Ok(()) => info!("rendezvous closed the connection"),
            Err(SignalError::Terminated) => info!("session ended"),
            Err(err) => warn!(error = %err, "session failed"),
        }
        tokio::time::sleep(ws::RECONNECT_DELAY).await;
    }
}
