//! The viewer client: plays one stream through the rendezvous.

use crate::peer::{ScriptedPeer, VIEWER_ANSWER_SDP};
use crate::ws::{self, Endpoint};
use rws_core::client::ClientSession;
use rws_core::message::Message;
use rws_core::peer::PeerSignal;
use rws_core::{SignalError, SignalResult};
use tokio::sync::mpsc;
use tracing::{info, warn};

impl Endpoint for ClientSession {
    fn on_connected(&mut self) -> SignalResult<()> {
        ClientSession::on_connected(self)
    }

    fn handle_message(&mut self, msg: Message) -> SignalResult<()> {
        ClientSession::handle_message(self, msg)
    }

    fn on_peer_signal(&mut self, signal: PeerSignal) -> SignalResult<()> {
        ClientSession::on_peer_signal(self, signal)
    }
}

/// Connection settings for a standalone viewer.
#[derive(Debug, Clone)]
pub struct ViewerConfig {
    pub server: String,
    pub port: u16,
    /// Stream to play, as `"<source>/<stream>"`.
    pub url: String,
    pub ice_servers: Vec<String>,
}

/// Run a viewer against the rendezvous. Transport failures reconnect on a
/// fixed timer; a torn-down session ends the run.
pub async fn run_viewer(config: ViewerConfig) -> anyhow::Result<()> {
    let ws_url = format!("ws://{}:{}/", config.server, config.port);
    loop {
        let (msg_tx, mut msg_rx) = mpsc::unbounded_channel();
        let (peer_tx, mut peer_rx) = mpsc::unbounded_channel();
        let peer = ScriptedPeer::new(VIEWER_ANSWER_SDP);
        let mut session = ClientSession::new(
            config.url.clone(),
            Box::new(peer),
            config.ice_servers.clone(),
            msg_tx,
            peer_tx,
        );

        match ws::run_session(&ws_url, &mut session, &mut msg_rx, &mut peer_rx).await {
            Err(SignalError::Terminated) => {
                info!("stream ended");
                return Ok(());
            }
            Ok(()) => info!("rendezvous closed the connection"),
            Err(err) => warn!(error = %err, "session failed"),
        }
        tokio::time::sleep(ws::RECONNECT_DELAY).await;
    }
}
