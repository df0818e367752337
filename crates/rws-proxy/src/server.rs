//! Proxy server: two WebSocket listeners and per-connection pumps.
//!
//! Viewers connect on the front port, sources on the back port. Each
//! accepted connection gets one task that pumps inbound frames into its
//! session and drains the session's command channel back onto the socket.
//! Unregistration runs unconditionally when a pump exits, so a dropped
//! connection always cascades per the ForwardContext rules.

use crate::back::BackSession;
use crate::config::ProxyConfig;
use crate::forward::{ConnCommand, ForwardContext};
use crate::front::FrontSession;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use rws_core::codec;
use rws_core::message::{status, Message, Response, SessionId};
use rws_core::{SignalError, SignalResult};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

/// The inverse proxy instance: one ForwardContext, two listeners.
pub struct ProxyServer {
    front_port: u16,
    back_port: u16,
    ctx: Arc<ForwardContext>,
    auth_tokens: Arc<HashMap<String, String>>,
    ice_servers: Arc<Vec<String>>,
}

impl ProxyServer {
    pub fn new(config: ProxyConfig) -> Self {
        ProxyServer {
            front_port: config.front_port,
            back_port: config.back_port,
            ctx: Arc::new(ForwardContext::new()),
            auth_tokens: Arc::new(config.back_auth_tokens),
            ice_servers: Arc::new(config.ice_servers),
        }
    }

    /// Bind both listeners and accept forever. A bind failure propagates
    /// so `main` can exit nonzero.
    pub async fn run(self) -> SignalResult<()> {
        let front_listener = TcpListener::bind(("0.0.0.0", self.front_port)).await?;
        let back_listener = TcpListener::bind(("0.0.0.0", self.back_port)).await?;
        info!(
            front_port = self.front_port,
            back_port = self.back_port,
            "inverse proxy listening"
        );

        loop {
            tokio::select! {
                accepted = front_listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        let ctx = self.ctx.clone();
                        tokio::spawn(async move {
                            handle_front_connection(stream, addr, ctx).await;
                        });
                    }
                    Err(err) => warn!(error = %err, "front accept failed"),
                },
                accepted = back_listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        let ctx = self.ctx.clone();
                        let auth_tokens = self.auth_tokens.clone();
                        let ice_servers = self.ice_servers.clone();
                        tokio::spawn(async move {
                            handle_back_connection(stream, addr, ctx, auth_tokens, ice_servers)
                                .await;
                        });
                    }
                    Err(err) => warn!(error = %err, "back accept failed"),
                },
            }
        }
    }
}

/// Either proxy session, behind one dispatch point for the shared pump.
enum RelaySession {
    Front(FrontSession),
    Back(BackSession),
}

impl RelaySession {
    async fn handle_message(&mut self, msg: Message) -> SignalResult<()> {
        match self {
            RelaySession::Front(session) => session.handle_message(msg).await,
            RelaySession::Back(session) => session.handle_message(msg).await,
        }
    }
}

async fn handle_front_connection(stream: TcpStream, addr: SocketAddr, ctx: Arc<ForwardContext>) {
    let ws = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(err) => {
            warn!(remote = %addr, error = %err, "front websocket handshake failed");
            return;
        }
    };

    let (tx, mut rx) = mpsc::unbounded_channel();
    let id = ctx.register_front_session(tx.clone()).await;
    debug!(front = id, remote = %addr, "viewer connected");

    let mut session = RelaySession::Front(FrontSession::new(id, tx, ctx.clone()));
    pump(ws, &mut rx, &mut session).await;

    ctx.remove_front_session(id).await;
    debug!(front = id, remote = %addr, "viewer disconnected");
}

async fn handle_back_connection(
    stream: TcpStream,
    addr: SocketAddr,
    ctx: Arc<ForwardContext>,
    auth_tokens: Arc<HashMap<String, String>>,
    ice_servers: Arc<Vec<String>>,
) {
    let ws = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(err) => {
            warn!(remote = %addr, error = %err, "back websocket handshake failed");
            return;
        }
    };

    let (tx, mut rx) = mpsc::unbounded_channel();
    debug!(remote = %addr, "source connected");

    let mut session = RelaySession::Back(BackSession::new(
        tx,
        ctx.clone(),
        auth_tokens,
        ice_servers,
    ));
    pump(ws, &mut rx, &mut session).await;

    if let RelaySession::Back(back) = &session {
        if let Some((name, id)) = back.registration() {
            ctx.remove_back_session(name, id).await;
        }
    }
    debug!(remote = %addr, "source disconnected");
}

/// Serialize one message onto the socket.
async fn send_message(
    sink: &mut SplitSink<WebSocketStream<TcpStream>, WsMessage>,
    msg: &Message,
) -> Result<(), ()> {
    sink.send(WsMessage::Text(codec::serialize_message(msg).into()))
        .await
        .map_err(|_| ())
}

/// Drive one connection until either side gives up: inbound WS frames go
/// to the session, commands from the ForwardContext go to the socket.
async fn pump(
    ws: WebSocketStream<TcpStream>,
    rx: &mut mpsc::UnboundedReceiver<ConnCommand>,
    session: &mut RelaySession,
) {
    let (mut sink, mut stream) = ws.split();

    loop {
        tokio::select! {
            frame = stream.next() => {
                let Some(frame) = frame else { break };
                match frame {
                    Ok(WsMessage::Text(text)) => match codec::parse_message(text.as_ref()) {
                        Ok(msg) => {
                            if let Err(err) = session.handle_message(msg).await {
                                close_log(&err);
                                break;
                            }
                        }
                        Err(SignalError::UnknownMethod { cseq: Some(cseq) }) => {
                            let resp = Response::with_status(
                                status::NOT_IMPLEMENTED,
                                cseq,
                                SessionId::new(),
                            );
                            let _ = send_message(&mut sink, &Message::Response(resp)).await;
                            break;
                        }
                        Err(err) => {
                            warn!(error = %err, "closing connection on unparseable frame");
                            break;
                        }
                    },
                    Ok(WsMessage::Ping(payload)) => {
                        let _ = sink.send(WsMessage::Pong(payload)).await;
                    }
                    Ok(WsMessage::Close(_)) => break,
                    Ok(_) => {} // binary and pong frames are ignored
                    Err(err) => {
                        debug!(error = %err, "websocket receive failed");
                        break;
                    }
                }
            }
            cmd = rx.recv() => match cmd {
                Some(ConnCommand::Send(msg)) => {
                    if send_message(&mut sink, &msg).await.is_err() {
                        break;
                    }
                }
                Some(ConnCommand::Disconnect) | None => break,
            }
        }
    }

    // Flush replies queued before the pump gave up (e.g. a 404 issued in
    // the same dispatch that failed), then close.
    while let Ok(ConnCommand::Send(msg)) = rx.try_recv() {
        if send_message(&mut sink, &msg).await.is_err() {
            break;
        }
    }
    let _ = sink.close().await;
}

fn close_log(err: &SignalError) {
    match err {
        SignalError::Terminated => debug!("closing connection after teardown"),
        other => warn!(error = %other, "closing connection"),
    }
}
