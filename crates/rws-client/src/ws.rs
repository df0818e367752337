//! WebSocket connect-and-pump loop for the standalone endpoints.
//!
//! One task per connection: inbound text frames are parsed and dispatched
//! to the endpoint, outbound messages and peer events are drained from
//! their channels. Any `SignalError` tears the connection down; callers
//! decide whether to reconnect.

use futures_util::{SinkExt, StreamExt};
use rws_core::codec;
use rws_core::message::Message;
use rws_core::peer::PeerSignal;
use rws_core::{SignalError, SignalResult};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::info;

/// Delay before a standalone endpoint reconnects to the rendezvous.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// A signalling endpoint the pump can drive: the source and viewer
/// sessions both wear this.
pub trait Endpoint {
    fn on_connected(&mut self) -> SignalResult<()>;
    fn handle_message(&mut self, msg: Message) -> SignalResult<()>;
    fn on_peer_signal(&mut self, signal: PeerSignal) -> SignalResult<()>;
}

/// Connect to `url` and pump until the connection ends.
///
/// Returns `Ok(())` when the remote closes, the transport error when the
/// socket fails, and whatever the endpoint raised otherwise —
/// [`SignalError::Terminated`] marks a deliberate clean close. Messages
/// the endpoint queued before failing (e.g. the final TEARDOWN ack) are
/// flushed before the socket closes.
pub async fn run_session<E: Endpoint>(
    url: &str,
    endpoint: &mut E,
    msg_rx: &mut mpsc::UnboundedReceiver<Message>,
    peer_rx: &mut mpsc::UnboundedReceiver<PeerSignal>,
) -> SignalResult<()> {
    let (ws, _) = connect_async(url)
        .await
        .map_err(|err| SignalError::Transport(format!("connect {url} failed: {err}")))?;
    info!(url = %url, "connected");
    let (mut sink, mut stream) = ws.split();

    let result = pump(&mut sink, &mut stream, endpoint, msg_rx, peer_rx).await;

    while let Ok(msg) = msg_rx.try_recv() {
        let _ = sink
            .send(WsMessage::Text(codec::serialize_message(&msg).into()))
            .await;
    }
    let _ = sink.close().await;
    result
}

type WsSink = futures_util::stream::SplitSink<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    WsMessage,
>;
type WsStream = futures_util::stream::SplitStream<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
>;

async fn pump<E: Endpoint>(
    sink: &mut WsSink,
    stream: &mut WsStream,
    endpoint: &mut E,
    msg_rx: &mut mpsc::UnboundedReceiver<Message>,
    peer_rx: &mut mpsc::UnboundedReceiver<PeerSignal>,
) -> SignalResult<()> {
    endpoint.on_connected()?;

    loop {
        tokio::select! {
            frame = stream.next() => {
                let Some(frame) = frame else { return Ok(()) };
                match frame {
                    Ok(WsMessage::Text(text)) => {
                        endpoint.handle_message(codec::parse_message(text.as_ref())?)?;
                    }
                    Ok(WsMessage::Ping(payload)) => {
                        let _ = sink.send(WsMessage::Pong(payload)).await;
                    }
                    Ok(WsMessage::Close(_)) => return Ok(()),
                    Ok(_) => {} // binary and pong frames are ignored
                    Err(err) => return Err(SignalError::Transport(err.to_string())),
                }
            }
            Some(msg) = msg_rx.recv() => {
                sink.send(WsMessage::Text(codec::serialize_message(&msg).into()))
                    .await
                    .map_err(|err| SignalError::Transport(err.to_string()))?;
            }
            Some(signal) = peer_rx.recv() => {
                endpoint.on_peer_signal(signal)?;
            }
        }
    }
}
