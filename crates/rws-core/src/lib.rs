//! rws-core: Shared signalling library for RTSP-over-WebSocket WebRTC
//! streaming.
//!
//! Provides the RTSP message model and text codec, ICE candidate body
//! handling, the session base (CSeq/outstanding-request bookkeeping), the
//! client-role and server-role signalling state machines, and the abstract
//! WebRTC peer capability they drive.

pub mod client;
pub mod codec;
pub mod error;
pub mod ice;
pub mod message;
pub mod peer;
pub mod server;
pub mod session;

// Re-export commonly used items at crate root.
pub use client::{ClientSession, ClientState};
pub use codec::{parse_message, serialize_message};
pub use error::{SignalError, SignalResult};
pub use message::{CSeq, Headers, Message, Method, Request, Response, SessionId};
pub use peer::{PeerEvent, PeerEvents, PeerFactory, PeerSignal, WebRtcPeer};
pub use server::ServerSession;
pub use session::SessionCtx;
