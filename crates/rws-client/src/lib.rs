//! rws-client: standalone endpoints for the RTSP-over-WebSocket
//! signalling proxy.
//!
//! Provides the back-source client (registers under a name and serves
//! streams through the rendezvous), the viewer client, the WebSocket
//! connect/reconnect pump, and a scripted peer for harness and tests.

pub mod peer;
pub mod source;
pub mod viewer;
pub mod ws;

pub use peer::{PeerCalls, ScriptedPeer, TEST_PATTERN_SDP, VIEWER_ANSWER_SDP};
pub use source::{run_source, SourceConfig, SourceSession};
pub use viewer::{run_viewer, ViewerConfig};
pub use ws::{run_session, Endpoint, RECONNECT_DELAY};
