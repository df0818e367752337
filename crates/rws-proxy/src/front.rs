//! Viewer-facing proxy session.
//!
//! Answers OPTIONS locally and relays everything else through the
//! [`ForwardContext`] to the back source named by the request URI.

use crate::forward::{CommandSender, ConnCommand, ForwardContext};
use rws_core::message::{Message, Method, Request, Response, SessionId};
use rws_core::SignalResult;
use std::sync::Arc;

/// Methods the proxy itself advertises to viewers.
const PUBLIC_METHODS: &str = "DESCRIBE, SETUP, PLAY, TEARDOWN";

pub struct FrontSession {
    id: u64,
    tx: CommandSender,
    ctx: Arc<ForwardContext>,
}

impl FrontSession {
    pub fn new(id: u64, tx: CommandSender, ctx: Arc<ForwardContext>) -> Self {
        FrontSession { id, tx, ctx }
    }

    pub async fn handle_message(&mut self, msg: Message) -> SignalResult<()> {
        match msg {
            Message::Request(req) if req.method == Method::Options => self.on_options(req),
            Message::Request(req) => self.ctx.forward_to_back_session(self.id, req).await,
            Message::Response(resp) => self.ctx.forward_response_to_back(self.id, resp).await,
        }
    }

    fn on_options(&self, request: Request) -> SignalResult<()> {
        let mut response = Response::ok(request.cseq, SessionId::new());
        response.headers.add("Public", PUBLIC_METHODS);
        let _ = self.tx.send(ConnCommand::Send(Message::Response(response)));
        Ok(())
    }
}
