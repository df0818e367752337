//! Source-facing proxy session.
//!
//! The first message on a back connection must be a SET_PARAMETER
//! registration: URI is the source name, the `text/parameters` body
//! carries the pre-shared token. A bad token, an unknown name, or a name
//! collision closes the connection before the source becomes
//! discoverable. The registration answer hands the source the rendezvous'
//! configured ICE servers. After that the session is a pure relay.

use crate::forward::{CommandSender, ConnCommand, ForwardContext};
use rws_core::message::{self, Message, Method, Request, Response, SessionId};
use rws_core::{SignalError, SignalResult};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

pub struct BackSession {
    /// Set once registration succeeds.
    registration: Option<(String, u64)>,
    tx: CommandSender,
    ctx: Arc<ForwardContext>,
    auth_tokens: Arc<HashMap<String, String>>,
    ice_servers: Arc<Vec<String>>,
}

impl BackSession {
    pub fn new(
        tx: CommandSender,
        ctx: Arc<ForwardContext>,
        auth_tokens: Arc<HashMap<String, String>>,
        ice_servers: Arc<Vec<String>>,
    ) -> Self {
        BackSession {
            registration: None,
            tx,
            ctx,
            auth_tokens,
            ice_servers,
        }
    }

    /// `(name, id)` of the registered source, once admitted. The pump
    /// uses it to unregister on disconnect.
    pub fn registration(&self) -> Option<(&str, u64)> {
        self.registration
            .as_ref()
            .map(|(name, id)| (name.as_str(), *id))
    }

    pub async fn handle_message(&mut self, msg: Message) -> SignalResult<()> {
        let Some((_, id)) = &self.registration else {
            return match msg {
                Message::Request(req) if req.method == Method::SetParameter => {
                    self.register(req).await
                }
                _ => Err(SignalError::Unauthorized(
                    "traffic before registration".into(),
                )),
            };
        };
        let id = *id;

        match msg {
            Message::Request(req) => self.ctx.forward_to_front_session(id, req).await,
            Message::Response(resp) => self.ctx.forward_response_to_front(id, resp).await,
        }
    }

    async fn register(&mut self, request: Request) -> SignalResult<()> {
        if request.content_type() != Some(message::TEXT_PARAMETERS) {
            return Err(SignalError::protocol("registration without parameter body"));
        }

        let name = request.uri.clone();
        let token = message::parse_parameters(&request.body)
            .into_iter()
            .find(|(key, _)| key == "token")
            .map(|(_, value)| value);

        let expected = self.auth_tokens.get(&name);
        if expected.is_none() || token.as_deref() != expected.map(String::as_str) {
            warn!(name = %name, "back registration with bad credentials");
            return Err(SignalError::Unauthorized(format!(
                "bad token for source {name:?}"
            )));
        }

        let id = self
            .ctx
            .register_back_session(&name, self.tx.clone())
            .await
            .ok_or_else(|| SignalError::Unauthorized(format!("source name {name:?} in use")))?;
        self.registration = Some((name, id));

        let mut response = Response::ok(request.cseq, SessionId::new());
        if !self.ice_servers.is_empty() {
            response.headers.add("Content-Type", message::TEXT_PARAMETERS);
            response.body = self
                .ice_servers
                .iter()
                .map(|server| message::format_parameter("ice-server", server))
                .collect();
        }
        let _ = self.tx.send(ConnCommand::Send(Message::Response(response)));
        Ok(())
    }
}
