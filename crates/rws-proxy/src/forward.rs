//! ForwardContext: the rendezvous registry and router.
//!
//! Maps source names to back sessions, binds each front session to the
//! back its first request names, and rewrites CSeqs while relaying
//! requests and responses across the boundary. SessionIds pass through
//! unchanged (they are unique per back endpoint); the per-back session
//! table records which front owns each of them so back-initiated
//! requests find their way.

use rws_core::message::{status, CSeq, Message, Method, Request, Response, SessionId};
use rws_core::{SignalError, SignalResult};
use std::collections::HashMap;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

/// Command delivered to a connection pump.
#[derive(Debug)]
pub enum ConnCommand {
    /// Serialize and send this message on the connection.
    Send(Message),
    /// Close the connection.
    Disconnect,
}

pub type CommandSender = mpsc::UnboundedSender<ConnCommand>;

struct FrontEntry {
    tx: CommandSender,
    /// The back this front got bound to by its first forwarded request.
    bound_back: Option<u64>,
    /// Proxy-side CSeq space for back-initiated requests toward this front.
    next_cseq: CSeq,
    /// front_cseq → (back_id, back_cseq): back-initiated requests awaiting
    /// this front's response.
    pending: HashMap<CSeq, (u64, CSeq)>,
}

struct BackEntry {
    name: String,
    tx: CommandSender,
    /// Proxy-side CSeq space for front-originated requests toward this back.
    next_cseq: CSeq,
    /// back_cseq → (front_id, front_cseq, method): front-originated
    /// requests awaiting this back's response.
    pending: HashMap<CSeq, (u64, CSeq, Method)>,
    /// Back-side SessionId → owning front, learned from 2xx responses.
    sessions: HashMap<SessionId, u64>,
}

#[derive(Default)]
struct ForwardState {
    fronts: HashMap<u64, FrontEntry>,
    backs: HashMap<u64, BackEntry>,
    back_by_name: HashMap<String, u64>,
    next_id: u64,
}

impl ForwardState {
    fn alloc_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Process-lived registry pairing front viewers with named back sources.
#[derive(Default)]
pub struct ForwardContext {
    state: Mutex<ForwardState>,
}

impl ForwardContext {
    pub fn new() -> Self {
        ForwardContext::default()
    }

    /// Admit a front connection; the returned id identifies it in every
    /// later call.
    pub async fn register_front_session(&self, tx: CommandSender) -> u64 {
        let mut state = self.state.lock().await;
        let id = state.alloc_id();
        state.fronts.insert(
            id,
            FrontEntry {
                tx,
                bound_back: None,
                next_cseq: 1,
                pending: HashMap::new(),
            },
        );
        debug!(front = id, "front session registered");
        id
    }

    /// Forget a front connection, dropping its translations from the back
    /// it was bound to. The back and its other fronts are untouched.
    pub async fn remove_front_session(&self, id: u64) {
        let mut state = self.state.lock().await;
        let Some(front) = state.fronts.remove(&id) else {
            return;
        };
        if let Some(back_id) = front.bound_back {
            if let Some(back) = state.backs.get_mut(&back_id) {
                back.pending.retain(|_, (front_id, _, _)| *front_id != id);
                back.sessions.retain(|_, front_id| *front_id != id);
            }
        }
        debug!(front = id, "front session removed");
    }

    /// Make a back session discoverable under `name`. Fails when the name
    /// is already taken by a live back.
    pub async fn register_back_session(&self, name: &str, tx: CommandSender) -> Option<u64> {
        let mut state = self.state.lock().await;
        if state.back_by_name.contains_key(name) {
            warn!(name = %name, "back session name already registered");
            return None;
        }
        let id = state.alloc_id();
        state.backs.insert(
            id,
            BackEntry {
                name: name.to_string(),
                tx,
                next_cseq: 1,
                pending: HashMap::new(),
                sessions: HashMap::new(),
            },
        );
        state.back_by_name.insert(name.to_string(), id);
        info!(name = %name, back = id, "back session registered");
        Some(id)
    }

    /// Forget a back session. A stale removal (the name now maps to a
    /// different live back) is ignored. Every front bound to the removed
    /// back is force-disconnected.
    pub async fn remove_back_session(&self, name: &str, id: u64) {
        let mut state = self.state.lock().await;
        if state.back_by_name.get(name) != Some(&id) {
            debug!(name = %name, back = id, "ignoring stale back removal");
            return;
        }
        state.back_by_name.remove(name);
        state.backs.remove(&id);

        let mut dropped = 0usize;
        for front in state.fronts.values_mut() {
            if front.bound_back == Some(id) {
                front.bound_back = None;
                front.pending.retain(|_, (back_id, _)| *back_id != id);
                let _ = front.tx.send(ConnCommand::Disconnect);
                dropped += 1;
            }
        }
        info!(name = %name, back = id, fronts_dropped = dropped, "back session removed");
    }

    /// Relay a front-originated request to its back. The first request
    /// binds the front: the URI's `<name>/` prefix picks the back, and
    /// later requests reuse the binding. An unknown name answers 404 and
    /// keeps the front open; a bound-but-gone back answers 503.
    pub async fn forward_to_back_session(&self, front_id: u64, request: Request) -> SignalResult<()> {
        let mut state = self.state.lock().await;
        let state = &mut *state;

        let front = state
            .fronts
            .get_mut(&front_id)
            .ok_or_else(|| SignalError::protocol("forward from unknown front"))?;

        let back_id = match front.bound_back {
            Some(back_id) => back_id,
            None => {
                let (name, _path) = split_source_uri(&request.uri);
                match state.back_by_name.get(name) {
                    Some(&back_id) => {
                        front.bound_back = Some(back_id);
                        back_id
                    }
                    None => {
                        debug!(front = front_id, name = %name, "no back session for name");
                        reply(front, error_response(status::NOT_FOUND, &request));
                        return Ok(());
                    }
                }
            }
        };

        let Some(back) = state.backs.get_mut(&back_id) else {
            reply(front, error_response(status::SERVICE_UNAVAILABLE, &request));
            return Ok(());
        };

        let mut forwarded = request;
        forwarded.uri = strip_source_prefix(&forwarded.uri, &back.name).to_string();

        let back_cseq = back.next_cseq;
        back.next_cseq += 1;
        back.pending
            .insert(back_cseq, (front_id, forwarded.cseq, forwarded.method));
        forwarded.cseq = back_cseq;

        if back.tx.send(ConnCommand::Send(Message::Request(forwarded))).is_err() {
            back.pending.remove(&back_cseq);
        }
        Ok(())
    }

    /// Relay a front's response to the back that initiated the request.
    ///
    /// # Errors
    ///
    /// A CSeq with no recorded translation is a protocol error and
    /// disconnects the front (only).
    pub async fn forward_response_to_back(
        &self,
        front_id: u64,
        mut response: Response,
    ) -> SignalResult<()> {
        let mut state = self.state.lock().await;
        let state = &mut *state;

        let front = state
            .fronts
            .get_mut(&front_id)
            .ok_or_else(|| SignalError::protocol("response from unknown front"))?;
        let (back_id, back_cseq) = front.pending.remove(&response.cseq).ok_or_else(|| {
            SignalError::protocol(format!("front response with untranslatable CSeq {}", response.cseq))
        })?;

        if let Some(back) = state.backs.get(&back_id) {
            response.cseq = back_cseq;
            let _ = back.tx.send(ConnCommand::Send(Message::Response(response)));
        }
        Ok(())
    }

    /// Relay a back-initiated request (trickled ICE, EOS teardown) to the
    /// front that owns its SessionId. A session whose front has since
    /// left is dropped — trickling is best-effort.
    pub async fn forward_to_front_session(&self, back_id: u64, mut request: Request) -> SignalResult<()> {
        let mut state = self.state.lock().await;
        let state = &mut *state;

        let back = state
            .backs
            .get_mut(&back_id)
            .ok_or_else(|| SignalError::protocol("forward from unknown back"))?;
        if request.session.is_empty() {
            return Err(SignalError::protocol("back request without session"));
        }

        let Some(&front_id) = back.sessions.get(&request.session) else {
            debug!(back = back_id, session = %request.session, "dropping request for unowned session");
            return Ok(());
        };
        let Some(front) = state.fronts.get_mut(&front_id) else {
            debug!(back = back_id, front = front_id, "dropping request for departed front");
            return Ok(());
        };

        request.uri = format!("{}/{}", back.name, request.uri);
        let front_cseq = front.next_cseq;
        front.next_cseq += 1;
        front.pending.insert(front_cseq, (back_id, request.cseq));
        request.cseq = front_cseq;

        if front.tx.send(ConnCommand::Send(Message::Request(request))).is_err() {
            front.pending.remove(&front_cseq);
        }
        Ok(())
    }

    /// Relay a back's response to the front whose request it answers,
    /// learning SessionId ownership from 2xx responses on the way.
    ///
    /// # Errors
    ///
    /// A CSeq with no recorded translation, or a Session header owned by
    /// a different front, is a protocol error and disconnects the back.
    pub async fn forward_response_to_front(
        &self,
        back_id: u64,
        mut response: Response,
    ) -> SignalResult<()> {
        let mut state = self.state.lock().await;
        let state = &mut *state;

        let back = state
            .backs
            .get_mut(&back_id)
            .ok_or_else(|| SignalError::protocol("response from unknown back"))?;
        let (front_id, front_cseq, method) = back.pending.remove(&response.cseq).ok_or_else(|| {
            SignalError::protocol(format!("back response with untranslatable CSeq {}", response.cseq))
        })?;

        if response.is_success() && !response.session.is_empty() {
            if let Some(&owner) = back.sessions.get(&response.session) {
                if owner != front_id {
                    return Err(SignalError::protocol("session owned by another front"));
                }
            }
            if method == Method::Teardown {
                back.sessions.remove(&response.session);
            } else {
                back.sessions.insert(response.session.clone(), front_id);
            }
        }

        if let Some(front) = state.fronts.get(&front_id) {
            response.cseq = front_cseq;
            let _ = front.tx.send(ConnCommand::Send(Message::Response(response)));
        }
        Ok(())
    }
}

/// Split a front request URI into `(backName, streamPath)`.
fn split_source_uri(uri: &str) -> (&str, &str) {
    uri.split_once('/').unwrap_or((uri, ""))
}

/// Drop the `<name>/` prefix so the back sees its own stream path.
fn strip_source_prefix<'a>(uri: &'a str, name: &str) -> &'a str {
    uri.strip_prefix(name)
        .and_then(|rest| rest.strip_prefix('/'))
        .unwrap_or(uri)
}

fn error_response(code: u16, request: &Request) -> Message {
    Message::Response(Response::with_status(code, request.cseq, request.session.clone()))
}

fn reply(front: &FrontEntry, msg: Message) {
    let _ = front.tx.send(ConnCommand::Send(msg));
}
