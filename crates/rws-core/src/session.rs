//! Session base: CSeq allocation, response correlation, request builders.
//!
//! Every RTSP-over-WS endpoint — client-role, server-role, and the proxy
//! sessions — composes a [`SessionCtx`] instead of inheriting from a
//! common base. Outbound messages go through an unbounded channel drained
//! by the connection pump; requests are recorded by CSeq until their
//! response is correlated.

use crate::error::{SignalError, SignalResult};
use crate::message::{CSeq, Message, Method, Request, Response, SessionId};
use std::collections::HashMap;
use tokio::sync::mpsc;

/// Shared bookkeeping for one RTSP-over-WS endpoint.
#[derive(Debug)]
pub struct SessionCtx {
    next_cseq: CSeq,
    outstanding: HashMap<CSeq, Request>,
    tx: mpsc::UnboundedSender<Message>,
}

impl SessionCtx {
    pub fn new(tx: mpsc::UnboundedSender<Message>) -> Self {
        SessionCtx {
            next_cseq: 1,
            outstanding: HashMap::new(),
            tx,
        }
    }

    /// Allocate a CSeq, record the request, and emit it.
    ///
    /// The stored copy is what response dispatch hands back on
    /// correlation.
    pub fn send_request(&mut self, mut request: Request) -> CSeq {
        let cseq = self.next_cseq;
        self.next_cseq += 1;
        request.cseq = cseq;
        self.outstanding.insert(cseq, request.clone());
        let _ = self.tx.send(Message::Request(request));
        cseq
    }

    /// Emit a response verbatim; its CSeq must already echo the request.
    pub fn send_response(&self, response: Response) {
        let _ = self.tx.send(Message::Response(response));
    }

    /// Emit a plain 200 for `cseq`, with the Session header when
    /// `session` is non-empty.
    pub fn send_ok_response(&self, cseq: CSeq, session: SessionId) {
        self.send_response(Response::ok(cseq, session));
    }

    /// Remove and return the outstanding request matching a response.
    ///
    /// # Errors
    ///
    /// [`SignalError::Protocol`] when no request with that CSeq is in
    /// flight — each entry correlates at most once.
    pub fn correlate(&mut self, response: &Response) -> SignalResult<Request> {
        self.outstanding
            .remove(&response.cseq)
            .ok_or_else(|| SignalError::protocol(format!("response with unknown CSeq {}", response.cseq)))
    }

    /// Method of the in-flight request with `cseq`, if any. Lets an
    /// embedding session intercept selected responses before delegating.
    pub fn peek_method(&self, cseq: CSeq) -> Option<Method> {
        self.outstanding.get(&cseq).map(|req| req.method)
    }

    /// Number of requests awaiting a response.
    pub fn outstanding_len(&self) -> usize {
        self.outstanding.len()
    }

    pub fn request_options(&mut self, uri: &str) -> CSeq {
        self.send_request(Request::new(Method::Options, uri, 0))
    }

    pub fn request_describe(&mut self, uri: &str) -> CSeq {
        self.send_request(Request::new(Method::Describe, uri, 0))
    }

    pub fn request_setup(
        &mut self,
        uri: &str,
        content_type: &str,
        session: SessionId,
        body: String,
    ) -> CSeq {
        let mut request = Request::new(Method::Setup, uri, 0);
        request.session = session;
        request.headers.add("Content-Type", content_type);
        request.body = body;
        self.send_request(request)
    }

    pub fn request_play(&mut self, uri: &str, session: SessionId) -> CSeq {
        let mut request = Request::new(Method::Play, uri, 0);
        request.session = session;
        self.send_request(request)
    }

    pub fn request_teardown(&mut self, uri: &str, session: SessionId) -> CSeq {
        let mut request = Request::new(Method::Teardown, uri, 0);
        request.session = session;
        self.send_request(request)
    }

    pub fn request_set_parameter(&mut self, uri: &str, content_type: &str, body: String) -> CSeq {
        let mut request = Request::new(Method::SetParameter, uri, 0);
        request.headers.add("Content-Type", content_type);
        request.body = body;
        self.send_request(request)
    }
}
