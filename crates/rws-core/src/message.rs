//! RTSP message model: methods, headers, requests, and responses.
//!
//! `CSeq`, `Session`, and `Content-Length` are typed fields on
//! [`Request`]/[`Response`] rather than entries in the header list, so the
//! codec can enforce their presence and rewrite them without string
//! matching. All other headers are preserved verbatim, in order.

use std::fmt;

/// Per-connection monotonic sequence number correlating a request with
/// its response.
pub type CSeq = u32;

/// Server-chosen opaque token identifying a media session within one
/// server endpoint. The empty string means "no session".
pub type SessionId = String;

/// Protocol identifier emitted on every start line.
pub const RTSP_VERSION: &str = "RTSP/1.0";

/// RTSP methods honored by this implementation (RFC 2326 §6, reduced to
/// the signalling subset).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Options,
    Describe,
    Announce,
    Setup,
    Play,
    Record,
    Teardown,
    GetParameter,
    SetParameter,
}

impl Method {
    /// Wire name of the method.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Options => "OPTIONS",
            Method::Describe => "DESCRIBE",
            Method::Announce => "ANNOUNCE",
            Method::Setup => "SETUP",
            Method::Play => "PLAY",
            Method::Record => "RECORD",
            Method::Teardown => "TEARDOWN",
            Method::GetParameter => "GET_PARAMETER",
            Method::SetParameter => "SET_PARAMETER",
        }
    }

    /// Parse a wire name. Method names are case-sensitive per RFC 2326.
    pub fn from_name(name: &str) -> Option<Method> {
        match name {
            "OPTIONS" => Some(Method::Options),
            "DESCRIBE" => Some(Method::Describe),
            "ANNOUNCE" => Some(Method::Announce),
            "SETUP" => Some(Method::Setup),
            "PLAY" => Some(Method::Play),
            "RECORD" => Some(Method::Record),
            "TEARDOWN" => Some(Method::Teardown),
            "GET_PARAMETER" => Some(Method::GetParameter),
            "SET_PARAMETER" => Some(Method::SetParameter),
            _ => None,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// RTSP status codes used by the signalling layer.
pub mod status {
    pub const OK: u16 = 200;
    pub const BAD_REQUEST: u16 = 400;
    pub const UNAUTHORIZED: u16 = 401;
    pub const NOT_FOUND: u16 = 404;
    pub const METHOD_NOT_ALLOWED: u16 = 405;
    pub const SESSION_NOT_FOUND: u16 = 454;
    pub const INTERNAL_SERVER_ERROR: u16 = 500;
    pub const NOT_IMPLEMENTED: u16 = 501;
    pub const SERVICE_UNAVAILABLE: u16 = 503;

    /// Canonical reason phrase for a status code.
    pub fn reason_phrase(code: u16) -> &'static str {
        match code {
            OK => "OK",
            BAD_REQUEST => "Bad Request",
            UNAUTHORIZED => "Unauthorized",
            NOT_FOUND => "Not Found",
            METHOD_NOT_ALLOWED => "Method Not Allowed",
            SESSION_NOT_FOUND => "Session Not Found",
            INTERNAL_SERVER_ERROR => "Internal Server Error",
            NOT_IMPLEMENTED => "Not Implemented",
            SERVICE_UNAVAILABLE => "Service Unavailable",
            _ => "Unknown",
        }
    }
}

/// Ordered header list with case-insensitive lookup (RFC 2326 §4.2).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    pub fn new() -> Self {
        Headers(Vec::new())
    }

    /// Append a header, keeping insertion order.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }

    /// First value for `name`, compared case-insensitively.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(name, value)| (name.as_str(), value.as_str()))
    }
}

/// A parsed RTSP request.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: Method,
    pub uri: String,
    pub cseq: CSeq,
    /// Session header value; empty when the request carries none.
    pub session: SessionId,
    pub headers: Headers,
    pub body: String,
}

impl Request {
    pub fn new(method: Method, uri: impl Into<String>, cseq: CSeq) -> Self {
        Request {
            method,
            uri: uri.into(),
            cseq,
            session: SessionId::new(),
            headers: Headers::new(),
            body: String::new(),
        }
    }

    /// Content-Type header value, if any.
    pub fn content_type(&self) -> Option<&str> {
        self.headers.get("Content-Type")
    }
}

/// A parsed RTSP response.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    pub reason: String,
    pub cseq: CSeq,
    /// Session header value; empty when the response carries none.
    pub session: SessionId,
    pub headers: Headers,
    pub body: String,
}

impl Response {
    /// Build a 200 OK echoing `cseq`, with the Session header set when
    /// `session` is non-empty.
    pub fn ok(cseq: CSeq, session: SessionId) -> Self {
        Response::with_status(status::OK, cseq, session)
    }

    /// Build a response with an arbitrary status and its canonical
    /// reason phrase.
    pub fn with_status(status: u16, cseq: CSeq, session: SessionId) -> Self {
        Response {
            status,
            reason: status::reason_phrase(status).to_string(),
            cseq,
            session,
            headers: Headers::new(),
            body: String::new(),
        }
    }

    /// Whether the status code is 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get("Content-Type")
    }
}

/// One RTSP message, as carried in a single WebSocket text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request(Request),
    Response(Response),
}

/// Parse the `Public` header value of an OPTIONS response into method
/// names.
pub fn parse_public(value: &str) -> Vec<&str> {
    value.split(',').map(str::trim).filter(|s| !s.is_empty()).collect()
}

/// MIME type of `name: value` parameter bodies (GET_PARAMETER /
/// SET_PARAMETER payloads).
pub const TEXT_PARAMETERS: &str = "text/parameters";

/// Render one `name: value` parameter line, CR-LF terminated.
pub fn format_parameter(name: &str, value: &str) -> String {
    format!("{name}: {value}\r\n")
}

/// Parse a `text/parameters` body into `(name, value)` pairs. Lines
/// without a `:` separator and blank lines are skipped.
pub fn parse_parameters(body: &str) -> Vec<(String, String)> {
    body.lines()
        .filter_map(|line| line.split_once(':'))
        .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
        .collect()
}
