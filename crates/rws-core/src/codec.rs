//! Text codec for RTSP messages carried one-per-frame over WebSocket.
//!
//! Wire format (RFC 2326 syntax, CR-LF line endings):
//!
//! ```text
//! Method SP Request-URI SP RTSP/1.0 CRLF      |  RTSP/1.0 SP code SP reason CRLF
//! *(Header: Value CRLF)
//! CRLF
//! [body]
//! ```
//!
//! The body is delimited by `Content-Length`; since every message arrives
//! in its own text frame, the declared length must match the remainder of
//! the frame exactly.

use crate::error::{SignalError, SignalResult};
use crate::message::{status, CSeq, Headers, Message, Method, Request, Response, RTSP_VERSION};

/// Parse a single RTSP message from one WebSocket text frame.
///
/// Responses are recognised by the `RTSP/` start-line prefix, everything
/// else is treated as a request.
///
/// # Errors
///
/// [`SignalError::Parse`] on a malformed start line, header, or body
/// length mismatch; [`SignalError::Protocol`] on a missing or non-numeric
/// CSeq; [`SignalError::UnknownMethod`] on a method outside the supported
/// set (with the CSeq attached when it was readable, so the caller can
/// answer 501).
pub fn parse_message(frame: &str) -> SignalResult<Message> {
    let (head, body) = split_head(frame)?;
    let mut lines = head.split("\r\n");

    let start_line = lines
        .next()
        .filter(|line| !line.is_empty())
        .ok_or_else(|| SignalError::Parse("empty message".into()))?;

    let mut headers = Headers::new();
    let mut cseq: Option<CSeq> = None;
    let mut session = String::new();
    let mut content_length: Option<usize> = None;

    for line in lines {
        let colon = line
            .find(':')
            .ok_or_else(|| SignalError::Parse(format!("malformed header line: {line:?}")))?;
        let name = line[..colon].trim();
        let value = line[colon + 1..].trim();

        if name.eq_ignore_ascii_case("CSeq") {
            let parsed = value
                .parse::<CSeq>()
                .map_err(|_| SignalError::protocol(format!("bad CSeq value: {value:?}")))?;
            cseq = Some(parsed);
        } else if name.eq_ignore_ascii_case("Session") {
            session = value.to_string();
        } else if name.eq_ignore_ascii_case("Content-Length") {
            let parsed = value
                .parse::<usize>()
                .map_err(|_| SignalError::Parse(format!("bad Content-Length: {value:?}")))?;
            content_length = Some(parsed);
        } else {
            headers.add(name, value);
        }
    }

    if body.len() != content_length.unwrap_or(0) {
        return Err(SignalError::Parse(format!(
            "body length mismatch: declared {}, got {}",
            content_length.unwrap_or(0),
            body.len()
        )));
    }

    if let Some(rest) = start_line.strip_prefix("RTSP/") {
        let cseq = cseq.ok_or_else(|| SignalError::protocol("response without CSeq"))?;
        let (status, reason) = parse_status_line(rest)?;
        return Ok(Message::Response(Response {
            status,
            reason,
            cseq,
            session,
            headers,
            body: body.to_string(),
        }));
    }

    let mut parts = start_line.split(' ');
    let (method_name, uri, version) = match (parts.next(), parts.next(), parts.next(), parts.next())
    {
        (Some(method), Some(uri), Some(version), None) => (method, uri, version),
        _ => {
            return Err(SignalError::Parse(format!(
                "malformed request line: {start_line:?}"
            )))
        }
    };
    if version != RTSP_VERSION {
        return Err(SignalError::Parse(format!(
            "unsupported protocol version: {version:?}"
        )));
    }

    let cseq = cseq.ok_or_else(|| SignalError::protocol("request without CSeq"))?;
    let method = Method::from_name(method_name)
        .ok_or(SignalError::UnknownMethod { cseq: Some(cseq) })?;

    Ok(Message::Request(Request {
        method,
        uri: uri.to_string(),
        cseq,
        session,
        headers,
        body: body.to_string(),
    }))
}

/// Serialize a message to its wire form.
///
/// Emits `CSeq`, then `Session` (when non-empty), then the stored headers
/// in insertion order; `Content-Length` is appended iff the body is
/// non-empty.
pub fn serialize_message(msg: &Message) -> String {
    match msg {
        Message::Request(req) => serialize(
            &format!("{} {} {RTSP_VERSION}", req.method, req.uri),
            req.cseq,
            &req.session,
            &req.headers,
            &req.body,
        ),
        Message::Response(resp) => serialize(
            &format!("{RTSP_VERSION} {} {}", resp.status, resp.reason),
            resp.cseq,
            &resp.session,
            &resp.headers,
            &resp.body,
        ),
    }
}

fn serialize(start_line: &str, cseq: CSeq, session: &str, headers: &Headers, body: &str) -> String {
    let mut out = String::with_capacity(start_line.len() + body.len() + 64);
    out.push_str(start_line);
    out.push_str("\r\n");
    out.push_str(&format!("CSeq: {cseq}\r\n"));
    if !session.is_empty() {
        out.push_str(&format!("Session: {session}\r\n"));
    }
    for (name, value) in headers.iter() {
        out.push_str(&format!("{name}: {value}\r\n"));
    }
    if !body.is_empty() {
        out.push_str(&format!("Content-Length: {}\r\n", body.len()));
    }
    out.push_str("\r\n");
    out.push_str(body);
    out
}

/// Split a frame into the head (start line + headers) and the body that
/// follows the first blank line.
fn split_head(frame: &str) -> SignalResult<(&str, &str)> {
    match frame.find("\r\n\r\n") {
        Some(pos) => Ok((&frame[..pos], &frame[pos + 4..])),
        None => Err(SignalError::Parse("message without header terminator".into())),
    }
}

/// Parse the remainder of a response start line after `RTSP/`:
/// `"1.0 200 OK"` → `(200, "OK")`.
fn parse_status_line(rest: &str) -> SignalResult<(u16, String)> {
    let mut parts = rest.splitn(3, ' ');
    let version = parts.next().unwrap_or_default();
    if version != "1.0" {
        return Err(SignalError::Parse(format!(
            "unsupported protocol version: RTSP/{version}"
        )));
    }
    let code = parts
        .next()
        .and_then(|s| s.parse::<u16>().ok())
        .ok_or_else(|| SignalError::Parse("malformed status line".into()))?;
    let reason = parts.next().unwrap_or(status::reason_phrase(code));
    Ok((code, reason.to_string()))
}
