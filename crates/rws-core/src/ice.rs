//! ICE candidate bodies for `application/x-ice-candidate` messages.
//!
//! Each candidate travels as one CR-LF-terminated line of the form
//! `"<mlineIndex>/<candidate>"`. The literal candidate value
//! [`END_OF_CANDIDATES`] signals the end of trickling.

use crate::error::{SignalError, SignalResult};

/// Literal candidate meaning "no more candidates".
pub const END_OF_CANDIDATES: &str = "a=end-of-candidates";

/// MIME type of candidate bodies.
pub const CONTENT_TYPE: &str = "application/x-ice-candidate";

/// Render one candidate line, CR-LF terminated.
pub fn format_candidate(mline_index: u32, candidate: &str) -> String {
    format!("{mline_index}/{candidate}\r\n")
}

/// Parse an `application/x-ice-candidate` body into `(mlineIndex,
/// candidate)` pairs.
///
/// Parsing is all-or-nothing: any bad line rejects the whole body, so no
/// candidate from a partially valid body is ever applied. Rejected inputs:
/// an unterminated final line, a missing `/` separator, an empty or
/// non-numeric index field, an empty candidate.
pub fn parse_candidates(body: &str) -> SignalResult<Vec<(u32, String)>> {
    let mut candidates = Vec::new();
    let mut rest = body;

    while !rest.is_empty() {
        let line_end = rest
            .find("\r\n")
            .ok_or_else(|| SignalError::protocol("unterminated ice candidate line"))?;
        let line = &rest[..line_end];

        let sep = line
            .find('/')
            .filter(|&pos| pos > 0)
            .ok_or_else(|| SignalError::protocol("ice candidate line without index"))?;

        let idx = line[..sep]
            .parse::<u32>()
            .map_err(|_| SignalError::protocol(format!("bad mline index: {:?}", &line[..sep])))?;

        let candidate = &line[sep + 1..];
        if candidate.is_empty() {
            return Err(SignalError::protocol("empty ice candidate"));
        }

        candidates.push((idx, candidate.to_string()));
        rest = &rest[line_end + 2..];
    }

    Ok(candidates)
}
