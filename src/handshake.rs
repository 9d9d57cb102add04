// src/handshake.rs

//! Worker readiness handshake.
//!
//! A worker announces that it is reachable by printing exactly one line on
//! stdout:
//!
//! ```text
//! Port/ID:<port>/<name>
//! ```
//!
//! `<port>` is a decimal integer and `<name>` is everything after the first
//! `/` that follows it, so names may themselves contain `/`.

/// Literal prefix of the handshake line.
pub const HANDSHAKE_PREFIX: &str = "Port/ID:";

/// Address announced by a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub port: u16,
    pub name: String,
}

/// Parse a stdout line as a handshake.
///
/// Returns `None` for lines without the prefix and for malformed ones
/// (missing separator, non-numeric or out-of-range port). Callers treat
/// `None` as "not a handshake", never as a failure.
pub fn parse_handshake_line(line: &str) -> Option<Handshake> {
    let rest = line.strip_prefix(HANDSHAKE_PREFIX)?.trim();
    let (port, name) = rest.split_once('/')?;
    let port = port.parse::<u16>().ok()?;

    Some(Handshake {
        port,
        name: name.to_string(),
    })
}

/// True if the line claims to be a handshake, well-formed or not.
pub fn looks_like_handshake(line: &str) -> bool {
    line.starts_with(HANDSHAKE_PREFIX)
}
