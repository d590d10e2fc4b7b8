//! Line-level parsing of the SCPI text protocol.
//!
//! A client line carries one or more `;`-separated commands and ends with
//! `\r`, `\n` or both. Each command is one of:
//!
//! - a special command, `*IDN?`, `*RST`, `*ESE 32`;
//! - a continuation, `:UPPEr?`, which reuses the path prefix of the previous
//!   command on the same line;
//! - a path command, `SOURce:CURRent:UPPEr 42`, whose non-final segments may
//!   carry a two-digit channel suffix (`CHANnel02:VOLTage?`).
//!
//! Replies are the answer tokens of the line joined with `;` and followed by
//! `\r\n`. A line with no answers gets an empty reply.

use scpilib_core::error::{Error, Result};
use scpilib_core::key::validate_name;

use crate::codec;

/// Separator between commands and between answer tokens.
pub const SEPARATOR: u8 = b';';

/// Terminator appended to every non-empty reply.
pub const TERMINATOR: &[u8] = b"\r\n";

/// Answer for a write accepted without an explicit reply.
pub const ACK: &str = "ACK";

/// Answer for a command refused because another client holds a lock.
pub const NOT_ALLOWED: &str = "NotAllow";

/// Answer for a syntactically malformed command.
pub const NOK: &str = "NOK";

/// Answer for an unresolvable path or a failed callback.
pub const NAN: &str = "NaN";

/// What the final path segment asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation<'a> {
    /// A query, with optional parameters after the `?`.
    Read {
        /// Text following `?`, trimmed, if non-empty.
        params: Option<&'a str>,
    },
    /// A write with its argument string.
    Write {
        /// Everything after the first space, trimmed.
        arg: &'a str,
    },
}

/// A non-final path segment with its optional channel index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment<'a> {
    /// The segment name with any channel suffix removed.
    pub name: &'a str,
    /// The two-digit channel index, if the segment ended in two digits.
    pub index: Option<u8>,
}

/// A parsed path command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathCommand<'a> {
    /// Segments leading to the target, outermost first.
    pub segments: Vec<Segment<'a>>,
    /// Name of the target node.
    pub name: &'a str,
    /// Query or write.
    pub op: Operation<'a>,
}

/// A parsed special command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpecialRequest<'a> {
    /// Command name without `*`.
    pub name: &'a str,
    /// Whether the command ended in `?`.
    pub query: bool,
    /// The optional argument of a non-query form.
    pub arg: Option<&'a str>,
}

/// Strip trailing `\r`, `\n` and `;` from a raw line.
pub fn trim_line(raw: &[u8]) -> &[u8] {
    let end = raw
        .iter()
        .rposition(|&b| !matches!(b, b'\r' | b'\n' | SEPARATOR))
        .map_or(0, |p| p + 1);
    &raw[..end]
}

/// Split a line into its trimmed commands.
pub fn split_commands(line: &str) -> impl Iterator<Item = &str> {
    line.split(char::from(SEPARATOR)).map(str::trim)
}

/// The path part of a command: everything before the first `?` or space.
fn path_part(cmd: &str) -> &str {
    cmd.find(['?', ' ']).map_or(cmd, |end| &cmd[..end])
}

/// Expand a continuation command against the previous command of the line.
///
/// The continuation inherits the previous command's path up to and
/// including its last `:`. A predecessor without a `:` (a top-level path,
/// a special command or an empty command) lends an empty prefix, so the
/// continuation resolves from the root. Returns `None` only when there is
/// no previous command.
///
/// ```
/// use scpilib_text_io::protocol::expand_continuation;
///
/// assert_eq!(
///     expand_continuation(Some("SOUR:CURR:LOWE?"), ":UPPE?").as_deref(),
///     Some("SOUR:CURR:UPPE?")
/// );
/// assert_eq!(expand_continuation(None, ":UPPE?"), None);
/// ```
pub fn expand_continuation(previous: Option<&str>, cmd: &str) -> Option<String> {
    let previous = previous?;
    let suffix = cmd.strip_prefix(':').unwrap_or(cmd);
    let path = path_part(previous);
    let prefix = path.rfind(':').map_or("", |p| &path[..=p]);
    Some(format!("{prefix}{suffix}"))
}

/// Split a segment into its name and trailing two-digit channel index.
pub fn split_channel(segment: &str) -> Segment<'_> {
    let bytes = segment.as_bytes();
    if bytes.len() >= 2 && bytes[bytes.len() - 2..].iter().all(u8::is_ascii_digit) {
        let (name, digits) = segment.split_at(segment.len() - 2);
        Segment {
            name,
            index: digits.parse().ok(),
        }
    } else {
        Segment {
            name: segment,
            index: None,
        }
    }
}

/// Parse a path command (not special, continuation already expanded).
pub fn parse_path(cmd: &str) -> Result<PathCommand<'_>> {
    let path = path_part(cmd);
    let tail = &cmd[path.len()..];

    let op = if let Some(params) = tail.strip_prefix('?') {
        let params = params.trim();
        Operation::Read {
            params: (!params.is_empty()).then_some(params),
        }
    } else if tail.is_empty() {
        Operation::Read { params: None }
    } else {
        // `tail` starts with the separating space; the rest is taken as sent.
        Operation::Write { arg: &tail[1..] }
    };

    let mut parts = path.split(':');
    let name = parts.next_back().unwrap_or_default();
    let segments = parts
        .map(|part| {
            let segment = split_channel(part);
            validate_name(segment.name).map_err(|_| Error::Malformed(cmd.to_string()))?;
            Ok(segment)
        })
        .collect::<Result<Vec<_>>>()?;
    // A channel suffix on the final segment is well formed but names no
    // leaf, so it is left on `name` for resolution to refuse.
    validate_name(split_channel(name).name).map_err(|_| Error::Malformed(cmd.to_string()))?;

    Ok(PathCommand { segments, name, op })
}

/// Parse a special command, with or without its leading `*`.
pub fn parse_special(cmd: &str) -> Result<SpecialRequest<'_>> {
    let body = cmd.strip_prefix('*').unwrap_or(cmd);
    let request = match body.find(['?', ' ']) {
        Some(p) if body.as_bytes()[p] == b'?' => SpecialRequest {
            name: &body[..p],
            query: true,
            arg: None,
        },
        Some(p) => {
            let arg = body[p + 1..].trim();
            SpecialRequest {
                name: &body[..p],
                query: false,
                arg: (!arg.is_empty()).then_some(arg),
            }
        }
        None => SpecialRequest {
            name: body,
            query: false,
            arg: None,
        },
    };
    validate_name(request.name).map_err(|_| Error::Malformed(cmd.to_string()))?;
    Ok(request)
}

/// Join answer tokens into a reply.
pub fn join_reply(tokens: &[Vec<u8>]) -> Vec<u8> {
    if tokens.is_empty() {
        return Vec::new();
    }
    let mut reply = tokens.join(&SEPARATOR);
    reply.extend_from_slice(TERMINATOR);
    reply
}

/// Length of the first complete reply in `buf`, if one has fully arrived.
///
/// Binary block tokens are skipped by their declared length, so payload
/// bytes that happen to look like separators or terminators do not end
/// the reply early.
pub fn reply_len(buf: &[u8]) -> Option<usize> {
    let mut pos = 0;
    loop {
        if buf.get(pos) == Some(&b'#') {
            pos += codec::block_len(&buf[pos..])?;
        }
        loop {
            match *buf.get(pos)? {
                SEPARATOR => {
                    pos += 1;
                    break;
                }
                b'\r' if buf.get(pos + 1) == Some(&b'\n') => return Some(pos + 2),
                _ => pos += 1,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // -----------------------------------------------------------------------
    // Line handling
    // -----------------------------------------------------------------------

    #[test]
    fn trim_line_strips_trailing_separators() {
        assert_eq!(trim_line(b"*IDN?\r\n"), b"*IDN?");
        assert_eq!(trim_line(b"A?;B?;\n"), b"A?;B?");
        assert_eq!(trim_line(b";;\r\n"), b"");
        assert_eq!(trim_line(b""), b"");
    }

    #[test]
    fn split_commands_trims_each() {
        let cmds: Vec<_> = split_commands(" *IDN? ; SOUR:CURR:UPPER?").collect();
        assert_eq!(cmds, ["*IDN?", "SOUR:CURR:UPPER?"]);
    }

    #[test]
    fn join_reply_terminates() {
        assert_eq!(join_reply(&[b"7".to_vec(), b"ACK".to_vec()]), b"7;ACK\r\n");
        assert_eq!(join_reply(&[]), b"");
    }

    // -----------------------------------------------------------------------
    // Continuations
    // -----------------------------------------------------------------------

    #[test]
    fn continuation_inherits_prefix() {
        assert_eq!(
            expand_continuation(Some("SOUR:CURR:LOWE?"), ":UPPE?").as_deref(),
            Some("SOUR:CURR:UPPE?")
        );
    }

    #[test]
    fn continuation_ignores_colons_in_arguments() {
        assert_eq!(
            expand_continuation(Some("SYST:TIME 12:30:00"), ":DATE?").as_deref(),
            Some("SYST:DATE?")
        );
    }

    #[test]
    fn continuation_after_top_level_command() {
        assert_eq!(
            expand_continuation(Some("VOLT?"), ":CURR?").as_deref(),
            Some("CURR?")
        );
    }

    #[test]
    fn continuation_needs_predecessor() {
        assert_eq!(expand_continuation(None, ":UPPE?"), None);
    }

    #[test]
    fn continuation_after_special_or_empty_starts_at_root() {
        assert_eq!(
            expand_continuation(Some("*IDN?"), ":SOUR:CURR:UPPE?").as_deref(),
            Some("SOUR:CURR:UPPE?")
        );
        assert_eq!(expand_continuation(Some(""), ":UPPE?").as_deref(), Some("UPPE?"));
    }

    // -----------------------------------------------------------------------
    // Path commands
    // -----------------------------------------------------------------------

    #[test]
    fn parse_query() {
        let cmd = parse_path("SOUR:CURR:UPPER?").unwrap();
        assert_eq!(
            cmd.segments,
            [
                Segment { name: "SOUR", index: None },
                Segment { name: "CURR", index: None }
            ]
        );
        assert_eq!(cmd.name, "UPPER");
        assert_eq!(cmd.op, Operation::Read { params: None });
    }

    #[test]
    fn parse_query_with_params() {
        let cmd = parse_path("WAVE:DATA?0,100").unwrap();
        assert_eq!(cmd.op, Operation::Read { params: Some("0,100") });
        let cmd = parse_path("SYST:LOCK:REQ? 30").unwrap();
        assert_eq!(cmd.op, Operation::Read { params: Some("30") });
    }

    #[test]
    fn parse_write() {
        let cmd = parse_path("SOUR:CURR:UPPER 42").unwrap();
        assert_eq!(cmd.name, "UPPER");
        assert_eq!(cmd.op, Operation::Write { arg: "42" });
    }

    #[test]
    fn write_argument_is_taken_verbatim() {
        let cmd = parse_path("SOUR:VOLT  HIGH").unwrap();
        assert_eq!(cmd.op, Operation::Write { arg: " HIGH" });
        let cmd = parse_path("SYST:NAME a b").unwrap();
        assert_eq!(cmd.op, Operation::Write { arg: "a b" });
    }

    #[test]
    fn parse_bare_read() {
        let cmd = parse_path("MEAS").unwrap();
        assert!(cmd.segments.is_empty());
        assert_eq!(cmd.op, Operation::Read { params: None });
    }

    #[test]
    fn parse_channel_indices() {
        let cmd = parse_path("CHAN02:INP10:GAIN?").unwrap();
        assert_eq!(
            cmd.segments,
            [
                Segment { name: "CHAN", index: Some(2) },
                Segment { name: "INP", index: Some(10) }
            ]
        );
    }

    #[test]
    fn single_digit_suffix_is_malformed() {
        assert!(matches!(parse_path("CHAN2:GAIN?"), Err(Error::Malformed(_))));
    }

    #[test]
    fn empty_segment_is_malformed() {
        assert!(matches!(parse_path("SOUR::UPPER?"), Err(Error::Malformed(_))));
        assert!(matches!(parse_path("?"), Err(Error::Malformed(_))));
    }

    #[test]
    fn final_segment_keeps_channel_suffix() {
        let cmd = parse_path("CHAN01?").unwrap();
        assert!(cmd.segments.is_empty());
        assert_eq!(cmd.name, "CHAN01");
        let cmd = parse_path("SOUR:CURR:UPPE01?").unwrap();
        assert_eq!(cmd.name, "UPPE01");
    }

    #[test]
    fn final_segment_grammar_errors_are_malformed() {
        assert!(matches!(parse_path("CHAN1?"), Err(Error::Malformed(_))));
        assert!(matches!(parse_path("SOUR:01?"), Err(Error::Malformed(_))));
        assert!(matches!(parse_path("SOUR:CU-RR?"), Err(Error::Malformed(_))));
        assert!(matches!(parse_path("SOUR:CURR012?"), Err(Error::Malformed(_))));
    }

    // -----------------------------------------------------------------------
    // Special commands
    // -----------------------------------------------------------------------

    #[test]
    fn parse_special_forms() {
        assert_eq!(
            parse_special("*IDN?").unwrap(),
            SpecialRequest { name: "IDN", query: true, arg: None }
        );
        assert_eq!(
            parse_special("*RST").unwrap(),
            SpecialRequest { name: "RST", query: false, arg: None }
        );
        assert_eq!(
            parse_special("*ESE 32").unwrap(),
            SpecialRequest { name: "ESE", query: false, arg: Some("32") }
        );
    }

    #[test]
    fn parse_special_rejects_bad_names() {
        assert!(matches!(parse_special("*"), Err(Error::Malformed(_))));
        assert!(matches!(parse_special("*OPC1?"), Err(Error::Malformed(_))));
    }

    // -----------------------------------------------------------------------
    // Reply framing
    // -----------------------------------------------------------------------

    #[test]
    fn reply_len_text() {
        assert_eq!(reply_len(b"7;ACK\r\n"), Some(7));
        assert_eq!(reply_len(b"7;AC"), None);
        assert_eq!(reply_len(b"1\r\n2\r\n"), Some(3));
    }

    #[test]
    fn reply_len_skips_binary_payload() {
        let mut reply = b"#14".to_vec();
        reply.extend_from_slice(b"\r\n;\r");
        reply.extend_from_slice(b";1\r\n");
        assert_eq!(reply_len(&reply), Some(reply.len()));
        assert_eq!(reply_len(&reply[..5]), None);
    }
}
