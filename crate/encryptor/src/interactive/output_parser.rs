//! Prompt detection and header/payload splitting of the interactive tool output.
//!
//! The tool has no structured output mode: the passphrase prompt carries no trailing newline
//! and the payload follows a banner emitted by the OpenSSL engine.

use std::io::{ErrorKind, Read};

use base64::{Engine, engine::general_purpose::STANDARD_NO_PAD};
use regex::bytes::Regex;
use tracing::trace;

use crate::{Action, EncryptorError, EncryptorResult};

/// The passphrase prompt printed by the tool
pub const PROMPT: &str = "Enter pass phrase:";

/// Header ends with the engine banner, payload is the first run of non blanks after it
pub const ENCRYPT_PATTERN: &str =
    r#"(?s-u)^(?P<header>.*?engine "chil" set\.)\s*(?P<payload>\S+)"#;

/// Header ends with the engine banner and its line break, payload is everything after it
pub const DECRYPT_PATTERN: &str =
    r#"(?s-u)^(?P<header>.*?engine "chil" set\.(?:\r?\n)?)(?P<payload>.*)$"#;

/// Read one byte at a time until `marker` has been read or the stream ends.
///
/// A read error ends the stream: whatever was buffered is returned.
pub fn read_until_prompt<R: Read + ?Sized>(reader: &mut R, marker: &str) -> Vec<u8> {
    read_until(reader, Some(marker.as_bytes()))
}

/// Read everything up to the end of the stream, a read error or a timeout.
pub fn read_remaining<R: Read + ?Sized>(reader: &mut R) -> Vec<u8> {
    read_until(reader, None)
}

fn read_until<R: Read + ?Sized>(reader: &mut R, marker: Option<&[u8]>) -> Vec<u8> {
    let mut buffer = Vec::new();
    let mut byte = [0_u8; 1];
    loop {
        match reader.read(&mut byte) {
            Ok(0) => break,
            Ok(_) => {
                buffer.push(byte[0]);
                if marker.is_some_and(|marker| buffer.ends_with(marker)) {
                    break;
                }
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => {
                trace!("treating read error as end of output: {e}");
                break;
            }
        }
    }
    buffer
}

/// Remove the prompt that ended the first read, with the line break the tool prints once the
/// pass phrase is entered. Everything after it is left untouched.
fn strip_prompt(captured: &[u8]) -> Vec<u8> {
    let prompt = PROMPT.as_bytes();
    let Some(at) = captured
        .windows(prompt.len())
        .position(|window| window == prompt)
    else {
        return captured.to_vec();
    };
    let rest = &captured[at + prompt.len()..];
    let rest = rest
        .strip_prefix(b"\r\n")
        .or_else(|| rest.strip_prefix(b"\n"))
        .unwrap_or(rest);
    [&captured[..at], rest].concat()
}

/// Extract the result of `action` from the captured tool output, both reads joined.
///
/// The encrypt payload is the base64 emitted by the tool and is decoded here. The decrypt
/// payload is the plaintext and is returned untouched, whatever bytes it holds.
pub fn parse_output(action: Action, captured: &[u8]) -> EncryptorResult<Vec<u8>> {
    let pattern = match action {
        Action::Encrypt => ENCRYPT_PATTERN,
        Action::Decrypt => DECRYPT_PATTERN,
    };
    let text = strip_prompt(captured);
    let payload = Regex::new(pattern)?
        .captures(&text)
        .and_then(|c| c.name("payload"))
        .map(|m| m.as_bytes())
        .ok_or_else(|| EncryptorError::UnparsableToolOutput {
            output: String::from_utf8_lossy(captured).into_owned(),
            pattern: pattern.to_owned(),
        })?;
    match action {
        Action::Encrypt => decode_base64(payload),
        Action::Decrypt => Ok(payload.to_vec()),
    }
}

/// Decode the base64 printed by the tool, ignoring the amount of trailing padding.
fn decode_base64(payload: &[u8]) -> EncryptorResult<Vec<u8>> {
    let unpadded = payload
        .iter()
        .rposition(|b| *b != b'=')
        .map_or(&payload[..0], |last| &payload[..=last]);
    Ok(STANDARD_NO_PAD.decode(unpadded)?)
}
