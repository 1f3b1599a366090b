//! Binary codecs for the share link
//!
//! Two independent codecs live here:
//!
//! - **Number arrays**: IEEE-754 32-bit little-endian floats packed into a
//!   byte string and base64-encoded with URL-safe substitutions (`+`→`-`,
//!   `/`→`_`, trailing `=` stripped). Not compressed. Statistics are
//!   rounded to 2 decimals before encoding, so single precision round
//!   trips them within `1e-5`.
//! - **Text compressor**: an LZ77-family byte codec used for the
//!   labels-and-dates string, which is highly repetitive (ISO dates share
//!   long prefixes).
//!
//! # Compressed wire format
//!
//! A token stream. Each token starts with a control byte:
//!
//! | Control | Layout | Meaning |
//! |---------|--------|---------|
//! | `0x00` | `len:u8` + `len` raw bytes | Literal run (1-255 bytes) |
//! | `0x01` | `offset:u16 LE` + `len:u8` | Copy `len` bytes from `offset` back (1-4096), may overlap |
//!
//! Matches shorter than 4 bytes are emitted as literals; runs longer than
//! 255 split into multiple tokens. Decoding a malformed stream is an
//! error, never a partial result.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;

/// Back-reference search window.
const WINDOW: usize = 4096;

/// Shortest emitted match.
const MIN_MATCH: usize = 4;

/// Longest emitted match / literal run.
const MAX_RUN: usize = 255;

const TOKEN_LITERAL: u8 = 0x00;
const TOKEN_MATCH: u8 = 0x01;

/// Decode failures for either codec.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("invalid base64 payload: {0}")]
    InvalidBase64(#[from] base64::DecodeError),
    #[error("number payload length {0} is not a multiple of 4 bytes")]
    TruncatedNumbers(usize),
    #[error("compressed stream ends inside a token")]
    TruncatedToken,
    #[error("unknown token control byte {0:#04x}")]
    UnknownToken(u8),
    #[error("back reference of {offset} at output position {position} points before the stream")]
    BadBackReference { offset: usize, position: usize },
}

/// Encode values as f32 LE bytes, base64url without padding.
pub fn encode_number_array(values: &[f64]) -> String {
    let mut bytes = Vec::with_capacity(values.len() * 4);
    for &value in values {
        bytes.extend_from_slice(&(value as f32).to_le_bytes());
    }
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Decode a base64url f32 LE byte string back into f64 values.
pub fn decode_number_array(encoded: &str) -> Result<Vec<f64>, CodecError> {
    let bytes = URL_SAFE_NO_PAD.decode(encoded)?;
    if bytes.len() % 4 != 0 {
        return Err(CodecError::TruncatedNumbers(bytes.len()));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| {
            let raw = [chunk[0], chunk[1], chunk[2], chunk[3]];
            f32::from_le_bytes(raw) as f64
        })
        .collect())
}

/// Compress a byte string with greedy LZ77 matching.
pub fn compress(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len() / 2 + 8);
    let mut literals: Vec<u8> = Vec::new();
    let mut i = 0;
    while i < input.len() {
        let (length, offset) = longest_match(input, i);
        if length >= MIN_MATCH {
            flush_literals(&mut out, &mut literals);
            out.push(TOKEN_MATCH);
            out.extend_from_slice(&(offset as u16).to_le_bytes());
            out.push(length as u8);
            i += length;
        } else {
            literals.push(input[i]);
            if literals.len() == MAX_RUN {
                flush_literals(&mut out, &mut literals);
            }
            i += 1;
        }
    }
    flush_literals(&mut out, &mut literals);
    out
}

/// Inflate a token stream produced by [`compress`].
pub fn decompress(input: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::with_capacity(input.len() * 2);
    let mut i = 0;
    while i < input.len() {
        match input[i] {
            TOKEN_LITERAL => {
                let length = *input.get(i + 1).ok_or(CodecError::TruncatedToken)? as usize;
                let run = input
                    .get(i + 2..i + 2 + length)
                    .ok_or(CodecError::TruncatedToken)?;
                out.extend_from_slice(run);
                i += 2 + length;
            }
            TOKEN_MATCH => {
                let header = input.get(i + 1..i + 4).ok_or(CodecError::TruncatedToken)?;
                let offset = u16::from_le_bytes([header[0], header[1]]) as usize;
                let length = header[2] as usize;
                if offset == 0 || offset > out.len() {
                    return Err(CodecError::BadBackReference {
                        offset,
                        position: out.len(),
                    });
                }
                // Byte-by-byte so overlapping copies repeat correctly
                let start = out.len() - offset;
                for j in 0..length {
                    let byte = out[start + j];
                    out.push(byte);
                }
                i += 4;
            }
            other => return Err(CodecError::UnknownToken(other)),
        }
    }
    Ok(out)
}

fn flush_literals(out: &mut Vec<u8>, literals: &mut Vec<u8>) {
    if literals.is_empty() {
        return;
    }
    out.push(TOKEN_LITERAL);
    out.push(literals.len() as u8);
    out.extend_from_slice(literals);
    literals.clear();
}

/// Longest match for `input[i..]` within the trailing window.
///
/// Returns `(length, offset)`; offset counts back from `i`. Ties prefer
/// the nearest candidate.
fn longest_match(input: &[u8], i: usize) -> (usize, usize) {
    let window_start = i.saturating_sub(WINDOW);
    let max_length = (input.len() - i).min(MAX_RUN);
    let mut best = (0, 0);
    for start in window_start..i {
        let mut length = 0;
        while length < max_length && input[start + length] == input[i + length] {
            length += 1;
        }
        if length >= best.0 {
            best = (length, i - start);
        }
    }
    best
}
