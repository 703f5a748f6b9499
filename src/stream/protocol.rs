//! Line framing for the push protocol
//!
//! The client opens with its push frequency as ASCII decimal followed by `DELIMITER`. Every
//! frame after that is one newline-free JSON payload followed by `DELIMITER`.

use std::io::{BufRead, Write};

use crate::error::{FlightError, Result};

pub const DELIMITER: u8 = b'\n';

/// Frequency requested by a handshake line. Malformed input and anything <= 0 mean
/// single-shot (0).
pub fn parse_frequency(raw: &str) -> u32 {
    let trimmed = raw.trim();
    match trimmed.parse::<i64>() {
        Ok(hz) if hz > 0 => u32::try_from(hz).unwrap_or(u32::MAX),
        Ok(_) => 0,
        Err(_) => {
            log::warn!(
                "[protocol] malformed frequency '{}', sending a single sample",
                trimmed
            );
            0
        }
    }
}

/// Reads one frame. Returns `None` at end of stream; a final unterminated chunk is still
/// returned as a frame.
pub fn read_frame<R: BufRead>(reader: &mut R) -> Result<Option<String>> {
    let mut buf = Vec::new();
    let read = reader.read_until(DELIMITER, &mut buf)?;
    if read == 0 {
        return Ok(None);
    }
    if buf.last() == Some(&DELIMITER) {
        buf.pop();
    }
    Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
}

pub fn write_frame<W: Write>(writer: &mut W, payload: &str) -> Result<()> {
    if payload.as_bytes().contains(&DELIMITER) {
        return Err(FlightError::InvalidParameters(
            "payload contains the frame delimiter".to_string(),
        ));
    }
    writer.write_all(payload.as_bytes())?;
    writer.write_all(&[DELIMITER])?;
    writer.flush()?;
    Ok(())
}

/// Server side of the handshake. A peer that hangs up before sending anything gets
/// single-shot treatment.
pub fn read_handshake<R: BufRead>(reader: &mut R) -> Result<u32> {
    match read_frame(reader)? {
        Some(line) => Ok(parse_frequency(&line)),
        None => {
            log::warn!("[protocol] no handshake received, sending a single sample");
            Ok(0)
        }
    }
}

pub fn write_handshake<W: Write>(writer: &mut W, frequency_hz: u32) -> Result<()> {
    write_frame(writer, &frequency_hz.to_string())
}
