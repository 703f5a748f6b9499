//! Minimal NMEA 0183 reader: GGA for the fix, RMC for the UTC timestamp
//!
//! Anything malformed (bad checksum, empty fields, no fix quality) is "no fix", never an
//! error. Only I/O failures surface as errors.

use std::io::BufRead;

use chrono::NaiveDate;

use crate::error::Result;
use crate::sensors::PositionSource;
use crate::types::{current_timestamp_micros, PositionSample};

/// Bytes consumed without a complete fix before the pending block is dropped
pub const MAX_BLOCK_BYTES: usize = 1024;

/// `ddmm.mmmm` -> decimal degrees
pub fn degrees_minutes_to_degrees(raw: f64) -> f64 {
    let value = raw / 100.0;
    let whole = value.trunc();
    whole + (value - whole) * 100.0 / 60.0
}

/// Splits a sentence into its fields after checking the optional `*hh` checksum.
fn sentence_fields(line: &str) -> Option<Vec<&str>> {
    let body = line.trim().strip_prefix('$')?;
    if !body.is_ascii() {
        return None;
    }
    let body = match body.split_once('*') {
        Some((data, checksum)) => {
            let expected = u8::from_str_radix(checksum.trim(), 16).ok()?;
            let actual = data.bytes().fold(0u8, |acc, b| acc ^ b);
            if actual != expected {
                return None;
            }
            data
        }
        None => body,
    };
    let fields: Vec<&str> = body.split(',').collect();
    if fields[0].len() != 5 {
        return None;
    }
    Some(fields)
}

fn sentence_type<'a>(fields: &[&'a str]) -> &'a str {
    &fields[0][2..]
}

fn hemisphere(field: &str, allowed: [char; 2]) -> Option<char> {
    let c = field.chars().next()?;
    allowed.contains(&c).then_some(c)
}

/// Parses a `$xxGGA` sentence. The timestamp is left at "now"; RMC supplies the real one.
pub fn parse_gga(line: &str) -> Option<PositionSample> {
    let fields = sentence_fields(line)?;
    if sentence_type(&fields) != "GGA" || fields.len() < 10 {
        return None;
    }
    let quality: u32 = fields[6].parse().ok()?;
    if quality == 0 {
        return None;
    }
    Some(PositionSample {
        timestamp: current_timestamp_micros(),
        latitude: degrees_minutes_to_degrees(fields[2].parse().ok()?),
        latitude_hemisphere: hemisphere(fields[3], ['N', 'S'])?,
        longitude: degrees_minutes_to_degrees(fields[4].parse().ok()?),
        longitude_hemisphere: hemisphere(fields[5], ['E', 'W'])?,
        num_satellites: fields[7].parse().ok()?,
        altitude: fields[9].parse().ok()?,
    })
}

/// UTC microseconds from the `hhmmss.ss` time and `ddmmyy` date of a `$xxRMC` sentence.
pub fn parse_rmc_timestamp(line: &str) -> Option<i64> {
    let fields = sentence_fields(line)?;
    if sentence_type(&fields) != "RMC" || fields.len() < 10 {
        return None;
    }
    let time = fields[1];
    let date = fields[9];
    if time.len() < 6 || date.len() != 6 {
        return None;
    }

    let hour: u32 = time[0..2].parse().ok()?;
    let minute: u32 = time[2..4].parse().ok()?;
    let seconds: f64 = time[4..].parse().ok()?;
    let day: u32 = date[0..2].parse().ok()?;
    let month: u32 = date[2..4].parse().ok()?;
    let year: i32 = 2000 + date[4..6].parse::<i32>().ok()?;

    let micros = ((seconds - seconds.trunc()) * 1e6).round() as u32;
    let stamp = NaiveDate::from_ymd_opt(year, month, day)?.and_hms_micro_opt(
        hour,
        minute,
        seconds.trunc() as u32,
        micros,
    )?;
    Some(stamp.and_utc().timestamp_micros())
}

/// Position source over any line-oriented NMEA stream (serial device, file, socket).
pub struct NmeaSource<R> {
    reader: R,
    poll_interval_millis: u64,
    pending_timestamp: Option<i64>,
    block_bytes: usize,
    line: String,
}

impl<R: BufRead + Send> NmeaSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            poll_interval_millis: 100,
            pending_timestamp: None,
            block_bytes: 0,
            line: String::new(),
        }
    }

    pub fn with_poll_interval(mut self, millis: u64) -> Self {
        self.poll_interval_millis = millis;
        self
    }
}

impl<R: BufRead + Send> PositionSource for NmeaSource<R> {
    fn poll_interval_millis(&self) -> u64 {
        self.poll_interval_millis
    }

    fn read_fix(&mut self) -> Result<Option<PositionSample>> {
        loop {
            self.line.clear();
            let read = self.reader.read_line(&mut self.line)?;
            if read == 0 {
                return Ok(None);
            }

            self.block_bytes += read;
            if let Some(ts) = parse_rmc_timestamp(&self.line) {
                self.pending_timestamp = Some(ts);
            } else if let Some(mut fix) = parse_gga(&self.line) {
                if let Some(ts) = self.pending_timestamp.take() {
                    fix.timestamp = ts;
                }
                self.block_bytes = 0;
                return Ok(Some(fix));
            }

            if self.block_bytes >= MAX_BLOCK_BYTES {
                log::warn!("[gps] dropping {} byte block without a fix", self.block_bytes);
                self.block_bytes = 0;
                self.pending_timestamp = None;
                return Ok(None);
            }
        }
    }
}
