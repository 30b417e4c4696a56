//! Log format parser using nom
//!
//! File format:
//! ```text
//! PAWKV01\n
//! [version: u32]
//! [record_count: u32]
//! ...records...
//! ```
//!
//! Records are length-prefixed so keys and values may hold any bytes:
//! ```text
//! S<key_len>:<key><value_len>:<value>\n
//! D<key_len>:<key>\n
//! ```

use nom::{
    branch::alt,
    bytes::complete::take,
    character::complete::{char, digit1},
    combinator::{map, map_res},
    sequence::{preceded, terminated, tuple},
    IResult,
};

use crate::error::{Error, Result};

/// Magic header for pawstore log files
pub const PAW_MAGIC: &[u8] = b"PAWKV01\n";

/// Current log format version
pub const FORMAT_VERSION: u32 = 1;

/// Length of the full header in bytes
pub const HEADER_LEN: usize = PAW_MAGIC.len() + 8;

/// Log file header
#[derive(Debug, Clone, PartialEq)]
pub struct LogHeader {
    /// File format version
    pub version: u32,
    /// Number of records written at the last compaction
    pub record_count: u32,
}

/// A single decoded log record
#[derive(Debug, Clone, PartialEq)]
pub enum Record<'a> {
    /// Key was written with the given value
    Set {
        /// Record key
        key: &'a [u8],
        /// Record value
        value: &'a [u8],
    },
    /// Key was removed
    Delete {
        /// Record key
        key: &'a [u8],
    },
}

/// Parse the log header
///
/// Format:
/// ```text
/// PAWKV01\n
/// [4 bytes: version u32 little-endian]
/// [4 bytes: record_count u32 little-endian]
/// ```
pub fn parse_header(input: &[u8]) -> Result<LogHeader> {
    if input.len() < HEADER_LEN {
        return Err(Error::Parse("Input too short for header".to_string()));
    }

    if &input[0..PAW_MAGIC.len()] != PAW_MAGIC {
        return Err(Error::Parse("Invalid pawstore magic header".to_string()));
    }

    let mut version = [0u8; 4];
    version.copy_from_slice(&input[PAW_MAGIC.len()..PAW_MAGIC.len() + 4]);
    let mut record_count = [0u8; 4];
    record_count.copy_from_slice(&input[PAW_MAGIC.len() + 4..HEADER_LEN]);

    Ok(LogHeader {
        version: u32::from_le_bytes(version),
        record_count: u32::from_le_bytes(record_count),
    })
}

/// Create a log header
pub fn create_header(version: u32, record_count: u32) -> Vec<u8> {
    let mut header = Vec::with_capacity(HEADER_LEN);
    header.extend_from_slice(PAW_MAGIC);
    header.extend_from_slice(&version.to_le_bytes());
    header.extend_from_slice(&record_count.to_le_bytes());
    header
}

/// Encode a set record
pub fn encode_set(key: &str, value: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(key.len() + value.len() + 24);
    out.push(b'S');
    push_field(&mut out, key.as_bytes());
    push_field(&mut out, value.as_bytes());
    out.push(b'\n');
    out
}

/// Encode a delete record
pub fn encode_delete(key: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(key.len() + 12);
    out.push(b'D');
    push_field(&mut out, key.as_bytes());
    out.push(b'\n');
    out
}

fn push_field(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(bytes.len().to_string().as_bytes());
    out.push(b':');
    out.extend_from_slice(bytes);
}

fn length(input: &[u8]) -> IResult<&[u8], usize> {
    map_res(map_res(digit1, std::str::from_utf8), |s: &str| {
        s.parse::<usize>()
    })(input)
}

fn field(input: &[u8]) -> IResult<&[u8], &[u8]> {
    let (input, len) = terminated(length, char(':'))(input)?;
    take(len)(input)
}

fn set_record(input: &[u8]) -> IResult<&[u8], Record<'_>> {
    map(preceded(char('S'), tuple((field, field))), |(key, value)| {
        Record::Set { key, value }
    })(input)
}

fn delete_record(input: &[u8]) -> IResult<&[u8], Record<'_>> {
    map(preceded(char('D'), field), |key| Record::Delete { key })(input)
}

/// Parse one newline-terminated record
pub fn parse_record(input: &[u8]) -> IResult<&[u8], Record<'_>> {
    terminated(alt((set_record, delete_record)), char('\n'))(input)
}
