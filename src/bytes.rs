//! Byte-size formatting and parsing.
//!
//! Alert and status lines render sizes with [`format_bytes`]; the config file
//! and command line accept sizes through [`ByteSize`], either as a plain
//! integer number of bytes or as a string such as `"512MiB"` or `"1.5G"`.
//! All units are 1024-based.

use serde::Deserialize;
use std::str::FromStr;

const UNITS: [&str; 7] = ["B", "KiB", "MiB", "GiB", "TiB", "PiB", "EiB"];

/// Render a byte count with binary units, e.g. `1536` → `"1.50 KiB"`.
pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.2} {}", UNITS[unit])
}

/// A size in bytes, parsed from a human-friendly string or an integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(try_from = "RawByteSize")]
pub struct ByteSize(pub u64);

impl ByteSize {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ByteSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&format_bytes(self.0))
    }
}

/// Error produced when a byte-size string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ByteSizeError {
    /// No leading number, e.g. `"MiB"` or `""`.
    MissingNumber(String),
    /// The number part could not be parsed.
    InvalidNumber(String),
    /// The suffix is not a known unit.
    UnknownUnit(String),
    /// The value does not fit in 64 bits.
    Overflow(String),
}

impl std::fmt::Display for ByteSizeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ByteSizeError::MissingNumber(s) => write!(f, "byte size {s:?} has no number"),
            ByteSizeError::InvalidNumber(s) => write!(f, "invalid number in byte size {s:?}"),
            ByteSizeError::UnknownUnit(u) => write!(f, "unknown byte size unit {u:?}"),
            ByteSizeError::Overflow(s) => write!(f, "byte size {s:?} is too large"),
        }
    }
}

impl std::error::Error for ByteSizeError {}

fn unit_multiplier(unit: &str) -> Option<u64> {
    let exp = match unit.to_ascii_lowercase().as_str() {
        "" | "b" => 0,
        "k" | "kb" | "kib" => 1,
        "m" | "mb" | "mib" => 2,
        "g" | "gb" | "gib" => 3,
        "t" | "tb" | "tib" => 4,
        _ => return None,
    };
    Some(1u64 << (10 * exp))
}

impl FromStr for ByteSize {
    type Err = ByteSizeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let split = trimmed
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(trimmed.len());
        let (number, unit) = trimmed.split_at(split);
        if number.is_empty() {
            return Err(ByteSizeError::MissingNumber(s.to_string()));
        }
        let unit = unit.trim();
        let multiplier =
            unit_multiplier(unit).ok_or_else(|| ByteSizeError::UnknownUnit(unit.to_string()))?;

        if number.contains('.') {
            let value: f64 = number
                .parse()
                .map_err(|_| ByteSizeError::InvalidNumber(s.to_string()))?;
            let bytes = value * multiplier as f64;
            if !bytes.is_finite() || bytes >= u64::MAX as f64 {
                return Err(ByteSizeError::Overflow(s.to_string()));
            }
            return Ok(ByteSize(bytes as u64));
        }

        let value: u64 = number
            .parse()
            .map_err(|_| ByteSizeError::Overflow(s.to_string()))?;
        value
            .checked_mul(multiplier)
            .map(ByteSize)
            .ok_or_else(|| ByteSizeError::Overflow(s.to_string()))
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawByteSize {
    Bytes(u64),
    Text(String),
}

impl TryFrom<RawByteSize> for ByteSize {
    type Error = ByteSizeError;

    fn try_from(raw: RawByteSize) -> Result<Self, Self::Error> {
        match raw {
            RawByteSize::Bytes(n) => Ok(ByteSize(n)),
            RawByteSize::Text(s) => s.parse(),
        }
    }
}
