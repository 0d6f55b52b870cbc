//! Binary log record layout.
//!
//! A record is a packed little-endian frame; the encoder and parser below are
//! the only authority on the layout, host struct padding plays no part:
//!
//! | offset | size | field                                        |
//! |--------|------|----------------------------------------------|
//! | 0      | 8    | timestamp (epoch seconds)                    |
//! | 8      | 8    | program counter                              |
//! | 16     | 8    | link register (0 when unavailable)           |
//! | 24     | 2    | magic = low 16 bits of `pc ^ lr ^ 0xA5A5`    |
//! | 26     | 1    | severity                                     |
//! | 27     | 1    | message length (<= [`MESSAGE_MAXLEN`])       |
//! | 28     | n    | message bytes (opaque)                       |
//!
//! Pointer-sized fields are widened to 8 bytes so records written on a 32-bit
//! target parse identically on a 64-bit host.

use core::fmt;

/// Maximum message payload per record, excluding the header.
pub const MESSAGE_MAXLEN: usize = 80;

/// Fixed header size in bytes.
pub const HEADER_LEN: usize = 28;

/// Upper bound on a fully encoded record.
pub const MAX_RECORD_LEN: usize = HEADER_LEN + MESSAGE_MAXLEN;

/// Seed folded into the integrity magic.
const MAGIC_SEED: u16 = 0xA5A5;

/// Record severity, ordered from chattiest to most urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Severity {
    Verbose = 0,
    Debug = 1,
    Info = 2,
    Notice = 3,
    Warn = 4,
    Error = 5,
    Alert = 6,
}

impl Severity {
    pub(crate) fn from_u8(raw: u8) -> Option<Self> {
        Some(match raw {
            0 => Self::Verbose,
            1 => Self::Debug,
            2 => Self::Info,
            3 => Self::Notice,
            4 => Self::Warn,
            5 => Self::Error,
            6 => Self::Alert,
            _ => return None,
        })
    }

    /// Upper-case label used by [`stringify`](crate::logging::Logger::stringify).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Verbose => "VERBOSE",
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Notice => "NOTICE",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
            Self::Alert => "ALERT",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failures surfaced when decoding a stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "record decode errors must be handled"]
pub enum RecordError {
    /// Fewer bytes than a record header.
    Truncated,
    /// The stored magic does not match `pc ^ lr ^ 0xA5A5`.
    BadMagic,
    /// Severity byte outside the known set.
    BadSeverity,
    /// Message length field runs past the buffer or [`MESSAGE_MAXLEN`].
    BadLength,
}

impl fmt::Display for RecordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated => write!(f, "record shorter than its header"),
            Self::BadMagic => write!(f, "record magic mismatch"),
            Self::BadSeverity => write!(f, "unknown record severity"),
            Self::BadLength => write!(f, "record length field out of range"),
        }
    }
}

/// A decoded (or to-be-encoded) log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogRecord<'a> {
    pub timestamp: u64,
    pub pc: u64,
    pub lr: u64,
    pub severity: Severity,
    pub message: &'a [u8],
}

/// Low 16 bits of `pc ^ lr ^ 0xA5A5`.
pub fn compute_magic(pc: u64, lr: u64) -> u16 {
    ((pc ^ lr) as u16) ^ MAGIC_SEED
}

impl<'a> LogRecord<'a> {
    /// Size of this record once encoded, message included.
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.message.len().min(MESSAGE_MAXLEN)
    }

    /// Serialise into `out`. Returns the number of bytes written, or 0 when
    /// `out` cannot hold the record. The message is truncated to
    /// [`MESSAGE_MAXLEN`].
    pub fn encode(&self, out: &mut [u8]) -> usize {
        let msg_len = self.message.len().min(MESSAGE_MAXLEN);
        let total = HEADER_LEN + msg_len;
        if out.len() < total {
            return 0;
        }

        out[0..8].copy_from_slice(&self.timestamp.to_le_bytes());
        out[8..16].copy_from_slice(&self.pc.to_le_bytes());
        out[16..24].copy_from_slice(&self.lr.to_le_bytes());
        out[24..26].copy_from_slice(&compute_magic(self.pc, self.lr).to_le_bytes());
        out[26] = self.severity as u8;
        out[27] = msg_len as u8;
        out[28..total].copy_from_slice(&self.message[..msg_len]);

        total
    }

    /// Decode and validate a record from `raw`.
    pub fn parse(raw: &'a [u8]) -> Result<Self, RecordError> {
        if raw.len() < HEADER_LEN {
            return Err(RecordError::Truncated);
        }

        let timestamp = u64::from_le_bytes(raw[0..8].try_into().unwrap());
        let pc = u64::from_le_bytes(raw[8..16].try_into().unwrap());
        let lr = u64::from_le_bytes(raw[16..24].try_into().unwrap());
        let magic = u16::from_le_bytes(raw[24..26].try_into().unwrap());
        if magic != compute_magic(pc, lr) {
            return Err(RecordError::BadMagic);
        }

        let severity = Severity::from_u8(raw[26]).ok_or(RecordError::BadSeverity)?;

        let msg_len = raw[27] as usize;
        if msg_len > MESSAGE_MAXLEN || HEADER_LEN + msg_len > raw.len() {
            return Err(RecordError::BadLength);
        }

        Ok(Self {
            timestamp,
            pc,
            lr,
            severity,
            message: &raw[HEADER_LEN..HEADER_LEN + msg_len],
        })
    }
}
