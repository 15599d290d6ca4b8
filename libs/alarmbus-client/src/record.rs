// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Fixed-size binary alarm record.
//!
//! Every record on the bus, datagram or stream frame, is exactly
//! [`FIXED_SIZE`] bytes in native byte order and C struct layout:
//!
//! ```text
//! offset  size        field
//! 0       2           id      (u16)
//! 2       1           level   (u8)
//! 3       1           kind    (u8)
//! 4       pad         aligns the timestamp words
//! SEC     word        tv_sec  (c_long)
//! USEC    word        tv_usec (c_long)
//! HEADER  8192        message, UTF-8, zero padded
//! ```
//!
//! On 64-bit Linux that is 24 header bytes and 8216 bytes total.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{AlarmError, Result};

/// Lowest valid alarm id.
pub const MIN_ALARM_ID: u16 = 1001;

/// Highest valid alarm id.
pub const MAX_ALARM_ID: u16 = 1128;

/// Number of distinct alarm ids (filter slots).
pub const ALARM_ID_SLOTS: usize = 128;

/// Width of the zero-padded message field.
pub const MESSAGE_CAPACITY: usize = 8192;

const WORD: usize = std::mem::size_of::<libc::c_long>();
const SEC_OFFSET: usize = 4usize.next_multiple_of(WORD);
const USEC_OFFSET: usize = SEC_OFFSET + WORD;

/// Bytes preceding the message field.
pub const HEADER_BYTES: usize = USEC_OFFSET + WORD;

/// Exact encoded size of one record.
pub const FIXED_SIZE: usize = HEADER_BYTES + MESSAGE_CAPACITY;

#[cfg(target_pointer_width = "64")]
const _: () = assert!(FIXED_SIZE == 8216, "record layout drifted from the C struct");

/// Alarm severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AlarmLevel {
    Minor = 1,
    Major = 2,
    Critical = 3,
}

impl AlarmLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlarmLevel::Minor => "MINOR_ALM",
            AlarmLevel::Major => "MAJOR_ALM",
            AlarmLevel::Critical => "CRITICAL_ALM",
        }
    }
}

impl TryFrom<u8> for AlarmLevel {
    type Error = AlarmError;

    fn try_from(code: u8) -> Result<Self> {
        match code {
            1 => Ok(AlarmLevel::Minor),
            2 => Ok(AlarmLevel::Major),
            3 => Ok(AlarmLevel::Critical),
            other => Err(AlarmError::InvalidLevel(other)),
        }
    }
}

/// Whether a record reports a fault appearing or clearing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AlarmKind {
    Occurrence = 1,
    Recovery = 2,
}

impl AlarmKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlarmKind::Occurrence => "ALARM_TYPE_OCCUR",
            AlarmKind::Recovery => "ALARM_TYPE_RECOVER",
        }
    }
}

impl TryFrom<u8> for AlarmKind {
    type Error = AlarmError;

    fn try_from(code: u8) -> Result<Self> {
        match code {
            1 => Ok(AlarmKind::Occurrence),
            2 => Ok(AlarmKind::Recovery),
            other => Err(AlarmError::InvalidKind(other)),
        }
    }
}

/// Wall-clock timestamp in `timeval` form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AlarmTime {
    pub sec: i64,
    pub usec: i64,
}

impl AlarmTime {
    pub fn now() -> Self {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self {
            sec: since_epoch.as_secs() as i64,
            usec: i64::from(since_epoch.subsec_micros()),
        }
    }

    /// Milliseconds since the epoch, saturating at the `i64` bounds.
    pub fn millis(&self) -> i64 {
        self.sec.saturating_mul(1000).saturating_add(self.usec / 1000)
    }
}

/// One alarm, as produced by a health checker and fanned out by the broker.
///
/// Records are immutable once built. The broker forwards the encoded bytes
/// untouched, so a subscriber decodes exactly what the producer encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlarmRecord {
    id: u16,
    level: u8,
    kind: u8,
    time: AlarmTime,
    message: String,
}

impl AlarmRecord {
    /// Build a record stamped with the current time.
    ///
    /// Fails on an id outside 1001..=1128 or a message that leaves no room
    /// for the terminating zero byte C consumers rely on.
    pub fn new(
        id: u16,
        level: AlarmLevel,
        kind: AlarmKind,
        message: impl Into<String>,
    ) -> Result<Self> {
        let message = message.into();
        if !(MIN_ALARM_ID..=MAX_ALARM_ID).contains(&id) {
            return Err(AlarmError::InvalidId(id));
        }
        if message.len() >= MESSAGE_CAPACITY {
            return Err(AlarmError::MessageTooLong {
                len: message.len(),
                capacity: MESSAGE_CAPACITY,
            });
        }
        Ok(Self {
            id,
            level: level as u8,
            kind: kind as u8,
            time: AlarmTime::now(),
            message,
        })
    }

    /// Build a record from raw wire codes without domain checks.
    pub fn from_raw(id: u16, level: u8, kind: u8, time: AlarmTime, message: String) -> Self {
        Self {
            id,
            level,
            kind,
            time,
            message,
        }
    }

    /// Replace the timestamp.
    pub fn with_time(mut self, time: AlarmTime) -> Self {
        self.time = time;
        self
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn level_code(&self) -> u8 {
        self.level
    }

    pub fn kind_code(&self) -> u8 {
        self.kind
    }

    pub fn level(&self) -> Option<AlarmLevel> {
        AlarmLevel::try_from(self.level).ok()
    }

    pub fn kind(&self) -> Option<AlarmKind> {
        AlarmKind::try_from(self.kind).ok()
    }

    pub fn time(&self) -> AlarmTime {
        self.time
    }

    pub fn time_millis(&self) -> i64 {
        self.time.millis()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Re-check the fields the codec accepts loosely.
    ///
    /// The decoder takes any numeric level/kind for compatibility with old
    /// producers; ingest and dispatch call this before acting on a record.
    pub fn validate(&self) -> Result<()> {
        if !(MIN_ALARM_ID..=MAX_ALARM_ID).contains(&self.id) {
            return Err(AlarmError::InvalidId(self.id));
        }
        AlarmLevel::try_from(self.level)?;
        AlarmKind::try_from(self.kind)?;
        Ok(())
    }

    /// Encode into a new [`FIXED_SIZE`] buffer.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let message = self.message.as_bytes();
        if message.len() > MESSAGE_CAPACITY {
            return Err(AlarmError::MessageTooLong {
                len: message.len(),
                capacity: MESSAGE_CAPACITY,
            });
        }

        let mut buf = vec![0u8; FIXED_SIZE];
        buf[0..2].copy_from_slice(&self.id.to_ne_bytes());
        buf[2] = self.level;
        buf[3] = self.kind;
        // Truncates on 32-bit targets, same as the C struct.
        buf[SEC_OFFSET..USEC_OFFSET]
            .copy_from_slice(&(self.time.sec as libc::c_long).to_ne_bytes());
        buf[USEC_OFFSET..HEADER_BYTES]
            .copy_from_slice(&(self.time.usec as libc::c_long).to_ne_bytes());
        buf[HEADER_BYTES..HEADER_BYTES + message.len()].copy_from_slice(message);
        Ok(buf)
    }

    /// Decode one record.
    ///
    /// `bytes` must be exactly [`FIXED_SIZE`] long. A message that is not
    /// valid UTF-8 decodes as empty rather than failing the record.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != FIXED_SIZE {
            return Err(AlarmError::FrameLength {
                expected: FIXED_SIZE,
                actual: bytes.len(),
            });
        }

        let id = u16::from_ne_bytes([bytes[0], bytes[1]]);
        let time = AlarmTime {
            sec: read_word(bytes, SEC_OFFSET),
            usec: read_word(bytes, USEC_OFFSET),
        };

        let field = &bytes[HEADER_BYTES..];
        let end = field.iter().rposition(|&b| b != 0).map_or(0, |last| last + 1);
        let message = String::from_utf8(field[..end].to_vec()).unwrap_or_default();

        Ok(Self {
            id,
            level: bytes[2],
            kind: bytes[3],
            time,
            message,
        })
    }
}

fn read_word(bytes: &[u8], at: usize) -> i64 {
    let mut raw = [0u8; WORD];
    raw.copy_from_slice(&bytes[at..at + WORD]);
    i64::from(libc::c_long::from_ne_bytes(raw))
}

impl fmt::Display for AlarmRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = self.level().map_or("UNKNOWN", |l| l.as_str());
        let kind = self.kind().map_or("UNKNOWN", |k| k.as_str());
        let nanos = (self.time.usec.clamp(0, 999_999) * 1000) as u32;
        let when = chrono::DateTime::from_timestamp(self.time.sec, nanos)
            .map(|utc| {
                utc.with_timezone(&chrono::Local)
                    .format("%Y-%m-%d %H:%M:%S")
                    .to_string()
            })
            .unwrap_or_else(|| "UNKNOWN_TIME".to_string());
        write!(
            f,
            "alarm_id: {}, alarm_level: {}, alarm_type: {}, alarm_time: {}, alarm_msg_len: {}",
            self.id,
            level,
            kind,
            when,
            self.message.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> AlarmRecord {
        AlarmRecord::new(
            1002,
            AlarmLevel::Major,
            AlarmKind::Occurrence,
            "disk sda has slow io event",
        )
        .unwrap()
        .with_time(AlarmTime {
            sec: 1_700_000_000,
            usec: 123_456,
        })
    }

    #[test]
    fn test_encoded_size_is_fixed() {
        let empty = AlarmRecord::new(1001, AlarmLevel::Minor, AlarmKind::Recovery, "").unwrap();
        assert_eq!(empty.encode().unwrap().len(), FIXED_SIZE);
        assert_eq!(sample().encode().unwrap().len(), FIXED_SIZE);
        assert_eq!(FIXED_SIZE, HEADER_BYTES + MESSAGE_CAPACITY);
    }

    #[test]
    fn test_round_trip() {
        let record = sample();
        let decoded = AlarmRecord::decode(&record.encode().unwrap()).unwrap();
        assert_eq!(decoded, record);
        assert_eq!(decoded.level(), Some(AlarmLevel::Major));
        assert_eq!(decoded.kind(), Some(AlarmKind::Occurrence));
        assert_eq!(decoded.message(), "disk sda has slow io event");
    }

    #[test]
    fn test_round_trip_multibyte_message() {
        let record =
            AlarmRecord::new(1128, AlarmLevel::Critical, AlarmKind::Recovery, "磁盘 sdb 恢复")
                .unwrap();
        let decoded = AlarmRecord::decode(&record.encode().unwrap()).unwrap();
        assert_eq!(decoded.message(), "磁盘 sdb 恢复");
        assert_eq!(decoded.id(), 1128);
    }

    #[test]
    fn test_wire_layout() {
        let bytes = sample().encode().unwrap();
        assert_eq!(u16::from_ne_bytes([bytes[0], bytes[1]]), 1002);
        assert_eq!(bytes[2], 2);
        assert_eq!(bytes[3], 1);
        assert_eq!(read_word(&bytes, SEC_OFFSET), 1_700_000_000);
        assert_eq!(read_word(&bytes, USEC_OFFSET), 123_456);
        assert_eq!(&bytes[HEADER_BYTES..HEADER_BYTES + 4], b"disk");
        assert!(bytes[HEADER_BYTES + 26..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_decode_rejects_wrong_length() {
        let bytes = sample().encode().unwrap();
        for len in [0, 1, HEADER_BYTES, FIXED_SIZE - 1] {
            match AlarmRecord::decode(&bytes[..len]) {
                Err(AlarmError::FrameLength { expected, actual }) => {
                    assert_eq!(expected, FIXED_SIZE);
                    assert_eq!(actual, len);
                }
                other => panic!("expected FrameLength error, got {:?}", other),
            }
        }

        let mut long = bytes.clone();
        long.push(0);
        assert!(AlarmRecord::decode(&long).is_err());
    }

    #[test]
    fn test_decode_invalid_utf8_yields_empty_message() {
        let mut bytes = sample().encode().unwrap();
        bytes[HEADER_BYTES] = 0xff;
        bytes[HEADER_BYTES + 1] = 0xfe;
        let decoded = AlarmRecord::decode(&bytes).unwrap();
        assert_eq!(decoded.message(), "");
        assert_eq!(decoded.id(), 1002);
    }

    #[test]
    fn test_decode_accepts_wide_codes_but_validate_rejects() {
        let raw = AlarmRecord::from_raw(1002, 5, 0, AlarmTime::default(), String::new());
        let decoded = AlarmRecord::decode(&raw.encode().unwrap()).unwrap();
        assert_eq!(decoded.level_code(), 5);
        assert!(matches!(decoded.validate(), Err(AlarmError::InvalidLevel(5))));

        let bad_kind = AlarmRecord::from_raw(1002, 1, 3, AlarmTime::default(), String::new());
        assert!(matches!(bad_kind.validate(), Err(AlarmError::InvalidKind(3))));

        let bad_id = AlarmRecord::from_raw(1000, 1, 1, AlarmTime::default(), String::new());
        assert!(matches!(bad_id.validate(), Err(AlarmError::InvalidId(1000))));
    }

    #[test]
    fn test_new_rejects_out_of_domain() {
        assert!(matches!(
            AlarmRecord::new(1000, AlarmLevel::Minor, AlarmKind::Occurrence, "x"),
            Err(AlarmError::InvalidId(1000))
        ));
        assert!(matches!(
            AlarmRecord::new(1129, AlarmLevel::Minor, AlarmKind::Occurrence, "x"),
            Err(AlarmError::InvalidId(1129))
        ));

        let too_long = "a".repeat(MESSAGE_CAPACITY);
        assert!(matches!(
            AlarmRecord::new(1001, AlarmLevel::Minor, AlarmKind::Occurrence, too_long),
            Err(AlarmError::MessageTooLong { .. })
        ));
        let longest = "a".repeat(MESSAGE_CAPACITY - 1);
        assert!(AlarmRecord::new(1001, AlarmLevel::Minor, AlarmKind::Occurrence, longest).is_ok());
    }

    #[test]
    fn test_encode_rejects_oversized_message() {
        let raw = AlarmRecord::from_raw(
            1001,
            1,
            1,
            AlarmTime::default(),
            "a".repeat(MESSAGE_CAPACITY + 1),
        );
        assert!(matches!(raw.encode(), Err(AlarmError::MessageTooLong { .. })));
    }

    #[test]
    fn test_time_millis() {
        assert_eq!(sample().time_millis(), 1_700_000_000_123);
    }

    #[test]
    fn test_time_millis_saturates_on_extreme_wire_time() {
        let mut bytes = sample().encode().unwrap();
        let max = libc::c_long::MAX;
        bytes[SEC_OFFSET..USEC_OFFSET].copy_from_slice(&max.to_ne_bytes());
        let record = AlarmRecord::decode(&bytes).unwrap();
        assert!(record.validate().is_ok());
        assert_eq!(record.time_millis(), i64::from(max).saturating_mul(1000));
        assert!(record.to_string().starts_with("alarm_id: 1002"));

        let min = AlarmRecord::from_raw(
            1001,
            0,
            0,
            AlarmTime {
                sec: i64::MIN,
                usec: -999_999,
            },
            String::new(),
        );
        assert_eq!(min.time_millis(), i64::MIN);
    }

    #[test]
    fn test_display_summary() {
        let summary = sample().to_string();
        assert!(summary.starts_with(
            "alarm_id: 1002, alarm_level: MAJOR_ALM, alarm_type: ALARM_TYPE_OCCUR"
        ));
        assert!(summary.ends_with("alarm_msg_len: 26"));

        let unknown = AlarmRecord::from_raw(1001, 9, 9, AlarmTime::default(), String::new());
        assert!(unknown.to_string().contains("alarm_level: UNKNOWN, alarm_type: UNKNOWN"));
    }
}
