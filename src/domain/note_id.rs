use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use uuid::{NoContext, Timestamp, Uuid};

use crate::error::NxError;

/// Crockford base32, the ULID alphabet (no I, L, O, U).
const ALPHABET: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";

/// Length of the text form.
pub const ID_LEN: usize = 26;

const TIMESTAMP_CHARS: usize = 10;

/// Time-ordered note identifier.
///
/// The value is 128 bits whose top 48 bits are a millisecond Unix timestamp,
/// written as 26 Crockford base32 characters. Because the text form has a
/// fixed width, ordering ids and ordering their strings agree, and both sort
/// by creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NoteId(u128);

impl NoteId {
    /// New id stamped with the current time.
    pub fn generate() -> Self {
        NoteId(Uuid::now_v7().as_u128())
    }

    /// New id stamped with `at`, random in the low bits.
    pub fn generate_at(at: DateTime<Utc>) -> Self {
        let millis = at.timestamp_millis().max(0) as u64;
        let ts = Timestamp::from_unix(NoContext, millis / 1000, ((millis % 1000) * 1_000_000) as u32);
        NoteId(Uuid::new_v7(ts).as_u128())
    }

    pub fn parse(text: &str) -> Result<Self, NxError> {
        if text.len() != ID_LEN {
            return Err(NxError::Validation(format!(
                "invalid note id '{text}': expected {ID_LEN} characters"
            )));
        }

        let mut value: u128 = 0;
        for (i, c) in text.bytes().enumerate() {
            let digit = decode_char(c).ok_or_else(|| {
                NxError::Validation(format!("invalid note id '{text}': bad character at {i}"))
            })?;
            // 26 * 5 = 130 bits, so the leading character may only carry 3.
            if i == 0 && digit > 7 {
                return Err(NxError::Validation(format!(
                    "invalid note id '{text}': value out of range"
                )));
            }
            value = (value << 5) | digit as u128;
        }

        Ok(NoteId(value))
    }

    /// Creation time encoded in the id.
    pub fn timestamp(&self) -> DateTime<Utc> {
        let millis = (self.0 >> 80) as i64;
        Utc.timestamp_millis_opt(millis)
            .single()
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    }

    /// The timestamp half of the text form.
    pub fn time_prefix(&self) -> String {
        self.to_string()[..TIMESTAMP_CHARS].to_string()
    }

    pub fn as_u128(&self) -> u128 {
        self.0
    }
}

fn decode_char(c: u8) -> Option<u8> {
    let c = c.to_ascii_uppercase();
    ALPHABET.iter().position(|&a| a == c).map(|p| p as u8)
}

impl fmt::Display for NoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut buf = [0u8; ID_LEN];
        let mut value = self.0;
        for slot in buf.iter_mut().rev() {
            *slot = ALPHABET[(value & 0x1f) as usize];
            value >>= 5;
        }
        // The alphabet is ASCII, so this cannot fail.
        f.write_str(std::str::from_utf8(&buf).map_err(|_| fmt::Error)?)
    }
}

impl FromStr for NoteId {
    type Err = NxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NoteId::parse(s)
    }
}

impl Serialize for NoteId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for NoteId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        NoteId::parse(&text).map_err(serde::de::Error::custom)
    }
}
