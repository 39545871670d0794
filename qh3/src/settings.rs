use bytes::BufMut;
use qcore::varint::{VarInt, WriteVarInt, be_varint};

use crate::{H3Error, H3ErrorCode};

/// SETTINGS identifiers, per
/// [RFC 9114 Section 7.2.4.1](https://www.rfc-editor.org/rfc/rfc9114.html#section-7.2.4.1)
/// and its extensions.
pub mod setting_id {
    pub const QPACK_MAX_TABLE_CAPACITY: u64 = 0x01;
    pub const MAX_FIELD_SECTION_SIZE: u64 = 0x06;
    pub const QPACK_BLOCKED_STREAMS: u64 = 0x07;
    pub const ENABLE_CONNECT_PROTOCOL: u64 = 0x08;
    pub const H3_DATAGRAM: u64 = 0x33;
}

// Settings carried over from HTTP/2 whose use in HTTP/3 is an error.
const H2_ONLY_SETTINGS: [u64; 4] = [0x02, 0x03, 0x04, 0x05];

/// The settings an endpoint announces on its control stream. Unknown
/// identifiers are kept verbatim so a round trip preserves them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    /// Ascending by identifier; at most one value per identifier.
    values: Vec<(u64, u64)>,
}

impl Settings {
    pub fn get(&self, id: u64) -> Option<u64> {
        self.values
            .binary_search_by_key(&id, |(id, _)| *id)
            .ok()
            .map(|i| self.values[i].1)
    }

    /// Set one identifier, replacing any previous value.
    pub fn set(&mut self, id: u64, value: u64) {
        match self.values.binary_search_by_key(&id, |(id, _)| *id) {
            Ok(i) => self.values[i].1 = value,
            Err(i) => self.values.insert(i, (id, value)),
        }
    }

    pub fn qpack_max_table_capacity(&self) -> u64 {
        self.get(setting_id::QPACK_MAX_TABLE_CAPACITY).unwrap_or(0)
    }

    pub fn qpack_blocked_streams(&self) -> u64 {
        self.get(setting_id::QPACK_BLOCKED_STREAMS).unwrap_or(0)
    }

    pub fn max_field_section_size(&self) -> Option<u64> {
        self.get(setting_id::MAX_FIELD_SECTION_SIZE)
    }

    /// Serialize the identifier/value pairs; the frame header is the
    /// encoder's business.
    pub fn encode(&self, buf: &mut impl BufMut) {
        for (id, value) in &self.values {
            buf.put_varint(&VarInt::from_u64(*id).expect("setting ids fit in a varint"));
            buf.put_varint(&VarInt::from_u64(*value).expect("setting values fit in a varint"));
        }
    }

    /// Parse a complete SETTINGS payload.
    pub fn decode(mut input: &[u8]) -> Result<Self, H3Error> {
        let mut settings = Settings::default();
        let mut seen = Vec::new();
        while !input.is_empty() {
            let (rest, id) = be_varint(input).map_err(|_| {
                H3Error::new(H3ErrorCode::FrameError, "malformed SETTINGS identifier")
            })?;
            let (rest, value) = be_varint(rest).map_err(|_| {
                H3Error::new(H3ErrorCode::FrameError, "malformed SETTINGS value")
            })?;
            input = rest;

            let id = id.into_inner();
            if H2_ONLY_SETTINGS.contains(&id) {
                return Err(H3Error::new(
                    H3ErrorCode::SettingsError,
                    format!("HTTP/2 setting {id:#x} received in HTTP/3"),
                ));
            }
            if seen.contains(&id) {
                return Err(H3Error::new(
                    H3ErrorCode::SettingsError,
                    format!("duplicate SETTINGS identifier {id:#x}"),
                ));
            }
            seen.push(id);
            settings.set(id, value.into_inner());
        }
        Ok(settings)
    }
}
