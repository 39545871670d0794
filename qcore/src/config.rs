use std::{
    net::{Ipv4Addr, Ipv6Addr},
    time::Duration,
};

use bytes::BufMut;

use crate::{
    cid::{ConnectionId, WriteConnectionId, be_connection_id},
    varint::{VarInt, WriteVarInt, be_varint},
};

/// Loss detector tuning, frozen for the lifetime of a connection.
#[derive(Debug, Clone, Copy)]
pub struct LossDetectionConfig {
    /// Declare a packet lost when this many later packets are acked.
    pub reordering_threshold: u64,
    /// Time threshold as a right shift of max(srtt, latest_rtt):
    /// the loss delay is `rtt + rtt >> shift`.
    pub time_threshold_shift: u32,
    /// Grow the reordering threshold when spurious losses are detected.
    pub adaptive_reordering_threshold: bool,
    /// Grow the time threshold shift when spurious losses are detected.
    pub adaptive_time_threshold: bool,
    /// Do not declare runt packets (smaller than this) lost by reordering.
    pub packet_threshold_min_bytes: Option<u64>,
}

impl Default for LossDetectionConfig {
    fn default() -> Self {
        Self {
            reordering_threshold: 3,
            time_threshold_shift: 3,
            adaptive_reordering_threshold: false,
            adaptive_time_threshold: false,
            packet_threshold_min_bytes: None,
        }
    }
}

/// Pacing tuning, frozen for the lifetime of a connection.
#[derive(Debug, Clone, Copy)]
pub struct PacingConfig {
    /// Packets that may leave unpaced after quiescence.
    pub initial_burst_size: usize,
    /// Upper bound of lumpy tokens per refill.
    pub lumpy_pacing_size: usize,
    /// Lumpy tokens are also capped to this fraction of the cwnd.
    pub lumpy_pacing_cwnd_fraction: f32,
    /// Below this estimated bandwidth lumpiness is disabled.
    pub lumpy_pacing_min_bandwidth_kbps: u64,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            initial_burst_size: 10,
            lumpy_pacing_size: 2,
            lumpy_pacing_cwnd_fraction: 0.25,
            lumpy_pacing_min_bandwidth_kbps: 1200,
        }
    }
}

/// Per-connection transport knobs, the local replacement for a process-wide
/// flag table. Built once, then frozen and shared.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Tail loss probes to send before falling back to RTO.
    pub max_tail_loss_probes: usize,
    /// Halve the delay of the first tail loss probe.
    pub enable_half_rtt_tail_loss_probe: bool,
    /// Do not retransmit on RTO until the timeout is confirmed by an ack.
    pub use_new_rto: bool,
    /// Clamp the handshake retransmission timer conservatively.
    pub conservative_handshake_retransmits: bool,
    /// Use the PTO state machine instead of TLP+RTO.
    pub pto_enabled: bool,
    /// Probe packets sent on each PTO.
    pub max_probe_packets_per_pto: usize,
    /// Consecutive PTOs before exponential backoff kicks in.
    pub pto_exponential_backoff_start_point: u32,
    /// Include the peer's max_ack_delay in the PTO calculation.
    pub pto_include_max_ack_delay: bool,
    /// Optional multiplier on srtt for the first PTO only.
    pub first_pto_srtt_multiplier: Option<f32>,
    /// Initial congestion window in packets.
    pub initial_congestion_window_packets: usize,
    /// Writers buffering less than this are asked for more data.
    pub buffered_data_threshold: usize,
    pub loss: LossDetectionConfig,
    pub pacing: PacingConfig,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_tail_loss_probes: 2,
            enable_half_rtt_tail_loss_probe: false,
            use_new_rto: false,
            conservative_handshake_retransmits: false,
            pto_enabled: true,
            max_probe_packets_per_pto: 2,
            pto_exponential_backoff_start_point: 0,
            pto_include_max_ack_delay: true,
            first_pto_srtt_multiplier: None,
            initial_congestion_window_packets: 10,
            buffered_data_threshold: 8 * 1024,
            loss: LossDetectionConfig::default(),
            pacing: PacingConfig::default(),
        }
    }
}

/// A server's preferred address transport parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreferredAddress {
    pub ipv4: (Ipv4Addr, u16),
    pub ipv6: (Ipv6Addr, u16),
    pub cid: ConnectionId,
    pub stateless_reset_token: [u8; 16],
}

/// The transport parameters exchanged in the handshake, with the defaults
/// of [RFC 9000 Section 18.2](https://www.rfc-editor.org/rfc/rfc9000.html#section-18.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportParameters {
    pub original_destination_connection_id: Option<ConnectionId>,
    pub max_idle_timeout: Duration,
    pub stateless_reset_token: Option<[u8; 16]>,
    pub max_udp_payload_size: VarInt,
    pub initial_max_data: VarInt,
    pub initial_max_stream_data_bidi_local: VarInt,
    pub initial_max_stream_data_bidi_remote: VarInt,
    pub initial_max_stream_data_uni: VarInt,
    pub initial_max_streams_bidi: VarInt,
    pub initial_max_streams_uni: VarInt,
    pub ack_delay_exponent: u8,
    pub max_ack_delay: Duration,
    pub disable_active_migration: bool,
    pub preferred_address: Option<PreferredAddress>,
    pub active_connection_id_limit: VarInt,
    pub initial_source_connection_id: Option<ConnectionId>,
    pub retry_source_connection_id: Option<ConnectionId>,
    pub max_datagram_frame_size: Option<VarInt>,
    pub grease_quic_bit: bool,
}

impl Default for TransportParameters {
    fn default() -> Self {
        Self {
            original_destination_connection_id: None,
            max_idle_timeout: Duration::ZERO,
            stateless_reset_token: None,
            max_udp_payload_size: VarInt::from_u32(65527),
            initial_max_data: VarInt::ZERO,
            initial_max_stream_data_bidi_local: VarInt::ZERO,
            initial_max_stream_data_bidi_remote: VarInt::ZERO,
            initial_max_stream_data_uni: VarInt::ZERO,
            initial_max_streams_bidi: VarInt::ZERO,
            initial_max_streams_uni: VarInt::ZERO,
            ack_delay_exponent: 3,
            max_ack_delay: Duration::from_millis(25),
            disable_active_migration: false,
            preferred_address: None,
            active_connection_id_limit: VarInt::from_u32(2),
            initial_source_connection_id: None,
            retry_source_connection_id: None,
            max_datagram_frame_size: None,
            grease_quic_bit: false,
        }
    }
}

/// Parameter ids from RFC 9000 Section 18.2 and RFC 9221/9287.
mod id {
    pub const ORIGINAL_DESTINATION_CONNECTION_ID: u64 = 0x00;
    pub const MAX_IDLE_TIMEOUT: u64 = 0x01;
    pub const STATELESS_RESET_TOKEN: u64 = 0x02;
    pub const MAX_UDP_PAYLOAD_SIZE: u64 = 0x03;
    pub const INITIAL_MAX_DATA: u64 = 0x04;
    pub const INITIAL_MAX_STREAM_DATA_BIDI_LOCAL: u64 = 0x05;
    pub const INITIAL_MAX_STREAM_DATA_BIDI_REMOTE: u64 = 0x06;
    pub const INITIAL_MAX_STREAM_DATA_UNI: u64 = 0x07;
    pub const INITIAL_MAX_STREAMS_BIDI: u64 = 0x08;
    pub const INITIAL_MAX_STREAMS_UNI: u64 = 0x09;
    pub const ACK_DELAY_EXPONENT: u64 = 0x0a;
    pub const MAX_ACK_DELAY: u64 = 0x0b;
    pub const DISABLE_ACTIVE_MIGRATION: u64 = 0x0c;
    pub const PREFERRED_ADDRESS: u64 = 0x0d;
    pub const ACTIVE_CONNECTION_ID_LIMIT: u64 = 0x0e;
    pub const INITIAL_SOURCE_CONNECTION_ID: u64 = 0x0f;
    pub const RETRY_SOURCE_CONNECTION_ID: u64 = 0x10;
    pub const MAX_DATAGRAM_FRAME_SIZE: u64 = 0x20;
    pub const GREASE_QUIC_BIT: u64 = 0x2ab2;
}

/// Error from decoding the peer's transport parameters.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParameterError {
    #[error("transport parameter {0:#x} appeared twice")]
    Duplicate(u64),
    #[error("transport parameter {0:#x} is malformed")]
    Malformed(u64),
    #[error("transport parameter {0:#x} has an invalid value")]
    InvalidValue(u64),
    #[error("transport parameters are truncated")]
    Truncated,
}

impl TransportParameters {
    pub fn encode(&self, buf: &mut impl BufMut) {
        fn put_param_varint(buf: &mut impl BufMut, id: u64, value: VarInt) {
            buf.put_varint(&VarInt::from_u64(id).expect("parameter ids are small"));
            buf.put_varint(
                &VarInt::try_from(value.encoding_size()).expect("size fits in a varint"),
            );
            buf.put_varint(&value);
        }
        fn put_param_bytes(buf: &mut impl BufMut, id: u64, value: &[u8]) {
            buf.put_varint(&VarInt::from_u64(id).expect("parameter ids are small"));
            buf.put_varint(&VarInt::try_from(value.len()).expect("size fits in a varint"));
            buf.put_slice(value);
        }
        fn put_param_empty(buf: &mut impl BufMut, id: u64) {
            buf.put_varint(&VarInt::from_u64(id).expect("parameter ids are small"));
            buf.put_varint(&VarInt::ZERO);
        }

        if let Some(cid) = &self.original_destination_connection_id {
            put_param_bytes(buf, id::ORIGINAL_DESTINATION_CONNECTION_ID, cid.as_ref());
        }
        if !self.max_idle_timeout.is_zero() {
            put_param_varint(
                buf,
                id::MAX_IDLE_TIMEOUT,
                VarInt::from_u64(self.max_idle_timeout.as_millis() as u64)
                    .expect("idle timeout in ms fits in a varint"),
            );
        }
        if let Some(token) = &self.stateless_reset_token {
            put_param_bytes(buf, id::STATELESS_RESET_TOKEN, token);
        }
        put_param_varint(buf, id::MAX_UDP_PAYLOAD_SIZE, self.max_udp_payload_size);
        put_param_varint(buf, id::INITIAL_MAX_DATA, self.initial_max_data);
        put_param_varint(
            buf,
            id::INITIAL_MAX_STREAM_DATA_BIDI_LOCAL,
            self.initial_max_stream_data_bidi_local,
        );
        put_param_varint(
            buf,
            id::INITIAL_MAX_STREAM_DATA_BIDI_REMOTE,
            self.initial_max_stream_data_bidi_remote,
        );
        put_param_varint(
            buf,
            id::INITIAL_MAX_STREAM_DATA_UNI,
            self.initial_max_stream_data_uni,
        );
        put_param_varint(buf, id::INITIAL_MAX_STREAMS_BIDI, self.initial_max_streams_bidi);
        put_param_varint(buf, id::INITIAL_MAX_STREAMS_UNI, self.initial_max_streams_uni);
        put_param_varint(
            buf,
            id::ACK_DELAY_EXPONENT,
            VarInt::from(self.ack_delay_exponent),
        );
        put_param_varint(
            buf,
            id::MAX_ACK_DELAY,
            VarInt::from_u64(self.max_ack_delay.as_millis() as u64)
                .expect("max ack delay in ms fits in a varint"),
        );
        if self.disable_active_migration {
            put_param_empty(buf, id::DISABLE_ACTIVE_MIGRATION);
        }
        if let Some(preferred) = &self.preferred_address {
            buf.put_varint(&VarInt::from_u64(id::PREFERRED_ADDRESS).expect("small id"));
            let len = 4 + 2 + 16 + 2 + 1 + preferred.cid.len() + 16;
            buf.put_varint(&VarInt::try_from(len).expect("size fits in a varint"));
            buf.put_slice(&preferred.ipv4.0.octets());
            buf.put_u16(preferred.ipv4.1);
            buf.put_slice(&preferred.ipv6.0.octets());
            buf.put_u16(preferred.ipv6.1);
            buf.put_connection_id(&preferred.cid);
            buf.put_slice(&preferred.stateless_reset_token);
        }
        put_param_varint(
            buf,
            id::ACTIVE_CONNECTION_ID_LIMIT,
            self.active_connection_id_limit,
        );
        if let Some(cid) = &self.initial_source_connection_id {
            put_param_bytes(buf, id::INITIAL_SOURCE_CONNECTION_ID, cid.as_ref());
        }
        if let Some(cid) = &self.retry_source_connection_id {
            put_param_bytes(buf, id::RETRY_SOURCE_CONNECTION_ID, cid.as_ref());
        }
        if let Some(size) = self.max_datagram_frame_size {
            put_param_varint(buf, id::MAX_DATAGRAM_FRAME_SIZE, size);
        }
        if self.grease_quic_bit {
            put_param_empty(buf, id::GREASE_QUIC_BIT);
        }
    }

    /// Decode the peer's transport parameters. Unknown ids are skipped,
    /// duplicates and malformed values are errors.
    pub fn decode(mut input: &[u8]) -> Result<Self, ParameterError> {
        let mut params = Self::default();
        let mut seen = Vec::new();

        while !input.is_empty() {
            let (rest, id) = be_varint(input).map_err(|_| ParameterError::Truncated)?;
            let (rest, length) = be_varint(rest).map_err(|_| ParameterError::Truncated)?;
            let id = id.into_inner();
            let length = usize::from(length);
            if rest.len() < length {
                return Err(ParameterError::Truncated);
            }
            let (value, rest) = rest.split_at(length);
            if seen.contains(&id) {
                return Err(ParameterError::Duplicate(id));
            }
            seen.push(id);
            input = rest;

            let as_varint = |value: &[u8]| {
                be_varint(value)
                    .ok()
                    .filter(|(rest, _)| rest.is_empty())
                    .map(|(_, varint)| varint)
                    .ok_or(ParameterError::Malformed(id))
            };
            let as_cid = |value: &[u8]| {
                if value.len() > crate::cid::MAX_CID_SIZE {
                    Err(ParameterError::Malformed(id))
                } else {
                    Ok(ConnectionId::from_slice(value))
                }
            };

            match id {
                id::ORIGINAL_DESTINATION_CONNECTION_ID => {
                    params.original_destination_connection_id = Some(as_cid(value)?);
                }
                id::MAX_IDLE_TIMEOUT => {
                    params.max_idle_timeout =
                        Duration::from_millis(as_varint(value)?.into_inner());
                }
                id::STATELESS_RESET_TOKEN => {
                    let token: [u8; 16] = value
                        .try_into()
                        .map_err(|_| ParameterError::Malformed(id))?;
                    params.stateless_reset_token = Some(token);
                }
                id::MAX_UDP_PAYLOAD_SIZE => {
                    let size = as_varint(value)?;
                    if size.into_inner() < 1200 {
                        return Err(ParameterError::InvalidValue(id));
                    }
                    params.max_udp_payload_size = size;
                }
                id::INITIAL_MAX_DATA => params.initial_max_data = as_varint(value)?,
                id::INITIAL_MAX_STREAM_DATA_BIDI_LOCAL => {
                    params.initial_max_stream_data_bidi_local = as_varint(value)?;
                }
                id::INITIAL_MAX_STREAM_DATA_BIDI_REMOTE => {
                    params.initial_max_stream_data_bidi_remote = as_varint(value)?;
                }
                id::INITIAL_MAX_STREAM_DATA_UNI => {
                    params.initial_max_stream_data_uni = as_varint(value)?;
                }
                id::INITIAL_MAX_STREAMS_BIDI => {
                    params.initial_max_streams_bidi = as_varint(value)?;
                }
                id::INITIAL_MAX_STREAMS_UNI => {
                    params.initial_max_streams_uni = as_varint(value)?;
                }
                id::ACK_DELAY_EXPONENT => {
                    let exponent = as_varint(value)?.into_inner();
                    if exponent > 20 {
                        return Err(ParameterError::InvalidValue(id));
                    }
                    params.ack_delay_exponent = exponent as u8;
                }
                id::MAX_ACK_DELAY => {
                    let delay = as_varint(value)?.into_inner();
                    if delay >= 1 << 14 {
                        return Err(ParameterError::InvalidValue(id));
                    }
                    params.max_ack_delay = Duration::from_millis(delay);
                }
                id::DISABLE_ACTIVE_MIGRATION => {
                    if !value.is_empty() {
                        return Err(ParameterError::Malformed(id));
                    }
                    params.disable_active_migration = true;
                }
                id::PREFERRED_ADDRESS => {
                    params.preferred_address = Some(decode_preferred_address(value)?);
                }
                id::ACTIVE_CONNECTION_ID_LIMIT => {
                    let limit = as_varint(value)?;
                    if limit.into_inner() < 2 {
                        return Err(ParameterError::InvalidValue(id));
                    }
                    params.active_connection_id_limit = limit;
                }
                id::INITIAL_SOURCE_CONNECTION_ID => {
                    params.initial_source_connection_id = Some(as_cid(value)?);
                }
                id::RETRY_SOURCE_CONNECTION_ID => {
                    params.retry_source_connection_id = Some(as_cid(value)?);
                }
                id::MAX_DATAGRAM_FRAME_SIZE => {
                    params.max_datagram_frame_size = Some(as_varint(value)?);
                }
                id::GREASE_QUIC_BIT => {
                    if !value.is_empty() {
                        return Err(ParameterError::Malformed(id));
                    }
                    params.grease_quic_bit = true;
                }
                // reserved or future parameters must be ignored
                _ => {}
            }
        }
        Ok(params)
    }
}

fn decode_preferred_address(value: &[u8]) -> Result<PreferredAddress, ParameterError> {
    const ID: u64 = id::PREFERRED_ADDRESS;
    if value.len() < 4 + 2 + 16 + 2 + 1 + 16 {
        return Err(ParameterError::Malformed(ID));
    }
    let ipv4 = Ipv4Addr::new(value[0], value[1], value[2], value[3]);
    let ipv4_port = u16::from_be_bytes([value[4], value[5]]);
    let mut v6 = [0u8; 16];
    v6.copy_from_slice(&value[6..22]);
    let ipv6 = Ipv6Addr::from(v6);
    let ipv6_port = u16::from_be_bytes([value[22], value[23]]);
    let (rest, cid) =
        be_connection_id(&value[24..]).map_err(|_| ParameterError::Malformed(ID))?;
    let token: [u8; 16] = rest.try_into().map_err(|_| ParameterError::Malformed(ID))?;
    Ok(PreferredAddress {
        ipv4: (ipv4, ipv4_port),
        ipv6: (ipv6, ipv6_port),
        cid,
        stateless_reset_token: token,
    })
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;

    use super::*;

    #[test]
    fn test_roundtrip() {
        let mut params = TransportParameters {
            initial_max_data: VarInt::from_u32(1024 * 1024),
            initial_max_stream_data_bidi_local: VarInt::from_u32(256 * 1024),
            initial_max_streams_bidi: VarInt::from_u32(100),
            max_idle_timeout: Duration::from_secs(30),
            disable_active_migration: true,
            grease_quic_bit: true,
            initial_source_connection_id: Some(ConnectionId::from_slice(&[1, 2, 3, 4])),
            ..Default::default()
        };
        params.max_datagram_frame_size = Some(VarInt::from_u32(1200));

        let mut buf = BytesMut::new();
        params.encode(&mut buf);
        let decoded = TransportParameters::decode(&buf).unwrap();
        assert_eq!(decoded, params);
    }

    #[test]
    fn test_duplicate_rejected() {
        let params = TransportParameters::default();
        let mut buf = BytesMut::new();
        params.encode(&mut buf);
        let mut twice = buf.to_vec();
        twice.extend_from_slice(&buf);
        assert!(matches!(
            TransportParameters::decode(&twice),
            Err(ParameterError::Duplicate(_))
        ));
    }

    #[test]
    fn test_invalid_values_rejected() {
        // ack_delay_exponent = 21 is invalid
        let mut buf = BytesMut::new();
        buf.put_varint(&VarInt::from_u32(0x0a));
        buf.put_varint(&VarInt::from_u32(1));
        buf.put_varint(&VarInt::from_u32(21));
        assert_eq!(
            TransportParameters::decode(&buf),
            Err(ParameterError::InvalidValue(0x0a))
        );

        // max_udp_payload_size below 1200 is invalid
        let mut buf = BytesMut::new();
        buf.put_varint(&VarInt::from_u32(0x03));
        buf.put_varint(&VarInt::from_u32(2));
        buf.put_varint(&VarInt::from_u32(1100));
        assert_eq!(
            TransportParameters::decode(&buf),
            Err(ParameterError::InvalidValue(0x03))
        );
    }

    #[test]
    fn test_unknown_parameter_ignored() {
        let mut buf = BytesMut::new();
        // a grease parameter id with opaque payload
        buf.put_varint(&VarInt::from_u64(0x1bb6).unwrap());
        buf.put_varint(&VarInt::from_u32(3));
        buf.put_slice(&[0xaa, 0xbb, 0xcc]);
        let decoded = TransportParameters::decode(&buf).unwrap();
        assert_eq!(decoded, TransportParameters::default());
    }
}
