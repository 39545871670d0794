use bytes::{BufMut, Bytes, BytesMut};
use qcore::varint::{VarInt, WriteVarInt};

use crate::{frame::frame_type, settings::Settings};

fn put_frame_header(buf: &mut BytesMut, ty: u64, length: u64) {
    buf.put_varint(&VarInt::from_u64(ty).expect("frame types fit in a varint"));
    buf.put_varint(&VarInt::from_u64(length).expect("frame lengths fit in a varint"));
}

/// The header of a DATA frame; the payload is the caller's buffer and is
/// never copied here.
pub fn data_frame_header(payload_length: u64) -> Bytes {
    let mut buf = BytesMut::new();
    put_frame_header(&mut buf, frame_type::DATA, payload_length);
    buf.freeze()
}

/// The header of a HEADERS frame; the encoded field section follows from
/// the caller's buffer.
pub fn headers_frame_header(payload_length: u64) -> Bytes {
    let mut buf = BytesMut::new();
    put_frame_header(&mut buf, frame_type::HEADERS, payload_length);
    buf.freeze()
}

pub fn settings_frame(settings: &Settings) -> Bytes {
    let mut payload = BytesMut::new();
    settings.encode(&mut payload);
    let mut buf = BytesMut::new();
    put_frame_header(&mut buf, frame_type::SETTINGS, payload.len() as u64);
    buf.extend_from_slice(&payload);
    buf.freeze()
}

pub fn goaway_frame(id: u64) -> Bytes {
    let id = VarInt::from_u64(id).expect("stream ids fit in a varint");
    let mut buf = BytesMut::new();
    put_frame_header(&mut buf, frame_type::GOAWAY, id.encoding_size() as u64);
    buf.put_varint(&id);
    buf.freeze()
}

pub fn max_push_id_frame(id: u64) -> Bytes {
    let id = VarInt::from_u64(id).expect("push ids fit in a varint");
    let mut buf = BytesMut::new();
    put_frame_header(&mut buf, frame_type::MAX_PUSH_ID, id.encoding_size() as u64);
    buf.put_varint(&id);
    buf.freeze()
}

pub fn priority_update_frame(of_push: bool, element_id: u64, field_value: &[u8]) -> Bytes {
    let ty = if of_push {
        frame_type::PRIORITY_UPDATE_PUSH
    } else {
        frame_type::PRIORITY_UPDATE_REQUEST
    };
    let element_id = VarInt::from_u64(element_id).expect("element ids fit in a varint");
    let mut buf = BytesMut::new();
    put_frame_header(
        &mut buf,
        ty,
        (element_id.encoding_size() + field_value.len()) as u64,
    );
    buf.put_varint(&element_id);
    buf.put_slice(field_value);
    buf.freeze()
}

pub fn accept_ch_frame(entries: &[(String, String)]) -> Bytes {
    let mut payload = BytesMut::new();
    for (origin, value) in entries {
        payload.put_varint(&VarInt::try_from(origin.len()).expect("length fits in a varint"));
        payload.put_slice(origin.as_bytes());
        payload.put_varint(&VarInt::try_from(value.len()).expect("length fits in a varint"));
        payload.put_slice(value.as_bytes());
    }
    let mut buf = BytesMut::new();
    put_frame_header(&mut buf, frame_type::ACCEPT_CH, payload.len() as u64);
    buf.extend_from_slice(&payload);
    buf.freeze()
}

/// The pseudo-header of a WEBTRANSPORT_STREAM: the type, then the session
/// id where a length would sit; raw stream bytes follow.
pub fn webtransport_stream_header(session_id: u64) -> Bytes {
    let mut buf = BytesMut::new();
    put_frame_header(&mut buf, frame_type::WEBTRANSPORT_STREAM, session_id);
    buf.freeze()
}

/// A reserved-type frame with a short random payload, to exercise peers'
/// tolerance of unknown frames.
pub fn grease_frame() -> Bytes {
    let ty = 0x1f * rand::random_range(0u64..0x210842108421084) + 0x21;
    let payload_length = rand::random_range(0usize..4);
    let payload: [u8; 3] = rand::random();
    let mut buf = BytesMut::new();
    put_frame_header(&mut buf, ty, payload_length as u64);
    buf.put_slice(&payload[..payload_length]);
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_header_carries_no_payload() {
        let header = data_frame_header(1000);
        // type 0x00, length 1000 as a 2-byte varint
        assert_eq!(header.len(), 3);
        assert_eq!(header[0], 0x00);
    }

    #[test]
    fn test_goaway_frame_layout() {
        let frame = goaway_frame(8);
        assert_eq!(&frame[..], &[0x07, 0x01, 0x08]);
    }

    #[test]
    fn test_grease_type_is_reserved_pattern() {
        for _ in 0..16 {
            let frame = grease_frame();
            let (_, ty) = qcore::varint::be_varint(&frame).unwrap();
            assert_eq!((ty.into_inner() - 0x21) % 0x1f, 0);
        }
    }
}
