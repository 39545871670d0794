use bytes::Bytes;
use qcore::varint::be_varint;

use crate::{
    H3Error, H3ErrorCode,
    frame::{FrameClass, classify, forbidden_error, frame_type},
    settings::Settings,
};

/// What the decoder surfaced from the byte stream. DATA, HEADERS and
/// unknown frames stream their payload fragment by fragment; the small
/// control frames arrive parsed whole.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Http3Event {
    DataStart { length: u64 },
    DataPayload(Bytes),
    DataEnd,
    HeadersStart { length: u64 },
    HeadersPayload(Bytes),
    HeadersEnd,
    UnknownStart { frame_type: u64, length: u64 },
    UnknownPayload(Bytes),
    UnknownEnd,
    Settings(Settings),
    Goaway { id: u64 },
    MaxPushId { id: u64 },
    PriorityUpdate { of_push: bool, element_id: u64, field_value: Bytes },
    AcceptCh { entries: Vec<(String, String)> },
    /// The stream turned into a WebTransport stream; no further framing.
    WebTransportStreamType { session_id: u64 },
    WebTransportPayload(Bytes),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    ReadingFrameType,
    ReadingFrameLength { frame_type: u64 },
    ReadingFramePayload { frame_type: u64, remaining: u64 },
    BufferingPayload { frame_type: u64, remaining: u64 },
    PassThrough,
    ParsingNoLongerPossible,
}

/// An incremental HTTP/3 frame decoder for one stream.
///
/// Feed it bytes as they arrive; varints split across datagrams are
/// accumulated internally. A fatal error is sticky: every later call
/// reports an internal error without consuming anything.
#[derive(Debug)]
pub struct FrameDecoder {
    state: State,
    // partial frame-type or length varint bytes
    varint_buffer: Vec<u8>,
    // payload of the bounded frame being collected
    payload_buffer: Vec<u8>,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self {
            state: State::ReadingFrameType,
            varint_buffer: Vec::new(),
            payload_buffer: Vec::new(),
        }
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process a chunk of the stream, emitting the events it completes.
    pub fn process_input(&mut self, mut input: &[u8]) -> Result<Vec<Http3Event>, H3Error> {
        if self.state == State::ParsingNoLongerPossible {
            return Err(H3Error::new(
                H3ErrorCode::InternalError,
                "input after the decoder entered a terminal state",
            ));
        }
        let mut events = Vec::new();
        while !input.is_empty() {
            if let Err(error) = self.step(&mut input, &mut events) {
                self.state = State::ParsingNoLongerPossible;
                return Err(error);
            }
        }
        Ok(events)
    }

    fn step(&mut self, input: &mut &[u8], events: &mut Vec<Http3Event>) -> Result<(), H3Error> {
        match self.state {
            State::ReadingFrameType => {
                let Some(frame_type) = self.accumulate_varint(input) else {
                    return Ok(());
                };
                if let FrameClass::Forbidden { reason } = classify(frame_type) {
                    return Err(forbidden_error(reason));
                }
                self.state = State::ReadingFrameLength { frame_type };
                Ok(())
            }
            State::ReadingFrameLength { frame_type } => {
                let Some(length) = self.accumulate_varint(input) else {
                    return Ok(());
                };
                self.on_frame_header(frame_type, length, events)
            }
            State::ReadingFramePayload {
                frame_type,
                remaining,
            } => {
                let take = remaining.min(input.len() as u64) as usize;
                let payload = Bytes::copy_from_slice(&input[..take]);
                *input = &input[take..];
                let remaining = remaining - take as u64;
                events.push(payload_event(frame_type, payload));
                if remaining == 0 {
                    events.push(end_event(frame_type));
                    self.state = State::ReadingFrameType;
                } else {
                    self.state = State::ReadingFramePayload {
                        frame_type,
                        remaining,
                    };
                }
                Ok(())
            }
            State::BufferingPayload {
                frame_type,
                remaining,
            } => {
                let take = remaining.min(input.len() as u64) as usize;
                self.payload_buffer.extend_from_slice(&input[..take]);
                *input = &input[take..];
                let remaining = remaining - take as u64;
                if remaining == 0 {
                    let payload = std::mem::take(&mut self.payload_buffer);
                    events.push(parse_buffered(frame_type, &payload)?);
                    self.state = State::ReadingFrameType;
                } else {
                    self.state = State::BufferingPayload {
                        frame_type,
                        remaining,
                    };
                }
                Ok(())
            }
            State::PassThrough => {
                events.push(Http3Event::WebTransportPayload(Bytes::copy_from_slice(
                    input,
                )));
                *input = &[];
                Ok(())
            }
            State::ParsingNoLongerPossible => unreachable!("checked on entry"),
        }
    }

    /// Pull bytes into the varint buffer until one parses; advances
    /// `input` past the bytes used.
    fn accumulate_varint(&mut self, input: &mut &[u8]) -> Option<u64> {
        while !input.is_empty() {
            self.varint_buffer.push(input[0]);
            *input = &input[1..];
            // the length of the encoding is known from the first byte
            let needed = 1usize << (self.varint_buffer[0] >> 6);
            if self.varint_buffer.len() == needed {
                let (_, varint) = be_varint(&self.varint_buffer)
                    .expect("the buffer holds exactly one varint");
                self.varint_buffer.clear();
                return Some(varint.into_inner());
            }
        }
        None
    }

    fn on_frame_header(
        &mut self,
        frame_type: u64,
        length: u64,
        events: &mut Vec<Http3Event>,
    ) -> Result<(), H3Error> {
        match classify(frame_type) {
            FrameClass::Forbidden { reason } => Err(forbidden_error(reason)),
            FrameClass::WebTransport => {
                // the length field is the WebTransport session id; the
                // stream is not framed from here on
                events.push(Http3Event::WebTransportStreamType { session_id: length });
                self.state = State::PassThrough;
                Ok(())
            }
            FrameClass::Streamed => {
                events.push(start_event(frame_type, length));
                if length == 0 {
                    events.push(end_event(frame_type));
                    self.state = State::ReadingFrameType;
                } else {
                    self.state = State::ReadingFramePayload {
                        frame_type,
                        remaining: length,
                    };
                }
                Ok(())
            }
            FrameClass::Buffered { max_length } => {
                if length > max_length {
                    return Err(H3Error::new(
                        H3ErrorCode::ExcessiveLoad,
                        format!("frame {frame_type:#x} of {length} bytes exceeds its limit"),
                    ));
                }
                if length == 0 {
                    events.push(parse_buffered(frame_type, &[])?);
                    self.state = State::ReadingFrameType;
                } else {
                    self.payload_buffer.clear();
                    self.payload_buffer.reserve(length as usize);
                    self.state = State::BufferingPayload {
                        frame_type,
                        remaining: length,
                    };
                }
                Ok(())
            }
        }
    }
}

fn start_event(ty: u64, length: u64) -> Http3Event {
    match ty {
        frame_type::DATA => Http3Event::DataStart { length },
        frame_type::HEADERS => Http3Event::HeadersStart { length },
        _ => Http3Event::UnknownStart {
            frame_type: ty,
            length,
        },
    }
}

fn payload_event(ty: u64, payload: Bytes) -> Http3Event {
    match ty {
        frame_type::DATA => Http3Event::DataPayload(payload),
        frame_type::HEADERS => Http3Event::HeadersPayload(payload),
        _ => Http3Event::UnknownPayload(payload),
    }
}

fn end_event(ty: u64) -> Http3Event {
    match ty {
        frame_type::DATA => Http3Event::DataEnd,
        frame_type::HEADERS => Http3Event::HeadersEnd,
        _ => Http3Event::UnknownEnd,
    }
}

fn parse_buffered(ty: u64, payload: &[u8]) -> Result<Http3Event, H3Error> {
    let frame_error =
        |reason: &str| H3Error::new(H3ErrorCode::FrameError, reason.to_string());
    match ty {
        frame_type::SETTINGS => Ok(Http3Event::Settings(Settings::decode(payload)?)),
        frame_type::GOAWAY => {
            let (rest, id) =
                be_varint(payload).map_err(|_| frame_error("malformed GOAWAY frame"))?;
            if !rest.is_empty() {
                return Err(frame_error("GOAWAY frame with trailing bytes"));
            }
            Ok(Http3Event::Goaway {
                id: id.into_inner(),
            })
        }
        frame_type::MAX_PUSH_ID => {
            let (rest, id) =
                be_varint(payload).map_err(|_| frame_error("malformed MAX_PUSH_ID frame"))?;
            if !rest.is_empty() {
                return Err(frame_error("MAX_PUSH_ID frame with trailing bytes"));
            }
            Ok(Http3Event::MaxPushId {
                id: id.into_inner(),
            })
        }
        frame_type::PRIORITY_UPDATE_REQUEST | frame_type::PRIORITY_UPDATE_PUSH => {
            let (rest, element_id) = be_varint(payload)
                .map_err(|_| frame_error("malformed PRIORITY_UPDATE frame"))?;
            Ok(Http3Event::PriorityUpdate {
                of_push: ty == frame_type::PRIORITY_UPDATE_PUSH,
                element_id: element_id.into_inner(),
                field_value: Bytes::copy_from_slice(rest),
            })
        }
        frame_type::ACCEPT_CH => {
            let mut entries = Vec::new();
            let mut input = payload;
            while !input.is_empty() {
                let (rest, origin) = be_length_prefixed(input)
                    .ok_or_else(|| frame_error("malformed ACCEPT_CH origin"))?;
                let (rest, value) = be_length_prefixed(rest)
                    .ok_or_else(|| frame_error("malformed ACCEPT_CH value"))?;
                entries.push((origin, value));
                input = rest;
            }
            Ok(Http3Event::AcceptCh { entries })
        }
        _ => unreachable!("only buffered frame types are parsed whole"),
    }
}

fn be_length_prefixed(input: &[u8]) -> Option<(&[u8], String)> {
    let (rest, length) = be_varint(input).ok()?;
    let length = u64::from(length) as usize;
    if rest.len() < length {
        return None;
    }
    let value = String::from_utf8(rest[..length].to_vec()).ok()?;
    Some((&rest[length..], value))
}

#[cfg(test)]
mod tests {
    use bytes::{BufMut, BytesMut};
    use qcore::varint::{VarInt, WriteVarInt};

    use super::*;
    use crate::encoder;

    fn frame(ty: u64, payload: &[u8]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_varint(&VarInt::from_u64(ty).unwrap());
        buf.put_varint(&VarInt::try_from(payload.len()).unwrap());
        buf.put_slice(payload);
        buf.to_vec()
    }

    #[test]
    fn test_data_frame_is_streamed() {
        let mut decoder = FrameDecoder::new();
        let wire = frame(frame_type::DATA, b"hello world");
        // split the frame into two deliveries
        let mut events = decoder.process_input(&wire[..8]).unwrap();
        events.extend(decoder.process_input(&wire[8..]).unwrap());
        assert_eq!(
            events,
            vec![
                Http3Event::DataStart { length: 11 },
                Http3Event::DataPayload(Bytes::from_static(b"hello ")),
                Http3Event::DataPayload(Bytes::from_static(b"world")),
                Http3Event::DataEnd,
            ]
        );
    }

    #[test]
    fn test_type_varint_split_across_inputs() {
        let mut decoder = FrameDecoder::new();
        // PRIORITY_UPDATE_REQUEST has a 4-byte type varint
        let mut wire = BytesMut::new();
        wire.put_varint(&VarInt::from_u64(frame_type::PRIORITY_UPDATE_REQUEST).unwrap());
        wire.put_varint(&VarInt::from_u32(3));
        wire.put_varint(&VarInt::from_u32(0)); // element id
        wire.put_slice(b"u=1");

        let mut events = Vec::new();
        for byte in wire.iter() {
            events.extend(decoder.process_input(&[*byte]).unwrap());
        }
        assert_eq!(
            events,
            vec![Http3Event::PriorityUpdate {
                of_push: false,
                element_id: 0,
                field_value: Bytes::from_static(b"u=1"),
            }]
        );
    }

    #[test]
    fn test_settings_and_goaway() {
        let mut decoder = FrameDecoder::new();
        let mut settings = Settings::default();
        settings.set(0x01, 4096);
        let mut payload = BytesMut::new();
        settings.encode(&mut payload);

        let mut wire = frame(frame_type::SETTINGS, &payload);
        wire.extend(frame(frame_type::GOAWAY, &{
            let mut buf = BytesMut::new();
            buf.put_varint(&VarInt::from_u32(8));
            buf.to_vec()
        }));
        let events = decoder.process_input(&wire).unwrap();
        assert_eq!(
            events,
            vec![
                Http3Event::Settings(settings),
                Http3Event::Goaway { id: 8 },
            ]
        );
    }

    #[test]
    fn test_forbidden_frames_close() {
        for ty in [0x02u64, 0x06, 0x08, 0x09, 0x03, 0x05] {
            let mut decoder = FrameDecoder::new();
            let error = decoder.process_input(&frame(ty, &[])).unwrap_err();
            assert_eq!(error.code(), H3ErrorCode::FrameUnexpected, "type {ty:#x}");
        }
    }

    #[test]
    fn test_error_state_is_sticky() {
        let mut decoder = FrameDecoder::new();
        decoder.process_input(&frame(0x06, &[])).unwrap_err();
        let error = decoder.process_input(&frame(frame_type::DATA, b"x")).unwrap_err();
        assert_eq!(error.code(), H3ErrorCode::InternalError);
    }

    #[test]
    fn test_goaway_over_cap_rejected() {
        let mut decoder = FrameDecoder::new();
        let wire = frame(frame_type::GOAWAY, &[0u8; 9]);
        let error = decoder.process_input(&wire).unwrap_err();
        assert_eq!(error.code(), H3ErrorCode::ExcessiveLoad);
    }

    #[test]
    fn test_webtransport_switches_to_passthrough() {
        let mut decoder = FrameDecoder::new();
        let mut wire = BytesMut::new();
        wire.put_varint(&VarInt::from_u64(frame_type::WEBTRANSPORT_STREAM).unwrap());
        wire.put_varint(&VarInt::from_u32(42)); // session id
        wire.put_slice(b"raw");
        let events = decoder.process_input(&wire).unwrap();
        assert_eq!(
            events,
            vec![
                Http3Event::WebTransportStreamType { session_id: 42 },
                Http3Event::WebTransportPayload(Bytes::from_static(b"raw")),
            ]
        );
        // still raw on the next input
        let events = decoder.process_input(b"more").unwrap();
        assert_eq!(
            events,
            vec![Http3Event::WebTransportPayload(Bytes::from_static(b"more"))]
        );
    }

    #[test]
    fn test_unknown_frame_streams_and_resumes() {
        let mut decoder = FrameDecoder::new();
        let grease = 0x1f * 4 + 0x21;
        let mut wire = frame(grease, b"??");
        wire.extend(frame(frame_type::DATA, b"d"));
        let events = decoder.process_input(&wire).unwrap();
        assert_eq!(
            events,
            vec![
                Http3Event::UnknownStart {
                    frame_type: grease,
                    length: 2
                },
                Http3Event::UnknownPayload(Bytes::from_static(b"??")),
                Http3Event::UnknownEnd,
                Http3Event::DataStart { length: 1 },
                Http3Event::DataPayload(Bytes::from_static(b"d")),
                Http3Event::DataEnd,
            ]
        );
    }

    #[test]
    fn test_encoder_output_decodes() {
        let mut decoder = FrameDecoder::new();
        let mut settings = Settings::default();
        settings.set(0x07, 100);
        let mut wire = BytesMut::new();
        wire.extend_from_slice(&encoder::settings_frame(&settings));
        wire.extend_from_slice(&encoder::data_frame_header(5));
        wire.extend_from_slice(b"hello");
        wire.extend_from_slice(&encoder::goaway_frame(4));

        let events = decoder.process_input(&wire).unwrap();
        assert_eq!(
            events,
            vec![
                Http3Event::Settings(settings),
                Http3Event::DataStart { length: 5 },
                Http3Event::DataPayload(Bytes::from_static(b"hello")),
                Http3Event::DataEnd,
                Http3Event::Goaway { id: 4 },
            ]
        );
    }

    #[test]
    fn test_grease_frame_decodes_as_unknown() {
        let mut decoder = FrameDecoder::new();
        let wire = encoder::grease_frame();
        let events = decoder.process_input(&wire).unwrap();
        assert!(matches!(events[0], Http3Event::UnknownStart { .. }));
        assert_eq!(*events.last().unwrap(), Http3Event::UnknownEnd);
    }
}
