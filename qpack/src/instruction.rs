//! Encoder- and decoder-stream instructions, per
//! [RFC 9204 Sections 4.3 and 4.4](https://www.rfc-editor.org/rfc/rfc9204.html#section-4.3).

use bytes::BufMut;

use crate::{
    QpackError,
    prefix_int::{self, PrefixIntError},
};

/// An instruction on the encoder's unidirectional stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncoderInstruction {
    /// `001xxxxx`: change the dynamic table capacity.
    SetDynamicTableCapacity { capacity: u64 },
    /// `1Txxxxxx`: insert an entry whose name is a table reference.
    InsertWithNameReference {
        is_static: bool,
        /// Static absolute index, or encoder-stream-relative dynamic index.
        name_index: u64,
        value: Vec<u8>,
    },
    /// `01Hxxxxx`: insert an entry with a literal name.
    InsertWithoutNameReference { name: Vec<u8>, value: Vec<u8> },
    /// `000xxxxx`: re-insert the entry at a relative index.
    Duplicate { index: u64 },
}

impl EncoderInstruction {
    pub fn encode(&self, buf: &mut impl BufMut) {
        match self {
            EncoderInstruction::SetDynamicTableCapacity { capacity } => {
                prefix_int::encode(buf, 0b0010_0000, 5, *capacity);
            }
            EncoderInstruction::InsertWithNameReference {
                is_static,
                name_index,
                value,
            } => {
                let first = if *is_static { 0b1100_0000 } else { 0b1000_0000 };
                prefix_int::encode(buf, first, 6, *name_index);
                prefix_int::encode_string(buf, 0, 8, value);
            }
            EncoderInstruction::InsertWithoutNameReference { name, value } => {
                prefix_int::encode_string(buf, 0b0100_0000, 6, name);
                prefix_int::encode_string(buf, 0, 8, value);
            }
            EncoderInstruction::Duplicate { index } => {
                prefix_int::encode(buf, 0b0000_0000, 5, *index);
            }
        }
    }

    /// Decode one instruction; `Ok(None)` asks for more bytes.
    pub fn decode(input: &[u8]) -> Result<Option<(Self, usize)>, QpackError> {
        let error = |e: PrefixIntError| QpackError::EncoderStreamError(e.to_string());
        let Some(first) = input.first() else {
            return Ok(None);
        };
        if first & 0b1000_0000 != 0 {
            let is_static = first & 0b0100_0000 != 0;
            let Some((name_index, consumed)) =
                prefix_int::decode(input, 6).map_err(error)?
            else {
                return Ok(None);
            };
            let Some((value, value_consumed)) =
                prefix_int::decode_string(&input[consumed..], 8).map_err(error)?
            else {
                return Ok(None);
            };
            return Ok(Some((
                EncoderInstruction::InsertWithNameReference {
                    is_static,
                    name_index,
                    value,
                },
                consumed + value_consumed,
            )));
        }
        if first & 0b0100_0000 != 0 {
            let Some((name, consumed)) =
                prefix_int::decode_string(input, 6).map_err(error)?
            else {
                return Ok(None);
            };
            let Some((value, value_consumed)) =
                prefix_int::decode_string(&input[consumed..], 8).map_err(error)?
            else {
                return Ok(None);
            };
            return Ok(Some((
                EncoderInstruction::InsertWithoutNameReference { name, value },
                consumed + value_consumed,
            )));
        }
        if first & 0b0010_0000 != 0 {
            let Some((capacity, consumed)) = prefix_int::decode(input, 5).map_err(error)?
            else {
                return Ok(None);
            };
            return Ok(Some((
                EncoderInstruction::SetDynamicTableCapacity { capacity },
                consumed,
            )));
        }
        let Some((index, consumed)) = prefix_int::decode(input, 5).map_err(error)? else {
            return Ok(None);
        };
        Ok(Some((EncoderInstruction::Duplicate { index }, consumed)))
    }
}

/// An instruction on the decoder's unidirectional stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderInstruction {
    /// `1xxxxxxx`: the oldest outstanding section of the stream decoded.
    SectionAcknowledgment { stream_id: u64 },
    /// `01xxxxxx`: the stream was reset, abandon its sections.
    StreamCancellation { stream_id: u64 },
    /// `00xxxxxx`: the table caught up by this many inserts.
    InsertCountIncrement { increment: u64 },
}

impl DecoderInstruction {
    pub fn encode(&self, buf: &mut impl BufMut) {
        match self {
            DecoderInstruction::SectionAcknowledgment { stream_id } => {
                prefix_int::encode(buf, 0b1000_0000, 7, *stream_id);
            }
            DecoderInstruction::StreamCancellation { stream_id } => {
                prefix_int::encode(buf, 0b0100_0000, 6, *stream_id);
            }
            DecoderInstruction::InsertCountIncrement { increment } => {
                prefix_int::encode(buf, 0b0000_0000, 6, *increment);
            }
        }
    }

    /// Decode one instruction; `Ok(None)` asks for more bytes.
    pub fn decode(input: &[u8]) -> Result<Option<(Self, usize)>, QpackError> {
        let error = |e: PrefixIntError| QpackError::DecoderStreamError(e.to_string());
        let Some(first) = input.first() else {
            return Ok(None);
        };
        if first & 0b1000_0000 != 0 {
            return Ok(prefix_int::decode(input, 7)
                .map_err(error)?
                .map(|(stream_id, consumed)| {
                    (DecoderInstruction::SectionAcknowledgment { stream_id }, consumed)
                }));
        }
        if first & 0b0100_0000 != 0 {
            return Ok(prefix_int::decode(input, 6)
                .map_err(error)?
                .map(|(stream_id, consumed)| {
                    (DecoderInstruction::StreamCancellation { stream_id }, consumed)
                }));
        }
        Ok(prefix_int::decode(input, 6)
            .map_err(error)?
            .map(|(increment, consumed)| {
                (DecoderInstruction::InsertCountIncrement { increment }, consumed)
            }))
    }
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;

    use super::*;

    fn roundtrip_encoder(instruction: EncoderInstruction) {
        let mut buf = BytesMut::new();
        instruction.encode(&mut buf);
        let (decoded, consumed) = EncoderInstruction::decode(&buf).unwrap().unwrap();
        assert_eq!(consumed, buf.len());
        assert_eq!(decoded, instruction);
    }

    #[test]
    fn test_encoder_instructions_roundtrip() {
        roundtrip_encoder(EncoderInstruction::SetDynamicTableCapacity { capacity: 4096 });
        roundtrip_encoder(EncoderInstruction::InsertWithNameReference {
            is_static: true,
            name_index: 17,
            value: b"PATCH".to_vec(),
        });
        roundtrip_encoder(EncoderInstruction::InsertWithNameReference {
            is_static: false,
            name_index: 3,
            value: b"value".to_vec(),
        });
        roundtrip_encoder(EncoderInstruction::InsertWithoutNameReference {
            name: b"x-custom".to_vec(),
            value: b"yes".to_vec(),
        });
        roundtrip_encoder(EncoderInstruction::Duplicate { index: 2 });
    }

    #[test]
    fn test_decoder_instructions_roundtrip() {
        for instruction in [
            DecoderInstruction::SectionAcknowledgment { stream_id: 4 },
            DecoderInstruction::StreamCancellation { stream_id: 400 },
            DecoderInstruction::InsertCountIncrement { increment: 129 },
        ] {
            let mut buf = BytesMut::new();
            instruction.encode(&mut buf);
            let (decoded, consumed) = DecoderInstruction::decode(&buf).unwrap().unwrap();
            assert_eq!(consumed, buf.len());
            assert_eq!(decoded, instruction);
        }
    }

    #[test]
    fn test_partial_input() {
        let mut buf = BytesMut::new();
        EncoderInstruction::InsertWithoutNameReference {
            name: b"x-custom".to_vec(),
            value: b"yes".to_vec(),
        }
        .encode(&mut buf);
        for cut in 0..buf.len() {
            assert_eq!(EncoderInstruction::decode(&buf[..cut]).unwrap(), None);
        }
    }
}
