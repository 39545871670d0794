use std::collections::HashMap;

use bytes::{Bytes, BytesMut};

use crate::{
    HeaderField, QpackError,
    instruction::{DecoderInstruction, EncoderInstruction},
    prefix_int::{self, PrefixIntError},
    static_table,
    table::DynamicTable,
};

/// What decoding one field section produced.
#[derive(Debug)]
pub enum DecodeResult {
    /// The section decoded completely; the returned decoder-stream bytes
    /// (a Section Acknowledgment, when due) must be sent to the peer.
    Decoded {
        fields: Vec<HeaderField>,
        decoder_stream: Bytes,
    },
    /// The section references entries not yet inserted; present the same
    /// block again after the encoder stream delivers more instructions.
    Blocked { required_insert_count: u64 },
}

/// The QPACK decoder: applies the peer's encoder-stream instructions to
/// its copy of the dynamic table and decodes field sections, blocking
/// those that ran ahead of the table.
#[derive(Debug, Default)]
pub struct QpackDecoder {
    table: DynamicTable,
    maximum_blocked_streams: u64,
    // stream id -> the required insert count it waits for
    blocked_streams: HashMap<u64, u64>,
    encoder_stream_buffer: Vec<u8>,
    /// Inserts the peer knows we have, via acknowledgments or increments.
    known_to_peer: u64,
}

impl QpackDecoder {
    /// The limits are our own SETTINGS, the promise we made to the peer.
    pub fn new(maximum_dynamic_table_capacity: u64, maximum_blocked_streams: u64) -> Self {
        Self {
            table: DynamicTable::new(maximum_dynamic_table_capacity),
            maximum_blocked_streams,
            blocked_streams: HashMap::new(),
            encoder_stream_buffer: Vec::new(),
            known_to_peer: 0,
        }
    }

    pub fn inserted_entry_count(&self) -> u64 {
        self.table.inserted_entry_count()
    }

    /// Feed bytes of the peer's encoder stream. Returns the streams whose
    /// blocking requirement is now satisfied; their blocks should be
    /// decoded again.
    pub fn on_encoder_stream_data(&mut self, data: &[u8]) -> Result<Vec<u64>, QpackError> {
        self.encoder_stream_buffer.extend_from_slice(data);
        loop {
            let Some((instruction, consumed)) =
                EncoderInstruction::decode(&self.encoder_stream_buffer)?
            else {
                break;
            };
            self.encoder_stream_buffer.drain(..consumed);
            self.apply_encoder_instruction(instruction)?;
        }

        let inserted = self.table.inserted_entry_count();
        let mut unblocked: Vec<u64> = Vec::new();
        self.blocked_streams.retain(|stream_id, required| {
            if *required <= inserted {
                unblocked.push(*stream_id);
                false
            } else {
                true
            }
        });
        unblocked.sort_unstable();
        Ok(unblocked)
    }

    fn apply_encoder_instruction(
        &mut self,
        instruction: EncoderInstruction,
    ) -> Result<(), QpackError> {
        let stream_error = |reason: String| QpackError::EncoderStreamError(reason);
        match instruction {
            EncoderInstruction::SetDynamicTableCapacity { capacity } => self
                .table
                .set_capacity(capacity)
                .map_err(|e| stream_error(e.to_string())),
            EncoderInstruction::InsertWithNameReference {
                is_static,
                name_index,
                value,
            } => {
                let name = if is_static {
                    static_table::get(name_index)
                        .ok_or_else(|| {
                            stream_error(format!("static name index {name_index} out of range"))
                        })?
                        .0
                        .to_string()
                } else {
                    let absolute = self
                        .table
                        .inserted_entry_count()
                        .checked_sub(1 + name_index)
                        .ok_or_else(|| {
                            stream_error(format!("dynamic name index {name_index} out of range"))
                        })?;
                    self.table
                        .get(absolute)
                        .map_err(|e| stream_error(e.to_string()))?
                        .0
                        .to_string()
                };
                let value = string_of(value, QpackError::EncoderStreamError)?;
                self.table
                    .insert(&name, &value, u64::MAX)
                    .map_err(|e| stream_error(e.to_string()))?;
                Ok(())
            }
            EncoderInstruction::InsertWithoutNameReference { name, value } => {
                let name = string_of(name, QpackError::EncoderStreamError)?;
                let value = string_of(value, QpackError::EncoderStreamError)?;
                self.table
                    .insert(&name, &value, u64::MAX)
                    .map_err(|e| stream_error(e.to_string()))?;
                Ok(())
            }
            EncoderInstruction::Duplicate { index } => {
                let absolute = self
                    .table
                    .inserted_entry_count()
                    .checked_sub(1 + index)
                    .ok_or_else(|| stream_error(format!("duplicate index {index} out of range")))?;
                let (name, value) = self
                    .table
                    .get(absolute)
                    .map_err(|e| stream_error(e.to_string()))?;
                let (name, value) = (name.to_string(), value.to_string());
                self.table
                    .insert(&name, &value, u64::MAX)
                    .map_err(|e| stream_error(e.to_string()))?;
                Ok(())
            }
        }
    }

    /// Decode one complete field section received on `stream_id`.
    pub fn decode_field_section(
        &mut self,
        stream_id: u64,
        block: &[u8],
    ) -> Result<DecodeResult, QpackError> {
        let failed = |reason: String| QpackError::DecompressionFailed(reason);
        let int_error = |e: PrefixIntError| QpackError::DecompressionFailed(e.to_string());

        let (encoded_ric, consumed) = prefix_int::decode(block, 8)
            .map_err(int_error)?
            .ok_or_else(|| failed("truncated section prefix".to_string()))?;
        let required_insert_count = self.reconstruct_required_insert_count(encoded_ric)?;

        if required_insert_count > self.table.inserted_entry_count() {
            if !self.blocked_streams.contains_key(&stream_id)
                && self.blocked_streams.len() as u64 >= self.maximum_blocked_streams
            {
                return Err(failed(format!(
                    "stream {stream_id} would exceed the blocked stream limit"
                )));
            }
            tracing::debug!(
                stream_id,
                required_insert_count,
                "field section blocked on the encoder stream"
            );
            self.blocked_streams.insert(stream_id, required_insert_count);
            return Ok(DecodeResult::Blocked {
                required_insert_count,
            });
        }
        self.blocked_streams.remove(&stream_id);

        let input = &block[consumed..];
        let (base_byte, base_consumed) = prefix_int::decode(input, 7)
            .map_err(int_error)?
            .ok_or_else(|| failed("truncated section base".to_string()))?;
        let sign_negative = input[0] & 0x80 != 0;
        let base = if sign_negative {
            required_insert_count
                .checked_sub(base_byte + 1)
                .ok_or_else(|| failed("base underflows".to_string()))?
        } else {
            required_insert_count + base_byte
        };

        let mut input = &input[base_consumed..];
        let mut fields = Vec::new();
        while !input.is_empty() {
            let (field, consumed) = self.decode_field_line(input, base)?;
            fields.push(field);
            input = &input[consumed..];
        }

        let mut decoder_stream = BytesMut::new();
        if required_insert_count > 0 {
            DecoderInstruction::SectionAcknowledgment { stream_id }.encode(&mut decoder_stream);
            self.known_to_peer = self.known_to_peer.max(required_insert_count);
        }
        Ok(DecodeResult::Decoded {
            fields,
            decoder_stream: decoder_stream.freeze(),
        })
    }

    fn decode_field_line(
        &self,
        input: &[u8],
        base: u64,
    ) -> Result<(HeaderField, usize), QpackError> {
        let failed = |reason: String| QpackError::DecompressionFailed(reason);
        let int_error = |e: PrefixIntError| QpackError::DecompressionFailed(e.to_string());
        let truncated = || failed("truncated field line".to_string());
        let first = input[0];

        // indexed field line
        if first & 0b1000_0000 != 0 {
            let (index, consumed) = prefix_int::decode(input, 6)
                .map_err(int_error)?
                .ok_or_else(truncated)?;
            let (name, value) = if first & 0b0100_0000 != 0 {
                static_table::get(index)
                    .ok_or_else(|| failed(format!("static index {index} out of range")))?
            } else {
                let absolute = base
                    .checked_sub(1 + index)
                    .ok_or_else(|| failed(format!("relative index {index} underflows")))?;
                self.table
                    .get(absolute)
                    .map_err(|e| failed(e.to_string()))?
            };
            return Ok(((name.to_string(), value.to_string()), consumed));
        }

        // literal field line with name reference
        if first & 0b0100_0000 != 0 {
            let (index, consumed) = prefix_int::decode(input, 4)
                .map_err(int_error)?
                .ok_or_else(truncated)?;
            let name = if first & 0b0001_0000 != 0 {
                static_table::get(index)
                    .ok_or_else(|| failed(format!("static index {index} out of range")))?
                    .0
                    .to_string()
            } else {
                let absolute = base
                    .checked_sub(1 + index)
                    .ok_or_else(|| failed(format!("relative index {index} underflows")))?;
                self.table
                    .get(absolute)
                    .map_err(|e| failed(e.to_string()))?
                    .0
                    .to_string()
            };
            let (value, value_consumed) = prefix_int::decode_string(&input[consumed..], 8)
                .map_err(int_error)?
                .ok_or_else(truncated)?;
            let value = string_of(value, QpackError::DecompressionFailed)?;
            return Ok(((name, value), consumed + value_consumed));
        }

        // literal field line with literal name
        if first & 0b0010_0000 != 0 {
            let (name, consumed) = prefix_int::decode_string(input, 4)
                .map_err(int_error)?
                .ok_or_else(truncated)?;
            let (value, value_consumed) = prefix_int::decode_string(&input[consumed..], 8)
                .map_err(int_error)?
                .ok_or_else(truncated)?;
            let name = string_of(name, QpackError::DecompressionFailed)?;
            let value = string_of(value, QpackError::DecompressionFailed)?;
            return Ok(((name, value), consumed + value_consumed));
        }

        // indexed field line with post-base index
        if first & 0b0001_0000 != 0 {
            let (index, consumed) = prefix_int::decode(input, 4)
                .map_err(int_error)?
                .ok_or_else(truncated)?;
            let (name, value) = self
                .table
                .get(base + index)
                .map_err(|e| failed(e.to_string()))?;
            return Ok(((name.to_string(), value.to_string()), consumed));
        }

        // literal field line with post-base name reference
        let (index, consumed) = prefix_int::decode(input, 3)
            .map_err(int_error)?
            .ok_or_else(truncated)?;
        let name = self
            .table
            .get(base + index)
            .map_err(|e| failed(e.to_string()))?
            .0
            .to_string();
        let (value, value_consumed) = prefix_int::decode_string(&input[consumed..], 8)
            .map_err(int_error)?
            .ok_or_else(truncated)?;
        let value = string_of(value, QpackError::DecompressionFailed)?;
        Ok(((name, value), consumed + value_consumed))
    }

    /// Undo the modular wire encoding of the required insert count, per
    /// [RFC 9204 Section 4.5.1.1](https://www.rfc-editor.org/rfc/rfc9204.html#section-4.5.1.1).
    fn reconstruct_required_insert_count(&self, encoded: u64) -> Result<u64, QpackError> {
        let failed =
            |reason: &str| QpackError::DecompressionFailed(reason.to_string());
        if encoded == 0 {
            return Ok(0);
        }
        let max_entries = self.table.max_entries();
        let full_range = 2 * max_entries;
        if max_entries == 0 || encoded > full_range {
            return Err(failed("required insert count out of range"));
        }
        let max_value = self.table.inserted_entry_count() + max_entries;
        let max_wrapped = (max_value / full_range) * full_range;
        let mut required_insert_count = max_wrapped + encoded - 1;
        if required_insert_count > max_value {
            if required_insert_count <= full_range {
                return Err(failed("required insert count out of range"));
            }
            required_insert_count -= full_range;
        }
        if required_insert_count == 0 {
            return Err(failed("required insert count of zero was not encoded as zero"));
        }
        Ok(required_insert_count)
    }

    /// The stream was reset before its sections were decoded; tell the
    /// encoder to release the references.
    pub fn on_stream_cancelled(&mut self, stream_id: u64) -> Bytes {
        self.blocked_streams.remove(&stream_id);
        let mut buf = BytesMut::new();
        DecoderInstruction::StreamCancellation { stream_id }.encode(&mut buf);
        buf.freeze()
    }

    /// Credit the encoder with inserts no section acknowledgment covered
    /// yet, keeping its compression window open.
    pub fn flush_insert_count_increment(&mut self) -> Option<Bytes> {
        let uncredited = self.table.inserted_entry_count() - self.known_to_peer;
        if uncredited == 0 {
            return None;
        }
        self.known_to_peer = self.table.inserted_entry_count();
        let mut buf = BytesMut::new();
        DecoderInstruction::InsertCountIncrement {
            increment: uncredited,
        }
        .encode(&mut buf);
        Some(buf.freeze())
    }
}

fn string_of(
    bytes: Vec<u8>,
    error: fn(String) -> QpackError,
) -> Result<String, QpackError> {
    String::from_utf8(bytes).map_err(|_| error("field is not valid utf-8".to_string()))
}
