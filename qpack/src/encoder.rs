use std::collections::BTreeSet;

use bytes::{Bytes, BytesMut};

use crate::{
    HeaderField, QpackError,
    blocking::BlockingManager,
    instruction::{DecoderInstruction, EncoderInstruction},
    prefix_int,
    split_value,
    static_table::{self, StaticMatch},
    table::{DynamicTable, TableError},
};

/// One encoded field section plus whatever had to go out on the encoder
/// stream first.
#[derive(Debug)]
pub struct EncodedFieldSection {
    pub header_block: Bytes,
    /// Table instructions that must reach the peer's decoder; they travel
    /// on the encoder stream and are reliably ordered before any later
    /// block can need them.
    pub encoder_stream: Bytes,
}

/// A field-line representation chosen in the first pass, holding absolute
/// indices until the prefix fixes the base.
#[derive(Debug)]
enum Repr {
    IndexedStatic(u64),
    IndexedDynamic(u64),
    LiteralWithStaticNameRef(u64, String),
    LiteralWithDynamicNameRef(u64, String),
    Literal(String, String),
}

/// The QPACK encoder: the local dynamic table, the blocking manager, and
/// the representation choices that keep the decoder never waiting on an
/// entry we are not allowed to make it wait for.
#[derive(Debug, Default)]
pub struct QpackEncoder {
    table: DynamicTable,
    blocking: BlockingManager,
    maximum_blocked_streams: u64,
    decoder_stream_buffer: Vec<u8>,
}

impl QpackEncoder {
    /// Both limits come from the peer's SETTINGS; zero (the default until
    /// negotiated) disables the dynamic table and blocking respectively.
    pub fn new(maximum_dynamic_table_capacity: u64, maximum_blocked_streams: u64) -> Self {
        Self {
            table: DynamicTable::new(maximum_dynamic_table_capacity),
            blocking: BlockingManager::default(),
            maximum_blocked_streams,
            decoder_stream_buffer: Vec::new(),
        }
    }

    pub fn known_received_count(&self) -> u64 {
        self.blocking.known_received_count()
    }

    pub fn inserted_entry_count(&self) -> u64 {
        self.table.inserted_entry_count()
    }

    /// Start using this much dynamic table; the instruction must be sent
    /// on the encoder stream.
    pub fn set_dynamic_table_capacity(
        &mut self,
        capacity: u64,
    ) -> Result<Bytes, TableError> {
        self.table.set_capacity(capacity)?;
        let mut buf = BytesMut::new();
        EncoderInstruction::SetDynamicTableCapacity { capacity }.encode(&mut buf);
        Ok(buf.freeze())
    }

    /// Entries at or above this absolute index may not be evicted.
    fn evict_frontier(&self) -> u64 {
        self.blocking
            .smallest_blocking_index()
            .min(self.blocking.known_received_count())
    }

    /// Encode one field section for `stream_id`, with value splitting on
    /// NUL applied first.
    pub fn encode_field_section(
        &mut self,
        stream_id: u64,
        fields: &[HeaderField],
    ) -> EncodedFieldSection {
        let blocking_allowed = self
            .blocking
            .blocking_allowed_on_stream(stream_id, self.maximum_blocked_streams);

        let mut reprs = Vec::new();
        let mut referred = BTreeSet::new();
        let mut encoder_stream = BytesMut::new();
        for (name, value) in fields {
            for value in split_value(value) {
                reprs.push(self.encode_field(
                    name,
                    value,
                    blocking_allowed,
                    &mut referred,
                    &mut encoder_stream,
                ));
            }
        }

        let required_insert_count = BlockingManager::required_insert_count(
            &referred.iter().copied().collect::<Vec<_>>(),
        );
        if !referred.is_empty() {
            self.blocking.on_header_block_sent(
                stream_id,
                referred.iter().copied().collect(),
                required_insert_count,
            );
        }

        // prefix: encoded required insert count, then base, which this
        // encoder always picks equal to the required insert count
        let mut block = BytesMut::new();
        let encoded_ric = if required_insert_count == 0 {
            0
        } else {
            required_insert_count % (2 * self.table.max_entries()) + 1
        };
        prefix_int::encode(&mut block, 0, 8, encoded_ric);
        prefix_int::encode(&mut block, 0, 7, 0); // S=0, delta base 0
        let base = required_insert_count;

        for repr in reprs {
            match repr {
                Repr::IndexedStatic(index) => {
                    prefix_int::encode(&mut block, 0b1100_0000, 6, index);
                }
                Repr::IndexedDynamic(absolute) => {
                    debug_assert!(absolute < base);
                    prefix_int::encode(&mut block, 0b1000_0000, 6, base - 1 - absolute);
                }
                Repr::LiteralWithStaticNameRef(index, value) => {
                    prefix_int::encode(&mut block, 0b0101_0000, 4, index);
                    prefix_int::encode_string(&mut block, 0, 8, value.as_bytes());
                }
                Repr::LiteralWithDynamicNameRef(absolute, value) => {
                    debug_assert!(absolute < base);
                    prefix_int::encode(&mut block, 0b0100_0000, 4, base - 1 - absolute);
                    prefix_int::encode_string(&mut block, 0, 8, value.as_bytes());
                }
                Repr::Literal(name, value) => {
                    prefix_int::encode_string(&mut block, 0b0010_0000, 4, name.as_bytes());
                    prefix_int::encode_string(&mut block, 0, 8, value.as_bytes());
                }
            }
        }

        EncodedFieldSection {
            header_block: block.freeze(),
            encoder_stream: encoder_stream.freeze(),
        }
    }

    fn encode_field(
        &mut self,
        name: &str,
        value: &str,
        blocking_allowed: bool,
        referred: &mut BTreeSet<u64>,
        encoder_stream: &mut BytesMut,
    ) -> Repr {
        let static_match = static_table::find(name, value);
        if let StaticMatch::Full(index) = static_match {
            return Repr::IndexedStatic(index);
        }

        let (dynamic_full, dynamic_name) = self.table.find(name, value);
        let referenceable = |absolute: u64| {
            blocking_allowed || absolute < self.blocking.known_received_count()
        };

        if let Some(absolute) = dynamic_full {
            if absolute >= self.table.draining_index() {
                if referenceable(absolute) {
                    referred.insert(absolute);
                    return Repr::IndexedDynamic(absolute);
                }
            } else if blocking_allowed
                && self.table.can_insert(name, value, self.evict_frontier())
            {
                // too old to reference: duplicate it to the young end
                let relative = self.table.inserted_entry_count() - 1 - absolute;
                EncoderInstruction::Duplicate { index: relative }.encode(encoder_stream);
                let new_absolute = self
                    .table
                    .insert(name, value, self.evict_frontier())
                    .expect("can_insert was checked");
                referred.insert(new_absolute);
                return Repr::IndexedDynamic(new_absolute);
            }
        }

        // name-only matches: try to grow the table with the new value
        if let StaticMatch::Name(name_index) = static_match {
            if blocking_allowed && self.table.can_insert(name, value, self.evict_frontier()) {
                EncoderInstruction::InsertWithNameReference {
                    is_static: true,
                    name_index,
                    value: value.as_bytes().to_vec(),
                }
                .encode(encoder_stream);
                let absolute = self
                    .table
                    .insert(name, value, self.evict_frontier())
                    .expect("can_insert was checked");
                referred.insert(absolute);
                return Repr::IndexedDynamic(absolute);
            }
            return Repr::LiteralWithStaticNameRef(name_index, value.to_string());
        }
        if let Some(name_absolute) = dynamic_name {
            if name_absolute >= self.table.draining_index() && referenceable(name_absolute) {
                referred.insert(name_absolute);
                return Repr::LiteralWithDynamicNameRef(name_absolute, value.to_string());
            }
        }

        // no usable match anywhere
        if blocking_allowed && self.table.can_insert(name, value, self.evict_frontier()) {
            EncoderInstruction::InsertWithoutNameReference {
                name: name.as_bytes().to_vec(),
                value: value.as_bytes().to_vec(),
            }
            .encode(encoder_stream);
            let absolute = self
                .table
                .insert(name, value, self.evict_frontier())
                .expect("can_insert was checked");
            referred.insert(absolute);
            return Repr::IndexedDynamic(absolute);
        }
        Repr::Literal(name.to_string(), value.to_string())
    }

    /// Feed bytes of the peer's decoder stream.
    pub fn on_decoder_stream_data(&mut self, data: &[u8]) -> Result<(), QpackError> {
        self.decoder_stream_buffer.extend_from_slice(data);
        loop {
            let Some((instruction, consumed)) =
                DecoderInstruction::decode(&self.decoder_stream_buffer)?
            else {
                return Ok(());
            };
            self.decoder_stream_buffer.drain(..consumed);
            match instruction {
                DecoderInstruction::SectionAcknowledgment { stream_id } => {
                    if !self.blocking.on_header_acknowledgement(stream_id) {
                        return Err(QpackError::DecoderStreamError(format!(
                            "section acknowledgment for stream {stream_id} with no outstanding sections"
                        )));
                    }
                }
                DecoderInstruction::StreamCancellation { stream_id } => {
                    self.blocking.on_stream_cancellation(stream_id);
                }
                DecoderInstruction::InsertCountIncrement { increment } => {
                    self.blocking
                        .on_insert_count_increment(increment, self.table.inserted_entry_count())?;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(name: &str, value: &str) -> HeaderField {
        (name.to_string(), value.to_string())
    }

    fn encoder() -> QpackEncoder {
        let mut encoder = QpackEncoder::new(4096, 16);
        encoder.set_dynamic_table_capacity(4096).unwrap();
        encoder
    }

    #[test]
    fn test_static_full_match_is_one_byte_plus_prefix() {
        let mut encoder = encoder();
        let section = encoder.encode_field_section(0, &[field(":method", "GET")]);
        // two prefix bytes, then 0b11 | static index 17
        assert_eq!(&section.header_block[..], &[0x00, 0x00, 0xc0 | 17]);
        assert!(section.encoder_stream.is_empty());
    }

    #[test]
    fn test_unknown_field_inserted_and_referenced() {
        let mut encoder = encoder();
        let section = encoder.encode_field_section(0, &[field("x-custom", "yes")]);
        assert!(!section.encoder_stream.is_empty());
        assert_eq!(encoder.inserted_entry_count(), 1);
        // required insert count 1, base 1, indexed dynamic relative 0
        assert_eq!(&section.header_block[..], &[0x02, 0x00, 0x80]);
    }

    #[test]
    fn test_blocking_cap_forces_literal() {
        let mut encoder = QpackEncoder::new(4096, 2);
        encoder.set_dynamic_table_capacity(4096).unwrap();

        // two streams reference not-yet-acknowledged entries
        let first = encoder.encode_field_section(0, &[field("x-a", "1")]);
        let second = encoder.encode_field_section(4, &[field("x-b", "2")]);
        assert!(!first.encoder_stream.is_empty());
        assert!(!second.encoder_stream.is_empty());

        // the third stream must not block even though x-a matches
        let third = encoder.encode_field_section(8, &[field("x-a", "1")]);
        assert!(third.encoder_stream.is_empty());
        // prefix announces no required inserts
        assert_eq!(third.header_block[0], 0);
    }

    #[test]
    fn test_acknowledged_entry_usable_without_blocking() {
        let mut encoder = QpackEncoder::new(4096, 1);
        encoder.set_dynamic_table_capacity(4096).unwrap();
        encoder.encode_field_section(0, &[field("x-a", "1")]);

        let mut ack = BytesMut::new();
        DecoderInstruction::SectionAcknowledgment { stream_id: 0 }.encode(&mut ack);
        encoder.on_decoder_stream_data(&ack).unwrap();
        assert_eq!(encoder.known_received_count(), 1);

        // stream 4 occupies the only blocked slot
        encoder.encode_field_section(4, &[field("x-b", "2")]);
        // stream 8 cannot block, but the acknowledged x-a is safe to use
        let section = encoder.encode_field_section(8, &[field("x-a", "1")]);
        assert!(section.encoder_stream.is_empty());
        assert_eq!(&section.header_block[..], &[0x02, 0x00, 0x80]);
    }

    #[test]
    fn test_static_name_with_new_value_inserts() {
        let mut encoder = encoder();
        let section = encoder.encode_field_section(0, &[field(":method", "PATCH")]);
        // insert with static name reference on the encoder stream
        let (instruction, _) = EncoderInstruction::decode(&section.encoder_stream)
            .unwrap()
            .unwrap();
        assert_eq!(
            instruction,
            EncoderInstruction::InsertWithNameReference {
                is_static: true,
                name_index: 15,
                value: b"PATCH".to_vec(),
            }
        );
    }

    #[test]
    fn test_zero_capacity_stays_literal() {
        let mut encoder = QpackEncoder::new(0, 0);
        let section = encoder.encode_field_section(0, &[field("x-custom", "yes")]);
        assert!(section.encoder_stream.is_empty());
        assert_eq!(section.header_block[0], 0);
        assert_eq!(encoder.inserted_entry_count(), 0);
    }

    #[test]
    fn test_cookie_values_split_on_nul() {
        let mut encoder = encoder();
        let section =
            encoder.encode_field_section(0, &[field("cookie", "a=1\0b=2")]);
        // two representations, both inserted via the static cookie name
        assert_eq!(encoder.inserted_entry_count(), 2);
        let mut input = &section.encoder_stream[..];
        let mut values = Vec::new();
        while let Some((instruction, consumed)) =
            EncoderInstruction::decode(input).unwrap()
        {
            if let EncoderInstruction::InsertWithNameReference { value, .. } = instruction {
                values.push(value);
            }
            input = &input[consumed..];
        }
        assert_eq!(values, vec![b"a=1".to_vec(), b"b=2".to_vec()]);
    }

    #[test]
    fn test_stray_section_ack_is_error() {
        let mut encoder = encoder();
        let mut ack = BytesMut::new();
        DecoderInstruction::SectionAcknowledgment { stream_id: 0 }.encode(&mut ack);
        assert!(matches!(
            encoder.on_decoder_stream_data(&ack),
            Err(QpackError::DecoderStreamError(_))
        ));
    }
}
