use std::ops::RangeInclusive;

use crate::varint::{VarInt, WriteVarInt, be_varint};

use super::{EncodeFrame, FrameType, GetFrameType, io::WriteFrame};

/// ACK frame.
///
/// ```text
/// ACK Frame {
///     Type (i) = 0x02..0x03,
///     Largest Acknowledged (i),
///     ACK Delay (i),
///     ACK Range Count (i),
///     First ACK Range (i),
///     ACK Range (..) ...,
///     [ECN Counts (..)],
/// }
/// ```
///
/// See [RFC 9000 Section 19.3](https://www.rfc-editor.org/rfc/rfc9000.html#section-19.3).
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct AckFrame {
    largest: VarInt,
    delay: VarInt,
    first_range: VarInt,
    ranges: Vec<(VarInt, VarInt)>,
    ecn: Option<EcnCounts>,
}

/// The ECN counts carried in an ACK frame of type 0x03.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct EcnCounts {
    ect0: VarInt,
    ect1: VarInt,
    ce: VarInt,
}

impl AckFrame {
    pub fn new(
        largest: VarInt,
        delay: VarInt,
        first_range: VarInt,
        ranges: Vec<(VarInt, VarInt)>,
        ecn: Option<EcnCounts>,
    ) -> Self {
        debug_assert!(largest.into_inner() >= first_range.into_inner());
        Self {
            largest,
            delay,
            first_range,
            ranges,
            ecn,
        }
    }

    /// The largest packet number this frame acknowledges.
    pub fn largest(&self) -> u64 {
        self.largest.into_inner()
    }

    /// The raw ack delay, before the ack-delay exponent is applied.
    pub fn delay(&self) -> u64 {
        self.delay.into_inner()
    }

    pub fn ecn(&self) -> Option<&EcnCounts> {
        self.ecn.as_ref()
    }

    /// Iterate the acknowledged packet-number ranges, largest first.
    pub fn iter(&self) -> impl Iterator<Item = RangeInclusive<u64>> + '_ {
        let first = self.largest() - self.first_range.into_inner()..=self.largest();
        let mut smallest = *first.start();
        std::iter::once(first).chain(self.ranges.iter().map(move |(gap, length)| {
            // Gap encodes the number of unacked packets minus one; the next
            // range ends two below the previous smallest plus the gap.
            let largest = smallest - gap.into_inner() - 2;
            smallest = largest - length.into_inner();
            smallest..=largest
        }))
    }
}

impl GetFrameType for AckFrame {
    fn frame_type(&self) -> FrameType {
        FrameType::Ack(if self.ecn.is_some() { 1 } else { 0 })
    }
}

impl EncodeFrame for AckFrame {
    fn max_encoding_size(&self) -> usize {
        1 + 8 * 4 + self.ranges.len() * 16 + if self.ecn.is_some() { 24 } else { 0 }
    }

    fn encoding_size(&self) -> usize {
        1 + self.largest.encoding_size()
            + self.delay.encoding_size()
            + VarInt::try_from(self.ranges.len())
                .expect("ack range count always fits in a varint")
                .encoding_size()
            + self.first_range.encoding_size()
            + self
                .ranges
                .iter()
                .map(|(gap, length)| gap.encoding_size() + length.encoding_size())
                .sum::<usize>()
            + self.ecn.map_or(0, |ecn| {
                ecn.ect0.encoding_size() + ecn.ect1.encoding_size() + ecn.ce.encoding_size()
            })
    }
}

/// Parse an ACK frame body, the `ecn` flag coming from the frame type.
pub(super) fn be_ack_frame(input: &[u8], ecn: u8) -> nom::IResult<&[u8], AckFrame> {
    let (remain, largest) = be_varint(input)?;
    let (remain, delay) = be_varint(remain)?;
    let (remain, count) = be_varint(remain)?;
    let (mut remain, first_range) = be_varint(remain)?;
    if first_range > largest {
        return Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Verify,
        )));
    }

    let mut smallest = largest.into_inner() - first_range.into_inner();
    let mut ranges = Vec::with_capacity(usize::from(count).min(64));
    for _ in 0..count.into_inner() {
        let (rest, gap) = be_varint(remain)?;
        let (rest, length) = be_varint(rest)?;
        // every range must stay within the packet number space
        let largest_of_range = smallest
            .checked_sub(gap.into_inner() + 2)
            .ok_or(nom::Err::Error(nom::error::Error::new(
                input,
                nom::error::ErrorKind::Verify,
            )))?;
        smallest = largest_of_range.checked_sub(length.into_inner()).ok_or(
            nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Verify)),
        )?;
        ranges.push((gap, length));
        remain = rest;
    }

    let mut ecn_counts = None;
    if ecn == 1 {
        let (rest, ect0) = be_varint(remain)?;
        let (rest, ect1) = be_varint(rest)?;
        let (rest, ce) = be_varint(rest)?;
        ecn_counts = Some(EcnCounts { ect0, ect1, ce });
        remain = rest;
    }

    Ok((
        remain,
        AckFrame {
            largest,
            delay,
            first_range,
            ranges,
            ecn: ecn_counts,
        },
    ))
}

impl<T: bytes::BufMut> WriteFrame<AckFrame> for T {
    fn put_frame(&mut self, frame: &AckFrame) {
        self.put_varint(&frame.frame_type().into());
        self.put_varint(&frame.largest);
        self.put_varint(&frame.delay);
        self.put_varint(
            &VarInt::try_from(frame.ranges.len())
                .expect("ack range count always fits in a varint"),
        );
        self.put_varint(&frame.first_range);
        for (gap, length) in &frame.ranges {
            self.put_varint(gap);
            self.put_varint(length);
        }
        if let Some(ecn) = &frame.ecn {
            self.put_varint(&ecn.ect0);
            self.put_varint(&ecn.ect1);
            self.put_varint(&ecn.ce);
        }
    }
}
