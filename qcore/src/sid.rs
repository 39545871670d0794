use std::collections::HashSet;

use crate::{
    error::{ErrorKind, QuicError},
    frame::{FrameType, MaxStreamsFrame, StreamsBlockedFrame},
    varint::VarInt,
};

/// The largest number of streams of one type a connection can ever carry:
/// 2^60, since stream ids are 62 bits and each type uses every 4th id.
pub const MAX_STREAM_COUNT: u64 = 1 << 60;

/// Which endpoint this is, client or server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

impl std::ops::Not for Role {
    type Output = Self;

    fn not(self) -> Self::Output {
        match self {
            Role::Client => Role::Server,
            Role::Server => Role::Client,
        }
    }
}

/// Stream directionality: bidirectional or unidirectional.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dir {
    Bi,
    Uni,
}

/// A QUIC stream identifier.
///
/// The two least significant bits encode the initiator and the direction;
/// consecutive streams of the same kind differ by 4. See
/// [RFC 9000 Section 2.1](https://www.rfc-editor.org/rfc/rfc9000.html#section-2.1).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StreamId(u64);

impl StreamId {
    pub fn new(role: Role, dir: Dir, index: u64) -> Self {
        debug_assert!(index < MAX_STREAM_COUNT);
        let role_bit = match role {
            Role::Client => 0,
            Role::Server => 1,
        };
        let dir_bit = match dir {
            Dir::Bi => 0,
            Dir::Uni => 2,
        };
        Self((index << 2) | dir_bit | role_bit)
    }

    pub fn role(&self) -> Role {
        if self.0 & 0x1 == 0 {
            Role::Client
        } else {
            Role::Server
        }
    }

    pub fn dir(&self) -> Dir {
        if self.0 & 0x2 == 0 { Dir::Bi } else { Dir::Uni }
    }

    /// The per-kind ordinal of this stream: how many streams of the same
    /// kind precede it.
    pub fn index(&self) -> u64 {
        self.0 >> 2
    }

    pub fn id(&self) -> u64 {
        self.0
    }

    /// The next stream id of the same kind.
    pub fn next(&self) -> Self {
        Self(self.0 + 4)
    }
}

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "stream {}", self.0)
    }
}

impl From<VarInt> for StreamId {
    fn from(varint: VarInt) -> Self {
        Self(varint.into_inner())
    }
}

impl From<StreamId> for VarInt {
    fn from(sid: StreamId) -> Self {
        VarInt::from_u64(sid.0).expect("stream id is always less than 2^62")
    }
}

/// What [`StreamIdManager::on_max_streams_frame`] unlocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaxStreamsUpdate {
    /// The limit did not grow, or it grew but streams were already creatable.
    Unchanged,
    /// We were at the previous limit and the frame raised it: new outgoing
    /// streams can be created now.
    CanCreateNew,
}

const MAX_STREAMS_WINDOW_DIVISOR: u64 = 2;

/// Stream-count accounting for one direction (bidi or uni) of a connection.
///
/// The outgoing half tracks the peer-granted budget and hands out new
/// stream ids; the incoming half polices the peer against the limit we
/// advertised and decides when to advertise more. Frames to send are
/// returned to the caller rather than written through a session interface.
#[derive(Debug)]
pub struct StreamIdManager {
    role: Role,
    dir: Dir,

    outgoing_max_streams: u64,
    outgoing_stream_count: u64,
    next_outgoing: StreamId,
    using_default_max_streams: bool,

    incoming_actual_max_streams: u64,
    incoming_advertised_max_streams: u64,
    incoming_stream_count: u64,
    largest_peer_created: Option<StreamId>,
    available_streams: HashSet<StreamId>,
    max_streams_window: u64,
}

impl StreamIdManager {
    pub fn new(role: Role, dir: Dir, max_outgoing: u64, max_incoming: u64) -> Self {
        let mut manager = Self {
            role,
            dir,
            outgoing_max_streams: max_outgoing,
            outgoing_stream_count: 0,
            next_outgoing: StreamId::new(role, dir, 0),
            using_default_max_streams: true,
            incoming_actual_max_streams: max_incoming,
            // advertised starts at actual, it is communicated in the handshake
            incoming_advertised_max_streams: max_incoming,
            incoming_stream_count: 0,
            largest_peer_created: None,
            available_streams: HashSet::new(),
            max_streams_window: 0,
        };
        manager.calculate_max_streams_window();
        manager
    }

    fn calculate_max_streams_window(&mut self) {
        self.max_streams_window =
            (self.incoming_actual_max_streams / MAX_STREAMS_WINDOW_DIVISOR).max(1);
    }

    pub fn outgoing_max_streams(&self) -> u64 {
        self.outgoing_max_streams
    }

    pub fn outgoing_stream_count(&self) -> u64 {
        self.outgoing_stream_count
    }

    pub fn available_incoming_streams(&self) -> u64 {
        self.incoming_advertised_max_streams - self.incoming_stream_count
    }

    /// Whether another outgoing stream may be opened right now. When the
    /// budget is exhausted the peer must be told, so the frame to send is
    /// returned in the error position.
    pub fn can_open_next_outgoing(&self) -> Result<(), StreamsBlockedFrame> {
        if self.outgoing_stream_count < self.outgoing_max_streams {
            Ok(())
        } else {
            Err(StreamsBlockedFrame::new(
                self.dir,
                VarInt::from_u64(self.outgoing_max_streams)
                    .expect("stream count never exceeds 2^60"),
            ))
        }
    }

    /// Allocate the next outgoing stream id, or report STREAMS_BLOCKED.
    pub fn allocate_outgoing(&mut self) -> Result<StreamId, StreamsBlockedFrame> {
        self.can_open_next_outgoing()?;
        let id = self.next_outgoing;
        self.next_outgoing = id.next();
        self.outgoing_stream_count += 1;
        Ok(id)
    }

    /// Handle a MAX_STREAMS frame from the peer.
    pub fn on_max_streams_frame(
        &mut self,
        frame: &MaxStreamsFrame,
    ) -> Result<MaxStreamsUpdate, QuicError> {
        debug_assert_eq!(frame.dir(), self.dir);
        let frame_type = FrameType::MaxStreams(match self.dir {
            Dir::Bi => 0,
            Dir::Uni => 1,
        });
        let count = frame.max_streams();
        if count > MAX_STREAM_COUNT {
            return Err(QuicError::new(
                ErrorKind::StreamLimit,
                frame_type,
                "MAX_STREAMS frame exceeds the implementation stream count limit",
            ));
        }

        let current = self.outgoing_max_streams;
        if self.using_default_max_streams {
            // The first authoritative limit may shrink the handshake-time
            // estimate, but never below the streams already open.
            if count < self.outgoing_stream_count {
                return Err(QuicError::new(
                    ErrorKind::StreamLimit,
                    frame_type,
                    "stream limit less than existing stream count",
                ));
            }
            self.using_default_max_streams = false;
            self.outgoing_max_streams = count.min(MAX_STREAM_COUNT);
        } else if count > self.outgoing_max_streams {
            self.outgoing_max_streams = count.min(MAX_STREAM_COUNT);
        }

        if self.outgoing_stream_count == current && current < self.outgoing_max_streams {
            Ok(MaxStreamsUpdate::CanCreateNew)
        } else {
            Ok(MaxStreamsUpdate::Unchanged)
        }
    }

    /// Handle a STREAMS_BLOCKED frame from the peer. A peer blocked below
    /// our current limit is out of date and gets a MAX_STREAMS refresher,
    /// window or not; a peer claiming to be blocked above what we ever
    /// advertised is lying.
    pub fn on_streams_blocked_frame(
        &mut self,
        frame: &StreamsBlockedFrame,
    ) -> Result<Option<MaxStreamsFrame>, QuicError> {
        debug_assert_eq!(frame.dir(), self.dir);
        if frame.stream_limit() > self.incoming_advertised_max_streams {
            return Err(QuicError::new(
                ErrorKind::StreamLimit,
                FrameType::StreamsBlocked(match self.dir {
                    Dir::Bi => 0,
                    Dir::Uni => 1,
                }),
                "STREAMS_BLOCKED frame with invalid stream count",
            ));
        }
        if frame.stream_limit() < self.incoming_actual_max_streams {
            return Ok(Some(self.send_max_streams_frame()));
        }
        Ok(None)
    }

    fn send_max_streams_frame(&mut self) -> MaxStreamsFrame {
        self.incoming_advertised_max_streams = self.incoming_actual_max_streams;
        MaxStreamsFrame::new(
            self.dir,
            VarInt::from_u64(self.incoming_advertised_max_streams)
                .expect("stream count never exceeds 2^60"),
        )
    }

    /// Record the arrival of a peer-initiated stream id, registering every
    /// skipped id below it as available.
    pub fn on_incoming_stream(&mut self, stream_id: StreamId) -> Result<(), QuicError> {
        debug_assert_eq!(stream_id.dir(), self.dir);
        debug_assert_eq!(stream_id.role(), !self.role);
        self.available_streams.remove(&stream_id);

        if self
            .largest_peer_created
            .is_some_and(|largest| stream_id <= largest)
        {
            return Ok(());
        }

        let increment = match self.largest_peer_created {
            Some(largest) => stream_id.index() - largest.index(),
            None => stream_id.index() + 1,
        };
        if self.incoming_stream_count + increment > self.incoming_advertised_max_streams {
            return Err(QuicError::new(
                ErrorKind::StreamLimit,
                FrameType::Stream(0),
                format!(
                    "{stream_id} would exceed stream count limit {}",
                    self.incoming_advertised_max_streams
                ),
            ));
        }

        let mut id = match self.largest_peer_created {
            Some(largest) => largest.next(),
            None => StreamId::new(!self.role, self.dir, 0),
        };
        while id < stream_id {
            self.available_streams.insert(id);
            id = id.next();
        }
        self.incoming_stream_count += increment;
        self.largest_peer_created = Some(stream_id);
        Ok(())
    }

    /// One stream closed, another can be opened. Incoming streams grow the
    /// actual limit and possibly advertise it; outgoing closures need no
    /// bookkeeping here.
    pub fn on_stream_closed(&mut self, stream_id: StreamId) -> Option<MaxStreamsFrame> {
        debug_assert_eq!(stream_id.dir(), self.dir);
        if !self.is_incoming(stream_id) {
            return None;
        }
        if self.incoming_actual_max_streams == MAX_STREAM_COUNT {
            return None;
        }
        self.incoming_actual_max_streams += 1;
        self.maybe_send_max_streams_frame()
    }

    fn maybe_send_max_streams_frame(&mut self) -> Option<MaxStreamsFrame> {
        if self.incoming_advertised_max_streams - self.incoming_stream_count
            > self.max_streams_window
        {
            // plenty of advertised room left, no refresh needed yet
            return None;
        }
        Some(self.send_max_streams_frame())
    }

    pub fn is_incoming(&self, stream_id: StreamId) -> bool {
        stream_id.role() != self.role
    }

    /// Whether `stream_id` is available: neither open nor previously used.
    pub fn is_available(&self, stream_id: StreamId) -> bool {
        if !self.is_incoming(stream_id) {
            return stream_id >= self.next_outgoing;
        }
        match self.largest_peer_created {
            None => true,
            Some(largest) => stream_id > largest || self.available_streams.contains(&stream_id),
        }
    }
}

/// Parse a stream id from the input buffer,
/// [nom](https://docs.rs/nom/latest/nom/) parser style.
pub fn be_streamid(input: &[u8]) -> nom::IResult<&[u8], StreamId> {
    let (remain, varint) = crate::varint::be_varint(input)?;
    Ok((remain, StreamId::from(varint)))
}

/// A [`bytes::BufMut`] extension trait, makes buf writable for [`StreamId`].
pub trait WriteStreamId {
    fn put_streamid(&mut self, stream_id: &StreamId);
}

impl<T: bytes::BufMut> WriteStreamId for T {
    fn put_streamid(&mut self, stream_id: &StreamId) {
        use crate::varint::WriteVarInt;
        self.put_varint(&(*stream_id).into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> StreamIdManager {
        StreamIdManager::new(Role::Client, Dir::Bi, 10, 10)
    }

    #[test]
    fn test_stream_id_quadrants() {
        let id = StreamId::new(Role::Client, Dir::Bi, 3);
        assert_eq!(id.id(), 12);
        assert_eq!(id.role(), Role::Client);
        assert_eq!(id.dir(), Dir::Bi);
        assert_eq!(id.index(), 3);

        let id = StreamId::new(Role::Server, Dir::Uni, 0);
        assert_eq!(id.id(), 3);
        assert_eq!(id.next().id(), 7);
    }

    #[test]
    fn test_outgoing_limit_and_blocked() {
        let mut manager = manager();
        for i in 0..10 {
            let id = manager.allocate_outgoing().unwrap();
            assert_eq!(id.index(), i);
        }
        // the 11th must refuse and report STREAMS_BLOCKED(10)
        let blocked = manager.allocate_outgoing().unwrap_err();
        assert_eq!(blocked.stream_limit(), 10);

        // MAX_STREAMS(12) unlocks exactly two more
        let update = manager
            .on_max_streams_frame(&MaxStreamsFrame::new(Dir::Bi, VarInt::from_u32(12)))
            .unwrap();
        assert_eq!(update, MaxStreamsUpdate::CanCreateNew);
        assert!(manager.allocate_outgoing().is_ok());
        assert!(manager.allocate_outgoing().is_ok());
        assert!(manager.allocate_outgoing().is_err());
    }

    #[test]
    fn test_max_streams_never_shrinks_after_first() {
        let mut manager = manager();
        manager
            .on_max_streams_frame(&MaxStreamsFrame::new(Dir::Bi, VarInt::from_u32(20)))
            .unwrap();
        assert_eq!(manager.outgoing_max_streams(), 20);
        manager
            .on_max_streams_frame(&MaxStreamsFrame::new(Dir::Bi, VarInt::from_u32(5)))
            .unwrap();
        assert_eq!(manager.outgoing_max_streams(), 20);
    }

    #[test]
    fn test_max_streams_over_implementation_limit() {
        let mut manager = manager();
        let frame = MaxStreamsFrame::new(
            Dir::Bi,
            VarInt::from_u64(MAX_STREAM_COUNT + 1).unwrap(),
        );
        let error = manager.on_max_streams_frame(&frame).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::StreamLimit);
    }

    #[test]
    fn test_incoming_skipped_ids_become_available() {
        let mut manager = manager();
        // peer (server) opens its stream with index 3 first
        let id3 = StreamId::new(Role::Server, Dir::Bi, 3);
        manager.on_incoming_stream(id3).unwrap();
        for index in 0..3 {
            assert!(manager.is_available(StreamId::new(Role::Server, Dir::Bi, index)));
        }
        assert!(!manager.is_available(id3));
        assert!(manager.is_available(id3.next()));
    }

    #[test]
    fn test_incoming_over_advertised_limit() {
        let mut manager = manager();
        let id = StreamId::new(Role::Server, Dir::Bi, 10);
        let error = manager.on_incoming_stream(id).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::StreamLimit);
    }

    #[test]
    fn test_close_advertises_within_window() {
        let mut manager = StreamIdManager::new(Role::Client, Dir::Bi, 10, 4);
        // fill the incoming budget: window = 4 / 2 = 2
        for index in 0..4 {
            manager
                .on_incoming_stream(StreamId::new(Role::Server, Dir::Bi, index))
                .unwrap();
        }
        // advertised room is 0 <= window, so closing advertises the new max
        let frame = manager
            .on_stream_closed(StreamId::new(Role::Server, Dir::Bi, 0))
            .expect("should advertise");
        assert_eq!(frame.max_streams(), 5);
    }

    #[test]
    fn test_streams_blocked_below_actual_is_answered() {
        let mut manager = StreamIdManager::new(Role::Client, Dir::Bi, 10, 4);
        for index in 0..4 {
            manager
                .on_incoming_stream(StreamId::new(Role::Server, Dir::Bi, index))
                .unwrap();
        }
        manager.on_stream_closed(StreamId::new(Role::Server, Dir::Bi, 0));
        // actual is now 5; a peer blocked at 4 is out of date
        let answer = manager
            .on_streams_blocked_frame(&StreamsBlockedFrame::new(Dir::Bi, VarInt::from_u32(4)))
            .unwrap();
        assert!(answer.is_some());

        // blocked above anything we advertised is a protocol error
        let error = manager
            .on_streams_blocked_frame(&StreamsBlockedFrame::new(Dir::Bi, VarInt::from_u32(100)))
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::StreamLimit);
    }
}
