//! The reliable-delivery half of the transport: per-space journals of sent
//! packets, the stream send buffer, the out-of-order receive buffer and
//! the per-stream state machines built on top of them.

/// Journals of sent packets and the frames they carried.
pub mod journal;
/// Receive buffer and the final-size-aware sequencer.
pub mod recv;
/// The stream send buffer.
pub mod send;
/// Per-stream send/receive state machines.
pub mod streams;
