mod aggregate;
mod recver;
mod sender;
mod stream;

pub use aggregate::{AckAggregator, AckedRun};
pub use recver::RecvingStream;
pub use sender::{SendError, SendState, SendingStream, StreamWriteOutcome};
pub use stream::{Stream, StreamError, StreamType};
