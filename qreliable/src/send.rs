mod sndbuf;

pub use sndbuf::{SendBuf, SendBufError, MAX_DATA_SLICE_SIZE};
