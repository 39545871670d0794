mod rcvbuf;
mod sequencer;

pub use rcvbuf::RecvBuf;
pub use sequencer::{Delivery, Sequencer, SequencerEvent};
