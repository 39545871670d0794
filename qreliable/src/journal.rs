mod sent;

pub use sent::{AckError, ArcSentJournal, NewPacketGuard, PacketAck, PacketLoss, SentRotateGuard};
