use qcore::sid::Role;

use crate::{H3Error, H3ErrorCode};

/// Enforces GOAWAY id monotonicity in both directions: the ids we send
/// must never grow, and the ids the peer sends us must never grow either.
///
/// See [RFC 9114 Section 5.2](https://www.rfc-editor.org/rfc/rfc9114.html#section-5.2).
#[derive(Debug, Default)]
pub struct GoawayManager {
    last_sent: Option<u64>,
    last_received: Option<u64>,
}

impl GoawayManager {
    /// Ask to send GOAWAY with `id`. An id not below what was already
    /// sent would retract a promise, so the attempt is dropped silently.
    pub fn maybe_send(&mut self, id: u64) -> Option<u64> {
        if self.last_sent.is_some_and(|last| id >= last) {
            tracing::debug!(id, "dropping GOAWAY that would raise the id");
            return None;
        }
        self.last_sent = Some(id);
        Some(id)
    }

    /// The peer sent GOAWAY with `id`; a growing id is a protocol error.
    pub fn on_goaway_received(&mut self, id: u64) -> Result<(), H3Error> {
        if self.last_received.is_some_and(|last| id > last) {
            return Err(H3Error::new(
                H3ErrorCode::IdError,
                "GOAWAY id is larger than a previously received one",
            ));
        }
        self.last_received = Some(id);
        Ok(())
    }

    pub fn sent_id(&self) -> Option<u64> {
        self.last_sent
    }

    pub fn received_id(&self) -> Option<u64> {
        self.last_received
    }

    /// Whether a peer-initiated stream id is still serviced after our
    /// GOAWAY.
    pub fn accepts_stream(&self, stream_id: u64) -> bool {
        self.last_sent.map_or(true, |last| stream_id < last)
    }
}

/// Enforces MAX_PUSH_ID direction and monotonicity. Push itself is not
/// supported, but the frame still has to be policed.
#[derive(Debug)]
pub struct PushIdManager {
    role: Role,
    max_push_id: Option<u64>,
}

impl PushIdManager {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            max_push_id: None,
        }
    }

    /// A MAX_PUSH_ID frame arrived; only a server may receive one, and
    /// the limit may only grow.
    pub fn on_max_push_id(&mut self, id: u64) -> Result<(), H3Error> {
        if self.role == Role::Client {
            return Err(H3Error::new(
                H3ErrorCode::FrameUnexpected,
                "MAX_PUSH_ID frame received by a client",
            ));
        }
        if self.max_push_id.is_some_and(|last| id < last) {
            return Err(H3Error::new(
                H3ErrorCode::IdError,
                "MAX_PUSH_ID reduces the push id limit",
            ));
        }
        self.max_push_id = Some(id);
        Ok(())
    }

    pub fn max_push_id(&self) -> Option<u64> {
        self.max_push_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_goaway_sender_never_raises() {
        let mut goaway = GoawayManager::default();
        assert_eq!(goaway.maybe_send(8), Some(8));
        // shrinking the horizon is allowed
        assert_eq!(goaway.maybe_send(4), Some(4));
        // raising it again is silently dropped
        assert_eq!(goaway.maybe_send(8), None);
        assert_eq!(goaway.maybe_send(4), None);
        assert_eq!(goaway.sent_id(), Some(4));
    }

    #[test]
    fn test_goaway_receiver_rejects_growth() {
        let mut goaway = GoawayManager::default();
        goaway.on_goaway_received(8).unwrap();
        goaway.on_goaway_received(4).unwrap();
        let error = goaway.on_goaway_received(8).unwrap_err();
        assert_eq!(error.code(), H3ErrorCode::IdError);
    }

    #[test]
    fn test_streams_beyond_goaway_refused() {
        let mut goaway = GoawayManager::default();
        assert!(goaway.accepts_stream(100));
        goaway.maybe_send(8);
        assert!(goaway.accepts_stream(4));
        assert!(!goaway.accepts_stream(8));
        assert!(!goaway.accepts_stream(12));
    }

    #[test]
    fn test_max_push_id_direction_and_monotonicity() {
        let mut push = PushIdManager::new(Role::Client);
        let error = push.on_max_push_id(4).unwrap_err();
        assert_eq!(error.code(), H3ErrorCode::FrameUnexpected);

        let mut push = PushIdManager::new(Role::Server);
        push.on_max_push_id(4).unwrap();
        push.on_max_push_id(4).unwrap();
        push.on_max_push_id(8).unwrap();
        let error = push.on_max_push_id(7).unwrap_err();
        assert_eq!(error.code(), H3ErrorCode::IdError);
    }
}
