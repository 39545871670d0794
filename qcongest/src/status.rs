use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

/// Handshake progress flags the retransmission machinery keys off:
/// whether handshake keys exist, whether the peer confirmed the
/// handshake, and which side we are.
#[derive(Debug)]
pub struct HandshakeStatus {
    is_server: AtomicBool,
    has_handshake_key: AtomicBool,
    has_received_handshake_ack: AtomicBool,
    is_handshake_confirmed: AtomicBool,
}

impl HandshakeStatus {
    pub fn new(is_server: bool) -> Self {
        Self {
            is_server: AtomicBool::new(is_server),
            has_handshake_key: AtomicBool::new(false),
            has_received_handshake_ack: AtomicBool::new(false),
            is_handshake_confirmed: AtomicBool::new(false),
        }
    }

    pub fn got_handshake_key(&self) {
        self.has_handshake_key.store(true, Ordering::Relaxed);
    }

    pub fn received_handshake_ack(&self) {
        self.has_received_handshake_ack
            .store(true, Ordering::Relaxed);
    }

    pub fn handshake_confirmed(&self) {
        self.is_handshake_confirmed.store(true, Ordering::Relaxed);
    }

    pub fn is_server(&self) -> bool {
        self.is_server.load(Ordering::Relaxed)
    }

    pub fn has_handshake_key(&self) -> bool {
        self.has_handshake_key.load(Ordering::Relaxed)
    }

    pub fn has_received_handshake_ack(&self) -> bool {
        self.has_received_handshake_ack.load(Ordering::Relaxed)
    }

    pub fn is_handshake_confirmed(&self) -> bool {
        self.is_handshake_confirmed.load(Ordering::Relaxed)
    }

    /// Whether the peer is known to have validated our address: a server
    /// always has, a client once handshake keys or confirmation exist.
    pub fn peer_completed_address_validation(&self) -> bool {
        self.is_server()
            || self.has_received_handshake_ack()
            || self.is_handshake_confirmed()
    }
}

/// Per-path limits the sender consults before arming timers: the
/// anti-amplification gate of an unvalidated path.
#[derive(Clone)]
pub struct PathStatus {
    handshake: Arc<HandshakeStatus>,
    is_at_anti_amplification_limit: Arc<AtomicBool>,
}

impl PathStatus {
    pub fn new(handshake: Arc<HandshakeStatus>) -> Self {
        Self {
            handshake,
            is_at_anti_amplification_limit: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn handshake(&self) -> &HandshakeStatus {
        &self.handshake
    }

    pub fn is_at_anti_amplification_limit(&self) -> bool {
        self.is_at_anti_amplification_limit.load(Ordering::Relaxed)
    }

    pub fn release_anti_amplification_limit(&self) {
        self.is_at_anti_amplification_limit
            .store(false, Ordering::Release);
    }

    pub fn enter_anti_amplification_limit(&self) {
        self.is_at_anti_amplification_limit
            .store(true, Ordering::Release);
    }
}
