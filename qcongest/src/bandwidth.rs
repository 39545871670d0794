use std::{fmt, time::Duration};

/// Bandwidth as bits per second, exact to the microsecond in transfer
/// arithmetic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Bandwidth {
    bits_per_second: u64,
}

impl Bandwidth {
    pub const ZERO: Self = Self { bits_per_second: 0 };

    pub const fn from_bits_per_second(bits_per_second: u64) -> Self {
        Self { bits_per_second }
    }

    pub const fn from_kbits_per_second(k_bits_per_second: u64) -> Self {
        Self {
            bits_per_second: k_bits_per_second * 1000,
        }
    }

    pub const fn from_bytes_per_second(bytes_per_second: u64) -> Self {
        Self {
            bits_per_second: bytes_per_second * 8,
        }
    }

    /// The practical stand-in for an unbounded rate.
    pub const fn infinite() -> Self {
        Self {
            bits_per_second: u64::MAX,
        }
    }

    /// The rate that moves `bytes` in `delta`.
    pub fn from_bytes_and_time_delta(bytes: u64, delta: Duration) -> Self {
        if delta.is_zero() {
            return Self::infinite();
        }
        let micros = delta.as_micros() as u64;
        Self {
            bits_per_second: bytes
                .saturating_mul(8)
                .saturating_mul(1_000_000)
                / micros,
        }
    }

    pub const fn to_bits_per_second(self) -> u64 {
        self.bits_per_second
    }

    pub const fn to_bytes_per_second(self) -> u64 {
        self.bits_per_second / 8
    }

    pub const fn is_zero(self) -> bool {
        self.bits_per_second == 0
    }

    /// How long moving `bytes` at this rate takes, to microsecond
    /// precision. Zero bandwidth transfers nothing: the result saturates.
    pub fn transfer_time(self, bytes: u64) -> Duration {
        if self.bits_per_second == 0 {
            return Duration::MAX;
        }
        if self.bits_per_second == u64::MAX {
            return Duration::ZERO;
        }
        Duration::from_micros(
            bytes
                .saturating_mul(8)
                .saturating_mul(1_000_000)
                / self.bits_per_second,
        )
    }

    /// How many bytes this rate moves in `period`.
    pub fn bytes_per_period(self, period: Duration) -> u64 {
        self.bits_per_second
            .saturating_mul(period.as_micros() as u64)
            / 8
            / 1_000_000
    }

    /// Scale the rate by a float gain.
    pub fn scale(self, gain: f64) -> Self {
        Self {
            bits_per_second: (self.bits_per_second as f64 * gain) as u64,
        }
    }
}

impl fmt::Display for Bandwidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.bits_per_second {
            bits if bits >= 1_000_000_000 => write!(f, "{:.2} Gbit/s", bits as f64 / 1e9),
            bits if bits >= 1_000_000 => write!(f, "{:.2} Mbit/s", bits as f64 / 1e6),
            bits if bits >= 1_000 => write!(f, "{:.2} kbit/s", bits as f64 / 1e3),
            bits => write!(f, "{bits} bit/s"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_bytes_and_time_delta() {
        // 1000 bytes over 10ms = 800 kbit/s
        let bandwidth =
            Bandwidth::from_bytes_and_time_delta(1000, Duration::from_millis(10));
        assert_eq!(bandwidth.to_bits_per_second(), 800_000);
        assert_eq!(
            Bandwidth::from_bytes_and_time_delta(1000, Duration::ZERO),
            Bandwidth::infinite()
        );
    }

    #[test]
    fn test_transfer_time_is_microsecond_exact() {
        // 1 packet per millisecond
        let rate = Bandwidth::from_bytes_per_second(1460 * 1000);
        assert_eq!(rate.transfer_time(1460), Duration::from_millis(1));
        assert_eq!(rate.transfer_time(146), Duration::from_micros(100));
        assert_eq!(Bandwidth::ZERO.transfer_time(1), Duration::MAX);
    }

    #[test]
    fn test_bytes_per_period() {
        let rate = Bandwidth::from_bytes_per_second(10_000);
        assert_eq!(rate.bytes_per_period(Duration::from_secs(1)), 10_000);
        assert_eq!(rate.bytes_per_period(Duration::from_millis(1)), 10);
    }

    #[test]
    fn test_display() {
        assert_eq!(
            Bandwidth::from_kbits_per_second(1200).to_string(),
            "1.20 Mbit/s"
        );
    }
}
