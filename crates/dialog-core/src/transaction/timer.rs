//! RFC 3261 transaction timers.
//!
//! | Timer | Transaction      | Purpose                          |
//! |-------|------------------|----------------------------------|
//! | A     | INVITE client    | request retransmission (UDP)     |
//! | B     | INVITE client    | transaction timeout (64·T1)      |
//! | D     | INVITE client    | linger in Completed (UDP)        |
//! | M     | INVITE client    | linger in Accepted (RFC 6026)    |
//! | E     | non-INVITE client| request retransmission (UDP)     |
//! | F     | non-INVITE client| transaction timeout (64·T1)      |
//! | K     | non-INVITE client| linger in Completed (UDP)        |
//! | G     | INVITE server    | response retransmission (UDP)    |
//! | H     | INVITE server    | wait for ACK (64·T1)             |
//! | I     | INVITE server    | linger in Confirmed (UDP)        |
//! | J     | non-INVITE server| linger in Completed (UDP)        |
//! | L     | INVITE server    | linger in Accepted (RFC 6026)    |

use std::fmt;
use std::time::Duration;

/// Which transaction timer fired
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// INVITE client retransmit
    A,
    /// INVITE client timeout
    B,
    /// INVITE client Completed linger
    D,
    /// non-INVITE client retransmit
    E,
    /// non-INVITE client timeout
    F,
    /// non-INVITE client Completed linger
    K,
    /// INVITE server response retransmit
    G,
    /// INVITE server ACK timeout
    H,
    /// INVITE server Confirmed linger
    I,
    /// non-INVITE server Completed linger
    J,
    /// INVITE server Accepted linger
    L,
    /// INVITE client Accepted linger
    M,
}

impl fmt::Display for TimerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Timer base durations.
///
/// Defaults follow RFC 3261 §17; tests shrink them to keep suites fast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerSettings {
    /// RTT estimate; initial retransmission interval (500 ms)
    pub t1: Duration,
    /// Retransmission interval cap (4 s)
    pub t2: Duration,
    /// Maximum lifetime of a message in the network (5 s)
    pub t4: Duration,
    /// Completed-state linger for the INVITE client on unreliable
    /// transports (at least 32 s)
    pub timer_d: Duration,
}

impl Default for TimerSettings {
    fn default() -> Self {
        TimerSettings {
            t1: Duration::from_millis(500),
            t2: Duration::from_secs(4),
            t4: Duration::from_secs(5),
            timer_d: Duration::from_secs(32),
        }
    }
}

impl TimerSettings {
    /// Shrunk timers for tests: T1 = 20 ms
    pub fn fast() -> Self {
        TimerSettings {
            t1: Duration::from_millis(20),
            t2: Duration::from_millis(80),
            t4: Duration::from_millis(100),
            timer_d: Duration::from_millis(200),
        }
    }

    /// Transaction timeout (Timers B, F, H, L, M): 64·T1
    pub fn transaction_timeout(&self) -> Duration {
        self.t1 * 64
    }

    /// Next retransmission interval: doubles, capped at T2
    pub fn next_retransmit(&self, current: Duration) -> Duration {
        (current * 2).min(self.t2)
    }
}
