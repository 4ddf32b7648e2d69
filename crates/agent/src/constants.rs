//! Wire-visible constants (§6). Implementations must match these values to interoperate.
use crate::time::LocalDuration;

pub const HANDSHAKE_TIMEOUT: LocalDuration = LocalDuration::from_millis(4_000);
pub const PING_TIMEOUT: LocalDuration = LocalDuration::from_millis(10_000);
pub const CONNECTIVITY_CHECK_INTERVAL: LocalDuration = LocalDuration::from_millis(60_000);
pub const ANNOUNCE_ADDR_INTERVAL: LocalDuration = LocalDuration::from_millis(300_000);
pub const RELAY_THROTTLE: LocalDuration = LocalDuration::from_millis(120_000);
pub const VERSION_ATTEMPTS_MAX: u32 = 10;
pub const VERSION_RETRY_DELAY: LocalDuration = LocalDuration::from_millis(500);
pub const ADDR_RATE_LIMIT: u32 = 2_000;
pub const ADDR_QUEUE_INTERVAL: LocalDuration = LocalDuration::from_millis(5_000);
pub const MAX_ADDR_PER_MESSAGE: usize = 1_000;
pub const MAX_ADDR_RELAY_PER_MESSAGE: usize = 10;

/// The protocol version this implementation speaks. Versions below this are rejected as
/// incompatible.
pub const PROTOCOL_VERSION: u32 = 1;

/// The reject code sent alongside `INCOMPATIBLE_VERSION` closes.
pub const REJECT_OBSOLETE: &str = "REJECT_OBSOLETE";
