//! Time sources for record stamping and the sync watermark.
//!
//! All timestamps are milliseconds since the Unix epoch. The engine stamps
//! `updatedAt` on every local apply through an injectable [`Clock`], so tests
//! and clients that prefer server time can substitute their own source.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
pub type Timestamp = u64;

/// Where the sync watermark starts: before any record ever observed.
pub const DOB: Timestamp = 0;

/// Injectable time source.
pub type Clock = Arc<dyn Fn() -> Timestamp + Send + Sync>;

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as Timestamp)
        .unwrap_or(DOB)
}

/// The default clock: wall time.
pub fn wall_clock() -> Clock {
    Arc::new(now)
}

/// A clock frozen at one instant. Intended for tests.
pub fn fixed(at: Timestamp) -> Clock {
    Arc::new(move || at)
}
