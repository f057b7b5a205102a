//! Shared constants for end-to-end tests

// ============================================================================
// Library Records
// ============================================================================

/// Titles of the records every test library starts with
pub const RECORD_TITLES: [&str; 3] = [
    "Berserk Volume 01",
    "Vagabond Volume 02",
    "Planetes Omnibus",
];

/// A record id that never exists in the test library
pub const MISSING_RECORD_ID: i64 = 9_999;

// ============================================================================
// Timing
// ============================================================================

/// Upper bound for background work to settle in a test
pub const SETTLE_TIMEOUT_MS: u64 = 10_000;

/// Poll interval while waiting for background work
pub const POLL_INTERVAL_MS: u64 = 20;
