//! Cursor system for CDN cache collision prevention.
//!
//! The cursor system divides time into fixed intervals and returns cursor values
//! that change at interval boundaries. This prevents infinite cache loops when
//! multiple clients request the same data within the same time period.

use chrono::{DateTime, Utc};
use rand::Rng;

/// Options for cursor calculation.
#[derive(Debug, Clone)]
pub struct CursorOptions {
    /// Interval duration in seconds (default: 20)
    pub interval_seconds: u64,
    /// Epoch for interval calculation (default: Oct 9, 2024)
    pub epoch: DateTime<Utc>,
}

impl Default for CursorOptions {
    fn default() -> Self {
        Self {
            interval_seconds: 20,
            epoch: DateTime::parse_from_rfc3339("2024-10-09T00:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
        }
    }
}

/// Calculate the current cursor value based on time intervals.
///
/// The cursor is the number of intervals that have passed since the epoch.
pub fn calculate_cursor(options: &CursorOptions) -> u64 {
    let now = Utc::now();
    let elapsed = now
        .signed_duration_since(options.epoch)
        .num_seconds()
        .max(0) as u64;
    elapsed / options.interval_seconds
}

/// Generate a response cursor that is guaranteed to be monotonically increasing.
///
/// If the client provides a cursor that is >= the current interval, we add random
/// jitter to ensure the cursor advances. This prevents cache collisions while
/// maintaining monotonicity.
///
/// # Arguments
/// * `client_cursor` - The cursor value provided by the client (if any)
/// * `options` - Cursor calculation options
///
/// # Returns
/// A cursor value that is guaranteed to be >= client_cursor
pub fn generate_response_cursor(client_cursor: Option<u64>, options: &CursorOptions) -> u64 {
    let current_interval = calculate_cursor(options);

    match client_cursor {
        Some(cursor) if cursor >= current_interval => {
            // Client cursor is at or ahead of current interval
            // Add random jitter (0-3600 seconds worth of intervals, exclusive upper bound)
            let mut rng = rand::thread_rng();
            let jitter_seconds: u64 = rng.gen_range(0..3600);
            let jitter_intervals = jitter_seconds / options.interval_seconds;
            cursor + jitter_intervals.max(1)
        }
        Some(cursor) => {
            // Client cursor is behind, return current interval
            current_interval.max(cursor)
        }
        None => {
            // No client cursor, return current interval
            current_interval
        }
    }
}

/// Parse a cursor string into a u64.
pub fn parse_cursor(cursor: &str) -> Option<u64> {
    cursor.parse().ok()
}

/// Format a cursor value as a string.
pub fn format_cursor(cursor: u64) -> String {
    cursor.to_string()
}
