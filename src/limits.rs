use crate::model::Ms;

pub const MAX_NAME_LEN: usize = 255;
pub const MAX_EMAIL_LEN: usize = 512;
pub const MAX_DESCRIPTION_LEN: usize = 4096;

/// 1970-01-01. Bookings before the epoch are rejected.
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
/// 2200-01-01.
pub const MAX_VALID_TIMESTAMP_MS: Ms = 7_258_118_400_000;
/// One year.
pub const MAX_SPAN_DURATION_MS: Ms = 366 * 24 * 3_600_000;

/// Upper bound on a single bounded page.
pub const MAX_PAGE_SIZE: i64 = 10_000;
