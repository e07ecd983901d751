//! Hard caps on input sizes. Anything past these is `LimitExceeded`.

pub const MAX_LISTINGS: usize = 1_000_000;
pub const MAX_USERS: usize = 10_000_000;
pub const MAX_ACTIVE_BOOKINGS_PER_LISTING: usize = 100_000;

pub const MAX_TITLE_LEN: usize = 200;
pub const MAX_DESCRIPTION_LEN: usize = 10_000;
pub const MAX_EMAIL_LEN: usize = 254;
pub const MAX_PHONE_LEN: usize = 32;
pub const MAX_ADDRESS_FIELD_LEN: usize = 200;
pub const MAX_IMAGES_PER_LISTING: usize = 50;

/// Longest stay a listing may allow.
pub const MAX_STAY_DAYS: u32 = 365;

/// How far ahead of today a check-in may be requested.
pub const MAX_BOOKING_HORIZON_DAYS: i64 = 730;

/// Widest inclusive date range accepted by calendar lookups and quotes.
pub const MAX_QUERY_WINDOW_DAYS: i64 = 1_096;

pub const MAX_CALENDAR_BATCH: usize = 1_096;

pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const MAX_PAGE_SIZE: usize = 100;

/// Clamp a caller-supplied page size: zero means default.
pub fn page_size(limit: usize) -> usize {
    match limit {
        0 => DEFAULT_PAGE_SIZE,
        n => n.min(MAX_PAGE_SIZE),
    }
}
