use chrono::NaiveDate;
use thiserror::Error;
use ulid::Ulid;

use crate::model::{BookingStatus, ListingStatus, Role};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// `bounds` is `(min, max)` when the listing was known at the time of the check.
    #[error("invalid stay length: {nights} night(s){}", fmt_bounds(.bounds))]
    InvalidStayLength {
        nights: i64,
        bounds: Option<(u32, u32)>,
    },

    #[error("invalid date range [{start}, {end})")]
    InvalidRange { start: NaiveDate, end: NaiveDate },

    #[error("listing {id} is not bookable{}", fmt_listing_status(.status))]
    ListingUnavailable {
        id: Ulid,
        status: Option<ListingStatus>,
    },

    #[error("date {date} is blocked on listing {listing_id}")]
    DateBlocked { listing_id: Ulid, date: NaiveDate },

    #[error("overlaps active booking {0}")]
    Overlap(Ulid),

    #[error("invalid booking transition from {from} to {to}")]
    InvalidTransition { from: BookingStatus, to: BookingStatus },

    #[error("invalid listing transition from {from} to {to}")]
    InvalidListingTransition { from: ListingStatus, to: ListingStatus },

    #[error("invalid role transition from {from} to {to}")]
    InvalidRoleTransition { from: Role, to: Role },

    #[error("booking {id} can no longer be cancelled: check-in was {check_in}")]
    TooLateToCancel { id: Ulid, check_in: NaiveDate },

    #[error("booking {id} cannot complete before checkout {checkout}")]
    PrematureCompletion { id: Ulid, checkout: NaiveDate },

    #[error("not found: {0}")]
    NotFound(Ulid),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("unauthorized: {0}")]
    Unauthorized(&'static str),

    #[error("price overflow")]
    Overflow,

    #[error("operation cancelled")]
    Cancelled,

    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),

    #[error("storage error during {op} on {id}: {message}")]
    Storage {
        op: &'static str,
        id: Ulid,
        message: String,
    },
}

fn fmt_bounds(bounds: &Option<(u32, u32)>) -> String {
    match bounds {
        Some((min, max)) => format!(", allowed {min}..={max}"),
        None => String::new(),
    }
}

fn fmt_listing_status(status: &Option<ListingStatus>) -> String {
    match status {
        Some(s) => format!(" (status {s})"),
        None => " (no such listing)".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_entity() {
        let id = Ulid::new();
        assert_eq!(EngineError::Overlap(id).to_string(), format!("overlaps active booking {id}"));
        let e = EngineError::InvalidStayLength {
            nights: 1,
            bounds: Some((2, 14)),
        };
        assert_eq!(e.to_string(), "invalid stay length: 1 night(s), allowed 2..=14");
        let e = EngineError::ListingUnavailable { id, status: None };
        assert!(e.to_string().ends_with("(no such listing)"));
    }
}
