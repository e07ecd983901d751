use chrono::NaiveDate;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

/// Shape checks that need no stored state: ordering, horizon, past dates.
pub(crate) fn validate_stay(
    check_in: NaiveDate,
    checkout: NaiveDate,
    today: NaiveDate,
) -> Result<Stay, EngineError> {
    if check_in >= checkout {
        return Err(EngineError::InvalidStayLength {
            nights: (checkout - check_in).num_days(),
            bounds: None,
        });
    }
    if check_in < today {
        return Err(EngineError::InvalidInput(format!(
            "check-in {check_in} is in the past"
        )));
    }
    if (check_in - today).num_days() > MAX_BOOKING_HORIZON_DAYS {
        return Err(EngineError::LimitExceeded("check-in beyond booking horizon"));
    }
    let stay = Stay::new(check_in, checkout);
    if stay.nights() > i64::from(MAX_STAY_DAYS) {
        return Err(EngineError::InvalidStayLength {
            nights: stay.nights(),
            bounds: None,
        });
    }
    Ok(stay)
}

pub(crate) fn validate_window(from: NaiveDate, to: NaiveDate) -> Result<(), EngineError> {
    if from > to {
        return Err(EngineError::InvalidRange { start: from, end: to });
    }
    if (to - from).num_days() >= MAX_QUERY_WINDOW_DAYS {
        return Err(EngineError::LimitExceeded("query window too wide"));
    }
    Ok(())
}

/// Listing must accept the stay's length, then be published. Length is checked first.
pub(crate) fn check_listing_accepts(listing: &Listing, stay: &Stay) -> Result<(), EngineError> {
    if !listing.accepts_nights(stay.nights()) {
        return Err(EngineError::InvalidStayLength {
            nights: stay.nights(),
            bounds: Some((listing.min_stay_days, listing.max_stay_days)),
        });
    }
    if listing.status != ListingStatus::Published {
        return Err(EngineError::ListingUnavailable {
            id: listing.id,
            status: Some(listing.status),
        });
    }
    Ok(())
}

/// Calendar records covering the stay's nights, failing on the first blocked date.
pub(crate) fn check_calendar_open(
    ls: &ListingState,
    stay: &Stay,
) -> Result<Vec<Availability>, EngineError> {
    let mut entries = Vec::new();
    for entry in ls.calendar_range(stay.check_in, stay.last_night()) {
        if !entry.is_available {
            return Err(EngineError::DateBlocked {
                listing_id: ls.listing.id,
                date: entry.date,
            });
        }
        entries.push(entry.clone());
    }
    Ok(entries)
}

pub(crate) fn check_no_overlap(ls: &ListingState, stay: &Stay) -> Result<(), EngineError> {
    match ls.overlapping_active(stay).next() {
        Some(existing) => Err(EngineError::Overlap(existing.id)),
        None => Ok(()),
    }
}
