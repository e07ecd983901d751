use std::collections::HashMap;

use chrono::NaiveDate;

use crate::model::*;

use super::EngineError;

/// Effective price of every night in `[start, end)`, ascending.
///
/// An override applies when `overrides` holds a record for the date with a price set;
/// otherwise the listing's base price per day is used. Records for dates outside the
/// range are ignored.
pub fn price_breakdown(
    listing: &Listing,
    start: NaiveDate,
    end: NaiveDate,
    overrides: &[Availability],
) -> Result<Vec<(NaiveDate, Cents)>, EngineError> {
    if end <= start {
        return Err(EngineError::InvalidRange { start, end });
    }
    let by_date: HashMap<NaiveDate, Cents> = overrides
        .iter()
        .filter_map(|a| a.price_override.map(|p| (a.date, p)))
        .collect();

    Ok(Stay::new(start, end)
        .night_dates()
        .map(|d| (d, by_date.get(&d).copied().unwrap_or(listing.price_per_day)))
        .collect())
}

/// Total price of a stay: the sum of each night's effective price.
pub fn compute_price(
    listing: &Listing,
    start: NaiveDate,
    end: NaiveDate,
    overrides: &[Availability],
) -> Result<Cents, EngineError> {
    price_breakdown(listing, start, end, overrides)?
        .into_iter()
        .try_fold(0 as Cents, |acc, (_, price)| acc.checked_add(price))
        .ok_or(EngineError::Overflow)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::*;
    use ulid::Ulid;

    fn price_override(listing_id: Ulid, date: NaiveDate, price: Option<Cents>) -> Availability {
        Availability {
            id: Ulid::new(),
            listing_id,
            date,
            is_available: true,
            price_override: price,
        }
    }

    #[test]
    fn base_price_only() {
        let l = listing(10_000, 2, 14);
        let total = compute_price(&l, date(2030, 1, 10), date(2030, 1, 12), &[]).unwrap();
        assert_eq!(total, 20_000);
    }

    #[test]
    fn override_takes_precedence_on_its_date() {
        let l = listing(10_000, 1, 14);
        let overrides = vec![price_override(l.id, date(2030, 1, 11), Some(15_000))];
        let total = compute_price(&l, date(2030, 1, 10), date(2030, 1, 13), &overrides).unwrap();
        assert_eq!(total, 10_000 + 15_000 + 10_000);
    }

    #[test]
    fn record_without_price_uses_base() {
        let l = listing(10_000, 1, 14);
        let overrides = vec![price_override(l.id, date(2030, 1, 10), None)];
        let total = compute_price(&l, date(2030, 1, 10), date(2030, 1, 11), &overrides).unwrap();
        assert_eq!(total, 10_000);
    }

    #[test]
    fn checkout_date_override_not_charged() {
        let l = listing(10_000, 1, 14);
        let overrides = vec![price_override(l.id, date(2030, 1, 12), Some(1))];
        let total = compute_price(&l, date(2030, 1, 10), date(2030, 1, 12), &overrides).unwrap();
        assert_eq!(total, 20_000);
    }

    #[test]
    fn zero_override_makes_night_free() {
        let l = listing(10_000, 1, 14);
        let overrides = vec![price_override(l.id, date(2030, 1, 10), Some(0))];
        let total = compute_price(&l, date(2030, 1, 10), date(2030, 1, 12), &overrides).unwrap();
        assert_eq!(total, 10_000);
    }

    #[test]
    fn empty_or_inverted_range_rejected() {
        let l = listing(10_000, 1, 14);
        let d = date(2030, 1, 10);
        assert!(matches!(
            compute_price(&l, d, d, &[]),
            Err(EngineError::InvalidRange { .. })
        ));
        assert!(matches!(
            compute_price(&l, date(2030, 1, 12), d, &[]),
            Err(EngineError::InvalidRange { .. })
        ));
    }

    #[test]
    fn overflow_is_reported() {
        let l = listing(i64::MAX / 2 + 1, 1, 14);
        let result = compute_price(&l, date(2030, 1, 10), date(2030, 1, 12), &[]);
        assert!(matches!(result, Err(EngineError::Overflow)));
    }

    #[test]
    fn same_inputs_same_price() {
        let l = listing(12_345, 1, 30);
        let overrides = vec![
            price_override(l.id, date(2030, 5, 3), Some(99)),
            price_override(l.id, date(2030, 5, 7), Some(20_000)),
        ];
        let a = compute_price(&l, date(2030, 5, 1), date(2030, 5, 10), &overrides).unwrap();
        let b = compute_price(&l, date(2030, 5, 1), date(2030, 5, 10), &overrides).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, 12_345 * 7 + 99 + 20_000);
    }

    #[test]
    fn breakdown_lists_every_night() {
        let l = listing(500, 1, 30);
        let overrides = vec![price_override(l.id, date(2030, 2, 2), Some(700))];
        let nights = price_breakdown(&l, date(2030, 2, 1), date(2030, 2, 4), &overrides).unwrap();
        assert_eq!(
            nights,
            vec![(date(2030, 2, 1), 500), (date(2030, 2, 2), 700), (date(2030, 2, 3), 500)]
        );
    }
}
