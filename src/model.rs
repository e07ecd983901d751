use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Money in minor currency units (cents).
pub type Cents = i64;

/// Half-open stay `[check_in, checkout)`. Every date in the range is one night.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Stay {
    pub check_in: NaiveDate,
    pub checkout: NaiveDate,
}

impl Stay {
    pub fn new(check_in: NaiveDate, checkout: NaiveDate) -> Self {
        debug_assert!(check_in < checkout, "Stay check-in must be before checkout");
        Self { check_in, checkout }
    }

    pub fn nights(&self) -> i64 {
        (self.checkout - self.check_in).num_days()
    }

    pub fn overlaps(&self, other: &Stay) -> bool {
        self.check_in < other.checkout && other.check_in < self.checkout
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.check_in <= date && date < self.checkout
    }

    /// Inclusive upper bound for calendar lookups: the night before checkout.
    pub fn last_night(&self) -> NaiveDate {
        self.checkout.pred_opt().unwrap_or(self.check_in)
    }

    /// Each night of the stay, ascending.
    pub fn night_dates(&self) -> impl Iterator<Item = NaiveDate> {
        let checkout = self.checkout;
        self.check_in.iter_days().take_while(move |d| *d < checkout)
    }
}

// ── Users ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Guest,
    Host,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Guest => "guest",
            Role::Host => "host",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Ulid,
    pub email: String,
    pub phone: Option<String>,
    pub role: Role,
    pub banned: bool,
    pub created_at: DateTime<Utc>,
}

/// The caller on whose behalf an operation runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ActingUser {
    pub id: Ulid,
    pub role: Role,
}

impl ActingUser {
    pub fn new(id: Ulid, role: Role) -> Self {
        Self { id, role }
    }

    /// Background work (sweeper, bootstrap). Carries admin rights and the nil id.
    pub fn system() -> Self {
        Self {
            id: Ulid::nil(),
            role: Role::Admin,
        }
    }

    pub fn is_system(&self) -> bool {
        self.id.is_nil() && self.role == Role::Admin
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

// ── Listings ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ListingStatus {
    Draft,
    Published,
    Blocked,
    Deleted,
}

impl ListingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListingStatus::Draft => "draft",
            ListingStatus::Published => "published",
            ListingStatus::Blocked => "blocked",
            ListingStatus::Deleted => "deleted",
        }
    }
}

impl fmt::Display for ListingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Address {
    pub country: String,
    pub city: String,
    pub street: String,
    pub house: String,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    pub id: Ulid,
    pub host_id: Ulid,
    pub title: String,
    pub description: String,
    pub price_per_day: Cents,
    pub min_stay_days: u32,
    pub max_stay_days: u32,
    pub status: ListingStatus,
    pub address: Address,
    pub image_ids: Vec<Ulid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Listing {
    pub fn accepts_nights(&self, nights: i64) -> bool {
        nights >= i64::from(self.min_stay_days) && nights <= i64::from(self.max_stay_days)
    }
}

/// Per-date calendar entry. Occupancy is never stored here; it comes from bookings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Availability {
    pub id: Ulid,
    pub listing_id: Ulid,
    pub date: NaiveDate,
    pub is_available: bool,
    /// Replaces the listing's base price for this date only.
    pub price_override: Option<Cents>,
}

// ── Bookings ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingStatus {
    Created,
    Confirmed,
    Cancelled,
    Completed,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Created => "created",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Completed => "completed",
        }
    }

    /// Active bookings hold their nights against new admissions.
    pub fn is_active(&self) -> bool {
        matches!(self, BookingStatus::Created | BookingStatus::Confirmed)
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub user_id: Ulid,
    pub listing_id: Ulid,
    pub stay: Stay,
    pub status: BookingStatus,
    pub total_price: Cents,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    pub fn check_in(&self) -> NaiveDate {
        self.stay.check_in
    }

    pub fn checkout(&self) -> NaiveDate {
        self.stay.checkout
    }
}

// ── Per-listing state ────────────────────────────────────────────

/// Everything guarded by one listing lock: the listing, its calendar and its bookings.
#[derive(Debug, Clone)]
pub struct ListingState {
    pub listing: Listing,
    /// Keyed by date, so there is at most one record per (listing, date).
    pub calendar: BTreeMap<NaiveDate, Availability>,
    /// Every booking ever made on the listing, sorted by check-in.
    pub bookings: Vec<Booking>,
}

impl ListingState {
    pub fn new(listing: Listing) -> Self {
        Self {
            listing,
            calendar: BTreeMap::new(),
            bookings: Vec::new(),
        }
    }

    /// Insert booking maintaining sort order by check-in.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .partition_point(|b| b.stay.check_in <= booking.stay.check_in);
        self.bookings.insert(pos, booking);
    }

    pub fn booking(&self, id: &Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == *id)
    }

    pub fn booking_mut(&mut self, id: &Ulid) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == *id)
    }

    /// Bookings still holding their nights. Cancelled and completed history is not counted.
    pub fn active_booking_count(&self) -> usize {
        self.bookings.iter().filter(|b| b.status.is_active()).count()
    }

    /// Active bookings whose stay intersects `stay` under half-open comparison.
    /// Bookings starting at or after `stay.checkout` are skipped by binary search.
    pub fn overlapping_active(&self, stay: &Stay) -> impl Iterator<Item = &Booking> {
        let right_bound = self
            .bookings
            .partition_point(|b| b.stay.check_in < stay.checkout);
        let check_in = stay.check_in;
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.status.is_active() && b.stay.checkout > check_in)
    }

    /// Calendar entries with `from <= date <= to`, ascending. Empty when `from > to`.
    pub fn calendar_range(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> impl Iterator<Item = &Availability> {
        let range = if from <= to { Some(self.calendar.range(from..=to)) } else { None };
        range.into_iter().flatten().map(|(_, a)| a)
    }

    /// Replace whatever record exists for the entry's date.
    pub fn upsert_availability(&mut self, entry: Availability) {
        self.calendar.insert(entry.date, entry);
    }

    pub fn remove_availability(&mut self, date: &NaiveDate) -> Option<Availability> {
        self.calendar.remove(date)
    }
}

/// What a stay would cost if booked now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quote {
    pub listing_id: Ulid,
    pub stay: Stay,
    /// Effective price of each night, ascending.
    pub nights: Vec<(NaiveDate, Cents)>,
    pub total: Cents,
}

/// One page of a paginated lookup plus the unpaginated total.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
}

// ── Log records ──────────────────────────────────────────────────

/// Every committed state change. This is the write-ahead log record format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    UserRegistered {
        user: User,
    },
    UserUpdated {
        id: Ulid,
        email: String,
        phone: Option<String>,
    },
    UserRoleChanged {
        id: Ulid,
        role: Role,
    },
    UserBanned {
        id: Ulid,
        banned: bool,
    },
    ListingCreated {
        listing: Listing,
    },
    ListingUpdated {
        listing: Listing,
    },
    ListingStatusChanged {
        id: Ulid,
        status: ListingStatus,
        at: DateTime<Utc>,
    },
    CalendarUpserted {
        listing_id: Ulid,
        entries: Vec<Availability>,
    },
    CalendarEntryRemoved {
        id: Ulid,
        listing_id: Ulid,
        date: NaiveDate,
    },
    BookingCreated {
        booking: Booking,
    },
    BookingStatusChanged {
        id: Ulid,
        listing_id: Ulid,
        status: BookingStatus,
        at: DateTime<Utc>,
    },
}

impl Event {
    /// Listing whose state this event mutates, if any.
    pub fn listing_id(&self) -> Option<Ulid> {
        match self {
            Event::ListingCreated { listing } | Event::ListingUpdated { listing } => Some(listing.id),
            Event::ListingStatusChanged { id, .. } => Some(*id),
            Event::CalendarUpserted { listing_id, .. }
            | Event::CalendarEntryRemoved { listing_id, .. }
            | Event::BookingStatusChanged { listing_id, .. } => Some(*listing_id),
            Event::BookingCreated { booking } => Some(booking.listing_id),
            Event::UserRegistered { .. }
            | Event::UserUpdated { .. }
            | Event::UserRoleChanged { .. }
            | Event::UserBanned { .. } => None,
        }
    }

    /// Primary entity the event is about, for error context.
    pub fn entity_id(&self) -> Ulid {
        match self {
            Event::UserRegistered { user } => user.id,
            Event::UserUpdated { id, .. }
            | Event::UserRoleChanged { id, .. }
            | Event::UserBanned { id, .. }
            | Event::ListingStatusChanged { id, .. }
            | Event::CalendarEntryRemoved { id, .. }
            | Event::BookingStatusChanged { id, .. } => *id,
            Event::ListingCreated { listing } | Event::ListingUpdated { listing } => listing.id,
            Event::CalendarUpserted { listing_id, .. } => *listing_id,
            Event::BookingCreated { booking } => booking.id,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Event::UserRegistered { .. } => "register_user",
            Event::UserUpdated { .. } => "update_user",
            Event::UserRoleChanged { .. } => "change_role",
            Event::UserBanned { .. } => "set_banned",
            Event::ListingCreated { .. } => "create_listing",
            Event::ListingUpdated { .. } => "update_listing",
            Event::ListingStatusChanged { .. } => "set_listing_status",
            Event::CalendarUpserted { .. } => "upsert_calendar",
            Event::CalendarEntryRemoved { .. } => "remove_calendar_entry",
            Event::BookingCreated { .. } => "create_booking",
            Event::BookingStatusChanged { .. } => "transition_booking",
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    pub fn listing(price_per_day: Cents, min_stay_days: u32, max_stay_days: u32) -> Listing {
        let now = Utc::now();
        Listing {
            id: Ulid::new(),
            host_id: Ulid::new(),
            title: "Loft".into(),
            description: String::new(),
            price_per_day,
            min_stay_days,
            max_stay_days,
            status: ListingStatus::Published,
            address: Address::default(),
            image_ids: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn booking(listing_id: Ulid, check_in: NaiveDate, checkout: NaiveDate, status: BookingStatus) -> Booking {
        let now = Utc::now();
        Booking {
            id: Ulid::new(),
            user_id: Ulid::new(),
            listing_id,
            stay: Stay::new(check_in, checkout),
            status,
            total_price: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn stay_basics() {
        let s = Stay::new(date(2030, 1, 10), date(2030, 1, 12));
        assert_eq!(s.nights(), 2);
        assert!(s.contains(date(2030, 1, 10)));
        assert!(s.contains(date(2030, 1, 11)));
        assert!(!s.contains(date(2030, 1, 12))); // checkout is exclusive
        assert_eq!(s.last_night(), date(2030, 1, 11));
        let nights: Vec<_> = s.night_dates().collect();
        assert_eq!(nights, vec![date(2030, 1, 10), date(2030, 1, 11)]);
    }

    #[test]
    fn stay_overlap() {
        let a = Stay::new(date(2030, 1, 10), date(2030, 1, 12));
        let b = Stay::new(date(2030, 1, 11), date(2030, 1, 13));
        let c = Stay::new(date(2030, 1, 12), date(2030, 1, 14));
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c)); // back-to-back stays share no night
    }

    #[test]
    fn stay_crosses_month_and_year() {
        let s = Stay::new(date(2030, 12, 30), date(2031, 1, 2));
        assert_eq!(s.nights(), 3);
        assert_eq!(s.last_night(), date(2031, 1, 1));
    }

    #[test]
    fn bookings_kept_sorted_by_check_in() {
        let l = listing(100, 1, 30);
        let mut ls = ListingState::new(l.clone());
        ls.insert_booking(booking(l.id, date(2030, 3, 1), date(2030, 3, 4), BookingStatus::Created));
        ls.insert_booking(booking(l.id, date(2030, 1, 1), date(2030, 1, 4), BookingStatus::Created));
        ls.insert_booking(booking(l.id, date(2030, 2, 1), date(2030, 2, 4), BookingStatus::Created));
        let starts: Vec<_> = ls.bookings.iter().map(|b| b.check_in()).collect();
        assert_eq!(starts, vec![date(2030, 1, 1), date(2030, 2, 1), date(2030, 3, 1)]);
    }

    #[test]
    fn overlapping_active_ignores_inactive_and_adjacent() {
        let l = listing(100, 1, 30);
        let mut ls = ListingState::new(l.clone());
        let active = booking(l.id, date(2030, 1, 10), date(2030, 1, 12), BookingStatus::Confirmed);
        let cancelled = booking(l.id, date(2030, 1, 11), date(2030, 1, 13), BookingStatus::Cancelled);
        let adjacent = booking(l.id, date(2030, 1, 12), date(2030, 1, 14), BookingStatus::Created);
        ls.insert_booking(active.clone());
        ls.insert_booking(cancelled);
        ls.insert_booking(adjacent);

        let query = Stay::new(date(2030, 1, 9), date(2030, 1, 12));
        let hits: Vec<_> = ls.overlapping_active(&query).map(|b| b.id).collect();
        assert_eq!(hits, vec![active.id]);
        assert_eq!(ls.active_booking_count(), 2);
    }

    #[test]
    fn overlapping_active_catches_long_stay_spanning_query() {
        let l = listing(100, 1, 60);
        let mut ls = ListingState::new(l.clone());
        let long = booking(l.id, date(2030, 1, 1), date(2030, 2, 1), BookingStatus::Created);
        ls.insert_booking(long.clone());
        let query = Stay::new(date(2030, 1, 15), date(2030, 1, 16));
        assert_eq!(ls.overlapping_active(&query).count(), 1);
    }

    #[test]
    fn calendar_range_is_inclusive_and_ordered() {
        let l = listing(100, 1, 30);
        let mut ls = ListingState::new(l.clone());
        for d in [12, 10, 11, 13] {
            ls.upsert_availability(Availability {
                id: Ulid::new(),
                listing_id: l.id,
                date: date(2030, 1, d),
                is_available: true,
                price_override: None,
            });
        }
        let dates: Vec<_> = ls
            .calendar_range(date(2030, 1, 10), date(2030, 1, 12))
            .map(|a| a.date)
            .collect();
        assert_eq!(dates, vec![date(2030, 1, 10), date(2030, 1, 11), date(2030, 1, 12)]);
        assert_eq!(ls.calendar_range(date(2030, 1, 12), date(2030, 1, 10)).count(), 0);
    }

    #[test]
    fn upsert_keeps_one_record_per_date() {
        let l = listing(100, 1, 30);
        let mut ls = ListingState::new(l.clone());
        let d = date(2030, 1, 10);
        ls.upsert_availability(Availability {
            id: Ulid::new(),
            listing_id: l.id,
            date: d,
            is_available: true,
            price_override: None,
        });
        ls.upsert_availability(Availability {
            id: Ulid::new(),
            listing_id: l.id,
            date: d,
            is_available: false,
            price_override: Some(500),
        });
        assert_eq!(ls.calendar.len(), 1);
        assert!(!ls.calendar[&d].is_available);
    }

    #[test]
    fn system_actor() {
        let sys = ActingUser::system();
        assert!(sys.is_system());
        assert!(sys.is_admin());
        assert!(!ActingUser::new(Ulid::new(), Role::Admin).is_system());
    }

    #[test]
    fn event_serialization_roundtrip() {
        let l = listing(10_000, 2, 14);
        let event = Event::BookingCreated {
            booking: booking(l.id, date(2030, 1, 10), date(2030, 1, 12), BookingStatus::Created),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
        assert_eq!(decoded.listing_id(), Some(l.id));
    }
}
