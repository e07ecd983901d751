use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::model::*;

pub type SharedListingState = Arc<RwLock<ListingState>>;
pub type SharedUser = Arc<RwLock<User>>;

/// In-memory tables plus the secondary indexes lookups need.
pub struct InMemoryStore {
    listings: DashMap<Ulid, SharedListingState>,
    users: DashMap<Ulid, SharedUser>,
    /// Lower-cased email → user id.
    emails: DashMap<String, Ulid>,
    /// Booking id → listing id.
    booking_to_listing: DashMap<Ulid, Ulid>,
    /// Host id → listing ids, in creation order.
    host_listings: DashMap<Ulid, Vec<Ulid>>,
    /// Guest id → booking ids, in creation order.
    guest_bookings: DashMap<Ulid, Vec<Ulid>>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn email_key(email: &str) -> String {
    email.trim().to_lowercase()
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            listings: DashMap::new(),
            users: DashMap::new(),
            emails: DashMap::new(),
            booking_to_listing: DashMap::new(),
            host_listings: DashMap::new(),
            guest_bookings: DashMap::new(),
        }
    }

    // ── Listings ─────────────────────────────────────────────

    pub fn listing_count(&self) -> usize {
        self.listings.len()
    }

    pub fn contains_listing(&self, id: &Ulid) -> bool {
        self.listings.contains_key(id)
    }

    pub fn get_listing(&self, id: &Ulid) -> Option<SharedListingState> {
        self.listings.get(id).map(|e| e.value().clone())
    }

    pub fn insert_listing(&self, listing: Listing) {
        let id = listing.id;
        self.host_listings.entry(listing.host_id).or_default().push(id);
        self.listings.insert(id, Arc::new(RwLock::new(ListingState::new(listing))));
    }

    /// Listing ids sorted ascending (ULIDs sort by creation time).
    pub fn listing_ids(&self) -> Vec<Ulid> {
        let mut ids: Vec<Ulid> = self.listings.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids
    }

    pub fn listings_of_host(&self, host_id: &Ulid) -> Vec<Ulid> {
        self.host_listings
            .get(host_id)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    // ── Users ────────────────────────────────────────────────

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    pub fn contains_user(&self, id: &Ulid) -> bool {
        self.users.contains_key(id)
    }

    pub fn get_user(&self, id: &Ulid) -> Option<SharedUser> {
        self.users.get(id).map(|e| e.value().clone())
    }

    pub fn user_ids(&self) -> Vec<Ulid> {
        let mut ids: Vec<Ulid> = self.users.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids
    }

    pub fn user_by_email(&self, email: &str) -> Option<Ulid> {
        self.emails.get(&email_key(email)).map(|e| *e.value())
    }

    /// Claim `email` for `id`. False if another user already holds it.
    pub fn reserve_email(&self, email: &str, id: Ulid) -> bool {
        match self.emails.entry(email_key(email)) {
            dashmap::mapref::entry::Entry::Occupied(e) => *e.get() == id,
            dashmap::mapref::entry::Entry::Vacant(e) => {
                e.insert(id);
                true
            }
        }
    }

    pub fn release_email(&self, email: &str, id: Ulid) {
        self.emails.remove_if(&email_key(email), |_, owner| *owner == id);
    }

    pub fn insert_user(&self, user: User) {
        self.emails.insert(email_key(&user.email), user.id);
        self.users.insert(user.id, Arc::new(RwLock::new(user)));
    }

    // ── Booking index ────────────────────────────────────────

    pub fn listing_for_booking(&self, booking_id: &Ulid) -> Option<Ulid> {
        self.booking_to_listing.get(booking_id).map(|e| *e.value())
    }

    pub fn bookings_of_guest(&self, user_id: &Ulid) -> Vec<Ulid> {
        self.guest_bookings
            .get(user_id)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    pub fn booking_count(&self) -> usize {
        self.booking_to_listing.len()
    }

    // ── Event application ────────────────────────────────────

    /// Apply a listing-scoped event. The caller holds the listing's write lock.
    pub fn apply_listing_event(&self, ls: &mut ListingState, event: &Event) {
        match event {
            Event::ListingUpdated { listing } => {
                ls.listing = listing.clone();
            }
            Event::ListingStatusChanged { status, at, .. } => {
                ls.listing.status = *status;
                ls.listing.updated_at = *at;
            }
            Event::CalendarUpserted { entries, .. } => {
                for entry in entries {
                    ls.upsert_availability(entry.clone());
                }
            }
            Event::CalendarEntryRemoved { date, .. } => {
                ls.remove_availability(date);
            }
            Event::BookingCreated { booking } => {
                self.booking_to_listing.insert(booking.id, booking.listing_id);
                self.guest_bookings
                    .entry(booking.user_id)
                    .or_default()
                    .push(booking.id);
                ls.insert_booking(booking.clone());
            }
            Event::BookingStatusChanged { id, status, at, .. } => {
                if let Some(b) = ls.booking_mut(id) {
                    b.status = *status;
                    b.updated_at = *at;
                }
            }
            // Created at the table level; user events never reach a listing.
            Event::ListingCreated { .. }
            | Event::UserRegistered { .. }
            | Event::UserUpdated { .. }
            | Event::UserRoleChanged { .. }
            | Event::UserBanned { .. } => {}
        }
    }

    /// Apply a user-scoped event. The caller holds the user's write lock.
    pub fn apply_user_event(&self, user: &mut User, event: &Event) {
        match event {
            Event::UserUpdated { email, phone, .. } => {
                if email_key(email) != email_key(&user.email) {
                    self.release_email(&user.email, user.id);
                    self.emails.insert(email_key(email), user.id);
                }
                user.email = email.clone();
                user.phone = phone.clone();
            }
            Event::UserRoleChanged { role, .. } => user.role = *role,
            Event::UserBanned { banned, .. } => user.banned = *banned,
            _ => {}
        }
    }
}
