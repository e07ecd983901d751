use std::collections::BTreeSet;

use chrono::NaiveDate;
use ulid::Ulid;

use crate::auth::{Action, Resource, authorize, require};
use crate::limits::*;
use crate::model::*;

use super::conflict::validate_window;
use super::{Engine, EngineError, RequestContext};

fn paginate<T>(items: Vec<T>, limit: usize, offset: usize) -> Page<T> {
    let total = items.len();
    let items = items.into_iter().skip(offset).take(page_size(limit)).collect();
    Page { items, total }
}

impl Engine {
    // ── Listings ─────────────────────────────────────────────

    /// Drafts, blocked and deleted listings are visible only to their host and admins.
    pub async fn get_listing(
        &self,
        ctx: &RequestContext,
        actor: &ActingUser,
        id: Ulid,
    ) -> Result<Listing, EngineError> {
        let guard = self.listing_read(ctx, &id).await?;
        require(actor, Resource::Listing(&guard.listing), Action::View, "listing is not visible")?;
        Ok(guard.listing.clone())
    }

    pub fn listing_exists(&self, id: &Ulid) -> bool {
        self.store.contains_listing(id)
    }

    /// Listings visible to `actor` among those matching `keep`, in id order.
    async fn visible_listings(
        &self,
        ctx: &RequestContext,
        actor: &ActingUser,
        ids: Vec<Ulid>,
        keep: impl Fn(&Listing) -> bool,
    ) -> Result<Vec<Listing>, EngineError> {
        let mut listings = Vec::new();
        for id in ids {
            let guard = self.listing_read(ctx, &id).await?;
            if keep(&guard.listing) && authorize(actor, Resource::Listing(&guard.listing), Action::View) {
                listings.push(guard.listing.clone());
            }
        }
        Ok(listings)
    }

    pub async fn listings_by_host(
        &self,
        ctx: &RequestContext,
        actor: &ActingUser,
        host_id: Ulid,
        limit: usize,
        offset: usize,
    ) -> Result<Page<Listing>, EngineError> {
        let ids = self.store.listings_of_host(&host_id);
        let listings = self.visible_listings(ctx, actor, ids, |_| true).await?;
        Ok(paginate(listings, limit, offset))
    }

    pub async fn listings_by_status(
        &self,
        ctx: &RequestContext,
        actor: &ActingUser,
        status: ListingStatus,
        limit: usize,
        offset: usize,
    ) -> Result<Page<Listing>, EngineError> {
        let ids = self.store.listing_ids();
        let listings = self
            .visible_listings(ctx, actor, ids, |l| l.status == status)
            .await?;
        Ok(paginate(listings, limit, offset))
    }

    /// Listings `actor` can see, optionally only those in `status`.
    pub async fn count_listings(
        &self,
        ctx: &RequestContext,
        actor: &ActingUser,
        status: Option<ListingStatus>,
    ) -> Result<usize, EngineError> {
        if status.is_none() && actor.is_admin() {
            return Ok(self.store.listing_count());
        }
        let ids = self.store.listing_ids();
        let listings = self
            .visible_listings(ctx, actor, ids, |l| status.is_none_or(|s| l.status == s))
            .await?;
        Ok(listings.len())
    }

    // ── Calendar ─────────────────────────────────────────────

    /// Calendar records with `from <= date <= to`, ascending by date.
    pub async fn calendar(
        &self,
        ctx: &RequestContext,
        actor: &ActingUser,
        listing_id: Ulid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Availability>, EngineError> {
        validate_window(from, to)?;
        let guard = self.listing_read(ctx, &listing_id).await?;
        require(actor, Resource::Listing(&guard.listing), Action::View, "listing is not visible")?;
        Ok(guard.calendar_range(from, to).cloned().collect())
    }

    pub async fn calendar_entry(
        &self,
        ctx: &RequestContext,
        actor: &ActingUser,
        listing_id: Ulid,
        entry_id: Ulid,
    ) -> Result<Availability, EngineError> {
        let guard = self.listing_read(ctx, &listing_id).await?;
        require(actor, Resource::Listing(&guard.listing), Action::View, "listing is not visible")?;
        guard
            .calendar
            .values()
            .find(|a| a.id == entry_id)
            .cloned()
            .ok_or(EngineError::NotFound(entry_id))
    }

    /// Nights in `from..=to` held by an active booking, ascending.
    pub async fn occupied_dates(
        &self,
        ctx: &RequestContext,
        actor: &ActingUser,
        listing_id: Ulid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<NaiveDate>, EngineError> {
        validate_window(from, to)?;
        let checkout = to.succ_opt().ok_or(EngineError::InvalidRange { start: from, end: to })?;
        let window = Stay::new(from, checkout);
        let guard = self.listing_read(ctx, &listing_id).await?;
        require(actor, Resource::Listing(&guard.listing), Action::View, "listing is not visible")?;
        let occupied: BTreeSet<NaiveDate> = guard
            .overlapping_active(&window)
            .flat_map(|b| b.stay.night_dates())
            .filter(|d| window.contains(*d))
            .collect();
        Ok(occupied.into_iter().collect())
    }

    // ── Bookings ─────────────────────────────────────────────

    pub async fn get_booking(
        &self,
        ctx: &RequestContext,
        actor: &ActingUser,
        id: Ulid,
    ) -> Result<Booking, EngineError> {
        let listing_id = self
            .store
            .listing_for_booking(&id)
            .ok_or(EngineError::NotFound(id))?;
        let guard = self.listing_read(ctx, &listing_id).await?;
        let booking = guard.booking(&id).ok_or(EngineError::NotFound(id))?;
        require(
            actor,
            Resource::Booking {
                booking,
                listing: &guard.listing,
            },
            Action::View,
            "not a party to this booking",
        )?;
        Ok(booking.clone())
    }

    pub fn booking_exists(&self, id: &Ulid) -> bool {
        self.store.listing_for_booking(id).is_some()
    }

    /// Bookings on one listing ordered by check-in, optionally filtered by status.
    pub async fn bookings_for_listing(
        &self,
        ctx: &RequestContext,
        actor: &ActingUser,
        listing_id: Ulid,
        status: Option<BookingStatus>,
        limit: usize,
        offset: usize,
    ) -> Result<Page<Booking>, EngineError> {
        let guard = self.listing_read(ctx, &listing_id).await?;
        require(
            actor,
            Resource::Listing(&guard.listing),
            Action::ViewBookings,
            "not the listing's host",
        )?;
        let bookings = guard
            .bookings
            .iter()
            .filter(|b| status.is_none_or(|s| b.status == s))
            .cloned()
            .collect();
        Ok(paginate(bookings, limit, offset))
    }

    /// A guest's bookings, oldest first.
    pub async fn bookings_by_guest(
        &self,
        ctx: &RequestContext,
        actor: &ActingUser,
        user_id: Ulid,
        limit: usize,
        offset: usize,
    ) -> Result<Page<Booking>, EngineError> {
        let user = self.load_user(ctx, &user_id).await?;
        require(actor, Resource::User(&user), Action::View, "cannot view this user's bookings")?;

        let mut bookings = Vec::new();
        for id in self.store.bookings_of_guest(&user_id) {
            let Some(listing_id) = self.store.listing_for_booking(&id) else { continue };
            let guard = self.listing_read(ctx, &listing_id).await?;
            if let Some(b) = guard.booking(&id) {
                bookings.push(b.clone());
            }
        }
        Ok(paginate(bookings, limit, offset))
    }

    /// Every booking in `status`, across listings. Admin only.
    pub async fn bookings_by_status(
        &self,
        ctx: &RequestContext,
        actor: &ActingUser,
        status: BookingStatus,
        limit: usize,
        offset: usize,
    ) -> Result<Page<Booking>, EngineError> {
        require(actor, Resource::Directory, Action::ListBookings, "only admins list all bookings")?;
        let mut bookings = Vec::new();
        for listing_id in self.store.listing_ids() {
            let guard = self.listing_read(ctx, &listing_id).await?;
            bookings.extend(guard.bookings.iter().filter(|b| b.status == status).cloned());
        }
        bookings.sort_by_key(|b| b.id);
        Ok(paginate(bookings, limit, offset))
    }

    pub async fn count_bookings(
        &self,
        ctx: &RequestContext,
        status: Option<BookingStatus>,
    ) -> Result<usize, EngineError> {
        let Some(status) = status else {
            return Ok(self.store.booking_count());
        };
        let mut count = 0;
        for listing_id in self.store.listing_ids() {
            let guard = self.listing_read(ctx, &listing_id).await?;
            count += guard.bookings.iter().filter(|b| b.status == status).count();
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_reports_full_total() {
        let page = paginate((0..250).collect::<Vec<_>>(), 0, 40);
        assert_eq!(page.total, 250);
        assert_eq!(page.items.len(), DEFAULT_PAGE_SIZE);
        assert_eq!(page.items[0], 40);

        let page = paginate((0..250).collect::<Vec<_>>(), 500, 200);
        assert_eq!(page.items.len(), 50);

        let page = paginate((0..3).collect::<Vec<_>>(), 10, 10);
        assert!(page.items.is_empty());
        assert_eq!(page.total, 3);
    }
}
