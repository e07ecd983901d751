use std::collections::HashSet;

use chrono::NaiveDate;
use ulid::Ulid;

use crate::auth::{Action, Resource, require};
use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError, RequestContext};

/// Host-editable listing fields. Identity, owner, status and timestamps are engine-managed.
#[derive(Debug, Clone, PartialEq)]
pub struct NewListing {
    pub title: String,
    pub description: String,
    pub price_per_day: Cents,
    pub min_stay_days: u32,
    pub max_stay_days: u32,
    pub address: Address,
    pub image_ids: Vec<Ulid>,
}

/// One date of a calendar batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalendarEdit {
    pub date: NaiveDate,
    pub is_available: bool,
    pub price_override: Option<Cents>,
}

/// Any live status may move to any other; `deleted` is final.
pub fn listing_transition_allowed(from: ListingStatus, to: ListingStatus) -> bool {
    from != ListingStatus::Deleted && from != to
}

fn validate_listing_fields(fields: &NewListing) -> Result<(), EngineError> {
    if fields.title.trim().is_empty() {
        return Err(EngineError::InvalidInput("title is empty".into()));
    }
    if fields.title.len() > MAX_TITLE_LEN {
        return Err(EngineError::LimitExceeded("title too long"));
    }
    if fields.description.len() > MAX_DESCRIPTION_LEN {
        return Err(EngineError::LimitExceeded("description too long"));
    }
    if fields.price_per_day <= 0 {
        return Err(EngineError::InvalidInput(format!(
            "price per day must be positive, got {}",
            fields.price_per_day
        )));
    }
    if fields.min_stay_days == 0 || fields.min_stay_days > fields.max_stay_days {
        return Err(EngineError::InvalidInput(format!(
            "stay bounds {}..={} are not a valid range",
            fields.min_stay_days, fields.max_stay_days
        )));
    }
    if fields.max_stay_days > MAX_STAY_DAYS {
        return Err(EngineError::LimitExceeded("max stay too long"));
    }
    if fields.image_ids.len() > MAX_IMAGES_PER_LISTING {
        return Err(EngineError::LimitExceeded("too many images"));
    }
    let a = &fields.address;
    if [&a.country, &a.city, &a.street, &a.house]
        .iter()
        .any(|f| f.len() > MAX_ADDRESS_FIELD_LEN)
    {
        return Err(EngineError::LimitExceeded("address field too long"));
    }
    if !(-90.0..=90.0).contains(&a.latitude) || !(-180.0..=180.0).contains(&a.longitude) {
        return Err(EngineError::InvalidInput(format!(
            "coordinates ({}, {}) out of range",
            a.latitude, a.longitude
        )));
    }
    Ok(())
}

fn validate_calendar_batch(edits: &[CalendarEdit]) -> Result<(), EngineError> {
    if edits.len() > MAX_CALENDAR_BATCH {
        return Err(EngineError::LimitExceeded("calendar batch too large"));
    }
    let mut seen = HashSet::with_capacity(edits.len());
    for edit in edits {
        if let Some(price) = edit.price_override
            && price < 0
        {
            return Err(EngineError::InvalidInput(format!(
                "negative price override on {}",
                edit.date
            )));
        }
        if !seen.insert(edit.date) {
            return Err(EngineError::InvalidInput(format!(
                "date {} appears twice in batch",
                edit.date
            )));
        }
    }
    Ok(())
}

fn ensure_not_deleted(listing: &Listing) -> Result<(), EngineError> {
    if listing.status == ListingStatus::Deleted {
        return Err(EngineError::ListingUnavailable {
            id: listing.id,
            status: Some(ListingStatus::Deleted),
        });
    }
    Ok(())
}

impl Engine {
    /// New listings start as drafts.
    pub async fn create_listing(
        &self,
        ctx: &RequestContext,
        actor: &ActingUser,
        host_id: Ulid,
        fields: NewListing,
    ) -> Result<Listing, EngineError> {
        validate_listing_fields(&fields)?;
        if self.store.listing_count() >= MAX_LISTINGS {
            return Err(EngineError::LimitExceeded("too many listings"));
        }
        self.check_actor(ctx, actor).await?;
        let host = self.load_user(ctx, &host_id).await?;
        if host.banned {
            return Err(EngineError::Unauthorized("host is banned"));
        }
        require(
            actor,
            Resource::User(&host),
            Action::CreateListing,
            "only hosts can create listings",
        )?;

        ctx.check()?;
        let now = self.clock.now();
        let listing = Listing {
            id: Ulid::new(),
            host_id,
            title: fields.title,
            description: fields.description,
            price_per_day: fields.price_per_day,
            min_stay_days: fields.min_stay_days,
            max_stay_days: fields.max_stay_days,
            status: ListingStatus::Draft,
            address: fields.address,
            image_ids: fields.image_ids,
            created_at: now,
            updated_at: now,
        };
        self.commit_new_listing(listing.clone()).await?;
        tracing::info!(listing_id = %listing.id, %host_id, "listing created");
        Ok(listing)
    }

    /// Replace the editable fields. Existing bookings keep the price they were admitted at.
    pub async fn update_listing(
        &self,
        ctx: &RequestContext,
        actor: &ActingUser,
        id: Ulid,
        fields: NewListing,
    ) -> Result<Listing, EngineError> {
        validate_listing_fields(&fields)?;
        self.check_actor(ctx, actor).await?;
        let guard = self.listing_write(ctx, &id).await?;
        require(actor, Resource::Listing(&guard.listing), Action::Update, "not the listing's host")?;
        ensure_not_deleted(&guard.listing)?;

        ctx.check()?;
        let listing = Listing {
            title: fields.title,
            description: fields.description,
            price_per_day: fields.price_per_day,
            min_stay_days: fields.min_stay_days,
            max_stay_days: fields.max_stay_days,
            address: fields.address,
            image_ids: fields.image_ids,
            updated_at: self.clock.now(),
            ..guard.listing.clone()
        };
        self.commit_listing_event(guard, Event::ListingUpdated { listing: listing.clone() })
            .await?;
        Ok(listing)
    }

    pub async fn set_listing_status(
        &self,
        ctx: &RequestContext,
        actor: &ActingUser,
        id: Ulid,
        to: ListingStatus,
    ) -> Result<Listing, EngineError> {
        self.check_actor(ctx, actor).await?;
        let guard = self.listing_write(ctx, &id).await?;
        require(
            actor,
            Resource::Listing(&guard.listing),
            Action::SetListingStatus(to),
            "cannot change this listing's status",
        )?;
        let from = guard.listing.status;
        if !listing_transition_allowed(from, to) {
            return Err(EngineError::InvalidListingTransition { from, to });
        }

        ctx.check()?;
        let event = Event::ListingStatusChanged {
            id,
            status: to,
            at: self.clock.now(),
        };
        let guard = self.commit_listing_event(guard, event).await?;
        tracing::info!(listing_id = %id, %from, %to, actor = %actor.id, "listing status changed");
        Ok(guard.listing.clone())
    }

    /// Create or replace calendar records for a batch of dates, atomically.
    /// A date that already has a record keeps its id.
    pub async fn upsert_calendar(
        &self,
        ctx: &RequestContext,
        actor: &ActingUser,
        listing_id: Ulid,
        edits: Vec<CalendarEdit>,
    ) -> Result<Vec<Availability>, EngineError> {
        validate_calendar_batch(&edits)?;
        self.check_actor(ctx, actor).await?;
        let guard = self.listing_write(ctx, &listing_id).await?;
        require(
            actor,
            Resource::Listing(&guard.listing),
            Action::EditCalendar,
            "not the listing's host",
        )?;
        ensure_not_deleted(&guard.listing)?;
        if edits.is_empty() {
            return Ok(Vec::new());
        }

        let entries: Vec<Availability> = edits
            .iter()
            .map(|edit| Availability {
                id: guard
                    .calendar
                    .get(&edit.date)
                    .map(|existing| existing.id)
                    .unwrap_or_else(Ulid::new),
                listing_id,
                date: edit.date,
                is_available: edit.is_available,
                price_override: edit.price_override,
            })
            .collect();

        ctx.check()?;
        let event = Event::CalendarUpserted {
            listing_id,
            entries: entries.clone(),
        };
        self.commit_listing_event(guard, event).await?;
        tracing::debug!(%listing_id, dates = entries.len(), "calendar updated");
        Ok(entries)
    }

    /// Drop one calendar record by id. The date reverts to open at the base price.
    pub async fn remove_calendar_entry(
        &self,
        ctx: &RequestContext,
        actor: &ActingUser,
        listing_id: Ulid,
        entry_id: Ulid,
    ) -> Result<Availability, EngineError> {
        self.check_actor(ctx, actor).await?;
        let guard = self.listing_write(ctx, &listing_id).await?;
        require(
            actor,
            Resource::Listing(&guard.listing),
            Action::EditCalendar,
            "not the listing's host",
        )?;
        ensure_not_deleted(&guard.listing)?;
        let entry = guard
            .calendar
            .values()
            .find(|a| a.id == entry_id)
            .cloned()
            .ok_or(EngineError::NotFound(entry_id))?;

        ctx.check()?;
        let event = Event::CalendarEntryRemoved {
            id: entry_id,
            listing_id,
            date: entry.date,
        };
        self.commit_listing_event(guard, event).await?;
        Ok(entry)
    }
}
