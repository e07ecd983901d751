use std::time::Instant;

use chrono::NaiveDate;
use ulid::Ulid;

use crate::auth::{Action, Resource, require};
use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::conflict::{check_calendar_open, check_listing_accepts, check_no_overlap, validate_stay};
use super::pricing::{compute_price, price_breakdown};
use super::{Engine, EngineError, RequestContext};

impl Engine {
    /// Admit a new booking for `guest_id` on `listing_id`.
    ///
    /// The calendar check, overlap check and log append all run under the listing's
    /// write lock, so of several concurrent requests for intersecting stays exactly
    /// one is admitted and the rest fail with `Overlap`.
    pub async fn request_booking(
        &self,
        ctx: &RequestContext,
        actor: &ActingUser,
        listing_id: Ulid,
        guest_id: Ulid,
        check_in: NaiveDate,
        checkout: NaiveDate,
    ) -> Result<Booking, EngineError> {
        let started = Instant::now();
        let result = self
            .admit(ctx, actor, listing_id, guest_id, check_in, checkout)
            .await;

        let outcome = observability::outcome_label(&result.as_ref().map(|_| ()));
        metrics::counter!(observability::ADMISSIONS_TOTAL, "outcome" => outcome).increment(1);
        metrics::histogram!(observability::ADMISSION_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        match &result {
            Ok(b) => tracing::info!(
                booking_id = %b.id,
                %listing_id,
                %guest_id,
                %check_in,
                %checkout,
                total = b.total_price,
                "booking admitted"
            ),
            Err(e) => tracing::debug!(%listing_id, %guest_id, %check_in, %checkout, "booking rejected: {e}"),
        }
        result
    }

    async fn admit(
        &self,
        ctx: &RequestContext,
        actor: &ActingUser,
        listing_id: Ulid,
        guest_id: Ulid,
        check_in: NaiveDate,
        checkout: NaiveDate,
    ) -> Result<Booking, EngineError> {
        let stay = validate_stay(check_in, checkout, self.today())?;

        self.check_actor(ctx, actor).await?;
        let guest = self.load_user(ctx, &guest_id).await?;
        if guest.banned {
            return Err(EngineError::Unauthorized("user is banned"));
        }

        let guard = match self.listing_write(ctx, &listing_id).await {
            Err(EngineError::NotFound(_)) => {
                return Err(EngineError::ListingUnavailable {
                    id: listing_id,
                    status: None,
                });
            }
            other => other?,
        };
        require(
            actor,
            Resource::NewBooking {
                guest_id,
                listing: &guard.listing,
            },
            Action::RequestBooking,
            "cannot book this listing for this user",
        )?;
        check_listing_accepts(&guard.listing, &stay)?;
        if guard.active_booking_count() >= MAX_ACTIVE_BOOKINGS_PER_LISTING {
            return Err(EngineError::LimitExceeded("too many active bookings on listing"));
        }

        let calendar = check_calendar_open(&guard, &stay)?;
        check_no_overlap(&guard, &stay)?;
        let total_price = compute_price(&guard.listing, stay.check_in, stay.checkout, &calendar)?;

        // Last chance to honour cancellation: nothing is committed yet.
        ctx.check()?;
        let now = self.clock.now();
        let booking = Booking {
            id: Ulid::new(),
            user_id: guest_id,
            listing_id,
            stay,
            status: BookingStatus::Created,
            total_price,
            created_at: now,
            updated_at: now,
        };
        self.commit_listing_event(
            guard,
            Event::BookingCreated {
                booking: booking.clone(),
            },
        )
        .await?;
        Ok(booking)
    }

    /// Price a prospective stay against the live calendar without booking it.
    /// Fails exactly where `request_booking` would on listing, calendar and overlap.
    pub async fn quote(
        &self,
        ctx: &RequestContext,
        actor: &ActingUser,
        listing_id: Ulid,
        check_in: NaiveDate,
        checkout: NaiveDate,
    ) -> Result<Quote, EngineError> {
        let stay = validate_stay(check_in, checkout, self.today())?;
        let guard = match self.listing_read(ctx, &listing_id).await {
            Err(EngineError::NotFound(_)) => {
                return Err(EngineError::ListingUnavailable {
                    id: listing_id,
                    status: None,
                });
            }
            other => other?,
        };
        require(actor, Resource::Listing(&guard.listing), Action::View, "listing is not visible")?;
        check_listing_accepts(&guard.listing, &stay)?;
        let calendar = check_calendar_open(&guard, &stay)?;
        check_no_overlap(&guard, &stay)?;

        let nights = price_breakdown(&guard.listing, stay.check_in, stay.checkout, &calendar)?;
        let total = nights
            .iter()
            .try_fold(0 as Cents, |acc, (_, p)| acc.checked_add(*p))
            .ok_or(EngineError::Overflow)?;
        Ok(Quote {
            listing_id,
            stay,
            nights,
            total,
        })
    }
}
