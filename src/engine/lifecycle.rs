use chrono::NaiveDate;
use ulid::Ulid;

use crate::auth::{Action, Resource, require};
use crate::model::*;
use crate::observability;

use super::{Engine, EngineError, RequestContext};

/// Edges of the booking state machine. Terminal states have none.
pub fn transition_allowed(from: BookingStatus, to: BookingStatus) -> bool {
    use BookingStatus::*;
    matches!(
        (from, to),
        (Created, Confirmed) | (Created, Cancelled) | (Confirmed, Cancelled) | (Confirmed, Completed)
    )
}

/// Edge check plus the date rules: a confirmed stay can only be cancelled before
/// check-in and only completed from checkout on.
pub fn check_transition(
    booking: &Booking,
    to: BookingStatus,
    today: NaiveDate,
) -> Result<(), EngineError> {
    if !transition_allowed(booking.status, to) {
        return Err(EngineError::InvalidTransition {
            from: booking.status,
            to,
        });
    }
    match (booking.status, to) {
        (BookingStatus::Confirmed, BookingStatus::Cancelled) if today >= booking.check_in() => {
            Err(EngineError::TooLateToCancel {
                id: booking.id,
                check_in: booking.check_in(),
            })
        }
        (BookingStatus::Confirmed, BookingStatus::Completed) if today < booking.checkout() => {
            Err(EngineError::PrematureCompletion {
                id: booking.id,
                checkout: booking.checkout(),
            })
        }
        _ => Ok(()),
    }
}

impl Engine {
    pub async fn confirm_booking(
        &self,
        ctx: &RequestContext,
        actor: &ActingUser,
        id: Ulid,
    ) -> Result<Booking, EngineError> {
        self.transition_booking(ctx, actor, id, BookingStatus::Confirmed)
            .await
    }

    /// Cancelling frees the stay's nights for new admissions; no calendar row changes.
    pub async fn cancel_booking(
        &self,
        ctx: &RequestContext,
        actor: &ActingUser,
        id: Ulid,
    ) -> Result<Booking, EngineError> {
        self.transition_booking(ctx, actor, id, BookingStatus::Cancelled)
            .await
    }

    pub async fn complete_booking(
        &self,
        ctx: &RequestContext,
        actor: &ActingUser,
        id: Ulid,
    ) -> Result<Booking, EngineError> {
        self.transition_booking(ctx, actor, id, BookingStatus::Completed)
            .await
    }

    async fn transition_booking(
        &self,
        ctx: &RequestContext,
        actor: &ActingUser,
        id: Ulid,
        to: BookingStatus,
    ) -> Result<Booking, EngineError> {
        self.check_actor(ctx, actor).await?;
        let guard = self.booking_listing_write(ctx, &id).await?;
        let booking = guard.booking(&id).cloned().ok_or(EngineError::NotFound(id))?;

        let action = match to {
            BookingStatus::Confirmed => Action::ConfirmBooking,
            BookingStatus::Cancelled => Action::CancelBooking,
            BookingStatus::Completed => Action::CompleteBooking,
            BookingStatus::Created => {
                return Err(EngineError::InvalidTransition {
                    from: booking.status,
                    to,
                });
            }
        };
        require(
            actor,
            Resource::Booking {
                booking: &booking,
                listing: &guard.listing,
            },
            action,
            "not a party to this booking",
        )?;
        check_transition(&booking, to, self.today())?;

        ctx.check()?;
        let event = Event::BookingStatusChanged {
            id,
            listing_id: booking.listing_id,
            status: to,
            at: self.clock.now(),
        };
        let guard = self.commit_listing_event(guard, event).await?;
        metrics::counter!(observability::TRANSITIONS_TOTAL, "to" => to.as_str()).increment(1);
        tracing::info!(booking_id = %id, from = %booking.status, %to, actor = %actor.id, "booking transitioned");

        guard.booking(&id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// Confirmed bookings whose checkout is on or before `today`.
    /// Listings locked by someone else are skipped until the next sweep.
    pub fn collect_completable(&self, today: NaiveDate) -> Vec<Ulid> {
        let mut due = Vec::new();
        for listing_id in self.store.listing_ids() {
            let Some(ls) = self.store.get_listing(&listing_id) else { continue };
            let Ok(guard) = ls.try_read() else { continue };
            due.extend(
                guard
                    .bookings
                    .iter()
                    .filter(|b| b.status == BookingStatus::Confirmed && b.checkout() <= today)
                    .map(|b| b.id),
            );
        }
        due
    }
}
