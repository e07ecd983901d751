//! Authorization as a pure predicate over (actor, resource, action).

use ulid::Ulid;

use crate::engine::EngineError;
use crate::model::*;

/// What an action is performed on.
#[derive(Debug, Clone, Copy)]
pub enum Resource<'a> {
    Listing(&'a Listing),
    /// A booking not yet admitted: the guest it is for and the listing it targets.
    NewBooking { guest_id: Ulid, listing: &'a Listing },
    Booking { booking: &'a Booking, listing: &'a Listing },
    User(&'a User),
    /// The user directory as a whole.
    Directory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    View,
    CreateListing,
    Update,
    SetListingStatus(ListingStatus),
    EditCalendar,
    ViewBookings,
    RequestBooking,
    ConfirmBooking,
    CancelBooking,
    CompleteBooking,
    ChangeRole(Role),
    Ban,
    ListUsers,
    ListBookings,
}

pub fn authorize(actor: &ActingUser, resource: Resource<'_>, action: Action) -> bool {
    use Action::*;
    match (resource, action) {
        // The listing's would-be host is passed as the user resource.
        (Resource::User(host), CreateListing) => {
            matches!(host.role, Role::Host | Role::Admin) && (actor.is_admin() || actor.id == host.id)
        }
        (Resource::Listing(l), View) => {
            l.status == ListingStatus::Published || owns(actor, l) || actor.is_admin()
        }
        (Resource::Listing(l), Update | EditCalendar | ViewBookings) => owns(actor, l) || actor.is_admin(),
        (Resource::Listing(l), SetListingStatus(to)) => {
            // Moderation in and out of `blocked` is admin-only.
            if to == ListingStatus::Blocked || l.status == ListingStatus::Blocked {
                actor.is_admin()
            } else {
                owns(actor, l) || actor.is_admin()
            }
        }
        (Resource::NewBooking { guest_id, listing }, RequestBooking) => {
            guest_id != listing.host_id && (actor.id == guest_id || actor.is_admin())
        }
        (Resource::Booking { booking, listing }, View | CancelBooking) => {
            actor.id == booking.user_id || owns(actor, listing) || actor.is_admin()
        }
        (Resource::Booking { listing, .. }, ConfirmBooking) => owns(actor, listing) || actor.is_admin(),
        (Resource::Booking { .. }, CompleteBooking) => actor.is_admin(),
        (Resource::User(u), View | Update) => actor.id == u.id || actor.is_admin(),
        (Resource::User(u), ChangeRole(to)) => {
            if to == Role::Admin {
                actor.is_admin()
            } else {
                actor.id == u.id || actor.is_admin()
            }
        }
        (Resource::User(u), Ban) => actor.is_admin() && actor.id != u.id,
        (Resource::Directory, ListUsers | ListBookings) => actor.is_admin(),
        _ => false,
    }
}

/// `authorize`, turned into an `Unauthorized` error carrying `reason` on denial.
pub fn require(
    actor: &ActingUser,
    resource: Resource<'_>,
    action: Action,
    reason: &'static str,
) -> Result<(), EngineError> {
    if authorize(actor, resource, action) {
        Ok(())
    } else {
        Err(EngineError::Unauthorized(reason))
    }
}

fn owns(actor: &ActingUser, listing: &Listing) -> bool {
    actor.id == listing.host_id
}
