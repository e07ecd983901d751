mod admission;
mod clock;
mod conflict;
mod context;
mod error;
mod lifecycle;
mod listings;
mod pricing;
mod queries;
mod store;
mod users;

pub use clock::{Clock, ManualClock, SystemClock};
pub use context::RequestContext;
pub use error::EngineError;
pub use lifecycle::{check_transition, transition_allowed};
pub use listings::{CalendarEdit, NewListing, listing_transition_allowed};
pub use pricing::{compute_price, price_breakdown};
pub use store::{InMemoryStore, SharedListingState, SharedUser};
pub use users::role_transition_allowed;

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock, broadcast};
use ulid::Ulid;

use crate::mailer::{LogMailer, Mailer};
use crate::model::*;
use crate::notify::NotifyHub;
use crate::observability;
use crate::wal::{Wal, WalWriter};

use store::email_key;

pub(super) type ListingWrite = OwnedRwLockWriteGuard<ListingState>;
pub(super) type UserWrite = OwnedRwLockWriteGuard<User>;

/// Append to the log; failures become `Storage` errors naming the operation.
async fn append(wal: &WalWriter, event: &Event) -> Result<(), EngineError> {
    wal.append(event.clone())
        .await
        .map_err(|e| EngineError::Storage {
            op: event.label(),
            id: event.entity_id(),
            message: e.to_string(),
        })
}

/// Run `commit` to completion on its own task, even if the awaiting caller is dropped.
async fn detached<T, F>(commit: F) -> Result<T, EngineError>
where
    T: Send + 'static,
    F: Future<Output = Result<T, EngineError>> + Send + 'static,
{
    tokio::spawn(commit).await.map_err(|e| EngineError::Storage {
        op: "commit",
        id: Ulid::nil(),
        message: e.to_string(),
    })?
}

/// The booking engine: in-memory state, rebuilt from and persisted to the log.
///
/// Each listing's calendar and bookings sit behind one `RwLock`. Every mutation
/// takes that write lock, validates, then hands the guard to a commit task that
/// appends the event to the log and applies it, so check-then-commit on one
/// listing is serialized.
pub struct Engine {
    pub(super) store: Arc<InMemoryStore>,
    pub(super) wal: WalWriter,
    pub notify: Arc<NotifyHub>,
    pub(super) mailer: Arc<dyn Mailer>,
    pub(super) clock: Arc<dyn Clock>,
    /// Held (shared) while committing a new user or listing, (exclusive) by compaction.
    /// Creation commits hold no other lock while waiting on it.
    pub(super) creation_gate: Arc<RwLock<()>>,
}

impl Engine {
    /// Replay the log at `wal_path` and start its writer task.
    /// Must be called inside a tokio runtime.
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> std::io::Result<Self> {
        let replay = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path, replay.valid_len)?;

        let engine = Self {
            store: Arc::new(InMemoryStore::new()),
            wal: WalWriter::spawn(wal),
            notify,
            mailer: Arc::new(LogMailer),
            clock: Arc::new(SystemClock),
            creation_gate: Arc::new(RwLock::new(())),
        };
        for event in &replay.events {
            engine.replay_event(event);
        }
        metrics::gauge!(observability::LISTINGS_LOADED).set(engine.store.listing_count() as f64);
        tracing::info!(
            path = %wal_path.display(),
            events = replay.events.len(),
            listings = engine.store.listing_count(),
            users = engine.store.user_count(),
            "engine state replayed"
        );
        Ok(engine)
    }

    pub fn with_mailer(mut self, mailer: Arc<dyn Mailer>) -> Self {
        self.mailer = mailer;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn today(&self) -> chrono::NaiveDate {
        self.clock.today()
    }

    /// Committed events for one listing, from now on.
    pub fn subscribe(&self, listing_id: Ulid) -> broadcast::Receiver<Event> {
        self.notify.subscribe(listing_id)
    }

    // We're the sole owner of every lock during replay, so try_write always
    // succeeds instantly. Never block here: this runs inside the runtime.
    fn replay_event(&self, event: &Event) {
        match event {
            Event::UserRegistered { user } => self.store.insert_user(user.clone()),
            Event::UserUpdated { id, .. }
            | Event::UserRoleChanged { id, .. }
            | Event::UserBanned { id, .. } => {
                if let Some(user) = self.store.get_user(id)
                    && let Ok(mut guard) = user.try_write()
                {
                    self.store.apply_user_event(&mut guard, event);
                }
            }
            Event::ListingCreated { listing } => self.store.insert_listing(listing.clone()),
            other => {
                if let Some(listing_id) = other.listing_id()
                    && let Some(ls) = self.store.get_listing(&listing_id)
                    && let Ok(mut guard) = ls.try_write()
                {
                    self.store.apply_listing_event(&mut guard, other);
                }
            }
        }
    }

    // ── Commit ───────────────────────────────────────────────
    //
    // Each commit runs on its own task that owns everything it mutates, so a
    // caller dropping its future can never leave an event logged but unapplied.

    /// Log + apply + notify for an event scoped to the locked listing.
    /// Hands the guard back once the event is applied.
    pub(super) async fn commit_listing_event(
        &self,
        mut guard: ListingWrite,
        event: Event,
    ) -> Result<ListingWrite, EngineError> {
        let wal = self.wal.clone();
        let store = self.store.clone();
        let notify = self.notify.clone();
        detached(async move {
            append(&wal, &event).await?;
            store.apply_listing_event(&mut guard, &event);
            notify.send(guard.listing.id, &event);
            Ok(guard)
        })
        .await
    }

    /// Log + apply for an event scoped to the locked user. A new email claimed
    /// for a failed `UserUpdated` is released again.
    pub(super) async fn commit_user_event(
        &self,
        mut guard: UserWrite,
        event: Event,
    ) -> Result<UserWrite, EngineError> {
        let wal = self.wal.clone();
        let store = self.store.clone();
        detached(async move {
            if let Err(e) = append(&wal, &event).await {
                if let Event::UserUpdated { id, email, .. } = &event
                    && email_key(email) != email_key(&guard.email)
                {
                    store.release_email(email, *id);
                }
                return Err(e);
            }
            store.apply_user_event(&mut guard, &event);
            Ok(guard)
        })
        .await
    }

    /// Claim the email, log and insert a new user under the creation gate.
    pub(super) async fn commit_new_user(&self, user: User) -> Result<(), EngineError> {
        let gate = self.creation_gate.clone().read_owned().await;
        let wal = self.wal.clone();
        let store = self.store.clone();
        detached(async move {
            let _gate = gate;
            if !store.reserve_email(&user.email, user.id) {
                return Err(EngineError::AlreadyExists(email_key(&user.email)));
            }
            if let Err(e) = append(&wal, &Event::UserRegistered { user: user.clone() }).await {
                store.release_email(&user.email, user.id);
                return Err(e);
            }
            store.insert_user(user);
            Ok(())
        })
        .await
    }

    /// Log + insert a new listing under the creation gate.
    pub(super) async fn commit_new_listing(&self, listing: Listing) -> Result<(), EngineError> {
        let gate = self.creation_gate.clone().read_owned().await;
        let wal = self.wal.clone();
        let store = self.store.clone();
        let notify = self.notify.clone();
        detached(async move {
            let _gate = gate;
            let event = Event::ListingCreated { listing: listing.clone() };
            append(&wal, &event).await?;
            let id = listing.id;
            store.insert_listing(listing);
            metrics::gauge!(observability::LISTINGS_LOADED).set(store.listing_count() as f64);
            notify.send(id, &event);
            Ok(())
        })
        .await
    }

    // ── Lock helpers ─────────────────────────────────────────

    pub(super) async fn listing_write(
        &self,
        ctx: &RequestContext,
        listing_id: &Ulid,
    ) -> Result<ListingWrite, EngineError> {
        let ls = self
            .store
            .get_listing(listing_id)
            .ok_or(EngineError::NotFound(*listing_id))?;
        ctx.guard(ls.write_owned()).await
    }

    pub(super) async fn listing_read(
        &self,
        ctx: &RequestContext,
        listing_id: &Ulid,
    ) -> Result<OwnedRwLockReadGuard<ListingState>, EngineError> {
        let ls = self
            .store
            .get_listing(listing_id)
            .ok_or(EngineError::NotFound(*listing_id))?;
        ctx.guard(ls.read_owned()).await
    }

    pub(super) async fn user_write(
        &self,
        ctx: &RequestContext,
        user_id: &Ulid,
    ) -> Result<UserWrite, EngineError> {
        let user = self
            .store
            .get_user(user_id)
            .ok_or(EngineError::NotFound(*user_id))?;
        ctx.guard(user.write_owned()).await
    }

    /// Snapshot of a user.
    pub(super) async fn load_user(
        &self,
        ctx: &RequestContext,
        user_id: &Ulid,
    ) -> Result<User, EngineError> {
        let user = self
            .store
            .get_user(user_id)
            .ok_or(EngineError::NotFound(*user_id))?;
        let guard = ctx.guard(user.read_owned()).await?;
        Ok(guard.clone())
    }

    /// The acting user must exist and not be banned. The system actor always passes.
    /// Takes only a user read lock, so call it before any listing lock.
    pub(super) async fn check_actor(
        &self,
        ctx: &RequestContext,
        actor: &ActingUser,
    ) -> Result<(), EngineError> {
        if actor.is_system() {
            return Ok(());
        }
        match self.load_user(ctx, &actor.id).await {
            Ok(user) if user.banned => Err(EngineError::Unauthorized("acting user is banned")),
            Ok(_) => Ok(()),
            Err(EngineError::NotFound(_)) => Err(EngineError::Unauthorized("unknown acting user")),
            Err(e) => Err(e),
        }
    }

    /// Booking id → write guard on its listing.
    pub(super) async fn booking_listing_write(
        &self,
        ctx: &RequestContext,
        booking_id: &Ulid,
    ) -> Result<ListingWrite, EngineError> {
        let listing_id = self
            .store
            .listing_for_booking(booking_id)
            .ok_or(EngineError::NotFound(*booking_id))?;
        self.listing_write(ctx, &listing_id).await
    }

    // ── Compaction ───────────────────────────────────────────

    /// Rewrite the log as the minimal event set that recreates the current state.
    ///
    /// Holds the creation gate and a read guard on every user and listing until the
    /// rewritten log is in place, so no commit can land between snapshot and swap.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.creation_gate.write().await;
        let mut events = Vec::new();

        let mut user_guards = Vec::new();
        for id in self.store.user_ids() {
            if let Some(user) = self.store.get_user(&id) {
                let guard = user.read_owned().await;
                events.push(Event::UserRegistered { user: guard.clone() });
                user_guards.push(guard);
            }
        }
        let mut listing_guards = Vec::new();
        for id in self.store.listing_ids() {
            let Some(ls) = self.store.get_listing(&id) else { continue };
            let guard = ls.read_owned().await;
            events.push(Event::ListingCreated {
                listing: guard.listing.clone(),
            });
            if !guard.calendar.is_empty() {
                events.push(Event::CalendarUpserted {
                    listing_id: id,
                    entries: guard.calendar.values().cloned().collect(),
                });
            }
            for booking in &guard.bookings {
                events.push(Event::BookingCreated {
                    booking: booking.clone(),
                });
            }
            listing_guards.push(guard);
        }

        let count = events.len();
        self.wal.compact(events).await.map_err(|e| EngineError::Storage {
            op: "compact",
            id: Ulid::nil(),
            message: e.to_string(),
        })?;
        tracing::info!(events = count, "log compacted");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        self.wal.appends_since_compact().await
    }
}
