use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::engine::{Engine, RequestContext};
use crate::model::ActingUser;
use crate::observability;

/// Completes confirmed bookings once their checkout date has arrived.
/// Returns how many were completed.
pub async fn sweep_once(engine: &Engine) -> usize {
    let system = ActingUser::system();
    let ctx = RequestContext::background();
    let mut completed = 0;
    for booking_id in engine.collect_completable(engine.today()) {
        match engine.complete_booking(&ctx, &system, booking_id).await {
            Ok(_) => {
                completed += 1;
                metrics::counter!(observability::SWEPT_COMPLETIONS_TOTAL).increment(1);
                info!("completed booking {booking_id}");
            }
            // Cancelled or completed by someone else since collection.
            Err(e) => tracing::debug!("sweeper skip {booking_id}: {e}"),
        }
    }
    completed
}

/// Background task running `sweep_once` every `every` until `shutdown` fires.
pub async fn run_sweeper(engine: Arc<Engine>, every: Duration, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(every);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {
                sweep_once(&engine).await;
            }
        }
    }
}

/// Background task that rewrites the log once `threshold` appends accumulate.
pub async fn run_compactor(
    engine: Arc<Engine>,
    threshold: u64,
    every: Duration,
    shutdown: CancellationToken,
) {
    let mut interval = tokio::time::interval(every);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {
                let appends = engine.wal_appends_since_compact().await;
                if appends < threshold {
                    continue;
                }
                if let Err(e) = engine.compact_wal().await {
                    tracing::error!("compaction failed after {appends} appends: {e}");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{ManualClock, NewListing};
    use crate::model::*;
    use crate::notify::NotifyHub;
    use chrono::NaiveDate;
    use std::path::PathBuf;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("staybook_test_sweeper");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2030, 1, d).unwrap()
    }

    #[tokio::test]
    async fn sweeper_completes_stays_past_checkout() {
        let clock = Arc::new(ManualClock::at(day(1)));
        let engine = Engine::new(test_wal_path("sweep.wal"), Arc::new(NotifyHub::new()))
            .unwrap()
            .with_clock(clock.clone());
        let ctx = RequestContext::background();

        let host = engine.register_user(&ctx, "h@example.com", None, Role::Host).await.unwrap();
        let guest = engine.register_user(&ctx, "g@example.com", None, Role::Guest).await.unwrap();
        let host = ActingUser::new(host.id, host.role);
        let guest = ActingUser::new(guest.id, guest.role);
        let fields = NewListing {
            title: "Cabin".into(),
            description: String::new(),
            price_per_day: 1_000,
            min_stay_days: 1,
            max_stay_days: 7,
            address: Address::default(),
            image_ids: Vec::new(),
        };
        let l = engine.create_listing(&ctx, &host, host.id, fields).await.unwrap();
        engine
            .set_listing_status(&ctx, &host, l.id, ListingStatus::Published)
            .await
            .unwrap();

        let confirmed = engine
            .request_booking(&ctx, &guest, l.id, guest.id, day(3), day(5))
            .await
            .unwrap();
        engine.confirm_booking(&ctx, &host, confirmed.id).await.unwrap();
        let unconfirmed = engine
            .request_booking(&ctx, &guest, l.id, guest.id, day(5), day(6))
            .await
            .unwrap();

        assert_eq!(sweep_once(&engine).await, 0);
        clock.advance_days(10);
        assert_eq!(sweep_once(&engine).await, 1);

        let admin = ActingUser::system();
        let done = engine.get_booking(&ctx, &admin, confirmed.id).await.unwrap();
        assert_eq!(done.status, BookingStatus::Completed);
        let left = engine.get_booking(&ctx, &admin, unconfirmed.id).await.unwrap();
        assert_eq!(left.status, BookingStatus::Created);
        assert_eq!(sweep_once(&engine).await, 0);
    }

    #[tokio::test]
    async fn compactor_stops_on_shutdown() {
        let engine = Arc::new(
            Engine::new(test_wal_path("compactor.wal"), Arc::new(NotifyHub::new())).unwrap(),
        );
        let ctx = RequestContext::background();
        for i in 0..3 {
            engine
                .register_user(&ctx, &format!("u{i}@example.com"), None, Role::Guest)
                .await
                .unwrap();
        }
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(run_compactor(
            engine.clone(),
            2,
            Duration::from_millis(10),
            shutdown.clone(),
        ));

        tokio::time::timeout(Duration::from_secs(5), async {
            while engine.wal_appends_since_compact().await != 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        shutdown.cancel();
        task.await.unwrap();
    }
}
