use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use chrono::{Datelike, Days, NaiveDate, Weekday};
use ulid::Ulid;

use staybook::engine::{CalendarEdit, Engine, EngineError, NewListing, RequestContext};
use staybook::model::*;
use staybook::notify::NotifyHub;

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    if latencies.is_empty() {
        println!("  {label}: no samples");
        return;
    }
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies[latencies.len() - 1].as_secs_f64() * 1000.0,
    );
}

fn night(base: NaiveDate, offset: u64) -> NaiveDate {
    base.checked_add_days(Days::new(offset)).expect("date in range")
}

struct Setup {
    engine: Arc<Engine>,
    listings: Vec<Ulid>,
    guests: Vec<ActingUser>,
    start: NaiveDate,
}

async fn setup(n_listings: usize, n_guests: usize) -> Setup {
    let dir = std::env::temp_dir().join(format!("staybook_bench_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).expect("create bench dir");
    let engine = Engine::new(dir.join("bench.wal"), Arc::new(NotifyHub::new())).expect("open engine");
    let ctx = RequestContext::background();
    let start = night(engine.today(), 1);

    let host = engine
        .register_user(&ctx, "bench-host@example.com", None, Role::Host)
        .await
        .expect("register host");
    let host = ActingUser::new(host.id, host.role);

    let mut listings = Vec::with_capacity(n_listings);
    for i in 0..n_listings {
        let fields = NewListing {
            title: format!("Listing {i}"),
            description: String::new(),
            price_per_day: 10_000 + i as Cents,
            min_stay_days: 1,
            max_stay_days: 14,
            address: Address::default(),
            image_ids: Vec::new(),
        };
        let l = engine.create_listing(&ctx, &host, host.id, fields).await.expect("create listing");
        engine
            .set_listing_status(&ctx, &host, l.id, ListingStatus::Published)
            .await
            .expect("publish");
        // Weekend surcharge over the booking window.
        let edits = (0..700)
            .map(|d| night(start, d))
            .filter(|d| d.weekday() == Weekday::Sat)
            .map(|date| CalendarEdit { date, is_available: true, price_override: Some(15_000) })
            .collect();
        engine
            .upsert_calendar(&ctx, &host, l.id, edits)
            .await
            .expect("calendar");
        listings.push(l.id);
    }

    let mut guests = Vec::with_capacity(n_guests);
    for i in 0..n_guests {
        let g = engine
            .register_user(&ctx, &format!("bench-guest{i}@example.com"), None, Role::Guest)
            .await
            .expect("register guest");
        guests.push(ActingUser::new(g.id, g.role));
    }
    println!("  created {} listings, {} guests", listings.len(), guests.len());

    Setup {
        engine: Arc::new(engine),
        listings,
        guests,
        start,
    }
}

async fn phase1_sequential(s: &Setup) {
    let ctx = RequestContext::background();
    let guest = s.guests[0];
    let listing_id = s.listings[0];
    let n = 600;
    let mut latencies = Vec::with_capacity(n);
    let started = Instant::now();

    for i in 0..n as u64 {
        let t = Instant::now();
        s.engine
            .request_booking(&ctx, &guest, listing_id, guest.id, night(s.start, i), night(s.start, i + 1))
            .await
            .expect("sequential booking");
        latencies.push(t.elapsed());
    }

    let elapsed = started.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} bookings in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("admission latency", &mut latencies);
}

/// Many guests fighting over the same nights: most requests lose with `Overlap`.
async fn phase2_contention(s: &Setup) {
    let listing_id = s.listings[1];
    let admitted = Arc::new(AtomicUsize::new(0));
    let overlaps = Arc::new(AtomicUsize::new(0));
    let started = Instant::now();

    let mut handles = Vec::new();
    for (i, guest) in s.guests.iter().copied().enumerate() {
        let engine = s.engine.clone();
        let admitted = admitted.clone();
        let overlaps = overlaps.clone();
        let base = s.start;
        handles.push(tokio::spawn(async move {
            let ctx = RequestContext::background();
            for j in 0..50u64 {
                let from = night(base, (i as u64 + j * 3) % 200);
                let to = night(from, 1 + j % 4);
                match engine.request_booking(&ctx, &guest, listing_id, guest.id, from, to).await {
                    Ok(_) => admitted.fetch_add(1, Ordering::Relaxed),
                    Err(EngineError::Overlap(_)) => overlaps.fetch_add(1, Ordering::Relaxed),
                    Err(e) => panic!("unexpected admission error: {e}"),
                };
            }
        }));
    }
    for h in handles {
        h.await.expect("contention task");
    }

    let elapsed = started.elapsed();
    let total = admitted.load(Ordering::Relaxed) + overlaps.load(Ordering::Relaxed);
    println!(
        "  {total} requests in {:.2}s: {} admitted, {} overlaps ({:.0} req/sec)",
        elapsed.as_secs_f64(),
        admitted.load(Ordering::Relaxed),
        overlaps.load(Ordering::Relaxed),
        total as f64 / elapsed.as_secs_f64()
    );
}

/// Quote latency on listings that are concurrently being booked.
async fn phase3_quotes_under_load(s: &Setup) {
    let stop = Arc::new(AtomicBool::new(false));
    let mut writers = Vec::new();
    for (w, guest) in s.guests.iter().copied().take(4).enumerate() {
        let engine = s.engine.clone();
        let stop = stop.clone();
        let listing_id = s.listings[2 + w % (s.listings.len() - 2)];
        let base = s.start;
        writers.push(tokio::spawn(async move {
            let ctx = RequestContext::background();
            let mut i = 0u64;
            while !stop.load(Ordering::Relaxed) && i < 600 {
                let from = night(base, i);
                let _ = engine
                    .request_booking(&ctx, &guest, listing_id, guest.id, from, night(from, 1))
                    .await;
                i += 1;
            }
        }));
    }

    let mut readers = Vec::new();
    for r in 0..8u64 {
        let engine = s.engine.clone();
        let listings = s.listings.clone();
        let base = s.start;
        readers.push(tokio::spawn(async move {
            let ctx = RequestContext::background();
            let mut latencies = Vec::with_capacity(500);
            for i in 0..500u64 {
                let listing_id = listings[(i as usize) % listings.len()];
                let from = night(base, 300 + (r * 13 + i) % 300);
                let t = Instant::now();
                let _ = engine.quote(&ctx, &ActingUser::system(), listing_id, from, night(from, 7)).await;
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all = Vec::new();
    for h in readers {
        all.extend(h.await.expect("reader task"));
    }
    stop.store(true, Ordering::Relaxed);
    for h in writers {
        let _ = h.await;
    }
    print_latency("quote", &mut all);
}

async fn phase4_compaction(s: &Setup) {
    let appends = s.engine.wal_appends_since_compact().await;
    let started = Instant::now();
    s.engine.compact_wal().await.expect("compaction");
    println!(
        "  compacted {appends} appends in {:.2}ms",
        started.elapsed().as_secs_f64() * 1000.0
    );
}

#[tokio::main]
async fn main() {
    println!("=== staybook stress benchmark ===\n");

    println!("[setup]");
    let s = setup(10, 64).await;

    println!("\n[phase 1] sequential admission throughput");
    phase1_sequential(&s).await;

    println!("\n[phase 2] contended admission");
    phase2_contention(&s).await;

    println!("\n[phase 3] quote latency under write load");
    phase3_quotes_under_load(&s).await;

    println!("\n[phase 4] log compaction");
    phase4_compaction(&s).await;

    println!("\n=== done ===");
}
