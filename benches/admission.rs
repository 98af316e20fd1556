use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
use ulid::Ulid;

use deskbook::clock::FixedClock;
use deskbook::config::EngineConfig;
use deskbook::engine::Engine;
use deskbook::model::*;
use deskbook::observability;
use deskbook::settings;
use deskbook::store::{InMemoryStore, Repositories};

const NOW: Ms = 1_696_075_200_000; // 2023-09-30T12:00:00Z

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    if latencies.is_empty() {
        return;
    }
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.3}ms, p50={:.3}ms, p95={:.3}ms, p99={:.3}ms, max={:.3}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies[latencies.len() - 1].as_secs_f64() * 1000.0,
    );
}

struct Setup {
    store: Arc<InMemoryStore>,
    engine: Arc<Engine>,
    org: Ulid,
    spaces: Vec<Space>,
}

fn setup(n_spaces: usize) -> Setup {
    let store = Arc::new(InMemoryStore::new());
    let org = Ulid::new();
    let location = Location {
        id: Ulid::new(),
        org_id: org,
        name: "Bench".into(),
        timezone: "Europe/Berlin".into(),
        max_concurrent_bookings: 0,
    };
    store.put_location(location.clone());
    let spaces: Vec<Space> = (0..n_spaces)
        .map(|i| {
            let space = Space {
                id: Ulid::new(),
                location_id: location.id,
                name: format!("Desk {i}"),
                require_subject: false,
            };
            store.put_space(space.clone(), vec![], vec![]);
            space
        })
        .collect();
    store.set_int(org, settings::MAX_DAYS_IN_ADVANCE, 365);
    store.set_int(org, settings::MAX_BOOKINGS_PER_USER, 0);
    let engine = Engine::new(Repositories::from_store(store.clone()), EngineConfig::default())
        .with_clock(Arc::new(FixedClock::new(NOW)));
    println!("  created {} spaces", spaces.len());
    Setup { store, engine: Arc::new(engine), org, spaces }
}

fn slot(i: usize) -> (NaiveDateTime, NaiveDateTime) {
    let base = NaiveDate::from_ymd_opt(2023, 10, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or_default();
    let enter = base + TimeDelta::hours(i as i64);
    (enter, enter + TimeDelta::hours(1))
}

async fn phase1_sequential(s: &Setup) {
    let user = User { id: Ulid::new(), org_id: s.org, role: Role::User };
    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();
    for i in 0..n {
        let (enter, leave) = slot(i);
        let req = BookingRequest {
            space_id: s.spaces[0].id,
            enter,
            leave,
            subject: String::new(),
            on_behalf_of: None,
        };
        let t = Instant::now();
        if s.engine.create_booking(&user, req).await.is_ok() {
            latencies.push(t.elapsed());
        }
    }
    let elapsed = start.elapsed();
    println!(
        "  {} bookings in {:.2}s = {:.0} ops/sec",
        latencies.len(),
        elapsed.as_secs_f64(),
        latencies.len() as f64 / elapsed.as_secs_f64()
    );
    print_latency("admission latency", &mut latencies);
}

async fn phase2_contended(s: &Setup) {
    let n_tasks = 16;
    let n_per_task = 200;
    let start = Instant::now();
    let mut handles = Vec::new();
    for task in 0..n_tasks {
        let engine = s.engine.clone();
        let space_id = s.spaces[1 + task % (s.spaces.len() - 1)].id;
        let user = User { id: Ulid::new(), org_id: s.org, role: Role::User };
        handles.push(tokio::spawn(async move {
            let mut latencies = Vec::with_capacity(n_per_task);
            let mut conflicts = 0usize;
            for i in 0..n_per_task {
                let (enter, leave) = slot(i);
                let req = BookingRequest { space_id, enter, leave, subject: String::new(), on_behalf_of: None };
                let t = Instant::now();
                match engine.create_booking(&user, req).await {
                    Ok(_) => latencies.push(t.elapsed()),
                    Err(_) => conflicts += 1,
                }
            }
            (latencies, conflicts)
        }));
    }
    let mut all = Vec::new();
    let mut conflicts = 0;
    for h in handles {
        if let Ok((lat, c)) = h.await {
            all.extend(lat);
            conflicts += c;
        }
    }
    println!(
        "  {} accepted, {conflicts} rejected in {:.2}s",
        all.len(),
        start.elapsed().as_secs_f64()
    );
    print_latency("contended admission latency", &mut all);
}

async fn phase3_series(s: &Setup) {
    let user = User { id: Ulid::new(), org_id: s.org, role: Role::User };
    let (enter, leave) = slot(9);
    let req = RecurringRequest {
        space_id: s.spaces[s.spaces.len() - 1].id,
        enter,
        leave,
        end: enter + TimeDelta::days(300),
        cadence: Cadence::Daily { cycle: 1 },
        subject: String::new(),
        on_behalf_of: None,
    };
    let t = Instant::now();
    match s.engine.create_recurring(&user, req).await {
        Ok(outcome) => println!(
            "  series of {} instances ({} created) in {:.2}ms",
            outcome.results.len(),
            outcome.created(),
            t.elapsed().as_secs_f64() * 1000.0
        ),
        Err(e) => println!("  series failed: {e}"),
    }
}

#[tokio::main]
async fn main() {
    observability::install(&EngineConfig::from_env());
    println!("== admission bench ==");
    let s = setup(9);
    println!("-- phase 1: sequential, one space");
    phase1_sequential(&s).await;
    println!("-- phase 2: contended, 16 tasks over 8 spaces");
    phase2_contended(&s).await;
    println!("-- phase 3: 300-day daily series");
    phase3_series(&s).await;
    println!("  {} bookings stored", s.store.booking_count());
}
