use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use ulid::Ulid;

use salonbook::engine::{BookingChannel, BookingContext, Engine, NewAppointment};
use salonbook::model::*;
use salonbook::tenant::TenantManager;

/// 2030-01-01T00:00:00Z
const NOW: Ms = 1_893_456_000_000;
/// First bookable day.
const DAY0: Ms = NOW + DAY_MS;
const SLOTS_PER_DAY: i64 = 8;

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

/// Start of the `i`th hour-long slot: eight per day from 09:00, every day.
fn slot(i: i64) -> Ms {
    DAY0 + (i / SLOTS_PER_DAY) * DAY_MS + (9 + i % SLOTS_PER_DAY) * HOUR_MS
}

struct Salon {
    engine: Arc<Engine>,
    location: Ulid,
    service: Ulid,
    staff: Vec<Ulid>,
    client: Ulid,
}

impl Salon {
    async fn open(tenants: &TenantManager, tenant: &str, n_staff: usize) -> Self {
        let engine = tenants.get_or_create(tenant).expect("tenant");
        let location = Location {
            id: Ulid::new(),
            name: "Bench".into(),
            utc_offset_minutes: 0,
            auto_confirm: true,
            hours: [WeekdayHours::open(9 * 60, 17 * 60); 7],
        };
        let service = Service {
            id: Ulid::new(),
            name: "Cut".into(),
            duration_minutes: 60,
            price_cents: 4_000,
            is_active: true,
            online_booking_enabled: false,
            overrides: HashMap::new(),
        };
        let client = Client {
            id: Ulid::new(),
            name: "Bench Client".into(),
            email: None,
            phone: None,
        };
        engine.upsert_location(location.clone()).await.unwrap();
        engine.upsert_service(service.clone()).await.unwrap();
        engine.upsert_client(client.clone()).await.unwrap();

        let mut staff = Vec::with_capacity(n_staff);
        for n in 0..n_staff {
            let member = StaffMember {
                id: Ulid::new(),
                name: format!("Stylist {n}"),
                is_active: true,
                online_booking_enabled: false,
                service_ids: BTreeSet::from([service.id]),
                buffer_after_minutes: None,
            };
            engine.upsert_staff(member.clone()).await.unwrap();
            staff.push(member.id);
        }

        Self {
            engine,
            location: location.id,
            service: service.id,
            staff,
            client: client.id,
        }
    }

    fn request(&self, staff_id: Ulid, start: Ms) -> NewAppointment {
        NewAppointment {
            id: None,
            client_id: self.client,
            staff_id,
            service_id: self.service,
            location_id: self.location,
            start,
            notes: None,
            channel: BookingChannel::Staff,
        }
    }
}

async fn phase1_sequential(tenants: &TenantManager) {
    let salon = Salon::open(tenants, "bench_sequential", 1).await;
    let staff = salon.staff[0];
    let ctx = BookingContext::system();

    let n = 2000;
    let mut latencies = Vec::with_capacity(n as usize);
    let start = Instant::now();
    for i in 0..n {
        let t = Instant::now();
        salon
            .engine
            .create_appointment(salon.request(staff, slot(i)), &ctx)
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} bookings in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("write latency", &mut latencies);
}

/// Many tasks race for the same slots on one stylist; each slot must be
/// won exactly once.
async fn phase2_contention(tenants: &TenantManager) {
    let salon = Arc::new(Salon::open(tenants, "bench_contention", 1).await);
    let n_tasks = 10;
    let n_slots = 200;
    let won = Arc::new(AtomicUsize::new(0));
    let lost = Arc::new(AtomicUsize::new(0));

    let start = Instant::now();
    let mut handles = Vec::new();
    for _ in 0..n_tasks {
        let salon = salon.clone();
        let won = won.clone();
        let lost = lost.clone();
        handles.push(tokio::spawn(async move {
            let staff = salon.staff[0];
            for i in 0..n_slots {
                match salon
                    .engine
                    .create_appointment(salon.request(staff, slot(i)), &BookingContext::system())
                    .await
                {
                    Ok(_) => won.fetch_add(1, Ordering::Relaxed),
                    Err(_) => lost.fetch_add(1, Ordering::Relaxed),
                };
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let elapsed = start.elapsed();
    let won = won.load(Ordering::Relaxed);
    let lost = lost.load(Ordering::Relaxed);
    println!(
        "  {n_tasks} tasks x {n_slots} slots: {won} booked, {lost} rejected in {:.2}s",
        elapsed.as_secs_f64()
    );
    assert_eq!(won, n_slots as usize, "double booking detected");
}

async fn phase3_availability_under_load(tenants: &TenantManager) {
    let salon = Arc::new(Salon::open(tenants, "bench_reads", 6).await);
    let date = NaiveDate::from_ymd_opt(2030, 1, 2).unwrap();
    for i in 0..4 {
        salon
            .engine
            .create_appointment(salon.request(salon.staff[0], slot(i * 2)), &BookingContext::system())
            .await
            .unwrap();
    }

    // Writers book on their own stylists; readers query stylist 0.
    let stop = Arc::new(AtomicBool::new(false));
    let mut writers = Vec::new();
    for w in 1..salon.staff.len() {
        let salon = salon.clone();
        let stop = stop.clone();
        writers.push(tokio::spawn(async move {
            let staff = salon.staff[w];
            let mut i = 0;
            while !stop.load(Ordering::Relaxed) && i < 10_000 {
                let _ = salon
                    .engine
                    .create_appointment(salon.request(staff, slot(i)), &BookingContext::system())
                    .await;
                i += 1;
            }
        }));
    }

    let n_readers = 10;
    let reads_per_reader = 500;
    let mut readers = Vec::new();
    for _ in 0..n_readers {
        let salon = salon.clone();
        readers.push(tokio::spawn(async move {
            let mut latencies = Vec::with_capacity(reads_per_reader);
            for _ in 0..reads_per_reader {
                let t = Instant::now();
                let slots = salon
                    .engine
                    .list_available_slots(salon.staff[0], salon.service, date, salon.location)
                    .await
                    .unwrap();
                latencies.push(t.elapsed());
                assert!(!slots.is_empty());
            }
            latencies
        }));
    }

    let mut all = Vec::new();
    for h in readers {
        all.extend(h.await.unwrap());
    }
    stop.store(true, Ordering::Relaxed);
    for h in writers {
        let _ = h.await;
    }
    print_latency("availability query", &mut all);
}

async fn phase4_tenant_storm(tenants: Arc<TenantManager>) {
    let n_tenants = 50;
    let ops_per_tenant = 10;
    let success = Arc::new(AtomicUsize::new(0));

    let start = Instant::now();
    let mut handles = Vec::new();
    for t in 0..n_tenants {
        let tenants = tenants.clone();
        let success = success.clone();
        handles.push(tokio::spawn(async move {
            let salon = Salon::open(&tenants, &format!("bench_storm_{t}"), 1).await;
            for i in 0..ops_per_tenant {
                salon
                    .engine
                    .create_appointment(salon.request(salon.staff[0], slot(i)), &BookingContext::system())
                    .await
                    .unwrap();
            }
            success.fetch_add(1, Ordering::Relaxed);
        }));
    }
    for h in handles {
        let _ = h.await;
    }

    let ok = success.load(Ordering::Relaxed);
    println!(
        "  {n_tenants} tenants, {ops_per_tenant} bookings each: {ok}/{n_tenants} succeeded in {:.2}s",
        start.elapsed().as_secs_f64()
    );
}

#[tokio::main]
async fn main() {
    let dir = std::env::temp_dir().join(format!("salonbook_bench_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let tenants = Arc::new(TenantManager::new(dir.clone(), 100_000).with_clock(Arc::new(|| NOW)));

    println!("=== salonbook stress benchmark ===");
    println!("data_dir: {}\n", dir.display());

    println!("[phase 1] sequential booking throughput");
    phase1_sequential(&tenants).await;

    println!("\n[phase 2] contended booking");
    phase2_contention(&tenants).await;

    println!("\n[phase 3] availability latency under write load");
    phase3_availability_under_load(&tenants).await;

    println!("\n[phase 4] tenant storm");
    phase4_tenant_storm(tenants.clone()).await;

    println!("\n=== benchmark complete ===");
    let _ = std::fs::remove_dir_all(&dir);
}
