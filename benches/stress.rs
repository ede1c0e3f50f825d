use std::time::{Duration, Instant};

use chrono::{Datelike, Duration as Days, NaiveDate, Weekday};
use tokio_postgres::{Config, NoTls};
use ulid::Ulid;

async fn connect(host: &str, port: u16) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(host)
        .port(port)
        .dbname(format!("bench_{}", Ulid::new()))
        .user("charter")
        .password("charter");

    let (client, conn) = config.connect(NoTls).await.expect("connect failed");
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            eprintln!("connection error: {e}");
        }
    });
    client
}

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
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
        latencies.last().unwrap().as_secs_f64() * 1000.0,
    );
}

/// The i-th two-day trip window that dodges Sundays, starting far enough
/// out to clear the lead-time rule for the life of this benchmark.
fn trip_window(i: usize) -> (NaiveDate, NaiveDate) {
    let mut dep = NaiveDate::from_ymd_opt(2031, 1, 6).unwrap();
    let mut produced = 0;
    loop {
        let ret = dep + Days::days(1);
        if dep.weekday() != Weekday::Sun && ret.weekday() != Weekday::Sun {
            if produced == i {
                return (dep, ret);
            }
            produced += 1;
        }
        dep += Days::days(2);
    }
}

async fn register_bus(client: &tokio_postgres::Client) -> Ulid {
    let id = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO buses (id, name, plate_no, capacity) VALUES ('{id}', 'Bench Bus', 'BCH-{:04}', 30)",
            plate_suffix(&id)
        ))
        .await
        .unwrap();
    id
}

fn plate_suffix(id: &Ulid) -> u16 {
    (id.0 % 10_000) as u16
}

fn admission_sql(bus: Ulid, dep: NaiveDate, ret: NaiveDate) -> String {
    let id = Ulid::new();
    let requester = Ulid::new();
    format!(
        "INSERT INTO reservations (id, requester_id, bus_id, purpose, destination, \
         departure_date, departure_time, return_date, return_time, passengers) \
         VALUES ('{id}', '{requester}', '{bus}', 'bench trip', 'proving grounds', \
         '{dep}', '08:00', '{ret}', '17:00', 12)"
    )
}

async fn phase1_sequential_admissions(host: &str, port: u16) {
    let client = connect(host, port).await;
    let bus = register_bus(&client).await;

    let n = 1000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        let (dep, ret) = trip_window(i);
        let t = Instant::now();
        client
            .batch_execute(&admission_sql(bus, dep, ret))
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!(
        "  {n} admissions in {:.2}s = {ops:.0} ops/sec",
        elapsed.as_secs_f64()
    );
    print_latency("admission latency", &mut latencies);
}

async fn phase2_concurrent_tenants(host: &str, port: u16) {
    let n_tasks = 10;
    let n_per_task = 200;

    let start = Instant::now();
    let mut handles = Vec::new();

    for _ in 0..n_tasks {
        let host = host.to_string();
        handles.push(tokio::spawn(async move {
            // Each task gets its own tenant (unique dbname from connect()).
            let client = connect(&host, port).await;
            let bus = register_bus(&client).await;
            for j in 0..n_per_task {
                let (dep, ret) = trip_window(j);
                client
                    .batch_execute(&admission_sql(bus, dep, ret))
                    .await
                    .unwrap();
            }
        }));
    }

    for h in handles {
        h.await.unwrap();
    }

    let elapsed = start.elapsed();
    let total = n_tasks * n_per_task;
    let ops = total as f64 / elapsed.as_secs_f64();
    println!(
        "  {n_tasks} tenants x {n_per_task} admissions = {total} total in {:.2}s = {ops:.0} ops/sec",
        elapsed.as_secs_f64()
    );
}

async fn phase3_contended_window(host: &str, port: u16) {
    // All tasks fight over the same tenant, bus and trip windows; exactly
    // one admission per window may win.
    let bus = Ulid::new();
    let tenant = format!("bench_contended_{}", Ulid::new());

    let n_tasks = 8;
    let n_windows = 100;

    let mut handles = Vec::new();
    let start = Instant::now();
    for _ in 0..n_tasks {
        let host = host.to_string();
        let tenant = tenant.clone();
        handles.push(tokio::spawn(async move {
            let mut config = Config::new();
            config
                .host(&host)
                .port(port)
                .dbname(&tenant)
                .user("charter")
                .password("charter");
            let (client, conn) = config.connect(NoTls).await.expect("connect failed");
            tokio::spawn(async move {
                let _ = conn.await;
            });

            // Bus may already exist in this shared tenant; ignore the error.
            let _ = client
                .batch_execute(&format!(
                    "INSERT INTO buses (id, name, plate_no, capacity) VALUES ('{bus}', 'Shared', 'SHR-001', 30)"
                ))
                .await;

            let mut granted = 0usize;
            let mut conflicts = 0usize;
            for i in 0..n_windows {
                let (dep, ret) = trip_window(i);
                match client.batch_execute(&admission_sql(bus, dep, ret)).await {
                    Ok(_) => granted += 1,
                    Err(e) if e.code().map(|c| c.code()) == Some("23P01") => conflicts += 1,
                    Err(e) => panic!("unexpected admission error: {e}"),
                }
            }
            (granted, conflicts)
        }));
    }

    let mut granted = 0;
    let mut conflicts = 0;
    for h in handles {
        let (g, c) = h.await.unwrap();
        granted += g;
        conflicts += c;
    }
    let elapsed = start.elapsed();

    println!(
        "  {n_tasks} tasks x {n_windows} contended windows in {:.2}s: {granted} granted, {conflicts} conflicts",
        elapsed.as_secs_f64()
    );
    assert_eq!(granted, n_windows, "each window must be granted exactly once");
}

async fn phase4_availability_reads(host: &str, port: u16) {
    let client = connect(host, port).await;
    let bus = register_bus(&client).await;

    for i in 0..200 {
        let (dep, ret) = trip_window(i);
        client
            .batch_execute(&admission_sql(bus, dep, ret))
            .await
            .unwrap();
    }

    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    for i in 0..n {
        let (dep, ret) = trip_window(i % 400);
        let t = Instant::now();
        client
            .simple_query(&format!(
                "SELECT * FROM availability WHERE bus_id = '{bus}' AND date = '{dep}' AND return_date = '{ret}'"
            ))
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }
    print_latency("availability latency", &mut latencies);
}

#[tokio::main]
async fn main() {
    let host = std::env::var("CHARTER_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("CHARTER_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(5433);

    println!("charter stress benchmark against {host}:{port}");

    println!("phase 1: sequential admissions, one bus");
    phase1_sequential_admissions(&host, port).await;

    println!("phase 2: concurrent tenants");
    phase2_concurrent_tenants(&host, port).await;

    println!("phase 3: contended windows, one bus");
    phase3_contended_window(&host, port).await;

    println!("phase 4: availability reads under data");
    phase4_availability_reads(&host, port).await;
}
