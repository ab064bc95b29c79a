//! Demo and benchmark runners for the warehouse simulation.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::catalog::Catalog;
use crate::config::SimConfig;
use crate::error::Result;
use crate::orders::{OrderRequest, OrderStatus};
use crate::types::RobotUpdate;
use crate::warehouse::Warehouse;

const DEMO_ORDERS: usize = 6;
// Generous upper bound; at demo speed orders settle well under a second.
const DEMO_MAX_WAIT_MS: u64 = 10_000;
const BENCH_MAX_WAIT_MS: u64 = 60_000;
const SETTLE_POLL_MS: u64 = 10;

/// Accelerated settings used by the demo when no config file is given.
pub fn demo_config() -> SimConfig {
    SimConfig {
        time_scale: 0.01,
        dispatch_interval_ms: 20,
        seed: Some(2432),
        ..SimConfig::default()
    }
}

/// Best-effort CPU user/system time snapshot (seconds) on Unix platforms.
#[cfg(unix)]
fn cpu_times_seconds() -> Option<(f64, f64)> {
    // SAFETY: rusage is plain old data; getrusage fills it in.
    let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::getrusage(libc::RUSAGE_SELF, &mut usage) };
    if rc != 0 {
        return None;
    }
    let seconds = |tv: libc::timeval| tv.tv_sec as f64 + tv.tv_usec as f64 / 1_000_000.0;
    Some((seconds(usage.ru_utime), seconds(usage.ru_stime)))
}

#[cfg(not(unix))]
fn cpu_times_seconds() -> Option<(f64, f64)> {
    None
}

/// Stand-in for the periodic dispatch trigger an outer layer would provide.
fn spawn_ticker(
    warehouse: Arc<Warehouse>,
    stop_flag: Arc<AtomicBool>,
    interval: Duration,
) -> std::io::Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("dispatch-ticker".to_string())
        .spawn(move || {
            while !stop_flag.load(Ordering::SeqCst) {
                warehouse.tick();
                thread::sleep(interval);
            }
        })
}

/// Poll until every order is terminal or `max_wait_ms` passes.
fn wait_until_settled(warehouse: &Warehouse, max_wait_ms: u64) -> bool {
    let max_wait = Duration::from_millis(max_wait_ms);
    let start = Instant::now();
    loop {
        if warehouse.is_settled() {
            return true;
        }
        if start.elapsed() >= max_wait {
            return false;
        }
        thread::sleep(Duration::from_millis(SETTLE_POLL_MS));
    }
}

fn counting_sink(counter: Arc<AtomicUsize>) -> impl Fn(RobotUpdate) + Send + Sync {
    move |update: RobotUpdate| {
        counter.fetch_add(1, Ordering::SeqCst);
        if let Ok(json) = serde_json::to_string(&update) {
            debug!("[UPDATE] {json}");
        }
    }
}

struct RunResult {
    robots: usize,
    orders: usize,
    elapsed_ms: f64,
    completed: usize,
    failed: usize,
    active: usize,
    updates: usize,
    collisions: usize,
}

fn run_orders(config: SimConfig, orders: usize, max_wait_ms: u64) -> Result<(RunResult, usize)> {
    let updates = Arc::new(AtomicUsize::new(0));
    let interval = config.dispatch_interval();
    let robots = config.robots;
    let warehouse = Arc::new(Warehouse::start(
        config,
        Catalog::sample(),
        Arc::new(counting_sink(Arc::clone(&updates))),
    )?);

    let mut created = 0;
    for _ in 0..orders {
        if warehouse.generate_order().is_some() {
            created += 1;
        }
    }
    // Intake must reject unknown products rather than queue them.
    let mut rejected = 0;
    let bogus = OrderRequest {
        customer_name: "Downtown Garage".to_string(),
        product_id: 0,
        requested_qty: 1,
        priority: None,
    };
    if let Err(err) = warehouse.create_order(bogus) {
        info!("[ORDER] rejected: {err}");
        rejected += 1;
    }

    let stop_flag = Arc::new(AtomicBool::new(false));
    let start = Instant::now();
    let ticker = spawn_ticker(Arc::clone(&warehouse), Arc::clone(&stop_flag), interval)
        .expect("failed to spawn dispatch ticker");
    let settled = wait_until_settled(&warehouse, max_wait_ms);
    let elapsed_ms = start.elapsed().as_millis() as f64;
    stop_flag.store(true, Ordering::SeqCst);
    ticker.join().expect("dispatch ticker panicked");
    warehouse.shutdown();
    if !settled {
        info!("[SIM] gave up waiting after {max_wait_ms}ms");
    }

    let result = RunResult {
        robots,
        orders: created,
        elapsed_ms,
        completed: warehouse.order_count(OrderStatus::Completed),
        failed: warehouse.order_count(OrderStatus::Failed),
        active: warehouse.active_orders().len(),
        updates: updates.load(Ordering::SeqCst),
        collisions: warehouse.collisions(),
    };
    Ok((result, rejected))
}

/// Run the default demo: a small fleet working through random orders.
pub fn run_demo(config: SimConfig) -> Result<()> {
    info!("[DEMO] start");
    let (result, rejected) = run_orders(config, DEMO_ORDERS, DEMO_MAX_WAIT_MS)?;
    info!("[DEMO] finished in {}ms", result.elapsed_ms);

    println!("DEMO SUMMARY");
    println!("robots={} orders_total={}", result.robots, result.orders);
    println!("orders_completed={}", result.completed);
    println!("orders_failed={}", result.failed);
    println!("orders_active={}", result.active);
    println!("rejected_orders={rejected}");
    println!("updates_published={}", result.updates);
    println!("collisions={}", result.collisions);
    Ok(())
}

/// Run one benchmark and print a CSV row.
pub fn run_benchmark(
    robots: Option<usize>,
    orders: Option<usize>,
    time_scale: Option<f64>,
    base: SimConfig,
) -> Result<()> {
    let config = SimConfig {
        robots: robots.unwrap_or(4),
        time_scale: time_scale.unwrap_or(0.001),
        dispatch_interval_ms: 5,
        ..base
    };
    let orders = orders.unwrap_or(40);
    if orders == 0 {
        eprintln!("benchmark error: orders must be > 0");
        return Ok(());
    }
    config.validate()?;

    let cpu_start = cpu_times_seconds();
    let (result, _) = run_orders(config, orders, BENCH_MAX_WAIT_MS)?;
    let (cpu_user, cpu_sys) = match (cpu_start, cpu_times_seconds()) {
        (Some((user_start, sys_start)), Some((user_end, sys_end))) => (
            format!("{:.4}", user_end - user_start),
            format!("{:.4}", sys_end - sys_start),
        ),
        _ => ("NA".to_string(), "NA".to_string()),
    };
    let throughput = if result.elapsed_ms > 0.0 {
        result.completed as f64 / (result.elapsed_ms / 1000.0)
    } else {
        0.0
    };

    println!(
        "robots,orders,elapsed_ms,throughput_orders_per_s,completed,failed,active,updates,collisions,cpu_user_s,cpu_sys_s"
    );
    println!(
        "{},{},{:.2},{:.2},{},{},{},{},{},{},{}",
        result.robots,
        result.orders,
        result.elapsed_ms,
        throughput,
        result.completed,
        result.failed,
        result.active,
        result.updates,
        result.collisions,
        cpu_user,
        cpu_sys
    );
    if result.active > 0 {
        eprintln!("# warning,unsettled_orders,{}", result.active);
    }
    Ok(())
}
