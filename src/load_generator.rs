use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use wirestats::{KvRequest, KvRoundTrip};

use crate::KvClient;

const KEY_SPACE: u32 = 10_000;

// ─── Public entry point ──────────────────────────────────────────

/// Spawns `concurrency` Tokio tasks that drive the instrumented Redis
/// client until the deadline or the `running` flag is set to false.
/// Returns the number of commands issued.
pub async fn run(
    running: Arc<AtomicBool>,
    kv: Arc<KvClient>,
    upstreams: Vec<String>,
    concurrency: u32,
    duration_secs: u64,
    read_pct: u8,
) -> u64 {
    let deadline = Instant::now() + Duration::from_secs(duration_secs);
    let upstreams = Arc::new(upstreams);

    info!(concurrency, duration_secs, read_pct, "load run started");

    let mut handles = Vec::with_capacity(concurrency as usize);

    for worker_id in 0..concurrency {
        let running = running.clone();
        let kv = kv.clone();
        let upstreams = upstreams.clone();

        handles.push(tokio::spawn(async move {
            worker(worker_id, running, kv, upstreams, deadline, read_pct).await
        }));
    }

    let mut total = 0;
    for h in handles {
        total += h.await.unwrap_or(0);
    }

    running.store(false, Ordering::SeqCst);
    info!(commands = total, "load run finished");
    total
}

// ─── Worker loop ─────────────────────────────────────────────────

async fn worker(
    id: u32,
    running: Arc<AtomicBool>,
    kv: Arc<KvClient>,
    upstreams: Arc<Vec<String>>,
    deadline: Instant,
    read_pct: u8,
) -> u64 {
    // Each worker gets its own deterministic RNG seeded uniquely.
    let mut rng = StdRng::seed_from_u64(1000 + id as u64);
    let mut issued = 0;

    while running.load(Ordering::Relaxed) && Instant::now() < deadline {
        let upstream = &upstreams[rng.gen_range(0..upstreams.len())];
        let key = format!("bench:{:05}", rng.gen_range(1..=KEY_SPACE));

        let req = if rng.gen_range(0u8..100) < read_pct {
            KvRequest::new(upstream.as_str(), "GET", [key])
        } else {
            let value = format!("v{:016x}", rng.gen::<u64>());
            KvRequest::new(upstream.as_str(), "SET", [key, value])
        };

        // Failures are already counted by the instrumentation; drain
        // successful replies so they are timed end to end.
        match kv.round_trip(req).await {
            Ok(res) => {
                let _ = res.collect().await;
            }
            Err(err) => {
                debug!(worker = id, error = %err, "load command failed");
                // avoid spinning against an unreachable upstream
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }
        issued += 1;
    }

    issued
}
