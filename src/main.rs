use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;
use wirestats::kv::RedisTransport;
use wirestats::{aggregator, Aggregator, Config, HistogramEngine, Reporter, StatsKvTransport};

mod handlers;
mod load_generator;
mod server;

/// Instrumented Redis client shared by the handlers and the load generator.
pub type KvClient = StatsKvTransport<RedisTransport>;

/// Shared application state available to every handler via `State<Arc<AppState>>`.
pub struct AppState {
    pub config: Config,

    pub kv: Arc<KvClient>,

    /// Transaction rollups fed by the statistics worker.
    pub aggregator: Arc<Aggregator>,

    /// Per-series counters and latency histograms.
    pub engine: Arc<HistogramEngine>,

    /// Flag checked by every load-generator worker on each iteration.
    pub load_running: Arc<AtomicBool>,

    /// Handle to the spawned load-generator task so we can await clean shutdown.
    pub load_handle: tokio::sync::Mutex<Option<tokio::task::JoinHandle<u64>>>,
}

impl AppState {
    /// Picks the upstream owning `key`.
    pub fn upstream_for(&self, key: &str) -> &str {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let idx = (hasher.finish() % self.config.upstreams.len() as u64) as usize;
        &self.config.upstreams[idx]
    }

    pub async fn stop_load(&self) {
        self.load_running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.load_handle.lock().await.take() {
            // the task may have already finished
            let _ = handle.await;
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("wirestats=info")),
        )
        .init();

    // ── 1. Configuration ─────────────────────────────────────────
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("wirestats: {err}");
            std::process::exit(1);
        }
    };

    // ── 2. Statistics pipeline ───────────────────────────────────
    let aggregator = Arc::new(Aggregator::with_log_history(config.log_history));
    let (feed, worker) = aggregator::spawn(aggregator.clone(), config.feed_capacity);
    let engine = Arc::new(HistogramEngine::new());
    let reporter = Reporter::new(engine.clone()).with_feed(feed);

    // ── 3. Build shared state ────────────────────────────────────
    let state = Arc::new(AppState {
        kv: Arc::new(StatsKvTransport::new(RedisTransport::new(), reporter.clone())),
        aggregator,
        engine,
        load_running: Arc::new(AtomicBool::new(false)),
        load_handle: tokio::sync::Mutex::new(None),
        config,
    });

    // ── 4. Build Axum router ─────────────────────────────────────
    let app = server::create_router(state.clone(), reporter);

    // ── 5. Bind & serve ──────────────────────────────────────────
    let addr = state.config.listen_addr.clone();
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err) => {
            eprintln!("wirestats: failed to bind {addr}: {err}");
            std::process::exit(1);
        }
    };

    info!(%addr, upstreams = ?state.config.upstreams, "server listening");

    if let Err(err) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        eprintln!("wirestats: server exited with error: {err}");
    }

    // ── 6. Drain ─────────────────────────────────────────────────
    state.stop_load().await;
    let processed = worker.shutdown().await;
    info!(processed, "statistics worker drained");
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        eprintln!("wirestats: failed to listen for ctrl-c: {err}");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
