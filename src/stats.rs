use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Lock-free gateway-wide performance counters.
#[derive(Debug)]
pub struct Stats {
    pub sessions_started: AtomicU64,
    pub sessions_ended: AtomicU64,
    pub chunks_ingested: AtomicU64,
    pub epd_events: AtomicU64,
    pub work_items_enqueued: AtomicU64,
    pub batches_sent: AtomicU64,
    pub batch_failures: AtomicU64,
    pub deliveries: AtomicU64,
    pub holes_skipped: AtomicU64,
    pub protocol_errors: AtomicU64,
}

impl Stats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sessions_started: AtomicU64::new(0),
            sessions_ended: AtomicU64::new(0),
            chunks_ingested: AtomicU64::new(0),
            epd_events: AtomicU64::new(0),
            work_items_enqueued: AtomicU64::new(0),
            batches_sent: AtomicU64::new(0),
            batch_failures: AtomicU64::new(0),
            deliveries: AtomicU64::new(0),
            holes_skipped: AtomicU64::new(0),
            protocol_errors: AtomicU64::new(0),
        })
    }

    #[inline(always)]
    pub fn record_session_started(&self) {
        self.sessions_started.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn record_session_ended(&self) {
        self.sessions_ended.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn record_chunk(&self) {
        self.chunks_ingested.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn record_epd_event(&self) {
        self.epd_events.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn record_work_item(&self) {
        self.work_items_enqueued.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn record_batch_sent(&self, failed: bool) {
        self.batches_sent.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.batch_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline(always)]
    pub fn record_delivery(&self) {
        self.deliveries.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn record_holes_skipped(&self, n: u64) {
        self.holes_skipped.fetch_add(n, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn record_protocol_error(&self) {
        self.protocol_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot and reset counters, return rates.
    pub fn snapshot_and_reset(&self, elapsed: Duration) -> StatsSnapshot {
        let secs = elapsed.as_secs_f64().max(0.001);

        StatsSnapshot {
            sessions_started: self.sessions_started.swap(0, Ordering::Relaxed),
            sessions_ended: self.sessions_ended.swap(0, Ordering::Relaxed),
            chunks_per_sec: (self.chunks_ingested.swap(0, Ordering::Relaxed) as f64) / secs,
            epd_events_per_sec: (self.epd_events.swap(0, Ordering::Relaxed) as f64) / secs,
            work_items_enqueued: self.work_items_enqueued.swap(0, Ordering::Relaxed),
            batches_sent: self.batches_sent.swap(0, Ordering::Relaxed),
            batch_failures: self.batch_failures.swap(0, Ordering::Relaxed),
            deliveries: self.deliveries.swap(0, Ordering::Relaxed),
            holes_skipped: self.holes_skipped.swap(0, Ordering::Relaxed),
            protocol_errors: self.protocol_errors.swap(0, Ordering::Relaxed),
        }
    }
}

#[derive(Debug)]
pub struct StatsSnapshot {
    pub sessions_started: u64,
    pub sessions_ended: u64,
    pub chunks_per_sec: f64,
    pub epd_events_per_sec: f64,
    pub work_items_enqueued: u64,
    pub batches_sent: u64,
    pub batch_failures: u64,
    pub deliveries: u64,
    pub holes_skipped: u64,
    pub protocol_errors: u64,
}

/// Background stats reporter task.
pub async fn stats_reporter(stats: Arc<Stats>, interval_secs: u64) {
    if interval_secs == 0 {
        // Stats disabled — park forever
        std::future::pending::<()>().await;
        return;
    }

    let interval = Duration::from_secs(interval_secs);
    let mut last = Instant::now();

    loop {
        tokio::time::sleep(interval).await;
        let now = Instant::now();
        let elapsed = now - last;
        last = now;

        let snap = stats.snapshot_and_reset(elapsed);
        tracing::info!(
            sessions_started = snap.sessions_started,
            sessions_ended = snap.sessions_ended,
            chunks_per_sec = format!("{:.0}", snap.chunks_per_sec),
            epd_events_per_sec = format!("{:.0}", snap.epd_events_per_sec),
            work_items = snap.work_items_enqueued,
            batches_sent = snap.batches_sent,
            batch_failures = snap.batch_failures,
            deliveries = snap.deliveries,
            holes_skipped = snap.holes_skipped,
            protocol_errors = snap.protocol_errors,
            "[STATS] gateway tick"
        );
    }
}
