use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::filter::{quality_is_good, ChangeFilter};
use crate::health::HealthMetrics;
use crate::sink::buffer::WriteBuffer;
use crate::sink::{Point, SinkClient};
use crate::source::{resolve, SourceClient, SourceSession};
use crate::value::normalize;

/// Engine state. Failures during `Polling` reads move to `Reconnecting`;
/// flush failures do not (the buffer absorbs them).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Connecting,
    Polling,
    Reconnecting { attempts: u32 },
    Stopped,
}

/// Drives connect → read → filter → buffer → flush → sleep on a fixed
/// interval, reconnecting with backoff when the source drops.
///
/// The engine is one task: tag state, the pending buffer and both session
/// handles have exactly one reader/writer. Cancellation is observed between
/// steps only, never pre-empting an in-flight read or flush.
pub struct PollLoop<C: SourceClient, K: SinkClient> {
    session: SourceSession<C>,
    sink: K,
    filter: ChangeFilter,
    buffer: WriteBuffer,
    tags: Vec<String>,
    state: State,
    cancel: CancellationToken,
    health: Option<Arc<HealthMetrics>>,

    interval: Duration,
    whitelist: Vec<String>,
    browse_root: String,
    measurement: String,
    source_label: String,
    machine_label: String,
    initial_backoff: Duration,
    max_backoff: Duration,
    pending_warn_threshold: usize,
}

impl<C: SourceClient, K: SinkClient> PollLoop<C, K> {
    /// Creates the engine from configuration and unconnected sessions.
    pub fn new(
        cfg: &Config,
        session: SourceSession<C>,
        sink: K,
        health: Option<Arc<HealthMetrics>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            session,
            sink,
            filter: ChangeFilter::new(cfg.change_tolerance),
            buffer: WriteBuffer::new(),
            tags: Vec::new(),
            state: State::Idle,
            cancel,
            health,
            interval: cfg.poll_interval,
            whitelist: cfg.tags.whitelist.clone(),
            browse_root: cfg.tags.browse_root.clone(),
            measurement: cfg.measurement.clone(),
            source_label: cfg.source_label.clone(),
            machine_label: cfg.machine_label.clone(),
            initial_backoff: cfg.reconnect.initial_backoff,
            max_backoff: cfg.reconnect.max_backoff,
            pending_warn_threshold: cfg.pending_warn_threshold,
        }
    }

    /// Runs until cancelled or a fatal startup failure.
    ///
    /// Startup failures (unreachable sink/source, empty tag resolution)
    /// propagate; once polling has started the loop only exits on the stop
    /// signal.
    pub async fn run(&mut self) -> Result<()> {
        self.state = State::Connecting;

        loop {
            if self.cancel.is_cancelled() {
                self.state = State::Stopped;
            }

            match self.state {
                State::Idle | State::Connecting => self.connect().await?,
                State::Polling => self.poll_cycle().await,
                State::Reconnecting { attempts } => self.reconnect(attempts).await,
                State::Stopped => break,
            }
        }

        self.shutdown().await;

        Ok(())
    }

    /// Establishes both sessions, resolves the poll set and registers the
    /// batch group. Every failure here is fatal.
    async fn connect(&mut self) -> Result<()> {
        // 1. Sink first, so a bad sink config fails before touching the source.
        self.sink.connect().await.context("connecting to sink")?;
        info!("connected to sink");

        // 2. Source session.
        self.session.connect().await.context("connecting to source")?;
        info!("connected to source");

        // 3. Resolve the poll set. Empty resolution aborts startup.
        self.tags = resolve::resolve(&self.whitelist, &self.browse_root, self.session.client())
            .await
            .context("resolving tags")?;

        // 4. Batch group (stale group teardown + priming read).
        self.session
            .prime(&self.tags)
            .await
            .context("creating batch group")?;

        if let Some(health) = &self.health {
            health.tags_polled.set(self.tags.len() as f64);
            health.source_connected.set(1.0);
        }

        info!(
            tags = self.tags.len(),
            interval = ?self.interval,
            "polling started",
        );

        self.state = State::Polling;

        Ok(())
    }

    /// One poll cycle: batch read, change detection, enqueue, flush, pace.
    async fn poll_cycle(&mut self) {
        let start = Instant::now();

        let rows = match self.session.read_group(&self.tags).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "batch read failed, reconnecting");
                if let Some(health) = &self.health {
                    health.read_failures.inc();
                    health.source_connected.set(0.0);
                }
                self.state = State::Reconnecting { attempts: 0 };
                return;
            }
        };

        // All points of a cycle share one wall-clock timestamp.
        let now = Utc::now();
        let mut points = Vec::new();

        for row in rows {
            let value = normalize(&row.value);

            if !self.filter.decide(&row.tag, value, &row.quality) {
                continue;
            }

            let Some(value) = value else { continue };

            let mut point =
                Point::new(&self.measurement, value, quality_is_good(&row.quality), now)
                    .with_tag("source", &self.source_label)
                    .with_tag("item", &row.tag);

            if !self.machine_label.is_empty() {
                point = point.with_tag("machine", &self.machine_label);
            }

            points.push(point);
        }

        if !points.is_empty() {
            debug!(points = points.len(), "changes detected");
        }

        if let Some(health) = &self.health {
            health.points_emitted.inc_by(points.len() as f64);
        }

        self.buffer.enqueue(points);

        match self.buffer.flush(&self.sink).await {
            Ok(0) => {}
            Ok(written) => {
                info!(points = written, "wrote points to sink");
                if let Some(health) = &self.health {
                    health.points_written.inc_by(written as f64);
                }
            }
            Err(e) => {
                warn!(
                    error = %e,
                    pending = self.buffer.pending(),
                    "sink write failed, points stay queued",
                );
                if let Some(health) = &self.health {
                    health.write_failures.inc();
                }
                if self.buffer.pending() >= self.pending_warn_threshold {
                    warn!(
                        pending = self.buffer.pending(),
                        threshold = self.pending_warn_threshold,
                        "pending backlog above threshold while the sink is down",
                    );
                }
            }
        }

        if let Some(health) = &self.health {
            health.cycles.inc();
            health.points_pending.set(self.buffer.pending() as f64);
            health.cycle_duration.observe(start.elapsed().as_secs_f64());
        }

        // Wall-clock pacing: a slow cycle shortens the sleep instead of
        // drifting; it never sleeps a negative duration.
        if let Some(remaining) = self.interval.checked_sub(start.elapsed()) {
            let cancel = self.cancel.clone();
            tokio::select! {
                _ = cancel.cancelled() => self.state = State::Stopped,
                _ = tokio::time::sleep(remaining) => {}
            }
        }
    }

    /// One reconnect attempt: drop the dead session, wait out the backoff,
    /// then re-establish the source session and batch group. Retries
    /// indefinitely.
    async fn reconnect(&mut self, attempts: u32) {
        if attempts == 0 {
            self.session.close_quietly().await;
        }

        let backoff = if attempts == 0 {
            self.initial_backoff
        } else {
            self.max_backoff
        };

        info!(attempts, backoff = ?backoff, "waiting before source reconnect");

        let cancel = self.cancel.clone();
        tokio::select! {
            _ = cancel.cancelled() => {
                self.state = State::Stopped;
                return;
            }
            _ = tokio::time::sleep(backoff) => {}
        }

        match self.session.reconnect(&self.tags).await {
            Ok(()) => {
                info!("source reconnected");
                if let Some(health) = &self.health {
                    health.reconnects.inc();
                    health.source_connected.set(1.0);
                }
                self.state = State::Polling;
            }
            Err(e) => {
                warn!(error = %e, attempts, "source reconnect failed");
                self.state = State::Reconnecting {
                    attempts: attempts.saturating_add(1),
                };
            }
        }
    }

    /// Best-effort teardown of both sessions. Never fails.
    async fn shutdown(&mut self) {
        self.session.close_quietly().await;

        if let Err(e) = self.sink.close().await {
            debug!(error = %e, "sink close failed");
        }

        if let Some(health) = &self.health {
            health.source_connected.set(0.0);
        }

        info!("poll loop stopped");
    }
}
