//! The credential refresh engine: one `InstanceRefresher` per instance,
//! each running a background scheduling loop that keeps a resolved
//! `InstanceData` (metadata + ephemeral certificate + TLS config) on hand
//! and refreshes it on a fixed lead time before expiry.
//!
//! The scheduling shape — a `tokio::select!` over a cancellation token and
//! a sleep, spawned once and run for the task's lifetime — follows
//! `TokenRefreshService::run`/`tick` in `src/token_refresh.rs`.
//! The resolved-value-behind-a-watch-channel state machine follows
//! `CertificateState`/`CaClient` in
//! `examples/other_examples/ee62903e_agentgateway-agentgateway__crates-agentgateway-src-control-caclient.rs.rs`
//! (`NotReady`/`Available`/`Error`, `rx.changed()`-driven waiters, a
//! `run_fetcher` backoff loop) — reimplemented here with
//! `tokio::sync::watch` + a per-instance `tokio::sync::Mutex` guarding the
//! rate-limited force-refresh path, rather than that file's raw futures.
//!
//! Every `SlotState` is stamped with the *generation* of the target it
//! satisfies. `forceRefresh()` bumps a shared generation counter before
//! notifying the scheduler; `currentData()` snapshots the counter at entry
//! and will not return a value stamped with an older generation, which is
//! what gives "block-until-next handoff" its actual
//! blocking behavior — a reader that calls in after a force is accepted
//! waits for that specific refresh, not whatever was already resolved.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::sync::{watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::admin_api::AdminApiClient;
use crate::config::ConnectorConfig;
use crate::error::ConnectorError;
use crate::instance_name::InstanceName;
use crate::keys::KeyPairSource;
use crate::metadata::{EphemeralCertificate, InstanceData, InstanceMetadata};
use crate::tls::TlsContextBuilder;

/// The resolved state of a refresh slot at a point in time, tagged with the
/// generation it was produced to satisfy.
#[derive(Clone)]
enum SlotState {
    /// No successful refresh has completed yet; `currentData()` callers
    /// block until this transitions.
    Initializing,
    Ready(Arc<InstanceData>, u64),
    /// The most recent refresh attempt failed and no previous value exists
    /// to fall back to, or the failure itself is what the awaited
    /// generation resolved to.
    Failed(Arc<ConnectorError>, u64),
}

impl SlotState {
    fn generation(&self) -> Option<u64> {
        match self {
            SlotState::Initializing => None,
            SlotState::Ready(_, gen) | SlotState::Failed(_, gen) => Some(*gen),
        }
    }
}

/// Running counters for one instance's refresh attempts, exposed mainly for
/// tests and diagnostics; production observability goes through `metrics`.
#[derive(Default)]
pub struct RefreshStats {
    pub attempts: AtomicU64,
    pub successes: AtomicU64,
    pub failures: AtomicU64,
    pub forced: AtomicU64,
}

/// A per-instance background credential refresh engine.
///
/// Construct via [`crate::registry::InstanceRegistry::get_or_create`] rather
/// than directly, so that at most one engine ever runs per instance name.
pub struct InstanceRefresher {
    name: InstanceName,
    current: watch::Receiver<SlotState>,
    target_generation: Arc<AtomicU64>,
    refresh_notify: Arc<Notify>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
    last_force: Mutex<Option<Instant>>,
    stats: Arc<RefreshStats>,
}

struct SchedulerContext {
    name: InstanceName,
    admin: Arc<dyn AdminApiClient>,
    config: Arc<ConnectorConfig>,
    keys: Arc<KeyPairSource>,
    stats: Arc<RefreshStats>,
    target_generation: Arc<AtomicU64>,
}

impl InstanceRefresher {
    /// Builds and starts a refresher for `name`. The background task begins
    /// its first refresh immediately; `currentData()` blocks until it
    /// resolves, per the "initial `current` wired directly to initial
    /// `next`" design decision — there is no separate never-written
    /// placeholder state to special-case.
    pub(crate) fn spawn(
        name: InstanceName,
        admin: Arc<dyn AdminApiClient>,
        config: Arc<ConnectorConfig>,
        keys: Arc<KeyPairSource>,
    ) -> Arc<Self> {
        let (tx, rx) = watch::channel(SlotState::Initializing);
        let cancel = CancellationToken::new();
        let refresh_notify = Arc::new(Notify::new());
        let stats = Arc::new(RefreshStats::default());
        let target_generation = Arc::new(AtomicU64::new(0));

        let ctx = SchedulerContext {
            name: name.clone(),
            admin,
            config,
            keys,
            stats: stats.clone(),
            target_generation: target_generation.clone(),
        };
        let task_cancel = cancel.clone();
        let task_notify = refresh_notify.clone();
        let handle = tokio::spawn(run_scheduler(ctx, tx, task_cancel, task_notify));

        Arc::new(InstanceRefresher {
            name,
            current: rx,
            target_generation,
            refresh_notify,
            cancel,
            task: Mutex::new(Some(handle)),
            last_force: Mutex::new(None),
            stats,
        })
    }

    pub fn instance_name(&self) -> &InstanceName {
        &self.name
    }

    pub fn stats(&self) -> &RefreshStats {
        &self.stats
    }

    /// Returns the current resolved `InstanceData`, waiting for the first
    /// refresh to complete if one hasn't yet, and — if a `forceRefresh()`
    /// was accepted before this call — waiting for that specific refresh
    /// rather than returning whatever was already resolved.
    pub async fn current_data(&self) -> Result<Arc<InstanceData>, ConnectorError> {
        let target = self.target_generation.load(Ordering::SeqCst);
        let mut rx = self.current.clone();
        loop {
            {
                let state = rx.borrow();
                match (&*state, state.generation()) {
                    (SlotState::Ready(data, _), Some(gen)) if gen >= target => {
                        return Ok(data.clone())
                    }
                    (SlotState::Failed(err, _), Some(gen)) if gen >= target => {
                        return Err((**err).clone())
                    }
                    _ => {}
                }
            }
            if rx.changed().await.is_err() {
                return Err(ConnectorError::Transient {
                    instance: self.name.as_str().to_string(),
                    message: "refresh task ended before producing a result".to_string(),
                });
            }
        }
    }

    /// Requests an out-of-band refresh, rate-limited to at most one
    /// successful trigger per `force_refresh_min_interval_seconds`. Does
    /// not itself wait for the refresh to complete; any `currentData()`
    /// call made after this returns will block until that specific refresh
    /// resolves.
    pub async fn force_refresh(&self, config: &ConnectorConfig) -> Result<(), ConnectorError> {
        let mut last = self.last_force.lock().await;
        let min_interval = Duration::from_secs(config.force_refresh_min_interval_seconds);
        if let Some(prev) = *last {
            if prev.elapsed() < min_interval {
                metrics::counter!("instance_force_refresh_denied_total", "instance" => self.name.as_str().to_string()).increment(1);
                return Err(ConnectorError::Transient {
                    instance: self.name.as_str().to_string(),
                    message: format!(
                        "forceRefresh denied: called again within {:?} of the previous call",
                        min_interval
                    ),
                });
            }
        }
        *last = Some(Instant::now());
        drop(last);
        self.stats.forced.fetch_add(1, Ordering::Relaxed);
        // Bump the generation before notifying: any currentData() call that
        // observes this increment (i.e. any call after this method returns)
        // will refuse to resolve against a state stamped with an older
        // generation, even if one is already sitting in the channel.
        self.target_generation.fetch_add(1, Ordering::SeqCst);
        self.refresh_notify.notify_one();
        Ok(())
    }

    /// Cancels the background scheduling task. Idempotent.
    pub async fn close(&self) {
        self.cancel.cancel();
        if let Some(handle) = self.task.lock().await.take() {
            let _ = handle.await;
        }
    }
}

async fn run_scheduler(
    ctx: SchedulerContext,
    tx: watch::Sender<SlotState>,
    cancel: CancellationToken,
    notify: Arc<Notify>,
) {
    loop {
        // Snapshot the generation this cycle is servicing before doing any
        // I/O, so a forceRefresh() that arrives mid-cycle is not silently
        // absorbed by the cycle already in flight — it bumps the counter
        // again and the loop picks it up on the next iteration.
        let generation = ctx.target_generation.load(Ordering::SeqCst);
        let attempt_started = Instant::now();
        ctx.stats.attempts.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("instance_refresh_attempts_total", "instance" => ctx.name.as_str().to_string()).increment(1);

        let this_cycle_failed = match perform_refresh(&ctx).await {
            Ok(data) => {
                ctx.stats.successes.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("instance_refresh_success_total", "instance" => ctx.name.as_str().to_string()).increment(1);
                metrics::histogram!("instance_refresh_latency_ms", "instance" => ctx.name.as_str().to_string())
                    .record(attempt_started.elapsed().as_millis() as f64);
                info!(instance = %ctx.name, "instance credential refresh succeeded");

                let _ = tx.send(SlotState::Ready(Arc::new(data), generation));
                false
            }
            Err(err) => {
                ctx.stats.failures.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("instance_refresh_failure_total", "instance" => ctx.name.as_str().to_string()).increment(1);
                warn!(instance = %ctx.name, error = %err, "instance credential refresh failed");

                // Keep serving the last good value on a routine scheduled
                // retry (no force is pending beyond what's already
                // published). But if this cycle exists to satisfy a
                // generation newer than what's published — the first
                // attempt ever, or a forceRefresh() that arrived mid-flight
                // — publish the failure so blocked callers observe it
                // instead of waiting forever for data that never arrives.
                let previous_generation = tx.borrow().generation();
                let satisfies_pending_target = previous_generation.is_none_or(|g| generation > g);
                if satisfies_pending_target {
                    let _ = tx.send(SlotState::Failed(Arc::new(err), generation));
                }
                true
            }
        };

        // §4.1/§7: a failed refresh cycle is followed at delay 0 rather than
        // waiting out the full lead time, regardless of whether the failure
        // was transient or permanent — the scheduler never silently settles
        // into the 55-minute cadence on a broken instance. This is keyed off
        // what *this* cycle did, not off the published slot state: a routine
        // failure that retains good prior data never publishes `Failed` (see
        // `satisfies_pending_target` above), so reading the slot here would
        // wrongly see `Ready` and wait out the full lead time instead of
        // retrying immediately.
        let wait = if this_cycle_failed {
            Duration::ZERO
        } else {
            jittered(Duration::from_secs(ctx.config.refresh_lead_seconds))
        };

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(wait) => {}
            _ = notify.notified() => {
                // A forced refresh collapses whatever follow-on timer was
                // pending; the loop restarts immediately instead of racing
                // the just-cancelled sleep against a second one.
            }
        }
    }
}

/// Adds up to 10% positive jitter to `base`, spreading concurrent
/// instances' refreshes instead of having them all wake in lockstep.
fn jittered(base: Duration) -> Duration {
    let jitter_ms = rand::thread_rng().gen_range(0..=(base.as_millis() as u64 / 10).max(1));
    base + Duration::from_millis(jitter_ms)
}

async fn perform_refresh(ctx: &SchedulerContext) -> Result<InstanceData, ConnectorError> {
    let instance_str = ctx.name.as_str().to_string();
    let timeout = Duration::from_millis(ctx.config.admin_api_timeout_ms);

    let key_pair = ctx
        .keys
        .get_or_init()
        .map_err(|e| ConnectorError::Crypto {
            instance: instance_str.clone(),
            message: e.to_string(),
        })?;
    let public_key_pem = key_pair
        .public_key_pem()
        .map_err(|e| ConnectorError::Crypto {
            instance: instance_str.clone(),
            message: e.to_string(),
        })?;

    let (metadata_resp, cert_resp) = tokio::try_join!(
        tokio::time::timeout(timeout, ctx.admin.get_instance(&ctx.name)),
        tokio::time::timeout(
            timeout,
            ctx.admin
                .create_ephemeral_certificate(&ctx.name, &public_key_pem)
        ),
    )
    .map_err(|_| ConnectorError::Transient {
        instance: instance_str.clone(),
        message: format!("control-plane request timed out after {timeout:?}"),
    })?;

    let metadata_resp = metadata_resp.map_err(|e| classify_admin_error(&instance_str, &ctx.name, e))?;
    let cert_resp = cert_resp.map_err(|e| classify_admin_error(&instance_str, &ctx.name, e))?;

    let metadata = InstanceMetadata::from_response(&ctx.name, metadata_resp)?;
    let certificate = EphemeralCertificate::from_response(&instance_str, cert_resp)?;
    let tls_config = TlsContextBuilder::build(&instance_str, &metadata, &certificate, &key_pair)?;

    Ok(InstanceData::new(metadata, certificate, tls_config))
}

fn classify_admin_error(
    instance_str: &str,
    name: &InstanceName,
    err: Box<dyn std::error::Error + Send + Sync>,
) -> ConnectorError {
    if let Some(admin_err) = err.downcast_ref::<crate::admin_api::AdminApiError>() {
        return crate::error::ErrorClassifier::classify(
            &admin_err.reason,
            name.project_id(),
            instance_str,
            &admin_err.message,
        );
    }
    ConnectorError::Transient {
        instance: instance_str.to_string(),
        message: err.to_string(),
    }
}
