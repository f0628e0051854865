//! Worker pool that drains the reconciler queue.
//!
//! Each worker claims one `Queued` changeset at a time, plans it, executes
//! the plan and records the outcome. A separate task moves `Errored`
//! changesets back to `Queued` once their backoff has elapsed. Shutdown is a
//! `watch` flag; an attempt interrupted by it ends `Errored`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};

use armada_core::{
    config::ReconcilerConfig, Changeset, ChangesetId, ChangesetSpec, ReconcilerState, Repo,
    RepoOracle, Store, StoreError,
};
use armada_template::Renderer;

use crate::error::{io_err, HostError, ReconcilerError};
use crate::executor::Executor;
use crate::host::CodeHost;
use crate::plan::{determine_plan, transition, Plan, ReconcilerOperation, Trigger};

pub const DEFAULT_BASE_URL: &str = "http://localhost:3080";

/// Result of one reconcile attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Outcome {
    pub changeset_id: ChangesetId,
    pub state: ReconcilerState,
    pub operations: Vec<ReconcilerOperation>,
    pub num_failures: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Process until nothing is eligible, then return.
    Drain,
    /// Keep polling until ctrl-c.
    Serve,
}

/// Wall-clock time driven by tokio's clock; pausing tokio time pauses it.
#[derive(Debug, Clone, Copy)]
struct Clock {
    wall: DateTime<Utc>,
    mono: Instant,
}

impl Clock {
    fn start() -> Self {
        Self {
            wall: Utc::now(),
            mono: Instant::now(),
        }
    }

    fn now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.mono.elapsed())
            .unwrap_or_else(|_| chrono::Duration::zero());
        self.wall + elapsed
    }
}

/// Called after every recorded attempt and requeue, e.g. to persist the store.
pub type Checkpoint = Box<dyn Fn() -> Result<(), StoreError> + Send + Sync>;

struct Prepared {
    repo: Repo,
    spec: Option<ChangesetSpec>,
    plan: Plan,
}

pub struct Reconciler {
    store: Arc<dyn Store>,
    repos: Arc<dyn RepoOracle>,
    host: Arc<dyn CodeHost>,
    renderer: Renderer,
    config: ReconcilerConfig,
    base_url: String,
    clock: Clock,
    checkpoint: Option<Checkpoint>,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn Store>,
        repos: Arc<dyn RepoOracle>,
        host: Arc<dyn CodeHost>,
        config: ReconcilerConfig,
    ) -> Result<Self, ReconcilerError> {
        Ok(Self {
            store,
            repos,
            host,
            renderer: Renderer::new()?,
            config,
            base_url: DEFAULT_BASE_URL.to_string(),
            clock: Clock::start(),
            checkpoint: None,
        })
    }

    /// Base URL used for campaign backlinks in changeset bodies.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_checkpoint(
        mut self,
        checkpoint: impl Fn() -> Result<(), StoreError> + Send + Sync + 'static,
    ) -> Self {
        self.checkpoint = Some(Box::new(checkpoint));
        self
    }

    fn checkpoint(&self) -> Result<(), StoreError> {
        match &self.checkpoint {
            Some(checkpoint) => checkpoint(),
            None => Ok(()),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Claim and reconcile the next eligible changeset, if any.
    pub async fn reconcile_next(
        &self,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Option<Outcome>, ReconcilerError> {
        let Some(mut cs) = self.store.claim_next_queued(self.now())? else {
            return Ok(None);
        };
        let claimed = cs.clone();
        tracing::debug!(changeset = %cs.id, attempts = cs.num_failures, "claimed changeset");

        let (operations, result) = match self.prepare(&cs) {
            Ok(prepared) => {
                let executor = Executor {
                    store: self.store.as_ref(),
                    host: self.host.as_ref(),
                    renderer: &self.renderer,
                    base_url: &self.base_url,
                    timeout: self.config.host_timeout(),
                };
                let now = self.now();
                let result = tokio::select! {
                    result = executor.execute(
                        &mut cs,
                        &prepared.repo,
                        prepared.spec.as_ref(),
                        &prepared.plan,
                        now,
                    ) => result,
                    _ = cancelled(shutdown) => Err(HostError::Cancelled.into()),
                };
                (prepared.plan.ops(), result)
            }
            Err(err) => (Vec::new(), Err(err)),
        };

        let error = result.as_ref().err().map(ToString::to_string);
        self.record(&mut cs, result);
        let cs = self.store.record_attempt(&claimed, &cs)?;
        self.checkpoint()?;
        if cs.reconciler_state == ReconcilerState::Queued {
            tracing::debug!(changeset = %cs.id, "spec changed during attempt, requeued");
        }

        Ok(Some(Outcome {
            changeset_id: cs.id,
            state: cs.reconciler_state,
            operations,
            num_failures: cs.num_failures,
            error,
        }))
    }

    /// Reconcile until nothing is eligible. Errored changesets whose backoff
    /// has elapsed are requeued along the way.
    pub async fn drain(&self) -> Result<Vec<Outcome>, ReconcilerError> {
        let (_keep_open, shutdown) = watch::channel(false);
        let mut outcomes = Vec::new();
        loop {
            if !self.store.requeue_errored(self.now())?.is_empty() {
                self.checkpoint()?;
            }
            match self.reconcile_next(shutdown.clone()).await? {
                Some(outcome) => outcomes.push(outcome),
                None => break,
            }
        }
        Ok(outcomes)
    }

    /// Run `config.workers` workers plus the requeue task until `shutdown`
    /// flips to true.
    pub async fn run(
        self: Arc<Self>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(), ReconcilerError> {
        let workers = self.config.workers.max(1);
        tracing::info!(workers, max_attempts = self.config.max_attempts, "reconciler started");

        let mut handles = Vec::with_capacity(workers + 1);
        for worker in 0..workers {
            let this = self.clone();
            let shutdown = shutdown.clone();
            handles.push((
                "worker",
                tokio::spawn(async move { this.worker_task(worker, shutdown).await }),
            ));
        }
        {
            let this = self.clone();
            let shutdown = shutdown.clone();
            handles.push((
                "requeue",
                tokio::spawn(async move { this.requeue_task(shutdown).await }),
            ));
        }

        for (task, handle) in handles {
            handle_join(task, handle.await)?;
        }
        tracing::info!("reconciler stopped");
        Ok(())
    }

    async fn worker_task(
        &self,
        worker: usize,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), ReconcilerError> {
        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.reconcile_next(shutdown.clone()).await {
                Ok(Some(_)) => continue,
                Ok(None) => {}
                Err(err) => tracing::error!(worker, error = %err, "reconcile attempt failed"),
            }
            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval()) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        tracing::debug!(worker, "worker exiting");
        Ok(())
    }

    async fn requeue_task(
        &self,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), ReconcilerError> {
        let mut interval = tokio::time::interval(self.config.poll_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    match self.store.requeue_errored(self.now()) {
                        Ok(ids) if !ids.is_empty() => {
                            tracing::info!(count = ids.len(), "requeued errored changesets");
                            if let Err(err) = self.checkpoint() {
                                tracing::warn!(error = %err, "checkpoint failed");
                            }
                        }
                        Ok(_) => {}
                        Err(err) => tracing::warn!(error = %err, "requeue failed"),
                    }
                }
            }
        }
        Ok(())
    }

    fn prepare(&self, cs: &Changeset) -> Result<Prepared, ReconcilerError> {
        let repo = self
            .repos
            .get_accessible_repos(&[cs.repo_id])?
            .remove(&cs.repo_id)
            .ok_or_else(|| {
                ReconcilerError::invalid(cs.id, format!("repo {} is not accessible", cs.repo_id))
            })?;
        let spec = match &cs.current_spec_id {
            Some(id) => Some(self.store.get_changeset_spec(id)?),
            None => None,
        };
        let previous = match &cs.previous_spec_id {
            Some(id) => Some(self.store.get_changeset_spec(id)?),
            None => None,
        };
        let plan = determine_plan(cs, previous.as_ref(), spec.as_ref());
        tracing::debug!(
            changeset = %cs.id,
            ops = ?plan.ops(),
            changed = ?plan.delta.changed_fields(),
            "planned reconcile"
        );
        Ok(Prepared { repo, spec, plan })
    }

    /// Fold an attempt's result into the changeset's queue state.
    fn record(&self, cs: &mut Changeset, result: Result<(), ReconcilerError>) {
        let now = self.now();
        cs.updated_at = now;

        let err = match result {
            Ok(()) => {
                advance(cs, Trigger::Succeeded);
                cs.failure_message = None;
                cs.num_failures = 0;
                cs.process_after = None;
                tracing::info!(changeset = %cs.id, "changeset reconciled");
                return;
            }
            Err(err) => err,
        };
        cs.failure_message = Some(err.to_string());

        if err.is_cancelled() {
            advance(cs, Trigger::Cancelled);
            cs.process_after = Some(now);
            tracing::warn!(changeset = %cs.id, "reconcile cancelled by shutdown");
            return;
        }

        cs.num_failures += 1;
        if !err.is_retryable() {
            advance(cs, Trigger::TerminalFailure);
            cs.process_after = None;
            tracing::error!(changeset = %cs.id, error = %err, "reconcile failed permanently");
            return;
        }

        advance(cs, Trigger::RetryableFailure);
        if cs.num_failures >= self.config.max_attempts {
            advance(
                cs,
                Trigger::AttemptsExhausted {
                    attempts: cs.num_failures,
                    max_attempts: self.config.max_attempts,
                },
            );
        }
        if cs.reconciler_state == ReconcilerState::Failed {
            cs.process_after = None;
            tracing::warn!(
                changeset = %cs.id,
                attempts = cs.num_failures,
                error = %err,
                "changeset permanently failed after max attempts"
            );
        } else {
            let backoff = self.config.backoff(cs.num_failures);
            cs.process_after = Some(
                now + chrono::Duration::from_std(backoff)
                    .unwrap_or_else(|_| chrono::Duration::zero()),
            );
            tracing::warn!(
                changeset = %cs.id,
                attempts = cs.num_failures,
                backoff_secs = backoff.as_secs(),
                error = %err,
                "reconcile failed, will retry"
            );
        }
    }
}

fn advance(cs: &mut Changeset, trigger: Trigger) {
    match transition(cs.reconciler_state, trigger) {
        Some(next) => cs.reconciler_state = next,
        None => tracing::warn!(
            changeset = %cs.id,
            state = %cs.reconciler_state,
            ?trigger,
            "ignoring illegal reconciler transition"
        ),
    }
}

/// Resolves once `shutdown` is true. Never resolves if the sender is gone.
async fn cancelled(mut shutdown: watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Build a runtime, run `reconciler` in `mode` and block until it returns.
pub fn start_blocking(
    reconciler: Arc<Reconciler>,
    mode: RunMode,
) -> Result<Vec<Outcome>, ReconcilerError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(async move {
        match mode {
            RunMode::Drain => reconciler.drain().await,
            RunMode::Serve => serve(reconciler).await.map(|()| Vec::new()),
        }
    })
}

/// Run the pool until ctrl-c.
pub async fn serve(reconciler: Arc<Reconciler>) -> Result<(), ReconcilerError> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);

    let pool_handle = {
        let shutdown = shutdown_tx.clone();
        let shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            let result = reconciler.run(shutdown_rx).await;
            let _ = shutdown.send(true);
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        let mut shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown_rx.changed() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, shutting down reconciler");
                            let _ = shutdown.send(true);
                            Ok(())
                        }
                        Err(err) => Err(ReconcilerError::Protocol(format!(
                            "ctrl-c handler failed: {err}"
                        ))),
                    }
                }
            }
        })
    };

    let (pool_result, signal_result) = tokio::join!(pool_handle, signal_handle);
    handle_join("worker_pool", pool_result)?;
    handle_join("signal_handler", signal_result)?;
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), ReconcilerError>, tokio::task::JoinError>,
) -> Result<(), ReconcilerError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(ReconcilerError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::advance;

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn clock_follows_paused_time() {
        let clock = Clock::start();
        let before = clock.now();
        advance(Duration::from_secs(90)).await;
        assert_eq!(clock.now() - before, chrono::Duration::seconds(90));
    }

    #[test]
    fn cancelled_resolves_on_shutdown() {
        let (tx, rx) = watch::channel(false);
        let mut waiter = tokio_test::task::spawn(cancelled(rx));
        tokio_test::assert_pending!(waiter.poll());
        tx.send(true).expect("send");
        assert!(waiter.is_woken());
        tokio_test::assert_ready!(waiter.poll());
    }
}
