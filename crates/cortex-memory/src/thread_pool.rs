//! Side-effect scheduler
//!
//! Dedicated worker threads, each driving its own single-threaded tokio
//! runtime, execute consolidation work off the request path. Work is
//! dispatched round-robin and runs FIFO per worker. Failures and panics are
//! logged with the task id and never reach the submitter.
use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::metrics;

/// Downstream work triggered by an event write.
#[derive(Debug, Clone, PartialEq)]
pub enum SideEffect {
    /// Re-evaluate the rolling summary after an assistant event.
    UpdateSummary { conversation_id: String },
    /// User asked for a summary now.
    ForceSummary { conversation_id: String },
    /// Mine recent user lines for master-memory claims.
    ExtractMaster { conversation_id: String },
    /// Store a project/long-running statement directly, bypassing the extractor.
    CaptureProject {
        owner_id: String,
        conversation_id: String,
        event_id: String,
        text: String,
    },
}

impl SideEffect {
    pub fn kind(&self) -> &'static str {
        match self {
            SideEffect::UpdateSummary { .. } => "update_summary",
            SideEffect::ForceSummary { .. } => "force_summary",
            SideEffect::ExtractMaster { .. } => "extract_master",
            SideEffect::CaptureProject { .. } => "capture_project",
        }
    }

    pub fn conversation_id(&self) -> &str {
        match self {
            SideEffect::UpdateSummary { conversation_id }
            | SideEffect::ForceSummary { conversation_id }
            | SideEffect::ExtractMaster { conversation_id }
            | SideEffect::CaptureProject { conversation_id, .. } => conversation_id,
        }
    }
}

#[async_trait]
pub trait SideEffectRunner: Send + Sync + 'static {
    async fn run(&self, effect: SideEffect) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct ThreadPoolConfig {
    pub workers: usize,
    pub thread_name_prefix: String,
}

impl Default for ThreadPoolConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            thread_name_prefix: "cortex-side-effect".to_string(),
        }
    }
}

enum WorkerCommand {
    Run { task_id: String, effect: SideEffect },
    /// Answered once everything queued before it has finished.
    Barrier(oneshot::Sender<()>),
    Shutdown,
}

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    panicked: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub submitted: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub panicked: u64,
}

pub struct SideEffectScheduler {
    senders: Vec<mpsc::UnboundedSender<WorkerCommand>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    next_worker: AtomicUsize,
    counters: Arc<Counters>,
}

impl SideEffectScheduler {
    pub fn new(config: ThreadPoolConfig, runner: Arc<dyn SideEffectRunner>) -> anyhow::Result<Self> {
        let workers = config.workers.max(1);
        let counters = Arc::new(Counters::default());
        let mut senders = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);

        for i in 0..workers {
            let (tx, rx) = mpsc::unbounded_channel();
            let name = format!("{}-{}", config.thread_name_prefix, i);
            let runner = runner.clone();
            let counters = counters.clone();
            let thread_name = name.clone();
            let handle = thread::Builder::new()
                .name(name.clone())
                .spawn(move || {
                    let rt = match tokio::runtime::Builder::new_current_thread()
                        .enable_all()
                        .build()
                    {
                        Ok(rt) => rt,
                        Err(e) => {
                            error!("Failed to create runtime for {}: {}", thread_name, e);
                            return;
                        }
                    };
                    rt.block_on(run_worker_loop(thread_name, rx, runner, counters));
                })
                .map_err(|e| anyhow::anyhow!("Failed to spawn worker thread {}: {}", name, e))?;
            senders.push(tx);
            handles.push(handle);
        }

        info!("Side-effect scheduler started with {} workers", workers);
        Ok(Self {
            senders,
            handles: Mutex::new(handles),
            next_worker: AtomicUsize::new(0),
            counters,
        })
    }

    /// Queue work and return its task id immediately. Never fails the caller.
    pub fn submit(&self, effect: SideEffect) -> String {
        let task_id = Uuid::new_v4().to_string();
        let index = self.next_worker.fetch_add(1, Ordering::Relaxed) % self.senders.len();
        let kind = effect.kind();
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);

        let command = WorkerCommand::Run {
            task_id: task_id.clone(),
            effect,
        };
        if self.senders[index].send(command).is_err() {
            error!(task_id = %task_id, kind, "Side-effect worker {} is gone; task dropped", index);
            self.counters.failed.fetch_add(1, Ordering::Relaxed);
            metrics::inc_side_effect(kind, "dropped");
        } else {
            debug!(task_id = %task_id, kind, worker = index, "Side effect queued");
        }
        task_id
    }

    /// Wait until every task submitted before this call has finished.
    pub async fn flush(&self) {
        let mut waits = Vec::with_capacity(self.senders.len());
        for sender in &self.senders {
            let (tx, rx) = oneshot::channel();
            if sender.send(WorkerCommand::Barrier(tx)).is_ok() {
                waits.push(rx);
            }
        }
        for rx in waits {
            let _ = rx.await;
        }
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            succeeded: self.counters.succeeded.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            panicked: self.counters.panicked.load(Ordering::Relaxed),
        }
    }

    /// Drain queued work and join the workers. Blocks the calling thread.
    pub fn shutdown(&self) {
        let handles = match self.handles.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        if handles.is_empty() {
            return;
        }

        info!("Shutting down side-effect scheduler");
        for sender in &self.senders {
            let _ = sender.send(WorkerCommand::Shutdown);
        }
        for handle in handles {
            if handle.join().is_err() {
                warn!("Side-effect worker thread panicked during shutdown");
            }
        }
        info!("Side-effect scheduler shutdown complete");
    }
}

impl Drop for SideEffectScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn run_worker_loop(
    name: String,
    mut receiver: mpsc::UnboundedReceiver<WorkerCommand>,
    runner: Arc<dyn SideEffectRunner>,
    counters: Arc<Counters>,
) {
    debug!("Worker {} ready", name);
    while let Some(command) = receiver.recv().await {
        match command {
            WorkerCommand::Run { task_id, effect } => {
                run_task(&task_id, effect, runner.as_ref(), &counters).await;
            }
            WorkerCommand::Barrier(done) => {
                let _ = done.send(());
            }
            WorkerCommand::Shutdown => break,
        }
    }
    debug!("Worker {} shutting down", name);
}

async fn run_task(task_id: &str, effect: SideEffect, runner: &dyn SideEffectRunner, counters: &Counters) {
    let kind = effect.kind();
    let conversation_id = effect.conversation_id().to_string();

    match AssertUnwindSafe(runner.run(effect)).catch_unwind().await {
        Ok(Ok(())) => {
            counters.succeeded.fetch_add(1, Ordering::Relaxed);
            metrics::inc_side_effect(kind, "ok");
            debug!(task_id = %task_id, kind, "Side effect finished");
        }
        Ok(Err(e)) => {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            metrics::inc_side_effect(kind, "error");
            error!(
                task_id = %task_id,
                kind,
                conversation_id = %conversation_id,
                "Side effect failed: {:#}",
                e
            );
        }
        Err(panic) => {
            counters.panicked.fetch_add(1, Ordering::Relaxed);
            metrics::inc_side_effect(kind, "panic");
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!(
                task_id = %task_id,
                kind,
                conversation_id = %conversation_id,
                "Side effect panicked: {}",
                message
            );
        }
    }
}
