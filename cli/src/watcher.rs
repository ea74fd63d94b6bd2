use anyhow::Result;
use std::{fmt, future::Future, sync::Arc, time::Duration};
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{sleep, Instant},
};
use tracing::{debug, info, warn};

use crate::types::{GenerationJob, JobStatus, TaskStatus};

pub trait StatusSource: Send + Sync + 'static {
    fn check_status(&self, task_id: &str) -> impl Future<Output = Result<TaskStatus>> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed,
    Exponential { max: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub backoff: Backoff,
    // Measured from `start`. The timeout fires at the deadline itself, after
    // the last check that fits before it.
    pub deadline: Option<Duration>,
}

impl PollPolicy {
    pub fn fixed(interval: Duration) -> Self {
        Self { interval, backoff: Backoff::Fixed, deadline: None }
    }

    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.interval,
            Backoff::Exponential { max } => {
                let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
                self.interval.saturating_mul(factor).min(max.max(self.interval))
            }
        }
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::fixed(Duration::from_secs(2))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    Status(String),
    Timeout,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Status(status) => f.write_str(status),
            Self::Timeout => f.write_str("timeout"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchUpdate {
    Pending { attempt: u32 },
    // The check itself failed; the job may still be running.
    Retrying { attempt: u32, error: String },
    Complete,
    Failed(FailureReason),
}

impl WatchUpdate {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WatchEvent {
    pub job: GenerationJob,
    pub update: WatchUpdate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStep {
    Wait(Duration),
    // Sleep, then time out instead of checking again.
    Expire(Duration),
    Stop,
}

// Timer-free; `run` owns the clock.
#[derive(Debug)]
pub struct PollMachine {
    policy: PollPolicy,
    job: GenerationJob,
    attempt: u32,
}

impl PollMachine {
    pub fn new(task_id: impl Into<String>, policy: PollPolicy) -> Self {
        Self { policy, job: GenerationJob::new(task_id), attempt: 0 }
    }

    pub fn job(&self) -> &GenerationJob {
        &self.job
    }

    pub fn is_terminal(&self) -> bool {
        self.job.status.is_terminal()
    }

    pub fn advance(
        &mut self,
        response: Result<TaskStatus, String>,
        elapsed: Duration,
    ) -> (WatchUpdate, PollStep) {
        if self.is_terminal() {
            return (self.terminal_update(), PollStep::Stop);
        }
        self.attempt = self.attempt.saturating_add(1);

        let update = match response {
            Ok(TaskStatus::Complete) => {
                self.job.status = JobStatus::Complete;
                return (WatchUpdate::Complete, PollStep::Stop);
            }
            Ok(TaskStatus::Other(status)) => {
                self.job.status = JobStatus::Failed;
                return (WatchUpdate::Failed(FailureReason::Status(status)), PollStep::Stop);
            }
            Ok(TaskStatus::Pending) => {
                self.job.status = JobStatus::Pending;
                WatchUpdate::Pending { attempt: self.attempt }
            }
            Err(error) => WatchUpdate::Retrying { attempt: self.attempt, error },
        };

        let delay = self.policy.delay_after(self.attempt);
        if let Some(deadline) = self.policy.deadline {
            if elapsed >= deadline {
                return (self.expire(), PollStep::Stop);
            }
            let remaining = deadline - elapsed;
            if delay >= remaining {
                return (update, PollStep::Expire(remaining));
            }
        }
        (update, PollStep::Wait(delay))
    }

    pub fn expire(&mut self) -> WatchUpdate {
        if self.is_terminal() {
            return self.terminal_update();
        }
        self.job.status = JobStatus::Failed;
        WatchUpdate::Failed(FailureReason::Timeout)
    }

    fn terminal_update(&self) -> WatchUpdate {
        match self.job.status {
            JobStatus::Complete => WatchUpdate::Complete,
            _ => WatchUpdate::Failed(FailureReason::Status("failed".into())),
        }
    }
}

// One check at a time; the next is scheduled only once the previous resolved.
pub struct JobWatcher {
    task_id: String,
    cancel_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl JobWatcher {
    pub fn start<S, F>(source: Arc<S>, task_id: impl Into<String>, policy: PollPolicy, emit: F) -> Self
    where
        S: StatusSource,
        F: FnMut(WatchEvent) + Send + 'static,
    {
        let task_id = task_id.into();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        info!("watching generation task {task_id}");
        let handle = tokio::spawn(run(source, task_id.clone(), policy, cancel_rx, emit));
        Self { task_id, cancel_tx, handle }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    // An in-flight check is left to finish and its result dropped.
    pub fn cancel(&self) {
        if !self.cancel_tx.send_replace(true) && !self.handle.is_finished() {
            debug!("cancelled watcher for task {}", self.task_id);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for JobWatcher {
    fn drop(&mut self) {
        self.cancel();
    }
}

fn is_cancelled(cancel: &watch::Receiver<bool>) -> bool {
    *cancel.borrow() || cancel.has_changed().is_err()
}

async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    let _ = cancel.wait_for(|cancelled| *cancelled).await;
}

async fn run<S, F>(
    source: Arc<S>,
    task_id: String,
    policy: PollPolicy,
    mut cancel: watch::Receiver<bool>,
    mut emit: F,
) where
    S: StatusSource,
    F: FnMut(WatchEvent) + Send + 'static,
{
    let started = Instant::now();
    let mut machine = PollMachine::new(task_id.clone(), policy);

    loop {
        if is_cancelled(&cancel) {
            return;
        }

        let response = source.check_status(&task_id).await.map_err(|err| format!("{err:#}"));
        if is_cancelled(&cancel) {
            debug!("discarding status for cancelled task {task_id}");
            return;
        }
        if let Err(err) = &response {
            warn!("status check for {task_id} failed, will retry: {err}");
        }

        let (update, step) = machine.advance(response, started.elapsed());
        report(&task_id, &update);
        emit(WatchEvent { job: machine.job().clone(), update });

        let delay = match step {
            PollStep::Stop => return,
            PollStep::Wait(delay) | PollStep::Expire(delay) => delay,
        };
        tokio::select! {
            biased;
            _ = cancelled(&mut cancel) => return,
            _ = sleep(delay) => {}
        }

        if let PollStep::Expire(_) = step {
            let update = machine.expire();
            report(&task_id, &update);
            emit(WatchEvent { job: machine.job().clone(), update });
            return;
        }
    }
}

fn report(task_id: &str, update: &WatchUpdate) {
    match update {
        WatchUpdate::Complete => info!("task {task_id} complete"),
        WatchUpdate::Failed(reason) => warn!("task {task_id} failed: {reason}"),
        WatchUpdate::Pending { attempt } => debug!("task {task_id} pending (check {attempt})"),
        WatchUpdate::Retrying { .. } => {}
    }
}
