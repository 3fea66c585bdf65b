use crate::config::PollConfig;
use crate::error::{JobError, Result};
use crate::models::job::{Job, JobProgress, JobStatus};
use crate::models::result::ResultPayload;
use crate::services::client::JobService;
use log::{debug, error, info, warn};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PollPhase {
    #[default]
    Idle,
    Polling,
    Completing,
    Failed,
    Done,
}

#[derive(Debug, Clone, Default)]
pub struct PollState {
    pub phase: PollPhase,
    pub latest: Option<JobProgress>,
    /// Highest percent seen so far; the backend may report lower values later.
    pub percent: u8,
    pub last_seq: u64,
    pub torn_down: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Stale,
    Progress,
    Completed,
    Failed,
}

/// Folds one poll response into the state. `seq` is the issue order of the
/// poll that produced `progress`; anything not newer than the last applied
/// response, or arriving outside `Polling`, is discarded.
pub fn apply_progress(state: &PollState, seq: u64, progress: JobProgress) -> (PollState, Applied) {
    if state.torn_down || state.phase != PollPhase::Polling || seq <= state.last_seq {
        return (state.clone(), Applied::Stale);
    }

    let (phase, applied) = match progress.status {
        JobStatus::Queued | JobStatus::Running => (PollPhase::Polling, Applied::Progress),
        JobStatus::Completed => (PollPhase::Completing, Applied::Completed),
        JobStatus::Failed => (PollPhase::Failed, Applied::Failed),
    };

    let next = PollState {
        phase,
        percent: state.percent.max(progress.percent()),
        latest: Some(progress),
        last_seq: seq,
        torn_down: false,
    };
    (next, applied)
}

#[derive(Debug)]
pub struct Completion {
    pub last_progress: Option<JobProgress>,
    /// A failed fetch still completes the flow.
    pub result: Result<ResultPayload>,
}

#[derive(Debug)]
pub enum PollEvent {
    /// `percent` is the high-water mark as of this response.
    Progress { progress: JobProgress, percent: u8 },
    Completed(Completion),
    Failed(JobError),
}

/// Tracks a single submitted job from first poll to result fetch.
pub struct PollingController<S: JobService> {
    service: Arc<S>,
    config: PollConfig,
    state: Arc<Mutex<PollState>>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    job_id: Option<String>,
}

impl<S: JobService> PollingController<S> {
    pub fn new(service: Arc<S>, config: PollConfig) -> Self {
        Self {
            service,
            config,
            state: Arc::new(Mutex::new(PollState::default())),
            cancel: CancellationToken::new(),
            task: None,
            job_id: None,
        }
    }

    pub fn start(&mut self, job: &Job) -> Result<mpsc::UnboundedReceiver<PollEvent>> {
        if self.config.interval.is_zero() {
            return Err(JobError::Validation("poll interval must be greater than zero".to_string()));
        }
        if let Some(current) = &self.job_id {
            let running = self.task.as_ref().is_some_and(|t| !t.is_finished());
            error!("Refusing to poll job {} while controller owns job {}", job.id, current);
            return Err(if running {
                JobError::AlreadyPolling(current.clone())
            } else {
                JobError::InvalidTransition {
                    phase: format!("{:?}", self.phase()),
                    action: "start polling",
                }
            });
        }

        {
            let mut state = lock(&self.state);
            if state.torn_down {
                return Err(JobError::InvalidTransition {
                    phase: "torn down".to_string(),
                    action: "start polling",
                });
            }
            state.phase = PollPhase::Polling;
        }

        info!("Polling {} job {}", job.kind, job.id);
        let (tx, rx) = mpsc::unbounded_channel();
        self.job_id = Some(job.id.clone());
        self.task = Some(tokio::spawn(run_loop(
            self.service.clone(),
            job.clone(),
            self.config.clone(),
            self.state.clone(),
            self.cancel.clone(),
            tx,
        )));

        Ok(rx)
    }

    /// Stops the cadence and any pending fetch and moves the phase to
    /// `Done`. Responses still in flight are dropped without touching state.
    pub fn teardown(&mut self) {
        {
            let mut state = lock(&self.state);
            state.torn_down = true;
            if state.phase != PollPhase::Idle {
                state.phase = PollPhase::Done;
            }
        }
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
            if let Some(id) = &self.job_id {
                debug!("Poll loop for job {} torn down", id);
            }
        }
    }

    pub fn snapshot(&self) -> PollState {
        lock(&self.state).clone()
    }

    pub fn phase(&self) -> PollPhase {
        lock(&self.state).phase
    }

    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl<S: JobService> Drop for PollingController<S> {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn lock(state: &Mutex<PollState>) -> MutexGuard<'_, PollState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn run_loop<S: JobService>(
    service: Arc<S>,
    job: Job,
    config: PollConfig,
    state: Arc<Mutex<PollState>>,
    cancel: CancellationToken,
    events: mpsc::UnboundedSender<PollEvent>,
) {
    let mut ticker = time::interval_at(Instant::now() + config.interval, config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut seq = 0u64;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }

        seq += 1;
        let polled = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            polled = service.poll(job.kind, &job.id) => polled,
        };

        let progress = match polled {
            Ok(progress) => progress,
            Err(JobError::NotFound(id)) => {
                error!("Job {} disappeared from the job service", id);
                let mut guard = lock(&state);
                if !guard.torn_down {
                    guard.phase = PollPhase::Done;
                    let _ = events.send(PollEvent::Failed(JobError::NotFound(id)));
                }
                return;
            }
            Err(e) => {
                warn!("Poll {} for job {} failed, retrying next tick: {}", seq, job.id, e);
                continue;
            }
        };

        let mut guard = lock(&state);
        if guard.torn_down {
            return;
        }
        let (next, applied) = apply_progress(&guard, seq, progress.clone());
        *guard = next;
        let percent = guard.percent;

        match applied {
            Applied::Stale => {
                debug!("Discarded stale progress {} for job {}", seq, job.id);
            }
            Applied::Progress => {
                let _ = events.send(PollEvent::Progress { progress, percent });
            }
            Applied::Completed => {
                info!("Job {} completed, fetching result after {:?}", job.id, config.settle_delay);
                let _ = events.send(PollEvent::Progress { progress, percent });
                break;
            }
            Applied::Failed => {
                let message = if progress.message.trim().is_empty() {
                    format!("job {} failed", job.id)
                } else {
                    progress.message.clone()
                };
                error!("Job {} failed: {}", job.id, message);
                guard.phase = PollPhase::Done;
                let _ = events.send(PollEvent::Progress { progress, percent });
                let _ = events.send(PollEvent::Failed(JobError::BackendFailure(message)));
                return;
            }
        }
    }
    drop(ticker);

    let Some(result) = fetch_settled(service.as_ref(), &job, &config, &cancel).await else {
        return;
    };
    if let Err(e) = &result {
        error!("Result fetch for job {} failed: {}", job.id, e);
    }

    let mut guard = lock(&state);
    if guard.torn_down {
        return;
    }
    guard.phase = PollPhase::Done;
    let _ = events.send(PollEvent::Completed(Completion {
        last_progress: guard.latest.clone(),
        result,
    }));
}

/// Waits the settle delay before each fetch attempt. `None` means the
/// controller was torn down while waiting.
async fn fetch_settled<S: JobService>(
    service: &S,
    job: &Job,
    config: &PollConfig,
    cancel: &CancellationToken,
) -> Option<Result<ResultPayload>> {
    let mut attempt = 0u32;
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            _ = time::sleep(config.settle_delay) => {}
        }

        let fetched = tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            fetched = service.fetch_result(job.kind, &job.id) => fetched,
        };

        match fetched {
            Err(JobError::NotReady(_)) if attempt < config.result_fetch_retries => {
                attempt += 1;
                debug!("Result for job {} not ready, attempt {}", job.id, attempt);
            }
            other => return Some(other),
        }
    }
}
