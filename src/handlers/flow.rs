use crate::config::PollConfig;
use crate::error::{JobError, Result};
use crate::models::job::{Job, JobKind, JobProgress, JobRequest, ScanScope};
use crate::models::result::{ResultPayload, ScanReport};
use crate::services::assembler::{AssembledResult, ClassSection, assemble, group_by_category};
use crate::services::client::JobService;
use crate::services::phases::{RemediationFlow, RemediationPhase, ScanFlow};
use crate::services::poller::{PollEvent, PollingController};
use crate::services::selection::SelectionAggregator;
use log::{error, info, warn};
use std::sync::Arc;
use uuid::Uuid;

pub struct FlowContext<S: JobService> {
    pub service: Arc<S>,
    pub poll: PollConfig,
    pub flow_id: Uuid,
}

impl<S: JobService> FlowContext<S> {
    pub fn new(service: Arc<S>, poll: PollConfig) -> Self {
        Self {
            service,
            poll,
            flow_id: Uuid::new_v4(),
        }
    }
}

#[derive(Debug)]
pub struct RemediationOutcome {
    pub job: Job,
    pub phase: RemediationPhase,
    pub last_progress: Option<JobProgress>,
    pub result: Option<AssembledResult>,
    /// Present only for single-target results.
    pub groups: Vec<ClassSection>,
    pub fetch_error: Option<String>,
    pub fatal: Option<String>,
}

#[derive(Debug)]
pub struct ScanOutcome {
    pub job: Job,
    pub flow: ScanFlow,
    pub last_progress: Option<JobProgress>,
    pub report: Option<ScanReport>,
    pub fetch_error: Option<String>,
}

enum Tracked {
    Completed {
        last_progress: Option<JobProgress>,
        result: Result<ResultPayload>,
    },
    Failed(JobError),
}

/// Submits the selection, tracks the job and assembles its result. The
/// affected-target list is refreshed first if the item set changed.
pub async fn run_remediation<S, F>(
    ctx: &FlowContext<S>,
    selection: &mut SelectionAggregator,
    mut on_progress: F,
) -> Result<RemediationOutcome>
where
    S: JobService,
    F: FnMut(&JobProgress, u8),
{
    let mut flow = RemediationFlow::new();

    if selection.needs_refresh() {
        if let Err(e) = selection.refresh_targets(ctx.service.as_ref()).await {
            warn!("[{}] Affected-target lookup failed: {}", ctx.flow_id, e);
            flow.cancel()?;
            return Err(e);
        }
    }

    let request = match selection.request() {
        Ok(request) => request,
        Err(e) => {
            flow.cancel()?;
            return Err(e);
        }
    };

    let summary = selection.summary();
    info!(
        "[{}] Submitting remediation: {} target(s), {} item(s), {} unit(s)",
        ctx.flow_id, summary.target_count, summary.item_count, summary.total_units
    );

    let job = submit(ctx, request).await?;
    flow.submitted(&job.id)?;

    let tracked = track(ctx, &job, |event| flow.on_event(event), &mut on_progress).await?;

    let (last_progress, result, fetch_error, fatal) = match tracked {
        Tracked::Completed { last_progress, result } => match result {
            Ok(ResultPayload::Remediation(r)) => (last_progress, Some(assemble(&r)), None, None),
            Ok(ResultPayload::Scan(_)) => {
                error!("[{}] Job {} returned a scan report", ctx.flow_id, job.id);
                (last_progress, None, Some("unexpected result type".to_string()), None)
            }
            Err(e) => (last_progress, None, Some(e.user_message()), None),
        },
        Tracked::Failed(e) => (None, None, None, Some(e.user_message())),
    };

    let groups = match &result {
        Some(AssembledResult::Single(single)) => group_by_category(&single.items, selection.proposed()),
        _ => Vec::new(),
    };

    Ok(RemediationOutcome {
        job,
        phase: flow.phase(),
        last_progress,
        result,
        groups,
        fetch_error,
        fatal,
    })
}

/// Runs a scan up to the first result page. Later pages are stepped through
/// with `ScanFlow::next`.
pub async fn run_scan<S, F>(
    ctx: &FlowContext<S>,
    targets: Vec<String>,
    scope: ScanScope,
    items: Vec<String>,
    mut on_progress: F,
) -> Result<ScanOutcome>
where
    S: JobService,
    F: FnMut(&JobProgress, u8),
{
    let request = JobRequest::new(JobKind::Scan(scope), targets, items)?;
    info!(
        "[{}] Submitting {} over {} target(s)",
        ctx.flow_id,
        request.kind,
        request.targets.len()
    );

    let job = submit(ctx, request).await?;
    let mut flow = ScanFlow::new();

    let tracked = track(ctx, &job, |event| flow.on_event(event), &mut on_progress).await?;

    let (last_progress, report, fetch_error) = match tracked {
        Tracked::Completed { last_progress, result } => match result {
            Ok(ResultPayload::Scan(report)) => (last_progress, Some(report), None),
            Ok(ResultPayload::Remediation(_)) => {
                error!("[{}] Job {} returned a remediation result", ctx.flow_id, job.id);
                (last_progress, None, Some("unexpected result type".to_string()))
            }
            Err(e) => (last_progress, None, Some(e.user_message())),
        },
        Tracked::Failed(e) => {
            warn!("[{}] Scan {} closed: {}", ctx.flow_id, job.id, e);
            (None, None, None)
        }
    };

    Ok(ScanOutcome {
        job,
        flow,
        last_progress,
        report,
        fetch_error,
    })
}

async fn submit<S: JobService>(ctx: &FlowContext<S>, request: JobRequest) -> Result<Job> {
    // A job submitted without a usable cadence would run untracked.
    if ctx.poll.interval.is_zero() {
        return Err(JobError::Validation("poll interval must be greater than zero".to_string()));
    }
    let handle = ctx.service.submit(&request).await.map_err(|e| {
        error!("[{}] Submission failed: {}", ctx.flow_id, e);
        e
    })?;
    info!(
        "[{}] Job {} accepted ({:?}): {}",
        ctx.flow_id, handle.job_id, handle.status, handle.message
    );
    Ok(Job::accepted(request, &handle))
}

/// Feeds poll events to the phase machine until the job completes or fails.
/// The controller is torn down on every exit path, including when the
/// caller drops this future.
async fn track<S, P, F>(ctx: &FlowContext<S>, job: &Job, mut advance: P, on_progress: &mut F) -> Result<Tracked>
where
    S: JobService,
    P: FnMut(&PollEvent) -> Result<()>,
    F: FnMut(&JobProgress, u8),
{
    let mut controller = PollingController::new(ctx.service.clone(), ctx.poll.clone());
    let mut events = controller.start(job)?;

    while let Some(event) = events.recv().await {
        advance(&event)?;
        match event {
            PollEvent::Progress { progress, percent } => {
                on_progress(&progress, percent);
            }
            PollEvent::Completed(done) => {
                controller.teardown();
                return Ok(Tracked::Completed {
                    last_progress: done.last_progress,
                    result: done.result,
                });
            }
            PollEvent::Failed(e) => {
                controller.teardown();
                return Ok(Tracked::Failed(e));
            }
        }
    }

    controller.teardown();
    Err(JobError::transport(format!("poll loop for job {} ended unexpectedly", job.id)))
}
