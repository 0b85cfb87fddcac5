//! Executor.
//!
//! Runs an [`ExecutionSequence`] against a provider with bounded concurrency.
//! A step is dispatched once every step it depends on has been applied;
//! ready steps are dispatched in sequence order. A failed step blocks its
//! transitive dependents while independent branches keep running.
//! Cancellation stops dispatching; completed steps are never rolled back.
//! A step whose result cannot be persisted fails, and nothing new is
//! dispatched after it.

mod cancel;
mod report;
mod retry;
mod runner;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::ExecutorConfig;
use crate::model::ResourceSet;
use crate::provider::Provider;
use crate::resolver::{ExecutionSequence, Step};
use crate::state::StateSession;

use runner::{HALTED, StepError, StepRunner, summarize};

pub use cancel::{CancelHandle, CancelToken, cancellation};
pub use report::{LogicalClock, ResourceStatus, RunReport, StepOutcome, StepStatus};
pub use retry::{Interrupted, RetryPolicy};

/// Bounded concurrent executor.
pub struct Executor {
    provider: Arc<dyn Provider>,
    session: Arc<StateSession>,
    concurrency: usize,
    policy: RetryPolicy,
}

/// Progress of one step inside the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Progress {
    Waiting,
    Running,
    Done(StepStatus),
}

impl Executor {
    /// Creates an executor.
    #[must_use]
    pub fn new(provider: Arc<dyn Provider>, session: Arc<StateSession>, config: &ExecutorConfig) -> Self {
        Self {
            provider,
            session,
            concurrency: config.concurrency.max(1),
            policy: RetryPolicy::from(&config.retry),
        }
    }

    /// Overrides the concurrency limit.
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Executes the sequence and reports the outcome of every step.
    pub async fn execute(
        &self,
        run_id: Uuid,
        sequence: &ExecutionSequence,
        resources: Arc<ResourceSet>,
        cancel: CancelToken,
    ) -> RunReport {
        info!(
            "Executing {} step(s) with concurrency {} (run {run_id})",
            sequence.len(),
            self.concurrency
        );

        let runner = Arc::new(StepRunner::new(
            Arc::clone(&self.provider),
            Arc::clone(&self.session),
            resources,
            self.policy.clone(),
        ));
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let clock = Arc::new(LogicalClock::default());

        let steps = sequence.steps();
        let dependents = sequence.dependents();
        let mut remaining: Vec<usize> = steps.iter().map(|s| s.dependencies.len()).collect();
        let mut progress = vec![Progress::Waiting; steps.len()];
        let mut outcomes: Vec<StepOutcome> = Vec::with_capacity(steps.len());
        let mut failures = Vec::new();

        let mut ready: BTreeSet<usize> = (0..steps.len()).filter(|&i| remaining[i] == 0).collect();
        let mut tasks: JoinSet<(usize, Result<u32, StepError>, Option<(u64, u64)>)> = JoinSet::new();
        // Set once a step's result could not be persisted; nothing new starts after that.
        let halted = Arc::new(AtomicBool::new(false));

        loop {
            while let Some(index) = ready.pop_first() {
                let step = steps[index].clone();
                if cancel.is_cancelled() {
                    progress[index] = Progress::Done(StepStatus::Cancelled);
                    outcomes.push(Self::outcome(&step, StepStatus::Cancelled, 0, None, Some("cancelled".into())));
                    continue;
                }
                if halted.load(Ordering::SeqCst) {
                    progress[index] = Progress::Done(StepStatus::Blocked);
                    outcomes.push(Self::outcome(&step, StepStatus::Blocked, 0, None, Some(HALTED.into())));
                    continue;
                }

                progress[index] = Progress::Running;
                let runner = Arc::clone(&runner);
                let semaphore = Arc::clone(&semaphore);
                let clock = Arc::clone(&clock);
                let halted = Arc::clone(&halted);
                let cancel = cancel.clone();
                tasks.spawn(async move {
                    let Ok(_permit) = semaphore.acquire_owned().await else {
                        return (index, Err(StepError::Cancelled), None);
                    };
                    if cancel.is_cancelled() {
                        return (index, Err(StepError::Cancelled), None);
                    }
                    if halted.load(Ordering::SeqCst) {
                        return (index, Err(StepError::Halted), None);
                    }
                    let started = clock.tick();
                    let result = runner.run(&step, &cancel).await;
                    let finished = clock.tick();
                    if matches!(result, Err(StepError::Unrecorded { .. })) {
                        halted.store(true, Ordering::SeqCst);
                    }
                    (index, result, Some((started, finished)))
                });
            }

            let Some(joined) = tasks.join_next().await else {
                break;
            };
            let (index, result, ticks) = match joined {
                Ok(done) => done,
                Err(e) => {
                    error!("Step task panicked: {e}");
                    continue;
                }
            };

            let step = &steps[index];
            let message = summarize(&result);
            let (status, attempts) = match result {
                Ok(attempts) => (StepStatus::Applied, attempts),
                Err(StepError::Cancelled) => {
                    warn!("Step {step} cancelled");
                    (StepStatus::Cancelled, 0)
                }
                Err(StepError::Halted) => (StepStatus::Blocked, 0),
                Err(StepError::Unrecorded { attempts, .. }) => (StepStatus::Failed, attempts),
                Err(StepError::Failed(failure)) => {
                    error!("{failure}");
                    let attempts = failure.attempts;
                    failures.push(failure);
                    (StepStatus::Failed, attempts)
                }
            };
            progress[index] = Progress::Done(status);
            outcomes.push(Self::outcome(step, status, attempts, ticks, message));

            match status {
                StepStatus::Applied => {
                    for &dependent in &dependents[index] {
                        remaining[dependent] -= 1;
                        if remaining[dependent] == 0 && progress[dependent] == Progress::Waiting {
                            ready.insert(dependent);
                        }
                    }
                }
                StepStatus::Failed | StepStatus::Blocked => {
                    Self::block_dependents(index, sequence, &dependents, &mut progress, &mut outcomes);
                }
                StepStatus::Cancelled => {}
            }
        }

        // Left behind by cancellation or a panicked task.
        for (index, state) in progress.iter().enumerate() {
            if *state == Progress::Waiting || *state == Progress::Running {
                let status = if cancel.is_cancelled() {
                    StepStatus::Cancelled
                } else {
                    StepStatus::Blocked
                };
                outcomes.push(Self::outcome(&steps[index], status, 0, None, None));
            }
        }

        let report = RunReport::new(run_id, outcomes, sequence.unchanged(), failures);
        info!(
            "Run {run_id} finished: {} applied, {} failed, {} blocked, {} cancelled",
            report.count(ResourceStatus::Applied),
            report.count(ResourceStatus::Failed),
            report.count(ResourceStatus::Blocked),
            report.count(ResourceStatus::Cancelled)
        );
        report
    }

    /// Marks every transitive dependent of a failed step as blocked.
    fn block_dependents(
        failed: usize,
        sequence: &ExecutionSequence,
        dependents: &[Vec<usize>],
        progress: &mut [Progress],
        outcomes: &mut Vec<StepOutcome>,
    ) {
        let mut stack: Vec<usize> = dependents[failed].clone();
        while let Some(index) = stack.pop() {
            if progress[index] != Progress::Waiting {
                continue;
            }
            let Some(step) = sequence.get(index) else {
                continue;
            };
            debug!("Blocking {step}");
            progress[index] = Progress::Done(StepStatus::Blocked);
            outcomes.push(Self::outcome(
                step,
                StepStatus::Blocked,
                0,
                None,
                Some(format!("dependency {} did not complete", sequence.steps()[failed])),
            ));
            stack.extend(dependents[index].iter().copied());
        }
    }

    fn outcome(
        step: &Step,
        status: StepStatus,
        attempts: u32,
        ticks: Option<(u64, u64)>,
        message: Option<String>,
    ) -> StepOutcome {
        StepOutcome {
            index: step.index,
            resource: step.resource.clone(),
            kind: step.kind,
            status,
            attempts,
            started: ticks.map(|(s, _)| s),
            finished: ticks.map(|(_, f)| f),
            message,
        }
    }
}
