//! The optimization loop: serve proposals from the external optimizer until
//! it finishes, then read back its incumbent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use smac_types::{
    config_error, BestTrajectory, ParameterAssignment, ParameterSpace, RunConfig, SmacError, SmacResult,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::channel::{Incoming, ProtocolChannel};
use crate::codec::{format_report, parse_proposal};
use crate::registry::DimensionRegistry;
use crate::supervisor::{OptimizerBackend, ProcessState, SmacProcess};

/// Extra arguments handed to the objective on every call.
pub type ObjectiveArgs = serde_json::Map<String, Value>;

/// Requests cancellation of a running loop from another thread or task.
///
/// The loop checks the flag between rounds, so it stops within one proposal
/// timeout of the request.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One objective evaluation served during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRecord {
    /// 1-based position in the run.
    pub iteration: usize,
    pub parameters: ParameterAssignment,
    pub performance: f64,
    pub runtime_seconds: f64,
    pub finished_at: DateTime<Utc>,
}

/// Everything a completed run produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationOutcome {
    pub run_id: Uuid,
    pub best: BestTrajectory,
    pub evaluations: Vec<EvaluationRecord>,
    /// State of the optimizer process when the loop ended.
    pub final_state: ProcessState,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Drives one run against an [`OptimizerBackend`].
pub struct Optimizer<B> {
    registry: DimensionRegistry,
    config: RunConfig,
    backend: B,
    stop: StopHandle,
}

impl Optimizer<SmacProcess> {
    /// Validate `space` and `config` and prepare a run against a SMAC child
    /// process.
    pub fn new(space: &ParameterSpace, config: RunConfig) -> SmacResult<Self> {
        config.check()?;
        let registry = DimensionRegistry::new(space)?;
        let backend = SmacProcess::with_registry(registry.clone(), config.clone());
        Ok(Self {
            registry,
            config,
            backend,
            stop: StopHandle::default(),
        })
    }
}

impl<B: OptimizerBackend> Optimizer<B> {
    pub fn with_backend(space: &ParameterSpace, config: RunConfig, backend: B) -> SmacResult<Self> {
        config.check()?;
        Ok(Self {
            registry: DimensionRegistry::new(space)?,
            config,
            backend,
            stop: StopHandle::default(),
        })
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn registry(&self) -> &DimensionRegistry {
        &self.registry
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Serve proposals until the optimizer finishes or a stop is requested,
    /// then return its best configuration.
    ///
    /// The backend is torn down before this returns, on success and on
    /// every error path.
    pub async fn run<F, R>(&mut self, mut objective: F, args: &ObjectiveArgs) -> SmacResult<OptimizationOutcome>
    where
        F: FnMut(&ParameterAssignment, &ObjectiveArgs) -> R,
        R: Into<Option<f64>>,
    {
        let run_id = Uuid::new_v4();
        let span = info_span!("smac_run", %run_id);
        async move {
            let started_at = Utc::now();
            let mut evaluations = Vec::new();

            let best = match self.drive(&mut objective, args, &mut evaluations).await {
                Ok(()) => self.finish().await,
                Err(e) => Err(e),
            };
            let final_state = self.backend.state();
            self.backend.teardown().await;

            let best = best?;
            info!(
                evaluations = evaluations.len(),
                best = best.objective_value,
                state = final_state.name(),
                "optimization finished"
            );
            Ok(OptimizationOutcome {
                run_id,
                best,
                evaluations,
                final_state,
                started_at,
                finished_at: Utc::now(),
            })
        }
        .instrument(span)
        .await
    }

    async fn drive<F, R>(
        &mut self,
        objective: &mut F,
        args: &ObjectiveArgs,
        evaluations: &mut Vec<EvaluationRecord>,
    ) -> SmacResult<()>
    where
        F: FnMut(&ParameterAssignment, &ObjectiveArgs) -> R,
        R: Into<Option<f64>>,
    {
        let mut channel = ProtocolChannel::bind(&self.config).await?;
        self.backend.start(channel.port()).await?;

        loop {
            if self.stop.is_stopped() {
                info!("stop requested");
                return Ok(());
            }
            if self.backend.poll().await? != ProcessState::Running {
                return Ok(());
            }

            let line = match channel.wait_for_proposal(self.config.proposal_timeout()).await? {
                Incoming::Proposal(line) => line,
                Incoming::Timeout => continue,
            };
            let proposal = parse_proposal(&line, &self.registry)?;
            let iteration = evaluations.len() + 1;

            let started = Instant::now();
            let value: Option<f64> = objective(&proposal.values, args).into();
            let runtime = started.elapsed().as_secs_f64();

            let performance = match value {
                Some(v) if v.is_finite() => v,
                other => {
                    return Err(SmacError::InvalidObjectiveResult {
                        iteration,
                        value: other,
                    })
                }
            };

            if let Err(e) = channel.send_report(&format_report(performance, runtime)).await {
                warn!(iteration, error = %e, "failed to send report");
            }
            debug!(iteration, performance, runtime, "evaluation reported");

            evaluations.push(EvaluationRecord {
                iteration,
                parameters: proposal.values,
                performance,
                runtime_seconds: runtime,
                finished_at: Utc::now(),
            });
        }
    }

    async fn finish(&mut self) -> SmacResult<BestTrajectory> {
        if let Err(e) = self.backend.stop().await {
            warn!(error = %e, "failed to stop optimizer");
        }
        self.backend.best_result().await
    }
}

/// Run one optimization against a SMAC child process.
pub async fn run<F, R>(
    objective: F,
    space: &ParameterSpace,
    config: RunConfig,
    args: &ObjectiveArgs,
) -> SmacResult<OptimizationOutcome>
where
    F: FnMut(&ParameterAssignment, &ObjectiveArgs) -> R,
    R: Into<Option<f64>>,
{
    Optimizer::new(space, config)?.run(objective, args).await
}

/// Minimize `objective` over `space` with at most `max_evaluations` calls.
///
/// Uses the default configuration with environment overrides applied
/// (`SMAC_EXECUTABLE`, `SMAC_BASE_PORT`, `SMAC_WORKING_ROOT`). Returns the
/// best parameters and objective value the optimizer recorded.
///
/// ```no_run
/// use smac_bridge::{minimize, ObjectiveArgs};
/// use smac_types::ParameterSpace;
///
/// let space = ParameterSpace::from_bounds(&[0.0], &[-5.0], &[5.0]);
/// let (best, value) = minimize(
///     |p, _| (p.continuous[0] - 1.0).powi(2),
///     &space,
///     20,
///     &ObjectiveArgs::new(),
/// )?;
/// # Ok::<(), smac_types::SmacError>(())
/// ```
pub fn minimize<F, R>(
    objective: F,
    space: &ParameterSpace,
    max_evaluations: usize,
    args: &ObjectiveArgs,
) -> SmacResult<(ParameterAssignment, f64)>
where
    F: FnMut(&ParameterAssignment, &ObjectiveArgs) -> R,
    R: Into<Option<f64>>,
{
    let config = RunConfig::default()
        .apply_env()?
        .with_max_evaluations(max_evaluations);
    minimize_with_config(objective, space, config, args)
}

/// [`minimize`] with a caller-supplied configuration.
///
/// Builds its own runtime, so it must not be called from async code; use
/// [`run`] there instead.
pub fn minimize_with_config<F, R>(
    objective: F,
    space: &ParameterSpace,
    config: RunConfig,
    args: &ObjectiveArgs,
) -> SmacResult<(ParameterAssignment, f64)>
where
    F: FnMut(&ParameterAssignment, &ObjectiveArgs) -> R,
    R: Into<Option<f64>>,
{
    if tokio::runtime::Handle::try_current().is_ok() {
        return Err(config_error!(
            "minimize cannot block inside an async runtime; await smac_bridge::run instead"
        ));
    }
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let outcome = runtime.block_on(run(objective, space, config, args))?;
    Ok((outcome.best.parameters, outcome.best.objective_value))
}
