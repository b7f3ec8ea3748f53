//! Lifecycle of the external optimizer process.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use smac_types::{
    BestTrajectory, ChildOutput, ParameterSpace, ProcessError, ProtocolError, RunConfig, SmacError,
    SmacResult,
};
use std::ffi::OsString;
use std::path::Path;
use std::process::Stdio;
use tempfile::TempDir;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::codec::{parse_trajectory_record, trajectory_reader};
use crate::registry::DimensionRegistry;
use crate::scenario::{write_artifacts, ScenarioLayout};

/// `Created -> Running -> {Finished | Killed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessState {
    Created,
    Running,
    Finished,
    Killed,
}

impl ProcessState {
    pub fn name(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Finished => "finished",
            Self::Killed => "killed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Killed)
    }
}

/// The external sequential optimizer as seen by the optimization loop.
#[async_trait]
pub trait OptimizerBackend: Send + Sync {
    /// Prepare the working directory and launch, reporting back to `port`.
    async fn start(&mut self, port: u16) -> SmacResult<()>;

    /// Non-blocking liveness check.
    async fn poll(&mut self) -> SmacResult<ProcessState>;

    /// Kill if still running. Idempotent.
    async fn stop(&mut self) -> SmacResult<()>;

    /// Best configuration recorded by the optimizer. Only valid once it has
    /// finished or been killed.
    async fn best_result(&self) -> SmacResult<BestTrajectory>;

    /// Kill the child if alive and remove the working directory. Never fails;
    /// problems are logged.
    async fn teardown(&mut self);

    fn state(&self) -> ProcessState;
}

/// A SMAC child process plus the working directory it runs in.
///
/// Dropping a `SmacProcess` sends a kill to a live child and removes the
/// working directory, so a cancelled run leaves nothing behind.
#[derive(Debug)]
pub struct SmacProcess {
    registry: DimensionRegistry,
    config: RunConfig,
    state: ProcessState,
    workdir: Option<TempDir>,
    layout: Option<ScenarioLayout>,
    child: Option<Child>,
}

impl SmacProcess {
    pub fn new(space: &ParameterSpace, config: RunConfig) -> SmacResult<Self> {
        Ok(Self::with_registry(DimensionRegistry::new(space)?, config))
    }

    pub fn with_registry(registry: DimensionRegistry, config: RunConfig) -> Self {
        Self {
            registry,
            config,
            state: ProcessState::Created,
            workdir: None,
            layout: None,
            child: None,
        }
    }

    /// Working directory of the current run, while it exists.
    pub fn working_dir(&self) -> Option<&Path> {
        self.workdir.as_ref().map(TempDir::path)
    }

    pub fn layout(&self) -> Option<&ScenarioLayout> {
        self.layout.as_ref()
    }

    fn invalid_state(&self, operation: &'static str) -> SmacError {
        ProcessError::InvalidState {
            state: self.state.name(),
            operation,
        }
        .into()
    }
}

/// Arguments handed to the optimizer, after any launcher arguments.
pub fn command_args(layout: &ScenarioLayout, config: &RunConfig, port: u16) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "--scenario-file".into(),
        layout.scenario_file.clone().into_os_string(),
        "--seed".into(),
        config.seed.to_string().into(),
        "--totalNumRunsLimit".into(),
        config.max_evaluations.to_string().into(),
        "--tae".into(),
        "IPC".into(),
        "--ipc-mechanism".into(),
        "TCP".into(),
        "--ipc-remote-port".into(),
        port.to_string().into(),
    ];
    for (key, value) in &config.hyperparameters {
        args.push(format!("--{key}").into());
        args.push(value.into());
    }
    args
}

fn child_stdio(output: ChildOutput) -> Stdio {
    match output {
        ChildOutput::Discard => Stdio::null(),
        ChildOutput::Inherit => Stdio::inherit(),
    }
}

#[async_trait]
impl OptimizerBackend for SmacProcess {
    async fn start(&mut self, port: u16) -> SmacResult<()> {
        if self.state != ProcessState::Created {
            return Err(self.invalid_state("start"));
        }

        let root = self.config.resolve_working_root();
        std::fs::create_dir_all(&root).map_err(|source| SmacError::ArtifactWrite {
            path: root.clone(),
            source,
        })?;
        let workdir = tempfile::Builder::new()
            .prefix("smac-run-")
            .tempdir_in(&root)
            .map_err(|source| SmacError::ArtifactWrite {
                path: root.clone(),
                source,
            })?;
        let workdir = self.workdir.insert(workdir);
        let layout = write_artifacts(&self.registry, &self.config, workdir.path())?;

        let program = self.config.resolve_executable();
        let mut command = Command::new(&program);
        command
            .args(&self.config.launcher_args)
            .args(command_args(&layout, &self.config, port))
            .current_dir(&layout.root)
            .stdin(Stdio::null())
            .stdout(child_stdio(self.config.child_output))
            .stderr(child_stdio(self.config.child_output))
            .kill_on_drop(true);

        let child = command
            .spawn()
            .map_err(|source| ProcessError::SpawnFailed {
                program: program.clone(),
                source,
            })?;
        info!(
            program = %program.display(),
            pid = child.id(),
            port,
            workdir = %layout.root.display(),
            "optimizer spawned"
        );

        self.child = Some(child);
        self.layout = Some(layout);
        self.state = ProcessState::Running;
        Ok(())
    }

    async fn poll(&mut self) -> SmacResult<ProcessState> {
        if self.state == ProcessState::Running {
            if let Some(child) = self.child.as_mut() {
                if let Some(status) = child.try_wait()? {
                    info!(%status, "optimizer exited");
                    self.state = ProcessState::Finished;
                }
            }
        }
        Ok(self.state)
    }

    async fn stop(&mut self) -> SmacResult<()> {
        if self.state != ProcessState::Running {
            return Ok(());
        }
        let Some(child) = self.child.as_mut() else {
            self.state = ProcessState::Finished;
            return Ok(());
        };

        if let Some(status) = child.try_wait()? {
            info!(%status, "optimizer exited");
            self.state = ProcessState::Finished;
            return Ok(());
        }

        child.start_kill()?;
        match tokio::time::timeout(self.config.shutdown_timeout(), child.wait()).await {
            Ok(status) => {
                let status = status?;
                info!(%status, "optimizer killed");
            }
            Err(_) => warn!(
                grace_ms = self.config.shutdown_timeout_ms,
                "optimizer did not exit within the grace period after kill"
            ),
        }
        self.state = ProcessState::Killed;
        Ok(())
    }

    async fn best_result(&self) -> SmacResult<BestTrajectory> {
        if !self.state.is_terminal() {
            return Err(self.invalid_state("read the best result"));
        }
        let Some(layout) = &self.layout else {
            return Err(self.invalid_state("read the best result"));
        };

        let path = layout.trajectory_file(self.config.seed);
        let contents = match tokio::fs::read(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ProcessError::NoTrajectoryRecorded { path }.into())
            }
            Err(e) => return Err(e.into()),
        };

        let mut reader = trajectory_reader(true).from_reader(contents.as_slice());
        let mut last = None;
        for record in reader.records() {
            let record = record.map_err(|e| ProtocolError::MalformedTrajectory {
                line: path.display().to_string(),
                reason: e.to_string(),
            })?;
            if record.iter().any(|field| !field.is_empty()) {
                last = Some(record);
            }
        }
        match last {
            Some(record) => Ok(parse_trajectory_record(&record, &self.registry)?),
            None => Err(ProcessError::NoTrajectoryRecorded { path }.into()),
        }
    }

    async fn teardown(&mut self) {
        if let Some(mut child) = self.child.take() {
            match child.try_wait() {
                Ok(Some(_)) => {}
                Ok(None) => {
                    if let Err(e) = child.start_kill() {
                        warn!(error = %e, "failed to kill optimizer during teardown");
                    } else if tokio::time::timeout(self.config.shutdown_timeout(), child.wait())
                        .await
                        .is_err()
                    {
                        warn!("optimizer still running after teardown kill");
                    }
                    self.state = ProcessState::Killed;
                }
                Err(e) => warn!(error = %e, "failed to query optimizer status during teardown"),
            }
        }

        if let Some(workdir) = self.workdir.take() {
            let path = workdir.path().to_path_buf();
            match workdir.close() {
                Ok(()) => debug!(workdir = %path.display(), "working directory removed"),
                Err(e) => warn!(
                    workdir = %path.display(),
                    error = %e,
                    "failed to remove working directory"
                ),
            }
        }
    }

    fn state(&self) -> ProcessState {
        self.state
    }
}

impl Drop for SmacProcess {
    fn drop(&mut self) {
        if let Some(child) = self.child.as_mut() {
            if matches!(child.try_wait(), Ok(None)) {
                let _ = child.start_kill();
            }
        }
    }
}
