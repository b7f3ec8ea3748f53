//! Run configuration for one optimization run.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config_error;
use crate::errors::SmacResult;

/// Environment variable naming the optimizer executable.
pub const EXECUTABLE_ENV: &str = "SMAC_EXECUTABLE";
/// Environment variable overriding the first port tried.
pub const BASE_PORT_ENV: &str = "SMAC_BASE_PORT";
/// Environment variable overriding the working-directory root.
pub const WORKING_ROOT_ENV: &str = "SMAC_WORKING_ROOT";

/// What happens to the child's stdout and stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChildOutput {
    #[default]
    Discard,
    Inherit,
}

/// Configuration for a single optimization run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Directory under which the per-run working directory is created.
    /// `None` uses the system temporary directory.
    pub working_root: Option<PathBuf>,

    /// Optimizer executable. `None` falls back to `SMAC_EXECUTABLE`, then to
    /// `smac` on the `PATH`.
    pub executable: Option<PathBuf>,

    /// Arguments placed before the optimizer's own, for launching it through
    /// an interpreter (`java -jar`, a shell script).
    pub launcher_args: Vec<String>,

    /// Address the protocol channel listens on.
    pub bind_address: IpAddr,

    /// First port tried when binding the protocol channel.
    pub base_port: u16,

    /// Number of consecutive ports tried before giving up.
    pub port_range: u16,

    /// Total number of objective evaluations the optimizer may request.
    pub max_evaluations: usize,

    /// Seed handed to the optimizer; also selects its trajectory file name.
    pub seed: u32,

    /// Cutoff time written into the scenario file.
    pub cutoff_time: u64,

    /// Upper bound on one wait for a proposal before liveness is re-checked.
    pub proposal_timeout_ms: u64,

    /// Grace period for the child to exit after it has been killed.
    pub shutdown_timeout_ms: u64,

    /// Upper bound on writing one report back to the optimizer.
    pub report_timeout_ms: u64,

    pub child_output: ChildOutput,

    /// Model hyperparameters passed through verbatim as `--<key> <value>`.
    pub hyperparameters: BTreeMap<String, String>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            working_root: None,
            executable: None,
            launcher_args: Vec::new(),
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            base_port: 5050,
            port_range: 1000,
            max_evaluations: 100,
            seed: 1,
            cutoff_time: 18000,
            proposal_timeout_ms: 3000,
            shutdown_timeout_ms: 5000,
            report_timeout_ms: 5000,
            child_output: ChildOutput::Discard,
            hyperparameters: BTreeMap::new(),
        }
    }
}

impl RunConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a configuration from a JSON file. Missing fields take their
    /// defaults.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> SmacResult<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&contents)?;
        config.check()?;
        Ok(config)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(mut self) -> SmacResult<Self> {
        if let Ok(executable) = std::env::var(EXECUTABLE_ENV) {
            self.executable = Some(PathBuf::from(executable));
        }
        if let Ok(port) = std::env::var(BASE_PORT_ENV) {
            self.base_port = port
                .parse()
                .map_err(|_| config_error!("{BASE_PORT_ENV} is not a port number: {port}"))?;
        }
        if let Ok(root) = std::env::var(WORKING_ROOT_ENV) {
            self.working_root = Some(PathBuf::from(root));
        }
        Ok(self)
    }

    pub fn with_max_evaluations(mut self, n: usize) -> Self {
        self.max_evaluations = n;
        self
    }

    pub fn with_seed(mut self, seed: u32) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_executable(mut self, path: impl Into<PathBuf>) -> Self {
        self.executable = Some(path.into());
        self
    }

    pub fn with_launcher(mut self, executable: impl Into<PathBuf>, args: Vec<String>) -> Self {
        self.executable = Some(executable.into());
        self.launcher_args = args;
        self
    }

    pub fn with_working_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.working_root = Some(path.into());
        self
    }

    pub fn with_ports(mut self, base_port: u16, port_range: u16) -> Self {
        self.base_port = base_port;
        self.port_range = port_range;
        self
    }

    pub fn with_proposal_timeout(mut self, timeout: Duration) -> Self {
        self.proposal_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_report_timeout(mut self, timeout: Duration) -> Self {
        self.report_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_child_output(mut self, output: ChildOutput) -> Self {
        self.child_output = output;
        self
    }

    pub fn with_hyperparameter(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.hyperparameters.insert(key.into(), value.to_string());
        self
    }

    pub fn proposal_timeout(&self) -> Duration {
        Duration::from_millis(self.proposal_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn report_timeout(&self) -> Duration {
        Duration::from_millis(self.report_timeout_ms)
    }

    /// The executable to spawn, after config and environment fallbacks.
    pub fn resolve_executable(&self) -> PathBuf {
        if let Some(path) = &self.executable {
            return path.clone();
        }
        if let Ok(path) = std::env::var(EXECUTABLE_ENV) {
            return PathBuf::from(path);
        }
        if cfg!(windows) {
            PathBuf::from("smac.bat")
        } else {
            PathBuf::from("smac")
        }
    }

    pub fn resolve_working_root(&self) -> PathBuf {
        self.working_root.clone().unwrap_or_else(std::env::temp_dir)
    }

    /// Reject settings the run cannot work with.
    pub fn check(&self) -> SmacResult<()> {
        if self.max_evaluations == 0 {
            return Err(config_error!("max_evaluations must be at least 1"));
        }
        if self.port_range == 0 {
            return Err(config_error!("port_range must be at least 1"));
        }
        if self.proposal_timeout_ms == 0 {
            return Err(config_error!("proposal_timeout_ms must be positive"));
        }
        if self.report_timeout_ms == 0 {
            return Err(config_error!("report_timeout_ms must be positive"));
        }
        for key in self.hyperparameters.keys() {
            if key.is_empty() || key.starts_with('-') || key.chars().any(char::is_whitespace) {
                return Err(config_error!("invalid hyperparameter name: {key:?}"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SmacError;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn default_config() {
        let config = RunConfig::default();
        assert_eq!(config.base_port, 5050);
        assert_eq!(config.port_range, 1000);
        assert_eq!(config.seed, 1);
        assert_eq!(config.cutoff_time, 18000);
        assert_eq!(config.proposal_timeout(), Duration::from_secs(3));
        assert_eq!(config.report_timeout(), Duration::from_secs(5));
        assert_eq!(config.child_output, ChildOutput::Discard);
        assert!(config.check().is_ok());
    }

    #[test]
    fn builder_chain() {
        let config = RunConfig::new()
            .with_max_evaluations(20)
            .with_seed(7)
            .with_ports(6000, 10)
            .with_hyperparameter("rf-num-trees", 10)
            .with_executable("/opt/smac/smac");
        assert_eq!(config.max_evaluations, 20);
        assert_eq!(config.seed, 7);
        assert_eq!(config.base_port, 6000);
        assert_eq!(config.hyperparameters.get("rf-num-trees").map(String::as_str), Some("10"));
        assert_eq!(config.resolve_executable(), PathBuf::from("/opt/smac/smac"));
    }

    #[test]
    fn zero_budget_is_rejected() {
        let config = RunConfig::new().with_max_evaluations(0);
        assert!(matches!(config.check(), Err(SmacError::Config(_))));
    }

    #[test]
    fn zero_report_timeout_is_rejected() {
        let config = RunConfig::new().with_report_timeout(Duration::ZERO);
        assert!(matches!(config.check(), Err(SmacError::Config(_))));
    }

    #[test]
    fn dashed_hyperparameter_is_rejected() {
        let config = RunConfig::new().with_hyperparameter("--rf-num-trees", 10);
        assert!(matches!(config.check(), Err(SmacError::Config(_))));
    }

    #[test]
    fn load_partial_json_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"max_evaluations": 5, "seed": 3, "hyperparameters": {{"rf-num-trees": "8"}}}}"#
        )
        .unwrap();

        let config = RunConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.max_evaluations, 5);
        assert_eq!(config.seed, 3);
        assert_eq!(config.base_port, 5050);
        assert_eq!(config.hyperparameters.len(), 1);
    }

    #[test]
    fn malformed_json_file_is_a_serialization_error() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(matches!(
            RunConfig::from_json_file(file.path()),
            Err(SmacError::Serialization(_))
        ));
    }
}
