//! # smac-bridge
//!
//! Drives SMAC, an external sequential model-based optimizer, as a child
//! process. The bridge writes a scenario into a private working directory,
//! launches SMAC pointed at a local TCP port, answers each proposal SMAC
//! sends by evaluating a caller-supplied objective, and reads the best
//! configuration back from SMAC's trajectory log when it finishes.
//!
//! Most callers only need [`minimize`]; [`Optimizer`] exposes the run record,
//! a [`StopHandle`] and pluggable [`OptimizerBackend`]s.

mod channel;
mod codec;
mod optimizer;
mod registry;
mod scenario;
mod supervisor;

pub use channel::{ChannelState, Incoming, ProtocolChannel};
pub use codec::{
    format_report, parse_proposal, parse_report, parse_trajectory, parse_trajectory_record,
    trajectory_reader, MIN_REPORTED_RUNTIME,
};
pub use optimizer::{
    minimize, minimize_with_config, run, EvaluationRecord, ObjectiveArgs, OptimizationOutcome,
    Optimizer, StopHandle,
};
pub use registry::{Dimension, DimensionKind, DimensionRegistry};
pub use scenario::{render_parameter_file, render_scenario, write_artifacts, ScenarioLayout};
pub use supervisor::{command_args, OptimizerBackend, ProcessState, SmacProcess};

pub use smac_types;
