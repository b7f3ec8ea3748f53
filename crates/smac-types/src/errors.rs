use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the SMAC bridge
#[derive(Error, Debug)]
pub enum SmacError {
    #[error("Parameter space error: {0}")]
    Space(#[from] SpaceError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Process error: {0}")]
    Process(#[from] ProcessError),

    #[error("Failed to write artifact {}: {source}", path.display())]
    ArtifactWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No port available in range {base}..{}", *base as u32 + *count as u32)]
    NoPortAvailable { base: u16, count: u16 },

    #[error("Objective returned an invalid result at evaluation {iteration}: {value:?}")]
    InvalidObjectiveResult { iteration: usize, value: Option<f64> },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Parameter space validation errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SpaceError {
    #[error("Shape mismatch in {group} group: {names} names, {lower} lower bounds, {upper} upper bounds, {defaults} defaults")]
    ShapeMismatch {
        group: &'static str,
        names: usize,
        lower: usize,
        upper: usize,
        defaults: usize,
    },

    #[error("Range error for {name}: {message}")]
    RangeError { name: String, message: String },

    #[error("Duplicate parameter name: {name}")]
    DuplicateName { name: String },

    #[error("Categorical parameter {name} has no choices")]
    EmptyChoices { name: String },

    #[error("Invalid parameter name: {name:?}")]
    InvalidName { name: String },

    #[error("Categorical parameter {name} lists {choice:?} more than once")]
    DuplicateChoice { name: String, choice: String },

    #[error("Invalid choice {choice:?} for categorical parameter {name}")]
    InvalidChoice { name: String, choice: String },
}

/// Wire and trajectory format errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("Malformed proposal ({reason}): {line}")]
    MalformedProposal { line: String, reason: String },

    #[error("Malformed trajectory entry ({reason}): {line}")]
    MalformedTrajectory { line: String, reason: String },

    #[error("Malformed report ({reason}): {line}")]
    MalformedReport { line: String, reason: String },

    #[error("Channel is {state}, cannot {operation}")]
    ChannelState {
        state: &'static str,
        operation: &'static str,
    },
}

/// External optimizer process errors
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Failed to spawn {}: {source}", program.display())]
    SpawnFailed {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No trajectory recorded at {}", path.display())]
    NoTrajectoryRecorded { path: PathBuf },

    #[error("Optimizer process is {state}, cannot {operation}")]
    InvalidState {
        state: &'static str,
        operation: &'static str,
    },
}

/// Result type alias for SMAC bridge operations
pub type SmacResult<T> = Result<T, SmacError>;

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::SmacError::Config(format!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = SmacError::NoPortAvailable {
            base: 5050,
            count: 1000,
        };

        assert!(error.to_string().contains("5050..6050"));
    }

    #[test]
    fn test_error_conversion() {
        let space_error = SpaceError::DuplicateName {
            name: "lr".to_string(),
        };
        let smac_error: SmacError = space_error.into();

        match smac_error {
            SmacError::Space(SpaceError::DuplicateName { name }) => assert_eq!(name, "lr"),
            other => panic!("Expected Space error, got {other:?}"),
        }
    }

    #[test]
    fn test_artifact_error_names_path() {
        let error = SmacError::ArtifactWrite {
            path: PathBuf::from("/tmp/run/params.pcs"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };

        assert!(error.to_string().contains("/tmp/run/params.pcs"));
    }

    #[test]
    fn test_macros() {
        let config_err = config_error!("Missing required field: {}", "seed");
        assert!(matches!(config_err, SmacError::Config(_)));
    }
}
