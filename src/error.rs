use thiserror::Error;

/// Failure reported by the simulator collaborator. Passed through the
/// adapter untouched; nothing in this crate retries a simulator call.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct SimulatorError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl SimulatorError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

#[derive(Debug, Error)]
pub enum EnvError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("shape mismatch: expected {expected}, got {actual} ({context})")]
    Shape {
        context: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("malformed telemetry token {token:?}: {reason}")]
    Parse { token: String, reason: String },

    #[error("no action supplied for agent {0}")]
    IncompleteAction(usize),

    #[error("telemetry carries no reward for agent {0}")]
    MissingReward(usize),

    #[error("simulator failure: {0}")]
    Simulator(#[from] SimulatorError),

    #[error("episode has no accumulated telemetry")]
    EmptyEpisode,

    #[error("episode accumulator was not started")]
    EpisodeNotStarted,

    #[error("environment must be reset before stepping")]
    NotReset,

    #[error("environment is closed")]
    Closed,
}

impl EnvError {
    pub(crate) fn shape(context: &'static str, expected: usize, actual: usize) -> Self {
        Self::Shape {
            context,
            expected,
            actual,
        }
    }
}

pub type Result<T> = std::result::Result<T, EnvError>;
