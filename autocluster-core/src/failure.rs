use std::fmt::{self, Display};
use std::str::FromStr;

use tracing::{error, warn};

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
/// The final result of a startup run.
pub enum Outcome {
    /// Startup should carry on.
    Success,
    /// Startup should be aborted.
    Failure,
}

impl Outcome {
    #[inline]
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }
}

#[derive(Debug, Clone, Default, Eq, PartialEq)]
/// What to do with the node's startup when clustering fails.
pub enum FailureMode {
    /// Abort startup.
    Stop,
    #[default]
    /// Carry on starting as an unclustered node.
    Ignore,
    /// A value which is neither `stop` nor `ignore`.
    ///
    /// This is treated like [FailureMode::Ignore] but logged.
    Invalid(String),
}

impl FailureMode {
    /// Reads a configured value, anything unknown is kept as [FailureMode::Invalid].
    pub fn from_config(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "stop" => FailureMode::Stop,
            "ignore" => FailureMode::Ignore,
            _ => FailureMode::Invalid(s.to_string()),
        }
    }
}

impl FromStr for FailureMode {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from_config(s))
    }
}

impl Display for FailureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureMode::Stop => f.write_str("stop"),
            FailureMode::Ignore => f.write_str("ignore"),
            FailureMode::Invalid(raw) => write!(f, "{} (invalid)", raw),
        }
    }
}

/// Maps the configured failure mode to the outcome of a failed run.
pub fn resolve(mode: &FailureMode) -> Outcome {
    match mode {
        FailureMode::Stop => {
            error!("Failed to cluster the node, aborting startup.");
            Outcome::Failure
        },
        FailureMode::Ignore => {
            warn!("Failed to cluster the node, continuing startup unclustered.");
            Outcome::Success
        },
        FailureMode::Invalid(raw) => {
            warn!(
                value = %raw,
                "Invalid autocluster failure mode, expected `stop` or `ignore`. Continuing startup unclustered."
            );
            Outcome::Success
        },
    }
}
