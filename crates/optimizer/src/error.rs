use derive_more::Display;

/// Error type shared by the decision engine and its collaborators.
#[derive(Debug, Display)]
pub enum OptimizerError {
    /// The metrics/decision store failed. Aborts the whole cycle.
    #[display("data source failure: {reason}")]
    DataSource { reason: String },
    /// Configuration is invalid or inconsistent. Only the affected link is skipped.
    #[display("invalid configuration: {reason}")]
    InvalidConfiguration { reason: String },
    /// Evaluating a single link failed, e.g. its worker panicked.
    #[display("pair evaluation failed: {reason}")]
    PairEvaluation { reason: String },
}

impl core::error::Error for OptimizerError {}

impl OptimizerError {
    pub fn data_source(reason: impl Into<String>) -> Self {
        Self::DataSource {
            reason: reason.into(),
        }
    }

    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            reason: reason.into(),
        }
    }

    pub fn pair_evaluation(reason: impl Into<String>) -> Self {
        Self::PairEvaluation {
            reason: reason.into(),
        }
    }

    /// Whether the error must abort the running cycle instead of just the link.
    pub fn is_cycle_fatal(&self) -> bool {
        matches!(self, Self::DataSource { .. })
    }
}
