// Error kinds for ingestion and analytical queries
//
// Lower layers return empty structures instead of failing; only the query
// facade turns "nothing to report" into NotFound.

use thiserror::Error;

/// Result alias for library operations
pub type Result<T> = std::result::Result<T, FinanceError>;

#[derive(Error, Debug)]
pub enum FinanceError {
    /// Ingestion was invoked without a payload
    #[error("No upload file was provided")]
    NoInput,

    /// Header or cell validation failed during normalization
    #[error("Malformed input: {reason}")]
    MalformedInput { reason: String },

    /// The query had nothing to aggregate or observe
    #[error("Not found: {what}")]
    NotFound { what: String },

    /// Too few observations to fit the forecast polynomial
    #[error("Insufficient data: need at least {required} observations, got {actual}")]
    InsufficientData { required: usize, actual: usize },

    /// The fit could not produce a finite forecast
    #[error("Numerical failure: {reason}")]
    Numerical { reason: String },

    /// The storage collaborator failed
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl FinanceError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        FinanceError::MalformedInput {
            reason: reason.into(),
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        FinanceError::NotFound { what: what.into() }
    }

    /// User-visible classification for the boundary layer
    pub fn outcome(&self) -> Outcome {
        match self {
            FinanceError::NoInput => Outcome::BadInput(BadInputReason::NoFile),
            FinanceError::MalformedInput { .. } => Outcome::BadInput(BadInputReason::WrongForm),
            FinanceError::NotFound { .. } => Outcome::NotFound,
            FinanceError::InsufficientData { .. } | FinanceError::Numerical { .. } => {
                Outcome::Unprocessable
            }
            FinanceError::Storage(_) => Outcome::Internal,
        }
    }
}

/// How a failure surfaces to a caller outside the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    NotFound,
    BadInput(BadInputReason),
    Unprocessable,
    Internal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BadInputReason {
    NoFile,
    WrongForm,
}

impl BadInputReason {
    /// Result code reported back to uploaders
    pub fn code(&self) -> &'static str {
        match self {
            BadInputReason::NoFile => "NO_FILE",
            BadInputReason::WrongForm => "WRONG_FORM",
        }
    }
}
