use thiserror::Error;

/// Errors raised by the stats pipeline.
///
/// `StoreUnavailable` and `IncompleteRecord` stop a run. `LedgerMalformed` is
/// recovered by rebuilding the open-inquiry set from the inbox snapshot.
#[derive(Debug, Error)]
pub enum StatsError {
    #[error("store unavailable ({store}): {message}")]
    StoreUnavailable { store: String, message: String },

    #[error("incomplete record on '{range}' (row {row}): {detail}. Fix the sheet and re-run")]
    IncompleteRecord {
        range: String,
        row: usize,
        detail: String,
    },

    #[error("open inquiry ledger is malformed at line {line}: {message}")]
    LedgerMalformed { line: usize, message: String },

    #[error("report is missing expected stat '{0}'")]
    MissingStat(String),

    #[error("'{0}' is not a recognised date")]
    InvalidDate(String),

    #[error("{0} is not a valid mbox file")]
    NotMbox(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("operator input closed before an answer was given")]
    PromptClosed,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl StatsError {
    pub fn store(store: impl Into<String>, message: impl ToString) -> Self {
        Self::StoreUnavailable {
            store: store.into(),
            message: message.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, StatsError>;
