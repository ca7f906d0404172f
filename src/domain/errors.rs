use thiserror::Error;

/// Error kinds the engine itself branches on, mirroring the shape of the
/// domain-level error enums above (one small enum per concern, `anyhow`
/// everywhere else via `#[from]`).
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("adapter unavailable: {0}")]
    AdapterUnavailable(String),

    #[error("requested symbol not found on adapter: {symbol}")]
    SymbolNotFound { symbol: String },

    #[error("invalid alert data ({alert_id}): {reason}")]
    InvalidAlertData { alert_id: String, reason: String },

    #[error("lease held by another owner")]
    LeaseConflict,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
