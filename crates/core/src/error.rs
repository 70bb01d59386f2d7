use thiserror::Error;

/// Failure kinds of a rebalancing run.
///
/// A zero-value portfolio is not represented here: it resolves to an empty
/// [`crate::domain::recommendation::RebalancePlan`] carrying a message.
#[derive(Debug, Clone, Error)]
pub enum RebalanceError {
    #[error("price feed still rate limited after {attempts} attempts")]
    UpstreamRateLimited { attempts: u32 },

    #[error("price feed request failed (status={status:?}): {detail}")]
    UpstreamFetchFailed { status: Option<u16>, detail: String },

    #[error("insufficient price history: {usable} usable return rows, need at least {required}")]
    InsufficientHistory { usable: usize, required: usize },

    #[error("portfolio optimization failed: {0}")]
    OptimizationFailed(String),

    #[error("invalid rebalance request: {0}")]
    InvalidRequest(String),
}

impl RebalanceError {
    pub fn fetch_failed(detail: impl Into<String>) -> Self {
        Self::UpstreamFetchFailed {
            status: None,
            detail: detail.into(),
        }
    }
}
