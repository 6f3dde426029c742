//! Error type shared by the public diagram operations.

use thiserror::Error;

/// Failures surfaced by diagram operations.
///
/// Persistence problems are deliberately absent: storage failures degrade to no-ops and are only
/// logged.
#[derive(Debug, Error)]
pub enum DiagramError {
    /// The data source rejected a query.
    #[error("data source rejected {query}: {reason}")]
    DataSource { query: String, reason: String },
    /// A layer transition is already running on the named layer.
    #[error("layer {0:?} is processing a transition")]
    LayerBusy(String),
    /// The root layer cannot be closed.
    #[error("the root layer cannot be closed")]
    RootLayer,
    #[error("no layer {0}")]
    UnknownLayer(String),
    #[error("no node named {0:?}")]
    UnknownNode(String),
    /// A settings patch carried a value of the wrong shape.
    #[error("invalid value for setting {name}: {reason}")]
    InvalidSetting { name: String, reason: String },
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("reset was not confirmed")]
    ResetNotConfirmed,
}

impl DiagramError {
    pub(crate) fn data_source(query: impl std::fmt::Display, reason: impl std::fmt::Display) -> Self {
        Self::DataSource {
            query: query.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn invalid_setting(name: &str, reason: impl Into<String>) -> Self {
        Self::InvalidSetting {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result alias used across the crate.
pub type Result<T, E = DiagramError> = std::result::Result<T, E>;
