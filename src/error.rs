//! Error types for schema reconciliation and configuration persistence.

use thiserror::Error;

use crate::types::ColumnType;

/// Errors raised while building, reconciling, persisting or reading through a
/// table spec configuration.
#[derive(Debug, Error)]
pub enum TableSpecError {
    // === Construction ===
    /// No source items were supplied.
    #[error("source group is empty; at least one item is required")]
    EmptySourceGroup,

    /// Intersection filtering was requested but the sources share no column.
    #[error("sources have no column in common; intersection filter mode is not possible")]
    EmptyIntersection,

    // === Persistence ===
    /// A mandatory persisted field is missing or malformed.
    #[error("invalid persisted table spec config: {reason}")]
    InvalidPersistedState { reason: String },

    /// A persisted converter id is not known to the registry.
    #[error("unknown conversion path '{converter}'")]
    UnknownConversionPath { converter: String },

    /// The config could not be rendered as YAML.
    #[error("failed to serialize table spec config: {0}")]
    Serialize(#[source] serde_yaml::Error),

    // === Materialization ===
    /// Two kept columns resolve to the same output name.
    #[error("duplicate output column name '{name}'")]
    DuplicateOutputName { name: String },

    // === Editing ===
    /// The named column has no transformation in the model.
    #[error("column '{name}' is not part of the configured schema")]
    UnknownColumn { name: String },

    /// The conversion path is not offered for the column's external type.
    #[error("conversion path '{converter}' cannot be applied to '{column}' of type {column_type}")]
    InvalidConversionPath {
        column: String,
        column_type: ColumnType,
        converter: String,
    },

    // === Reading ===
    /// The caller cancelled a running scan.
    #[error("scan cancelled")]
    Cancelled,

    /// A source item could not be scanned or read.
    #[error("failed to read item '{item}': {source}")]
    Scan {
        item: String,
        #[source]
        source: anyhow::Error,
    },

    /// The row sink rejected output.
    #[error("failed to write output: {0}")]
    Output(#[source] anyhow::Error),

    /// A cell could not be converted along its column's conversion path.
    #[error("column '{column}': cannot convert '{value}' via {converter}: {source}")]
    Conversion {
        column: String,
        value: String,
        converter: String,
        #[source]
        source: anyhow::Error,
    },
}

impl TableSpecError {
    pub(crate) fn invalid_state(reason: impl Into<String>) -> Self {
        TableSpecError::InvalidPersistedState {
            reason: reason.into(),
        }
    }
}

/// Convenience alias for results of table spec operations.
pub type Result<T> = std::result::Result<T, TableSpecError>;
