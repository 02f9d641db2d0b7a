//! Error types for model and formula operations.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    /// An item with this display name already exists in the model.
    #[error("item named '{0}' already exists")]
    DuplicateItem(String),

    /// No item with this name or id.
    #[error("unknown item '{0}'")]
    UnknownItem(String),

    /// Axis removal rejected while items are still assigned to it.
    #[error("axis {0} is still in use")]
    AxisInUse(usize),

    /// No axis with this index.
    #[error("no axis {0}")]
    UnknownAxis(usize),

    /// Item or model started twice without an intervening stop.
    #[error("'{0}' is already started")]
    AlreadyStarted(String),

    /// Archive source with this URL is already configured for the item.
    #[error("archive source '{0}' already configured")]
    DuplicateArchive(String),

    #[error(transparent)]
    Formula(#[from] FormulaError),
}

#[derive(Debug, Error)]
pub enum FormulaError {
    /// Expression failed to parse or compile.
    #[error("cannot parse formula '{expression}': {reason}")]
    Parse { expression: String, reason: String },

    /// Expression references a variable with no bound input.
    #[error("formula references unbound variable '{0}'")]
    UnboundVariable(String),
}
