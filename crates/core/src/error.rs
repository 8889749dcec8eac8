use thiserror::Error;

use crate::entity::EntityKind;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Program description parse error: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Unknown {kind} '{name}' referenced from '{context}'")]
    UnknownReference {
        kind: EntityKind,
        name: String,
        context: String,
    },

    #[error("Duplicate {kind} name '{name}'")]
    DuplicateName { kind: EntityKind, name: String },

    #[error("Invalid program: {0}")]
    InvalidProgram(String),

    #[error("Attribute '{attribute}' cannot be attached to a {kind}")]
    UnsupportedTarget { attribute: String, kind: EntityKind },

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
