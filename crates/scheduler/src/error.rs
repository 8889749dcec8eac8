use pretvm_graph::GraphError;
use thiserror::Error;

use crate::timeline::Phase;

/// Failure to turn a symbolic operand into a platform symbol.
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("Reaction '{reaction}' has no body to execute")]
    MissingEntryPoint { reaction: String },

    #[error("No injected connection for '{what}' in this domain")]
    UnknownConnection { what: String },

    #[error("Label '{label}' is not defined on core {core}")]
    UnknownLabel { label: String, core: usize },

    #[error("Label '{label}' is defined twice on core {core}")]
    DuplicateLabel { label: String, core: usize },
}

/// Prepare/cleanup placement failures. Each names the connection and the
/// reader involved.
#[derive(Error, Debug)]
pub enum InjectionError {
    #[error("Reader '{reader}' of '{connection}' is scheduled before its writer '{writer}'")]
    ReaderBeforeWriter {
        connection: String,
        reader: String,
        writer: String,
    },

    #[error(
        "Prepare code for '{connection}' would land at index {index} in the block of '{reader}', \
         outside {first}..={last}"
    )]
    InsertionOutsideBlock {
        connection: String,
        reader: String,
        index: usize,
        first: usize,
        last: usize,
    },

    #[error("Connection '{connection}' needs injected code but has no reader")]
    NoReader { connection: String },
}

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Injection(#[from] InjectionError),

    #[error("Invalid core count {0}: at least one core is required")]
    InvalidCoreCount(usize),

    #[error("The {phase} phase needs more than {limit} time steps (raise max-time-steps)")]
    TooManyTimeSteps { phase: Phase, limit: usize },

    #[error("Hyperperiod of the timer periods does not fit in 64 bits")]
    HyperperiodOverflow,

    #[error("Trigger '{trigger}' fires beyond the representable time range")]
    TimeOverflow { trigger: String },
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
