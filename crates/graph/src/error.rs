use thiserror::Error;

use crate::dag::NodeKey;

#[derive(Error, Debug)]
pub enum GraphError {
    /// Zero-delay dependency cycle. `reactions` holds fully qualified names.
    #[error("Causality cycle among zero-delay dependencies: {}", reactions.join(", "))]
    Cycle {
        reactions: Vec<String>,
        nodes: Vec<NodeKey>,
    },
}
