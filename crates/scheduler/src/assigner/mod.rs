//! Core assignment and code generation for one scheduling domain.
//!
//! Split into focused submodules:
//! - `core`: Assigner struct, phase layout and barriers
//! - `emission`: per-step and per-block instruction generation
//! - `scheduling`: node selection and round-robin core assignment

mod core;
mod emission;
mod scheduling;
#[cfg(test)]
mod tests;

pub use self::core::{Assigner, DomainInputs, PERIODIC_LABEL};
pub(crate) use scheduling::{Guard, StepPlan};
