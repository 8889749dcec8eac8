pub mod attributes;
pub mod config;
pub mod description;
pub mod diagnostics;
pub mod domain;
pub mod entity;
pub mod environment;
pub mod error;
pub mod time;

pub use attributes::{Attribute, Attributed, ConfigOverlay};
pub use config::{PlatformType, TargetConfig, ThreadPolicy};
pub use diagnostics::{Diagnostic, Diagnostics, Severity};
pub use domain::{Domain, DomainKind, DomainMap};
pub use entity::*;
pub use environment::*;
pub use error::*;
pub use time::{Tag, TimeValue};
