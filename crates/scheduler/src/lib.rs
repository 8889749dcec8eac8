//! Static multi-core scheduling of reactor programs onto the PRET-VM
//! instruction set.

pub mod assigner;
pub mod compile;
pub mod error;
pub(crate) mod injector;
pub mod instruction;
pub mod metrics;
pub mod platform;
pub mod resolve;
pub mod schedule;
pub mod timeline;
pub mod types;

pub use assigner::{Assigner, DomainInputs, PERIODIC_LABEL};
pub use compile::{compile, Compiler, DomainAnalysis};
pub use error::{InjectionError, ResolveError, Result, SchedulerError};
pub use instruction::{Instruction, Label, Opcode, Operand, Register, Symbol, SymbolRef};
pub use metrics::{CoreStats, ScheduleStats};
pub use platform::{FlexPretPlatform, PlatformFamily, PlatformResolver, ResolveContext, UcPlatform};
pub use resolve::Resolver;
pub use schedule::{BlockInfo, Schedule};
pub use timeline::{Phase, TimeStep, Timeline};
pub use types::{CompiledProgram, DomainSchedule};
