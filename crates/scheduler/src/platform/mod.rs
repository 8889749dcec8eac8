//! Platform symbol naming.
//!
//! The scheduler emits symbolic operands; a [`PlatformResolver`] turns each
//! one into the name the target runtime uses for it. The family is picked
//! once per domain from the target platform.

mod flexpret;
mod uc;

use std::ops::Range;

use pretvm_core::{
    ConnectionId, EntityRef, Environment, PlatformType, PortInstance, ReactionInstance, ReactorInstance, TriggerInstance,
};

use crate::error::ResolveError;
use crate::instruction::{Instruction, Register, Symbol};

pub use flexpret::FlexPretPlatform;
pub use uc::UcPlatform;

/// Program-wide facts a resolver may need besides the entity itself.
#[derive(Debug, Clone, Copy)]
pub struct ResolveContext<'a> {
    pub env: &'a Environment,
    /// Injected connections of the domain, in id order. Their position is
    /// the runtime buffer index.
    pub buffers: &'a [ConnectionId],
}

impl<'a> ResolveContext<'a> {
    pub fn new(env: &'a Environment, buffers: &'a [ConnectionId]) -> Self {
        Self { env, buffers }
    }

    pub fn buffer_index(&self, conn: ConnectionId) -> Result<usize, ResolveError> {
        self.buffers
            .iter()
            .position(|c| *c == conn)
            .ok_or_else(|| ResolveError::UnknownConnection { what: self.env.name_of(EntityRef::Connection(conn)) })
    }

    /// Buffer index of the injected connection feeding `port`.
    pub fn buffer_into(&self, port: &PortInstance) -> Result<usize, ResolveError> {
        let conn = self
            .env
            .connection_into(port.id)
            .ok_or_else(|| ResolveError::UnknownConnection { what: port.full_name.clone() })?;
        self.buffer_index(conn.id)
    }

    /// Connection joining `output` to `input`.
    pub fn connection(&self, output: &PortInstance, input: &PortInstance) -> Result<ConnectionId, ResolveError> {
        self.env
            .connection_between(output.id, input.id)
            .map(|c| c.id)
            .ok_or_else(|| ResolveError::UnknownConnection {
                what: format!("{} -> {}", output.full_name, input.full_name),
            })
    }
}

/// Naming capability of one runtime family.
pub trait PlatformResolver {
    fn name(&self) -> &'static str;

    fn reactor_state(&self, cx: &ResolveContext<'_>, reactor: &ReactorInstance) -> Result<Symbol, ResolveError>;

    /// Storage of a reactor's current logical time.
    fn reactor_time(&self, cx: &ResolveContext<'_>, reactor: &ReactorInstance) -> Result<Symbol, ResolveError>;

    fn port_data(&self, cx: &ResolveContext<'_>, port: &PortInstance) -> Result<Symbol, ResolveError>;

    /// Boolean presence flag of a port.
    fn port_present(&self, cx: &ResolveContext<'_>, port: &PortInstance) -> Result<Symbol, ResolveError>;

    fn reaction_body(&self, cx: &ResolveContext<'_>, reaction: &ReactionInstance) -> Result<Symbol, ResolveError>;

    /// `None` when the reaction declares no deadline.
    fn reaction_deadline_handler(
        &self,
        cx: &ResolveContext<'_>,
        reaction: &ReactionInstance,
    ) -> Result<Option<Symbol>, ResolveError>;

    fn queue_head(
        &self,
        cx: &ResolveContext<'_>,
        main: &ReactorInstance,
        trigger: &TriggerInstance,
    ) -> Result<Symbol, ResolveError>;

    fn queue_head_time(&self, cx: &ResolveContext<'_>, port: &PortInstance) -> Result<Symbol, ResolveError>;

    fn connection_prepare(
        &self,
        cx: &ResolveContext<'_>,
        output: &PortInstance,
        input: &PortInstance,
    ) -> Result<Symbol, ResolveError>;

    fn connection_prepare_arg(
        &self,
        cx: &ResolveContext<'_>,
        output: &PortInstance,
        input: &PortInstance,
    ) -> Result<Symbol, ResolveError>;

    fn connection_cleanup(
        &self,
        cx: &ResolveContext<'_>,
        output: &PortInstance,
        input: &PortInstance,
    ) -> Result<Symbol, ResolveError>;

    fn connection_cleanup_args(
        &self,
        cx: &ResolveContext<'_>,
        output: &PortInstance,
        input: &PortInstance,
    ) -> Result<(Symbol, Symbol), ResolveError>;

    /// Where prepare code goes in a reader's block, given the block built so
    /// far and the range of instructions that invoke the reaction.
    fn prepare_insertion_index(&self, _instructions: &[Instruction], invocation: Range<usize>) -> usize {
        invocation.start
    }

    fn register(&self, reg: Register) -> Symbol {
        let name = match reg {
            Register::Zero => "&zero".to_string(),
            Register::One => "&one".to_string(),
            Register::Offset => "&time_offset".to_string(),
            Register::Counter(c) => format!("&counters[{}]", c),
            Register::BinarySema(c) => format!("&binary_sema[{}]", c),
            Register::ReturnAddr(c) => format!("&return_addr[{}]", c),
            Register::Temp(i) => format!("&temp[{}]", i),
        };
        Symbol(name)
    }
}

/// The runtime family a platform belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformFamily {
    /// Multi-threaded reactor-uc runtime.
    Uc,
    /// Bare-metal and RTOS targets with flat symbol names.
    FlexPret,
}

impl PlatformFamily {
    pub fn for_platform(platform: PlatformType) -> Self {
        match platform {
            PlatformType::FlexPret => PlatformFamily::FlexPret,
            _ => PlatformFamily::Uc,
        }
    }
}

/// Path segments of a full name below the main reactor.
pub(crate) fn inner_path(full_name: &str) -> Vec<&str> {
    full_name.split('.').skip(1).collect()
}
