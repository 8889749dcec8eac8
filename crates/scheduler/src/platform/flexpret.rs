use pretvm_core::{PortDirection, PortInstance, ReactionInstance, ReactorInstance, TriggerInstance};

use super::{PlatformResolver, ResolveContext};
use crate::error::ResolveError;
use crate::instruction::{Register, Symbol};

/// Flat, link-time symbols for bare-metal and RTOS targets: one `_self`
/// struct per reactor and one free function per reaction.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlexPretPlatform;

impl FlexPretPlatform {
    fn flat(full_name: &str) -> String {
        full_name.replace('.', "_")
    }

    fn self_struct(reactor: &ReactorInstance) -> String {
        format!("{}_self", Self::flat(&reactor.full_name))
    }

    /// Inputs are pointers into the writer's struct, outputs are embedded.
    fn port_field(cx: &ResolveContext<'_>, port: &PortInstance, field: &str) -> String {
        let owner = Self::self_struct(cx.env.reactor(port.reactor));
        match port.direction {
            PortDirection::Input => format!("&({}->_lf_{}->{})", owner, port.name, field),
            PortDirection::Output => format!("&({}->_lf_{}.{})", owner, port.name, field),
        }
    }

    fn connection_stem(output: &PortInstance, input: &PortInstance) -> String {
        format!("{}_to_{}", Self::flat(&output.full_name), Self::flat(&input.full_name))
    }
}

impl PlatformResolver for FlexPretPlatform {
    fn name(&self) -> &'static str {
        "flexpret"
    }

    fn reactor_state(&self, _cx: &ResolveContext<'_>, reactor: &ReactorInstance) -> Result<Symbol, ResolveError> {
        Ok(Symbol(Self::self_struct(reactor)))
    }

    fn reactor_time(&self, _cx: &ResolveContext<'_>, reactor: &ReactorInstance) -> Result<Symbol, ResolveError> {
        Ok(Symbol(format!("&({}->base.tag.time)", Self::self_struct(reactor))))
    }

    fn port_data(&self, cx: &ResolveContext<'_>, port: &PortInstance) -> Result<Symbol, ResolveError> {
        Ok(Symbol(Self::port_field(cx, port, "value")))
    }

    fn port_present(&self, cx: &ResolveContext<'_>, port: &PortInstance) -> Result<Symbol, ResolveError> {
        Ok(Symbol(Self::port_field(cx, port, "is_present")))
    }

    fn reaction_body(&self, cx: &ResolveContext<'_>, reaction: &ReactionInstance) -> Result<Symbol, ResolveError> {
        if !reaction.has_body {
            return Err(ResolveError::MissingEntryPoint { reaction: reaction.full_name.clone() });
        }
        let reactor = cx.env.reactor(reaction.reactor);
        Ok(Symbol(format!("{}_reaction_{}", Self::flat(&reactor.full_name), reaction.index)))
    }

    fn reaction_deadline_handler(
        &self,
        cx: &ResolveContext<'_>,
        reaction: &ReactionInstance,
    ) -> Result<Option<Symbol>, ResolveError> {
        let reactor = cx.env.reactor(reaction.reactor);
        Ok(reaction
            .deadline
            .map(|_| Symbol(format!("{}_deadline_function_{}", Self::flat(&reactor.full_name), reaction.index))))
    }

    fn queue_head(
        &self,
        _cx: &ResolveContext<'_>,
        main: &ReactorInstance,
        trigger: &TriggerInstance,
    ) -> Result<Symbol, ResolveError> {
        Ok(Symbol(format!("&({}->pqueue_heads[{}])", Self::self_struct(main), trigger.id.index())))
    }

    fn queue_head_time(&self, cx: &ResolveContext<'_>, port: &PortInstance) -> Result<Symbol, ResolveError> {
        let index = cx.buffer_into(port)?;
        Ok(Symbol(format!("&(pqueue_heads[{}]->base.tag.time)", index)))
    }

    fn connection_prepare(
        &self,
        _cx: &ResolveContext<'_>,
        output: &PortInstance,
        input: &PortInstance,
    ) -> Result<Symbol, ResolveError> {
        Ok(Symbol(format!("{}_prepare", Self::connection_stem(output, input))))
    }

    fn connection_prepare_arg(
        &self,
        cx: &ResolveContext<'_>,
        output: &PortInstance,
        input: &PortInstance,
    ) -> Result<Symbol, ResolveError> {
        let index = cx.buffer_index(cx.connection(output, input)?)?;
        Ok(Symbol(format!("&(pqueues[{}])", index)))
    }

    fn connection_cleanup(
        &self,
        _cx: &ResolveContext<'_>,
        output: &PortInstance,
        input: &PortInstance,
    ) -> Result<Symbol, ResolveError> {
        Ok(Symbol(format!("{}_cleanup", Self::connection_stem(output, input))))
    }

    fn connection_cleanup_args(
        &self,
        cx: &ResolveContext<'_>,
        output: &PortInstance,
        input: &PortInstance,
    ) -> Result<(Symbol, Symbol), ResolveError> {
        let index = cx.buffer_index(cx.connection(output, input)?)?;
        let writer = Self::self_struct(cx.env.reactor(output.reactor));
        Ok((Symbol(format!("&(pqueues[{}])", index)), Symbol(writer)))
    }

    fn register(&self, reg: Register) -> Symbol {
        let name = match reg {
            Register::Zero => "&zero".to_string(),
            Register::One => "&one".to_string(),
            Register::Offset => "&time_offset".to_string(),
            Register::Counter(c) => format!("&counter_{}", c),
            Register::BinarySema(c) => format!("&binary_sema_{}", c),
            Register::ReturnAddr(c) => format!("&return_addr_{}", c),
            Register::Temp(i) => format!("&temp_{}", i),
        };
        Symbol(name)
    }
}
