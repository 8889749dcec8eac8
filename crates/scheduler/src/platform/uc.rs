use pretvm_core::{PortInstance, ReactionInstance, ReactorInstance, TriggerInstance};

use super::{inner_path, PlatformResolver, ResolveContext};
use crate::error::ResolveError;
use crate::instruction::Symbol;

/// Names for the multi-threaded reactor-uc runtime, where the program is one
/// nested `main_reactor` struct.
#[derive(Debug, Clone, Copy, Default)]
pub struct UcPlatform;

impl UcPlatform {
    /// `main_reactor` followed by the path below the main reactor.
    fn reactor_pointer(reactor: &ReactorInstance) -> String {
        let mut parts = vec!["main_reactor"];
        parts.extend(inner_path(&reactor.full_name));
        parts.join(".")
    }

    /// `main_reactor.<reactor path>-><port>`.
    fn port_pointer(port: &PortInstance) -> String {
        format!("main_reactor.{}", inner_path(&port.full_name).join("->"))
    }

    fn flat(full_name: &str) -> String {
        full_name.replace('.', "_")
    }

    fn reaction_member(cx: &ResolveContext<'_>, reaction: &ReactionInstance) -> String {
        format!("{}->reaction{}", Self::reactor_pointer(cx.env.reactor(reaction.reactor)), reaction.index)
    }
}

impl PlatformResolver for UcPlatform {
    fn name(&self) -> &'static str {
        "uc"
    }

    fn reactor_state(&self, _cx: &ResolveContext<'_>, reactor: &ReactorInstance) -> Result<Symbol, ResolveError> {
        Ok(Symbol(format!("&({})", Self::reactor_pointer(reactor))))
    }

    fn reactor_time(&self, _cx: &ResolveContext<'_>, reactor: &ReactorInstance) -> Result<Symbol, ResolveError> {
        Ok(Symbol(format!("&(reactor_tags[{}].tag.time)", reactor.id.index())))
    }

    fn port_data(&self, _cx: &ResolveContext<'_>, port: &PortInstance) -> Result<Symbol, ResolveError> {
        Ok(Symbol(format!("&({}->value)", Self::port_pointer(port))))
    }

    fn port_present(&self, _cx: &ResolveContext<'_>, port: &PortInstance) -> Result<Symbol, ResolveError> {
        Ok(Symbol(format!("&({}->super.super.is_present)", Self::port_pointer(port))))
    }

    fn reaction_body(&self, cx: &ResolveContext<'_>, reaction: &ReactionInstance) -> Result<Symbol, ResolveError> {
        if !reaction.has_body {
            return Err(ResolveError::MissingEntryPoint { reaction: reaction.full_name.clone() });
        }
        Ok(Symbol(format!("{}.super.body", Self::reaction_member(cx, reaction))))
    }

    fn reaction_deadline_handler(
        &self,
        cx: &ResolveContext<'_>,
        reaction: &ReactionInstance,
    ) -> Result<Option<Symbol>, ResolveError> {
        Ok(reaction
            .deadline
            .map(|_| Symbol(format!("{}.super.deadline_handler", Self::reaction_member(cx, reaction)))))
    }

    fn queue_head(
        &self,
        cx: &ResolveContext<'_>,
        _main: &ReactorInstance,
        trigger: &TriggerInstance,
    ) -> Result<Symbol, ResolveError> {
        let owner = Self::reactor_pointer(cx.env.reactor(trigger.reactor));
        Ok(Symbol(format!("&({}->{}->super.super.is_present)", owner, trigger.name)))
    }

    fn queue_head_time(&self, cx: &ResolveContext<'_>, port: &PortInstance) -> Result<Symbol, ResolveError> {
        let index = cx.buffer_into(port)?;
        Ok(Symbol(format!("((Event*)trigger_buffers[{}].buffer.head)->tag.time", index)))
    }

    fn connection_prepare(
        &self,
        _cx: &ResolveContext<'_>,
        output: &PortInstance,
        input: &PortInstance,
    ) -> Result<Symbol, ResolveError> {
        Ok(Symbol(format!(
            "prepare_connection_{}_{}",
            Self::flat(&output.full_name),
            Self::flat(&input.full_name)
        )))
    }

    fn connection_prepare_arg(
        &self,
        cx: &ResolveContext<'_>,
        output: &PortInstance,
        input: &PortInstance,
    ) -> Result<Symbol, ResolveError> {
        let index = cx.buffer_index(cx.connection(output, input)?)?;
        Ok(Symbol(format!("&trigger_buffers[{}]", index)))
    }

    fn connection_cleanup(
        &self,
        _cx: &ResolveContext<'_>,
        output: &PortInstance,
        input: &PortInstance,
    ) -> Result<Symbol, ResolveError> {
        Ok(Symbol(format!(
            "cleanup_connection_{}_{}",
            Self::flat(&output.full_name),
            Self::flat(&input.full_name)
        )))
    }

    fn connection_cleanup_args(
        &self,
        cx: &ResolveContext<'_>,
        output: &PortInstance,
        input: &PortInstance,
    ) -> Result<(Symbol, Symbol), ResolveError> {
        // The connection must be one of the domain's buffers.
        cx.buffer_index(cx.connection(output, input)?)?;
        let unique = format!(
            "conn_{}_{}",
            inner_path(&output.full_name).join("_"),
            inner_path(&input.full_name).join("_")
        );
        let parent = Self::reactor_pointer(cx.env.reactor(output.reactor));
        Ok((Symbol(format!("&(main_reactor.{}[0][0])", unique)), Symbol(parent)))
    }
}
