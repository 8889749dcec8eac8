//! Second phase of code generation: replace symbolic operands with
//! platform symbols and labels with instruction indices.

use indexmap::IndexMap;

use crate::error::ResolveError;
use crate::instruction::{Operand, Register, Symbol, SymbolRef};
use crate::platform::{PlatformResolver, ResolveContext};
use crate::schedule::Schedule;

/// Resolves each distinct reference once, so equal references always map
/// to equal symbols.
pub struct Resolver<'a, P: PlatformResolver + ?Sized> {
    platform: &'a P,
    cx: ResolveContext<'a>,
    refs: IndexMap<SymbolRef, Option<Symbol>>,
    registers: IndexMap<Register, Symbol>,
}

impl<'a, P: PlatformResolver + ?Sized> Resolver<'a, P> {
    pub fn new(platform: &'a P, cx: ResolveContext<'a>) -> Self {
        Self { platform, cx, refs: IndexMap::new(), registers: IndexMap::new() }
    }

    /// Number of distinct references and registers resolved so far.
    pub fn resolved_count(&self) -> usize {
        self.refs.len() + self.registers.len()
    }

    pub fn register(&mut self, reg: Register) -> Symbol {
        if let Some(s) = self.registers.get(&reg) {
            return s.clone();
        }
        let s = self.platform.register(reg);
        self.registers.insert(reg, s.clone());
        s
    }

    /// `None` only for a deadline handler of a reaction without deadline.
    pub fn reference(&mut self, r: SymbolRef) -> Result<Option<Symbol>, ResolveError> {
        if let Some(s) = self.refs.get(&r) {
            return Ok(s.clone());
        }
        let s = self.lookup(r)?;
        self.refs.insert(r, s.clone());
        Ok(s)
    }

    fn lookup(&self, r: SymbolRef) -> Result<Option<Symbol>, ResolveError> {
        let env = self.cx.env;
        let cx = &self.cx;
        let p = self.platform;
        let endpoints = |c| {
            let conn = env.connection(c);
            (env.port(conn.source), env.port(conn.destination))
        };
        let symbol = match r {
            SymbolRef::ReactorState(id) => p.reactor_state(cx, env.reactor(id))?,
            SymbolRef::ReactorTime(id) => p.reactor_time(cx, env.reactor(id))?,
            SymbolRef::PortData(id) => p.port_data(cx, env.port(id))?,
            SymbolRef::PortPresent(id) => p.port_present(cx, env.port(id))?,
            SymbolRef::ReactionBody(id) => p.reaction_body(cx, env.reaction(id))?,
            SymbolRef::DeadlineHandler(id) => return p.reaction_deadline_handler(cx, env.reaction(id)),
            SymbolRef::QueueHead(id) => p.queue_head(cx, env.main(), env.trigger(id))?,
            SymbolRef::QueueHeadTime(id) => p.queue_head_time(cx, env.port(id))?,
            SymbolRef::Prepare(c) => {
                let (out, inp) = endpoints(c);
                p.connection_prepare(cx, out, inp)?
            }
            SymbolRef::PrepareArg(c) => {
                let (out, inp) = endpoints(c);
                p.connection_prepare_arg(cx, out, inp)?
            }
            SymbolRef::Cleanup(c) => {
                let (out, inp) = endpoints(c);
                p.connection_cleanup(cx, out, inp)?
            }
            SymbolRef::CleanupArg1(c) => {
                let (out, inp) = endpoints(c);
                p.connection_cleanup_args(cx, out, inp)?.0
            }
            SymbolRef::CleanupArg2(c) => {
                let (out, inp) = endpoints(c);
                p.connection_cleanup_args(cx, out, inp)?.1
            }
        };
        Ok(Some(symbol))
    }

    /// Resolve every operand of every core in place.
    pub fn resolve_schedule(&mut self, schedule: &mut Schedule) -> Result<(), ResolveError> {
        for (core, stream) in schedule.cores.iter_mut().enumerate() {
            let mut targets: IndexMap<String, usize> = IndexMap::new();
            for (i, inst) in stream.iter().enumerate() {
                for label in &inst.labels {
                    if targets.insert(label.clone(), i).is_some() {
                        return Err(ResolveError::DuplicateLabel { label: label.clone(), core });
                    }
                }
            }

            for inst in stream.iter_mut() {
                for op in inst.operands.iter_mut() {
                    let resolved = match op {
                        Operand::Reg(reg) => Operand::Symbol(self.register(*reg)),
                        Operand::Ref(r) => match self.reference(*r)? {
                            Some(s) => Operand::Symbol(s),
                            None => Operand::Null,
                        },
                        Operand::Label(label) => {
                            let target = targets.get(&label.name).copied().ok_or_else(|| {
                                ResolveError::UnknownLabel { label: label.name.clone(), core }
                            })?;
                            label.target = Some(target);
                            continue;
                        }
                        Operand::Imm(_) | Operand::Symbol(_) | Operand::Null => continue,
                    };
                    *op = resolved;
                }
            }
        }
        tracing::debug!(symbols = self.resolved_count(), "Resolved schedule operands");
        Ok(())
    }
}
