use indexmap::{IndexMap, IndexSet};
use pretvm_core::{ConnectionId, EntityRef, PortId, ReactionId, ReactorId};
use pretvm_graph::{ConnectionClass, NodeKey};

use crate::error::{InjectionError, Result};
use crate::injector::{self, Injections};
use crate::instruction::{Instruction, Opcode, Register, SymbolRef};
use crate::platform::PlatformResolver;
use crate::schedule::BlockInfo;
use crate::timeline::TimeStep;

use super::core::Resource;
use super::{Assigner, Guard, StepPlan};

/// Per-step emission state shared by the blocks of one step.
struct StepState {
    /// (core, count) each emitted block of the step completes with.
    done: Vec<(usize, u32)>,
    /// Reactors whose time was already advanced in this step.
    advanced: IndexSet<ReactorId>,
}

impl<P: PlatformResolver + ?Sized> Assigner<'_, P> {
    pub(super) fn emit_step(&mut self, step_index: usize, step: &TimeStep) -> Result<()> {
        let plan = self.plan_step(step);
        if plan.is_empty() {
            return Ok(());
        }
        let injections = injector::plan_step(self.env, self.graph, self.classes, &plan)?;

        let t = step.tag.time.as_nanos();
        let mut started = vec![false; self.cores];
        let mut state = StepState { done: Vec::with_capacity(plan.blocks.len()), advanced: IndexSet::new() };

        for i in 0..plan.blocks.len() {
            let core = plan.blocks[i].core;
            if !started[core] {
                started[core] = true;
                if !self.fast {
                    self.push(core, Instruction::delay_until(Register::Offset, t));
                }
            }
            let finished = self.emit_block(step_index, step, &plan, i, &injections, &mut state)?;
            state.done.push(finished);
        }
        Ok(())
    }

    /// Emit the block of `plan.blocks[i]` and return the (core, count) it
    /// completes with.
    fn emit_block(
        &mut self,
        step_index: usize,
        step: &TimeStep,
        plan: &StepPlan,
        i: usize,
        injections: &Injections,
        state: &mut StepState,
    ) -> Result<(usize, u32)> {
        let block = &plan.blocks[i];
        let id = block.reaction;
        let core = block.core;
        let reactor = self.env.reaction(id).reactor;
        let t = step.tag.time.as_nanos();
        let prepares = injections.prepares_of(i);
        let cleanups = injections.cleanups_of(i);
        let (reads, writes) = self.accesses(id, prepares, cleanups);

        // ── Synchronization ──

        let mut waits: IndexMap<usize, u32> = IndexMap::new();
        let mut need = |c: usize, n: u32| {
            if c != core {
                let slot = waits.entry(c).or_insert(0);
                *slot = (*slot).max(n);
            }
        };
        for ancestor in self.included_ancestors(plan, id) {
            if let Some(&(c, n)) = plan.index_of(ancestor).and_then(|j| state.done.get(j)) {
                need(c, n);
            }
        }
        for &j in injections.waits_of(i) {
            if let Some(&(c, n)) = state.done.get(j) {
                need(c, n);
            }
        }
        for (c, n) in self.hazards.conflicts(&reads, &writes) {
            need(c, n);
        }
        waits.sort_keys();

        let mut code: Vec<Instruction> = waits
            .iter()
            .map(|(c, n)| Instruction::wait_until(Register::Counter(*c), i64::from(*n)))
            .collect();
        let sync_end = code.len();

        if state.advanced.insert(reactor) {
            code.push(Instruction::advance(reactor, t));
        }

        // ── Invocation ──

        let guard_start = code.len();
        let guarded = !block.guards.is_empty();
        let skip = if guarded { Some(self.fresh_label("SKIP")) } else { None };
        let mut exe = Instruction::exe(
            SymbolRef::ReactionBody(id).into(),
            SymbolRef::ReactorState(reactor).into(),
            SymbolRef::DeadlineHandler(id).into(),
        );
        if let Some(skip) = &skip {
            let run = self.fresh_label("EXE");
            for guard in &block.guards {
                code.push(match *guard {
                    Guard::Port(port) => Instruction::branch(
                        Opcode::Beq,
                        SymbolRef::PortPresent(port).into(),
                        Register::One.into(),
                        &run,
                    ),
                    Guard::Action(action) => Instruction::branch(
                        Opcode::Bne,
                        SymbolRef::QueueHead(action).into(),
                        Register::Zero.into(),
                        &run,
                    ),
                });
            }
            code.push(Instruction::jump(skip));
            exe = exe.labeled(run);
        }
        let mut invoke = code.len();
        code.push(exe);

        // ── Tail ──

        let tail_start = code.len();
        let mut cleanup_waits: IndexMap<usize, u32> = IndexMap::new();
        for &j in injections.cleanup_waits_of(i) {
            if let Some(&(c, n)) = state.done.get(j) {
                if c != core {
                    let slot = cleanup_waits.entry(c).or_insert(0);
                    *slot = (*slot).max(n);
                }
            }
        }
        cleanup_waits.sort_keys();
        for (c, n) in &cleanup_waits {
            code.push(Instruction::wait_until(Register::Counter(*c), i64::from(*n)));
        }
        for conn in cleanups {
            code.push(injector::cleanup_code(*conn));
        }
        code.push(Instruction::addi(Register::Counter(core), Register::Counter(core), 1));
        if let Some(skip) = skip {
            code[tail_start].labels.push(skip);
        }

        // ── Prepares ──

        if !prepares.is_empty() {
            let index = self.platform.prepare_insertion_index(&code, guard_start..invoke + 1);
            if index < sync_end || index > guard_start {
                return Err(InjectionError::InsertionOutsideBlock {
                    connection: self.env.name_of(EntityRef::Connection(prepares[0])),
                    reader: self.env.reaction(id).full_name.clone(),
                    index,
                    first: sync_end,
                    last: guard_start,
                }
                .into());
            }
            let mut inserted: Vec<Instruction> = Vec::new();
            let mut after: Option<String> = None;
            for conn in prepares {
                let class = self.classes[conn.index()];
                let label = if class.is_instantaneous() { None } else { Some(self.fresh_label("PREP")) };
                let mut piece = injector::prepare_code(
                    self.env,
                    self.overlay,
                    class,
                    *conn,
                    reactor,
                    label.as_deref().unwrap_or_default(),
                );
                if let Some(prev) = after.take() {
                    piece[0].labels.push(prev);
                }
                after = label;
                inserted.extend(piece);
            }
            if let Some(prev) = after {
                code[index].labels.push(prev);
            }
            invoke += inserted.len();
            code.splice(index..index, inserted);
        }

        // ── Commit ──

        let count = self.counts[core] + 1;
        let start = self.schedule.cores[core].len();
        let len = code.len();
        for inst in code {
            self.push(core, inst);
        }
        self.counts[core] = count;
        self.hazards.record(core, count, &reads, &writes);
        self.schedule.blocks.push(BlockInfo {
            step: step_index,
            phase: step.phase,
            reaction: id,
            core,
            count,
            start,
            invoke: start + invoke,
            end: start + len,
            guarded,
            prepares: prepares.to_vec(),
            cleanups: cleanups.to_vec(),
        });
        tracing::trace!(
            reaction = %self.env.reaction(id).full_name,
            core,
            count,
            waits = sync_end,
            "Emitted block"
        );
        Ok((core, count))
    }

    /// Resources a block touches. Injected code writes the destination
    /// ports of its connections.
    fn accesses(
        &self,
        reaction: ReactionId,
        prepares: &[ConnectionId],
        cleanups: &[ConnectionId],
    ) -> (Vec<Resource>, Vec<Resource>) {
        let r = self.env.reaction(reaction);
        let mut reads: IndexSet<Resource> = r.reads().map(|p| Resource::Port(self.canonical_port(p))).collect();
        let mut writes: IndexSet<Resource> = IndexSet::new();
        writes.insert(Resource::Reactor(r.reactor));
        writes.extend(r.writes().map(|p| Resource::Port(self.canonical_port(p))));
        for conn in prepares.iter().chain(cleanups) {
            let dest = self.canonical_port(self.env.connection(*conn).destination);
            writes.insert(Resource::Port(dest));
        }
        reads.retain(|res| !writes.contains(res));
        (reads.into_iter().collect(), writes.into_iter().collect())
    }

    /// Upstream end of the direct-connection chain `port` belongs to.
    fn canonical_port(&self, port: PortId) -> PortId {
        let mut current = port;
        for _ in 0..self.env.ports.len() {
            match self.env.connection_into(current) {
                Some(conn) if self.classes[conn.id.index()] == ConnectionClass::Direct => current = conn.source,
                _ => break,
            }
        }
        current
    }

    /// Closest scheduled reactions `reaction` depends on at the same tag.
    /// Unscheduled reactions and transfer nodes are looked through, so pruned
    /// edges are still honored transitively.
    fn included_ancestors(&self, plan: &StepPlan, reaction: ReactionId) -> Vec<ReactionId> {
        let mut out: IndexSet<ReactionId> = IndexSet::new();
        let mut seen: IndexSet<NodeKey> = IndexSet::new();
        let mut stack: Vec<NodeKey> = self.graph.predecessors(NodeKey::Reaction(reaction)).collect();
        while let Some(node) = stack.pop() {
            if !seen.insert(node) {
                continue;
            }
            match node {
                NodeKey::Reaction(r) if plan.index_of(r).is_some() => {
                    out.insert(r);
                }
                _ => stack.extend(self.graph.predecessors(node)),
            }
        }
        out.sort();
        out.into_iter().collect()
    }
}
