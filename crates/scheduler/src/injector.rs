//! Prepare and cleanup code for connections that are not plain aliases.
//!
//! Within one time step, the prepare call of a connection runs in the block
//! of its earliest scheduled reader and the cleanup call in the block of its
//! latest one. Readers on other cores synchronize with those blocks.

use indexmap::IndexMap;
use pretvm_core::{ConfigOverlay, ConnectionId, EntityRef, Environment, ReactorId};
use pretvm_graph::{aliases, connection_readers, ConnectionClass, DependencyGraph};

use crate::assigner::StepPlan;
use crate::error::InjectionError;
use crate::instruction::{Instruction, Opcode, Operand, SymbolRef};

/// Injection decisions for one step, keyed by position in the step plan.
#[derive(Debug, Default)]
pub(crate) struct Injections {
    pub prepares: IndexMap<usize, Vec<ConnectionId>>,
    pub cleanups: IndexMap<usize, Vec<ConnectionId>>,
    /// Blocks that must complete before a block starts.
    pub waits: IndexMap<usize, Vec<usize>>,
    /// Blocks that must complete before a block's cleanup code.
    pub cleanup_waits: IndexMap<usize, Vec<usize>>,
}

impl Injections {
    pub fn prepares_of(&self, block: usize) -> &[ConnectionId] {
        self.prepares.get(&block).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn cleanups_of(&self, block: usize) -> &[ConnectionId] {
        self.cleanups.get(&block).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn waits_of(&self, block: usize) -> &[usize] {
        self.waits.get(&block).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn cleanup_waits_of(&self, block: usize) -> &[usize] {
        self.cleanup_waits.get(&block).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Every injected connection must feed at least one reaction.
pub(crate) fn check_readers(env: &Environment, classes: &[ConnectionClass]) -> Result<(), InjectionError> {
    for conn in &env.connections {
        if classes[conn.id.index()].is_injected() && connection_readers(env, classes, conn.id).is_empty() {
            return Err(InjectionError::NoReader { connection: env.name_of(EntityRef::Connection(conn.id)) });
        }
    }
    Ok(())
}

/// Decide where each active connection's prepare and cleanup go.
pub(crate) fn plan_step(
    env: &Environment,
    graph: &DependencyGraph,
    classes: &[ConnectionClass],
    plan: &StepPlan,
) -> Result<Injections, InjectionError> {
    let mut out = Injections::default();

    for conn in graph.transfers() {
        let mut readers: Vec<usize> = connection_readers(env, classes, conn)
            .into_iter()
            .filter_map(|r| plan.index_of(r))
            .collect();
        if readers.is_empty() {
            continue;
        }
        readers.sort_unstable();
        let first = readers[0];
        let last = readers[readers.len() - 1];
        let name = || env.name_of(EntityRef::Connection(conn));

        if classes[conn.index()] == ConnectionClass::Buffered {
            let source = env.connection(conn).source;
            for (i, block) in plan.blocks.iter().enumerate() {
                let writes_source = env
                    .reaction(block.reaction)
                    .writes()
                    .any(|p| aliases(env, classes, p).contains(&source));
                if writes_source && i > first {
                    return Err(InjectionError::ReaderBeforeWriter {
                        connection: name(),
                        reader: env.reaction(plan.blocks[first].reaction).full_name.clone(),
                        writer: env.reaction(block.reaction).full_name.clone(),
                    });
                }
            }
        }

        out.prepares.entry(first).or_default().push(conn);
        let host_core = plan.blocks[first].core;
        for &r in &readers[1..] {
            if plan.blocks[r].core != host_core {
                out.waits.entry(r).or_default().push(first);
            }
        }

        out.cleanups.entry(last).or_default().push(conn);
        let tail_core = plan.blocks[last].core;
        for &r in &readers[..readers.len() - 1] {
            if plan.blocks[r].core != tail_core {
                out.cleanup_waits.entry(last).or_default().push(r);
            }
        }

        tracing::debug!(
            connection = %name(),
            readers = readers.len(),
            prepare_in = %env.reaction(plan.blocks[first].reaction).full_name,
            cleanup_in = %env.reaction(plan.blocks[last].reaction).full_name,
            "Placed connection code"
        );
    }
    Ok(out)
}

/// `EXE prepare, arg, buffer_size`, guarded for event-carrying connections
/// so it only fires when the head event is due at the reader's current time.
/// The guard branches to `after`, which the caller attaches to the
/// instruction following the returned code.
pub(crate) fn prepare_code(
    env: &Environment,
    overlay: &ConfigOverlay,
    class: ConnectionClass,
    conn: ConnectionId,
    reader_reactor: ReactorId,
    after: &str,
) -> Vec<Instruction> {
    let mut code = Vec::new();
    if !class.is_instantaneous() {
        let input = env.connection(conn).destination;
        code.push(Instruction::branch(
            Opcode::Bne,
            SymbolRef::QueueHeadTime(input).into(),
            SymbolRef::ReactorTime(reader_reactor).into(),
            after,
        ));
    }
    code.push(Instruction::exe(
        SymbolRef::Prepare(conn).into(),
        SymbolRef::PrepareArg(conn).into(),
        Operand::Imm(overlay.buffer_size(conn)),
    ));
    code
}

pub(crate) fn cleanup_code(conn: ConnectionId) -> Instruction {
    Instruction::exe(
        SymbolRef::Cleanup(conn).into(),
        SymbolRef::CleanupArg1(conn).into(),
        SymbolRef::CleanupArg2(conn).into(),
    )
}
