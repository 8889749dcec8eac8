use indexmap::IndexMap;
use pretvm_core::{ConfigOverlay, Environment, PortId, ReactorId};
use pretvm_graph::{ConnectionClass, DependencyGraph, Levelization};
use tracing::info;

use crate::error::Result;
use crate::instruction::{Instruction, Register};
use crate::platform::PlatformResolver;
use crate::schedule::Schedule;
use crate::timeline::{Phase, Timeline};

/// Label of the first periodic-phase instruction on every core.
pub const PERIODIC_LABEL: &str = "L_PERIODIC";

/// Analysis results the assigner works from.
#[derive(Debug, Clone, Copy)]
pub struct DomainInputs<'a> {
    pub env: &'a Environment,
    pub graph: &'a DependencyGraph,
    pub levels: &'a Levelization,
    pub classes: &'a [ConnectionClass],
    pub overlay: &'a ConfigOverlay,
}

/// Shared state a block may read or write across time steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(super) enum Resource {
    /// State variables and logical time of a reactor.
    Reactor(ReactorId),
    /// A port's value, keyed by the upstream end of its alias chain.
    Port(PortId),
}

/// Last accesses to each resource since the most recent barrier, as
/// (core, counter value) pairs.
#[derive(Debug, Default)]
pub(super) struct Hazards {
    last_write: IndexMap<Resource, (usize, u32)>,
    reads: IndexMap<Resource, IndexMap<usize, u32>>,
}

impl Hazards {
    /// Blocks a new access set must wait for.
    pub(super) fn conflicts(&self, reads: &[Resource], writes: &[Resource]) -> Vec<(usize, u32)> {
        let mut out = Vec::new();
        for res in reads.iter().chain(writes) {
            if let Some(w) = self.last_write.get(res) {
                out.push(*w);
            }
        }
        for res in writes {
            if let Some(readers) = self.reads.get(res) {
                out.extend(readers.iter().map(|(c, n)| (*c, *n)));
            }
        }
        out
    }

    pub(super) fn record(&mut self, core: usize, count: u32, reads: &[Resource], writes: &[Resource]) {
        for res in writes {
            self.last_write.insert(*res, (core, count));
            self.reads.shift_remove(res);
        }
        for res in reads {
            if writes.contains(res) {
                continue;
            }
            let slot = self.reads.entry(*res).or_default().entry(core).or_insert(0);
            *slot = (*slot).max(count);
        }
    }

    pub(super) fn clear(&mut self) {
        self.last_write.clear();
        self.reads.clear();
    }
}

/// Turns a levelized domain graph into per-core instruction streams.
pub struct Assigner<'a, P: PlatformResolver + ?Sized> {
    pub(super) env: &'a Environment,
    pub(super) graph: &'a DependencyGraph,
    pub(super) levels: &'a Levelization,
    pub(super) classes: &'a [ConnectionClass],
    pub(super) overlay: &'a ConfigOverlay,
    pub(super) platform: &'a P,
    pub(super) cores: usize,
    /// Skip physical-time waits.
    pub(super) fast: bool,
    pub(super) schedule: Schedule,
    /// Blocks completed per core since the last barrier.
    pub(super) counts: Vec<u32>,
    /// Labels waiting for the next instruction on each core.
    pub(super) pending_labels: Vec<Vec<String>>,
    pub(super) hazards: Hazards,
    next_label: usize,
}

impl<'a, P: PlatformResolver + ?Sized> Assigner<'a, P> {
    /// `cores` must be at least 1.
    pub fn new(inputs: DomainInputs<'a>, platform: &'a P, cores: usize) -> Self {
        debug_assert!(cores >= 1);
        Self {
            env: inputs.env,
            graph: inputs.graph,
            levels: inputs.levels,
            classes: inputs.classes,
            overlay: inputs.overlay,
            platform,
            cores,
            fast: false,
            schedule: Schedule::new(cores),
            counts: vec![0; cores],
            pending_labels: vec![Vec::new(); cores],
            hazards: Hazards::default(),
            next_label: 0,
        }
    }

    pub fn fast(mut self, fast: bool) -> Self {
        self.fast = fast;
        self
    }

    /// Lay out the init phase, then either loop the periodic phase forever
    /// or stop every core.
    pub fn run(mut self, timeline: &Timeline) -> Result<Schedule> {
        self.schedule.start = timeline.start;
        self.schedule.hyperperiod = timeline.hyperperiod;

        for (i, step) in timeline.steps.iter().enumerate() {
            if step.phase == Phase::Init {
                self.emit_step(i, step)?;
            }
        }

        match timeline.hyperperiod {
            Some(hyperperiod) => {
                let has_init = timeline.init_steps().next().is_some();
                if has_init || !timeline.start.is_zero() {
                    self.emit_barrier(timeline.start.as_nanos());
                }
                for labels in &mut self.pending_labels {
                    labels.push(PERIODIC_LABEL.to_string());
                }
                for (i, step) in timeline.steps.iter().enumerate() {
                    if step.phase == Phase::Periodic {
                        self.emit_step(i, step)?;
                    }
                }
                self.emit_barrier(hyperperiod.as_nanos());
                for core in 0..self.cores {
                    self.push(core, Instruction::jump(PERIODIC_LABEL));
                }
            }
            None => {
                for core in 0..self.cores {
                    self.push(core, Instruction::stop());
                }
            }
        }

        info!(
            cores = self.cores,
            blocks = self.schedule.blocks.len(),
            instructions = self.schedule.instruction_count(),
            "Assigned reactions to cores"
        );
        Ok(self.schedule)
    }

    /// Core 0 waits for every other core to arrive, resets the counters,
    /// moves the time offset forward and releases the others.
    pub(super) fn emit_barrier(&mut self, advance: i64) {
        for core in 1..self.cores {
            self.push(core, Instruction::addi(Register::Counter(core), Register::Counter(core), 1));
        }
        for core in 1..self.cores {
            let arrived = i64::from(self.counts[core]) + 1;
            self.push(0, Instruction::wait_until(Register::Counter(core), arrived));
        }
        for core in 0..self.cores {
            self.push(0, Instruction::addi(Register::Counter(core), Register::Zero, 0));
        }
        self.push(0, Instruction::addi(Register::Offset, Register::Offset, advance));
        for core in 1..self.cores {
            self.push(0, Instruction::addi(Register::BinarySema(core), Register::Zero, 1));
        }
        for core in 1..self.cores {
            self.push(core, Instruction::wait_until(Register::BinarySema(core), 1));
            self.push(core, Instruction::addi(Register::BinarySema(core), Register::Zero, 0));
        }
        self.counts.iter_mut().for_each(|c| *c = 0);
        self.hazards.clear();
    }

    /// Append to a core, attaching any pending labels.
    pub(super) fn push(&mut self, core: usize, mut inst: Instruction) {
        let mut labels = std::mem::take(&mut self.pending_labels[core]);
        if !labels.is_empty() {
            labels.append(&mut inst.labels);
            inst.labels = labels;
        }
        self.schedule.cores[core].push(inst);
    }

    pub(super) fn fresh_label(&mut self, kind: &str) -> String {
        self.next_label += 1;
        format!("L_{}_{}", kind, self.next_label)
    }
}
