use indexmap::IndexMap;
use serde::Serialize;

use crate::instruction::Opcode;
use crate::schedule::Schedule;

/// Instruction mix of one core.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CoreStats {
    pub instructions: usize,
    pub blocks: usize,
    /// `WU` instructions, barriers included.
    pub waits: usize,
    pub prepares: usize,
    pub cleanups: usize,
}

/// Size and synchronization summary of a schedule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScheduleStats {
    pub cores: Vec<CoreStats>,
    /// Blocks per phase name.
    pub blocks_by_phase: IndexMap<String, usize>,
}

impl ScheduleStats {
    pub fn of(schedule: &Schedule) -> Self {
        let mut stats = Self { cores: vec![CoreStats::default(); schedule.core_count()], ..Self::default() };

        for (core, stream) in schedule.cores.iter().enumerate() {
            let s = &mut stats.cores[core];
            s.instructions = stream.len();
            s.waits = stream.iter().filter(|i| i.opcode == Opcode::Wu).count();
        }
        // Block records survive resolution; symbolic EXE targets do not.
        for block in &schedule.blocks {
            if let Some(s) = stats.cores.get_mut(block.core) {
                s.blocks += 1;
                s.prepares += block.prepares.len();
                s.cleanups += block.cleanups.len();
            }
            *stats.blocks_by_phase.entry(block.phase.to_string()).or_default() += 1;
        }
        stats
    }

    pub fn total_instructions(&self) -> usize {
        self.cores.iter().map(|c| c.instructions).sum()
    }

    pub fn total_waits(&self) -> usize {
        self.cores.iter().map(|c| c.waits).sum()
    }

    /// Ratio of the busiest core's blocks to the mean; 1.0 when balanced.
    pub fn imbalance(&self) -> f64 {
        let total: usize = self.cores.iter().map(|c| c.blocks).sum();
        if total == 0 || self.cores.is_empty() {
            return 1.0;
        }
        let max = self.cores.iter().map(|c| c.blocks).max().unwrap_or(0);
        let mean = total as f64 / self.cores.len() as f64;
        max as f64 / mean
    }

    pub fn log(&self, domain: &str) {
        for (core, s) in self.cores.iter().enumerate() {
            tracing::info!(
                domain,
                core,
                instructions = s.instructions,
                blocks = s.blocks,
                waits = s.waits,
                prepares = s.prepares,
                cleanups = s.cleanups,
                "Core schedule"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::{Instruction, Operand, Register, SymbolRef};
    use crate::schedule::BlockInfo;
    use crate::timeline::Phase;
    use pretvm_core::{ConnectionId, ReactionId, ReactorId};

    fn block(core: usize, reaction: u32) -> BlockInfo {
        BlockInfo {
            step: 0,
            phase: Phase::Init,
            reaction: ReactionId(reaction),
            core,
            count: 1,
            start: 0,
            invoke: 0,
            end: 1,
            guarded: false,
            prepares: Vec::new(),
            cleanups: Vec::new(),
        }
    }

    #[test]
    fn counts_instruction_kinds() {
        let mut s = Schedule::new(2);
        s.cores[0] = vec![
            Instruction::wait_until(Register::Counter(1), 1),
            Instruction::exe(
                SymbolRef::Prepare(ConnectionId(0)).into(),
                SymbolRef::PrepareArg(ConnectionId(0)).into(),
                Operand::Imm(-1),
            ),
            Instruction::exe(
                SymbolRef::ReactionBody(ReactionId(0)).into(),
                SymbolRef::ReactorState(ReactorId(1)).into(),
                SymbolRef::DeadlineHandler(ReactionId(0)).into(),
            ),
            Instruction::stop(),
        ];
        s.cores[1] = vec![Instruction::stop()];
        let mut host = block(0, 0);
        host.prepares = vec![ConnectionId(0)];
        s.blocks = vec![host];

        let stats = ScheduleStats::of(&s);
        assert_eq!(stats.cores[0].waits, 1);
        assert_eq!(stats.cores[0].prepares, 1);
        assert_eq!(stats.cores[0].blocks, 1);
        assert_eq!(stats.total_instructions(), 5);
        assert_eq!(stats.blocks_by_phase["init"], 1);
        assert_eq!(stats.imbalance(), 2.0);
    }

    #[test]
    fn empty_schedule_is_balanced() {
        let stats = ScheduleStats::of(&Schedule::new(3));
        assert_eq!(stats.imbalance(), 1.0);
        assert_eq!(stats.total_waits(), 0);
    }
}
