//! Per-core instruction streams plus the bookkeeping needed to audit them.

use std::fmt::Write;

use indexmap::IndexMap;
use pretvm_core::{ConnectionId, Environment, ReactionId, TimeValue};
use pretvm_graph::NodeKey;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::instruction::Instruction;
use crate::timeline::Phase;

/// Where one scheduled reaction landed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockInfo {
    /// Index into the timeline's steps.
    pub step: usize,
    pub phase: Phase,
    pub reaction: ReactionId,
    pub core: usize,
    /// Value of the core's counter once the block completes.
    pub count: u32,
    /// First instruction of the block (inclusive).
    pub start: usize,
    /// The `EXE` that invokes the reaction body.
    pub invoke: usize,
    /// One past the block's last instruction.
    pub end: usize,
    pub guarded: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub prepares: Vec<ConnectionId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cleanups: Vec<ConnectionId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub cores: Vec<Vec<Instruction>>,
    /// Absolute start of the periodic phase.
    pub start: TimeValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hyperperiod: Option<TimeValue>,
    pub blocks: Vec<BlockInfo>,
}

impl Schedule {
    pub fn new(cores: usize) -> Self {
        Self { cores: vec![Vec::new(); cores], ..Self::default() }
    }

    pub fn core_count(&self) -> usize {
        self.cores.len()
    }

    pub fn instruction_count(&self) -> usize {
        self.cores.iter().map(Vec::len).sum()
    }

    pub fn is_resolved(&self) -> bool {
        self.cores.iter().flatten().all(Instruction::is_resolved)
    }

    pub fn blocks_of(&self, reaction: ReactionId) -> impl Iterator<Item = &BlockInfo> {
        self.blocks.iter().filter(move |b| b.reaction == reaction)
    }

    /// Core of each reaction's first block, for graph coloring.
    pub fn partition(&self) -> IndexMap<NodeKey, usize> {
        let mut out = IndexMap::new();
        for block in &self.blocks {
            out.entry(NodeKey::Reaction(block.reaction)).or_insert(block.core);
        }
        out
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// SHA-256 over the serialized schedule.
    pub fn fingerprint(&self) -> String {
        fingerprint_of(self)
    }

    /// Human-readable assembly listing, one section per core.
    pub fn listing(&self, env: &Environment) -> String {
        let mut out = String::new();
        for (core, stream) in self.cores.iter().enumerate() {
            let _ = writeln!(out, "core {}:", core);
            let starts: IndexMap<usize, ReactionId> = self
                .blocks
                .iter()
                .filter(|b| b.core == core)
                .map(|b| (b.start, b.reaction))
                .collect();
            for (i, inst) in stream.iter().enumerate() {
                if let Some(reaction) = starts.get(&i) {
                    let _ = writeln!(out, "  ; {}", env.reaction(*reaction).full_name);
                }
                for label in &inst.labels {
                    let _ = writeln!(out, "{}:", label);
                }
                let _ = writeln!(out, "  {:>4}  {}", i, inst);
            }
        }
        out
    }
}

pub(crate) fn fingerprint_of<T: Serialize>(value: &T) -> String {
    let bytes = serde_json::to_vec(value).unwrap_or_default();
    let digest = Sha256::digest(&bytes);
    format!("{digest:x}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::Register;

    #[test]
    fn fingerprint_tracks_content() {
        let mut a = Schedule::new(2);
        a.cores[0].push(Instruction::addi(Register::Counter(0), Register::Counter(0), 1));
        let b = a.clone();
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);

        a.cores[1].push(Instruction::stop());
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn new_schedule_starts_at_zero() {
        let s = Schedule::new(3);
        assert_eq!(s.core_count(), 3);
        assert!(s.start.is_zero());
        assert!(s.hyperperiod.is_none());
        assert!(s.blocks.is_empty());
    }

    #[test]
    fn json_round_trip() {
        let mut s = Schedule::new(1);
        s.cores[0].push(Instruction::jump("L_periodic").labeled("L_periodic"));
        s.hyperperiod = Some(TimeValue::millis(10));
        let back: Schedule = serde_json::from_str(&s.to_json().unwrap()).unwrap();
        assert_eq!(back, s);
    }
}
