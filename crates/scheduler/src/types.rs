use indexmap::IndexMap;
use pretvm_core::attributes::ClockSyncParams;
use pretvm_core::{DomainKind, PlatformType, TimeValue};
use serde::{Deserialize, Serialize};

use crate::metrics::ScheduleStats;
use crate::schedule::{fingerprint_of, Schedule};

/// The resolved schedule of one scheduling domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainSchedule {
    /// Full name of the domain's root reactor.
    pub name: String,
    pub kind: DomainKind,
    pub platform: PlatformType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clock_sync: Option<ClockSyncParams>,
    /// How long the domain waits for network input before assuming absence.
    pub max_wait: TimeValue,
    /// Declared event-queue bounds of the domain's actions, keyed by full
    /// name. Unbounded actions are absent.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub pending_event_limits: IndexMap<String, i64>,
    pub schedule: Schedule,
}

impl DomainSchedule {
    pub fn stats(&self) -> ScheduleStats {
        ScheduleStats::of(&self.schedule)
    }
}

/// Compiler output: one schedule per domain, in domain declaration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledProgram {
    pub cores: usize,
    pub domains: Vec<DomainSchedule>,
}

impl CompiledProgram {
    pub fn domain(&self, name: &str) -> Option<&DomainSchedule> {
        self.domains.iter().find(|d| d.name == name)
    }

    pub fn instruction_count(&self) -> usize {
        self.domains.iter().map(|d| d.schedule.instruction_count()).sum()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// SHA-256 over the serialized program; equal inputs give equal
    /// fingerprints.
    pub fn fingerprint(&self) -> String {
        fingerprint_of(self)
    }
}
