//! Time steps of a domain: a finite init phase, then an optional periodic
//! phase replayed every hyperperiod.

use std::collections::BTreeMap;
use std::fmt;

use pretvm_core::{time::lcm, Environment, ReactionId, Tag, TimeValue, TriggerId, TriggerKind, TriggerRef};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SchedulerError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Init,
    Periodic,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Init => write!(f, "init"),
            Phase::Periodic => write!(f, "periodic"),
        }
    }
}

/// One logical tag at which reactions may run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeStep {
    pub phase: Phase,
    /// Relative to the phase start. Init steps start at absolute 0.
    pub tag: Tag,
    /// Startup, shutdown and timer triggers that fire at this tag, sorted.
    pub firings: Vec<TriggerId>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Timeline {
    /// Absolute start of the periodic phase.
    pub start: TimeValue,
    pub hyperperiod: Option<TimeValue>,
    pub steps: Vec<TimeStep>,
}

impl Timeline {
    /// Enumerate the steps for the given reactions' triggers.
    ///
    /// `max_steps` bounds each phase separately.
    pub fn build(env: &Environment, reactions: impl IntoIterator<Item = ReactionId>, max_steps: usize) -> Result<Self> {
        let mut periodic: Vec<(TriggerId, i64, i64)> = Vec::new();
        let mut one_shots: Vec<(TriggerId, i64)> = Vec::new();
        let mut shutdowns: Vec<TriggerId> = Vec::new();

        let mut seen: Vec<TriggerId> = Vec::new();
        for reaction in reactions {
            for trigger in &env.reaction(reaction).triggers {
                if let TriggerRef::Trigger(t) = trigger {
                    if !seen.contains(t) {
                        seen.push(*t);
                    }
                }
            }
        }
        seen.sort();

        for id in seen {
            match env.trigger(id).kind {
                TriggerKind::Startup => one_shots.push((id, 0)),
                TriggerKind::Shutdown => shutdowns.push(id),
                TriggerKind::Timer { offset, period } if period.is_zero() => one_shots.push((id, offset.as_nanos())),
                TriggerKind::Timer { offset, period } => periodic.push((id, offset.as_nanos(), period.as_nanos())),
                TriggerKind::LogicalAction { .. } | TriggerKind::PhysicalAction { .. } => {}
            }
        }

        let overflow = |id: TriggerId| SchedulerError::TimeOverflow { trigger: env.trigger(id).full_name.clone() };

        let max_periodic_offset = periodic.iter().map(|(_, o, _)| *o).max().unwrap_or(0);
        let start = match one_shots.iter().max_by_key(|(_, o)| *o) {
            Some(&(id, last)) => max_periodic_offset.max(last.checked_add(1).ok_or_else(|| overflow(id))?),
            None => max_periodic_offset,
        };

        // Init phase: everything strictly before the periodic phase starts.
        let mut init: BTreeMap<i64, Vec<TriggerId>> = BTreeMap::new();
        for (id, offset) in &one_shots {
            init.entry(*offset).or_default().push(*id);
        }
        for (id, offset, period) in &periodic {
            if *offset >= start {
                continue;
            }
            let span = start.checked_sub(*offset).ok_or_else(|| overflow(*id))?;
            let firings = span / period + i64::from(span % period != 0);
            if firings as usize > max_steps {
                return Err(SchedulerError::TooManyTimeSteps { phase: Phase::Init, limit: max_steps });
            }
            let mut next = Some(*offset);
            while let Some(t) = next.filter(|t| *t < start) {
                init.entry(t).or_default().push(*id);
                next = t.checked_add(*period);
            }
        }

        let mut steps = Vec::new();
        push_phase(&mut steps, Phase::Init, init, max_steps)?;

        let mut hyperperiod = None;
        if !periodic.is_empty() {
            let mut h = 1i64;
            for (_, _, period) in &periodic {
                h = lcm(h, *period).ok_or(SchedulerError::HyperperiodOverflow)?;
            }
            let mut phase: BTreeMap<i64, Vec<TriggerId>> = BTreeMap::new();
            for (id, offset, period) in &periodic {
                if (h / period) as usize > max_steps {
                    return Err(SchedulerError::TooManyTimeSteps { phase: Phase::Periodic, limit: max_steps });
                }
                let shift = offset.checked_sub(start).ok_or_else(|| overflow(*id))?;
                let mut next = Some(shift.rem_euclid(*period));
                while let Some(t) = next.filter(|t| *t < h) {
                    phase.entry(t).or_default().push(*id);
                    next = t.checked_add(*period);
                }
            }
            push_phase(&mut steps, Phase::Periodic, phase, max_steps)?;
            hyperperiod = Some(TimeValue(h));
            if !shutdowns.is_empty() {
                tracing::debug!(count = shutdowns.len(), "Periodic program never shuts down; shutdown reactions dropped");
            }
        } else if !shutdowns.is_empty() {
            // One extra microstep after the last init tag.
            let tag = match steps.last() {
                Some(last) => Tag { time: last.tag.time, microstep: last.tag.microstep.saturating_add(1) },
                None => Tag::at(TimeValue::ZERO),
            };
            steps.push(TimeStep { phase: Phase::Init, tag, firings: shutdowns });
        }

        tracing::debug!(
            start = %TimeValue(start),
            hyperperiod = ?hyperperiod.map(|h| h.to_string()),
            steps = steps.len(),
            "Timeline built"
        );
        Ok(Self { start: TimeValue(start), hyperperiod, steps })
    }

    pub fn init_steps(&self) -> impl Iterator<Item = &TimeStep> {
        self.steps.iter().filter(|s| s.phase == Phase::Init)
    }

    pub fn periodic_steps(&self) -> impl Iterator<Item = &TimeStep> {
        self.steps.iter().filter(|s| s.phase == Phase::Periodic)
    }

    pub fn is_periodic(&self) -> bool {
        self.hyperperiod.is_some()
    }
}

fn push_phase(steps: &mut Vec<TimeStep>, phase: Phase, times: BTreeMap<i64, Vec<TriggerId>>, limit: usize) -> Result<()> {
    if times.len() > limit {
        return Err(SchedulerError::TooManyTimeSteps { phase, limit });
    }
    for (t, mut firings) in times {
        firings.sort();
        firings.dedup();
        steps.push(TimeStep { phase, tag: Tag::at(TimeValue(t)), firings });
    }
    Ok(())
}
