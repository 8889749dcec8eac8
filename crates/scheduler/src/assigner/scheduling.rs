use indexmap::IndexSet;
use pretvm_core::{PortId, ReactionId, TriggerId, TriggerRef};

use crate::platform::PlatformResolver;
use crate::timeline::TimeStep;

use super::Assigner;

/// Condition under which a scheduled reaction actually runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Guard {
    /// The port is present.
    Port(PortId),
    /// The action has a pending event.
    Action(TriggerId),
}

#[derive(Debug, Clone)]
pub(crate) struct PlannedBlock {
    pub reaction: ReactionId,
    pub core: usize,
    pub level: usize,
    /// Empty when the reaction runs unconditionally.
    pub guards: Vec<Guard>,
}

/// The reactions of one time step with their cores, in (level, key) order.
#[derive(Debug, Clone, Default)]
pub(crate) struct StepPlan {
    pub blocks: Vec<PlannedBlock>,
}

impl StepPlan {
    pub fn index_of(&self, reaction: ReactionId) -> Option<usize> {
        self.blocks.iter().position(|b| b.reaction == reaction)
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

impl<P: PlatformResolver + ?Sized> Assigner<'_, P> {
    /// Select the reactions that may run at `step` and deal them to cores.
    ///
    /// Each level restarts at core 0, so a chain of single-node levels stays
    /// on one core while independent reactions of a level spread out.
    pub(crate) fn plan_step(&self, step: &TimeStep) -> StepPlan {
        let mut plan = StepPlan::default();
        let mut included: IndexSet<ReactionId> = IndexSet::new();

        for (level, nodes) in self.levels.levels.iter().enumerate() {
            let mut cursor = 0usize;
            for node in nodes {
                let Some(reaction) = node.reaction() else {
                    continue;
                };
                let Some(guards) = self.activation(reaction, step, &included) else {
                    continue;
                };
                included.insert(reaction);
                plan.blocks.push(PlannedBlock { reaction, core: cursor % self.cores, level, guards });
                cursor += 1;
            }
        }

        tracing::debug!(tag = %step.tag, blocks = plan.blocks.len(), "Planned time step");
        plan
    }

    /// `None` when the reaction cannot run at `step`; otherwise the guards
    /// it runs under.
    fn activation(&self, reaction: ReactionId, step: &TimeStep, included: &IndexSet<ReactionId>) -> Option<Vec<Guard>> {
        let mut fires = false;
        let mut guards = Vec::new();
        for trigger in &self.env.reaction(reaction).triggers {
            match *trigger {
                TriggerRef::Port(port) => guards.push(Guard::Port(port)),
                TriggerRef::Trigger(t) if self.env.trigger(t).kind.is_action() => guards.push(Guard::Action(t)),
                TriggerRef::Trigger(t) => fires |= step.firings.contains(&t),
            }
        }
        if fires {
            return Some(Vec::new());
        }

        let on_action = guards.iter().any(|g| matches!(g, Guard::Action(_)));
        let fed = self.graph.is_event_driven(reaction)
            || self.graph.trigger_writers(reaction).iter().any(|w| included.contains(w));
        (on_action || fed).then_some(guards)
    }
}
