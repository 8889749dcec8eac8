//! Whole-program pipeline: partition, analyze and schedule every domain.

use indexmap::IndexMap;
use pretvm_core::{ConfigOverlay, ConnectionId, Domain, DomainMap, Environment, PlatformType, TargetConfig};
use pretvm_graph::{classify_connections, levelize, prune_redundant_edges, ConnectionClass, DependencyGraph, Levelization};
use tracing::{debug, info};

use crate::assigner::{Assigner, DomainInputs};
use crate::error::{Result, SchedulerError};
use crate::injector;
use crate::platform::{FlexPretPlatform, PlatformFamily, PlatformResolver, ResolveContext, UcPlatform};
use crate::resolve::Resolver;
use crate::schedule::Schedule;
use crate::timeline::Timeline;
use crate::types::{CompiledProgram, DomainSchedule};

/// Ordering analysis of one domain.
#[derive(Debug, Clone)]
pub struct DomainAnalysis {
    pub index: usize,
    pub name: String,
    /// The graph as built, before pruning.
    pub raw: DependencyGraph,
    /// The graph the schedule is derived from.
    pub graph: DependencyGraph,
    pub levels: Levelization,
    pub pruned_edges: usize,
}

pub struct Compiler<'a> {
    env: &'a Environment,
    overlay: &'a ConfigOverlay,
    config: &'a TargetConfig,
    cores: usize,
    domains: DomainMap,
    classes: Vec<ConnectionClass>,
}

impl<'a> Compiler<'a> {
    /// Resolve the core count against `available_cores` and classify every
    /// connection.
    pub fn new(
        env: &'a Environment,
        overlay: &'a ConfigOverlay,
        config: &'a TargetConfig,
        available_cores: usize,
    ) -> Result<Self> {
        let cores = config.resolved_cores(available_cores);
        if cores == 0 {
            return Err(SchedulerError::InvalidCoreCount(cores));
        }
        let domains = DomainMap::partition(env, overlay);
        let classes = classify_connections(env, overlay, &domains);
        injector::check_readers(env, &classes)?;
        debug!(cores, domains = domains.domains.len(), connections = classes.len(), "Compiler ready");
        Ok(Self { env, overlay, config, cores, domains, classes })
    }

    pub fn cores(&self) -> usize {
        self.cores
    }

    pub fn domains(&self) -> &DomainMap {
        &self.domains
    }

    pub fn classes(&self) -> &[ConnectionClass] {
        &self.classes
    }

    /// Build, check and optionally prune the dependency graph of a domain.
    pub fn analyze(&self, index: usize) -> Result<DomainAnalysis> {
        let name = self.domains.domains[index].name.clone();
        let raw = DependencyGraph::build(self.env, &self.classes, &self.domains, index);
        let mut levels = levelize(&raw, self.env)?;
        let mut graph = raw.clone();
        let mut pruned_edges = 0;
        if self.config.prune_redundant_edges {
            pruned_edges = prune_redundant_edges(&mut graph);
            if pruned_edges > 0 {
                levels = levelize(&graph, self.env)?;
            }
        }
        debug!(domain = %name, levels = levels.depth(), pruned_edges, "Domain analyzed");
        Ok(DomainAnalysis { index, name, raw, graph, levels, pruned_edges })
    }

    pub fn analyze_all(&self) -> Result<Vec<DomainAnalysis>> {
        (0..self.domains.domains.len()).map(|i| self.analyze(i)).collect()
    }

    /// Platform a domain targets: its own annotation, else the program's.
    pub fn platform_of(&self, domain: &Domain) -> PlatformType {
        match self.overlay.platform(domain.root) {
            PlatformType::Auto => self.config.platform,
            pinned => pinned,
        }
    }

    pub fn schedule_domain(&self, analysis: &DomainAnalysis) -> Result<DomainSchedule> {
        let domain = &self.domains.domains[analysis.index];
        let platform = self.platform_of(domain);
        let schedule = match PlatformFamily::for_platform(platform) {
            PlatformFamily::Uc => self.emit(analysis, &UcPlatform)?,
            PlatformFamily::FlexPret => self.emit(analysis, &FlexPretPlatform)?,
        };
        info!(
            domain = %domain.name,
            kind = %domain.kind,
            %platform,
            blocks = schedule.blocks.len(),
            instructions = schedule.instruction_count(),
            "Domain scheduled"
        );
        Ok(DomainSchedule {
            name: domain.name.clone(),
            kind: domain.kind,
            platform,
            clock_sync: self.overlay.clock_sync(domain.root).cloned(),
            max_wait: self.overlay.max_wait(domain.root),
            pending_event_limits: self.pending_event_limits(analysis.index),
            schedule,
        })
    }

    /// Bounded actions owned by reactors of domain `index`, in declaration order.
    fn pending_event_limits(&self, index: usize) -> IndexMap<String, i64> {
        self.env
            .triggers
            .iter()
            .filter(|t| t.kind.is_action() && self.domains.domain_of(t.reactor) == index)
            .filter_map(|t| {
                let limit = self.overlay.max_pending_events(t.id);
                (limit >= 0).then(|| (t.full_name.clone(), limit))
            })
            .collect()
    }

    fn emit<P: PlatformResolver>(&self, analysis: &DomainAnalysis, platform: &P) -> Result<Schedule> {
        let timeline = Timeline::build(self.env, analysis.graph.reactions(), self.config.max_time_steps)?;
        let inputs = DomainInputs {
            env: self.env,
            graph: &analysis.graph,
            levels: &analysis.levels,
            classes: &self.classes,
            overlay: self.overlay,
        };
        let mut schedule = Assigner::new(inputs, platform, self.cores).fast(self.config.fast).run(&timeline)?;

        let buffers: Vec<ConnectionId> = analysis.graph.transfers().collect();
        Resolver::new(platform, ResolveContext::new(self.env, &buffers)).resolve_schedule(&mut schedule)?;
        Ok(schedule)
    }

    pub fn compile(&self) -> Result<CompiledProgram> {
        let mut domains = Vec::with_capacity(self.domains.domains.len());
        for analysis in self.analyze_all()? {
            domains.push(self.schedule_domain(&analysis)?);
        }
        let program = CompiledProgram { cores: self.cores, domains };
        info!(
            domains = program.domains.len(),
            cores = self.cores,
            instructions = program.instruction_count(),
            "Program compiled"
        );
        Ok(program)
    }
}

/// Compile `env` for `config`, with `available_cores` standing in for
/// `cores = 0`.
pub fn compile(
    env: &Environment,
    overlay: &ConfigOverlay,
    config: &TargetConfig,
    available_cores: usize,
) -> Result<CompiledProgram> {
    Compiler::new(env, overlay, config, available_cores)?.compile()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretvm_core::{Diagnostics, EnvironmentBuilder, NewReaction, TimeValue};

    fn single_timer() -> Environment {
        let mut b = EnvironmentBuilder::new("main");
        let a = b.add_reactor(b.main(), "a");
        let t = b.add_timer(a, "t", TimeValue::ZERO, TimeValue::millis(1));
        b.add_reaction(a, NewReaction::new().on(t));
        b.build().unwrap()
    }

    #[test]
    fn zero_cores_is_rejected() {
        let env = single_timer();
        let overlay = ConfigOverlay::extract(&env, &mut Diagnostics::new());
        let config = TargetConfig::default();
        let err = compile(&env, &overlay, &config, 0).unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidCoreCount(0)));
    }

    #[test]
    fn unset_cores_use_available() {
        let env = single_timer();
        let overlay = ConfigOverlay::extract(&env, &mut Diagnostics::new());
        let config = TargetConfig::default();
        let program = compile(&env, &overlay, &config, 3).unwrap();
        assert_eq!(program.cores, 3);
        assert_eq!(program.domains.len(), 1);
        assert_eq!(program.domains[0].schedule.core_count(), 3);
        assert!(program.domains[0].schedule.is_resolved());
    }

    #[test]
    fn flexpret_names_are_flat() {
        let env = single_timer();
        let overlay = ConfigOverlay::extract(&env, &mut Diagnostics::new());
        let config = TargetConfig { cores: 1, platform: PlatformType::FlexPret, ..TargetConfig::default() };
        let program = compile(&env, &overlay, &config, 8).unwrap();
        let json = program.to_json().unwrap();
        assert!(json.contains("main_a_reaction_1"));
        assert_eq!(program.domains[0].platform, PlatformType::FlexPret);
    }
}
