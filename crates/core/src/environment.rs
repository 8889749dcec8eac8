//! The instantiated program: reactor tree, reactions, ports, triggers and
//! connections, stored in dense declaration-ordered tables.
//!
//! An [`Environment`] is built once per compilation through
//! [`EnvironmentBuilder`] (or the YAML loader in [`crate::description`]) and
//! is immutable afterwards. Every cross-reference is an id into one of the
//! tables, so iteration order is always declaration order.

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use crate::attributes::{Attribute, Attributed};
use crate::entity::{ConnectionId, EntityKind, EntityRef, PortId, ReactionId, ReactorId, TriggerId};
use crate::error::{CoreError, Result};
use crate::time::TimeValue;

// ── Instances ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactorInstance {
    pub id: ReactorId,
    /// Instance name, unique among siblings.
    pub name: String,
    /// Dotted path from the main reactor, e.g. `main.sensor.filter`.
    pub full_name: String,
    pub parent: Option<ReactorId>,
    pub children: Vec<ReactorId>,
    pub reactions: Vec<ReactionId>,
    pub ports: Vec<PortId>,
    pub triggers: Vec<TriggerId>,
    /// Names of the state variables owned by this reactor.
    pub state: Vec<String>,
    /// Set on the main reactor of a federated program.
    pub federated: bool,
    pub attributes: Vec<Attribute>,
}

impl ReactorInstance {
    pub fn is_main(&self) -> bool {
        self.parent.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortDirection {
    Input,
    Output,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortInstance {
    pub id: PortId,
    pub reactor: ReactorId,
    pub name: String,
    pub full_name: String,
    pub direction: PortDirection,
    pub attributes: Vec<Attribute>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerKind {
    Startup,
    Shutdown,
    /// `period == 0` means a one-shot timer.
    Timer { offset: TimeValue, period: TimeValue },
    LogicalAction { min_delay: TimeValue },
    PhysicalAction { min_delay: TimeValue },
}

impl TriggerKind {
    pub fn is_action(&self) -> bool {
        matches!(self, TriggerKind::LogicalAction { .. } | TriggerKind::PhysicalAction { .. })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerInstance {
    pub id: TriggerId,
    pub reactor: ReactorId,
    pub name: String,
    pub full_name: String,
    pub kind: TriggerKind,
    pub attributes: Vec<Attribute>,
}

/// What can cause a reaction to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TriggerRef {
    Port(PortId),
    Trigger(TriggerId),
}

/// What a reaction may produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EffectRef {
    Port(PortId),
    Action(TriggerId),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactionInstance {
    pub id: ReactionId,
    pub reactor: ReactorId,
    /// 1-based declaration order within the reactor; lower runs first.
    pub index: u32,
    pub full_name: String,
    pub triggers: Vec<TriggerRef>,
    /// Ports read without triggering.
    pub sources: Vec<PortId>,
    pub effects: Vec<EffectRef>,
    pub deadline: Option<TimeValue>,
    /// False when the front end produced no body entry point.
    pub has_body: bool,
    pub attributes: Vec<Attribute>,
}

impl ReactionInstance {
    /// Ports this reaction reads, whether or not they trigger it.
    pub fn reads(&self) -> impl Iterator<Item = PortId> + '_ {
        self.triggers
            .iter()
            .filter_map(|t| match t {
                TriggerRef::Port(p) => Some(*p),
                TriggerRef::Trigger(_) => None,
            })
            .chain(self.sources.iter().copied())
    }

    /// Ports this reaction may write.
    pub fn writes(&self) -> impl Iterator<Item = PortId> + '_ {
        self.effects.iter().filter_map(|e| match e {
            EffectRef::Port(p) => Some(*p),
            EffectRef::Action(_) => None,
        })
    }

    pub fn reads_port(&self, port: PortId) -> bool {
        self.reads().any(|p| p == port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    pub id: ConnectionId,
    pub source: PortId,
    pub destination: PortId,
    /// Logical delay (`after`). `None` and zero are both instantaneous.
    pub delay: Option<TimeValue>,
    pub physical: bool,
    pub attributes: Vec<Attribute>,
}

impl Connection {
    /// Whether data crosses this connection within the same tag.
    pub fn is_instantaneous(&self) -> bool {
        !self.physical && self.delay.map_or(true, |d| d.is_zero())
    }
}

// ── Environment ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Environment {
    pub reactors: Vec<ReactorInstance>,
    pub reactions: Vec<ReactionInstance>,
    pub ports: Vec<PortInstance>,
    pub triggers: Vec<TriggerInstance>,
    pub connections: Vec<Connection>,
}

impl Environment {
    pub fn main(&self) -> &ReactorInstance {
        &self.reactors[0]
    }

    pub fn reactor(&self, id: ReactorId) -> &ReactorInstance {
        &self.reactors[id.index()]
    }

    pub fn reaction(&self, id: ReactionId) -> &ReactionInstance {
        &self.reactions[id.index()]
    }

    pub fn port(&self, id: PortId) -> &PortInstance {
        &self.ports[id.index()]
    }

    pub fn trigger(&self, id: TriggerId) -> &TriggerInstance {
        &self.triggers[id.index()]
    }

    pub fn connection(&self, id: ConnectionId) -> &Connection {
        &self.connections[id.index()]
    }

    /// Human-readable, fully qualified name of any entity.
    pub fn name_of(&self, entity: EntityRef) -> String {
        match entity {
            EntityRef::Reactor(id) => self.reactor(id).full_name.clone(),
            EntityRef::Reaction(id) => self.reaction(id).full_name.clone(),
            EntityRef::Port(id) => self.port(id).full_name.clone(),
            EntityRef::Trigger(id) => self.trigger(id).full_name.clone(),
            EntityRef::Connection(id) => {
                let conn = self.connection(id);
                format!(
                    "{} -> {}",
                    self.port(conn.source).full_name,
                    self.port(conn.destination).full_name
                )
            }
        }
    }

    /// Attributes declared on any entity.
    pub fn attributes_of(&self, entity: EntityRef) -> &[Attribute] {
        match entity {
            EntityRef::Reactor(id) => self.reactor(id).attributes(),
            EntityRef::Reaction(id) => self.reaction(id).attributes(),
            EntityRef::Port(id) => self.port(id).attributes(),
            EntityRef::Trigger(id) => self.trigger(id).attributes(),
            EntityRef::Connection(id) => self.connection(id).attributes(),
        }
    }

    /// Every entity in table order: reactors, reactions, ports, triggers, connections.
    pub fn entities(&self) -> impl Iterator<Item = EntityRef> + '_ {
        let reactors = self.reactors.iter().map(|r| EntityRef::Reactor(r.id));
        let reactions = self.reactions.iter().map(|r| EntityRef::Reaction(r.id));
        let ports = self.ports.iter().map(|p| EntityRef::Port(p.id));
        let triggers = self.triggers.iter().map(|t| EntityRef::Trigger(t.id));
        let connections = self.connections.iter().map(|c| EntityRef::Connection(c.id));
        reactors.chain(reactions).chain(ports).chain(triggers).chain(connections)
    }

    /// Reactions that read `port` directly.
    pub fn readers_of(&self, port: PortId) -> Vec<ReactionId> {
        self.reactions
            .iter()
            .filter(|r| r.reads_port(port))
            .map(|r| r.id)
            .collect()
    }

    /// Reactions that may write `port` directly.
    pub fn writers_of(&self, port: PortId) -> Vec<ReactionId> {
        self.reactions
            .iter()
            .filter(|r| r.writes().any(|p| p == port))
            .map(|r| r.id)
            .collect()
    }

    /// Reactions triggered by a timer, action, startup or shutdown trigger.
    pub fn reactions_triggered_by(&self, trigger: TriggerId) -> Vec<ReactionId> {
        self.reactions
            .iter()
            .filter(|r| r.triggers.contains(&TriggerRef::Trigger(trigger)))
            .map(|r| r.id)
            .collect()
    }

    pub fn connections_from(&self, port: PortId) -> impl Iterator<Item = &Connection> + '_ {
        self.connections.iter().filter(move |c| c.source == port)
    }

    pub fn connection_into(&self, port: PortId) -> Option<&Connection> {
        self.connections.iter().find(|c| c.destination == port)
    }

    /// Find the connection joining `output` to `input`, if any.
    pub fn connection_between(&self, output: PortId, input: PortId) -> Option<&Connection> {
        self.connections
            .iter()
            .find(|c| c.source == output && c.destination == input)
    }

    /// Ports reachable from `port` through instantaneous, unbuffered
    /// connections, `port` included. Such ports alias the same value.
    pub fn aliased_ports(&self, port: PortId, is_direct: impl Fn(&Connection) -> bool) -> Vec<PortId> {
        let mut seen: IndexSet<PortId> = IndexSet::new();
        let mut stack = vec![port];
        while let Some(p) = stack.pop() {
            if !seen.insert(p) {
                continue;
            }
            for conn in self.connections_from(p) {
                if is_direct(conn) {
                    stack.push(conn.destination);
                }
            }
        }
        seen.into_iter().collect()
    }

    /// Whether `ancestor` is `reactor` or contains it.
    pub fn contains(&self, ancestor: ReactorId, reactor: ReactorId) -> bool {
        let mut current = Some(reactor);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.reactor(id).parent;
        }
        false
    }

    /// All reactors in the subtree rooted at `root`, in declaration order.
    pub fn subtree(&self, root: ReactorId) -> Vec<ReactorId> {
        let mut out = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            out.push(id);
            for child in self.reactor(id).children.iter().rev() {
                stack.push(*child);
            }
        }
        out
    }
}

// ── Builder ───────────────────────────────────────────────────

/// Declarative description of a reaction to add to a reactor.
#[derive(Debug, Clone, Default)]
pub struct NewReaction {
    pub triggers: Vec<TriggerRef>,
    pub sources: Vec<PortId>,
    pub effects: Vec<EffectRef>,
    pub deadline: Option<TimeValue>,
    pub label: Option<String>,
    pub without_body: bool,
}

impl NewReaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_port(mut self, port: PortId) -> Self {
        self.triggers.push(TriggerRef::Port(port));
        self
    }

    pub fn on(mut self, trigger: TriggerId) -> Self {
        self.triggers.push(TriggerRef::Trigger(trigger));
        self
    }

    pub fn reads(mut self, port: PortId) -> Self {
        self.sources.push(port);
        self
    }

    pub fn writes(mut self, port: PortId) -> Self {
        self.effects.push(EffectRef::Port(port));
        self
    }

    pub fn schedules(mut self, action: TriggerId) -> Self {
        self.effects.push(EffectRef::Action(action));
        self
    }

    pub fn deadline(mut self, deadline: TimeValue) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn without_body(mut self) -> Self {
        self.without_body = true;
        self
    }
}

/// Incremental constructor for an [`Environment`]. The main reactor is
/// created by [`EnvironmentBuilder::new`] and always has id 0.
#[derive(Debug)]
pub struct EnvironmentBuilder {
    env: Environment,
}

impl EnvironmentBuilder {
    pub fn new(main_name: &str) -> Self {
        let main = ReactorInstance {
            id: ReactorId(0),
            name: main_name.to_string(),
            full_name: main_name.to_string(),
            parent: None,
            children: Vec::new(),
            reactions: Vec::new(),
            ports: Vec::new(),
            triggers: Vec::new(),
            state: Vec::new(),
            federated: false,
            attributes: Vec::new(),
        };
        Self {
            env: Environment {
                reactors: vec![main],
                reactions: Vec::new(),
                ports: Vec::new(),
                triggers: Vec::new(),
                connections: Vec::new(),
            },
        }
    }

    pub fn main(&self) -> ReactorId {
        ReactorId(0)
    }

    pub fn set_federated(&mut self, federated: bool) -> &mut Self {
        self.env.reactors[0].federated = federated;
        self
    }

    pub fn add_reactor(&mut self, parent: ReactorId, name: &str) -> ReactorId {
        let id = ReactorId(self.env.reactors.len() as u32);
        let full_name = format!("{}.{}", self.env.reactor(parent).full_name, name);
        self.env.reactors.push(ReactorInstance {
            id,
            name: name.to_string(),
            full_name,
            parent: Some(parent),
            children: Vec::new(),
            reactions: Vec::new(),
            ports: Vec::new(),
            triggers: Vec::new(),
            state: Vec::new(),
            federated: false,
            attributes: Vec::new(),
        });
        self.env.reactors[parent.index()].children.push(id);
        id
    }

    pub fn add_state(&mut self, reactor: ReactorId, name: &str) {
        self.env.reactors[reactor.index()].state.push(name.to_string());
    }

    pub fn add_input(&mut self, reactor: ReactorId, name: &str) -> PortId {
        self.add_port(reactor, name, PortDirection::Input)
    }

    pub fn add_output(&mut self, reactor: ReactorId, name: &str) -> PortId {
        self.add_port(reactor, name, PortDirection::Output)
    }

    fn add_port(&mut self, reactor: ReactorId, name: &str, direction: PortDirection) -> PortId {
        let id = PortId(self.env.ports.len() as u32);
        let full_name = format!("{}.{}", self.env.reactor(reactor).full_name, name);
        self.env.ports.push(PortInstance {
            id,
            reactor,
            name: name.to_string(),
            full_name,
            direction,
            attributes: Vec::new(),
        });
        self.env.reactors[reactor.index()].ports.push(id);
        id
    }

    pub fn add_timer(&mut self, reactor: ReactorId, name: &str, offset: TimeValue, period: TimeValue) -> TriggerId {
        self.add_trigger(reactor, name, TriggerKind::Timer { offset, period })
    }

    pub fn add_startup(&mut self, reactor: ReactorId) -> TriggerId {
        self.add_trigger(reactor, "startup", TriggerKind::Startup)
    }

    pub fn add_shutdown(&mut self, reactor: ReactorId) -> TriggerId {
        self.add_trigger(reactor, "shutdown", TriggerKind::Shutdown)
    }

    pub fn add_logical_action(&mut self, reactor: ReactorId, name: &str, min_delay: TimeValue) -> TriggerId {
        self.add_trigger(reactor, name, TriggerKind::LogicalAction { min_delay })
    }

    pub fn add_physical_action(&mut self, reactor: ReactorId, name: &str, min_delay: TimeValue) -> TriggerId {
        self.add_trigger(reactor, name, TriggerKind::PhysicalAction { min_delay })
    }

    pub fn add_trigger(&mut self, reactor: ReactorId, name: &str, kind: TriggerKind) -> TriggerId {
        let id = TriggerId(self.env.triggers.len() as u32);
        let full_name = format!("{}.{}", self.env.reactor(reactor).full_name, name);
        self.env.triggers.push(TriggerInstance {
            id,
            reactor,
            name: name.to_string(),
            full_name,
            kind,
            attributes: Vec::new(),
        });
        self.env.reactors[reactor.index()].triggers.push(id);
        id
    }

    pub fn add_reaction(&mut self, reactor: ReactorId, spec: NewReaction) -> ReactionId {
        let id = ReactionId(self.env.reactions.len() as u32);
        let index = self.env.reactor(reactor).reactions.len() as u32 + 1;
        let local = spec.label.unwrap_or_else(|| format!("reaction_{}", index));
        let full_name = format!("{}.{}", self.env.reactor(reactor).full_name, local);
        self.env.reactions.push(ReactionInstance {
            id,
            reactor,
            index,
            full_name,
            triggers: spec.triggers,
            sources: spec.sources,
            effects: spec.effects,
            deadline: spec.deadline,
            has_body: !spec.without_body,
            attributes: Vec::new(),
        });
        self.env.reactors[reactor.index()].reactions.push(id);
        id
    }

    pub fn connect(&mut self, source: PortId, destination: PortId) -> ConnectionId {
        self.add_connection(source, destination, None, false)
    }

    pub fn connect_delayed(&mut self, source: PortId, destination: PortId, delay: TimeValue) -> ConnectionId {
        self.add_connection(source, destination, Some(delay), false)
    }

    pub fn connect_physical(&mut self, source: PortId, destination: PortId) -> ConnectionId {
        self.add_connection(source, destination, None, true)
    }

    pub fn add_connection(
        &mut self,
        source: PortId,
        destination: PortId,
        delay: Option<TimeValue>,
        physical: bool,
    ) -> ConnectionId {
        let id = ConnectionId(self.env.connections.len() as u32);
        self.env.connections.push(Connection {
            id,
            source,
            destination,
            delay,
            physical,
            attributes: Vec::new(),
        });
        id
    }

    /// Attach an attribute to any entity.
    pub fn attribute(&mut self, entity: EntityRef, attribute: Attribute) -> &mut Self {
        let slot = match entity {
            EntityRef::Reactor(id) => &mut self.env.reactors[id.index()].attributes,
            EntityRef::Reaction(id) => &mut self.env.reactions[id.index()].attributes,
            EntityRef::Port(id) => &mut self.env.ports[id.index()].attributes,
            EntityRef::Trigger(id) => &mut self.env.triggers[id.index()].attributes,
            EntityRef::Connection(id) => &mut self.env.connections[id.index()].attributes,
        };
        slot.push(attribute);
        self
    }

    /// Validate structural invariants and freeze the environment.
    pub fn build(self) -> Result<Environment> {
        let env = self.env;

        for reactor in &env.reactors {
            let mut names = IndexSet::new();
            for child in &reactor.children {
                if !names.insert(env.reactor(*child).name.as_str()) {
                    return Err(CoreError::DuplicateName {
                        kind: EntityKind::Reactor,
                        name: env.reactor(*child).full_name.clone(),
                    });
                }
            }
            let mut names = IndexSet::new();
            for port in &reactor.ports {
                if !names.insert(env.port(*port).name.as_str()) {
                    return Err(CoreError::DuplicateName {
                        kind: EntityKind::Port,
                        name: env.port(*port).full_name.clone(),
                    });
                }
            }
        }

        for reaction in &env.reactions {
            for port in reaction.reads().chain(reaction.writes()) {
                let owner = env.port(port).reactor;
                let visible = owner == reaction.reactor
                    || env.reactor(owner).parent == Some(reaction.reactor);
                if !visible {
                    return Err(CoreError::InvalidProgram(format!(
                        "reaction '{}' refers to port '{}' outside its reactor and direct children",
                        reaction.full_name,
                        env.port(port).full_name
                    )));
                }
            }
            for trigger in &reaction.triggers {
                if let TriggerRef::Trigger(t) = trigger {
                    if env.trigger(*t).reactor != reaction.reactor {
                        return Err(CoreError::InvalidProgram(format!(
                            "reaction '{}' is triggered by '{}' of another reactor",
                            reaction.full_name,
                            env.trigger(*t).full_name
                        )));
                    }
                }
            }
        }

        let mut destinations = IndexSet::new();
        for conn in &env.connections {
            if !destinations.insert(conn.destination) {
                return Err(CoreError::InvalidProgram(format!(
                    "port '{}' is the destination of more than one connection",
                    env.port(conn.destination).full_name
                )));
            }
            if let Some(delay) = conn.delay {
                if delay.as_nanos() < 0 {
                    return Err(CoreError::InvalidProgram(format!(
                        "connection '{}' has a negative delay",
                        env.name_of(EntityRef::Connection(conn.id))
                    )));
                }
            }
        }

        Ok(env)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipeline() -> (Environment, PortId, PortId) {
        let mut b = EnvironmentBuilder::new("main");
        let src = b.add_reactor(b.main(), "src");
        let dst = b.add_reactor(b.main(), "dst");
        let out = b.add_output(src, "out");
        let inp = b.add_input(dst, "in");
        let t = b.add_timer(src, "t", TimeValue::ZERO, TimeValue::millis(10));
        b.add_reaction(src, NewReaction::new().on(t).writes(out));
        b.add_reaction(dst, NewReaction::new().on_port(inp));
        b.connect(out, inp);
        (b.build().unwrap(), out, inp)
    }

    #[test]
    fn full_names_follow_the_tree() {
        let (env, out, inp) = pipeline();
        assert_eq!(env.port(out).full_name, "main.src.out");
        assert_eq!(env.port(inp).full_name, "main.dst.in");
        assert_eq!(env.reaction(ReactionId(1)).full_name, "main.dst.reaction_1");
    }

    #[test]
    fn readers_and_writers() {
        let (env, out, inp) = pipeline();
        assert_eq!(env.writers_of(out), vec![ReactionId(0)]);
        assert_eq!(env.readers_of(inp), vec![ReactionId(1)]);
        assert!(env.readers_of(out).is_empty());
    }

    #[test]
    fn aliased_ports_follow_direct_connections() {
        let (env, out, inp) = pipeline();
        let aliases = env.aliased_ports(out, |c| c.is_instantaneous());
        assert_eq!(aliases, vec![out, inp]);
    }

    #[test]
    fn connection_lookup() {
        let (env, out, inp) = pipeline();
        assert!(env.connection_between(out, inp).is_some());
        assert!(env.connection_between(inp, out).is_none());
        assert_eq!(env.connection_into(inp).map(|c| c.id), Some(ConnectionId(0)));
    }

    #[test]
    fn subtree_in_declaration_order() {
        let mut b = EnvironmentBuilder::new("main");
        let a = b.add_reactor(b.main(), "a");
        let a1 = b.add_reactor(a, "a1");
        let c = b.add_reactor(b.main(), "c");
        let env = b.build().unwrap();
        assert_eq!(env.subtree(ReactorId(0)), vec![ReactorId(0), a, a1, c]);
        assert!(env.contains(a, a1));
        assert!(!env.contains(c, a1));
    }

    #[test]
    fn rejects_duplicate_destinations() {
        let mut b = EnvironmentBuilder::new("main");
        let x = b.add_reactor(b.main(), "x");
        let o1 = b.add_output(x, "o1");
        let o2 = b.add_output(x, "o2");
        let y = b.add_reactor(b.main(), "y");
        let i = b.add_input(y, "i");
        b.connect(o1, i);
        b.connect(o2, i);
        assert!(matches!(b.build(), Err(CoreError::InvalidProgram(_))));
    }

    #[test]
    fn rejects_ports_outside_scope() {
        let mut b = EnvironmentBuilder::new("main");
        let x = b.add_reactor(b.main(), "x");
        let inner = b.add_reactor(x, "inner");
        let p = b.add_input(inner, "p");
        // main may only see ports of its direct children
        b.add_reaction(ReactorId(0), NewReaction::new().writes(p));
        assert!(matches!(b.build(), Err(CoreError::InvalidProgram(_))));
    }

    #[test]
    fn rejects_duplicate_children() {
        let mut b = EnvironmentBuilder::new("main");
        b.add_reactor(b.main(), "x");
        b.add_reactor(b.main(), "x");
        assert!(matches!(b.build(), Err(CoreError::DuplicateName { .. })));
    }
}
