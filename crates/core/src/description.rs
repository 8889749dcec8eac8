//! YAML program descriptions.
//!
//! A description is the instantiated reactor tree as produced by a front end:
//!
//! ```yaml
//! target:
//!   cores: 2
//! main:
//!   name: main
//!   children:
//!     - name: src
//!       outputs: [out]
//!       timers: [{ name: t, period: 10 ms }]
//!       reactions: [{ triggers: [t], effects: [out] }]
//!     - name: sink
//!       inputs: [in]
//!       reactions: [{ triggers: [in] }]
//!   connections:
//!     - { from: src.out, to: sink.in, attributes: [{ name: buffer, value: 4 }] }
//! ```
//!
//! Names inside a reactor resolve against its own ports, timers, actions,
//! `startup`/`shutdown`, and `child.port` for ports of direct children.

use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::attributes::{AttrParam, Attribute};
use crate::config::TargetConfig;
use crate::diagnostics::Diagnostics;
use crate::entity::{EntityKind, EntityRef, PortId, ReactorId, TriggerId};
use crate::environment::{Environment, EnvironmentBuilder, NewReaction, TriggerKind};
use crate::error::{CoreError, Result};
use crate::time::TimeValue;

// ── Document types ────────────────────────────────────────────

/// A YAML scalar, kept as written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Scalar {
    pub fn as_text(&self) -> String {
        match self {
            Scalar::Bool(b) => b.to_string(),
            Scalar::Int(i) => i.to_string(),
            Scalar::Float(f) => f.to_string(),
            Scalar::Str(s) => s.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeDecl {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Scalar>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub params: IndexMap<String, Scalar>,
}

impl AttributeDecl {
    fn to_attribute(&self) -> Attribute {
        let mut params: Vec<AttrParam> = Vec::new();
        if let Some(v) = &self.value {
            params.push(AttrParam { name: None, value: v.as_text() });
        }
        params.extend(self.params.iter().map(|(k, v)| AttrParam {
            name: Some(k.clone()),
            value: v.as_text(),
        }));
        Attribute { name: self.name.clone(), params }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortDecl {
    pub name: String,
    #[serde(default)]
    pub attributes: Vec<AttributeDecl>,
}

/// Ports may be written as a bare name or as a map with attributes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PortEntry {
    Name(String),
    Decl(PortDecl),
}

impl PortEntry {
    fn decl(&self) -> PortDecl {
        match self {
            PortEntry::Name(name) => PortDecl { name: name.clone(), attributes: Vec::new() },
            PortEntry::Decl(d) => d.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimerDecl {
    pub name: String,
    #[serde(default)]
    pub offset: Option<String>,
    #[serde(default)]
    pub period: Option<String>,
    #[serde(default)]
    pub attributes: Vec<AttributeDecl>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionOrigin {
    Logical,
    Physical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionDecl {
    pub name: String,
    #[serde(default = "default_origin")]
    pub origin: ActionOrigin,
    #[serde(default)]
    pub min_delay: Option<String>,
    #[serde(default)]
    pub attributes: Vec<AttributeDecl>,
}

fn default_origin() -> ActionOrigin {
    ActionOrigin::Logical
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReactionDecl {
    #[serde(default)]
    pub triggers: Vec<String>,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub effects: Vec<String>,
    #[serde(default)]
    pub deadline: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    /// Set when the front end produced no body for this reaction.
    #[serde(default)]
    pub bodyless: bool,
    #[serde(default)]
    pub attributes: Vec<AttributeDecl>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionDecl {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub after: Option<String>,
    #[serde(default)]
    pub physical: bool,
    #[serde(default)]
    pub attributes: Vec<AttributeDecl>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactorDecl {
    pub name: String,
    #[serde(default)]
    pub federated: bool,
    #[serde(default)]
    pub attributes: Vec<AttributeDecl>,
    #[serde(default)]
    pub state: Vec<String>,
    #[serde(default)]
    pub inputs: Vec<PortEntry>,
    #[serde(default)]
    pub outputs: Vec<PortEntry>,
    #[serde(default)]
    pub timers: Vec<TimerDecl>,
    #[serde(default)]
    pub actions: Vec<ActionDecl>,
    #[serde(default)]
    pub reactions: Vec<ReactionDecl>,
    #[serde(default)]
    pub children: Vec<ReactorDecl>,
    #[serde(default)]
    pub connections: Vec<ConnectionDecl>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgramDescription {
    #[serde(default)]
    pub target: IndexMap<String, Scalar>,
    pub main: ReactorDecl,
}

// ── Loading ───────────────────────────────────────────────────

impl ProgramDescription {
    pub fn from_yaml(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml(&text)
    }

    /// Target properties declared in the description, applied over defaults.
    pub fn target_config(&self, diags: &mut Diagnostics) -> TargetConfig {
        let mut config = TargetConfig::default();
        for (key, value) in &self.target {
            config.apply_property(key, &value.as_text(), diags);
        }
        config
    }

    /// Instantiate the reactor tree.
    pub fn build_environment(&self) -> Result<Environment> {
        let mut loader = Loader {
            builder: EnvironmentBuilder::new(&self.main.name),
            scopes: Vec::new(),
        };
        loader.builder.set_federated(self.main.federated);
        let main = loader.builder.main();
        loader.declare(main, &self.main)?;
        loader.connect(main, &self.main)?;
        let env = loader.builder.build()?;
        tracing::info!(
            reactors = env.reactors.len(),
            reactions = env.reactions.len(),
            connections = env.connections.len(),
            "Program loaded"
        );
        Ok(env)
    }
}

#[derive(Debug, Default)]
struct Scope {
    ports: IndexMap<String, PortId>,
    triggers: IndexMap<String, TriggerId>,
    children: IndexMap<String, ReactorId>,
}

struct Loader {
    builder: EnvironmentBuilder,
    scopes: Vec<Scope>,
}

fn parse_time(text: &str, context: &str) -> Result<TimeValue> {
    text.parse::<TimeValue>()
        .map_err(|e| CoreError::InvalidProgram(format!("{}: {}", context, e)))
}

impl Loader {
    fn scope(&mut self, reactor: ReactorId) -> &mut Scope {
        if self.scopes.len() <= reactor.index() {
            self.scopes.resize_with(reactor.index() + 1, Scope::default);
        }
        &mut self.scopes[reactor.index()]
    }

    fn annotate(&mut self, entity: EntityRef, attrs: &[AttributeDecl]) {
        for a in attrs {
            self.builder.attribute(entity, a.to_attribute());
        }
    }

    /// First pass: reactors, ports, timers, actions and state, depth first.
    fn declare(&mut self, id: ReactorId, decl: &ReactorDecl) -> Result<()> {
        self.scope(id);
        self.annotate(EntityRef::Reactor(id), &decl.attributes);
        for s in &decl.state {
            self.builder.add_state(id, s);
        }
        for entry in &decl.inputs {
            let p = entry.decl();
            let port = self.builder.add_input(id, &p.name);
            self.annotate(EntityRef::Port(port), &p.attributes);
            self.scope(id).ports.insert(p.name, port);
        }
        for entry in &decl.outputs {
            let p = entry.decl();
            let port = self.builder.add_output(id, &p.name);
            self.annotate(EntityRef::Port(port), &p.attributes);
            self.scope(id).ports.insert(p.name, port);
        }
        for timer in &decl.timers {
            let context = format!("timer '{}'", timer.name);
            let offset = match &timer.offset {
                Some(t) => parse_time(t, &context)?,
                None => TimeValue::ZERO,
            };
            let period = match &timer.period {
                Some(t) => parse_time(t, &context)?,
                None => TimeValue::ZERO,
            };
            if offset.as_nanos() < 0 || period.as_nanos() < 0 {
                return Err(CoreError::InvalidProgram(format!("{} has a negative offset or period", context)));
            }
            let trigger = self.builder.add_timer(id, &timer.name, offset, period);
            self.annotate(EntityRef::Trigger(trigger), &timer.attributes);
            self.scope(id).triggers.insert(timer.name.clone(), trigger);
        }
        for action in &decl.actions {
            let min_delay = match &action.min_delay {
                Some(t) => parse_time(t, &format!("action '{}'", action.name))?,
                None => TimeValue::ZERO,
            };
            let kind = match action.origin {
                ActionOrigin::Logical => TriggerKind::LogicalAction { min_delay },
                ActionOrigin::Physical => TriggerKind::PhysicalAction { min_delay },
            };
            let trigger = self.builder.add_trigger(id, &action.name, kind);
            self.annotate(EntityRef::Trigger(trigger), &action.attributes);
            self.scope(id).triggers.insert(action.name.clone(), trigger);
        }
        let uses = |name: &str| decl.reactions.iter().any(|r| r.triggers.iter().any(|t| t == name));
        if uses("startup") {
            let t = self.builder.add_startup(id);
            self.scope(id).triggers.insert("startup".to_string(), t);
        }
        if uses("shutdown") {
            let t = self.builder.add_shutdown(id);
            self.scope(id).triggers.insert("shutdown".to_string(), t);
        }
        for child in &decl.children {
            let child_id = self.builder.add_reactor(id, &child.name);
            self.scope(id).children.insert(child.name.clone(), child_id);
            self.declare(child_id, child)?;
        }
        Ok(())
    }

    /// Second pass: reactions and connections, in the same order.
    fn connect(&mut self, id: ReactorId, decl: &ReactorDecl) -> Result<()> {
        for (i, r) in decl.reactions.iter().enumerate() {
            let context = format!("{}.reaction_{}", decl.name, i + 1);
            let mut spec = NewReaction::new();
            for name in &r.triggers {
                spec = match self.lookup_trigger(id, name) {
                    Some(t) => spec.on(t),
                    None => spec.on_port(self.lookup_port(id, name, &context)?),
                };
            }
            for name in &r.sources {
                spec = spec.reads(self.lookup_port(id, name, &context)?);
            }
            for name in &r.effects {
                spec = match self.lookup_trigger(id, name) {
                    Some(t) => spec.schedules(t),
                    None => spec.writes(self.lookup_port(id, name, &context)?),
                };
            }
            if let Some(d) = &r.deadline {
                spec = spec.deadline(parse_time(d, &context)?);
            }
            if let Some(label) = &r.label {
                spec = spec.label(label.clone());
            }
            if r.bodyless {
                spec = spec.without_body();
            }
            let reaction = self.builder.add_reaction(id, spec);
            self.annotate(EntityRef::Reaction(reaction), &r.attributes);
        }
        for c in &decl.connections {
            let context = format!("connection {} -> {}", c.from, c.to);
            let source = self.lookup_port(id, &c.from, &context)?;
            let destination = self.lookup_port(id, &c.to, &context)?;
            let delay = match &c.after {
                Some(t) => Some(parse_time(t, &context)?),
                None => None,
            };
            let conn = self.builder.add_connection(source, destination, delay, c.physical);
            self.annotate(EntityRef::Connection(conn), &c.attributes);
        }
        for child in &decl.children {
            let child_id = self.scopes[id.index()].children[child.name.as_str()];
            self.connect(child_id, child)?;
        }
        Ok(())
    }

    fn lookup_trigger(&self, reactor: ReactorId, name: &str) -> Option<TriggerId> {
        self.scopes.get(reactor.index())?.triggers.get(name).copied()
    }

    fn lookup_port(&self, reactor: ReactorId, name: &str, context: &str) -> Result<PortId> {
        let unknown = || CoreError::UnknownReference {
            kind: EntityKind::Port,
            name: name.to_string(),
            context: context.to_string(),
        };
        let scope = self.scopes.get(reactor.index()).ok_or_else(unknown)?;
        match name.split_once('.') {
            None => scope.ports.get(name).copied().ok_or_else(unknown),
            Some((child, port)) => {
                let child_id = scope.children.get(child).ok_or_else(|| CoreError::UnknownReference {
                    kind: EntityKind::Reactor,
                    name: child.to_string(),
                    context: context.to_string(),
                })?;
                self.scopes
                    .get(child_id.index())
                    .and_then(|s| s.ports.get(port))
                    .copied()
                    .ok_or_else(unknown)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::{Attributed, ConfigOverlay};
    use crate::config::PlatformType;
    use crate::entity::{ConnectionId, ReactionId};

    const PIPELINE: &str = r#"
target:
  cores: 2
  platform: linux
main:
  name: main
  children:
    - name: src
      outputs: [out]
      timers:
        - { name: t, offset: "0", period: 10 ms }
      reactions:
        - { triggers: [t, startup], effects: [out] }
    - name: sink
      inputs: [in]
      state: [total]
      reactions:
        - triggers: [in]
          deadline: 2 ms
  connections:
    - from: src.out
      to: sink.in
      attributes:
        - { name: buffer, value: 4 }
"#;

    #[test]
    fn loads_pipeline() {
        let desc = ProgramDescription::from_yaml(PIPELINE).unwrap();
        let env = desc.build_environment().unwrap();
        assert_eq!(env.reactors.len(), 3);
        assert_eq!(env.reactions.len(), 2);
        assert_eq!(env.triggers.len(), 2);
        assert_eq!(env.reaction(ReactionId(1)).deadline, Some(TimeValue::millis(2)));
        assert_eq!(env.reactor(ReactorId(2)).state, vec!["total".to_string()]);

        let conn = env.connection(ConnectionId(0));
        assert_eq!(env.port(conn.source).full_name, "main.src.out");
        assert!(conn.has_attribute("buffer"));

        let overlay = ConfigOverlay::extract(&env, &mut Diagnostics::new());
        assert_eq!(overlay.buffer_size(ConnectionId(0)), 4);
    }

    #[test]
    fn target_section_becomes_config() {
        let desc = ProgramDescription::from_yaml(PIPELINE).unwrap();
        let mut diags = Diagnostics::new();
        let cfg = desc.target_config(&mut diags);
        assert_eq!(cfg.cores, 2);
        assert_eq!(cfg.platform, PlatformType::Linux);
        assert!(diags.is_empty());
    }

    #[test]
    fn unknown_port_is_reported() {
        let yaml = r#"
main:
  name: main
  children:
    - name: a
      outputs: [out]
  connections:
    - { from: a.out, to: b.in }
"#;
        let desc = ProgramDescription::from_yaml(yaml).unwrap();
        let err = desc.build_environment().unwrap_err();
        match err {
            CoreError::UnknownReference { kind, name, .. } => {
                assert_eq!(kind, EntityKind::Reactor);
                assert_eq!(name, "b");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn bad_time_is_invalid_program() {
        let yaml = r#"
main:
  name: main
  timers:
    - { name: t, period: ten ms }
"#;
        let desc = ProgramDescription::from_yaml(yaml).unwrap();
        assert!(matches!(desc.build_environment(), Err(CoreError::InvalidProgram(_))));
    }

    #[test]
    fn malformed_yaml_is_parse_error() {
        assert!(matches!(ProgramDescription::from_yaml("main: ["), Err(CoreError::Parse(_))));
    }
}
