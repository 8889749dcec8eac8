//! Attribute annotations and the configuration overlay derived from them.
//!
//! The registry of known attributes is a process-wide immutable table built
//! on first use. [`validate`] checks every attribute in an [`Environment`]
//! against it; [`ConfigOverlay::extract`] reads the scheduler-relevant values
//! (buffer sizes, pending-event limits, enclave and clock-sync settings),
//! recording malformed values as diagnostics and falling back to defaults.

use std::fmt;
use std::sync::LazyLock;

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

use crate::config::PlatformType;
use crate::diagnostics::{fuzzy_match, Diagnostics};
use crate::entity::{ConnectionId, EntityKind, EntityRef, ReactorId, TriggerId};
use crate::environment::{Connection, Environment, PortInstance, ReactionInstance, ReactorInstance, TriggerInstance};
use crate::error::{CoreError, Result};
use crate::time::TimeValue;

const VALUE_PARAM: &str = "value";

// ── Annotations ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttrParam {
    /// `None` for the positional shorthand `@attr(x)`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    #[serde(default)]
    pub params: Vec<AttrParam>,
}

impl Attribute {
    pub fn flag(name: &str) -> Self {
        Self { name: name.to_string(), params: Vec::new() }
    }

    pub fn with_value(name: &str, value: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            params: vec![AttrParam { name: None, value: value.into() }],
        }
    }

    pub fn with_params(name: &str, params: &[(&str, &str)]) -> Self {
        Self {
            name: name.to_string(),
            params: params
                .iter()
                .map(|(k, v)| AttrParam { name: Some(k.to_string()), value: v.to_string() })
                .collect(),
        }
    }

    /// Value of the named parameter. A single positional parameter answers
    /// to the name `value`.
    pub fn param(&self, name: &str) -> Option<&str> {
        if let [only] = self.params.as_slice() {
            if only.name.is_none() && name == VALUE_PARAM {
                return Some(&only.value);
            }
        }
        self.params
            .iter()
            .find(|p| p.name.as_deref() == Some(name))
            .map(|p| p.value.as_str())
    }

    pub fn value(&self) -> Option<&str> {
        self.param(VALUE_PARAM)
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.name)?;
        if !self.params.is_empty() {
            let parts: Vec<String> = self
                .params
                .iter()
                .map(|p| match &p.name {
                    Some(n) => format!("{}={}", n, p.value),
                    None => p.value.clone(),
                })
                .collect();
            write!(f, "({})", parts.join(", "))?;
        }
        Ok(())
    }
}

/// Capability of carrying attributes. Implemented by exactly the entity
/// kinds that can be annotated.
pub trait Attributed {
    fn attributes(&self) -> &[Attribute];
    fn entity(&self) -> EntityRef;

    fn find_attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes().iter().find(|a| a.name == name)
    }

    fn has_attribute(&self, name: &str) -> bool {
        self.find_attribute(name).is_some()
    }
}

macro_rules! impl_attributed {
    ($ty:ty, $variant:ident) => {
        impl Attributed for $ty {
            fn attributes(&self) -> &[Attribute] {
                &self.attributes
            }

            fn entity(&self) -> EntityRef {
                EntityRef::$variant(self.id)
            }
        }
    };
}

impl_attributed!(ReactorInstance, Reactor);
impl_attributed!(ReactionInstance, Reaction);
impl_attributed!(PortInstance, Port);
impl_attributed!(TriggerInstance, Trigger);
impl_attributed!(Connection, Connection);

// ── Registry ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttrParamType {
    String,
    Int,
    BigInt,
    Boolean,
    Float,
    Time,
}

impl fmt::Display for AttrParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrParamType::String => write!(f, "String"),
            AttrParamType::Int | AttrParamType::BigInt => write!(f, "Int"),
            AttrParamType::Boolean => write!(f, "Boolean"),
            AttrParamType::Float => write!(f, "Float"),
            AttrParamType::Time => write!(f, "Time"),
        }
    }
}

impl AttrParamType {
    pub fn accepts(self, value: &str) -> bool {
        match self {
            AttrParamType::String => true,
            AttrParamType::Int => value.trim().parse::<i32>().is_ok(),
            AttrParamType::BigInt => value.trim().parse::<i128>().is_ok(),
            AttrParamType::Boolean => matches!(value.trim(), "true" | "false"),
            AttrParamType::Float => value.trim().parse::<f64>().is_ok(),
            AttrParamType::Time => value.parse::<TimeValue>().is_ok(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AttrParamSpec {
    pub name: &'static str,
    pub ty: AttrParamType,
    pub optional: bool,
}

const fn required(name: &'static str, ty: AttrParamType) -> AttrParamSpec {
    AttrParamSpec { name, ty, optional: false }
}

const fn optional(name: &'static str, ty: AttrParamType) -> AttrParamSpec {
    AttrParamSpec { name, ty, optional: true }
}

#[derive(Debug, Clone)]
pub struct AttributeSpec {
    /// `None` when the attribute takes no parameters at all.
    pub params: Option<&'static [AttrParamSpec]>,
    pub targets: &'static [EntityKind],
}

const ALL_KINDS: &[EntityKind] = &[
    EntityKind::Reactor,
    EntityKind::Reaction,
    EntityKind::Port,
    EntityKind::Trigger,
    EntityKind::Connection,
];
const REACTOR: &[EntityKind] = &[EntityKind::Reactor];
const PORT: &[EntityKind] = &[EntityKind::Port];
const REACTOR_OR_PORT: &[EntityKind] = &[EntityKind::Reactor, EntityKind::Port];
const TRIGGER: &[EntityKind] = &[EntityKind::Trigger];
const CONNECTION: &[EntityKind] = &[EntityKind::Connection];

use AttrParamType as T;

const SINGLE_STRING: &[AttrParamSpec] = &[required(VALUE_PARAM, T::String)];
const SINGLE_INT: &[AttrParamSpec] = &[required(VALUE_PARAM, T::Int)];
const SINGLE_TIME: &[AttrParamSpec] = &[required(VALUE_PARAM, T::Time)];
const NAME_ADDRESS: &[AttrParamSpec] = &[optional("name", T::String), optional("address", T::String)];
const LAYOUT: &[AttrParamSpec] = &[required("option", T::String), required(VALUE_PARAM, T::String)];
const ENCLAVE: &[AttrParamSpec] = &[optional("each", T::Boolean)];
const PROPERTY: &[AttrParamSpec] = &[
    required("name", T::String),
    required("tactic", T::String),
    required("spec", T::String),
    optional("CT", T::Int),
    optional("expect", T::Boolean),
];
const INTERFACE_UART: &[AttrParamSpec] = &[
    optional("name", T::String),
    optional("uart_device", T::Int),
    optional("baud_rate", T::Int),
    optional("data_bits", T::Int),
    optional("parity", T::String),
    optional("stop_bits", T::Int),
    optional("async", T::Boolean),
];
const INTERFACE_CUSTOM: &[AttrParamSpec] = &[
    required("name", T::String),
    optional("args", T::String),
    required("include", T::String),
];
const JOINING_POLICY: &[AttrParamSpec] = &[required("policy", T::String)];
const LINK: &[AttrParamSpec] = &[
    optional("left", T::String),
    optional("right", T::String),
    optional("server_port", T::Int),
    optional("server_side", T::String),
];
const CLOCK_SYNC: &[AttrParamSpec] = &[
    optional("disabled", T::Boolean),
    optional("grandmaster", T::Boolean),
    optional("period", T::BigInt),
    optional("max_adj", T::Int),
    optional("kp", T::Float),
    optional("ki", T::Float),
];

/// Every known attribute, keyed by name.
pub static ATTRIBUTE_SPECS: LazyLock<IndexMap<&'static str, AttributeSpec>> = LazyLock::new(|| {
    let table: [(&'static str, Option<&'static [AttrParamSpec]>, &'static [EntityKind]); 20] = [
        ("label", Some(SINGLE_STRING), ALL_KINDS),
        ("maxwait", Some(SINGLE_TIME), REACTOR),
        ("sparse", None, PORT),
        ("icon", Some(SINGLE_STRING), REACTOR),
        ("side", Some(SINGLE_STRING), PORT),
        ("layout", Some(LAYOUT), REACTOR_OR_PORT),
        ("enclave", Some(ENCLAVE), REACTOR),
        ("property", Some(PROPERTY), REACTOR),
        ("max_pending_events", Some(SINGLE_INT), TRIGGER),
        ("buffer", Some(SINGLE_INT), CONNECTION),
        ("interface_uart", Some(INTERFACE_UART), REACTOR),
        ("interface_tcp", Some(NAME_ADDRESS), REACTOR),
        ("interface_coap", Some(NAME_ADDRESS), REACTOR),
        ("interface_custom", Some(INTERFACE_CUSTOM), REACTOR),
        ("joining_policy", Some(JOINING_POLICY), REACTOR),
        ("link", Some(LINK), CONNECTION),
        ("platform_riot", None, REACTOR),
        ("platform_zephyr", None, REACTOR),
        ("platform_native", None, REACTOR),
        ("clock_sync", Some(CLOCK_SYNC), REACTOR),
    ];
    table
        .into_iter()
        .map(|(name, params, targets)| (name, AttributeSpec { params, targets }))
        .collect()
});

/// Look up the specification of an attribute by name.
pub fn spec_for(name: &str) -> Option<&'static AttributeSpec> {
    ATTRIBUTE_SPECS.get(name)
}

impl AttributeSpec {
    /// Reject attachment to an entity kind this attribute does not apply to.
    pub fn check_target(&self, name: &str, kind: EntityKind) -> Result<()> {
        if self.targets.contains(&kind) {
            Ok(())
        } else {
            Err(CoreError::UnsupportedTarget { attribute: name.to_string(), kind })
        }
    }

    /// Check parameter names, types and presence.
    pub fn check(&self, attr: &Attribute, location: &str, diags: &mut Diagnostics) {
        let name = Some(attr.name.as_str());
        let mut seen: IndexSet<&str> = IndexSet::new();

        if let [only] = attr.params.as_slice() {
            if only.name.is_none() {
                let Some(params) = self.params else {
                    diags.error(location, name, "attribute doesn't take a parameter");
                    return;
                };
                let Some(value_spec) = params.iter().find(|p| p.name == VALUE_PARAM) else {
                    diags.error(location, name, "attribute doesn't have a 'value' parameter");
                    return;
                };
                check_param(value_spec, &only.value, location, name, diags);
                seen.insert(VALUE_PARAM);
                self.check_missing(&seen, location, name, diags);
                return;
            }
        }

        for param in &attr.params {
            let Some(params) = self.params else {
                diags.error(location, name, "attribute does not take parameters");
                break;
            };
            let Some(param_name) = param.name.as_deref() else {
                diags.error(location, name, "missing name for attribute parameter");
                continue;
            };
            match params.iter().find(|p| p.name == param_name) {
                Some(spec) => {
                    check_param(spec, &param.value, location, name, diags);
                    seen.insert(spec.name);
                }
                None => {
                    let hint = fuzzy_match(param_name, params.iter().map(|p| p.name));
                    let msg = format!("'{}' is an unknown attribute parameter", param_name);
                    match hint {
                        Some(h) => diags.error_with_suggestion(location, name, msg, h),
                        None => diags.error(location, name, msg),
                    }
                }
            }
        }
        self.check_missing(&seen, location, name, diags);
    }

    fn check_missing(&self, seen: &IndexSet<&str>, location: &str, name: Option<&str>, diags: &mut Diagnostics) {
        for spec in self.params.unwrap_or(&[]) {
            if !spec.optional && !seen.contains(spec.name) {
                diags.error(
                    location,
                    name,
                    format!("missing required attribute parameter '{}'", spec.name),
                );
            }
        }
    }
}

fn check_param(spec: &AttrParamSpec, value: &str, location: &str, name: Option<&str>, diags: &mut Diagnostics) {
    if !spec.ty.accepts(value) {
        let msg = match spec.ty {
            AttrParamType::Time => format!("incorrect time specification for '{}': '{}'", spec.name, value),
            ty => format!("incorrect type: '{}' should have type {}", spec.name, ty),
        };
        diags.warn(location, name, msg);
    }
}

/// Check every attribute in the environment against the registry.
pub fn validate(env: &Environment, diags: &mut Diagnostics) {
    for entity in env.entities() {
        let attrs = env.attributes_of(entity);
        if attrs.is_empty() {
            continue;
        }
        let location = env.name_of(entity);
        for attr in attrs {
            let Some(spec) = spec_for(&attr.name) else {
                let msg = format!("unknown attribute '{}'", attr.name);
                match fuzzy_match(&attr.name, ATTRIBUTE_SPECS.keys().copied()) {
                    Some(h) => diags.error_with_suggestion(&location, Some(&attr.name), msg, h),
                    None => diags.error(&location, Some(&attr.name), msg),
                }
                continue;
            };
            if let Err(e) = spec.check_target(&attr.name, entity.kind()) {
                diags.error(&location, Some(&attr.name), e.to_string());
                continue;
            }
            spec.check(attr, &location, diags);
        }
    }
}

// ── Overlay ───────────────────────────────────────────────────

/// Clock-synchronization role and parameters of a federate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClockSyncParams {
    pub disabled: bool,
    pub grandmaster: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub period: Option<TimeValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_adj: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kp: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ki: Option<f64>,
}

/// Network link parameters of a federated connection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkParams {
    pub left: Option<String>,
    pub right: Option<String>,
    pub server_port: Option<i64>,
    pub server_side: Option<String>,
}

/// Scheduler-relevant configuration read from attributes.
///
/// These values parameterize the scheduling algorithms; they never select
/// a different one.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigOverlay {
    pub max_pending_events: IndexMap<TriggerId, i64>,
    pub buffer_sizes: IndexMap<ConnectionId, i64>,
    pub enclaves: IndexSet<ReactorId>,
    pub clock_sync: IndexMap<ReactorId, ClockSyncParams>,
    pub max_wait: IndexMap<ReactorId, TimeValue>,
    pub links: IndexMap<ConnectionId, LinkParams>,
    pub platforms: IndexMap<ReactorId, PlatformType>,
}

impl ConfigOverlay {
    pub fn extract(env: &Environment, diags: &mut Diagnostics) -> Self {
        let mut overlay = Self::default();

        for trigger in &env.triggers {
            if let Some(attr) = trigger.find_attribute("max_pending_events") {
                if !trigger.kind.is_action() {
                    diags.warn(
                        &trigger.full_name,
                        Some("max_pending_events"),
                        "only actions have a pending-event queue; ignored",
                    );
                    continue;
                }
                if let Some(limit) = int_value(attr, &trigger.full_name, diags) {
                    overlay.max_pending_events.insert(trigger.id, limit);
                }
            }
        }

        for conn in &env.connections {
            let location = env.name_of(EntityRef::Connection(conn.id));
            if let Some(attr) = conn.find_attribute("buffer") {
                if let Some(size) = int_value(attr, &location, diags) {
                    overlay.buffer_sizes.insert(conn.id, size);
                }
            }
            if let Some(attr) = conn.find_attribute("link") {
                let server_port = match attr.param("server_port") {
                    Some(v) => match v.trim().parse::<i64>() {
                        Ok(p) => Some(p),
                        Err(_) => {
                            let msg = format!("server_port '{}' is not an integer; ignored", v);
                            diags.warn(&location, Some("link"), msg);
                            None
                        }
                    },
                    None => None,
                };
                overlay.links.insert(
                    conn.id,
                    LinkParams {
                        left: attr.param("left").map(str::to_string),
                        right: attr.param("right").map(str::to_string),
                        server_port,
                        server_side: attr.param("server_side").map(str::to_string),
                    },
                );
            }
        }

        for reactor in &env.reactors {
            let location = reactor.full_name.as_str();
            if reactor.has_attribute("enclave") {
                if reactor.is_main() {
                    diags.warn(location, Some("enclave"), "the main reactor cannot be an enclave; ignored");
                } else {
                    overlay.enclaves.insert(reactor.id);
                }
            }
            if let Some(attr) = reactor.find_attribute("maxwait") {
                overlay.max_wait.insert(reactor.id, max_wait_value(attr, location, diags));
            }
            if let Some(attr) = reactor.find_attribute("clock_sync") {
                overlay.clock_sync.insert(reactor.id, clock_sync_params(attr, location, diags));
            }
            let platform = if reactor.has_attribute("platform_native") {
                Some(PlatformType::Native)
            } else if reactor.has_attribute("platform_riot") {
                Some(PlatformType::Riot)
            } else if reactor.has_attribute("platform_zephyr") {
                Some(PlatformType::Zephyr)
            } else {
                None
            };
            if let Some(p) = platform {
                overlay.platforms.insert(reactor.id, p);
            }
        }

        tracing::debug!(
            buffers = overlay.buffer_sizes.len(),
            enclaves = overlay.enclaves.len(),
            clock_sync = overlay.clock_sync.len(),
            "Configuration overlay extracted"
        );
        overlay
    }

    /// Pending-event limit of an action, `-1` when unbounded.
    pub fn max_pending_events(&self, trigger: TriggerId) -> i64 {
        self.max_pending_events.get(&trigger).copied().unwrap_or(-1)
    }

    /// Buffer capacity of a connection, `-1` when unbuffered.
    pub fn buffer_size(&self, conn: ConnectionId) -> i64 {
        self.buffer_sizes.get(&conn).copied().unwrap_or(-1)
    }

    pub fn is_buffered(&self, conn: ConnectionId) -> bool {
        self.buffer_sizes.contains_key(&conn)
    }

    pub fn is_enclave(&self, reactor: ReactorId) -> bool {
        self.enclaves.contains(&reactor)
    }

    pub fn clock_sync(&self, reactor: ReactorId) -> Option<&ClockSyncParams> {
        self.clock_sync.get(&reactor)
    }

    /// Maximum wait for network input; zero when undeclared.
    pub fn max_wait(&self, reactor: ReactorId) -> TimeValue {
        self.max_wait.get(&reactor).copied().unwrap_or(TimeValue::ZERO)
    }

    pub fn link(&self, conn: ConnectionId) -> Option<&LinkParams> {
        self.links.get(&conn)
    }

    /// Platform a federate is pinned to; `Auto` when unannotated.
    pub fn platform(&self, reactor: ReactorId) -> PlatformType {
        self.platforms.get(&reactor).copied().unwrap_or(PlatformType::Auto)
    }
}

fn int_value(attr: &Attribute, location: &str, diags: &mut Diagnostics) -> Option<i64> {
    let Some(raw) = attr.value() else {
        diags.warn(location, Some(&attr.name), "missing value; using the default");
        return None;
    };
    match raw.trim().parse::<i32>() {
        Ok(v) => Some(i64::from(v)),
        Err(_) => {
            diags.warn(
                location,
                Some(&attr.name),
                format!("'{}' is not an integer; using the default", raw),
            );
            None
        }
    }
}

/// `forever` is the largest duration; `never` and anything unparseable
/// are a zero wait.
fn max_wait_value(attr: &Attribute, location: &str, diags: &mut Diagnostics) -> TimeValue {
    match attr.value().map(|v| v.parse::<TimeValue>()) {
        Some(Ok(TimeValue::NEVER)) => TimeValue::ZERO,
        Some(Ok(t)) if t.as_nanos() >= 0 => t,
        Some(Ok(t)) => {
            diags.warn(location, Some("maxwait"), format!("negative wait '{}'; using 0", t));
            TimeValue::ZERO
        }
        Some(Err(e)) => {
            diags.warn(location, Some("maxwait"), format!("{}; using 0", e));
            TimeValue::ZERO
        }
        None => {
            diags.warn(location, Some("maxwait"), "missing value; using 0");
            TimeValue::ZERO
        }
    }
}

fn clock_sync_params(attr: &Attribute, location: &str, diags: &mut Diagnostics) -> ClockSyncParams {
    let name = Some("clock_sync");
    let bool_param = |key: &str, diags: &mut Diagnostics| match attr.param(key).map(str::trim) {
        Some("true") => true,
        Some("false") | None => false,
        Some(other) => {
            diags.warn(location, name, format!("'{}' must be a boolean, got '{}'", key, other));
            false
        }
    };
    let disabled = bool_param("disabled", diags);
    let grandmaster = bool_param("grandmaster", diags);

    let period = attr.param("period").and_then(|v| match v.trim().parse::<i64>() {
        Ok(ns) if ns > 0 => Some(TimeValue::nanos(ns)),
        _ => {
            diags.warn(location, name, format!("period '{}' must be a positive nanosecond count", v));
            None
        }
    });
    let max_adj = attr.param("max_adj").and_then(|v| match v.trim().parse::<i32>() {
        Ok(n) => Some(i64::from(n)),
        Err(_) => {
            diags.warn(location, name, format!("max_adj '{}' is not an integer", v));
            None
        }
    });
    let mut float_param = |key: &str| {
        attr.param(key).and_then(|v| match v.trim().parse::<f64>() {
            Ok(f) => Some(f),
            Err(_) => {
                diags.warn(location, name, format!("{} '{}' is not a number", key, v));
                None
            }
        })
    };
    let kp = float_param("kp");
    let ki = float_param("ki");

    ClockSyncParams { disabled, grandmaster, period, max_adj, kp, ki }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::Severity;
    use crate::environment::{EnvironmentBuilder, NewReaction};

    fn env_with(attr_on: impl FnOnce(&mut EnvironmentBuilder, ReactorId, ConnectionId, TriggerId)) -> Environment {
        let mut b = EnvironmentBuilder::new("main");
        let a = b.add_reactor(b.main(), "a");
        let c = b.add_reactor(b.main(), "c");
        let out = b.add_output(a, "out");
        let inp = b.add_input(c, "in");
        let act = b.add_logical_action(a, "act", TimeValue::ZERO);
        b.add_reaction(a, NewReaction::new().on(act).writes(out));
        b.add_reaction(c, NewReaction::new().on_port(inp));
        let conn = b.connect(out, inp);
        attr_on(&mut b, a, conn, act);
        b.build().unwrap()
    }

    #[test]
    fn registry_is_populated() {
        assert!(spec_for("buffer").is_some());
        assert!(spec_for("clock_sync").is_some());
        assert!(spec_for("nope").is_none());
    }

    #[test]
    fn target_capability_is_checked() {
        let spec = spec_for("buffer").unwrap();
        assert!(spec.check_target("buffer", EntityKind::Connection).is_ok());
        assert!(matches!(
            spec.check_target("buffer", EntityKind::Reactor),
            Err(CoreError::UnsupportedTarget { kind: EntityKind::Reactor, .. })
        ));
    }

    #[test]
    fn defaults_without_attributes() {
        let env = env_with(|_, _, _, _| {});
        let mut diags = Diagnostics::new();
        let overlay = ConfigOverlay::extract(&env, &mut diags);
        assert_eq!(overlay.buffer_size(ConnectionId(0)), -1);
        assert_eq!(overlay.max_pending_events(TriggerId(0)), -1);
        assert!(!overlay.is_enclave(ReactorId(1)));
        assert_eq!(overlay.max_wait(ReactorId(1)), TimeValue::ZERO);
        assert!(diags.is_empty());
    }

    #[test]
    fn buffer_and_pending_events_are_read() {
        let env = env_with(|b, _, conn, act| {
            b.attribute(EntityRef::Connection(conn), Attribute::with_value("buffer", "4"));
            b.attribute(EntityRef::Trigger(act), Attribute::with_value("max_pending_events", "8"));
        });
        let mut diags = Diagnostics::new();
        validate(&env, &mut diags);
        let overlay = ConfigOverlay::extract(&env, &mut diags);
        assert!(diags.is_empty());
        assert_eq!(overlay.buffer_size(ConnectionId(0)), 4);
        assert_eq!(overlay.max_pending_events(TriggerId(0)), 8);
    }

    #[test]
    fn malformed_value_falls_back_to_default() {
        let env = env_with(|b, _, conn, _| {
            b.attribute(EntityRef::Connection(conn), Attribute::with_value("buffer", "four"));
        });
        let mut diags = Diagnostics::new();
        let overlay = ConfigOverlay::extract(&env, &mut diags);
        assert_eq!(overlay.buffer_size(ConnectionId(0)), -1);
        assert!(!diags.has_errors());
        let d = diags.iter().next().unwrap();
        assert_eq!(d.severity, Severity::Warning);
        assert_eq!(d.attribute.as_deref(), Some("buffer"));
        assert_eq!(d.location, "main.a.out -> main.c.in");
    }

    #[test]
    fn maxwait_literals() {
        let env = env_with(|b, a, _, _| {
            b.attribute(EntityRef::Reactor(a), Attribute::with_value("maxwait", "never"));
        });
        let overlay = ConfigOverlay::extract(&env, &mut Diagnostics::new());
        assert_eq!(overlay.max_wait(ReactorId(1)), TimeValue::ZERO);

        let env = env_with(|b, a, _, _| {
            b.attribute(EntityRef::Reactor(a), Attribute::with_value("maxwait", "forever"));
        });
        let overlay = ConfigOverlay::extract(&env, &mut Diagnostics::new());
        assert!(overlay.max_wait(ReactorId(1)).is_forever());

        let env = env_with(|b, a, _, _| {
            b.attribute(EntityRef::Reactor(a), Attribute::with_value("maxwait", "5 ms"));
        });
        let overlay = ConfigOverlay::extract(&env, &mut Diagnostics::new());
        assert_eq!(overlay.max_wait(ReactorId(1)), TimeValue::millis(5));
    }

    #[test]
    fn clock_sync_parameters() {
        let env = env_with(|b, a, _, _| {
            b.attribute(
                EntityRef::Reactor(a),
                Attribute::with_params(
                    "clock_sync",
                    &[("grandmaster", "true"), ("period", "5000000"), ("max_adj", "512"), ("kp", "0.7")],
                ),
            );
        });
        let mut diags = Diagnostics::new();
        validate(&env, &mut diags);
        let overlay = ConfigOverlay::extract(&env, &mut diags);
        let cs = overlay.clock_sync(ReactorId(1)).unwrap();
        assert!(cs.grandmaster);
        assert!(!cs.disabled);
        assert_eq!(cs.period, Some(TimeValue::millis(5)));
        assert_eq!(cs.max_adj, Some(512));
        assert_eq!(cs.kp, Some(0.7));
        assert_eq!(cs.ki, None);
        assert!(diags.is_empty());
    }

    #[test]
    fn validation_reports_unknown_names_with_hint() {
        let env = env_with(|b, _, conn, _| {
            b.attribute(EntityRef::Connection(conn), Attribute::with_value("bufer", "4"));
        });
        let mut diags = Diagnostics::new();
        validate(&env, &mut diags);
        let d = diags.iter().next().unwrap();
        assert_eq!(d.suggestion.as_deref(), Some("buffer"));
    }

    #[test]
    fn validation_reports_wrong_target_and_types() {
        let env = env_with(|b, a, conn, _| {
            b.attribute(EntityRef::Reactor(a), Attribute::with_value("buffer", "4"));
            b.attribute(
                EntityRef::Connection(conn),
                Attribute::with_params("link", &[("server_port", "http"), ("colour", "red")]),
            );
        });
        let mut diags = Diagnostics::new();
        validate(&env, &mut diags);
        let messages: Vec<String> = diags.iter().map(|d| d.message.clone()).collect();
        assert_eq!(messages.len(), 3);
        assert!(messages[0].contains("cannot be attached to a Reactor"));
        assert!(messages.iter().any(|m| m.contains("should have type Int")));
        assert!(messages.iter().any(|m| m.contains("unknown attribute parameter")));

        // a mistyped value falls back at extraction; structural mistakes stay fatal
        let severity_of = |needle: &str| diags.iter().find(|d| d.message.contains(needle)).map(|d| d.severity);
        assert_eq!(severity_of("should have type Int"), Some(Severity::Warning));
        assert_eq!(severity_of("cannot be attached"), Some(Severity::Error));
        assert_eq!(severity_of("unknown attribute parameter"), Some(Severity::Error));
    }

    #[test]
    fn malformed_values_do_not_block_compilation() {
        let env = env_with(|b, a, conn, act| {
            b.attribute(EntityRef::Connection(conn), Attribute::with_value("buffer", "four"));
            b.attribute(EntityRef::Trigger(act), Attribute::with_value("max_pending_events", "lots"));
            b.attribute(EntityRef::Reactor(a), Attribute::with_value("maxwait", "soon"));
        });
        let mut diags = Diagnostics::new();
        validate(&env, &mut diags);
        let overlay = ConfigOverlay::extract(&env, &mut diags);
        assert!(!diags.is_empty());
        assert!(!diags.has_errors(), "{:?}", diags.errors().collect::<Vec<_>>());
        assert_eq!(overlay.buffer_size(ConnectionId(0)), -1);
        assert_eq!(overlay.max_pending_events(TriggerId(0)), -1);
        assert_eq!(overlay.max_wait(ReactorId(1)), TimeValue::ZERO);
    }

    #[test]
    fn missing_required_parameter() {
        let env = env_with(|b, a, _, _| {
            b.attribute(EntityRef::Reactor(a), Attribute::with_params("layout", &[("option", "port.side")]));
        });
        let mut diags = Diagnostics::new();
        validate(&env, &mut diags);
        assert_eq!(diags.len(), 1);
        assert!(diags.iter().next().unwrap().message.contains("'value'"));
    }

    #[test]
    fn federate_platform() {
        let env = env_with(|b, a, _, _| {
            b.attribute(EntityRef::Reactor(a), Attribute::flag("platform_zephyr"));
        });
        let overlay = ConfigOverlay::extract(&env, &mut Diagnostics::new());
        assert_eq!(overlay.platform(ReactorId(1)), PlatformType::Zephyr);
        assert_eq!(overlay.platform(ReactorId(2)), PlatformType::Auto);
    }
}
