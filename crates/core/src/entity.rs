use serde::{Deserialize, Serialize};

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u32);

        impl $name {
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

entity_id!(
    /// Index of a reactor instance, assigned in declaration (depth-first) order.
    ReactorId,
    "reactor#"
);
entity_id!(
    /// Index of a reaction instance, assigned in declaration order.
    ReactionId,
    "reaction#"
);
entity_id!(PortId, "port#");
entity_id!(TriggerId, "trigger#");
entity_id!(ConnectionId, "connection#");

/// The closed set of entity kinds the scheduler reasons about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Reactor,
    Reaction,
    Port,
    Trigger,
    Connection,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKind::Reactor => write!(f, "Reactor"),
            EntityKind::Reaction => write!(f, "Reaction"),
            EntityKind::Port => write!(f, "Port"),
            EntityKind::Trigger => write!(f, "Trigger"),
            EntityKind::Connection => write!(f, "Connection"),
        }
    }
}

/// A reference to any entity of the instantiated program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntityRef {
    Reactor(ReactorId),
    Reaction(ReactionId),
    Port(PortId),
    Trigger(TriggerId),
    Connection(ConnectionId),
}

impl EntityRef {
    pub fn kind(&self) -> EntityKind {
        match self {
            EntityRef::Reactor(_) => EntityKind::Reactor,
            EntityRef::Reaction(_) => EntityKind::Reaction,
            EntityRef::Port(_) => EntityKind::Port,
            EntityRef::Trigger(_) => EntityKind::Trigger,
            EntityRef::Connection(_) => EntityKind::Connection,
        }
    }
}

impl std::fmt::Display for EntityRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityRef::Reactor(id) => write!(f, "{}", id),
            EntityRef::Reaction(id) => write!(f, "{}", id),
            EntityRef::Port(id) => write!(f, "{}", id),
            EntityRef::Trigger(id) => write!(f, "{}", id),
            EntityRef::Connection(id) => write!(f, "{}", id),
        }
    }
}
