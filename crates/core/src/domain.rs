//! Scheduling domains: the main program, top-level federates and enclaves.
//!
//! Each domain gets its own schedule and logical clock. Domains exchange
//! data only through connections, which the scheduler treats as
//! event-driven on the receiving side.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::attributes::ConfigOverlay;
use crate::entity::{ConnectionId, ReactionId, ReactorId};
use crate::environment::Environment;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DomainKind {
    Main,
    Federate,
    Enclave,
}

impl fmt::Display for DomainKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DomainKind::Main => write!(f, "main"),
            DomainKind::Federate => write!(f, "federate"),
            DomainKind::Enclave => write!(f, "enclave"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Domain {
    pub name: String,
    pub kind: DomainKind,
    pub root: ReactorId,
    /// Member reactors in declaration order.
    pub reactors: Vec<ReactorId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainMap {
    pub domains: Vec<Domain>,
    /// Domain index per reactor id.
    owner: Vec<usize>,
}

impl DomainMap {
    /// Partition the reactor tree. Domain 0 is always the main domain.
    pub fn partition(env: &Environment, overlay: &ConfigOverlay) -> Self {
        let main = env.main();
        let mut domains = vec![Domain {
            name: main.full_name.clone(),
            kind: DomainKind::Main,
            root: main.id,
            reactors: Vec::new(),
        }];
        let mut owner = vec![0usize; env.reactors.len()];

        for id in env.subtree(main.id) {
            let reactor = env.reactor(id);
            let domain = match reactor.parent {
                None => 0,
                Some(parent) => {
                    let kind = if overlay.is_enclave(id) {
                        Some(DomainKind::Enclave)
                    } else if parent == main.id && main.federated {
                        Some(DomainKind::Federate)
                    } else {
                        None
                    };
                    match kind {
                        Some(kind) => {
                            domains.push(Domain {
                                name: reactor.full_name.clone(),
                                kind,
                                root: id,
                                reactors: Vec::new(),
                            });
                            domains.len() - 1
                        }
                        None => owner[parent.index()],
                    }
                }
            };
            owner[id.index()] = domain;
            domains[domain].reactors.push(id);
        }

        tracing::debug!(domains = domains.len(), "Partitioned scheduling domains");
        Self { domains, owner }
    }

    pub fn domain_of(&self, reactor: ReactorId) -> usize {
        self.owner[reactor.index()]
    }

    pub fn reaction_domain(&self, env: &Environment, reaction: ReactionId) -> usize {
        self.domain_of(env.reaction(reaction).reactor)
    }

    /// Whether a connection joins two different domains.
    pub fn crosses(&self, env: &Environment, conn: ConnectionId) -> bool {
        let c = env.connection(conn);
        self.domain_of(env.port(c.source).reactor) != self.domain_of(env.port(c.destination).reactor)
    }

    /// Reactions owned by reactors of domain `index`, in id order.
    pub fn reactions_in(&self, env: &Environment, index: usize) -> Vec<ReactionId> {
        env.reactions
            .iter()
            .filter(|r| self.domain_of(r.reactor) == index)
            .map(|r| r.id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.domains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::Attribute;
    use crate::diagnostics::Diagnostics;
    use crate::entity::EntityRef;
    use crate::environment::{EnvironmentBuilder, NewReaction};
    use crate::time::TimeValue;

    #[test]
    fn plain_program_is_one_domain() {
        let mut b = EnvironmentBuilder::new("main");
        b.add_reactor(b.main(), "a");
        let env = b.build().unwrap();
        let map = DomainMap::partition(&env, &ConfigOverlay::default());
        assert_eq!(map.len(), 1);
        assert_eq!(map.domains[0].reactors.len(), 2);
    }

    #[test]
    fn federates_and_nested_enclaves() {
        let mut b = EnvironmentBuilder::new("main");
        b.set_federated(true);
        let f1 = b.add_reactor(b.main(), "f1");
        let f2 = b.add_reactor(b.main(), "f2");
        let inner = b.add_reactor(f1, "inner");
        let enc = b.add_reactor(f2, "enc");
        let out = b.add_output(f1, "out");
        let inp = b.add_input(f2, "in");
        let t = b.add_timer(f1, "t", TimeValue::ZERO, TimeValue::millis(1));
        b.add_reaction(f1, NewReaction::new().on(t).writes(out));
        b.add_reaction(f2, NewReaction::new().on_port(inp));
        let conn = b.connect_delayed(out, inp, TimeValue::millis(1));
        b.attribute(EntityRef::Reactor(enc), Attribute::flag("enclave"));
        let env = b.build().unwrap();
        let overlay = ConfigOverlay::extract(&env, &mut Diagnostics::new());
        let map = DomainMap::partition(&env, &overlay);

        let kinds: Vec<DomainKind> = map.domains.iter().map(|d| d.kind).collect();
        assert_eq!(
            kinds,
            vec![DomainKind::Main, DomainKind::Federate, DomainKind::Federate, DomainKind::Enclave]
        );
        assert_eq!(map.domain_of(inner), map.domain_of(f1));
        assert_ne!(map.domain_of(enc), map.domain_of(f2));
        assert!(map.crosses(&env, conn));
        assert_eq!(map.domains[3].name, "main.f2.enc");
    }
}
