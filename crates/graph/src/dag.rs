//! Reaction dependency graph.
//!
//! One node per reaction of a scheduling domain, plus one transfer node per
//! injected connection whose readers live in that domain. Edges carry their
//! timing; only instantaneous edges take part in levelization.

use std::fmt;

use indexmap::{IndexMap, IndexSet};
use pretvm_core::{
    ConfigOverlay, ConnectionId, DomainMap, Environment, PortId, ReactionId, TimeValue, TriggerRef,
};
use serde::{Deserialize, Serialize};

// ── Connections ───────────────────────────────────────────────

/// How data crosses a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionClass {
    /// Zero-delay, unbuffered: the ports alias the same value.
    Direct,
    /// Zero-delay through a bounded buffer.
    Buffered,
    /// Logical delay (`after`).
    Delayed,
    Physical,
    /// Crosses a federate or enclave boundary, or carries a network link.
    Networked,
}

impl ConnectionClass {
    /// Whether prepare/cleanup code is injected around the readers.
    pub fn is_injected(self) -> bool {
        self != ConnectionClass::Direct
    }

    /// Whether readers see the data at the writer's tag.
    pub fn is_instantaneous(self) -> bool {
        matches!(self, ConnectionClass::Direct | ConnectionClass::Buffered)
    }
}

impl fmt::Display for ConnectionClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionClass::Direct => write!(f, "direct"),
            ConnectionClass::Buffered => write!(f, "buffered"),
            ConnectionClass::Delayed => write!(f, "delayed"),
            ConnectionClass::Physical => write!(f, "physical"),
            ConnectionClass::Networked => write!(f, "networked"),
        }
    }
}

/// Classify every connection, indexed by connection id.
pub fn classify_connections(env: &Environment, overlay: &ConfigOverlay, domains: &DomainMap) -> Vec<ConnectionClass> {
    env.connections
        .iter()
        .map(|c| {
            if domains.crosses(env, c.id) || overlay.link(c.id).is_some() {
                ConnectionClass::Networked
            } else if c.physical {
                ConnectionClass::Physical
            } else if c.delay.is_some_and(|d| !d.is_zero()) {
                ConnectionClass::Delayed
            } else if overlay.is_buffered(c.id) {
                ConnectionClass::Buffered
            } else {
                ConnectionClass::Direct
            }
        })
        .collect()
}

/// Ports sharing `port`'s value through direct connections, `port` first.
pub fn aliases(env: &Environment, classes: &[ConnectionClass], port: PortId) -> Vec<PortId> {
    env.aliased_ports(port, |c| classes[c.id.index()] == ConnectionClass::Direct)
}

/// Reactions reading the destination of `conn`, following direct
/// connections downstream, in id order.
pub fn connection_readers(env: &Environment, classes: &[ConnectionClass], conn: ConnectionId) -> Vec<ReactionId> {
    let mut readers: IndexSet<ReactionId> = IndexSet::new();
    for port in aliases(env, classes, env.connection(conn).destination) {
        readers.extend(env.readers_of(port));
    }
    readers.sort();
    readers.into_iter().collect()
}

// ── Graph ─────────────────────────────────────────────────────

/// A graph node. Ordering is the deterministic tie-break key: reactions by
/// id, then transfers by connection id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum NodeKey {
    Reaction(ReactionId),
    Transfer(ConnectionId),
}

impl NodeKey {
    pub fn reaction(self) -> Option<ReactionId> {
        match self {
            NodeKey::Reaction(r) => Some(r),
            NodeKey::Transfer(_) => None,
        }
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKey::Reaction(r) => write!(f, "{}", r),
            NodeKey::Transfer(c) => write!(f, "transfer({})", c),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdgeKind {
    /// Writer to reader through a (possibly aliased) port.
    Port(PortId),
    /// Declared priority between consecutive reactions of a reactor.
    Priority,
    /// Writer into an injected connection.
    Transfer(ConnectionId),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub from: NodeKey,
    pub to: NodeKey,
    pub kind: EdgeKind,
    /// Logical delay; zero for same-tag dependencies.
    pub delay: TimeValue,
    /// False for delayed, physical and networked edges.
    pub instantaneous: bool,
}

#[derive(Debug, Serialize)]
pub struct GraphStats {
    pub node_count: usize,
    pub reaction_count: usize,
    pub transfer_count: usize,
    pub edge_count: usize,
    pub instantaneous_edge_count: usize,
}

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    pub nodes: IndexSet<NodeKey>,
    pub edges: Vec<Edge>,
    outgoing: IndexMap<NodeKey, Vec<usize>>,
    incoming: IndexMap<NodeKey, Vec<usize>>,
    edge_dedup: IndexSet<(NodeKey, NodeKey, bool)>,
    /// Per reaction, the reactions whose output can trigger it at the same tag.
    trigger_writers: IndexMap<ReactionId, Vec<ReactionId>>,
    /// Reactions with a port trigger fed by a non-instantaneous connection.
    event_driven: IndexSet<ReactionId>,
    /// Nodes that feed themselves at the same tag.
    self_loops: IndexSet<NodeKey>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: NodeKey) {
        if self.nodes.insert(node) {
            self.outgoing.insert(node, Vec::new());
            self.incoming.insert(node, Vec::new());
        }
    }

    /// Add an edge between existing nodes. Duplicate edges of the same
    /// timing are ignored. Returns whether the edge was added.
    ///
    /// An instantaneous self-edge is not stored; the node is recorded as a
    /// zero-delay cycle that levelization reports.
    pub fn add_edge(&mut self, from: NodeKey, to: NodeKey, kind: EdgeKind, delay: TimeValue, instantaneous: bool) -> bool {
        if from == to && instantaneous {
            if self.nodes.contains(&from) {
                self.self_loops.insert(from);
            }
            return false;
        }
        if !self.nodes.contains(&from) || !self.nodes.contains(&to) {
            return false;
        }
        if !self.edge_dedup.insert((from, to, instantaneous)) {
            return false;
        }
        let idx = self.edges.len();
        self.edges.push(Edge { from, to, kind, delay, instantaneous });
        self.outgoing.entry(from).or_default().push(idx);
        self.incoming.entry(to).or_default().push(idx);
        true
    }

    /// Instantaneous successors of `node`, in edge insertion order.
    pub fn successors(&self, node: NodeKey) -> impl Iterator<Item = NodeKey> + '_ {
        self.outgoing
            .get(&node)
            .into_iter()
            .flatten()
            .map(|&i| &self.edges[i])
            .filter(|e| e.instantaneous)
            .map(|e| e.to)
    }

    /// Instantaneous predecessors of `node`, in edge insertion order.
    pub fn predecessors(&self, node: NodeKey) -> impl Iterator<Item = NodeKey> + '_ {
        self.incoming
            .get(&node)
            .into_iter()
            .flatten()
            .map(|&i| &self.edges[i])
            .filter(|e| e.instantaneous)
            .map(|e| e.from)
    }

    /// Reactions `node` depends on at the same tag, looking through
    /// transfer nodes.
    pub fn reaction_predecessors(&self, node: NodeKey) -> Vec<ReactionId> {
        let mut out: IndexSet<ReactionId> = IndexSet::new();
        let mut seen: IndexSet<NodeKey> = IndexSet::new();
        let mut stack: Vec<NodeKey> = self.predecessors(node).collect();
        while let Some(p) = stack.pop() {
            if !seen.insert(p) {
                continue;
            }
            match p {
                NodeKey::Reaction(r) => {
                    out.insert(r);
                }
                NodeKey::Transfer(_) => stack.extend(self.predecessors(p)),
            }
        }
        out.sort();
        out.into_iter().collect()
    }

    pub fn instantaneous_edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter(|e| e.instantaneous)
    }

    pub fn trigger_writers(&self, reaction: ReactionId) -> &[ReactionId] {
        self.trigger_writers.get(&reaction).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_event_driven(&self, reaction: ReactionId) -> bool {
        self.event_driven.contains(&reaction)
    }

    /// Nodes with a zero-delay dependency on themselves.
    pub fn self_loops(&self) -> impl Iterator<Item = NodeKey> + '_ {
        self.self_loops.iter().copied()
    }

    pub fn reactions(&self) -> impl Iterator<Item = ReactionId> + '_ {
        self.nodes.iter().filter_map(|n| n.reaction())
    }

    pub fn transfers(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        self.nodes.iter().filter_map(|n| match n {
            NodeKey::Transfer(c) => Some(*c),
            NodeKey::Reaction(_) => None,
        })
    }

    /// Whether `to` is reachable from `from` over instantaneous edges,
    /// ignoring the edge at index `skip`.
    pub(crate) fn reachable_without(&self, from: NodeKey, to: NodeKey, skip: usize) -> bool {
        let mut seen: IndexSet<NodeKey> = IndexSet::new();
        let mut stack = vec![from];
        while let Some(n) = stack.pop() {
            if n == to {
                return true;
            }
            if !seen.insert(n) {
                continue;
            }
            for &i in self.outgoing.get(&n).into_iter().flatten() {
                let e = &self.edges[i];
                if i != skip && e.instantaneous {
                    stack.push(e.to);
                }
            }
        }
        false
    }

    /// Remove the edges at the given indices and rebuild adjacency.
    pub(crate) fn remove_edges(&mut self, drop: &IndexSet<usize>) {
        let edges = std::mem::take(&mut self.edges);
        for list in self.outgoing.values_mut().chain(self.incoming.values_mut()) {
            list.clear();
        }
        self.edge_dedup.clear();
        for (i, e) in edges.into_iter().enumerate() {
            if !drop.contains(&i) {
                self.add_edge(e.from, e.to, e.kind, e.delay, e.instantaneous);
            }
        }
    }

    pub fn stats(&self) -> GraphStats {
        let reaction_count = self.reactions().count();
        GraphStats {
            node_count: self.nodes.len(),
            reaction_count,
            transfer_count: self.nodes.len() - reaction_count,
            edge_count: self.edges.len(),
            instantaneous_edge_count: self.instantaneous_edges().count(),
        }
    }
}

// ── Construction ──────────────────────────────────────────────

impl DependencyGraph {
    /// Build the graph of one scheduling domain.
    pub fn build(env: &Environment, classes: &[ConnectionClass], domains: &DomainMap, domain: usize) -> Self {
        let mut graph = Self::new();
        let in_domain = |r: ReactionId| domains.reaction_domain(env, r) == domain;

        for reaction in domains.reactions_in(env, domain) {
            graph.add_node(NodeKey::Reaction(reaction));
        }
        for conn in &env.connections {
            if classes[conn.id.index()].is_injected()
                && connection_readers(env, classes, conn.id).into_iter().any(in_domain)
            {
                graph.add_node(NodeKey::Transfer(conn.id));
            }
        }

        // Transfer nodes feed their readers at the same tag.
        let transfers: Vec<ConnectionId> = graph.transfers().collect();
        for conn in transfers {
            for port in aliases(env, classes, env.connection(conn).destination) {
                for reader in env.readers_of(port) {
                    graph.add_edge(
                        NodeKey::Transfer(conn),
                        NodeKey::Reaction(reader),
                        EdgeKind::Port(port),
                        TimeValue::ZERO,
                        true,
                    );
                }
            }
        }

        // Writers to readers, directly or through transfers.
        for writer in graph.reactions().collect::<Vec<_>>() {
            for written in env.reaction(writer).writes().collect::<Vec<_>>() {
                for port in aliases(env, classes, written) {
                    for reader in env.readers_of(port) {
                        if graph.add_edge(
                            NodeKey::Reaction(writer),
                            NodeKey::Reaction(reader),
                            EdgeKind::Port(port),
                            TimeValue::ZERO,
                            true,
                        ) && triggers_on(env, reader, port)
                        {
                            graph.trigger_writers.entry(reader).or_default().push(writer);
                        }
                    }
                    for conn in env.connections_from(port) {
                        let class = classes[conn.id.index()];
                        if !class.is_injected() {
                            continue;
                        }
                        let transfer = NodeKey::Transfer(conn.id);
                        let delay = conn.delay.unwrap_or(TimeValue::ZERO);
                        graph.add_edge(
                            NodeKey::Reaction(writer),
                            transfer,
                            EdgeKind::Transfer(conn.id),
                            delay,
                            class.is_instantaneous(),
                        );
                        if class.is_instantaneous() {
                            for reader in connection_readers(env, classes, conn.id) {
                                if reads_through(env, classes, reader, conn.id, true) {
                                    let slot = graph.trigger_writers.entry(reader).or_default();
                                    if !slot.contains(&writer) {
                                        slot.push(writer);
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }

        // Readers of non-instantaneous connections wake up on events.
        for (i, class) in classes.iter().enumerate() {
            if class.is_instantaneous() {
                continue;
            }
            let conn = ConnectionId(i as u32);
            for reader in connection_readers(env, classes, conn) {
                if in_domain(reader) && reads_through(env, classes, reader, conn, true) {
                    graph.event_driven.insert(reader);
                }
            }
        }

        // Declared priority within each reactor.
        for reactor in &env.reactors {
            let members: Vec<ReactionId> = reactor.reactions.iter().copied().filter(|r| in_domain(*r)).collect();
            for pair in members.windows(2) {
                graph.add_edge(
                    NodeKey::Reaction(pair[0]),
                    NodeKey::Reaction(pair[1]),
                    EdgeKind::Priority,
                    TimeValue::ZERO,
                    true,
                );
            }
        }

        for list in graph.trigger_writers.values_mut() {
            list.sort();
        }

        tracing::debug!(
            domain,
            nodes = graph.nodes.len(),
            edges = graph.edges.len(),
            "Dependency graph built"
        );
        graph
    }
}

fn triggers_on(env: &Environment, reaction: ReactionId, port: PortId) -> bool {
    env.reaction(reaction).triggers.contains(&TriggerRef::Port(port))
}

/// Whether `reaction` reads (or, with `trigger_only`, is triggered by) a
/// port downstream of `conn`.
fn reads_through(env: &Environment, classes: &[ConnectionClass], reaction: ReactionId, conn: ConnectionId, trigger_only: bool) -> bool {
    aliases(env, classes, env.connection(conn).destination)
        .into_iter()
        .any(|p| if trigger_only { triggers_on(env, reaction, p) } else { env.reaction(reaction).reads_port(p) })
}

/// The port through which `reaction` reads `conn`'s data, if any.
pub fn reader_port(env: &Environment, classes: &[ConnectionClass], reaction: ReactionId, conn: ConnectionId) -> Option<PortId> {
    aliases(env, classes, env.connection(conn).destination)
        .into_iter()
        .find(|p| env.reaction(reaction).reads_port(*p))
}
