//! Job graph builder using petgraph.
//!
//! This module turns a flat list of jobs into a directed graph whose edges
//! point from a job to the jobs it has to run after. Every edge is tagged with
//! its [`DependencyKind`] and a rank that reproduces the order in which the
//! dependency was written, so traversals are deterministic.

use crate::{DependencyError, DependencyKind, JobNodeData, Result};
use indexmap::IndexMap;
use indexmap::map::Entry;
use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Dfs, EdgeFiltered, EdgeRef};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Build a map from job id to job, in job list order.
///
/// # Errors
///
/// Returns [`DependencyError::Duplicate`] on the first id collision, carrying
/// the job seen first and the later one with the same id. No partial map is
/// returned.
pub fn build_job_map<J: JobNodeData>(job_list: &[J]) -> Result<IndexMap<&str, &J>, J> {
    let mut job_map = IndexMap::with_capacity(job_list.len());
    for job in job_list {
        match job_map.entry(job.id()) {
            Entry::Occupied(entry) => {
                let original: &J = *entry.get();
                return Err(DependencyError::Duplicate {
                    job: original.clone(),
                    duplicate_job: job.clone(),
                });
            }
            Entry::Vacant(entry) => {
                entry.insert(job);
            }
        }
    }
    Ok(job_map)
}

/// Where a dependency edge was declared, used to order outgoing edges.
///
/// Edges are visited by group first (direct, resource, after, before) and by
/// declaration sequence second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Rank {
    group: u8,
    sequence: usize,
}

/// Weight of an edge in the job graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DependencyEdge {
    /// How the dependency was declared.
    pub kind: DependencyKind,
    rank: Rank,
}

/// Target of an outgoing dependency: a known job or an id that does not exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Target<'a> {
    Job(NodeIndex),
    Missing(&'a str),
}

/// One outgoing dependency of a job, in traversal order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Outgoing<'a> {
    pub kind: DependencyKind,
    pub target: Target<'a>,
    rank: Rank,
}

/// A reference to an id that is not in the job list.
#[derive(Debug, Clone, Copy)]
struct DanglingReference<'a> {
    kind: DependencyKind,
    id: &'a str,
    rank: Rank,
}

/// Dependency graph over a whole job universe.
///
/// Node indices follow the job list order. An edge `a -> b` means `a` has to
/// be ordered after `b`.
pub struct JobGraph<'a, J: JobNodeData> {
    /// The directed graph of jobs.
    graph: DiGraph<&'a J, DependencyEdge>,
    /// Map from job ids to node indices.
    id_to_node: HashMap<&'a str, NodeIndex>,
    /// References to ids that do not exist, per referencing job.
    dangling: HashMap<NodeIndex, Vec<DanglingReference<'a>>>,
}

impl<'a, J: JobNodeData> JobGraph<'a, J> {
    /// Build the graph for a list of jobs.
    ///
    /// `before` references are normalized into the equivalent `after` edge on
    /// the other job: `A before B` becomes the ordering edge `B -> A`.
    ///
    /// # Errors
    ///
    /// Returns [`DependencyError::Duplicate`] if two jobs share an id.
    pub fn build(job_list: &'a [J]) -> Result<Self, J> {
        let job_map = build_job_map(job_list)?;

        let mut graph = DiGraph::with_capacity(job_map.len(), job_map.len());
        let mut id_to_node = HashMap::with_capacity(job_map.len());
        for (&id, &job) in &job_map {
            let node = graph.add_node(job);
            id_to_node.insert(id, node);
        }

        let mut this = Self {
            graph,
            id_to_node,
            dangling: HashMap::new(),
        };
        let mut sequence = 0_usize;
        let mut next_rank = |group: u8| {
            sequence += 1;
            Rank { group, sequence }
        };

        for (index, &job) in job_map.values().enumerate() {
            let node = NodeIndex::new(index);
            for dep in job.direct_dependencies() {
                this.link(node, dep, DependencyKind::Direct, next_rank(0));
            }
            for dep in job.resource_dependencies() {
                this.link(node, dep, DependencyKind::Resource, next_rank(1));
            }
            for dep in job.after_dependencies() {
                this.link(node, dep, DependencyKind::Ordering, next_rank(2));
            }
            for later in job.before_dependencies() {
                let rank = next_rank(3);
                match this.id_to_node.get(later) {
                    Some(&later_node) => {
                        this.add_edge(later_node, node, DependencyKind::Ordering, rank);
                    }
                    None => this.add_dangling(node, later, DependencyKind::Ordering, rank),
                }
            }
        }

        debug!(
            jobs = this.graph.node_count(),
            edges = this.graph.edge_count(),
            "Built job graph"
        );
        Ok(this)
    }

    fn link(&mut self, node: NodeIndex, dep: &'a str, kind: DependencyKind, rank: Rank) {
        match self.id_to_node.get(dep) {
            Some(&dep_node) => self.add_edge(node, dep_node, kind, rank),
            None => self.add_dangling(node, dep, kind, rank),
        }
    }

    fn add_edge(&mut self, from: NodeIndex, to: NodeIndex, kind: DependencyKind, rank: Rank) {
        self.graph.add_edge(from, to, DependencyEdge { kind, rank });
    }

    fn add_dangling(&mut self, node: NodeIndex, id: &'a str, kind: DependencyKind, rank: Rank) {
        debug!(job = self.graph[node].id(), missing = id, %kind, "Dangling reference");
        self.dangling
            .entry(node)
            .or_default()
            .push(DanglingReference { kind, id, rank });
    }

    /// Get the number of jobs in the graph.
    #[must_use]
    pub fn job_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Check if a job exists in the graph.
    #[must_use]
    pub fn contains_job(&self, id: &str) -> bool {
        self.id_to_node.contains_key(id)
    }

    /// Get the node index for a job by id.
    #[must_use]
    pub fn node_index(&self, id: &str) -> Option<NodeIndex> {
        self.id_to_node.get(id).copied()
    }

    /// Get the job stored at a node.
    ///
    /// # Panics
    ///
    /// Panics if the index does not belong to this graph.
    #[must_use]
    pub fn job(&self, node: NodeIndex) -> &'a J {
        self.graph[node]
    }

    /// Iterate over all jobs in job list order.
    pub fn jobs(&self) -> impl Iterator<Item = &'a J> + '_ {
        self.graph.node_indices().map(|node| self.graph[node])
    }

    /// Check if the graph has cycles, counting every edge kind.
    #[must_use]
    pub fn has_cycles(&self) -> bool {
        petgraph::algo::is_cyclic_directed(&self.graph)
    }

    /// Ids referenced by `id` that do not exist, with how they were referenced.
    #[must_use]
    pub fn missing_references(&self, id: &str) -> Vec<(DependencyKind, &'a str)> {
        self.node_index(id)
            .and_then(|node| self.dangling.get(&node))
            .map(|refs| refs.iter().map(|r| (r.kind, r.id)).collect())
            .unwrap_or_default()
    }

    /// Outgoing dependencies of a job in traversal order.
    ///
    /// Existing jobs and dangling ids are merged so that the first dependency
    /// written is the first one visited, whichever it is.
    pub(crate) fn outgoing(&self, node: NodeIndex) -> Vec<Outgoing<'a>> {
        let mut outgoing: Vec<Outgoing<'a>> = self
            .graph
            .edges_directed(node, Direction::Outgoing)
            .map(|edge| Outgoing {
                kind: edge.weight().kind,
                target: Target::Job(edge.target()),
                rank: edge.weight().rank,
            })
            .collect();
        if let Some(refs) = self.dangling.get(&node) {
            outgoing.extend(refs.iter().map(|r| Outgoing {
                kind: r.kind,
                target: Target::Missing(r.id),
                rank: r.rank,
            }));
        }
        outgoing.sort_by_key(|edge| edge.rank);
        outgoing
    }

    /// Compute the set of jobs that must run for the given roots.
    ///
    /// Only direct and resource edges are followed; ordering edges never pull
    /// a job into the run.
    #[must_use]
    pub fn hard_closure(&self, roots: impl IntoIterator<Item = NodeIndex>) -> HashSet<NodeIndex> {
        let hard = EdgeFiltered::from_fn(&self.graph, |edge| edge.weight().kind.is_hard());
        let mut closure = HashSet::new();
        let mut dfs = Dfs::empty(&hard);

        for root in roots {
            dfs.move_to(root);
            while let Some(node) = dfs.next(&hard) {
                closure.insert(node);
            }
        }

        closure
    }

    /// Compute the ids of jobs needed to run the given ids, in job list order.
    ///
    /// Unknown ids are ignored.
    #[must_use]
    pub fn required_ids<'s>(&self, ids: impl IntoIterator<Item = &'s str>) -> Vec<&'a str> {
        let roots: Vec<NodeIndex> = ids
            .into_iter()
            .filter_map(|id| self.node_index(id))
            .collect();
        let closure = self.hard_closure(roots);
        self.graph
            .node_indices()
            .filter(|node| closure.contains(node))
            .map(|node| self.graph[node].id())
            .collect()
    }
}
