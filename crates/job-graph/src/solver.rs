//! Depth-first dependency solver.
//!
//! The solver walks the [`JobGraph`] with the classic white/gray/black
//! coloring. A job is appended to the solution once all of its dependencies
//! are, which yields a topological order where ties are broken by the order
//! jobs and their dependencies were written.

use crate::graph::{Outgoing, Target};
use crate::validation::ValidationResult;
use crate::{DependencyError, DependencyKind, JobGraph, JobNodeData, Result};
use petgraph::graph::NodeIndex;
use std::collections::HashSet;
use tracing::debug;

/// Visit state of a job during traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    /// Not visited yet.
    White,
    /// On the traversal stack.
    Gray,
    /// Appended to the solution.
    Black,
}

/// A job on the traversal stack with the dependencies still to visit.
struct Frame<'a> {
    node: NodeIndex,
    edges: Vec<Outgoing<'a>>,
    cursor: usize,
}

/// Transient visit state for a single solve.
struct Traversal<'g, 'a, J: JobNodeData> {
    graph: &'g JobGraph<'a, J>,
    /// Jobs that are going to run; ordering edges leaving this set are ignored.
    /// `None` keeps every ordering edge.
    run_set: Option<&'g HashSet<NodeIndex>>,
    /// Whether a dangling reference aborts the traversal.
    strict: bool,
    colors: Vec<Color>,
    solution: Vec<NodeIndex>,
}

impl<'g, 'a, J: JobNodeData> Traversal<'g, 'a, J> {
    fn new(
        graph: &'g JobGraph<'a, J>,
        run_set: Option<&'g HashSet<NodeIndex>>,
        strict: bool,
    ) -> Self {
        Self {
            graph,
            run_set,
            strict,
            colors: vec![Color::White; graph.job_count()],
            solution: Vec::new(),
        }
    }

    fn enter(&mut self, node: NodeIndex) -> Frame<'a> {
        debug!(job = self.graph.job(node).id(), "Visiting job");
        self.colors[node.index()] = Color::Gray;
        Frame {
            node,
            edges: self.graph.outgoing(node),
            cursor: 0,
        }
    }

    fn is_active(&self, edge: &Outgoing<'a>, target: NodeIndex) -> bool {
        edge.kind != DependencyKind::Ordering
            || self.run_set.is_none_or(|run_set| run_set.contains(&target))
    }

    /// Visit a job and everything it depends on.
    fn visit(&mut self, root: NodeIndex) -> Result<(), J> {
        if self.colors[root.index()] != Color::White {
            return Ok(());
        }

        let mut stack = vec![self.enter(root)];
        while let Some(frame) = stack.last_mut() {
            let Some(edge) = frame.edges.get(frame.cursor).copied() else {
                let node = frame.node;
                stack.pop();
                self.colors[node.index()] = Color::Black;
                self.solution.push(node);
                debug!(job = self.graph.job(node).id(), "Appending job to solution");
                continue;
            };
            frame.cursor += 1;
            let node = frame.node;

            let next = match edge.target {
                Target::Job(next) => next,
                Target::Missing(id) if self.strict => {
                    debug!(
                        job = self.graph.job(node).id(),
                        missing = id,
                        kind = %edge.kind,
                        "Found missing dependency"
                    );
                    return Err(DependencyError::Missing {
                        job: self.graph.job(node).clone(),
                        missing_job_id: id.to_string(),
                        kind: edge.kind,
                    });
                }
                Target::Missing(_) => continue,
            };
            if !self.is_active(&edge, next) {
                continue;
            }

            match self.colors[next.index()] {
                Color::White => {
                    let frame = self.enter(next);
                    stack.push(frame);
                }
                Color::Gray => return Err(self.cycle(&stack, next)),
                Color::Black => {}
            }
        }

        Ok(())
    }

    /// Build the cycle error for an edge that returns to `target`.
    fn cycle(&self, stack: &[Frame<'a>], target: NodeIndex) -> DependencyError<J> {
        let start = stack
            .iter()
            .position(|frame| frame.node == target)
            .unwrap_or_default();
        let job_list: Vec<J> = stack[start..]
            .iter()
            .map(|frame| frame.node)
            .chain(std::iter::once(target))
            .map(|node| self.graph.job(node).clone())
            .collect();
        debug!(
            cycle = %job_list.iter().map(JobNodeData::id).collect::<Vec<_>>().join(" -> "),
            "Found dependency cycle"
        );
        DependencyError::Cycle { job_list }
    }

    fn into_solution(self) -> Vec<J> {
        self.solution
            .into_iter()
            .map(|node| self.graph.job(node).clone())
            .collect()
    }
}

/// Dependency solver for jobs.
///
/// Use [`DependencySolver::resolve_dependencies`] to get an execution order.
#[derive(Debug, Clone, Copy, Default)]
pub struct DependencySolver;

impl DependencySolver {
    /// Solve the dependency graph expressed as a list of job definitions.
    ///
    /// `visit_list` restricts the solution to those jobs and everything they
    /// transitively depend on or require, while the whole `job_list` stays
    /// available for lookups. Without it every job is visited.
    ///
    /// The returned order places every job after its direct and resource
    /// dependencies, and respects `before`/`after` between jobs that both
    /// end up in the solution. Jobs with no constraint between them keep the
    /// order in which the traversal discovered them.
    ///
    /// # Errors
    ///
    /// Fails on the first problem met, in traversal order:
    ///
    /// - [`DependencyError::Duplicate`] if two jobs share an id
    /// - [`DependencyError::Missing`] if a referenced id does not exist
    /// - [`DependencyError::Cycle`] if a dependency chain loops
    /// - [`DependencyError::Unknown`] if a visited job is not in `job_list`
    pub fn resolve_dependencies<J: JobNodeData>(
        job_list: &[J],
        visit_list: Option<&[J]>,
    ) -> Result<Vec<J>, J> {
        let graph = JobGraph::build(job_list)?;
        let visit_list = visit_list.unwrap_or(job_list);
        debug!(
            jobs = job_list.len(),
            visit = visit_list.len(),
            "Starting solve"
        );

        let run_set = graph.hard_closure(
            visit_list
                .iter()
                .filter_map(|job| graph.node_index(job.id())),
        );

        let mut traversal = Traversal::new(&graph, Some(&run_set), true);
        for job in visit_list {
            let Some(node) = graph.node_index(job.id()) else {
                debug!(job = job.id(), "Visiting job that is not on the job list");
                return Err(DependencyError::Unknown { job: job.clone() });
            };
            traversal.visit(node)?;
        }

        let solution = traversal.into_solution();
        debug!(solved = solution.len(), "Done solving");
        Ok(solution)
    }

    /// Check a whole job list for structural problems without stopping at
    /// the first one.
    ///
    /// Duplicates prevent building the graph and are reported alone.
    /// Otherwise every dangling reference is reported, followed by the first
    /// cycle found when all ordering constraints are considered.
    #[must_use]
    pub fn validate<J: JobNodeData>(job_list: &[J]) -> ValidationResult<J> {
        match JobGraph::build(job_list) {
            Ok(graph) => graph.validate(),
            Err(err) => ValidationResult::invalid(vec![err]),
        }
    }
}

/// Find one dependency cycle in the graph, counting every edge kind.
///
/// Dangling references are skipped.
pub(crate) fn find_cycle<J: JobNodeData>(graph: &JobGraph<'_, J>) -> Option<DependencyError<J>> {
    let mut traversal = Traversal::new(graph, None, false);
    (0..graph.job_count())
        .map(NodeIndex::new)
        .find_map(|node| traversal.visit(node).err())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Clone, Debug, Default, PartialEq)]
    struct TestJob {
        id: String,
        depends: Vec<String>,
        requires: Vec<String>,
        after: Vec<String>,
        before: Vec<String>,
    }

    fn ids(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    impl TestJob {
        fn new(id: &str) -> Self {
            Self {
                id: id.to_string(),
                ..Self::default()
            }
        }

        fn depends(mut self, deps: &[&str]) -> Self {
            self.depends = ids(deps);
            self
        }

        fn requires(mut self, deps: &[&str]) -> Self {
            self.requires = ids(deps);
            self
        }

        fn after(mut self, deps: &[&str]) -> Self {
            self.after = ids(deps);
            self
        }

        fn before(mut self, deps: &[&str]) -> Self {
            self.before = ids(deps);
            self
        }
    }

    impl JobNodeData for TestJob {
        fn id(&self) -> &str {
            &self.id
        }

        fn direct_dependencies(&self) -> impl Iterator<Item = &str> {
            self.depends.iter().map(String::as_str)
        }

        fn resource_dependencies(&self) -> impl Iterator<Item = &str> {
            self.requires.iter().map(String::as_str)
        }

        fn after_dependencies(&self) -> impl Iterator<Item = &str> {
            self.after.iter().map(String::as_str)
        }

        fn before_dependencies(&self) -> impl Iterator<Item = &str> {
            self.before.iter().map(String::as_str)
        }
    }

    fn solve(jobs: &[TestJob]) -> Vec<String> {
        DependencySolver::resolve_dependencies(jobs, None)
            .unwrap()
            .into_iter()
            .map(|job| job.id)
            .collect()
    }

    fn solve_subset(jobs: &[TestJob], visit: &[TestJob]) -> Vec<String> {
        DependencySolver::resolve_dependencies(jobs, Some(visit))
            .unwrap()
            .into_iter()
            .map(|job| job.id)
            .collect()
    }

    fn cycle_of(jobs: &[TestJob]) -> Vec<String> {
        match DependencySolver::resolve_dependencies(jobs, None) {
            Err(err @ DependencyError::Cycle { .. }) => {
                err.cycle_ids().into_iter().map(String::from).collect()
            }
            other => panic!("expected a cycle, got {other:?}"),
        }
    }

    fn positions(order: &[String]) -> HashMap<&str, usize> {
        order
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i))
            .collect()
    }

    #[test]
    fn test_empty_list() {
        assert!(solve(&[]).is_empty());
    }

    #[test]
    fn test_independent_jobs_keep_input_order() {
        let jobs = vec![TestJob::new("A"), TestJob::new("B"), TestJob::new("C")];
        assert_eq!(solve(&jobs), vec!["A", "B", "C"]);
    }

    #[test]
    fn test_chain() {
        let jobs = vec![
            TestJob::new("A").depends(&["B"]),
            TestJob::new("B").depends(&["C"]),
            TestJob::new("C"),
        ];
        assert_eq!(solve(&jobs), vec!["C", "B", "A"]);
    }

    #[test]
    fn test_independent_groups() {
        let jobs = vec![
            TestJob::new("A1").depends(&["B1"]),
            TestJob::new("B1"),
            TestJob::new("A2").depends(&["B2"]),
            TestJob::new("B2"),
        ];
        assert_eq!(solve(&jobs), vec!["B1", "A1", "B2", "A2"]);
    }

    #[test]
    fn test_diamond() {
        let jobs = vec![
            TestJob::new("A"),
            TestJob::new("B").depends(&["A"]),
            TestJob::new("C").depends(&["A"]),
            TestJob::new("D").depends(&["B", "C"]),
        ];
        let order = solve_subset(&jobs, &jobs[3..]);
        assert_eq!(order, vec!["A", "B", "C", "D"]);
    }

    #[test]
    fn test_visit_list_pulls_in_dependencies_only() {
        let jobs = vec![
            TestJob::new("A").depends(&["B"]),
            TestJob::new("B"),
            TestJob::new("C"),
        ];
        assert_eq!(solve_subset(&jobs, &jobs[..1]), vec!["B", "A"]);
    }

    #[test]
    fn test_resource_dependency() {
        let jobs = vec![TestJob::new("A").requires(&["R"]), TestJob::new("R")];
        assert_eq!(solve(&jobs), vec!["R", "A"]);
        assert_eq!(solve_subset(&jobs, &jobs[..1]), vec!["R", "A"]);
    }

    #[test]
    fn test_before_and_after_are_equivalent() {
        let with_before = vec![TestJob::new("B"), TestJob::new("A").before(&["B"])];
        let with_after = vec![TestJob::new("B").after(&["A"]), TestJob::new("A")];
        assert_eq!(solve(&with_before), vec!["A", "B"]);
        assert_eq!(solve(&with_after), vec!["A", "B"]);
    }

    #[test]
    fn test_ordering_does_not_pull_jobs_in() {
        let jobs = vec![
            TestJob::new("A").after(&["B"]),
            TestJob::new("B"),
            TestJob::new("C").before(&["A"]),
        ];
        assert_eq!(solve_subset(&jobs, &jobs[..1]), vec!["A"]);
    }

    #[test]
    fn test_ordering_applies_to_pulled_in_jobs() {
        let jobs = vec![
            TestJob::new("T").depends(&["X", "Y"]),
            TestJob::new("X").after(&["Y"]),
            TestJob::new("Y"),
        ];
        let order = solve_subset(&jobs, &jobs[..1]);
        let pos = positions(&order);
        assert!(pos["Y"] < pos["X"]);
        assert!(pos["X"] < pos["T"]);
    }

    #[test]
    fn test_missing_direct_dependency() {
        let jobs = vec![TestJob::new("A").depends(&["B"])];
        match DependencySolver::resolve_dependencies(&jobs, None) {
            Err(DependencyError::Missing {
                job,
                missing_job_id,
                kind,
            }) => {
                assert_eq!(job, jobs[0]);
                assert_eq!(missing_job_id, "B");
                assert_eq!(kind, DependencyKind::Direct);
            }
            other => panic!("expected missing dependency, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_resource_dependency() {
        let jobs = vec![TestJob::new("A").requires(&["R"])];
        let err = DependencySolver::resolve_dependencies(&jobs, None).unwrap_err();
        assert_eq!(err.to_string(), "missing dependency: 'R' (resource)");
        assert_eq!(err.affected_job(), &jobs[0]);
    }

    #[test]
    fn test_missing_ordering_reference() {
        let jobs = vec![TestJob::new("A").after(&["ghost"])];
        match DependencySolver::resolve_dependencies(&jobs, None) {
            Err(DependencyError::Missing { kind, .. }) => {
                assert_eq!(kind, DependencyKind::Ordering);
            }
            other => panic!("expected missing dependency, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_outside_visit_list_is_ignored() {
        let jobs = vec![TestJob::new("A"), TestJob::new("B").depends(&["ghost"])];
        assert_eq!(solve_subset(&jobs, &jobs[..1]), vec!["A"]);
    }

    #[test]
    fn test_duplicate() {
        let first = TestJob::new("A");
        let second = TestJob::new("A").depends(&["B"]);
        let jobs = vec![first.clone(), second.clone(), TestJob::new("B")];
        let expected = Err(DependencyError::Duplicate {
            job: first,
            duplicate_job: second,
        });
        assert_eq!(DependencySolver::resolve_dependencies(&jobs, None), expected);
        // A visit list that avoids the duplicated id still fails.
        assert_eq!(
            DependencySolver::resolve_dependencies(&jobs, Some(&jobs[2..])),
            expected
        );
    }

    #[test]
    fn test_unknown_visit_job() {
        let jobs = vec![TestJob::new("A")];
        let stranger = vec![TestJob::new("Z")];
        assert_eq!(
            DependencySolver::resolve_dependencies(&jobs, Some(&stranger)),
            Err(DependencyError::Unknown {
                job: TestJob::new("Z"),
            })
        );
    }

    #[test]
    fn test_cycle_self() {
        let jobs = vec![TestJob::new("A").depends(&["A"])];
        assert_eq!(cycle_of(&jobs), vec!["A", "A"]);
    }

    #[test]
    fn test_cycle_simple() {
        let jobs = vec![TestJob::new("A").depends(&["B"]), TestJob::new("B").depends(&["A"])];
        assert_eq!(cycle_of(&jobs), vec!["A", "B", "A"]);
    }

    #[test]
    fn test_cycle_longer_excludes_entry_job() {
        let jobs = vec![
            TestJob::new("A").depends(&["B"]),
            TestJob::new("B").depends(&["C"]),
            TestJob::new("C").depends(&["D"]),
            TestJob::new("D").depends(&["B"]),
        ];
        assert_eq!(cycle_of(&jobs), vec!["B", "C", "D", "B"]);
    }

    #[test]
    fn test_cycle_through_resource() {
        let jobs = vec![TestJob::new("A").requires(&["R"]), TestJob::new("R").depends(&["A"])];
        assert_eq!(cycle_of(&jobs), vec!["A", "R", "A"]);
    }

    #[test]
    fn test_cycle_through_ordering() {
        let jobs = vec![TestJob::new("A").depends(&["B"]), TestJob::new("B").after(&["A"])];
        assert_eq!(cycle_of(&jobs), vec!["A", "B", "A"]);
    }

    #[test]
    fn test_solution_is_deterministic() {
        let jobs = vec![
            TestJob::new("D").depends(&["B", "C"]),
            TestJob::new("C").depends(&["A"]).requires(&["R"]),
            TestJob::new("B").depends(&["A"]),
            TestJob::new("A"),
            TestJob::new("R"),
        ];
        let first = solve(&jobs);
        let second = solve(&jobs);
        assert_eq!(first, second);
        assert_eq!(first, vec!["A", "B", "R", "C", "D"]);
    }

    #[test]
    fn test_input_is_not_mutated() {
        let jobs = vec![TestJob::new("A").depends(&["B"]), TestJob::new("B")];
        let snapshot = jobs.clone();
        let _ = solve(&jobs);
        assert_eq!(jobs, snapshot);
    }

    #[test]
    fn test_validate_collects_all_missing() {
        let jobs = vec![
            TestJob::new("A").depends(&["x"]),
            TestJob::new("B").requires(&["y"]),
            TestJob::new("C").depends(&["D"]),
            TestJob::new("D").depends(&["C"]),
        ];
        let result = DependencySolver::validate(&jobs);
        assert!(!result.is_valid);
        assert_eq!(result.errors.len(), 3);
        assert!(matches!(result.errors[0], DependencyError::Missing { .. }));
        assert!(matches!(result.errors[1], DependencyError::Missing { .. }));
        assert_eq!(result.errors[2].cycle_ids(), vec!["C", "D", "C"]);
    }

    #[test]
    fn test_validate_reports_duplicates() {
        let jobs = vec![TestJob::new("A"), TestJob::new("A")];
        let result = DependencySolver::validate(&jobs);
        assert!(!result.is_valid);
        assert!(matches!(result.errors[0], DependencyError::Duplicate { .. }));
    }
}
