//! Session state: the job universe, the selection and the run list.

use crate::job::JobDefinition;
use crate::qualifier::JobQualifier;
use crate::{Error, Result};
use certbox_job_graph::{DependencyError, DependencySolver};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// One record produced by a resource job.
pub type Resource = IndexMap<String, String>;

/// Runtime configuration of a session.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Seconds added to every manual job in duration estimates.
    pub manual_overhead: f64,
    /// Whether mandatory jobs are prepended to every desired job list.
    pub include_mandatory: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            manual_overhead: 30.0,
            include_mandatory: true,
        }
    }
}

/// Estimated duration of a run list, in seconds.
///
/// A figure is `None` when a job it depends on has no estimate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DurationEstimate {
    /// Time needed by jobs that run on their own.
    pub automated: Option<f64>,
    /// Time needed by jobs that involve an operator.
    pub manual: Option<f64>,
}

/// State of a testing session.
///
/// Holds every known job, the jobs the operator wants to run and the
/// resulting run list, which also contains everything the desired jobs
/// depend on, in execution order.
#[derive(Debug, Clone)]
pub struct SessionState {
    config: SessionConfig,
    job_list: Vec<JobDefinition>,
    mandatory_job_list: Vec<JobDefinition>,
    desired_job_list: Vec<JobDefinition>,
    run_list: Vec<JobDefinition>,
    resource_map: IndexMap<String, Vec<Resource>>,
}

impl SessionState {
    /// Create a session over a job universe.
    ///
    /// Identical definitions of one id are collapsed into one job.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Dependency`] with a duplicate error if two different
    /// definitions share an id.
    pub fn new(job_list: Vec<JobDefinition>, config: SessionConfig) -> Result<Self> {
        let mut state = Self {
            config,
            job_list: Vec::with_capacity(job_list.len()),
            mandatory_job_list: Vec::new(),
            desired_job_list: Vec::new(),
            run_list: Vec::new(),
            resource_map: IndexMap::new(),
        };
        for job in job_list {
            state.add_job(job)?;
        }
        info!(jobs = state.job_list.len(), "Created session");
        Ok(state)
    }

    /// The session configuration.
    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// All known jobs.
    #[must_use]
    pub fn job_list(&self) -> &[JobDefinition] {
        &self.job_list
    }

    /// Jobs that must run whatever the operator selects.
    #[must_use]
    pub fn mandatory_job_list(&self) -> &[JobDefinition] {
        &self.mandatory_job_list
    }

    /// Jobs selected to run, after problematic jobs were dropped.
    #[must_use]
    pub fn desired_job_list(&self) -> &[JobDefinition] {
        &self.desired_job_list
    }

    /// Jobs to run, in execution order.
    #[must_use]
    pub fn run_list(&self) -> &[JobDefinition] {
        &self.run_list
    }

    /// Records produced by resource jobs, by resource job id.
    #[must_use]
    pub const fn resource_map(&self) -> &IndexMap<String, Vec<Resource>> {
        &self.resource_map
    }

    /// Get a job by id.
    #[must_use]
    pub fn job(&self, id: &str) -> Option<&JobDefinition> {
        self.job_list.iter().find(|job| job.id() == id)
    }

    /// Set the jobs that must always run.
    ///
    /// They are picked up by the next [`Self::update_desired_job_list`].
    pub fn update_mandatory_job_list(&mut self, mandatory_job_list: Vec<JobDefinition>) {
        self.mandatory_job_list = mandatory_job_list;
    }

    /// Select the jobs that ought to run and recompute the run list.
    ///
    /// This never fails. Each problem found removes the job it affects from
    /// the selection and from the jobs considered, and resolution is tried
    /// again until it succeeds or nothing is left to select. The problems
    /// are returned in the order they were found.
    ///
    /// The run list is only replaced by a successful attempt. When every
    /// attempt fails the previous run list stays in place. An empty
    /// selection clears it.
    pub fn update_desired_job_list(
        &mut self,
        desired_job_list: &[JobDefinition],
    ) -> Vec<DependencyError<JobDefinition>> {
        let mut desired: Vec<JobDefinition> = Vec::new();
        if self.config.include_mandatory {
            desired.extend_from_slice(&self.mandatory_job_list);
        }
        desired.extend_from_slice(desired_job_list);

        if desired.is_empty() {
            self.run_list.clear();
        }
        let mut job_list = self.job_list.clone();
        let mut problems = Vec::new();

        while !desired.is_empty() {
            match DependencySolver::resolve_dependencies(&job_list, Some(desired.as_slice())) {
                Ok(run_list) => {
                    self.run_list = run_list;
                    break;
                }
                Err(problem) => {
                    let affected = problem.affected_job().clone();
                    warn!(job = affected.id(), %problem, "Dropping job from the selection");
                    let sizes = (desired.len(), job_list.len());
                    desired.retain(|job| job != &affected);
                    job_list.retain(|job| job != &affected);
                    let removed_any = sizes != (desired.len(), job_list.len());
                    problems.push(problem);
                    if !removed_any {
                        break;
                    }
                }
            }
        }

        self.desired_job_list = desired;
        info!(
            desired = self.desired_job_list.len(),
            run = self.run_list.len(),
            problems = problems.len(),
            "Updated desired job list"
        );
        problems
    }

    /// Add a job to the session.
    ///
    /// Adding a job identical to a known one is a no-op that returns the
    /// known job. The new job is not selected to run.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Dependency`] with a duplicate error if a different
    /// job with the same id is known.
    pub fn add_job(&mut self, job: JobDefinition) -> Result<&JobDefinition> {
        match self.job_list.iter().position(|known| known.id() == job.id()) {
            Some(index) => {
                let existing = &self.job_list[index];
                if existing != &job {
                    return Err(DependencyError::Duplicate {
                        job: existing.clone(),
                        duplicate_job: job,
                    }
                    .into());
                }
                debug!(job = job.id(), "Ignoring identical job definition");
                Ok(existing)
            }
            None => {
                debug!(job = job.id(), "Adding job to session");
                let index = self.job_list.len();
                self.job_list.push(job);
                Ok(&self.job_list[index])
            }
        }
    }

    /// Remove a job and any resources it produced.
    ///
    /// # Errors
    ///
    /// Returns [`Error::JobNotFound`] if no job has this id.
    pub fn remove_job(&mut self, id: &str) -> Result<JobDefinition> {
        let index = self
            .job_list
            .iter()
            .position(|job| job.id() == id)
            .ok_or_else(|| Error::JobNotFound { id: id.to_string() })?;
        self.resource_map.shift_remove(id);
        debug!(job = id, "Removed job from session");
        Ok(self.job_list.remove(index))
    }

    /// Discard every job the qualifier designates, returning them.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RunListRemoval`] without removing anything if a
    /// designated job is on the run list.
    pub fn trim_job_list(&mut self, qualifier: &dyn JobQualifier) -> Result<Vec<JobDefinition>> {
        let remove: Vec<bool> = self
            .job_list
            .iter()
            .map(|job| qualifier.designates(job))
            .collect();

        let mut blocked: Vec<String> = self
            .job_list
            .iter()
            .zip(&remove)
            .filter(|(job, removed)| {
                **removed && self.run_list.iter().any(|run| run.id() == job.id())
            })
            .map(|(job, _)| job.id().to_string())
            .collect();
        if !blocked.is_empty() {
            blocked.sort();
            return Err(Error::RunListRemoval { ids: blocked });
        }

        let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.job_list)
            .into_iter()
            .zip(remove)
            .partition(|(_, removed)| *removed);
        self.job_list = kept.into_iter().map(|(job, _)| job).collect();
        let removed: Vec<JobDefinition> = removed.into_iter().map(|(job, _)| job).collect();
        for job in &removed {
            self.resource_map.shift_remove(job.id());
        }

        info!(removed = removed.len(), remaining = self.job_list.len(), "Trimmed job list");
        Ok(removed)
    }

    /// Store the records produced by a resource job, replacing older ones.
    pub fn set_resource_list(&mut self, resource_id: impl Into<String>, resources: Vec<Resource>) {
        let resource_id = resource_id.into();
        debug!(resource = %resource_id, records = resources.len(), "Set resource list");
        self.resource_map.insert(resource_id, resources);
    }

    /// Estimate how long the run list takes.
    ///
    /// Manual jobs get the configured overhead on top of their estimate. A
    /// manual job without an estimate is only fatal to the manual figure if
    /// it has a command to run.
    #[must_use]
    pub fn estimated_duration(&self) -> DurationEstimate {
        let mut automated = Some(0.0);
        let mut manual = Some(0.0);

        for job in &self.run_list {
            if job.automated() {
                automated = automated.and_then(|total| job.estimated_duration().map(|d| total + d));
            } else if let Some(total) = manual {
                manual = match job.estimated_duration() {
                    Some(duration) => Some(total + self.config.manual_overhead + duration),
                    None if job.command().is_some() => None,
                    None => Some(total + self.config.manual_overhead),
                };
            }
        }

        DurationEstimate { automated, manual }
    }
}

/// Move resource jobs to the front of a run list, keeping relative order.
///
/// This is an optional policy on top of the solver's order: resource data is
/// then available as early as possible.
#[must_use]
pub fn resources_first(run_list: &[JobDefinition]) -> Vec<JobDefinition> {
    let (mut resources, others): (Vec<_>, Vec<_>) = run_list
        .iter()
        .cloned()
        .partition(|job| job.plugin() == crate::PluginKind::Resource);
    resources.extend(others);
    resources
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PluginKind;
    use crate::qualifier::{JobIdQualifier, RegexQualifier};

    fn shell(id: &str) -> JobDefinition {
        JobDefinition::new(id, PluginKind::Shell)
    }

    fn ids(jobs: &[JobDefinition]) -> Vec<&str> {
        jobs.iter().map(JobDefinition::id).collect()
    }

    fn session(jobs: Vec<JobDefinition>) -> SessionState {
        SessionState::new(jobs, SessionConfig::default()).unwrap()
    }

    #[test]
    fn test_config_defaults() {
        let config = SessionConfig::default();
        assert!((config.manual_overhead - 30.0).abs() < f64::EPSILON);
        assert!(config.include_mandatory);
    }

    #[test]
    fn test_config_deserialize_partial() {
        let config: SessionConfig = serde_json::from_str(r#"{"manual_overhead": 10}"#).unwrap();
        assert!((config.manual_overhead - 10.0).abs() < f64::EPSILON);
        assert!(config.include_mandatory);
    }

    #[test]
    fn test_new_collapses_identical_duplicates() {
        let state = session(vec![shell("a"), shell("a"), shell("b")]);
        assert_eq!(ids(state.job_list()), vec!["a", "b"]);
    }

    #[test]
    fn test_new_rejects_clashing_duplicates() {
        let err = SessionState::new(
            vec![shell("a"), shell("a").with_command("true")],
            SessionConfig::default(),
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "duplicate job id: 'a'");
    }

    #[test]
    fn test_update_desired_job_list_resolves_run_list() {
        let a = shell("a").with_depends(["b"]);
        let b = shell("b");
        let c = shell("c");
        let mut state = session(vec![a.clone(), b, c]);

        let problems = state.update_desired_job_list(&[a]);
        assert!(problems.is_empty());
        assert_eq!(ids(state.desired_job_list()), vec!["a"]);
        assert_eq!(ids(state.run_list()), vec!["b", "a"]);
    }

    #[test]
    fn test_problem_jobs_are_dropped() {
        let broken = shell("broken").with_depends(["ghost"]);
        let fine = shell("fine");
        let mut state = session(vec![broken.clone(), fine.clone()]);

        let problems = state.update_desired_job_list(&[broken, fine]);
        assert_eq!(problems.len(), 1);
        assert_eq!(problems[0].to_string(), "missing dependency: 'ghost' (direct)");
        assert_eq!(ids(state.desired_job_list()), vec!["fine"]);
        assert_eq!(ids(state.run_list()), vec!["fine"]);
    }

    #[test]
    fn test_problem_in_dependency_drops_dependent() {
        let top = shell("top").with_depends(["mid"]);
        let mid = shell("mid").with_depends(["ghost"]);
        let mut state = session(vec![top.clone(), mid]);

        let problems = state.update_desired_job_list(&[top]);
        // First the dependency itself is dropped, then the job needing it.
        assert_eq!(problems.len(), 2);
        assert_eq!(problems[0].affected_job().id(), "mid");
        assert_eq!(problems[1].affected_job().id(), "top");
        assert!(state.desired_job_list().is_empty());
        assert!(state.run_list().is_empty());
    }

    #[test]
    fn test_cycle_is_reported_and_dropped() {
        let a = shell("a").with_depends(["b"]);
        let b = shell("b").with_depends(["a"]);
        let c = shell("c");
        let mut state = session(vec![a.clone(), b, c.clone()]);

        let problems = state.update_desired_job_list(&[a, c]);
        assert_eq!(problems[0].cycle_ids(), vec!["a", "b", "a"]);
        assert_eq!(ids(state.run_list()), vec!["c"]);
    }

    #[test]
    fn test_unknown_desired_job() {
        let mut state = session(vec![shell("a")]);
        let problems = state.update_desired_job_list(&[shell("stranger"), shell("a")]);
        assert_eq!(problems.len(), 1);
        assert!(matches!(problems[0], DependencyError::Unknown { .. }));
        assert_eq!(ids(state.run_list()), vec!["a"]);
    }

    #[test]
    fn test_mandatory_jobs_are_prepended() {
        let mut state = session(vec![shell("a"), shell("m")]);
        state.update_mandatory_job_list(vec![shell("m")]);
        state.update_desired_job_list(&[shell("a")]);
        assert_eq!(ids(state.desired_job_list()), vec!["m", "a"]);
        assert_eq!(ids(state.run_list()), vec!["m", "a"]);
    }

    #[test]
    fn test_mandatory_jobs_can_be_disabled() {
        let config = SessionConfig {
            include_mandatory: false,
            ..SessionConfig::default()
        };
        let mut state = SessionState::new(vec![shell("a"), shell("m")], config).unwrap();
        state.update_mandatory_job_list(vec![shell("m")]);
        state.update_desired_job_list(&[shell("a")]);
        assert_eq!(ids(state.run_list()), vec!["a"]);
    }

    #[test]
    fn test_empty_selection_clears_run_list() {
        let mut state = session(vec![shell("a")]);
        state.update_desired_job_list(&[shell("a")]);
        assert_eq!(state.run_list().len(), 1);
        let problems = state.update_desired_job_list(&[]);
        assert!(problems.is_empty());
        assert!(state.run_list().is_empty());
    }

    #[test]
    fn test_failed_selection_keeps_previous_run_list() {
        let a = shell("a");
        let broken = shell("broken").with_depends(["ghost"]);
        let mut state = session(vec![a.clone(), broken.clone()]);

        assert!(state.update_desired_job_list(&[a]).is_empty());
        assert_eq!(ids(state.run_list()), vec!["a"]);

        let problems = state.update_desired_job_list(&[broken]);
        assert_eq!(problems.len(), 1);
        assert!(state.desired_job_list().is_empty());
        assert_eq!(ids(state.run_list()), vec!["a"]);
    }

    #[test]
    fn test_add_job() {
        let mut state = session(vec![shell("a")]);
        assert_eq!(state.add_job(shell("b")).unwrap().id(), "b");
        assert_eq!(state.add_job(shell("a")).unwrap().id(), "a");
        assert_eq!(state.job_list().len(), 2);
        assert!(state.add_job(shell("a").with_command("x")).is_err());
    }

    #[test]
    fn test_remove_job_drops_resources() {
        let mut state = session(vec![JobDefinition::new("r", PluginKind::Resource)]);
        state.set_resource_list("r", vec![Resource::new()]);
        let removed = state.remove_job("r").unwrap();
        assert_eq!(removed.id(), "r");
        assert!(state.resource_map().is_empty());
        assert!(matches!(state.remove_job("r"), Err(Error::JobNotFound { .. })));
    }

    #[test]
    fn test_trim_job_list() {
        let mut state = session(vec![shell("keep"), shell("drop/1"), shell("drop/2")]);
        let qualifier = RegexQualifier::new("drop/.*", true).unwrap();
        let removed = state.trim_job_list(&qualifier).unwrap();
        assert_eq!(ids(&removed), vec!["drop/1", "drop/2"]);
        assert_eq!(ids(state.job_list()), vec!["keep"]);
    }

    #[test]
    fn test_trim_refuses_run_list_jobs() {
        let mut state = session(vec![shell("a"), shell("b")]);
        state.update_desired_job_list(&[shell("a")]);
        let err = state
            .trim_job_list(&JobIdQualifier::new("a", true))
            .unwrap_err();
        assert_eq!(err.to_string(), "cannot remove jobs that are on the run list: a");
        assert_eq!(state.job_list().len(), 2);
    }

    #[test]
    fn test_set_resource_list_replaces() {
        let mut state = session(vec![]);
        let mut record = Resource::new();
        record.insert("name".to_string(), "fwts".to_string());
        state.set_resource_list("package", vec![record.clone(), record.clone()]);
        state.set_resource_list("package", vec![record]);
        assert_eq!(state.resource_map()["package"].len(), 1);
    }

    #[test]
    fn test_estimated_duration() {
        let jobs = vec![
            shell("a").with_estimated_duration(1.5),
            shell("b").with_estimated_duration(2.0),
            JobDefinition::new("m", PluginKind::Manual).with_estimated_duration(10.0),
            JobDefinition::new("v", PluginKind::UserVerify),
        ];
        let mut state = session(jobs.clone());
        state.update_desired_job_list(&jobs);
        let estimate = state.estimated_duration();
        assert_eq!(estimate.automated, Some(3.5));
        assert_eq!(estimate.manual, Some(70.0));
    }

    #[test]
    fn test_estimated_duration_unknown() {
        let jobs = vec![
            shell("a"),
            JobDefinition::new("v", PluginKind::UserVerify).with_command("check"),
        ];
        let mut state = session(jobs.clone());
        state.update_desired_job_list(&jobs);
        let estimate = state.estimated_duration();
        assert_eq!(estimate.automated, None);
        assert_eq!(estimate.manual, None);
    }

    #[test]
    fn test_resources_first() {
        let run_list = vec![
            shell("a"),
            JobDefinition::new("r1", PluginKind::Resource),
            shell("b"),
            JobDefinition::new("r2", PluginKind::Resource),
        ];
        assert_eq!(ids(&resources_first(&run_list)), vec!["r1", "r2", "a", "b"]);
    }
}
