//! Job qualifiers: rules that select jobs for a session.

use crate::job::JobDefinition;
use crate::{Error, Result};
use regex::{Regex, RegexBuilder};
use std::collections::HashSet;
use std::fmt;

/// Opinion of a qualifier about one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vote {
    /// The job should be selected.
    Include,
    /// The job must not be selected, whatever other qualifiers say.
    Exclude,
    /// The qualifier has no opinion.
    Ignore,
}

/// A rule that votes on jobs.
pub trait JobQualifier: fmt::Debug {
    /// Vote on a single job.
    fn vote(&self, job: &JobDefinition) -> Vote;

    /// Whether this qualifier selects the job.
    fn designates(&self, job: &JobDefinition) -> bool {
        self.vote(job) == Vote::Include
    }
}

const fn vote_for(matched: bool, inclusive: bool) -> Vote {
    match (matched, inclusive) {
        (false, _) => Vote::Ignore,
        (true, true) => Vote::Include,
        (true, false) => Vote::Exclude,
    }
}

/// Selects jobs whose whole id matches a regular expression.
#[derive(Debug, Clone)]
pub struct RegexQualifier {
    pattern: Regex,
    text: String,
    inclusive: bool,
}

impl RegexQualifier {
    /// Compile a qualifier. The pattern must match the entire id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPattern`] if the pattern does not compile.
    pub fn new(pattern: &str, inclusive: bool) -> Result<Self> {
        let anchored = RegexBuilder::new(&format!("^(?:{pattern})$"))
            .size_limit(1024 * 1024)
            .build()
            .map_err(|source| Error::InvalidPattern {
                pattern: pattern.to_string(),
                source,
            })?;
        Ok(Self {
            pattern: anchored,
            text: pattern.to_string(),
            inclusive,
        })
    }

    /// The pattern as given.
    #[must_use]
    pub fn pattern_text(&self) -> &str {
        &self.text
    }
}

impl JobQualifier for RegexQualifier {
    fn vote(&self, job: &JobDefinition) -> Vote {
        vote_for(self.pattern.is_match(job.id()), self.inclusive)
    }
}

/// Selects the job with one exact id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobIdQualifier {
    id: String,
    inclusive: bool,
}

impl JobIdQualifier {
    /// Create a qualifier for one id.
    pub fn new(id: impl Into<String>, inclusive: bool) -> Self {
        Self {
            id: id.into(),
            inclusive,
        }
    }
}

impl JobQualifier for JobIdQualifier {
    fn vote(&self, job: &JobDefinition) -> Vote {
        vote_for(job.id() == self.id, self.inclusive)
    }
}

/// Combines qualifiers: any exclusion wins, then any inclusion.
#[derive(Debug, Default)]
pub struct CompositeQualifier {
    qualifiers: Vec<Box<dyn JobQualifier>>,
}

impl CompositeQualifier {
    /// Combine the given qualifiers.
    #[must_use]
    pub fn new(qualifiers: Vec<Box<dyn JobQualifier>>) -> Self {
        Self { qualifiers }
    }
}

impl JobQualifier for CompositeQualifier {
    fn vote(&self, job: &JobDefinition) -> Vote {
        let votes: Vec<Vote> = self.qualifiers.iter().map(|q| q.vote(job)).collect();
        if votes.contains(&Vote::Exclude) {
            Vote::Exclude
        } else if votes.contains(&Vote::Include) {
            Vote::Include
        } else {
            Vote::Ignore
        }
    }
}

/// Select the jobs that at least one qualifier includes and none excludes.
///
/// Jobs are ordered by the first qualifier that included them, then by their
/// position in `job_list`.
#[must_use]
pub fn select_jobs(
    job_list: &[JobDefinition],
    qualifiers: &[Box<dyn JobQualifier>],
) -> Vec<JobDefinition> {
    let mut included: Vec<usize> = Vec::new();
    let mut included_set = HashSet::new();
    let mut excluded_set = HashSet::new();

    for qualifier in qualifiers {
        for (index, job) in job_list.iter().enumerate() {
            match qualifier.vote(job) {
                Vote::Include => {
                    if included_set.insert(index) {
                        included.push(index);
                    }
                }
                Vote::Exclude => {
                    excluded_set.insert(index);
                }
                Vote::Ignore => {}
            }
        }
    }

    included
        .into_iter()
        .filter(|index| !excluded_set.contains(index))
        .map(|index| job_list[index].clone())
        .collect()
}
