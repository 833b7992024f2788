//! Job definitions.
//!
//! A [`JobDefinition`] is parsed once from an RFC822 record. Word lists are
//! split and qualified, and the requirement program is analysed, so that the
//! solver never has to look at raw field text.

use crate::resource::{Import, ResourceProgram, parse_imports};
use crate::rfc822::{self, Origin, Rfc822Record};
use crate::{Error, Result};
use certbox_job_graph::JobNodeData;
use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, warn};

/// What kind of job this is, which decides how it is run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PluginKind {
    /// Runs a command and checks its exit status.
    Shell,
    /// Runs a command whose output is a list of resource records.
    Resource,
    /// Runs a command whose output is attached to the results.
    Attachment,
    /// Runs a command whose output defines more jobs.
    Local,
    /// Asks the operator to perform a test and report the outcome.
    Manual,
    /// Asks the operator to interact, then checks the command outcome.
    UserInteract,
    /// Runs a command, then asks the operator to verify the outcome.
    UserVerify,
    /// Asks the operator to interact, runs a command, asks for verification.
    UserInteractVerify,
}

impl PluginKind {
    /// All known plugin kinds.
    pub const ALL: [Self; 8] = [
        Self::Shell,
        Self::Resource,
        Self::Attachment,
        Self::Local,
        Self::Manual,
        Self::UserInteract,
        Self::UserVerify,
        Self::UserInteractVerify,
    ];

    /// The name used in job units.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Shell => "shell",
            Self::Resource => "resource",
            Self::Attachment => "attachment",
            Self::Local => "local",
            Self::Manual => "manual",
            Self::UserInteract => "user-interact",
            Self::UserVerify => "user-verify",
            Self::UserInteractVerify => "user-interact-verify",
        }
    }

    /// Whether jobs of this kind run without an operator.
    #[must_use]
    pub const fn is_automated(self) -> bool {
        matches!(
            self,
            Self::Shell | Self::Resource | Self::Attachment | Self::Local
        )
    }
}

impl fmt::Display for PluginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PluginKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown plugin '{s}'"))
    }
}

/// Split a word list on any mixture of whitespace and commas.
///
/// Order is preserved and repeated words are dropped.
#[must_use]
pub fn split_words(text: &str) -> Vec<String> {
    let mut words: Vec<String> = Vec::new();
    for word in text.split(|c: char| c.is_whitespace() || c == ',') {
        if !word.is_empty() && !words.iter().any(|w| w == word) {
            words.push(word.to_string());
        }
    }
    words
}

/// Qualify a partial id with a namespace, leaving qualified ids alone.
#[must_use]
pub fn qualify_id(id: &str, namespace: Option<&str>) -> String {
    match namespace {
        Some(ns) if !ns.is_empty() && !id.contains("::") => format!("{ns}::{id}"),
        _ => id.to_string(),
    }
}

/// A single test job.
///
/// Equality compares the definition itself; where it was loaded from does
/// not matter.
#[derive(Debug, Clone, Serialize)]
pub struct JobDefinition {
    id: String,
    plugin: PluginKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    command: Option<String>,
    depends: Vec<String>,
    after: Vec<String>,
    before: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    requires: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    imports: Vec<Import>,
    resource_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    estimated_duration: Option<f64>,
    flags: Vec<String>,
    #[serde(skip)]
    origin: Origin,
}

impl PartialEq for JobDefinition {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.plugin == other.plugin
            && self.summary == other.summary
            && self.command == other.command
            && self.depends == other.depends
            && self.after == other.after
            && self.before == other.before
            && self.requires == other.requires
            && self.imports == other.imports
            && self.resource_ids == other.resource_ids
            && self.estimated_duration == other.estimated_duration
            && self.flags == other.flags
    }
}

impl JobDefinition {
    /// Create a job with no dependencies.
    pub fn new(id: impl Into<String>, plugin: PluginKind) -> Self {
        Self {
            id: id.into(),
            plugin,
            summary: None,
            command: None,
            depends: Vec::new(),
            after: Vec::new(),
            before: Vec::new(),
            requires: None,
            imports: Vec::new(),
            resource_ids: Vec::new(),
            estimated_duration: None,
            flags: Vec::new(),
            origin: Origin::default(),
        }
    }

    /// Set the jobs this job depends on.
    #[must_use]
    pub fn with_depends<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends = ids.into_iter().map(Into::into).collect();
        self
    }

    /// Set the jobs this job must be ordered after.
    #[must_use]
    pub fn with_after<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.after = ids.into_iter().map(Into::into).collect();
        self
    }

    /// Set the jobs this job must be ordered before.
    #[must_use]
    pub fn with_before<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.before = ids.into_iter().map(Into::into).collect();
        self
    }

    /// Set the requirement program and derive the resource dependencies.
    ///
    /// A program that cannot be analysed leaves the job without resource
    /// dependencies.
    #[must_use]
    pub fn with_requires(mut self, program: impl Into<String>) -> Self {
        let program = program.into();
        self.resource_ids = analyse_requires(&self.id, &program, None, &self.imports);
        self.requires = Some(program);
        self
    }

    /// Set the command.
    #[must_use]
    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    /// Set the estimated duration in seconds.
    #[must_use]
    pub const fn with_estimated_duration(mut self, seconds: f64) -> Self {
        self.estimated_duration = Some(seconds);
        self
    }

    /// Build a job from a parsed record.
    ///
    /// `id` (or the legacy `name`) and `plugin` are required, unless the
    /// `simple` flag is set, which implies a shell job. Ids in `depends`,
    /// `after` and `before` and the job id itself are qualified with
    /// `namespace`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidJob`] for a missing id or plugin, an unknown
    /// plugin or a bad estimated duration, and [`Error::ResourceProgram`] for
    /// a malformed `imports` field.
    pub fn from_record(record: &Rfc822Record, namespace: Option<&str>) -> Result<Self> {
        let origin = record.origin();
        let Some(partial_id) = record.get("id").or_else(|| record.get("name")) else {
            return Err(Error::invalid_job(origin, "missing 'id' field"));
        };
        let id = qualify_id(partial_id, namespace);
        let flags = record.get("flags").map(split_words).unwrap_or_default();

        let plugin = match record.get("plugin") {
            Some(plugin) => plugin
                .parse()
                .map_err(|message: String| Error::invalid_job(origin, message))?,
            None if flags.iter().any(|flag| flag == "simple") => PluginKind::Shell,
            None => return Err(Error::invalid_job(origin, "missing 'plugin' field")),
        };

        let word_list = |key: &str| -> Vec<String> {
            record
                .get(key)
                .map(split_words)
                .unwrap_or_default()
                .iter()
                .map(|word| qualify_id(word, namespace))
                .collect()
        };

        let imports = record
            .get("imports")
            .map(parse_imports)
            .transpose()?
            .unwrap_or_default();
        let requires = record.get("requires").map(str::to_string);
        let resource_ids = requires
            .as_deref()
            .map(|program| analyse_requires(&id, program, namespace, &imports))
            .unwrap_or_default();

        let estimated_duration = record
            .get("estimated_duration")
            .map(|value| {
                value.parse::<f64>().map_err(|_| {
                    Error::invalid_job(origin, format!("invalid estimated_duration '{value}'"))
                })
            })
            .transpose()?;

        let job = Self {
            plugin,
            summary: record
                .get("summary")
                .or_else(|| record.get("_summary"))
                .map(str::to_string),
            command: record.get("command").map(str::to_string),
            depends: word_list("depends"),
            after: word_list("after"),
            before: word_list("before"),
            requires,
            imports,
            resource_ids,
            estimated_duration,
            flags,
            origin: origin.clone(),
            id,
        };
        debug!(job = %job.id, plugin = %job.plugin, "Loaded job definition");
        Ok(job)
    }

    /// The fully qualified id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The id without its namespace.
    #[must_use]
    pub fn partial_id(&self) -> &str {
        self.id.rsplit_once("::").map_or(&self.id, |(_, partial)| partial)
    }

    /// The plugin kind.
    #[must_use]
    pub const fn plugin(&self) -> PluginKind {
        self.plugin
    }

    /// One-line description.
    #[must_use]
    pub fn summary(&self) -> Option<&str> {
        self.summary.as_deref()
    }

    /// The command to run, if any.
    #[must_use]
    pub fn command(&self) -> Option<&str> {
        self.command.as_deref()
    }

    /// Ids this job directly depends on.
    #[must_use]
    pub fn depends(&self) -> &[String] {
        &self.depends
    }

    /// Ids this job must be ordered after.
    #[must_use]
    pub fn after(&self) -> &[String] {
        &self.after
    }

    /// Ids this job must be ordered before.
    #[must_use]
    pub fn before(&self) -> &[String] {
        &self.before
    }

    /// The requirement program text.
    #[must_use]
    pub fn requires(&self) -> Option<&str> {
        self.requires.as_deref()
    }

    /// Ids of the resource jobs referenced by the requirement program.
    #[must_use]
    pub fn resource_ids(&self) -> &[String] {
        &self.resource_ids
    }

    /// Estimated duration in seconds.
    #[must_use]
    pub const fn estimated_duration(&self) -> Option<f64> {
        self.estimated_duration
    }

    /// Flags set on the job.
    #[must_use]
    pub fn flags(&self) -> &[String] {
        &self.flags
    }

    /// Whether a flag is set.
    #[must_use]
    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.iter().any(|f| f == flag)
    }

    /// Where the job was loaded from.
    #[must_use]
    pub const fn origin(&self) -> &Origin {
        &self.origin
    }

    /// Whether the job runs without an operator.
    #[must_use]
    pub const fn automated(&self) -> bool {
        self.plugin.is_automated()
    }
}

impl fmt::Display for JobDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

impl JobNodeData for JobDefinition {
    fn id(&self) -> &str {
        &self.id
    }

    fn direct_dependencies(&self) -> impl Iterator<Item = &str> {
        self.depends.iter().map(String::as_str)
    }

    fn resource_dependencies(&self) -> impl Iterator<Item = &str> {
        self.resource_ids.iter().map(String::as_str)
    }

    fn after_dependencies(&self) -> impl Iterator<Item = &str> {
        self.after.iter().map(String::as_str)
    }

    fn before_dependencies(&self) -> impl Iterator<Item = &str> {
        self.before.iter().map(String::as_str)
    }
}

fn analyse_requires(
    job_id: &str,
    program: &str,
    namespace: Option<&str>,
    imports: &[Import],
) -> Vec<String> {
    match ResourceProgram::parse(program, namespace, imports) {
        Ok(program) => program
            .required_resources()
            .into_iter()
            .map(String::from)
            .collect(),
        Err(err) => {
            warn!(
                job = job_id,
                error = %err,
                "Ignoring requirement program that cannot be analysed"
            );
            Vec::new()
        }
    }
}

/// Parse every job in a piece of RFC822 text.
///
/// # Errors
///
/// Returns the first syntax or job definition error.
pub fn parse_jobs(text: &str, namespace: Option<&str>) -> Result<Vec<JobDefinition>> {
    rfc822::parse_records(text)?
        .iter()
        .map(|record| JobDefinition::from_record(record, namespace))
        .collect()
}

/// Load every job in a unit file.
///
/// # Errors
///
/// Returns [`Error::Io`] if the file cannot be read, or the first syntax or
/// job definition error.
pub fn load_job_file(path: &Path, namespace: Option<&str>) -> Result<Vec<JobDefinition>> {
    let jobs = rfc822::load_records(path)?
        .iter()
        .map(|record| JobDefinition::from_record(record, namespace))
        .collect::<Result<Vec<_>>>()?;
    debug!(path = %path.display(), jobs = jobs.len(), "Loaded job unit file");
    Ok(jobs)
}
