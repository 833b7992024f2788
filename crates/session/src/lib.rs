//! Job units and testing sessions for certbox.
//!
//! Jobs are described in RFC822-style unit files. This crate parses those
//! files into [`JobDefinition`]s, works out which resource jobs a job's
//! `requires` program reads, selects jobs with [`JobQualifier`]s and keeps a
//! [`SessionState`] whose run list is resolved by `certbox-job-graph`.
//!
//! # Example
//!
//! ```ignore
//! use certbox_session::{SessionConfig, SessionState, parse_jobs};
//!
//! let jobs = parse_jobs(
//!     "id: disk\nplugin: shell\ndepends: setup\n\nid: setup\nplugin: shell\n",
//!     Some("com.example"),
//! )?;
//! let mut session = SessionState::new(jobs.clone(), SessionConfig::default())?;
//! let problems = session.update_desired_job_list(&jobs[..1]);
//! assert!(problems.is_empty());
//! ```

pub mod error;
pub mod job;
pub mod qualifier;
pub mod resource;
pub mod rfc822;
pub mod session;

pub use error::{Error, Result};
pub use job::{JobDefinition, PluginKind, load_job_file, parse_jobs, qualify_id, split_words};
pub use qualifier::{
    CompositeQualifier, JobIdQualifier, JobQualifier, RegexQualifier, Vote, select_jobs,
};
pub use resource::{
    Import, ResourceExpression, ResourceProgram, ResourceProgramError, parse_imports,
};
pub use rfc822::{Origin, Rfc822Record, load_records, parse_records};
pub use session::{DurationEstimate, Resource, SessionConfig, SessionState, resources_first};
