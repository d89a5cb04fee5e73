//! Print jobs as handed out by the dispatch API, and the transient queue
//! they wait in between a poll and their print attempt.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt;

use log::debug;
use serde::{Deserialize, Serialize};

/// Job status as exchanged with the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    #[default]
    Pending,
    Printing,
    CompletedSuccessfully,
    CompletedWithError,
    /// Any status value this agent does not know about.
    #[serde(other)]
    Other,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending               => "PENDING",
            Self::Printing              => "PRINTING",
            Self::CompletedSuccessfully => "COMPLETED_SUCCESSFULLY",
            Self::CompletedWithError    => "COMPLETED_WITH_ERROR",
            Self::Other                 => "OTHER",
        };
        f.write_str(s)
    }
}

/// Document attached to a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFile {
    pub url:  String,
    pub name: String,
}

/// A unit of print work assigned to this station.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    #[serde(default)]
    pub status: JobStatus,
    pub file: JobFile,
    pub printer: String,
    #[serde(default = "default_copies")]
    pub copies: u32,
    /// Extra spooler options (`page-ranges`, `orientation-requested`, ...).
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

fn default_copies() -> u32 {
    1
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Task #{} ({}) to print {} copies of {} ({}) on {}",
            self.id, self.status, self.copies, self.file.name, self.file.url, self.printer
        )
    }
}

/// Number of attempted job ids remembered by a [`JobQueue`].
const ATTEMPTED_HISTORY: usize = 4096;

/// Jobs waiting for their print attempt, keyed by job id.
///
/// Merging a job whose id is already queued replaces the queued payload.
/// Ids handed out by [`JobQueue::pop`] are remembered and ignored by later
/// merges, so a job is attempted at most once.  Only the most recent
/// `ATTEMPTED_HISTORY` ids are kept; the API stops listing a job long before
/// that many newer ones have been attempted.
#[derive(Debug)]
pub struct JobQueue {
    pending:       HashMap<i64, Job>,
    attempted:     HashSet<i64>,
    /// Attempted ids in attempt order, oldest first.
    history:       VecDeque<i64>,
    history_limit: usize,
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::with_history(ATTEMPTED_HISTORY)
    }
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_history(limit: usize) -> Self {
        Self {
            pending:       HashMap::new(),
            attempted:     HashSet::new(),
            history:       VecDeque::new(),
            history_limit: limit.max(1),
        }
    }

    /// Add freshly fetched jobs; returns how many were accepted.
    pub fn merge<I>(&mut self, jobs: I) -> usize
    where
        I: IntoIterator<Item = Job>,
    {
        let mut accepted = 0;
        for job in jobs {
            if self.attempted.contains(&job.id) {
                debug!("task #{} already attempted; ignoring", job.id);
                continue;
            }
            self.pending.insert(job.id, job);
            accepted += 1;
        }
        accepted
    }

    /// Remove an arbitrary queued job and mark it attempted.
    pub fn pop(&mut self) -> Option<Job> {
        let id = *self.pending.keys().next()?;
        let job = self.pending.remove(&id)?;
        if self.attempted.insert(id) {
            self.history.push_back(id);
            if self.history.len() > self.history_limit {
                if let Some(oldest) = self.history.pop_front() {
                    self.attempted.remove(&oldest);
                }
            }
        }
        Some(job)
    }

    #[cfg(test)]
    pub fn get(&self, id: i64) -> Option<&Job> {
        self.pending.get(&id)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
