//! Cron scheduler for syncer jobs
//!
//! Each job gets its own tokio task that sleeps until the next fire time and then awaits the
//! job inline. Because the next fire time is only computed after a run returns, a job never
//! overlaps with itself: firings that fall inside a long run are skipped.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cron::Schedule;
use std::collections::{BTreeSet, HashMap};
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Result, SyncError};

/// Work driven by the scheduler
#[async_trait]
pub trait Job: Send + Sync {
    async fn run(&self);
}

const NO_NEXT_RUN: i64 = i64::MIN;

/// Read-only view of a scheduled job
#[derive(Debug, Clone)]
pub struct JobHandle {
    tag: String,
    expression: String,
    runs: Arc<AtomicU64>,
    next_run: Arc<AtomicI64>,
    cancel: CancellationToken,
}

impl JobHandle {
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// The expression as configured, before seconds normalization
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Number of times the job has fired
    pub fn run_count(&self) -> u64 {
        self.runs.load(Ordering::SeqCst)
    }

    /// When the job will next fire, if it is waiting for one
    pub fn next_run(&self) -> Option<DateTime<Utc>> {
        match self.next_run.load(Ordering::SeqCst) {
            NO_NEXT_RUN => None,
            millis => DateTime::from_timestamp_millis(millis),
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

struct ScheduledJob {
    handle: JobHandle,
    task: JoinHandle<()>,
}

/// Owns every scheduled job, keyed by tag
pub struct Scheduler {
    jobs: HashMap<String, ScheduledJob>,
    shutdown: CancellationToken,
}

impl Scheduler {
    /// Jobs stop when `shutdown` is cancelled
    pub fn new(shutdown: CancellationToken) -> Self {
        Self {
            jobs: HashMap::new(),
            shutdown,
        }
    }

    /// Schedule `job` under `tag`, replacing any job already holding that tag
    pub fn cron(&mut self, expression: &str, tag: &str, job: Arc<dyn Job>) -> Result<JobHandle> {
        let schedule = parse_schedule(expression)?;

        if self.jobs.contains_key(tag) {
            warn!("Replacing scheduled job {}", tag);
            self.remove_by_tag(tag)?;
        }

        let first = schedule
            .upcoming(Utc)
            .next()
            .map_or(NO_NEXT_RUN, |next| next.timestamp_millis());
        let handle = JobHandle {
            tag: tag.to_string(),
            expression: expression.to_string(),
            runs: Arc::new(AtomicU64::new(0)),
            next_run: Arc::new(AtomicI64::new(first)),
            cancel: self.shutdown.child_token(),
        };

        let task = tokio::spawn(drive(schedule, job, handle.clone()));
        info!("Scheduled job {} with period '{}'", tag, expression);

        self.jobs.insert(
            tag.to_string(),
            ScheduledJob {
                handle: handle.clone(),
                task,
            },
        );
        Ok(handle)
    }

    /// Stop future firings of the job. A run already in progress finishes on its own.
    pub fn remove_by_tag(&mut self, tag: &str) -> Result<()> {
        let job = self
            .jobs
            .remove(tag)
            .ok_or_else(|| SyncError::JobNotFound(tag.to_string()))?;
        job.handle.cancel.cancel();
        debug!("Removed scheduled job {}", tag);
        Ok(())
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.jobs.contains_key(tag)
    }

    /// Tags of all scheduled jobs, sorted
    pub fn tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.jobs.keys().cloned().collect();
        tags.sort();
        tags
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Stop every job and wait for their tasks to exit
    pub async fn shutdown(&mut self) {
        self.shutdown.cancel();
        for (tag, job) in self.jobs.drain() {
            if let Err(e) = job.task.await {
                warn!("Scheduled job {} ended abnormally: {}", tag, e);
            }
        }
    }
}

async fn drive(schedule: Schedule, job: Arc<dyn Job>, handle: JobHandle) {
    loop {
        let Some(next) = schedule.upcoming(Utc).next() else {
            debug!("Schedule for {} has no future fire times", handle.tag);
            break;
        };
        handle
            .next_run
            .store(next.timestamp_millis(), Ordering::SeqCst);

        let wait = (next - Utc::now()).to_std().unwrap_or_default();
        tokio::select! {
            _ = handle.cancel.cancelled() => break,
            _ = tokio::time::sleep(wait) => {}
        }

        handle.next_run.store(NO_NEXT_RUN, Ordering::SeqCst);
        handle.runs.fetch_add(1, Ordering::SeqCst);
        debug!("Running scheduled job {}", handle.tag);
        job.run().await;
    }
    handle.next_run.store(NO_NEXT_RUN, Ordering::SeqCst);
}

/// Parse a cron expression, accepting the classic five-field form.
///
/// Five-field expressions use classic day-of-week numbering (0-7, Sunday is 0 and 7). They are
/// rewritten to the seconds-first form with Sunday as 1 before parsing.
pub fn parse_schedule(expression: &str) -> Result<Schedule> {
    let invalid = |message: String| SyncError::InvalidSchedule {
        expression: expression.to_string(),
        message,
    };

    let fields: Vec<&str> = expression.split_whitespace().collect();
    let normalized = if let [minute, hour, day, month, weekday] = fields[..] {
        let weekday = classic_day_of_week(weekday)
            .ok_or_else(|| invalid(format!("invalid day-of-week field '{weekday}'")))?;
        format!("0 {minute} {hour} {day} {month} {weekday}")
    } else {
        fields.join(" ")
    };

    Schedule::from_str(&normalized).map_err(|e| invalid(e.to_string()))
}

/// Rewrite a classic day-of-week field as an explicit list of Sunday-is-1 day numbers.
/// Named days and bare wildcards mean the same in both forms and pass through.
fn classic_day_of_week(field: &str) -> Option<String> {
    if field == "*" || field == "?" {
        return Some(field.to_string());
    }

    let mut days = BTreeSet::new();
    let mut named = Vec::new();
    for item in field.split(',') {
        if item.chars().any(|c| c.is_ascii_alphabetic()) {
            named.push(item.to_string());
            continue;
        }

        let (range, step) = match item.split_once('/') {
            Some((range, step)) => (range, Some(step.parse::<usize>().ok().filter(|s| *s > 0)?)),
            None => (item, None),
        };
        let (start, end) = match range.split_once('-') {
            _ if range == "*" => (0, 6),
            Some((start, end)) => (start.parse::<u32>().ok()?, end.parse::<u32>().ok()?),
            None => {
                let day = range.parse::<u32>().ok()?;
                (day, if step.is_some() { 6 } else { day })
            }
        };
        if start > end || end > 7 {
            return None;
        }

        for day in (start..=end).step_by(step.unwrap_or(1)) {
            days.insert(day % 7 + 1);
        }
    }

    let mut items: Vec<String> = days.iter().map(u32::to_string).collect();
    items.extend(named);
    Some(items.join(","))
}
