//! Progress events and remaining-time estimates.

use std::fmt;
use std::time::Instant;

#[derive(Clone, Debug, PartialEq)]
pub enum Progress {
    /// `completed` of `total` units done, with a formatted time estimate.
    Advanced {
        completed: usize,
        total: usize,
        remaining: String,
    },
    Notice(String),
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Progress::Advanced {
                completed,
                total,
                remaining,
            } => write!(f, "{}/{} done, remaining {}", completed, total, remaining),
            Progress::Notice(message) => f.write_str(message),
        }
    }
}

/// `HH:MM:SS` when at least an hour, `MM:SS` otherwise, `unknown` if not finite.
pub fn format_duration(seconds: f64) -> String {
    if !seconds.is_finite() {
        return "unknown".to_string();
    }
    let total = seconds.round().max(0.0) as u64;
    let (hours, minutes, secs) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{:02}:{:02}", minutes, secs)
    }
}

/// `(elapsed / completed) * (total - completed)`, formatted.
pub fn estimate_remaining(elapsed_secs: f64, completed: usize, total: usize) -> String {
    if completed == 0 {
        return "unknown".to_string();
    }
    let per_unit = elapsed_secs / completed as f64;
    format_duration(per_unit * total.saturating_sub(completed) as f64)
}

pub type ProgressCallback<'a> = &'a mut dyn FnMut(&Progress);

/// Turns completion counts into [`Progress`] events for one phase.
///
/// Without a callback the events are logged instead.
pub struct ProgressReporter<'a> {
    callback: Option<ProgressCallback<'a>>,
    started: Instant,
    total: usize,
}

impl<'a> ProgressReporter<'a> {
    pub fn new(callback: Option<ProgressCallback<'a>>) -> Self {
        Self {
            callback,
            started: Instant::now(),
            total: 0,
        }
    }

    /// Starts a new phase over `total` units and resets the clock.
    pub fn start(&mut self, total: usize) {
        self.started = Instant::now();
        self.total = total;
    }

    pub fn advance(&mut self, completed: usize) {
        if self.total == 0 {
            self.notice("page count unknown");
            return;
        }
        let elapsed = self.started.elapsed().as_secs_f64();
        let event = Progress::Advanced {
            completed,
            total: self.total,
            remaining: estimate_remaining(elapsed, completed, self.total),
        };
        self.emit(event);
    }

    pub fn notice(&mut self, message: impl Into<String>) {
        self.emit(Progress::Notice(message.into()));
    }

    fn emit(&mut self, event: Progress) {
        match self.callback.as_mut() {
            Some(callback) => (*callback)(&event),
            None => tracing::info!("{}", event),
        }
    }
}
