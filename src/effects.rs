//! Fire-and-forget side effects: the activity log and recently-visited
//! records.
//!
//! Effects are handed over after the request's own work is done. A sink
//! never reports failure to its caller; problems are logged at `warn`.

use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::mpsc::{self, Sender};
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

use crate::error::Result;
use crate::model::{ActivityEvent, Visit};
use crate::storage::SqliteStorage;

/// Receives activity events for committed mutations.
pub trait ActivitySink: Send + Sync {
    fn record(&self, event: ActivityEvent);
}

/// Receives recently-visited records.
pub trait VisitRecorder: Send + Sync {
    fn record(&self, visit: Visit);
}

enum Effect {
    Activity(ActivityEvent),
    Visit(Visit),
}

/// Writes effects on a background thread through its own connection.
///
/// Dropping the dispatcher closes the channel and waits for queued effects
/// to be written.
pub struct BackgroundDispatcher {
    sender: Option<Sender<Effect>>,
    worker: Option<JoinHandle<()>>,
}

impl BackgroundDispatcher {
    /// Start the worker for the database at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker thread cannot be spawned. A database
    /// that cannot be opened is logged by the worker and its effects dropped.
    pub fn spawn(path: PathBuf, lock_timeout_ms: Option<u64>) -> Result<Self> {
        let (sender, receiver) = mpsc::channel::<Effect>();
        let worker = thread::Builder::new()
            .name("wi-effects".to_string())
            .spawn(move || {
                let storage = match SqliteStorage::open_with_timeout(&path, lock_timeout_ms) {
                    Ok(storage) => storage,
                    Err(err) => {
                        warn!(path = %path.display(), error = %err, "Effect store unavailable");
                        let dropped = receiver.iter().count();
                        warn!(dropped, "Dropped side effects");
                        return;
                    }
                };
                for effect in receiver {
                    let outcome = match &effect {
                        Effect::Activity(event) => storage.record_activity(event),
                        Effect::Visit(visit) => storage.record_visit(visit),
                    };
                    if let Err(err) = outcome {
                        warn!(error = %err, "Failed to record side effect");
                    }
                }
                debug!("Effect worker finished");
            })?;
        Ok(Self {
            sender: Some(sender),
            worker: Some(worker),
        })
    }

    fn send(&self, effect: Effect) {
        let Some(sender) = &self.sender else {
            return;
        };
        if sender.send(effect).is_err() {
            warn!("Effect worker is gone; side effect dropped");
        }
    }
}

impl ActivitySink for BackgroundDispatcher {
    fn record(&self, event: ActivityEvent) {
        self.send(Effect::Activity(event));
    }
}

impl VisitRecorder for BackgroundDispatcher {
    fn record(&self, visit: Visit) {
        self.send(Effect::Visit(visit));
    }
}

impl Drop for BackgroundDispatcher {
    fn drop(&mut self) {
        drop(self.sender.take());
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Effect worker panicked");
            }
        }
    }
}

/// Logs effects and discards them.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl ActivitySink for LogSink {
    fn record(&self, event: ActivityEvent) {
        debug!(kind = %event.kind, issue = %event.issue_id, actor = %event.actor_id, "Activity");
    }
}

impl VisitRecorder for LogSink {
    fn record(&self, visit: Visit) {
        debug!(entity = visit.entity.as_str(), id = %visit.entity_id, "Visit");
    }
}

/// Keeps effects in memory so callers can inspect them.
#[derive(Debug, Default)]
pub struct MemoryEffects {
    activities: Mutex<Vec<ActivityEvent>>,
    visits: Mutex<Vec<Visit>>,
}

impl MemoryEffects {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded activity, oldest first.
    #[must_use]
    pub fn activities(&self) -> Vec<ActivityEvent> {
        self.activities
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    /// Recorded visits, oldest first.
    #[must_use]
    pub fn visits(&self) -> Vec<Visit> {
        self.visits
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

impl ActivitySink for MemoryEffects {
    fn record(&self, event: ActivityEvent) {
        if let Ok(mut guard) = self.activities.lock() {
            guard.push(event);
        }
    }
}

impl VisitRecorder for MemoryEffects {
    fn record(&self, visit: Visit) {
        if let Ok(mut guard) = self.visits.lock() {
            guard.push(visit);
        }
    }
}
