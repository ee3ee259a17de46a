//! Progress side channel.
//!
//! The lifecycle controller reports what it observes here without waiting on
//! the consumer; the CLI drains the channel and prints progress to stderr.

use crate::job::{JobHandle, JobStatus};
use log::{debug, info, warn};
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Submitted {
        handle: JobHandle,
    },
    Status {
        handle: JobHandle,
        status: JobStatus,
    },
    ResultWritten {
        handle: JobHandle,
        type_id: String,
        /// `None` when the result went to stdout.
        path: Option<PathBuf>,
    },
    ResultFailed {
        handle: JobHandle,
        type_id: String,
        message: String,
    },
}

impl Display for Event {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Event::Submitted { handle } => write!(f, "JobId: {}", handle),
            Event::Status { handle, status } => write!(f, "{}: {}", handle, status),
            Event::ResultWritten {
                path: Some(path), ..
            } => write!(f, "Wrote {}", path.display()),
            Event::ResultWritten {
                handle,
                type_id,
                path: None,
            } => write!(f, "{}: {} written to stdout", handle, type_id),
            Event::ResultFailed {
                handle,
                type_id,
                message,
            } => write!(f, "{}: failed to retrieve {}: {}", handle, type_id, message),
        }
    }
}

/// Non-blocking sending half handed to controllers.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    sender: Option<mpsc::Sender<Event>>,
}

impl EventSink {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self {
            sender: Some(sender),
        }
    }

    /// A sink that discards everything.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Never waits: when the consumer lags behind the event is dropped.
    pub fn emit(&self, event: Event) {
        if let Some(sender) = &self.sender {
            let _ = sender.try_send(event);
        }
    }
}

/// Spawns the consumer that logs every event until all senders are gone.
pub fn spawn_progress_printer(mut receiver: mpsc::Receiver<Event>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = receiver.recv().await {
            let stamp = chrono::Local::now().format("%H:%M:%S");
            match &event {
                Event::ResultFailed { .. } => warn!("[{}] {}", stamp, event),
                // the writer already reported the path
                Event::ResultWritten { .. } => debug!("[{}] {}", stamp, event),
                _ => info!("[{}] {}", stamp, event),
            }
        }
    })
}
