//! Progress reporting and cooperative cancellation.
//!
//! The replicator reports a [`ProgressEvent`] at every phase boundary and
//! asks the sink whether to go on. A [`Signal::Stop`] is honoured only
//! between versions and between branches, never in the middle of one.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

/// What happened to a single version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionOutcome {
    Committed,
    SkippedEmpty,
}

/// A phase boundary of a replication run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// A branch was prepared for pulling.
    Init { branch: String, elapsed: Duration },
    /// One version was replicated.
    Version {
        branch: String,
        version: i64,
        outcome: VersionOutcome,
        elapsed: Duration,
    },
    /// Repository housekeeping after a branch.
    Gc { branch: String, elapsed: Duration },
    /// End-of-branch bookkeeping.
    Finalize { branch: String, elapsed: Duration },
    /// Labels were turned into tags.
    TagCreation { created: usize, elapsed: Duration },
}

impl ProgressEvent {
    pub fn elapsed(&self) -> Duration {
        match self {
            Self::Init { elapsed, .. }
            | Self::Version { elapsed, .. }
            | Self::Gc { elapsed, .. }
            | Self::Finalize { elapsed, .. }
            | Self::TagCreation { elapsed, .. } => *elapsed,
        }
    }
}

impl fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init { branch, elapsed } => {
                write!(f, "[{}] init took {:.2?}", branch, elapsed)
            }
            Self::Version {
                branch,
                version,
                outcome,
                elapsed,
            } => {
                let note = match outcome {
                    VersionOutcome::Committed => "",
                    VersionOutcome::SkippedEmpty => " (empty, skipped)",
                };
                write!(
                    f,
                    "[{}] processing version {} took {:.2?}{}",
                    branch, version, elapsed, note
                )
            }
            Self::Gc { branch, elapsed } => write!(f, "[{}] gc took {:.2?}", branch, elapsed),
            Self::Finalize { branch, elapsed } => {
                write!(f, "[{}] finalization took {:.2?}", branch, elapsed)
            }
            Self::TagCreation { created, elapsed } => {
                write!(f, "tags creation took {:.2?} ({} created)", elapsed, created)
            }
        }
    }
}

/// Answer of a sink to a progress event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Continue,
    Stop,
}

/// Receives progress events and decides whether the run goes on.
pub trait ProgressSink {
    fn report(&mut self, event: &ProgressEvent) -> Signal;
}

/// Ignores every event and never stops.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn report(&mut self, _event: &ProgressEvent) -> Signal {
        Signal::Continue
    }
}

/// Shared stop request, settable from a signal handler or another task.
#[derive(Debug, Default, Clone)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

impl ProgressSink for StopFlag {
    fn report(&mut self, _event: &ProgressEvent) -> Signal {
        if self.is_stop_requested() {
            Signal::Stop
        } else {
            Signal::Continue
        }
    }
}

/// Forwards events to `inner` and stops once either `inner` or the flag
/// asks for it.
#[derive(Debug)]
pub struct Stoppable<S> {
    inner: S,
    flag: StopFlag,
}

impl<S: ProgressSink> Stoppable<S> {
    pub fn new(inner: S, flag: StopFlag) -> Self {
        Self { inner, flag }
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: ProgressSink> ProgressSink for Stoppable<S> {
    fn report(&mut self, event: &ProgressEvent) -> Signal {
        let signal = self.inner.report(event);
        if signal == Signal::Stop || self.flag.is_stop_requested() {
            Signal::Stop
        } else {
            Signal::Continue
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init() -> ProgressEvent {
        ProgressEvent::Init {
            branch: "master".into(),
            elapsed: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_stop_flag() {
        let mut flag = StopFlag::new();
        assert_eq!(flag.report(&init()), Signal::Continue);
        flag.clone().request_stop();
        assert_eq!(flag.report(&init()), Signal::Stop);
    }

    #[test]
    fn test_stoppable_forwards_events() {
        struct Count(usize);
        impl ProgressSink for Count {
            fn report(&mut self, _event: &ProgressEvent) -> Signal {
                self.0 += 1;
                Signal::Continue
            }
        }

        let flag = StopFlag::new();
        let mut sink = Stoppable::new(Count(0), flag.clone());
        assert_eq!(sink.report(&init()), Signal::Continue);
        flag.request_stop();
        assert_eq!(sink.report(&init()), Signal::Stop);
        assert_eq!(sink.into_inner().0, 2);
    }

    #[test]
    fn test_display() {
        let event = ProgressEvent::Version {
            branch: "dev".into(),
            version: 7,
            outcome: VersionOutcome::SkippedEmpty,
            elapsed: Duration::from_millis(1500),
        };
        let line = event.to_string();
        assert!(line.starts_with("[dev] processing version 7 took 1.50s"));
        assert!(line.ends_with("(empty, skipped)"));
        assert_eq!(event.elapsed(), Duration::from_millis(1500));

        let tags = ProgressEvent::TagCreation {
            created: 3,
            elapsed: Duration::from_secs(2),
        };
        assert!(tags.to_string().starts_with("tags creation took"));
    }
}
