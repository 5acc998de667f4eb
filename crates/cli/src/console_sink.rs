//! Progress sink printing phase timings to stdout.

use vault2git_core::progress::{ProgressEvent, ProgressSink, Signal};

use crate::style;

/// Prints one line per progress event when enabled. Never asks to stop.
#[derive(Debug, Clone, Copy)]
pub struct ConsoleProgress {
    enabled: bool,
}

impl ConsoleProgress {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }
}

impl ProgressSink for ConsoleProgress {
    fn report(&mut self, event: &ProgressEvent) -> Signal {
        if self.enabled {
            println!("{}", render(event));
        }
        Signal::Continue
    }
}

fn render(event: &ProgressEvent) -> String {
    match event {
        ProgressEvent::Init { branch, .. } => {
            format!("{} {}", style::branch(branch), style::dim(&event.to_string()))
        }
        ProgressEvent::Version { .. } => event.to_string(),
        ProgressEvent::Gc { .. } | ProgressEvent::Finalize { .. } => style::dim(&event.to_string()),
        ProgressEvent::TagCreation { .. } => style::header(&event.to_string()),
    }
}
