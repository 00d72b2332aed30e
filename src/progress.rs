//! Terminal progress indicator for long-running commands.

use std::io::{self, IsTerminal, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

const FRAMES: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];
const INTERVAL: Duration = Duration::from_millis(100);

/// Animates a message on stderr until stopped or dropped.
///
/// Nothing is drawn when stderr is not a terminal, so piped and logged runs
/// stay clean.
pub struct Spinner {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Spinner {
    pub fn start(message: impl Into<String>) -> Self {
        if !io::stderr().is_terminal() {
            return Spinner {
                stop: Arc::new(AtomicBool::new(true)),
                handle: None,
            };
        }
        Self::spawn(message.into())
    }

    fn spawn(message: String) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let handle = thread::spawn(move || {
            let mut stderr = io::stderr();
            for frame in FRAMES.iter().cycle() {
                if flag.load(Ordering::Relaxed) {
                    break;
                }
                let _ = write!(stderr, "\r{} {}", frame, message);
                let _ = stderr.flush();
                thread::sleep(INTERVAL);
            }
            // Clear the line for whatever is printed next
            let _ = write!(stderr, "\r\x1b[K");
            let _ = stderr.flush();
        });
        Spinner {
            stop,
            handle: Some(handle),
        }
    }

    /// Whether an animation thread is running
    pub fn is_active(&self) -> bool {
        self.handle.is_some()
    }

    pub fn stop(mut self) {
        self.finish();
    }

    fn finish(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Spinner {
    fn drop(&mut self) {
        self.finish();
    }
}
