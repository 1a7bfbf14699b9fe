//! Status and progress notifications.
//!
//! A [`Session`](crate::Session) reports human readable status lines and
//! per-operation progress to an [`EventSink`] it owns, so front ends can
//! render them without the engine knowing how.

use log::{debug, error, info};

/// Receiver of session status and progress.
pub trait EventSink: Send {
    /// A status line. `is_error` is set when the line describes a failure.
    fn on_status(&mut self, _text: &str, _is_error: bool) {}

    /// Progress of the current operation, `0..=100`.
    fn on_progress(&mut self, _percent: u32) {}
}

/// Sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {}

/// Sink that forwards status lines to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EventSink for LogSink {
    fn on_status(&mut self, text: &str, is_error: bool) {
        if is_error {
            error!("{text}");
        } else {
            info!("{text}");
        }
    }

    fn on_progress(&mut self, percent: u32) {
        debug!("Progress {percent}%");
    }
}

impl<S: EventSink + ?Sized> EventSink for Box<S> {
    fn on_status(&mut self, text: &str, is_error: bool) {
        (**self).on_status(text, is_error);
    }

    fn on_progress(&mut self, percent: u32) {
        (**self).on_progress(percent);
    }
}

/// Percentage of `done` out of `total`, clamped to 100.
pub(crate) fn percent(done: u64, total: u64) -> u32 {
    if total == 0 {
        return 100;
    }
    ((done.min(total) * 100) / total) as u32
}

#[cfg(test)]
pub(crate) mod testing {
    use super::EventSink;
    use std::sync::{Arc, Mutex};

    /// Sink that records everything it receives behind a shared handle.
    #[derive(Debug, Default, Clone)]
    pub struct RecordingSink {
        pub statuses: Arc<Mutex<Vec<(String, bool)>>>,
        pub progress: Arc<Mutex<Vec<u32>>>,
    }

    impl RecordingSink {
        pub fn errors(&self) -> Vec<String> {
            self.statuses
                .lock()
                .unwrap()
                .iter()
                .filter(|(_, is_error)| *is_error)
                .map(|(text, _)| text.clone())
                .collect()
        }

        pub fn progress(&self) -> Vec<u32> {
            self.progress.lock().unwrap().clone()
        }
    }

    impl EventSink for RecordingSink {
        fn on_status(&mut self, text: &str, is_error: bool) {
            self.statuses
                .lock()
                .unwrap()
                .push((text.to_string(), is_error));
        }

        fn on_progress(&mut self, percent: u32) {
            self.progress.lock().unwrap().push(percent);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::RecordingSink;
    use super::*;

    #[test]
    fn test_percent() {
        assert_eq!(percent(0, 10), 0);
        assert_eq!(percent(5, 10), 50);
        assert_eq!(percent(10, 10), 100);
        assert_eq!(percent(12, 10), 100);
        assert_eq!(percent(0, 0), 100);
    }

    #[test]
    fn test_boxed_sink_forwards() {
        let recorder = RecordingSink::default();
        let mut boxed: Box<dyn EventSink> = Box::new(recorder.clone());
        boxed.on_status("Connected", false);
        boxed.on_status("Timed out", true);
        boxed.on_progress(42);

        assert_eq!(recorder.errors(), vec!["Timed out".to_string()]);
        assert_eq!(recorder.progress(), vec![42]);
    }

    #[test]
    fn test_null_and_log_sinks_accept_events() {
        let mut null = NullSink;
        null.on_status("ignored", false);
        null.on_progress(10);

        let mut log_sink = LogSink;
        log_sink.on_status("info line", false);
        log_sink.on_status("error line", true);
        log_sink.on_progress(100);
    }
}
