//! Mock collaborators: loggers and error sinks

use crossbeam_channel::{unbounded, Receiver};
use parking_lot::Mutex;
use relay_dispatch::{DispatchFailure, ErrorCallback, Logger};
use std::sync::Arc;

/// Logger that keeps every message
#[derive(Default)]
pub struct RecordingLogger {
    messages: Mutex<Vec<(String, String)>>,
}

impl RecordingLogger {
    pub fn messages(&self) -> Vec<(String, String)> {
        self.messages.lock().clone()
    }

    /// Messages mentioning `needle`
    pub fn matching(&self, needle: &str) -> Vec<String> {
        self.messages
            .lock()
            .iter()
            .filter(|(_, message)| message.contains(needle))
            .map(|(_, message)| message.clone())
            .collect()
    }
}

impl Logger for RecordingLogger {
    fn print(&self, tag: &str, message: &str) {
        self.messages.lock().push((tag.to_string(), message.to_string()));
    }
}

/// Error callback forwarding failures, with the delivering thread's name,
/// to a channel
pub fn channel_error_callback() -> (Arc<dyn ErrorCallback>, Receiver<(DispatchFailure, String)>) {
    let (tx, rx) = unbounded();
    let callback: Arc<dyn ErrorCallback> = Arc::new(move |failure: DispatchFailure| {
        let thread = std::thread::current().name().unwrap_or_default().to_string();
        let _ = tx.send((failure, thread));
    });
    (callback, rx)
}
