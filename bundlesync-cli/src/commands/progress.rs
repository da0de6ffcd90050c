//! Terminal progress bars keyed by task label.

use std::collections::HashMap;
use std::time::Duration;

use bundlesync::{ProgressEvent, ProgressSink};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use parking_lot::Mutex;

/// Progress sink that draws one bar per task label.
pub struct BarSink {
    multi: MultiProgress,
    bars: Mutex<HashMap<String, ProgressBar>>,
}

impl Default for BarSink {
    fn default() -> Self {
        Self::new()
    }
}

impl BarSink {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            bars: Mutex::new(HashMap::new()),
        }
    }

    /// Finish every bar still running.
    pub fn finish_all(&self) {
        for bar in self.bars.lock().values() {
            if !bar.is_finished() {
                bar.finish_and_clear();
            }
        }
    }

    fn create_bar(&self, task: &str, bytes: bool) -> ProgressBar {
        let bar = self.multi.add(ProgressBar::new(0));
        let template = if bytes {
            "{prefix:>24} [{bar:30.green/dim}] {bytes}/{total_bytes} {bytes_per_sec} {msg}"
        } else {
            "{prefix:>24} [{bar:30.cyan/dim}] {pos}/{len} {msg}"
        };
        let style = ProgressStyle::default_bar()
            .template(template)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("##-");
        bar.set_style(style);
        bar.set_prefix(task.to_string());
        bar.enable_steady_tick(Duration::from_millis(200));
        bar
    }
}

/// Byte-counting tasks are downloads; the rest count files.
fn is_byte_task(task: &str) -> bool {
    task.starts_with("download:") || task.starts_with("preload:") || task == "install"
}

impl ProgressSink for BarSink {
    fn emit(&self, event: ProgressEvent) {
        let mut bars = self.bars.lock();
        let bar = match bars.get(&event.task) {
            Some(bar) => bar.clone(),
            None => {
                let bar = self.create_bar(&event.task, is_byte_task(&event.task));
                bars.insert(event.task.clone(), bar.clone());
                bar
            }
        };
        drop(bars);

        if event.total > 0 {
            bar.set_length(event.total);
            bar.set_position(event.current);
        }
        if let Some(message) = event.message.clone() {
            bar.set_message(message);
        }
        if event.is_complete() && !bar.is_finished() {
            bar.finish();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_tasks() {
        assert!(is_byte_task("download:pack.zip"));
        assert!(is_byte_task("preload:a.jar"));
        assert!(is_byte_task("install"));
        assert!(!is_byte_task("items"));
        assert!(!is_byte_task("extract"));
    }

    #[test]
    fn test_one_bar_per_task() {
        let sink = BarSink::new();
        sink.emit(ProgressEvent::new("items", 1, 3));
        sink.emit(ProgressEvent::new("items", 2, 3));
        sink.emit(ProgressEvent::new("download:a.zip", 10, 100));

        let bars = sink.bars.lock();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars["items"].position(), 2);
        assert_eq!(bars["download:a.zip"].length(), Some(100));
    }

    #[test]
    fn test_complete_event_finishes_bar() {
        let sink = BarSink::new();
        sink.emit(ProgressEvent::new("items", 3, 3));
        assert!(sink.bars.lock()["items"].is_finished());
    }
}
