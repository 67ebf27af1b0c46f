//! Per-job log
//!
//! Collects the narrative of one model job; the lines end up in the
//! `model.log` file of the result archive.

use std::path::Path;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Default)]
pub struct JobLog {
    lines: Arc<Mutex<Vec<String>>>,
}

impl JobLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, line: impl Into<String>) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(line.into());
        }
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }

    pub fn write_to(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let mut contents = self.lines().join("\n");
        contents.push('\n');
        std::fs::write(path, contents)
    }
}
