// Metrics sinks for training summaries
// Scalars go to a JSONL file, stdout, tracing, memory, or nowhere

use crate::errors::{PrefError, PrefResult, SafeLock};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::info;
use uuid::Uuid;

/// Receives named scalars tagged with an iteration index.
pub trait MetricsSink {
    fn add_scalar(&mut self, tag: &str, value: f64, step: usize) -> PrefResult<()>;

    fn flush(&mut self) -> PrefResult<()> {
        Ok(())
    }
}

/// One written scalar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalarEvent {
    pub tag: String,
    pub value: f64,
    pub step: usize,
    pub wall_time: DateTime<Utc>,
}

impl ScalarEvent {
    fn new(tag: &str, value: f64, step: usize) -> Self {
        Self {
            tag: tag.to_string(),
            value,
            step,
            wall_time: Utc::now(),
        }
    }
}

pub enum SummaryTarget {
    Stdout,
    File(BufWriter<File>),
    Tracing,
    Discard,
}

pub struct SummaryWriter {
    target: SummaryTarget,
    path: Option<PathBuf>,
}

impl SummaryWriter {
    pub fn new(target: SummaryTarget) -> Self {
        Self { target, path: None }
    }

    /// Append to `path`, creating parent directories as needed.
    pub fn to_file<P: AsRef<Path>>(path: P) -> PrefResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| PrefError::io(format!("creating {}", parent.display()), e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| PrefError::io(format!("opening summary log {}", path.display()), e))?;

        Ok(Self {
            target: SummaryTarget::File(BufWriter::new(file)),
            path: Some(path.to_path_buf()),
        })
    }

    /// Fresh run directory `<log_dir>/<timestamp>_<run id>/scalars.jsonl`.
    /// Runs started in the same millisecond still get distinct directories.
    pub fn in_run_dir<P: AsRef<Path>>(log_dir: P) -> PrefResult<Self> {
        let run_id = Uuid::new_v4().simple().to_string();
        let run = format!("{}_{}", Utc::now().format("%Y%m%d_%H%M%S_%3f"), &run_id[..8]);
        Self::to_file(log_dir.as_ref().join(run).join("scalars.jsonl"))
    }

    pub fn stdout() -> Self {
        Self::new(SummaryTarget::Stdout)
    }

    pub fn tracing() -> Self {
        Self::new(SummaryTarget::Tracing)
    }

    pub fn discard() -> Self {
        Self::new(SummaryTarget::Discard)
    }

    /// Backing file, if writing to one.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

impl MetricsSink for SummaryWriter {
    fn add_scalar(&mut self, tag: &str, value: f64, step: usize) -> PrefResult<()> {
        let event = ScalarEvent::new(tag, value, step);

        match &mut self.target {
            SummaryTarget::Stdout => {
                println!("{}", serde_json::to_string(&event)?);
            }
            SummaryTarget::File(writer) => {
                serde_json::to_writer(&mut *writer, &event)
                    .map_err(|e| PrefError::sink(format!("failed to encode scalar: {e}")))?;
                writeln!(writer).map_err(|e| PrefError::sink(format!("failed to write scalar: {e}")))?;
            }
            SummaryTarget::Tracing => {
                info!(tag = %event.tag, value = event.value, step = event.step, "summary");
            }
            SummaryTarget::Discard => {}
        }

        Ok(())
    }

    fn flush(&mut self) -> PrefResult<()> {
        if let SummaryTarget::File(writer) = &mut self.target {
            writer
                .flush()
                .map_err(|e| PrefError::sink(format!("failed to flush summary log: {e}")))?;
        }
        Ok(())
    }
}

impl Drop for SummaryWriter {
    fn drop(&mut self) {
        let _ = MetricsSink::flush(self);
    }
}

/// Keeps scalars in memory. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<ScalarEvent>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> PrefResult<Vec<ScalarEvent>> {
        Ok(self.events.safe_lock()?.clone())
    }
}

impl MetricsSink for MemorySink {
    fn add_scalar(&mut self, tag: &str, value: f64, step: usize) -> PrefResult<()> {
        self.events.safe_lock()?.push(ScalarEvent::new(tag, value, step));
        Ok(())
    }
}

impl<S: MetricsSink + ?Sized> MetricsSink for Box<S> {
    fn add_scalar(&mut self, tag: &str, value: f64, step: usize) -> PrefResult<()> {
        (**self).add_scalar(tag, value, step)
    }

    fn flush(&mut self) -> PrefResult<()> {
        (**self).flush()
    }
}
