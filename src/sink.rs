//! Per-video comment output files
//!
//! Each video's comments go to `<output_dir>/<prefix>_<video id>.txt`, one
//! `Comment from <author>: <text>` line per record. Files are opened in
//! append+create mode so repeated runs accumulate rather than overwrite.

use crate::config::OutputConfig;
use crate::error::Result;
use crate::types::{CommentRecord, VideoId};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Factory for per-video output handles
#[derive(Clone, Debug)]
pub struct CommentSink {
    output_dir: PathBuf,
    file_prefix: String,
}

impl CommentSink {
    /// Sink writing `<file_prefix>_<id>.txt` files into `output_dir`
    pub fn new(output_dir: impl Into<PathBuf>, file_prefix: impl Into<String>) -> Self {
        Self {
            output_dir: output_dir.into(),
            file_prefix: file_prefix.into(),
        }
    }

    /// Sink described by the output config section
    pub fn from_config(config: &OutputConfig) -> Self {
        Self::new(&config.output_dir, &config.file_prefix)
    }

    /// Directory files are written into
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// File a video's comments are appended to
    pub fn output_path(&self, id: &VideoId) -> PathBuf {
        self.output_dir
            .join(format!("{}_{}.txt", self.file_prefix, id))
    }

    /// Open (creating if needed) the output file for `id`
    ///
    /// The output directory is created if it does not exist.
    pub fn open(&self, id: &VideoId) -> Result<SinkHandle> {
        std::fs::create_dir_all(&self.output_dir)?;
        let path = self.output_path(id);
        let file = OpenOptions::new().append(true).create(true).open(&path)?;

        tracing::debug!(video_id = %id, path = %path.display(), "opened comment file");

        Ok(SinkHandle {
            file,
            path,
            records_written: 0,
        })
    }
}

/// Open output file for one video
///
/// Writes are unbuffered: every [`append`](Self::append) is handed to the OS
/// as one `write` of one complete line, so nothing is pending when the handle
/// is dropped on an error or panic path, and concurrent appenders to the same
/// file never split each other's lines.
#[derive(Debug)]
pub struct SinkHandle {
    file: File,
    path: PathBuf,
    records_written: usize,
}

impl SinkHandle {
    /// Append one record as a single line
    pub fn append(&mut self, record: CommentRecord) -> Result<()> {
        let line = record.to_line();
        self.file.write_all(line.as_bytes())?;
        self.records_written += 1;
        Ok(())
    }

    /// Append records in order, stopping at the first write error
    pub fn append_all(&mut self, records: impl IntoIterator<Item = CommentRecord>) -> Result<usize> {
        let mut count = 0;
        for record in records {
            self.append(record)?;
            count += 1;
        }
        Ok(count)
    }

    /// Output file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records appended through this handle
    pub fn records_written(&self) -> usize {
        self.records_written
    }

    /// Sync the file to disk and release it, returning the number of records written
    pub fn close(self) -> Result<usize> {
        self.file.sync_data()?;
        tracing::debug!(
            path = %self.path.display(),
            records = self.records_written,
            "closed comment file"
        );
        Ok(self.records_written)
    }
}
