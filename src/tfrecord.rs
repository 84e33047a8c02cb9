//! TFRecord files of raw protobuf payloads.
//!
//! Framing and checksums come from the `tfrecord` crate; payloads are
//! encoded and decoded with prost on either side.

use log::debug;
use prost::Message;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tfrecord::{BytesReader, BytesWriter, RecordReaderInit, RecordWriterInit};

use crate::error::{PipelineError, Result};

/// Sequential writer of one TFRecord file.
///
/// The file is truncated on creation. Call [`RecordWriter::close`] to flush
/// and sync; dropping the writer flushes on a best-effort basis.
pub struct RecordWriter {
    path: PathBuf,
    writer: Option<BytesWriter<BufWriter<File>>>,
    records_written: usize,
}

impl RecordWriter {
    pub fn create(path: &Path) -> Result<Self> {
        let writer = RecordWriterInit::create(path).map_err(|e| write_error(path, e))?;
        debug!("Opened record writer for {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            writer: Some(writer),
            records_written: 0,
        })
    }

    /// Append one raw record payload.
    pub fn write_record(&mut self, data: Vec<u8>) -> Result<()> {
        let path = &self.path;
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| write_error(path, "writer is closed"))?;
        writer.send(data).map_err(|e| write_error(path, e))?;
        self.records_written += 1;
        Ok(())
    }

    /// Encode and append one protobuf message.
    pub fn append<M: Message>(&mut self, message: &M) -> Result<()> {
        self.write_record(message.encode_to_vec())
    }

    pub fn records_written(&self) -> usize {
        self.records_written
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush buffered records, release the handle and sync the file to disk.
    pub fn close(mut self) -> Result<usize> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush().map_err(|e| write_error(&self.path, e))?;
            drop(writer);
            OpenOptions::new()
                .write(true)
                .open(&self.path)
                .and_then(|file| file.sync_all())
                .map_err(|e| PipelineError::write(&self.path, e))?;
        }
        Ok(self.records_written)
    }
}

fn write_error(path: &Path, reason: impl ToString) -> PipelineError {
    PipelineError::write(
        path,
        std::io::Error::new(std::io::ErrorKind::Other, reason.to_string()),
    )
}

/// Iterator over the raw payloads of a TFRecord file, checksums verified.
///
/// Stops after the first error; a clean end of file between records ends the
/// iteration.
pub struct RecordReader {
    records: BytesReader<BufReader<File>>,
    context: String,
    index: usize,
    failed: bool,
}

impl RecordReader {
    pub fn open(path: &Path) -> Result<Self> {
        let context = path.display().to_string();
        let records = RecordReaderInit {
            check_integrity: true,
        }
        .open(path)
        .map_err(|e| PipelineError::decode(context.clone(), e))?;
        Ok(Self {
            records,
            context,
            index: 0,
            failed: false,
        })
    }
}

impl Iterator for RecordReader {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.records.next()? {
            Ok(data) => {
                self.index += 1;
                Some(Ok(data))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(PipelineError::decode(
                    format!("{} record {}", self.context, self.index),
                    e,
                )))
            }
        }
    }
}
