//! File-backed history store using JSON lines.
//!
//! Decisions and execution records go to two append-only streams,
//! `decisions.jsonl` and `executions.jsonl`, under one directory. Reads
//! re-scan the stream; the engine reads history only at startup and when
//! building a failure report.
//!
//! A crash mid-append leaves a final line without its newline. Before the
//! next append the tail is repaired: a complete record gets its newline back,
//! a fragment is cut off, so later records never glue onto it.

use std::fs::{create_dir_all, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use tracing::warn;

use crate::core::error::HistoryError;
use crate::core::history::HistoryStore;
use crate::core::model::{Decision, ExecutionRecord};
use crate::util::RequestId;

const DECISIONS_STREAM: &str = "decisions";
const EXECUTIONS_STREAM: &str = "executions";

/// Durable history under a directory of JSONL streams.
pub struct JsonlHistoryStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlHistoryStore {
    /// Open (creating if needed) a history directory.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, HistoryError> {
        let path = path.as_ref().to_path_buf();
        create_dir_all(&path)?;
        let store = Self {
            path,
            write_lock: Mutex::new(()),
        };
        for stream in [DECISIONS_STREAM, EXECUTIONS_STREAM] {
            repair_tail(&store.file_path(stream))?;
        }
        Ok(store)
    }

    /// Directory holding the streams.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn file_path(&self, stream: &str) -> PathBuf {
        self.path.join(format!("{stream}.jsonl"))
    }

    fn append<T: Serialize>(&self, stream: &str, item: &T) -> Result<(), HistoryError> {
        let line = serde_json::to_string(item)?;
        let _guard = self.write_lock.lock();
        let file_path = self.file_path(stream);
        repair_tail(&file_path)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&file_path)?;
        writeln!(file, "{line}")?;
        file.flush()?;
        Ok(())
    }

    /// Read a whole stream. A malformed final line is treated as a torn
    /// append and skipped; a malformed line anywhere else is corruption.
    fn load<T: DeserializeOwned>(&self, stream: &str) -> Result<Vec<T>, HistoryError> {
        let file_path = self.file_path(stream);
        if !file_path.exists() {
            return Ok(Vec::new());
        }
        let file = OpenOptions::new().read(true).open(&file_path)?;
        let lines = BufReader::new(file)
            .lines()
            .collect::<Result<Vec<_>, _>>()?;
        let last = lines.iter().rposition(|l| !l.trim().is_empty());

        let mut items = Vec::with_capacity(lines.len());
        for (index, line) in lines.iter().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(item) => items.push(item),
                Err(err) if Some(index) == last => {
                    warn!(
                        file = %file_path.display(),
                        line = index + 1,
                        error = %err,
                        "skipping torn final history line"
                    );
                }
                Err(err) => {
                    return Err(HistoryError::Corrupt {
                        file: file_path.display().to_string(),
                        line: index + 1,
                        reason: err.to_string(),
                    });
                }
            }
        }
        Ok(items)
    }
}

/// Make sure the stream ends with a newline. A final line that parses is
/// terminated; one that does not is truncated away. Returns whether the file
/// was touched.
fn repair_tail(file_path: &Path) -> Result<bool, HistoryError> {
    let mut file = match OpenOptions::new().read(true).write(true).open(file_path) {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err.into()),
    };
    if file.metadata()?.len() == 0 {
        return Ok(false);
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::End(-1))?;
    file.read_exact(&mut last)?;
    if last[0] == b'\n' {
        return Ok(false);
    }

    let mut contents = Vec::new();
    file.seek(SeekFrom::Start(0))?;
    file.read_to_end(&mut contents)?;
    let tail_start = contents
        .iter()
        .rposition(|b| *b == b'\n')
        .map_or(0, |i| i + 1);
    let tail = &contents[tail_start..];

    if serde_json::from_slice::<serde_json::Value>(tail).is_ok() {
        file.seek(SeekFrom::End(0))?;
        file.write_all(b"\n")?;
        warn!(file = %file_path.display(), "terminated unterminated final history line");
    } else {
        let keep = u64::try_from(tail_start).unwrap_or(u64::MAX);
        file.set_len(keep)?;
        warn!(
            file = %file_path.display(),
            dropped_bytes = tail.len(),
            "truncated torn final history line"
        );
    }
    file.flush()?;
    Ok(true)
}

impl HistoryStore for JsonlHistoryStore {
    fn append_decision(&self, decision: &Decision) -> Result<(), HistoryError> {
        self.append(DECISIONS_STREAM, decision)
    }

    fn append_execution(&self, record: &ExecutionRecord) -> Result<(), HistoryError> {
        self.append(EXECUTIONS_STREAM, record)
    }

    fn decisions_for(&self, request_id: &RequestId) -> Result<Vec<Decision>, HistoryError> {
        let mut decisions: Vec<Decision> = self.load(DECISIONS_STREAM)?;
        decisions.retain(|d| &d.request_id == request_id);
        Ok(decisions)
    }

    fn executions_for(
        &self,
        request_id: &RequestId,
    ) -> Result<Vec<ExecutionRecord>, HistoryError> {
        let mut records: Vec<ExecutionRecord> = self.load(EXECUTIONS_STREAM)?;
        records.retain(|r| &r.request_id == request_id);
        Ok(records)
    }

    fn all_executions(&self) -> Result<Vec<ExecutionRecord>, HistoryError> {
        self.load(EXECUTIONS_STREAM)
    }
}
