//! Append-only persistence of journal messages.

use std::{
    fs::{File, OpenOptions},
    io::{BufRead, BufReader, Write},
    path::{Path, PathBuf},
};

use auto_impl::auto_impl;
use tracing::{trace, warn};

mod message;
pub use message::*;

/// Errors of a journal backend.
#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    /// Reading or writing the journal file failed.
    #[error("journal I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// A message could not be serialized.
    #[error("failed to serialize journal message: {0}")]
    Serialize(#[source] serde_json::Error),
    /// A complete journal line is not a valid message.
    #[error("corrupt journal entry at line {line}: {source}")]
    Corrupt {
        /// 1-based line number.
        line: usize,
        /// Parse error.
        source: serde_json::Error,
    },
}

/// An append-only, ordered store of journal messages.
///
/// `record` must only return once the message is durable: the engine treats a recorded message as
/// having happened, and a message that was not recorded as not having happened.
#[auto_impl(&mut, Box)]
pub trait Journal {
    /// Durably appends a message.
    fn record(&mut self, message: &JournalMessage) -> Result<(), JournalError>;

    /// Reads every recorded message in order.
    fn read(&self) -> Result<Vec<JournalMessage>, JournalError>;
}

/// A journal kept in memory, for tests and dry runs.
#[derive(Debug, Clone, Default)]
pub struct MemoryJournal {
    messages: Vec<JournalMessage>,
}

impl MemoryJournal {
    /// Creates an empty journal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a journal with the given messages already recorded.
    pub const fn from_messages(messages: Vec<JournalMessage>) -> Self {
        Self { messages }
    }

    /// Returns the recorded messages.
    pub fn messages(&self) -> &[JournalMessage] {
        &self.messages
    }
}

impl Journal for MemoryJournal {
    fn record(&mut self, message: &JournalMessage) -> Result<(), JournalError> {
        self.messages.push(message.clone());
        Ok(())
    }

    fn read(&self) -> Result<Vec<JournalMessage>, JournalError> {
        Ok(self.messages.clone())
    }
}

/// A journal stored as JSON Lines, one message per line.
///
/// Every append is synced to disk before `record` returns. A trailing line without a newline is a
/// write torn by a crash; it is truncated when the journal is opened.
#[derive(Debug)]
pub struct FileJournal {
    path: PathBuf,
    file: File,
}

impl FileJournal {
    /// Opens the journal at `path`, creating it if missing.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, JournalError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).read(true).append(true).open(&path)?;
        let journal = Self { path, file };
        journal.truncate_torn_tail()?;
        Ok(journal)
    }

    /// Returns the journal path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn truncate_torn_tail(&self) -> Result<(), JournalError> {
        let contents = std::fs::read(&self.path)?;
        if contents.is_empty() || contents.ends_with(b"\n") {
            return Ok(());
        }
        let keep = contents.iter().rposition(|b| *b == b'\n').map_or(0, |pos| pos + 1);
        warn!(
            path = %self.path.display(),
            dropped_bytes = contents.len() - keep,
            "Discarding torn journal tail"
        );
        self.file.set_len(keep as u64)?;
        self.file.sync_all()?;
        Ok(())
    }
}

impl Journal for FileJournal {
    fn record(&mut self, message: &JournalMessage) -> Result<(), JournalError> {
        let mut line = serde_json::to_string(message).map_err(JournalError::Serialize)?;
        line.push('\n');
        self.file.write_all(line.as_bytes())?;
        self.file.sync_data()?;
        trace!(kind = message.kind(), future_id = ?message.future_id(), "Recorded journal message");
        Ok(())
    }

    fn read(&self) -> Result<Vec<JournalMessage>, JournalError> {
        let reader = BufReader::new(File::open(&self.path)?);
        let mut messages = Vec::new();
        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let message = serde_json::from_str(&line)
                .map_err(|source| JournalError::Corrupt { line: index + 1, source })?;
            messages.push(message);
        }
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_start(chain_id: u64) -> JournalMessage {
        JournalMessage::RunStart { chain_id }
    }

    #[test]
    fn test_file_journal_persists_across_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deployment").join("journal.jsonl");

        let mut journal = FileJournal::open(&path).unwrap();
        journal.record(&run_start(1)).unwrap();
        journal.record(&run_start(2)).unwrap();
        drop(journal);

        let journal = FileJournal::open(&path).unwrap();
        assert_eq!(journal.read().unwrap(), vec![run_start(1), run_start(2)]);

        let raw = std::fs::read_to_string(&path).unwrap();
        assert_eq!(raw.lines().next().unwrap(), r#"{"type":"RUN_START","chainId":1}"#);
    }

    #[test]
    fn test_torn_tail_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.jsonl");
        {
            let mut journal = FileJournal::open(&path).unwrap();
            journal.record(&run_start(1)).unwrap();
        }
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(br#"{"type":"RUN_ST"#).unwrap();
        drop(file);

        let mut journal = FileJournal::open(&path).unwrap();
        assert_eq!(journal.read().unwrap(), vec![run_start(1)]);
        journal.record(&run_start(3)).unwrap();
        assert_eq!(journal.read().unwrap(), vec![run_start(1), run_start(3)]);
    }

    #[test]
    fn test_corrupt_line_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.jsonl");
        std::fs::write(&path, "{\"type\":\"RUN_START\",\"chainId\":1}\nnot json\n").unwrap();

        let journal = FileJournal::open(&path).unwrap();
        assert!(matches!(journal.read(), Err(JournalError::Corrupt { line: 2, .. })));
    }
}
