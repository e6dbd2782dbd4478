//! JSON-lines backed message history.
//!
//! One message per line, appended as the conversation grows. Opening an
//! existing file replays it.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use super::MessageHistory;
use crate::agent::tokens::TokenCounter;
use crate::prompt::ChatMessage;
use crate::Result;

/// File-backed message history
#[derive(Debug)]
pub struct JsonlMessageHistory {
    path: PathBuf,
    messages: Vec<ChatMessage>,
    counter: TokenCounter,
}

impl JsonlMessageHistory {
    /// Open (or start) the history stored at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_counter(path, TokenCounter::new())
    }

    pub fn open_with_counter(path: impl AsRef<Path>, counter: TokenCounter) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let mut messages = Vec::new();
        if path.exists() {
            let file = File::open(&path)?;
            for line in BufReader::new(file).lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                messages.push(serde_json::from_str(&line)?);
            }
            debug!("Replayed {} messages from {:?}", messages.len(), path);
        }

        Ok(Self {
            path,
            messages,
            counter,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MessageHistory for JsonlMessageHistory {
    fn add(&mut self, message: ChatMessage) -> Result<()> {
        // Create directory if needed
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", serde_json::to_string(&message)?)?;

        self.messages.push(message);
        Ok(())
    }

    fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    fn counter(&self) -> &TokenCounter {
        &self.counter
    }

    fn clear(&mut self) -> Result<()> {
        if self.path.exists() {
            fs::write(&self.path, "")?;
        }
        self.messages.clear();
        Ok(())
    }
}
