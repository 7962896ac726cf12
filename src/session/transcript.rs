use std::fmt;
use std::sync::{Mutex, MutexGuard};

use crate::capture::CapturedImage;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sender {
    You,
    Assistant,
    System,
}

impl Sender {
    pub const fn label(self) -> &'static str {
        match self {
            Self::You => "You",
            Self::Assistant => "Assistant",
            Self::System => "System",
        }
    }
}

impl fmt::Display for Sender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone)]
pub enum TranscriptEntry {
    Text { sender: Sender, body: String },
    ImageRef { sender: Sender, image: CapturedImage },
    LoadingMarker { label: String, tick: u32 },
}

impl TranscriptEntry {
    pub fn text(sender: Sender, body: impl Into<String>) -> Self {
        Self::Text {
            sender,
            body: body.into(),
        }
    }

    pub fn error(sender: Sender, message: impl fmt::Display) -> Self {
        Self::Text {
            sender,
            body: format!("Error: {message}"),
        }
    }

    pub const fn is_loading_marker(&self) -> bool {
        matches!(self, Self::LoadingMarker { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TranscriptError {
    #[error("a loading marker is already present")]
    MarkerAlreadyPresent,
}

/// Ordered record of the conversation.
///
/// Entries are only ever appended. The single exception is the trailing
/// loading marker, which is updated in place while a request is pending and
/// replaced by the outcome once it completes. While a marker is present it is
/// always the last entry.
#[derive(Debug, Default)]
pub struct Transcript {
    entries: Mutex<Vec<TranscriptEntry>>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<TranscriptEntry>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!("transcript lock was poisoned; continuing with inner state");
                poisoned.into_inner()
            }
        }
    }

    /// Appends a regular entry. If a loading marker is pending, the entry goes
    /// in just ahead of it so the marker stays last.
    pub fn append(&self, entry: TranscriptEntry) {
        debug_assert!(!entry.is_loading_marker());
        let mut entries = self.lock();
        match entries.last() {
            Some(last) if last.is_loading_marker() => {
                let index = entries.len() - 1;
                entries.insert(index, entry);
            }
            _ => entries.push(entry),
        }
    }

    pub fn append_all(&self, new_entries: impl IntoIterator<Item = TranscriptEntry>) {
        let mut entries = self.lock();
        let marker = match entries.last() {
            Some(last) if last.is_loading_marker() => entries.pop(),
            _ => None,
        };
        entries.extend(new_entries);
        entries.extend(marker);
    }

    pub fn push_loading_marker(&self, label: impl Into<String>) -> Result<(), TranscriptError> {
        let mut entries = self.lock();
        if entries.iter().any(TranscriptEntry::is_loading_marker) {
            return Err(TranscriptError::MarkerAlreadyPresent);
        }
        entries.push(TranscriptEntry::LoadingMarker {
            label: label.into(),
            tick: 0,
        });
        Ok(())
    }

    /// Updates the pending marker's label. Returns `false` when no marker is
    /// present, which is how a late tick finds out it has nothing to do.
    pub fn update_loading_marker(&self, label: impl Into<String>, tick: u32) -> bool {
        let mut entries = self.lock();
        match entries.last_mut() {
            Some(TranscriptEntry::LoadingMarker {
                label: current,
                tick: current_tick,
            }) => {
                *current = label.into();
                *current_tick = tick;
                true
            }
            _ => false,
        }
    }

    /// Swaps the trailing loading marker for `entry`. Without a marker the
    /// entry is appended instead and `false` is returned.
    pub fn replace_loading_marker(&self, entry: TranscriptEntry) -> bool {
        let mut entries = self.lock();
        if let Some(last) = entries.last_mut() {
            if last.is_loading_marker() {
                *last = entry;
                return true;
            }
        }
        entries.push(entry);
        false
    }

    pub fn snapshot(&self) -> Vec<TranscriptEntry> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn loading_marker_count(&self) -> usize {
        self.lock()
            .iter()
            .filter(|entry| entry.is_loading_marker())
            .count()
    }
}
