//! Input document descriptors and their processing state

use std::fmt;
use std::path::PathBuf;

/// Processing state of a discovered document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentState {
    Discovered,
    Segmented,
    Dispatched,
    Merged,
    Written,
    Failed,
}

impl DocumentState {
    /// Terminal states retire the document from the run.
    pub fn is_terminal(self) -> bool {
        matches!(self, DocumentState::Written | DocumentState::Failed)
    }

    fn can_advance_to(self, next: DocumentState) -> bool {
        use DocumentState::*;
        match (self, next) {
            (Written | Failed, _) => false,
            (_, Failed) => true,
            (Discovered, Segmented)
            | (Segmented, Dispatched)
            | (Dispatched, Merged)
            | (Merged, Written) => true,
            _ => false,
        }
    }
}

impl fmt::Display for DocumentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DocumentState::Discovered => "discovered",
            DocumentState::Segmented => "segmented",
            DocumentState::Dispatched => "dispatched",
            DocumentState::Merged => "merged",
            DocumentState::Written => "written",
            DocumentState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// A PDF accepted by discovery
#[derive(Debug, Clone)]
pub struct Document {
    /// Location of the original file
    pub path: PathBuf,
    /// Stable name used to derive unit identities
    pub name: String,
    /// Number of pages, known once segmented
    pub page_count: Option<u32>,
    state: DocumentState,
}

impl Document {
    pub fn new(path: PathBuf, name: String) -> Self {
        Self {
            path,
            name,
            page_count: None,
            state: DocumentState::Discovered,
        }
    }

    pub fn state(&self) -> DocumentState {
        self.state
    }

    /// Move to `next`, ignoring transitions the state machine does not allow.
    /// Returns whether the transition happened.
    pub fn advance(&mut self, next: DocumentState) -> bool {
        if self.state.can_advance_to(next) {
            tracing::debug!(document = %self.name, from = %self.state, to = %next, "document state");
            self.state = next;
            true
        } else {
            false
        }
    }

    /// Record a terminal failure.
    pub fn fail(&mut self) {
        self.advance(DocumentState::Failed);
    }
}
