//! Cooperative cancellation for scans and traversals.
//!
//! Long-running operations check the token at natural boundaries (one file
//! during extraction, one BFS layer during impact analysis) and return what
//! they have so far, marked [`Completion::Cancelled`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A cloneable cancellation flag shared between a caller and a running operation.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a token that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Every clone observes it.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Whether an operation ran to completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Completion {
    /// All work was done
    #[default]
    Complete,
    /// Stopped early; results are partial
    Cancelled,
}

impl Completion {
    /// `true` for [`Completion::Cancelled`].
    #[must_use]
    pub fn is_partial(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
