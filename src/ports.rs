//! Host-provided capabilities: user confirmation, progress reporting and
//! cancellation of batch jobs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

// ============================================================================
// Confirmation
// ============================================================================

/// How strongly a rotation prompt should be worded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptSeverity {
    Recommended,
    /// Shown after the user skipped too many scheduled rotations.
    Forced,
}

/// What the user is being asked to approve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prompt {
    /// One-time encryption of existing plaintext contacts.
    Migration,
    /// A rotation that came due on schedule.
    ScheduledRotation {
        severity: PromptSeverity,
        interval_days: u32,
    },
    /// A rotation the user asked for.
    ManualRotation,
}

/// Yes/no confirmation supplied by the host UI.
///
/// The core never prompts on its own; every interactive decision goes
/// through this port so batch jobs can be driven without a UI.
#[async_trait]
pub trait Confirmation: Send + Sync {
    async fn confirm(&self, prompt: &Prompt) -> bool;
}

/// Answers every prompt the same way.
#[derive(Debug, Clone, Copy)]
pub struct StaticConfirmation(pub bool);

#[async_trait]
impl Confirmation for StaticConfirmation {
    async fn confirm(&self, _prompt: &Prompt) -> bool {
        self.0
    }
}

// ============================================================================
// Progress
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Migration,
    Rotation,
}

/// Progress of a batch job, reported after each record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    pub job: JobKind,
    pub processed: usize,
    pub total: usize,
}

impl Progress {
    /// Completed fraction in `0.0..=1.0`. An empty job counts as complete.
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.processed as f64 / self.total as f64
        }
    }
}

pub type ProgressCallback = Arc<dyn Fn(&Progress) + Send + Sync>;

pub(crate) fn report(callback: Option<&ProgressCallback>, progress: Progress) {
    if let Some(cb) = callback {
        cb(&progress);
    }
}

// ============================================================================
// Cancellation
// ============================================================================

/// Shared cancellation flag, checked between records.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Optional hooks for a batch job.
#[derive(Clone, Default)]
pub struct JobOptions {
    pub on_progress: Option<ProgressCallback>,
    pub cancel: Option<CancelToken>,
}

impl JobOptions {
    pub fn with_progress(mut self, cb: impl Fn(&Progress) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Arc::new(cb));
        self
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelToken::is_cancelled)
    }
}

impl std::fmt::Debug for JobOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobOptions")
            .field("on_progress", &self.on_progress.is_some())
            .field("cancel", &self.cancel)
            .finish()
    }
}
