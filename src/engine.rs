use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("tokenizer error: {0}")]
    Tokenizer(String),
    #[error("model execution failed: {0}")]
    Inference(String),
    #[error("generation cancelled")]
    Cancelled,
}

/// Which model is loaded and where. Fixed at startup.
#[derive(Debug, Clone, Serialize)]
pub struct ModelIdentity {
    pub name: String,
    pub device: String,
}

/// Per-call generation settings handed to the engine. Engines always sample
/// a single sequence and pad with the end-of-sequence token.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationSettings {
    pub temperature: f64,
    pub top_k: i64,
    /// Cap on the whole sequence, prompt tokens included.
    pub max_length: usize,
}

impl GenerationSettings {
    pub fn sampling(temperature: f64, top_k: i64, max_length: usize) -> Self {
        Self {
            temperature,
            top_k,
            max_length,
        }
    }
}

/// Set by the invoker once a caller stops waiting. Engines check it between
/// decoding steps.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Cancels when the returned guard is dropped.
    pub fn cancel_on_drop(&self) -> CancelGuard {
        CancelGuard(self.clone())
    }
}

#[must_use = "the flag is cancelled as soon as the guard is dropped"]
#[derive(Debug)]
pub struct CancelGuard(CancelFlag);

impl Drop for CancelGuard {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

/// A loaded causal language model.
///
/// `generate` blocks and returns the decoded sequence, prompt included.
/// Implementations are shared across requests; the invoker bounds how many
/// calls run at once.
pub trait GenerationEngine: Send + Sync + 'static {
    fn identity(&self) -> &ModelIdentity;

    fn generate(
        &self,
        prompt: &str,
        settings: &GenerationSettings,
        cancel: &CancelFlag,
    ) -> Result<String, EngineError>;
}
