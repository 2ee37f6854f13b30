//! Scripted text generator for tests and dry runs.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use super::TextGenerator;
use crate::error::{Error, Result};
use crate::prompt::Prompt;

/// One scripted reply.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// Return this text.
    Text(String),
    /// Fail with a transient error.
    Fail(String),
    /// Never answer (exceeds any timeout).
    Hang,
}

/// [`TextGenerator`] that replays a queue of scripted replies.
///
/// When the queue is empty, the fallback reply is used. Every call is counted,
/// so tests can assert exactly how many underlying calls were made.
///
/// ## Example
///
/// ```rust
/// use tipoff_flow::generation::scripted::ScriptedGenerator;
///
/// let generator = ScriptedGenerator::always(
///     r#"{"pick":"home","confidence":0.6,"rationale":"Rest edge."}"#,
/// );
/// assert_eq!(generator.calls(), 0);
/// ```
#[derive(Debug)]
pub struct ScriptedGenerator {
    queue: Mutex<VecDeque<ScriptedReply>>,
    fallback: ScriptedReply,
    delay: Duration,
    calls: AtomicUsize,
    model_id: String,
}

fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("lock poisoned")
}

impl ScriptedGenerator {
    /// Creates a generator that replays `replies`, then falls back to `fallback`.
    #[must_use]
    pub fn new(replies: impl IntoIterator<Item = ScriptedReply>, fallback: ScriptedReply) -> Self {
        Self {
            queue: Mutex::new(replies.into_iter().collect()),
            fallback,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            model_id: "scripted".to_string(),
        }
    }

    /// Creates a generator that always answers `text`.
    #[must_use]
    pub fn always(text: impl Into<String>) -> Self {
        Self::new([], ScriptedReply::Text(text.into()))
    }

    /// Creates a generator that never answers.
    #[must_use]
    pub fn hanging() -> Self {
        Self::new([], ScriptedReply::Hang)
    }

    /// Delays every reply by `delay`.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Overrides the reported model identifier.
    #[must_use]
    pub fn with_model_id(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = model_id.into();
        self
    }

    /// Number of calls made so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn complete(&self, _prompt: &Prompt) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let reply = {
            let mut queue = self.queue.lock().map_err(poison_err)?;
            queue.pop_front().unwrap_or_else(|| self.fallback.clone())
        };
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match reply {
            ScriptedReply::Text(text) => Ok(text),
            ScriptedReply::Fail(message) => Err(Error::transient(message)),
            ScriptedReply::Hang => {
                std::future::pending::<()>().await;
                Err(Error::transient("unreachable"))
            }
        }
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}
