//! The opaque generation capability.
//!
//! The protocol core never sees a model: it consumes a
//! [`GenerationEngine`] as a lazy, finite, non-restartable sequence of
//! token-text chunks. Dropping the stream aborts generation; there is
//! no resume.
//!
//! Two implementations ship here: [`SimulatedEngine`] (deterministic
//! canned completion, standing in for the real accelerator-backed
//! engine) and [`ScriptedEngine`] (exact chunk/error script, for
//! exercising failure paths).

use std::pin::Pin;
use std::time::Duration;

use futures::Stream;
use shroud_core::config::{AttentionBackend, EngineConfig, QuantizationMode};
use tracing::{info, warn};

use crate::error::WorkerError;

/// Error reported by the generation capability.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("generation failed: {0}")]
pub struct EngineError(pub String);

/// Lazy, finite chunk sequence. Ends with `None`; an `Err` item is
/// terminal and no further chunks follow.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<String, EngineError>> + Send>>;

/// The opaque text-generation capability inside a worker.
pub trait GenerationEngine: Send + Sync {
    /// Start generating for `prompt`. The returned stream is
    /// non-restartable: once consumed or dropped, generation for this
    /// call is over.
    fn generate(&self, prompt: &str) -> ChunkStream;
}

/// Deterministic stand-in for accelerator inference.
///
/// Splits a canned completion into whitespace tokens and yields them
/// with an optional inter-token delay, capped at
/// `max_generation_tokens`.
#[derive(Debug)]
pub struct SimulatedEngine {
    completion: String,
    max_tokens: usize,
    token_delay: Duration,
}

impl SimulatedEngine {
    /// Default canned completion.
    pub const DEFAULT_COMPLETION: &'static str = "This is a mock response from the worker.";

    /// Build from engine configuration with the default completion.
    #[must_use]
    pub fn new(config: &EngineConfig) -> Self {
        Self::with_completion(config, Self::DEFAULT_COMPLETION)
    }

    /// Build with an explicit canned completion.
    #[must_use]
    pub fn with_completion(config: &EngineConfig, completion: &str) -> Self {
        Self {
            completion: completion.to_string(),
            max_tokens: config.max_generation_tokens,
            token_delay: Duration::from_millis(config.token_delay_ms),
        }
    }
}

impl GenerationEngine for SimulatedEngine {
    fn generate(&self, _prompt: &str) -> ChunkStream {
        let chunks: Vec<String> = self
            .completion
            .split_whitespace()
            .take(self.max_tokens)
            .enumerate()
            .map(|(i, word)| {
                if i == 0 {
                    word.to_string()
                } else {
                    format!(" {word}")
                }
            })
            .collect();
        let delay = self.token_delay;
        Box::pin(async_stream::stream! {
            for chunk in chunks {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                yield Ok(chunk);
            }
        })
    }
}

/// Replays an exact script of chunks and failures. Test support for
/// mid-stream failure and slow-producer scenarios.
pub struct ScriptedEngine {
    script: Vec<Result<String, EngineError>>,
}

impl ScriptedEngine {
    /// Engine that yields `chunks` then completes.
    #[must_use]
    pub fn completing(chunks: &[&str]) -> Self {
        Self {
            script: chunks.iter().map(|c| Ok((*c).to_string())).collect(),
        }
    }

    /// Engine that yields `chunks` then fails.
    #[must_use]
    pub fn failing_after(chunks: &[&str], error: &str) -> Self {
        let mut script: Vec<Result<String, EngineError>> =
            chunks.iter().map(|c| Ok((*c).to_string())).collect();
        script.push(Err(EngineError(error.to_string())));
        Self { script }
    }
}

impl GenerationEngine for ScriptedEngine {
    fn generate(&self, _prompt: &str) -> ChunkStream {
        let script = self.script.clone();
        Box::pin(futures::stream::iter(script))
    }
}

/// Validates engine configuration and "loads" the model.
///
/// Mirrors the real loader's contract: unsupported quantization is a
/// load error (the worker never reaches ready), flash attention falls
/// back to eager with a warning when the fused kernel is unavailable.
pub struct EngineLoader {
    config: EngineConfig,
    flash_available: bool,
}

impl EngineLoader {
    /// Loader for the given configuration.
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            flash_available: true,
        }
    }

    /// Pretend the fused attention kernel is not installed.
    #[must_use]
    pub fn without_flash(mut self) -> Self {
        self.flash_available = false;
        self
    }

    fn resolve_attention(&self) -> AttentionBackend {
        match self.config.attention {
            AttentionBackend::Flash if !self.flash_available => {
                warn!("flash attention unavailable; falling back to eager");
                AttentionBackend::Eager
            }
            requested => requested,
        }
    }

    /// Validate the configuration and initialize the engine.
    ///
    /// Simulates load time via `load_delay_ms`.
    pub async fn load(&self) -> Result<SimulatedEngine, WorkerError> {
        let quant = QuantizationMode::parse(&self.config.quantization).ok_or_else(|| {
            WorkerError::ModelLoad(format!(
                "unsupported quantization mode: {}",
                self.config.quantization
            ))
        })?;
        let attention = self.resolve_attention();

        if self.config.load_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.load_delay_ms)).await;
        }
        info!(
            model = %self.config.model_name,
            quant = ?quant,
            attention = ?attention,
            "model loaded"
        );
        Ok(SimulatedEngine::new(&self.config))
    }
}
