//! Central configuration with environment overrides.
//!
//! Every field can be overridden through a `SHROUD_`-prefixed environment
//! variable, e.g. `SHROUD_RELAY_BUFFER=64`. Values that fail to parse
//! fall back to the built-in default rather than aborting startup.

use serde::{Deserialize, Serialize};

/// Env var prefix for all overrides.
pub const ENV_PREFIX: &str = "SHROUD_";

fn env_str(name: &str, default: &str) -> String {
    std::env::var(format!("{ENV_PREFIX}{name}")).unwrap_or_else(|_| default.to_string())
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(format!("{ENV_PREFIX}{name}"))
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(name: &str, default: usize) -> usize {
    std::env::var(format!("{ENV_PREFIX}{name}"))
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(name: &str, default: bool) -> bool {
    match std::env::var(format!("{ENV_PREFIX}{name}")) {
        Ok(v) => match v.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "y" | "on" => true,
            "0" | "false" | "no" | "n" | "off" => false,
            _ => default,
        },
        Err(_) => default,
    }
}

/// Model weight precision requested for the engine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuantizationMode {
    /// Half precision.
    Fp16,
    /// 8-bit quantization (default).
    #[default]
    Int8,
    /// 4-bit quantization.
    Int4,
}

impl QuantizationMode {
    /// Parse a mode name; `None` for unsupported modes (a load error, not
    /// a silent fallback; the engine must refuse to start).
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "fp16" => Some(Self::Fp16),
            "int8" => Some(Self::Int8),
            "int4" => Some(Self::Int4),
            _ => None,
        }
    }
}

/// Attention backend requested for the engine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttentionBackend {
    /// Fused flash attention (falls back to eager when unavailable).
    #[default]
    Flash,
    /// Unfused reference implementation.
    Eager,
}

/// Configuration handed to the generation capability at worker startup.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Model identifier to load.
    pub model_name: String,
    /// Weight precision. Stored as the raw string so the loader can
    /// reject unsupported values explicitly.
    pub quantization: String,
    /// Requested attention backend.
    pub attention: AttentionBackend,
    /// Hard cap on generated tokens per request.
    pub max_generation_tokens: usize,
    /// Simulated per-token delay in milliseconds (0 in tests).
    pub token_delay_ms: u64,
    /// Simulated model load time in milliseconds.
    pub load_delay_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model_name: "llm-int8".into(),
            quantization: "int8".into(),
            attention: AttentionBackend::Flash,
            max_generation_tokens: 512,
            token_delay_ms: 0,
            load_delay_ms: 0,
        }
    }
}

/// Central configuration for the shroud system.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShroudConfig {
    /// Address workers listen on / the orchestrator dials (per worker).
    pub worker_address: String,
    /// Maximum accepted plaintext prompt size in bytes.
    pub max_prompt_bytes: usize,
    /// Maximum encoded frame length the codec will accept.
    pub max_frame_len: usize,
    /// Bounded relay buffer capacity (frames buffered between worker
    /// read and downstream delivery); this is the backpressure bound.
    pub relay_buffer: usize,
    /// Heartbeat interval for worker readiness refresh, in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// When set, even correlation IDs are withheld from logs.
    pub strict_no_logging: bool,
    /// Engine configuration forwarded to workers.
    pub engine: EngineConfig,
}

impl Default for ShroudConfig {
    fn default() -> Self {
        Self {
            worker_address: "127.0.0.1:50051".into(),
            max_prompt_bytes: 64 * 1024,
            max_frame_len: 256 * 1024,
            relay_buffer: 32,
            heartbeat_interval_ms: 10_000,
            strict_no_logging: false,
            engine: EngineConfig::default(),
        }
    }
}

impl ShroudConfig {
    /// Load configuration, applying `SHROUD_` env overrides on top of
    /// the defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            worker_address: env_str("WORKER_ADDRESS", &d.worker_address),
            max_prompt_bytes: env_usize("MAX_PROMPT_BYTES", d.max_prompt_bytes),
            max_frame_len: env_usize("MAX_FRAME_LEN", d.max_frame_len),
            relay_buffer: env_usize("RELAY_BUFFER", d.relay_buffer),
            heartbeat_interval_ms: env_u64("HEARTBEAT_INTERVAL_MS", d.heartbeat_interval_ms),
            strict_no_logging: env_bool("STRICT_NO_LOGGING", d.strict_no_logging),
            engine: EngineConfig {
                model_name: env_str("MODEL_NAME", &d.engine.model_name),
                quantization: env_str("MODEL_QUANTIZATION_MODE", &d.engine.quantization),
                attention: if env_bool("ENABLE_FLASH_ATTENTION", true) {
                    AttentionBackend::Flash
                } else {
                    AttentionBackend::Eager
                },
                max_generation_tokens: env_usize(
                    "MAX_GENERATION_TOKENS",
                    d.engine.max_generation_tokens,
                ),
                token_delay_ms: env_u64("TOKEN_DELAY_MS", d.engine.token_delay_ms),
                load_delay_ms: env_u64("MODEL_LOAD_DELAY_MS", d.engine.load_delay_ms),
            },
        }
    }
}
