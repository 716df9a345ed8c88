//! Tenant request model.
//!
//! A [`TenantRequest`] is created at the gateway boundary after HTTP
//! validation and is immutable once accepted by the dispatcher. The
//! prompt never appears in logs or metrics.

use serde::{Deserialize, Serialize};

/// Generation mode requested by the tenant.
///
/// `Rag` is accepted at the boundary but the retrieval pipeline itself is
/// not part of this system; dispatch treats both modes identically.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationMode {
    /// Plain prompt completion.
    #[default]
    Plain,
    /// Retrieval-augmented completion (pipeline external).
    Rag,
}

impl GenerationMode {
    /// Parse a mode string, falling back to `Plain` for unknown values.
    #[must_use]
    pub fn parse_lossy(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "rag" => Self::Rag,
            _ => Self::Plain,
        }
    }
}

/// One inference request as accepted from a tenant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantRequest {
    /// Tenant identity (opaque; no authentication performed here).
    pub tenant_id: String,
    /// Plaintext prompt. Only ever exposed inside the worker enclave.
    pub prompt: String,
    /// Requested generation mode.
    #[serde(default)]
    pub mode: GenerationMode,
    /// Tenant region hint, used for placement policy outside this core.
    #[serde(default)]
    pub region: String,
}

impl TenantRequest {
    /// Build a plain-mode request.
    pub fn plain(tenant_id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            prompt: prompt.into(),
            mode: GenerationMode::Plain,
            region: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_parse_lossy() {
        assert_eq!(GenerationMode::parse_lossy("rag"), GenerationMode::Rag);
        assert_eq!(GenerationMode::parse_lossy("RAG"), GenerationMode::Rag);
        assert_eq!(GenerationMode::parse_lossy("plain"), GenerationMode::Plain);
        assert_eq!(GenerationMode::parse_lossy("bogus"), GenerationMode::Plain);
    }

    #[test]
    fn request_json_shape() {
        let req = TenantRequest::plain("t1", "hello");
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["tenant_id"], "t1");
        assert_eq!(json["prompt"], "hello");
        assert_eq!(json["mode"], "plain");
    }

    #[test]
    fn mode_defaults_to_plain_when_missing() {
        let req: TenantRequest =
            serde_json::from_str(r#"{"tenant_id":"t1","prompt":"p"}"#).unwrap();
        assert_eq!(req.mode, GenerationMode::Plain);
        assert!(req.region.is_empty());
    }
}
