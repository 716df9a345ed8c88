//! Tracing setup and the metadata-only logging policy.
//!
//! Nothing in this workspace may log prompts, decrypted chunks, keys, or
//! ciphertext contents. Log records carry correlation metadata only:
//! request IDs, worker IDs, tenant IDs, states, sizes, and durations.
//! When `strict_no_logging` is set, tenant IDs are withheld as well.

use tracing_subscriber::{fmt, EnvFilter};

/// Initialize the global tracing subscriber.
///
/// Filter comes from `RUST_LOG`, defaulting to `info`. Safe to call more
/// than once; later calls are no-ops.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// Tenant ID rendered for a log field under the current policy.
#[must_use]
pub fn loggable_tenant<'a>(tenant_id: &'a str, strict_no_logging: bool) -> &'a str {
    if strict_no_logging {
        "[withheld]"
    } else {
        tenant_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        init();
        init();
    }

    #[test]
    fn strict_mode_withholds_tenant() {
        assert_eq!(loggable_tenant("t1", false), "t1");
        assert_eq!(loggable_tenant("t1", true), "[withheld]");
    }
}
