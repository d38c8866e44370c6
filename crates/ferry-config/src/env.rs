// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;

use anyhow::bail;
use tracing::debug;

use crate::schema::{BackendMode, CacheStrategy, Config, PermissionMode};

/// Default executable looked up on PATH when `BACKEND_PATH` is unset.
const DEFAULT_BACKEND_PATH: &str = "agent";

/// Load configuration from the process environment.
///
/// Invalid values for the enumerated or numeric variables fail with a
/// diagnostic naming the variable and the offending value; the bridge must
/// refuse to start rather than run with a silently-corrected policy.
pub fn from_env() -> anyhow::Result<Config> {
    let vars: HashMap<String, String> = std::env::vars().collect();
    from_vars(&vars)
}

/// Like [`from_env`] but reads from an explicit map.  Tests use this to avoid
/// mutating the process environment.
pub fn from_vars(vars: &HashMap<String, String>) -> anyhow::Result<Config> {
    // Prefixed variables win over their bare spellings so that a host which
    // sets a generic PERMISSION_MODE for several bridges can still override
    // ferry specifically.
    let get = |prefixed: &str, bare: &str| -> Option<&str> {
        vars.get(prefixed)
            .or_else(|| vars.get(bare))
            .map(String::as_str)
    };

    let mut config = Config::default();

    if let Some(raw) = get("FERRY_PERMISSION_MODE", "PERMISSION_MODE") {
        config.permission_mode = match PermissionMode::parse(raw) {
            Some(mode) => mode,
            None => bail!(
                "invalid PERMISSION_MODE {raw:?}: expected one of \
                 default, accept_edits, bypass_permissions, plan"
            ),
        };
    }

    if let Some(raw) = get("FERRY_MAX_TURNS", "MAX_TURNS") {
        config.max_turns = match raw.parse::<u32>() {
            Ok(n) => n,
            Err(e) => bail!("invalid MAX_TURNS {raw:?}: {e}"),
        };
    }

    config.debug = get("FERRY_DEBUG", "DEBUG").map(parse_bool).unwrap_or(false);
    config.log_file = get("FERRY_LOG_FILE", "LOG_FILE").map(str::to_string);

    if let Some(raw) = get("FERRY_BACKEND_MODE", "BACKEND_MODE") {
        config.backend_mode = match BackendMode::parse(raw) {
            Some(mode) => mode,
            None => bail!("invalid BACKEND_MODE {raw:?}: expected subprocess or http"),
        };
    }

    config.backend_path = get("FERRY_BACKEND_PATH", "BACKEND_PATH")
        .unwrap_or(DEFAULT_BACKEND_PATH)
        .to_string();

    config.http.api_key = vars.get("BACKEND_API_KEY").cloned();
    config.http.model = vars.get("BACKEND_MODEL").cloned();
    if let Some(raw) = vars.get("BACKEND_TEMPERATURE") {
        config.http.temperature = match raw.parse::<f32>() {
            Ok(t) if (0.0..=2.0).contains(&t) => Some(t),
            Ok(t) => bail!("invalid BACKEND_TEMPERATURE {t}: must be within 0.0..=2.0"),
            Err(e) => bail!("invalid BACKEND_TEMPERATURE {raw:?}: {e}"),
        };
    }
    if let Some(raw) = vars.get("BACKEND_MAX_TOKENS") {
        config.http.max_tokens = match raw.parse::<u32>() {
            Ok(n) => Some(n),
            Err(e) => bail!("invalid BACKEND_MAX_TOKENS {raw:?}: {e}"),
        };
    }

    parse_limit(vars, "FERRY_MAX_SESSIONS", &mut config.limits.max_concurrent_sessions)?;
    parse_limit(
        vars,
        "FERRY_MAX_OPERATIONS",
        &mut config.limits.max_concurrent_operations,
    )?;
    parse_limit(vars, "FERRY_MEMORY_WARNING_MIB", &mut config.limits.memory_warning_mib)?;
    parse_limit(vars, "FERRY_MEMORY_CRITICAL_MIB", &mut config.limits.memory_critical_mib)?;

    parse_limit(vars, "FERRY_FAILURE_THRESHOLD", &mut config.breaker.failure_threshold)?;
    parse_limit(vars, "FERRY_SUCCESS_THRESHOLD", &mut config.breaker.success_threshold)?;
    parse_limit(vars, "FERRY_OPEN_TIMEOUT_MS", &mut config.breaker.open_timeout_ms)?;
    parse_limit(
        vars,
        "FERRY_MONITORING_WINDOW_MS",
        &mut config.breaker.monitoring_window_ms,
    )?;

    // The optional caches are not part of the core pipeline; validate the
    // variables so misconfiguration is caught, then only log the outcome.
    if let Some(raw) = vars.get("CACHE_STRATEGY") {
        match CacheStrategy::parse(raw) {
            Some(strategy) => debug!(?strategy, "cache strategy configured (unused by core)"),
            None => bail!("invalid CACHE_STRATEGY {raw:?}: expected lru, lfu, or fifo"),
        }
    }
    for key in ["CACHE_MAX_SIZE", "CACHE_TTL_MS"] {
        if let Some(raw) = vars.get(key) {
            if let Err(e) = raw.parse::<u64>() {
                bail!("invalid {key} {raw:?}: {e}");
            }
        }
    }

    Ok(config)
}

fn parse_bool(raw: &str) -> bool {
    matches!(
        raw.to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn parse_limit<T: std::str::FromStr>(
    vars: &HashMap<String, String>,
    key: &str,
    slot: &mut T,
) -> anyhow::Result<()>
where
    T::Err: std::fmt::Display,
{
    if let Some(raw) = vars.get(key) {
        match raw.parse::<T>() {
            Ok(v) => *slot = v,
            Err(e) => bail!("invalid {key} {raw:?}: {e}"),
        }
    }
    Ok(())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    // ── Defaults ──────────────────────────────────────────────────────────────

    #[test]
    fn empty_environment_yields_defaults() {
        let cfg = from_vars(&vars(&[])).unwrap();
        assert_eq!(cfg.permission_mode, PermissionMode::Default);
        assert_eq!(cfg.max_turns, 0);
        assert!(!cfg.debug);
        assert_eq!(cfg.backend_mode, BackendMode::Subprocess);
        assert_eq!(cfg.backend_path, "agent");
        assert_eq!(cfg.limits.max_concurrent_sessions, 100);
        assert_eq!(cfg.breaker.failure_threshold, 8);
    }

    // ── Permission mode ───────────────────────────────────────────────────────

    #[test]
    fn permission_mode_parses_all_variants() {
        for (raw, expected) in [
            ("default", PermissionMode::Default),
            ("accept_edits", PermissionMode::AcceptEdits),
            ("bypass_permissions", PermissionMode::BypassPermissions),
            ("plan", PermissionMode::Plan),
        ] {
            let cfg = from_vars(&vars(&[("PERMISSION_MODE", raw)])).unwrap();
            assert_eq!(cfg.permission_mode, expected);
        }
    }

    #[test]
    fn invalid_permission_mode_fails_startup() {
        let err = from_vars(&vars(&[("PERMISSION_MODE", "yolo")])).unwrap_err();
        assert!(err.to_string().contains("yolo"), "diagnostic names the value");
    }

    #[test]
    fn prefixed_variable_overrides_bare() {
        let cfg = from_vars(&vars(&[
            ("PERMISSION_MODE", "plan"),
            ("FERRY_PERMISSION_MODE", "accept_edits"),
        ]))
        .unwrap();
        assert_eq!(cfg.permission_mode, PermissionMode::AcceptEdits);
    }

    // ── Max turns ─────────────────────────────────────────────────────────────

    #[test]
    fn max_turns_zero_means_unlimited() {
        let cfg = from_vars(&vars(&[("MAX_TURNS", "0")])).unwrap();
        assert_eq!(cfg.max_turns, 0);
    }

    #[test]
    fn negative_max_turns_is_rejected() {
        let err = from_vars(&vars(&[("MAX_TURNS", "-3")])).unwrap_err();
        assert!(err.to_string().contains("MAX_TURNS"));
    }

    #[test]
    fn non_numeric_max_turns_is_rejected() {
        assert!(from_vars(&vars(&[("MAX_TURNS", "lots")])).is_err());
    }

    // ── Booleans ──────────────────────────────────────────────────────────────

    #[test]
    fn debug_accepts_common_truthy_spellings() {
        for raw in ["1", "true", "yes", "on", "TRUE"] {
            let cfg = from_vars(&vars(&[("DEBUG", raw)])).unwrap();
            assert!(cfg.debug, "{raw} should be truthy");
        }
        let cfg = from_vars(&vars(&[("DEBUG", "0")])).unwrap();
        assert!(!cfg.debug);
    }

    // ── Backend selection ─────────────────────────────────────────────────────

    #[test]
    fn backend_mode_http_with_settings() {
        let cfg = from_vars(&vars(&[
            ("BACKEND_MODE", "http"),
            ("BACKEND_API_KEY", "sk-test"),
            ("BACKEND_MODEL", "coder-large"),
            ("BACKEND_TEMPERATURE", "0.3"),
            ("BACKEND_MAX_TOKENS", "2048"),
        ]))
        .unwrap();
        assert_eq!(cfg.backend_mode, BackendMode::Http);
        assert_eq!(cfg.http.api_key.as_deref(), Some("sk-test"));
        assert_eq!(cfg.http.model.as_deref(), Some("coder-large"));
        assert_eq!(cfg.http.temperature, Some(0.3));
        assert_eq!(cfg.http.max_tokens, Some(2048));
    }

    #[test]
    fn out_of_range_temperature_is_rejected() {
        assert!(from_vars(&vars(&[("BACKEND_TEMPERATURE", "3.5")])).is_err());
    }

    #[test]
    fn invalid_backend_mode_is_rejected() {
        assert!(from_vars(&vars(&[("BACKEND_MODE", "grpc")])).is_err());
    }

    // ── Limits and breaker overrides ──────────────────────────────────────────

    #[test]
    fn limit_overrides_are_applied() {
        let cfg = from_vars(&vars(&[
            ("FERRY_MAX_SESSIONS", "5"),
            ("FERRY_MAX_OPERATIONS", "2"),
            ("FERRY_FAILURE_THRESHOLD", "2"),
            ("FERRY_OPEN_TIMEOUT_MS", "50"),
        ]))
        .unwrap();
        assert_eq!(cfg.limits.max_concurrent_sessions, 5);
        assert_eq!(cfg.limits.max_concurrent_operations, 2);
        assert_eq!(cfg.breaker.failure_threshold, 2);
        assert_eq!(cfg.breaker.open_timeout_ms, 50);
    }

    // ── Cache variables (validated, unused by core) ───────────────────────────

    #[test]
    fn cache_strategy_is_validated() {
        assert!(from_vars(&vars(&[("CACHE_STRATEGY", "lru")])).is_ok());
        assert!(from_vars(&vars(&[("CACHE_STRATEGY", "random")])).is_err());
    }

    #[test]
    fn cache_numeric_settings_are_validated() {
        assert!(from_vars(&vars(&[("CACHE_MAX_SIZE", "100")])).is_ok());
        assert!(from_vars(&vars(&[("CACHE_TTL_MS", "abc")])).is_err());
    }
}
