// Engine configuration
//
// Flags that change how the engine dispatches and validates:
//
//   debug                    : check float32 kernel outputs for NaN, log timings
//   cpu_fallback             : backend to run a kernel on when the active
//                              backend has none registered
//   check_shape_consistency  : reject ragged nested arrays in op wrappers
//
// Built with `with_*` methods or read from the environment.

/// Environment variable enabling debug mode (`1` / `true`).
pub const ENV_DEBUG: &str = "TAPIR_DEBUG";
/// Environment variable naming the fallback backend.
pub const ENV_CPU_FALLBACK: &str = "TAPIR_CPU_FALLBACK";
/// Environment variable toggling nested-array shape checks.
pub const ENV_CHECK_SHAPE_CONSISTENCY: &str = "TAPIR_CHECK_SHAPE_CONSISTENCY";

/// Configuration of an [`Engine`](crate::Engine).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Check every float32 kernel output for NaN (default: false).
    pub debug: bool,
    /// Backend to fall back to when a kernel is missing (default: none).
    pub cpu_fallback: Option<String>,
    /// Validate that nested array inputs are not ragged (default: true).
    pub check_shape_consistency: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            debug: false,
            cpu_fallback: None,
            check_shape_consistency: true,
        }
    }
}

impl EngineConfig {
    /// Set debug mode.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Set the fallback backend.
    pub fn with_cpu_fallback(mut self, backend: impl Into<String>) -> Self {
        self.cpu_fallback = Some(backend.into());
        self
    }

    pub fn with_check_shape_consistency(mut self, check: bool) -> Self {
        self.check_shape_consistency = check;
        self
    }

    /// Defaults overridden by `TAPIR_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(v) = lookup(ENV_DEBUG) {
            config.debug = parse_flag(&v, config.debug);
        }
        if let Some(v) = lookup(ENV_CPU_FALLBACK) {
            let v = v.trim();
            if !v.is_empty() {
                config.cpu_fallback = Some(v.to_string());
            }
        }
        if let Some(v) = lookup(ENV_CHECK_SHAPE_CONSISTENCY) {
            config.check_shape_consistency = parse_flag(&v, config.check_shape_consistency);
        }
        config
    }
}

fn parse_flag(value: &str, default: bool) -> bool {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        other => {
            log::warn!("ignoring unrecognized flag value '{other}'");
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_builder() {
        let c = EngineConfig::default()
            .with_debug(true)
            .with_cpu_fallback("cpu")
            .with_check_shape_consistency(false);
        assert!(c.debug);
        assert_eq!(c.cpu_fallback.as_deref(), Some("cpu"));
        assert!(!c.check_shape_consistency);
    }

    #[test]
    fn test_from_lookup() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_DEBUG, "TRUE"),
            (ENV_CPU_FALLBACK, " cpu "),
            (ENV_CHECK_SHAPE_CONSISTENCY, "maybe"),
        ]);
        let c = EngineConfig::from_lookup(|k| env.get(k).map(|v| v.to_string()));
        assert!(c.debug);
        assert_eq!(c.cpu_fallback.as_deref(), Some("cpu"));
        assert!(c.check_shape_consistency);
    }

    #[test]
    fn test_defaults() {
        let c = EngineConfig::from_lookup(|_| None);
        assert_eq!(c, EngineConfig::default());
    }
}
