//! Typed environment-variable helpers.
//!
//! Every config struct in the workspace reads its fields through these, so
//! parse failures are reported uniformly and defaults stay next to the read.

use std::env;
use std::str::FromStr;

/// Reads a variable as a string, `None` if unset or empty.
#[must_use]
pub fn env_string(name: &str) -> Option<String> {
    match env::var(name) {
        Ok(value) if !value.is_empty() => Some(value),
        _ => None,
    }
}

/// Reads a variable as a string with a default.
#[must_use]
pub fn env_string_or(name: &str, default: &str) -> String {
    env_string(name).unwrap_or_else(|| default.to_string())
}

/// Reads and parses a variable, falling back to `default` when unset or
/// unparsable. A malformed value is logged and ignored rather than fatal.
#[must_use]
pub fn env_parse_or<T: FromStr>(name: &str, default: T) -> T {
    match env_string(name) {
        Some(raw) => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(var = name, value = %raw, "unparsable env value, using default");
                default
            }
        },
        None => default,
    }
}

/// Reads a boolean ("true"/"1"/"yes" are truthy, case-insensitive).
#[must_use]
pub fn env_bool_or(name: &str, default: bool) -> bool {
    match env_string(name) {
        Some(raw) => matches!(raw.to_ascii_lowercase().as_str(), "true" | "1" | "yes"),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_var_yields_default() {
        assert_eq!(env_parse_or("TOPOGRAPH_TEST_UNSET_VAR", 42u16), 42);
        assert_eq!(env_string_or("TOPOGRAPH_TEST_UNSET_VAR", "x"), "x");
        assert!(env_bool_or("TOPOGRAPH_TEST_UNSET_VAR", true));
    }

    #[test]
    fn set_var_is_parsed() {
        std::env::set_var("TOPOGRAPH_TEST_PORT", "8529");
        assert_eq!(env_parse_or("TOPOGRAPH_TEST_PORT", 0u16), 8529);
        std::env::set_var("TOPOGRAPH_TEST_FLAG", "TRUE");
        assert!(env_bool_or("TOPOGRAPH_TEST_FLAG", false));
        std::env::remove_var("TOPOGRAPH_TEST_PORT");
        std::env::remove_var("TOPOGRAPH_TEST_FLAG");
    }
}
