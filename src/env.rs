//! `${VAR}` substitution in configuration text
//!
//! `${VAR}` must be set; `${VAR:-fallback}` uses `fallback` (possibly empty)
//! when `VAR` is unset or empty, which is handy for optional values such as
//! `serial: ${ANDROID_SERIAL:-}`.

use std::env;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::config::ConfigError;

static ENV_VAR_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}").expect("valid env var pattern")
});

/// Substitute every variable reference in `input`.
///
/// All unset variables without a fallback are reported together.
pub fn substitute_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut missing: Vec<String> = Vec::new();

    let output = ENV_VAR_PATTERN.replace_all(input, |caps: &Captures<'_>| {
        let name = &caps[1];
        let value = env::var(name).ok();
        match (value, caps.get(2)) {
            (Some(v), Some(fallback)) if v.is_empty() => fallback.as_str().to_string(),
            (Some(v), _) => v,
            (None, Some(fallback)) => fallback.as_str().to_string(),
            (None, None) => {
                if !missing.iter().any(|m| m == name) {
                    missing.push(name.to_string());
                }
                String::new()
            }
        }
    });

    if !missing.is_empty() {
        return Err(ConfigError::ValidationError(format!(
            "Missing environment variables: {}",
            missing.join(", ")
        )));
    }
    Ok(output.into_owned())
}
