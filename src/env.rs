//! Environment expansion for configured paths
//!
//! `${VAR_NAME}` references are replaced with the variable's value, and a
//! leading `~` is replaced with the home directory. This lets the default
//! mount base directory be written once per platform
//! (`${HOME}/CloudMounts`, `${USERPROFILE}\CloudMounts`).

use std::env;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::config::ConfigError;

/// Matches `${VAR_NAME}`
static ENV_VAR_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid env var regex"));

/// Expand `${VAR}` references and a leading `~` in `input`.
///
/// Fails with a validation error naming every variable that is not set.
pub fn expand(input: &str) -> Result<String, ConfigError> {
    let mut missing: Vec<String> = Vec::new();

    let substituted = ENV_VAR_PATTERN.replace_all(input, |caps: &Captures| {
        let name = &caps[1];
        match env::var(name) {
            Ok(value) => value,
            Err(_) => {
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

    expand_home(&substituted)
}

fn expand_home(input: &str) -> Result<String, ConfigError> {
    let rest = match input.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') || rest.starts_with('\\') => rest,
        _ => return Ok(input.to_string()),
    };

    let home = env::var("HOME")
        .or_else(|_| env::var("USERPROFILE"))
        .map_err(|_| {
            ConfigError::ValidationError(format!(
                "Cannot expand '~' in {:?}: no home directory in environment",
                input
            ))
        })?;

    Ok(format!("{}{}", home, rest))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_path_unchanged() {
        assert_eq!(expand("/srv/mounts").unwrap(), "/srv/mounts");
    }

    #[test]
    fn test_variable_in_base_dir() {
        env::set_var("REMOTE_MOUNT_TEST_ROOT", "/data/user");
        assert_eq!(
            expand("${REMOTE_MOUNT_TEST_ROOT}/CloudMounts").unwrap(),
            "/data/user/CloudMounts"
        );
        env::remove_var("REMOTE_MOUNT_TEST_ROOT");
    }

    #[test]
    fn test_repeated_variable() {
        env::set_var("REMOTE_MOUNT_TEST_REPEAT", "x");
        assert_eq!(
            expand("${REMOTE_MOUNT_TEST_REPEAT}-${REMOTE_MOUNT_TEST_REPEAT}").unwrap(),
            "x-x"
        );
        env::remove_var("REMOTE_MOUNT_TEST_REPEAT");
    }

    #[test]
    fn test_missing_variables_are_all_reported() {
        let err = expand("${MISSING_MOUNT_A_9911}/${MISSING_MOUNT_B_9911}").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("MISSING_MOUNT_A_9911"));
        assert!(msg.contains("MISSING_MOUNT_B_9911"));
    }

    #[test]
    fn test_tilde_only_expanded_at_start() {
        let home = env::var("HOME").or_else(|_| env::var("USERPROFILE"));
        if let Ok(home) = home {
            assert_eq!(expand("~/mounts").unwrap(), format!("{}/mounts", home));
        }
        assert_eq!(expand("/tmp/~cache").unwrap(), "/tmp/~cache");
        assert_eq!(expand("~other/dir").unwrap(), "~other/dir");
    }

    #[test]
    fn test_dollar_without_braces_is_literal() {
        assert_eq!(expand("/mnt/$VAR").unwrap(), "/mnt/$VAR");
    }
}
