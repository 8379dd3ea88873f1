use regex::Regex;
use std::env;

use crate::ConfigError;

/// Interpolate environment variables in a string.
/// Replaces `${VAR_NAME}` with the value of the environment variable.
pub fn interpolate_env(input: &str) -> Result<String, ConfigError> {
    let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}")
        .map_err(|e| ConfigError::InvalidConfig(e.to_string()))?;

    let mut missing = Vec::new();
    let result = re.replace_all(input, |cap: &regex::Captures<'_>| {
        match env::var(&cap[1]) {
            Ok(value) => value,
            Err(_) => {
                if !missing.iter().any(|m: &String| m == &cap[1]) {
                    missing.push(cap[1].to_string());
                }
                String::new()
            }
        }
    });

    if !missing.is_empty() {
        return Err(ConfigError::MissingEnvVars(missing));
    }

    Ok(result.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interpolate_env() {
        env::set_var("COURSEIDX_TEST_VAR", "hello");
        env::set_var("COURSEIDX_ANOTHER_VAR", "world");

        let input = "prefix ${COURSEIDX_TEST_VAR} middle ${COURSEIDX_ANOTHER_VAR} suffix";
        let result = interpolate_env(input).unwrap();
        assert_eq!(result, "prefix hello middle world suffix");
    }

    #[test]
    fn test_interpolate_env_missing() {
        let input = "prefix ${COURSEIDX_MISSING_12345} suffix";
        match interpolate_env(input) {
            Err(ConfigError::MissingEnvVars(vars)) => {
                assert_eq!(vars, vec!["COURSEIDX_MISSING_12345"]);
            }
            other => panic!("Expected MissingEnvVars error, got {:?}", other),
        }
    }

    #[test]
    fn test_interpolate_env_missing_reported_once() {
        let input = "${COURSEIDX_MISSING_TWICE} ${COURSEIDX_MISSING_TWICE}";
        match interpolate_env(input) {
            Err(ConfigError::MissingEnvVars(vars)) => assert_eq!(vars.len(), 1),
            other => panic!("Expected MissingEnvVars error, got {:?}", other),
        }
    }

    #[test]
    fn test_interpolate_env_no_vars() {
        assert_eq!(interpolate_env("no variables here").unwrap(), "no variables here");
    }

    #[test]
    fn test_interpolate_env_value_not_reexpanded() {
        env::set_var("COURSEIDX_DOLLAR_VAR", "${HOME}");
        let result = interpolate_env("${COURSEIDX_DOLLAR_VAR}").unwrap();
        assert_eq!(result, "${HOME}");
    }

    #[test]
    fn test_interpolate_env_partial_syntax_not_matched() {
        let input = "not a $VAR or ${VAR variable";
        assert_eq!(interpolate_env(input).unwrap(), input);
    }

    #[test]
    fn test_interpolate_env_in_yaml_context() {
        env::set_var("COURSEIDX_YAML_ROOT", "/data/courses");
        let input = "root: ${COURSEIDX_YAML_ROOT}/published";
        assert_eq!(
            interpolate_env(input).unwrap(),
            "root: /data/courses/published"
        );
    }
}
