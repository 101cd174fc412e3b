use std::path::PathBuf;

use thiserror::Error;

use crate::exam::TransitionPolicy;
use crate::quiz::{ShortfallPolicy, DEFAULT_TIME_LIMIT_SECONDS};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} must be a positive whole number, got {value:?}")]
    NotPositive { name: &'static str, value: String },

    #[error("{name} must be one of {expected}, got {value:?}")]
    Unexpected {
        name: &'static str,
        expected: &'static str,
        value: String,
    },
}

/// Bot settings. `TELOXIDE_TOKEN` is read separately by the bot itself.
#[derive(Clone, Debug)]
pub struct Config {
    /// CSV file with the question bank
    pub questions_path: PathBuf,
    /// SQLite file that keeps every chat's dialogue state
    pub db_path: String,
    pub default_time_limit_seconds: u32,
    /// Upper bound offered when asking for the number of questions
    pub max_questions: usize,
    pub shortfall: ShortfallPolicy,
    /// When set, users must send this code before they can start
    pub access_code: Option<String>,
    pub transition_policy: TransitionPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            questions_path: PathBuf::from("spi_questions_converted.csv"),
            db_path: "db.sqlite".to_string(),
            default_time_limit_seconds: DEFAULT_TIME_LIMIT_SECONDS,
            max_questions: 50,
            shortfall: ShortfallPolicy::Degrade,
            access_code: None,
            transition_policy: if cfg!(debug_assertions) {
                TransitionPolicy::Strict
            } else {
                TransitionPolicy::Lenient
            },
        }
    }
}

fn positive<T>(name: &'static str, value: String) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    match value.trim().parse::<T>() {
        Ok(parsed) if parsed > T::default() => Ok(parsed),
        _ => Err(ConfigError::NotPositive { name, value }),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from any variable source, falling back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let default = Self::default();
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let shortfall = match var("EXAM_SHORTFALL").map(|v| v.trim().to_lowercase()) {
            None => default.shortfall,
            Some(v) if v == "degrade" => ShortfallPolicy::Degrade,
            Some(v) if v == "reject" => ShortfallPolicy::Reject,
            Some(value) => {
                return Err(ConfigError::Unexpected {
                    name: "EXAM_SHORTFALL",
                    expected: "degrade, reject",
                    value,
                })
            }
        };

        let transition_policy = match var("EXAM_STRICT").map(|v| v.trim().to_lowercase()) {
            None => default.transition_policy,
            Some(v) if matches!(v.as_str(), "1" | "true" | "yes") => TransitionPolicy::Strict,
            Some(v) if matches!(v.as_str(), "0" | "false" | "no") => TransitionPolicy::Lenient,
            Some(value) => {
                return Err(ConfigError::Unexpected {
                    name: "EXAM_STRICT",
                    expected: "true, false",
                    value,
                })
            }
        };

        Ok(Self {
            questions_path: var("EXAM_QUESTIONS_PATH")
                .map(PathBuf::from)
                .unwrap_or(default.questions_path),
            db_path: var("EXAM_DB_PATH").unwrap_or(default.db_path),
            default_time_limit_seconds: match var("EXAM_DEFAULT_TIME_LIMIT") {
                Some(v) => positive("EXAM_DEFAULT_TIME_LIMIT", v)?,
                None => default.default_time_limit_seconds,
            },
            max_questions: match var("EXAM_MAX_QUESTIONS") {
                Some(v) => positive("EXAM_MAX_QUESTIONS", v)?,
                None => default.max_questions,
            },
            shortfall,
            access_code: var("EXAM_ACCESS_CODE").map(|v| v.trim().to_string()),
            transition_policy,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = config(&[]).unwrap();
        assert_eq!(config.questions_path, PathBuf::from("spi_questions_converted.csv"));
        assert_eq!(config.db_path, "db.sqlite");
        assert_eq!(config.default_time_limit_seconds, 60);
        assert_eq!(config.max_questions, 50);
        assert_eq!(config.shortfall, ShortfallPolicy::Degrade);
        assert_eq!(config.access_code, None);
    }

    #[test]
    fn variables_override_defaults() {
        let config = config(&[
            ("EXAM_QUESTIONS_PATH", "/data/questions.csv"),
            ("EXAM_DB_PATH", "/data/state.sqlite"),
            ("EXAM_DEFAULT_TIME_LIMIT", "90"),
            ("EXAM_MAX_QUESTIONS", " 20 "),
            ("EXAM_SHORTFALL", "Reject"),
            ("EXAM_ACCESS_CODE", "nagasaki"),
            ("EXAM_STRICT", "false"),
        ])
        .unwrap();
        assert_eq!(config.questions_path, PathBuf::from("/data/questions.csv"));
        assert_eq!(config.db_path, "/data/state.sqlite");
        assert_eq!(config.default_time_limit_seconds, 90);
        assert_eq!(config.max_questions, 20);
        assert_eq!(config.shortfall, ShortfallPolicy::Reject);
        assert_eq!(config.access_code.as_deref(), Some("nagasaki"));
        assert_eq!(config.transition_policy, TransitionPolicy::Lenient);
    }

    #[test]
    fn blank_values_count_as_unset() {
        let config = config(&[("EXAM_ACCESS_CODE", "  "), ("EXAM_DEFAULT_TIME_LIMIT", "")])
            .unwrap();
        assert_eq!(config.access_code, None);
        assert_eq!(config.default_time_limit_seconds, 60);
    }

    #[test]
    fn invalid_values_are_reported() {
        assert_eq!(
            config(&[("EXAM_DEFAULT_TIME_LIMIT", "0")]).unwrap_err(),
            ConfigError::NotPositive { name: "EXAM_DEFAULT_TIME_LIMIT", value: "0".to_string() }
        );
        assert!(matches!(
            config(&[("EXAM_MAX_QUESTIONS", "many")]),
            Err(ConfigError::NotPositive { name: "EXAM_MAX_QUESTIONS", .. })
        ));
        assert!(matches!(
            config(&[("EXAM_SHORTFALL", "shrug")]),
            Err(ConfigError::Unexpected { name: "EXAM_SHORTFALL", .. })
        ));
    }
}
