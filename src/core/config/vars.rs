//! Environment-variable configuration source.
//!
//! Variables are captured once into a [`VarSource`] so resolution stays pure
//! and tests can supply their own map instead of mutating the process
//! environment.

use std::collections::HashMap;
use std::str::FromStr;

use tracing::warn;

use crate::core::config::data::ScenarioOverride;
use crate::core::environment::Environment;
use crate::core::error::ErrorKind;

pub const VAR_API_KEY: &str = "AI_API_KEY";
pub const VAR_API_URL: &str = "AI_API_URL";
pub const VAR_MODEL_NAME: &str = "AI_MODEL_NAME";
pub const VAR_TIMEOUT: &str = "AI_TIMEOUT";
pub const VAR_MAX_RETRIES: &str = "AI_MAX_RETRIES";
pub const VAR_TEMPERATURE: &str = "AI_TEMPERATURE";
pub const VAR_ENVIRONMENT: &str = "QUILL_ENV";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VarSource {
    vars: HashMap<String, String>,
}

impl VarSource {
    /// Snapshot the `AI_*` and `QUILL_*` variables of the current process.
    pub fn from_process() -> Self {
        std::env::vars()
            .filter(|(key, _)| key.starts_with("AI_") || key.starts_with("QUILL_"))
            .collect()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(String::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    pub fn api_key(&self) -> Option<&str> {
        self.get(VAR_API_KEY)
    }

    pub fn api_url(&self) -> Option<&str> {
        self.get(VAR_API_URL)
    }

    pub fn environment(&self) -> Option<Environment> {
        let raw = self.get(VAR_ENVIRONMENT)?;
        match raw.parse() {
            Ok(env) => Some(env),
            Err(err) => {
                warn!(kind = %ErrorKind::ConfigInvalid, var = VAR_ENVIRONMENT, "{err}");
                None
            }
        }
    }

    /// Global parameter variables, applied beneath every scenario.
    pub fn base_override(&self) -> ScenarioOverride {
        ScenarioOverride {
            model_name: self.get(VAR_MODEL_NAME).map(str::to_string),
            temperature: self.parse(VAR_TEMPERATURE),
            timeout: self.parse(VAR_TIMEOUT),
            max_retries: self.parse(VAR_MAX_RETRIES),
            ..Default::default()
        }
    }

    /// `AI_<SCENARIO>_*` variables for one scenario.
    pub fn scenario_override(&self, scenario: &str) -> ScenarioOverride {
        let prefix = format!("AI_{}_", scenario_var_segment(scenario));
        let key = |suffix: &str| format!("{prefix}{suffix}");
        ScenarioOverride {
            model_name: self.get(&key("MODEL_NAME")).map(str::to_string),
            temperature: self.parse(&key("TEMPERATURE")),
            max_tokens: self.parse(&key("MAX_TOKENS")),
            stream: self.parse(&key("STREAM")),
            ..Default::default()
        }
    }

    fn parse<T: FromStr>(&self, key: &str) -> Option<T> {
        let raw = self.get(key)?;
        match raw.parse::<T>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(
                    kind = %ErrorKind::ConfigInvalid,
                    var = key,
                    value = raw,
                    "Ignoring unparsable environment variable"
                );
                None
            }
        }
    }
}

fn scenario_var_segment(scenario: &str) -> String {
    scenario
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for VarSource {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            vars: iter
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }
}
