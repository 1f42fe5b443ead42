//! Scenario configuration resolution.
//!
//! A scenario is a named purpose (`chat`, `commit`, `blog`, or anything a
//! config file or caller registers) mapping to one immutable
//! [`ScenarioConfig`]. Resolution layers partial [`ScenarioOverride`]s, lowest
//! first:
//!
//! 1. built-in base values and the environment's base values
//! 2. top-level keys of the environment's config file
//! 3. global `AI_*` environment variables
//! 4. the built-in scenario, if any
//! 5. the file's `[scenarios.<name>]` table and caller-registered scenarios
//! 6. scenario-scoped `AI_<NAME>_*` variables
//! 7. the runtime override passed to [`Resolver::resolve_with`]
//!
//! Names that match no scenario resolve to the `default` set (layers 1-3
//! and 7). Resolution never fails; out-of-range values are clamped and
//! logged.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

use tracing::{debug, warn};

use crate::core::config::data::ScenarioOverride;
use crate::core::config::defaults::{
    base_layer, builtin_scenario, BUILTIN_SCENARIOS, DEFAULT_API_URL, DEFAULT_MAX_TOKENS,
    DEFAULT_MODEL, DEFAULT_RETRY_DELAY, DEFAULT_SCENARIO, DEFAULT_TEMPERATURE,
};
use crate::core::config::io::ConfigSources;
use crate::core::environment::Environment;
use crate::core::error::ErrorKind;

pub const MIN_TEMPERATURE: f32 = 0.0;
pub const MAX_TEMPERATURE: f32 = 2.0;

#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioConfig {
    pub name: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub stream: bool,
    /// Wall-clock budget for the whole call, retries included.
    pub timeout: Duration,
    pub max_retries: u32,
    /// First backoff delay; doubles per retry.
    pub retry_delay: Duration,
}

/// A value that was outside its allowed range and has been replaced.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigIssue {
    pub field: &'static str,
    pub given: String,
    pub applied: String,
}

impl ConfigIssue {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::ConfigInvalid
    }

    pub(crate) fn log(&self, scenario: &str) {
        warn!(
            kind = %self.kind(),
            scenario,
            field = self.field,
            given = %self.given,
            applied = %self.applied,
            "Clamped out-of-range configuration value"
        );
    }
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} adjusted to {}", self.field, self.given, self.applied)
    }
}

pub(crate) fn clamp_temperature(value: f32) -> (f32, Option<ConfigIssue>) {
    let applied = if value.is_finite() {
        value.clamp(MIN_TEMPERATURE, MAX_TEMPERATURE)
    } else {
        DEFAULT_TEMPERATURE
    };
    if applied == value {
        (value, None)
    } else {
        let issue = ConfigIssue {
            field: "temperature",
            given: value.to_string(),
            applied: applied.to_string(),
        };
        (applied, Some(issue))
    }
}

pub(crate) fn clamp_max_tokens(value: u32) -> (u32, Option<ConfigIssue>) {
    if value > 0 {
        return (value, None);
    }
    let issue = ConfigIssue {
        field: "max_tokens",
        given: value.to_string(),
        applied: "1".to_string(),
    };
    (1, Some(issue))
}

fn clamp_timeout(seconds: u64) -> (Duration, Option<ConfigIssue>) {
    if seconds > 0 {
        return (Duration::from_secs(seconds), None);
    }
    let issue = ConfigIssue {
        field: "timeout",
        given: seconds.to_string(),
        applied: "1".to_string(),
    };
    (Duration::from_secs(1), Some(issue))
}

impl ScenarioConfig {
    fn from_layer(name: String, layer: ScenarioOverride) -> Self {
        let (temperature, temperature_issue) =
            clamp_temperature(layer.temperature.unwrap_or(DEFAULT_TEMPERATURE));
        let (max_tokens, max_tokens_issue) =
            clamp_max_tokens(layer.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS));
        let (timeout, timeout_issue) = clamp_timeout(layer.timeout.unwrap_or(60));

        for issue in [temperature_issue, max_tokens_issue, timeout_issue]
            .into_iter()
            .flatten()
        {
            issue.log(&name);
        }

        Self {
            model: layer
                .model_name
                .filter(|model| !model.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            temperature,
            max_tokens,
            stream: layer.stream.unwrap_or(false),
            timeout,
            max_retries: layer.max_retries.unwrap_or(0),
            retry_delay: layer
                .retry_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_RETRY_DELAY),
            name,
        }
    }
}

/// Where requests go and which credential they carry.
#[derive(Clone, PartialEq)]
pub struct Endpoint {
    pub api_url: String,
    pub api_key: Option<String>,
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("api_url", &self.api_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Resolver {
    sources: ConfigSources,
    registered: BTreeMap<String, ScenarioOverride>,
}

impl Resolver {
    pub fn new(sources: ConfigSources) -> Self {
        Self {
            sources,
            registered: BTreeMap::new(),
        }
    }

    /// Built-in values only: no files, no variables.
    pub fn builtin() -> Self {
        Self::default()
    }

    /// Add a caller-defined scenario. It sits at the same layer as a config
    /// file's scenario table and is applied after it.
    pub fn register(mut self, name: impl Into<String>, scenario: ScenarioOverride) -> Self {
        self.registered
            .insert(normalize_name(&name.into()), scenario);
        self
    }

    pub fn resolve(&self, environment: Environment, scenario: &str) -> ScenarioConfig {
        self.resolve_with(environment, scenario, &ScenarioOverride::default())
    }

    pub fn resolve_with(
        &self,
        environment: Environment,
        scenario: &str,
        runtime: &ScenarioOverride,
    ) -> ScenarioConfig {
        let file = self.sources.file(environment);
        let vars = self.sources.vars();
        let key = normalize_name(scenario);

        let mut layer = base_layer(environment);
        if let Some(file) = file {
            layer.merge(&file.base_override());
        }
        layer.merge(&vars.base_override());

        let builtin = builtin_scenario(&key);
        let from_file = file.and_then(|file| file.scenario(&key));
        let registered = self.registered.get(&key);
        let known = key != DEFAULT_SCENARIO
            && (builtin.is_some() || from_file.is_some() || registered.is_some());

        let name = if known {
            if let Some(builtin) = &builtin {
                layer.merge(builtin);
            }
            if let Some(from_file) = from_file {
                layer.merge(from_file);
            }
            if let Some(registered) = registered {
                layer.merge(registered);
            }
            layer.merge(&vars.scenario_override(&key));
            key
        } else {
            if key != DEFAULT_SCENARIO {
                debug!(scenario, "Unknown scenario; using the default parameter set");
            }
            DEFAULT_SCENARIO.to_string()
        };

        layer.merge(runtime);
        ScenarioConfig::from_layer(name, layer)
    }

    pub fn endpoint(&self, environment: Environment) -> Endpoint {
        let file = self.sources.file(environment);
        let vars = self.sources.vars();
        let api_url = vars
            .api_url()
            .map(str::to_string)
            .or_else(|| file.and_then(|f| f.api_url.clone()))
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let api_key = vars
            .api_key()
            .map(str::to_string)
            .or_else(|| file.and_then(|f| f.api_key.clone()))
            .filter(|key| !key.trim().is_empty());
        Endpoint { api_url, api_key }
    }

    pub fn debug(&self, environment: Environment) -> bool {
        self.sources
            .file(environment)
            .and_then(|file| file.debug)
            .unwrap_or_else(|| environment.base().debug)
    }

    pub fn system_prompt(&self, environment: Environment) -> Option<&str> {
        self.sources
            .file(environment)
            .and_then(|file| file.system_prompt.as_deref())
            .filter(|prompt| !prompt.trim().is_empty())
    }

    /// Every scenario name that resolves to something other than `default`.
    pub fn scenario_names(&self, environment: Environment) -> Vec<String> {
        let mut names: BTreeSet<String> =
            BUILTIN_SCENARIOS.iter().map(|name| name.to_string()).collect();
        if let Some(file) = self.sources.file(environment) {
            names.extend(file.scenarios.keys().map(|name| normalize_name(name)));
        }
        names.extend(self.registered.keys().cloned());
        names.remove(DEFAULT_SCENARIO);
        names.into_iter().collect()
    }
}

fn normalize_name(name: &str) -> String {
    name.trim().to_ascii_lowercase()
}
