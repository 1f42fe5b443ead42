use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Deployment environment selecting endpoint, credential and base parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Environment {
    Development,
    #[default]
    Production,
    Test,
}

/// Values that differ between environments before any file or variable
/// overrides are applied.
#[derive(Debug, Clone, PartialEq)]
pub struct EnvironmentBase {
    pub timeout: Duration,
    pub max_retries: u32,
    pub temperature: f32,
    pub model: Option<&'static str>,
    pub debug: bool,
}

impl Environment {
    pub const ALL: [Environment; 3] = [
        Environment::Development,
        Environment::Production,
        Environment::Test,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Production => "production",
            Environment::Test => "test",
        }
    }

    pub fn base(self) -> EnvironmentBase {
        match self {
            Environment::Development => EnvironmentBase {
                timeout: Duration::from_secs(30),
                max_retries: 2,
                temperature: 0.8,
                model: None,
                debug: true,
            },
            Environment::Production => EnvironmentBase {
                timeout: Duration::from_secs(60),
                max_retries: 3,
                temperature: 0.7,
                model: None,
                debug: false,
            },
            // Smaller model keeps test runs cheap.
            Environment::Test => EnvironmentBase {
                timeout: Duration::from_secs(15),
                max_retries: 1,
                temperature: 0.5,
                model: Some("THUDM/GLM-4-9B-Chat"),
                debug: true,
            },
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            "test" | "testing" => Ok(Environment::Test),
            other => Err(format!(
                "unknown environment '{other}' (expected development, production or test)"
            )),
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Environment> for String {
    fn from(value: Environment) -> Self {
        value.as_str().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_aliases_case_insensitively() {
        assert_eq!("DEV".parse::<Environment>(), Ok(Environment::Development));
        assert_eq!("prod".parse::<Environment>(), Ok(Environment::Production));
        assert_eq!(" Testing ".parse::<Environment>(), Ok(Environment::Test));
        assert!("staging".parse::<Environment>().is_err());
    }

    #[test]
    fn display_round_trips_through_parse() {
        for env in Environment::ALL {
            assert_eq!(env.to_string().parse::<Environment>(), Ok(env));
        }
    }

    #[test]
    fn test_environment_uses_small_model_and_one_retry() {
        let base = Environment::Test.base();
        assert_eq!(base.model, Some("THUDM/GLM-4-9B-Chat"));
        assert_eq!(base.max_retries, 1);
        assert_eq!(base.timeout, Duration::from_secs(15));
        assert!(Environment::Development.base().debug);
        assert!(!Environment::Production.base().debug);
    }
}
