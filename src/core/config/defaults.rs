use std::time::Duration;

use crate::core::config::data::ScenarioOverride;
use crate::core::environment::Environment;

pub const DEFAULT_API_URL: &str = "https://api.siliconflow.cn/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "THUDM/GLM-4-32B-0414";
pub const DEFAULT_MAX_TOKENS: u32 = 4096;
pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Name reported for the fallback parameter set.
pub const DEFAULT_SCENARIO: &str = "default";

pub const SCENARIO_CHAT: &str = "chat";
pub const SCENARIO_COMMIT: &str = "commit";
pub const SCENARIO_BLOG: &str = "blog";
pub const SCENARIO_VECTOR_QUERY: &str = "vector_query";
pub const SCENARIO_VISION: &str = "vision";

pub const VISION_MODEL: &str = "Qwen/Qwen2.5-VL-72B-Instruct";

pub const BUILTIN_SCENARIOS: [&str; 5] = [
    SCENARIO_CHAT,
    SCENARIO_COMMIT,
    SCENARIO_BLOG,
    SCENARIO_VECTOR_QUERY,
    SCENARIO_VISION,
];

/// Fully populated base layer for an environment. Every scenario starts here.
pub fn base_layer(environment: Environment) -> ScenarioOverride {
    let base = environment.base();
    ScenarioOverride {
        model_name: Some(base.model.unwrap_or(DEFAULT_MODEL).to_string()),
        temperature: Some(base.temperature),
        max_tokens: Some(DEFAULT_MAX_TOKENS),
        stream: Some(false),
        timeout: Some(base.timeout.as_secs()),
        max_retries: Some(base.max_retries),
        retry_delay_ms: Some(DEFAULT_RETRY_DELAY.as_millis() as u64),
    }
}

pub fn builtin_scenario(name: &str) -> Option<ScenarioOverride> {
    let scenario = match name {
        SCENARIO_CHAT => ScenarioOverride {
            stream: Some(true),
            temperature: Some(0.8),
            ..Default::default()
        },
        SCENARIO_COMMIT => ScenarioOverride {
            stream: Some(false),
            temperature: Some(0.3),
            max_tokens: Some(100),
            ..Default::default()
        },
        SCENARIO_BLOG => ScenarioOverride {
            stream: Some(false),
            temperature: Some(0.7),
            max_tokens: Some(3000),
            ..Default::default()
        },
        SCENARIO_VECTOR_QUERY => ScenarioOverride {
            stream: Some(false),
            temperature: Some(0.5),
            max_tokens: Some(2000),
            ..Default::default()
        },
        SCENARIO_VISION => ScenarioOverride {
            model_name: Some(VISION_MODEL.to_string()),
            stream: Some(true),
            temperature: Some(0.7),
            max_tokens: Some(2000),
            ..Default::default()
        },
        _ => return None,
    };
    Some(scenario)
}

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a professional, friendly assistant. \
Answer accurately and concisely without unnecessary explanation. \
For technical questions, give practical advice.";
