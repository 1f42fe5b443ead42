//! Scenario helpers used by the chat shell, the commit helper and the blog
//! generator. Each call takes one configuration snapshot and uses it
//! throughout, so an environment switch never affects a call in flight.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Local;
use serde::Serialize;
use tracing::{debug, warn};

use crate::core::client::{CompletionClient, CompletionOutcome, CompletionResult};
use crate::core::config::defaults::{
    DEFAULT_SCENARIO, DEFAULT_SYSTEM_PROMPT, SCENARIO_BLOG, SCENARIO_CHAT, SCENARIO_COMMIT,
};
use crate::core::config::io::config_dir;
use crate::core::config::{ConfigHandle, ScenarioOverride};
use crate::core::environment::Environment;
use crate::core::error::CompletionError;
use crate::core::message::Conversation;
use crate::core::request::build;

pub const PROMPT_FILE_NAME: &str = "default_prompt.txt";

const BLOG_PERSONA: &str = "You are a professional technical blog writing assistant.";

/// What the active configuration would send, without contacting the API.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelInfo {
    pub environment: Environment,
    pub model: String,
    pub api_url: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

pub struct Assistant {
    config: Arc<ConfigHandle>,
    client: CompletionClient,
    system_prompt: String,
}

impl Assistant {
    /// The chat system prompt comes from the environment's config file when
    /// set there, then the prompt file, then the built-in default.
    pub fn new(config: Arc<ConfigHandle>, client: CompletionClient) -> Self {
        let from_config = config
            .snapshot()
            .resolver()
            .system_prompt(config.environment())
            .map(str::to_string);
        let system_prompt = from_config
            .or_else(|| default_prompt_path().and_then(|path| load_prompt_file(&path)))
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());
        Self {
            config,
            client,
            system_prompt,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn config(&self) -> &ConfigHandle {
        &self.config
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// A new conversation seeded with the chat system prompt.
    pub fn conversation(&self) -> Conversation {
        Conversation::with_system(self.system_prompt.as_str())
    }

    /// Continue a conversation under the chat scenario.
    pub async fn chat(&self, conversation: &Conversation) -> CompletionOutcome<CompletionResult> {
        let scenario = self.config.snapshot().resolve(SCENARIO_CHAT);
        let request = build(conversation, &scenario)?;
        self.client.complete(request).await
    }

    /// One-shot prompt under any scenario, with optional per-call overrides.
    pub async fn ask(
        &self,
        prompt: &str,
        scenario: &str,
        runtime: Option<&ScenarioOverride>,
    ) -> CompletionOutcome<CompletionResult> {
        let active = self.config.snapshot();
        let scenario = match runtime {
            Some(runtime) => active.resolve_with(scenario, runtime),
            None => active.resolve(scenario),
        };
        let request = build(&Conversation::single_user(prompt), &scenario)?;
        self.client.complete(request).await
    }

    /// Generate a one-line commit message for a summary of file changes.
    pub async fn commit_message(&self, changes_summary: &str) -> CompletionOutcome<String> {
        if changes_summary.trim().is_empty() {
            return Err(CompletionError::EmptyConversation);
        }
        let raw = self
            .ask(&commit_prompt(changes_summary), SCENARIO_COMMIT, None)
            .await?
            .into_text()
            .await?;
        let message = clean_commit_message(&raw);
        if message.is_empty() {
            return Err(CompletionError::InvalidResponse(
                "model returned an empty commit message".to_string(),
            ));
        }
        debug!(message = %message, "Generated commit message");
        Ok(message)
    }

    /// Generate a Markdown article skeleton with front matter.
    pub async fn blog_article(
        &self,
        title: &str,
        user_prompt: Option<&str>,
    ) -> CompletionOutcome<String> {
        let now = timestamp();
        let prompt = blog_prompt(title, user_prompt, &now);
        let text = self
            .ask(&prompt, SCENARIO_BLOG, None)
            .await?
            .into_text()
            .await?;
        Ok(text.trim().to_string())
    }

    /// Send a tiny request and report whether a non-empty reply came back.
    pub async fn check_connection(&self) -> bool {
        let probe = ScenarioOverride {
            max_tokens: Some(10),
            temperature: Some(0.1),
            stream: Some(false),
            ..ScenarioOverride::default()
        };
        let reply = match self.ask("ping", DEFAULT_SCENARIO, Some(&probe)).await {
            Ok(result) => result.into_text().await,
            Err(err) => Err(err),
        };
        match reply {
            Ok(text) => !text.trim().is_empty(),
            Err(err) => {
                warn!(kind = %err.kind(), error = %err, "Connection check failed");
                false
            }
        }
    }

    pub fn model_info(&self) -> ModelInfo {
        let active = self.config.snapshot();
        let scenario = active.resolve(DEFAULT_SCENARIO);
        ModelInfo {
            environment: active.environment(),
            model: scenario.model,
            api_url: active.endpoint().api_url,
            max_tokens: scenario.max_tokens,
            temperature: scenario.temperature,
            timeout_secs: scenario.timeout.as_secs(),
            max_retries: scenario.max_retries,
        }
    }
}

pub fn default_prompt_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join(PROMPT_FILE_NAME))
}

/// Read a prompt file, dropping lines that start with `#`. Returns `None`
/// when the file is missing, unreadable or blank after filtering.
pub fn load_prompt_file(path: &Path) -> Option<String> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return None,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "Failed to read prompt file");
            return None;
        }
    };
    let prompt = contents
        .lines()
        .filter(|line| !line.trim_start().starts_with('#'))
        .collect::<Vec<_>>()
        .join("\n");
    let prompt = prompt.trim();
    (!prompt.is_empty()).then(|| prompt.to_string())
}

/// Static article skeleton for when generation is unavailable.
pub fn blog_template(title: &str) -> String {
    let now = timestamp();
    format!(
        "---\ntitle: \"{title}\"\ndate: {now}\ntags: [notes]\ncategories: [general]\ndescription: \"Notes on {title}\"\n---\n\n## Introduction\n\n## Main content\n\n## In practice\n\n## Summary\n"
    )
}

fn timestamp() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

fn commit_prompt(changes_summary: &str) -> String {
    format!(
        "Write a concise, specific Git commit message for the following changes.\n\n\
         Changes:\n{changes_summary}\n\n\
         Rules:\n\
         1. A single line of roughly 20 to 72 characters.\n\
         2. Say concretely what changed; avoid vague verbs like \"update\" or \"modify\".\n\
         3. Reply with the commit message only, without explanation or quotes."
    )
}

fn blog_prompt(title: &str, user_prompt: Option<&str>, now: &str) -> String {
    let persona = user_prompt
        .map(str::trim)
        .filter(|prompt| !prompt.is_empty())
        .unwrap_or(BLOG_PERSONA);
    format!(
        "{persona}\n\n\
         Create a complete technical blog article structure for the title \"{title}\".\n\n\
         Requirements:\n\
         1. Output a full Markdown document.\n\
         2. Start with front matter containing title, date, tags, categories and description.\n\
         3. Use the date {now}.\n\
         4. Two or three tags and exactly one category.\n\
         5. At most five h2 sections, each with at most three h3 sub-points.\n\
         6. Keep the description short and focused on the core value.\n\n\
         Output only the Markdown, with no commentary."
    )
}

/// First non-empty line, trimmed, with wrapping quotes removed.
fn clean_commit_message(raw: &str) -> String {
    let line = raw
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or_default();
    line.trim_matches(|c| matches!(c, '"' | '\'' | '`'))
        .trim()
        .to_string()
}
