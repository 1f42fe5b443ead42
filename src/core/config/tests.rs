use super::data::{FileConfig, ScenarioOverride};
use super::handle::ConfigHandle;
use super::io::{ConfigError, ConfigSources};
use super::vars::VarSource;
use crate::core::environment::Environment;
use crate::core::scenario::Resolver;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn resolver_with(files: Vec<(Environment, FileConfig)>, vars: VarSource) -> Resolver {
    let files: HashMap<_, _> = files.into_iter().collect();
    Resolver::new(ConfigSources::new(files, vars))
}

fn vars(pairs: &[(&str, &str)]) -> VarSource {
    pairs.iter().copied().collect()
}

#[test]
fn builtin_scenarios_carry_their_parameters() {
    let resolver = Resolver::builtin();

    let chat = resolver.resolve(Environment::Production, "chat");
    assert_eq!(chat.temperature, 0.8);
    assert!(chat.stream);

    let commit = resolver.resolve(Environment::Production, "commit");
    assert_eq!(commit.temperature, 0.3);
    assert!(!commit.stream);
    assert_eq!(commit.max_tokens, 100);

    let blog = resolver.resolve(Environment::Production, "blog");
    assert_eq!(blog.temperature, 0.7);
    assert!(!blog.stream);
    assert_eq!(blog.max_tokens, 3000);

    let query = resolver.resolve(Environment::Production, "vector_query");
    assert_eq!(query.temperature, 0.5);
    assert!(!query.stream);
    assert_eq!(query.max_tokens, 2000);

    let vision = resolver.resolve(Environment::Production, "Vision");
    assert_eq!(vision.name, "vision");
    assert_eq!(vision.model, "Qwen/Qwen2.5-VL-72B-Instruct");
    assert!(vision.stream);
    assert_eq!(vision.max_tokens, 2000);
}

#[test]
fn vision_model_can_be_overridden_per_scenario() {
    let resolver = resolver_with(
        vec![],
        vars(&[
            ("AI_MODEL_NAME", "global-model"),
            ("AI_VISION_MODEL_NAME", "local-vl"),
        ]),
    );
    assert_eq!(resolver.resolve(Environment::Production, "vision").model, "local-vl");
    assert_eq!(
        resolver.resolve(Environment::Production, "vector_query").model,
        "global-model"
    );
}

#[test]
fn resolve_is_total_and_idempotent() {
    let resolver = resolver_with(
        vec![(
            Environment::Development,
            FileConfig {
                temperature: Some(1.1),
                ..Default::default()
            },
        )],
        vars(&[("AI_MAX_RETRIES", "4")]),
    );

    for env in Environment::ALL {
        for name in ["chat", "commit", "blog", "default", "", "no-such-thing"] {
            let first = resolver.resolve(env, name);
            let second = resolver.resolve(env, name);
            assert_eq!(first, second, "{env}/{name}");
        }
    }
}

#[test]
fn unknown_scenario_falls_back_to_default() {
    let resolver = Resolver::builtin();
    for env in Environment::ALL {
        let fallback = resolver.resolve(env, "mystery");
        assert_eq!(fallback, resolver.resolve(env, "default"));
        assert_eq!(fallback.name, "default");
        assert!(!fallback.stream);
        assert_eq!(fallback.max_tokens, 4096);
        assert_eq!(fallback.temperature, env.base().temperature);
    }
}

#[test]
fn scenario_names_are_case_insensitive() {
    let resolver = Resolver::builtin();
    let upper = resolver.resolve(Environment::Production, " COMMIT ");
    assert_eq!(upper, resolver.resolve(Environment::Production, "commit"));
    assert_eq!(upper.name, "commit");
}

#[test]
fn environment_base_values_flow_into_scenarios() {
    let resolver = Resolver::builtin();

    let test_chat = resolver.resolve(Environment::Test, "chat");
    assert_eq!(test_chat.model, "THUDM/GLM-4-9B-Chat");
    assert_eq!(test_chat.timeout, Duration::from_secs(15));
    assert_eq!(test_chat.max_retries, 1);

    let prod_chat = resolver.resolve(Environment::Production, "chat");
    assert_eq!(prod_chat.model, "THUDM/GLM-4-32B-0414");
    assert_eq!(prod_chat.timeout, Duration::from_secs(60));
    assert_eq!(prod_chat.max_retries, 3);
    assert_eq!(prod_chat.retry_delay, Duration::from_secs(2));
}

#[test]
fn global_variables_do_not_override_builtin_scenarios() {
    let resolver = resolver_with(vec![], vars(&[("AI_TEMPERATURE", "0.1"), ("AI_TIMEOUT", "9")]));

    assert_eq!(resolver.resolve(Environment::Production, "default").temperature, 0.1);
    let chat = resolver.resolve(Environment::Production, "chat");
    assert_eq!(chat.temperature, 0.8);
    assert_eq!(chat.timeout, Duration::from_secs(9));
}

#[test]
fn environment_specific_overrides_beat_builtin_scenarios() {
    let mut file = FileConfig::default();
    file.scenarios.insert(
        "commit".to_string(),
        ScenarioOverride {
            max_tokens: Some(60),
            temperature: Some(0.2),
            ..Default::default()
        },
    );
    let resolver = resolver_with(
        vec![(Environment::Production, file)],
        vars(&[("AI_COMMIT_TEMPERATURE", "0.4")]),
    );

    let commit = resolver.resolve(Environment::Production, "commit");
    assert_eq!(commit.max_tokens, 60);
    assert_eq!(commit.temperature, 0.4);

    // The file belongs to production only.
    let dev_commit = resolver.resolve(Environment::Development, "commit");
    assert_eq!(dev_commit.max_tokens, 100);
}

#[test]
fn runtime_override_has_the_last_word() {
    let resolver = resolver_with(vec![], vars(&[("AI_CHAT_TEMPERATURE", "0.4")]));
    let runtime = ScenarioOverride {
        temperature: Some(1.5),
        stream: Some(false),
        ..Default::default()
    };

    let chat = resolver.resolve_with(Environment::Production, "chat", &runtime);
    assert_eq!(chat.temperature, 1.5);
    assert!(!chat.stream);

    let fallback = resolver.resolve_with(Environment::Production, "unknown", &runtime);
    assert_eq!(fallback.name, "default");
    assert_eq!(fallback.temperature, 1.5);
}

#[test]
fn custom_scenarios_from_file_and_registration() {
    let mut file = FileConfig::default();
    file.scenarios.insert(
        "Review".to_string(),
        ScenarioOverride {
            temperature: Some(0.1),
            ..Default::default()
        },
    );
    let resolver = resolver_with(vec![(Environment::Production, file)], VarSource::default())
        .register(
            "summary",
            ScenarioOverride {
                max_tokens: Some(256),
                ..Default::default()
            },
        );

    let review = resolver.resolve(Environment::Production, "review");
    assert_eq!(review.name, "review");
    assert_eq!(review.temperature, 0.1);

    let summary = resolver.resolve(Environment::Test, "summary");
    assert_eq!(summary.name, "summary");
    assert_eq!(summary.max_tokens, 256);

    assert_eq!(
        resolver.scenario_names(Environment::Production),
        vec!["blog", "chat", "commit", "review", "summary", "vector_query", "vision"]
    );
    assert_eq!(
        resolver.scenario_names(Environment::Test),
        vec!["blog", "chat", "commit", "summary", "vector_query", "vision"]
    );
}

#[test]
fn out_of_range_values_are_clamped() {
    let file = FileConfig {
        temperature: Some(5.0),
        max_tokens: Some(0),
        timeout: Some(0),
        ..Default::default()
    };
    let resolver = resolver_with(vec![(Environment::Production, file)], VarSource::default());

    let config = resolver.resolve(Environment::Production, "default");
    assert_eq!(config.temperature, 2.0);
    assert_eq!(config.max_tokens, 1);
    assert_eq!(config.timeout, Duration::from_secs(1));

    let negative = ScenarioOverride {
        temperature: Some(-1.0),
        ..Default::default()
    };
    let config = resolver.resolve_with(Environment::Production, "chat", &negative);
    assert_eq!(config.temperature, 0.0);
}

#[test]
fn endpoint_prefers_variables_over_file() {
    let file = FileConfig {
        api_url: Some("https://file.example/v1/chat/completions".to_string()),
        api_key: Some("file-key".to_string()),
        ..Default::default()
    };
    let resolver = resolver_with(
        vec![(Environment::Production, file.clone())],
        vars(&[("AI_API_KEY", "env-key")]),
    );
    let endpoint = resolver.endpoint(Environment::Production);
    assert_eq!(endpoint.api_url, "https://file.example/v1/chat/completions");
    assert_eq!(endpoint.api_key.as_deref(), Some("env-key"));

    let unset = Resolver::builtin().endpoint(Environment::Production);
    assert_eq!(
        unset.api_url,
        "https://api.siliconflow.cn/v1/chat/completions"
    );
    assert_eq!(unset.api_key, None);
    assert!(!format!("{endpoint:?}").contains("env-key"));
}

#[test]
fn test_load_nonexistent_config() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let config_path = temp_dir.path().join("nonexistent_config.toml");

    let config = FileConfig::load_from_path(&config_path).expect("Failed to load config");
    assert_eq!(config, FileConfig::default());
}

#[test]
fn test_config_persistence_lifecycle() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let config_path = temp_dir.path().join("nested").join("config.production.toml");

    let mut config = FileConfig {
        api_url: Some("https://api.test.com/v1/chat/completions".to_string()),
        temperature: Some(0.6),
        system_prompt: Some("Be terse.".to_string()),
        ..Default::default()
    };
    config.scenarios.insert(
        "blog".to_string(),
        ScenarioOverride {
            max_tokens: Some(2000),
            ..Default::default()
        },
    );
    config
        .save_to_path(&config_path)
        .expect("Failed to save config");

    let loaded = FileConfig::load_from_path(&config_path).expect("Failed to load config");
    assert_eq!(loaded, config);

    let contents = std::fs::read_to_string(&config_path).unwrap();
    assert!(contents.contains("[scenarios.blog]"));
    assert!(!contents.contains("api_key"));
}

#[test]
fn parse_errors_carry_the_path() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let config_path = temp_dir.path().join("config.test.toml");
    std::fs::write(&config_path, "temperature = \"warm\"\n").unwrap();

    let err = FileConfig::load_from_path(&config_path).expect_err("parse should fail");
    assert!(matches!(err, ConfigError::Parse { .. }));
    assert!(err.to_string().contains("config.test.toml"));
}

#[test]
fn sources_load_per_environment_and_skip_broken_files() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    std::fs::write(
        temp_dir.path().join("config.development.toml"),
        "model_name = \"dev-model\"\n\n[scenarios.chat]\nstream = false\n",
    )
    .unwrap();
    std::fs::write(temp_dir.path().join("config.production.toml"), "not = [valid").unwrap();

    let sources = ConfigSources::load(Some(temp_dir.path()), None, VarSource::default());
    let resolver = Resolver::new(sources);

    let dev_chat = resolver.resolve(Environment::Development, "chat");
    assert_eq!(dev_chat.model, "dev-model");
    assert!(!dev_chat.stream);

    let prod_chat = resolver.resolve(Environment::Production, "chat");
    assert_eq!(prod_chat, Resolver::builtin().resolve(Environment::Production, "chat"));
}

#[test]
fn explicit_file_applies_to_every_environment() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let path = temp_dir.path().join("quill.toml");
    std::fs::write(&path, "api_key = \"k\"\nmax_retries = 7\n").unwrap();

    let resolver = Resolver::new(ConfigSources::load(None, Some(&path), VarSource::default()));
    for env in Environment::ALL {
        assert_eq!(resolver.resolve(env, "chat").max_retries, 7);
        assert_eq!(resolver.endpoint(env).api_key.as_deref(), Some("k"));
    }
}

#[test]
fn switching_environment_swaps_snapshots() {
    let handle = ConfigHandle::new(Environment::Production, Resolver::builtin());
    let before = handle.snapshot();

    let after = handle.switch_environment(Environment::Test);

    assert_eq!(before.environment(), Environment::Production);
    assert_eq!(before.resolve("chat").max_retries, 3);
    assert_eq!(after.environment(), Environment::Test);
    assert_eq!(handle.snapshot().resolve("chat").max_retries, 1);
    assert!(!Arc::ptr_eq(&before, &handle.snapshot()));
}

#[test]
fn concurrent_readers_always_see_consistent_snapshots() {
    let handle = Arc::new(ConfigHandle::new(Environment::Production, Resolver::builtin()));

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let handle = Arc::clone(&handle);
            std::thread::spawn(move || {
                for _ in 0..500 {
                    let snapshot = handle.snapshot();
                    let chat = snapshot.resolve("chat");
                    let expected = snapshot.environment().base().max_retries;
                    assert_eq!(chat.max_retries, expected);
                }
            })
        })
        .collect();

    for i in 0..200 {
        let env = Environment::ALL[i % Environment::ALL.len()];
        handle.switch_environment(env);
    }

    for reader in readers {
        reader.join().expect("reader panicked");
    }
}

#[test]
fn reload_keeps_the_environment() {
    let handle = ConfigHandle::new(Environment::Development, Resolver::builtin());
    let resolver = resolver_with(vec![], vars(&[("AI_MODEL_NAME", "reloaded")]));

    let snapshot = handle.reload(resolver);
    assert_eq!(snapshot.environment(), Environment::Development);
    assert_eq!(snapshot.resolve("blog").model, "reloaded");
}
