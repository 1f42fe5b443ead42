//! Command-line interface parsing and handling
//!
//! This module handles parsing command-line arguments and executing the appropriate commands.

use std::error::Error;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use crate::core::assistant::{blog_template, Assistant};
use crate::core::client::{CompletionClient, CompletionResult, FragmentStream};
use crate::core::config::defaults::{self, BUILTIN_SCENARIOS, SCENARIO_CHAT, SCENARIO_COMMIT};
use crate::core::config::io::default_path_for;
use crate::core::config::{ConfigError, ConfigHandle, ConfigSources, FileConfig};
use crate::core::environment::Environment;
use crate::core::error::CompletionError;
use crate::core::scenario::Resolver;
use crate::core::transport::HttpTransport;

#[derive(Parser, Debug)]
#[command(name = "quill", version)]
#[command(about = "Chat, commit messages and blog outlines from an OpenAI-compatible API")]
#[command(
    long_about = "Quill talks to an OpenAI-compatible chat-completions endpoint. Each command \
uses a scenario (chat, commit, blog) with its own model, temperature and token budget, \
resolved for the active environment.\n\n\
Environment Variables:\n\
  AI_API_KEY                 API key (required for network commands)\n\
  AI_API_URL                 Chat-completions endpoint URL\n\
  AI_MODEL_NAME              Model for every scenario without its own override\n\
  AI_<SCENARIO>_MODEL_NAME   Per-scenario model, e.g. AI_COMMIT_MODEL_NAME\n\
  QUILL_ENV                  development, production or test (default production)\n\
  RUST_LOG                   Log filter, e.g. quill=debug"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Environment to use (development, production, test)
    #[arg(short = 'e', long, global = true, value_name = "ENV")]
    pub env: Option<Environment>,

    /// Config file to use instead of config.<env>.toml
    #[arg(short = 'c', long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Log debug output to stderr
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Ask a question and stream the answer
    Chat {
        #[arg(trailing_var_arg = true, required = true)]
        prompt: Vec<String>,
    },
    /// Generate a commit message from a summary of changes
    Commit {
        #[arg(trailing_var_arg = true, required = true)]
        summary: Vec<String>,
    },
    /// Generate a Markdown blog article outline
    Blog {
        #[arg(trailing_var_arg = true, required = true)]
        title: Vec<String>,
        /// Persona or house-style instructions prepended to the request
        #[arg(long, value_name = "TEXT")]
        prompt: Option<String>,
    },
    /// Check that the API is reachable with the current configuration
    Check,
    /// Print the resolved configuration
    Info,
    /// Write a starter config file for the active environment
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

pub fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    init_tracing(args.verbose);
    tokio::runtime::Runtime::new()?.block_on(async_main(args))
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "quill=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .compact()
        .try_init();
}

async fn async_main(args: Args) -> Result<(), Box<dyn Error>> {
    let sources = ConfigSources::discover(args.config.as_deref());
    let environment = args
        .env
        .or_else(|| sources.vars().environment())
        .unwrap_or_default();
    let handle = Arc::new(ConfigHandle::new(environment, Resolver::new(sources)));

    match args.command {
        Commands::Info => {
            handle.snapshot().print_all();
            Ok(())
        }
        Commands::Init { force } => init_config(environment, args.config, force),
        command => {
            let transport = HttpTransport::from_config(&handle.snapshot())?;
            let assistant = Assistant::new(handle, CompletionClient::new(transport));
            run_command(&assistant, command).await
        }
    }
}

async fn run_command(assistant: &Assistant, command: Commands) -> Result<(), Box<dyn Error>> {
    match command {
        Commands::Chat { prompt } => {
            let mut conversation = assistant.conversation();
            conversation.push_user(prompt.join(" "));
            match assistant.chat(&conversation).await {
                Ok(CompletionResult::Batch(text)) => println!("{text}"),
                Ok(CompletionResult::Stream(stream)) => print_stream(stream).await?,
                Err(err) => exit_with(SCENARIO_CHAT, &err),
            }
        }
        Commands::Commit { summary } => match assistant.commit_message(&summary.join(" ")).await {
            Ok(message) => println!("{message}"),
            Err(err) => exit_with(SCENARIO_COMMIT, &err),
        },
        Commands::Blog { title, prompt } => {
            let title = title.join(" ");
            match assistant.blog_article(&title, prompt.as_deref()).await {
                Ok(article) => println!("{article}"),
                Err(err) => {
                    warn!(kind = %err.kind(), error = %err, "Blog generation failed");
                    eprintln!("⚠️  Generation failed ({err}); printing the default outline");
                    print!("{}", blog_template(&title));
                }
            }
        }
        Commands::Check => {
            let info = assistant.model_info();
            if assistant.check_connection().await {
                println!("✅ {} reachable with model {}", info.api_url, info.model);
            } else {
                eprintln!("❌ Could not reach {} (run with -v for details)", info.api_url);
                std::process::exit(1);
            }
        }
        Commands::Info | Commands::Init { .. } => {}
    }
    Ok(())
}

/// Write fragments as they arrive. Ctrl+C cancels the stream and keeps
/// whatever was printed.
async fn print_stream(mut stream: FragmentStream) -> Result<(), Box<dyn Error>> {
    let token = stream.cancel_token();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    });

    let mut stdout = io::stdout();
    let mut failure = None;
    while let Some(item) = stream.next().await {
        match item {
            Ok(fragment) if fragment.is_final => break,
            Ok(fragment) => {
                write!(stdout, "{}", fragment.text)?;
                stdout.flush()?;
            }
            Err(err) => {
                failure = Some(err);
                break;
            }
        }
    }
    interrupt.abort();
    writeln!(stdout)?;

    if let Some(err) = failure {
        exit_with(SCENARIO_CHAT, &err);
    }
    if stream.is_cancelled() {
        eprintln!("⏹️  Cancelled after {} fragments", stream.delivered());
    }
    Ok(())
}

fn exit_with(scenario: &str, err: &CompletionError) -> ! {
    eprintln!("❌ {scenario} request failed [{}]: {err}", err.kind());
    std::process::exit(1);
}

fn starter_config() -> FileConfig {
    let mut config = FileConfig {
        api_url: Some(defaults::DEFAULT_API_URL.to_string()),
        model_name: Some(defaults::DEFAULT_MODEL.to_string()),
        ..FileConfig::default()
    };
    for name in BUILTIN_SCENARIOS {
        if let Some(scenario) = defaults::builtin_scenario(name) {
            config.scenarios.insert(name.to_string(), scenario);
        }
    }
    config
}

fn init_config(
    environment: Environment,
    explicit: Option<PathBuf>,
    force: bool,
) -> Result<(), Box<dyn Error>> {
    let path = explicit
        .or_else(|| default_path_for(environment))
        .ok_or(ConfigError::NoConfigDir)?;
    if path.exists() && !force {
        eprintln!(
            "❌ {} already exists (use --force to overwrite)",
            path.display()
        );
        std::process::exit(1);
    }
    starter_config().save_to_path(&path)?;
    println!("✅ Wrote {}", path.display());
    println!("   Set api_key there or export AI_API_KEY before running network commands.");
    Ok(())
}
