//! Quill is a small client for OpenAI-compatible chat-completion APIs,
//! tuned for three jobs: interactive chat, commit-message generation and
//! blog-article scaffolding.
//!
//! The crate is organized around a small set of layers:
//! - [`core::scenario`] resolves an environment and scenario name into an
//!   immutable parameter set, layering built-ins, config files and `AI_*`
//!   variables.
//! - [`core::request`] binds a [`core::message::Conversation`] to those
//!   parameters.
//! - [`core::client`] sends requests through a [`core::transport::Transport`],
//!   retrying transient failures, and returns either the full reply or a
//!   cancellable [`core::client::FragmentStream`].
//! - [`core::stream_decoder`] turns event-stream bytes into fragments.
//! - [`core::assistant`] packages the scenario helpers the binaries use.
//! - [`api`] defines the wire payloads.
//!
//! The binary (`src/main.rs`) routes through [`crate::cli::main`].

pub mod api;
pub mod cli;
pub mod core;
