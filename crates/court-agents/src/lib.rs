//! LLM-backed collaborators and outer surfaces for the `court` trial engine.
//!
//! - [`agents`]: rig agents for the advocate, the critic and the judge,
//!   wrapped as [`court::ResearchProvider`] and [`court::Arbiter`].
//! - [`lookup`]: Wikipedia as a [`court::ContentLookup`].
//! - [`config`]: environment and TOML configuration.
//! - [`sink`] and [`telemetry`]: what is left behind after a trial.

pub mod agents;
pub mod config;
pub mod lookup;
pub mod prompts;
pub mod retry;
pub mod sink;
pub mod telemetry;
