//! Contact-form auto-responder — queue, rules, reply pipeline.

pub mod auth;
pub mod compose;
pub mod config;
pub mod error;
pub mod events;
pub mod llm;
pub mod mailer;
pub mod outbox;
pub mod queue;
pub mod rules;
pub mod server;
pub mod settings;
pub mod store;
pub mod worker;
