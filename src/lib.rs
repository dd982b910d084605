pub mod access;
pub mod chunking;
pub mod cohere;
pub mod commands;
pub mod config;
pub mod cooldown;
pub mod error;
pub mod governor;
pub mod grounding;
pub mod handler;
pub mod health;
pub mod history;
pub mod llm;
pub mod metrics;
pub mod orchestrator;
pub mod pinecone;
pub mod schema;
pub mod speech;
pub mod trivia;
pub mod voice;
