pub mod banner;
pub mod config;
pub mod consts;
pub mod credentials;
pub mod engine;
pub mod events;
pub mod project;
pub mod prompts;
pub mod provider;
pub mod repository;
pub mod research;
pub mod schema;
pub mod server;
pub mod slides;
pub mod tracker;
