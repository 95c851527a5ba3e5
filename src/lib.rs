pub mod agent;
pub mod api;
pub mod chat;
pub mod config;
pub mod events;
pub mod questions;
pub mod services;
pub mod store;
pub mod supervisor;
pub mod tasks;
