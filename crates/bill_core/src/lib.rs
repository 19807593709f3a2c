pub mod cache;
pub mod catalog;
pub mod chat;
pub mod config;
pub mod db;
pub mod detail;
pub mod favorites;
pub mod ingest;
pub mod progress;
pub mod schema;
