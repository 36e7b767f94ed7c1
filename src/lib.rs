pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod listener;
pub mod models;
pub mod processor;
pub mod queue;
pub mod runtime;
pub mod sweeper;
