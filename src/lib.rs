pub mod analyzer;
pub mod api;
pub mod cache;
pub mod client;
pub mod config;
pub mod coordinator;
pub mod ebay;
pub mod error;
pub mod estimator;
pub mod http;
pub mod llm;
pub mod metrics;
pub mod models;
pub mod scraper;
pub mod service;
