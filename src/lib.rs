//! Newsmill - content ingestion and summarization pipeline.
//!
//! A worker fabric that ingests articles, podcasts, news posts, and tweets,
//! drives them through a multi-stage processing pipeline, and persists the
//! results to SQLite.

pub mod cli;
pub mod config;
pub mod models;
pub mod pipeline;
pub mod repository;
pub mod scrapers;
pub mod services;
