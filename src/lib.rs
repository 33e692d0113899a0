//! Lead-generation core: contact extraction from scraped text, heuristic lead
//! scoring, AI enrichment and paced bulk outreach.
//!
//! # Modules
//!
//! - `patterns`: Ordered contact rules (regex + validator) and skip lists.
//! - `contact_extractor`: Email/phone/WhatsApp/website/social extraction.
//! - `kpi`: Follower and engagement figures.
//! - `scoring`: Heuristic lead scoring.
//! - `description_cache`: Checksummed description cache shared across runs.
//! - `generation`: LLM client, description and outreach generation.
//! - `scraper`: Search and website collaborators.
//! - `transports`: SMTP and WhatsApp senders.
//! - `retry`: Bounded retry for transient provider errors.
//! - `dispatcher`: Paced sequential bulk sending.
//! - `orchestrator`: The staged enrichment pipeline.
//! - `task_manager`: Background runs, cancellation and cleanup.
//! - `storage`: Lead store and delivery log (Postgres or in-memory).
//! - `handlers`: HTTP request handlers.

pub mod circuit_breaker;
pub mod config;
pub mod contact_extractor;
pub mod db;
pub mod description_cache;
pub mod dispatcher;
pub mod errors;
pub mod generation;
pub mod handlers;
pub mod kpi;
pub mod models;
pub mod orchestrator;
pub mod patterns;
pub mod retry;
pub mod scoring;
pub mod scraper;
pub mod storage;
pub mod task_manager;
pub mod transports;
