pub mod account;
pub mod admin;
pub mod auth;
pub mod config;
pub mod error;
pub mod ingest;
pub mod metrics;
pub mod query;
pub mod routes;
pub mod seed;
pub mod storage;
pub mod types;
