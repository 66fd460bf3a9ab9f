pub mod cli;
pub mod commands;
pub mod config;
pub mod context;
pub mod decode;
pub mod ingest;
pub mod issues;
pub mod logging;
