pub mod ai;
pub mod audit;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod export;
pub mod ingest;
pub mod model;
pub mod outreach;
pub mod pagespeed;
pub mod pipeline;
pub mod scoring;
