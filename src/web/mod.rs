//! HTTP/WebSocket edge: Scrape Dispatch, Crawl Kickoff, and the Progress
//! Streamer.

pub mod auth;
pub mod crawl;
pub mod dispatch;
pub mod error;
pub mod progress;
pub mod routes;

pub use routes::create_router;
