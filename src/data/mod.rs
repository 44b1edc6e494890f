//! Core data types shared across the job queue, crawl store, and HTTP edge.

pub mod models;
