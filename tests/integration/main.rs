//! Integration tests for the crawl engine
//!
//! These tests use wiremock to create mock HTTP servers and run jobs end-to-end
//! against SQLite databases in temporary directories.

mod common;
mod fetch_tests;
mod job_tests;
mod scheduler_tests;
