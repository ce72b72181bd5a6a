//! Offline-capable request interception and cache lifecycle.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
pub mod worker;
