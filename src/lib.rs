//! Filtering RSS/Atom proxy with an upstream-revalidated disk cache.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
