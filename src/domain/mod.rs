//! Domain layer types.

pub mod feed;
pub mod query;
