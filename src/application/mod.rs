//! Application services layer.

pub mod error;
pub mod feed;
pub mod filter;
pub mod modifier;
pub mod parse;
pub mod source;
pub mod syndication;
