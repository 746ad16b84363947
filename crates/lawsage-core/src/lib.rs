pub mod authority;
pub mod cache;
pub mod config;
pub mod error;
pub mod generation;
pub mod graph;
pub mod hardener;
pub mod retrieval;
pub mod retry;
pub mod safety;
pub mod state;
pub mod types;

pub use types::*;
