pub mod bktree;
pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod hamming;
pub mod phash;
pub mod resolve;
pub mod scan;
pub mod search;
pub mod source;
pub mod store;
pub mod utils;

pub use config::Opts;
pub use error::{Error, Result};
