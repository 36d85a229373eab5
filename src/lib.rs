pub mod analytics;
pub mod clustering;
pub mod db;
pub mod error;
pub mod features;
pub mod ingest;
pub mod parser;
pub mod settings;
pub mod similarity;
pub mod utils;

pub use error::{AltwatchError, Result};
