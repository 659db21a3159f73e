pub mod cli;
pub mod config;
pub mod derive;
pub mod entry;
pub mod error;
pub mod extract;
pub mod inclusion;
pub mod platform;
pub mod previews;
pub mod report;
pub mod scheduler;
pub mod snapshot;
pub mod source;
pub mod store;
pub mod util;

pub use error::{Error, Result};
