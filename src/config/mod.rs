// src/config/mod.rs
pub mod interests;
pub mod settings;

pub use interests::{FeedInterests, InterestConfig};
pub use settings::{DownloaderSettings, MkvmergeSettings, Settings};
