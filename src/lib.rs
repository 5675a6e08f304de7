pub mod config;
pub mod error;
pub mod fetch;
pub mod layout;
pub mod process;

pub use config::FeedConfig;
pub use error::{FeedError, ReadFailure};
pub use layout::Layout;
pub use process::{load_and_convert, FeedReport};
