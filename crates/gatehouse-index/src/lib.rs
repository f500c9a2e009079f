pub mod config;
pub mod error;
pub mod http;
pub mod memory;
pub mod traits;

pub use config::IndexOptions;
pub use error::IndexError;
pub use http::HttpSearchIndex;
pub use memory::InMemorySearchIndex;
pub use traits::SearchIndex;
