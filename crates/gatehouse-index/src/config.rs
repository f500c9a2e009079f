use std::time::Duration;

pub const DEFAULT_INDEX_NAME: &str = "authorizations";

#[derive(Debug, Clone)]
pub struct IndexOptions {
    pub index_name: String,
    pub timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            index_name: DEFAULT_INDEX_NAME.to_string(),
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
        }
    }
}
