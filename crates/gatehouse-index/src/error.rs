#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IndexError {
    /// The index could not be reached: refused connection, timeout or a
    /// gateway answering 502 to 504.
    #[error("search index unavailable: {0}")]
    Unavailable(String),
    #[error("search index rejected request (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("invalid search index response: {0}")]
    InvalidResponse(String),
}

impl IndexError {
    pub fn from_status(status: reqwest::StatusCode, body: String) -> Self {
        match status.as_u16() {
            502..=504 => IndexError::Unavailable(format!("HTTP {}: {body}", status.as_u16())),
            code => IndexError::Rejected {
                status: code,
                message: body,
            },
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, IndexError::Unavailable(_))
    }
}

impl From<reqwest::Error> for IndexError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            IndexError::InvalidResponse(e.to_string())
        } else if let Some(status) = e.status() {
            IndexError::from_status(status, e.to_string())
        } else {
            IndexError::Unavailable(e.to_string())
        }
    }
}

impl From<serde_json::Error> for IndexError {
    fn from(e: serde_json::Error) -> Self {
        IndexError::InvalidResponse(e.to_string())
    }
}
