use thiserror::Error;

#[derive(Error, Debug)]
pub enum MediaError {
    #[error("failed to start {tool}: {message}")]
    Spawn { tool: String, message: String },

    #[error("{tool} exited with {status}: {stderr}")]
    Failed {
        tool: String,
        status: String,
        stderr: String,
    },

    #[error("{tool} exceeded the {secs}s deadline")]
    Timeout { tool: String, secs: u64 },

    #[error("probe error: {0}")]
    Probe(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("encode error: {0}")]
    Encode(String),

    #[error("media IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MediaError {
    /// Whether the failure came from unreadable input rather than the tooling.
    pub fn is_decode(&self) -> bool {
        matches!(self, Self::Decode(_) | Self::Probe(_))
    }
}
