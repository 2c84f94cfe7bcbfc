use reqwest::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("could not build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("request to {path} failed: {source}")]
    Transport {
        path: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{path} returned {status}: {message}")]
    Status {
        path: &'static str,
        status: StatusCode,
        message: String,
    },

    #[error("could not decode {path} response: {source}")]
    Decode {
        path: &'static str,
        #[source]
        source: reqwest::Error,
    },
}

impl BackendError {
    pub fn is_timeout(&self) -> bool {
        match self {
            BackendError::Transport { source, .. } => source.is_timeout(),
            _ => false,
        }
    }
}
