use reqwest::StatusCode;

/// Errors returned by the local API client.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The machine rejected the bearer token.
    #[error("Authentication error: {0}")]
    AuthenticationFailed(String),
    #[error(transparent)]
    RequestFailed(#[from] RequestFailure),
    /// A string did not match any value of a catalog enum.
    #[error("Invalid value: {0}")]
    InvalidValue(String),
}

/// Why a request to the local API did not succeed.
#[derive(Debug, thiserror::Error)]
pub enum RequestFailure {
    #[error("Requesting local API failed with exception: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("Querying local API failed with statuscode: {0}")]
    Status(StatusCode),
    #[error("Local API returned an invalid body: {0}")]
    Body(#[source] reqwest::Error),
}

impl Error {
    /// Status code carried by a failed request, if the machine answered at all.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::AuthenticationFailed(_) => Some(StatusCode::FORBIDDEN),
            Error::RequestFailed(RequestFailure::Status(status)) => Some(*status),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
