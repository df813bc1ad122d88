use thiserror::Error;

/// Failures of the data store adapter.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Transport-level failure talking to a remote store.
    #[error("Store transport error: {0}")]
    Http(#[from] reqwest::Error),

    /// The store answered with a non-success status.
    #[error("Store returned {status}: {body}")]
    Status { status: u16, body: String },

    /// A record could not be encoded or decoded.
    #[error("Store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Empty or malformed path.
    #[error("Invalid store path '{0}'")]
    InvalidPath(String),

    /// The store refused the operation.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Failures of the external matchmaking service.
#[derive(Error, Debug)]
pub enum MatchmakingError {
    #[error("Matchmaking transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Non-success HTTP status.
    #[error("Matchmaking service returned {status}: {message}")]
    Service { status: u16, message: String },

    /// A well-formed reply with a status the client does not understand.
    #[error("Matchmaking rejected the request ({status}): {message}")]
    Rejected { status: String, message: String },
}

/// Errors surfaced by every mutating client operation.
#[derive(Error, Debug)]
pub enum ChatError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Matchmaking(#[from] MatchmakingError),

    /// The identity provider refused or failed the request.
    #[error("Authentication failed: {0}")]
    Identity(String),

    #[error("Username '{0}' is already taken")]
    UsernameTaken(String),

    #[error("{0}")]
    InvalidUsername(String),

    #[error("{0}")]
    InvalidCredentials(String),

    #[error("Message text is empty")]
    EmptyMessage,

    #[error("Not signed in")]
    NotAuthenticated,

    /// The operation is not allowed in the current state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Only the sender can delete this message")]
    NotMessageOwner,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ChatError>;
