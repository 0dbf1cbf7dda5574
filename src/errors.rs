use thiserror::Error;

/// Failure while resolving a URL into metadata and stream descriptors.
/// Fatal to the session, never retried automatically.
#[derive(Error, Debug)]
pub enum ResolutionError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Video unavailable: {0}")]
    Unavailable(String),

    #[error("Network error while resolving video: {0}")]
    Network(String),

    #[error("Could not parse extractor output: {0}")]
    Malformed(String),
}

#[derive(Error, Debug)]
pub enum MenuError {
    #[error("No downloadable streams were found for this video")]
    EmptyCatalog,

    #[error("Invalid selection: {0}")]
    InvalidSelection(String),
}

#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("Download cancelled")]
    Cancelled,

    #[error("Source failure: {0}")]
    SourceFailure(String),

    #[error("IO error while writing stream: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Media tool exited with code {0}")]
    ToolFailed(i32),

    #[error("Media tool could not be started: {0}")]
    ToolUnavailable(String),

    #[error("Processing cancelled")]
    Cancelled,

    #[error("IO error while talking to media tool: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Resolution error: {0}")]
    Resolution(#[from] ResolutionError),

    #[error("Menu error: {0}")]
    Menu(#[from] MenuError),

    #[error("Download error: {0}")]
    Download(#[from] DownloadError),

    #[error("Processing error: {0}")]
    Process(#[from] ProcessError),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl AppError {
    /// User-triggered cancellation is a distinct terminal outcome, not a failure.
    pub fn is_cancellation(&self) -> bool {
        matches!(
            self,
            AppError::Download(DownloadError::Cancelled) | AppError::Process(ProcessError::Cancelled)
        )
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
