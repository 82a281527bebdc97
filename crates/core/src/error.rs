use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("only PDF files are allowed: {0}")]
    NotPdf(String),

    #[error("maximum {max} documents allowed, received {received}")]
    TooManyFiles { max: usize, received: usize },

    #[error("invalid file name: {0}")]
    InvalidFileName(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("language model gateway is not configured: {0}")]
    Config(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status} from {url}: {snippet}")]
    Status {
        status: reqwest::StatusCode,
        url: String,
        snippet: String,
    },

    #[error("decode error: {0}")]
    Decode(String),

    #[error("model returned malformed output: {0}")]
    MalformedOutput(String),

    #[error("stream error: {0}")]
    Stream(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("session not found: {0}")]
    NotFound(String),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("session store failure: {0}")]
    Store(#[from] StoreError),

    #[error("pipeline task failed: {0}")]
    Task(String),

    #[error("event receiver dropped")]
    Disconnected,
}
