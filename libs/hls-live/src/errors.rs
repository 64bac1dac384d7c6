use thiserror::Error;

/// A media playlist could not be interpreted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Malformed {tag} at line {line}: {reason}")]
pub struct ParseError {
    pub tag: String,
    pub line: usize,
    pub reason: String,
}

impl ParseError {
    pub fn new(tag: impl Into<String>, line: usize, reason: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            line,
            reason: reason.into(),
        }
    }
}

/// A new playlist can not be aligned with the segments already indexed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DiscontinuityError {
    #[error("sequence jumped from {last_known} to {first_listed}")]
    Gap { last_known: u64, first_listed: u64 },
    #[error("window {first_listed}..={last_listed} ends before retained position {first_retained}")]
    Rewound {
        first_retained: u64,
        first_listed: u64,
        last_listed: u64,
    },
    #[error("position {position} was {known} and is now listed as {listed}")]
    Collision {
        position: u64,
        known: String,
        listed: String,
    },
}

/// The start time could not be read from a segment prefix.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TimestampError {
    #[error("Segment is truncated inside {context}")]
    Truncated { context: &'static str },
    #[error("Box not found: {path}")]
    MissingBox { path: &'static str },
    #[error("Invalid value for {field}")]
    InvalidField { field: &'static str },
    #[error("Sync byte missing at offset {offset}")]
    SyncByteMissing { offset: usize },
    #[error("No PES packet carries a presentation timestamp")]
    NoPresentationTimestamp,
    #[error("Invalid X-TIMESTAMP-MAP: {value}")]
    InvalidTimestampMap { value: String },
    #[error("Not a WebVTT document")]
    NotWebVtt,
}

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Client error: {0}")]
    ClientError(#[from] reqwest::Error),
    #[error("Invalid response status {status} for {uri}")]
    InvalidResponseStatus {
        uri: String,
        status: reqwest::StatusCode,
    },
    #[error("Resource not found: {uri}")]
    NotFound { uri: String },
    #[error("Unsupported scheme: {uri}")]
    UnsupportedScheme { uri: String },
}

#[derive(Error, Debug)]
pub enum HlsLiveError {
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),
    #[error("Discontinuity: {0}")]
    Discontinuity(#[from] DiscontinuityError),
    #[error("Timestamp unavailable: {0}")]
    TimestampUnavailable(#[from] TimestampError),
    #[error("Network error: {0}")]
    Network(#[from] FetchError),
    #[error("Invalid uri {uri}: {err}")]
    InvalidUri { uri: String, err: url::ParseError },
    #[error("Master playlist parse failed: {reason}")]
    MasterPlaylist { reason: String },
    #[error("No media playlist found")]
    NoStreams,
    #[error("Unknown stream: {0}")]
    UnknownStream(usize),
    #[error("Invalid config: {0}")]
    Config(#[from] toml::de::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Cancelled")]
    Cancelled,
}

impl HlsLiveError {
    /// Errors after which a stream stops updating until it is restarted.
    pub fn halts_stream(&self) -> bool {
        matches!(self, HlsLiveError::Discontinuity(_))
    }
}
