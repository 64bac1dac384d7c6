pub mod config;
pub mod errors;
pub mod events;
pub mod fetcher;
pub mod parser;
pub mod playlist;
pub mod presentation;
pub mod rollover;
mod scheduler;
pub mod segment;
pub mod stream;
pub mod time;
pub mod timeline;
pub mod timestamp;

// Re-export main types
pub use config::{HlsConfig, RetryParameters};
pub use errors::{DiscontinuityError, FetchError, HlsLiveError, ParseError, TimestampError};
pub use events::PresentationEvent;
pub use fetcher::{FetchResponse, Fetcher, HttpFetcher, RequestType};
pub use parser::{HlsParser, Presentation, Variant};
pub use playlist::{ByteRange, Playlist, PlaylistType};
pub use presentation::{PresentationTimeline, TimelineState};
pub use rollover::RolloverState;
pub use segment::{SegmentIndex, SegmentReference};
pub use stream::{MediaStream, StreamId, StreamKind, StreamPhase};
pub use time::MediaTime;
