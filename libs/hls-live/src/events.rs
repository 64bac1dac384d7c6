use std::sync::Arc;

use crate::errors::{HlsLiveError, TimestampError};
use crate::playlist::PlaylistType;
use crate::stream::StreamId;
use crate::time::MediaTime;

/// Notifications for the player, sent on the presentation's broadcast channel.
#[derive(Debug, Clone)]
pub enum PresentationEvent {
    TimelineChanged {
        presentation_type: PlaylistType,
        duration: Option<MediaTime>,
    },
    IndexUpdated {
        stream: StreamId,
        appended: usize,
        evicted: usize,
    },
    /// The start time could not be read, the stream's timeline starts at 0.
    TimestampUnavailable {
        stream: StreamId,
        error: TimestampError,
    },
    /// A refresh failed, the previous index is still published.
    UpdateFailed {
        stream: StreamId,
        error: Arc<HlsLiveError>,
    },
    /// The stream stopped updating until it is restarted.
    StreamHalted {
        stream: StreamId,
        error: Arc<HlsLiveError>,
    },
}
