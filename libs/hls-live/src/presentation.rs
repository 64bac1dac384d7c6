use std::time::Duration;

use tokio::sync::watch;

use crate::playlist::PlaylistType;
use crate::segment::SegmentIndex;
use crate::time::{MediaTime, TIMELINE_TIMESCALE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimelineState {
    pub presentation_type: PlaylistType,
    /// Known once the presentation is VOD
    pub duration: Option<MediaTime>,
}

/// What the player is told about the presentation as a whole.
///
/// The type only ever moves towards [`PlaylistType::Vod`]; once there it is
/// fixed.
#[derive(Debug)]
pub struct PresentationTimeline {
    state: watch::Sender<TimelineState>,
}

impl PresentationTimeline {
    pub fn new(presentation_type: PlaylistType) -> Self {
        let (state, _) = watch::channel(TimelineState {
            presentation_type,
            duration: None,
        });
        Self { state }
    }

    /// A presentation that was complete from the first playlist.
    pub fn vod(duration: MediaTime) -> Self {
        let (state, _) = watch::channel(TimelineState {
            presentation_type: PlaylistType::Vod,
            duration: Some(duration),
        });
        Self { state }
    }

    pub fn state(&self) -> TimelineState {
        *self.state.borrow()
    }

    pub fn presentation_type(&self) -> PlaylistType {
        self.state.borrow().presentation_type
    }

    pub fn duration(&self) -> Option<MediaTime> {
        self.state.borrow().duration
    }

    /// Segments are still being added.
    pub fn is_live(&self) -> bool {
        matches!(
            self.presentation_type(),
            PlaylistType::Event | PlaylistType::Live
        )
    }

    /// Growing, with an origin that never moves.
    pub fn is_in_progress(&self) -> bool {
        self.presentation_type() == PlaylistType::Event
    }

    /// Mark the presentation complete. Returns `false` if it already was.
    pub fn set_vod(&self, duration: MediaTime) -> bool {
        self.state.send_if_modified(|state| {
            if state.presentation_type == PlaylistType::Vod {
                return false;
            }
            state.presentation_type = PlaylistType::Vod;
            state.duration = Some(duration);
            true
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<TimelineState> {
        self.state.subscribe()
    }

    /// Where playback should begin.
    ///
    /// VOD starts at the earliest segment. Live presentations start
    /// `presentation_delay` behind the live edge, but never before the
    /// start of the window every stream still covers.
    pub fn initial_seek_position(
        &self,
        indexes: &[&SegmentIndex],
        presentation_delay: Duration,
    ) -> Option<MediaTime> {
        let starts = indexes.iter().filter_map(|index| index.start_time());
        if !self.is_live() {
            return starts.min();
        }

        let window_start = starts.max()?;
        let live_edge = indexes.iter().filter_map(|index| index.end_time()).min()?;
        let delay = MediaTime::new(
            (presentation_delay.as_micros() * TIMELINE_TIMESCALE as u128 / 1_000_000)
                .try_into()
                .unwrap_or(u64::MAX),
            TIMELINE_TIMESCALE,
        );
        Some(window_start.max(live_edge.saturating_sub(delay)))
    }
}
