use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use url::Url;

use crate::config::HlsConfig;
use crate::errors::{HlsLiveError, TimestampError};
use crate::fetcher::{Fetcher, RequestType};
use crate::playlist::{parse_media_playlist, InitSegment, Playlist, PlaylistType};
use crate::rollover::RolloverState;
use crate::segment::{SegmentIndex, SegmentReference};
use crate::time::MediaTime;
use crate::timeline::{build_index, resolve_uri, update_index, IndexUpdate};
use crate::timestamp::{probe_range, read_timestamp, SegmentFormat};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamId(pub usize);

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamKind {
    Video,
    Audio,
    Text,
    /// Audio and video in the same segments
    Muxed,
}

/// Where a stream is in its update cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPhase {
    Idle,
    Fetching,
    Diffing,
    /// Stopped after a discontinuity or too many failures, until restarted
    Halted,
    /// The presentation is complete, no more updates
    Terminal,
}

/// Presentation-wide state a stream update needs.
pub(crate) struct UpdateContext<'a> {
    pub fetcher: &'a dyn Fetcher,
    pub config: &'a HlsConfig,
    pub presentation_type: PlaylistType,
}

/// What one refresh changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StreamUpdate {
    pub appended: usize,
    pub evicted: usize,
    pub ended: bool,
    pub timestamp_error: Option<TimestampError>,
}

#[derive(Debug)]
struct StreamState {
    consecutive_failures: u32,
}

/// One media playlist of a presentation and the index built from it.
#[derive(Debug)]
pub struct MediaStream {
    id: StreamId,
    kind: StreamKind,
    playlist_uri: Url,
    index: watch::Sender<Arc<SegmentIndex>>,
    phase: watch::Sender<StreamPhase>,
    target_duration: AtomicU64,
    updated_at: AtomicI64,
    /// Held for a whole update, so one stream never runs two at once
    state: Mutex<StreamState>,
    rollover: Mutex<RolloverState>,
    /// Wraps a text stream inherits from its video
    rollover_floor: AtomicU64,
}

impl MediaStream {
    pub fn new(id: StreamId, kind: StreamKind, playlist_uri: Url) -> Self {
        let (index, _) = watch::channel(Arc::new(SegmentIndex::new()));
        let (phase, _) = watch::channel(StreamPhase::Idle);
        Self {
            id,
            kind,
            state: Mutex::new(StreamState {
                consecutive_failures: 0,
            }),
            playlist_uri,
            index,
            phase,
            target_duration: AtomicU64::new(0),
            updated_at: AtomicI64::new(chrono::Utc::now().timestamp_millis()),
            rollover: Mutex::new(RolloverState::new()),
            rollover_floor: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    pub fn playlist_uri(&self) -> &Url {
        &self.playlist_uri
    }

    /// The latest published index.
    pub fn index(&self) -> Arc<SegmentIndex> {
        self.index.borrow().clone()
    }

    /// Receiver that sees every published index.
    pub fn watch_index(&self) -> watch::Receiver<Arc<SegmentIndex>> {
        self.index.subscribe()
    }

    pub fn phase(&self) -> StreamPhase {
        *self.phase.borrow()
    }

    pub fn watch_phase(&self) -> watch::Receiver<StreamPhase> {
        self.phase.subscribe()
    }

    pub fn segment_reference(&self, position: u64) -> Option<SegmentReference> {
        self.index.borrow().get(position).cloned()
    }

    /// Target duration of the last playlist, in seconds.
    pub fn target_duration(&self) -> u64 {
        self.target_duration.load(Ordering::Relaxed)
    }

    /// Wall-clock time of the last successful update, in unix milliseconds.
    pub fn updated_at(&self) -> i64 {
        self.updated_at.load(Ordering::Relaxed)
    }

    /// MPEG-TS wraps seen by this stream so far.
    pub async fn rollover_count(&self) -> u64 {
        self.rollover.lock().await.count()
    }

    /// Never resolve timestamps below `count` wraps. Text streams take the
    /// count of the video they are shown with, so their timestamp maps land
    /// on the same clock.
    pub(crate) async fn seed_rollover(&self, count: u64) {
        self.rollover_floor.fetch_max(count, Ordering::Relaxed);
        let mut rollover = self.rollover.lock().await;
        if rollover.count() < count {
            *rollover = RolloverState::with_floor(count, rollover.last());
        }
    }

    fn set_phase(&self, phase: StreamPhase) {
        self.phase.send_replace(phase);
    }

    fn publish(&self, index: SegmentIndex) {
        self.index.send_replace(Arc::new(index));
    }

    fn mark_updated(&self, playlist: &Playlist) {
        self.target_duration
            .store(playlist.target_duration, Ordering::Relaxed);
        self.updated_at
            .store(chrono::Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    /// Fetch and parse the playlist. Returns it with the uri it was served from.
    pub(crate) async fn load_playlist(
        &self,
        fetcher: &dyn Fetcher,
    ) -> Result<(Playlist, Url), HlsLiveError> {
        let response = fetcher
            .fetch(&self.playlist_uri, RequestType::Manifest)
            .await?;
        let playlist = parse_media_playlist(&response.text())?;
        Ok((playlist, response.uri))
    }

    /// Build the first index of the stream from an already loaded playlist.
    pub(crate) async fn initialize(
        &self,
        playlist: &Playlist,
        base_uri: &Url,
        ctx: &UpdateContext<'_>,
    ) -> Result<Option<TimestampError>, HlsLiveError> {
        let _state = self.state.lock().await;
        let (index, timestamp_error) = self.first_index(playlist, base_uri, ctx).await?;
        log::info!(
            "[{}]Initialized with {} segments starting at {}",
            self.id,
            index.len(),
            index.start_time().unwrap_or_default()
        );
        self.mark_updated(playlist);
        self.publish(index);
        Ok(timestamp_error)
    }

    /// One update cycle. Returns `Ok(None)` when the stream was not idle or
    /// another cycle is still running.
    pub(crate) async fn refresh(
        &self,
        ctx: &UpdateContext<'_>,
    ) -> Result<Option<StreamUpdate>, HlsLiveError> {
        let Ok(mut state) = self.state.try_lock() else {
            log::debug!("[{}]Update still running, skipping tick", self.id);
            return Ok(None);
        };
        if self.phase() != StreamPhase::Idle {
            return Ok(None);
        }

        self.set_phase(StreamPhase::Fetching);
        let response = match ctx
            .fetcher
            .fetch(&self.playlist_uri, RequestType::Manifest)
            .await
        {
            Ok(response) => response,
            Err(e) => {
                self.count_failure(&mut state, ctx);
                return Err(e.into());
            }
        };

        self.set_phase(StreamPhase::Diffing);
        let result = self.apply(&response.text(), &response.uri, ctx).await;
        match &result {
            Ok(_) => {
                state.consecutive_failures = 0;
                self.set_phase(StreamPhase::Idle);
            }
            // segment requests made while building a first index
            Err(HlsLiveError::Network(_)) => self.count_failure(&mut state, ctx),
            Err(e) if e.halts_stream() => {
                log::error!("[{}]Halting: {}", self.id, e);
                self.set_phase(StreamPhase::Halted);
            }
            Err(e) => {
                log::warn!("[{}]Keeping previous index: {}", self.id, e);
                self.set_phase(StreamPhase::Idle);
            }
        }
        result.map(Some)
    }

    /// Halt once the failure budget is spent, otherwise wait for the next tick.
    fn count_failure(&self, state: &mut StreamState, ctx: &UpdateContext<'_>) {
        state.consecutive_failures += 1;
        if state.consecutive_failures >= ctx.config.max_consecutive_failures.max(1) {
            log::error!(
                "[{}]Update failed {} times in a row, halting",
                self.id,
                state.consecutive_failures
            );
            self.set_phase(StreamPhase::Halted);
        } else {
            self.set_phase(StreamPhase::Idle);
        }
    }

    async fn apply(
        &self,
        text: &str,
        base_uri: &Url,
        ctx: &UpdateContext<'_>,
    ) -> Result<StreamUpdate, HlsLiveError> {
        let playlist = parse_media_playlist(text)?;
        let previous = self.index();

        let (update, timestamp_error) = if previous.is_empty() {
            // began empty or was restarted: this is the first real build
            let (index, timestamp_error) = self.first_index(&playlist, base_uri, ctx).await?;
            let appended = index.len();
            (
                IndexUpdate {
                    index,
                    appended,
                    evicted: 0,
                },
                timestamp_error,
            )
        } else {
            (update_index(&previous, &playlist, base_uri)?, None)
        };

        log::debug!(
            "[{}]Playlist applied: {} appended, {} evicted, {} retained",
            self.id,
            update.appended,
            update.evicted,
            update.index.len()
        );
        self.mark_updated(&playlist);
        let changed = !update.is_unchanged();
        let (appended, evicted) = (update.appended, update.evicted);
        if changed {
            self.publish(update.index);
        }

        Ok(StreamUpdate {
            appended,
            evicted,
            ended: playlist.is_ended,
            timestamp_error,
        })
    }

    /// Index a playlist from scratch. Live presentations place it at the
    /// first segment's own timestamp; VOD and EVENT start at 0.
    async fn first_index(
        &self,
        playlist: &Playlist,
        base_uri: &Url,
        ctx: &UpdateContext<'_>,
    ) -> Result<(SegmentIndex, Option<TimestampError>), HlsLiveError> {
        let mut timestamp_error = None;
        let start = if ctx.presentation_type == PlaylistType::Live && !playlist.segments.is_empty() {
            match self.discover_start_time(playlist, base_uri, ctx).await {
                Ok(start) => start,
                Err(HlsLiveError::TimestampUnavailable(e)) => {
                    log::warn!("[{}]Start time unavailable, using 0: {}", self.id, e);
                    timestamp_error = Some(e);
                    MediaTime::zero()
                }
                Err(e) => return Err(e),
            }
        } else {
            MediaTime::zero()
        };
        Ok((build_index(playlist, base_uri, start)?, timestamp_error))
    }

    /// Read the first segment's start time from a prefix of it.
    async fn discover_start_time(
        &self,
        playlist: &Playlist,
        base_uri: &Url,
        ctx: &UpdateContext<'_>,
    ) -> Result<MediaTime, HlsLiveError> {
        let Some(first) = playlist.segments.first() else {
            return Ok(MediaTime::zero());
        };
        let uri = resolve_uri(base_uri, &first.uri)?;
        let range = probe_range(first.byte_range, ctx.config.start_time_probe_bytes);
        let prefix = ctx
            .fetcher
            .fetch_range(&uri, range, RequestType::Segment)
            .await?;

        let format = match self.kind {
            StreamKind::Text => SegmentFormat::WebVtt,
            _ => SegmentFormat::from_uri(&uri).unwrap_or_else(|| SegmentFormat::sniff(&prefix.data)),
        };
        let init = match (&playlist.init_segment, format) {
            (Some(init), SegmentFormat::Mp4) => {
                Some(self.fetch_init_segment(init, base_uri, ctx).await?)
            }
            _ => None,
        };

        let raw = read_timestamp(format, init.as_deref(), &prefix.data)?;
        let start = raw.resolve(&mut *self.rollover.lock().await);
        log::debug!("[{}]First segment {} starts at {}", self.id, uri, start);
        Ok(start)
    }

    async fn fetch_init_segment(
        &self,
        init: &InitSegment,
        base_uri: &Url,
        ctx: &UpdateContext<'_>,
    ) -> Result<Bytes, HlsLiveError> {
        let uri = resolve_uri(base_uri, &init.uri)?;
        let response = match init.byte_range {
            Some(range) => {
                ctx.fetcher
                    .fetch_range(&uri, range, RequestType::Segment)
                    .await?
            }
            None => ctx.fetcher.fetch(&uri, RequestType::Segment).await?,
        };
        Ok(response.data)
    }

    /// Stop updating for good.
    pub(crate) fn finish(&self) {
        self.set_phase(StreamPhase::Terminal);
    }

    /// Bring a halted stream back. Its index is cleared and rebuilt, with a
    /// fresh start time, on the next update. The encoder may have reset its
    /// clock, so wraps seen before are forgotten down to the inherited floor.
    pub(crate) async fn restart(&self) -> bool {
        let mut state = self.state.lock().await;
        if self.phase() != StreamPhase::Halted {
            return false;
        }
        state.consecutive_failures = 0;
        *self.rollover.lock().await =
            RolloverState::with_floor(self.rollover_floor.load(Ordering::Relaxed), None);
        self.publish(SegmentIndex::new());
        self.set_phase(StreamPhase::Idle);
        log::info!("[{}]Restarted", self.id);
        true
    }
}
