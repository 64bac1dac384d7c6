use std::sync::Arc;

use futures::future::try_join_all;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::HlsConfig;
use crate::errors::HlsLiveError;
use crate::events::PresentationEvent;
use crate::fetcher::{Fetcher, RequestType};
use crate::playlist::{
    is_master_playlist, parse_master_playlist, parse_media_playlist, MasterPlaylist, PlaylistType,
    RenditionKind, VariantInfo,
};
use crate::presentation::PresentationTimeline;
use crate::scheduler;
use crate::segment::SegmentIndex;
use crate::stream::{MediaStream, StreamId, StreamKind, UpdateContext};
use crate::time::MediaTime;
use crate::timeline::resolve_uri;

const EVENT_CHANNEL_CAPACITY: usize = 100;

/// A variant and the streams that are played together with it.
#[derive(Debug, Clone)]
pub struct Variant {
    pub info: VariantInfo,
    /// Video, or muxed audio and video
    pub video: StreamId,
    pub audio: Vec<StreamId>,
    pub text: Vec<StreamId>,
}

/// Everything the update loop and the [`Presentation`] handles share.
pub(crate) struct PresentationShared {
    pub streams: Vec<MediaStream>,
    pub variants: Vec<Variant>,
    pub timeline: PresentationTimeline,
    pub config: HlsConfig,
    pub fetcher: Arc<dyn Fetcher>,
    pub events: broadcast::Sender<PresentationEvent>,
}

impl PresentationShared {
    pub(crate) fn emit(&self, event: PresentationEvent) {
        let _ = self.events.send(event);
    }

    /// Text streams still waiting for a start time take the wraps their
    /// video has seen since.
    pub(crate) async fn seed_text_rollover(&self) {
        for stream in self
            .streams
            .iter()
            .filter(|stream| stream.kind() == StreamKind::Text && stream.index().is_empty())
        {
            let count = video_rollover_count(&self.streams, &self.variants, stream.id()).await;
            stream.seed_rollover(count).await;
        }
    }

    fn end_time(&self) -> MediaTime {
        self.streams
            .iter()
            .filter_map(|stream| stream.index().end_time())
            .max()
            .unwrap_or_default()
    }

    /// Switch the presentation to VOD and stop every stream.
    pub(crate) fn finish(&self) {
        let duration = self.end_time();
        if !self.timeline.set_vod(duration) {
            return;
        }
        log::info!("Presentation ended, duration {}", duration);
        for stream in &self.streams {
            stream.finish();
        }
        self.emit(PresentationEvent::TimelineChanged {
            presentation_type: PlaylistType::Vod,
            duration: Some(duration),
        });
    }
}

/// A started presentation. Cheap to clone.
#[derive(Clone)]
pub struct Presentation {
    shared: Arc<PresentationShared>,
}

impl Presentation {
    pub fn timeline(&self) -> &PresentationTimeline {
        &self.shared.timeline
    }

    pub fn streams(&self) -> &[MediaStream] {
        &self.shared.streams
    }

    pub fn variants(&self) -> &[Variant] {
        &self.shared.variants
    }

    pub fn text_streams(&self) -> impl Iterator<Item = &MediaStream> {
        self.shared
            .streams
            .iter()
            .filter(|stream| stream.kind() == StreamKind::Text)
    }

    pub fn stream(&self, id: StreamId) -> Option<&MediaStream> {
        self.shared.streams.get(id.0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PresentationEvent> {
        self.shared.events.subscribe()
    }

    /// Resume a halted stream. Returns `false` if it was not halted.
    pub async fn restart_stream(&self, id: StreamId) -> Result<bool, HlsLiveError> {
        let stream = self.stream(id).ok_or(HlsLiveError::UnknownStream(id.0))?;
        Ok(stream.restart().await)
    }

    /// Suggested playback start, see [`PresentationTimeline::initial_seek_position`].
    pub fn initial_seek_position(&self) -> Option<MediaTime> {
        let indexes: Vec<Arc<SegmentIndex>> =
            self.shared.streams.iter().map(|s| s.index()).collect();
        let indexes: Vec<&SegmentIndex> = indexes.iter().map(|index| index.as_ref()).collect();
        let target = self
            .shared
            .streams
            .iter()
            .map(|s| s.target_duration())
            .max()
            .unwrap_or(0);
        self.shared
            .timeline
            .initial_seek_position(&indexes, self.shared.config.presentation_delay(target))
    }
}

/// Entry point: loads a presentation and keeps it updated while it is live.
pub struct HlsParser {
    config: HlsConfig,
    fetcher: Arc<dyn Fetcher>,
    events: broadcast::Sender<PresentationEvent>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl HlsParser {
    pub fn new(config: HlsConfig, fetcher: Arc<dyn Fetcher>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            config,
            fetcher,
            events,
            cancel: CancellationToken::new(),
            task: None,
        }
    }

    /// Events of the presentation started next, including those raised
    /// while it starts.
    pub fn subscribe(&self) -> broadcast::Receiver<PresentationEvent> {
        self.events.subscribe()
    }

    /// Load the manifest at `uri` and index every media playlist it leads to.
    ///
    /// A presentation that is still live gets an update loop, which runs
    /// until the presentation ends or [`HlsParser::stop`] is called.
    pub async fn start(&mut self, uri: &str) -> Result<Presentation, HlsLiveError> {
        self.stop();
        self.cancel = CancellationToken::new();

        let uri = Url::parse(uri).map_err(|err| HlsLiveError::InvalidUri {
            uri: uri.to_string(),
            err,
        })?;
        let response = self.fetcher.fetch(&uri, RequestType::Manifest).await?;
        let text = response.text();

        let (streams, variants, loaded) = if is_master_playlist(&text) {
            let master = parse_master_playlist(&text)?;
            let (plans, variants) = plan_streams(&master, &response.uri)?;
            let streams: Vec<MediaStream> = plans
                .into_iter()
                .enumerate()
                .map(|(i, (kind, uri))| MediaStream::new(StreamId(i), kind, uri))
                .collect();
            let loaded = try_join_all(
                streams
                    .iter()
                    .map(|stream| stream.load_playlist(self.fetcher.as_ref())),
            )
            .await?;
            (streams, variants, loaded)
        } else {
            let playlist = parse_media_playlist(&text)?;
            let variant = Variant {
                info: VariantInfo {
                    uri: uri.to_string(),
                    bandwidth: 0,
                    codecs: None,
                    resolution: None,
                    frame_rate: None,
                    audio_group: None,
                    subtitle_group: None,
                },
                video: StreamId(0),
                audio: Vec::new(),
                text: Vec::new(),
            };
            let stream = MediaStream::new(StreamId(0), StreamKind::Muxed, uri.clone());
            (vec![stream], vec![variant], vec![(playlist, response.uri)])
        };

        let types: Vec<PlaylistType> = loaded.iter().map(|(p, _)| p.playlist_type()).collect();
        let presentation_type = if types.contains(&PlaylistType::Vod) {
            PlaylistType::Vod
        } else if types.contains(&PlaylistType::Event) {
            PlaylistType::Event
        } else {
            PlaylistType::Live
        };
        log::info!(
            "[{}]Starting {} presentation with {} streams",
            uri,
            presentation_type.as_str(),
            streams.len()
        );

        {
            let ctx = UpdateContext {
                fetcher: self.fetcher.as_ref(),
                config: &self.config,
                presentation_type,
            };
            // text last: its timestamp map needs the video's rollover count
            let mut order: Vec<usize> = (0..streams.len()).collect();
            order.sort_by_key(|&i| streams[i].kind() == StreamKind::Text);
            for i in order {
                let (playlist, base_uri) = &loaded[i];
                if streams[i].kind() == StreamKind::Text {
                    let count =
                        video_rollover_count(&streams, &variants, streams[i].id()).await;
                    streams[i].seed_rollover(count).await;
                }
                if let Some(error) = streams[i].initialize(playlist, base_uri, &ctx).await? {
                    let _ = self.events.send(PresentationEvent::TimestampUnavailable {
                        stream: streams[i].id(),
                        error,
                    });
                }
            }
        }

        let timeline = if presentation_type == PlaylistType::Vod {
            for stream in &streams {
                stream.finish();
            }
            let duration = streams
                .iter()
                .filter_map(|stream| stream.index().end_time())
                .max()
                .unwrap_or_default();
            PresentationTimeline::vod(duration)
        } else {
            PresentationTimeline::new(presentation_type)
        };

        let shared = Arc::new(PresentationShared {
            streams,
            variants,
            timeline,
            config: self.config.clone(),
            fetcher: self.fetcher.clone(),
            events: self.events.clone(),
        });
        if shared.timeline.is_live() {
            self.task = Some(tokio::spawn(scheduler::run(
                shared.clone(),
                self.cancel.clone(),
            )));
        }
        Ok(Presentation { shared })
    }

    /// Stop updating. Pending timers and requests are dropped immediately.
    pub fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
            log::debug!("Update loop stopped");
        }
    }
}

impl Drop for HlsParser {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Most wraps seen by the video of any variant that shows `text`.
async fn video_rollover_count(
    streams: &[MediaStream],
    variants: &[Variant],
    text: StreamId,
) -> u64 {
    let mut count = 0;
    for variant in variants.iter().filter(|variant| variant.text.contains(&text)) {
        if let Some(video) = streams.get(variant.video.0) {
            count = count.max(video.rollover_count().await);
        }
    }
    count
}

fn intern(planned: &mut Vec<(StreamKind, Url)>, kind: StreamKind, uri: Url) -> StreamId {
    if let Some(i) = planned.iter().position(|(_, known)| *known == uri) {
        return StreamId(i);
    }
    planned.push((kind, uri));
    StreamId(planned.len() - 1)
}

/// One stream per distinct media playlist: variants first, then audio, then
/// subtitles.
fn plan_streams(
    master: &MasterPlaylist,
    base: &Url,
) -> Result<(Vec<(StreamKind, Url)>, Vec<Variant>), HlsLiveError> {
    if master.variants.is_empty() {
        return Err(HlsLiveError::NoStreams);
    }

    let mut planned = Vec::new();
    let mut video_ids = Vec::new();
    for variant in &master.variants {
        let has_audio = variant
            .audio_group
            .as_deref()
            .is_some_and(|group| master.renditions_in(RenditionKind::Audio, group).next().is_some());
        let kind = if has_audio {
            StreamKind::Video
        } else {
            StreamKind::Muxed
        };
        video_ids.push(intern(&mut planned, kind, resolve_uri(base, &variant.uri)?));
    }
    for (rendition_kind, kind) in [
        (RenditionKind::Audio, StreamKind::Audio),
        (RenditionKind::Subtitles, StreamKind::Text),
    ] {
        for rendition in master.renditions.iter().filter(|r| r.kind == rendition_kind) {
            intern(&mut planned, kind, resolve_uri(base, &rendition.uri)?);
        }
    }

    let mut variants = Vec::new();
    for (variant, video) in master.variants.iter().zip(video_ids) {
        let mut group_ids = |kind: RenditionKind, group: Option<&str>| {
            let mut ids = Vec::new();
            for rendition in group
                .into_iter()
                .flat_map(|group| master.renditions_in(kind, group))
            {
                let uri = resolve_uri(base, &rendition.uri)?;
                let stream_kind = match kind {
                    RenditionKind::Audio => StreamKind::Audio,
                    RenditionKind::Subtitles => StreamKind::Text,
                };
                ids.push(intern(&mut planned, stream_kind, uri));
            }
            Ok::<_, HlsLiveError>(ids)
        };
        let audio = group_ids(RenditionKind::Audio, variant.audio_group.as_deref())?;
        let text = group_ids(RenditionKind::Subtitles, variant.subtitle_group.as_deref())?;
        variants.push(Variant {
            info: variant.clone(),
            video,
            audio,
            text,
        });
    }

    Ok((planned, variants))
}
