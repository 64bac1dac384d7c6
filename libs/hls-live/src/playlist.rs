use std::fmt;

use m3u8_rs::AlternativeMediaType;
use serde::{Deserialize, Serialize};

use crate::errors::{HlsLiveError, ParseError};
use crate::time::{MediaTime, TIMELINE_TIMESCALE};

/// How a presentation evolves over time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlaylistType {
    /// Complete, never updated again.
    Vod,
    /// Grows by appending, nothing is ever removed.
    Event,
    /// Sliding window, old segments are evicted.
    Live,
}

impl PlaylistType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlaylistType::Vod => "VOD",
            PlaylistType::Event => "EVENT",
            PlaylistType::Live => "LIVE",
        }
    }
}

/// Inclusive byte range inside a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// Range of `length` bytes starting at `offset`. Empty ranges are rejected.
    pub fn from_length(length: u64, offset: u64) -> Option<Self> {
        let last = length.checked_sub(1)?;
        Some(Self {
            start: offset,
            end: offset.checked_add(last)?,
        })
    }

    pub fn length(&self) -> u64 {
        self.end - self.start + 1
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.length(), self.start)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitSegment {
    pub uri: String,
    pub byte_range: Option<ByteRange>,
}

/// One `EXTINF` entry as listed, before any alignment with earlier playlists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistSegment {
    pub uri: String,
    pub duration: MediaTime,
    pub byte_range: Option<ByteRange>,
}

/// A parsed snapshot of one media playlist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Playlist {
    pub target_duration: u64,
    pub media_sequence: u64,
    /// `false` when `EXT-X-MEDIA-SEQUENCE` was absent and 0 was assumed.
    pub media_sequence_declared: bool,
    /// Value of `EXT-X-PLAYLIST-TYPE`, if any.
    pub declared_type: Option<PlaylistType>,
    pub init_segment: Option<InitSegment>,
    pub segments: Vec<PlaylistSegment>,
    pub is_ended: bool,
}

impl Playlist {
    pub fn playlist_type(&self) -> PlaylistType {
        match (self.is_ended, self.declared_type) {
            (true, _) | (_, Some(PlaylistType::Vod)) => PlaylistType::Vod,
            (_, Some(PlaylistType::Event)) => PlaylistType::Event,
            _ => PlaylistType::Live,
        }
    }

    pub fn first_position(&self) -> Option<u64> {
        (!self.segments.is_empty()).then_some(self.media_sequence)
    }

    pub fn last_position(&self) -> Option<u64> {
        let count = self.segments.len() as u64;
        count
            .checked_sub(1)
            .and_then(|last| self.media_sequence.checked_add(last))
    }

    /// Segments paired with the position each one occupies in the stream.
    pub fn positioned_segments(&self) -> impl Iterator<Item = (u64, &PlaylistSegment)> {
        self.segments
            .iter()
            .zip(self.media_sequence..=u64::MAX)
            .map(|(segment, position)| (position, segment))
    }
}

/// Parse media playlist text.
///
/// `EXTINF` applies to the next URI line; other tags may appear in any order.
/// Unknown tags and comments are ignored.
pub fn parse_media_playlist(text: &str) -> Result<Playlist, ParseError> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut lines = text
        .lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty());

    match lines.next() {
        Some((_, "#EXTM3U")) => {}
        Some((line_no, _)) => {
            return Err(ParseError::new(
                "EXTM3U",
                line_no,
                "playlist must start with #EXTM3U",
            ))
        }
        None => return Err(ParseError::new("EXTM3U", 1, "playlist is empty")),
    }

    let mut target_duration = None;
    let mut media_sequence: Option<(usize, u64)> = None;
    let mut declared_type = None;
    let mut init_segment = None;
    let mut is_ended = false;
    let mut segments = Vec::new();

    let mut pending_duration: Option<(usize, MediaTime)> = None;
    let mut pending_range = None;
    let mut next_range_start = 0u64;
    let mut last_line = 1;

    for (line_no, line) in lines {
        last_line = line_no;
        let Some(tag) = line.strip_prefix('#') else {
            let Some((_, duration)) = pending_duration.take() else {
                return Err(ParseError::new(
                    "EXTINF",
                    line_no,
                    format!("uri {line} is not preceded by EXTINF"),
                ));
            };
            segments.push(PlaylistSegment {
                uri: line.to_string(),
                duration,
                byte_range: pending_range.take(),
            });
            continue;
        };

        if !tag.starts_with("EXT") {
            // plain comment
            continue;
        }

        let (name, value) = match tag.split_once(':') {
            Some((name, value)) => (name, Some(value.trim())),
            None => (tag, None),
        };
        match name {
            "EXTINF" => {
                if let Some((previous, _)) = pending_duration {
                    return Err(ParseError::new(
                        "EXTINF",
                        line_no,
                        format!("EXTINF at line {previous} has no uri"),
                    ));
                }
                let value = required(name, line_no, value)?;
                let duration = value.split(',').next().unwrap_or_default();
                let duration = MediaTime::parse_secs(duration, TIMELINE_TIMESCALE)
                    .filter(|duration| !duration.is_zero())
                    .ok_or_else(|| {
                        ParseError::new(name, line_no, format!("invalid duration {duration}"))
                    })?;
                pending_duration = Some((line_no, duration));
            }
            "EXT-X-TARGETDURATION" => {
                let value = required(name, line_no, value)?;
                // some packagers write a decimal here, round it up
                let duration = MediaTime::parse_secs(value, 1000).ok_or_else(|| {
                    ParseError::new(name, line_no, format!("invalid duration {value}"))
                })?;
                target_duration = Some(duration.ticks().div_ceil(1000));
            }
            "EXT-X-MEDIA-SEQUENCE" => {
                let value = required(name, line_no, value)?;
                let sequence = value.parse::<u64>().map_err(|_| {
                    ParseError::new(name, line_no, format!("invalid sequence {value}"))
                })?;
                media_sequence = Some((line_no, sequence));
            }
            "EXT-X-PLAYLIST-TYPE" => {
                declared_type = match required(name, line_no, value)? {
                    "VOD" => Some(PlaylistType::Vod),
                    "EVENT" => Some(PlaylistType::Event),
                    other => {
                        return Err(ParseError::new(
                            name,
                            line_no,
                            format!("unknown playlist type {other}"),
                        ))
                    }
                };
            }
            "EXT-X-ENDLIST" => is_ended = true,
            "EXT-X-BYTERANGE" => {
                let value = required(name, line_no, value)?;
                let range = parse_byte_range(value, next_range_start)
                    .ok_or_else(|| ParseError::new(name, line_no, format!("invalid range {value}")))?;
                next_range_start = range.end + 1;
                pending_range = Some(range);
            }
            "EXT-X-MAP" => {
                let value = required(name, line_no, value)?;
                let map = parse_map(value)
                    .ok_or_else(|| ParseError::new(name, line_no, format!("invalid map {value}")))?;
                // the map in effect for the first listed segment is the one that matters
                if segments.is_empty() {
                    init_segment = Some(map);
                }
            }
            _ => {}
        }
    }

    if let Some((line_no, _)) = pending_duration {
        return Err(ParseError::new("EXTINF", line_no, "EXTINF has no uri"));
    }
    if target_duration.is_none() && !segments.is_empty() {
        return Err(ParseError::new(
            "EXT-X-TARGETDURATION",
            last_line,
            "required tag is missing",
        ));
    }
    if let Some((line_no, sequence)) = media_sequence {
        let listed = segments.len().saturating_sub(1) as u64;
        if sequence.checked_add(listed).is_none() {
            return Err(ParseError::new(
                "EXT-X-MEDIA-SEQUENCE",
                line_no,
                format!("sequence {sequence} overflows with {} segments", segments.len()),
            ));
        }
    }

    Ok(Playlist {
        target_duration: target_duration.unwrap_or_default(),
        media_sequence: media_sequence.map_or(0, |(_, sequence)| sequence),
        media_sequence_declared: media_sequence.is_some(),
        declared_type,
        init_segment,
        segments,
        is_ended,
    })
}

fn required<'a>(tag: &str, line: usize, value: Option<&'a str>) -> Result<&'a str, ParseError> {
    match value {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(ParseError::new(tag, line, "missing value")),
    }
}

/// `<length>[@<offset>]`; without an offset the range continues at `next_start`.
fn parse_byte_range(value: &str, next_start: u64) -> Option<ByteRange> {
    let (length, offset) = match value.split_once('@') {
        Some((length, offset)) => (length, Some(offset.trim().parse::<u64>().ok()?)),
        None => (value, None),
    };
    let length = length.trim().parse::<u64>().ok()?;
    ByteRange::from_length(length, offset.unwrap_or(next_start))
}

fn parse_map(value: &str) -> Option<InitSegment> {
    let mut uri = None;
    let mut byte_range = None;
    for (key, value) in parse_attributes(value) {
        match key {
            "URI" => uri = Some(value.to_string()),
            "BYTERANGE" => byte_range = Some(parse_byte_range(value, 0)?),
            _ => {}
        }
    }
    Some(InitSegment {
        uri: uri.filter(|uri| !uri.is_empty())?,
        byte_range,
    })
}

/// Split an attribute list (`KEY=VALUE,KEY="quoted, value"`) into pairs.
fn parse_attributes(value: &str) -> Vec<(&str, &str)> {
    let mut attributes = Vec::new();
    let mut rest = value.trim();
    while !rest.is_empty() {
        let Some((key, after)) = rest.split_once('=') else {
            break;
        };
        let (value, remaining) = if let Some(quoted) = after.strip_prefix('"') {
            match quoted.split_once('"') {
                Some((value, remaining)) => (value, remaining),
                None => (quoted, ""),
            }
        } else {
            after.split_once(',').map_or((after, ""), |(value, remaining)| (value, remaining))
        };
        attributes.push((key.trim(), value.trim()));
        rest = remaining.trim_start_matches(',').trim_start();
    }
    attributes
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariantInfo {
    pub uri: String,
    pub bandwidth: u64,
    pub codecs: Option<String>,
    pub resolution: Option<(u64, u64)>,
    pub frame_rate: Option<f64>,
    pub audio_group: Option<String>,
    pub subtitle_group: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenditionKind {
    Audio,
    Subtitles,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenditionInfo {
    pub kind: RenditionKind,
    pub uri: String,
    pub group_id: String,
    pub language: Option<String>,
    pub name: String,
}

/// The parts of a master playlist needed to find every media playlist.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MasterPlaylist {
    pub variants: Vec<VariantInfo>,
    pub renditions: Vec<RenditionInfo>,
}

impl MasterPlaylist {
    pub fn renditions_in(
        &self,
        kind: RenditionKind,
        group_id: &str,
    ) -> impl Iterator<Item = &RenditionInfo> {
        let group_id = group_id.to_string();
        self.renditions
            .iter()
            .filter(move |r| r.kind == kind && r.group_id == group_id)
    }
}

pub fn is_master_playlist(text: &str) -> bool {
    m3u8_rs::is_master_playlist(text.as_bytes())
}

pub fn parse_master_playlist(text: &str) -> Result<MasterPlaylist, HlsLiveError> {
    let playlist = m3u8_rs::parse_master_playlist_res(text.as_bytes()).map_err(|e| {
        HlsLiveError::MasterPlaylist {
            reason: format!("{:?}", e),
        }
    })?;

    let variants = playlist
        .variants
        .iter()
        .filter(|variant| !variant.is_i_frame)
        .map(|variant| VariantInfo {
            uri: variant.uri.clone(),
            bandwidth: variant.bandwidth,
            codecs: variant.codecs.clone(),
            resolution: variant.resolution.as_ref().map(|r| (r.width, r.height)),
            frame_rate: variant.frame_rate,
            audio_group: variant.audio.clone(),
            subtitle_group: variant.subtitles.clone(),
        })
        .collect();

    let renditions = playlist
        .alternatives
        .iter()
        .filter_map(|media| {
            let kind = match media.media_type {
                AlternativeMediaType::Audio => RenditionKind::Audio,
                AlternativeMediaType::Subtitles => RenditionKind::Subtitles,
                _ => return None,
            };
            // renditions without a uri are muxed into the variant
            let uri = media.uri.clone()?;
            Some(RenditionInfo {
                kind,
                uri,
                group_id: media.group_id.clone(),
                language: media.language.clone(),
                name: media.name.clone(),
            })
        })
        .collect();

    Ok(MasterPlaylist {
        variants,
        renditions,
    })
}
