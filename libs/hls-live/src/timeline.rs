//! Turns playlist snapshots into a segment index.
//!
//! Both entry points are pure: they read the previous index and the new
//! playlist and return a new index, so a failed update leaves the published
//! index untouched.

use url::Url;

use crate::errors::{DiscontinuityError, HlsLiveError};
use crate::playlist::{ByteRange, Playlist, PlaylistSegment};
use crate::segment::{SegmentIndex, SegmentReference};
use crate::time::{MediaTime, TIMELINE_TIMESCALE};

/// Result of applying a playlist to an existing index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexUpdate {
    pub index: SegmentIndex,
    pub appended: usize,
    pub evicted: usize,
}

impl IndexUpdate {
    pub fn is_unchanged(&self) -> bool {
        self.appended == 0 && self.evicted == 0
    }
}

/// Resolve a playlist uri against the uri the playlist was served from.
pub fn resolve_uri(base: &Url, uri: &str) -> Result<Url, HlsLiveError> {
    base.join(uri).map_err(|err| HlsLiveError::InvalidUri {
        uri: uri.to_string(),
        err,
    })
}

fn make_reference(
    position: u64,
    start: MediaTime,
    segment: &PlaylistSegment,
    base: &Url,
) -> Result<SegmentReference, HlsLiveError> {
    let end = start + segment.duration;
    Ok(
        SegmentReference::new(position, start, end, resolve_uri(base, &segment.uri)?)
            .with_byte_range(segment.byte_range),
    )
}

fn describe(uri: &Url, byte_range: Option<ByteRange>) -> String {
    match byte_range {
        Some(range) => format!("{uri} [{range}]"),
        None => uri.to_string(),
    }
}

/// Index every listed segment, the first one starting at `start_time`.
pub fn build_index(
    playlist: &Playlist,
    base: &Url,
    start_time: MediaTime,
) -> Result<SegmentIndex, HlsLiveError> {
    let mut index = SegmentIndex::new();
    let mut time = start_time.rescale(TIMELINE_TIMESCALE);
    for (position, segment) in playlist.positioned_segments() {
        let reference = make_reference(position, time, segment, base)?;
        time = reference.end_time;
        let appended = index.append(reference);
        debug_assert!(appended, "listed segments are contiguous");
    }
    Ok(index)
}

/// Align `playlist` with `previous` by position.
///
/// Positions already indexed keep their times; positions past the last known
/// one are appended after it; retained positions before the playlist's first
/// listed position are evicted.
pub fn update_index(
    previous: &SegmentIndex,
    playlist: &Playlist,
    base: &Url,
) -> Result<IndexUpdate, HlsLiveError> {
    let (Some(first_retained), Some(last_known), Some(end_time)) = (
        previous.first_position(),
        previous.last_position(),
        previous.end_time(),
    ) else {
        let index = build_index(playlist, base, MediaTime::zero())?;
        return Ok(IndexUpdate {
            appended: index.len(),
            evicted: 0,
            index,
        });
    };
    let (Some(first_listed), Some(last_listed)) =
        (playlist.first_position(), playlist.last_position())
    else {
        // nothing listed, nothing to align against
        return Ok(IndexUpdate {
            index: previous.clone(),
            appended: 0,
            evicted: 0,
        });
    };

    if first_listed > last_known.saturating_add(1) {
        return Err(DiscontinuityError::Gap {
            last_known,
            first_listed,
        }
        .into());
    }
    if last_listed < first_retained {
        return Err(DiscontinuityError::Rewound {
            first_retained,
            first_listed,
            last_listed,
        }
        .into());
    }

    // without a declared sequence, positions are only a guess: check that the
    // overlapping part lists the same segments
    if !playlist.media_sequence_declared {
        for (position, segment) in playlist.positioned_segments() {
            let Some(known) = previous.get(position) else {
                continue;
            };
            let listed = resolve_uri(base, &segment.uri)?;
            if known.uri != listed || known.byte_range != segment.byte_range {
                return Err(DiscontinuityError::Collision {
                    position,
                    known: describe(&known.uri, known.byte_range),
                    listed: describe(&listed, segment.byte_range),
                }
                .into());
            }
        }
    }

    let mut index = previous.clone();
    let mut time = end_time;
    let mut appended = 0;
    for (position, segment) in playlist
        .positioned_segments()
        .filter(|(position, _)| *position > last_known)
    {
        let reference = make_reference(position, time, segment, base)?;
        time = reference.end_time;
        if index.append(reference) {
            appended += 1;
        }
    }
    let evicted = index.evict_before(first_listed);

    Ok(IndexUpdate {
        index,
        appended,
        evicted,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playlist::parse_media_playlist;

    fn base() -> Url {
        Url::parse("https://cdn.test/live/media.m3u8").unwrap()
    }

    fn live(sequence: u64, names: &[&str]) -> Playlist {
        let mut text = format!("#EXTM3U\n#EXT-X-TARGETDURATION:5\n#EXT-X-MEDIA-SEQUENCE:{sequence}\n");
        for name in names {
            text.push_str(&format!("#EXTINF:2,\n{name}\n"));
        }
        parse_media_playlist(&text).unwrap()
    }

    fn times(index: &SegmentIndex) -> Vec<(u64, f64, f64)> {
        index
            .iter()
            .map(|r| (r.position, r.start_secs(), r.end_secs()))
            .collect()
    }

    #[test]
    fn test_build_assigns_positions_and_times() {
        let playlist = live(5, &["a.mp4", "b.mp4", "c.mp4"]);
        let index = build_index(&playlist, &base(), MediaTime::from_secs(10)).unwrap();
        assert_eq!(
            times(&index),
            vec![(5, 10.0, 12.0), (6, 12.0, 14.0), (7, 14.0, 16.0)]
        );
        assert_eq!(
            index.get(6).unwrap().uri.as_str(),
            "https://cdn.test/live/b.mp4"
        );
    }

    #[test]
    fn test_build_keeps_decimal_durations_exact() {
        let text = "#EXTM3U\n#EXT-X-TARGETDURATION:3\n".to_string()
            + &"#EXTINF:2.002,\nseg.ts\n".repeat(1000);
        let playlist = parse_media_playlist(&text).unwrap();
        let index = build_index(&playlist, &base(), MediaTime::zero()).unwrap();
        assert_eq!(index.end_time(), Some(MediaTime::new(2002, 1)));
    }

    #[test]
    fn test_build_resolves_against_redirected_uri() {
        let playlist = live(0, &["seg.mp4", "/abs/seg2.mp4", "https://other.test/seg3.mp4"]);
        let redirected = Url::parse("https://edge.test/redirected/media.m3u8").unwrap();
        let index = build_index(&playlist, &redirected, MediaTime::zero()).unwrap();
        let uris: Vec<&str> = index.iter().map(|r| r.uri.as_str()).collect();
        assert_eq!(
            uris,
            vec![
                "https://edge.test/redirected/seg.mp4",
                "https://edge.test/abs/seg2.mp4",
                "https://other.test/seg3.mp4",
            ]
        );
    }

    #[test]
    fn test_build_carries_byte_ranges() {
        let text = "#EXTM3U\n#EXT-X-TARGETDURATION:5\n\
                    #EXTINF:2,\n#EXT-X-BYTERANGE:121090@616\nmain.mp4\n\
                    #EXTINF:2,\n#EXT-X-BYTERANGE:121090\nmain.mp4\n";
        let playlist = parse_media_playlist(text).unwrap();
        let index = build_index(&playlist, &base(), MediaTime::zero()).unwrap();
        assert_eq!(
            index.get(0).unwrap().byte_range,
            Some(ByteRange::new(616, 121_705))
        );
        assert_eq!(
            index.get(1).unwrap().byte_range,
            Some(ByteRange::new(121_706, 242_795))
        );
    }

    #[test]
    fn test_update_appends_new_segments() {
        let first = live(0, &["0.mp4", "1.mp4"]);
        let index = build_index(&first, &base(), MediaTime::from_secs(100)).unwrap();

        let second = live(0, &["0.mp4", "1.mp4", "2.mp4", "3.mp4"]);
        let update = update_index(&index, &second, &base()).unwrap();
        assert_eq!(update.appended, 2);
        assert_eq!(update.evicted, 0);
        assert_eq!(
            times(&update.index),
            vec![
                (0, 100.0, 102.0),
                (1, 102.0, 104.0),
                (2, 104.0, 106.0),
                (3, 106.0, 108.0)
            ]
        );
    }

    #[test]
    fn test_update_evicts_and_keeps_retained_times() {
        let first = live(0, &["0.mp4", "1.mp4", "2.mp4"]);
        let index = build_index(&first, &base(), MediaTime::from_secs(4)).unwrap();

        let second = live(1, &["1.mp4", "2.mp4", "3.mp4"]);
        let update = update_index(&index, &second, &base()).unwrap();
        assert_eq!(update.evicted, 1);
        assert_eq!(update.appended, 1);
        assert_eq!(
            times(&update.index),
            vec![(1, 6.0, 8.0), (2, 8.0, 10.0), (3, 10.0, 12.0)]
        );
        for reference in update.index.iter().take(2) {
            assert_eq!(Some(reference), index.get(reference.position));
        }
    }

    #[test]
    fn test_update_whole_window_replaced() {
        let first = live(0, &["0.mp4", "1.mp4"]);
        let index = build_index(&first, &base(), MediaTime::zero()).unwrap();

        let second = live(2, &["2.mp4", "3.mp4"]);
        let update = update_index(&index, &second, &base()).unwrap();
        assert_eq!(update.evicted, 2);
        assert_eq!(times(&update.index), vec![(2, 4.0, 6.0), (3, 6.0, 8.0)]);
    }

    #[test]
    fn test_update_is_idempotent() {
        let playlist = live(3, &["3.mp4", "4.mp4"]);
        let index = build_index(&playlist, &base(), MediaTime::zero()).unwrap();
        let update = update_index(&index, &playlist, &base()).unwrap();
        assert!(update.is_unchanged());
        assert_eq!(update.index, index);

        let again = update_index(&update.index, &playlist, &base()).unwrap();
        assert_eq!(again.index, index);
    }

    #[test]
    fn test_update_rejects_gap() {
        let index = build_index(&live(0, &["0.mp4", "1.mp4"]), &base(), MediaTime::zero()).unwrap();
        let err = update_index(&index, &live(5, &["5.mp4"]), &base()).unwrap_err();
        assert!(matches!(
            err,
            HlsLiveError::Discontinuity(DiscontinuityError::Gap {
                last_known: 1,
                first_listed: 5
            })
        ));
        assert!(err.halts_stream());
    }

    #[test]
    fn test_update_rejects_rewound_sequence() {
        let index = build_index(&live(10, &["10.mp4", "11.mp4"]), &base(), MediaTime::zero()).unwrap();
        let err = update_index(&index, &live(2, &["2.mp4", "3.mp4"]), &base()).unwrap_err();
        assert!(matches!(
            err,
            HlsLiveError::Discontinuity(DiscontinuityError::Rewound {
                first_retained: 10,
                ..
            })
        ));
    }

    #[test]
    fn test_update_detects_collision_without_media_sequence() {
        let text = |names: &[&str]| {
            let mut text = "#EXTM3U\n#EXT-X-TARGETDURATION:5\n".to_string();
            for name in names {
                text.push_str(&format!("#EXTINF:2,\n{name}\n"));
            }
            parse_media_playlist(&text).unwrap()
        };
        let index = build_index(&text(&["a.ts", "b.ts"]), &base(), MediaTime::zero()).unwrap();

        let grown = update_index(&index, &text(&["a.ts", "b.ts", "c.ts"]), &base()).unwrap();
        assert_eq!(grown.appended, 1);

        let err = update_index(&index, &text(&["b.ts", "c.ts"]), &base()).unwrap_err();
        assert!(matches!(
            err,
            HlsLiveError::Discontinuity(DiscontinuityError::Collision { position: 0, .. })
        ));
    }

    #[test]
    fn test_update_detects_collision_in_single_file_playlist() {
        let text = |ranges: &[&str]| {
            let mut text = "#EXTM3U\n#EXT-X-TARGETDURATION:5\n".to_string();
            for range in ranges {
                text.push_str(&format!("#EXTINF:2,\n#EXT-X-BYTERANGE:{range}\nmain.mp4\n"));
            }
            parse_media_playlist(&text).unwrap()
        };
        let index = build_index(&text(&["100@0", "100@100"]), &base(), MediaTime::zero()).unwrap();

        let grown = update_index(&index, &text(&["100@0", "100@100", "100@200"]), &base()).unwrap();
        assert_eq!(grown.appended, 1);

        let err = update_index(&index, &text(&["100@100", "100@200"]), &base()).unwrap_err();
        match err {
            HlsLiveError::Discontinuity(DiscontinuityError::Collision {
                position,
                known,
                listed,
            }) => {
                assert_eq!(position, 0);
                assert_eq!(known, "https://cdn.test/live/main.mp4 [100@0]");
                assert_eq!(listed, "https://cdn.test/live/main.mp4 [100@100]");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_update_at_the_end_of_the_sequence_range() {
        let playlist = live(u64::MAX, &["last.mp4"]);
        let index = build_index(&playlist, &base(), MediaTime::zero()).unwrap();
        let update = update_index(&index, &playlist, &base()).unwrap();
        assert!(update.is_unchanged());
    }

    #[test]
    fn test_update_from_empty_index() {
        let update = update_index(&SegmentIndex::new(), &live(4, &["4.mp4"]), &base()).unwrap();
        assert_eq!(update.appended, 1);
        assert_eq!(times(&update.index), vec![(4, 0.0, 2.0)]);

        let empty = parse_media_playlist("#EXTM3U\n#EXT-X-TARGETDURATION:5\n").unwrap();
        let kept = update_index(&update.index, &empty, &base()).unwrap();
        assert!(kept.is_unchanged());
        assert_eq!(kept.index, update.index);
    }
}
