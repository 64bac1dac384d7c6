use serde::{Deserialize, Serialize};
use url::Url;

use crate::playlist::ByteRange;
use crate::time::MediaTime;

/// Where one media segment lives and which part of the timeline it covers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SegmentReference {
    /// Sequence number, never reassigned once given out
    pub position: u64,
    pub start_time: MediaTime,
    pub end_time: MediaTime,
    /// Absolute location, resolved against the playlist's final uri
    pub uri: Url,
    /// Inclusive byte range, `None` for the whole resource
    pub byte_range: Option<ByteRange>,
}

impl SegmentReference {
    pub fn new(position: u64, start_time: MediaTime, end_time: MediaTime, uri: Url) -> Self {
        Self {
            position,
            start_time,
            end_time,
            uri,
            byte_range: None,
        }
    }

    pub fn with_byte_range(mut self, byte_range: Option<ByteRange>) -> Self {
        self.byte_range = byte_range;
        self
    }

    pub fn duration(&self) -> MediaTime {
        self.end_time.saturating_sub(self.start_time)
    }

    pub fn start_secs(&self) -> f64 {
        self.start_time.as_secs_f64()
    }

    pub fn end_secs(&self) -> f64 {
        self.end_time.as_secs_f64()
    }

    pub fn contains(&self, time: MediaTime) -> bool {
        self.start_time <= time && time < self.end_time
    }
}

/// Ordered references of one stream.
///
/// Positions are contiguous: the reference at index `i` has position
/// `first_position + i`. Only appends at the back and evictions at the front
/// are supported, which keeps every retained reference untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentIndex {
    references: Vec<SegmentReference>,
}

impl SegmentIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.references.len()
    }

    pub fn is_empty(&self) -> bool {
        self.references.is_empty()
    }

    pub fn references(&self) -> &[SegmentReference] {
        &self.references
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SegmentReference> {
        self.references.iter()
    }

    pub fn first(&self) -> Option<&SegmentReference> {
        self.references.first()
    }

    pub fn last(&self) -> Option<&SegmentReference> {
        self.references.last()
    }

    pub fn first_position(&self) -> Option<u64> {
        self.first().map(|r| r.position)
    }

    pub fn last_position(&self) -> Option<u64> {
        self.last().map(|r| r.position)
    }

    pub fn start_time(&self) -> Option<MediaTime> {
        self.first().map(|r| r.start_time)
    }

    pub fn end_time(&self) -> Option<MediaTime> {
        self.last().map(|r| r.end_time)
    }

    pub fn get(&self, position: u64) -> Option<&SegmentReference> {
        let first = self.first_position()?;
        let offset = usize::try_from(position.checked_sub(first)?).ok()?;
        self.references.get(offset)
    }

    /// Position of the reference covering `time`, if any.
    pub fn find(&self, time: MediaTime) -> Option<u64> {
        let idx = self.references.partition_point(|r| r.end_time <= time);
        self.references
            .get(idx)
            .filter(|r| r.contains(time))
            .map(|r| r.position)
    }

    /// Append the next reference. Returns `false` and leaves the index
    /// unchanged if it does not continue the last position.
    pub fn append(&mut self, reference: SegmentReference) -> bool {
        if let Some(last) = self.last() {
            if last.position.checked_add(1) != Some(reference.position)
                || reference.start_time < last.end_time
            {
                return false;
            }
        }
        if reference.end_time <= reference.start_time {
            return false;
        }
        self.references.push(reference);
        true
    }

    /// Drop every reference positioned before `position`. Returns how many went.
    pub fn evict_before(&mut self, position: u64) -> usize {
        let count = self.references.partition_point(|r| r.position < position);
        self.references.drain(..count);
        count
    }
}

impl<'a> IntoIterator for &'a SegmentIndex {
    type Item = &'a SegmentReference;
    type IntoIter = std::slice::Iter<'a, SegmentReference>;

    fn into_iter(self) -> Self::IntoIter {
        self.references.iter()
    }
}
