use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use url::Url;

use crate::{encryption::CommonEncryption, ByteRange};

/// One addressable media chunk. Times are expressed in the owning representation's timescale.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub sequence: u64,
    pub start: u64,
    pub duration: u64,
    pub url: Url,
    pub byte_range: Option<ByteRange>,
    pub encryption: Option<CommonEncryption>,
    pub discontinuity: bool,
    pub discontinuity_sequence: u64,
    /// Wall-clock time of the first sample, when the manifest declares one.
    pub display_time: Option<DateTime<Utc>>,
    pub title: Option<String>,
}

impl Segment {
    pub fn new(sequence: u64, url: Url) -> Self {
        Self {
            sequence,
            start: 0,
            duration: 0,
            url,
            byte_range: None,
            encryption: None,
            discontinuity: false,
            discontinuity_sequence: 0,
            display_time: None,
            title: None,
        }
    }

    pub fn end(&self) -> u64 {
        self.start.saturating_add(self.duration)
    }

    pub fn contains(&self, time: u64) -> bool {
        time >= self.start && time < self.end()
    }
}

/// Initialization data that has to precede the media segments of a representation.
#[derive(Debug, Clone, PartialEq)]
pub struct InitSegment {
    pub url: Url,
    pub byte_range: Option<ByteRange>,
    pub encryption: Option<CommonEncryption>,
}

/// Segments ordered by strictly increasing sequence number.
#[derive(Debug, Clone, Default)]
pub struct SegmentList {
    segments: VecDeque<Segment>,
}

impl SegmentList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a segment. Segments not newer than the last one are rejected.
    pub fn push(&mut self, segment: Segment) -> bool {
        if let Some(last) = self.segments.back() {
            if segment.sequence <= last.sequence {
                return false;
            }
        }
        self.segments.push_back(segment);
        true
    }

    /// Merges a freshly parsed window, appending only segments newer than the last known one.
    ///
    /// With `restamp`, appended segments are placed right after the previous segment instead of
    /// keeping the start time computed by the parser. Returns the number of appended segments.
    pub fn update_with(&mut self, other: SegmentList, restamp: bool) -> usize {
        let mut appended = 0;
        for mut segment in other.segments {
            if let Some(last) = self.segments.back() {
                if segment.sequence <= last.sequence {
                    continue;
                }
                if restamp {
                    segment.start = last.end();
                }
            }
            self.segments.push_back(segment);
            appended += 1;
        }
        appended
    }

    pub fn get(&self, sequence: u64) -> Option<&Segment> {
        self.segments
            .binary_search_by_key(&sequence, |s| s.sequence)
            .ok()
            .and_then(|index| self.segments.get(index))
    }

    pub fn get_mut(&mut self, sequence: u64) -> Option<&mut Segment> {
        self.segments
            .binary_search_by_key(&sequence, |s| s.sequence)
            .ok()
            .and_then(|index| self.segments.get_mut(index))
    }

    /// First segment whose sequence is at least `sequence`.
    pub fn next_from(&self, sequence: u64) -> Option<&Segment> {
        let index = self.segments.partition_point(|s| s.sequence < sequence);
        self.segments.get(index)
    }

    pub fn first(&self) -> Option<&Segment> {
        self.segments.front()
    }

    pub fn last(&self) -> Option<&Segment> {
        self.segments.back()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Segment> + ExactSizeIterator {
        self.segments.iter()
    }

    /// Sequence number of the segment covering `time`.
    pub fn segment_number_by_time(&self, time: u64) -> Option<u64> {
        let index = self.segments.partition_point(|s| s.end() <= time);
        self.segments
            .get(index)
            .filter(|s| s.start <= time)
            .map(|s| s.sequence)
    }

    /// Releases every segment older than `sequence`.
    pub fn prune_before(&mut self, sequence: u64) -> usize {
        let count = self.segments.partition_point(|s| s.sequence < sequence);
        self.segments.drain(..count);
        count
    }

    pub fn total_duration(&self) -> u64 {
        self.segments
            .iter()
            .fold(0, |total: u64, s| total.saturating_add(s.duration))
    }

    /// Duration of the segments from `sequence` (inclusive) to the end of the list.
    pub fn duration_from(&self, sequence: u64) -> u64 {
        self.segments
            .iter()
            .filter(|s| s.sequence >= sequence)
            .fold(0, |total: u64, s| total.saturating_add(s.duration))
    }
}

impl FromIterator<Segment> for SegmentList {
    fn from_iter<T: IntoIterator<Item = Segment>>(iter: T) -> Self {
        let mut list = SegmentList::new();
        for segment in iter {
            list.push(segment);
        }
        list
    }
}
