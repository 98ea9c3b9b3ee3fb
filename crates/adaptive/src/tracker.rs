use std::time::Duration;

use chrono::{DateTime, Utc};
use url::Url;

use crate::{
    encryption::CommonEncryption,
    fetch::ChunkType,
    logic::AdaptationLogic,
    playlist::{AdaptationSet, RefreshPolicy, Representation, StreamFormat},
    ByteRange,
};

/// Notifications raised while a tracker walks through an adaptation set.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackerEvent {
    /// Representation indices within the adaptation set. `prev` is `None` after a (re)start.
    RepresentationSwitch { prev: Option<usize>, next: usize },
    FormatChange(StreamFormat),
    SegmentChange {
        sequence: u64,
        discontinuity_sequence: u64,
        start: Duration,
        duration: Duration,
        display_time: Option<DateTime<Utc>>,
    },
    Discontinuity { discontinuity_sequence: u64 },
    PositionChange { resume: Duration },
}

/// A fetch the manager has to perform for the tracked adaptation set.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkRequest {
    pub representation: usize,
    pub kind: ChunkType,
    pub url: Url,
    pub byte_range: Option<ByteRange>,
    pub encryption: Option<CommonEncryption>,
    /// Media sequence number. Init chunks carry the number of the segment they precede.
    pub sequence: u64,
    pub format: StreamFormat,
    pub start: Duration,
    pub duration: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StepResult {
    Chunk(ChunkRequest),
    /// The representation at this index has to be loaded before the tracker can continue.
    NeedsLoad(usize),
    /// Live stream, the next segment is not announced yet.
    Waiting,
    EndOfStream,
}

/// Cursor over one adaptation set.
///
/// Representations are referred to by their index in [AdaptationSet::representations].
#[derive(Debug, Default)]
pub struct SegmentTracker {
    start_offset: Option<f64>,
    current: Option<usize>,
    /// Representation `next` is numbered in.
    anchor: Option<usize>,
    next: Option<u64>,
    init_pending: bool,
    /// An init chunk was handed out, its media has to follow before switching.
    locked: bool,
    position_changed: bool,
    format: Option<StreamFormat>,
    discontinuity_sequence: Option<u64>,
    playback: Option<Duration>,
    buffered: Option<Duration>,
    events: Vec<TrackerEvent>,
}

impl SegmentTracker {
    pub fn new(start_offset: Option<f64>) -> Self {
        Self {
            start_offset,
            ..Default::default()
        }
    }

    pub fn current_representation(&self) -> Option<usize> {
        self.current
    }

    /// Sequence number the next media chunk is looked up with.
    pub fn next_number(&self) -> Option<u64> {
        self.next
    }

    /// Start time of the last media chunk handed out.
    pub fn playback_time(&self) -> Option<Duration> {
        self.playback
    }

    /// End time of the last media chunk handed out.
    pub fn buffered_until(&self) -> Option<Duration> {
        self.buffered
    }

    pub fn take_events(&mut self) -> Vec<TrackerEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn next_chunk(
        &mut self,
        set: &AdaptationSet,
        logic: &mut dyn AdaptationLogic,
        policy: &RefreshPolicy,
    ) -> StepResult {
        let wanted = match self.current {
            Some(current) if self.locked => Some(current),
            current => logic
                .next_representation(set, current.or(self.anchor), policy)
                .or(current),
        };
        let Some((wanted, representation)) =
            wanted.and_then(|index| set.representations.get(index).map(|r| (index, r)))
        else {
            return StepResult::EndOfStream;
        };
        if !representation.is_loaded() {
            return StepResult::NeedsLoad(wanted);
        }

        if self.current != Some(wanted) {
            self.switch_to(set, wanted, policy);
        }
        let Some((current, representation)) = self
            .current
            .and_then(|index| set.representations.get(index).map(|r| (index, r)))
        else {
            return StepResult::EndOfStream;
        };

        let segment = match self.next {
            Some(next) => representation.segments().next_from(next),
            None => None,
        };
        let Some(segment) = segment else {
            return if representation.is_live() {
                StepResult::Waiting
            } else {
                StepResult::EndOfStream
            };
        };

        let format = match representation.format {
            StreamFormat::Unknown => StreamFormat::from_filename(segment.url.path()),
            format => format,
        };
        if self.format != Some(format) {
            self.format = Some(format);
            self.events.push(TrackerEvent::FormatChange(format));
        }

        let timescale = representation.timescale;
        let start = timescale.to_duration(segment.start);
        let duration = timescale.to_duration(segment.duration);

        if self.init_pending {
            self.init_pending = false;
            if let Some(init) = representation.init_segment() {
                self.locked = true;
                return StepResult::Chunk(ChunkRequest {
                    representation: current,
                    kind: ChunkType::Init,
                    url: init.url.clone(),
                    byte_range: init.byte_range,
                    encryption: init.encryption.clone(),
                    sequence: segment.sequence,
                    format,
                    start,
                    duration: Duration::ZERO,
                });
            }
        }
        self.locked = false;

        if self.position_changed {
            self.position_changed = false;
            self.events.push(TrackerEvent::PositionChange { resume: start });
        }
        if let Some(previous) = self.discontinuity_sequence {
            if segment.discontinuity || previous != segment.discontinuity_sequence {
                self.events.push(TrackerEvent::Discontinuity {
                    discontinuity_sequence: segment.discontinuity_sequence,
                });
            }
        }
        self.discontinuity_sequence = Some(segment.discontinuity_sequence);
        self.events.push(TrackerEvent::SegmentChange {
            sequence: segment.sequence,
            discontinuity_sequence: segment.discontinuity_sequence,
            start,
            duration,
            display_time: segment.display_time,
        });

        self.playback = Some(start);
        self.buffered = Some(start + duration);
        self.next = Some(segment.sequence + 1);

        StepResult::Chunk(ChunkRequest {
            representation: current,
            kind: ChunkType::Segment,
            url: segment.url.clone(),
            byte_range: segment.byte_range,
            encryption: segment.encryption.clone(),
            sequence: segment.sequence,
            format,
            start,
            duration,
        })
    }

    /// Moves onto `wanted`, translating the next number. Returns false when the switch is deferred.
    fn switch_to(&mut self, set: &AdaptationSet, wanted: usize, policy: &RefreshPolicy) -> bool {
        let Some(target) = set.representations.get(wanted) else {
            return false;
        };
        let from = self.anchor.and_then(|anchor| {
            set.representations
                .get(anchor)
                .filter(|_| anchor != wanted)
        });

        let number = match (self.next, from) {
            (Some(number), Some(from)) => match target.translate_segment_number(number, from) {
                Some(translated) => Some(translated),
                None if self.current.is_some() => {
                    tracing::debug!(
                        from = %from.id,
                        to = %target.id,
                        number,
                        "no segment mapping, switch deferred"
                    );
                    return false;
                }
                None => from
                    .playback_time(number)
                    .and_then(|time| target.segment_number_by_time(time)),
            },
            (next, _) => next,
        };
        let number = number.or_else(|| target.start_sequence(policy, self.start_offset));

        tracing::debug!(prev = ?self.current, next = wanted, ?number, "representation switch");
        self.events.push(TrackerEvent::RepresentationSwitch {
            prev: self.current,
            next: wanted,
        });
        self.current = Some(wanted);
        self.anchor = Some(wanted);
        self.next = number;
        self.init_pending = target.init_segment().is_some();
        self.locked = false;
        true
    }

    /// Representation that positions are computed on.
    fn position_representation<'a>(
        &self,
        set: &'a AdaptationSet,
    ) -> Option<(usize, &'a Representation)> {
        self.current
            .or(self.anchor)
            .and_then(|index| set.representations.get(index).map(|r| (index, r)))
            .filter(|(_, r)| r.is_loaded())
            .or_else(|| {
                set.representations
                    .iter()
                    .enumerate()
                    .find(|(_, r)| r.is_loaded())
            })
    }

    /// Where playback begins: representation index and sequence number.
    pub fn start_position(
        &self,
        set: &AdaptationSet,
        policy: &RefreshPolicy,
    ) -> Option<(usize, u64)> {
        let (index, representation) = self.position_representation(set)?;
        let number = representation.start_sequence(policy, self.start_offset)?;
        Some((index, number))
    }

    /// Restarts the cursor at segment `number` of `representation`.
    ///
    /// The next chunk re-runs representation selection and emits the init segment again.
    pub fn set_position(&mut self, representation: usize, number: u64) {
        self.anchor = Some(representation);
        self.current = None;
        self.next = Some(number);
        self.init_pending = false;
        self.locked = false;
        self.position_changed = true;
        self.discontinuity_sequence = None;
        self.playback = None;
        self.buffered = None;
    }

    /// Position of the segment containing `time`, the last one when `time` is past the end.
    ///
    /// `None` when `time` lies before the first known segment.
    pub fn position_for_time(&self, set: &AdaptationSet, time: Duration) -> Option<(usize, u64)> {
        let (index, representation) = self.position_representation(set)?;
        let (first, end) = representation.time_range()?;
        if time < first {
            return None;
        }

        let segments = representation.segments();
        let number = if time >= end {
            segments.last().map(|s| s.sequence)
        } else {
            let ticks = representation.timescale.from_duration(time);
            segments
                .segment_number_by_time(ticks)
                .or_else(|| segments.iter().find(|s| s.start >= ticks).map(|s| s.sequence))
        }?;
        Some((index, number))
    }

    /// Seeks to [Self::position_for_time]. With `try_only` nothing changes.
    pub fn set_position_by_time(
        &mut self,
        set: &AdaptationSet,
        time: Duration,
        try_only: bool,
    ) -> bool {
        let Some((index, number)) = self.position_for_time(set, time) else {
            return false;
        };
        if !try_only {
            self.set_position(index, number);
        }
        true
    }
}
