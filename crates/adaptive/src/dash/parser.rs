use std::{collections::HashMap, time::Duration};

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use url::Url;

use super::{
    parse_frame_rate, parse_xs_duration,
    url::{parse_byte_range_spec, resolve_url},
    Template,
};
use crate::{
    error::{AdaptiveError, AdaptiveResult},
    playlist::{
        AdaptationSet, InitSegment, ManifestKind, Period, Playlist, Representation, Role, Segment,
        SegmentList, SegmentSource, SegmentUpdate, StreamFormat,
    },
    time::{parse_date_time, Timescale},
    xml::{DomParser, Node},
};

/// Segments kept for a `SegmentTemplate@duration` live stream without `@timeShiftBufferDepth`.
const DEFAULT_LIVE_WINDOW_SEGMENTS: u64 = 10;

/// Upper bound for the segments a template expands into for one representation.
const MAX_TEMPLATE_SEGMENTS: u64 = 100_000;

/// Parses an MPD document. `now` positions the live window of dynamic presentations.
pub fn parse_mpd(data: &[u8], url: &Url, now: DateTime<Utc>) -> AdaptiveResult<Playlist> {
    let root = DomParser::parse(data)?;
    if root.name != "MPD" {
        return Err(AdaptiveError::MpdParsing(format!(
            "unexpected root element <{}>",
            root.name
        )));
    }

    let mut playlist = Playlist::new(ManifestKind::Dash, url.clone());
    playlist.dynamic = root.attribute("type") == Some("dynamic");
    playlist.presentation_duration = duration_attribute(&root, "mediaPresentationDuration");
    playlist.minimum_update_period = duration_attribute(&root, "minimumUpdatePeriod");
    playlist.time_shift_buffer_depth = duration_attribute(&root, "timeShiftBufferDepth");
    playlist.availability_start_time = root
        .attribute("availabilityStartTime")
        .and_then(parse_date_time);
    let base = base_url(&root, url)?;

    let periods: Vec<&Node> = root.children_named("Period").collect();
    let mut next_start = Duration::ZERO;
    for (index, node) in periods.iter().enumerate() {
        let start = duration_attribute(node, "start").unwrap_or(next_start);
        let duration = duration_attribute(node, "duration").or_else(|| {
            match periods.get(index + 1) {
                Some(next) => duration_attribute(next, "start").map(|s| s.saturating_sub(start)),
                None => playlist
                    .presentation_duration
                    .map(|total| total.saturating_sub(start)),
            }
        });

        let context = PeriodContext {
            node,
            base: base_url(node, &base)?,
            start,
            duration,
            dynamic: playlist.dynamic,
            availability_start_time: playlist.availability_start_time,
            time_shift_buffer_depth: playlist.time_shift_buffer_depth,
            now,
        };
        let period = parse_period(&context, index)?;
        tracing::debug!(
            id = %period.id,
            ?start,
            ?duration,
            adaptation_sets = period.adaptation_sets.len(),
            "parsed period"
        );

        next_start = start.saturating_add(duration.unwrap_or_default());
        playlist.periods.push(period);
    }

    if playlist.representations().next().is_none() {
        return Err(AdaptiveError::NoRepresentation);
    }
    Ok(playlist)
}

/// Merges a refreshed MPD into the current one, matching elements by id.
///
/// Returns the number of newly available segments.
pub fn merge_playlist(current: &mut Playlist, updated: Playlist) -> usize {
    current.dynamic = updated.dynamic;
    current.minimum_update_period = updated.minimum_update_period;
    current.presentation_duration = updated.presentation_duration;
    current.time_shift_buffer_depth = updated.time_shift_buffer_depth;

    let now = Instant::now();
    let mut appended = 0;
    for period in updated.periods {
        let Some(current_period) = current.periods.iter_mut().find(|p| p.id == period.id) else {
            tracing::info!(id = %period.id, "new period announced");
            current.periods.push(period);
            continue;
        };
        current_period.duration = period.duration;

        for set in period.adaptation_sets {
            let Some(current_set) = current_period
                .adaptation_sets
                .iter_mut()
                .find(|s| s.id == set.id)
            else {
                continue;
            };
            for representation in set.representations {
                let Some(current_representation) = current_set
                    .representations
                    .iter_mut()
                    .find(|r| r.id == representation.id)
                else {
                    continue;
                };
                appended += current_representation.apply_update(
                    representation.into_update(),
                    false,
                    now,
                );
            }
        }
    }
    appended
}

struct PeriodContext<'a> {
    node: &'a Node,
    base: Url,
    start: Duration,
    duration: Option<Duration>,
    dynamic: bool,
    availability_start_time: Option<DateTime<Utc>>,
    time_shift_buffer_depth: Option<Duration>,
    now: DateTime<Utc>,
}

fn parse_period(context: &PeriodContext, index: usize) -> AdaptiveResult<Period> {
    let node = context.node;
    let mut period = Period {
        id: node
            .attribute("id")
            .map(String::from)
            .unwrap_or_else(|| index.to_string()),
        start: context.start,
        duration: context.duration,
        adaptation_sets: Vec::new(),
    };

    for (set_index, set_node) in node.children_named("AdaptationSet").enumerate() {
        let mut set = AdaptationSet::new(
            set_node
                .attribute("id")
                .map(String::from)
                .unwrap_or_else(|| set_index.to_string()),
        );
        set.lang = set_node.attribute("lang").map(String::from);
        set.description = set_node.child("Label").map(|l| l.text().to_string());
        set.segment_aligned = matches!(
            set_node.attribute("segmentAlignment"),
            Some("true") | Some("1")
        );
        set.role = set_node
            .child("Role")
            .and_then(|r| r.attribute("value"))
            .map(Role::from_dash)
            .unwrap_or_default();
        let is_text = set_node.attribute("contentType") == Some("text")
            || set_node
                .attribute("mimeType")
                .is_some_and(|m| m.starts_with("text/"));
        if is_text && set.role == Role::Unspecified {
            set.role = Role::Subtitle;
        }

        let set_base = base_url(set_node, &context.base)?;
        for (rep_index, rep_node) in set_node.children_named("Representation").enumerate() {
            let levels = Levels {
                period: node,
                set: set_node,
                representation: rep_node,
            };
            match parse_representation(context, &levels, &set_base, &set.id, rep_index) {
                Ok(representation) => set.representations.push(representation),
                Err(e) => tracing::warn!(
                    adaptation_set = %set.id,
                    index = rep_index,
                    "Dropped representation: {e}"
                ),
            }
        }

        if !set.representations.is_empty() {
            period.adaptation_sets.push(set);
        }
    }
    Ok(period)
}

/// The three levels a representation inherits attributes from.
struct Levels<'a> {
    period: &'a Node,
    set: &'a Node,
    representation: &'a Node,
}

impl<'a> Levels<'a> {
    /// Attribute of the representation, falling back to its adaptation set.
    fn attribute(&self, name: &str) -> Option<&'a str> {
        self.representation
            .attribute(name)
            .or_else(|| self.set.attribute(name))
    }

    fn child(&self, name: &str) -> Option<&'a Node> {
        self.representation
            .child(name)
            .or_else(|| self.set.child(name))
    }

    /// Merges an addressing element attribute by attribute, most specific level last.
    fn addressing(&self, name: &str) -> Option<Addressing<'a>> {
        let mut found: Option<Addressing<'a>> = None;
        for level in [self.period, self.set, self.representation] {
            let Some(node) = level.child(name) else {
                continue;
            };
            let addressing = found.get_or_insert_with(Addressing::default);
            for (key, value) in &node.attributes {
                addressing.attributes.insert(key.as_str(), value.as_str());
            }
            if let Some(timeline) = node.child("SegmentTimeline") {
                addressing.timeline = Some(timeline);
            }
            if let Some(initialization) = node.child("Initialization") {
                addressing.initialization = Some(initialization);
            }
            let urls: Vec<&Node> = node.children_named("SegmentURL").collect();
            if !urls.is_empty() {
                addressing.urls = urls;
            }
        }
        found
    }
}

#[derive(Default)]
struct Addressing<'a> {
    attributes: HashMap<&'a str, &'a str>,
    timeline: Option<&'a Node>,
    initialization: Option<&'a Node>,
    urls: Vec<&'a Node>,
}

impl Addressing<'_> {
    fn number(&self, name: &str) -> Option<u64> {
        self.attributes.get(name).and_then(|v| v.trim().parse().ok())
    }

    fn timescale(&self) -> Timescale {
        Timescale::new(self.number("timescale").unwrap_or(1))
    }
}

fn parse_representation(
    context: &PeriodContext,
    levels: &Levels,
    set_base: &Url,
    set_id: &str,
    index: usize,
) -> AdaptiveResult<Representation> {
    let node = levels.representation;
    let id = node
        .attribute("id")
        .map(String::from)
        .unwrap_or_else(|| format!("{set_id}-{index}"));
    let base = base_url(node, set_base)?;

    let mut representation = Representation::new(id, SegmentSource::Inline);
    representation.bandwidth = node
        .attribute("bandwidth")
        .and_then(|b| b.trim().parse().ok())
        .unwrap_or_default();
    representation.resolution = match (levels.attribute("width"), levels.attribute("height")) {
        (Some(width), Some(height)) => width.parse().ok().zip(height.parse().ok()),
        _ => None,
    };
    representation.frame_rate = levels.attribute("frameRate").and_then(parse_frame_rate);
    representation.codecs = levels
        .attribute("codecs")
        .map(|c| c.split(',').map(|c| c.trim().to_string()).collect())
        .unwrap_or_default();
    representation.channels = levels
        .child("AudioChannelConfiguration")
        .and_then(|c| c.attribute("value"))
        .and_then(|v| v.parse().ok());
    representation.format = StreamFormat::from_mime(levels.attribute("mimeType").unwrap_or(""));

    let mut template = Template::new();
    template.insert(Template::REPRESENTATION_ID, representation.id.clone());
    template.insert(Template::BANDWIDTH, representation.bandwidth.to_string());

    let (update, timescale) = if let Some(addressing) = levels.addressing("SegmentTemplate") {
        let timescale = addressing.timescale();
        (
            template_segments(context, &addressing, &mut template, &base)?,
            timescale,
        )
    } else if let Some(addressing) = levels.addressing("SegmentList") {
        let timescale = addressing.timescale();
        (list_segments(context, &addressing, &base)?, timescale)
    } else {
        let addressing = levels.addressing("SegmentBase");
        let timescale = addressing
            .as_ref()
            .map(Addressing::timescale)
            .unwrap_or_default();
        (
            single_segment(context, addressing.as_ref(), &base, timescale)?,
            timescale,
        )
    };

    representation.timescale = timescale;
    if representation.format == StreamFormat::Unknown {
        representation.format = update.format;
    }
    representation.apply_update(update, false, Instant::now());
    Ok(representation)
}

fn template_segments(
    context: &PeriodContext,
    addressing: &Addressing,
    template: &mut Template,
    base: &Url,
) -> AdaptiveResult<SegmentUpdate> {
    let media = addressing
        .attributes
        .get("media")
        .ok_or_else(|| AdaptiveError::MpdParsing("SegmentTemplate without @media".to_string()))?;
    let timescale = addressing.timescale();
    let offset = addressing.number("presentationTimeOffset").unwrap_or(0);
    let start_number = addressing.number("startNumber").unwrap_or(1);
    let period_start = timescale.from_duration(context.start);

    let init_segment = match addressing.attributes.get("initialization") {
        Some(initialization) => Some(InitSegment {
            url: resolve_url(base, &template.resolve(initialization))?,
            byte_range: None,
            encryption: None,
        }),
        None => initialization_segment(addressing.initialization, base)?,
    };

    // (number, time, duration) in template timescale, time including the offset
    let mut entries = Vec::new();
    let nominal;
    if let Some(timeline) = addressing.timeline {
        let end = period_end_ticks(context, timescale).map(|end| end.saturating_add(offset));
        let items: Vec<&Node> = timeline.children_named("S").collect();
        let mut number = start_number;
        let mut time: u64 = 0;
        let mut longest = 0;
        'timeline: for (index, item) in items.iter().enumerate() {
            if let Some(t) = item.attribute("t").and_then(|t| t.parse().ok()) {
                time = t;
            }
            let Some(duration) = item
                .attribute("d")
                .and_then(|d| d.parse::<u64>().ok())
                .filter(|d| *d > 0)
            else {
                tracing::warn!("Ignored SegmentTimeline entry without @d");
                continue;
            };
            let repeat: i64 = item
                .attribute("r")
                .and_then(|r| r.parse().ok())
                .unwrap_or(0);
            let count = if repeat < 0 {
                let limit = items
                    .get(index + 1)
                    .and_then(|next| next.attribute("t"))
                    .and_then(|t| t.parse::<u64>().ok())
                    .or(end);
                match limit {
                    Some(limit) => limit.saturating_sub(time).div_ceil(duration),
                    None => 1,
                }
            } else {
                repeat as u64 + 1
            };

            longest = longest.max(duration);
            for _ in 0..count {
                if entries.len() as u64 >= MAX_TEMPLATE_SEGMENTS {
                    tracing::warn!(
                        limit = MAX_TEMPLATE_SEGMENTS,
                        "SegmentTimeline truncated"
                    );
                    break 'timeline;
                }
                entries.push((number, time, duration));
                let (Some(next_number), Some(next_time)) =
                    (number.checked_add(1), time.checked_add(duration))
                else {
                    tracing::warn!(time, duration, "SegmentTimeline clock overflowed");
                    break 'timeline;
                };
                number = next_number;
                time = next_time;
            }
        }
        nominal = longest;
    } else {
        let duration = addressing
            .number("duration")
            .filter(|d| *d > 0)
            .ok_or_else(|| {
                AdaptiveError::MpdParsing(
                    "SegmentTemplate needs either @duration or SegmentTimeline".to_string(),
                )
            })?;
        nominal = duration;

        let (first, mut last) = if context.dynamic {
            live_window(context, timescale, duration)?
        } else {
            let total = period_end_ticks(context, timescale).ok_or_else(|| {
                AdaptiveError::MpdParsing("Period duration is unknown".to_string())
            })?;
            (0, total.div_ceil(duration))
        };
        if last - first > MAX_TEMPLATE_SEGMENTS {
            tracing::warn!(
                segments = last - first,
                limit = MAX_TEMPLATE_SEGMENTS,
                "SegmentTemplate truncated"
            );
            last = first + MAX_TEMPLATE_SEGMENTS;
        }
        let total = period_end_ticks(context, timescale);
        for index in first..last {
            let start = index.saturating_mul(duration);
            let length = match total {
                Some(total) if !context.dynamic => duration.min(total.saturating_sub(start)),
                _ => duration,
            };
            entries.push((
                start_number.saturating_add(index),
                offset.saturating_add(start),
                length,
            ));
        }
    }

    let mut segments = SegmentList::new();
    for (number, time, duration) in entries {
        template.insert(Template::NUMBER, number.to_string());
        template.insert(Template::TIME, time.to_string());
        let mut segment = Segment::new(number, resolve_url(base, &template.resolve(media))?);
        segment.start = period_start.saturating_add(time.saturating_sub(offset));
        segment.duration = duration;
        segment.display_time = display_time(context, timescale, time.saturating_sub(offset));
        segments.push(segment);
    }

    Ok(SegmentUpdate {
        format: segments
            .first()
            .map(|s| StreamFormat::from_filename(s.url.path()))
            .unwrap_or_default(),
        segments,
        init_segment,
        target_duration: Some(timescale.to_duration(nominal)),
        live: context.dynamic,
    })
}

fn list_segments(
    context: &PeriodContext,
    addressing: &Addressing,
    base: &Url,
) -> AdaptiveResult<SegmentUpdate> {
    let timescale = addressing.timescale();
    let start_number = addressing.number("startNumber").unwrap_or(1);
    let period_start = timescale.from_duration(context.start);
    let count = addressing.urls.len() as u64;
    let duration = addressing
        .number("duration")
        .or_else(|| {
            period_end_ticks(context, timescale)
                .filter(|_| count > 0)
                .map(|total| total / count)
        })
        .unwrap_or_default();

    let mut segments = SegmentList::new();
    for (index, item) in addressing.urls.iter().enumerate() {
        let url = match item.attribute("media") {
            Some(media) => resolve_url(base, media)?,
            None => base.clone(),
        };
        let mut segment = Segment::new(start_number.saturating_add(index as u64), url);
        segment.start = period_start.saturating_add((index as u64).saturating_mul(duration));
        segment.duration = duration;
        segment.byte_range = item
            .attribute("mediaRange")
            .map(parse_byte_range_spec)
            .transpose()?;
        segment.display_time =
            display_time(context, timescale, (index as u64).saturating_mul(duration));
        segments.push(segment);
    }

    Ok(SegmentUpdate {
        format: segments
            .first()
            .map(|s| StreamFormat::from_filename(s.url.path()))
            .unwrap_or_default(),
        segments,
        init_segment: initialization_segment(addressing.initialization, base)?,
        target_duration: (duration > 0).then(|| timescale.to_duration(duration)),
        live: context.dynamic,
    })
}

/// `SegmentBase`, or a bare `BaseURL`: the whole resource is one segment.
fn single_segment(
    context: &PeriodContext,
    addressing: Option<&Addressing>,
    base: &Url,
    timescale: Timescale,
) -> AdaptiveResult<SegmentUpdate> {
    let duration = period_end_ticks(context, timescale).unwrap_or_default();
    let mut segment = Segment::new(1, base.clone());
    segment.start = timescale.from_duration(context.start);
    segment.duration = duration;
    segment.display_time = display_time(context, timescale, 0);

    let init_segment = match addressing {
        Some(addressing) => initialization_segment(addressing.initialization, base)?,
        None => None,
    };
    let format = StreamFormat::from_filename(base.path());

    let mut segments = SegmentList::new();
    segments.push(segment);
    Ok(SegmentUpdate {
        segments,
        init_segment,
        target_duration: (duration > 0).then(|| timescale.to_duration(duration)),
        live: context.dynamic,
        format,
    })
}

fn initialization_segment(node: Option<&Node>, base: &Url) -> AdaptiveResult<Option<InitSegment>> {
    let Some(node) = node else {
        return Ok(None);
    };
    let url = match node.attribute("sourceURL") {
        Some(source) => resolve_url(base, source)?,
        None => base.clone(),
    };
    Ok(Some(InitSegment {
        url,
        byte_range: node.attribute("range").map(parse_byte_range_spec).transpose()?,
        encryption: None,
    }))
}

/// Indices `[first, last)` of the segments available at `now`.
fn live_window(
    context: &PeriodContext,
    timescale: Timescale,
    duration: u64,
) -> AdaptiveResult<(u64, u64)> {
    let availability_start = context.availability_start_time.ok_or_else(|| {
        AdaptiveError::MpdParsing("dynamic MPD without @availabilityStartTime".to_string())
    })?;
    let elapsed = (context.now - availability_start)
        .to_std()
        .unwrap_or_default()
        .saturating_sub(context.start);
    let available = timescale.from_duration(elapsed) / duration;
    let window = context
        .time_shift_buffer_depth
        .map(|depth| (timescale.from_duration(depth) / duration).max(1))
        .unwrap_or(DEFAULT_LIVE_WINDOW_SEGMENTS);
    Ok((available.saturating_sub(window), available))
}

fn period_end_ticks(context: &PeriodContext, timescale: Timescale) -> Option<u64> {
    match context.duration {
        Some(duration) => Some(timescale.from_duration(duration)),
        None if context.dynamic => {
            let availability_start = context.availability_start_time?;
            let elapsed = (context.now - availability_start).to_std().ok()?;
            Some(timescale.from_duration(elapsed.saturating_sub(context.start)))
        }
        None => None,
    }
}

fn display_time(
    context: &PeriodContext,
    timescale: Timescale,
    period_time: u64,
) -> Option<DateTime<Utc>> {
    let availability_start = context.availability_start_time?;
    let offset = context.start.checked_add(timescale.to_duration(period_time))?;
    availability_start.checked_add_signed(chrono::Duration::from_std(offset).ok()?)
}

fn base_url(node: &Node, parent: &Url) -> AdaptiveResult<Url> {
    match node.child("BaseURL").map(Node::text).filter(|t| !t.is_empty()) {
        Some(base) => resolve_url(parent, base),
        None => Ok(parent.clone()),
    }
}

fn duration_attribute(node: &Node, name: &str) -> Option<Duration> {
    let value = node.attribute(name)?;
    match parse_xs_duration(value) {
        Ok(duration) => Some(duration),
        Err(e) => {
            tracing::warn!(element = %node.name, attribute = name, "{e}");
            None
        }
    }
}
