use std::{collections::HashMap, time::Duration};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::time::Instant;
use url::Url;

use super::{Attribute, Tag, TagKind};
use crate::{
    encryption::CommonEncryption,
    error::{AdaptiveError, AdaptiveResult},
    playlist::{
        AdaptationSet, InitSegment, ManifestKind, Period, Playlist, Representation, Role, Segment,
        SegmentList, SegmentSource, SegmentUpdate, StreamFormat,
    },
    stream::ByteStream,
    time::{parse_date_time, Timescale},
    ByteRange,
};

const SIGNATURE: &str = "#EXTM3U";

/// Reads the signature line then turns every following line into a tag.
///
/// A variant stream declaration absorbs the URI line that follows it as a `URI` attribute.
pub fn parse_tags(stream: &mut ByteStream) -> AdaptiveResult<Vec<Tag>> {
    let signature = stream.read_line().ok_or(AdaptiveError::InvalidSignature)?;
    let signature = signature.trim_start_matches('\u{feff}').trim_end();
    match signature.strip_prefix(SIGNATURE) {
        Some(rest) if rest.is_empty() || rest.starts_with(char::is_whitespace) => {}
        _ => return Err(AdaptiveError::InvalidSignature),
    }

    let mut tags: Vec<Tag> = Vec::new();
    while let Some(line) = stream.read_line() {
        let Some(tag) = Tag::parse_line(&line) else {
            continue;
        };

        if tag.kind() == TagKind::Uri {
            if let Some(previous) = tags.last_mut() {
                if previous.kind().is_stream_declaration() && previous.attribute("URI").is_none() {
                    if let Some(uri) = tag.value() {
                        previous.push_attribute(Attribute::new("URI", uri.value.clone()));
                    }
                    continue;
                }
            }
        }
        tags.push(tag);
    }
    Ok(tags)
}

/// Parses a master or media playlist into a playlist graph.
pub fn parse_playlist(data: Bytes, url: &Url) -> AdaptiveResult<Playlist> {
    let tags = parse_tags(&mut ByteStream::new(data))?;

    if tags.iter().any(|t| t.kind().is_stream_declaration()) {
        parse_master(&tags, url)
    } else {
        parse_leaf(&tags, url)
    }
}

/// Parses the segments of a media playlist, as used by live refreshes.
pub fn parse_media_playlist(data: Bytes, url: &Url) -> AdaptiveResult<SegmentUpdate> {
    let tags = parse_tags(&mut ByteStream::new(data))?;
    if tags.iter().any(|t| t.kind().is_stream_declaration()) {
        return Err(AdaptiveError::M3u8ParseError(format!(
            "{url} is a master playlist"
        )));
    }
    let parsed = parse_segments(&tags, url);
    if parsed.uri_count == 0 {
        return Err(AdaptiveError::M3u8ParseError(format!(
            "no segment found in {url}"
        )));
    }
    Ok(parsed.update)
}

fn parse_leaf(tags: &[Tag], url: &Url) -> AdaptiveResult<Playlist> {
    let parsed = parse_segments(tags, url);
    if parsed.uri_count == 0 {
        return Err(AdaptiveError::M3u8ParseError(
            "no stream or segment found".to_string(),
        ));
    }

    let mut playlist = Playlist::new(ManifestKind::Hls, url.clone());
    let mut representation = Representation::new("0", SegmentSource::Playlist(url.clone()));
    representation.apply_update(parsed.update, false, Instant::now());

    playlist.start_offset = parse_start_offset(tags).filter(|offset| {
        representation.is_live()
            || offset.abs() <= representation.duration().as_secs_f64()
    });
    playlist.session_keys = parse_session_keys(tags, url);

    let mut set = AdaptationSet::new("0");
    set.representations.push(representation);
    playlist.periods.push(Period {
        id: "0".to_string(),
        adaptation_sets: vec![set],
        ..Default::default()
    });
    Ok(playlist)
}

struct Rendition<'a> {
    tag: &'a Tag,
    group: String,
    media_type: String,
    uri: Option<Url>,
}

fn parse_master(tags: &[Tag], url: &Url) -> AdaptiveResult<Playlist> {
    let mut renditions = Vec::new();
    for tag in tags.iter().filter(|t| t.kind() == TagKind::Media) {
        let (Some(group), Some(media_type)) = (tag.string("GROUP-ID"), tag.string("TYPE")) else {
            log::warn!("Dropped EXT-X-MEDIA without GROUP-ID or TYPE");
            continue;
        };
        let uri = match tag.string("URI") {
            Some(uri) => match url.join(&uri) {
                Ok(uri) => Some(uri),
                Err(e) => {
                    log::warn!("Dropped EXT-X-MEDIA with invalid URI {uri}: {e}");
                    continue;
                }
            },
            None => None,
        };
        renditions.push(Rendition {
            tag,
            group,
            media_type,
            uri,
        });
    }

    let mut default_set = AdaptationSet::default();
    let mut group_sets: Vec<AdaptationSet> = Vec::new();
    let mut group_index: HashMap<String, usize> = HashMap::new();
    // group id referenced by a variant -> adaptation sets holding such variants
    let mut referenced: Vec<(String, bool, usize)> = Vec::new();
    let mut next_id = 0usize;

    for tag in tags.iter().filter(|t| t.kind().is_stream_declaration()) {
        let Some(representation) = create_representation(tag, url, next_id) else {
            continue;
        };
        next_id += 1;
        let SegmentSource::Playlist(source) = &representation.source else {
            continue;
        };

        let set_slot = match renditions
            .iter()
            .find(|r| r.uri.as_ref() == Some(source))
        {
            Some(rendition) => {
                let index = *group_index
                    .entry(rendition.group.clone())
                    .or_insert_with(|| {
                        group_sets.push(AdaptationSet::default());
                        group_sets.len() - 1
                    });
                let set = &mut group_sets[index];
                if set
                    .representations
                    .iter()
                    .any(|r| r.source == representation.source)
                {
                    continue;
                }
                set.representations.push(representation);
                Some(index)
            }
            None => {
                default_set.representations.push(representation);
                None
            }
        };

        for name in ["AUDIO", "VIDEO", "SUBTITLES"] {
            if let Some(group) = tag.string(name) {
                match set_slot {
                    Some(index) => referenced.push((group, false, index)),
                    None => referenced.push((group, true, 0)),
                }
            }
        }
    }

    let mut alternates = Vec::new();
    for rendition in &renditions {
        let Some(uri) = &rendition.uri else {
            // Rendition muxed into the variants referencing its group
            let lang = rendition.tag.string("LANGUAGE");
            let description = rendition_description(rendition);
            for (group, is_default, index) in &referenced {
                if *group != rendition.group {
                    continue;
                }
                let set = if *is_default {
                    &mut default_set
                } else {
                    &mut group_sets[*index]
                };
                if set.lang.is_none() {
                    set.lang = lang.clone();
                }
                if set.description.is_none() {
                    set.description = description.clone();
                }
            }
            continue;
        };

        let used_by_variant = group_sets
            .iter()
            .chain(std::iter::once(&default_set))
            .flat_map(|s| s.representations.iter())
            .any(|r| r.source == SegmentSource::Playlist(uri.clone()));
        if used_by_variant {
            continue;
        }

        let mut representation =
            Representation::new(next_id.to_string(), SegmentSource::Playlist(uri.clone()));
        next_id += 1;
        representation.format = match rendition.media_type.as_str() {
            "AUDIO" | "VIDEO" => StreamFormat::Unknown,
            "SUBTITLES" => StreamFormat::WebVtt,
            other => {
                log::debug!("Unsupported rendition type {other}");
                StreamFormat::Unsupported
            }
        };
        if let Some(channels) = rendition.tag.string("CHANNELS") {
            representation.channels = channels.split('/').next().and_then(|c| c.parse().ok());
        }

        let mut set = AdaptationSet::default();
        set.lang = rendition.tag.string("LANGUAGE");
        set.description = rendition_description(rendition);
        set.role = rendition_role(rendition);
        set.representations.push(representation);
        alternates.push(set);
    }

    let mut adaptation_sets = Vec::new();
    if !default_set.representations.is_empty() {
        adaptation_sets.push(default_set);
    }
    adaptation_sets.extend(group_sets);
    adaptation_sets.extend(alternates);
    if adaptation_sets.is_empty() {
        return Err(AdaptiveError::M3u8ParseError(
            "no usable variant stream".to_string(),
        ));
    }
    for (index, set) in adaptation_sets.iter_mut().enumerate() {
        if set.id.is_empty() {
            set.id = index.to_string();
        }
    }

    let mut playlist = Playlist::new(ManifestKind::Hls, url.clone());
    playlist.start_offset = parse_start_offset(tags);
    playlist.session_keys = parse_session_keys(tags, url);
    playlist.periods.push(Period {
        id: "0".to_string(),
        adaptation_sets,
        ..Default::default()
    });
    Ok(playlist)
}

fn create_representation(tag: &Tag, base: &Url, index: usize) -> Option<Representation> {
    let Some(uri) = tag.string("URI") else {
        log::warn!("Dropped variant stream without URI");
        return None;
    };
    let url = match base.join(&uri) {
        Ok(url) => url,
        Err(e) => {
            log::warn!("Dropped variant stream with invalid URI {uri}: {e}");
            return None;
        }
    };

    let mut representation = Representation::new(index.to_string(), SegmentSource::Playlist(url));
    representation.bandwidth = tag
        .attribute("AVERAGE-BANDWIDTH")
        .or_else(|| tag.attribute("BANDWIDTH"))
        .and_then(|a| a.decimal())
        .unwrap_or_default();
    representation.resolution = tag.attribute("RESOLUTION").and_then(|a| a.resolution());
    representation.frame_rate = tag.attribute("FRAME-RATE").and_then(|a| a.floating_point());
    if let Some(codecs) = tag.string("CODECS") {
        representation.codecs = codecs
            .split(',')
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect();
    }
    Some(representation)
}

fn rendition_description(rendition: &Rendition) -> Option<String> {
    rendition
        .tag
        .string("NAME")
        .map(|name| format!("{} {}", rendition.group, name))
}

fn rendition_role(rendition: &Rendition) -> Role {
    if rendition.media_type == "SUBTITLES" {
        return Role::Subtitle;
    }
    match rendition.tag.string("DEFAULT").as_deref() {
        Some("YES") => Role::Main,
        Some(_) => Role::Alternate,
        None => match rendition.tag.string("AUTOSELECT").as_deref() {
            Some("NO") => Role::Supplementary,
            _ => Role::Unspecified,
        },
    }
}

fn parse_start_offset(tags: &[Tag]) -> Option<f64> {
    tags.iter()
        .find(|t| t.kind() == TagKind::Start)
        .and_then(|t| t.attribute("TIME-OFFSET"))
        .and_then(|a| a.floating_point())
}

fn parse_session_keys(tags: &[Tag], base: &Url) -> Vec<Url> {
    tags.iter()
        .filter(|t| t.kind() == TagKind::SessionKey)
        .filter(|t| t.string("METHOD").as_deref() == Some("AES-128"))
        .filter_map(|t| t.string("URI"))
        .filter_map(|uri| base.join(&uri).ok())
        .collect()
}

/// Outcome of an `EXT-X-KEY` tag.
enum KeyDeclaration {
    Clear,
    Aes128(CommonEncryption),
    Unsupported(String),
}

fn parse_encryption(tag: &Tag, base: &Url) -> Option<KeyDeclaration> {
    let method = tag.string("METHOD")?;
    match method.as_str() {
        "NONE" => Some(KeyDeclaration::Clear),
        "AES-128" => {
            let uri = tag.string("URI")?;
            let key_url = base.join(&uri).ok()?;
            let iv = match tag.attribute("IV") {
                Some(iv) => Some(pad_iv(&iv.hex_sequence()?)?),
                None => None,
            };
            Some(KeyDeclaration::Aes128(CommonEncryption::aes128(key_url, iv)))
        }
        _ => Some(KeyDeclaration::Unsupported(method)),
    }
}

fn pad_iv(bytes: &[u8]) -> Option<[u8; 16]> {
    if bytes.len() > 16 {
        return None;
    }
    let mut iv = [0u8; 16];
    iv[16 - bytes.len()..].copy_from_slice(bytes);
    Some(iv)
}

pub(crate) struct ParsedSegments {
    pub(crate) update: SegmentUpdate,
    pub(crate) uri_count: usize,
}

/// Running state of one segment parse.
#[derive(Default)]
struct SegmentContext {
    sequence: u64,
    start: u64,
    byte_range: Option<(u64, Option<u64>)>,
    previous_range_end: u64,
    encryption: Option<CommonEncryption>,
    discontinuity: bool,
    discontinuity_sequence: u64,
    absolute_time: Option<DateTime<Utc>>,
    extinf: Option<Tag>,
}

impl SegmentContext {
    fn clear_pending(&mut self) {
        self.byte_range = None;
        self.discontinuity = false;
        self.extinf = None;
    }
}

pub(crate) fn parse_segments(tags: &[Tag], base: &Url) -> ParsedSegments {
    let timescale = Timescale::MICROSECONDS;
    let mut context = SegmentContext::default();
    let mut segments = SegmentList::new();
    let mut init_segment = None;
    let mut target_duration = None;
    let mut end_list = false;
    let mut vod = false;
    let mut unsupported_encryption = false;
    let mut uri_count = 0;

    for tag in tags {
        match tag.kind() {
            TagKind::TargetDuration => {
                match tag.value().and_then(|v| v.floating_point()).and_then(seconds) {
                    Some(value) => target_duration = Some(value),
                    None => log::warn!("Ignored malformed EXT-X-TARGETDURATION"),
                }
            }
            TagKind::MediaSequence => match tag.value().and_then(|v| v.decimal()) {
                Some(sequence) => context.sequence = sequence,
                None => log::warn!("Ignored malformed EXT-X-MEDIA-SEQUENCE"),
            },
            TagKind::DiscontinuitySequence => match tag.value().and_then(|v| v.decimal()) {
                Some(sequence) => context.discontinuity_sequence = sequence,
                None => log::warn!("Ignored malformed EXT-X-DISCONTINUITY-SEQUENCE"),
            },
            TagKind::PlaylistType => match tag.value().map(|v| v.value.trim()) {
                Some("VOD") => vod = true,
                Some("EVENT") => {}
                other => log::warn!("Ignored unknown playlist type {other:?}"),
            },
            TagKind::EndList => end_list = true,
            TagKind::Discontinuity => {
                context.discontinuity = true;
                context.discontinuity_sequence = context.discontinuity_sequence.saturating_add(1);
            }
            TagKind::ByteRange => match tag.value().and_then(|v| v.byte_range()) {
                Some(range) => context.byte_range = Some(range),
                None => log::warn!("Ignored malformed EXT-X-BYTERANGE"),
            },
            TagKind::Key => match parse_encryption(tag, base) {
                Some(KeyDeclaration::Clear) => context.encryption = None,
                Some(KeyDeclaration::Aes128(encryption)) => context.encryption = Some(encryption),
                Some(KeyDeclaration::Unsupported(method)) => {
                    log::warn!("Unsupported encryption method {method}");
                    unsupported_encryption = true;
                    context.encryption = None;
                }
                None => log::warn!("Ignored malformed EXT-X-KEY"),
            },
            TagKind::Map => {
                if init_segment.is_some() {
                    continue;
                }
                let Some(url) = tag.string("URI").and_then(|uri| base.join(&uri).ok()) else {
                    log::warn!("Ignored EXT-X-MAP without valid URI");
                    continue;
                };
                let byte_range = tag
                    .attribute("BYTERANGE")
                    .and_then(|a| a.byte_range())
                    .map(|(length, offset)| ByteRange::new(offset.unwrap_or(0), Some(length)));
                init_segment = Some(InitSegment {
                    url,
                    byte_range,
                    encryption: context.encryption.clone(),
                });
            }
            TagKind::ProgramDateTime => {
                let Some(time) = tag.value().and_then(|v| parse_date_time(&v.value)) else {
                    log::warn!("Ignored malformed EXT-X-PROGRAM-DATE-TIME");
                    continue;
                };
                if context.absolute_time.is_none() {
                    backfill_display_times(&mut segments, time, timescale);
                }
                context.absolute_time = Some(time);
            }
            TagKind::ExtInf => context.extinf = Some(tag.clone()),
            TagKind::Uri => {
                uri_count += 1;
                let uri = tag.value().map(|v| v.value.trim()).unwrap_or_default();
                let extinf = context.extinf.take();
                let duration_attribute = extinf.as_ref().and_then(|t| t.attribute("DURATION"));
                if uri.is_empty() || duration_attribute.is_some_and(|d| d.value.is_empty()) {
                    context.clear_pending();
                    continue;
                }

                let url = match base.join(uri) {
                    Ok(url) => url,
                    Err(e) => {
                        log::warn!("Dropped segment with invalid URI {uri}: {e}");
                        context.clear_pending();
                        continue;
                    }
                };

                let declared = duration_attribute.and_then(|d| d.floating_point());
                let length = match declared.map(seconds) {
                    Some(Some(length)) => length,
                    Some(None) => {
                        log::warn!("Ignored out of range EXTINF duration for {uri}");
                        target_duration.unwrap_or_default()
                    }
                    None => target_duration.unwrap_or_default(),
                };
                let duration = timescale.from_duration(length);

                let mut segment = Segment::new(context.sequence, url);
                segment.start = context.start;
                segment.duration = duration;
                segment.encryption = context.encryption.clone();
                segment.discontinuity = context.discontinuity;
                segment.discontinuity_sequence = context.discontinuity_sequence;
                segment.display_time = context.absolute_time;
                segment.title = extinf
                    .as_ref()
                    .and_then(|t| t.string("TITLE"))
                    .filter(|t| !t.is_empty());
                if let Some((size, offset)) = context.byte_range.take() {
                    let offset = offset.unwrap_or(context.previous_range_end);
                    segment.byte_range = Some(ByteRange::new(offset, Some(size)));
                    context.previous_range_end = offset.saturating_add(size);
                }

                if let Some(time) = context.absolute_time {
                    context.absolute_time =
                        to_chrono(length).and_then(|length| time.checked_add_signed(length));
                    if context.absolute_time.is_none() {
                        log::warn!("Dropped program date time past {time}");
                    }
                }
                context.sequence = context.sequence.saturating_add(1);
                context.start = context.start.saturating_add(duration);
                context.clear_pending();
                segments.push(segment);
            }
            TagKind::IFramesOnly
            | TagKind::IndependentSegments
            | TagKind::Version
            | TagKind::Start
            | TagKind::SessionKey
            | TagKind::Media
            | TagKind::StreamInf
            | TagKind::IFrameStreamInf => {}
        }
    }

    let format = if unsupported_encryption {
        StreamFormat::Unsupported
    } else if init_segment.is_some() {
        StreamFormat::Mp4
    } else {
        segments
            .first()
            .map(|s| StreamFormat::from_filename(s.url.path()))
            .unwrap_or_default()
    };

    ParsedSegments {
        update: SegmentUpdate {
            segments,
            init_segment,
            target_duration,
            live: !end_list && !vod,
            format,
        },
        uri_count,
    }
}

fn backfill_display_times(segments: &mut SegmentList, time: DateTime<Utc>, timescale: Timescale) {
    let mut time = time;
    let pending: Vec<u64> = segments.iter().rev().map(|s| s.sequence).collect();
    for sequence in pending {
        let Some(segment) = segments.get_mut(sequence) else {
            continue;
        };
        let Some(earlier) = to_chrono(timescale.to_duration(segment.duration))
            .and_then(|length| time.checked_sub_signed(length))
        else {
            break;
        };
        time = earlier;
        segment.display_time = Some(time);
    }
}

/// Segment lengths are non-negative and must fit both [Duration] and the microsecond clock.
fn seconds(value: f64) -> Option<Duration> {
    let length = Duration::try_from_secs_f64(value.max(0.0)).ok()?;
    (length.as_micros() <= u64::MAX as u128).then_some(length)
}

fn to_chrono(duration: Duration) -> Option<chrono::Duration> {
    chrono::Duration::from_std(duration).ok()
}
