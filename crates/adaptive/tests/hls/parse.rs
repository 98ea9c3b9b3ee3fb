use std::time::Duration;

use adaptive::{
    hls::{parse_media_playlist, parse_playlist},
    prelude::*,
    AdaptiveError, Playlist, Representation,
};
use bytes::Bytes;
use tokio::time::Instant;
use url::Url;

use crate::AssertWrapper;

fn base() -> Url {
    Url::parse("https://example.com/video/index.m3u8").unwrap()
}

fn parse(body: &'static str) -> Playlist {
    parse_playlist(Bytes::from_static(body.as_bytes()), &base()).assert_success()
}

fn only_representation(playlist: &Playlist) -> &Representation {
    let period = playlist.first_period().assert_success();
    assert_eq!(period.adaptation_sets.len(), 1);
    let set = &period.adaptation_sets[0];
    assert_eq!(set.representations.len(), 1);
    &set.representations[0]
}

#[test]
fn vod_example() {
    let playlist = parse(include_str!("../fixtures/hls/vod.m3u8"));
    assert_eq!(playlist.kind, ManifestKind::Hls);
    assert!(!playlist.is_live());

    let representation = only_representation(&playlist);
    assert!(representation.is_loaded());
    assert!(!representation.is_live());
    assert_eq!(representation.target_duration, Some(Duration::from_secs(10)));
    assert_eq!(representation.format, StreamFormat::MpegTs);

    let segments: Vec<_> = representation.segments().iter().collect();
    assert_eq!(segments.len(), 2);
    assert_eq!(segments[0].sequence, 5);
    assert_eq!(segments[1].sequence, 6);
    assert_eq!(
        representation.timescale.to_duration(segments[0].duration),
        Duration::from_millis(9_900)
    );
    assert_eq!(
        representation.timescale.to_duration(segments[1].duration),
        Duration::from_secs(10)
    );
    assert_eq!(segments[0].url.as_str(), "https://example.com/video/segA.ts");
    assert_eq!(segments[1].start, segments[0].end());

    assert_eq!(representation.duration(), Duration::from_millis(19_900));
    assert_eq!(playlist.duration(), Duration::from_millis(19_900));
}

#[tokio::test(start_paused = true)]
async fn live_example_refreshes_after_cooldown() {
    let policy = RefreshPolicy::default();
    let playlist = parse(include_str!("../fixtures/hls/live.m3u8"));
    assert!(playlist.is_live());
    assert_eq!(playlist.duration(), Duration::ZERO);

    let representation = only_representation(&playlist);
    assert!(representation.is_live());
    assert_eq!(representation.duration(), Duration::ZERO);
    assert!(!representation.needs_update(Instant::now(), None, &policy));

    tokio::time::advance(Duration::from_secs(9)).await;
    assert!(!representation.needs_update(Instant::now(), None, &policy));

    tokio::time::advance(Duration::from_secs(1)).await;
    assert!(representation.needs_update(Instant::now(), None, &policy));
}

#[test]
fn sequences_are_contiguous() {
    let playlist = parse(include_str!("../fixtures/hls/discontinuity.m3u8"));
    let representation = only_representation(&playlist);

    let segments: Vec<_> = representation.segments().iter().collect();
    let sequences: Vec<_> = segments.iter().map(|s| s.sequence).collect();
    assert_eq!(sequences, vec![100, 101, 102, 103, 104]);

    let discontinuities: Vec<_> = segments.iter().map(|s| s.discontinuity).collect();
    assert_eq!(discontinuities, vec![false, false, true, false, true]);
    let discontinuity_sequences: Vec<_> =
        segments.iter().map(|s| s.discontinuity_sequence).collect();
    assert_eq!(discontinuity_sequences, vec![2, 2, 3, 3, 4]);

    for pair in segments.windows(2) {
        assert_eq!(pair[0].end(), pair[1].start);
    }
}

#[test]
fn reparse_appends_nothing() {
    let body = include_str!("../fixtures/hls/live.m3u8");
    let playlist = parse(body);
    let mut representation = only_representation(&playlist).clone();

    let update = parse_media_playlist(Bytes::from_static(body.as_bytes()), &base()).assert_success();
    assert_eq!(representation.apply_update(update, true, Instant::now()), 0);
    assert_eq!(representation.segments().len(), 2);
}

#[test]
fn malformed_tags_are_skipped() {
    let playlist = parse(include_str!("../fixtures/hls/malformed.m3u8"));
    let representation = only_representation(&playlist);

    let names: Vec<_> = representation
        .segments()
        .iter()
        .map(|s| s.url.path().rsplit('/').next().unwrap_or_default().to_string())
        .collect();
    assert_eq!(names, vec!["s0.ts", "s1.ts", "s2.ts", "s3.ts"]);
    assert!(representation.segments().iter().all(|s| s.byte_range.is_none()));
    assert!(representation.segments().iter().all(|s| s.encryption.is_none()));
    assert_eq!(representation.duration(), Duration::from_millis(22_500));
}

#[test]
fn master_playlist() {
    let playlist = parse(include_str!("../fixtures/hls/master.m3u8"));
    let period = playlist.first_period().assert_success();
    assert_eq!(period.adaptation_sets.len(), 3);

    let variants = &period.adaptation_sets[0];
    assert_eq!(variants.role, Role::Unspecified);
    let bandwidths: Vec<_> = variants.representations.iter().map(|r| r.bandwidth).collect();
    assert_eq!(bandwidths, vec![800_000, 2_000_000, 6_000_000]);
    assert_eq!(variants.representations[0].resolution, Some((640, 360)));
    assert_eq!(variants.representations[1].frame_rate, Some(29.97));
    assert_eq!(
        variants.representations[2].codecs,
        vec!["avc1.640028".to_string(), "mp4a.40.2".to_string()]
    );

    let main_audio = &period.adaptation_sets[1];
    assert_eq!(main_audio.role, Role::Main);
    assert_eq!(main_audio.lang.as_deref(), Some("en"));
    assert_eq!(main_audio.description.as_deref(), Some("aac English"));
    let commentary = &period.adaptation_sets[2];
    assert_eq!(commentary.role, Role::Alternate);

    for representation in playlist.representations() {
        assert!(!representation.is_loaded());
        assert!(representation.segments().is_empty());
        assert!(matches!(representation.source, SegmentSource::Playlist(_)));
    }
    assert_eq!(
        main_audio.representations[0].source,
        SegmentSource::Playlist(Url::parse("https://example.com/video/audio/en.m3u8").unwrap())
    );
}

#[test]
fn media_playlist_refresh_rejects_master() {
    let body = include_str!("../fixtures/hls/master.m3u8");
    parse_media_playlist(Bytes::from_static(body.as_bytes()), &base()).assert_error();
}

#[test]
fn missing_signature() {
    let result = parse_playlist(
        Bytes::from_static(b"#EXT-X-TARGETDURATION:10\n#EXTINF:10,\na.ts\n"),
        &base(),
    );
    assert!(matches!(result, Err(AdaptiveError::InvalidSignature)));
}

#[test]
fn start_offset_and_session_keys() {
    let playlist = parse(
        "#EXTM3U
#EXT-X-START:TIME-OFFSET=-12.5
#EXT-X-SESSION-KEY:METHOD=AES-128,URI=\"keys/session.key\"
#EXT-X-STREAM-INF:BANDWIDTH=1000000
low.m3u8
",
    );
    assert_eq!(playlist.start_offset, Some(-12.5));
    assert_eq!(
        playlist.session_keys,
        vec![Url::parse("https://example.com/video/keys/session.key").unwrap()]
    );
}

#[test]
fn out_of_range_numbers_are_tolerated() {
    for target in ["inf", "1e20"] {
        let body = format!("#EXTM3U\n#EXT-X-TARGETDURATION:{target}\n#EXTINF:4,\na.ts\n");
        let playlist = parse_playlist(Bytes::from(body), &base()).assert_success();
        let representation = only_representation(&playlist);
        assert_eq!(representation.target_duration, None);
        assert_eq!(representation.segments().len(), 1);
    }

    let playlist = parse(
        "#EXTM3U
#EXT-X-TARGETDURATION:4
#EXT-X-PROGRAM-DATE-TIME:2024-03-01T10:00:00Z
#EXTINF:1e13,
a.ts
#EXTINF:1e300,
b.ts
#EXTINF:4,
c.ts
#EXT-X-ENDLIST
",
    );
    let representation = only_representation(&playlist);
    let sequences: Vec<_> = representation.segments().iter().map(|s| s.sequence).collect();
    assert_eq!(sequences, vec![0, 1, 2]);
    assert!(representation
        .segments()
        .iter()
        .skip(1)
        .all(|s| s.display_time.is_none()));
}
