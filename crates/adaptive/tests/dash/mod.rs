use std::{sync::Arc, time::Duration};

use adaptive::{
    dash::{merge_playlist, parse_mpd},
    prelude::*,
    ChunkType, DemuxStatus, HttpFetcher, ManagerConfig, MemoryFetcher, PlaylistManager,
};
use chrono::{DateTime, Utc};
use url::Url;
use wiremock::{
    matchers::{method, path, path_regex},
    Mock, MockServer, ResponseTemplate,
};

use crate::{manager::Collector, AssertWrapper};

const FRAGMENT: &[u8] = b"\0\0\0\x18ftypiso6\0\0\0\0iso6dash";

async fn setup_mock_server(body: &str) -> (String, MockServer) {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/dash/manifest.mpd"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/dash/.+\.(mp4|m4s)$"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(FRAGMENT))
        .mount(&mock_server)
        .await;

    (format!("{}/dash/manifest.mpd", mock_server.uri()), mock_server)
}

fn base() -> Url {
    Url::parse("https://example.com/dash/manifest.mpd").unwrap()
}

fn now() -> DateTime<Utc> {
    "2024-01-01T00:01:00Z".parse().unwrap()
}

#[test]
fn static_presentation() -> anyhow::Result<()> {
    let playlist = parse_mpd(include_bytes!("../fixtures/dash/vod.mpd"), &base(), now())?;
    assert_eq!(playlist.kind, ManifestKind::Dash);
    assert!(!playlist.is_live());
    assert_eq!(playlist.duration(), Duration::from_secs(12));

    assert_eq!(playlist.periods.len(), 2);
    let first = &playlist.periods[0];
    assert_eq!(first.id, "p0");
    assert_eq!(first.duration, Some(Duration::from_secs(8)));
    let second = &playlist.periods[1];
    assert_eq!(second.start, Duration::from_secs(8));
    assert_eq!(second.duration, Some(Duration::from_secs(4)));

    let video = &first.adaptation_sets[0];
    assert_eq!(video.id, "1");
    assert_eq!(video.role, Role::Unspecified);
    let high = video.representation("v-high").assert_success();
    assert_eq!(high.resolution, Some((1920, 1080)));
    assert!(high.frame_rate.is_some_and(|f| (f - 29.97).abs() < 0.01));
    let urls: Vec<_> = high.segments().iter().map(|s| s.url.path().to_string()).collect();
    assert_eq!(urls, vec!["/dash/v-high/1.m4s", "/dash/v-high/2.m4s"]);
    assert_eq!(
        high.init_segment().map(|i| i.url.path()),
        Some("/dash/v-high/init.mp4")
    );

    let audio = &first.adaptation_sets[1];
    assert_eq!(audio.role, Role::Main);
    assert_eq!(audio.lang.as_deref(), Some("en"));
    assert_eq!(audio.description.as_deref(), Some("English stereo"));
    let track = &audio.representations[0];
    assert_eq!(track.channels, Some(2));
    let times: Vec<_> = track.segments().iter().map(|s| s.url.path().to_string()).collect();
    assert_eq!(times, vec!["/dash/audio/0.m4s", "/dash/audio/192000.m4s"]);
    assert_eq!(track.duration(), Duration::from_secs(8));

    let subtitles = &first.adaptation_sets[2];
    assert_eq!(subtitles.role, Role::Subtitle);
    let track = &subtitles.representations[0];
    assert_eq!(track.format, StreamFormat::WebVtt);
    assert_eq!(track.segments().len(), 1);
    assert_eq!(track.duration(), Duration::from_secs(8));

    let later = &second.adaptation_sets[0].representations[0];
    assert_eq!(
        later.segments().first().map(|s| later.timescale.to_duration(s.start)),
        Some(Duration::from_secs(8))
    );
    Ok(())
}

#[test]
fn refresh_merges_by_id() -> anyhow::Result<()> {
    let mut current = parse_mpd(include_bytes!("../fixtures/dash/live.mpd"), &base(), now())?;
    assert!(current.is_live());
    let updated = parse_mpd(include_bytes!("../fixtures/dash/live-next.mpd"), &base(), now())?;

    assert_eq!(merge_playlist(&mut current, updated), 1);
    let representation = current.representations().next().assert_success();
    let numbers: Vec<_> = representation.segments().iter().map(|s| s.sequence).collect();
    assert_eq!(numbers, vec![1, 2, 3]);
    assert_eq!(representation.segment(3).map(|s| s.start), Some(8));
    Ok(())
}

#[test]
fn rejects_other_documents() {
    parse_mpd(b"<SmoothStreamingMedia/>", &base(), now()).assert_error();
    parse_mpd(b"<MPD><Period><AdaptationSet>", &base(), now()).assert_error();
    parse_mpd(
        br#"<MPD type="dynamic"><Period><AdaptationSet>
<SegmentTemplate duration="2" media="$Number$.m4s"/><Representation id="v"/>
</AdaptationSet></Period></MPD>"#,
        &base(),
        now(),
    )
    .assert_error();
}

#[tokio::test]
async fn static_presentation_end_to_end() -> anyhow::Result<()> {
    crate::init_tracing();
    let (manifest, _server) = setup_mock_server(include_str!("../fixtures/dash/vod.mpd")).await;
    let config = ManagerConfig {
        logic: LogicType::AlwaysLowest,
        ..Default::default()
    };
    let mut manager = PlaylistManager::open(
        Url::parse(&manifest)?,
        HttpFetcher::default(),
        Collector::default(),
        config,
    )
    .await?;

    assert_eq!(manager.stream_count(), 3);
    assert!(manager.is_stream_enabled(0));
    assert!(manager.is_stream_enabled(1));
    assert!(!manager.is_stream_enabled(2));

    let mut statuses = Vec::new();
    loop {
        let status = manager.demux().await?;
        statuses.push(status);
        if status == DemuxStatus::EndOfStream {
            break;
        }
    }
    assert_eq!(statuses.len(), 7);

    let order: Vec<_> = manager
        .demuxer()
        .chunks
        .iter()
        .map(|(stream, chunk)| (*stream, chunk.kind, chunk.representation.as_str()))
        .collect();
    assert_eq!(
        order,
        vec![
            (0, ChunkType::Init, "v-low"),
            (0, ChunkType::Segment, "v-low"),
            (1, ChunkType::Init, "a"),
            (1, ChunkType::Segment, "a"),
            (0, ChunkType::Segment, "v-low"),
            (1, ChunkType::Segment, "a"),
        ]
    );
    assert!(manager
        .demuxer()
        .chunks
        .iter()
        .all(|(_, chunk)| chunk.format == StreamFormat::Mp4 && &chunk.data[..] == FRAGMENT));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn dynamic_manifest_is_refreshed() -> anyhow::Result<()> {
    crate::init_tracing();
    let manifest = "https://example.com/dash/live.mpd";
    let fetcher = Arc::new(MemoryFetcher::new());
    fetcher.insert(manifest, &include_bytes!("../fixtures/dash/live.mpd")[..]);
    for number in 1..=3 {
        fetcher.insert(&format!("https://example.com/dash/live/{number}.m4s"), FRAGMENT);
    }

    let mut manager = PlaylistManager::open(
        Url::parse(manifest)?,
        fetcher.clone(),
        Collector::default(),
        ManagerConfig::default(),
    )
    .await?;
    assert_eq!(manager.demux().await?, DemuxStatus::Demuxed);
    assert_eq!(manager.demux().await?, DemuxStatus::Demuxed);
    assert_eq!(manager.demux().await?, DemuxStatus::Buffering);
    assert_eq!(fetcher.fetch_count(manifest), 1);

    fetcher.insert(manifest, &include_bytes!("../fixtures/dash/live-next.mpd")[..]);
    tokio::time::advance(Duration::from_secs(4)).await;
    assert_eq!(manager.demux().await?, DemuxStatus::Demuxed);
    assert_eq!(fetcher.fetch_count(manifest), 2);
    assert_eq!(manager.demuxer().sequences(0), vec![1, 2, 3]);
    Ok(())
}
