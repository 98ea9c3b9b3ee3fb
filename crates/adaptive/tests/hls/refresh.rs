use std::time::Duration;

use adaptive::{
    hls::parse_playlist, prelude::*, ChunkType, DemuxStatus, Fetcher, HttpFetcher,
    ManagerConfig, PlaylistManager,
};
use url::Url;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

use super::{setup_mock_server, HlsMock};
use crate::{manager::Collector, AssertWrapper};

#[tokio::test]
async fn live_refresh_over_http() -> anyhow::Result<()> {
    let (playlist_uri, _server) = setup_mock_server(
        "#EXTM3U
#EXT-X-TARGETDURATION:10
#EXT-X-MEDIA-SEQUENCE:6
#EXTINF:10.0,
segB.ts
#EXTINF:10.0,
segC.ts
",
    )
    .await;
    let playlist_url = Url::parse(&playlist_uri)?;

    let initial = include_str!("../fixtures/hls/live.m3u8");
    let playlist = parse_playlist(initial.into(), &playlist_url)?;
    let mut representation = playlist
        .representations()
        .next()
        .assert_success()
        .clone();
    assert_eq!(representation.source, SegmentSource::Playlist(playlist_url.clone()));

    let fetcher = HttpFetcher::default();
    let appended = representation.run_local_updates(&fetcher).await?;
    assert_eq!(appended, 1);
    assert_eq!(representation.window_start(), Some(6));

    let sequences: Vec<_> = representation.segments().iter().map(|s| s.sequence).collect();
    assert_eq!(sequences, vec![5, 6, 7]);
    let last = representation.segment(7).assert_success();
    assert_eq!(
        representation.timescale.to_duration(last.start),
        Duration::from_millis(19_900)
    );
    Ok(())
}

#[tokio::test]
async fn failed_refresh_is_counted() -> anyhow::Result<()> {
    crate::init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/gone.m3u8"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    let playlist_url = Url::parse(&format!("{}/gone.m3u8", server.uri()))?;

    let initial = include_str!("../fixtures/hls/live.m3u8");
    let playlist = parse_playlist(initial.into(), &playlist_url)?;
    let mut representation = playlist
        .representations()
        .next()
        .assert_success()
        .clone();

    let policy = RefreshPolicy::default();
    representation
        .run_local_updates(&HttpFetcher::default())
        .await
        .assert_error();
    assert_eq!(representation.failed_updates(), 1);
    assert_eq!(representation.update_interval(&policy), Duration::from_secs(5));
    assert_eq!(representation.segments().len(), 2);
    Ok(())
}

#[tokio::test]
async fn http_fetcher_sends_ranges() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/media.ts"))
        .and(wiremock::matchers::header("range", "bytes=100-149"))
        .respond_with(ResponseTemplate::new(206).set_body_bytes(vec![0x47; 50]))
        .mount(&server)
        .await;

    let url = Url::parse(&format!("{}/media.ts", server.uri()))?;
    let range = adaptive::ByteRange::new(100, Some(50));
    let data = HttpFetcher::default()
        .fetch(&url, Some(&range), ChunkType::Segment)
        .await?;
    assert_eq!(data.len(), 50);
    Ok(())
}

#[tokio::test]
async fn master_playlist_end_to_end() -> anyhow::Result<()> {
    crate::init_tracing();
    let server = MockServer::start().await;
    server
        .mock("/master.m3u8", include_str!("../fixtures/hls/master.m3u8"))
        .await
        .mock_playlist("/low/index.m3u8", "v0.ts")
        .await
        .mock_playlist("/mid/index.m3u8", "v0.ts")
        .await
        .mock_playlist("/high/index.m3u8", "v0.ts")
        .await
        .mock_playlist("/audio/en.m3u8", "a0.aac")
        .await
        .mock_playlist("/audio/commentary.m3u8", "c0.aac")
        .await
        .mock("/low/v0.ts", "\x47low")
        .await
        .mock("/audio/a0.aac", "ID3audio")
        .await;

    let config = ManagerConfig {
        logic: LogicType::AlwaysLowest,
        ..Default::default()
    };
    let master = Url::parse(&format!("{}/master.m3u8", server.uri()))?;
    let mut manager = PlaylistManager::open(
        master,
        HttpFetcher::new(config.http_client()?),
        Collector::default(),
        config,
    )
    .await?;

    assert_eq!(manager.stream_count(), 3);
    assert!(manager.is_stream_enabled(0));
    assert!(manager.is_stream_enabled(1));
    assert!(!manager.is_stream_enabled(2));

    let variants = manager.stream_set(0).assert_success();
    let loaded: Vec<_> = variants.representations.iter().map(|r| r.is_loaded()).collect();
    assert_eq!(loaded, vec![true, false, false]);
    assert!(manager.stream_set(1).assert_success().representations[0].is_loaded());
    assert!(!manager.stream_set(2).assert_success().representations[0].is_loaded());

    assert_eq!(manager.demux().await?, DemuxStatus::Demuxed);
    assert_eq!(manager.demux().await?, DemuxStatus::Demuxed);
    assert_eq!(manager.demux().await?, DemuxStatus::EndOfStream);

    let collector = manager.demuxer();
    assert_eq!(collector.sequences(0), vec![0]);
    assert_eq!(collector.sequences(1), vec![0]);
    let audio = collector
        .chunks
        .iter()
        .find(|(stream, _)| *stream == 1)
        .map(|(_, chunk)| chunk)
        .assert_success();
    assert_eq!(audio.format, StreamFormat::PackedAac);
    assert_eq!(&audio.data[..], b"ID3audio");
    Ok(())
}
