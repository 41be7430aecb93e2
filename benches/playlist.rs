//! Playlist parsing benchmark suite.
//!
//! Benchmarks manifest parsing at live-window sizes:
//! - Media playlists: 3, 10, 60 segments
//! - Master playlist with several variants
//!
//! Run with: cargo bench --bench playlist
//! Results saved to: target/criterion/

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use url::Url;

use livecam::ReconnectPolicy;
use livecam::transport::playlist::parse_manifest;

// ============================================================================
// Benchmark Parameters
// ============================================================================

const SEGMENT_COUNTS: &[u64] = &[3, 10, 60];
const VARIANT_COUNT: usize = 6;

fn base() -> Url {
    Url::parse("http://cam.local:8888/cam/index.m3u8").unwrap()
}

fn media_playlist(count: u64) -> String {
    let mut text = String::from(
        "#EXTM3U\n#EXT-X-VERSION:9\n#EXT-X-TARGETDURATION:2\n\
         #EXT-X-MEDIA-SEQUENCE:1000\n#EXT-X-MAP:URI=\"init.mp4\"\n",
    );
    for sequence in 1000..1000 + count {
        text.push_str(&format!("#EXTINF:2.000,\nseg{sequence}.mp4\n"));
    }
    text
}

fn master_playlist() -> String {
    let mut text = String::from("#EXTM3U\n#EXT-X-VERSION:9\n");
    for variant in 0..VARIANT_COUNT {
        text.push_str(&format!(
            "#EXT-X-STREAM-INF:BANDWIDTH={},CODECS=\"avc1.64001f\"\nvideo{variant}_stream.m3u8\n",
            (variant + 1) * 600_000
        ));
    }
    text
}

// ============================================================================
// Benchmark: Media Playlist
// ============================================================================

fn bench_media_playlist(c: &mut Criterion) {
    let base = base();
    let mut group = c.benchmark_group("media_playlist");

    for &count in SEGMENT_COUNTS {
        let text = media_playlist(count);
        group.throughput(Throughput::Bytes(text.len() as u64));
        group.bench_with_input(BenchmarkId::new("parse", count), &text, |b, text| {
            b.iter(|| parse_manifest(black_box(text.as_bytes()), &base).unwrap());
        });
    }

    group.finish();
}

// ============================================================================
// Benchmark: Master Playlist
// ============================================================================

fn bench_master_playlist(c: &mut Criterion) {
    let base = base();
    let text = master_playlist();

    c.bench_function("master_playlist/parse", |b| {
        b.iter(|| parse_manifest(black_box(text.as_bytes()), &base).unwrap());
    });
}

// ============================================================================
// Benchmark: Reconnect Delay
// ============================================================================

fn bench_reconnect_delay(c: &mut Criterion) {
    let policy = ReconnectPolicy::default();

    c.bench_function("reconnect_delay/0..64", |b| {
        b.iter(|| {
            for attempt in 0..64u32 {
                black_box(policy.delay(black_box(attempt)));
            }
        });
    });
}

criterion_group!(
    benches,
    bench_media_playlist,
    bench_master_playlist,
    bench_reconnect_delay
);
criterion_main!(benches);
