//! Benchmarks for frame movement through the pipeline
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::time::Duration;
use vidpipe_rs::pipeline::connection::Connection;
use vidpipe_rs::pipeline::modules::{
    Camera, CameraConfig, Detector, DetectorConfig, Tracker, TrackerConfig,
};
use vidpipe_rs::pipeline::wire::{self, PackageType};
use vidpipe_rs::pipeline::{ConnectionId, FieldValue};
use vidpipe_rs::{Engine, EngineConfig, Frame, Graph};

fn sample_frame(image_len: usize) -> Frame {
    Frame::new()
        .with("frame_id", 42u64)
        .with("camera_name", "camera")
        .with("capture_time_micros", 1_700_000_000_000_000i64)
        .with("original_image", vec![7u8; image_len])
        .with(
            "tags",
            vec![FieldValue::from("person"), FieldValue::from("car")],
        )
}

fn bench_connection_push_pop(c: &mut Criterion) {
    let mut group = c.benchmark_group("connection");
    group.throughput(Throughput::Elements(1));
    let connection = Connection::new(ConnectionId(0), 64, Duration::from_secs(1)).unwrap();
    let frame = sample_frame(64);

    group.bench_function("push_pop", |b| {
        b.iter(|| {
            connection.push(black_box(frame.clone())).unwrap();
            black_box(connection.pop().unwrap());
        })
    });
    group.finish();
}

fn bench_wire_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("wire");

    for size in [0usize, 4 * 1024, 640 * 480 * 3].iter() {
        let frame = sample_frame(*size);
        let bytes = wire::encode(&PackageType::Frame, &frame).unwrap();
        group.throughput(Throughput::Bytes(bytes.len() as u64));

        group.bench_with_input(BenchmarkId::new("encode", size), &frame, |b, frame| {
            b.iter(|| wire::encode(&PackageType::Frame, black_box(frame)).unwrap())
        });
        group.bench_with_input(BenchmarkId::new("decode", size), &bytes, |b, bytes| {
            b.iter(|| wire::decode(black_box(bytes)).unwrap())
        });
    }
    group.finish();
}

fn run_chain(frames: u64) {
    let mut graph = Graph::new();
    graph
        .add_module(
            Camera::new(CameraConfig {
                max_frames: Some(frames),
                ..Default::default()
            })
            .unwrap(),
        )
        .unwrap();
    graph
        .add_module(
            Detector::new(DetectorConfig {
                detector_type: "ssd".into(),
                model: "mobilenet".into(),
                ..Default::default()
            })
            .unwrap(),
        )
        .unwrap();
    graph
        .add_module(Tracker::new(TrackerConfig::default()).unwrap())
        .unwrap();
    graph
        .connect_default("camera", None, "detector", Some("input0"))
        .unwrap();
    graph
        .connect_default("detector", Some("output0"), "tracker", None)
        .unwrap();

    let mut engine = Engine::new(graph, EngineConfig::default()).unwrap();
    engine.start().unwrap();
    engine.wait_until_stopped();
    engine.stop().unwrap();
    engine.clean().unwrap();
}

fn bench_engine_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine_chain");
    group.sample_size(20);

    for frames in [100u64, 1000].iter() {
        group.throughput(Throughput::Elements(*frames));
        group.bench_with_input(BenchmarkId::from_parameter(frames), frames, |b, &frames| {
            b.iter(|| run_chain(frames))
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_connection_push_pop,
    bench_wire_codec,
    bench_engine_chain
);
criterion_main!(benches);
