//! Integration tests for the file writer and config-driven pipelines
//!
//! These tests validate:
//! - JSON-lines and CSV output written through a running engine
//! - append-on-start across engine runs
//! - config save/load round trips in TOML and JSON
//! - building and running an engine from a config file

mod common;

use common::builders::CameraBuilder;
use common::test_timeout;
use std::collections::BTreeMap;
use tempfile::TempDir;
use vidpipe_rs::config::ConfigFormat;
use vidpipe_rs::pipeline::modules::{
    CameraConfig, StriderConfig, ThrottlerConfig, Writer, WriterConfig,
};
use vidpipe_rs::{AppConfig, EngineConfig, Engine, Graph, ModuleSpec, VidPipeError};

fn run_camera_into_writer(frames: u64, config: WriterConfig) {
    let mut graph = Graph::new();
    graph
        .add_module(CameraBuilder::new("camera").max_frames(frames).build())
        .unwrap();
    graph.add_module(Writer::new(config).unwrap()).unwrap();
    graph.connect_default("camera", None, "writer", None).unwrap();

    let mut engine = Engine::new(graph, EngineConfig::default()).unwrap();
    engine.start().unwrap();
    assert!(engine.wait_until_stopped_timeout(test_timeout()));
    engine.stop().unwrap();
    engine.clean().unwrap();
}

#[test]
fn test_jsonl_output_appends() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested/out.jsonl");
    let config = WriterConfig {
        uri: path.to_string_lossy().into_owned(),
        ..Default::default()
    };

    run_camera_into_writer(3, config.clone());
    run_camera_into_writer(2, config);

    let content = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<serde_json::Value> = content
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines.len(), 5);
    assert_eq!(lines[2]["frame_id"], 2);
    assert_eq!(lines[3]["frame_id"], 0);
    assert_eq!(lines[0]["camera_name"], "camera");
    assert_eq!(lines[0]["original_image"]["bytes"], 32);
}

#[test]
fn test_csv_output() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("out.csv");
    run_camera_into_writer(
        2,
        WriterConfig {
            uri: path.to_string_lossy().into_owned(),
            format: "csv".into(),
            ..Default::default()
        },
    );

    let content = std::fs::read_to_string(&path).unwrap();
    let rows: Vec<Vec<&str>> = content.lines().map(|l| l.split(',').collect()).collect();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1][0], "1");
    assert_eq!(rows[1][1], "camera");
    assert_eq!(rows[1][3], "32");
}

fn sample_config(out: &str) -> AppConfig {
    let mut graph = BTreeMap::new();
    graph.insert("camera".to_string(), vec!["strider".to_string()]);
    graph.insert("strider".to_string(), vec!["throttler".to_string()]);
    graph.insert("throttler".to_string(), vec!["writer".to_string()]);

    AppConfig {
        modules: vec![
            ModuleSpec::Camera(CameraConfig {
                max_frames: Some(10),
                width: 4,
                height: 4,
                ..Default::default()
            }),
            ModuleSpec::Strider(StriderConfig {
                stride: 2,
                ..Default::default()
            }),
            ModuleSpec::Throttler(ThrottlerConfig::default()),
            ModuleSpec::Writer(WriterConfig {
                uri: out.to_string(),
                ..Default::default()
            }),
        ],
        graph,
        ..Default::default()
    }
}

#[test]
fn test_config_round_trip_toml_and_json() {
    let dir = TempDir::new().unwrap();
    let config = sample_config("frames.jsonl");

    for file in ["pipeline.toml", "pipeline.json"] {
        let path = dir.path().join(file);
        config.save(&path).unwrap();
        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded, config, "round trip through {}", file);
    }

    let yaml = dir.path().join("pipeline.yaml");
    assert!(matches!(config.save(&yaml), Err(VidPipeError::Config(_))));
}

#[test]
fn test_engine_from_config_file() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("frames.jsonl");
    let path = dir.path().join("pipeline.toml");
    sample_config(&out.to_string_lossy()).save(&path).unwrap();

    let config = AppConfig::load(&path).unwrap();
    let mut engine = Engine::from_config(&config).unwrap();
    assert_eq!(engine.plan().start_order.len(), 4);
    engine.start().unwrap();
    assert!(engine.wait_until_stopped_timeout(test_timeout()));
    engine.stop().unwrap();
    engine.clean().unwrap();

    let ids: Vec<u64> = std::fs::read_to_string(&out)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str::<serde_json::Value>(l).unwrap()["frame_id"].as_u64().unwrap())
        .collect();
    assert_eq!(ids, vec![0, 2, 4, 6, 8]);
}

#[test]
fn test_invalid_config_text() {
    let err = AppConfig::parse("[engine]\ndefault_queue_capacity = 0\n", ConfigFormat::Toml)
        .unwrap_err();
    assert!(matches!(err, VidPipeError::Config(_)));

    let err = AppConfig::parse("{\"modules\": 3}", ConfigFormat::Json).unwrap_err();
    assert!(matches!(err, VidPipeError::Serialization(_)));
}
