//! Writer sink: appends frames to a file as JSON lines or CSV.
//!
//! The file is opened (append-or-create) in the start hook and flushed and
//! closed in the clean hook. Binary blobs are written as their length only.

use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::frame::{FieldValue, Frame};
use crate::pipeline::module::{ModuleContext, Step};
use crate::pipeline::port::{PortDescriptor, PortKind};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;

static PORTS: &[PortDescriptor] = &[PortDescriptor::input("input", PortKind::Any)];

/// Output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterFormat {
    /// One JSON object per line.
    Jsonl,
    /// One comma-separated line of field values per frame.
    Csv,
}

impl WriterFormat {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "jsonl" | "json" => Some(WriterFormat::Jsonl),
            "csv" => Some(WriterFormat::Csv),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterConfig {
    pub name: String,
    /// Output medium; only `file` is supported.
    pub target: String,
    /// Destination path.
    pub uri: String,
    pub format: String,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            name: "writer".to_string(),
            target: "file".to_string(),
            uri: String::new(),
            format: "jsonl".to_string(),
        }
    }
}

pub struct Writer {
    config: WriterConfig,
    format: WriterFormat,
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    frames_written: u64,
}

impl Writer {
    pub fn new(config: WriterConfig) -> PipelineResult<Self> {
        if config.target != "file" {
            return Err(PipelineError::Config(format!(
                "writer {:?}: unsupported target {:?}",
                config.name, config.target
            )));
        }
        if config.uri.trim().is_empty() {
            return Err(PipelineError::Config(format!(
                "writer {:?}: uri is required",
                config.name
            )));
        }
        let format = WriterFormat::parse(&config.format).ok_or_else(|| {
            PipelineError::Config(format!(
                "writer {:?}: unknown format {:?}",
                config.name, config.format
            ))
        })?;
        Ok(Self {
            path: PathBuf::from(&config.uri),
            config,
            format,
            writer: None,
            frames_written: 0,
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn ports(&self) -> &[PortDescriptor] {
        PORTS
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    pub fn on_start(&mut self) -> PipelineResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        self.writer = Some(BufWriter::new(file));
        tracing::info!("Writer '{}' appending to {}", self.config.name, self.path.display());
        Ok(())
    }

    pub fn process(&mut self, ctx: &ModuleContext<'_>) -> PipelineResult<Step> {
        let frame = ctx.pop("input")?;
        let Some(writer) = self.writer.as_mut() else {
            return Err(PipelineError::module(&self.config.name, "output file is not open"));
        };
        match self.format {
            WriterFormat::Jsonl => {
                let line = serde_json::to_string(&frame)
                    .map_err(|e| PipelineError::module(&self.config.name, e.to_string()))?;
                writeln!(writer, "{}", line)?;
            }
            WriterFormat::Csv => writeln!(writer, "{}", csv_line(&frame))?,
        }
        self.frames_written += 1;
        Ok(Step::Continue)
    }

    pub fn on_stop(&mut self) {
        if let Some(writer) = self.writer.as_mut() {
            if let Err(e) = writer.flush() {
                tracing::warn!("Writer '{}' flush failed: {}", self.config.name, e);
            }
        }
    }

    pub fn on_clean(&mut self) -> PipelineResult<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
            tracing::info!(
                "Writer '{}' closed {} after {} frames",
                self.config.name,
                self.path.display(),
                self.frames_written
            );
        }
        Ok(())
    }
}

fn csv_line(frame: &Frame) -> String {
    frame
        .iter()
        .map(|(_, value)| match value {
            FieldValue::Bytes(b) => b.len().to_string(),
            other => csv_escape(&other.display_value()),
        })
        .collect::<Vec<_>>()
        .join(",")
}

fn csv_escape(cell: &str) -> String {
    if cell.contains([',', '"', '\n']) {
        format!("\"{}\"", cell.replace('"', "\"\""))
    } else {
        cell.to_string()
    }
}
