//! Tiny solid-colour MP4 clips rendered by `ffmpeg`'s `lavfi` source.

use std::fs;
use std::path::PathBuf;
use std::process::Command;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::WorkloadGenerationError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClipSpec {
    /// Used in the file name so uploads are recognisable in the bucket.
    pub label: String,
    pub color: String,
    pub duration_secs: u64,
}

impl ClipSpec {
    pub fn new(label: impl Into<String>, color: impl Into<String>, duration_secs: u64) -> Self {
        Self {
            label: label.into(),
            color: color.into(),
            duration_secs,
        }
    }

    pub fn file_name(&self) -> String {
        let mut name = String::with_capacity(self.label.len() + 4);
        for ch in self.label.chars() {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                name.push(ch);
            } else {
                name.push('_');
            }
        }
        if name.is_empty() {
            name.push_str("clip");
        }
        name.push_str(".mp4");
        name
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadUnit {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

pub trait WorkloadGenerator {
    fn generate(&self, spec: &ClipSpec) -> Result<WorkloadUnit, WorkloadGenerationError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FfmpegGenerator {
    pub binary: PathBuf,
    pub size: String,
    pub frame_rate: u32,
}

impl Default for FfmpegGenerator {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("ffmpeg"),
            size: "160x120".to_string(),
            frame_rate: 15,
        }
    }
}

impl FfmpegGenerator {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            ..Self::default()
        }
    }

    /// Arguments after the binary, writing to `output`.
    pub fn encode_args(&self, spec: &ClipSpec, output: &str) -> Vec<String> {
        vec![
            "-y".to_string(),
            "-f".to_string(),
            "lavfi".to_string(),
            "-i".to_string(),
            format!(
                "color=c={}:size={}:rate={}",
                spec.color, self.size, self.frame_rate
            ),
            "-t".to_string(),
            spec.duration_secs.max(1).to_string(),
            "-c:v".to_string(),
            "libx264".to_string(),
            "-profile:v".to_string(),
            "baseline".to_string(),
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
            output.to_string(),
        ]
    }

    /// True when the encoder binary runs at all.
    pub fn is_available(&self) -> bool {
        Command::new(&self.binary)
            .arg("-version")
            .output()
            .map(|output| output.status.success())
            .unwrap_or(false)
    }
}

impl WorkloadGenerator for FfmpegGenerator {
    fn generate(&self, spec: &ClipSpec) -> Result<WorkloadUnit, WorkloadGenerationError> {
        let scratch =
            tempfile::tempdir().map_err(|source| WorkloadGenerationError::Scratch { source })?;
        let file_name = spec.file_name();
        let path = scratch.path().join(&file_name);
        let path_text = path.to_string_lossy().into_owned();
        let args = self.encode_args(spec, &path_text);
        let rendered = format!("{} {}", self.binary.display(), args.join(" "));

        debug!(command = %rendered, color = %spec.color, "generating clip");
        let output = Command::new(&self.binary)
            .args(&args)
            .output()
            .map_err(|source| WorkloadGenerationError::Spawn {
                command: rendered.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(WorkloadGenerationError::EncoderFailed {
                command: rendered,
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        let bytes = fs::read(&path).map_err(|source| WorkloadGenerationError::ReadOutput {
            path: path_text.clone(),
            source,
        })?;
        if bytes.is_empty() {
            return Err(WorkloadGenerationError::EmptyOutput { path: path_text });
        }

        Ok(WorkloadUnit { file_name, bytes })
    }
}
