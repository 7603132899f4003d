//! Video transcoding hook used before a byte-copy upload.

use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;

#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },
}

/// Re-encodes a downloaded media file into a normalised codec pair.
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Writes the re-encoded file to `output`. The input is left in place.
    /// `output` may hold a partial file when this fails.
    async fn transcode(&self, input: &Path, output: &Path) -> Result<(), TranscodeError>;
}

/// Scratch file name for the re-encoded copy of `name`.
pub fn transcoded_name(name: &str) -> String {
    let stem = Path::new(name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "video".to_string());
    format!("{stem}.transcoded.mp4")
}

/// Shells out to `ffmpeg` for H.264 video and AAC audio in an MP4 container.
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    program: String,
}

impl Default for FfmpegTranscoder {
    fn default() -> Self {
        Self {
            program: "ffmpeg".to_string(),
        }
    }
}

impl FfmpegTranscoder {
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn transcode(&self, input: &Path, output: &Path) -> Result<(), TranscodeError> {
        tracing::info!(input = %input.display(), output = %output.display(), "Transcoding video");

        let result = Command::new(&self.program)
            .arg("-y")
            .arg("-loglevel")
            .arg("error")
            .arg("-i")
            .arg(input)
            .arg("-c:v")
            .arg("libx264")
            .arg("-pix_fmt")
            .arg("yuv420p")
            .arg("-c:a")
            .arg("aac")
            .arg(output)
            .output()
            .await
            .map_err(|source| TranscodeError::Launch {
                program: self.program.clone(),
                source,
            })?;

        if !result.status.success() {
            return Err(TranscodeError::Failed {
                program: self.program.clone(),
                status: result.status.to_string(),
                stderr: String::from_utf8_lossy(&result.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}
