//! FFmpeg discovery and hardware encoder detection.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, info, warn};

use crate::error::CapabilityError;

/// Hardware encoders in order of preference.
pub const HARDWARE_ENCODER_PREFERENCE: [&str; 6] = [
    "h264_nvenc",
    "hevc_nvenc",
    "h264_qsv",
    "hevc_qsv",
    "h264_amf",
    "hevc_amf",
];

/// What the conversion engine on this machine can do.
#[derive(Debug, Clone, Default)]
pub struct SystemCapabilities {
    /// Resolved FFmpeg binary, if one answered `-version`.
    pub ffmpeg: Option<PathBuf>,
    /// Hardware encoders FFmpeg reports, in preference order.
    pub hardware_encoders: Vec<String>,
}

impl SystemCapabilities {
    /// Locates FFmpeg and queries its encoder list.
    ///
    /// A missing binary or a failed query leaves the corresponding field
    /// empty; conversions then fail per job instead of at startup.
    pub fn detect() -> Self {
        let Some(ffmpeg) = locate_ffmpeg() else {
            warn!("FFmpeg binary not found");
            return Self::default();
        };
        info!(path = ?ffmpeg, "Using FFmpeg");

        let hardware_encoders = match list_encoders(&ffmpeg) {
            Ok(available) => select_hardware(&available),
            Err(e) => {
                warn!(error = %e, "Hardware encoder detection failed");
                Vec::new()
            }
        };
        debug!(?hardware_encoders, "Detected hardware encoders");

        Self {
            ffmpeg: Some(ffmpeg),
            hardware_encoders,
        }
    }

    /// The encoder jobs should use when GPU encoding is requested.
    pub fn preferred_encoder(&self) -> Option<&str> {
        self.hardware_encoders.first().map(String::as_str)
    }

    /// The FFmpeg binary, or an error naming the missing tool.
    pub fn ffmpeg_path(&self) -> Result<&Path, CapabilityError> {
        self.ffmpeg.as_deref().ok_or_else(|| CapabilityError::ToolNotFound {
            tool: "ffmpeg".to_string(),
        })
    }
}

/// Looks next to our own executable first, then on PATH.
fn locate_ffmpeg() -> Option<PathBuf> {
    let beside_exe = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .into_iter()
        .flat_map(|dir| [dir.join("ffmpeg"), dir.join("ffmpeg.exe")]);

    beside_exe
        .filter(|p| p.is_file())
        .chain(which::which("ffmpeg").ok())
        .chain(std::iter::once(PathBuf::from("ffmpeg")))
        .find(|candidate| answers_version(candidate))
}

fn answers_version(binary: &Path) -> bool {
    Command::new(binary)
        .arg("-version")
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

/// Runs `ffmpeg -hide_banner -encoders` and returns every encoder name.
fn list_encoders(binary: &Path) -> Result<HashSet<String>, CapabilityError> {
    let output = Command::new(binary)
        .args(["-hide_banner", "-encoders"])
        .output()
        .map_err(|e| CapabilityError::CommandFailed {
            command: "ffmpeg -encoders".to_string(),
            message: e.to_string(),
        })?;

    if !output.status.success() {
        return Err(CapabilityError::CommandFailed {
            command: "ffmpeg -encoders".to_string(),
            message: String::from_utf8_lossy(&output.stderr).to_string(),
        });
    }

    Ok(parse_ffmpeg_codec_list(&String::from_utf8_lossy(
        &output.stdout,
    )))
}

fn select_hardware(available: &HashSet<String>) -> Vec<String> {
    HARDWARE_ENCODER_PREFERENCE
        .iter()
        .filter(|name| available.contains(**name))
        .map(|name| name.to_string())
        .collect()
}

/// Parses FFmpeg's encoder list into a set of codec names.
fn parse_ffmpeg_codec_list(output: &str) -> HashSet<String> {
    let mut codecs = HashSet::new();

    for line in output.lines() {
        // " V....D h264_nvenc           NVIDIA NVENC H.264 encoder (codec h264)"
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('-') || trimmed.contains("Encoders:") {
            continue;
        }

        if trimmed.starts_with(['V', 'A', 'S']) {
            let parts: Vec<&str> = trimmed.split_whitespace().collect();
            if parts.len() >= 2 {
                codecs.insert(parts[1].to_string());
            }
        }
    }

    codecs
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = "Encoders:
 V..... = Video
 A..... = Audio
 ------
 V....D libx264              libx264 H.264 / AVC / MPEG-4 AVC (codec h264)
 V....D hevc_qsv             HEVC (Intel Quick Sync Video acceleration) (codec hevc)
 V....D h264_nvenc           NVIDIA NVENC H.264 encoder (codec h264)
 A....D aac                  AAC (Advanced Audio Coding)
";

    #[test]
    fn hardware_encoders_follow_preference_order() {
        let available = parse_ffmpeg_codec_list(LISTING);
        assert!(available.contains("libx264"));
        assert!(available.contains("aac"));

        let caps = SystemCapabilities {
            ffmpeg: Some("ffmpeg".into()),
            hardware_encoders: select_hardware(&available),
        };
        assert_eq!(caps.hardware_encoders, ["h264_nvenc", "hevc_qsv"]);
        assert_eq!(caps.preferred_encoder(), Some("h264_nvenc"));
    }

    #[test]
    fn missing_ffmpeg_is_reported_by_name() {
        let caps = SystemCapabilities::default();
        assert!(caps.preferred_encoder().is_none());
        let err = caps.ffmpeg_path().unwrap_err();
        assert!(err.to_string().contains("ffmpeg"));
    }
}
