use std::path::{Path, PathBuf};

use crate::error::{MontraError, MontraResult};

/// Probed metadata for a video or audio source, from one `ffprobe` run.
#[derive(Clone, Debug)]
pub struct MediaInfo {
    pub source_path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub duration_ms: u64,
    pub has_audio: bool,
    pub has_video: bool,
}

pub fn is_ffmpeg_on_path() -> bool {
    std::process::Command::new("ffmpeg")
        .arg("-version")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Probes a media file with `ffprobe`. Failures are asset errors so a single
/// broken source degrades to a placeholder.
pub fn probe(source_path: &Path) -> MontraResult<MediaInfo> {
    #[derive(serde::Deserialize)]
    struct ProbeStream {
        codec_type: Option<String>,
        width: Option<u32>,
        height: Option<u32>,
    }
    #[derive(serde::Deserialize)]
    struct ProbeFormat {
        duration: Option<String>,
    }
    #[derive(serde::Deserialize)]
    struct ProbeOut {
        streams: Vec<ProbeStream>,
        format: Option<ProbeFormat>,
    }

    let out = std::process::Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-print_format",
            "json",
            "-show_streams",
            "-show_format",
        ])
        .arg(source_path)
        .output()
        .map_err(|e| MontraError::asset(format!("failed to run ffprobe: {e}")))?;
    if !out.status.success() {
        return Err(MontraError::asset(format!(
            "ffprobe failed for '{}': {}",
            source_path.display(),
            String::from_utf8_lossy(&out.stderr).trim()
        )));
    }

    let parsed: ProbeOut = serde_json::from_slice(&out.stdout)
        .map_err(|e| MontraError::asset(format!("ffprobe json parse failed: {e}")))?;

    let video = parsed
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"));
    let has_audio = parsed
        .streams
        .iter()
        .any(|s| s.codec_type.as_deref() == Some("audio"));

    let (width, height) = match video {
        Some(v) => (v.width.unwrap_or(0), v.height.unwrap_or(0)),
        None => (0, 0),
    };
    let duration_sec = parsed
        .format
        .as_ref()
        .and_then(|f| f.duration.as_ref())
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or(0.0);

    Ok(MediaInfo {
        source_path: source_path.to_path_buf(),
        width,
        height,
        duration_ms: (duration_sec * 1000.0).round().max(0.0) as u64,
        has_audio,
        has_video: video.is_some(),
    })
}

/// Decodes one RGBA frame at `source_time_ms` into the source's native
/// resolution. The seek is applied before the input so ffmpeg uses fast
/// keyframe seeking and decodes forward from there.
pub fn decode_video_frame_rgba(info: &MediaInfo, source_time_ms: f64) -> MontraResult<Vec<u8>> {
    if !info.has_video || info.width == 0 || info.height == 0 {
        return Err(MontraError::asset(format!(
            "'{}' has no decodable video stream",
            info.source_path.display()
        )));
    }

    let seek_sec = (source_time_ms / 1000.0).max(0.0);
    let out = std::process::Command::new("ffmpeg")
        .args(["-v", "error", "-ss", &format!("{seek_sec:.6}")])
        .arg("-i")
        .arg(&info.source_path)
        .args(["-frames:v", "1", "-f", "rawvideo", "-pix_fmt", "rgba", "pipe:1"])
        .output()
        .map_err(|e| MontraError::asset(format!("failed to run ffmpeg for video decode: {e}")))?;

    if !out.status.success() {
        return Err(MontraError::asset(format!(
            "ffmpeg video decode failed for '{}': {}",
            info.source_path.display(),
            String::from_utf8_lossy(&out.stderr).trim()
        )));
    }

    let expected = info.width as usize * info.height as usize * 4;
    if out.stdout.len() != expected {
        return Err(MontraError::asset(format!(
            "decoded frame for '{}' has {} bytes, expected {expected}",
            info.source_path.display(),
            out.stdout.len()
        )));
    }
    Ok(out.stdout)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_of_missing_file_is_an_asset_error() {
        let err = probe(Path::new("/nonexistent/definitely-not-here.mp4"));
        assert!(matches!(err, Err(MontraError::Asset(_))));
    }
}
