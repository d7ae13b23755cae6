use std::{
    path::{Path, PathBuf},
    process::{Child, ChildStdin, Command, Stdio},
};

use crate::{
    error::{MontraError, MontraResult},
    media,
    raster::{self, FrameRgba},
};

/// Container/codec pairs the drivers can emit, in probe preference order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    H264Mp4,
    Vp9WebM,
}

impl OutputFormat {
    pub const PROBE_ORDER: [OutputFormat; 2] = [OutputFormat::H264Mp4, OutputFormat::Vp9WebM];

    pub fn mime_type(self) -> &'static str {
        match self {
            Self::H264Mp4 => "video/mp4",
            Self::Vp9WebM => "video/webm",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::H264Mp4 => "mp4",
            Self::Vp9WebM => "webm",
        }
    }

    fn encoder_name(self) -> &'static str {
        match self {
            Self::H264Mp4 => "libx264",
            Self::Vp9WebM => "libvpx-vp9",
        }
    }
}

/// Picks the first format in probe order that the local ffmpeg build can
/// encode. No supported format is a fatal configuration error.
pub fn probe_supported_format() -> MontraResult<OutputFormat> {
    let out = Command::new("ffmpeg")
        .args(["-hide_banner", "-encoders"])
        .output()
        .map_err(|e| {
            MontraError::configuration(format!(
                "ffmpeg is required for encoding but could not be run: {e}"
            ))
        })?;
    let listing = String::from_utf8_lossy(&out.stdout);

    OutputFormat::PROBE_ORDER
        .into_iter()
        .find(|f| listing.contains(f.encoder_name()))
        .ok_or_else(|| {
            MontraError::configuration(
                "no supported output format: ffmpeg has neither libx264 nor libvpx-vp9",
            )
        })
}

/// Audio muxed under the video stream. `offset_ms` is a source-side seek, so
/// the track is always aligned to frame 0 of the output.
#[derive(Clone, Debug)]
pub struct AudioInput {
    pub path: PathBuf,
    pub offset_ms: u64,
    pub volume: f64,
}

#[derive(Clone, Debug)]
pub struct EncodeConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub out_path: PathBuf,
    pub format: OutputFormat,
    pub audio: Option<AudioInput>,
    /// Output duration cap in seconds. The declared audio duration may be
    /// shorter than the real source, so without a cap the mux would keep
    /// writing audio past the final video frame. Drivers set this to
    /// `total_frames / fps`.
    pub duration_limit_secs: Option<f64>,
}

impl EncodeConfig {
    pub fn validate(&self) -> MontraResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(MontraError::configuration(
                "encode width/height must be non-zero",
            ));
        }
        if self.fps == 0 {
            return Err(MontraError::configuration("encode fps must be non-zero"));
        }
        if !self.width.is_multiple_of(2) || !self.height.is_multiple_of(2) {
            // yuv420p subsamples chroma 2x2.
            return Err(MontraError::configuration(
                "encode width/height must be even for yuv420p output",
            ));
        }
        if let Some(audio) = &self.audio {
            if !audio.volume.is_finite() || audio.volume < 0.0 {
                return Err(MontraError::configuration(
                    "audio volume must be finite and >= 0",
                ));
            }
        }
        if let Some(limit) = self.duration_limit_secs
            && (!limit.is_finite() || limit <= 0.0)
        {
            return Err(MontraError::configuration(
                "duration limit must be finite and > 0",
            ));
        }
        Ok(())
    }
}

fn ensure_parent_dir(path: &Path) -> MontraResult<()> {
    if let Some(parent) = path.parent() {
        use anyhow::Context as _;
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create output directory '{}'", parent.display()))?;
    }
    Ok(())
}

/// Streaming encoder over a system `ffmpeg` child process fed raw RGBA
/// frames on stdin. System binary rather than linked FFmpeg keeps the crate
/// free of native dev-header requirements.
pub struct FfmpegEncoder {
    cfg: EncodeConfig,
    child: Child,
    stdin: Option<ChildStdin>,
    scratch: Vec<u8>,
    frames_written: u64,
}

impl FfmpegEncoder {
    pub fn new(cfg: EncodeConfig) -> MontraResult<Self> {
        cfg.validate()?;
        ensure_parent_dir(&cfg.out_path)?;

        if !media::is_ffmpeg_on_path() {
            return Err(MontraError::encoding(
                "ffmpeg is required for encoding, but was not found on PATH",
            ));
        }

        // A fresh render always overwrites; stale artifacts at the target
        // path must never be mistaken for this render's output.
        if cfg.out_path.exists() {
            std::fs::remove_file(&cfg.out_path).map_err(|e| {
                MontraError::encoding(format!(
                    "failed to remove pre-existing output '{}': {e}",
                    cfg.out_path.display()
                ))
            })?;
        }

        let mut cmd = Command::new("ffmpeg");
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        cmd.args([
            "-y",
            "-loglevel",
            "error",
            "-f",
            "rawvideo",
            "-pix_fmt",
            "rgba",
            "-s",
            &format!("{}x{}", cfg.width, cfg.height),
            "-r",
            &cfg.fps.to_string(),
            "-i",
            "pipe:0",
        ]);

        if let Some(audio) = &cfg.audio {
            if audio.offset_ms > 0 {
                cmd.args(["-ss", &format!("{:.3}", audio.offset_ms as f64 / 1000.0)]);
            }
            cmd.arg("-i").arg(&audio.path);
            cmd.args(["-map", "0:v", "-map", "1:a"]);
            if (audio.volume - 1.0).abs() > f64::EPSILON {
                cmd.args(["-af", &format!("volume={:.4}", audio.volume)]);
            }
            // The video stream always spans max(audio, timeline), so the
            // output duration is governed by the frame count, never the
            // audio track.
            cmd.args(["-c:a", match cfg.format {
                OutputFormat::H264Mp4 => "aac",
                OutputFormat::Vp9WebM => "libopus",
            }]);
        } else {
            cmd.arg("-an");
        }

        match cfg.format {
            OutputFormat::H264Mp4 => {
                cmd.args(["-c:v", "libx264", "-pix_fmt", "yuv420p", "-movflags", "+faststart"]);
            }
            OutputFormat::Vp9WebM => {
                cmd.args(["-c:v", "libvpx-vp9", "-pix_fmt", "yuv420p", "-b:v", "2M"]);
            }
        }
        if let Some(limit) = cfg.duration_limit_secs {
            cmd.args(["-t", &format!("{limit:.6}")]);
        }
        cmd.arg(&cfg.out_path);

        let mut child = cmd.spawn().map_err(|e| {
            MontraError::encoding(format!("failed to spawn ffmpeg: {e}"))
        })?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| MontraError::encoding("failed to open ffmpeg stdin"))?;

        Ok(Self {
            scratch: Vec::with_capacity((cfg.width * cfg.height * 4) as usize),
            cfg,
            child,
            stdin: Some(stdin),
            frames_written: 0,
        })
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    pub fn encode_frame(&mut self, frame: &FrameRgba) -> MontraResult<()> {
        if frame.width != self.cfg.width || frame.height != self.cfg.height {
            return Err(MontraError::encoding(format!(
                "frame size mismatch: got {}x{}, expected {}x{}",
                frame.width, frame.height, self.cfg.width, self.cfg.height
            )));
        }
        let Some(stdin) = self.stdin.as_mut() else {
            return Err(MontraError::encoding("encoder is already finalized"));
        };

        raster::flatten_opaque(frame, [0, 0, 0], &mut self.scratch);

        use std::io::Write as _;
        stdin.write_all(&self.scratch).map_err(|e| {
            MontraError::encoding(format!("failed to write frame to ffmpeg stdin: {e}"))
        })?;
        self.frames_written += 1;
        Ok(())
    }

    /// Closes the pipe and waits for ffmpeg. On failure the partial output
    /// file is removed before the error is surfaced.
    pub fn finish(mut self) -> MontraResult<PathBuf> {
        drop(self.stdin.take());

        let output = self
            .child
            .wait_with_output()
            .map_err(|e| MontraError::encoding(format!("failed to wait for ffmpeg: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            discard_partial_output(&self.cfg.out_path);
            return Err(MontraError::encoding(format!(
                "ffmpeg exited with status {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        Ok(self.cfg.out_path.clone())
    }

    /// Kills the child and removes whatever it wrote. Used on abort paths.
    pub fn discard(mut self) {
        drop(self.stdin.take());
        if let Err(e) = self.child.kill() {
            tracing::warn!(error = %e, "failed to kill ffmpeg child on abort");
        }
        let _ = self.child.wait();
        discard_partial_output(&self.cfg.out_path);
    }
}

fn discard_partial_output(path: &Path) {
    if path.exists()
        && let Err(e) = std::fs::remove_file(path)
    {
        tracing::warn!(path = %path.display(), error = %e, "failed to remove partial output");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_cfg() -> EncodeConfig {
        EncodeConfig {
            width: 64,
            height: 36,
            fps: 30,
            out_path: PathBuf::from("/tmp/montra-test/out.mp4"),
            format: OutputFormat::H264Mp4,
            audio: None,
            duration_limit_secs: Some(5.0),
        }
    }

    #[test]
    fn validation_rejects_zero_and_odd_dimensions() {
        let mut cfg = base_cfg();
        cfg.width = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = base_cfg();
        cfg.height = 35;
        assert!(cfg.validate().is_err());

        let mut cfg = base_cfg();
        cfg.fps = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validation_rejects_bad_duration_limit() {
        let mut cfg = base_cfg();
        cfg.duration_limit_secs = Some(0.0);
        assert!(cfg.validate().is_err());

        let mut cfg = base_cfg();
        cfg.duration_limit_secs = Some(f64::NAN);
        assert!(cfg.validate().is_err());

        let mut cfg = base_cfg();
        cfg.duration_limit_secs = None;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn validation_rejects_bad_audio_volume() {
        let mut cfg = base_cfg();
        cfg.audio = Some(AudioInput {
            path: PathBuf::from("a.mp3"),
            offset_ms: 0,
            volume: f64::NAN,
        });
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn format_metadata_is_consistent() {
        assert_eq!(OutputFormat::H264Mp4.mime_type(), "video/mp4");
        assert_eq!(OutputFormat::H264Mp4.extension(), "mp4");
        assert_eq!(OutputFormat::Vp9WebM.mime_type(), "video/webm");
        assert_eq!(OutputFormat::PROBE_ORDER[0], OutputFormat::H264Mp4);
    }
}
