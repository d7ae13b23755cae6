use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::assets::AssetStore;
use crate::compositor;
use crate::encode::{AudioInput, EncodeConfig, FfmpegEncoder, OutputFormat, probe_supported_format};
use crate::error::{MontraError, MontraResult};
use crate::model::CompositionSpec;

/// Frames completed out of the total, reported after every encoded frame.
#[derive(Clone, Copy, Debug)]
pub struct RenderProgress {
    pub frames_done: u64,
    pub total_frames: u64,
}

impl RenderProgress {
    pub fn percent(&self) -> f64 {
        if self.total_frames == 0 {
            return 100.0;
        }
        (self.frames_done as f64 / self.total_frames as f64) * 100.0
    }
}

/// What a driver hands back: the offline path writes a durable file, the
/// realtime path captures into memory.
#[derive(Debug)]
pub enum RenderArtifact {
    File {
        path: PathBuf,
        format: OutputFormat,
    },
    Blob {
        bytes: Vec<u8>,
        mime_type: &'static str,
    },
}

/// Cooperative cancellation shared between a render and its caller.
/// Cancelling mid-render discards partial output and releases the cache.
#[derive(Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// A completion gate that fires exactly once, no matter how many paths reach
/// it. Guards the "recording stopped" handler against duplicate invocation.
#[derive(Default)]
pub struct OneShot {
    fired: AtomicBool,
}

impl OneShot {
    pub fn new() -> Self {
        Self::default()
    }

    /// True the first time, false ever after.
    pub fn fire(&self) -> bool {
        !self.fired.swap(true, Ordering::SeqCst)
    }
}

pub type ProgressFn<'a> = &'a mut dyn FnMut(RenderProgress);

/// One contract, two strategies: turn a validated `CompositionSpec` into an
/// encoded media artifact.
pub trait RenderDriver {
    fn render(
        &self,
        spec: &CompositionSpec,
        assets: &AssetStore,
        cancel: &CancelToken,
        on_progress: ProgressFn<'_>,
    ) -> MontraResult<RenderArtifact>;
}

pub fn output_path(dir: &Path, filename: &str, format: OutputFormat) -> PathBuf {
    dir.join(format!("{filename}.{}", format.extension()))
}

fn audio_input(spec: &CompositionSpec, assets: &AssetStore) -> MontraResult<Option<AudioInput>> {
    match &spec.audio {
        None => Ok(None),
        Some(track) => Ok(Some(AudioInput {
            path: assets.resolve_path(&track.source_ref)?,
            offset_ms: track.offset_ms,
            volume: track.volume,
        })),
    }
}

/// Encoder settings shared by both drivers. The duration cap is the exact
/// video stream length, so a real audio source longer than its declared
/// `durationMs` can never stretch the container past the final frame.
fn encode_config(
    spec: &CompositionSpec,
    out_path: PathBuf,
    format: OutputFormat,
    audio: Option<AudioInput>,
) -> EncodeConfig {
    EncodeConfig {
        width: spec.canvas.width,
        height: spec.canvas.height,
        fps: spec.fps,
        out_path,
        format,
        audio,
        duration_limit_secs: Some(spec.total_frames() as f64 / f64::from(spec.fps)),
    }
}

/// Frame-exact server-side export: iterates every frame as fast as the
/// compositor allows and pipes it straight into ffmpeg.
pub struct OfflineDriver {
    output_dir: PathBuf,
    format: OutputFormat,
}

impl OfflineDriver {
    pub fn new(output_dir: impl Into<PathBuf>, format: OutputFormat) -> Self {
        Self {
            output_dir: output_dir.into(),
            format,
        }
    }

    fn encode_all(
        &self,
        spec: &CompositionSpec,
        assets: &AssetStore,
        cancel: &CancelToken,
        on_progress: ProgressFn<'_>,
    ) -> MontraResult<PathBuf> {
        let total_frames = spec.total_frames();
        let cfg = encode_config(
            spec,
            output_path(&self.output_dir, &spec.filename, self.format),
            self.format,
            audio_input(spec, assets)?,
        );
        let mut encoder = FfmpegEncoder::new(cfg)?;

        for frame_idx in 0..total_frames {
            if cancel.is_cancelled() {
                encoder.discard();
                return Err(MontraError::encoding("render cancelled"));
            }
            let t_ms = spec.frame_timestamp_ms(frame_idx);
            let frame = match compositor::render_frame(spec, t_ms, assets) {
                Ok(frame) => frame,
                Err(e) => {
                    encoder.discard();
                    return Err(e);
                }
            };
            if let Err(e) = encoder.encode_frame(&frame) {
                encoder.discard();
                return Err(e);
            }
            on_progress(RenderProgress {
                frames_done: frame_idx + 1,
                total_frames,
            });
        }

        encoder.finish()
    }
}

impl RenderDriver for OfflineDriver {
    #[tracing::instrument(skip_all, fields(filename = %spec.filename))]
    fn render(
        &self,
        spec: &CompositionSpec,
        assets: &AssetStore,
        cancel: &CancelToken,
        on_progress: ProgressFn<'_>,
    ) -> MontraResult<RenderArtifact> {
        let result = self.encode_all(spec, assets, cancel, on_progress);
        // Session resources are released on both outcomes; a cleanup
        // failure is logged and never masks the render result.
        assets.clear();
        let path = result?;
        Ok(RenderArtifact::File {
            path,
            format: self.format,
        })
    }
}

/// Client-capture-style export: probes the supported format list, preloads
/// image assets, paces a fixed-rate frame loop in real time, and returns the
/// capture as an in-memory blob.
pub struct RealtimeDriver {
    work_dir: PathBuf,
    /// Trailing delay after the final frame, letting the encoder flush
    /// buffered output before the recording is finalized.
    grace_delay: Duration,
    paced: bool,
}

impl RealtimeDriver {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            grace_delay: Duration::from_millis(500),
            paced: true,
        }
    }

    /// Disables wall-clock pacing; used by tests and batch tooling where
    /// real-time playback speed is irrelevant.
    pub fn without_pacing(mut self) -> Self {
        self.paced = false;
        self
    }

    fn capture(
        &self,
        spec: &CompositionSpec,
        assets: &AssetStore,
        cancel: &CancelToken,
        on_progress: ProgressFn<'_>,
        format: OutputFormat,
    ) -> MontraResult<PathBuf> {
        let total_frames = spec.total_frames();
        let frame_interval = Duration::from_secs_f64(1.0 / f64::from(spec.fps));
        let temp_name = format!("{}.capture", spec.filename);
        let cfg = encode_config(
            spec,
            output_path(&self.work_dir, &temp_name, format),
            format,
            audio_input(spec, assets)?,
        );
        let mut encoder = FfmpegEncoder::new(cfg)?;

        for frame_idx in 0..total_frames {
            let tick_start = Instant::now();
            if cancel.is_cancelled() {
                encoder.discard();
                return Err(MontraError::encoding("render cancelled"));
            }

            let t_ms = spec.frame_timestamp_ms(frame_idx);
            let frame = match compositor::render_frame(spec, t_ms, assets) {
                Ok(frame) => frame,
                Err(e) => {
                    encoder.discard();
                    return Err(e);
                }
            };
            if let Err(e) = encoder.encode_frame(&frame) {
                encoder.discard();
                return Err(e);
            }
            on_progress(RenderProgress {
                frames_done: frame_idx + 1,
                total_frames,
            });

            if self.paced && frame_idx + 1 < total_frames {
                std::thread::sleep(pace_sleep(frame_interval, tick_start.elapsed()));
            }
        }

        // Recording stops only after the final frame plus the grace delay.
        if self.paced {
            std::thread::sleep(self.grace_delay);
        }
        encoder.finish()
    }

    fn complete(&self, gate: &OneShot, capture_path: &Path) -> MontraResult<Vec<u8>> {
        if !gate.fire() {
            return Err(MontraError::encoding(
                "capture completion fired twice",
            ));
        }
        let bytes = std::fs::read(capture_path).map_err(|e| {
            MontraError::encoding(format!(
                "failed to read capture '{}': {e}",
                capture_path.display()
            ))
        })?;
        if let Err(e) = std::fs::remove_file(capture_path) {
            tracing::warn!(
                error = %MontraError::cleanup(format!("failed to remove capture file: {e}")),
                "capture cleanup failed"
            );
        }
        Ok(bytes)
    }
}

impl RenderDriver for RealtimeDriver {
    #[tracing::instrument(skip_all, fields(filename = %spec.filename))]
    fn render(
        &self,
        spec: &CompositionSpec,
        assets: &AssetStore,
        cancel: &CancelToken,
        on_progress: ProgressFn<'_>,
    ) -> MontraResult<RenderArtifact> {
        let format = probe_supported_format()?;
        assets.preload_images(spec);

        let gate = OneShot::new();
        let result = self
            .capture(spec, assets, cancel, on_progress, format)
            .and_then(|path| self.complete(&gate, &path));
        assets.clear();

        Ok(RenderArtifact::Blob {
            bytes: result?,
            mime_type: format.mime_type(),
        })
    }
}

/// Next-tick delay holding a steady frame rate under load: the remainder of
/// the frame interval, floored at zero when a frame ran long.
pub fn pace_sleep(frame_interval: Duration, elapsed: Duration) -> Duration {
    frame_interval.saturating_sub(elapsed)
}
