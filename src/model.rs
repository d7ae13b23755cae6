use crate::error::{MontraError, MontraResult};

/// One export job, serialized in the editor's wire format:
/// `{ filename, items, audio, durationInFrames, fps, duration }`.
///
/// A spec is constructed by the export orchestrator from user-editable state,
/// is immutable for the duration of one render, and is only ever read by
/// render drivers.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositionSpec {
    pub filename: String,
    pub items: Vec<TimelineItem>,
    #[serde(default)]
    pub audio: Option<AudioTrack>,
    pub fps: u32,
    /// Declared timeline duration in milliseconds.
    #[serde(rename = "duration")]
    pub duration_ms: u64,
    /// Requested frame count. Recomputed by the orchestrator; kept on the
    /// wire for compatibility with the editor payload.
    #[serde(default)]
    pub duration_in_frames: u64,
    /// Canonical output resolution. Not part of the editor payload, which
    /// assumes 1080p.
    #[serde(default = "Canvas::default_hd")]
    pub canvas: Canvas,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Canvas {
    pub width: u32,
    pub height: u32,
}

impl Canvas {
    pub fn default_hd() -> Self {
        Self {
            width: 1920,
            height: 1080,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Text,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EffectKind {
    Fade,
    SlideLeft,
    SlideRight,
    ZoomIn,
    ZoomOut,
    Blur,
    None,
}

/// One positioned, timed, transition-bearing media element.
///
/// Visible for `[startTime, startTime + duration)` in milliseconds. Items may
/// overlap in time; array order is paint order (later = on top).
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineItem {
    pub id: String,
    #[serde(rename = "type")]
    pub media_kind: MediaKind,
    /// Durable media reference: a path relative to the asset root, or a
    /// transient `mem:<key>` handle that the orchestrator stages to disk
    /// before a driver ever sees it.
    #[serde(rename = "url")]
    pub source_ref: String,
    #[serde(rename = "startTime")]
    pub start_time_ms: u64,
    #[serde(rename = "duration")]
    pub duration_ms: u64,

    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    /// Width/height <= 0 means "use the default size rule" (80% of canvas,
    /// centered when x and y are both 0).
    #[serde(default)]
    pub width: f64,
    #[serde(default)]
    pub height: f64,
    #[serde(rename = "rotation", default)]
    pub rotation_degrees: f64,
    #[serde(rename = "opacity", default = "default_opacity")]
    pub base_opacity: f64,

    #[serde(default = "default_effect")]
    pub in_effect: EffectKind,
    #[serde(default = "default_effect")]
    pub out_effect: EffectKind,
    #[serde(rename = "transitionDuration", default = "default_transition_ms")]
    pub transition_duration_ms: u64,

    /// Video only: milliseconds trimmed from the start of the source.
    #[serde(rename = "trimStart", default)]
    pub trim_start_ms: u64,

    // Text styling.
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default = "default_font_size")]
    pub font_size: f64,
    #[serde(default)]
    pub font_family: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
}

fn default_opacity() -> f64 {
    1.0
}

fn default_effect() -> EffectKind {
    EffectKind::Fade
}

fn default_transition_ms() -> u64 {
    500
}

fn default_font_size() -> f64 {
    24.0
}

fn default_volume() -> f64 {
    1.0
}

impl TimelineItem {
    pub fn end_time_ms(&self) -> u64 {
        self.start_time_ms.saturating_add(self.duration_ms)
    }

    /// Strict visibility window: `[start, start + duration)`. An item is not
    /// visible at its own end instant.
    pub fn visible_at(&self, t_ms: f64) -> bool {
        t_ms >= self.start_time_ms as f64 && t_ms < self.end_time_ms() as f64
    }

    /// A transition duration of 0 on the wire falls back to the 500 ms
    /// default, matching the editor payloads this crate consumes.
    pub fn effective_transition_ms(&self) -> u64 {
        if self.transition_duration_ms == 0 {
            default_transition_ms()
        } else {
            self.transition_duration_ms
        }
    }
}

/// Single audio track mixed under the whole composition.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioTrack {
    #[serde(rename = "url")]
    pub source_ref: String,
    #[serde(rename = "duration")]
    pub duration_ms: u64,
    /// Portion trimmed from the start of the source, applied as a
    /// source-side seek (never an output-side delay).
    #[serde(rename = "offset", default)]
    pub offset_ms: u64,
    #[serde(default = "default_volume")]
    pub volume: f64,
}

impl CompositionSpec {
    /// Export duration: the longer of the audio track and the declared
    /// timeline duration.
    pub fn total_duration_ms(&self) -> u64 {
        let audio_ms = self.audio.as_ref().map(|a| a.duration_ms).unwrap_or(0);
        audio_ms.max(self.duration_ms)
    }

    /// Frame count at the spec fps: `ceil(ms / 1000 * fps)`, minimum 1.
    pub fn total_frames(&self) -> u64 {
        let frames = ((self.total_duration_ms() as f64 / 1000.0) * f64::from(self.fps)).ceil();
        (frames as u64).max(1)
    }

    /// Timestamp of a frame index in milliseconds.
    pub fn frame_timestamp_ms(&self, frame: u64) -> f64 {
        (frame as f64 / f64::from(self.fps)) * 1000.0
    }

    pub fn validate(&self) -> MontraResult<()> {
        if self.fps == 0 {
            return Err(MontraError::configuration("fps must be > 0"));
        }
        if self.canvas.width == 0 || self.canvas.height == 0 {
            return Err(MontraError::configuration(
                "canvas width/height must be > 0",
            ));
        }
        if self.filename.trim().is_empty() {
            return Err(MontraError::configuration("filename must be non-empty"));
        }

        for item in &self.items {
            if item.id.trim().is_empty() {
                return Err(MontraError::configuration("item id must be non-empty"));
            }
            if item.duration_ms == 0 {
                return Err(MontraError::configuration(format!(
                    "item '{}' has zero duration",
                    item.id
                )));
            }
            if item.media_kind != MediaKind::Text && item.source_ref.trim().is_empty() {
                return Err(MontraError::configuration(format!(
                    "item '{}' has an empty source reference",
                    item.id
                )));
            }
            if !item.base_opacity.is_finite() || item.base_opacity < 0.0 {
                return Err(MontraError::configuration(format!(
                    "item '{}' opacity must be finite and >= 0",
                    item.id
                )));
            }
        }

        if let Some(audio) = &self.audio {
            if audio.source_ref.trim().is_empty() {
                return Err(MontraError::configuration(
                    "audio source reference must be non-empty",
                ));
            }
            if audio.offset_ms >= audio.duration_ms {
                return Err(MontraError::configuration(
                    "audio offset must be smaller than the source duration",
                ));
            }
            if !audio.volume.is_finite() || audio.volume < 0.0 {
                return Err(MontraError::configuration(
                    "audio volume must be finite and >= 0",
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn image_item(id: &str, source_ref: &str, start_ms: u64, duration_ms: u64) -> TimelineItem {
        TimelineItem {
            id: id.to_string(),
            media_kind: MediaKind::Image,
            source_ref: source_ref.to_string(),
            start_time_ms: start_ms,
            duration_ms,
            x: 0.0,
            y: 0.0,
            width: 0.0,
            height: 0.0,
            rotation_degrees: 0.0,
            base_opacity: 1.0,
            in_effect: EffectKind::Fade,
            out_effect: EffectKind::Fade,
            transition_duration_ms: 500,
            trim_start_ms: 0,
            text: None,
            font_size: 24.0,
            font_family: None,
            color: None,
        }
    }

    pub fn basic_spec(items: Vec<TimelineItem>) -> CompositionSpec {
        let duration_ms = items.iter().map(|i| i.end_time_ms()).max().unwrap_or(1000);
        CompositionSpec {
            filename: "test-export".to_string(),
            items,
            audio: None,
            fps: 30,
            duration_ms,
            duration_in_frames: 0,
            canvas: Canvas {
                width: 64,
                height: 36,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn wire_format_roundtrip() {
        let json = serde_json::json!({
            "filename": "montage",
            "items": [{
                "id": "item-1",
                "type": "image",
                "url": "photos/a.png",
                "startTime": 0,
                "duration": 3000,
                "inEffect": "zoom-in",
                "outEffect": "slide-left",
                "transitionDuration": 250
            }],
            "audio": { "url": "track.mp3", "duration": 5000, "offset": 1200 },
            "fps": 30,
            "duration": 3000
        });

        let spec: CompositionSpec = serde_json::from_value(json).unwrap();
        assert_eq!(spec.items[0].media_kind, MediaKind::Image);
        assert_eq!(spec.items[0].in_effect, EffectKind::ZoomIn);
        assert_eq!(spec.items[0].out_effect, EffectKind::SlideLeft);
        assert_eq!(spec.items[0].transition_duration_ms, 250);
        assert_eq!(spec.items[0].base_opacity, 1.0);
        assert_eq!(spec.audio.as_ref().unwrap().offset_ms, 1200);
        assert_eq!(spec.canvas, Canvas::default_hd());

        let back = serde_json::to_value(&spec).unwrap();
        assert_eq!(back["items"][0]["type"], "image");
        assert_eq!(back["items"][0]["startTime"], 0);
        assert_eq!(back["audio"]["offset"], 1200);
    }

    #[test]
    fn effect_defaults_to_fade() {
        let json = serde_json::json!({
            "id": "i", "type": "image", "url": "a.png",
            "startTime": 0, "duration": 1000
        });
        let item: TimelineItem = serde_json::from_value(json).unwrap();
        assert_eq!(item.in_effect, EffectKind::Fade);
        assert_eq!(item.out_effect, EffectKind::Fade);
        assert_eq!(item.transition_duration_ms, 500);
    }

    #[test]
    fn visibility_upper_bound_is_strict() {
        let item = image_item("i", "a.png", 1000, 2000);
        assert!(!item.visible_at(999.9));
        assert!(item.visible_at(1000.0));
        assert!(item.visible_at(2999.9));
        assert!(!item.visible_at(3000.0));
    }

    #[test]
    fn audio_dominates_total_duration() {
        let mut spec = basic_spec(vec![image_item("i", "a.png", 0, 3000)]);
        spec.duration_ms = 3000;
        spec.audio = Some(AudioTrack {
            source_ref: "track.mp3".to_string(),
            duration_ms: 5000,
            offset_ms: 0,
            volume: 1.0,
        });
        assert_eq!(spec.total_duration_ms(), 5000);
        assert_eq!(spec.total_frames(), 150);
    }

    #[test]
    fn total_frames_has_floor_of_one() {
        let mut spec = basic_spec(vec![image_item("i", "a.png", 0, 1)]);
        spec.duration_ms = 0;
        assert_eq!(spec.total_frames(), 1);
    }

    #[test]
    fn validate_rejects_zero_duration_item() {
        let mut spec = basic_spec(vec![image_item("i", "a.png", 0, 1000)]);
        spec.items[0].duration_ms = 0;
        assert!(matches!(
            spec.validate(),
            Err(MontraError::Configuration(_))
        ));
    }

    #[test]
    fn validate_rejects_audio_offset_past_source() {
        let mut spec = basic_spec(vec![image_item("i", "a.png", 0, 1000)]);
        spec.audio = Some(AudioTrack {
            source_ref: "track.mp3".to_string(),
            duration_ms: 2000,
            offset_ms: 2000,
            volume: 1.0,
        });
        assert!(spec.validate().is_err());
    }

    #[test]
    fn zero_transition_duration_falls_back_to_default() {
        let mut item = image_item("i", "a.png", 0, 1000);
        item.transition_duration_ms = 0;
        assert_eq!(item.effective_transition_ms(), 500);
    }
}
