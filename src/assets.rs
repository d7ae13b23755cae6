use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use fontdue::Font;

use crate::error::{MontraError, MontraResult};
use crate::media::{self, MediaInfo};
use crate::model::{CompositionSpec, MediaKind};
use crate::raster::SourcePixels;

/// Scheme prefix for session-scoped media references. These never reach a
/// render driver; the export orchestrator stages them to disk first.
pub const TRANSIENT_SCHEME: &str = "mem:";

/// Decoded video frames kept in memory per store. Evicting wholesale keeps
/// the policy deterministic.
const VIDEO_FRAME_CACHE_CAP: usize = 64;

type ImageSlot = Result<Arc<SourcePixels>, String>;

/// Write-once-per-key, read-many media cache shared by the compositor and
/// the render drivers.
///
/// Load failures are cached too, so a broken source is probed once and then
/// keeps resolving to the same asset error for every later frame.
pub struct AssetStore {
    root: PathBuf,
    images: Mutex<HashMap<String, ImageSlot>>,
    media_infos: Mutex<HashMap<String, Result<Arc<MediaInfo>, String>>>,
    video_frames: Mutex<HashMap<(String, u64), Arc<SourcePixels>>>,
    fonts: Mutex<HashMap<String, Arc<Font>>>,
}

impl AssetStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            images: Mutex::new(HashMap::new()),
            media_infos: Mutex::new(HashMap::new()),
            video_frames: Mutex::new(HashMap::new()),
            fonts: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Maps a durable source reference to a filesystem path. Transient
    /// references are a configuration error here: normalization is the
    /// orchestrator's job and must happen before any driver runs.
    pub fn resolve_path(&self, source_ref: &str) -> MontraResult<PathBuf> {
        if source_ref.starts_with(TRANSIENT_SCHEME) {
            return Err(MontraError::configuration(format!(
                "transient reference '{source_ref}' reached the asset store; \
                 it must be staged to a durable file first"
            )));
        }
        let path = Path::new(source_ref);
        if path.is_absolute() {
            Ok(path.to_path_buf())
        } else {
            Ok(self.root.join(path))
        }
    }

    pub fn image(&self, source_ref: &str) -> MontraResult<Arc<SourcePixels>> {
        if let Some(slot) = lock(&self.images).get(source_ref) {
            return slot.clone().map_err(MontraError::Asset);
        }

        let loaded = self.load_image(source_ref);
        let slot: ImageSlot = match &loaded {
            Ok(px) => Ok(px.clone()),
            Err(e) => Err(e.to_string()),
        };
        lock(&self.images)
            .entry(source_ref.to_string())
            .or_insert(slot);
        loaded
    }

    fn load_image(&self, source_ref: &str) -> MontraResult<Arc<SourcePixels>> {
        let path = self.resolve_path(source_ref)?;
        // Staged transient files carry no meaningful extension, so sniff the
        // format from content instead of trusting the path.
        let decoded = image::ImageReader::open(&path)
            .and_then(|r| r.with_guessed_format())
            .map_err(|e| {
                MontraError::asset(format!("failed to open image '{}': {e}", path.display()))
            })?
            .decode()
            .map_err(|e| {
                MontraError::asset(format!("failed to decode image '{}': {e}", path.display()))
            })?;
        let rgba = decoded.to_rgba8();
        let (w, h) = rgba.dimensions();
        Ok(Arc::new(SourcePixels::new(w, h, rgba.into_raw())?))
    }

    pub fn media_info(&self, source_ref: &str) -> MontraResult<Arc<MediaInfo>> {
        if let Some(slot) = lock(&self.media_infos).get(source_ref) {
            return slot.clone().map_err(MontraError::Asset);
        }

        let probed = self
            .resolve_path(source_ref)
            .and_then(|path| media::probe(&path))
            .map(Arc::new);
        let slot = match &probed {
            Ok(info) => Ok(info.clone()),
            Err(e) => Err(e.to_string()),
        };
        lock(&self.media_infos)
            .entry(source_ref.to_string())
            .or_insert(slot);
        probed
    }

    /// Decoded video frame at `source_time_ms`, cached per millisecond.
    pub fn video_frame(&self, source_ref: &str, source_time_ms: f64) -> MontraResult<Arc<SourcePixels>> {
        let key = (source_ref.to_string(), source_time_ms.max(0.0).round() as u64);
        if let Some(frame) = lock(&self.video_frames).get(&key) {
            return Ok(frame.clone());
        }

        let info = self.media_info(source_ref)?;
        let rgba = media::decode_video_frame_rgba(&info, source_time_ms)?;
        let frame = Arc::new(SourcePixels::new(info.width, info.height, rgba)?);

        let mut frames = lock(&self.video_frames);
        if frames.len() >= VIDEO_FRAME_CACHE_CAP {
            frames.clear();
        }
        frames.insert(key, frame.clone());
        Ok(frame)
    }

    /// Resolves a font by family name, defaulting to a sans face searched
    /// across the usual system font locations.
    pub fn font(&self, family: Option<&str>) -> MontraResult<Arc<Font>> {
        let family = family.unwrap_or("sans-serif").to_string();
        if let Some(font) = lock(&self.fonts).get(&family) {
            return Ok(font.clone());
        }

        let path = find_font_file(&family).ok_or_else(|| {
            MontraError::asset(format!("no font file found for family '{family}'"))
        })?;
        let bytes = std::fs::read(&path).map_err(|e| {
            MontraError::asset(format!("failed to read font '{}': {e}", path.display()))
        })?;
        let font = Font::from_bytes(bytes, fontdue::FontSettings::default())
            .map_err(|e| MontraError::asset(format!("failed to parse font '{}': {e}", path.display())))?;

        let font = Arc::new(font);
        lock(&self.fonts).insert(family, font.clone());
        Ok(font)
    }

    /// Warms the image cache for every image item before capture starts, so
    /// the realtime frame loop never stalls on a first-time decode. Load
    /// failures are recorded and will surface as placeholders, not aborts.
    pub fn preload_images(&self, spec: &CompositionSpec) {
        for item in &spec.items {
            if item.media_kind != MediaKind::Image {
                continue;
            }
            if let Err(e) = self.image(&item.source_ref) {
                tracing::warn!(item = %item.id, error = %e, "image preload failed");
            }
        }
    }

    /// Drops every cached asset. Called on cancellation and at the end of a
    /// render session.
    pub fn clear(&self) {
        lock(&self.images).clear();
        lock(&self.media_infos).clear();
        lock(&self.video_frames).clear();
        lock(&self.fonts).clear();
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn find_font_file(family: &str) -> Option<PathBuf> {
    let candidates: &[&str] = if family.eq_ignore_ascii_case("serif") {
        &[
            "/usr/share/fonts/truetype/dejavu/DejaVuSerif.ttf",
            "/usr/share/fonts/TTF/DejaVuSerif.ttf",
            "/usr/share/fonts/truetype/liberation/LiberationSerif-Regular.ttf",
        ]
    } else if family.eq_ignore_ascii_case("monospace") || family.eq_ignore_ascii_case("mono") {
        &[
            "/usr/share/fonts/truetype/dejavu/DejaVuSansMono.ttf",
            "/usr/share/fonts/TTF/DejaVuSansMono.ttf",
            "/usr/share/fonts/truetype/liberation/LiberationMono-Regular.ttf",
        ]
    } else {
        &[
            "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
            "/usr/share/fonts/TTF/DejaVuSans.ttf",
            "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
            "/usr/share/fonts/truetype/freefont/FreeSans.ttf",
        ]
    };
    candidates.iter().map(PathBuf::from).find(|p| p.exists())
}

/// In-memory holding area for session-scoped media (pasted clipboard images,
/// recorded blobs). Keys are caller-chosen; `reference` returns the `mem:`
/// form items carry on the wire.
#[derive(Default)]
pub struct TransientStore {
    entries: Mutex<HashMap<String, Arc<Vec<u8>>>>,
}

impl TransientStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: impl Into<String>, bytes: Vec<u8>) -> String {
        let key = key.into();
        lock(&self.entries).insert(key.clone(), Arc::new(bytes));
        format!("{TRANSIENT_SCHEME}{key}")
    }

    pub fn get(&self, source_ref: &str) -> Option<Arc<Vec<u8>>> {
        let key = source_ref.strip_prefix(TRANSIENT_SCHEME)?;
        lock(&self.entries).get(key).cloned()
    }
}

/// FNV-1a over the content bytes; used to derive stable staging filenames so
/// identical transient payloads normalize to the same durable file.
pub fn content_hash64(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for &b in bytes {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::test_support::{basic_spec, image_item};

    #[test]
    fn transient_refs_are_rejected_by_resolve() {
        let store = AssetStore::new("/tmp/assets");
        assert!(matches!(
            store.resolve_path("mem:clip-1"),
            Err(MontraError::Configuration(_))
        ));
    }

    #[test]
    fn relative_refs_resolve_under_the_root() {
        let store = AssetStore::new("/data/assets");
        let path = store.resolve_path("photos/a.png").unwrap();
        assert_eq!(path, PathBuf::from("/data/assets/photos/a.png"));
    }

    #[test]
    fn image_failures_are_cached_as_asset_errors() {
        let store = AssetStore::new("/nonexistent-root");
        let first = store.image("missing.png");
        assert!(matches!(first, Err(MontraError::Asset(_))));
        // Second lookup hits the cached failure.
        let second = store.image("missing.png");
        assert!(matches!(second, Err(MontraError::Asset(_))));
        assert_eq!(lock(&store.images).len(), 1);
    }

    #[test]
    fn preload_survives_broken_sources() {
        let store = AssetStore::new("/nonexistent-root");
        let spec = basic_spec(vec![image_item("a", "missing.png", 0, 1000)]);
        store.preload_images(&spec);
        assert_eq!(lock(&store.images).len(), 1);
    }

    #[test]
    fn transient_store_round_trips() {
        let store = TransientStore::new();
        let r = store.insert("clip-1", vec![1, 2, 3]);
        assert_eq!(r, "mem:clip-1");
        assert_eq!(store.get(&r).unwrap().as_slice(), &[1, 2, 3]);
        assert!(store.get("mem:other").is_none());
        assert!(store.get("clip-1").is_none());
    }

    #[test]
    fn content_hash_is_stable_and_content_sensitive() {
        assert_eq!(content_hash64(b""), 0xcbf2_9ce4_8422_2325);
        assert_eq!(content_hash64(b"abc"), content_hash64(b"abc"));
        assert_ne!(content_hash64(b"abc"), content_hash64(b"abd"));
    }
}
