use kurbo::Affine;

use crate::anim::{self, ItemStyle};
use crate::assets::AssetStore;
use crate::blur;
use crate::error::{MontraError, MontraResult};
use crate::model::{CompositionSpec, MediaKind, TimelineItem};
use crate::raster::{self, FrameRgba, SourcePixels};
use crate::text;

/// How far outside the strict visibility window drivers may look when
/// prefetching media. Prefetch only; painting still honors the strict window.
pub const PREFETCH_WINDOW_MS: f64 = 1000.0;

/// Straight-alpha 50% red, the placeholder painted over an item whose media
/// failed to load.
const PLACEHOLDER_RGBA: [u8; 4] = [255, 0, 0, 128];

const DEFAULT_SIZE_RATIO: f64 = 0.8;

/// Item rectangle in canvas pixels after the default-size rule.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ItemRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Applies the default geometry rule for image and video items: width/height
/// <= 0 become 80% of the canvas, and when the item also sits at the origin
/// it is centered. Text does not use this rule; its rect comes from the
/// glyph raster extents (see `item_rect`).
pub fn resolve_geometry(item: &TimelineItem, canvas_w: u32, canvas_h: u32) -> ItemRect {
    let mut rect = ItemRect {
        x: item.x,
        y: item.y,
        width: item.width,
        height: item.height,
    };
    if rect.width <= 0.0 || rect.height <= 0.0 {
        rect.width = f64::from(canvas_w) * DEFAULT_SIZE_RATIO;
        rect.height = f64::from(canvas_h) * DEFAULT_SIZE_RATIO;
        if item.x == 0.0 && item.y == 0.0 {
            rect.x = (f64::from(canvas_w) - rect.width) / 2.0;
            rect.y = (f64::from(canvas_h) - rect.height) / 2.0;
        }
    }
    rect
}

/// Items painted at `t_ms`, in array order (later items on top).
pub fn visible_items(spec: &CompositionSpec, t_ms: f64) -> Vec<&TimelineItem> {
    spec.items.iter().filter(|item| item.visible_at(t_ms)).collect()
}

/// Items a driver should have media ready for at `t_ms`: the visible set
/// widened by the prefetch window on both sides.
pub fn prefetch_items(spec: &CompositionSpec, t_ms: f64) -> Vec<&TimelineItem> {
    spec.items
        .iter()
        .filter(|item| {
            t_ms >= item.start_time_ms as f64 - PREFETCH_WINDOW_MS
                && t_ms < item.end_time_ms() as f64 + PREFETCH_WINDOW_MS
        })
        .collect()
}

/// Renders the frame at `t_ms` into a premultiplied RGBA buffer at canvas
/// resolution.
///
/// Pure with respect to the spec and timestamp: the only state consulted
/// between frames is the media cache, which never changes decoded content.
/// A media failure on one item paints a placeholder and keeps going; only
/// configuration errors abort the frame.
#[tracing::instrument(skip(spec, assets))]
pub fn render_frame(
    spec: &CompositionSpec,
    t_ms: f64,
    assets: &AssetStore,
) -> MontraResult<FrameRgba> {
    let mut frame = FrameRgba::filled(spec.canvas.width, spec.canvas.height, [0, 0, 0, 255]);

    for item in visible_items(spec, t_ms) {
        let (rect, source) = match resolve_source(item, t_ms, assets) {
            Ok(source) => {
                let rect = item_rect(item, &source, spec.canvas.width, spec.canvas.height);
                (rect, source)
            }
            Err(e) if e.is_recoverable() => {
                tracing::warn!(item = %item.id, error = %e, "painting placeholder for failed media");
                let rect = resolve_geometry(item, spec.canvas.width, spec.canvas.height);
                let placeholder = SourcePixels::solid(
                    rect.width.max(1.0) as u32,
                    rect.height.max(1.0) as u32,
                    PLACEHOLDER_RGBA,
                );
                (rect, placeholder)
            }
            Err(e) => return Err(e),
        };

        let style = anim::resolve_style(item, t_ms, rect.width)?;
        if style.opacity <= 0.0 {
            continue;
        }
        draw_item(&mut frame, item, &rect, &style, &source)?;
    }
    Ok(frame)
}

/// Rect the item's source pixels are drawn into. Image and video stretch
/// into their (defaulted) geometry; text blits 1:1 at the item position so
/// the rendered glyph size is exactly the requested font size, with the top
/// of the raster at the item origin.
fn item_rect(item: &TimelineItem, source: &SourcePixels, canvas_w: u32, canvas_h: u32) -> ItemRect {
    match item.media_kind {
        MediaKind::Text => ItemRect {
            x: item.x,
            y: item.y,
            width: f64::from(source.width),
            height: f64::from(source.height),
        },
        MediaKind::Image | MediaKind::Video => resolve_geometry(item, canvas_w, canvas_h),
    }
}

fn resolve_source(
    item: &TimelineItem,
    t_ms: f64,
    assets: &AssetStore,
) -> MontraResult<SourcePixels> {
    match item.media_kind {
        MediaKind::Image => Ok(assets.image(&item.source_ref)?.as_ref().clone()),
        MediaKind::Video => {
            let source_time = item.trim_start_ms as f64 + (t_ms - item.start_time_ms as f64);
            Ok(assets.video_frame(&item.source_ref, source_time)?.as_ref().clone())
        }
        MediaKind::Text => {
            let content = item
                .text
                .as_deref()
                .ok_or_else(|| MontraError::asset(format!("text item '{}' has no text", item.id)))?;
            let color = text::parse_color(item.color.as_deref().unwrap_or("white"))?;
            let font = assets.font(item.font_family.as_deref())?;
            text::rasterize_line(&font, content, item.font_size, color)
        }
    }
}

/// Draws one item through the shared transform pipeline: translate to
/// position (plus any slide offset), then scale and rotate about the item
/// center, then blur, then composite with the resolved opacity.
fn draw_item(
    frame: &mut FrameRgba,
    item: &TimelineItem,
    rect: &ItemRect,
    style: &ItemStyle,
    source: &SourcePixels,
) -> MontraResult<()> {
    let cx = rect.width / 2.0;
    let cy = rect.height / 2.0;
    let transform = Affine::translate((rect.x + style.translate_x, rect.y))
        * Affine::translate((cx, cy))
        * Affine::scale(style.scale)
        * Affine::rotate(item.rotation_degrees.to_radians())
        * Affine::translate((-cx, -cy));

    // Each item gets its own full-canvas layer so blur never bleeds into
    // pixels painted by earlier items.
    let mut layer = FrameRgba::new(frame.width, frame.height);
    raster::draw_transformed(&mut layer, source, transform, rect.width, rect.height)?;
    if style.blur_px > 0.0 {
        blur::blur_layer(&mut layer, style.blur_px)?;
    }
    raster::composite_layer(frame, &layer, style.opacity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::test_support::{basic_spec, image_item};
    use crate::model::{Canvas, EffectKind};

    fn store() -> AssetStore {
        AssetStore::new("/nonexistent-test-root")
    }

    #[test]
    fn default_geometry_fills_80_percent_centered() {
        let item = image_item("i", "a.png", 0, 1000);
        let rect = resolve_geometry(&item, 1920, 1080);
        assert_eq!(
            rect,
            ItemRect {
                x: 192.0,
                y: 108.0,
                width: 1536.0,
                height: 864.0
            }
        );
    }

    #[test]
    fn default_geometry_keeps_explicit_position() {
        let mut item = image_item("i", "a.png", 0, 1000);
        item.x = 10.0;
        item.y = 20.0;
        let rect = resolve_geometry(&item, 1920, 1080);
        assert_eq!(rect.x, 10.0);
        assert_eq!(rect.y, 20.0);
        assert_eq!(rect.width, 1536.0);
    }

    #[test]
    fn explicit_geometry_is_untouched() {
        let mut item = image_item("i", "a.png", 0, 1000);
        item.x = 5.0;
        item.y = 6.0;
        item.width = 100.0;
        item.height = 50.0;
        let rect = resolve_geometry(&item, 1920, 1080);
        assert_eq!(
            rect,
            ItemRect {
                x: 5.0,
                y: 6.0,
                width: 100.0,
                height: 50.0
            }
        );
    }

    #[test]
    fn visible_set_honors_strict_window_and_order() {
        let spec = basic_spec(vec![
            image_item("a", "a.png", 0, 2000),
            image_item("b", "b.png", 1500, 2500),
        ]);

        let at_1700: Vec<&str> = visible_items(&spec, 1700.0).iter().map(|i| i.id.as_str()).collect();
        assert_eq!(at_1700, vec!["a", "b"]);

        let at_2000: Vec<&str> = visible_items(&spec, 2000.0).iter().map(|i| i.id.as_str()).collect();
        assert_eq!(at_2000, vec!["b"]);
    }

    #[test]
    fn prefetch_widens_but_visibility_does_not() {
        let spec = basic_spec(vec![image_item("a", "a.png", 2000, 1000)]);
        assert!(visible_items(&spec, 1500.0).is_empty());
        assert_eq!(prefetch_items(&spec, 1500.0).len(), 1);
        assert_eq!(prefetch_items(&spec, 3500.0).len(), 1);
        assert!(prefetch_items(&spec, 4100.0).is_empty());
    }

    #[test]
    fn empty_visible_set_renders_background_only() {
        let spec = basic_spec(vec![image_item("a", "a.png", 5000, 1000)]);
        let frame = render_frame(&spec, 0.0, &store()).unwrap();
        assert!(frame.data.chunks_exact(4).all(|px| px == [0, 0, 0, 255]));
    }

    #[test]
    fn failed_asset_paints_placeholder_beside_decoded_items() {
        // Two real sources and one broken one: the frame must carry both
        // decoded items plus a placeholder, not abort.
        let root = std::env::temp_dir().join("montra-compositor-tests");
        std::fs::create_dir_all(&root).unwrap();
        image::RgbaImage::from_pixel(8, 8, image::Rgba([0, 255, 0, 255]))
            .save(root.join("green.png"))
            .unwrap();
        image::RgbaImage::from_pixel(8, 8, image::Rgba([0, 0, 255, 255]))
            .save(root.join("blue.png"))
            .unwrap();

        let mut items = vec![
            image_item("a", "green.png", 0, 3000),
            image_item("b", "missing.png", 0, 3000),
            image_item("c", "blue.png", 0, 3000),
        ];
        for (i, item) in items.iter_mut().enumerate() {
            item.in_effect = EffectKind::None;
            item.out_effect = EffectKind::None;
            item.x = (i as f64) * 24.0;
            item.y = 0.0;
            item.width = 16.0;
            item.height = 36.0;
        }
        let spec = basic_spec(items);

        let frame = render_frame(&spec, 1500.0, &AssetStore::new(&root)).unwrap();
        assert_eq!(frame.pixel(8, 18), [0, 255, 0, 255]);
        // Broken item: 50% red placeholder flattened over the black frame.
        assert_eq!(frame.pixel(32, 18), [128, 0, 0, 255]);
        assert_eq!(frame.pixel(56, 18), [0, 0, 255, 255]);
        // Gaps between items stay background.
        assert_eq!(frame.pixel(20, 18), [0, 0, 0, 255]);
    }

    #[test]
    fn text_rect_uses_raster_extents_not_default_rect() {
        let mut item = image_item("t", "", 0, 1000);
        item.media_kind = MediaKind::Text;
        item.text = Some("Hi".to_string());
        item.x = 40.0;
        item.y = 12.0;
        item.width = 0.0;
        item.height = 0.0;

        // A 24px label rasterizes to something label-sized; the draw rect
        // must be exactly those extents at the item position, never the 80%
        // canvas default.
        let raster = SourcePixels::solid(30, 18, [255, 255, 255, 255]);
        let rect = item_rect(&item, &raster, 1920, 1080);
        assert_eq!(
            rect,
            ItemRect {
                x: 40.0,
                y: 12.0,
                width: 30.0,
                height: 18.0
            }
        );

        // Image items with the same geometry still get the default rule.
        let img = image_item("i", "a.png", 0, 1000);
        let rect = item_rect(&img, &raster, 1920, 1080);
        assert_eq!(rect.width, 1536.0);
        assert_eq!(rect.height, 864.0);
    }

    #[test]
    fn rendering_is_deterministic() {
        let spec = basic_spec(vec![
            image_item("a", "missing-a.png", 0, 3000),
            image_item("b", "missing-b.png", 1000, 2000),
        ]);
        let first = render_frame(&spec, 1200.0, &store()).unwrap();
        let second = render_frame(&spec, 1200.0, &store()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn fully_faded_item_is_skipped() {
        let mut item = image_item("a", "missing.png", 0, 3000);
        item.base_opacity = 1.0;
        let spec = basic_spec(vec![item]);
        // t=0: fade entrance opacity is exactly 0, nothing painted.
        let frame = render_frame(&spec, 0.0, &store()).unwrap();
        assert!(frame.data.chunks_exact(4).all(|px| px == [0, 0, 0, 255]));
    }

    #[test]
    fn scenario_canvas_override_is_respected() {
        let mut spec = basic_spec(vec![image_item("a", "missing.png", 0, 1000)]);
        spec.canvas = Canvas {
            width: 32,
            height: 32,
        };
        let frame = render_frame(&spec, 500.0, &store()).unwrap();
        assert_eq!(frame.width, 32);
        assert_eq!(frame.height, 32);
    }
}
