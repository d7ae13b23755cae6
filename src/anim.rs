use crate::error::MontraResult;
use crate::interp::{InterpolateOptions, clamp01, interpolate};
use crate::model::{EffectKind, TimelineItem};

/// Resolved per-frame visual state for one item.
///
/// `opacity` starts at the item's base opacity and is replaced (not
/// multiplied) by opacity-bearing effects. `translate_x` is an additional
/// horizontal offset in canvas pixels, `scale` is uniform about the item
/// center, `blur_px` is a gaussian blur radius in pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ItemStyle {
    pub opacity: f64,
    pub translate_x: f64,
    pub scale: f64,
    pub blur_px: f64,
}

impl ItemStyle {
    fn base(opacity: f64) -> Self {
        Self {
            opacity,
            translate_x: 0.0,
            scale: 1.0,
            blur_px: 0.0,
        }
    }
}

/// Normalized entrance position: 0 at item start, 1 once the transition
/// duration has fully elapsed.
pub fn entrance_progress(t_ms: f64, start_ms: f64, transition_ms: f64) -> f64 {
    if transition_ms <= 0.0 {
        return 1.0;
    }
    clamp01((t_ms - start_ms) / transition_ms)
}

/// Normalized exit position: 0 until the final transition window begins,
/// 1 at the item's end instant.
pub fn exit_progress(t_ms: f64, end_ms: f64, transition_ms: f64) -> f64 {
    if transition_ms <= 0.0 {
        return 0.0;
    }
    clamp01(1.0 - (end_ms - t_ms) / transition_ms)
}

/// Computes the visual style of `item` at absolute timeline time `t_ms`.
///
/// The entrance effect applies while entrance progress < 1, the exit effect
/// while exit progress > 0. When both are active (items shorter than twice
/// the transition duration) the exit effect is applied second and wins on any
/// property both set. Slide translation is measured in the item's own width.
pub fn resolve_style(item: &TimelineItem, t_ms: f64, item_width: f64) -> MontraResult<ItemStyle> {
    let transition = item.effective_transition_ms() as f64;
    let entrance = entrance_progress(t_ms, item.start_time_ms as f64, transition);
    let exit = exit_progress(t_ms, item.end_time_ms() as f64, transition);

    let mut style = ItemStyle::base(item.base_opacity);
    if entrance < 1.0 {
        apply_entrance(&mut style, item.in_effect, entrance, item_width)?;
    }
    if exit > 0.0 {
        apply_exit(&mut style, item.out_effect, exit, item_width)?;
    }
    Ok(style)
}

fn apply_entrance(
    style: &mut ItemStyle,
    effect: EffectKind,
    progress: f64,
    item_width: f64,
) -> MontraResult<()> {
    let lerp = |outputs: [f64; 2]| {
        interpolate(
            progress,
            &[0.0, 1.0],
            &outputs,
            InterpolateOptions::default(),
        )
    };
    match effect {
        EffectKind::Fade => style.opacity = lerp([0.0, 1.0])?,
        EffectKind::SlideLeft => style.translate_x = lerp([item_width, 0.0])?,
        EffectKind::SlideRight => style.translate_x = lerp([-item_width, 0.0])?,
        EffectKind::ZoomIn => {
            style.scale = lerp([0.8, 1.0])?;
            style.opacity = lerp([0.0, 1.0])?;
        }
        EffectKind::ZoomOut => {
            style.scale = lerp([1.2, 1.0])?;
            style.opacity = lerp([0.0, 1.0])?;
        }
        EffectKind::Blur => {
            style.blur_px = lerp([10.0, 0.0])?;
            style.opacity = lerp([0.0, 1.0])?;
        }
        EffectKind::None => {}
    }
    Ok(())
}

fn apply_exit(
    style: &mut ItemStyle,
    effect: EffectKind,
    progress: f64,
    item_width: f64,
) -> MontraResult<()> {
    let lerp = |outputs: [f64; 2]| {
        interpolate(
            progress,
            &[0.0, 1.0],
            &outputs,
            InterpolateOptions::default(),
        )
    };
    match effect {
        EffectKind::Fade => style.opacity = lerp([1.0, 0.0])?,
        EffectKind::SlideLeft => style.translate_x = lerp([0.0, -item_width])?,
        EffectKind::SlideRight => style.translate_x = lerp([0.0, item_width])?,
        EffectKind::ZoomIn => {
            style.scale = lerp([1.0, 1.2])?;
            style.opacity = lerp([1.0, 0.0])?;
        }
        EffectKind::ZoomOut => {
            style.scale = lerp([1.0, 0.8])?;
            style.opacity = lerp([1.0, 0.0])?;
        }
        EffectKind::Blur => {
            style.blur_px = lerp([0.0, 10.0])?;
            style.opacity = lerp([1.0, 0.0])?;
        }
        EffectKind::None => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::test_support::image_item;

    fn fade_item() -> TimelineItem {
        image_item("fade", "a.png", 0, 3000)
    }

    #[test]
    fn fade_opacity_matches_transition_envelope() {
        let item = fade_item();
        // Frame 0, 15, 75, 90 at 30 fps.
        let at = |t: f64| resolve_style(&item, t, 100.0).unwrap().opacity;
        assert!(at(0.0).abs() < 1e-9);
        assert!((at(500.0) - 1.0).abs() < 1e-9);
        assert!((at(2500.0) - 1.0).abs() < 1e-9);
        assert!((at(2750.0) - 0.5).abs() < 1e-9);
        assert!(at(2999.0) < 0.01);
    }

    #[test]
    fn slide_translation_is_measured_in_item_width() {
        let mut item = fade_item();
        item.in_effect = EffectKind::SlideLeft;
        item.out_effect = EffectKind::SlideLeft;

        let s = resolve_style(&item, 0.0, 640.0).unwrap();
        assert!((s.translate_x - 640.0).abs() < 1e-9);

        let s = resolve_style(&item, 250.0, 640.0).unwrap();
        assert!((s.translate_x - 320.0).abs() < 1e-9);

        let s = resolve_style(&item, 2750.0, 640.0).unwrap();
        assert!((s.translate_x + 320.0).abs() < 1e-9);
    }

    #[test]
    fn slide_right_mirrors_slide_left() {
        let mut item = fade_item();
        item.in_effect = EffectKind::SlideRight;
        item.out_effect = EffectKind::SlideRight;

        let s = resolve_style(&item, 0.0, 640.0).unwrap();
        assert!((s.translate_x + 640.0).abs() < 1e-9);
        let s = resolve_style(&item, 2999.999, 640.0).unwrap();
        assert!(s.translate_x > 639.0);
    }

    #[test]
    fn zoom_effects_scale_and_fade() {
        let mut item = fade_item();
        item.in_effect = EffectKind::ZoomIn;
        item.out_effect = EffectKind::ZoomIn;

        let s = resolve_style(&item, 0.0, 100.0).unwrap();
        assert!((s.scale - 0.8).abs() < 1e-9);
        assert!(s.opacity.abs() < 1e-9);

        let s = resolve_style(&item, 1500.0, 100.0).unwrap();
        assert!((s.scale - 1.0).abs() < 1e-9);
        assert!((s.opacity - 1.0).abs() < 1e-9);

        let s = resolve_style(&item, 2750.0, 100.0).unwrap();
        assert!((s.scale - 1.1).abs() < 1e-9);
        assert!((s.opacity - 0.5).abs() < 1e-9);
    }

    #[test]
    fn blur_effect_resolves_radius() {
        let mut item = fade_item();
        item.in_effect = EffectKind::Blur;
        let s = resolve_style(&item, 250.0, 100.0).unwrap();
        assert!((s.blur_px - 5.0).abs() < 1e-9);
    }

    #[test]
    fn none_effect_keeps_base_opacity() {
        let mut item = fade_item();
        item.in_effect = EffectKind::None;
        item.out_effect = EffectKind::None;
        item.base_opacity = 0.4;
        let s = resolve_style(&item, 0.0, 100.0).unwrap();
        assert_eq!(s, ItemStyle::base(0.4));
    }

    #[test]
    fn exit_wins_when_both_phases_are_active() {
        // Shorter than 2x the transition, so both phases overlap in the middle.
        let mut item = image_item("short", "a.png", 0, 600);
        item.in_effect = EffectKind::ZoomIn;
        item.out_effect = EffectKind::ZoomOut;

        // t=400: entrance 0.8 would give scale 0.96; exit progress is
        // 1 - 200/500 = 0.6, so the exit mapping 1->0.8 takes over.
        let s = resolve_style(&item, 400.0, 100.0).unwrap();
        assert!((s.scale - 0.88).abs() < 1e-9);
    }

    #[test]
    fn progress_stays_in_unit_range_for_short_items() {
        let mut item = image_item("short", "a.png", 1000, 300);
        item.transition_duration_ms = 900;
        for t in [900.0, 1000.0, 1100.0, 1299.0, 1400.0] {
            let e = entrance_progress(t, 1000.0, 900.0);
            let x = exit_progress(t, 1300.0, 900.0);
            assert!((0.0..=1.0).contains(&e));
            assert!((0.0..=1.0).contains(&x));
        }
        // Monotonic over the visible window.
        let mut prev_e = -1.0;
        let mut prev_x = -1.0;
        for i in 0..=30 {
            let t = 1000.0 + f64::from(i) * 10.0;
            let e = entrance_progress(t, 1000.0, 900.0);
            let x = exit_progress(t, 1300.0, 900.0);
            assert!(e >= prev_e);
            assert!(x >= prev_x);
            prev_e = e;
            prev_x = x;
        }
    }
}
