use kurbo::{Affine, Point};

use crate::error::{MontraError, MontraResult};

/// A premultiplied RGBA8 pixel buffer at canonical output resolution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameRgba {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl FrameRgba {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0u8; (width as usize) * (height as usize) * 4],
        }
    }

    pub fn filled(width: u32, height: u32, rgba_premul: [u8; 4]) -> Self {
        let mut frame = Self::new(width, height);
        for px in frame.data.chunks_exact_mut(4) {
            px.copy_from_slice(&rgba_premul);
        }
        frame
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let idx = ((y * self.width + x) as usize) * 4;
        [
            self.data[idx],
            self.data[idx + 1],
            self.data[idx + 2],
            self.data[idx + 3],
        ]
    }
}

/// Straight-alpha RGBA8 source pixels, as decoded from an image, a video
/// frame, or a text raster.
#[derive(Clone, Debug)]
pub struct SourcePixels {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

impl SourcePixels {
    pub fn new(width: u32, height: u32, rgba: Vec<u8>) -> MontraResult<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(4))
            .ok_or_else(|| MontraError::asset("source pixel buffer size overflow"))?;
        if rgba.len() != expected || width == 0 || height == 0 {
            return Err(MontraError::asset(format!(
                "source pixel buffer has {} bytes, expected {}x{}x4",
                rgba.len(),
                width,
                height
            )));
        }
        Ok(Self {
            width,
            height,
            rgba,
        })
    }

    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let mut px = Vec::with_capacity((width as usize) * (height as usize) * 4);
        for _ in 0..width * height {
            px.extend_from_slice(&rgba);
        }
        Self {
            width,
            height,
            rgba: px,
        }
    }

    fn sample_bilinear_premul(&self, x: f64, y: f64) -> [f64; 4] {
        let max_x = (self.width - 1) as f64;
        let max_y = (self.height - 1) as f64;
        let x = x.clamp(0.0, max_x);
        let y = y.clamp(0.0, max_y);
        let x0 = x.floor() as u32;
        let y0 = y.floor() as u32;
        let x1 = (x0 + 1).min(self.width - 1);
        let y1 = (y0 + 1).min(self.height - 1);
        let fx = x - f64::from(x0);
        let fy = y - f64::from(y0);

        let p00 = self.premul_at(x0, y0);
        let p10 = self.premul_at(x1, y0);
        let p01 = self.premul_at(x0, y1);
        let p11 = self.premul_at(x1, y1);

        let mut out = [0.0f64; 4];
        for c in 0..4 {
            let top = p00[c] * (1.0 - fx) + p10[c] * fx;
            let bot = p01[c] * (1.0 - fx) + p11[c] * fx;
            out[c] = top * (1.0 - fy) + bot * fy;
        }
        out
    }

    fn premul_at(&self, x: u32, y: u32) -> [f64; 4] {
        let idx = ((y * self.width + x) as usize) * 4;
        let a = f64::from(self.rgba[idx + 3]) / 255.0;
        [
            f64::from(self.rgba[idx]) * a,
            f64::from(self.rgba[idx + 1]) * a,
            f64::from(self.rgba[idx + 2]) * a,
            f64::from(self.rgba[idx + 3]),
        ]
    }
}

/// Porter-Duff `over` of one premultiplied pixel onto another, with an extra
/// source opacity factor.
pub fn over(dst: [u8; 4], src: [u8; 4], opacity: f64) -> [u8; 4] {
    let opacity = opacity.clamp(0.0, 1.0);
    if opacity <= 0.0 || src[3] == 0 {
        return dst;
    }

    let op = ((opacity * 255.0).round() as i32).clamp(0, 255) as u16;
    let sa = mul_div255(u16::from(src[3]), op);
    if sa == 0 {
        return dst;
    }
    let inv = 255u16 - u16::from(sa);

    let mut out = [0u8; 4];
    out[3] = sa.saturating_add(mul_div255(u16::from(dst[3]), inv));
    for c in 0..3 {
        let sc = mul_div255(u16::from(src[c]), op);
        let dc = mul_div255(u16::from(dst[c]), inv);
        out[c] = sc.saturating_add(dc);
    }
    out
}

/// Composites a full-canvas premultiplied layer onto the frame with the given
/// opacity.
pub fn composite_layer(dst: &mut FrameRgba, layer: &FrameRgba, opacity: f64) -> MontraResult<()> {
    if dst.width != layer.width || dst.height != layer.height {
        return Err(MontraError::configuration(
            "composite_layer expects matching layer dimensions",
        ));
    }
    for (d, s) in dst.data.chunks_exact_mut(4).zip(layer.data.chunks_exact(4)) {
        let out = over([d[0], d[1], d[2], d[3]], [s[0], s[1], s[2], s[3]], opacity);
        d.copy_from_slice(&out);
    }
    Ok(())
}

/// Draws `src` into `layer`, mapped through `transform` from item-local
/// coordinates `[0,item_w) x [0,item_h)` to canvas coordinates.
///
/// Sampling is inverse-mapped bilinear, clipped to the item rectangle in
/// local space, so scale and rotation never paint source pixels outside the
/// item's own bounds. Output is premultiplied.
pub fn draw_transformed(
    layer: &mut FrameRgba,
    src: &SourcePixels,
    transform: Affine,
    item_w: f64,
    item_h: f64,
) -> MontraResult<()> {
    if item_w <= 0.0 || item_h <= 0.0 {
        return Err(MontraError::configuration(
            "draw_transformed expects a positive item rectangle",
        ));
    }
    let inverse = transform.inverse();

    // Bounding box of the transformed item rect, clamped to the canvas.
    let corners = [
        transform * Point::new(0.0, 0.0),
        transform * Point::new(item_w, 0.0),
        transform * Point::new(0.0, item_h),
        transform * Point::new(item_w, item_h),
    ];
    let min_x = corners.iter().map(|p| p.x).fold(f64::INFINITY, f64::min);
    let max_x = corners
        .iter()
        .map(|p| p.x)
        .fold(f64::NEG_INFINITY, f64::max);
    let min_y = corners.iter().map(|p| p.y).fold(f64::INFINITY, f64::min);
    let max_y = corners
        .iter()
        .map(|p| p.y)
        .fold(f64::NEG_INFINITY, f64::max);

    let x0 = min_x.floor().max(0.0) as u32;
    let y0 = min_y.floor().max(0.0) as u32;
    let x1 = (max_x.ceil().min(f64::from(layer.width)) as u32).min(layer.width);
    let y1 = (max_y.ceil().min(f64::from(layer.height)) as u32).min(layer.height);

    let sx = f64::from(src.width) / item_w;
    let sy = f64::from(src.height) / item_h;

    for py in y0..y1 {
        for px in x0..x1 {
            let local = inverse * Point::new(f64::from(px) + 0.5, f64::from(py) + 0.5);
            if local.x < 0.0 || local.x >= item_w || local.y < 0.0 || local.y >= item_h {
                continue;
            }
            let sample = src.sample_bilinear_premul(local.x * sx - 0.5, local.y * sy - 0.5);
            let idx = ((py * layer.width + px) as usize) * 4;
            let src_px = [
                sample[0].round().clamp(0.0, 255.0) as u8,
                sample[1].round().clamp(0.0, 255.0) as u8,
                sample[2].round().clamp(0.0, 255.0) as u8,
                sample[3].round().clamp(0.0, 255.0) as u8,
            ];
            let dst_px = [
                layer.data[idx],
                layer.data[idx + 1],
                layer.data[idx + 2],
                layer.data[idx + 3],
            ];
            let out = over(dst_px, src_px, 1.0);
            layer.data[idx..idx + 4].copy_from_slice(&out);
        }
    }
    Ok(())
}

/// Flattens premultiplied RGBA onto an opaque background, for handoff to the
/// rawvideo encoder pipe or a PNG dump.
pub fn flatten_opaque(frame: &FrameRgba, bg_rgb: [u8; 3], out: &mut Vec<u8>) {
    out.clear();
    out.reserve(frame.data.len());
    for px in frame.data.chunks_exact(4) {
        let a = u16::from(px[3]);
        if a == 255 {
            out.extend_from_slice(&[px[0], px[1], px[2], 255]);
            continue;
        }
        let inv = 255u16 - a;
        for c in 0..3 {
            let v = u16::from(px[c]) + u16::from(mul_div255(u16::from(bg_rgb[c]), inv));
            out.push(v.min(255) as u8);
        }
        out.push(255);
    }
}

fn mul_div255(x: u16, y: u16) -> u8 {
    (((u32::from(x) * u32::from(y)) + 127) / 255) as u8
}
