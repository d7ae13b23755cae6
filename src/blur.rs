use crate::error::{MontraError, MontraResult};
use crate::raster::FrameRgba;

/// Separable gaussian blur over a premultiplied layer, in place.
///
/// `blur_px` follows the CSS `filter: blur(Npx)` convention: sigma is half
/// the pixel radius, the kernel extends to 2 sigma each side. Weights are
/// fixed-point Q16 so the result is bit-identical across platforms.
pub fn blur_layer(layer: &mut FrameRgba, blur_px: f64) -> MontraResult<()> {
    if !blur_px.is_finite() || blur_px < 0.0 {
        return Err(MontraError::configuration("blur radius must be finite and >= 0"));
    }
    let sigma = blur_px / 2.0;
    let radius = (sigma * 2.0).ceil() as u32;
    if radius == 0 {
        return Ok(());
    }

    let kernel = kernel_q16(radius, sigma);
    let w = layer.width as usize;
    let h = layer.height as usize;
    let mut tmp = vec![0u8; layer.data.len()];

    // Horizontal: pixel stride 4, row length w. Vertical: stride w*4.
    convolve(&layer.data, &mut tmp, w, h, 4, w * 4, &kernel);
    convolve(&tmp, &mut layer.data, h, w, w * 4, 4, &kernel);
    Ok(())
}

/// Q16 gaussian weights, normalized so the row sums to exactly 65536 (the
/// residual from rounding is folded into the center tap).
fn kernel_q16(radius: u32, sigma: f64) -> Vec<u32> {
    let r = radius as i32;
    let denom = 2.0 * sigma * sigma;
    let raw: Vec<f64> = (-r..=r).map(|i| (-(f64::from(i).powi(2)) / denom).exp()).collect();
    let sum: f64 = raw.iter().sum();

    let mut weights: Vec<u32> = raw
        .iter()
        .map(|w| ((w / sum) * 65536.0).round().clamp(0.0, 65536.0) as u32)
        .collect();
    let total: i64 = weights.iter().map(|&w| i64::from(w)).sum();
    let mid = weights.len() / 2;
    weights[mid] = (i64::from(weights[mid]) + (65536 - total)).clamp(0, 65536) as u32;
    weights
}

/// One 1-D pass. `lanes` is the number of independent scanlines, `len` the
/// pixels per scanline, `step` the byte stride between neighbors along the
/// convolved axis and `lane_step` the byte stride between scanlines. Edge
/// pixels are clamp-extended.
fn convolve(src: &[u8], dst: &mut [u8], len: usize, lanes: usize, step: usize, lane_step: usize, kernel: &[u32]) {
    let radius = (kernel.len() / 2) as i64;
    for lane in 0..lanes {
        let base = lane * lane_step;
        for i in 0..len {
            let mut acc = [0u64; 4];
            for (ki, &kw) in kernel.iter().enumerate() {
                let j = (i as i64 + ki as i64 - radius).clamp(0, len as i64 - 1) as usize;
                let idx = base + j * step;
                for c in 0..4 {
                    acc[c] += u64::from(kw) * u64::from(src[idx + c]);
                }
            }
            let idx = base + i * step;
            for c in 0..4 {
                dst[idx + c] = (((acc[c] + 32768) >> 16).min(255)) as u8;
            }
        }
    }
}
