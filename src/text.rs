use fontdue::Font;

use crate::error::{MontraError, MontraResult};
use crate::raster::SourcePixels;

/// Parses a CSS-style color: `#rgb`, `#rrggbb`, `#rrggbbaa`, or one of the
/// named colors the editor emits. Unknown values are asset errors so a bad
/// color degrades to a placeholder instead of aborting the frame.
pub fn parse_color(value: &str) -> MontraResult<[u8; 4]> {
    let value = value.trim();
    if let Some(hex) = value.strip_prefix('#') {
        return parse_hex(hex)
            .ok_or_else(|| MontraError::asset(format!("invalid hex color '{value}'")));
    }
    match value.to_ascii_lowercase().as_str() {
        "white" => Ok([255, 255, 255, 255]),
        "black" => Ok([0, 0, 0, 255]),
        "red" => Ok([255, 0, 0, 255]),
        "green" => Ok([0, 128, 0, 255]),
        "blue" => Ok([0, 0, 255, 255]),
        "yellow" => Ok([255, 255, 0, 255]),
        "transparent" => Ok([0, 0, 0, 0]),
        other => Err(MontraError::asset(format!("unknown color '{other}'"))),
    }
}

fn parse_hex(hex: &str) -> Option<[u8; 4]> {
    let nibble = |c: u8| char::from(c).to_digit(16).map(|d| d as u8);
    match hex.len() {
        3 => {
            let bytes = hex.as_bytes();
            let mut out = [0u8; 4];
            for (i, &b) in bytes.iter().enumerate() {
                let n = nibble(b)?;
                out[i] = n << 4 | n;
            }
            out[3] = 255;
            Some(out)
        }
        6 | 8 => {
            let mut out = [0u8, 0, 0, 255];
            for (i, pair) in hex.as_bytes().chunks_exact(2).enumerate() {
                out[i] = nibble(pair[0])? << 4 | nibble(pair[1])?;
            }
            Some(out)
        }
        _ => None,
    }
}

/// Rasterizes a single line of text into a straight-alpha RGBA buffer, sized
/// to the rendered extents. The top of the tallest glyph sits at row 0, so
/// drawing the buffer at the item origin gives a top-aligned baseline.
pub fn rasterize_line(
    font: &Font,
    text: &str,
    font_size: f64,
    color: [u8; 4],
) -> MontraResult<SourcePixels> {
    if text.is_empty() {
        return Err(MontraError::asset("text item has no content"));
    }
    if !font_size.is_finite() || font_size <= 0.0 {
        return Err(MontraError::asset("text font size must be > 0"));
    }
    let px = font_size as f32;

    let mut total_width = 0i32;
    let mut max_ascent = 0i32;
    let mut max_descent = 0i32;
    for ch in text.chars() {
        let (metrics, _) = font.rasterize(ch, px);
        let ascent = metrics.height as i32 + metrics.ymin;
        max_ascent = max_ascent.max(ascent);
        max_descent = max_descent.max(-metrics.ymin);
        total_width += metrics.advance_width.round() as i32;
    }

    let width = total_width.max(1) as u32;
    let height = (max_ascent + max_descent).max(1) as u32;
    let mut rgba = vec![0u8; (width as usize) * (height as usize) * 4];

    let mut cursor_x = 0i32;
    for ch in text.chars() {
        let (metrics, bitmap) = font.rasterize(ch, px);
        let glyph_x = cursor_x + metrics.xmin;
        let glyph_y = max_ascent - (metrics.height as i32 + metrics.ymin);

        for gy in 0..metrics.height {
            for gx in 0..metrics.width {
                let coverage = bitmap[gy * metrics.width + gx];
                if coverage == 0 {
                    continue;
                }
                let x = glyph_x + gx as i32;
                let y = glyph_y + gy as i32;
                if x < 0 || x >= width as i32 || y < 0 || y >= height as i32 {
                    continue;
                }
                let idx = ((y as u32 * width + x as u32) as usize) * 4;
                let alpha = (u16::from(coverage) * u16::from(color[3]) / 255) as u8;
                rgba[idx] = color[0];
                rgba[idx + 1] = color[1];
                rgba[idx + 2] = color[2];
                rgba[idx + 3] = rgba[idx + 3].max(alpha);
            }
        }
        cursor_x += metrics.advance_width.round() as i32;
    }

    SourcePixels::new(width, height, rgba)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_colors_parse() {
        assert_eq!(parse_color("#fff").unwrap(), [255, 255, 255, 255]);
        assert_eq!(parse_color("#ff0000").unwrap(), [255, 0, 0, 255]);
        assert_eq!(parse_color("#11223344").unwrap(), [0x11, 0x22, 0x33, 0x44]);
    }

    #[test]
    fn named_colors_parse() {
        assert_eq!(parse_color("White").unwrap(), [255, 255, 255, 255]);
        assert_eq!(parse_color("transparent").unwrap(), [0, 0, 0, 0]);
    }

    #[test]
    fn bad_colors_are_asset_errors() {
        assert!(matches!(
            parse_color("#zz0000"),
            Err(MontraError::Asset(_))
        ));
        assert!(parse_color("chartreuse-ish").is_err());
    }
}
