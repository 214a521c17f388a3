//! Composite frame layout shared by the encoder side and the GPU passes.
//!
//! A composite frame of `W x H` texels packs the color image in its left half,
//! a hue-encoded depth map in the top-right quadrant and a grid of binary
//! metadata cells in the bottom-right quadrant. The helpers here mirror the
//! decode kernels on the host so frames can be synthesised and checked without
//! a GPU.

use image::{Rgba, RgbaImage};

use crate::types::{Metadata, METADATA_WORDS};

/// Edge length of a metadata cell in texels.
pub const METADATA_CELL: u32 = 8;
/// One column of cells per bit of a 32-bit word.
pub const METADATA_BITS: u32 = 32;
/// Hue value mapped onto the far end of the depth range.
pub const DEPTH_HUE_SPAN: f32 = 0.8;
/// Texels whose brightest channel falls below this carry no depth.
pub const DEPTH_VALID_THRESHOLD: f32 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompositeLayout {
    pub width: u32,
    pub height: u32,
}

impl CompositeLayout {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn color_extent(&self) -> (u32, u32) {
        (self.width / 2, self.height)
    }

    pub fn depth_extent(&self) -> (u32, u32) {
        (self.width / 2, self.height / 2)
    }

    pub fn metadata_origin(&self) -> (u32, u32) {
        (self.width / 2, self.height / 2)
    }

    /// Whether the metadata grid fits inside the bottom-right quadrant.
    pub fn fits_metadata(&self) -> bool {
        let (x0, y0) = self.metadata_origin();
        let grid_width = METADATA_BITS * METADATA_CELL;
        let grid_height = METADATA_WORDS as u32 * METADATA_CELL;
        x0 + grid_width <= self.width && y0 + grid_height <= self.height
    }

    /// Texel sampled for bit `column` of word `row`.
    pub fn cell_center(&self, row: u32, column: u32) -> (u32, u32) {
        let (x0, y0) = self.metadata_origin();
        (
            x0 + column * METADATA_CELL + METADATA_CELL / 2,
            y0 + row * METADATA_CELL + METADATA_CELL / 2,
        )
    }
}

/// Rec. 709 luminance, matching the decode kernel.
pub fn luminance(rgb: [f32; 3]) -> f32 {
    0.2126 * rgb[0] + 0.7152 * rgb[1] + 0.0722 * rgb[2]
}

pub fn hue_to_rgb(hue: f32) -> [f32; 3] {
    let h = hue.rem_euclid(1.0) * 6.0;
    let x = 1.0 - ((h % 2.0) - 1.0).abs();
    match h as u32 {
        0 => [1.0, x, 0.0],
        1 => [x, 1.0, 0.0],
        2 => [0.0, 1.0, x],
        3 => [0.0, x, 1.0],
        4 => [x, 0.0, 1.0],
        _ => [1.0, 0.0, x],
    }
}

pub fn rgb_to_hue(rgb: [f32; 3]) -> f32 {
    let [r, g, b] = rgb;
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;
    if delta <= 1e-5 {
        return 0.0;
    }
    let h = if max == r {
        ((g - b) / delta).rem_euclid(6.0)
    } else if max == g {
        (b - r) / delta + 2.0
    } else {
        (r - g) / delta + 4.0
    };
    h / 6.0
}

/// Encodes a depth value as a fully saturated hue. Depths outside `range`
/// (including zero) encode as black, i.e. "no depth".
pub fn encode_depth(depth: f32, range: [f32; 2]) -> [u8; 3] {
    let [near, far] = range;
    if !(depth >= near && depth <= far) || far <= near {
        return [0, 0, 0];
    }
    let hue = (depth - near) / (far - near) * DEPTH_HUE_SPAN;
    let rgb = hue_to_rgb(hue);
    rgb.map(|c| (c * 255.0).round() as u8)
}

/// Host mirror of the depth demux pass.
pub fn decode_depth(rgb: [u8; 3], range: [f32; 2]) -> f32 {
    let rgb = rgb.map(|c| c as f32 / 255.0);
    if rgb[0].max(rgb[1]).max(rgb[2]) < DEPTH_VALID_THRESHOLD {
        return 0.0;
    }
    let t = (rgb_to_hue(rgb) / DEPTH_HUE_SPAN).clamp(0.0, 1.0);
    range[0] + (range[1] - range[0]) * t
}

/// Paints the metadata cells of `record` into `frame`.
pub fn write_metadata(frame: &mut RgbaImage, record: &Metadata) {
    let layout = CompositeLayout::new(frame.width(), frame.height());
    if !layout.fits_metadata() {
        tracing::warn!(
            width = frame.width(),
            height = frame.height(),
            "frame too small for metadata cells"
        );
        return;
    }
    let (x0, y0) = layout.metadata_origin();
    for (row, word) in record.to_words().iter().enumerate() {
        for column in 0..METADATA_BITS {
            let bit = (word >> (METADATA_BITS - 1 - column)) & 1;
            let value = if bit == 1 { 255 } else { 0 };
            let cell_x = x0 + column * METADATA_CELL;
            let cell_y = y0 + row as u32 * METADATA_CELL;
            for y in cell_y..cell_y + METADATA_CELL {
                for x in cell_x..cell_x + METADATA_CELL {
                    frame.put_pixel(x, y, Rgba([value, value, value, 255]));
                }
            }
        }
    }
}

/// Host mirror of the metadata decode kernel.
pub fn read_metadata(frame: &RgbaImage) -> Option<Metadata> {
    let layout = CompositeLayout::new(frame.width(), frame.height());
    if !layout.fits_metadata() {
        return None;
    }
    let mut words = [0u32; METADATA_WORDS];
    for (row, word) in words.iter_mut().enumerate() {
        for column in 0..METADATA_BITS {
            let (x, y) = layout.cell_center(row as u32, column);
            let texel = frame.get_pixel(x, y).0;
            let rgb = [texel[0], texel[1], texel[2]].map(|c| c as f32 / 255.0);
            if luminance(rgb) > 0.5 {
                *word |= 1 << (METADATA_BITS - 1 - column);
            }
        }
    }
    Some(Metadata::from_words(words))
}

/// Builds a composite frame from per-texel color and depth callbacks.
///
/// `color(x, y)` is queried over the color extent, `depth(x, y)` over the depth
/// extent; both use a top-left origin.
pub fn compose_frame<C, D>(
    width: u32,
    height: u32,
    record: &Metadata,
    mut color: C,
    mut depth: D,
) -> RgbaImage
where
    C: FnMut(u32, u32) -> [u8; 3],
    D: FnMut(u32, u32) -> f32,
{
    let layout = CompositeLayout::new(width, height);
    let mut frame = RgbaImage::from_pixel(width, height, Rgba([0, 0, 0, 255]));

    let (color_width, color_height) = layout.color_extent();
    for y in 0..color_height {
        for x in 0..color_width {
            let [r, g, b] = color(x, y);
            frame.put_pixel(x, y, Rgba([r, g, b, 255]));
        }
    }

    let (depth_width, depth_height) = layout.depth_extent();
    for y in 0..depth_height {
        for x in 0..depth_width {
            let [r, g, b] = encode_depth(depth(x, y), record.depth_range);
            frame.put_pixel(color_width + x, y, Rgba([r, g, b, 255]));
        }
    }

    write_metadata(&mut frame, record);
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extents_follow_the_layout_contract() {
        let layout = CompositeLayout::new(1920, 1080);
        assert_eq!(layout.color_extent(), (960, 1080));
        assert_eq!(layout.depth_extent(), (960, 540));
        assert_eq!(layout.metadata_origin(), (960, 540));
        assert!(layout.fits_metadata());
        assert!(!CompositeLayout::new(256, 256).fits_metadata());
    }

    #[test]
    fn depth_survives_hue_quantisation() {
        let range = [0.25, 5.0];
        for step in 0..=20 {
            let depth = 0.25 + 4.75 * step as f32 / 20.0;
            let decoded = decode_depth(encode_depth(depth, range), range);
            assert!(
                (decoded - depth).abs() < 0.02,
                "depth {depth} decoded as {decoded}"
            );
        }
    }

    #[test]
    fn dark_texels_carry_no_depth() {
        assert_eq!(decode_depth([0, 0, 0], [0.5, 4.0]), 0.0);
        assert_eq!(decode_depth([20, 10, 5], [0.5, 4.0]), 0.0);
        assert_eq!(encode_depth(0.0, [0.5, 4.0]), [0, 0, 0]);
    }

    #[test]
    fn metadata_cells_decode_to_the_written_record() {
        let record = Metadata {
            camera_position: [1.5, -2.25, 0.125],
            camera_rotation: [0.0, 0.38268343, 0.0, 0.9238795],
            center_shift: [0.01, -0.02],
            field_of_view: 0.9,
            depth_range: [0.2, 8.0],
            reserved: [0.0; 4],
        };
        let frame = compose_frame(640, 360, &record, |_, _| [128, 64, 32], |_, _| 1.0);
        assert_eq!(read_metadata(&frame), Some(record));
    }

    #[test]
    fn compose_places_color_and_depth_quadrants() {
        let record = Metadata::default();
        let frame = compose_frame(
            640,
            360,
            &record,
            |x, _| [(x % 256) as u8, 0, 0],
            |_, _| record.depth_range[0],
        );
        assert_eq!(frame.get_pixel(10, 300).0, [10, 0, 0, 255]);
        let depth_texel = frame.get_pixel(330, 10).0;
        assert_eq!([depth_texel[0], depth_texel[1], depth_texel[2]], [255, 0, 0]);
    }
}
