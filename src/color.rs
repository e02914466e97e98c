use palette::{IntoColor, Lab, Srgb};

const LUMA_R: f32 = 0.299;
const LUMA_G: f32 = 0.587;
const LUMA_B: f32 = 0.114;

/// Approximate luminance, normalized to [0, 1].
#[inline]
pub fn luminance(rgb: [u8; 3]) -> f32 {
    (LUMA_R * rgb[0] as f32 + LUMA_G * rgb[1] as f32 + LUMA_B * rgb[2] as f32) / 255.0
}

/// sRGB (8 bit) to CIE L*a*b* (D65), L in [0, 100].
pub fn rgb_to_lab(rgb: [u8; 3]) -> Lab {
    let linear = Srgb::new(rgb[0], rgb[1], rgb[2])
        .into_format::<f32>()
        .into_linear();
    linear.into_color()
}

/// L*a*b* back to 8 bit sRGB, out-of-gamut values clamped.
pub fn lab_to_rgb(lab: Lab) -> [u8; 3] {
    let rgb: Srgb<f32> = Srgb::from_linear(lab.into_color());
    let srgb = rgb.into_format::<u8>();
    [srgb.red, srgb.green, srgb.blue]
}

#[inline]
pub fn distance_sq(a: [f32; 3], b: [f32; 3]) -> f32 {
    let dr = a[0] - b[0];
    let dg = a[1] - b[1];
    let db = a[2] - b[2];
    dr * dr + dg * dg + db * db
}

#[inline]
pub fn to_f32(rgb: [u8; 3]) -> [f32; 3] {
    [rgb[0] as f32, rgb[1] as f32, rgb[2] as f32]
}

#[inline]
pub fn to_u8(rgb: [f32; 3]) -> [u8; 3] {
    [
        rgb[0].round().clamp(0.0, 255.0) as u8,
        rgb[1].round().clamp(0.0, 255.0) as u8,
        rgb[2].round().clamp(0.0, 255.0) as u8,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn luminance_bounds() {
        assert_eq!(luminance([0, 0, 0]), 0.0);
        assert!((luminance([255, 255, 255]) - 1.0).abs() < 1e-5);
        assert!(luminance([0, 255, 0]) > luminance([255, 0, 0]));
    }

    #[test]
    fn lab_round_trip_within_one_unit() {
        for rgb in [[0, 0, 0], [255, 255, 255], [128, 128, 128], [255, 0, 0], [12, 200, 77]] {
            let back = lab_to_rgb(rgb_to_lab(rgb));
            for c in 0..3 {
                assert!(
                    (back[c] as i32 - rgb[c] as i32).abs() <= 1,
                    "{rgb:?} came back as {back:?}"
                );
            }
        }
    }

    #[test]
    fn lab_lightness_scale() {
        assert!(rgb_to_lab([0, 0, 0]).l.abs() < 0.01);
        assert!((rgb_to_lab([255, 255, 255]).l - 100.0).abs() < 0.1);
    }
}
