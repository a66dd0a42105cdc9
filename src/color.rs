/*!
 # Color space helpers

 The strip only understands hue/saturation, so RGB input is converted here.
*/

use palette::{FromColor, Hsv, Srgb};

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// Converts an RGB triple to hue in degrees (0..360) and saturation in
/// percent (0..=100), both rounded to three decimals.
///
/// Greys, including black and white, map to `(0.0, 0.0)`.
pub fn rgb_to_hs(red: u8, green: u8, blue: u8) -> (f64, f64) {
    let rgb: Srgb<f64> = Srgb::new(red, green, blue).into_format();
    let hsv: Hsv<palette::encoding::Srgb, f64> = Hsv::from_color(rgb);

    // 359.9996 and up would round onto the 360 seam
    let hue = round3(hsv.hue.into_positive_degrees()) % 360.0;
    (hue, round3(hsv.saturation * 100.0))
}
