/*!
 # Findn LED wire protocol

 Builds the fixed-layout frames the strip accepts on its write characteristic.
 Every frame starts with `0xBC`, carries a command id and a payload length, and
 ends with the `0x55` trailer. Multi-byte values are big-endian.
*/

use std::fmt;

use uuid::Uuid;

use crate::{color, Error, Result};

/// Write characteristic used when no override is configured
pub const DEFAULT_WRITE_CHARACTERISTIC: Uuid =
    Uuid::from_u128(0x0000ffe1_0000_1000_8000_00805f9b34fb);

const HEADER: u8 = 0xBC;
const TRAILER: u8 = 0x55;

const CMD_POWER: u8 = 0x01;
const CMD_HS_COLOR: u8 = 0x04;
const CMD_BRIGHTNESS: u8 = 0x05;
const CMD_EFFECT: u8 = 0x06;
const CMD_EFFECT_DIRECTION: u8 = 0x07;

const TURN_ON: [u8; 5] = [HEADER, CMD_POWER, 0x01, 0x01, TRAILER];
const TURN_OFF: [u8; 5] = [HEADER, CMD_POWER, 0x01, 0x00, TRAILER];

/// Brightness range accepted from callers
pub const BRIGHTNESS_RANGE: (u8, u8) = (1, 255);
/// Brightness range understood by the strip
pub const SCALED_BRIGHTNESS_RANGE: (u16, u16) = (100, 1000);

/// Largest effect magnitude that fits the two-byte field
pub const MAX_EFFECT_MAGNITUDE: u32 = u16::MAX as u32;

/// One byte sequence written to the strip in a single GATT write
#[derive(Clone, PartialEq, Eq)]
pub struct Frame(Vec<u8>);

impl Frame {
    fn new(bytes: &[u8]) -> Self {
        Frame(bytes.to_vec())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

fn split(value: u16) -> [u8; 2] {
    value.to_be_bytes()
}

/// Frame that powers the strip on
pub fn turn_on() -> Frame {
    Frame::new(&TURN_ON)
}

/// Frame that powers the strip off
pub fn turn_off() -> Frame {
    Frame::new(&TURN_OFF)
}

/// Linearly maps a 1..=255 brightness onto the strip's 100..=1000 scale.
pub fn scale_brightness(level: u8) -> Result<u16> {
    let (low, high) = BRIGHTNESS_RANGE;
    if level < low {
        return Err(Error::ValueOutOfRange(level as u32, low as u32, high as u32));
    }
    let (scaled_low, scaled_high) = SCALED_BRIGHTNESS_RANGE;
    let ratio = (level - low) as f64 / (high - low) as f64;
    let scaled = scaled_low as f64 + ratio * (scaled_high - scaled_low) as f64;
    Ok(scaled.round() as u16)
}

/// Builds the brightness frame.
///
/// `0xBC 0x05 0x06 hi lo 0x00 0x00 0x00 0x00 0x55`, where `hi/lo` is the
/// scaled brightness.
pub fn set_brightness(level: u8) -> Result<Frame> {
    let [hi, lo] = split(scale_brightness(level)?);
    Ok(Frame::new(&[
        HEADER,
        CMD_BRIGHTNESS,
        0x06,
        hi,
        lo,
        0x00,
        0x00,
        0x00,
        0x00,
        TRAILER,
    ]))
}

/// Builds the color frame from hue in degrees and saturation in percent.
///
/// `0xBC 0x04 0x06 hue_hi hue_lo sat_hi sat_lo 0x00 0x00 0x55`, with the
/// saturation scaled to 0..=1000.
pub fn set_hs_color(hue: f64, saturation: f64) -> Result<Frame> {
    if !(0.0..=360.0).contains(&hue) || !(0.0..=100.0).contains(&saturation) {
        return Err(Error::InvalidColor { hue, saturation });
    }
    Ok(hs_frame(hue, saturation))
}

/// Builds the color frame from an RGB triple.
pub fn set_rgb_color(red: u8, green: u8, blue: u8) -> Frame {
    let (hue, saturation) = color::rgb_to_hs(red, green, blue);
    hs_frame(hue, saturation)
}

fn hs_frame(hue: f64, saturation: f64) -> Frame {
    let [hue_hi, hue_lo] = split(hue.round() as u16);
    let [sat_hi, sat_lo] = split((saturation * 10.0).round() as u16);
    Frame::new(&[
        HEADER,
        CMD_HS_COLOR,
        0x06,
        hue_hi,
        hue_lo,
        sat_hi,
        sat_lo,
        0x00,
        0x00,
        TRAILER,
    ])
}

/// Builds the two frames that select an effect.
///
/// The sign picks the direction (positive runs forward), the magnitude picks
/// the effect. Both frames must be written, in order.
pub fn set_effect(effect: i32) -> Result<[Frame; 2]> {
    let magnitude = effect.unsigned_abs();
    if magnitude > MAX_EFFECT_MAGNITUDE {
        return Err(Error::InvalidEffect(format!(
            "{effect} exceeds magnitude {MAX_EFFECT_MAGNITUDE}"
        )));
    }
    let direction = u8::from(effect > 0);
    let [hi, lo] = split(magnitude as u16);
    Ok([
        Frame::new(&[HEADER, CMD_EFFECT, 0x02, hi, lo, TRAILER]),
        Frame::new(&[HEADER, CMD_EFFECT_DIRECTION, 0x01, direction, TRAILER]),
    ])
}

/// Parses an effect given as text.
///
/// Accepts an optional sign and a `0x`, `0o` or `0b` radix prefix, with `_`
/// digit separators. Plain decimals may not carry leading zeros.
pub fn parse_effect(text: &str) -> Result<i32> {
    let invalid = || Error::InvalidEffect(text.to_string());
    let trimmed = text.trim();
    let (negative, unsigned) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };
    let lower = unsigned.to_ascii_lowercase();
    let (radix, digits) = if let Some(rest) = lower.strip_prefix("0x") {
        (16, rest)
    } else if let Some(rest) = lower.strip_prefix("0o") {
        (8, rest)
    } else if let Some(rest) = lower.strip_prefix("0b") {
        (2, rest)
    } else {
        if lower.len() > 1
            && lower.starts_with('0')
            && lower.chars().any(|c| c != '0' && c != '_')
        {
            return Err(invalid());
        }
        (10, lower.as_str())
    };
    if digits.is_empty()
        || digits.starts_with('_')
        || digits.ends_with('_')
        || digits.contains("__")
        || !digits.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(invalid());
    }
    let cleaned: String = digits.chars().filter(|c| *c != '_').collect();
    let magnitude = i64::from_str_radix(&cleaned, radix).map_err(|_| invalid())?;
    let value = if negative { -magnitude } else { magnitude };
    if value.unsigned_abs() > MAX_EFFECT_MAGNITUDE as u64 {
        return Err(Error::InvalidEffect(format!(
            "{text} exceeds magnitude {MAX_EFFECT_MAGNITUDE}"
        )));
    }
    Ok(value as i32)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn unscale(scaled: u16) -> f64 {
        1.0 + (scaled as f64 - 100.0) * 254.0 / 900.0
    }

    #[test]
    fn power_frames_are_fixed() {
        assert_eq!(turn_on().as_bytes(), &[0xBC, 0x01, 0x01, 0x01, 0x55]);
        assert_eq!(turn_off().as_bytes(), &[0xBC, 0x01, 0x01, 0x00, 0x55]);
    }

    #[test]
    fn brightness_frame_layout_and_scale() {
        for level in 1..=255u8 {
            let frame = set_brightness(level).unwrap();
            let bytes = frame.as_bytes();
            assert_eq!(bytes.len(), 10);
            assert_eq!(bytes[..3], [0xBC, 0x05, 0x06]);
            assert_eq!(bytes[5..], [0, 0, 0, 0, 0x55]);
            let scaled = u16::from_be_bytes([bytes[3], bytes[4]]);
            assert!((100..=1000).contains(&scaled));
            assert!((unscale(scaled) - level as f64).abs() <= 1.0, "level {level}");
        }
    }

    #[test]
    fn brightness_endpoints() {
        assert_eq!(scale_brightness(1).unwrap(), 100);
        assert_eq!(scale_brightness(128).unwrap(), 550);
        assert_eq!(scale_brightness(255).unwrap(), 1000);
        assert_eq!(
            set_brightness(128).unwrap().as_bytes(),
            &[0xBC, 0x05, 0x06, 0x02, 0x26, 0, 0, 0, 0, 0x55]
        );
    }

    #[test]
    fn brightness_zero_is_rejected() {
        assert_eq!(set_brightness(0), Err(Error::ValueOutOfRange(0, 1, 255)));
    }

    fn hs_fields(frame: &Frame) -> (u16, u16) {
        let bytes = frame.as_bytes();
        assert_eq!(bytes.len(), 10);
        assert_eq!(bytes[..3], [0xBC, 0x04, 0x06]);
        assert_eq!(bytes[7..], [0, 0, 0x55]);
        (
            u16::from_be_bytes([bytes[3], bytes[4]]),
            u16::from_be_bytes([bytes[5], bytes[6]]),
        )
    }

    #[test]
    fn hs_fields_round_half_away_from_zero() {
        assert_eq!(hs_fields(&set_hs_color(0.5, 12.25).unwrap()), (1, 123));
        assert_eq!(hs_fields(&set_hs_color(12.5, 0.0).unwrap()), (13, 0));
        assert_eq!(hs_fields(&set_hs_color(359.5, 100.0).unwrap()), (360, 1000));
        assert_eq!(hs_fields(&set_hs_color(360.0, 50.0).unwrap()), (360, 500));
    }

    proptest! {
        #[test]
        fn hs_frame_fields(hue in 0.0f64..=360.0, saturation in 0.0f64..=100.0) {
            let (hue_field, sat_field) = hs_fields(&set_hs_color(hue, saturation).unwrap());
            prop_assert_eq!(hue_field, hue.round() as u16);
            prop_assert!((hue_field as f64 - hue).abs() <= 0.5);
            prop_assert!(hue_field <= 360);
            prop_assert_eq!(sat_field, (saturation * 10.0).round() as u16);
            prop_assert!(sat_field <= 1000);
        }

        #[test]
        fn brightness_round_trips_within_one_step(level in 1u8..=254) {
            let scaled = scale_brightness(level).unwrap();
            let next = scale_brightness(level + 1).unwrap();
            prop_assert!(scaled < next);
            prop_assert!((unscale(scaled) - level as f64).abs() <= 1.0);
        }

        #[test]
        fn effect_frames_encode_direction_and_magnitude(effect in -65_535i32..=65_535) {
            let [select, direction] = set_effect(effect).unwrap();
            let select = select.as_bytes();
            prop_assert_eq!(&select[..3], &[0xBC, 0x06, 0x02][..]);
            prop_assert_eq!(select[5], 0x55);
            prop_assert_eq!(
                u16::from_be_bytes([select[3], select[4]]) as u32,
                effect.unsigned_abs()
            );
            prop_assert_eq!(
                direction.as_bytes(),
                &[0xBC, 0x07, 0x01, u8::from(effect > 0), 0x55][..]
            );
        }

        #[test]
        fn oversized_effects_never_encode(
            effect in prop_oneof![i32::MIN..-65_535, 65_536..=i32::MAX]
        ) {
            prop_assert!(matches!(set_effect(effect), Err(Error::InvalidEffect(_))));
        }

        #[test]
        fn effect_text_round_trips(effect in -65_535i32..=65_535) {
            let sign = if effect < 0 { "-" } else { "" };
            let magnitude = effect.unsigned_abs();
            prop_assert_eq!(parse_effect(&effect.to_string()).unwrap(), effect);
            prop_assert_eq!(parse_effect(&format!("{sign}0x{magnitude:x}")).unwrap(), effect);
            prop_assert_eq!(parse_effect(&format!("{sign}0b{magnitude:b}")).unwrap(), effect);
        }
    }

    #[test]
    fn hs_out_of_range_is_rejected() {
        assert!(matches!(set_hs_color(361.0, 10.0), Err(Error::InvalidColor { .. })));
        assert!(matches!(set_hs_color(10.0, -0.5), Err(Error::InvalidColor { .. })));
        assert!(matches!(set_hs_color(f64::NAN, 10.0), Err(Error::InvalidColor { .. })));
    }

    #[test]
    fn rgb_goes_through_hs() {
        assert_eq!(set_rgb_color(0, 255, 0), set_hs_color(120.0, 100.0).unwrap());
        assert_eq!(set_rgb_color(255, 255, 255), set_hs_color(0.0, 0.0).unwrap());
    }

    #[test]
    fn negative_effect_runs_backwards() {
        let [select, direction] = set_effect(-3).unwrap();
        assert_eq!(select.as_bytes(), &[0xBC, 0x06, 0x02, 0x00, 0x03, 0x55]);
        assert_eq!(direction.as_bytes(), &[0xBC, 0x07, 0x01, 0x00, 0x55]);
    }

    #[test]
    fn positive_effect_runs_forwards() {
        let [select, direction] = set_effect(300).unwrap();
        assert_eq!(select.as_bytes(), &[0xBC, 0x06, 0x02, 0x01, 0x2C, 0x55]);
        assert_eq!(direction.as_bytes(), &[0xBC, 0x07, 0x01, 0x01, 0x55]);

        let [select, direction] = set_effect(0).unwrap();
        assert_eq!(select.as_bytes(), &[0xBC, 0x06, 0x02, 0x00, 0x00, 0x55]);
        assert_eq!(direction.as_bytes()[3], 0);
    }

    #[test]
    fn oversized_effect_is_rejected() {
        assert!(set_effect(65_535).is_ok());
        assert!(matches!(set_effect(-65_536), Err(Error::InvalidEffect(_))));
    }

    #[test]
    fn parses_effect_notations() {
        assert_eq!(parse_effect("5").unwrap(), 5);
        assert_eq!(parse_effect(" -3 ").unwrap(), -3);
        assert_eq!(parse_effect("0x10").unwrap(), 16);
        assert_eq!(parse_effect("-0X1f").unwrap(), -31);
        assert_eq!(parse_effect("0o17").unwrap(), 15);
        assert_eq!(parse_effect("0b101").unwrap(), 5);
        assert_eq!(parse_effect("1_000").unwrap(), 1000);
        assert_eq!(parse_effect("0").unwrap(), 0);
        assert_eq!(parse_effect("00").unwrap(), 0);
    }

    #[test]
    fn rejects_bad_effect_text() {
        for text in ["", "-", "--3", "0x", "012", "abc", "1__0", "_1", "0x1_", "70000"] {
            assert!(parse_effect(text).is_err(), "{text:?}");
        }
    }

    #[test]
    fn frame_debug_is_hex() {
        assert_eq!(format!("{:?}", turn_on()), "bc01010155");
    }
}
