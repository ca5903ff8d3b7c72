//! Per-cylinder-count crank angle tables.

use crate::config::{Cylinders, EngineType, Strokes};

/// Channels needed when one event serves both halves of a 4-stroke cycle.
///
/// Even cylinder counts pair up (two cylinders 360 degrees apart share a
/// channel); odd counts and 2-stroke engines need one channel per cylinder.
pub const fn half_cycle_channels(cylinders: Cylinders, strokes: Strokes) -> u8 {
    let count = cylinders.count();
    match strokes {
        Strokes::Four if cylinders.is_even() => count / 2,
        _ => count,
    }
}

/// Evenly spaced angle of channel `index` among `channels` over `span` degrees.
pub const fn even_angle(index: u8, channels: u8, span: u16) -> u16 {
    if channels == 0 {
        return 0;
    }
    (index as u16) * span / (channels as u16)
}

/// Replaces the even angle of channels 2-4 with the configured odd-fire
/// offset, folded into `domain`.
pub const fn apply_engine_type(
    angle: u16,
    index: u8,
    engine_type: EngineType,
    domain: u16,
) -> u16 {
    match engine_type {
        EngineType::OddFire { angles } if index >= 1 && index <= 3 && domain > 0 => {
            angles[(index - 1) as usize] % domain
        }
        _ => angle,
    }
}

/// Leading/trailing angle layout for two rotors: channels 1-2 lead, 3-4 trail.
pub const ROTARY_ANGLES: [u16; 4] = [0, 180, 0, 180];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequential_tables_span_the_full_cycle() {
        let five: [u16; 5] = core::array::from_fn(|i| even_angle(u8::try_from(i).unwrap(), 5, 720));
        assert_eq!(five, [0, 144, 288, 432, 576]);
        let four: [u16; 4] = core::array::from_fn(|i| even_angle(u8::try_from(i).unwrap(), 4, 720));
        assert_eq!(four, [0, 180, 360, 540]);
    }

    #[test]
    fn half_cycle_channel_counts() {
        assert_eq!(half_cycle_channels(Cylinders::Eight, Strokes::Four), 4);
        assert_eq!(half_cycle_channels(Cylinders::Three, Strokes::Four), 3);
        assert_eq!(half_cycle_channels(Cylinders::Four, Strokes::Two), 4);
    }

    #[test]
    fn odd_fire_offsets_fold_into_domain() {
        let engine_type = EngineType::OddFire {
            angles: [270, 450, 720],
        };
        assert_eq!(apply_engine_type(180, 1, engine_type, 720), 270);
        assert_eq!(apply_engine_type(180, 2, engine_type, 360), 90);
        assert_eq!(apply_engine_type(0, 0, engine_type, 360), 0);
    }
}
