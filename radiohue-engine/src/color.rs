//! Descriptor → color mapping
//!
//! Each descriptor is normalised against its calibration range into a
//! percentile clamped to [0.05, 0.95]. Tempo picks the hue on the half turn
//! starting at 180°, loudness sets saturation and brightness sets lightness.
//! The triple is read as HSLuv and converted to 8-bit sRGB.

use crate::features::RawDescriptorSet;
use chrono::{DateTime, Utc};
use radiohue_common::{Calibration, CalibrationRange, DescriptorKind, StationId};

pub const PERCENTILE_FLOOR: f64 = 0.05;
pub const PERCENTILE_CEILING: f64 = 0.95;

/// Final output of one station's pipeline pass
#[derive(Debug, Clone, PartialEq)]
pub struct ColorResult {
    pub station_id: StationId,
    /// Capture window start
    pub timestamp: DateTime<Utc>,
    pub rgb: [u8; 3],
    pub raw: RawDescriptorSet,
}

/// Position of `value` within `range`, clamped to [0.05, 0.95]
pub fn percentile(value: f64, range: CalibrationRange) -> f64 {
    let pct = (value - range.min) / (range.max - range.min);
    if pct.is_nan() {
        return PERCENTILE_FLOOR;
    }
    pct.clamp(PERCENTILE_FLOOR, PERCENTILE_CEILING)
}

/// Pure mapping from descriptors to an RGB triple
pub fn map_descriptors(descriptors: &RawDescriptorSet, calibration: &Calibration) -> [u8; 3] {
    let pct = |kind: DescriptorKind| percentile(descriptors.value(kind), calibration.range(kind));

    let hue = pct(DescriptorKind::Tempo) * 180.0 + 180.0;
    let saturation = pct(DescriptorKind::Loudness) * 100.0;
    let lightness = pct(DescriptorKind::Brightness) * 100.0;

    hsluv::to_rgb(hue, saturation, lightness)
}

/// Color mapper bound to one calibration
#[derive(Debug, Clone)]
pub struct PerceptualColorMapper {
    calibration: Calibration,
}

impl PerceptualColorMapper {
    pub fn new(calibration: Calibration) -> Self {
        Self { calibration }
    }

    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    pub fn map(&self, descriptors: &RawDescriptorSet) -> [u8; 3] {
        map_descriptors(descriptors, &self.calibration)
    }

    pub fn color_result(
        &self,
        station_id: StationId,
        timestamp: DateTime<Utc>,
        raw: RawDescriptorSet,
    ) -> ColorResult {
        ColorResult {
            station_id,
            timestamp,
            rgb: self.map(&raw),
            raw,
        }
    }
}

/// HSLuv → LCh(uv) → CIELUV → XYZ → sRGB
mod hsluv {
    const M: [[f64; 3]; 3] = [
        [3.240969941904521, -1.537383177570093, -0.498610760293],
        [-0.96924363628087, 1.87596750150772, 0.041555057407175],
        [0.055630079696993, -0.20397695888897, 1.056971514242878],
    ];
    const REF_U: f64 = 0.19783000664283;
    const REF_V: f64 = 0.46831999493879;
    const KAPPA: f64 = 903.2962962;
    const EPSILON: f64 = 0.0088564516;

    /// (slope, intercept) of the six sRGB gamut boundary lines at lightness `l`
    fn bounds(l: f64) -> [(f64, f64); 6] {
        let sub1 = (l + 16.0).powi(3) / 1_560_896.0;
        let sub2 = if sub1 > EPSILON { sub1 } else { l / KAPPA };

        let mut lines = [(0.0, 0.0); 6];
        for (c, [m1, m2, m3]) in M.iter().enumerate() {
            for t in 0..2 {
                let t = t as f64;
                let top1 = (284_517.0 * m1 - 94_839.0 * m3) * sub2;
                let top2 = (838_422.0 * m3 + 769_860.0 * m2 + 731_718.0 * m1) * l * sub2
                    - 769_860.0 * t * l;
                let bottom = (632_260.0 * m3 - 126_452.0 * m2) * sub2 + 126_452.0 * t;
                lines[c * 2 + t as usize] = (top1 / bottom, top2 / bottom);
            }
        }
        lines
    }

    fn max_chroma(l: f64, h: f64) -> f64 {
        let hrad = h.to_radians();
        bounds(l)
            .iter()
            .map(|&(slope, intercept)| intercept / (hrad.sin() - slope * hrad.cos()))
            .filter(|length| *length >= 0.0)
            .fold(f64::MAX, f64::min)
    }

    fn l_to_y(l: f64) -> f64 {
        if l <= 8.0 {
            l / KAPPA
        } else {
            ((l + 16.0) / 116.0).powi(3)
        }
    }

    fn from_linear(c: f64) -> f64 {
        if c <= 0.0031308 {
            12.92 * c
        } else {
            1.055 * c.powf(1.0 / 2.4) - 0.055
        }
    }

    pub(super) fn to_rgb(h: f64, s: f64, l: f64) -> [u8; 3] {
        if l > 99.9999999 {
            return [255, 255, 255];
        }
        if l < 1e-8 {
            return [0, 0, 0];
        }

        let chroma = max_chroma(l, h) / 100.0 * s;
        let hrad = h.to_radians();
        let (u, v) = (chroma * hrad.cos(), chroma * hrad.sin());

        let var_u = u / (13.0 * l) + REF_U;
        let var_v = v / (13.0 * l) + REF_V;
        let y = l_to_y(l);
        let x = -(9.0 * y * var_u) / ((var_u - 4.0) * var_v - var_u * var_v);
        let z = (9.0 * y - 15.0 * var_v * y - var_v * x) / (3.0 * var_v);

        M.map(|[r0, r1, r2]| {
            let linear = r0 * x + r1 * y + r2 * z;
            (from_linear(linear) * 255.0).round().clamp(0.0, 255.0) as u8
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(min: f64, max: f64) -> CalibrationRange {
        CalibrationRange::new(min, max).unwrap()
    }

    fn descriptors(tempo: f64, loudness: f64, brightness: f64) -> RawDescriptorSet {
        RawDescriptorSet {
            tempo_bpm: tempo,
            loudness_lufs: loudness,
            brightness_hz: brightness,
        }
    }

    #[test]
    fn test_percentile_floor_and_ceiling() {
        let r = range(60.0, 140.0);
        assert_eq!(percentile(60.0, r), 0.05);
        assert_eq!(percentile(10.0, r), 0.05);
        assert_eq!(percentile(140.0, r), 0.95);
        assert_eq!(percentile(500.0, r), 0.95);
        assert!((percentile(100.0, r) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_percentile_always_inside_bounds() {
        let ranges = [range(60.0, 140.0), range(-18.0, -7.0), range(400.0, 6000.0), range(0.0, 1e-6)];
        let values = [
            f64::NEG_INFINITY,
            -1e9,
            -18.0,
            -7.5,
            0.0,
            5e-7,
            99.9,
            6000.0,
            1e12,
            f64::INFINITY,
            f64::NAN,
        ];
        for r in ranges {
            for v in values {
                let p = percentile(v, r);
                assert!((PERCENTILE_FLOOR..=PERCENTILE_CEILING).contains(&p), "{} -> {}", v, p);
            }
        }
    }

    #[test]
    fn test_mapping_is_deterministic() {
        let calibration = Calibration::default();
        let set = descriptors(123.4, -9.2, 2750.0);
        let first = map_descriptors(&set, &calibration);
        for _ in 0..10 {
            assert_eq!(map_descriptors(&set, &calibration), first);
        }
    }

    #[test]
    fn test_gray_and_extremes() {
        // Zero saturation at L=50 is the HSLuv mid gray #777777
        assert_eq!(hsluv::to_rgb(0.0, 0.0, 50.0), [119, 119, 119]);
        assert_eq!(hsluv::to_rgb(270.0, 80.0, 100.0), [255, 255, 255]);
        assert_eq!(hsluv::to_rgb(270.0, 80.0, 0.0), [0, 0, 0]);
    }

    #[test]
    fn test_reference_red() {
        let [r, g, b] = hsluv::to_rgb(12.177050630061776, 100.0, 53.23711559542933);
        assert!(r >= 254 && g <= 1 && b <= 1, "got {:?}", (r, g, b));
    }

    #[test]
    fn test_out_of_range_inputs_match_clamped_inputs() {
        let calibration = Calibration::default();
        let low = map_descriptors(&descriptors(0.0, -60.0, 0.0), &calibration);
        let at_min = map_descriptors(&descriptors(60.0, -18.0, 400.0), &calibration);
        assert_eq!(low, at_min);

        let high = map_descriptors(&descriptors(300.0, 0.0, 20000.0), &calibration);
        let at_max = map_descriptors(&descriptors(140.0, -7.0, 6000.0), &calibration);
        assert_eq!(high, at_max);
    }

    #[test]
    fn test_color_result_carries_raw_values() {
        let mapper = PerceptualColorMapper::new(Calibration::default());
        let station = StationId::new("KUTX").unwrap();
        let raw = descriptors(100.0, -12.0, 3000.0);
        let result = mapper.color_result(station.clone(), Utc::now(), raw);
        assert_eq!(result.station_id, station);
        assert_eq!(result.raw, raw);
        assert_eq!(result.rgb, mapper.map(&raw));
    }
}
