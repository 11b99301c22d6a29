//! Sample format conversion helpers for the stream input path.

/// Convert a signed 16-bit sample to `f32`.
pub fn convert_signed_16bit_to_f32(sample: i16) -> f32 {
    sample as f32 / 2f32.powi(15)
}

/// Widen interleaved signed 16-bit samples into per-channel `f32` planes.
///
/// `data` holds native-order interleaved samples; each plane in `planes`
/// receives one channel. Returns the number of whole frames written, which
/// is bounded by the shortest plane.
pub fn widen_interleaved_s16(data: &[u8], planes: &mut [Vec<f32>]) -> usize {
    let channels = planes.len();
    if channels == 0 {
        return 0;
    }

    let frames = data.len() / (2 * channels);
    let frames = planes.iter().fold(frames, |n, plane| n.min(plane.len()));

    let mut samples = data
        .chunks_exact(2)
        .map(|pair| i16::from_ne_bytes([pair[0], pair[1]]));
    for frame in 0..frames {
        for plane in planes.iter_mut() {
            plane[frame] = convert_signed_16bit_to_f32(samples.next().unwrap_or(0));
        }
    }

    frames
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn widens_full_scale_samples() {
        assert_eq!(convert_signed_16bit_to_f32(0), 0.0);
        assert_eq!(convert_signed_16bit_to_f32(i16::MIN), -1.0);
        assert!((convert_signed_16bit_to_f32(i16::MAX) - 1.0).abs() < 1e-4);
    }

    #[test]
    fn deinterleaves_into_planes() {
        let samples: [i16; 6] = [100, -100, 200, -200, 300, -300];
        let mut data = Vec::new();
        for sample in samples {
            data.extend_from_slice(&sample.to_ne_bytes());
        }

        let mut planes = vec![vec![0.0; 3], vec![0.0; 3]];
        let frames = widen_interleaved_s16(&data, &mut planes);

        assert_eq!(frames, 3);
        assert_eq!(planes[0][1], convert_signed_16bit_to_f32(200));
        assert_eq!(planes[1][2], convert_signed_16bit_to_f32(-300));
    }

    #[test]
    fn ignores_trailing_partial_frame() {
        let mut data = Vec::new();
        for sample in [1i16, 2, 3] {
            data.extend_from_slice(&sample.to_ne_bytes());
        }

        let mut planes = vec![vec![0.0; 4], vec![0.0; 4]];
        assert_eq!(widen_interleaved_s16(&data, &mut planes), 1);
    }
}
