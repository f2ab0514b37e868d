/// Sample rate and channel count of the interleaved i16 samples handed to
/// [`StreamHandler::samples`](crate::StreamHandler::samples).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u8,
}

impl AudioFormat {
    pub fn new(sample_rate: u32, channels: u8) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }
}

/// Converts one float sample in `[-1.0, 1.0]` to i16.
///
/// Negative values scale by 32768 and positive ones by 32767, so both ends of
/// the range are reachable: `1.0 → 32767`, `-1.0 → -32768`. Out of range
/// values saturate.
pub fn f32_to_i16(sample: f32) -> i16 {
    let scaled = if sample < 0.0 {
        sample * 32768.0
    } else {
        sample * 32767.0
    };
    // `as` saturates float → int and maps NaN to 0
    scaled.round() as i16
}

/// Interleaves `frames` frames of planar float PCM starting at `offset` into `out`.
///
/// `out` is cleared first; it ends up holding `frames * planes.len()` samples.
pub fn interleave_f32(planes: &[Vec<f32>], offset: usize, frames: usize, out: &mut Vec<i16>) {
    out.clear();
    out.reserve(frames * planes.len());
    for frame in offset..offset + frames {
        for plane in planes {
            out.push(f32_to_i16(plane[frame]));
        }
    }
}

/// Duplicates a mono block into interleaved stereo.
pub(crate) fn mono_to_stereo(samples: &[i16], out: &mut Vec<i16>) {
    out.clear();
    out.reserve(samples.len() * 2);
    for &s in samples {
        out.push(s);
        out.push(s);
    }
}
