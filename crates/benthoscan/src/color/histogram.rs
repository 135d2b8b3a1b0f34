//! Fixed-resolution 3-D color histograms with a sentinel-checked binary
//! file format.
//!
//! Layout (little-endian):
//!
//! ```text
//! u32  CHECKSUM_SENTINEL
//! u32  channel count (must be 3)
//! u32  bins per channel, ×3
//! f32  range start/end per channel, ×6
//! u32  CHECKSUM_SENTINEL
//! f32  bin values, bins[0]·bins[1]·bins[2], row-major, channel-1-major
//! u32  trailing checksum (wrapping sum of all header words)
//! ```
//!
//! Binning geometry is immutable after load; only bin values mutate. Each
//! histogram carries a secondary scratch table that accumulates one image's
//! evidence before being blended into the primary table.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

/// Sentinel word bracketing the header.
pub const CHECKSUM_SENTINEL: u32 = 0x48C0_3301;

/// Number of color channels a histogram file must carry.
pub const CHANNELS: u32 = 3;

// ── Error type ─────────────────────────────────────────────────────────────

/// Errors raised while loading or saving a histogram file.
#[derive(Debug)]
pub enum HistogramError {
    /// Underlying I/O failure.
    Io(std::io::Error),
    /// A sentinel word did not match [`CHECKSUM_SENTINEL`].
    BadSentinel {
        /// Word found in the stream.
        found: u32,
    },
    /// Channel count other than 3.
    BadChannelCount(u32),
    /// Trailing checksum mismatch.
    BadChecksum {
        /// Checksum computed from the header.
        expected: u32,
        /// Checksum found in the stream.
        found: u32,
    },
    /// Zero-sized bin axis.
    EmptyAxis,
}

impl std::fmt::Display for HistogramError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "histogram i/o: {}", e),
            Self::BadSentinel { found } => {
                write!(f, "bad sentinel 0x{:08X}, want 0x{:08X}", found, CHECKSUM_SENTINEL)
            }
            Self::BadChannelCount(n) => write!(f, "channel count {} != 3", n),
            Self::BadChecksum { expected, found } => {
                write!(f, "checksum 0x{:08X} != expected 0x{:08X}", found, expected)
            }
            Self::EmptyAxis => write!(f, "histogram axis with zero bins"),
        }
    }
}

impl std::error::Error for HistogramError {}

impl From<std::io::Error> for HistogramError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

// ── Histogram ──────────────────────────────────────────────────────────────

/// A 3-D binned lookup table over a per-channel value range.
#[derive(Debug, Clone)]
pub struct ColorHistogram {
    bins: [usize; 3],
    range_start: [f32; 3],
    range_end: [f32; 3],
    primary: Vec<f32>,
    scratch: Vec<f32>,
}

impl ColorHistogram {
    /// Create an all-zero histogram with the given binning geometry.
    pub fn new(bins: [usize; 3], range_start: [f32; 3], range_end: [f32; 3]) -> Self {
        let n = bins[0] * bins[1] * bins[2];
        Self {
            bins,
            range_start,
            range_end,
            primary: vec![0.0; n],
            scratch: vec![0.0; n],
        }
    }

    /// Bin counts per channel.
    pub fn bins(&self) -> [usize; 3] {
        self.bins
    }

    /// Per-channel range start.
    pub fn range_start(&self) -> [f32; 3] {
        self.range_start
    }

    /// Per-channel range end.
    pub fn range_end(&self) -> [f32; 3] {
        self.range_end
    }

    /// Raw primary bin values.
    pub fn values(&self) -> &[f32] {
        &self.primary
    }

    fn axis_bin(&self, ch: usize, value: f32) -> usize {
        let lo = self.range_start[ch];
        let hi = self.range_end[ch];
        let span = hi - lo;
        if span <= 0.0 {
            return 0;
        }
        let t = ((value - lo) / span).clamp(0.0, 1.0);
        // Out-of-range values clamp to the edge bins.
        ((t * self.bins[ch] as f32) as usize).min(self.bins[ch] - 1)
    }

    /// Flat index of the bin holding `pixel`, channel-1-major.
    pub fn bin_index(&self, pixel: [f32; 3]) -> usize {
        let b0 = self.axis_bin(0, pixel[0]);
        let b1 = self.axis_bin(1, pixel[1]);
        let b2 = self.axis_bin(2, pixel[2]);
        (b0 * self.bins[1] + b1) * self.bins[2] + b2
    }

    /// Look up the primary value for `pixel`.
    ///
    /// An empty bin carries over the nearest non-empty neighbor along
    /// channel 1 (toward lower bins); if none exists the lookup is 0.
    pub fn value_at(&self, pixel: [f32; 3]) -> f32 {
        let b1 = self.axis_bin(1, pixel[1]);
        let b2 = self.axis_bin(2, pixel[2]);
        let mut b0 = self.axis_bin(0, pixel[0]);
        loop {
            let v = self.primary[(b0 * self.bins[1] + b1) * self.bins[2] + b2];
            if v != 0.0 || b0 == 0 {
                return v;
            }
            b0 -= 1;
        }
    }

    /// Zero the scratch table.
    pub fn clear_scratch(&mut self) {
        self.scratch.fill(0.0);
    }

    /// Accumulate `weight` into the scratch bin holding `pixel`.
    pub fn scratch_add(&mut self, pixel: [f32; 3], weight: f32) {
        let idx = self.bin_index(pixel);
        self.scratch[idx] += weight;
    }

    /// Blend the scratch table into the primary:
    /// `primary = ratio · (scratch · normalizer) + (1 − ratio) · primary`.
    ///
    /// `normalizer` is the (signed) inverse background sample count; the
    /// scratch table holds negative increments, so a negative normalizer
    /// yields positive normalized evidence.
    pub fn blend_scratch(&mut self, ratio: f32, normalizer: f32) {
        if ratio <= 0.0 {
            return;
        }
        let keep = 1.0 - ratio;
        for (p, s) in self.primary.iter_mut().zip(self.scratch.iter()) {
            *p = ratio * (*s * normalizer) + keep * *p;
        }
    }

    // ── Binary I/O ─────────────────────────────────────────────────────────

    /// Load a histogram from a file.
    pub fn load(path: &Path) -> Result<Self, HistogramError> {
        let mut reader = BufReader::new(File::open(path)?);
        Self::from_reader(&mut reader)
    }

    /// Read a histogram from a byte stream.
    pub fn from_reader<R: Read>(reader: &mut R) -> Result<Self, HistogramError> {
        let mut header = [0u32; 12];

        header[0] = read_u32(reader)?;
        if header[0] != CHECKSUM_SENTINEL {
            return Err(HistogramError::BadSentinel { found: header[0] });
        }
        header[1] = read_u32(reader)?;
        if header[1] != CHANNELS {
            return Err(HistogramError::BadChannelCount(header[1]));
        }
        let mut bins = [0usize; 3];
        for (i, bin) in bins.iter_mut().enumerate() {
            header[2 + i] = read_u32(reader)?;
            *bin = header[2 + i] as usize;
            if *bin == 0 {
                return Err(HistogramError::EmptyAxis);
            }
        }
        let mut range_start = [0f32; 3];
        let mut range_end = [0f32; 3];
        for ch in 0..3 {
            header[5 + 2 * ch] = read_u32(reader)?;
            header[6 + 2 * ch] = read_u32(reader)?;
            range_start[ch] = f32::from_bits(header[5 + 2 * ch]);
            range_end[ch] = f32::from_bits(header[6 + 2 * ch]);
        }
        header[11] = read_u32(reader)?;
        if header[11] != CHECKSUM_SENTINEL {
            return Err(HistogramError::BadSentinel { found: header[11] });
        }

        let n = bins[0] * bins[1] * bins[2];
        let mut primary = vec![0f32; n];
        for v in primary.iter_mut() {
            *v = f32::from_bits(read_u32(reader)?);
        }

        let expected = header_checksum(&header);
        let found = read_u32(reader)?;
        if found != expected {
            return Err(HistogramError::BadChecksum { expected, found });
        }

        Ok(Self {
            bins,
            range_start,
            range_end,
            scratch: vec![0.0; n],
            primary,
        })
    }

    /// Save the histogram (primary table only) to a file.
    pub fn save(&self, path: &Path) -> Result<(), HistogramError> {
        let mut writer = BufWriter::new(File::create(path)?);
        self.to_writer(&mut writer)
    }

    /// Write the histogram to a byte stream.
    pub fn to_writer<W: Write>(&self, writer: &mut W) -> Result<(), HistogramError> {
        let mut header = [0u32; 12];
        header[0] = CHECKSUM_SENTINEL;
        header[1] = CHANNELS;
        for i in 0..3 {
            header[2 + i] = self.bins[i] as u32;
        }
        for ch in 0..3 {
            header[5 + 2 * ch] = self.range_start[ch].to_bits();
            header[6 + 2 * ch] = self.range_end[ch].to_bits();
        }
        header[11] = CHECKSUM_SENTINEL;

        for word in header {
            writer.write_all(&word.to_le_bytes())?;
        }
        for v in &self.primary {
            writer.write_all(&v.to_bits().to_le_bytes())?;
        }
        writer.write_all(&header_checksum(&header).to_le_bytes())?;
        Ok(())
    }
}

fn header_checksum(header: &[u32; 12]) -> u32 {
    header.iter().fold(0u32, |acc, w| acc.wrapping_add(*w))
}

fn read_u32<R: Read>(reader: &mut R) -> Result<u32, HistogramError> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_hist() -> ColorHistogram {
        let mut h = ColorHistogram::new([4, 4, 4], [0.0; 3], [255.0; 3]);
        h.primary[0] = 1.5;
        h.primary[21] = -0.75;
        h.primary[63] = 42.0;
        h
    }

    #[test]
    fn round_trip_is_identical() {
        let h = sample_hist();
        let mut buf = Vec::new();
        h.to_writer(&mut buf).unwrap();
        let r = ColorHistogram::from_reader(&mut buf.as_slice()).unwrap();
        assert_eq!(r.bins(), h.bins());
        assert_eq!(r.range_start(), h.range_start());
        assert_eq!(r.range_end(), h.range_end());
        assert_eq!(r.values(), h.values());
    }

    #[test]
    fn corrupt_checksum_fails_load() {
        let h = sample_hist();
        let mut buf = Vec::new();
        h.to_writer(&mut buf).unwrap();
        let last = buf.len() - 1;
        buf[last] ^= 0xFF;
        assert!(matches!(
            ColorHistogram::from_reader(&mut buf.as_slice()),
            Err(HistogramError::BadChecksum { .. })
        ));
    }

    #[test]
    fn bad_channel_count_fails_load() {
        let h = sample_hist();
        let mut buf = Vec::new();
        h.to_writer(&mut buf).unwrap();
        buf[4..8].copy_from_slice(&4u32.to_le_bytes());
        assert!(matches!(
            ColorHistogram::from_reader(&mut buf.as_slice()),
            Err(HistogramError::BadChannelCount(4))
        ));
    }

    #[test]
    fn out_of_range_pixels_clamp_to_edge_bins() {
        let h = ColorHistogram::new([4, 4, 4], [0.0; 3], [255.0; 3]);
        assert_eq!(h.bin_index([-10.0, 0.0, 0.0]), h.bin_index([0.0, 0.0, 0.0]));
        assert_eq!(
            h.bin_index([400.0, 255.0, 255.0]),
            h.bin_index([255.0, 255.0, 255.0])
        );
    }

    #[test]
    fn empty_bin_carries_over_neighbor() {
        let mut h = ColorHistogram::new([4, 2, 2], [0.0; 3], [255.0; 3]);
        // Fill bin (0, 0, 0) only; a lookup landing in (2, 0, 0) walks back.
        h.primary[0] = 3.0;
        assert_eq!(h.value_at([180.0, 10.0, 10.0]), 3.0);
    }

    #[test]
    fn blend_moves_primary_toward_normalized_scratch() {
        let mut h = ColorHistogram::new([2, 1, 1], [0.0; 3], [255.0; 3]);
        h.primary = vec![1.0, 1.0];
        // Negative increments, negative inverse count.
        h.scratch = vec![-8.0, 0.0];
        h.blend_scratch(0.5, -0.25);
        assert!((h.primary[0] - (0.5 * 2.0 + 0.5 * 1.0)).abs() < 1e-6);
        assert!((h.primary[1] - 0.5).abs() < 1e-6);
    }
}
