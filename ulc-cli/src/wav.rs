//! Minimal RIFF/WAVE reading and writing.
//!
//! Supports 16-bit PCM and 32-bit float input; output is written as
//! 16-bit PCM. Samples are kept interleaved in `[-1, 1]` floats.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use ulc_core::{Error, Result};

/// Decoded WAV contents, samples interleaved.
pub struct WavFile {
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<f32>,
}

impl WavFile {
    /// Frames (samples per channel).
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }
}

const FORMAT_PCM: u16 = 1;
const FORMAT_IEEE_FLOAT: u16 = 3;
const FORMAT_EXTENSIBLE: u16 = 0xFFFE;

/// Read a WAV file, converting to float samples.
pub fn read_wav(path: &Path) -> Result<WavFile> {
    let mut r = BufReader::new(File::open(path)?);

    let mut riff = [0u8; 4];
    r.read_exact(&mut riff)?;
    if &riff != b"RIFF" {
        return Err(Error::unsupported("not a RIFF file"));
    }
    let _riff_size = r.read_u32::<LittleEndian>()?;
    let mut wave = [0u8; 4];
    r.read_exact(&mut wave)?;
    if &wave != b"WAVE" {
        return Err(Error::unsupported("not a WAVE file"));
    }

    let mut format: Option<(u16, u16, u32, u16)> = None; // tag, channels, rate, bits
    let mut samples: Option<Vec<f32>> = None;

    // Walk chunks until both fmt and data are seen.
    loop {
        let mut id = [0u8; 4];
        if r.read_exact(&mut id).is_err() {
            break;
        }
        let size = r.read_u32::<LittleEndian>()? as u64;

        match &id {
            b"fmt " => {
                let mut tag = r.read_u16::<LittleEndian>()?;
                let channels = r.read_u16::<LittleEndian>()?;
                let rate = r.read_u32::<LittleEndian>()?;
                let _byte_rate = r.read_u32::<LittleEndian>()?;
                let _block_align = r.read_u16::<LittleEndian>()?;
                let bits = r.read_u16::<LittleEndian>()?;
                let mut consumed = 16u64;
                if tag == FORMAT_EXTENSIBLE && size >= 26 {
                    let _ext_size = r.read_u16::<LittleEndian>()?;
                    let _valid_bits = r.read_u16::<LittleEndian>()?;
                    let _channel_mask = r.read_u32::<LittleEndian>()?;
                    tag = r.read_u16::<LittleEndian>()?;
                    consumed = 26;
                }
                r.seek(SeekFrom::Current(size.saturating_sub(consumed) as i64))?;
                format = Some((tag, channels, rate, bits));
            }
            b"data" => {
                let (tag, _, _, bits) = format
                    .ok_or_else(|| Error::unsupported("data chunk before fmt chunk"))?;
                let mut raw = vec![0u8; size as usize];
                r.read_exact(&mut raw)?;
                samples = Some(convert_samples(&raw, tag, bits)?);
            }
            _ => {
                // Skip unknown chunks, honoring RIFF word alignment.
                r.seek(SeekFrom::Current((size + (size & 1)) as i64))?;
            }
        }
        if format.is_some() && samples.is_some() {
            break;
        }
    }

    let (_, channels, rate, _) =
        format.ok_or_else(|| Error::unsupported("missing fmt chunk"))?;
    let samples = samples.ok_or_else(|| Error::unsupported("missing data chunk"))?;
    if channels == 0 {
        return Err(Error::unsupported("zero channels"));
    }
    Ok(WavFile {
        sample_rate: rate,
        channels,
        samples,
    })
}

fn convert_samples(raw: &[u8], tag: u16, bits: u16) -> Result<Vec<f32>> {
    match (tag, bits) {
        (FORMAT_PCM, 16) => Ok(raw
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32768.0)
            .collect()),
        (FORMAT_IEEE_FLOAT, 32) => Ok(raw
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect()),
        (tag, bits) => Err(Error::unsupported(format!(
            "WAV format tag {tag} at {bits} bits"
        ))),
    }
}

/// Write interleaved float samples as a 16-bit PCM WAV file.
pub fn write_wav(path: &Path, sample_rate: u32, channels: u16, samples: &[f32]) -> Result<()> {
    let mut w = BufWriter::new(File::create(path)?);

    let data_len = (samples.len() * 2) as u32;
    w.write_all(b"RIFF")?;
    w.write_u32::<LittleEndian>(36 + data_len)?;
    w.write_all(b"WAVE")?;

    w.write_all(b"fmt ")?;
    w.write_u32::<LittleEndian>(16)?;
    w.write_u16::<LittleEndian>(FORMAT_PCM)?;
    w.write_u16::<LittleEndian>(channels)?;
    w.write_u32::<LittleEndian>(sample_rate)?;
    w.write_u32::<LittleEndian>(sample_rate * channels as u32 * 2)?;
    w.write_u16::<LittleEndian>(channels * 2)?;
    w.write_u16::<LittleEndian>(16)?;

    w.write_all(b"data")?;
    w.write_u32::<LittleEndian>(data_len)?;
    for &s in samples {
        let v = (s.clamp(-1.0, 1.0) * 32767.0).round() as i16;
        w.write_i16::<LittleEndian>(v)?;
    }
    w.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wav_round_trip() {
        let dir = std::env::temp_dir();
        let path = dir.join("ulc_wav_round_trip.wav");

        let samples: Vec<f32> = (0..200).map(|i| (i as f32 * 0.1).sin() * 0.5).collect();
        write_wav(&path, 22050, 2, &samples).unwrap();

        let wav = read_wav(&path).unwrap();
        assert_eq!(wav.sample_rate, 22050);
        assert_eq!(wav.channels, 2);
        assert_eq!(wav.frames(), 100);
        for (a, b) in wav.samples.iter().zip(samples.iter()) {
            assert!((a - b).abs() < 1.0 / 16384.0);
        }

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_rejects_non_wav() {
        let dir = std::env::temp_dir();
        let path = dir.join("ulc_wav_not_a_wav.bin");
        std::fs::write(&path, b"definitely not RIFF data").unwrap();
        assert!(read_wav(&path).is_err());
        let _ = std::fs::remove_file(&path);
    }
}
