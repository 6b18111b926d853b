//! ULC command-line front end: WAV in, ULC stream out, and back.

mod wav;

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use clap::{Parser, Subcommand};
use tracing::{debug, info};
use ulc_codec::{UlcDecoder, UlcEncoder, UlcEncoderConfig};
use ulc_core::{CodecError, Error};

/// Stream magic for framed ULC files.
const MAGIC: &[u8; 4] = b"ULC1";

/// Command-line arguments for the ulc tool.
#[derive(Parser, Debug)]
#[command(name = "ulc")]
#[command(version)]
#[command(about = "Ultra-low-complexity perceptual audio codec")]
#[command(long_about = "Encode WAV audio into framed ULC streams and back.\n\n\
    EXAMPLES:\n    \
    ulc encode -i input.wav -o output.ulc --kbps 128\n    \
    ulc encode -i input.wav -o output.ulc --quality 50\n    \
    ulc decode -i output.ulc -o roundtrip.wav")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Encode a WAV file into a ULC stream
    Encode {
        /// Input WAV file
        #[arg(short, long)]
        input: PathBuf,

        /// Output ULC file
        #[arg(short, long)]
        output: PathBuf,

        /// Constant-bitrate target in kbps (default mode, 128 kbps)
        #[arg(long, conflicts_with = "quality")]
        kbps: Option<f32>,

        /// Variable-bitrate quality in (0, 100]
        #[arg(long)]
        quality: Option<f32>,

        /// Transform block size (power of two, 256..=8192)
        #[arg(long, default_value_t = 2048)]
        block_size: usize,

        /// Disable transient-driven window switching
        #[arg(long)]
        no_window_switching: bool,

        /// Disable noise-fill side information
        #[arg(long)]
        no_noise_coding: bool,

        /// Disable the psychoacoustic model
        #[arg(long)]
        no_psychoacoustics: bool,
    },

    /// Decode a ULC stream back into a WAV file
    Decode {
        /// Input ULC file
        #[arg(short, long)]
        input: PathBuf,

        /// Output WAV file
        #[arg(short, long)]
        output: PathBuf,
    },
}

fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            let _ = err.print();
            return ExitCode::from(1);
        }
    };

    tracing_subscriber::fmt()
        .with_max_level(if args.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::WARN
        })
        .with_target(false)
        .init();

    match run(args.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::from(exit_code(&err))
        }
    }
}

/// Map errors onto the documented exit codes: 2 for I/O, 3 for
/// unsupported parameters.
fn exit_code(err: &Error) -> u8 {
    match err {
        Error::Io(_) => 2,
        Error::Unsupported(_)
        | Error::InvalidParameter(_)
        | Error::Codec(CodecError::EncoderConfig(_))
        | Error::Codec(CodecError::DecoderConfig(_)) => 3,
        _ => 2,
    }
}

fn run(command: Command) -> ulc_core::Result<()> {
    match command {
        Command::Encode {
            input,
            output,
            kbps,
            quality,
            block_size,
            no_window_switching,
            no_noise_coding,
            no_psychoacoustics,
        } => {
            let wav = wav::read_wav(&input)?;
            let config = UlcEncoderConfig {
                sample_rate: wav.sample_rate,
                channels: wav.channels as usize,
                block_size,
                psychoacoustics: !no_psychoacoustics,
                window_switching: !no_window_switching,
                noise_coding: !no_noise_coding,
            };
            encode_file(&wav, config, kbps, quality, &output)
        }
        Command::Decode { input, output } => decode_file(&input, &output),
    }
}

fn encode_file(
    wav: &wav::WavFile,
    config: UlcEncoderConfig,
    kbps: Option<f32>,
    quality: Option<f32>,
    output: &PathBuf,
) -> ulc_core::Result<()> {
    let mut encoder = UlcEncoder::new(config.clone())?;
    let n = config.block_size;
    let nch = config.channels;
    let frames = wav.frames();
    let blocks = frames.div_ceil(n);

    let mut w = BufWriter::new(File::create(output)?);
    w.write_all(MAGIC)?;
    w.write_u32::<LittleEndian>(config.sample_rate)?;
    w.write_u16::<LittleEndian>(nch as u16)?;
    w.write_u16::<LittleEndian>(n as u16)?;
    w.write_u64::<LittleEndian>(frames as u64)?;

    let mut planar = vec![0.0f32; nch * n];
    let mut packet = vec![0u8; encoder.max_block_bytes()];
    let mut total_bits = 0usize;

    // One trailing silent block flushes the decoder's lap.
    for block in 0..blocks + 1 {
        planar.fill(0.0);
        for ch in 0..nch {
            for i in 0..n {
                let frame = block * n + i;
                if frame < frames {
                    planar[ch * n + i] = wav.samples[frame * nch + ch];
                }
            }
        }

        let bits = match (kbps, quality) {
            (None, Some(q)) => encoder.encode_block_vbr(&planar, &mut packet, q)?,
            (rate, None) => {
                encoder.encode_block_cbr(&planar, &mut packet, rate.unwrap_or(128.0))?
            }
            (Some(_), Some(_)) => unreachable!("clap forbids both"),
        };
        let bytes = bits.div_ceil(8);
        w.write_u32::<LittleEndian>(bytes as u32)?;
        w.write_all(&packet[..bytes])?;
        total_bits += bits;
        debug!(block, bits, "wrote block");
    }
    w.flush()?;

    let seconds = frames as f32 / config.sample_rate as f32;
    info!(
        blocks = blocks + 1,
        kbps = total_bits as f32 / seconds.max(1e-9) / 1000.0,
        "encoded stream"
    );
    Ok(())
}

fn decode_file(input: &PathBuf, output: &PathBuf) -> ulc_core::Result<()> {
    let mut r = BufReader::new(File::open(input)?);

    let mut magic = [0u8; 4];
    r.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(Error::unsupported("not a ULC stream"));
    }
    let sample_rate = r.read_u32::<LittleEndian>()?;
    let channels = r.read_u16::<LittleEndian>()? as usize;
    let block_size = r.read_u16::<LittleEndian>()? as usize;
    let frames = r.read_u64::<LittleEndian>()? as usize;

    let mut decoder = UlcDecoder::new(channels, block_size)?;
    let mut planar = vec![0.0f32; channels * block_size];
    let mut samples: Vec<f32> = Vec::with_capacity(frames * channels);

    let mut block = 0usize;
    loop {
        let bytes = match r.read_u32::<LittleEndian>() {
            Ok(b) => b as usize,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        };
        let mut packet = vec![0u8; bytes];
        r.read_exact(&mut packet)?;
        decoder.decode_block(&packet, &mut planar)?;

        // The first output block precedes the stream; skip it.
        if block > 0 {
            for i in 0..block_size {
                for ch in 0..channels {
                    samples.push(planar[ch * block_size + i]);
                }
            }
        }
        block += 1;
    }

    samples.truncate(frames * channels);
    wav::write_wav(output, sample_rate, channels as u16, &samples)?;
    info!(blocks = block, frames, "decoded stream");
    Ok(())
}
