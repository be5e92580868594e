use anyhow::Result;
use std::{ path::Path, sync::Arc };

use steth_bpm::Logger;

use crate::Cli;

// ───────────────────────────────────────────────────────────────────────────────
// Recording reader: first channel of the default track, via symphonia
// ───────────────────────────────────────────────────────────────────────────────
pub mod decode {
    use anyhow::{ anyhow, Result };
    use std::{ fs::File, path::Path };
    use symphonia::core::{
        audio::SampleBuffer,
        codecs::{ Decoder, DecoderOptions },
        errors::Error,
        formats::{ FormatOptions, FormatReader },
        io::MediaSourceStream,
        meta::MetadataOptions,
        probe::Hint,
    };
    use symphonia::default::{ get_codecs, get_probe };

    use super::resample_linear_mono;

    /// A decoded recording at the analysis rate.
    #[derive(Debug)]
    pub struct Recording {
        pub source_rate: u32,
        pub channels: u16,
        pub skipped_packets: usize,
        pub samples: Vec<f32>,
    }

    /// Packet-by-packet reader over one audio track.
    pub struct TrackReader {
        format: Box<dyn FormatReader>,
        decoder: Box<dyn Decoder>,
        track_id: u32,
        scratch: Option<SampleBuffer<f32>>,
        pub sample_rate: u32,
        pub channels: u16,
        pub skipped_packets: usize,
    }

    impl TrackReader {
        pub fn open(path: &Path) -> Result<Self> {
            let mss = MediaSourceStream::new(Box::new(File::open(path)?), Default::default());
            let mut hint = Hint::new();
            if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
                hint.with_extension(ext);
            }
            let format = get_probe()
                .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())?
                .format;

            let track = format.default_track().ok_or_else(|| anyhow!("no default audio track found"))?;
            let params = track.codec_params.clone();
            let track_id = track.id;
            let sample_rate = params.sample_rate.ok_or_else(|| anyhow!("unknown sample rate"))?;
            let channels = params.channels.map_or(1, |c| c.count() as u16);
            let decoder = get_codecs().make(&params, &DecoderOptions::default())?;

            Ok(Self {
                format,
                decoder,
                track_id,
                scratch: None,
                sample_rate,
                channels,
                skipped_packets: 0,
            })
        }

        /// First-channel samples of the next decodable packet, `None` at
        /// end of stream. Corrupt packets are skipped and counted.
        pub fn next_block(&mut self) -> Result<Option<Vec<f32>>> {
            loop {
                let packet = match self.format.next_packet() {
                    Ok(packet) => packet,
                    Err(Error::ResetRequired) => {
                        self.decoder.reset();
                        continue;
                    }
                    Err(Error::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                        return Ok(None);
                    }
                    Err(err) => {
                        return Err(err.into());
                    }
                };
                if packet.track_id() != self.track_id {
                    continue;
                }

                let decoded = match self.decoder.decode(&packet) {
                    Ok(decoded) => decoded,
                    Err(Error::DecodeError(_)) => {
                        self.skipped_packets += 1;
                        continue;
                    }
                    Err(err) => {
                        return Err(err.into());
                    }
                };

                let spec = *decoded.spec();
                let stride = spec.channels.count().max(1);
                if self.scratch.as_ref().map_or(true, |b| b.capacity() < decoded.capacity()) {
                    self.scratch = Some(SampleBuffer::<f32>::new(decoded.capacity() as u64, spec));
                }
                let Some(scratch) = self.scratch.as_mut() else {
                    continue;
                };
                scratch.copy_interleaved_ref(decoded);
                return Ok(Some(scratch.samples().iter().step_by(stride).copied().collect()));
            }
        }
    }

    /// Decode the whole first channel and bring it to `target_rate`.
    pub fn read_recording(path: &Path, target_rate: u32) -> Result<Recording> {
        let mut reader = TrackReader::open(path)?;
        let mut first = Vec::new();
        while let Some(block) = reader.next_block()? {
            first.extend_from_slice(&block);
        }
        Ok(Recording {
            source_rate: reader.sample_rate,
            channels: reader.channels,
            skipped_packets: reader.skipped_packets,
            samples: resample_linear_mono(&first, reader.sample_rate, target_rate),
        })
    }
}

/// Linear interpolation; good enough for a 20–420 Hz band of interest.
pub(crate) fn resample_linear_mono(x: &[f32], sr_in: u32, sr_out: u32) -> Vec<f32> {
    if x.is_empty() || sr_in == 0 || sr_out == 0 || sr_in == sr_out {
        return x.to_vec();
    }
    let ratio = (sr_out as f64) / (sr_in as f64);
    let n_out = ((x.len() as f64) * ratio).floor().max(1.0) as usize;
    let last = x[x.len() - 1];

    (0..n_out)
        .map(|i| {
            let pos = (i as f64) / ratio;
            let i0 = pos.floor() as usize;
            if i0 + 1 >= x.len() {
                last
            } else {
                let t = (pos - (i0 as f64)) as f32;
                x[i0] + (x[i0 + 1] - x[i0]) * t
            }
        })
        .collect()
}

/// Offline mode — measure a recorded stethoscope file.
/// Appends the session summary to `Results.csv`.
pub fn run_offline(cli: &Cli, logger: Arc<Logger>) -> Result<()> {
    let path = Path::new(&cli.input_path);
    logger.info(
        &format!(
            "Offline BPM starting…  input={}  window={:.1}s warmup={:.1}s tick={:.0}ms",
            path.display(),
            cli.analysis.measure_window_s,
            cli.analysis.warmup_s,
            cli.analysis.tick_interval_s * 1000.0
        )
    )?;

    // --offline-sr 0 means "analysis rate"
    let target = if cli.offline_sample_rate_hz == 0 {
        cli.analysis.sample_rate as u32
    } else {
        cli.offline_sample_rate_hz
    };
    let mut analysis_cli = cli.clone();
    super::fit_analysis_rate(&mut analysis_cli.analysis, target as f32, &logger)?;

    let recording = decode::read_recording(path, target)?;
    logger.info(
        &format!(
            "Decoded {}: {} Hz, {} channel(s) → {:.2}s at {} Hz",
            path.display(),
            recording.source_rate,
            recording.channels,
            (recording.samples.len() as f64) / (target as f64),
            target
        )
    )?;
    if recording.skipped_packets > 0 {
        logger.warn(&format!("{} corrupt packets skipped", recording.skipped_packets))?;
    }
    let samples = recording.samples;

    let source = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| cli.input_path.clone());
    let summary = super::measure_recording(&analysis_cli, logger.clone(), &source, samples)?;
    if summary.is_none() {
        anyhow::bail!("{} is too short for a {:.1}s session", source, cli.analysis.measure_window_s);
    }

    logger.info("Offline BPM finished.")?;
    Ok(())
}
