use anyhow::{ anyhow, Result };
use cpal::traits::{ DeviceTrait, HostTrait, StreamTrait };
use crossbeam_channel::{ bounded, Receiver, Sender };
use std::{
    sync::{ atomic::{ AtomicBool, Ordering }, Arc, Mutex },
    thread,
    time::{ Duration, Instant },
};

use steth_bpm::{ FilterChain, Logger, Session, TickOutcome };

use super::{ append_summary_csv, fit_analysis_rate, report_events };
use crate::Cli;

// ───────────────────────────────────────────────────────────────────────────────
// Conditioned mono ring buffer, filled by the sink thread
// ───────────────────────────────────────────────────────────────────────────────
#[derive(Clone)]
pub struct SharedBuf {
    pub buf: Arc<Mutex<Vec<f32>>>,
    pub cap: usize,
}

impl SharedBuf {
    pub fn new(cap: usize) -> Self {
        Self { buf: Arc::new(Mutex::new(Vec::with_capacity(cap))), cap }
    }

    /// Newest `n` samples, fewer while the buffer is still filling.
    pub fn latest(&self, n: usize) -> Result<Vec<f32>> {
        let b = self.buf.lock().map_err(|_| anyhow!("audio buffer lock poisoned"))?;
        Ok(b[b.len().saturating_sub(n)..].to_vec())
    }

    fn push(&self, block: &[f32]) -> bool {
        let Ok(mut ring) = self.buf.lock() else {
            return false;
        };
        ring.extend_from_slice(block);
        if ring.len() > self.cap {
            let drop = ring.len() - self.cap;
            ring.drain(0..drop);
        }
        true
    }
}

/// Runs the filter chain over every captured block before it reaches the
/// ring, so filter state stays continuous across ticks.
pub fn audio_sink_thread(rx: Receiver<Vec<f32>>, mut chain: FilterChain, shared: SharedBuf) {
    while let Ok(mut block) = rx.recv() {
        chain.process_block(&mut block);
        if !shared.push(&block) {
            break;
        }
    }
}

pub fn build_input_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    channels: usize,
    tx: Sender<Vec<f32>>,
    logger: Arc<Logger>
) -> Result<cpal::Stream> {
    let err_logger = logger.clone();
    let err_fn = move |e| {
        let _ = err_logger.error(&format!("audio stream error: {}", e));
    };

    match device.default_input_config()?.sample_format() {
        cpal::SampleFormat::F32 => {
            Ok(
                device.build_input_stream(
                    config,
                    move |data: &[f32], _| on_audio_input_first_channel(data, channels, &tx),
                    err_fn,
                    None
                )?
            )
        }
        cpal::SampleFormat::I16 => {
            Ok(
                device.build_input_stream(
                    config,
                    move |data: &[i16], _| {
                        let tmp: Vec<f32> = data
                            .iter()
                            .map(|&s| (s as f32) / 32768.0)
                            .collect();
                        on_audio_input_first_channel(&tmp, channels, &tx);
                    },
                    err_fn,
                    None
                )?
            )
        }
        cpal::SampleFormat::U16 => {
            Ok(
                device.build_input_stream(
                    config,
                    move |data: &[u16], _| {
                        let tmp: Vec<f32> = data
                            .iter()
                            .map(|&s| ((s as f32) / 65535.0) * 2.0 - 1.0)
                            .collect();
                        on_audio_input_first_channel(&tmp, channels, &tx);
                    },
                    err_fn,
                    None
                )?
            )
        }
        other => anyhow::bail!("Unsupported sample format: {:?}", other),
    }
}

fn first_channel(data: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        data.to_vec()
    } else {
        data.iter().step_by(channels).copied().collect()
    }
}

fn on_audio_input_first_channel(data: &[f32], channels: usize, tx: &Sender<Vec<f32>>) {
    // a full channel means the sink is behind; drop rather than block the callback
    let _ = tx.try_send(first_channel(data, channels));
}

pub fn maybe_rate_supported(device: &cpal::Device, want: u32) -> Option<u32> {
    let configs = device.supported_input_configs().ok()?;
    for c in configs {
        let r = c.min_sample_rate().0..=c.max_sample_rate().0;
        if r.contains(&want) {
            return Some(want);
        }
    }
    None
}

/// Live mode — one measurement session from the default microphone.
/// Ctrl+C aborts; a completed session is appended to `Results.csv`.
pub fn run_live(cli: &Cli, logger: Arc<Logger>) -> Result<()> {
    let mut analysis = cli.analysis.clone();
    logger.info(
        &format!(
            "Live BPM starting…  tick={:.0}ms  warmup={:.1}s  window={:.1}s  band={}..={}",
            analysis.tick_interval_s * 1000.0,
            analysis.warmup_s,
            analysis.measure_window_s,
            analysis.peak_band.start(),
            analysis.peak_band.end()
        )
    )?;

    // ctrl+c to quit
    let quit = Arc::new(AtomicBool::new(false));
    {
        let q = quit.clone();
        let _ = ctrlc::set_handler(move || {
            q.store(true, Ordering::SeqCst);
        });
    }

    // === microphone (cpal) ===
    let host = cpal::default_host();
    let mic_device = host
        .default_input_device()
        .ok_or_else(|| anyhow!("No default input device (microphone) found"))?;
    let mut mic_config = mic_device.default_input_config()?.config();

    let want = analysis.sample_rate as u32;
    if let Some(sr) = maybe_rate_supported(&mic_device, want) {
        mic_config.sample_rate.0 = sr;
    } else {
        logger.warn(
            &format!(
                "Mic does not offer {} Hz; analyzing at its default {} Hz",
                want,
                mic_config.sample_rate.0
            )
        )?;
    }
    fit_analysis_rate(&mut analysis, mic_config.sample_rate.0 as f32, &logger)?;

    logger.info(&format!("Mic device: {}", mic_device.name().unwrap_or_default()))?;
    logger.info(
        &format!(
            "Mic: sample rate {} Hz, channels {}",
            mic_config.sample_rate.0,
            mic_config.channels
        )
    )?;

    let chain = FilterChain::from_config(&analysis)?;
    logger.debug(&format!("filter chain: {}", chain.stage_names().join(" → ")))?;

    let mut session = Session::new(analysis.clone(), logger.clone())?;
    let events = session.subscribe();
    let fft_len = session.fft_len();

    let shared_mic = SharedBuf::new(fft_len * 4);
    let (tx_mic, rx_mic) = bounded::<Vec<f32>>(8);
    let mic_channels = mic_config.channels.max(1) as usize;

    let mic_stream = build_input_stream(
        &mic_device,
        &mic_config,
        mic_channels,
        tx_mic,
        logger.clone()
    )?;
    mic_stream.play()?;

    {
        let shared_clone = shared_mic.clone();
        thread::spawn(move || audio_sink_thread(rx_mic, chain, shared_clone));
    }

    println!(
        "Hold the stethoscope still. Measuring for {:.0}s (Ctrl+C to abort)…",
        analysis.measure_window_s
    );
    session.start();

    let tick = Duration::from_secs_f64(analysis.tick_interval_s);
    let mut finished = None;
    let mut next = Instant::now();
    while !quit.load(Ordering::SeqCst) {
        next += tick;

        let frame = shared_mic.latest(fft_len)?;
        match session.tick_samples(&frame) {
            TickOutcome::Finished(summary) => {
                finished = Some(summary);
            }
            TickOutcome::Inactive => {
                break;
            }
            _ => {}
        }
        report_events(&events);
        if finished.is_some() {
            break;
        }

        let now = Instant::now();
        if next > now {
            thread::sleep(next - now);
        } else {
            next = now;
        }
    }

    drop(mic_stream);

    match finished {
        Some(summary) => {
            append_summary_csv(&cli.results_path, "live", &summary)?;
            logger.info(
                &format!(
                    "Live BPM finished: BPM={} peaks={} confirmed={} dropped events={}",
                    summary.bpm,
                    summary.peak_count,
                    summary.confirmed_peaks.len(),
                    session.dropped_events()
                )
            )?;
        }
        None => {
            session.stop();
            report_events(&events);
            logger.info("Live BPM aborted before the window closed.")?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_channel_deinterleaves() {
        assert_eq!(first_channel(&[1.0, 9.0, 2.0, 9.0, 3.0, 9.0], 2), vec![1.0, 2.0, 3.0]);
        assert_eq!(first_channel(&[1.0, 2.0], 1), vec![1.0, 2.0]);
    }

    #[test]
    fn ring_keeps_newest_samples() {
        let shared = SharedBuf::new(4);
        assert!(shared.push(&[1.0, 2.0, 3.0]));
        assert!(shared.push(&[4.0, 5.0, 6.0]));
        assert_eq!(shared.latest(8).unwrap(), vec![3.0, 4.0, 5.0, 6.0]);
        assert_eq!(shared.latest(2).unwrap(), vec![5.0, 6.0]);
    }

    #[test]
    fn sink_filters_blocks() {
        let (tx, rx) = bounded::<Vec<f32>>(4);
        let shared = SharedBuf::new(16);
        let chain = FilterChain::new(vec![Box::new(steth_bpm::Gain::new(2.0).unwrap())]);
        tx.send(vec![0.25, -0.5]).unwrap();
        drop(tx);
        audio_sink_thread(rx, chain, shared.clone());
        assert_eq!(shared.latest(2).unwrap(), vec![0.5, -1.0]);
    }
}
