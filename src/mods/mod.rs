pub mod live;
pub mod offline;
pub mod synth;

use anyhow::Result;
use crossbeam_channel::Receiver;
use std::{ fs::OpenOptions, io::Write, path::Path, sync::Arc };

use steth_bpm::{ replay, Config, FilterChain, Logger, Session, SessionEvent, SessionSummary };

use crate::Cli;

// ───────────────────────────────────────────────────────────────────────────────
// Shared helpers used by multiple modes
// ───────────────────────────────────────────────────────────────────────────────

/// Print what a session reported since the last call. Tick updates are
/// only counted; a 20 s session produces hundreds of them.
pub fn report_events(rx: &Receiver<SessionEvent>) -> usize {
    let mut ticks = 0;
    for event in rx.try_iter() {
        match event {
            SessionEvent::PhaseChanged { timestamp, phase } => {
                println!("[{:6.2}s] phase → {:?}", timestamp, phase);
            }
            SessionEvent::TickUpdated { .. } => {
                ticks += 1;
            }
            SessionEvent::PeakConfirmed(peak) => {
                println!(
                    "[{:6.2}s] beat  bin {:>2}  {:.1} dB",
                    peak.timestamp,
                    peak.bin,
                    peak.magnitude_db
                );
            }
            SessionEvent::BpmEstimated { timestamp, bpm, is_final: true } => {
                println!("[{:6.2}s] final BPM: {}", timestamp, bpm);
            }
            SessionEvent::BpmEstimated { .. } => {}
        }
    }
    ticks
}

/// Move the analysis to the rate the audio actually arrives at. Below
/// ~20.4 kHz the default cut band no longer fits and is pulled down.
pub fn fit_analysis_rate(analysis: &mut Config, sample_rate: f32, logger: &Logger) -> Result<()> {
    let (center, width) = (analysis.eq_neg_center_hz, analysis.eq_neg_width_hz);
    if analysis.fit_to_sample_rate(sample_rate) {
        logger.warn(
            &format!(
                "{:.0} Hz input: cut band {:.0}±{:.0} Hz moved to {:.0}±{:.0} Hz",
                sample_rate,
                center,
                width,
                analysis.eq_neg_center_hz,
                analysis.eq_neg_width_hz
            )
        )?;
    }
    analysis.validate()?;
    Ok(())
}

/// One row per finished session; header written when the file is new.
pub fn append_summary_csv(csv_path: &Path, source: &str, summary: &SessionSummary) -> Result<()> {
    if let Some(dir) = csv_path.parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)?;
        }
    }
    let mut csv_file = OpenOptions::new().create(true).append(true).open(csv_path)?;
    if csv_file.metadata()?.len() == 0 {
        writeln!(csv_file, "timestamp,source,bpm,peak_count,confirmed_peaks,ticks")?;
    }
    let ts = chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
    writeln!(
        csv_file,
        "{},{},{},{},{},{}",
        ts,
        csv_field(source),
        summary.bpm,
        summary.peak_count,
        summary.confirmed_peaks.len(),
        summary.ticks
    )?;
    csv_file.flush()?;
    Ok(())
}

fn csv_field(s: &str) -> String {
    if s.contains([',', '"', '\n']) {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

/// Condition a mono recording at the analysis rate, replay it through a
/// fresh session and record the outcome. Used by offline and synth modes.
pub fn measure_recording(
    cli: &Cli,
    logger: Arc<Logger>,
    source: &str,
    mut samples: Vec<f32>
) -> Result<Option<SessionSummary>> {
    let mut chain = FilterChain::from_config(&cli.analysis)?;
    logger.debug(&format!("filter chain: {}", chain.stage_names().join(" → ")))?;
    chain.process_block(&mut samples);

    // events are drained after the replay, so hold a whole session's worth
    let mut cfg = cli.analysis.clone();
    cfg.event_capacity = cfg.event_capacity.max(cfg.measure_window_ticks() * 3 + 8);
    let mut session = Session::new(cfg, logger.clone())?;
    let events = session.subscribe();
    let summary = replay(&mut session, &samples);
    let ticks = report_events(&events);
    logger.debug(&format!("{} tick updates, {} events dropped", ticks, session.dropped_events()))?;

    match &summary {
        Some(s) => {
            logger.info(
                &format!(
                    "{}: BPM={} peaks={} confirmed={} ticks={}",
                    source,
                    s.bpm,
                    s.peak_count,
                    s.confirmed_peaks.len(),
                    s.ticks
                )
            )?;
            append_summary_csv(&cli.results_path, source, s)?;
        }
        None => {
            logger.warn(
                &format!(
                    "{}: {:.1}s of audio is shorter than the {:.1}s measurement window",
                    source,
                    (samples.len() as f64) / (cli.analysis.sample_rate as f64),
                    cli.analysis.measure_window_s
                )
            )?;
        }
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use steth_bpm::{ BpmSample, PeakEvent };

    #[test]
    fn csv_gets_header_once() {
        let dir = std::env::temp_dir().join(format!("steth-csv-{}", std::process::id()));
        let path = dir.join("Results.csv");
        let _ = std::fs::remove_file(&path);

        let summary = SessionSummary {
            bpm: 72,
            peak_count: 18,
            confirmed_peaks: vec![PeakEvent { timestamp: 5.2, bin: 2, magnitude_db: 120.0 }],
            bpm_series: vec![BpmSample { timestamp: 5.05, bpm: 0 }],
            ticks: 400,
        };
        append_summary_csv(&path, "synth:72", &summary).unwrap();
        append_summary_csv(&path, "a,b.wav", &summary).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "timestamp,source,bpm,peak_count,confirmed_peaks,ticks");
        assert!(lines[1].ends_with(",synth:72,72,18,1,400"));
        assert!(lines[2].contains("\"a,b.wav\""));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn headset_rates_still_build_a_chain() {
        let logger = Logger::disabled();
        for rate in [8_000.0, 16_000.0] {
            let mut analysis = Config::default();
            fit_analysis_rate(&mut analysis, rate, &logger).unwrap();
            assert!(analysis.eq_neg_center_hz < rate * 0.5);
            let chain = FilterChain::from_config(&analysis).unwrap();
            assert_eq!(chain.len(), 5);
        }
    }
}
