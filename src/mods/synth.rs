use anyhow::Result;
use std::sync::Arc;

use steth_bpm::synth::Heartbeat;
use steth_bpm::Logger;

use crate::Cli;

/// Synth mode — measure a generated lub-dub signal of known rate.
/// Useful for checking a parameter set without a stethoscope attached.
pub fn run_synth(cli: &Cli, logger: Arc<Logger>) -> Result<()> {
    let a = &cli.analysis;
    let heartbeat = Heartbeat::with_bpm(cli.synth_bpm);
    logger.info(
        &format!(
            "Synth BPM starting…  target={:.1} BPM  window={:.1}s  multiplier={} (implied {:.2})",
            heartbeat.bpm,
            a.measure_window_s,
            a.bpm_multiplier,
            a.implied_multiplier()
        )
    )?;

    // one hop of slack so the last tick has a full window
    let seconds = (a.measure_window_s as f32) + 2.0 * (a.tick_interval_s as f32);
    let samples = heartbeat.render(a.sample_rate, seconds);

    let source = format!("synth:{:.0}", heartbeat.bpm);
    let Some(summary) = super::measure_recording(cli, logger.clone(), &source, samples)? else {
        anyhow::bail!("synthetic signal did not cover the measurement window");
    };

    let error = (summary.bpm as f32) - heartbeat.bpm;
    logger.info(
        &format!(
            "Synth BPM finished: measured {} vs {:.0} (error {:+.0}, one peak = {} BPM)",
            summary.bpm,
            heartbeat.bpm,
            error,
            a.bpm_multiplier
        )
    )?;
    Ok(())
}
