use std::sync::Arc;

use steth_bpm::synth::Heartbeat;
use steth_bpm::{ replay, Config, FilterChain, Logger, Phase, Session, SessionEvent };

fn conditioned_heartbeat(cfg: &Config, bpm: f32, seconds: f32) -> Vec<f32> {
    let mut signal = Heartbeat::with_bpm(bpm).render(cfg.sample_rate, seconds);
    let mut chain = FilterChain::from_config(cfg).unwrap();
    chain.process_block(&mut signal);
    signal
}

#[test]
fn synthetic_heartbeat_yields_one_peak_per_beat() {
    // room for every event of a 400-tick session
    let cfg = Config { event_capacity: 1024, ..Config::default() };
    let signal = conditioned_heartbeat(&cfg, 72.0, 20.5);

    let mut session = Session::new(cfg.clone(), Arc::new(Logger::disabled())).unwrap();
    let rx = session.subscribe();
    let summary = replay(&mut session, &signal).expect("recording covers the window");

    assert_eq!(session.phase(), Phase::Stopped);
    assert_eq!(summary.ticks, cfg.measure_window_ticks());

    // 15 s of measurement at 72 BPM
    let peaks = &summary.confirmed_peaks;
    assert!((16..=20).contains(&peaks.len()), "confirmed {} peaks", peaks.len());
    assert!(peaks.iter().all(|p| p.timestamp >= cfg.warmup_s));
    assert!(peaks.iter().all(|p| cfg.peak_band.contains(&p.bin)));
    for w in peaks.windows(2) {
        let gap = w[1].timestamp - w[0].timestamp;
        assert!((0.7..=0.95).contains(&gap), "gap {gap:.3}s between confirmed peaks");
    }

    // 18 beats fall in the 5–20 s measured span; each contributes one or two
    // strict maxima to the amplitude history (S1, and S2 when it clears the
    // dynamic average).
    assert!((18..=36).contains(&summary.peak_count), "counted {} maxima", summary.peak_count);
    assert_eq!(summary.bpm, (summary.peak_count as u32) * cfg.bpm_multiplier);
    assert_eq!(summary.bpm_series.len(), cfg.measured_ticks());
    assert_eq!(summary.bpm_series.last().map(|s| s.bpm), Some(summary.bpm));
    assert_eq!(session.current_bpm_estimate(), summary.bpm);

    let finals: Vec<u32> = rx
        .try_iter()
        .filter_map(|e| {
            match e {
                SessionEvent::BpmEstimated { bpm, is_final: true, .. } => Some(bpm),
                _ => None,
            }
        })
        .collect();
    assert_eq!(finals, [summary.bpm]);
}

#[test]
fn silence_yields_no_peaks() {
    let cfg = Config::default();
    let signal = vec![0.0f32; (cfg.sample_rate * 20.5) as usize];

    let mut session = Session::new(cfg, Arc::new(Logger::disabled())).unwrap();
    let summary = replay(&mut session, &signal).unwrap();

    assert!(summary.confirmed_peaks.is_empty());
    assert_eq!(summary.bpm, 0);
}

#[test]
fn restarted_session_does_not_reuse_peaks() {
    let cfg = Config { warmup_s: 1.0, measure_window_s: 4.0, ..Config::default() };
    let beats = conditioned_heartbeat(&cfg, 72.0, 4.5);
    let quiet = vec![0.0f32; beats.len()];

    let mut session = Session::new(cfg, Arc::new(Logger::disabled())).unwrap();
    let first = replay(&mut session, &beats).unwrap();
    assert!(!first.confirmed_peaks.is_empty());

    let second = replay(&mut session, &quiet).unwrap();
    assert!(second.confirmed_peaks.is_empty());
    assert_eq!(second.bpm, 0);
}
