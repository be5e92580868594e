//! src/main.rs

use anyhow::Result;
use std::{ env, path::{ Path, PathBuf }, str::FromStr, sync::Arc };

use steth_bpm::{ Config, LogLevel, Logger };

// one file per host mode in src/mods/
mod mods;

// ───────────────────────────────────────────────────────────────────────────────
// CLI config + parsing
// ───────────────────────────────────────────────────────────────────────────────
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    Live,
    Offline,
    Synth,
}

#[derive(Clone, Debug)]
pub struct Cli {
    pub mode: Mode,

    // paths
    pub log_path: PathBuf,
    pub results_path: PathBuf,
    pub log_level: LogLevel,
    pub log_stderr: bool,

    // offline / synth sources
    pub input_path: String,
    pub offline_sample_rate_hz: u32,
    pub synth_bpm: f32,

    pub analysis: Config,
}

impl Default for Cli {
    fn default() -> Self {
        let default_log = env
            ::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join("build")
            .join("Stethoscope.log");
        let results_path = results_path_for(&default_log);
        Self {
            mode: Mode::Live,
            log_path: default_log,
            results_path,
            log_level: LogLevel::Info,
            log_stderr: false,
            input_path: String::new(),
            offline_sample_rate_hz: 0,
            synth_bpm: 72.0,
            analysis: Config::default(),
        }
    }
}

/// Fastest rate synth mode will render.
const MAX_SYNTH_BPM: f32 = 300.0;

fn results_path_for(log_path: &Path) -> PathBuf {
    match log_path.parent() {
        Some(dir) => dir.join("Results.csv"),
        None => PathBuf::from("Results.csv"),
    }
}

fn print_usage(cli: &Cli) {
    let a = &cli.analysis;
    println!("Usage: steth-bpm [OPTIONS]\n");
    println!("General paths:");
    println!("  --log-path <PATH>             Path to the log file (default: {})", cli.log_path.display());
    println!(
        "  --results-path <PATH>         Path to Results.csv (default: next to the log file)"
    );
    println!(
        "  --log-level <LEVEL>           Log level: debug, info, warning, error (default: info)"
    );
    println!("  --log-stderr                  Log to stderr instead of the log file");
    println!();
    println!("Modes:");
    println!("  --mode live           (default) Measure from the default microphone");
    println!("  --mode offline        Measure a recorded file (.wav/.mp3/.mp4/.m4a/.flac)");
    println!("  --mode synth          Measure a synthetic lub-dub signal\n");

    println!("Sources:");
    println!("  --input <PATH>                (offline) Recording to analyze");
    println!(
        "  --offline-sr <HZ>             (offline) Resample input to this rate (default: {}, 0 = analysis rate)",
        cli.offline_sample_rate_hz
    );
    println!(
        "  --synth-bpm <BPM>             (synth) Heart rate to synthesize, up to {:.0} (default: {:.0})",
        MAX_SYNTH_BPM,
        cli.synth_bpm
    );

    println!("\nSpectrum:");
    println!("  -sr, --sample-rate <HZ>       Analysis sample rate (default: {:.0})", a.sample_rate);
    println!("                                Below ~20.4 kHz the cut band is moved under Nyquist");
    println!("  --bins <N>                    Highest reported bin (default: {})", a.bins);
    println!(
        "  --sampling-rate-constant <N>  Half the FFT length (default: {})",
        a.sampling_rate_constant
    );

    println!("\nFilter chain (widths are half-widths around the center):");
    println!("  --gain <X>                    Input boost, linear (default: {:.1})", a.input_gain);
    println!("  --low-pass-hz <HZ>            Low-pass cutoff (default: {:.0})", a.low_pass_cutoff_hz);
    println!("  --band-center-hz <HZ>         Band-pass center (default: {:.0})", a.band_pass_center_hz);
    println!("  --band-width-hz <HZ>          Band-pass width (default: {:.0})", a.band_pass_width_hz);
    println!("  --eq-pos-gain-db <DB>         In-band boost (default: {:.1})", a.eq_pos_gain_db);
    println!("  --eq-neg-center-hz <HZ>       Cut band center (default: {:.0})", a.eq_neg_center_hz);
    println!("  --eq-neg-width-hz <HZ>        Cut band width (default: {:.0})", a.eq_neg_width_hz);
    println!("  --eq-neg-gain-db <DB>         Cut band gain (default: {:.1})", a.eq_neg_gain_db);

    println!("\nDetection:");
    println!(
        "  --peak-threshold-db <DB>      Per-bin threshold, +{:.0} dB scale (default: {:.0})",
        steth_bpm::DB_OFFSET,
        a.peak_threshold_db
    );
    println!(
        "  --peak-band <A..B>            Bins scanned for heart sounds (default: {}..{})",
        a.peak_band.start(),
        a.peak_band.end()
    );
    println!(
        "  --secondary-delay-s <SEC>     Gap that skips S2 (default: {:.2})",
        a.secondary_delay_s
    );
    println!(
        "  --refractory-s <SEC>          Minimum gap between peaks (default: {:.2})",
        a.refractory_interval_s
    );

    println!("\nTiming:");
    println!("  -tm, --tick-ms <MS>           Analysis tick (default: {:.0})", a.tick_interval_s * 1000.0);
    println!("  -wu, --warmup-s <SEC>         Thresholding before measuring (default: {:.1})", a.warmup_s);
    println!("  -ws, --window-s <SEC>         Whole session length (default: {:.1})", a.measure_window_s);
    println!("  --average-s <SEC>             Dynamic average span (default: {:.2})", a.average_window_s);
    println!(
        "  --bpm-multiplier <N>          Peaks → BPM factor (default: {}; 60 / measured seconds)",
        a.bpm_multiplier
    );

    println!("\nExamples:");
    println!("  steth-bpm --mode live -ws 30 --bpm-multiplier 2");
    println!("  steth-bpm --mode offline --input recordings/patient1.wav");
    println!("  steth-bpm --mode synth --synth-bpm 90 --log-stderr --log-level debug");
}

fn value<'a>(args: &'a [String], i: usize, flag: &str) -> std::result::Result<&'a str, String> {
    args.get(i + 1)
        .map(|s| s.as_str())
        .ok_or_else(|| format!("Missing value for {}", flag))
}

fn number<T: FromStr>(args: &[String], i: usize, flag: &str) -> std::result::Result<T, String> {
    let raw = value(args, i, flag)?;
    raw.parse::<T>().map_err(|_| format!("Invalid {} value: {}", flag, raw))
}

/// Accepts `2..8`, `2..=8` or `2-8`; both ends inclusive.
fn parse_band(raw: &str) -> std::result::Result<std::ops::RangeInclusive<usize>, String> {
    let (a, b) = raw
        .split_once("..=")
        .or_else(|| raw.split_once(".."))
        .or_else(|| raw.split_once('-'))
        .ok_or_else(|| format!("Invalid peak band: {} (expected A..B)", raw))?;
    let start = a.trim().parse::<usize>().map_err(|_| format!("Invalid peak band start: {}", a))?;
    let end = b.trim().parse::<usize>().map_err(|_| format!("Invalid peak band end: {}", b))?;
    Ok(start..=end)
}

fn parse_arguments(args: &[String]) -> std::result::Result<Cli, String> {
    let mut cli = Cli::default();
    let mut results_overridden = false;

    let mut i = 1;
    while i < args.len() {
        let flag = args[i].as_str();
        let a = &mut cli.analysis;
        match flag {
            "--mode" => {
                cli.mode = match value(args, i, flag)?.to_lowercase().as_str() {
                    "live" | "mic" => Mode::Live,
                    "offline" => Mode::Offline,
                    "synth" => Mode::Synth,
                    other => {
                        return Err(format!("Unknown mode: {}", other));
                    }
                };
            }
            "--log-path" => {
                cli.log_path = PathBuf::from(value(args, i, flag)?);
            }
            "--results-path" => {
                cli.results_path = PathBuf::from(value(args, i, flag)?);
                results_overridden = true;
            }
            "--log-level" => {
                cli.log_level = value(args, i, flag)?.parse()?;
            }
            "--log-stderr" => {
                cli.log_stderr = true;
                i += 1;
                continue;
            }
            "--input" => {
                cli.input_path = value(args, i, flag)?.to_string();
            }
            "--offline-sr" => {
                cli.offline_sample_rate_hz = number(args, i, flag)?;
            }
            "--synth-bpm" => {
                cli.synth_bpm = number(args, i, flag)?;
            }
            "-sr" | "--sample-rate" => {
                a.sample_rate = number(args, i, flag)?;
            }
            "--bins" => {
                a.bins = number(args, i, flag)?;
            }
            "--sampling-rate-constant" => {
                a.sampling_rate_constant = number(args, i, flag)?;
            }
            "--gain" => {
                a.input_gain = number(args, i, flag)?;
            }
            "--low-pass-hz" => {
                a.low_pass_cutoff_hz = number(args, i, flag)?;
            }
            "--band-center-hz" => {
                a.band_pass_center_hz = number(args, i, flag)?;
            }
            "--band-width-hz" => {
                a.band_pass_width_hz = number(args, i, flag)?;
            }
            "--eq-pos-gain-db" => {
                a.eq_pos_gain_db = number(args, i, flag)?;
            }
            "--eq-neg-center-hz" => {
                a.eq_neg_center_hz = number(args, i, flag)?;
            }
            "--eq-neg-width-hz" => {
                a.eq_neg_width_hz = number(args, i, flag)?;
            }
            "--eq-neg-gain-db" => {
                a.eq_neg_gain_db = number(args, i, flag)?;
            }
            "--peak-threshold-db" => {
                a.peak_threshold_db = number(args, i, flag)?;
            }
            "--peak-band" => {
                a.peak_band = parse_band(value(args, i, flag)?)?;
            }
            "--secondary-delay-s" => {
                a.secondary_delay_s = number(args, i, flag)?;
            }
            "--refractory-s" => {
                a.refractory_interval_s = number(args, i, flag)?;
            }
            "-tm" | "--tick-ms" => {
                let ms: f64 = number(args, i, flag)?;
                a.tick_interval_s = ms / 1000.0;
            }
            "-wu" | "--warmup-s" => {
                a.warmup_s = number(args, i, flag)?;
            }
            "-ws" | "--window-s" => {
                a.measure_window_s = number(args, i, flag)?;
            }
            "--average-s" => {
                a.average_window_s = number(args, i, flag)?;
            }
            "--bpm-multiplier" => {
                a.bpm_multiplier = number(args, i, flag)?;
            }
            "-h" | "--help" => {
                return Err("help requested".to_string());
            }
            other => {
                return Err(format!("Unknown argument: {}", other));
            }
        }
        i += 2;
    }

    if !results_overridden {
        cli.results_path = results_path_for(&cli.log_path);
    }
    if !(cli.synth_bpm.is_finite() && cli.synth_bpm > 0.0 && cli.synth_bpm <= MAX_SYNTH_BPM) {
        return Err(
            format!("--synth-bpm must be in (0, {}] (got {})", MAX_SYNTH_BPM, cli.synth_bpm)
        );
    }
    if cli.mode == Mode::Offline && cli.input_path.is_empty() {
        return Err("--input <PATH> is required in offline mode".to_string());
    }
    let rate = cli.analysis.sample_rate;
    cli.analysis.fit_to_sample_rate(rate);
    cli.analysis.validate().map_err(|e| e.to_string())?;
    Ok(cli)
}

// ───────────────────────────────────────────────────────────────────────────────
// main
// ───────────────────────────────────────────────────────────────────────────────
fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();
    let cli = match parse_arguments(&args) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {}\n", e);
            print_usage(&Cli::default());
            std::process::exit(1);
        }
    };

    let logger = Arc::new(
        if cli.log_stderr {
            Logger::stderr(cli.log_level)
        } else {
            Logger::new_with_level(&cli.log_path, true, cli.log_level)?
        }
    );

    match cli.mode {
        Mode::Live => mods::live::run_live(&cli, logger),
        Mode::Offline => mods::offline::run_offline(&cli, logger),
        Mode::Synth => mods::synth::run_synth(&cli, logger),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("steth-bpm")
            .chain(list.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn defaults_parse() {
        let cli = parse_arguments(&args(&[])).unwrap();
        assert_eq!(cli.mode, Mode::Live);
        assert_eq!(cli.analysis, Config::default());
        assert_eq!(cli.results_path.file_name().unwrap(), "Results.csv");
    }

    #[test]
    fn analysis_flags_override_config() {
        let cli = parse_arguments(
            &args(
                &[
                    "--mode",
                    "synth",
                    "-tm",
                    "100",
                    "--peak-band",
                    "3..=7",
                    "--bpm-multiplier",
                    "3",
                    "-ws",
                    "25",
                    "--log-stderr",
                    "--synth-bpm",
                    "90",
                ]
            )
        ).unwrap();
        assert_eq!(cli.mode, Mode::Synth);
        assert_eq!(cli.analysis.tick_interval_s, 0.1);
        assert_eq!(cli.analysis.peak_band, 3..=7);
        assert_eq!(cli.analysis.bpm_multiplier, 3);
        assert_eq!(cli.analysis.measure_window_s, 25.0);
        assert!(cli.log_stderr);
        assert_eq!(cli.synth_bpm, 90.0);
    }

    #[test]
    fn results_follow_log_path() {
        let cli = parse_arguments(&args(&["--log-path", "out/run.log"])).unwrap();
        assert_eq!(cli.results_path, PathBuf::from("out").join("Results.csv"));
    }

    #[test]
    fn bad_input_is_reported() {
        assert!(parse_arguments(&args(&["--mode", "radio"])).is_err());
        assert!(parse_arguments(&args(&["--gain"])).is_err());
        assert!(parse_arguments(&args(&["--band-width-hz", "-200"])).is_err());
        assert!(parse_arguments(&args(&["--mode", "offline"])).is_err());
        assert!(parse_arguments(&args(&["--peak-band", "eight"])).is_err());
    }

    #[test]
    fn synth_rate_must_be_a_real_heart_rate() {
        for bad in ["inf", "-5", "0", "NaN", "1e9"] {
            assert!(
                parse_arguments(&args(&["--mode", "synth", "--synth-bpm", bad])).is_err(),
                "accepted --synth-bpm {bad}"
            );
        }
        let cli = parse_arguments(&args(&["--mode", "synth", "--synth-bpm", "300"])).unwrap();
        assert_eq!(cli.synth_bpm, 300.0);
    }

    #[test]
    fn low_analysis_rate_is_accepted() {
        let cli = parse_arguments(&args(&["-sr", "16000"])).unwrap();
        assert_eq!(cli.analysis.sample_rate, 16_000.0);
        assert!(cli.analysis.eq_neg_center_hz < 8_000.0);
    }

    #[test]
    fn band_syntax_variants() {
        assert_eq!(parse_band("2..8"), Ok(2..=8));
        assert_eq!(parse_band("2..=8"), Ok(2..=8));
        assert_eq!(parse_band("2-8"), Ok(2..=8));
    }
}
