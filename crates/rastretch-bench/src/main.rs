//! rastretch-bench: CLI tool for transform experimentation and diagnostics.
//!
//! Synthesizes a gradient-plus-noise raster with optional no-data holes,
//! runs the engine over it with configurable parameters, and prints
//! per-tile diagnostics. Useful for:
//!
//! - Comparing worker counts and tile layouts on the same data
//! - Measuring pool time against staging overhead per tile
//! - Checking how transforms treat no-data holes
//!
//! # Usage
//!
//! ```text
//! cargo run --release --bin rastretch-bench -- [OPTIONS]
//! ```

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::hash::Hasher;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use rastretch_engine::{
    BandImage, EngineConfig, MemoryRaster, RasterSource, RunDiagnostics, ScaleRange,
    StatisticsScope, Transform,
};
use siphasher::sip::SipHasher13;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Transform experimentation and diagnostics for rastretch.
///
/// Runs the segmented engine on a synthetic raster and prints detailed
/// per-tile timing and mask diagnostics.
#[derive(Parser)]
#[command(name = "rastretch-bench", version)]
struct Cli {
    /// Raster width in pixels.
    #[arg(long, default_value_t = 2048, value_parser = clap::builder::RangedU64ValueParser::<u32>::new().range(1..))]
    width: u32,

    /// Raster height in pixels.
    #[arg(long, default_value_t = 2048, value_parser = clap::builder::RangedU64ValueParser::<u32>::new().range(1..))]
    height: u32,

    /// Number of bands.
    #[arg(long, default_value_t = 1, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    bands: usize,

    /// Fraction of samples replaced by the no-data value (0.0-1.0).
    #[arg(long, default_value_t = 0.01)]
    holes: f64,

    /// Seed for the synthetic noise.
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Band no-data value used for the holes.
    #[arg(long, default_value_t = -9999.0, allow_hyphen_values = true)]
    no_data: f64,

    /// User no-data value: masked on input and written at masked
    /// positions on output in place of the band's own.
    #[arg(long, allow_hyphen_values = true)]
    output_no_data: Option<f64>,

    /// Transform to run.
    #[arg(long, value_enum, default_value_t = Kind::Linear)]
    transform: Kind,

    /// Linear: percentage clipped from each histogram tail.
    #[arg(long, default_value_t = 0.0)]
    clip: f64,

    /// Linear: fraction of the output range subtracted after stretching.
    #[arg(long, default_value_t = 0.0)]
    reduction: f64,

    /// Standard deviation: multiplier.
    #[arg(long, default_value_t = Transform::DEFAULT_SIGMA)]
    sigma: f64,

    /// Gamma value.
    #[arg(long, default_value_t = Transform::DEFAULT_GAMMA)]
    gamma: f64,

    /// Binary threshold, in raw units.
    #[arg(long, default_value_t = Transform::DEFAULT_THRESHOLD)]
    threshold: f64,

    /// Hi/low cut value, in raw units.
    #[arg(long, default_value_t = Transform::DEFAULT_THRESHOLD)]
    cut_value: f64,

    /// Histogram equalization bin count.
    #[arg(long, default_value_t = Transform::DEFAULT_BINS)]
    bins: usize,

    /// Logarithmic offset.
    #[arg(long, default_value_t = Transform::DEFAULT_EPSILON)]
    epsilon: f64,

    /// Filter kernel size (odd).
    #[arg(long, default_value_t = Transform::DEFAULT_KERNEL_SIZE)]
    kernel_size: usize,

    /// Number of vertical segments (tile columns).
    #[arg(long, default_value_t = EngineConfig::DEFAULT_VERTICAL_SEGMENTS)]
    vertical: usize,

    /// Number of horizontal segments (tile rows).
    #[arg(long, default_value_t = EngineConfig::DEFAULT_HORIZONTAL_SEGMENTS)]
    horizontal: usize,

    /// Worker count per tile (default: twice the CPU count).
    #[arg(long)]
    workers: Option<usize>,

    /// Rescale output to 0-255.
    #[arg(long)]
    byte_scale: bool,

    /// Compute statistics per tile instead of per band.
    #[arg(long)]
    tile_stats: bool,

    /// Per-tile pool timeout in seconds.
    #[arg(long)]
    timeout: Option<f64>,

    /// Number of runs for averaging.
    #[arg(long, default_value_t = 1, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    runs: usize,

    /// Output diagnostics as JSON instead of human-readable report.
    #[arg(long)]
    json: bool,

    /// Full engine config as a JSON string.
    ///
    /// When provided, all other engine parameter flags are ignored.
    /// The JSON must be a valid `EngineConfig` serialization.
    #[arg(long)]
    config_json: Option<String>,

    /// Log filter used when `RUST_LOG` is unset.
    #[arg(long, default_value = "warn")]
    log_level: String,
}

/// Transform selection.
#[derive(Clone, Copy, ValueEnum)]
enum Kind {
    /// Linear stretch with optional percentile clip.
    Linear,
    /// Stretch over mean plus or minus sigma standard deviations.
    StandardDeviation,
    /// Invert values.
    Inverse,
    /// Two-level threshold.
    Binary,
    /// Clamp values above the cut value.
    HiCut,
    /// Clamp values below the cut value.
    LowCut,
    /// Power-law stretch.
    Gamma,
    /// Histogram equalization.
    HistogramEqualization,
    /// Logarithmic compression.
    Logarithmic,
    /// Box mean filter.
    Mean,
    /// Median filter.
    Median,
    /// Conservative smoothing.
    Conservative,
    /// Gaussian low-pass.
    Gaussian,
    /// Gaussian high-pass.
    GaussianHiPass,
    /// 3x3 Laplacian.
    Laplacian,
    /// 3x3 high-pass.
    HiPass3,
    /// 5x5 high-pass.
    HiPass5,
}

/// Map the CLI selection and its option flags to a [`Transform`].
const fn transform_from_cli(cli: &Cli) -> Transform {
    let kernel_size = cli.kernel_size;
    match cli.transform {
        Kind::Linear => Transform::Linear {
            clip: cli.clip,
            reduction: cli.reduction,
        },
        Kind::StandardDeviation => Transform::StandardDeviation { sigma: cli.sigma },
        Kind::Inverse => Transform::Inverse,
        Kind::Binary => Transform::Binary {
            threshold: cli.threshold,
        },
        Kind::HiCut => Transform::HiCut {
            cut_value: cli.cut_value,
        },
        Kind::LowCut => Transform::LowCut {
            cut_value: cli.cut_value,
        },
        Kind::Gamma => Transform::Gamma { gamma: cli.gamma },
        Kind::HistogramEqualization => Transform::HistogramEqualization { bins: cli.bins },
        Kind::Logarithmic => Transform::Logarithmic {
            epsilon: cli.epsilon,
        },
        Kind::Mean => Transform::Mean { kernel_size },
        Kind::Median => Transform::Median { kernel_size },
        Kind::Conservative => Transform::Conservative { kernel_size },
        Kind::Gaussian => Transform::Gaussian { kernel_size },
        Kind::GaussianHiPass => Transform::GaussianHiPass { kernel_size },
        Kind::Laplacian => Transform::Laplacian,
        Kind::HiPass3 => Transform::HiPass3,
        Kind::HiPass5 => Transform::HiPass5,
    }
}

/// Build an [`EngineConfig`] from CLI arguments.
///
/// If `--config-json` is provided, the JSON is parsed directly and all
/// individual parameter flags are ignored.  Otherwise, a config is
/// assembled from the individual flags.
fn config_from_cli(cli: &Cli) -> Result<EngineConfig, String> {
    if let Some(ref json) = cli.config_json {
        return serde_json::from_str(json).map_err(|e| format!("Error parsing --config-json: {e}"));
    }

    let timeout = cli
        .timeout
        .map(Duration::try_from_secs_f64)
        .transpose()
        .map_err(|e| format!("Invalid --timeout: {e}"))?;

    Ok(EngineConfig {
        transform: transform_from_cli(cli),
        vertical_segments: cli.vertical,
        horizontal_segments: cli.horizontal,
        workers: cli.workers,
        no_data: cli.output_no_data,
        scale: cli.byte_scale.then_some(ScaleRange::BYTE),
        statistics_scope: if cli.tile_stats {
            StatisticsScope::Tile
        } else {
            StatisticsScope::Band
        },
        timeout,
        ..EngineConfig::default()
    })
}

/// Deterministic hash of a sample position.
fn sample_hash(seed: u64, band: usize, index: usize) -> u64 {
    let mut hasher = SipHasher13::new_with_keys(seed, 0x7261_7374_7265_7463);
    hasher.write_usize(band);
    hasher.write_usize(index);
    hasher.finish()
}

/// A diagonal gradient over `[0, 1000]` plus up to 200 units of noise,
/// with `holes` of the samples set to `no_data`.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
fn synthesize(cli: &Cli) -> Result<MemoryRaster, String> {
    let (width, height) = (cli.width as usize, cli.height as usize);
    let hole_cutoff = (cli.holes.clamp(0.0, 1.0) * u64::MAX as f64) as u64;
    let span = (width + height).saturating_sub(2).max(1) as f32;

    let bands = (0..cli.bands)
        .map(|band| {
            let samples = (0..width * height)
                .map(|i| {
                    let hash = sample_hash(cli.seed, band, i);
                    if hash < hole_cutoff {
                        return cli.no_data as f32;
                    }
                    let (x, y) = (i % width, i / width);
                    let gradient = (x + y) as f32 / span * 1000.0;
                    let noise = (hash >> 40) as f32 / (1u64 << 24) as f32 * 200.0;
                    gradient + noise
                })
                .collect();
            BandImage::from_raw(cli.width, cli.height, samples)
                .ok_or_else(|| format!("Cannot build a {width}x{height} band"))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let raster = MemoryRaster::from_bands(bands).map_err(|e| e.to_string())?;
    Ok((0..cli.bands).fold(raster, |r, band| r.with_no_data(band, cli.no_data)))
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = match config_from_cli(&cli) {
        Ok(c) => c,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::FAILURE;
        }
    };

    let source = match synthesize(&cli) {
        Ok(raster) => raster,
        Err(msg) => {
            eprintln!("Error synthesizing raster: {msg}");
            return ExitCode::FAILURE;
        }
    };
    info!(
        width = cli.width,
        height = cli.height,
        bands = cli.bands,
        "synthetic raster ready"
    );

    eprintln!(
        "Raster: {}x{} x {} band(s), {:.1}% holes",
        cli.width,
        cli.height,
        cli.bands,
        cli.holes * 100.0,
    );
    eprintln!("Config: {config:#?}");
    eprintln!("Runs: {}", cli.runs);
    eprintln!();

    let mut all_diagnostics = Vec::with_capacity(cli.runs);

    for run in 0..cli.runs {
        if cli.runs > 1 {
            eprintln!("--- Run {}/{} ---", run + 1, cli.runs);
        }

        let mut sink = match MemoryRaster::blank(source.dimensions(), source.band_count()) {
            Ok(sink) => sink,
            Err(e) => {
                eprintln!("Error allocating output raster: {e}");
                return ExitCode::FAILURE;
            }
        };

        match rastretch_engine::run(&source, &mut sink, &config) {
            Ok(diagnostics) => {
                if cli.json {
                    match serde_json::to_string_pretty(&diagnostics) {
                        Ok(json) => println!("{json}"),
                        Err(e) => {
                            eprintln!("Error serializing diagnostics: {e}");
                            return ExitCode::FAILURE;
                        }
                    }
                } else {
                    println!("{}", diagnostics.report());
                }
                all_diagnostics.push(diagnostics);
            }
            Err(e) => {
                eprintln!("Engine error: {e}");
                return ExitCode::FAILURE;
            }
        }

        if cli.runs > 1 {
            eprintln!();
        }
    }

    // Print summary when multiple runs.
    if cli.runs > 1 {
        print_multi_run_summary(&all_diagnostics);
    }

    ExitCode::SUCCESS
}

/// Print aggregated statistics across multiple runs.
#[allow(clippy::cast_precision_loss)]
fn print_multi_run_summary(all_diagnostics: &[RunDiagnostics]) {
    println!();
    println!(
        "Summary ({} runs)\n{}",
        all_diagnostics.len(),
        "=".repeat(60),
    );

    if all_diagnostics.is_empty() {
        println!("Warning: no diagnostics to summarize");
        return;
    }

    let summarize = |extract: fn(&RunDiagnostics) -> Duration| {
        let values: Vec<f64> = all_diagnostics
            .iter()
            .map(|d| extract(d).as_secs_f64() * 1000.0)
            .collect();
        let min = values.iter().copied().reduce(f64::min).unwrap_or(0.0);
        let max = values.iter().copied().reduce(f64::max).unwrap_or(0.0);
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        (min, mean, max)
    };

    let (min, mean, max) = summarize(|d| d.total_duration);
    println!("Total duration: min={min:.3}ms  mean={mean:.3}ms  max={max:.3}ms");
    let (min, mean, max) = summarize(RunDiagnostics::pool_duration);
    println!("Pool duration:  min={min:.3}ms  mean={mean:.3}ms  max={max:.3}ms");
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn output_no_data_flag_sets_user_no_data() {
        let cli = Cli::try_parse_from(["rastretch-bench", "--output-no-data", "-1"]).unwrap();
        let config = config_from_cli(&cli).unwrap();
        assert_eq!(config.no_data, Some(-1.0));
    }

    #[test]
    fn output_no_data_defaults_to_none() {
        let cli = Cli::try_parse_from(["rastretch-bench"]).unwrap();
        assert_eq!(config_from_cli(&cli).unwrap().no_data, None);
    }
}
