//! pulse_scan command line.
//!
//! ```bash
//! # Simulated Rabi flop on mock hardware
//! pulse_scan simulate --points 41 --repeats 200
//!
//! # Resume-friendly run written to disk with a custom config
//! pulse_scan --config config/pulse_scan.toml simulate --parameters params.json
//!
//! # Validate a configuration file
//! pulse_scan check-config
//! ```

use std::f64::consts::PI;
use std::path::PathBuf;

use anyhow::Context;
use async_trait::async_trait;
use clap::{Parser, Subcommand};

use pulse_scan::calibration::StaticCalibration;
use pulse_scan::config::Settings;
use pulse_scan::experiment::{Experiment, PulseSequence, ScanData, ShotContext};
use pulse_scan::hardware::mock::{
    CallLog, MockCore, MockCpld, MockDds, MockPmt, SimulatedIon,
};
use pulse_scan::hardware::Hardware;
use pulse_scan::parameters::{JsonParameterFile, ParameterLoader, StaticParameters};
use pulse_scan::scan::{Scannable, ScanSpec, SequenceScan};
use pulse_scan::sink::{FileResultSink, MemoryPlot, MemoryResultSink};
use pulse_scan::HookError;

const SEQ_NAME: &str = "RabiFlopping";
const DURATION: &str = "RabiFlopping.duration";

/// Scan-loop engine for trapped-ion pulse sequences
#[derive(Parser)]
#[command(name = "pulse_scan")]
#[command(version)]
#[command(about = "Resumable parameter scans over trapped-ion pulse sequences")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, default_value = "config/pulse_scan.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a simulated Rabi-flop scan on mock hardware
    Simulate {
        /// JSON parameter file; built-in defaults when omitted
        #[arg(short, long)]
        parameters: Option<PathBuf>,

        /// Number of pulse durations
        #[arg(long, default_value_t = 31)]
        points: usize,

        /// Longest pulse duration in microseconds
        #[arg(long, default_value_t = 30.0)]
        max_duration_us: f64,

        /// Shots per point
        #[arg(long, default_value_t = 100)]
        repeats: u32,

        /// Seed for the simulated photon counts
        #[arg(long, default_value_t = 7)]
        seed: u64,
    },

    /// Load and validate the configuration, then print it
    CheckConfig,
}

/// Rabi flop on a single simulated ion.
struct RabiFlopping {
    ion: SimulatedIon,
    rabi_frequency_hz: f64,
}

#[async_trait]
impl PulseSequence for RabiFlopping {
    async fn run_initially(
        &mut self,
        params: &pulse_scan::parameters::ParameterSnapshot,
    ) -> anyhow::Result<()> {
        if let Ok(f) = params.f64("RabiFlopping.rabi_frequency") {
            self.rabi_frequency_hz = f;
        }
        Ok(())
    }

    async fn set_subsequence(&mut self, ctx: &mut ShotContext<'_>) -> anyhow::Result<()> {
        let duration = ctx.get_variable_parameter(DURATION)?;
        let p_dark = (PI * self.rabi_frequency_hz * duration).sin().powi(2);
        self.ion.set_dark_probability(p_dark).await;
        Ok(())
    }

    async fn sequence(&mut self, ctx: &mut ShotContext<'_>) -> anyhow::Result<()> {
        let detuning = ctx.value("RabiFlopping.detuning")?;
        let freq = ctx
            .frequencies
            .calc_frequency("S-1/2D-5/2", detuning, None, Some("dds_729G"))?;
        let dds = ctx.hardware.dds_mut("dds_729G")?;
        dds.set(freq, 1.0).await?;
        dds.switch(true).await?;
        dds.switch(false).await?;
        Ok(())
    }

    async fn run_after(&mut self, seq_name: &str, data: &ScanData) -> Result<(), HookError> {
        let Some(dark) = data.series("dark_ions:1") else {
            return Err(HookError::Missing);
        };
        let peak = dark
            .iter()
            .zip(data.x())
            .filter(|(p, _)| p.is_finite())
            .max_by(|a, b| a.0.total_cmp(b.0));
        if let Some((p, t)) = peak {
            tracing::info!(seq_name, pi_time_s = t, excitation = p, "Estimated pi time");
        }
        Ok(())
    }
}

fn default_parameters(repeats: u32) -> StaticParameters {
    StaticParameters::new()
        .with("StateReadout.readout_mode", "pmt")
        .with("StateReadout.repeat_each_measurement", repeats as f64)
        .with("StateReadout.threshold_list", vec![10.0])
        .with_units("StateReadout.pmt_readout_duration", 1.0, "ms")
        .with_units("RabiFlopping.rabi_frequency", 25.0, "kHz")
        .with("RabiFlopping.detuning", 0.0)
        .with("dds_cw_parameters.729G", vec![220.0, 1.0, 0.0, 5.0])
        .with("dds_cw_parameters.397", vec![78.0, 0.5, 1.0, 10.0])
}

async fn simulate(
    settings: &Settings,
    parameters: Option<PathBuf>,
    points: usize,
    max_duration_us: f64,
    repeats: u32,
    seed: u64,
) -> anyhow::Result<()> {
    let log = CallLog::new();
    let ion = SimulatedIon::new(20.0, 1.5);
    let hardware = Hardware::new(Box::new(MockCore::new(log.clone())))
        .with_cpld(Box::new(MockCpld::new("urukul0_cpld", log.clone())))
        .with_dds(Box::new(MockDds::new("dds_729G", log.clone())))
        .with_dds(Box::new(MockDds::new("dds_397", log.clone())))
        .with_pmt(Box::new(MockPmt::simulated(ion.clone(), seed, log.clone())));

    let spec = ScanSpec::new().sequence(
        SEQ_NAME,
        SequenceScan::new("Rabi").axis(
            DURATION,
            Scannable::range(0.0, max_duration_us * 1e-6, points),
        ),
    );
    let program = RabiFlopping {
        ion,
        rabi_frequency_hz: 25e3,
    };

    let experiment = Experiment::new(SEQ_NAME, spec, hardware, program)
        .with_settings(settings)
        .with_live_plot(MemoryPlot::new())
        .with_calibration(StaticCalibration::new([("S-1/2D-5/2", 0.0)]));
    let experiment = if settings.storage.write_artifacts {
        experiment.with_sink(FileResultSink::new(&settings.storage.data_root))
    } else {
        experiment.with_sink(MemoryResultSink::new())
    };

    let loader: Box<dyn ParameterLoader> = match parameters {
        Some(path) => Box::new(JsonParameterFile::new(path)),
        None => Box::new(default_parameters(repeats)),
    };

    let mut engine = experiment.prepare(loader.as_ref()).await?;
    let outcome = engine.run_scan().await?;
    let stats = engine.analyze().await?;

    tracing::info!(
        outcome = ?outcome,
        delivered = stats.delivered,
        failed = stats.failed,
        device_calls = log.calls().await.len(),
        "Simulation finished"
    );
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    pulse_scan::logging::init(&settings.application);

    match cli.command {
        Commands::Simulate {
            parameters,
            points,
            max_duration_us,
            repeats,
            seed,
        } => simulate(&settings, parameters, points, max_duration_us, repeats, seed).await,
        Commands::CheckConfig => {
            println!("{}", serde_json::to_string_pretty(&settings)?);
            Ok(())
        }
    }
}
