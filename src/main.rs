use adios_core::config::KnobConfig;
use adios_core::host::{self, SimClock, SimulatedDevice, SimulationConfig, WorkloadPattern};
use adios_core::metrics::Metrics;
use adios_core::request::OpType;
use adios_core::IoScheduler;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "adios-core")]
#[command(about = "Adaptive-deadline block I/O scheduler core", long_about = None)]
struct Cli {
    /// Log verbosity, passed through to `RUST_LOG`-style filtering if set.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Drive a synthetic workload through the scheduler core end-to-end.
    Simulate {
        /// Workload offset pattern: sequential, random, or mixed.
        #[arg(short, long, default_value = "mixed")]
        pattern: String,

        /// Block size in bytes.
        #[arg(short = 'b', long, default_value = "65536")]
        block_size: u32,

        /// Simulated device capacity in bytes.
        #[arg(long, default_value_t = 64 * 1024 * 1024 * 1024)]
        device_size: u64,

        /// Percentage of requests that are reads (0-100).
        #[arg(short = 'r', long, default_value = "70")]
        read_percent: u8,

        /// Number of requests to submit.
        #[arg(short = 'n', long, default_value = "10000")]
        num_requests: u64,

        /// Head-insert (priority-queue bypass) every Nth request; 0 disables.
        #[arg(long, default_value = "0")]
        head_insert_every: u64,

        /// RNG seed, for reproducible runs.
        #[arg(long, default_value = "1")]
        seed: u64,

        /// Optional JSON file of knob overrides (see `KnobConfig`).
        #[arg(long)]
        knobs: Option<PathBuf>,

        /// Emit the final metrics snapshot as JSON instead of text.
        #[arg(long)]
        json: bool,
    },
    /// Print the current learned latency model and batch high-water marks.
    /// Only meaningful paired with `--knobs` against a prior run's output in
    /// a real deployment; here it reports a freshly initialized core's
    /// knob defaults and cold model state.
    Inspect {
        #[arg(long)]
        knobs: Option<PathBuf>,
    },
    /// Reset batch-queue high-water marks and/or the learned latency model.
    Reset {
        #[arg(long)]
        bq_stats: bool,
        #[arg(long)]
        lat_model: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cli.log_level.clone())),
        )
        .init();

    match cli.command {
        Commands::Simulate {
            pattern,
            block_size,
            device_size,
            read_percent,
            num_requests,
            head_insert_every,
            seed,
            knobs,
            json,
        } => {
            let pattern: WorkloadPattern = pattern.parse()?;
            let sched = IoScheduler::init_sched()?;
            if let Some(path) = knobs {
                let cfg = KnobConfig::from_json_file(&path)?;
                cfg.apply(&sched.knobs)?;
            }

            let metrics = Metrics::new();
            let device = SimulatedDevice::default();
            let clock = SimClock::new();
            let sim_cfg = SimulationConfig {
                pattern,
                block_size,
                device_size_bytes: device_size,
                read_percent,
                num_requests,
                head_insert_every,
                seed,
            };

            let snapshot = host::run_simulation(&sched, &metrics, &device, &clock, &sim_cfg);
            sched.exit_sched();

            if json {
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            } else {
                println!("submitted            : {}", snapshot.submitted);
                println!("dispatched           : {}", snapshot.dispatched);
                println!("completed            : {}", snapshot.completed);
                println!("head_inserted        : {}", snapshot.head_inserted);
                println!("dropped_large_samples: {}", snapshot.dropped_large_samples);
                println!("avg_latency_ns       : {}", snapshot.avg_latency_ns);
                println!("min_latency_ns       : {}", snapshot.min_latency_ns);
                println!("max_latency_ns       : {}", snapshot.max_latency_ns);
                for op in [OpType::Read, OpType::Write, OpType::Discard] {
                    println!("\nlat_model_{op}:\n{}", sched.lat_model_snapshot(op));
                }
                println!("\nbatch_actual_max:\n{}", sched.batch_high_water_marks());
            }
        }
        Commands::Inspect { knobs } => {
            let sched = IoScheduler::init_sched()?;
            if let Some(path) = knobs {
                let cfg = KnobConfig::from_json_file(&path)?;
                cfg.apply(&sched.knobs)?;
            }
            println!("adios_version: {}", adios_core::knobs::ADIOS_VERSION);
            for op in [OpType::Read, OpType::Write, OpType::Discard] {
                println!("\nlat_model_{op}:\n{}", sched.lat_model_snapshot(op));
            }
            println!("\nbatch_actual_max:\n{}", sched.batch_high_water_marks());
        }
        Commands::Reset { bq_stats, lat_model } => {
            let sched = IoScheduler::init_sched()?;
            if bq_stats {
                sched.reset_bq_stats();
                println!("reset_bq_stats: ok");
            }
            if lat_model {
                sched.reset_lat_model();
                println!("reset_lat_model: ok");
            }
            if !bq_stats && !lat_model {
                println!("nothing to reset: pass --bq-stats and/or --lat-model");
            }
        }
    }

    Ok(())
}
