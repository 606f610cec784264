//! Epidemia simulator CLI
//!
//! Builds a synthetic population from property files and command-line
//! overrides, then simulates the epidemic day by day.

use clap::Parser;
use epidemia_core::{ClusterTypeRegistry, RunSummary, SimParams};
use epidemia_env::{ConfigSource, Properties};
use epidemia_sim::{CsvSink, DayLoop, Fanout, RecordSink, RunExport, RunLimits, SimError, TableSink};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use tracing::{error, info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Epidemia agent-based epidemic simulator
#[derive(Parser, Debug)]
#[command(name = "epidemia-sim")]
#[command(about = "Simulate an epidemic in a synthetic population of cities and clusters", long_about = None)]
struct Args {
    /// Property files and name=value overrides, applied in order
    props: Vec<String>,

    /// Fraction of successful exposures that give immunity instead
    #[arg(short, long)]
    auto_immunity: Option<f64>,

    /// Target reproduction number
    #[arg(short, long)]
    infectiousness: Option<f64>,

    /// Initially infected population
    #[arg(short = 'n', long)]
    initial: Option<u32>,

    /// Total population
    #[arg(short, long)]
    population: Option<u32>,

    /// Master seed (0 = from OS entropy)
    #[arg(short, long)]
    random: Option<u64>,

    /// Agent threads (0 = twice the core count)
    #[arg(short = 'T', long)]
    threads: Option<usize>,

    /// Run at least this many days
    #[arg(long)]
    min_days: Option<u32>,

    /// Run at most this many days
    #[arg(long)]
    max_days: Option<u32>,

    /// Write daily output to this file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// CSV instead of a table
    #[arg(long)]
    csv: bool,

    /// Export the whole run to a JSON file
    #[arg(long)]
    json: Option<PathBuf>,

    /// Report every city each day
    #[arg(long)]
    cities: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

/// Reads property files and overrides, then applies dedicated flags on top.
fn load_properties(args: &Args) -> Result<Properties, SimError> {
    let mut props = Properties::new();
    for arg in &args.props {
        if arg.contains('=') {
            props.parse_assignment(arg)?;
        } else {
            props.load_file(arg)?;
        }
    }
    if let Some(v) = args.auto_immunity {
        props.set("auto_immunity", v);
    }
    if let Some(v) = args.infectiousness {
        props.set("infectiousness", v);
    }
    if let Some(v) = args.initial {
        props.set("initial_infected", v);
    }
    if let Some(v) = args.population {
        props.set("population", v);
    }
    if let Some(v) = args.random {
        props.set("random_seed", v);
    }
    if let Some(v) = args.threads {
        props.set("thread_count", v);
    }
    if let Some(v) = args.min_days {
        props.set("min_days", v);
    }
    if let Some(v) = args.max_days {
        props.set("max_days", v);
    }
    Ok(props)
}

fn run(args: &Args) -> Result<RunSummary, SimError> {
    let props = load_properties(args)?;
    let params = SimParams::from_config(&props);
    let registry = ClusterTypeRegistry::from_config(&props)?;
    let limits = RunLimits::from_config(&props);
    let seed = props.get_count("random_seed", 0);

    info!(
        population = params.population,
        initial = params.initial_infected,
        infectiousness = params.infectiousness,
        cluster_types = registry.len(),
        "Configuration loaded"
    );

    let mut export = args
        .json
        .as_ref()
        .map(|_| RunExport::new(seed, params.clone(), registry.clone()).with_properties(props.clone()));
    let mut day_loop = DayLoop::new(params, registry, seed)?
        .with_limits(limits)
        .with_city_breakdown(args.cities);
    if let Some(export) = export.as_mut() {
        export.seed = day_loop.seed();
    }

    let out: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).map_err(|e| SimError::output(path, e))?,
        )),
        None => Box::new(io::stdout().lock()),
    };
    let mut daily: Box<dyn RecordSink> = if args.csv {
        Box::new(CsvSink::new(out))
    } else {
        Box::new(TableSink::new(out))
    };

    let mut sinks = Fanout::new().with(daily.as_mut());
    if let Some(export) = export.as_mut() {
        sinks = sinks.with(export);
    }
    let summary = day_loop.run(&mut sinks)?;
    drop(sinks);
    day_loop.shutdown();

    if let (Some(export), Some(path)) = (export, &args.json) {
        export.write_to_file(path).map_err(|e| SimError::output(path, e))?;
        info!("Exported {} days to {}", export.days.len(), path.display());
    }
    Ok(summary)
}

fn main() {
    let args = Args::parse();

    // Initialize logging
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(io::stderr);
    let installed = match EnvFilter::try_from_default_env() {
        Ok(filter) => tracing::subscriber::set_global_default(builder.with_env_filter(filter).finish()),
        Err(_) => tracing::subscriber::set_global_default(builder.finish()),
    };
    if installed.is_err() {
        eprintln!("Failed to set tracing subscriber");
    }

    info!("Epidemia simulator v{}", env!("CARGO_PKG_VERSION"));
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    match run(&args) {
        Ok(summary) => {
            info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
            info!(
                "Finished after {} days: {} of {} infected, {} dead",
                summary.days, summary.total_infected, summary.population, summary.dead
            );
        }
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    }
}
