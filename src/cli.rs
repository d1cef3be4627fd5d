//! Command-line interface for the portfolio analyzer.

use roboport::config::RoboPortConfig;
use roboport::data::{load_series_csv, DataConfig, InMemoryPriceSource};
use roboport::error::{AllocationError, Result};
use roboport::pipeline::PortfolioAnalyzer;
use roboport::report::ReportFormatter;
use roboport::types::Holding;

use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// RoboPort - compare allocation strategies for a stock portfolio.
#[derive(Parser)]
#[command(name = "roboport")]
#[command(version)]
#[command(about = "Compare risk parity, beta, Sharpe and Markowitz allocations for a portfolio")]
#[command(long_about = None)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Analyze a portfolio and recommend the best strategy
    Analyze {
        /// Wide price CSV (Date,TICKER1,TICKER2,...)
        #[arg(short, long)]
        prices: Option<PathBuf>,

        /// Benchmark price CSV (Date,Close)
        #[arg(short, long)]
        benchmark: Option<PathBuf>,

        /// Holding as TICKER=WEIGHT (repeatable; WEIGHT may end in %)
        #[arg(short = 'H', long = "holding")]
        holdings: Vec<Holding>,

        /// TOML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Seed for the Monte-Carlo search
        #[arg(long)]
        seed: Option<u64>,

        /// Number of random portfolios
        #[arg(long)]
        portfolios: Option<usize>,

        /// Analysis date (YYYY-MM-DD); defaults to the last price date
        #[arg(long)]
        as_of: Option<NaiveDate>,

        /// Total portfolio amount in dollars
        #[arg(short, long)]
        amount: Option<f64>,

        /// Write the efficient frontier to this CSV file
        #[arg(long)]
        frontier_csv: Option<PathBuf>,
    },

    /// Generate an example configuration file
    InitConfig {
        /// Output path for config file
        #[arg(short, long, default_value = "roboport.toml")]
        output: PathBuf,
    },
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

impl Cli {
    /// Initialize logging based on verbosity level.
    pub fn init_logging(&self) {
        let level = match self.verbose {
            0 => Level::WARN,
            1 => Level::INFO,
            2 => Level::DEBUG,
            _ => Level::TRACE,
        };

        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .with_target(false)
            .with_writer(std::io::stderr)
            .finish();

        if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
            eprintln!("Failed to set tracing subscriber: {}", e);
        }
    }
}

/// Run the CLI application.
pub fn run() -> Result<()> {
    let cli = Cli::parse();
    cli.init_logging();

    match &cli.command {
        Commands::Analyze {
            prices,
            benchmark,
            holdings,
            config,
            seed,
            portfolios,
            as_of,
            amount,
            frontier_csv,
        } => {
            let mut file_config = match config {
                Some(path) => RoboPortConfig::load(path)?,
                None => RoboPortConfig::default(),
            };
            if let Some(seed) = seed {
                file_config.optimization.seed = Some(*seed);
            }
            if let Some(n) = portfolios {
                file_config.optimization.num_portfolios = *n;
            }
            if let Some(date) = as_of {
                file_config.analysis.as_of = Some(date.format("%Y-%m-%d").to_string());
            }
            if let Some(amount) = amount {
                file_config.portfolio.amount = *amount;
            }
            if !holdings.is_empty() {
                file_config.portfolio.holdings = holdings.clone();
            }

            run_analysis(
                &file_config,
                prices.as_deref(),
                benchmark.as_deref(),
                frontier_csv.as_deref(),
                cli.output,
            )
        }

        Commands::InitConfig { output } => init_config(output),
    }
}

fn data_config(file_config: &RoboPortConfig) -> DataConfig {
    DataConfig {
        date_format: file_config.data.date_format.clone(),
        delimiter: file_config.data.delimiter.map(|c| c as u8),
        ..Default::default()
    }
}

fn run_analysis(
    file_config: &RoboPortConfig,
    prices: Option<&Path>,
    benchmark: Option<&Path>,
    frontier_csv: Option<&Path>,
    output: OutputFormat,
) -> Result<()> {
    let data_config = data_config(file_config);

    let prices_path = prices
        .map(Path::to_path_buf)
        .or_else(|| file_config.data.prices.as_ref().map(PathBuf::from))
        .ok_or_else(|| AllocationError::ConfigError("No price file given".to_string()))?;
    let mut source = InMemoryPriceSource::from_csv(&prices_path, &data_config)?;

    let benchmark_path = benchmark
        .map(Path::to_path_buf)
        .or_else(|| file_config.data.benchmark.as_ref().map(PathBuf::from));
    if let Some(path) = benchmark_path {
        let series = load_series_csv(&path, &data_config)?;
        source.insert(file_config.analysis.benchmark.clone(), series);
    }

    let mut analysis = file_config.to_analysis_config()?;
    if analysis.as_of.is_none() {
        analysis.as_of = source.last_date();
    }

    let holdings = &file_config.portfolio.holdings;
    info!(
        "Running analysis for {}",
        holdings
            .iter()
            .map(|h| h.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    );

    let report = PortfolioAnalyzer::new(source, analysis).run(holdings)?;

    if let Some(path) = frontier_csv {
        fs::write(path, ReportFormatter::frontier_csv(&report))?;
        info!("Wrote efficient frontier to {}", path.display());
    }

    match output {
        OutputFormat::Text => ReportFormatter::print_report(&report, file_config.portfolio.amount),
        OutputFormat::Json => println!("{}", report.to_json()?),
    }

    Ok(())
}

fn init_config(output: &PathBuf) -> Result<()> {
    let example = RoboPortConfig::example();
    fs::write(output, example)?;
    println!("Created example configuration file: {}", output.display());
    println!("\nEdit this file to describe your portfolio, then run:");
    println!("  roboport analyze -c {}", output.display());
    Ok(())
}
