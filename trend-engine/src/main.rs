use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use trend_engine::{
    generate_random_walk, load_file, rank, BacktestResult, BarSeries, BatchEntry, Orchestrator,
    ParameterGrid, ParameterSet, RunOutcome, Timeframe,
};

#[derive(Parser, Debug)]
#[command(name = "trend-engine")]
#[command(version = "0.1.0")]
#[command(about = "Deterministic multi-timeframe trend strategy backtester", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Backtest a single parameter set
    Run {
        #[command(flatten)]
        common: CommonArgs,
    },
    /// Backtest a parameter grid over a worker pool
    Sweep {
        #[command(flatten)]
        common: CommonArgs,

        /// Grid file (TOML or JSON). Uses the built-in grid when omitted.
        #[arg(short, long)]
        grid: Option<PathBuf>,

        /// Worker threads (defaults to the number of CPUs)
        #[arg(short, long)]
        workers: Option<usize>,

        /// Number of ranked entries to report
        #[arg(long, default_value = "10")]
        top: usize,
    },
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// Parameter set file (TOML or JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Data file path (CSV/JSON). If not provided, uses synthetic data.
    #[arg(short = 'f', long)]
    data_file: Option<PathBuf>,

    /// Symbol of the series
    #[arg(short, long, default_value = "BTCUSDT")]
    symbol: String,

    /// Number of synthetic bars
    #[arg(long, default_value = "2000")]
    bars: usize,

    /// Initial price of the synthetic series
    #[arg(long, default_value = "100.0")]
    initial_price: f64,

    /// Seed of the synthetic series
    #[arg(long, default_value = "42")]
    seed: u64,

    /// Per-run timeout in seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    output: OutputFormat,

    /// Pretty print JSON output
    #[arg(long)]
    pretty: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum OutputFormat {
    Json,
    Text,
}

fn main() -> Result<()> {
    // Logs go to stderr; stdout carries the report
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "trend_engine=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Run { common } => run(&common),
        Command::Sweep {
            common,
            grid,
            workers,
            top,
        } => sweep(&common, grid.as_deref(), workers, top),
    }
}

fn load_params(args: &CommonArgs) -> Result<ParameterSet> {
    match &args.config {
        Some(path) => ParameterSet::load(path)
            .with_context(|| format!("loading parameter set from {}", path.display())),
        None => Ok(ParameterSet::default().named("default")),
    }
}

fn load_series(args: &CommonArgs, timeframe: Timeframe) -> Result<BarSeries> {
    let bars = match &args.data_file {
        Some(path) => {
            info!(path = %path.display(), "Loading bars");
            load_file(path).with_context(|| format!("loading bars from {}", path.display()))?
        }
        None => {
            info!(
                bars = args.bars,
                seed = args.seed,
                %timeframe,
                "Generating synthetic bars"
            );
            generate_random_walk(args.bars, args.initial_price, timeframe, args.seed)
        }
    };
    if bars.is_empty() {
        bail!("no bars to backtest");
    }
    Ok(BarSeries::new(args.symbol.clone(), timeframe, bars))
}

fn orchestrator(args: &CommonArgs, workers: Option<usize>) -> Orchestrator {
    let orchestrator = match workers {
        Some(n) => Orchestrator::new(n),
        None => Orchestrator::default(),
    };
    match args.timeout_secs {
        Some(secs) => orchestrator.with_timeout(Duration::from_secs(secs)),
        None => orchestrator,
    }
}

fn to_json<T: serde::Serialize>(value: &T, pretty: bool) -> Result<String> {
    Ok(if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    })
}

fn run(args: &CommonArgs) -> Result<()> {
    let params = load_params(args)?;
    let series = load_series(args, params.timeframes.base)?;
    let result = orchestrator(args, Some(1)).run(params, &series)?;

    match args.output {
        OutputFormat::Json => println!("{}", to_json(&result, args.pretty)?),
        OutputFormat::Text => print_text_report(&result),
    }
    Ok(())
}

fn sweep(args: &CommonArgs, grid: Option<&Path>, workers: Option<usize>, top: usize) -> Result<()> {
    let base = load_params(args)?;
    let grid = match grid {
        Some(path) => load_grid(path)?,
        None => ParameterGrid::default(),
    };
    let sets = grid.expand(&base);
    if sets.is_empty() {
        bail!("parameter grid is empty");
    }
    let series = load_series(args, base.timeframes.base)?;
    let entries = orchestrator(args, workers).run_batch(&sets, &series)?;

    match args.output {
        OutputFormat::Json => println!("{}", to_json(&entries, args.pretty)?),
        OutputFormat::Text => print_sweep_report(&entries, top),
    }
    Ok(())
}

fn load_grid(path: &Path) -> Result<ParameterGrid> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading grid from {}", path.display()))?;
    let grid: ParameterGrid = match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => toml::from_str(&text)?,
        Some("json") => serde_json::from_str(&text)?,
        other => bail!("unsupported grid format: {:?}", other),
    };
    Ok(grid)
}

fn format_profit_factor(value: Option<f64>) -> String {
    value
        .map(|pf| format!("{:.3}", pf))
        .unwrap_or_else(|| "n/a".to_string())
}

fn print_text_report(result: &BacktestResult) {
    let stats = &result.summary_stats;
    let diag = &result.diagnostics;
    let period = match (result.equity_curve.first(), result.equity_curve.last()) {
        (Some(first), Some(last)) => format!(
            "{} to {}",
            first.0.format("%Y-%m-%d %H:%M"),
            last.0.format("%Y-%m-%d %H:%M")
        ),
        _ => "no bars".to_string(),
    };

    println!();
    println!("================================================================");
    println!("  BACKTEST REPORT - {} ({})", result.parameter_set.name, result.symbol);
    println!("================================================================");
    println!();
    println!("  Period: {}", period);
    println!("  Status: {:?}", result.status);
    println!(
        "  Bars: {} processed, {} skipped",
        diag.bars_processed, diag.bars_skipped
    );
    if let Some(tf) = diag.final_timeframe {
        println!(
            "  Final Timeframe: {} ({} switches)",
            tf, diag.timeframe_switches
        );
    }
    println!();
    println!("----------------------------------------------------------------");
    println!("  CAPITAL");
    println!("----------------------------------------------------------------");
    println!("  Initial Capital:  ${:>12.2}", result.initial_capital);
    println!("  Final Equity:     ${:>12.2}", result.final_equity);
    println!(
        "  Total Return:     ${:>12.2} ({:+.2}%)",
        stats.total_return, stats.total_return_pct
    );
    println!();
    println!("----------------------------------------------------------------");
    println!("  RISK METRICS");
    println!("----------------------------------------------------------------");
    println!("  Volatility (Ann): {:>12.2}%", stats.volatility * 100.0);
    println!("  Sharpe Ratio:     {:>12.3}", stats.sharpe_ratio);
    println!("  Sortino Ratio:    {:>12.3}", stats.sortino_ratio);
    println!("  Max Drawdown:     {:>12.2}%", stats.max_drawdown * 100.0);
    println!(
        "  Max DD Duration:  {:>12} bars",
        stats.max_drawdown_duration_bars
    );
    println!();
    println!("----------------------------------------------------------------");
    println!("  TRADE STATISTICS");
    println!("----------------------------------------------------------------");
    println!("  Total Trades:     {:>12}", stats.total_trades);
    println!("  Winning Trades:   {:>12}", stats.winning_trades);
    println!("  Losing Trades:    {:>12}", stats.losing_trades);
    println!("  Win Rate:         {:>12.1}%", stats.win_rate * 100.0);
    println!("  Avg Win:          ${:>12.2}", stats.avg_win);
    println!("  Avg Loss:         ${:>12.2}", stats.avg_loss);
    println!(
        "  Profit Factor:    {:>12}",
        format_profit_factor(stats.profit_factor)
    );
    println!("  Expectancy:       ${:>12.2}", stats.expectancy);
    println!("  Avg Holding:      {:>12.1} bars", stats.avg_holding_bars);
    println!("  Best Trade:       ${:>12.2}", stats.best_trade);
    println!("  Worst Trade:      ${:>12.2}", stats.worst_trade);
    println!();
    println!("----------------------------------------------------------------");
    println!("  SIGNALS & ORDERS");
    println!("----------------------------------------------------------------");
    println!("  Signals:          {:>12}", diag.signals_evaluated);
    println!(
        "  Entries / Exits:  {:>5} / {:<5}",
        diag.entry_signals, diag.exit_signals
    );
    println!("  Orders Submitted: {:>12}", diag.orders_submitted);
    println!(
        "  Orders Suppressed:{:>12} ({} by daily loss limit)",
        diag.orders_suppressed, diag.suppressed_by_daily_limit
    );
    println!("================================================================");

    if !result.trades.is_empty() {
        println!();
        println!("  RECENT TRADES (last 5)");
        println!("----------------------------------------------------------------");
        for trade in result.trades.iter().rev().take(5) {
            println!(
                "  {:?} {} -> {} | P&L: ${:+.2} ({:+.1}%) | {} bars | {:?}",
                trade.side,
                trade.entry_date.format("%Y-%m-%d %H:%M"),
                trade.exit_date.format("%Y-%m-%d %H:%M"),
                trade.pnl,
                trade.pnl_pct,
                trade.holding_bars,
                trade.exit_reason
            );
        }
        println!();
    }
}

fn print_sweep_report(entries: &[BatchEntry], top: usize) {
    let failed: Vec<&BatchEntry> = entries.iter().filter(|e| e.is_failed()).collect();

    println!();
    println!("================================================================");
    println!("  PARAMETER SWEEP - {} runs, {} failed", entries.len(), failed.len());
    println!("================================================================");
    println!(
        "  {:<4} {:<28} {:>8} {:>10} {:>8} {:>7} {:>8}",
        "#", "name", "sharpe", "return %", "max dd %", "trades", "pf"
    );
    for entry in rank(entries).into_iter().take(top) {
        if let Some(result) = entry.result() {
            let stats = &result.summary_stats;
            println!(
                "  {:<4} {:<28} {:>8.3} {:>10.2} {:>8.2} {:>7} {:>8}",
                entry.index,
                entry.name,
                stats.sharpe_ratio,
                stats.total_return_pct,
                stats.max_drawdown * 100.0,
                stats.total_trades,
                format_profit_factor(stats.profit_factor)
            );
        }
    }
    for entry in failed {
        if let RunOutcome::Failed { kind, message } = &entry.outcome {
            println!("  {:<4} {:<28} FAILED [{}] {}", entry.index, entry.name, kind, message);
        }
    }
    println!();
}
