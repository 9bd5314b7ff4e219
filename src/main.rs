use candlecast::application::strategies::create_strategy;
use candlecast::application::system::{Run, RunHandle, create_risk_profile};
use candlecast::config::EngineConfig;
use candlecast::domain::frame::{RunContext, RunMode};
use candlecast::infrastructure::exchange::create_adapter;
use clap::{Parser, Subcommand};
use tracing::{Level, error, info};
use tracing_subscriber::EnvFilter;

const EXIT_MISCONFIG: i32 = 2;

#[derive(Parser)]
#[command(
    name = "candlecast",
    version,
    about = "Signal-driven trading strategy execution engine"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Execute a strategy against a backtest frame or a live feed
    Run {
        /// backtest or live
        #[arg(long)]
        mode: String,
        #[arg(long)]
        symbol: String,
        /// Registered strategy name
        #[arg(long)]
        strategy: String,
        /// Registered exchange name
        #[arg(long)]
        exchange: String,
        /// Named frame from frames.toml (required for backtest)
        #[arg(long)]
        frame: Option<String>,
        /// Risk profile name (defaults to CC_RISK_NAME)
        #[arg(long)]
        risk: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(Level::INFO.into()),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let code = match cli.command {
        Command::Run {
            mode,
            symbol,
            strategy,
            exchange,
            frame,
            risk,
        } => run(mode, symbol, strategy, exchange, frame, risk).await,
    };
    std::process::exit(code);
}

async fn run(
    mode: String,
    symbol: String,
    strategy_name: String,
    exchange_name: String,
    frame_name: Option<String>,
    risk_name: Option<String>,
) -> i32 {
    let config = match EngineConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {:#}", e);
            return EXIT_MISCONFIG;
        }
    };

    let mode: RunMode = match mode.parse() {
        Ok(mode) => mode,
        Err(e) => {
            error!("{:#}", e);
            return EXIT_MISCONFIG;
        }
    };

    if mode.is_backtest() && frame_name.is_none() {
        error!("Backtest mode requires --frame");
        return EXIT_MISCONFIG;
    }

    let adapter = match create_adapter(&exchange_name, config.max_retries) {
        Ok(adapter) => adapter,
        Err(e) => {
            error!("{:#}", e);
            return EXIT_MISCONFIG;
        }
    };

    let strategy = match create_strategy(&strategy_name, config.tick_interval) {
        Ok(strategy) => strategy,
        Err(e) => {
            error!("{:#}", e);
            return EXIT_MISCONFIG;
        }
    };

    let risk = risk_name.unwrap_or_else(|| config.risk_name.clone());
    let profile = match create_risk_profile(&risk) {
        Ok(profile) => profile,
        Err(e) => {
            error!("{:#}", e);
            return EXIT_MISCONFIG;
        }
    };

    let frame = match &frame_name {
        Some(name) => match config.find_frame(name) {
            Ok(frame) => Some(frame),
            Err(e) => {
                error!("{:#}", e);
                return EXIT_MISCONFIG;
            }
        },
        None => None,
    };

    let ctx = RunContext {
        mode,
        symbol,
        strategy_name,
        exchange_name,
        frame_name,
    };

    let run = match Run::build(&config, ctx, adapter, strategy, profile, frame) {
        Ok(run) => run,
        Err(e) => {
            error!("Failed to build run: {:#}", e);
            return EXIT_MISCONFIG;
        }
    };
    let handle = run.handle();

    let logger = spawn_event_logger(&handle);

    let mut exec = tokio::spawn(run.execute());
    let result = tokio::select! {
        result = &mut exec => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupt received, stopping run...");
            handle.stop();
            (&mut exec).await
        }
    };
    logger.abort();

    match result {
        Ok(Ok(summary)) => {
            info!(
                "Run complete: opened={}, closed={} (wins={}, losses={}), cancelled={}, rejections={}, pnl={}%",
                summary.signals_opened,
                summary.signals_closed,
                summary.wins,
                summary.losses,
                summary.signals_cancelled,
                summary.risk_rejections,
                summary.cumulative_pnl_percent.round_dp(4)
            );
            0
        }
        Ok(Err(e)) => {
            error!("Run failed: {}", e);
            e.exit_code()
        }
        Err(e) => {
            error!("Run task panicked: {}", e);
            1
        }
    }
}

fn spawn_event_logger(handle: &RunHandle) -> tokio::task::JoinHandle<()> {
    let mut stream = handle.subscribe();
    tokio::spawn(async move {
        while let Some(event) = stream.next().await {
            match serde_json::to_string(&event) {
                Ok(line) => info!("{}", line),
                Err(e) => error!("Failed to encode event: {}", e),
            }
        }
    })
}
