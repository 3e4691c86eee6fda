// src/main.rs - ce-host command line
use std::path::PathBuf;
use std::sync::Arc;

use capillary_rs::config::QueuePolicy;
use capillary_rs::hardware::sim::CommandLog;
use capillary_rs::motion::ProfileGenerator;
use capillary_rs::{
    CancelToken, Config, HardwareRegistry, Method, MethodRun, Point3, RunContext, SafeMove,
    Sequencer, Template, load_config,
};
use clap::{Parser, Subcommand};
use tokio::time::Duration;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Capillary electrophoresis instrument host
#[derive(Parser, Debug)]
#[command(name = "ce-host", version, about = "Collision-free inlet transfers and method runs.")]
struct Cli {
    /// Path to the system TOML config
    #[arg(short, long, default_value = "system.toml")]
    config: PathBuf,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one or more method files
    Run {
        /// Method files, run in the given order
        #[arg(short, long = "method", required = true, num_args = 1..)]
        methods: Vec<PathBuf>,

        /// Repetitions per method (overrides the config)
        #[arg(short, long)]
        repetitions: Option<usize>,

        /// Queue order (overrides the config)
        #[arg(long, value_enum)]
        queue: Option<QueueArg>,
    },
    /// Print the transfer plan between two points as JSON
    Plan {
        /// Start point as X,Y,Z
        #[arg(long, value_parser = parse_point)]
        from: Point3,

        /// End point as X,Y,Z
        #[arg(long, value_parser = parse_point)]
        to: Point3,
    },
    /// List the wells and ledges of the template
    Wells,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum QueueArg {
    Sequence,
    Method,
}

impl From<QueueArg> for QueuePolicy {
    fn from(arg: QueueArg) -> Self {
        match arg {
            QueueArg::Sequence => QueuePolicy::Sequence,
            QueueArg::Method => QueuePolicy::Method,
        }
    }
}

fn parse_point(s: &str) -> Result<Point3, String> {
    let values: Vec<f64> = s
        .split(',')
        .map(|v| v.trim().parse::<f64>().map_err(|e| format!("'{}': {}", v, e)))
        .collect::<Result<_, _>>()?;
    match values[..] {
        [x, y, z] => Ok(Point3::new(x, y, z)),
        _ => Err(format!("expected X,Y,Z, got '{}'", s)),
    }
}

fn load_template(config: &Config) -> Result<Template, BoxError> {
    match &config.template.path {
        Some(path) => Ok(Template::load(path)?),
        None => {
            tracing::warn!("No template configured; running without wells or ledges");
            Ok(Template::default())
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .init();

    let config_path = cli.config.display().to_string();
    tracing::info!("Loading configuration from: {}", config_path);
    let config = load_config(&config_path).map_err(|e| {
        tracing::error!("Failed to load config from '{}': {}", config_path, e);
        Box::new(e) as BoxError
    })?;
    tracing::info!("System: {}", config.system.name);

    let template = Arc::new(load_template(&config)?);
    let log = CommandLog::new();
    let registry = HardwareRegistry::simulated(
        log.clone(),
        config.profile.clone(),
        Duration::from_millis(config.planner.poll_interval_ms),
    );
    let slots = registry.build(&config.hardware)?;

    match cli.command {
        Commands::Wells => {
            println!(
                "bounds: ({}, {}) - ({}, {})",
                template.bounds.lower_x,
                template.bounds.lower_y,
                template.bounds.upper_x,
                template.bounds.upper_y
            );
            for well in template.wells() {
                let p = well.position();
                println!("well   {:<16} ({:.3}, {:.3})", well.name, p.x, p.y);
            }
            for ledge in template.ledges() {
                let p = ledge.shape.center();
                println!(
                    "ledge  {:<16} ({:.3}, {:.3}) height {:.3}",
                    ledge.name, p.x, p.y, ledge.height
                );
            }
        }
        Commands::Plan { from, to } => {
            let planner = SafeMove::new(
                template.clone(),
                slots.inlet_z()?,
                slots.xy()?,
                ProfileGenerator::new(config.profile.clone()),
                config.planner.clearance_tolerance,
            );
            let plan = planner.plan(from, to)?;
            println!("{}", serde_json::to_string_pretty(&plan)?);
        }
        Commands::Run {
            methods,
            repetitions,
            queue,
        } => {
            let repetitions = repetitions.unwrap_or(config.sequencer.repetitions);
            let runs = methods
                .iter()
                .map(|path| Method::load(path).map(|m| MethodRun::new(m, repetitions)))
                .collect::<Result<Vec<_>, _>>()?;

            let ctx = RunContext::from_config(&config, template.clone(), slots)?;
            let sequencer = Sequencer::new(ctx, &config);
            let policy = queue.map(QueuePolicy::from).unwrap_or(config.sequencer.queue);
            sequencer.enqueue_with(&runs, policy).await?;

            let cancel = CancelToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("Interrupt received, stopping run");
                    on_signal.cancel();
                }
            });

            let report = sequencer.run(&cancel).await.map_err(|e| {
                tracing::error!("Run failed: {}", e);
                Box::new(e) as BoxError
            })?;
            tracing::info!("{} hardware commands issued", log.len());
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_point() {
        assert_eq!(parse_point("1, 2.5,-3").unwrap(), Point3::new(1.0, 2.5, -3.0));
        assert!(parse_point("1,2").is_err());
        assert!(parse_point("a,b,c").is_err());
    }

    #[test]
    fn test_cli_parses_run() {
        let cli = Cli::parse_from([
            "ce-host", "--config", "lab.toml", "run", "--method", "a.txt", "b.txt", "--queue", "method",
        ]);
        assert_eq!(cli.config, PathBuf::from("lab.toml"));
        match cli.command {
            Commands::Run { methods, queue, .. } => {
                assert_eq!(methods.len(), 2);
                assert!(matches!(queue, Some(QueueArg::Method)));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
