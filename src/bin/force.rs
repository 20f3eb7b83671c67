use clap::{command, Parser};
use force::{
    config::RunnerConfig, interpreter::run_script, logging, Error, Group, Runner, RuntimeResult,
};
use std::path::PathBuf;
use tracing::{debug, info, warn};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Script to run
    script: PathBuf,

    /// Path to a JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug logging and verbose lookup errors
    #[arg(short, long)]
    verbose: bool,
}

async fn run(cli: &Cli) -> RuntimeResult<()> {
    let mut config = match &cli.config {
        Some(path) => RunnerConfig::from_file(path)?,
        None => RunnerConfig::default(),
    };
    config.debug |= cli.verbose;
    debug!("config: {:?}", config);

    let script = std::fs::read_to_string(&cli.script)
        .map_err(|e| Error::from(e).wrap(format!("reading {}", cli.script.display())))?;

    let runner = Runner::new(config);
    let group = Group::new(&runner)?;
    run_script(&group, &script).await?;
    info!(processes = runner.processes().len(), "setup finished");

    runner.start()?;
    let code = tokio::select! {
        code = runner.wait() => code?,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted, shutting down");
            runner.stop().await?;
            runner.exit_code().unwrap_or(130)
        }
    };
    if let Err(e) = group.close().await {
        warn!("closing setup resources failed: {}", e);
    }

    match code {
        0 => Ok(()),
        code => Err(Error::Exit(code)),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = logging::init(cli.verbose) {
        eprintln!("{}", e);
    }

    match run(&cli).await {
        Ok(()) => {}
        Err(Error::Exit(code)) => std::process::exit(code),
        Err(e) => {
            eprintln!("{}", e.report());
            std::process::exit(1);
        }
    }
}
