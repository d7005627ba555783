use anyhow::{anyhow, Context};
use fs2::FileExt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use list_courier::browser_manager::ChromeSessionProvider;
use list_courier::core::config::load_config;
use list_courier::events::{ChannelSink, EventSink};
use list_courier::orchestrator::RunOrchestrator;

const USAGE: &str = "usage: list-courier [--config PATH] [--resume | --reset] [--start-page N] [--max-items N] [--headless] [--json-events]";

#[derive(Debug, Default)]
struct CliArgs {
    config: Option<PathBuf>,
    resume: bool,
    reset: bool,
    start_page: Option<u32>,
    max_items: Option<u64>,
    headless: bool,
    json_events: bool,
}

fn parse_args() -> anyhow::Result<CliArgs> {
    let mut out = CliArgs::default();
    let mut args = std::env::args().skip(1);
    while let Some(a) = args.next() {
        let (flag, inline) = match a.split_once('=') {
            Some((f, v)) => (f.to_string(), Some(v.to_string())),
            None => (a.clone(), None),
        };
        let mut value = |name: &str| -> anyhow::Result<String> {
            inline
                .clone()
                .or_else(|| args.next())
                .ok_or_else(|| anyhow!("{} needs a value\n{}", name, USAGE))
        };
        match flag.as_str() {
            "--config" => out.config = Some(PathBuf::from(value("--config")?)),
            "--resume" => out.resume = true,
            "--reset" => out.reset = true,
            "--start-page" => {
                out.start_page = Some(
                    value("--start-page")?
                        .parse()
                        .context("--start-page must be a positive integer")?,
                )
            }
            "--max-items" => {
                out.max_items = Some(
                    value("--max-items")?
                        .parse()
                        .context("--max-items must be a non-negative integer")?,
                )
            }
            "--headless" => out.headless = true,
            "--json-events" => out.json_events = true,
            "-h" | "--help" => {
                println!("{}", USAGE);
                std::process::exit(0);
            }
            other => return Err(anyhow!("unknown argument `{}`\n{}", other, USAGE)),
        }
    }
    if out.resume && out.reset {
        return Err(anyhow!("--resume and --reset are mutually exclusive\n{}", USAGE));
    }
    Ok(out)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,chromiumoxide=warn"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = parse_args()?;
    let mut config = load_config(cli.config.as_deref()).context("failed to load configuration")?;
    if cli.resume {
        config.job.resume = true;
        config.job.reset = false;
    }
    if cli.reset {
        config.job.reset = true;
        config.job.resume = false;
    }
    if cli.start_page.is_some() {
        config.job.start_page = cli.start_page;
    }
    if cli.max_items.is_some() {
        config.job.max_items = cli.max_items;
    }
    if cli.headless {
        config.browser.headless = Some(true);
    }

    // One run per checkpoint file.
    let checkpoint_path = config.resolve_checkpoint_path();
    if let Some(parent) = checkpoint_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("cannot create {}", parent.display()))?;
    }
    let lock_path = checkpoint_path.with_extension("lock");
    let lock_file = std::fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&lock_path)
        .with_context(|| format!("cannot open lock file {}", lock_path.display()))?;
    if lock_file.try_lock_exclusive().is_err() {
        return Err(anyhow!(
            "another run already holds {}; refusing to start",
            lock_path.display()
        ));
    }

    info!(
        "Starting list-courier on {} → {}",
        config.job.source_list_url,
        config.job.output_dir.display()
    );

    let provider = Arc::new(ChromeSessionProvider::new(config.browser.clone()));
    let mut orchestrator = RunOrchestrator::new(config, provider);

    let printer = if cli.json_events {
        let (sink, mut rx) = ChannelSink::new();
        orchestrator = orchestrator.with_events(Arc::new(sink) as Arc<dyn EventSink>);
        Some(tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match serde_json::to_string(&event) {
                    Ok(line) => println!("{}", line),
                    Err(e) => warn!("event not serializable: {}", e),
                }
            }
        }))
    } else {
        None
    };

    let control = orchestrator.control();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; stopping after the current step");
            control.stop();
        }
    });

    let result = orchestrator.run().await;
    drop(orchestrator);
    if let Some(printer) = printer {
        let _ = printer.await;
    }
    let _ = FileExt::unlock(&lock_file);

    match result {
        Ok(report) => {
            eprintln!("{}", report);
            Ok(())
        }
        Err(e) => {
            error!("list-courier failed: {:#}", e);
            std::process::exit(1);
        }
    }
}
