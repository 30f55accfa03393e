use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use peerscout::config::Settings;
use peerscout::overlay;
use peerscout::peers::{self, Candidate};
use peerscout::scheduler::{ProbeScheduler, Progress};

#[derive(Parser)]
#[command(
    name = "peerscout",
    about = "Find and select the lowest-latency public overlay peers",
    version,
    long_about = None
)]
struct Cli {
    /// Settings file (TOML). Defaults to $PEERSCOUT_CONFIG when set
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Probe public peers, pick the best and write them to the overlay config
    Find {
        #[command(flatten)]
        source: SourceArgs,

        #[command(flatten)]
        probe: ProbeArgs,

        /// Number of best peers to select
        #[arg(long)]
        best: Option<usize>,

        /// Maximum selected peers from any single country (0 = unlimited)
        #[arg(long)]
        max_from_country: Option<usize>,

        /// Overlay config file to update (empty string disables the update)
        #[arg(long)]
        yggdrasil_conf: Option<PathBuf>,

        /// Overwrite existing peers in the config file
        #[arg(long)]
        rewrite_config_peers: bool,

        /// Run even if the config has peers or looks read-only
        #[arg(long)]
        force: bool,

        /// Select and print peers without touching the config file
        #[arg(long)]
        dry_run: bool,
    },

    /// Probe every candidate and print its latency statistics
    Probe {
        #[command(flatten)]
        source: SourceArgs,

        #[command(flatten)]
        probe: ProbeArgs,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// List discovered candidate peers without probing
    List {
        #[command(flatten)]
        source: SourceArgs,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args)]
struct SourceArgs {
    /// Repository with the public peers list
    #[arg(long)]
    repo_url: Option<String>,

    /// Local checkout of the public peers repository (skips git)
    #[arg(long)]
    peers_dir: Option<PathBuf>,

    /// JSON file caching the peers list
    #[arg(long)]
    yggdrasil_peers_json: Option<PathBuf>,
}

impl SourceArgs {
    fn apply(self, settings: &mut Settings) {
        if let Some(url) = self.repo_url {
            settings.repo_url = url;
        }
        if let Some(dir) = self.peers_dir {
            settings.peers_dir = Some(dir);
        }
        if let Some(path) = self.yggdrasil_peers_json {
            settings.peers_cache = non_empty(path);
        }
    }
}

#[derive(Args)]
struct ProbeArgs {
    /// Number of parallel ping processes
    #[arg(long)]
    parallel: Option<usize>,

    /// Number of ping packets per peer
    #[arg(long)]
    pings: Option<u32>,

    /// Interval between pings in seconds
    #[arg(long)]
    ping_interval: Option<f64>,

    /// Seconds before a ping process is killed
    #[arg(long)]
    probe_timeout: Option<f64>,
}

impl ProbeArgs {
    fn apply(self, settings: &mut Settings) {
        if let Some(parallel) = self.parallel {
            settings.parallel = parallel;
        }
        if let Some(pings) = self.pings {
            settings.pings = pings;
        }
        if let Some(interval) = self.ping_interval {
            settings.ping_interval = interval;
        }
        if let Some(timeout) = self.probe_timeout {
            settings.probe_timeout = Some(timeout);
        }
    }
}

fn non_empty(path: PathBuf) -> Option<PathBuf> {
    (!path.as_os_str().is_empty()).then_some(path)
}

fn init_tracing(cli: &Cli) {
    let default_level = if cli.quiet {
        "warn"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if cli.log_json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Draw a one-line progress counter on stderr until the batch finishes.
fn spawn_progress(mut rx: watch::Receiver<Progress>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let p = *rx.borrow_and_update();
            if p.total == 0 {
                continue;
            }
            let mut err = std::io::stderr().lock();
            let _ = write!(err, "\rprobed {}/{} ({} in flight)   ", p.completed, p.total, p.in_flight);
            let _ = err.flush();
            if p.is_done() {
                let _ = writeln!(err);
                break;
            }
        }
    })
}

/// Run `scheduler` over `candidates`, showing progress when appropriate.
async fn probe_with_progress(
    scheduler: ProbeScheduler,
    settings: &Settings,
    candidates: &[Candidate],
    show_progress: bool,
) -> Result<(peerscout::scheduler::ProbeBatch, Vec<Candidate>)> {
    let progress = show_progress.then(|| spawn_progress(scheduler.subscribe()));
    let result = peerscout::select_from(&scheduler, settings, candidates).await;
    drop(scheduler);
    if let Some(handle) = progress {
        let _ = handle.await;
    }
    result
}

fn print_candidates(candidates: &[Candidate]) {
    println!("{:<40} | {:<15} | {:<20} | URL", "Address", "Region", "Country");
    println!("{:-<40}-|-{:-<15}-|-{:-<20}-|-{:-<30}", "", "", "", "");
    for c in candidates {
        println!(
            "{:<40} | {:<15} | {:<20} | {}",
            c.address(),
            c.region(),
            c.locality(),
            c.url()
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli);

    let mut settings = Settings::load_or_default(cli.config.as_deref())?;
    let show_progress = !cli.quiet && !cli.verbose && !cli.log_json;

    match cli.command {
        Commands::Find {
            source,
            probe,
            best,
            max_from_country,
            yggdrasil_conf,
            rewrite_config_peers,
            force,
            dry_run,
        } => {
            source.apply(&mut settings);
            probe.apply(&mut settings);
            if let Some(best) = best {
                settings.best = best;
            }
            if let Some(cap) = max_from_country {
                settings.max_per_locality = cap;
            }
            if let Some(path) = yggdrasil_conf {
                settings.overlay_config = non_empty(path);
            }
            settings.validate()?;

            let conf = if dry_run { None } else { settings.overlay_config.clone() };
            if let Some(conf) = &conf {
                if !force && !overlay::is_writable(conf) {
                    anyhow::bail!("cannot write to config file: {}", conf.display());
                }
                if !rewrite_config_peers && !force {
                    let has_peers = overlay::has_peers(conf).unwrap_or_else(|e| {
                        tracing::warn!(path = %conf.display(), error = %e, "cannot read config file");
                        false
                    });
                    if has_peers {
                        tracing::warn!(
                            path = %conf.display(),
                            "config already has peers; use --rewrite-config-peers or --force to overwrite"
                        );
                        return Ok(());
                    }
                }
            }

            tracing::info!("fetching public peers");
            let candidates = peers::load_candidates(&settings).await?;
            if candidates.is_empty() {
                anyhow::bail!("no peers available for testing");
            }

            let scheduler = ProbeScheduler::from_settings(&settings)?;
            let (_, best) = probe_with_progress(scheduler, &settings, &candidates, show_progress).await?;
            if best.is_empty() {
                anyhow::bail!("no suitable peers found");
            }

            println!("Best peers selected:");
            for peer in &best {
                println!("  {:<50} {}", peer.url(), peer);
            }

            if let Some(conf) = &conf {
                let urls: Vec<&str> = best.iter().map(|p| p.url()).collect();
                overlay::write_peers(conf, &urls)
                    .with_context(|| format!("failed to update config file {}", conf.display()))?;
                tracing::info!(path = %conf.display(), "configuration updated successfully");
            }
        }
        Commands::Probe { source, probe, json } => {
            source.apply(&mut settings);
            probe.apply(&mut settings);
            settings.validate()?;

            let candidates = peers::load_candidates(&settings).await?;
            let scheduler = ProbeScheduler::from_settings(&settings)?;
            let (batch, _) =
                probe_with_progress(scheduler, &settings, &candidates, show_progress && !json).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&batch)?);
            } else {
                println!(
                    "{:<40} | {:<20} | {:>5} | {:>8} | {:>8} | {:>8} | {:>8} | Status",
                    "Address", "Country", "Loss%", "Min", "Avg", "Max", "Mdev"
                );
                println!(
                    "{:-<40}-|-{:-<20}-|-{:-<5}-|-{:-<8}-|-{:-<8}-|-{:-<8}-|-{:-<8}-|-{:-<10}",
                    "", "", "", "", "", "", "", ""
                );
                for s in &batch.statistics {
                    let status = match s.failure_code() {
                        0 => s.status().to_string(),
                        code => format!("failed ({code})"),
                    };
                    println!(
                        "{:<40} | {:<20} | {:>5} | {:>8.3} | {:>8.3} | {:>8.3} | {:>8.3} | {}",
                        s.candidate().address(),
                        s.candidate().locality(),
                        s.packet_loss_percent(),
                        s.rtt_min(),
                        s.rtt_avg(),
                        s.rtt_max(),
                        s.rtt_jitter(),
                        status
                    );
                }
                println!(
                    "\n{} of {} peers answered in {:.1}s",
                    batch.successes(),
                    batch.statistics.len(),
                    batch.elapsed.as_secs_f64()
                );
            }
        }
        Commands::List { source, json } => {
            source.apply(&mut settings);
            settings.validate()?;

            let candidates = peers::load_candidates(&settings).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&candidates)?);
            } else if candidates.is_empty() {
                println!("No peers found.");
            } else {
                print_candidates(&candidates);
            }
        }
    }

    Ok(())
}
