//! Command-line interface for freshness.
//!
//! `watch` runs the subsystem against a live entry URL with native stores,
//! reading presentation actions and platform events from stdin. `check`,
//! `purge` and `init-config` expose the individual pieces.

use crate::config::FreshnessConfig;
use crate::invalidator::CacheInvalidator;
use crate::platform::Reloader;
use crate::probe::{HttpVersionProbe, Verdict, VersionProbe};
use crate::scheduler::{FreshnessService, FreshnessState, Phase};
use crate::stores::{DirCacheStorage, FileKeyStore};
use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

/// freshness - detect newly deployed client builds and refresh safely
#[derive(Parser, Debug)]
#[command(name = "freshness")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: ~/.config/freshness/config.yaml)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Log level for the debug log
    #[arg(long, global = true, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevelArg>,
}

/// Log level accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogLevelArg {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevelArg {
    pub fn to_level_filter(self) -> log::LevelFilter {
        match self {
            LogLevelArg::Off => log::LevelFilter::Off,
            LogLevelArg::Error => log::LevelFilter::Error,
            LogLevelArg::Warn => log::LevelFilter::Warn,
            LogLevelArg::Info => log::LevelFilter::Info,
            LogLevelArg::Debug => log::LevelFilter::Debug,
            LogLevelArg::Trace => log::LevelFilter::Trace,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Watch an application for new builds until refreshed or interrupted
    Watch {
        #[command(flatten)]
        overrides: Overrides,

        /// Command run to reload the client (default: print a notice)
        #[arg(long, value_name = "COMMAND")]
        reload_command: Option<String>,
    },
    /// Probe once and report whether the loaded build is stale
    Check {
        #[command(flatten)]
        overrides: Overrides,
    },
    /// Purge named caches and persisted update bookkeeping
    Purge,
    /// Write a default config file
    InitConfig {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

/// Per-invocation overrides layered on top of the config file.
#[derive(Args, Debug, Default, Clone)]
pub struct Overrides {
    /// Application entry resource to probe
    #[arg(long, value_name = "URL")]
    pub url: Option<String>,

    /// Interactive development mode: never reload automatically
    #[arg(long)]
    pub dev: bool,

    /// Milliseconds between periodic probes
    #[arg(long, value_name = "MS")]
    pub interval_ms: Option<u64>,

    /// Milliseconds before an unattended update reloads the client
    #[arg(long, value_name = "MS")]
    pub auto_refresh_ms: Option<u64>,
}

impl Overrides {
    pub fn apply(&self, config: &mut FreshnessConfig) {
        if let Some(url) = &self.url {
            config.entry_url = url.clone();
        }
        if self.dev {
            config.development_mode = true;
        }
        if let Some(ms) = self.interval_ms {
            config.check_interval_ms = ms;
        }
        if let Some(ms) = self.auto_refresh_ms {
            config.auto_refresh_delay_ms = ms;
        }
    }
}

/// Reload by running a user-supplied command, or just announce it.
#[derive(Debug, Default)]
pub struct CommandReloader {
    argv: Option<Vec<String>>,
}

impl CommandReloader {
    pub fn new(command: Option<&str>) -> Result<Self> {
        let argv = match command {
            Some(command) => {
                let argv = shell_words::split(command)
                    .with_context(|| format!("Invalid reload command: {command}"))?;
                if argv.is_empty() {
                    bail!("Reload command is empty");
                }
                Some(argv)
            }
            None => None,
        };
        Ok(Self { argv })
    }
}

impl Reloader for CommandReloader {
    fn reload(&self) {
        let Some(argv) = &self.argv else {
            println!("Reloading: the client would now load the new build.");
            return;
        };
        log::info!("Running reload command: {:?}", argv);
        if let Err(e) = std::process::Command::new(&argv[0])
            .args(&argv[1..])
            .spawn()
        {
            log::error!("Failed to run reload command {:?}: {}", argv, e);
        }
    }
}

fn config_path(cli_path: Option<&PathBuf>) -> PathBuf {
    cli_path
        .cloned()
        .unwrap_or_else(FreshnessConfig::default_config_path)
}

fn load_config(cli_path: Option<&PathBuf>, overrides: &Overrides) -> Result<FreshnessConfig> {
    let path = config_path(cli_path);
    let mut config = FreshnessConfig::load_or_default(&path)
        .with_context(|| format!("Failed to load config from {}", path.display()))?;
    overrides.apply(&mut config);
    config.validate()?;
    if config.entry_url.is_empty() {
        bail!(
            "No entry URL configured: pass --url or set entry_url in {}",
            path.display()
        );
    }
    Ok(config)
}

/// Build the HTTP probe described by `config`.
pub fn build_probe(config: &FreshnessConfig) -> Result<HttpVersionProbe> {
    let probe = HttpVersionProbe::new(&config.entry_url, config.probe_timeout())?;
    let probe = match (&config.version_manifest_url, &config.current_version) {
        (Some(manifest_url), Some(current)) => probe.with_manifest(manifest_url, current)?,
        _ => probe,
    };
    Ok(probe)
}

/// Build the invalidator over the native stores described by `config`.
pub fn build_invalidator(config: &FreshnessConfig, keys: Arc<FileKeyStore>) -> CacheInvalidator {
    CacheInvalidator::new(
        Arc::new(DirCacheStorage::new(&config.cache_dir)),
        keys,
        config.persisted_keys.clone(),
    )
}

/// Run the parsed command. Returns the process exit code.
pub async fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Commands::Watch {
            overrides,
            reload_command,
        } => {
            let config = load_config(cli.config.as_ref(), &overrides)?;
            watch(config, reload_command.as_deref()).await?;
            Ok(0)
        }
        Commands::Check { overrides } => {
            let config = load_config(cli.config.as_ref(), &overrides)?;
            check(&config).await
        }
        Commands::Purge => {
            let path = config_path(cli.config.as_ref());
            let config = FreshnessConfig::load_or_default(&path)?;
            let keys = Arc::new(FileKeyStore::new(&config.state_file));
            let report = build_invalidator(&config, keys).purge();
            println!(
                "Deleted caches: {}",
                if report.caches_deleted.is_empty() {
                    "(none)".to_string()
                } else {
                    report.caches_deleted.join(", ")
                }
            );
            println!(
                "Removed keys: {}",
                if report.keys_removed.is_empty() {
                    "(none)".to_string()
                } else {
                    report.keys_removed.join(", ")
                }
            );
            Ok(if report.failures == 0 { 0 } else { 1 })
        }
        Commands::InitConfig { force } => {
            let path = config_path(cli.config.as_ref());
            if path.exists() && !force {
                bail!(
                    "Config file {} already exists (use --force to overwrite)",
                    path.display()
                );
            }
            FreshnessConfig::default().save(&path)?;
            println!("Wrote default config to {}", path.display());
            Ok(0)
        }
    }
}

async fn check(config: &FreshnessConfig) -> Result<i32> {
    let probe = build_probe(config)?;
    let outcome = tokio::task::spawn_blocking(move || probe.probe()).await?;
    match outcome {
        Ok(Verdict::Fresh) => {
            println!("fresh: {} is current", config.entry_url);
            Ok(0)
        }
        Ok(Verdict::Stale) => {
            println!("stale: a newer build of {} is available", config.entry_url);
            Ok(1)
        }
        Err(e) => {
            println!("error: {e}");
            Ok(2)
        }
    }
}

const WATCH_HELP: &str =
    "commands: refresh | dismiss | hidden | visible | offline | online | status | quit";

/// Persist bookkeeping the invalidator later purges.
///
/// Nothing is written once refreshing: the purge is already running against
/// the same keys and a late write would survive it.
fn record_state(keys: &FileKeyStore, state: &FreshnessState) {
    if state.phase.is_terminal() {
        return;
    }
    let mut entries = vec![(
        "update_available",
        state.update_available.to_string(),
    )];
    if let Some(at) = state.last_check {
        entries.push(("last_update_check", at.to_rfc3339()));
    }
    for (key, value) in entries {
        if let Err(e) = keys.set(key, &value) {
            log::debug!("Failed to persist {}: {}", key, e);
        }
    }
}

async fn watch(config: FreshnessConfig, reload_command: Option<&str>) -> Result<()> {
    let probe = Arc::new(build_probe(&config)?);
    let keys = Arc::new(FileKeyStore::new(&config.state_file));
    let invalidator = build_invalidator(&config, Arc::clone(&keys));
    let reloader = Arc::new(CommandReloader::new(reload_command)?);

    println!(
        "Watching {} every {} ms{}",
        config.entry_url,
        config.check_interval_ms,
        if config.development_mode {
            " (development mode)"
        } else {
            ""
        }
    );
    println!("{WATCH_HELP}");

    let mut service = FreshnessService::new(config, probe, invalidator, reloader);
    let handle = service.start(&tokio::runtime::Handle::current());
    let mut states = handle.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut last_phase = Phase::Idle;

    loop {
        tokio::select! {
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = states.borrow_and_update().clone();
                record_state(&keys, &state);
                if state.phase != last_phase {
                    match state.phase {
                        Phase::UpdatePending => {
                            println!("A new build is available. Type 'refresh' or 'dismiss'.");
                        }
                        Phase::Dismissed => println!("Update prompt dismissed for now."),
                        Phase::Refreshing => println!("Refreshing..."),
                        Phase::Idle | Phase::Checking => {}
                    }
                    last_phase = state.phase;
                }
                if state.phase.is_terminal() {
                    service.join().await;
                    break;
                }
            }
            line = lines.next_line(), if stdin_open => {
                let Some(line) = line? else {
                    // Non-interactive: keep watching until interrupted.
                    stdin_open = false;
                    continue;
                };
                match line.trim() {
                    "refresh" => handle.refresh_app(),
                    "dismiss" => handle.dismiss_update(),
                    "hidden" => handle.notify_visibility(false),
                    "visible" => handle.notify_visibility(true),
                    "offline" => handle.notify_connectivity(false),
                    "online" => handle.notify_connectivity(true),
                    "status" => println!("{}", serde_json::to_string_pretty(&handle.snapshot())?),
                    "quit" | "exit" => {
                        service.shutdown().await;
                        break;
                    }
                    "" => {}
                    other => println!("unknown command '{other}'; {WATCH_HELP}"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                log::info!("Interrupted, stopping freshness checks");
                service.shutdown().await;
                break;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_watch_with_overrides() {
        let cli = Cli::try_parse_from([
            "freshness",
            "watch",
            "--url",
            "https://app.example.com/",
            "--dev",
            "--interval-ms",
            "30000",
            "--log-level",
            "debug",
        ])
        .unwrap();
        assert_eq!(cli.log_level, Some(LogLevelArg::Debug));
        assert_eq!(
            cli.log_level.map(LogLevelArg::to_level_filter),
            Some(log::LevelFilter::Debug)
        );
        let Commands::Watch { overrides, .. } = cli.command else {
            panic!("expected watch");
        };

        let mut config = FreshnessConfig::default();
        overrides.apply(&mut config);
        assert_eq!(config.entry_url, "https://app.example.com/");
        assert!(config.development_mode);
        assert_eq!(config.check_interval_ms, 30_000);
        assert_eq!(
            config.auto_refresh_delay_ms,
            crate::config::defaults::auto_refresh_delay_ms()
        );
    }

    #[test]
    fn test_log_level_rejects_unknown_names() {
        assert!(Cli::try_parse_from(["freshness", "purge", "--log-level", "loud"]).is_err());
        let cli = Cli::try_parse_from(["freshness", "purge", "--log-level", "off"]).unwrap();
        assert_eq!(
            cli.log_level.map(LogLevelArg::to_level_filter),
            Some(log::LevelFilter::Off)
        );
    }

    #[test]
    fn test_record_state_skips_writes_once_refreshing() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let config = FreshnessConfig {
            cache_dir: temp_dir.path().join("caches"),
            state_file: temp_dir.path().join("state.json"),
            ..FreshnessConfig::default()
        };
        let keys = Arc::new(FileKeyStore::new(&config.state_file));
        keys.set("session", "abc").unwrap();

        let pending = FreshnessState {
            phase: Phase::UpdatePending,
            update_available: true,
            is_checking: false,
            last_check: Some(chrono::Utc::now()),
        };
        record_state(&keys, &pending);
        assert_eq!(keys.get("update_available").unwrap().as_deref(), Some("true"));
        assert!(keys.get("last_update_check").unwrap().is_some());

        // The purge runs first; the Refreshing notification arrives after it.
        build_invalidator(&config, Arc::clone(&keys)).purge();
        let refreshing = FreshnessState {
            phase: Phase::Refreshing,
            update_available: false,
            ..pending
        };
        record_state(&keys, &refreshing);

        assert_eq!(keys.keys().unwrap(), vec!["session".to_string()]);
    }

    #[test]
    fn test_reload_command_parsing() {
        assert!(CommandReloader::new(None).unwrap().argv.is_none());
        let reloader = CommandReloader::new(Some("systemctl --user restart 'site viewer'")).unwrap();
        assert_eq!(
            reloader.argv.unwrap(),
            vec!["systemctl", "--user", "restart", "site viewer"]
        );
        assert!(CommandReloader::new(Some("   ")).is_err());
        assert!(CommandReloader::new(Some("echo 'unterminated")).is_err());
    }
}
