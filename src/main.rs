//! persist-sentry: persistence mechanism scanner and risk classifier.
//!
//! This is the main entry point for the CLI application.

use persist_sentry::core::config::Config;
use persist_sentry::core::error::{Error, Result};
use persist_sentry::core::types::{Platform, RiskLevel, ScanResult, ScanStatus};
use persist_sentry::engine::{ConsoleProgressReporter, Engine, NoProgress, ProgressSink};
use persist_sentry::intel;
use persist_sentry::probes;
use persist_sentry::ui::cli::{Cli, Commands, ConfigAction, IntelAction, OutputFormat};
use persist_sentry::ui::report::{self, text};
use persist_sentry::utils::logging::{cleanup_old_logs, init_logging, LogConfig};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            log::error!("{} error: {}", e.category(), e);
            eprintln!("Error: {}", e);
            if let Some(hint) = e.suggestion() {
                eprintln!("Hint: {}", hint);
            }
            ExitCode::FAILURE
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => {
            let config = Config::load(path)?;
            config.validate()?;
            Ok(config)
        }
        None => Ok(Config::load_or_default()),
    }
}

fn config_path(cli: &Cli) -> PathBuf {
    cli.config.clone().unwrap_or_else(Config::default_config_path)
}

async fn run() -> Result<ExitCode> {
    let cli = Cli::parse_args();
    let config = load_config(cli.config.as_deref())?;

    let log_config = if cli.verbose {
        LogConfig::verbose()
    } else {
        LogConfig::from_config(&config)
    };
    init_logging(log_config)?;
    log::info!("persist-sentry v{}", env!("CARGO_PKG_VERSION"));

    if config.logging.log_path.is_some() {
        if let Err(e) = cleanup_old_logs(&config.logging.log_dir(), config.logging.keep_logs_days) {
            log::warn!("Log cleanup failed: {}", e);
        }
    }

    match cli.command {
        Some(Commands::Scan {
            probes: ref selected,
            ref output,
            ref intel,
            hash_all,
            min_risk,
        }) => {
            let options = ScanOptions {
                probes: selected.clone(),
                output: output.clone(),
                intel: intel.clone(),
                hash_all,
                min_risk,
            };
            run_scan(config, options, cli.format).await
        }
        Some(Commands::Probes) => run_probes(&config, cli.format).map(|_| ExitCode::SUCCESS),
        Some(Commands::Intel { ref action }) => {
            run_intel(action, &config, cli.format).map(|_| ExitCode::SUCCESS)
        }
        Some(Commands::Report { ref file, min_risk }) => {
            run_report(file, min_risk, cli.format).map(|_| ExitCode::SUCCESS)
        }
        Some(Commands::Config { ref action }) => {
            run_config(action, &config, &config_path(&cli)).map(|_| ExitCode::SUCCESS)
        }
        Some(Commands::Info) => run_info(&config).map(|_| ExitCode::SUCCESS),
        None => {
            println!("persist-sentry - Persistence Mechanism Scanner");
            println!();
            println!("Use --help for usage information");
            println!();
            println!("Quick start:");
            println!("  persist-sentry scan                 Scan this machine");
            println!("  persist-sentry scan -o result.json  Scan and save the result");
            println!("  persist-sentry probes               List available probes");
            println!("  persist-sentry intel import F       Import threat intel");
            Ok(ExitCode::SUCCESS)
        }
    }
}

struct ScanOptions {
    probes: Vec<String>,
    output: Option<PathBuf>,
    intel: Option<PathBuf>,
    hash_all: bool,
    min_risk: RiskLevel,
}

/// Run a scan on a blocking thread, cancelling it on Ctrl-C.
async fn run_scan(mut config: Config, options: ScanOptions, format: OutputFormat) -> Result<ExitCode> {
    if options.hash_all {
        config.hashing.min_risk = RiskLevel::Safe;
    }

    let platform = Platform::current();
    let mut builder = Engine::builder(config.clone()).platform(platform);
    if !options.probes.is_empty() {
        let known: Vec<&str> = probes::all_probes().iter().map(|p| p.name()).collect();
        if let Some(unknown) = options.probes.iter().find(|name| !known.contains(&name.as_str())) {
            return Err(Error::UnknownProbe(unknown.clone()));
        }
        let selected = probes::registry_for(platform, &config)
            .into_iter()
            .filter(|p| options.probes.iter().any(|name| name == p.name()))
            .collect();
        builder = builder.probes(selected);
    }
    let engine = Arc::new(builder.build()?);

    if let Some(ref path) = options.intel {
        let update = intel::load_file(path)?;
        let summary = engine.import_threat_intel(&update);
        log::info!("Loaded {} new threat-intel entries from {:?}", summary.total(), path);
    }

    let token = engine.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nCancelling scan...");
            token.cancel();
        }
    });

    let scan_engine = Arc::clone(&engine);
    let show_progress = format == OutputFormat::Text;
    let result = tokio::task::spawn_blocking(move || {
        let sink: Box<dyn ProgressSink> = if show_progress {
            Box::new(ConsoleProgressReporter::new())
        } else {
            Box::new(NoProgress)
        };
        scan_engine.run_scan(sink.as_ref())
    })
    .await
    .map_err(|e| Error::Internal(format!("scan task failed: {}", e)))?;

    if let Some(ref path) = options.output {
        report::write_json(&result, path)?;
        log::info!("Result written to {:?}", path);
    }
    print_result(&result, options.min_risk, format)?;

    Ok(match result.status {
        ScanStatus::Completed => ExitCode::SUCCESS,
        ScanStatus::Cancelled => ExitCode::from(130),
        ScanStatus::Failed => ExitCode::FAILURE,
    })
}

fn print_result(result: &ScanResult, min_risk: RiskLevel, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", report::export_json(result)?),
        OutputFormat::Text => print!("{}", text::render(result, min_risk)),
    }
    Ok(())
}

/// List probes for this platform.
fn run_probes(config: &Config, format: OutputFormat) -> Result<()> {
    let platform = Platform::current();
    let entries: Vec<_> = probes::all_probes()
        .into_iter()
        .filter(|p| p.supports(platform))
        .map(|p| {
            let disabled = config.scan.disabled_probes.iter().any(|d| d == p.name());
            (p.name(), disabled)
        })
        .collect();

    match format {
        OutputFormat::Json => {
            let list: Vec<_> = entries
                .iter()
                .map(|(name, disabled)| serde_json::json!({ "name": name, "enabled": !disabled }))
                .collect();
            println!("{}", serde_json::to_string_pretty(&list)?);
        }
        OutputFormat::Text => {
            println!("Probes for {}:", platform);
            for (name, disabled) in entries {
                println!("  {:<24} {}", name, if disabled { "disabled" } else { "enabled" });
            }
        }
    }
    Ok(())
}

/// Manage the persisted threat-intel store.
fn run_intel(action: &IntelAction, config: &Config, format: OutputFormat) -> Result<()> {
    let store_path = config.intel.intel_file();
    let mut store = intel::load_store(&store_path)?;

    match action {
        IntelAction::Import { file } => {
            let update = intel::load_file(file)?;
            let summary = store.merge(&update);
            intel::save_store(&store, &store_path)?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
                OutputFormat::Text => {
                    println!("Imported into {}:", store_path.display());
                    println!("  Hashes added:     {}", summary.hashes_added);
                    println!("  Domains added:    {}", summary.domains_added);
                    println!("  Publishers added: {}", summary.publishers_added);
                }
            }
        }
        IntelAction::Show => match format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&store.to_update())?),
            OutputFormat::Text => {
                println!("Threat intel: {}", store_path.display());
                println!("  Hashes:     {}", store.hash_count());
                println!("  Domains:    {}", store.domain_count());
                println!("  Publishers: {}", store.publisher_count());
            }
        },
    }
    Ok(())
}

/// Print an exported scan result.
fn run_report(file: &Path, min_risk: RiskLevel, format: OutputFormat) -> Result<()> {
    let result = report::read_json(file)?;
    print_result(&result, min_risk, format)
}

/// Handle configuration commands.
fn run_config(action: &ConfigAction, config: &Config, path: &Path) -> Result<()> {
    match action {
        ConfigAction::Show => {
            println!("{}", serde_json::to_string_pretty(config)?);
        }
        ConfigAction::Reset { yes } => {
            if !yes {
                println!("This overwrites {}. Re-run with --yes to confirm.", path.display());
                return Ok(());
            }
            log::info!("Resetting configuration to defaults...");
            Config::default().save(path)?;
            println!("Configuration reset to defaults.");
        }
        ConfigAction::Path => {
            println!("{}", path.display());
        }
    }
    Ok(())
}

/// Show application information.
fn run_info(config: &Config) -> Result<()> {
    println!("persist-sentry - Persistence Mechanism Scanner");
    println!();
    println!("Version:          {}", env!("CARGO_PKG_VERSION"));
    println!("Platform:         {}", Platform::current());
    println!("Config Path:      {}", Config::default_config_path().display());
    println!("Data Directory:   {}", Config::data_dir().display());
    println!("Log Directory:    {}", config.logging.log_dir().display());
    println!("Threat Intel:     {}", config.intel.intel_file().display());
    println!();
    println!("Scan Settings:");
    println!("  Command Timeout: {} s", config.scan.command_timeout_secs);
    println!("  Disabled Probes: {}", config.scan.disabled_probes.join(", "));
    println!();
    println!("Hashing Settings:");
    println!("  Minimum Risk:    {}", config.hashing.min_risk);
    println!("  Threads:         {}", config.hashing.threads);
    println!("  Max File Size:   {} MB", config.hashing.max_file_size_mb);
    Ok(())
}
