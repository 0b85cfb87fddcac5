//! Landform CLI entrypoint.
//!
//! This is the main entrypoint for the landform command-line tool.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use landform::cli::{Cli, Commands, LogFormat, OutputFormatter, StateCommands};
use landform::config::{
    ConfigParser, ConfigValidator, LandformConfig, ProviderKind, StateBackend, find_config_file,
};
use landform::engine::Engine;
use landform::error::{EXIT_OK, EXIT_PARTIAL, Result};
use landform::executor::{CancelToken, cancellation};
use landform::graph::GraphBuilder;
use landform::planner::PlanMode;
use landform::state::{self, STATE_DIR};

use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Sandbox object file kept next to the state by default.
const SANDBOX_FILE: &str = "sandbox.json";

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.log_format);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::from(EXIT_PARTIAL);
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(e.exit_code())
        }
    }
}

/// Initializes the logging system on stderr.
fn init_logging(verbose: bool, format: LogFormat) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

/// Main async entry point. Returns the process exit code.
async fn run(cli: Cli) -> Result<u8> {
    let formatter = OutputFormatter::new(cli.output);
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Init { path, force } => cmd_init(&path, force),
        Commands::Validate { warnings } => cmd_validate(config_path, warnings, &formatter),
        Commands::Plan {
            refresh,
            out,
            detailed,
        } => cmd_plan(config_path, refresh, out.as_deref(), detailed, &formatter).await,
        Commands::Apply {
            yes,
            refresh,
            concurrency,
        } => cmd_apply(config_path, yes, refresh, concurrency, &formatter).await,
        Commands::Destroy { yes } => cmd_destroy(config_path, yes, &formatter).await,
        Commands::Drift => cmd_drift(config_path, &formatter).await,
        Commands::Graph => cmd_graph(config_path),
        Commands::State { command } => cmd_state(config_path, command, &formatter).await,
    }
}

/// Initialize a new project.
fn cmd_init(path: &Path, force: bool) -> Result<u8> {
    info!("Initializing new Landform project in: {}", path.display());

    let config_path = path.join("landform.yaml");
    let env_path = path.join(".env.example");
    let gitignore_path = path.join(".gitignore");

    if !force && config_path.exists() {
        eprintln!("Configuration file already exists: {}", config_path.display());
        eprintln!("Use --force to overwrite.");
        return Ok(EXIT_OK);
    }

    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }

    std::fs::write(&config_path, include_str!("../templates/landform.yaml"))?;
    eprintln!("Created: {}", config_path.display());

    std::fs::write(&env_path, include_str!("../templates/.env.example"))?;
    eprintln!("Created: {}", env_path.display());

    if gitignore_path.exists() {
        let existing = std::fs::read_to_string(&gitignore_path)?;
        if !existing.contains(".env") || !existing.contains(STATE_DIR) {
            let mut file = std::fs::OpenOptions::new().append(true).open(&gitignore_path)?;
            writeln!(file, "\n# Landform")?;
            if !existing.contains(".env") {
                writeln!(file, ".env")?;
            }
            if !existing.contains(STATE_DIR) {
                writeln!(file, "{STATE_DIR}/")?;
            }
            eprintln!("Updated: {}", gitignore_path.display());
        }
    } else {
        std::fs::write(&gitignore_path, format!(".env\n{STATE_DIR}/\n"))?;
        eprintln!("Created: {}", gitignore_path.display());
    }

    eprintln!("\nProject initialized successfully!");
    eprintln!("Next steps:");
    eprintln!("  1. Edit landform.yaml with your resources");
    eprintln!("  2. Run 'landform validate' to check the configuration");
    eprintln!("  3. Run 'landform plan' to see what will change");
    eprintln!("  4. Run 'landform apply' to converge");

    Ok(EXIT_OK)
}

/// Validate configuration and the resource graph.
fn cmd_validate(config_path: Option<&Path>, show_warnings: bool, formatter: &OutputFormatter) -> Result<u8> {
    let config = load_config(config_path)?;

    let result = ConfigValidator::new().validate(&config)?;
    let registry = config.registry();
    let resources = config.to_resource_set()?;
    let graph = GraphBuilder::new(&registry).build(&resources)?;

    emit(&formatter.format_validation(&result, show_warnings, graph.node_count(), graph.edge_count()))?;
    Ok(EXIT_OK)
}

/// Show what an apply would change.
async fn cmd_plan(
    config_path: Option<&Path>,
    refresh: bool,
    out: Option<&Path>,
    detailed: bool,
    formatter: &OutputFormatter,
) -> Result<u8> {
    let engine = Engine::open(load_config(config_path)?).await?;
    let prepared = engine.plan(PlanMode::Apply, refresh).await?;

    if let Some(out) = out {
        let json = serde_json::to_string_pretty(&prepared.plan)
            .map_err(|e| landform::error::LandformError::internal(format!("Cannot serialize plan: {e}")))?;
        std::fs::write(out, json)?;
        info!("Plan written to {}", out.display());
    }

    emit(&formatter.format_plan(&prepared, detailed))?;
    Ok(EXIT_OK)
}

/// Converge the provider to the configuration.
async fn cmd_apply(
    config_path: Option<&Path>,
    auto_approve: bool,
    refresh: bool,
    concurrency: Option<usize>,
    formatter: &OutputFormatter,
) -> Result<u8> {
    let mut engine = Engine::open(load_config(config_path)?).await?;
    if let Some(concurrency) = concurrency {
        engine = engine.with_concurrency(concurrency);
    }

    // The refresh is folded into the session here, so the apply below
    // plans against the same records.
    let prepared = engine.plan(PlanMode::Apply, refresh).await?;
    emit(&formatter.format_plan(&prepared, false))?;

    if !prepared.plan.has_changes() {
        return Ok(EXIT_OK);
    }

    if !auto_approve && !confirm("Do you want to apply this plan? [y/N]: ", "y")? {
        eprintln!("Apply cancelled.");
        return Ok(EXIT_OK);
    }

    let outcome = engine.apply(false, interrupt_token()).await?;
    emit(&formatter.format_run(&outcome))?;

    Ok(if outcome.is_success() { EXIT_OK } else { EXIT_PARTIAL })
}

/// Destroy every tracked resource.
async fn cmd_destroy(config_path: Option<&Path>, auto_approve: bool, formatter: &OutputFormatter) -> Result<u8> {
    let engine = Engine::open(load_config(config_path)?).await?;

    let prepared = engine.plan(PlanMode::Destroy, false).await?;
    if !prepared.plan.has_changes() {
        eprintln!("No resources to destroy.");
        return Ok(EXIT_OK);
    }
    emit(&formatter.format_plan(&prepared, false))?;

    if !auto_approve
        && !confirm("\nThis action is IRREVERSIBLE. Type 'destroy' to confirm: ", "destroy")?
    {
        eprintln!("Destruction cancelled.");
        return Ok(EXIT_OK);
    }

    let outcome = engine.destroy(interrupt_token()).await?;
    emit(&formatter.format_run(&outcome))?;

    Ok(if outcome.is_success() { EXIT_OK } else { EXIT_PARTIAL })
}

/// Check tracked objects for drift.
async fn cmd_drift(config_path: Option<&Path>, formatter: &OutputFormatter) -> Result<u8> {
    let engine = Engine::open(load_config(config_path)?).await?;
    let report = engine.drift().await;

    emit(&formatter.format_drift(&report))?;
    Ok(EXIT_OK)
}

/// Print the dependency graph.
fn cmd_graph(config_path: Option<&Path>) -> Result<u8> {
    let config = load_config(config_path)?;
    let registry = config.registry();
    let graph = GraphBuilder::new(&registry).build(&config.to_resource_set()?)?;

    emit(&graph.to_dot())?;
    Ok(EXIT_OK)
}

/// State inspection commands.
async fn cmd_state(config_path: Option<&Path>, command: StateCommands, formatter: &OutputFormatter) -> Result<u8> {
    let config = load_config(config_path)?;
    let store = state::from_config(&config.state, &config.project).await?;

    let Some(state) = store.load().await? else {
        eprintln!("No state found.");
        return Ok(EXIT_OK);
    };

    match command {
        StateCommands::Show => emit(&formatter.format_state(&state))?,
        StateCommands::List => emit(&formatter.format_state_list(&state))?,
    }
    Ok(EXIT_OK)
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Loads the configuration, defaulting local state and sandbox files to the
/// state directory beside the configuration file.
fn load_config(config_path: Option<&Path>) -> Result<LandformConfig> {
    let config_file = config_path.map_or_else(|| find_config_file("."), |path| Ok(path.to_path_buf()))?;
    debug!("Loading configuration from: {}", config_file.display());

    let base = config_file
        .parent()
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    let mut config = ConfigParser::new().with_base_path(&base).load_with_env(&config_file)?;

    let state_dir = base.join(STATE_DIR);
    if config.state.backend == StateBackend::Local && config.state.path.is_none() {
        config.state.path = Some(state_dir.join("state.json"));
    }
    if config.provider.kind == ProviderKind::Sandbox && config.provider.path.is_none() {
        config.provider.path = Some(state_dir.join(SANDBOX_FILE));
    }

    Ok(config)
}

/// Returns a token cancelled by Ctrl-C.
fn interrupt_token() -> CancelToken {
    let (handle, token) = cancellation();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing in-flight steps");
            handle.cancel();
        }
    });
    token
}

/// Asks for confirmation on stderr.
fn confirm(prompt: &str, expected: &str) -> Result<bool> {
    eprint!("{prompt}");
    std::io::stderr().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case(expected))
}

/// Writes command output to stdout.
fn emit(text: &str) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{}", text.trim_end())?;
    Ok(())
}
