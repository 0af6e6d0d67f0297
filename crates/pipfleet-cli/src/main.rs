mod commands;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use commands::{EXIT_DESIRED_STATE_ERROR, EXIT_FAILURE, EXIT_STORE_ERROR};
use pipfleet_core::{install_signal_handler, Engine, EngineConfig};
use pipfleet_schema::NewUnit;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::debug;

#[derive(Debug, Parser)]
#[command(
    name = "pipfleet",
    version,
    about = "Remote Python virtual-environment orchestration"
)]
struct Cli {
    /// Path to the pipfleet store directory.
    #[arg(long, default_value = "~/.local/share/pipfleet")]
    store: String,

    /// Engine configuration file (defaults to ~/.config/pipfleet/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Register a management unit and initialize its host.
    Create {
        /// Human-readable unit name.
        name: String,
        /// Instance the unit manages.
        #[arg(long)]
        instance: String,
        /// Base image of the managed host (selects the login user).
        #[arg(long)]
        image: String,
        #[arg(long, default_value = "")]
        owner: String,
        #[arg(long, default_value = "")]
        project: String,
        #[arg(long, default_value = "")]
        provider: String,
        /// Directory on the host that holds the virtual environments.
        #[arg(long, default_value = "virtualenvs")]
        virtual_envs_dir: String,
        /// Desired-state file with environments to synchronize after initialization.
        #[arg(long)]
        desired: Option<PathBuf>,
    },
    /// Reconcile a unit toward a desired-state file.
    Apply {
        /// Unit id or name.
        unit: String,
        /// Desired-state file (TOML or JSON).
        file: PathBuf,
    },
    /// Show what apply would do without creating operations.
    Plan {
        /// Unit id or name.
        unit: String,
        /// Desired-state file (TOML or JSON).
        file: PathBuf,
    },
    /// Discover the virtual environments present on the host.
    FindEnvs {
        /// Unit id or name.
        unit: String,
    },
    /// Read the installed libraries of one virtual environment.
    FindLibs {
        /// Unit id or name.
        unit: String,
        /// Virtual environment name.
        venv: String,
    },
    /// Remove the unit's Python environment from the host, then the unit.
    Delete {
        /// Unit id or name.
        unit: String,
    },
    /// List all management units.
    List,
    /// Show a unit with its environments and operations.
    Inspect {
        /// Unit id or name.
        unit: String,
    },
    /// List a unit's operations, newest first.
    Operations {
        /// Unit id or name (deleted units by id).
        unit: String,
    },
    /// Print the captured output of one operation.
    Output {
        /// Unit id or name (deleted units by id).
        unit: String,
        /// Operation id.
        operation: String,
    },
    /// Run diagnostic checks on the system and store.
    Doctor,
    /// Verify store integrity.
    VerifyStore,
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

#[allow(clippy::too_many_lines)]
fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("PIPFLEET_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .init();

    install_signal_handler();

    let store_path = expand_tilde(&cli.store);
    let json_output = cli.json;

    if let Commands::Completions { shell } = cli.command {
        return exit_with(commands::completions::run::<Cli>(shell));
    }

    let config = match &cli.config {
        Some(path) => EngineConfig::load(path),
        None => EngineConfig::load_default(),
    };
    let config = match config {
        Ok(c) => c,
        Err(e) => return exit_with(Err(e.to_string())),
    };
    debug!(
        "store {} (runner={}, dispatch={:?}, locks={:?})",
        store_path.display(),
        config.runner,
        config.dispatch,
        config.lock.backend
    );

    if let Commands::Doctor = cli.command {
        return exit_with(commands::doctor::run(&store_path, &config, json_output));
    }

    let needs_runtime = matches!(
        cli.command,
        Commands::Create { .. }
            | Commands::Apply { .. }
            | Commands::FindEnvs { .. }
            | Commands::FindLibs { .. }
            | Commands::Delete { .. }
    );
    if needs_runtime
        && config.runner == "system"
        && std::env::var("PIPFLEET_SKIP_PREREQS").as_deref() != Ok("1")
    {
        let missing = pipfleet_runtime::check_prereqs(&config.execution_command);
        if !missing.is_empty() {
            eprintln!("error: {}", pipfleet_runtime::format_missing(&missing));
            return ExitCode::from(EXIT_FAILURE);
        }
    }

    let engine = match Engine::new(&store_path, config) {
        Ok(engine) => engine,
        Err(e) => return exit_with(Err(e.to_string())),
    };

    let result = match cli.command {
        Commands::Create {
            name,
            instance,
            image,
            owner,
            project,
            provider,
            virtual_envs_dir,
            desired,
        } => commands::create::run(
            &engine,
            NewUnit {
                name,
                owner,
                instance_uuid: instance,
                image_name: image,
                project_uuid: project,
                provider_uuid: provider,
                virtual_envs_dir_path: virtual_envs_dir,
            },
            desired.as_deref(),
            json_output,
        ),
        Commands::Apply { unit, file } => commands::apply::run(&engine, &unit, &file, json_output),
        Commands::Plan { unit, file } => commands::plan::run(&engine, &unit, &file, json_output),
        Commands::FindEnvs { unit } => commands::find_envs::run(&engine, &unit, json_output),
        Commands::FindLibs { unit, venv } => {
            commands::find_libs::run(&engine, &unit, &venv, json_output)
        }
        Commands::Delete { unit } => commands::delete::run(&engine, &unit, json_output),
        Commands::List => commands::list::run(&engine, json_output),
        Commands::Inspect { unit } => commands::inspect::run(&engine, &unit, json_output),
        Commands::Operations { unit } => commands::operations::run(&engine, &unit, json_output),
        Commands::Output { unit, operation } => {
            commands::output::run(&engine, &unit, &operation, json_output)
        }
        Commands::VerifyStore => commands::verify_store::run(&engine, json_output),
        Commands::Doctor | Commands::Completions { .. } => Ok(commands::EXIT_SUCCESS),
    };

    // Operations handed to background workers finish before the process exits.
    engine.wait_idle();
    exit_with(result)
}

fn exit_with(result: Result<u8, String>) -> ExitCode {
    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            let code = if msg.starts_with("desired state error:") {
                EXIT_DESIRED_STATE_ERROR
            } else if msg.starts_with("store error:") || msg.starts_with("store lock:") {
                EXIT_STORE_ERROR
            } else {
                EXIT_FAILURE
            };
            ExitCode::from(code)
        }
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(stripped);
        }
    }
    PathBuf::from(path)
}
