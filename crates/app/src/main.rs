use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Instant;

use clap::{Parser, Subcommand};
use surface_integrator_core::steps::{list_files, parse_step_sizes};
use surface_integrator_core::template::ZoneBody;
use surface_integrator_core::{
    parse_zone_text, ActionRegistry, AppConfig, ModifierManager, Page, SurfaceError,
};
use tracing_subscriber::EnvFilter;

mod script;

use script::{ConsoleAction, ScriptHost};

fn main() -> surface_integrator_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Check { folder } => run_check(&folder),
        Commands::Steps { file } => run_steps(&file),
        Commands::Simulate { config, script, page } => run_simulate(&config, &script, page.as_deref()),
    }
}

fn run_check(folder: &Path) -> surface_integrator_core::Result<()> {
    tracing::info!(?folder, "checking zone files");

    let vocabulary = ModifierManager::default();
    let files = list_files(folder, "zon")?;
    let mut failures = 0;

    for path in &files {
        let text = std::fs::read_to_string(path)?;
        match parse_zone_text(&text, path, &vocabulary) {
            Ok(zone) => {
                let detail = match &zone.body {
                    ZoneBody::Bindings(table) => format!("{} widgets", table.len()),
                    ZoneBody::FxParams(table) => format!("{} FX rows", table.rows.len()),
                };
                println!("ok   {} ({detail})", zone.display_name());
            }
            Err(err) => {
                failures += 1;
                println!("FAIL {err}");
            }
        }
    }

    println!("{} zone files, {failures} rejected", files.len());
    if failures > 0 {
        return Err(SurfaceError::msg(format!("{failures} zone files failed to parse")));
    }
    Ok(())
}

fn run_steps(file: &Path) -> surface_integrator_core::Result<()> {
    let text = std::fs::read_to_string(file)?;
    let steps = parse_step_sizes(&text, file)?;

    println!("{}", steps.zone);
    for (param, values) in &steps.steps {
        let values: Vec<String> = values.iter().map(|value| format!("{value:.3}")).collect();
        println!("  {param:>4}: {}", values.join(" "));
    }
    Ok(())
}

fn run_simulate(
    config: &Path,
    script: &Path,
    page_name: Option<&str>,
) -> surface_integrator_core::Result<()> {
    let config = AppConfig::load(config)?;
    let page_config = match page_name {
        Some(name) => config.pages.iter().find(|page| page.name == name),
        None => config.pages.first(),
    }
    .ok_or_else(|| SurfaceError::msg("no matching page in the configuration"))?;
    tracing::info!(page = %page_config.name, surfaces = page_config.surfaces.len(), "simulating");

    let host = Rc::new(ScriptHost::default());
    let mut actions = ActionRegistry::new();
    actions.set_fallback(Rc::new(ConsoleAction(host.clone())));

    let mut page = Page::from_config(page_config, Rc::new(config.engine.clone()), Rc::new(actions));
    let indexed = page.preprocess();
    tracing::debug!(zones = indexed, "zone files indexed");
    if page.initialize(&*host, Instant::now()) == 0 {
        return Err(SurfaceError::msg("no surface could be initialised"));
    }

    let text = std::fs::read_to_string(script)?;
    script::run(&mut page, &host, &text, script)
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Control surface zone engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Parse every zone file in a folder and report the ones that fail.
    Check {
        /// Folder scanned recursively for `.zon` files.
        folder: PathBuf,
    },
    /// Print the contents of a step-size file.
    Steps {
        /// Path to the `.stp` file.
        file: PathBuf,
    },
    /// Build a page from a configuration file and replay an input script.
    Simulate {
        /// JSON configuration describing the engine and its pages.
        #[arg(short, long)]
        config: PathBuf,
        /// Input script, one event per line.
        #[arg(short, long)]
        script: PathBuf,
        /// Page to build; the first one when omitted.
        #[arg(short, long)]
        page: Option<String>,
    },
}
