//! Bamboo entrypoint CLI.
//!
//! With no subcommand (or `run`) performs the full startup sequence and
//! becomes the server process. `generate` and `render` stop short of that
//! for debugging images.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::io::Write as _;

use anyhow::Context;
use clap::{Parser, Subcommand};

use bamboo_entrypoint::config::EntrypointConfig;
use bamboo_entrypoint::env::Environment;
use bamboo_entrypoint::materialize::Materialized;
use bamboo_entrypoint::template::Renderer;
use bamboo_entrypoint::{logging, pipeline};

/// Bamboo container entrypoint.
#[derive(Parser)]
#[command(name = "bamboo-entrypoint", version, about)]
struct Cli {
    /// Subcommand to execute; defaults to `run`.
    #[command(subcommand)]
    command: Option<Command>,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Generate configuration, drop privileges and exec the server.
    Run,
    /// Generate configuration files only and print the JVM flags.
    Generate,
    /// Render one template against the current environment to stdout.
    Render {
        /// Template name, e.g. `server.xml.j2`.
        template: String,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = EntrypointConfig::load().context("failed to load entrypoint configuration")?;
    logging::init(&config.logging)?;
    for ignored in &config.ignored_overrides {
        tracing::warn!(var = ignored.var, value = %ignored.value, "ignoring invalid env override");
    }

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => handle_run(&config),
        Command::Generate => handle_generate(&config),
        Command::Render { template } => handle_render(&config, &template),
    }
}

fn handle_run(config: &EntrypointConfig) -> anyhow::Result<()> {
    match pipeline::run(config).context("entrypoint failed")? {}
}

fn handle_generate(config: &EntrypointConfig) -> anyhow::Result<()> {
    let prepared = pipeline::generate(config, Environment::load())
        .context("failed to generate configuration")?;

    let mut stdout = std::io::stdout().lock();
    for (path, outcome) in &prepared.generated {
        let status = match outcome {
            Materialized::Written(_) => "written",
            Materialized::Skipped => "skipped",
            Materialized::WriteDenied => "denied",
        };
        writeln!(stdout, "{status}\t{}", path.display())?;
    }
    writeln!(stdout, "jvm\t{}", prepared.jvm.as_str().trim())?;
    Ok(())
}

fn handle_render(config: &EntrypointConfig, template: &str) -> anyhow::Result<()> {
    let renderer = Renderer::new(&config.paths.template_dir);
    let rendered = renderer
        .render(template, &Environment::load())
        .with_context(|| format!("failed to render {template}"))?;
    std::io::stdout().write_all(rendered.as_bytes())?;
    Ok(())
}
