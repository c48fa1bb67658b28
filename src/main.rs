// SPDX-License-Identifier: Apache-2.0 OR MIT
use anyhow::{Context, Result};
use clap::Parser;
use eventline::{timestamp_now, Config, Router, Severity, StderrMonitor, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Parser, Debug, PartialEq)]
enum Command {
    /// Validate a configuration file
    Check {
        config: PathBuf,
        /// Print the configuration with every default filled in
        #[arg(long)]
        print: bool,
    },
    /// Build a router from a configuration and publish events through it
    Run {
        config: PathBuf,
        /// Number of events to send
        #[arg(long, default_value_t = 1000)]
        count: u64,
        /// Template; `{0}` is the event number, `{1}` the --arg value
        #[arg(long, default_value = "event {0} {1}")]
        template: String,
        #[arg(long, default_value = "")]
        arg: String,
        /// Destination name (default: the first configured destination)
        #[arg(long)]
        destination: Option<String>,
        #[arg(long, default_value = "info")]
        level: Severity,
        #[arg(long, default_value = "eventline")]
        source: String,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    match args.command {
        Command::Check { config, print } => check(&config, print),
        Command::Run {
            config,
            count,
            template,
            arg,
            destination,
            level,
            source,
        } => run(
            &config,
            count,
            &template,
            &arg,
            destination.as_deref(),
            level,
            &source,
        ),
    }
}

fn load(path: &Path) -> Result<Config> {
    let config = Config::load_from_file(path)?;
    config
        .validate()
        .with_context(|| format!("invalid configuration in '{}'", path.display()))?;
    Ok(config)
}

fn check(path: &Path, print: bool) -> Result<()> {
    let config = load(path)?;
    if print {
        println!("{}", config.to_json5());
    } else {
        println!(
            "{}: ok ({:?} mode, {} destination(s), {} template(s))",
            path.display(),
            config.router.mode,
            config.destinations.len(),
            config.templates.len()
        );
    }
    Ok(())
}

fn run(
    path: &Path,
    count: u64,
    template: &str,
    arg: &str,
    destination: Option<&str>,
    level: Severity,
    source: &str,
) -> Result<()> {
    let config = load(path)?;
    let router = Router::from_config(&config, Arc::new(StderrMonitor))?;
    router.init().context("failed to start router")?;

    let index = match destination {
        Some(name) => router
            .destination_index(name)
            .with_context(|| format!("no destination named '{}'", name))?,
        None => 0,
    };

    let start = Instant::now();
    let mut failed = 0u64;
    for i in 0..count {
        let args = [Value::U64(i), Value::Str(arg)];
        if router
            .send_to(index, level, timestamp_now(), source, template, &args)
            .is_err()
        {
            failed += 1;
        }
    }
    router.destroy();
    let elapsed = start.elapsed();

    eprintln!(
        "sent {} event(s) in {:.3}s ({:.0} events/s), {} failed, {} dropped",
        count - failed,
        elapsed.as_secs_f64(),
        count as f64 / elapsed.as_secs_f64().max(f64::EPSILON),
        failed,
        router.dropped()
    );
    Ok(())
}
