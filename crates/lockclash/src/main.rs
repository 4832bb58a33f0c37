//! Lockclash CLI - row-lock contention harness
//!
//! Binary name: `lockclash`

use std::process;

use anyhow::Context;
use lockclash_core::{
    engine, forward_signals, load_config, CancelSource, Harness, HarnessConfig, Timeline,
};

mod cli;

fn main() {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let matches = cli::build_cli().get_matches();

    if let Err(err) = run(&matches) {
        #[allow(clippy::print_stderr)]
        {
            eprintln!("Error: {err:#}");
        }

        let code = err
            .downcast_ref::<lockclash_core::Error>()
            .map_or(1, lockclash_core::Error::exit_code);

        #[allow(clippy::exit)]
        process::exit(code);
    }
}

fn run(matches: &clap::ArgMatches) -> anyhow::Result<()> {
    let config = load(matches)?;

    // One worker per session so every session can block on the engine at once
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.sessions.max(1))
        .enable_all()
        .build()
        .map_err(lockclash_core::Error::from)
        .context("Failed to start runtime")?;

    let json = matches.get_flag("json");
    let report = runtime.block_on(async {
        let cancel = CancelSource::new();
        forward_signals(cancel.clone())?;

        let engine = engine::from_config(&config)?;
        // Keep stdout parseable when the report is JSON
        let timeline = if json {
            Timeline::new(std::io::stderr())
        } else {
            Timeline::stdout()
        };
        let harness = Harness::new(&config, engine)?
            .with_timeline(timeline)
            .with_cancel_source(cancel);
        Ok::<_, lockclash_core::Error>(harness.run().await)
    })?;

    let rendered = if json {
        report.to_json()?
    } else {
        report.render_text()
    };
    #[allow(clippy::print_stdout)]
    {
        println!("{rendered}");
    }

    Ok(())
}

/// Layered config from files and environment, then flags on top.
fn load(matches: &clap::ArgMatches) -> anyhow::Result<HarnessConfig> {
    let path = cli::config_path(matches);

    // Config loading only needs a single thread
    let mut config = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(lockclash_core::Error::from)?
        .block_on(load_config(path.as_deref()))?;

    cli::apply_args(&mut config, matches)?;
    tracing::debug!(
        engine = %config.engine,
        table = %config.table,
        sessions = config.sessions,
        "configuration loaded"
    );
    Ok(config)
}
