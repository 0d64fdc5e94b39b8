mod args;

use std::io;
use std::process;

use anyhow::{Context, Result};
use args::Args;
use clap::Parser;
use falcon_isolation::config::IsolationConfig;
use falcon_isolation::session::{connect_maintenance, connect_test_session, ConnectOptions};
use falcon_isolation::{dry_run, generate_permutations, load_spec, Engine, IsolationError};
use tracing::{debug, info};

/// Exit status for a step that never resolved.
const EXIT_LOCK_TIMEOUT: i32 = 2;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("fisotest: error: {:#}", e);
        let timed_out = matches!(
            e.downcast_ref::<IsolationError>(),
            Some(IsolationError::LockTimeout { .. })
        );
        process::exit(if timed_out { EXIT_LOCK_TIMEOUT } else { 1 });
    }
}

async fn run() -> Result<()> {
    falcon_observability::init_tracing("warn");

    let args = Args::parse();

    if args.print_default_config {
        print!("{}", IsolationConfig::default().to_toml()?);
        return Ok(());
    }

    let mut config = match &args.config {
        Some(path) => IsolationConfig::load(path)
            .with_context(|| format!("Cannot load config: {}", path.display()))?,
        None => IsolationConfig::default(),
    };
    args.apply_overrides(&mut config);
    config.timing.validate()?;

    if let Some(addr) = args.metrics_addr.as_deref() {
        falcon_observability::init_metrics(addr)
            .map_err(|e| anyhow::anyhow!("Cannot start metrics exporter on {}: {}", addr, e))?;
    }

    let path = args.spec.as_deref().context("No spec file given")?;
    let spec = load_spec(path).with_context(|| format!("Cannot load spec: {}", path.display()))?;
    let permutations = generate_permutations(&spec);
    info!(
        "running {} with {} permutations",
        spec.name,
        permutations.len()
    );

    if args.dry_run {
        let mut stdout = io::stdout().lock();
        dry_run(&spec, &permutations, &mut stdout)?;
        return Ok(());
    }

    if spec.sessions.is_empty() {
        debug!("spec declares no sessions, nothing to run");
        return Ok(());
    }

    let opts = ConnectOptions::new(&config.connection, config.session.init_statements.clone());
    let maint = connect_maintenance(&opts)
        .await
        .with_context(|| format!("Could not connect to {}", opts.target()))?;
    let mut sessions = Vec::with_capacity(spec.sessions.len());
    for session in &spec.sessions {
        let conn = connect_test_session(&session.tag, &opts)
            .await
            .with_context(|| format!("Could not open session {}", session.tag))?;
        sessions.push(conn);
    }

    let mut engine = Engine::new(maint, sessions, io::stdout().lock(), config.timing.clone());
    let outcome = engine.run(&spec, &permutations).await;
    engine.close().await;
    outcome?;
    Ok(())
}
