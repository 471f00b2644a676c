//! `switchd`: runs the schedule dispatcher over the switches in the config.
//!
//! The daemon replays the state stored in its database: modes, levels and
//! schedules written through a `DispatcherHandle` by an embedding program.
//! It has no control surface of its own beyond logging what it does.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use switchd_core::SwitchdConfig;
use switchd_scheduler::{
    ActuatorRegistry, FiredEvent, ScheduleDispatcher, SwitchSpec, SwitchStore, SystemClock,
};
use tracing::info;

/// Weekly schedule dispatcher for switches and relays.
#[derive(Debug, Parser)]
#[command(name = "switchd", version)]
struct Cli {
    /// Config file (default: $SWITCHD_CONFIG or ~/.switchd/switchd.toml).
    #[arg(long)]
    config: Option<String>,

    /// Validate the configuration, list the switches and exit.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "switchd=info,switchd_scheduler=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = SwitchdConfig::load(cli.config.as_deref())
        .with_context(|| "failed to load configuration")?;
    let registry = ActuatorRegistry::from_config(&config);
    let specs = SwitchSpec::from_config(&config, &registry)?;

    if cli.check {
        println!("actuators: {}", registry.names().join(", "));
        for spec in &specs {
            println!(
                "{}\t{}\tlevels={}\tactuator={}",
                spec.id,
                spec.name,
                spec.levels,
                spec.actuator.name()
            );
        }
        println!("configuration ok: {} switch(es)", specs.len());
        return Ok(());
    }

    let db_path = &config.database.path;
    ensure_parent_dir(db_path);
    info!(path = %db_path, "opening SQLite database");
    let db = rusqlite::Connection::open(db_path)
        .with_context(|| format!("failed to open database {db_path}"))?;
    db.execute_batch("PRAGMA journal_mode=WAL;")?;
    switchd_scheduler::db::init_db(&db)?;

    // Fired-transition channel: dispatcher → log task
    let (fired_tx, mut fired_rx) = tokio::sync::mpsc::channel::<FiredEvent>(256);
    info!(actuators = ?registry.names(), "actuators ready");
    let (dispatcher, handle) = ScheduleDispatcher::new(
        SwitchStore::new(db)?,
        Arc::new(SystemClock),
        specs,
        &config.dispatcher,
        Some(fired_tx),
    )?;

    tokio::spawn(async move {
        while let Some(fired) = fired_rx.recv().await {
            info!(
                switch = %fired.switch,
                level = fired.level,
                due = %fired.due,
                fired_at = %fired.fired_at,
                "transition applied"
            );
        }
    });

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let dispatcher_task = tokio::spawn(dispatcher.run(shutdown_rx));

    for switch in handle.switches().await? {
        info!(
            switch = %switch.id,
            mode = %switch.mode,
            level = switch.level,
            active = switch.active_schedule.as_deref().unwrap_or("-"),
            "switch ready"
        );
    }
    match handle.next_event().await? {
        Some(event) => info!(due = %event.due, switches = event.actions.len(), "next transition"),
        None => info!("no transition scheduled"),
    }
    info!("switchd running, press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("shutdown requested");

    // signal dispatcher to stop
    let _ = shutdown_tx.send(true);
    dispatcher_task.await?;
    drop(handle);
    Ok(())
}

fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}
