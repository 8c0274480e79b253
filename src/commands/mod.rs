//! Command implementations for clusterlock.
//!
//! `list`, `clear` and `reap` work on the shared store directly. `hold`
//! goes through a regular [`LockManager`] so it contends with other nodes
//! exactly like an application would.

use crate::cli::{ClearArgs, Cli, Command, HoldArgs};
use chrono::Utc;
use clusterlock::{DirectoryStore, LockConfig, LockError, LockManager, LockStore, Result};
use std::thread;
use std::time::{Duration, Instant};

/// Dispatch a command to its implementation.
pub fn dispatch(cli: Cli) -> Result<()> {
    let config = resolve_config(&cli)?;

    match cli.command {
        Command::List => cmd_list(&config),
        Command::Clear(args) => cmd_clear(&config, args),
        Command::Reap => cmd_reap(&config),
        Command::Hold(args) => cmd_hold(config, args),
    }
}

/// Load `--config` (or defaults) and apply command-line overrides.
fn resolve_config(cli: &Cli) -> Result<LockConfig> {
    let mut config = match &cli.config {
        Some(path) => LockConfig::load(path)?,
        None => LockConfig::default(),
    };

    if let Some(dir) = &cli.store_dir {
        config.store_dir = Some(dir.clone());
    }
    if let Some(node) = &cli.node_id {
        config.node_id = Some(node.clone());
    }

    config.validate()?;
    Ok(config)
}

fn open_store(config: &LockConfig) -> Result<DirectoryStore> {
    let dir = config.store_dir.as_ref().ok_or_else(|| {
        LockError::Config(
            "no lock store configured: pass --store-dir or set store_dir in the config"
                .to_string(),
        )
    })?;
    Ok(DirectoryStore::open(dir)?.with_corrupt_row_grace(config.corrupt_row_grace()))
}

fn cmd_list(config: &LockConfig) -> Result<()> {
    let store = open_store(config)?;
    let rows = store.list()?;

    if rows.is_empty() {
        println!("No locks held.");
        return Ok(());
    }

    println!("Locks ({}):", rows.len());
    println!();
    for row in &rows {
        println!("{}", row.key);
        println!("  Owner:      {}", row.owner);
        println!("  Lease:      {}", row.lease);
        println!("  Created:    {}", row.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
        println!("  Age:        {}", row.age_string());
        if row.is_expired() {
            println!("  Status:     EXPIRED");
        } else {
            println!("  Expires in: {}s", row.remaining().as_secs());
        }
        println!();
    }

    Ok(())
}

fn cmd_clear(config: &LockConfig, args: ClearArgs) -> Result<()> {
    let store = open_store(config)?;

    let row = store
        .get(&args.key)?
        .ok_or_else(|| LockError::NotFound(args.key.clone()))?;

    let expired = row.is_expired();
    if !expired && !args.force {
        eprintln!(
            "The lease on '{}' is still running ({}s left). Clearing a live lock lets \
             a second holder in while the first one may still be working.\n\n\
             To clear it anyway, run:\n  clusterlock clear {} --force",
            row.key,
            row.remaining().as_secs(),
            row.key
        );
        return Err(LockError::AlreadyLocked {
            key: row.key.clone(),
            holder: row.owner.to_string(),
        });
    }

    // Remove only the claim inspected above; a newer claim stays put.
    if !store.release(&row.key, &row.owner, row.lease)? {
        return Err(LockError::Store(format!(
            "lock on '{}' changed while clearing it; run the command again",
            row.key
        )));
    }

    tracing::warn!(
        key = %row.key,
        owner = %row.owner,
        lease = row.lease,
        expired,
        "cleared lock row"
    );

    println!("Cleared lock: {}", row.key);
    println!();
    println!("Lock details:");
    println!("  Owner:      {}", row.owner);
    println!("  Lease:      {}", row.lease);
    println!("  Created:    {}", row.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("  Age:        {}", row.age_string());
    if expired {
        println!("  Status:     was EXPIRED");
    }

    Ok(())
}

fn cmd_reap(config: &LockConfig) -> Result<()> {
    let store = open_store(config)?;
    let reaped = store.reap_expired(Utc::now())?;

    if reaped.is_empty() {
        println!("No expired locks.");
        return Ok(());
    }

    println!("Reaped {} expired lock(s):", reaped.len());
    for row in &reaped {
        println!("  {}", row);
    }

    Ok(())
}

fn cmd_hold(config: LockConfig, args: HoldArgs) -> Result<()> {
    let manager = LockManager::with_directory_store(config)?;
    manager.init()?;

    let timeout = args
        .timeout
        .map(Duration::from_secs)
        .unwrap_or_else(|| manager.config().default_timeout());

    let handle = manager.lock_with_timeout(&args.key, timeout)?;
    println!(
        "Locked '{}' as {} (lease {}, timeout {}s)",
        handle.key(),
        manager.node_id(),
        handle.lease(),
        timeout.as_secs()
    );

    let deadline = Instant::now() + Duration::from_secs(args.duration);
    let held = keep_refreshed(&handle, deadline);
    let unlocked = manager.unlock(&args.key);
    manager.destroy();

    held?;
    unlocked?;
    println!("Released '{}'", args.key);
    Ok(())
}

/// Refresh `handle` at half its timeout until `deadline` passes.
fn keep_refreshed(handle: &clusterlock::LockHandle, deadline: Instant) -> Result<()> {
    let step = (handle.timeout() / 2).max(Duration::from_millis(10));

    loop {
        let now = Instant::now();
        if now >= deadline {
            return Ok(());
        }

        thread::sleep(step.min(deadline - now));
        if Instant::now() < deadline {
            handle.refresh()?;
            tracing::debug!(
                key = handle.key(),
                lease = handle.lease(),
                remaining_secs = handle.seconds_remaining(),
                "refreshed held lock"
            );
        }
    }
}
