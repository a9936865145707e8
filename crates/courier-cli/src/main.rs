//! Courier CLI entry point

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use courier_core::{
    CadenceConfig, DriverRegistry, EngineConfig, Priority, RecipientId, TenantId,
};
use courier_runtime::{DispatchEngine, MemoryDriver};

mod cli;

use cli::{Cli, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match cli.command {
        Command::Demo {
            tenants,
            slots,
            recipients,
            base_delay_ms,
            batch_size,
            immediate,
        } => {
            run_demo(tenants, slots, recipients, base_delay_ms, batch_size, immediate).await
        }
    }
}

/// Setup logging based on verbosity level
fn setup_logging(verbose: bool) {
    let log_level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();
}

async fn run_demo(
    tenants: u16,
    slots: u16,
    recipients: usize,
    base_delay_ms: u64,
    batch_size: usize,
    immediate: bool,
) -> anyhow::Result<()> {
    let driver = Arc::new(MemoryDriver::new("primary"));
    let backup = Arc::new(MemoryDriver::new("backup"));
    let mut registry = DriverRegistry::new();
    registry.register(driver.clone());
    registry.register(backup);

    let config = EngineConfig {
        slots_per_tenant: slots,
        tick_interval: Duration::from_millis(500),
        cadence: CadenceConfig {
            base_delay: Duration::from_millis(base_delay_ms),
            batch_size,
            ..CadenceConfig::default()
        },
        ..EngineConfig::default()
    };
    let engine = DispatchEngine::new(config, registry);

    let tenant_ids: Vec<TenantId> = (1..=tenants)
        .map(|n| TenantId::new(format!("tenant-{n:02}")))
        .collect();

    for tenant in &tenant_ids {
        engine.init_slots(tenant).context("provisioning slots")?;
        let connected = engine
            .connect_all_slots(tenant)
            .await
            .context("connecting slots")?;
        info!(%tenant, connected, "slots online");

        let batch: Vec<RecipientId> = (0..recipients)
            .map(|i| RecipientId::new(format!("55119{i:08}")))
            .collect();
        let distribution = engine
            .distribute(tenant, &batch, Priority::Normal)
            .context("distributing recipients")?;
        info!(%tenant, created = distribution.created, "recipients distributed");

        engine.start_cadence(tenant).context("starting cadence")?;
    }

    if immediate {
        let first = RecipientId::new(format!("55119{:08}", 0));
        let activation = engine
            .activate_immediate(Some(&tenant_ids[0]), &first)
            .await
            .context("activating immediate cadence")?;
        info!(tenant = %activation.tenant, slot = %activation.slot, "immediate burst triggered");
    }

    // Wait for every tenant's queue to drain
    loop {
        tokio::time::sleep(Duration::from_millis(500)).await;
        let mut pending = 0;
        for tenant in &tenant_ids {
            pending += engine.get_stats(tenant)?.queued;
        }
        if pending == 0 {
            break;
        }
    }

    println!("\n{:<12} {:>6} {:>6} {:>6} {:>9}", "tenant", "slots", "sent", "errors", "success");
    for tenant in &tenant_ids {
        engine.stop_cadence(tenant)?;
        let stats = engine.get_stats(tenant)?;
        println!(
            "{:<12} {:>6} {:>6} {:>6} {:>8.1}%",
            tenant.to_string(),
            stats.active_slots,
            stats.total_sent,
            stats.total_errors,
            stats.success_rate * 100.0
        );
    }
    println!("\ndriver carried {} sends", driver.sent_count());

    Ok(())
}
