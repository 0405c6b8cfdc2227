//! Check (and optionally repair) slot counters against their items.

use anyhow::{Context, bail};
use clap::Parser;

use slotkeeper_infra::{InfraConfig, Inventory};

#[derive(Debug, Parser)]
#[command(name = "slotkeeper-audit", about = "Verify slot item counts")]
struct Args {
    /// Rewrite drifted counters instead of only reporting them.
    #[arg(long)]
    reconcile: bool,

    /// Print the report as JSON on stdout.
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    slotkeeper_observability::init();
    let args = Args::parse();

    let config = InfraConfig::from_env().context("invalid configuration")?;
    if config.database_url.is_none() {
        bail!("DATABASE_URL must be set to audit a database");
    }
    let inventory = Inventory::from_config(&config)
        .await
        .context("failed to open inventory store")?;

    let report = if args.reconcile {
        inventory.slots().reconcile_counts().await?
    } else {
        inventory.slots().verify_counts().await?
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    for drift in &report.discrepancies {
        tracing::warn!(
            slot_id = %drift.slot_id,
            recorded = drift.recorded,
            actual = drift.actual,
            repaired = args.reconcile,
            "slot count drift"
        );
    }
    for item_id in &report.dangling_items {
        tracing::warn!(%item_id, "item references a missing slot");
    }

    if report.is_consistent() {
        tracing::info!("all slot counts match their items");
        return Ok(());
    }
    if args.reconcile && report.dangling_items.is_empty() {
        tracing::info!(repaired = report.discrepancies.len(), "slot counts reconciled");
        return Ok(());
    }
    bail!(
        "{} drifted slot(s), {} dangling item(s)",
        report.discrepancies.len(),
        report.dangling_items.len()
    )
}
