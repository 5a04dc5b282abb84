//! Record command - write a portal record from the command line.
//!
//! Open streams of the same tenant pick the record up on their next tick.

use anyhow::{Context as _, Result};
use clap::Args;
use docket_feed::{Domain, TenantId};
use docket_store::PortalRecord;

use super::Context;

/// Arguments for the record command.
#[derive(Args, Debug)]
pub struct RecordArgs {
    /// Domain of the record: message, notification, case, document, financial
    pub domain: Domain,

    /// Tenant that owns the record
    #[arg(long)]
    pub tenant: String,

    /// Record fields as a JSON object (id and timestamp default to new/now)
    #[arg(long)]
    pub json: String,
}

/// Run the record command.
pub async fn run(args: RecordArgs, ctx: &Context) -> Result<()> {
    let tenant = TenantId::new(args.tenant);
    let record = PortalRecord::from_json(args.domain, &tenant, &args.json)
        .with_context(|| format!("invalid {} record", args.domain))?;

    let store = ctx.open_store()?;
    store.insert(&record)?;

    tracing::debug!(
        domain = %record.domain(),
        id = %record.id(),
        tenant_id = %tenant,
        "Record written"
    );
    println!("{} {}", record.domain(), record.id());
    if ctx.verbose {
        let changed = record.to_changed_record();
        println!("{}", serde_json::to_string_pretty(&changed)?);
    }
    Ok(())
}
