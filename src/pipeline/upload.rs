//! Upload: checks the categorized records, shows what will be written, asks for confirmation and
//! writes one group per account.

use crate::backup::UPLOAD;
use crate::checkpoint::RunInfo;
use crate::model::{Amount, Record};
use crate::pipeline::Context;
use crate::Result;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use tracing::{debug, info};

pub(super) enum Upload {
    Declined,
    Written { destination: String },
}

pub(super) async fn run(ctx: &mut Context, run: RunInfo, records: &[Record]) -> Result<Upload> {
    for (index, record) in records.iter().enumerate() {
        record.validate_for_upload(index)?;
    }

    let groups = group_by_account(records);
    let target = run.period.workbook_name();
    let destination = ctx.collaborators.sheet.describe(&target);

    println!("{}", preview_table(&groups));
    let prompt = format!(
        "Proceed with writing {} transactions to {destination}? (yes/no)",
        records.len()
    );
    if !ctx.collaborators.confirm.confirm(&prompt).await? {
        info!("Upload declined, the checkpoints are kept for the next run");
        return Ok(Upload::Declined);
    }

    let mut progress = ctx.store.load_progress(run.run_id).await?;
    let backup = ctx.backup.save_json(UPLOAD, records).await?;
    debug!("Backed up the records to {}", backup.display());

    let names: Vec<String> = groups.keys().map(|k| k.to_string()).collect();
    ctx.collaborators
        .sheet
        .ensure_structure(&target, &names)
        .await?;

    for (group, rows) in &groups {
        if progress.is_done(group) {
            info!("Skipping {group}, it was written by an earlier attempt");
            continue;
        }
        let rows: Vec<Record> = rows.iter().map(|r| (*r).clone()).collect();
        ctx.collaborators
            .sheet
            .append_rows(&target, group, &rows)
            .await?;
        progress.mark_done(*group);
        ctx.store.save_progress(&progress).await?;
        info!("Wrote {} row(s) to {group}", rows.len());
    }

    ctx.store.clear().await;
    info!("Uploaded {} transaction(s) to {destination}", records.len());
    Ok(Upload::Written { destination })
}

/// Groups records by account, in account name order, keeping record order within a group.
fn group_by_account(records: &[Record]) -> BTreeMap<&str, Vec<&Record>> {
    let mut groups: BTreeMap<&str, Vec<&Record>> = BTreeMap::new();
    for record in records {
        groups.entry(record.account()).or_default().push(record);
    }
    groups
}

fn preview_table(groups: &BTreeMap<&str, Vec<&Record>>) -> String {
    let mut out = String::new();
    for (group, rows) in groups {
        out.push_str(&format!("{group} ({} transaction(s))\n", rows.len()));
        for r in rows {
            out.push_str(&format!(
                "  {:<10}  {:>12}  {:<24}  expense={}  split={}  {}\n",
                r.date().to_string(),
                r.amount().to_string(),
                r.category().map(|c| c.name()).unwrap_or_default(),
                r.is_expense().map(u8::from).unwrap_or_default(),
                r.is_split().map(|s| s.as_u8()).unwrap_or_default(),
                r.description()
            ));
        }
        let total: Decimal = rows.iter().map(|r| r.amount().value()).sum();
        out.push_str(&format!("  {:<10}  {:>12}\n", "Total", Amount::new(total).to_string()));
    }
    out
}
