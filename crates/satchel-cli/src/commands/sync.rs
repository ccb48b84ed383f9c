use std::path::Path;

use crate::commands::common::{
    conflict_to_item, format_conflict_lines, open_service, sync_coordinator_from_env,
    SyncConflictItem,
};
use crate::error::CliError;

pub async fn run_sync(db_path: &Path) -> Result<(), CliError> {
    let service = open_service(db_path).await?;
    let sync = sync_coordinator_from_env(&service)?;

    let report = sync.sync_once().await?;
    if report.skipped {
        println!("Sync already in progress");
    } else {
        println!(
            "Sync completed: pushed {}, pulled {}, purged {}",
            report.pushed, report.pulled, report.purged
        );
    }
    Ok(())
}

pub async fn run_sync_status(as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let service = open_service(db_path).await?;

    // Status is meaningful without a remote: pending counts are local.
    match sync_coordinator_from_env(&service) {
        Ok(sync) => {
            let status = sync.status().await;
            if as_json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                println!("phase: {:?}", status.phase);
                println!("pending changes: {}", status.pending_changes);
                match status.last_sync_at {
                    Some(at) => println!("last sync at: {at}"),
                    None => println!("last sync at: never"),
                }
                if let Some(error) = status.last_error {
                    println!("last error: {error}");
                }
            }
        }
        Err(CliError::SyncNotConfigured) => {
            let pending = service.pending_changes().await?;
            if as_json {
                println!(
                    "{}",
                    serde_json::json!({
                        "configured": false,
                        "pending_changes": pending,
                    })
                );
            } else {
                println!("sync not configured");
                println!("pending changes: {pending}");
            }
        }
        Err(error) => return Err(error),
    }

    Ok(())
}

pub async fn run_sync_conflicts(
    limit: usize,
    as_json: bool,
    db_path: &Path,
) -> Result<(), CliError> {
    let service = open_service(db_path).await?;
    let conflicts = service.list_conflicts(limit).await?;

    if as_json {
        let json_items = conflicts
            .iter()
            .map(conflict_to_item)
            .collect::<Vec<SyncConflictItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if conflicts.is_empty() {
        println!("No sync conflicts recorded.");
        return Ok(());
    }

    for line in format_conflict_lines(&conflicts) {
        println!("{line}");
    }
    Ok(())
}
