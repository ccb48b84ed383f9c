use std::path::Path;

use crate::commands::common::{open_service, resolve_record};
use crate::error::CliError;

pub async fn run_done(id: &str, db_path: &Path) -> Result<(), CliError> {
    let service = open_service(db_path).await?;
    let record = resolve_record(&service, id).await?;

    let toggled = service.toggle_completed(&record.id).await?;
    let state = if toggled.payload.completed {
        "done"
    } else {
        "reopened"
    };
    println!("{} {state}", toggled.id);
    Ok(())
}
