use std::path::Path;

use crate::commands::common::{open_service, resolve_record};
use crate::error::CliError;

pub async fn run_delete(id: &str, db_path: &Path) -> Result<(), CliError> {
    let service = open_service(db_path).await?;
    let record = resolve_record(&service, id).await?;

    service.delete(&record.id).await?;
    println!("{}", record.id);
    Ok(())
}
