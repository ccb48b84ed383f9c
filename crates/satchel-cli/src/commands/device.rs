use std::path::Path;

use crate::commands::common::open_service;
use crate::error::CliError;

pub async fn run_device(db_path: &Path) -> Result<(), CliError> {
    let service = open_service(db_path).await?;
    println!("{}", service.device_id().await);
    Ok(())
}
