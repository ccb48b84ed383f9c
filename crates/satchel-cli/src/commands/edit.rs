use std::path::Path;

use satchel_core::models::{Priority, RecordPatch};

use crate::commands::common::{open_service, parse_due_date, resolve_record};
use crate::error::CliError;

pub struct EditOptions {
    pub id: String,
    pub title: Option<String>,
    pub content: Option<String>,
    pub url: Option<String>,
    pub priority: Option<Priority>,
    pub due: Option<String>,
    pub tags: Vec<String>,
    pub collections: Vec<String>,
}

pub async fn run_edit(options: EditOptions, db_path: &Path) -> Result<(), CliError> {
    let service = open_service(db_path).await?;
    let record = resolve_record(&service, &options.id).await?;

    let patch = RecordPatch {
        title: options.title,
        content: options.content,
        url: options.url,
        priority: options.priority,
        due_date: options.due.as_deref().map(parse_due_date).transpose()?,
        tags: (!options.tags.is_empty()).then_some(options.tags),
        collections: (!options.collections.is_empty()).then_some(options.collections),
        ..RecordPatch::default()
    };

    let updated = service.update(&record.id, &patch).await?;
    println!("{}", updated.id);
    Ok(())
}
