use std::path::Path;

use satchel_core::db::RecordFilter;
use satchel_core::models::RecordKind;

use crate::commands::common::{
    format_record_lines, open_service, record_to_list_item, RecordListItem,
};
use crate::error::CliError;

pub async fn run_list(
    kind: Option<RecordKind>,
    tag: Option<&str>,
    limit: usize,
    as_json: bool,
    db_path: &Path,
) -> Result<(), CliError> {
    let service = open_service(db_path).await?;
    let filter = RecordFilter {
        kind,
        tag: tag.map(ToString::to_string),
        limit: Some(limit),
        ..RecordFilter::default()
    };
    let records = service.list(&filter).await?;

    if as_json {
        let json_items = records
            .iter()
            .map(record_to_list_item)
            .collect::<Vec<RecordListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
    } else {
        for line in format_record_lines(&records) {
            println!("{line}");
        }
    }

    Ok(())
}
