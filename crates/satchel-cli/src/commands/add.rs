use std::path::Path;

use satchel_core::capture::extract_tags;
use satchel_core::models::{Payload, Priority, RecordKind};

use crate::commands::common::{normalize_content, open_service, parse_due_date};
use crate::error::CliError;

pub struct AddOptions {
    pub kind: RecordKind,
    pub title: Option<String>,
    pub url: Option<String>,
    pub priority: Option<Priority>,
    pub due: Option<String>,
    pub tags: Vec<String>,
    pub content: Vec<String>,
}

pub async fn run_add(options: AddOptions, db_path: &Path) -> Result<(), CliError> {
    let payload = build_payload(&options)?;

    let service = open_service(db_path).await?;
    let record = service.create(options.kind, payload).await?;

    println!("{}", record.id);
    Ok(())
}

/// Quick capture mode: `satchel "my thought here"` creates a note
pub async fn run_quick(content_parts: &[String], db_path: &Path) -> Result<(), CliError> {
    let options = AddOptions {
        kind: RecordKind::Note,
        title: None,
        url: None,
        priority: None,
        due: None,
        tags: Vec::new(),
        content: content_parts.to_vec(),
    };
    run_add(options, db_path).await
}

fn build_payload(options: &AddOptions) -> Result<Payload, CliError> {
    let content = normalize_content(&options.content.join(" "));
    let title = options
        .title
        .as_deref()
        .and_then(normalize_content)
        .or_else(|| {
            content
                .as_deref()
                .and_then(|text| text.lines().next())
                .and_then(normalize_content)
        });

    if title.is_none() && content.is_none() {
        return Err(CliError::EmptyContent);
    }

    let mut tags: Vec<String> = options.tags.clone();
    if let Some(text) = &content {
        tags.extend(extract_tags(text));
    }
    tags.sort();
    tags.dedup();

    Ok(Payload {
        title: title.unwrap_or_default(),
        content,
        url: options.url.clone(),
        tags,
        priority: options.priority.unwrap_or_default(),
        due_date: options.due.as_deref().map(parse_due_date).transpose()?,
        ..Payload::default()
    })
}
