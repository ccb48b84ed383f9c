use std::path::Path;

use chrono::Utc;
use satchel_core::capture::PageContext;
use satchel_core::models::RecordKind;

use crate::commands::common::open_service;
use crate::error::CliError;

pub async fn run_capture(
    url: &str,
    title: &str,
    kind: RecordKind,
    content_parts: &[String],
    db_path: &Path,
) -> Result<(), CliError> {
    let context = PageContext {
        url: url.to_string(),
        title: title.to_string(),
        domain: domain_from_url(url),
        favicon: None,
        captured_at: Utc::now().timestamp_millis(),
    };

    let service = open_service(db_path).await?;
    let record = service
        .create_from_context(&context, kind, &content_parts.join(" "))
        .await?;

    println!("{}", record.id);
    Ok(())
}

fn domain_from_url(url: &str) -> String {
    let without_scheme = url
        .split_once("://")
        .map_or(url, |(_, rest)| rest);
    without_scheme
        .split(['/', '?', '#'])
        .next()
        .unwrap_or("")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_from_url_strips_scheme_and_path() {
        assert_eq!(
            domain_from_url("https://www.youtube.com/watch?v=abc"),
            "www.youtube.com"
        );
        assert_eq!(domain_from_url("example.org/page"), "example.org");
        assert_eq!(domain_from_url("https://docs.rs"), "docs.rs");
    }
}
