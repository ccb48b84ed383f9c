//! Satchel CLI - capture tasks, notes, and bookmarks from the terminal
//!
//! Quick capture with minimal friction; the same records sync to every
//! other device through `satchel sync`.

mod cli;
mod commands;
mod error;

use std::env;
use std::path::PathBuf;

use clap::{CommandFactory, Parser};

use cli::{Cli, Commands, SyncCommands};
use commands::add::{run_add, run_quick, AddOptions};
use commands::capture::run_capture;
use commands::completions::run_completions;
use commands::delete::run_delete;
use commands::device::run_device;
use commands::done::run_done;
use commands::edit::{run_edit, EditOptions};
use commands::list::run_list;
use commands::sync::{run_sync, run_sync_conflicts, run_sync_status};
use error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("satchel=info".parse().expect("valid directive")),
        )
        .init();

    let cli = Cli::parse();
    let db_path = resolve_db_path(cli.db_path);

    match cli.command {
        Some(Commands::Add {
            kind,
            title,
            url,
            priority,
            due,
            tags,
            content,
        }) => {
            run_add(
                AddOptions {
                    kind: kind.into(),
                    title,
                    url,
                    priority: priority.map(Into::into),
                    due,
                    tags,
                    content,
                },
                &db_path,
            )
            .await?;
        }
        Some(Commands::Capture {
            url,
            title,
            kind,
            content,
        }) => {
            run_capture(&url, &title, kind.into(), &content, &db_path).await?;
        }
        Some(Commands::List {
            kind,
            tag,
            limit,
            json,
        }) => {
            run_list(kind.map(Into::into), tag.as_deref(), limit, json, &db_path).await?;
        }
        Some(Commands::Edit {
            id,
            title,
            content,
            url,
            priority,
            due,
            tags,
            collections,
        }) => {
            run_edit(
                EditOptions {
                    id,
                    title,
                    content,
                    url,
                    priority: priority.map(Into::into),
                    due,
                    tags,
                    collections,
                },
                &db_path,
            )
            .await?;
        }
        Some(Commands::Done { id }) => run_done(&id, &db_path).await?,
        Some(Commands::Delete { id }) => run_delete(&id, &db_path).await?,
        Some(Commands::Sync { command }) => match command {
            None => run_sync(&db_path).await?,
            Some(SyncCommands::Status { json }) => run_sync_status(json, &db_path).await?,
            Some(SyncCommands::Conflicts { limit, json }) => {
                run_sync_conflicts(limit, json, &db_path).await?;
            }
        },
        Some(Commands::Device) => run_device(&db_path).await?,
        Some(Commands::Completions { shell, output }) => {
            run_completions(shell, output.as_deref())?;
        }
        None => {
            // Quick capture mode: satchel "my thought"
            if cli.note.is_empty() {
                Cli::command().print_help().map_err(CliError::Io)?;
                println!();
            } else {
                run_quick(&cli.note, &db_path).await?;
            }
        }
    }

    Ok(())
}

fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os("SATCHEL_DB_PATH").map(PathBuf::from))
        .unwrap_or_else(default_db_path)
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("satchel")
        .join("satchel.db")
}
