// Replayer binary entry point
// Results are printed as JSON on stdout; logs go to stderr

mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{ChecksumArgs, Cli, Commands, FindArgs, WorkflowCommand};
use common::config::Settings;
use common::credentials::CredentialManager;
use common::db::SqlServerStore;
use common::models::FindRequestsQuery;
use common::remote::SftpConnector;
use common::retry::ExponentialBackoff;
use common::telemetry::init_logging;
use common::workflow::default_type_prefixes;
use common::{CommonWorkflows, RequestManager};
use serde::Serialize;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let settings = match load_settings(&cli) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            process::exit(2);
        }
    };

    let log_level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| settings.observability.log_level.clone());
    if let Err(e) = init_logging(&log_level, settings.observability.log_format) {
        eprintln!("Warning: {}", e);
    }

    match execute_command(cli.command, &settings).await {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("Error: {:#}", e);
            process::exit(1);
        }
    }
}

fn load_settings(cli: &Cli) -> Result<Settings> {
    let settings = Settings::load_from_path(&cli.config_dir)
        .with_context(|| format!("Failed to load configuration from {}", cli.config_dir.display()))?;
    settings
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;
    Ok(settings)
}

fn build_manager(settings: &Settings) -> RequestManager {
    let credentials = Arc::new(CredentialManager::new(
        settings.credentials.clone(),
        &settings.sftp,
    ));
    let retry = ExponentialBackoff::from_settings(&settings.retry);
    let store = SqlServerStore::new(
        settings.database.clone(),
        Arc::clone(&credentials),
        retry.clone(),
    );
    let connector = SftpConnector::new(credentials, &settings.sftp, retry);
    RequestManager::new(Arc::new(store), Arc::new(connector), settings)
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn type_names_or_default(type_names: Vec<String>) -> Vec<String> {
    if type_names.is_empty() {
        default_type_prefixes()
    } else {
        type_names
    }
}

fn find_query(args: FindArgs) -> FindRequestsQuery {
    let mut query = FindRequestsQuery::for_districts(args.districts).with_type_names(args.type_names);
    query.type_ids = args.type_ids;
    if !args.statuses.is_empty() {
        query.statuses = args.statuses;
    }
    query.since = args.since;
    query
}

/// Run one command; Ok(false) means it finished but reported failure
async fn execute_command(command: Commands, settings: &Settings) -> Result<bool> {
    let manager = build_manager(settings);
    let download_dir = |dir: Option<PathBuf>| dir.unwrap_or_else(|| settings.batch.download_dir.clone());

    match command {
        Commands::ListTypes { filter } => {
            let types = manager.list_request_types(filter.as_deref()).await?;
            print_json(&types)?;
            Ok(true)
        }

        Commands::Find(args) => {
            let requests = manager.find_requests(&find_query(args)).await?;
            info!(found = requests.len(), "Find complete");
            print_json(&requests)?;
            Ok(true)
        }

        Commands::Email { request_id, dir } => {
            let dir = dir.unwrap_or_else(|| settings.batch.temp_dir.clone());
            match manager.email_preview(request_id, &dir).await? {
                Some(preview) => {
                    print_json(&preview)?;
                    Ok(true)
                }
                None => {
                    eprintln!("No email content found for request {}", request_id);
                    Ok(false)
                }
            }
        }

        Commands::Download {
            request_ids,
            dir,
            concurrency,
        } => {
            let dir = download_dir(dir);
            if let [request_id] = request_ids[..] {
                let outcome = manager.download_files(request_id, &dir).await?;
                print_json(&outcome)?;
                Ok(outcome.success)
            } else {
                let report = manager
                    .download_files_batch(&request_ids, &dir, concurrency)
                    .await;
                print_json(&report)?;
                Ok(report.success_count == report.total)
            }
        }

        Commands::Restore {
            request_ids,
            concurrency,
        } => {
            if let [request_id] = request_ids[..] {
                let outcome = manager.restore_files(request_id).await?;
                print_json(&outcome)?;
                Ok(outcome.success)
            } else {
                let report = manager.restore_files_batch(&request_ids, concurrency).await;
                print_json(&report)?;
                Ok(report.success_count == report.total)
            }
        }

        Commands::Rerun {
            request_ids,
            checksums: ChecksumArgs {
                delete_checksums,
                checksum_keys,
            },
        } => {
            let summary = manager
                .rerun_requests(&request_ids, delete_checksums, &checksum_keys)
                .await?;
            print_json(&summary)?;
            Ok(summary.skipped.is_empty())
        }

        Commands::RerunDistricts {
            district_ids,
            type_names,
            checksums: ChecksumArgs {
                delete_checksums,
                checksum_keys,
            },
        } => {
            let summary = manager
                .batch_rerun_by_district(
                    &district_ids,
                    &type_names_or_default(type_names),
                    delete_checksums,
                    &checksum_keys,
                )
                .await?;
            print_json(&summary)?;
            Ok(true)
        }

        Commands::Workflow { command } => {
            let workflows = CommonWorkflows::new(manager);
            let result = match command {
                WorkflowCommand::DistrictRefresh {
                    district_ids,
                    type_names,
                    keep_checksums,
                    no_restore,
                } => {
                    workflows
                        .district_refresh(
                            &district_ids,
                            &type_names_or_default(type_names),
                            !keep_checksums,
                            !no_restore,
                        )
                        .await
                }
                WorkflowCommand::BulkDownload {
                    type_names,
                    districts,
                    dir,
                    concurrency,
                } => {
                    workflows
                        .bulk_file_download(&type_names, &districts, &download_dir(dir), concurrency)
                        .await
                }
                WorkflowCommand::Monitor {
                    type_names,
                    days_back,
                } => {
                    workflows
                        .integration_monitoring(&type_names_or_default(type_names), days_back)
                        .await
                }
            };
            info!(
                success = result.success,
                steps_completed = result.steps_completed,
                total_steps = result.total_steps,
                "{}",
                result.message
            );
            print_json(&result)?;
            Ok(result.success)
        }
    }
}
