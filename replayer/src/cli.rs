// Command-line definitions

use chrono::{DateTime, NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "replayer")]
#[command(about = "Find, restore, download and rerun district data requests", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Directory holding default.toml / local.toml
    #[arg(long, global = true, default_value = "config", env = "REPLAYER_CONFIG_DIR")]
    pub config_dir: PathBuf,

    /// Override the configured log level (e.g. debug, warn)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List request types, optionally filtered by name
    ListTypes {
        /// Case-insensitive substring of the type name
        #[arg(short, long)]
        filter: Option<String>,
    },

    /// Find the latest request per district and type
    Find(FindArgs),

    /// Write a request's notification email as an HTML file
    Email {
        request_id: i32,

        /// Output directory for the preview
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },

    /// Download request files into <dir>/RequestID_<id>
    Download {
        #[arg(required = true, num_args = 1..)]
        request_ids: Vec<i32>,

        /// Local base directory (defaults to batch.download_dir)
        #[arg(short, long)]
        dir: Option<PathBuf>,

        #[arg(short, long)]
        concurrency: Option<usize>,
    },

    /// Put request files back into their upload directory
    Restore {
        #[arg(required = true, num_args = 1..)]
        request_ids: Vec<i32>,

        #[arg(short, long)]
        concurrency: Option<usize>,
    },

    /// Requeue the given requests, optionally clearing their checksums
    Rerun {
        #[arg(required = true, num_args = 1..)]
        request_ids: Vec<i32>,

        #[command(flatten)]
        checksums: ChecksumArgs,
    },

    /// Requeue the latest requests of whole districts
    RerunDistricts {
        #[arg(required = true, num_args = 1..)]
        district_ids: Vec<i32>,

        /// Request type name prefix (repeatable)
        #[arg(short = 't', long = "type-name")]
        type_names: Vec<String>,

        #[command(flatten)]
        checksums: ChecksumArgs,
    },

    /// Multi-step workflows
    Workflow {
        #[command(subcommand)]
        command: WorkflowCommand,
    },
}

#[derive(Args, Debug)]
pub struct FindArgs {
    /// District id (repeatable)
    #[arg(short, long = "district")]
    pub districts: Vec<i32>,

    /// Request type id (repeatable)
    #[arg(long = "type-id")]
    pub type_ids: Vec<i32>,

    /// Request type name prefix (repeatable)
    #[arg(short = 't', long = "type-name")]
    pub type_names: Vec<String>,

    /// Status code (repeatable); defaults to failed and succeeded
    #[arg(short, long = "status")]
    pub statuses: Vec<i32>,

    /// Only requests at or after this time (YYYY-MM-DD or RFC 3339)
    #[arg(long, value_parser = parse_since)]
    pub since: Option<DateTime<Utc>>,
}

#[derive(Args, Debug)]
pub struct ChecksumArgs {
    /// Also delete integration checksums before requeueing
    #[arg(long)]
    pub delete_checksums: bool,

    /// Only delete checksums with this key (repeatable, needs --delete-checksums)
    #[arg(long = "checksum-key")]
    pub checksum_keys: Vec<String>,
}

#[derive(Subcommand, Debug)]
pub enum WorkflowCommand {
    /// Find, restore and rerun the latest requests of districts
    DistrictRefresh {
        #[arg(required = true, num_args = 1..)]
        district_ids: Vec<i32>,

        /// Request type name prefix (repeatable); defaults to SAT and PSAT
        #[arg(short = 't', long = "type-name")]
        type_names: Vec<String>,

        #[arg(long)]
        keep_checksums: bool,

        /// Skip the file restore step
        #[arg(long)]
        no_restore: bool,
    },

    /// Download files of every matching request
    BulkDownload {
        /// Request type name prefix (repeatable)
        #[arg(short = 't', long = "type-name", required = true)]
        type_names: Vec<String>,

        /// District id (repeatable); all districts when omitted
        #[arg(short, long = "district")]
        districts: Vec<i32>,

        #[arg(long)]
        dir: Option<PathBuf>,

        #[arg(short, long)]
        concurrency: Option<usize>,
    },

    /// Success/failure report over recent requests
    Monitor {
        /// Request type name prefix (repeatable); defaults to SAT and PSAT
        #[arg(short = 't', long = "type-name")]
        type_names: Vec<String>,

        #[arg(long, default_value_t = common::workflow::DEFAULT_DAYS_BACK)]
        days_back: u32,
    },
}

fn parse_since(value: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return date
            .and_hms_opt(0, 0, 0)
            .map(|t| t.and_utc())
            .ok_or_else(|| format!("invalid date: {}", value));
    }
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("expected YYYY-MM-DD or RFC 3339, got '{}': {}", value, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_since_accepts_dates_and_timestamps() {
        let date = parse_since("2024-03-01").unwrap();
        assert_eq!(date.to_rfc3339(), "2024-03-01T00:00:00+00:00");

        let ts = parse_since("2024-03-01T10:00:00-05:00").unwrap();
        assert_eq!(ts.to_rfc3339(), "2024-03-01T15:00:00+00:00");

        assert!(parse_since("yesterday").is_err());
    }

    #[test]
    fn test_workflow_subcommand_parses() {
        let cli = Cli::try_parse_from([
            "replayer",
            "workflow",
            "district-refresh",
            "10",
            "11",
            "-t",
            "SAT",
            "--no-restore",
        ])
        .unwrap();
        match cli.command {
            Commands::Workflow {
                command:
                    WorkflowCommand::DistrictRefresh {
                        district_ids,
                        type_names,
                        no_restore,
                        keep_checksums,
                    },
            } => {
                assert_eq!(district_ids, vec![10, 11]);
                assert_eq!(type_names, vec!["SAT".to_string()]);
                assert!(no_restore);
                assert!(!keep_checksums);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_rerun_keeps_checksums_by_default() {
        let cli = Cli::try_parse_from(["replayer", "rerun", "123"]).unwrap();
        match cli.command {
            Commands::Rerun {
                request_ids,
                checksums,
            } => {
                assert_eq!(request_ids, vec![123]);
                assert!(!checksums.delete_checksums);
                assert!(checksums.checksum_keys.is_empty());
            }
            other => panic!("unexpected command: {:?}", other),
        }

        let cli = Cli::try_parse_from([
            "replayer",
            "rerun",
            "123",
            "--delete-checksums",
            "--checksum-key",
            "roster",
        ])
        .unwrap();
        match cli.command {
            Commands::Rerun { checksums, .. } => {
                assert!(checksums.delete_checksums);
                assert_eq!(checksums.checksum_keys, vec!["roster".to_string()]);
            }
            other => panic!("unexpected command: {:?}", other),
        }

        assert!(Cli::try_parse_from(["replayer", "rerun", "123", "--keep-checksums"]).is_err());
    }

    #[test]
    fn test_rerun_districts_keeps_checksums_by_default() {
        let cli = Cli::try_parse_from(["replayer", "rerun-districts", "7"]).unwrap();
        match cli.command {
            Commands::RerunDistricts { checksums, .. } => assert!(!checksums.delete_checksums),
            other => panic!("unexpected command: {:?}", other),
        }

        let cli =
            Cli::try_parse_from(["replayer", "rerun-districts", "7", "--delete-checksums"]).unwrap();
        match cli.command {
            Commands::RerunDistricts { checksums, .. } => assert!(checksums.delete_checksums),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_district_refresh_deletes_checksums_by_default() {
        let cli = Cli::try_parse_from(["replayer", "workflow", "district-refresh", "7"]).unwrap();
        match cli.command {
            Commands::Workflow {
                command: WorkflowCommand::DistrictRefresh { keep_checksums, .. },
            } => assert!(!keep_checksums),
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
