pub mod commands;
pub mod config;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

use crate::job::types::JobType;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Also write logs to a file (the default log path when no value is given)
    #[arg(long, global = true)]
    pub log_file: Option<Option<PathBuf>>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an extraction job and print its result as JSON
    Run {
        /// Job type, e.g. FETCH_INFO or fetch-first-page
        #[arg(required = true)]
        job_type: JobType,

        /// Target URL (cache://<key> serves a cached result)
        #[arg(short, long)]
        url: Option<String>,

        /// Service the job authenticates against
        #[arg(short, long)]
        service: Option<String>,

        /// Raw payload handed to the handler on the first round
        #[arg(long)]
        payload: Option<String>,

        /// Configuration profile to use
        #[arg(short, long)]
        profile: Option<String>,
    },

    /// Inspect logged job failures
    Errors {
        /// Configuration profile to use
        #[arg(short, long)]
        profile: Option<String>,

        #[command(subcommand)]
        action: ErrorsAction,
    },

    /// Manage stored service cookies
    Cookies {
        /// Configuration profile to use
        #[arg(short, long)]
        profile: Option<String>,

        #[command(subcommand)]
        action: CookiesAction,
    },

    /// Manage configuration profiles
    Config {
        /// Profile name to manage
        #[arg(required = false)]
        profile: Option<String>,

        /// List all available profiles
        #[arg(short, long)]
        list: bool,
    },
}

#[derive(Subcommand)]
enum ErrorsAction {
    /// List every logged failure, newest first
    List,

    /// Show one failure with its stack trace
    Show {
        #[arg(required = true)]
        id: i64,
    },

    /// Delete a logged failure
    Delete {
        #[arg(required = true)]
        id: i64,
    },
}

#[derive(Subcommand)]
enum CookiesAction {
    /// List stored cookies and whether they are still valid
    List,

    /// Drop every expired cookie
    Clean,

    /// Drop the cookie of one service
    Remove {
        #[arg(required = true)]
        service: String,
    },
}

/// Parse command line arguments
pub fn parse_args() -> Cli {
    Cli::parse()
}

/// Process the command
pub async fn process_command(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Run { job_type, url, service, payload, profile } => {
            info!("Running {} job", job_type);
            commands::run_job(job_type, url, service, payload, profile).await
        },
        Commands::Errors { profile, action } => match action {
            ErrorsAction::List => commands::list_errors(profile).await,
            ErrorsAction::Show { id } => commands::show_error(profile, id).await,
            ErrorsAction::Delete { id } => {
                info!("Deleting error log entry {}", id);
                commands::delete_error(profile, id).await
            },
        },
        Commands::Cookies { profile, action } => match action {
            CookiesAction::List => commands::list_cookies(profile).await,
            CookiesAction::Clean => {
                info!("Cleaning expired cookies");
                commands::clean_cookies(profile).await
            },
            CookiesAction::Remove { service } => {
                info!("Removing cookie for {}", service);
                commands::remove_cookie(profile, service).await
            },
        },
        Commands::Config { profile, list } => {
            if list {
                info!("Listing all configuration profiles");
                commands::list_profiles()
            } else if let Some(profile_name) = profile {
                info!("Managing configuration profile: {}", profile_name);
                commands::manage_profile(profile_name)
            } else {
                info!("Showing current configuration");
                commands::show_config()
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert()
    }

    #[test]
    fn test_run_arguments() {
        let cli = Cli::try_parse_from([
            "extractor", "-v", "run", "fetch-info", "--url", "https://example.com/watch?v=1", "--service", "yt",
        ]).unwrap();

        assert!(cli.verbose);
        match cli.command {
            Commands::Run { job_type, url, service, payload, profile } => {
                assert_eq!(job_type, JobType::FetchInfo);
                assert_eq!(url.as_deref(), Some("https://example.com/watch?v=1"));
                assert_eq!(service.as_deref(), Some("yt"));
                assert!(payload.is_none());
                assert!(profile.is_none());
            },
            _ => panic!("expected run command"),
        }
    }

    #[test]
    fn test_log_file_value_is_optional() {
        let cli = Cli::try_parse_from(["extractor", "config", "--log-file"]).unwrap();
        assert_eq!(cli.log_file, Some(None));

        let cli = Cli::try_parse_from(["extractor", "config", "--log-file", "/tmp/x.log"]).unwrap();
        assert_eq!(cli.log_file, Some(Some(PathBuf::from("/tmp/x.log"))));
    }

    #[test]
    fn test_rejects_unknown_job_type() {
        assert!(Cli::try_parse_from(["extractor", "run", "download"]).is_err());
    }
}
