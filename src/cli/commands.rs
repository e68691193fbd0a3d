use anyhow::{Result, Context};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cli::config::ExtractorConfig;
use crate::job::{DriverSettings, HttpHandler, JobDriver, JobType};
use crate::storage::{CredentialStore, CredentialStoreFactory, ErrorLog, ErrorLogFactory, SessionCacheFactory};
use crate::transport::HttpTransport;

/// Wire a job driver from the configured backends
pub async fn build_driver(config: &ExtractorConfig) -> Result<JobDriver> {
    let handler = HttpHandler::new(&config.handler)
        .context("Failed to create handler client")?;
    let transport = HttpTransport::new(&config.transport)
        .context("Failed to create HTTP transport")?;

    let credentials = CredentialStoreFactory::create(&config.storage.credentials).await
        .context("Failed to open credential store")?;
    let sessions = SessionCacheFactory::create(&config.storage.sessions).await
        .context("Failed to open session cache")?;
    let error_log = ErrorLogFactory::create(&config.storage.error_log).await
        .context("Failed to open error log")?;

    debug!("Job handler endpoint: {}", handler.endpoint());

    let driver = JobDriver::new(Arc::new(handler), Arc::new(transport), credentials, sessions, error_log)
        .with_settings(DriverSettings {
            concurrency: config.transport.concurrency,
            max_rounds: config.driver.max_rounds,
        });

    Ok(driver)
}

/// Run one job and print its result as JSON
pub async fn run_job(
    job_type: JobType,
    url: Option<String>,
    service: Option<String>,
    payload: Option<String>,
    profile: Option<String>,
) -> Result<()> {
    let config = ExtractorConfig::load(profile.as_deref())?;
    let driver = build_driver(&config).await?;

    let result = driver
        .run(job_type, url.as_deref(), service.as_deref(), payload.as_deref())
        .await
        .context(format!("{} job did not finish", job_type))?;

    let metrics = driver.metrics().get_metrics().await;
    debug!(
        "Job took {} rounds, {} client tasks ({} failed), {} bytes downloaded",
        metrics.rounds,
        metrics.tasks_succeeded + metrics.tasks_failed,
        metrics.tasks_failed,
        metrics.bytes_downloaded
    );

    println!("{}", serde_json::to_string_pretty(&result)?);

    if let Some(fatal) = &result.fatal_error {
        match fatal.error_id {
            Some(id) => anyhow::bail!("Job failed with {} (see `extractor errors show {}`)", fatal.code, id),
            None => anyhow::bail!("Job failed with {}", fatal.code),
        }
    }

    Ok(())
}

async fn open_error_log(profile: Option<String>) -> Result<Arc<dyn ErrorLog>> {
    let config = ExtractorConfig::load(profile.as_deref())?;
    ErrorLogFactory::create(&config.storage.error_log).await
        .context("Failed to open error log")
}

async fn open_credentials(profile: Option<String>) -> Result<Arc<dyn CredentialStore>> {
    let config = ExtractorConfig::load(profile.as_deref())?;
    CredentialStoreFactory::create(&config.storage.credentials).await
        .context("Failed to open credential store")
}

/// List logged failures, newest first
pub async fn list_errors(profile: Option<String>) -> Result<()> {
    let entries = open_error_log(profile).await?.list().await?;

    if entries.is_empty() {
        println!("No logged errors");
        return Ok(());
    }

    for entry in entries {
        println!(
            "{:>6}  {}  {:<32} {:<16} {}",
            entry.id,
            entry.logged_at.format("%Y-%m-%d %H:%M:%S"),
            entry.task,
            entry.error_code,
            entry.request.as_deref().unwrap_or("-")
        );
    }

    Ok(())
}

/// Show one logged failure in full
pub async fn show_error(profile: Option<String>, id: i64) -> Result<()> {
    let entry = open_error_log(profile).await?
        .get(id)
        .await?
        .with_context(|| format!("No error log entry with id {}", id))?;

    println!("Error ID: {}", entry.id);
    println!("Logged: {}", entry.logged_at);
    println!("Task: {}", entry.task);
    println!("Code: {}", entry.error_code);
    println!("Request: {}", entry.request.as_deref().unwrap_or("-"));
    println!("Stack trace:");
    println!("{}", entry.stack_trace);

    Ok(())
}

pub async fn delete_error(profile: Option<String>, id: i64) -> Result<()> {
    if open_error_log(profile).await?.delete(id).await? {
        println!("Deleted error log entry {}", id);
    } else {
        warn!("No error log entry with id {}", id);
    }

    Ok(())
}

/// List stored cookies with their expiry
pub async fn list_cookies(profile: Option<String>) -> Result<()> {
    let store = open_credentials(profile).await?;
    let now = Utc::now().timestamp();

    let mut service_ids = store.service_ids().await?;
    service_ids.sort();

    if service_ids.is_empty() {
        println!("No stored cookies");
        return Ok(());
    }

    for service_id in service_ids {
        if let Some(info) = store.get_cookie_info(&service_id).await? {
            let expires = DateTime::<Utc>::from_timestamp(info.time_out, 0)
                .map(|at| at.to_rfc3339())
                .unwrap_or_else(|| info.time_out.to_string());
            let state = if info.is_expired_at(now) { "expired" } else { "valid" };

            println!("{:<24} {:<8} expires {}", service_id, state, expires);
        }
    }

    Ok(())
}

pub async fn clean_cookies(profile: Option<String>) -> Result<()> {
    let cleaned = open_credentials(profile).await?.clean_expired().await?;
    info!("Removed {} expired cookies", cleaned);
    println!("Removed {} expired cookies", cleaned);

    Ok(())
}

pub async fn remove_cookie(profile: Option<String>, service: String) -> Result<()> {
    open_credentials(profile).await?.remove_cookie(&service).await?;
    println!("Removed cookie for {}", service);

    Ok(())
}

/// List all available configuration profiles
pub fn list_profiles() -> Result<()> {
    let profiles = ExtractorConfig::list_profiles()?;

    println!("Available configuration profiles:");
    for profile in profiles {
        println!("  - {}", profile);
    }

    Ok(())
}

/// Show a profile, creating it from the defaults if it does not exist yet
pub fn manage_profile(profile_name: String) -> Result<()> {
    match ExtractorConfig::load_profile(&profile_name) {
        Ok(config) => {
            println!("Profile: {}", profile_name);
            println!("{}", serde_yaml::to_string(&config)?);
        },
        Err(_) => {
            warn!("Profile '{}' does not exist. Creating a default profile.", profile_name);
            ExtractorConfig::default().save_as_profile(&profile_name)?;
            println!("Created default profile: {}", profile_name);
        }
    }

    Ok(())
}

/// Show the current configuration
pub fn show_config() -> Result<()> {
    let config = ExtractorConfig::load_default()?;
    println!("Current configuration:");
    println!("{}", serde_yaml::to_string(&config)?);

    Ok(())
}
