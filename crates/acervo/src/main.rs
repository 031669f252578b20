//! Acervo CLI: run the pipeline, submit documents, inspect and control
//! jobs, and trigger requirement matching.

use std::path::PathBuf;
use std::sync::Arc;

use acervo::upload::validate_and_stage_upload;
use acervo::wiring::{build_cascade, config_path, open_store};
use acervo_logging::{init_logging, LogConfig};
use acervo_protocol::{
    load_config, AnalysisId, AttestationId, JobId, JobKind, JobStatus, UserId,
};
use acervo_queue::{ControlHandler, ControlRequest, ControlResponse, Scheduler};
use acervo_store::NewJob;
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "acervo", about = "Attestation extraction pipeline and tender matcher")]
struct Cli {
    /// Verbose console logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to ~/.acervo/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the processing workers until interrupted
    Serve,
    /// Validate a document and enqueue an extraction job
    Submit {
        file: PathBuf,
        /// Owner e-mail; the account is created on first use
        #[arg(long)]
        email: String,
        /// Treat the document as a tender notice instead of an attestation
        #[arg(long)]
        tender: bool,
    },
    /// List jobs
    Jobs {
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        status: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },
    /// Show one job
    Status { job_id: i64 },
    /// Request cancellation of a job
    Cancel { job_id: i64 },
    /// Retry a failed or cancelled job
    Retry { job_id: i64 },
    /// Delete a terminal job
    Delete { job_id: i64 },
    /// Queue counters
    Stats,
    /// List a user's attestations
    Attestations {
        #[arg(long)]
        email: String,
    },
    /// Delete an attestation
    DeleteAttestation { attestation_id: i64 },
    /// Show an analysis (requirements and result)
    Analysis { analysis_id: i64 },
    /// Match an analysis' requirements against the owner's attestations
    RunMatch { analysis_id: i64 },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(LogConfig {
        app_name: "acervo",
        verbose: cli.verbose,
    })?;

    let config_file = cli.config.unwrap_or_else(config_path);
    let config = Arc::new(load_config(&config_file).context("loading configuration")?);
    let store = open_store().await?;
    let handler = ControlHandler::new(store.clone(), &config);

    match cli.command {
        Command::Serve => {
            let cascade = Arc::new(build_cascade(&config));
            let mut scheduler = Scheduler::new(store, cascade, Arc::clone(&config));
            scheduler.start().await?;
            info!("serving; press ctrl-c to stop");
            tokio::signal::ctrl_c().await?;
            info!("shutting down");
            scheduler.shutdown().await;
        }
        Command::Submit {
            file,
            email,
            tender,
        } => {
            let staged = validate_and_stage_upload(&file, &config)?;
            let user_id = store.users().ensure(&email, &email).await?;
            let kind = if tender {
                JobKind::TenderAnalysis
            } else {
                JobKind::Attestation
            };
            let job = store
                .jobs()
                .create(NewJob {
                    user_id,
                    kind,
                    file_path: staged.to_string_lossy().into_owned(),
                    original_filename: file
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default(),
                    max_attempts: config.max_attempts,
                })
                .await?;
            println!("job {} enqueued ({})", job.id, job.kind.as_str());
        }
        Command::Jobs {
            email,
            status,
            limit,
        } => {
            let user_id = match email {
                Some(email) => Some(resolve_user(&store, &email).await?),
                None => None,
            };
            let status = status
                .map(|s| s.to_uppercase().parse::<JobStatus>())
                .transpose()
                .map_err(|e| anyhow::anyhow!("{e}"))?;
            let response = handler
                .handle(ControlRequest::ListJobs {
                    user_id,
                    status,
                    kind: None,
                    limit: Some(limit),
                    offset: None,
                })
                .await;
            print_response(response)?;
        }
        Command::Status { job_id } => {
            let response = handler
                .handle(ControlRequest::GetJob {
                    job_id: JobId::new(job_id),
                })
                .await;
            print_response(response)?;
        }
        Command::Cancel { job_id } => {
            let response = handler
                .handle(ControlRequest::CancelJob {
                    job_id: JobId::new(job_id),
                })
                .await;
            print_response(response)?;
        }
        Command::Retry { job_id } => {
            let response = handler
                .handle(ControlRequest::RetryJob {
                    job_id: JobId::new(job_id),
                })
                .await;
            print_response(response)?;
        }
        Command::Delete { job_id } => {
            let response = handler
                .handle(ControlRequest::DeleteJob {
                    job_id: JobId::new(job_id),
                })
                .await;
            print_response(response)?;
        }
        Command::Stats => {
            let response = handler.handle(ControlRequest::QueueStats).await;
            print_response(response)?;
        }
        Command::Attestations { email } => {
            let user_id = resolve_user(&store, &email).await?;
            let response = handler
                .handle(ControlRequest::ListAttestations { user_id })
                .await;
            print_response(response)?;
        }
        Command::DeleteAttestation { attestation_id } => {
            let response = handler
                .handle(ControlRequest::DeleteAttestation {
                    attestation_id: AttestationId::new(attestation_id),
                })
                .await;
            print_response(response)?;
        }
        Command::Analysis { analysis_id } => {
            let response = handler
                .handle(ControlRequest::GetAnalysis {
                    analysis_id: AnalysisId::new(analysis_id),
                })
                .await;
            print_response(response)?;
        }
        Command::RunMatch { analysis_id } => {
            let response = handler
                .handle(ControlRequest::RunMatch {
                    analysis_id: AnalysisId::new(analysis_id),
                })
                .await;
            print_response(response)?;
        }
    }

    Ok(())
}

async fn resolve_user(store: &acervo_store::Store, email: &str) -> Result<UserId> {
    match store.users().find_by_email(email).await? {
        Some(id) => Ok(id),
        None => bail!("no user with email {email}"),
    }
}

/// Control responses print as pretty JSON; errors exit non-zero.
fn print_response(response: ControlResponse) -> Result<()> {
    if let ControlResponse::Error { code, message } = &response {
        bail!("{code}: {message}");
    }
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}
