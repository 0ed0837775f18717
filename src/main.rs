//! keysearcher - block-partitioned brute-force key search
//!
//! Entry point for the CLI application.

use anyhow::{Context, Result};
use clap::Parser;
use keysearcher::capability::XorCipher;
use keysearcher::config::{to_hex, Action, CliArgs, ExecConfig, SearchConfig};
use keysearcher::job::{
    integrity_hash, BlockComputable, JobCoordinator, JobDefinition, JobId, JobPayload,
    KeySearchJob,
};
use keysearcher::keyspace::KeySpace;
use keysearcher::progress::{print_header, print_packed, print_summary, ProgressReporter};
use keysearcher::runtime::{DistributedRuntime, LocalRuntime};
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    // Parse CLI arguments
    let args = CliArgs::parse();

    // Setup logging
    setup_logging(args.verbose)?;

    // Validate and create config
    let config = SearchConfig::from_args(args).context("Invalid configuration")?;
    let show_progress = config.show_progress;

    match config.action {
        Action::Search { definition, exec } => {
            let job = KeySearchJob::new(&definition, exec.tuning)
                .context("Failed to build job")?;
            execute(job, exec, show_progress)
        }
        Action::Run { payload, exec } => {
            let job = load_job(&payload, &exec)?;
            execute(job, exec, show_progress)
        }
        Action::Pack { definition, output } => pack(&definition, &output, show_progress),
        Action::Encrypt { plaintext, key } => {
            let ciphertext = XorCipher::encrypt(&plaintext, &key).context("Encryption failed")?;
            println!("{}", to_hex(&ciphertext));
            Ok(())
        }
    }
}

/// Read a payload file and rebuild its job
fn load_job(path: &Path, exec: &ExecConfig) -> Result<KeySearchJob> {
    let payload = JobPayload::read_from(path)
        .with_context(|| format!("Failed to read payload {}", path.display()))?;
    if let Ok(created) = payload.created_at() {
        info!(path = %path.display(), created = %created, "Loaded job payload");
    }
    KeySearchJob::from_payload(payload, exec.tuning).context("Failed to build job")
}

/// Run a job offline or through the local runtime
fn execute(job: KeySearchJob, exec: ExecConfig, show_progress: bool) -> Result<()> {
    if show_progress {
        let mode = if exec.online {
            format!("online ({} workers)", exec.runtime.workers)
        } else {
            "offline".to_string()
        };
        print_header(job.name(), &job.context().key_space.size(), &job.block_count(), &mode);
    }

    let mut coordinator = if exec.online {
        let runtime: Arc<dyn DistributedRuntime> = Arc::new(LocalRuntime::new(exec.runtime));
        JobCoordinator::new(job, Some(runtime)).bind_job(JobId::new_v4())
    } else {
        JobCoordinator::new(job, None)
    };
    if let Some(hash) = exec.expected_hash {
        coordinator = coordinator.with_valid_hash(hash);
    }

    // Setup signal handler for graceful shutdown
    let stop = coordinator.stop_handle();
    ctrlc::set_handler(move || {
        eprintln!("\nInterrupt received, stopping search...");
        stop.stop();
    })
    .context("Failed to set signal handler")?;

    if !coordinator.pre_execution() {
        warn!("Running a job whose definition does not match the expected hash");
    }

    // Create progress reporter
    let progress = if show_progress {
        Some(ProgressReporter::new())
    } else {
        None
    };

    if let Some(ref p) = progress {
        p.set_status("Searching...");
    }

    let report = coordinator
        .execute_with_progress(|update| {
            if let Some(ref p) = progress {
                p.update(update);
            }
        })
        .context("Search failed")?;

    // Finish progress
    if let Some(ref p) = progress {
        if report.completed {
            p.finish("Search completed");
        } else {
            p.finish("Search interrupted");
        }
    }

    print_summary(&report);

    if !report.completed {
        info!("Search was stopped before completion");
    }
    if report.blocks_failed > 0 {
        warn!(failed = report.blocks_failed, "Some blocks were given up");
    }

    Ok(())
}

/// Write a job payload file
fn pack(definition: &JobDefinition, output: &Path, show_progress: bool) -> Result<()> {
    let document = definition.to_document().context("Failed to encode job definition")?;
    let hash = integrity_hash(&document);
    let payload = JobPayload::new(document).context("Failed to build payload")?;
    let size = payload
        .write_to(output)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    info!(path = %output.display(), bytes = size, hash = %hash, "Job packed");
    if show_progress {
        print_packed(output, size, &hash);
    } else {
        println!("{}", hash);
    }
    Ok(())
}

fn setup_logging(verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("keysearcher=debug,warn")
    } else {
        EnvFilter::new("keysearcher=info,warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    Ok(())
}
