use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use env_logger::Builder;
use log::{LevelFilter, error, info, warn};

use splitalign_pipelines::cli::{self, Arguments};
use splitalign_pipelines::config::defs::{ClusterConfig, MERGE_PROG_TAG, PipelineError};
use splitalign_pipelines::pipelines::align::{Aligner, AlignmentManager, AlignmentOptions};
use splitalign_pipelines::pipelines::bwa::{BwaAligner, BwaAlgorithm};
use splitalign_pipelines::pipelines::star::StarAligner;
use splitalign_pipelines::pipelines::status::cluster_status;
use splitalign_pipelines::pipelines::tophat::TophatAligner;
use splitalign_pipelines::utils::fastq::determine_read_length;
use splitalign_pipelines::utils::file::find_executable;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::parse();

    let log_level = if args.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    Builder::new()
        .filter_level(log_level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] {}: {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .init();

    let conf = match ClusterConfig::from_env() {
        Ok(conf) => Arc::new(conf),
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    let module = args.module.clone();
    if let Err(e) = match module.as_str() {
        "bwa" => run_bwa(conf, &args).await,
        "tophat" => run_align(conf, &args, &TophatAligner).await,
        "star" => run_align(conf, &args, &StarAligner).await,
        "merge" => run_merge(conf, &args).await,
        "status" => run_status(conf, &args).await,
        _ => Err(PipelineError::InvalidArgument(format!(
            "Invalid module: {}",
            module
        ))),
    } {
        error!("Pipeline failed: {}", e);
        std::process::exit(1);
    }

    Ok(())
}

fn input_files(args: &Arguments) -> Result<Vec<PathBuf>, PipelineError> {
    let file1 = args
        .file1
        .as_deref()
        .ok_or_else(|| PipelineError::InvalidArgument("File1 path required (-i)".to_string()))?;
    let mut files = vec![PathBuf::from(file1)];
    if let Some(file2) = args.file2.as_deref() {
        files.push(PathBuf::from(file2));
    }
    Ok(files)
}

/// The merge program submitted as the dependent job: explicit argument,
/// then PATH discovery, then the bare tool name for the cluster PATH to
/// resolve.
fn resolve_merge_prog(args: &Arguments, conf: &ClusterConfig) -> Option<String> {
    args.merge_prog
        .clone()
        .or_else(|| {
            conf.host_path
                .as_deref()
                .and_then(|path| find_executable(MERGE_PROG_TAG, path))
                .map(|p| p.to_string_lossy().into_owned())
        })
        .or_else(|| Some(MERGE_PROG_TAG.to_string()))
}

fn alignment_options(args: &Arguments, conf: &ClusterConfig) -> AlignmentOptions {
    AlignmentOptions {
        merge_prog: resolve_merge_prog(args, conf),
        split_read_count: args.reads,
        cleanup: args.cleanup,
        group: args.group.clone(),
        no_split: args.no_split,
        verbose: args.verbose,
        dry_run: args.dry_run,
    }
}

async fn run_align(
    conf: Arc<ClusterConfig>,
    args: &Arguments,
    aligner: &dyn Aligner,
) -> Result<(), PipelineError> {
    let genome = args
        .genome
        .as_deref()
        .ok_or_else(|| PipelineError::InvalidArgument("--genome is required".to_string()))?;
    let files = input_files(args)?;
    let opts = alignment_options(args, &conf);
    let manager = AlignmentManager::new(conf, opts);
    let summary = manager
        .split_and_align(
            &files,
            genome,
            args.sample.as_deref(),
            args.rcp.as_deref(),
            aligner,
        )
        .await?;
    info!(
        "Submitted {} alignment job(s); merge job {} will produce '{}'.",
        summary.chunk_jobs.len(),
        summary.merge_job,
        summary.output_bam
    );
    Ok(())
}

async fn run_bwa(conf: Arc<ClusterConfig>, args: &Arguments) -> Result<(), PipelineError> {
    let algorithm = match args.algorithm {
        Some(algorithm) => algorithm,
        None => {
            let file1 = args.file1.as_deref().ok_or_else(|| {
                PipelineError::InvalidArgument("File1 path required (-i)".to_string())
            })?;
            match determine_read_length(Path::new(file1)) {
                Ok(len) => {
                    let algorithm = BwaAlgorithm::for_read_length(len);
                    info!("Read length {} selects bwa algorithm {:?}.", len, algorithm);
                    algorithm
                }
                Err(e) => {
                    warn!(
                        "Could not determine read length ({}); defaulting to bwa aln.",
                        e
                    );
                    BwaAlgorithm::Aln
                }
            }
        }
    };
    let aligner = BwaAligner::new(algorithm, args.nocc)?;
    run_align(conf, args, &aligner).await
}

async fn run_merge(conf: Arc<ClusterConfig>, args: &Arguments) -> Result<(), PipelineError> {
    let outfile = args
        .outfile
        .as_deref()
        .ok_or_else(|| PipelineError::InvalidArgument("--outfile is required".to_string()))?;
    if args.infiles.is_empty() {
        return Err(PipelineError::InvalidArgument(
            "At least one input bam is required".to_string(),
        ));
    }
    let inputs: Vec<PathBuf> = args.infiles.iter().map(PathBuf::from).collect();
    let opts = AlignmentOptions {
        cleanup: args.cleanup,
        group: args.group.clone(),
        verbose: args.verbose,
        ..AlignmentOptions::default()
    };
    let manager = AlignmentManager::new(conf, opts);
    manager
        .merge_alignments(
            &inputs,
            Path::new(outfile),
            args.rcp.as_deref(),
            args.sample.as_deref(),
        )
        .await
}

async fn run_status(conf: Arc<ClusterConfig>, args: &Arguments) -> Result<(), PipelineError> {
    let user = args
        .user
        .clone()
        .or_else(|| conf.cluster_user.clone())
        .ok_or_else(|| {
            PipelineError::InvalidArgument("--user is required for the status module".to_string())
        })?;
    let status = cluster_status(conf, &user, args.maxjobs, args.maxpendjobs).await?;
    println!("---------");
    println!("User: {}", user);
    println!("Available slots: {}", status.available_slots);
    println!("Occupied slots: {}", status.running_jobs);
    println!("{} pending: {}", user, status.user_pending);
    println!("{} running: {}", user, status.user_running);
    println!("Status: {}", if status.busy { "BUSY" } else { "OK" });
    println!("---------");
    Ok(())
}
