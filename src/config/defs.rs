use std::env;

use thiserror::Error;

// External software
pub const SAMTOOLS_TAG: &str = "samtools";
pub const PICARD_TAG: &str = "picard";
pub const BWA_TAG: &str = "bwa";
pub const TOPHAT2_TAG: &str = "tophat2";
pub const STAR_TAG: &str = "STAR";
pub const GZIP_TAG: &str = "gzip";
pub const BZIP2_TAG: &str = "bzip2";
pub const RSYNC_TAG: &str = "rsync";

// Default name of the merge program queued behind the per-chunk
// alignment jobs. Must be resolvable on the cluster PATH.
pub const MERGE_PROG_TAG: &str = "splitalign-pipelines";

pub const GZ_SUFFIX: &str = "gz";
pub const BZ2_SUFFIX: &str = "bz2";

pub const FASTQ_LINES_PER_READ: usize = 4;

/// Batch scheduler kinds supported by the submission layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerType {
    Lsf,
    Slurm,
}

impl SchedulerType {
    pub fn parse(name: &str) -> Result<Self, PipelineError> {
        match name.to_uppercase().as_str() {
            "LSF" => Ok(SchedulerType::Lsf),
            "SLURM" => Ok(SchedulerType::Slurm),
            other => Err(PipelineError::InvalidConfig(format!(
                "Unknown cluster type: {}",
                other
            ))),
        }
    }
}

/// Errors raised by the submission and orchestration layers.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{tool} exited with code {code}: {stderr}")]
    ToolExecution {
        tool: String,
        code: i32,
        stderr: String,
    },

    #[error("Unable to parse job scheduler output for job ID")]
    JobIdParse,

    #[error("Remote command timed out after {0}s")]
    RemoteTimeout(u64),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Process-wide cluster settings, built once in main and passed by Arc to
/// every component. All remote-host fields are optional here; the
/// components that require them fail with InvalidConfig at construction.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    pub cluster: Option<String>,
    pub cluster_port: u16,
    pub cluster_user: Option<String>,
    pub cluster_workdir: Option<String>,
    pub cluster_path: Option<String>,
    pub cluster_queue: Option<String>,
    pub cluster_type: SchedulerType,
    pub cluster_provider: Option<String>,
    pub cluster_group: Option<String>,
    pub cluster_ssh_key: Option<String>,
    pub cluster_stdout_dir: String,

    // Memory model used to derive per-thread sort memory for the
    // alignment pipelines.
    pub cluster_mem_mb: u64,
    pub cluster_threads: u32,
    pub align_mem_reserve_mb: u64,
    pub job_mem_mb: u64,
    pub merge_mem_mb: u64,

    pub transfer_host: Option<String>,
    pub transfer_workdir: Option<String>,

    // Source host for input FASTQ acquisition, with retry policy.
    pub files_host: Option<String>,
    pub fetch_attempts: u32,
    pub fetch_delay_secs: u64,

    // None reproduces the original block-forever behavior on remote calls.
    pub remote_timeout_secs: Option<u64>,

    pub host_path: Option<String>,

    // Alternative (desktop) alignment host.
    pub althost: Option<String>,
    pub althost_port: u16,
    pub althost_user: Option<String>,
    pub althost_workdir: Option<String>,
    pub althost_path: Option<String>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        ClusterConfig {
            cluster: None,
            cluster_port: 22,
            cluster_user: None,
            cluster_workdir: None,
            cluster_path: None,
            cluster_queue: None,
            cluster_type: SchedulerType::Lsf,
            cluster_provider: None,
            cluster_group: None,
            cluster_ssh_key: None,
            cluster_stdout_dir: "cluster_logs".to_string(),
            cluster_mem_mb: 16000,
            cluster_threads: 4,
            align_mem_reserve_mb: 2000,
            job_mem_mb: 8000,
            merge_mem_mb: 12000,
            transfer_host: None,
            transfer_workdir: None,
            files_host: None,
            fetch_attempts: 1,
            fetch_delay_secs: 30,
            remote_timeout_secs: None,
            host_path: None,
            althost: None,
            althost_port: 22,
            althost_user: None,
            althost_workdir: None,
            althost_path: None,
        }
    }
}

fn env_opt(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_parsed<T: std::str::FromStr>(name: &str, default: T) -> Result<T, PipelineError> {
    match env_opt(name) {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|_| PipelineError::InvalidConfig(format!("Cannot parse {}: {}", name, raw))),
        None => Ok(default),
    }
}

impl ClusterConfig {
    /// Builds the configuration from SPLITALIGN_* environment variables,
    /// falling back to defaults. Unknown scheduler kinds and malformed
    /// numeric settings are fatal here, before any job is touched.
    pub fn from_env() -> Result<Self, PipelineError> {
        let defaults = ClusterConfig::default();

        let cluster_type = match env_opt("SPLITALIGN_CLUSTER_TYPE") {
            Some(raw) => SchedulerType::parse(&raw)?,
            None => defaults.cluster_type,
        };

        Ok(ClusterConfig {
            cluster: env_opt("SPLITALIGN_CLUSTER"),
            cluster_port: env_parsed("SPLITALIGN_CLUSTER_PORT", defaults.cluster_port)?,
            cluster_user: env_opt("SPLITALIGN_CLUSTER_USER"),
            cluster_workdir: env_opt("SPLITALIGN_CLUSTER_WORKDIR"),
            cluster_path: env_opt("SPLITALIGN_CLUSTER_PATH"),
            cluster_queue: env_opt("SPLITALIGN_CLUSTER_QUEUE"),
            cluster_type,
            cluster_provider: env_opt("SPLITALIGN_CLUSTER_PROVIDER"),
            cluster_group: env_opt("SPLITALIGN_CLUSTER_GROUP"),
            cluster_ssh_key: env_opt("SPLITALIGN_CLUSTER_SSH_KEY"),
            cluster_stdout_dir: env_opt("SPLITALIGN_CLUSTER_STDOUT_DIR")
                .unwrap_or(defaults.cluster_stdout_dir),
            cluster_mem_mb: env_parsed("SPLITALIGN_CLUSTER_MEM_MB", defaults.cluster_mem_mb)?,
            cluster_threads: env_parsed("SPLITALIGN_CLUSTER_THREADS", defaults.cluster_threads)?,
            align_mem_reserve_mb: env_parsed(
                "SPLITALIGN_ALIGN_MEM_RESERVE_MB",
                defaults.align_mem_reserve_mb,
            )?,
            job_mem_mb: env_parsed("SPLITALIGN_JOB_MEM_MB", defaults.job_mem_mb)?,
            merge_mem_mb: env_parsed("SPLITALIGN_MERGE_MEM_MB", defaults.merge_mem_mb)?,
            transfer_host: env_opt("SPLITALIGN_TRANSFER_HOST"),
            transfer_workdir: env_opt("SPLITALIGN_TRANSFER_WORKDIR"),
            files_host: env_opt("SPLITALIGN_FILES_HOST"),
            fetch_attempts: env_parsed("SPLITALIGN_FETCH_ATTEMPTS", defaults.fetch_attempts)?,
            fetch_delay_secs: env_parsed("SPLITALIGN_FETCH_DELAY_SECS", defaults.fetch_delay_secs)?,
            remote_timeout_secs: match env_opt("SPLITALIGN_REMOTE_TIMEOUT_SECS") {
                Some(raw) => Some(raw.parse::<u64>().map_err(|_| {
                    PipelineError::InvalidConfig(format!(
                        "Cannot parse SPLITALIGN_REMOTE_TIMEOUT_SECS: {}",
                        raw
                    ))
                })?),
                None => None,
            },
            host_path: env_opt("SPLITALIGN_HOST_PATH").or_else(|| env_opt("PATH")),
            althost: env_opt("SPLITALIGN_ALTHOST"),
            althost_port: env_parsed("SPLITALIGN_ALTHOST_PORT", defaults.althost_port)?,
            althost_user: env_opt("SPLITALIGN_ALTHOST_USER"),
            althost_workdir: env_opt("SPLITALIGN_ALTHOST_WORKDIR"),
            althost_path: env_opt("SPLITALIGN_ALTHOST_PATH"),
        })
    }

    /// Per-thread sort memory for samtools, in MB: the configured node
    /// memory minus the alignment reservation, divided across the
    /// configured threads and rounded down to the nearest hundred.
    pub fn sort_memory_mb(&self) -> u64 {
        let avail = self.cluster_mem_mb.saturating_sub(self.align_mem_reserve_mb);
        (avail / self.cluster_threads.max(1) as u64) / 100 * 100
    }
}
