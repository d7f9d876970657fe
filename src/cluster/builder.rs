/// Command-string builders for job submission.
///
/// A submitted command is wrapped exactly once, by one of a closed set of
/// builders: passed through untouched, detached under nohup for desktop
/// hosts, or wrapped in the scheduler directives of the configured batch
/// system (LSF bsub flags inline, SLURM sbatch script written to the
/// cluster head node).
use std::sync::Arc;

use log::warn;
use uuid::Uuid;

use crate::config::defs::{ClusterConfig, PipelineError};
use crate::utils::command::write_remote_file;

/// Options for one scheduler submission. Constructed immediately before
/// submission and discarded once the job ID comes back.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub mem_mb: u64,
    pub queue: Option<String>,
    pub jobname: Option<String>,
    pub auto_requeue: bool,
    pub depend_jobs: Vec<u64>,
    pub sleep_secs: u64,
    pub mincpus: u32,
    pub maxcpus: u32,
    pub logdir: Option<String>,
    pub environ: Vec<(String, String)>,
}

impl Default for JobSpec {
    fn default() -> Self {
        JobSpec {
            mem_mb: 2000,
            queue: None,
            jobname: None,
            auto_requeue: false,
            depend_jobs: Vec::new(),
            sleep_secs: 0,
            mincpus: 1,
            maxcpus: 1,
            logdir: None,
            environ: Vec::new(),
        }
    }
}

/// LSF resource-string flavour, keyed by the configured cluster provider.
/// Some installations insist on an explicit select clause plus -M.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceFormat {
    Rusage,
    SelectMem,
}

impl ResourceFormat {
    pub fn for_provider(provider: Option<&str>) -> Self {
        match provider {
            Some(name) => {
                let prefix = name.to_lowercase();
                if prefix.starts_with("san") || prefix.starts_with("ebi") {
                    ResourceFormat::SelectMem
                } else {
                    ResourceFormat::Rusage
                }
            }
            None => ResourceFormat::Rusage,
        }
    }

    fn clauses(&self, mem_mb: u64) -> (String, Option<String>) {
        match self {
            ResourceFormat::Rusage => (format!("rusage[mem={}]", mem_mb), None),
            ResourceFormat::SelectMem => (
                format!("select[mem>{}] rusage[mem={}]", mem_mb, mem_mb),
                Some(format!("-M {}", mem_mb)),
            ),
        }
    }
}

/// The closed set of command wrappers.
#[derive(Debug)]
pub enum CommandBuilder {
    Plain,
    Nohup {
        remote_wdir: String,
    },
    Bsub {
        conf: Arc<ClusterConfig>,
    },
    Sbatch {
        conf: Arc<ClusterConfig>,
        dry_run: bool,
    },
}

impl CommandBuilder {
    /// Produces the final command string to execute. For Sbatch this also
    /// writes the batch script to the cluster head node (skipped in
    /// dry-run, keeping dry runs side-effect free).
    pub async fn build(&self, cmd: &str, spec: &JobSpec) -> Result<String, PipelineError> {
        match self {
            CommandBuilder::Plain => Ok(cmd.to_string()),
            CommandBuilder::Nohup { remote_wdir } => Ok(format!(
                "nohup nice -n 20 sh -c '( ({}) &)' >> {}/remote_worker.log 2>&1 < /dev/null",
                cmd, remote_wdir
            )),
            CommandBuilder::Bsub { conf } => render_bsub(conf, cmd, spec),
            CommandBuilder::Sbatch { conf, dry_run } => {
                let logdir = spec
                    .logdir
                    .clone()
                    .unwrap_or_else(|| conf.cluster_stdout_dir.clone());
                let script_path = format!("{}/{}", logdir, Uuid::new_v4());
                let script = render_sbatch_script(conf, cmd, spec, &script_path)?;
                if !dry_run {
                    let user = conf.cluster_user.as_deref().ok_or_else(|| {
                        PipelineError::InvalidConfig("Cluster user not set.".to_string())
                    })?;
                    let host = conf.cluster.as_deref().ok_or_else(|| {
                        PipelineError::InvalidConfig("Cluster host not set.".to_string())
                    })?;
                    write_remote_file(
                        &script,
                        &script_path,
                        user,
                        host,
                        conf.cluster_port,
                        conf.cluster_ssh_key.as_deref(),
                    )
                    .await?;
                }
                Ok(format!("sbatch {}", script_path))
            }
        }
    }
}

fn clamp_cpus(spec: &JobSpec) -> (u32, u32) {
    if spec.mincpus > spec.maxcpus {
        warn!(
            "mincpus ({}) is greater than maxcpus ({}). Maxcpus was made equal to mincpus.",
            spec.mincpus, spec.maxcpus
        );
        (spec.mincpus, spec.mincpus)
    } else {
        (spec.mincpus, spec.maxcpus)
    }
}

fn environ_prefix(environ: &[(String, String)]) -> String {
    if environ.is_empty() {
        return String::new();
    }
    let mut prefix = environ
        .iter()
        .map(|(key, val)| format!("{}={}", key, val))
        .collect::<Vec<_>>()
        .join(" ");
    prefix.push(' ');
    prefix
}

fn delayed(cmd: &str, sleep_secs: u64) -> String {
    if sleep_secs > 0 {
        format!("sleep {} && {}", sleep_secs, cmd)
    } else {
        cmd.to_string()
    }
}

/// Renders a single-line bsub invocation around the command.
pub fn render_bsub(
    conf: &ClusterConfig,
    cmd: &str,
    spec: &JobSpec,
) -> Result<String, PipelineError> {
    let (mincpus, maxcpus) = clamp_cpus(spec);
    let cmd = delayed(cmd, spec.sleep_secs);

    let (resources, memreq) = ResourceFormat::for_provider(conf.cluster_provider.as_deref())
        .clauses(spec.mem_mb);
    let logdir = spec
        .logdir
        .as_deref()
        .unwrap_or(&conf.cluster_stdout_dir);

    let mut bsub = format!(
        "{}bsub -R '{}' -R 'span[hosts=1]'",
        environ_prefix(&spec.environ),
        resources
    );
    if let Some(memreq) = memreq {
        bsub.push(' ');
        bsub.push_str(&memreq);
    }
    bsub.push_str(&format!(
        " -o {dir}/%J.stdout -e {dir}/%J.stderr -r -n {min},{max}",
        dir = logdir,
        min = mincpus,
        max = maxcpus
    ));
    if spec.auto_requeue {
        bsub.push_str(" -Q 'all ~0'");
    }
    if let Some(group) = conf.cluster_group.as_deref() {
        if !group.is_empty() {
            bsub.push_str(&format!(" -G {}", group));
        }
    }
    if let Some(queue) = spec.queue.as_deref() {
        bsub.push_str(&format!(" -q {}", queue));
    }
    // The jobname is also what LSF uses for job-array grouping.
    if let Some(jobname) = spec.jobname.as_deref() {
        bsub.push_str(&format!(" -J {}", jobname));
    }
    if !spec.depend_jobs.is_empty() {
        let depend = spec
            .depend_jobs
            .iter()
            .map(|id| format!("ended({})", id))
            .collect::<Vec<_>>()
            .join("&&");
        bsub.push_str(&format!(" -w '{}'", depend));
    }

    // The command runs in a subshell so pipes and && survive; inner double
    // quotes are escaped for the bsub quoting layer.
    bsub.push_str(&format!(r#" sh -c "({})""#, cmd.replace('"', "\\\"")));
    Ok(bsub)
}

/// Renders the sbatch batch script, directives first, then a small
/// self-describing preamble and the command itself. The script moves
/// itself into the log directory under its job ID once running.
pub fn render_sbatch_script(
    conf: &ClusterConfig,
    cmd: &str,
    spec: &JobSpec,
    script_path: &str,
) -> Result<String, PipelineError> {
    let (mincpus, maxcpus) = clamp_cpus(spec);
    let cmd = delayed(cmd, spec.sleep_secs);
    let workdir = conf.cluster_workdir.as_deref().ok_or_else(|| {
        PipelineError::InvalidConfig("Cluster working directory not set.".to_string())
    })?;
    let logdir = spec
        .logdir
        .as_deref()
        .unwrap_or(&conf.cluster_stdout_dir);

    let mut text = String::from("#!/bin/bash\n");
    if let Some(jobname) = spec.jobname.as_deref() {
        text.push_str(&format!("#SBATCH -J {}\n", jobname));
    }
    // All cores on one node.
    text.push_str("#SBATCH -N 1\n");
    text.push_str(&format!("#SBATCH --mincpus={}\n", mincpus));
    text.push_str("#SBATCH --mail-type=NONE\n");
    if let Some(queue) = spec.queue.as_deref().or(conf.cluster_queue.as_deref()) {
        text.push_str(&format!("#SBATCH -p {}\n", queue));
    }
    text.push_str("#SBATCH --open-mode=append\n");
    if spec.auto_requeue {
        text.push_str("#SBATCH --requeue\n");
    } else {
        text.push_str("#SBATCH --no-requeue\n");
    }
    text.push_str(&format!("#SBATCH --mem {}\n", spec.mem_mb));
    text.push_str(&format!("#SBATCH -o {}/%j.stdout\n", logdir));
    text.push_str(&format!("#SBATCH -e {}/%j.stderr\n", logdir));
    if !spec.depend_jobs.is_empty() {
        let ids = spec
            .depend_jobs
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(":");
        text.push_str(&format!("#SBATCH --dependency=aftercorr:{}\n", ids));
    }

    text.push_str("hostname=`hostname`\n");
    text.push_str(&format!(
        "CMD=\"{}{}\"\n",
        environ_prefix(&spec.environ),
        cmd
    ));
    text.push_str(&format!("cd {}\n", workdir));
    text.push_str("echo \"JobID: $SLURM_JOB_ID\"\n");
    text.push_str("echo \"Job start time: `date`\"\n");
    text.push_str("echo \"Executed in node: $hostname\"\n");
    text.push_str(&format!(
        "echo -e \"Number of cores requested: min={}, max={}\"\n",
        mincpus, maxcpus
    ));
    text.push_str("echo -e \"Executing command:\\n$CMD\"\n");
    text.push_str(&format!(
        "mv {} {}/$SLURM_JOB_ID.sh\n",
        script_path, logdir
    ));
    text.push_str("eval $CMD\n");
    text.push_str("echo \"Job end time: `date`\"\n");
    Ok(text)
}
