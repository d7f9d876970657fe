/// Scheduler submission: wraps a command in the configured scheduler's
/// directives, submits it (locally on a head node, or over ssh), and
/// parses the scheduler's stdout for the assigned job ID.
use std::path::Path;
use std::sync::Arc;

use lazy_static::lazy_static;
use log::info;
use regex::Regex;

use crate::cluster::builder::{CommandBuilder, JobSpec};
use crate::cluster::runner::{JobRunner, RemoteJobRunner};
use crate::config::defs::{ClusterConfig, PipelineError, SchedulerType};

lazy_static! {
    static ref LSF_JOBID_RE: Regex = Regex::new(r"Job\s+<(\d+)>\s+is\s+submitted\s+to").unwrap();
    static ref SLURM_JOBID_RE: Regex = Regex::new(r"Submitted batch job (\d+)").unwrap();
}

/// Scans scheduler stdout for the submitted job ID. The first matching
/// line wins; no match at all is a hard failure.
pub fn parse_job_id(scheduler: SchedulerType, lines: &[String]) -> Result<u64, PipelineError> {
    let pattern: &Regex = match scheduler {
        SchedulerType::Lsf => &LSF_JOBID_RE,
        SchedulerType::Slurm => &SLURM_JOBID_RE,
    };
    for line in lines {
        if let Some(caps) = pattern.captures(line) {
            let jobid = caps[1]
                .parse::<u64>()
                .map_err(|_| PipelineError::JobIdParse)?;
            info!("ID of submitted job: {}", jobid);
            return Ok(jobid);
        }
    }
    Err(PipelineError::JobIdParse)
}

fn scheduler_builder(conf: &Arc<ClusterConfig>, dry_run: bool) -> CommandBuilder {
    // Unknown scheduler kinds cannot reach this point: they fail when the
    // configuration is constructed.
    match conf.cluster_type {
        SchedulerType::Lsf => CommandBuilder::Bsub { conf: conf.clone() },
        SchedulerType::Slurm => CommandBuilder::Sbatch {
            conf: conf.clone(),
            dry_run,
        },
    }
}

/// Submits jobs through the scheduler CLI on the current host, for use
/// when already running on a cluster node.
pub struct JobSubmitter {
    runner: JobRunner,
    scheduler: SchedulerType,
    test_mode: bool,
}

impl JobSubmitter {
    pub fn from_config(conf: Arc<ClusterConfig>, test_mode: bool) -> Self {
        let builder = scheduler_builder(&conf, test_mode);
        JobSubmitter {
            scheduler: conf.cluster_type,
            runner: JobRunner::new(conf, builder, test_mode),
            test_mode,
        }
    }

    pub fn conf(&self) -> &Arc<ClusterConfig> {
        self.runner.conf()
    }

    /// Submits a job and returns the scheduler-assigned job ID. In
    /// dry-run mode the submission is simulated and the sentinel ID 0 is
    /// returned.
    pub async fn submit_command(
        &self,
        cmd: &str,
        spec: &JobSpec,
        path: Option<&str>,
        workdir: Option<&Path>,
    ) -> Result<u64, PipelineError> {
        let output = self.runner.submit_command(cmd, spec, workdir, path).await?;
        if self.test_mode {
            return Ok(0);
        }
        parse_job_id(self.scheduler, &output)
    }
}

/// Submits jobs to a remote scheduler head node over ssh.
pub struct ClusterJobSubmitter {
    runner: RemoteJobRunner,
    scheduler: SchedulerType,
    test_mode: bool,
}

impl ClusterJobSubmitter {
    pub fn from_config(conf: Arc<ClusterConfig>, test_mode: bool) -> Result<Self, PipelineError> {
        let builder = scheduler_builder(&conf, test_mode);
        Ok(ClusterJobSubmitter {
            scheduler: conf.cluster_type,
            runner: RemoteJobRunner::from_config(conf, builder, test_mode)?,
            test_mode,
        })
    }

    pub fn conf(&self) -> &Arc<ClusterConfig> {
        self.runner.conf()
    }

    /// Access to the underlying runner for data transfer and remote
    /// lookups around the submission itself.
    pub fn runner(&self) -> &RemoteJobRunner {
        &self.runner
    }

    pub async fn submit_command(&self, cmd: &str, spec: &JobSpec) -> Result<u64, PipelineError> {
        let path = self.runner.conf().cluster_path.clone();
        let output = self
            .runner
            .submit_command(cmd, spec, path.as_deref())
            .await?;
        if self.test_mode {
            return Ok(0);
        }
        parse_job_id(self.scheduler, &output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_lsf_job_id() {
        let out = lines(&["Job <12345> is submitted to queue <normal>."]);
        assert_eq!(parse_job_id(SchedulerType::Lsf, &out).unwrap(), 12345);
    }

    #[test]
    fn test_parse_slurm_job_id() {
        let out = lines(&["Submitted batch job 98765"]);
        assert_eq!(parse_job_id(SchedulerType::Slurm, &out).unwrap(), 98765);
    }

    #[test]
    fn test_parse_scans_every_line() {
        let out = lines(&[
            "Some banner from the cluster MOTD",
            "Job <777> is submitted to queue <long>.",
        ]);
        assert_eq!(parse_job_id(SchedulerType::Lsf, &out).unwrap(), 777);
    }

    #[test]
    fn test_parse_failure_is_hard_error() {
        let out = lines(&["bsub: command not found"]);
        assert!(matches!(
            parse_job_id(SchedulerType::Lsf, &out),
            Err(PipelineError::JobIdParse)
        ));
        assert!(matches!(
            parse_job_id(SchedulerType::Slurm, &[]),
            Err(PipelineError::JobIdParse)
        ));
    }

    #[test]
    fn test_wrong_scheduler_pattern_does_not_match() {
        let out = lines(&["Submitted batch job 98765"]);
        assert!(parse_job_id(SchedulerType::Lsf, &out).is_err());
    }

    #[tokio::test]
    async fn test_dry_run_submission_returns_sentinel() -> anyhow::Result<()> {
        let mut conf = ClusterConfig::default();
        conf.cluster_queue = Some("normal".to_string());
        let submitter = JobSubmitter::from_config(Arc::new(conf), true);
        let jobid = submitter
            .submit_command("echo hi", &JobSpec::default(), None, None)
            .await?;
        assert_eq!(jobid, 0);
        Ok(())
    }
}
