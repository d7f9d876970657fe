/// Cluster status polling: host and job counts over ssh, plus an OK/BUSY
/// verdict for a user against configured run/pend ceilings. LSF only;
/// the bhosts/bjobs tabular output is parsed column-wise.
use std::sync::Arc;

use crate::cluster::builder::{CommandBuilder, JobSpec};
use crate::cluster::runner::RemoteJobRunner;
use crate::config::defs::{ClusterConfig, PipelineError, SchedulerType};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterStatus {
    pub available_slots: u64,
    pub running_jobs: u64,
    pub user_pending: u64,
    pub user_running: u64,
    pub busy: bool,
}

/// Sums slot and running-job counts over the `ok` hosts in bhosts
/// output.
pub fn parse_bhosts(lines: &[String]) -> (u64, u64) {
    let mut slots = 0;
    let mut running = 0;
    for line in lines {
        let cols: Vec<&str> = line.split_whitespace().collect();
        if cols.len() >= 6 && cols[1] == "ok" {
            slots += cols[3].parse::<u64>().unwrap_or(0);
            running += cols[5].parse::<u64>().unwrap_or(0);
        }
    }
    (slots, running)
}

/// Counts pending and running jobs in bjobs output.
pub fn parse_bjobs(lines: &[String]) -> (u64, u64) {
    let mut pending = 0;
    let mut running = 0;
    for line in lines {
        let cols: Vec<&str> = line.split_whitespace().collect();
        if cols.len() >= 3 {
            match cols[2] {
                "PEND" => pending += 1,
                "RUN" => running += 1,
                _ => {}
            }
        }
    }
    (pending, running)
}

/// Polls the cluster head node and summarises capacity and the user's
/// share of it. The user counts as BUSY once either ceiling is reached.
pub async fn cluster_status(
    conf: Arc<ClusterConfig>,
    user: &str,
    max_running: u64,
    max_pending: u64,
) -> Result<ClusterStatus, PipelineError> {
    if conf.cluster_type != SchedulerType::Lsf {
        return Err(PipelineError::InvalidConfig(
            "Cluster status polling is only implemented for LSF.".to_string(),
        ));
    }
    let runner = RemoteJobRunner::from_config(conf, CommandBuilder::Plain, false)?;
    let spec = JobSpec::default();

    let bhosts = runner.run_command("bhosts", &spec, None, None).await?;
    let (available_slots, running_jobs) = parse_bhosts(&bhosts);

    let bjobs = runner
        .run_command(&format!("bjobs -u {}", user), &spec, None, None)
        .await?;
    let (user_pending, user_running) = parse_bjobs(&bjobs);

    Ok(ClusterStatus {
        available_slots,
        running_jobs,
        user_pending,
        user_running,
        busy: user_running >= max_running || user_pending >= max_pending,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_bhosts_sums_ok_hosts() {
        let out = lines(&[
            "HOST_NAME          STATUS       JL/U    MAX  NJOBS   RUN  SSUSP  USUSP    RSV",
            "node-1             ok              -      16     4      4      0      0      0",
            "node-2             ok              -      16     8      7      1      0      0",
            "node-3             closed          -      16    16     16      0      0      0",
        ]);
        assert_eq!(parse_bhosts(&out), (32, 11));
    }

    #[test]
    fn test_parse_bjobs_counts_states() {
        let out = lines(&[
            "JOBID   USER    STAT  QUEUE      FROM_HOST   EXEC_HOST   JOB_NAME   SUBMIT_TIME",
            "101     pipe    RUN   normal     head        node-1      do1_0_bam  Jan  1 10:00",
            "102     pipe    RUN   normal     head        node-2      do1_1_bam  Jan  1 10:00",
            "103     pipe    PEND  normal     head        -           do1bam     Jan  1 10:01",
        ]);
        assert_eq!(parse_bjobs(&out), (1, 2));
    }

    #[test]
    fn test_parse_handles_empty_output() {
        assert_eq!(parse_bhosts(&[]), (0, 0));
        assert_eq!(parse_bjobs(&[]), (0, 0));
    }

    #[tokio::test]
    async fn test_status_rejects_slurm() {
        let mut conf = ClusterConfig::default();
        conf.cluster_type = SchedulerType::Slurm;
        conf.cluster = Some("head".to_string());
        conf.cluster_user = Some("pipe".to_string());
        conf.cluster_workdir = Some("/scratch".to_string());
        let err = cluster_status(Arc::new(conf), "pipe", 100, 5)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig(_)));
    }
}
