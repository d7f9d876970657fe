use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;

use splitalign_pipelines::config::defs::{ClusterConfig, PipelineError, SchedulerType};
use splitalign_pipelines::pipelines::align::{AlignmentManager, AlignmentOptions};
use splitalign_pipelines::pipelines::bwa::{BwaAligner, BwaAlgorithm};
use splitalign_pipelines::pipelines::tophat::TophatAligner;

fn write_fastq(path: &Path, reads: usize) {
    let mut file = std::fs::File::create(path).unwrap();
    for i in 0..reads {
        writeln!(file, "@read{}\nACGTACGTACGT\n+\nIIIIIIIIIIII", i).unwrap();
    }
}

fn dry_conf(scheduler: SchedulerType) -> Arc<ClusterConfig> {
    let mut conf = ClusterConfig::default();
    conf.cluster_type = scheduler;
    conf.cluster = Some("head.example.org".to_string());
    conf.cluster_user = Some("pipe".to_string());
    conf.cluster_workdir = Some("/scratch/pipe".to_string());
    conf.cluster_queue = Some("normal".to_string());
    Arc::new(conf)
}

fn dry_manager(conf: Arc<ClusterConfig>, split_read_count: usize, no_split: bool) -> AlignmentManager {
    AlignmentManager::new(
        conf,
        AlignmentOptions {
            merge_prog: Some("splitalign-pipelines".to_string()),
            split_read_count,
            no_split,
            dry_run: true,
            ..AlignmentOptions::default()
        },
    )
}

#[tokio::test]
async fn test_paired_end_fan_out_fan_in() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let fq1 = dir.path().join("do123_mm10_CRI01p1.fq");
    let fq2 = dir.path().join("do123_mm10_CRI01p2.fq");
    write_fastq(&fq1, 5);
    write_fastq(&fq2, 5);

    let manager = dry_manager(dry_conf(SchedulerType::Lsf), 2, false);
    let aligner = BwaAligner::new(BwaAlgorithm::Mem, None)?;
    let summary = manager
        .split_and_align(
            &[fq1.clone(), fq2.clone()],
            "mm10",
            Some("liver"),
            None,
            &aligner,
        )
        .await?;

    // ceil(5/2) chunk pairs, one align job each, merge depending on all
    assert_eq!(summary.chunk_jobs.len(), 3);
    assert_eq!(summary.chunk_bams.len(), 3);
    for (i, suffix) in ["-aa.bam", "-ab.bam", "-ac.bam"].iter().enumerate() {
        assert!(
            summary.chunk_bams[i].ends_with(suffix),
            "chunk {} bam was {}",
            i,
            summary.chunk_bams[i]
        );
    }
    // mate tag stripped from the merged output name
    assert!(summary.output_bam.ends_with("do123_mm10_CRI01.bam"));

    // both mates split into corresponding chunks on disk
    for suffix in ["-aa", "-ab", "-ac"] {
        let c1 = PathBuf::from(format!("{}{}", fq1.display(), suffix));
        let c2 = PathBuf::from(format!("{}{}", fq2.display(), suffix));
        assert!(c1.is_file());
        assert!(c2.is_file());
        assert_eq!(
            std::fs::read_to_string(&c1)?.lines().count(),
            std::fs::read_to_string(&c2)?.lines().count()
        );
    }
    Ok(())
}

#[tokio::test]
async fn test_paired_end_mismatched_inputs_abort() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let fq1 = dir.path().join("do7_mm10_CRI03p1.fq");
    let fq2 = dir.path().join("do7_mm10_CRI03p2.fq");
    write_fastq(&fq1, 5);
    write_fastq(&fq2, 3);

    let manager = dry_manager(dry_conf(SchedulerType::Lsf), 2, false);
    let aligner = BwaAligner::new(BwaAlgorithm::Mem, None)?;
    let err = manager
        .split_and_align(&[fq1, fq2], "mm10", None, None, &aligner)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::InvalidArgument(_)));
    Ok(())
}

#[tokio::test]
async fn test_no_split_single_chunk() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let fq = dir.path().join("do55_hg38_SAN01p1.fq");
    write_fastq(&fq, 3);

    let manager = dry_manager(dry_conf(SchedulerType::Slurm), 1_000_000, true);
    let aligner = BwaAligner::new(BwaAlgorithm::Aln, None)?;
    let summary = manager
        .split_and_align(&[fq.clone()], "hg38", None, None, &aligner)
        .await?;

    assert_eq!(summary.chunk_jobs.len(), 1);
    assert_eq!(summary.chunk_bams.len(), 1);
    assert!(summary.chunk_bams[0].ends_with("do55_hg38_SAN01p1.fq.bam"));
    // no chunk files created, input untouched
    assert!(fq.is_file());
    Ok(())
}

#[tokio::test]
async fn test_small_input_still_fans_out_per_chunk() -> Result<()> {
    // input smaller than one split unit: exactly one chunk
    let dir = tempfile::tempdir()?;
    let fq = dir.path().join("do88_mm10_CRI04p1.fq");
    write_fastq(&fq, 3);

    let manager = dry_manager(dry_conf(SchedulerType::Lsf), 1_000_000, false);
    let summary = manager
        .split_and_align(&[fq], "mm10", None, None, &TophatAligner)
        .await?;
    assert_eq!(summary.chunk_jobs.len(), 1);
    assert!(summary.chunk_bams[0].ends_with("-aa.bam"));
    Ok(())
}

#[tokio::test]
async fn test_missing_input_without_files_host_fails() -> Result<()> {
    let manager = dry_manager(dry_conf(SchedulerType::Lsf), 2, false);
    let aligner = BwaAligner::new(BwaAlgorithm::Mem, None)?;
    let err = manager
        .split_and_align(
            &[PathBuf::from("/nonexistent/do1_x_CRI01p1.fq")],
            "mm10",
            None,
            None,
            &aligner,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::InvalidArgument(_)));
    Ok(())
}
