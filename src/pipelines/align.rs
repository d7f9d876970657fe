/// Fan-out/fan-in alignment orchestration: split the input fastq files,
/// submit one alignment job per chunk, then queue a merge job that
/// depends on every chunk job. The merge half of this module also runs
/// *inside* that merge job on a cluster node (module `merge`).
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use log::{debug, error, info, warn};

use crate::cluster::builder::JobSpec;
use crate::cluster::submitter::JobSubmitter;
use crate::config::defs::{
    BZIP2_TAG, ClusterConfig, FASTQ_LINES_PER_READ, GZIP_TAG, PICARD_TAG, PipelineError, RSYNC_TAG,
    SAMTOOLS_TAG,
};
use crate::utils::command::{bash_quote, call_subprocess, call_tool};
use crate::utils::fastq::{make_bam_name_without_extension, repository_or_dummy};
use crate::utils::file::{compression_tool, set_group_ownership};

/// One chunk (or chunk pair) handed to an aligner for submission.
pub struct ChunkContext<'a> {
    pub genome: &'a str,
    pub fastq: &'a Path,
    pub mate: Option<&'a Path>,
    pub index: usize,
    /// Whether the align job should delete its input chunk(s) when done.
    /// True for split-produced chunks; an unsplit input is only removed
    /// when cleanup was requested.
    pub cleanup_inputs: bool,
}

/// What an aligner submission yields: the scheduler job ID to depend on
/// and the bam file the job will produce.
pub struct ChunkOutcome {
    pub job_id: u64,
    pub bam: String,
}

/// Tool-specific command templates, uniform orchestration. Implementors
/// build the per-chunk pipeline string(s) and submit through the
/// manager.
#[async_trait]
pub trait Aligner: Send + Sync {
    fn tool(&self) -> &'static str;

    async fn submit_chunk(
        &self,
        mgr: &AlignmentManager,
        ctx: ChunkContext<'_>,
    ) -> Result<ChunkOutcome, PipelineError>;
}

/// Everything submitted for one split-and-align invocation, in chunk
/// order.
#[derive(Debug)]
pub struct SplitAlignSummary {
    pub chunk_jobs: Vec<u64>,
    pub chunk_bams: Vec<String>,
    pub merge_job: u64,
    pub output_bam: String,
}

#[derive(Debug, Clone)]
pub struct AlignmentOptions {
    pub merge_prog: Option<String>,
    pub split_read_count: usize,
    pub cleanup: bool,
    pub group: Option<String>,
    pub no_split: bool,
    pub verbose: bool,
    pub dry_run: bool,
}

impl Default for AlignmentOptions {
    fn default() -> Self {
        AlignmentOptions {
            merge_prog: None,
            split_read_count: 1_000_000,
            cleanup: false,
            group: None,
            no_split: false,
            verbose: false,
            dry_run: false,
        }
    }
}

pub struct AlignmentManager {
    conf: Arc<ClusterConfig>,
    submitter: JobSubmitter,
    merge_prog: Option<String>,
    split_read_count: usize,
    cleanup: bool,
    group: Option<String>,
    no_split: bool,
    verbose: bool,
}

impl AlignmentManager {
    pub fn new(conf: Arc<ClusterConfig>, opts: AlignmentOptions) -> Self {
        let submitter = JobSubmitter::from_config(conf.clone(), opts.dry_run);
        debug!("merge_prog set to {:?}", opts.merge_prog);
        AlignmentManager {
            conf,
            submitter,
            merge_prog: opts.merge_prog,
            split_read_count: opts.split_read_count,
            cleanup: opts.cleanup,
            group: opts.group,
            no_split: opts.no_split,
            verbose: opts.verbose,
        }
    }

    pub fn conf(&self) -> &Arc<ClusterConfig> {
        &self.conf
    }

    fn tool_path(&self) -> Option<&str> {
        self.conf
            .cluster_path
            .as_deref()
            .or(self.conf.host_path.as_deref())
    }

    /// Launches the initial file splitting and per-chunk alignments, then
    /// queues a job dependent on all of them which merges the outputs
    /// into the final bam file.
    pub async fn split_and_align(
        &self,
        files: &[PathBuf],
        genome: &str,
        samplename: Option<&str>,
        rcp_target: Option<&str>,
        aligner: &dyn Aligner,
    ) -> Result<SplitAlignSummary, PipelineError> {
        if files.is_empty() || files.len() > 2 {
            error!("Too many files specified.");
            return Err(PipelineError::InvalidArgument(format!(
                "Expected one or two fastq files, got {}",
                files.len()
            )));
        }

        let files = self.acquire_inputs(files).await?;

        let chunks = if self.no_split {
            vec![files[0].clone()]
        } else {
            self.split_fq(&files[0]).await?
        };
        let mate_chunks = match files.get(1) {
            Some(mate) => {
                let mates = if self.no_split {
                    vec![mate.clone()]
                } else {
                    self.split_fq(mate).await?
                };
                if mates.len() != chunks.len() {
                    return Err(PipelineError::InvalidArgument(format!(
                        "Paired fastq files split into differing chunk counts ({} vs {})",
                        chunks.len(),
                        mates.len()
                    )));
                }
                Some(mates)
            }
            None => None,
        };

        let mut chunk_jobs = Vec::with_capacity(chunks.len());
        let mut chunk_bams = Vec::with_capacity(chunks.len());
        for (index, chunk) in chunks.iter().enumerate() {
            let ctx = ChunkContext {
                genome,
                fastq: chunk,
                mate: mate_chunks.as_ref().map(|m| m[index].as_path()),
                index,
                cleanup_inputs: !self.no_split || self.cleanup,
            };
            let outcome = aligner.submit_chunk(self, ctx).await?;
            debug!("got job id '{}'", outcome.job_id);
            chunk_jobs.push(outcome.job_id);
            chunk_bams.push(outcome.bam);
        }

        let output_bam = format!(
            "{}.bam",
            make_bam_name_without_extension(&files[0].to_string_lossy())
        );
        let merge_job = self
            .queue_merge(&chunk_bams, &chunk_jobs, &output_bam, rcp_target, samplename)
            .await?;

        Ok(SplitAlignSummary {
            chunk_jobs,
            chunk_bams,
            merge_job,
            output_bam,
        })
    }

    /// Makes sure every input file is present locally, fetching missing
    /// ones from the configured files host with a fixed-sleep retry.
    async fn acquire_inputs(&self, files: &[PathBuf]) -> Result<Vec<PathBuf>, PipelineError> {
        let mut acquired = Vec::with_capacity(files.len());
        for file in files {
            if file.exists() {
                acquired.push(file.clone());
                continue;
            }
            let host = self.conf.files_host.as_deref().ok_or_else(|| {
                PipelineError::InvalidArgument(format!("Input file not found: {}", file.display()))
            })?;
            self.fetch_remote_file(host, file).await?;
            acquired.push(file.clone());
        }
        Ok(acquired)
    }

    async fn fetch_remote_file(&self, host: &str, file: &Path) -> Result<(), PipelineError> {
        let attempts = self.conf.fetch_attempts.max(1);
        let source = format!("{}:{}", host, bash_quote(&file.to_string_lossy()));
        let dest = file.to_string_lossy().into_owned();
        for attempt in 1..=attempts {
            info!(
                "Fetching {} from {} (attempt {}/{})",
                file.display(),
                host,
                attempt,
                attempts
            );
            let args = vec!["-a".to_string(), source.clone(), dest.clone()];
            match call_tool(RSYNC_TAG, &args, self.conf.host_path.as_deref(), None).await {
                Ok(_) => return Ok(()),
                Err(e) if attempt < attempts => {
                    warn!("Fetch failed ({}); retrying.", e);
                    tokio::time::sleep(Duration::from_secs(self.conf.fetch_delay_secs)).await;
                }
                Err(e) => return Err(e),
            }
        }
        unreachable!("fetch loop returns on success or final failure");
    }

    /// Splits a fastq file into chunks of split_read_count reads using
    /// the command-line split for speed, decompressing gzip/bzip2 input
    /// in the same pipeline. Returns the ordered chunk paths.
    pub async fn split_fq(&self, fastq: &Path) -> Result<Vec<PathBuf>, PipelineError> {
        debug!(
            "splitting fq file {} to {} reads per file",
            fastq.display(),
            self.split_read_count
        );
        let line_count = self.split_read_count * FASTQ_LINES_PER_READ;
        let quoted = bash_quote(&fastq.to_string_lossy());
        let prefix = format!("{}-", quoted);
        let cmd = match compression_tool(fastq)? {
            Some(tool) if tool == GZIP_TAG || tool == BZIP2_TAG => {
                format!("{} -dc {} | split -l {} - {}", tool, quoted, line_count, prefix)
            }
            Some(tool) => {
                return Err(PipelineError::InvalidArgument(format!(
                    "Unsupported compression for {}: {}",
                    fastq.display(),
                    tool
                )));
            }
            None => format!("split -l {} {} {}", line_count, quoted, prefix),
        };
        call_subprocess(&cmd, self.tool_path(), None).await?;

        let chunks = collect_chunks(fastq)?;
        for chunk in &chunks {
            debug!("Created fastq file: '{}'", chunk.display());
            if let Some(group) = self.group.as_deref() {
                set_group_ownership(group, chunk).await;
            }
        }
        if self.cleanup {
            std::fs::remove_file(fastq)?;
            info!("Unlinking fq file '{}'", fastq.display());
        }
        Ok(chunks)
    }

    /// Submits one alignment (or merge) command to the scheduler with the
    /// standard queue/path settings. Returns the job ID.
    pub async fn submit_alignment(
        &self,
        cmd: &str,
        jobname: &str,
        depend: &[u64],
        sleep_secs: u64,
        mem_mb: u64,
    ) -> Result<u64, PipelineError> {
        let spec = JobSpec {
            mem_mb,
            queue: self.conf.cluster_queue.clone(),
            jobname: Some(jobname.to_string()),
            depend_jobs: depend.to_vec(),
            sleep_secs,
            ..JobSpec::default()
        };
        self.submitter
            .submit_command(cmd, &spec, self.tool_path(), None)
            .await
    }

    /// Submits the merge job for the per-chunk bam files, dependent on
    /// all of the chunk job IDs.
    async fn queue_merge(
        &self,
        bam_files: &[String],
        depend: &[u64],
        bam_fn: &str,
        rcp_target: Option<&str>,
        samplename: Option<&str>,
    ) -> Result<u64, PipelineError> {
        let merge_prog = self.merge_prog.as_deref().ok_or_else(|| {
            PipelineError::InvalidConfig("Merge program not configured.".to_string())
        })?;
        debug!("Entering queue_merge with input_files={}", bam_files.join(" "));

        let mut cmd = format!("{} --module merge", merge_prog);
        if self.verbose {
            cmd.push_str(" --verbose");
        }
        if let Some(rcp) = rcp_target {
            cmd.push_str(&format!(" --rcp {}", rcp));
        }
        if self.cleanup {
            cmd.push_str(" --cleanup");
        }
        if let Some(group) = self.group.as_deref() {
            cmd.push_str(&format!(" --group {}", group));
        }
        if let Some(sample) = samplename {
            cmd.push_str(&format!(" --sample {}", bash_quote(sample)));
        }
        cmd.push_str(&format!(" --outfile {}", bash_quote(bam_fn)));
        for bam in bam_files {
            cmd.push_str(&format!(" {}", bam));
        }

        info!("preparing merge on '{}'", bam_files.join(" "));
        let jobname = format!(
            "{}bam",
            bam_files[0].split('_').next().unwrap_or("merge")
        );
        self.submit_alignment(&cmd, &jobname, depend, 0, self.conf.merge_mem_mb)
            .await
    }

    /// Merge-side entry point, run on a cluster node once every chunk job
    /// has ended: merge, post-process, optionally ship the result.
    pub async fn merge_alignments(
        &self,
        input_fns: &[PathBuf],
        output_fn: &Path,
        rcp_target: Option<&str>,
        samplename: Option<&str>,
    ) -> Result<(), PipelineError> {
        let merge_fn = with_stem_suffix(output_fn, "_dirty");
        info!(
            "merging '{}' into '{}'",
            join_paths(input_fns),
            merge_fn.display()
        );
        self.merge_files(&merge_fn, input_fns).await?;

        info!("running picard cleanup on '{}'", merge_fn.display());
        self.picard_cleanup(output_fn, &merge_fn, samplename).await?;
        info!(
            "ran picard cleanup on '{}' creating '{}'",
            merge_fn.display(),
            output_fn.display()
        );

        if let Some(target) = rcp_target {
            self.copy_result(target, output_fn).await?;
            info!("copied '{}' to '{}'", output_fn.display(), target);
        }
        Ok(())
    }

    /// Merges sorted per-chunk bams into one; a single input is simply
    /// renamed, with no merge-tool invocation.
    pub async fn merge_files(
        &self,
        output_fn: &Path,
        input_fns: &[PathBuf],
    ) -> Result<(), PipelineError> {
        if input_fns.len() == 1 {
            warn!("renaming file: {}", input_fns[0].display());
            std::fs::rename(&input_fns[0], output_fn)?;
        } else {
            let mut args = vec!["merge".to_string(), output_fn.to_string_lossy().into_owned()];
            args.extend(input_fns.iter().map(|f| f.to_string_lossy().into_owned()));
            let out = call_tool(SAMTOOLS_TAG, &args, self.tool_path(), None).await?;
            for line in out {
                warn!("SAMTOOLS: {}", line);
            }
        }
        if !output_fn.is_file() {
            error!(
                "expected output file '{}' cannot be found.",
                output_fn.display()
            );
            return Err(PipelineError::Other(anyhow!(
                "expected output file '{}' cannot be found",
                output_fn.display()
            )));
        }
        if let Some(group) = self.group.as_deref() {
            set_group_ownership(group, output_fn).await;
        }
        if self.cleanup && input_fns.len() > 1 {
            for input in input_fns {
                info!("Unlinking bam file '{}'", input.display());
                std::fs::remove_file(input)?;
            }
        }
        Ok(())
    }

    /// Runs picard CleanSam, AddOrReplaceReadGroups and
    /// FixMateInformation as sequential disk-buffered steps, removing
    /// each intermediate when cleanup is on.
    pub async fn picard_cleanup(
        &self,
        output_fn: &Path,
        input_fn: &Path,
        samplename: Option<&str>,
    ) -> Result<(), PipelineError> {
        let tmpdir = self
            .conf
            .cluster_workdir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().to_string_lossy().into_owned());
        let postproc = BamPostProcessor::new(input_fn, output_fn, samplename, &tmpdir);

        call_tool(PICARD_TAG, &postproc.clean_sam(), self.tool_path(), None).await?;
        if self.cleanup {
            std::fs::remove_file(input_fn)?;
        }

        call_tool(
            PICARD_TAG,
            &postproc.add_or_replace_read_groups(),
            self.tool_path(),
            None,
        )
        .await?;
        if self.cleanup {
            std::fs::remove_file(&postproc.cleaned_fn)?;
        }

        call_tool(
            PICARD_TAG,
            &postproc.fix_mate_information(),
            self.tool_path(),
            None,
        )
        .await?;
        if self.cleanup {
            std::fs::remove_file(&postproc.rgadded_fn)?;
        }

        if let Some(group) = self.group.as_deref() {
            set_group_ownership(group, output_fn).await;
        }
        Ok(())
    }

    /// Copies the final bam to the remote target and touches a .done
    /// sentinel next to it so downstream consumers know the copy is
    /// complete.
    pub async fn copy_result(&self, target: &str, fname: &Path) -> Result<(), PipelineError> {
        let args = vec![
            "-p".to_string(),
            "-q".to_string(),
            fname.to_string_lossy().into_owned(),
            target.to_string(),
        ];
        call_tool("scp", &args, self.tool_path(), None).await?;

        let fields: Vec<&str> = target.splitn(2, ':').collect();
        if fields.len() == 2 {
            let base = fname
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let touch = format!("touch {}/{}.done", fields[1], bash_quote(&base));
            call_tool(
                "ssh",
                &[fields[0].to_string(), touch],
                self.tool_path(),
                None,
            )
            .await?;
        }
        if self.cleanup {
            std::fs::remove_file(fname)?;
        }
        Ok(())
    }
}

/// Scans the directory of the split input for its chunk files: the
/// original name plus a dash and a two- or four-letter suffix, in order.
fn collect_chunks(fastq: &Path) -> Result<Vec<PathBuf>, PipelineError> {
    let dir = fastq.parent().filter(|p| !p.as_os_str().is_empty());
    let dir: &Path = dir.unwrap_or(Path::new("."));
    let prefix = format!(
        "{}-",
        fastq
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    );
    let mut chunks = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if let Some(suffix) = name.strip_prefix(&prefix) {
            let is_chunk = (suffix.len() == 2 || suffix.len() == 4)
                && suffix.chars().all(|c| c.is_ascii_lowercase());
            if is_chunk {
                chunks.push(entry.path());
            }
        }
    }
    chunks.sort();
    Ok(chunks)
}

fn with_stem_suffix(path: &Path, suffix: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    path.with_file_name(format!("{}{}{}", stem, suffix, ext))
}

fn join_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Builds the picard argument lists for the merge post-processing steps.
pub struct BamPostProcessor {
    input_fn: PathBuf,
    output_fn: PathBuf,
    pub cleaned_fn: PathBuf,
    pub rgadded_fn: PathBuf,
    samplename: Option<String>,
    common_args: Vec<String>,
}

impl BamPostProcessor {
    pub fn new(
        input_fn: &Path,
        output_fn: &Path,
        samplename: Option<&str>,
        tmpdir: &str,
    ) -> Self {
        BamPostProcessor {
            input_fn: input_fn.to_path_buf(),
            output_fn: output_fn.to_path_buf(),
            cleaned_fn: with_stem_suffix(output_fn, "_cleaned"),
            rgadded_fn: with_stem_suffix(output_fn, "_rg"),
            samplename: samplename.map(|s| s.to_string()),
            common_args: vec![
                "VALIDATION_STRINGENCY=SILENT".to_string(),
                format!("TMP_DIR={}", tmpdir),
                // Intermediates are deleted right away; skip compressing
                // them.
                "COMPRESSION_LEVEL=0".to_string(),
            ],
        }
    }

    pub fn clean_sam(&self) -> Vec<String> {
        let mut args = vec![
            "CleanSam".to_string(),
            format!("INPUT={}", self.input_fn.display()),
            format!("OUTPUT={}", self.cleaned_fn.display()),
        ];
        args.extend(self.common_args.clone());
        args
    }

    pub fn add_or_replace_read_groups(&self) -> Vec<String> {
        let parsed = repository_or_dummy(&self.output_fn.to_string_lossy());
        let sample = self
            .samplename
            .clone()
            .unwrap_or_else(|| parsed.libcode.clone());
        let mut args = vec![
            "AddOrReplaceReadGroups".to_string(),
            format!("INPUT={}", self.cleaned_fn.display()),
            format!("OUTPUT={}", self.rgadded_fn.display()),
            format!("RGLB={}", parsed.libcode),
            format!("RGSM={}", sample),
            format!("RGCN={}", parsed.facility),
            format!("RGPU={}", parsed.lanenum),
            "RGPL=illumina".to_string(),
        ];
        args.extend(self.common_args.clone());
        args
    }

    pub fn fix_mate_information(&self) -> Vec<String> {
        let mut args = vec![
            "FixMateInformation".to_string(),
            format!("INPUT={}", self.rgadded_fn.display()),
            format!("OUTPUT={}", self.output_fn.display()),
        ];
        args.extend(self.common_args.clone());
        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_fastq(path: &Path, reads: usize) {
        let mut file = std::fs::File::create(path).unwrap();
        for i in 0..reads {
            writeln!(file, "@r{}\nACGTACGT\n+\nIIIIIIII", i).unwrap();
        }
    }

    fn dry_manager(opts: AlignmentOptions) -> AlignmentManager {
        let conf = Arc::new(ClusterConfig::default());
        AlignmentManager::new(
            conf,
            AlignmentOptions {
                dry_run: true,
                ..opts
            },
        )
    }

    #[tokio::test]
    async fn test_split_fq_chunk_count_and_order() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let fq = dir.path().join("do123_mm10_CRI01p1.fq");
        write_fastq(&fq, 5);

        let mgr = dry_manager(AlignmentOptions {
            split_read_count: 2,
            ..AlignmentOptions::default()
        });
        let chunks = mgr.split_fq(&fq).await?;

        // ceil(5/2) chunks, ordered -aa, -ab, -ac
        assert_eq!(chunks.len(), 3);
        let names: Vec<String> = chunks
            .iter()
            .map(|c| c.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            names,
            vec![
                "do123_mm10_CRI01p1.fq-aa",
                "do123_mm10_CRI01p1.fq-ab",
                "do123_mm10_CRI01p1.fq-ac"
            ]
        );
        // 2 reads = 8 lines per full chunk, 1 read = 4 lines in the tail
        let first = std::fs::read_to_string(&chunks[0])?;
        assert_eq!(first.lines().count(), 8);
        let last = std::fs::read_to_string(&chunks[2])?;
        assert_eq!(last.lines().count(), 4);
        // the original is kept when cleanup is off
        assert!(fq.exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_split_fq_gzipped_input() -> anyhow::Result<()> {
        use flate2::Compression;
        use flate2::write::GzEncoder;

        let dir = tempfile::tempdir()?;
        let fq = dir.path().join("do123_mm10_CRI01p1.fq.gz");
        let mut encoder =
            GzEncoder::new(std::fs::File::create(&fq)?, Compression::default());
        for i in 0..3 {
            writeln!(encoder, "@r{}\nACGT\n+\nIIII", i)?;
        }
        encoder.finish()?;

        let mgr = dry_manager(AlignmentOptions {
            split_read_count: 2,
            ..AlignmentOptions::default()
        });
        let chunks = mgr.split_fq(&fq).await?;
        assert_eq!(chunks.len(), 2);
        // chunk content is decompressed text
        let first = std::fs::read_to_string(&chunks[0])?;
        assert!(first.starts_with("@r0"));
        Ok(())
    }

    #[tokio::test]
    async fn test_split_fq_cleanup_unlinks_original() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let fq = dir.path().join("do9_mm10_CRI02p1.fq");
        write_fastq(&fq, 2);

        let mgr = dry_manager(AlignmentOptions {
            split_read_count: 1,
            cleanup: true,
            ..AlignmentOptions::default()
        });
        let chunks = mgr.split_fq(&fq).await?;
        assert_eq!(chunks.len(), 2);
        assert!(!fq.exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_merge_files_single_input_renames() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let input = dir.path().join("chunk-aa.bam");
        std::fs::write(&input, b"bam-bytes")?;
        let output = dir.path().join("merged_dirty.bam");

        let mgr = dry_manager(AlignmentOptions::default());
        mgr.merge_files(&output, &[input.clone()]).await?;
        assert!(output.is_file());
        assert!(!input.exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_too_many_files_is_fatal() {
        let mgr = dry_manager(AlignmentOptions {
            merge_prog: Some("merge-prog".to_string()),
            ..AlignmentOptions::default()
        });
        struct NoopAligner;
        #[async_trait]
        impl Aligner for NoopAligner {
            fn tool(&self) -> &'static str {
                "noop"
            }
            async fn submit_chunk(
                &self,
                _mgr: &AlignmentManager,
                _ctx: ChunkContext<'_>,
            ) -> Result<ChunkOutcome, PipelineError> {
                Ok(ChunkOutcome {
                    job_id: 0,
                    bam: "x.bam".to_string(),
                })
            }
        }
        let files = vec![
            PathBuf::from("a.fq"),
            PathBuf::from("b.fq"),
            PathBuf::from("c.fq"),
        ];
        let err = mgr
            .split_and_align(&files, "mm10", None, None, &NoopAligner)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidArgument(_)));
    }

    #[test]
    fn test_postprocessor_read_groups_from_filename() {
        let pp = BamPostProcessor::new(
            Path::new("do123_mm10_CRI01_dirty.bam"),
            Path::new("do123_mm10_CRI01.bam"),
            None,
            "/tmp",
        );
        let args = pp.add_or_replace_read_groups();
        assert!(args.contains(&"RGLB=do123".to_string()));
        assert!(args.contains(&"RGCN=CRI".to_string()));
        assert!(args.contains(&"RGPU=1".to_string()));
        assert!(args.contains(&"RGSM=do123".to_string()));
    }

    #[test]
    fn test_postprocessor_dummy_read_groups() {
        let pp = BamPostProcessor::new(
            Path::new("odd-name_dirty.bam"),
            Path::new("odd-name.bam"),
            Some("liver"),
            "/tmp",
        );
        let args = pp.add_or_replace_read_groups();
        assert!(args.contains(&"RGCN=Unknown".to_string()));
        assert!(args.contains(&"RGPU=0".to_string()));
        assert!(args.contains(&"RGSM=liver".to_string()));
    }

    #[test]
    fn test_postprocessor_step_chain() {
        let pp = BamPostProcessor::new(
            Path::new("out_dirty.bam"),
            Path::new("out.bam"),
            None,
            "/tmp",
        );
        assert_eq!(pp.clean_sam()[0], "CleanSam");
        assert!(
            pp.clean_sam()
                .contains(&"OUTPUT=out_cleaned.bam".to_string())
        );
        assert!(
            pp.add_or_replace_read_groups()
                .contains(&"INPUT=out_cleaned.bam".to_string())
        );
        assert!(
            pp.fix_mate_information()
                .contains(&"INPUT=out_rg.bam".to_string())
        );
        assert!(
            pp.fix_mate_information()
                .contains(&"OUTPUT=out.bam".to_string())
        );
    }
}
