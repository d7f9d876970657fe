/// BWA command templates for the split/align/merge pipeline: the older
/// aln algorithm with its per-mate .sai intermediates, and the newer
/// single-pass mem algorithm.
use async_trait::async_trait;
use clap::ValueEnum;
use log::info;

use crate::config::defs::{BWA_TAG, PipelineError, SAMTOOLS_TAG};
use crate::pipelines::align::{Aligner, AlignmentManager, ChunkContext, ChunkOutcome};
use crate::utils::command::bash_quote;

/// Reads longer than this align better with mem than aln.
const MEM_READ_LENGTH: usize = 70;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BwaAlgorithm {
    Aln,
    Mem,
}

impl BwaAlgorithm {
    /// Picks the algorithm for a given read length when the caller did
    /// not specify one.
    pub fn for_read_length(len: usize) -> Self {
        if len > MEM_READ_LENGTH {
            BwaAlgorithm::Mem
        } else {
            BwaAlgorithm::Aln
        }
    }
}

pub struct BwaAligner {
    algorithm: BwaAlgorithm,
    nocc: Option<u32>,
}

impl BwaAligner {
    pub fn new(algorithm: BwaAlgorithm, nocc: Option<u32>) -> Result<Self, PipelineError> {
        if nocc.is_some() && algorithm == BwaAlgorithm::Mem {
            return Err(PipelineError::InvalidArgument(
                "The nocc argument is not supported by bwa mem. Try bwa aln instead.".to_string(),
            ));
        }
        Ok(BwaAligner { algorithm, nocc })
    }

    fn nocc_arg(&self) -> String {
        match self.nocc {
            Some(n) => format!("-n {} ", n),
            None => String::new(),
        }
    }

    /// The shared tail of every bwa pipeline: sam to sorted bam.
    fn sort_tail(mgr: &AlignmentManager, outbam: &str) -> String {
        format!(
            "{sam} view -b -S -u - | {sam} sort -m {mem}M -@ {threads} -o {out} -",
            sam = SAMTOOLS_TAG,
            mem = mgr.conf().sort_memory_mb(),
            threads = mgr.conf().cluster_threads,
            out = outbam
        )
    }

    fn mem_command(
        &self,
        mgr: &AlignmentManager,
        genome: &str,
        fqnames: &[String],
        outbam: &str,
        cleanup_inputs: bool,
    ) -> String {
        let quoted = fqnames.join(" ");
        let mut cmd = format!(
            "{} mem {} {} | {}",
            BWA_TAG,
            genome,
            quoted,
            Self::sort_tail(mgr, outbam)
        );
        if cleanup_inputs {
            cmd.push_str(&format!(" && rm {}", quoted));
        }
        cmd
    }

    fn single_aln_command(
        &self,
        mgr: &AlignmentManager,
        genome: &str,
        fqname: &str,
        outbam: &str,
        cleanup_inputs: bool,
    ) -> String {
        let mut cmd = format!(
            "{bwa} aln {genome} {fq} | {bwa} samse {nocc}{genome} - {fq} | {tail}",
            bwa = BWA_TAG,
            genome = genome,
            fq = fqname,
            nocc = self.nocc_arg(),
            tail = Self::sort_tail(mgr, outbam)
        );
        if cleanup_inputs {
            cmd.push_str(&format!(" && rm {}", fqname));
        }
        cmd
    }

    fn paired_aln_commands(
        &self,
        mgr: &AlignmentManager,
        genome: &str,
        fqname: &str,
        fqname2: &str,
        outbam: &str,
        cleanup_inputs: bool,
    ) -> (String, String, String, String, String) {
        let sai1 = format!("{}.sai", fqname);
        let sai2 = format!("{}.sai", fqname2);
        let cmd1 = format!("{} aln {} {} > {}", BWA_TAG, genome, fqname, sai1);
        let cmd2 = format!("{} aln {} {} > {}", BWA_TAG, genome, fqname2, sai2);
        let mut cmd3 = format!(
            "{bwa} sampe {nocc}{genome} {sai1} {sai2} {fq1} {fq2} | {tail} && rm {sai1} {sai2}",
            bwa = BWA_TAG,
            nocc = self.nocc_arg(),
            genome = genome,
            sai1 = sai1,
            sai2 = sai2,
            fq1 = fqname,
            fq2 = fqname2,
            tail = Self::sort_tail(mgr, outbam)
        );
        if cleanup_inputs {
            cmd3.push_str(&format!(" && rm {} {}", fqname, fqname2));
        }
        (cmd1, cmd2, cmd3, sai1, sai2)
    }
}

#[async_trait]
impl Aligner for BwaAligner {
    fn tool(&self) -> &'static str {
        BWA_TAG
    }

    async fn submit_chunk(
        &self,
        mgr: &AlignmentManager,
        ctx: ChunkContext<'_>,
    ) -> Result<ChunkOutcome, PipelineError> {
        let fqname = bash_quote(&ctx.fastq.to_string_lossy());
        let mate = ctx.mate.map(|m| bash_quote(&m.to_string_lossy()));
        let outbam = format!("{}.bam", fqname);
        let delay = ctx.index as u64;
        let mem = mgr.conf().job_mem_mb;

        // Job names carry the library-code fragment plus the chunk
        // ordinal so they stay distinguishable in queue listings.
        let basename = ctx
            .fastq
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let donumber = basename.split('_').next().unwrap_or("chunk").to_string();
        let jobtag = format!("{}_{}", donumber, ctx.index);

        let job_id = match (self.algorithm, mate.as_deref()) {
            (BwaAlgorithm::Aln, Some(mate)) => {
                let (cmd1, cmd2, cmd3, _sai1, _sai2) = self.paired_aln_commands(
                    mgr,
                    ctx.genome,
                    &fqname,
                    mate,
                    &outbam,
                    ctx.cleanup_inputs,
                );
                info!("starting bwa step1 on '{}'", fqname);
                let jobid_sai1 = mgr
                    .submit_alignment(&cmd1, &format!("{}_sai1", jobtag), &[], delay, mem)
                    .await?;
                info!("starting bwa step1 on '{}'", mate);
                let jobid_sai2 = mgr
                    .submit_alignment(&cmd2, &format!("{}_sai2", jobtag), &[], delay, mem)
                    .await?;
                info!("preparing bwa step2 on '{}'", fqname);
                mgr.submit_alignment(
                    &cmd3,
                    &format!("{}_bam", jobtag),
                    &[jobid_sai1, jobid_sai2],
                    delay,
                    mem,
                )
                .await?
            }
            (BwaAlgorithm::Aln, None) => {
                let cmd = self.single_aln_command(
                    mgr,
                    ctx.genome,
                    &fqname,
                    &outbam,
                    ctx.cleanup_inputs,
                );
                info!("starting bwa on '{}'", fqname);
                mgr.submit_alignment(&cmd, &format!("{}_bam", jobtag), &[], delay, mem)
                    .await?
            }
            (BwaAlgorithm::Mem, mate) => {
                let mut fqnames = vec![fqname.clone()];
                if let Some(mate) = mate {
                    fqnames.push(mate.to_string());
                }
                let cmd =
                    self.mem_command(mgr, ctx.genome, &fqnames, &outbam, ctx.cleanup_inputs);
                info!("Starting bwa mem on fastq files: {}", fqnames.join(" "));
                mgr.submit_alignment(&cmd, &format!("{}_bam", jobtag), &[], delay, mem)
                    .await?
            }
        };

        Ok(ChunkOutcome {
            job_id,
            bam: outbam,
        })
    }
}
