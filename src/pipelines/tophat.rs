/// Tophat2 command template. Tophat writes a per-chunk output directory
/// holding accepted_hits.bam plus unmapped.bam; both streams are merged
/// into the chunk bam before the generic merge path takes over.
use async_trait::async_trait;
use log::info;

use crate::config::defs::{PipelineError, SAMTOOLS_TAG, TOPHAT2_TAG};
use crate::pipelines::align::{Aligner, AlignmentManager, ChunkContext, ChunkOutcome};
use crate::utils::command::bash_quote;

pub struct TophatAligner;

impl TophatAligner {
    fn chunk_command(
        mgr: &AlignmentManager,
        genome: &str,
        fqname: &str,
        mate: Option<&str>,
        outdir: &str,
        outbam: &str,
        cleanup_inputs: bool,
    ) -> String {
        // Tophat/bowtie indexes are referenced without the trailing .fa.
        let genome = genome.strip_suffix(".fa").unwrap_or(genome);

        // The no-coverage-search option is required when splitting the
        // fastq file across multiple cluster nodes.
        let mut cmd = format!(
            "{tophat} --no-coverage-search --library-type fr-firststrand -p {threads} -o {dir} {genome} {fq}",
            tophat = TOPHAT2_TAG,
            threads = mgr.conf().cluster_threads,
            dir = outdir,
            genome = genome,
            fq = fqname
        );
        if let Some(mate) = mate {
            cmd.push_str(&format!(" {}", mate));
        }

        // Strip unwanted secondary alignments, then fold the unmapped
        // reads back in. Tophat2 sorts its output bams by default.
        let strippedbam = format!("{}.partial", outbam);
        cmd.push_str(&format!(
            " && {sam} view -b -F 0x100 -o {stripped} {dir}/accepted_hits.bam",
            sam = SAMTOOLS_TAG,
            stripped = strippedbam,
            dir = outdir
        ));
        cmd.push_str(&format!(
            " && {sam} merge {out} {stripped} {dir}/unmapped.bam",
            sam = SAMTOOLS_TAG,
            out = outbam,
            stripped = strippedbam,
            dir = outdir
        ));

        cmd.push_str(&format!(" && rm -r {} {}", outdir, strippedbam));
        if cleanup_inputs {
            cmd.push_str(&format!(" {}", fqname));
            if let Some(mate) = mate {
                cmd.push_str(&format!(" {}", mate));
            }
        }
        cmd
    }
}

#[async_trait]
impl Aligner for TophatAligner {
    fn tool(&self) -> &'static str {
        TOPHAT2_TAG
    }

    async fn submit_chunk(
        &self,
        mgr: &AlignmentManager,
        ctx: ChunkContext<'_>,
    ) -> Result<ChunkOutcome, PipelineError> {
        let fqname = bash_quote(&ctx.fastq.to_string_lossy());
        let mate = ctx.mate.map(|m| bash_quote(&m.to_string_lossy()));
        let outbam = format!("{}.bam", fqname);

        // Doubles as job name and output directory, so the suffixed
        // chunk name keeps it collision-resistant.
        let jobname = format!("{}_tophat", fqname);

        let cmd = Self::chunk_command(
            mgr,
            ctx.genome,
            &fqname,
            mate.as_deref(),
            &jobname,
            &outbam,
            ctx.cleanup_inputs,
        );
        info!("starting tophat2 on '{}'", fqname);
        let job_id = mgr
            .submit_alignment(
                &cmd,
                &jobname,
                &[],
                ctx.index as u64,
                mgr.conf().job_mem_mb,
            )
            .await?;
        Ok(ChunkOutcome {
            job_id,
            bam: outbam,
        })
    }
}
