/// STAR command template. STAR streams an unsorted bam to stdout which
/// is sorted into the chunk bam; the result composes with the same
/// generic merge path as the bwa pipelines.
use async_trait::async_trait;
use log::info;

use crate::config::defs::{PipelineError, SAMTOOLS_TAG, STAR_TAG};
use crate::pipelines::align::{Aligner, AlignmentManager, ChunkContext, ChunkOutcome};
use crate::utils::command::bash_quote;

pub struct StarAligner;

impl StarAligner {
    fn chunk_command(
        mgr: &AlignmentManager,
        genome: &str,
        fqname: &str,
        mate: Option<&str>,
        outdir: &str,
        outbam: &str,
        cleanup_inputs: bool,
    ) -> String {
        let threads = mgr.conf().cluster_threads;
        let mut reads = fqname.to_string();
        if let Some(mate) = mate {
            reads.push(' ');
            reads.push_str(mate);
        }
        let mut cmd = format!(
            "mkdir -p {dir} && {star} --runThreadN {threads} --genomeDir {genome} \
             --readFilesIn {reads} --outFileNamePrefix {dir}/ --outSAMunmapped Within \
             --outSAMtype BAM Unsorted --outStd BAM_Unsorted \
             | {sam} sort -m {mem}M -@ {threads} -o {out} -",
            dir = outdir,
            star = STAR_TAG,
            threads = threads,
            genome = genome,
            reads = reads,
            sam = SAMTOOLS_TAG,
            mem = mgr.conf().sort_memory_mb(),
            out = outbam
        );
        cmd.push_str(&format!(" && rm -r {}", outdir));
        if cleanup_inputs {
            cmd.push_str(&format!(" {}", reads));
        }
        cmd
    }
}

#[async_trait]
impl Aligner for StarAligner {
    fn tool(&self) -> &'static str {
        STAR_TAG
    }

    async fn submit_chunk(
        &self,
        mgr: &AlignmentManager,
        ctx: ChunkContext<'_>,
    ) -> Result<ChunkOutcome, PipelineError> {
        let fqname = bash_quote(&ctx.fastq.to_string_lossy());
        let mate = ctx.mate.map(|m| bash_quote(&m.to_string_lossy()));
        let outbam = format!("{}.bam", fqname);
        let jobname = format!("{}_star", fqname);

        let cmd = Self::chunk_command(
            mgr,
            ctx.genome,
            &fqname,
            mate.as_deref(),
            &jobname,
            &outbam,
            ctx.cleanup_inputs,
        );
        info!("starting STAR on '{}'", fqname);
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::defs::ClusterConfig;
    use crate::pipelines::align::AlignmentOptions;
    use std::sync::Arc;

    #[test]
    fn test_chunk_command_streams_into_sort() {
        let mut conf = ClusterConfig::default();
        conf.cluster_mem_mb = 16000;
        conf.align_mem_reserve_mb = 2000;
        conf.cluster_threads = 4;
        let mgr = AlignmentManager::new(
            Arc::new(conf),
            AlignmentOptions {
                dry_run: true,
                ..AlignmentOptions::default()
            },
        );
        let cmd = StarAligner::chunk_command(
            &mgr,
            "/ref/star-mm10",
            "r1.fq-ab",
            Some("r2.fq-ab"),
            "r1.fq-ab_star",
            "r1.fq-ab.bam",
            true,
        );
        assert!(cmd.starts_with("mkdir -p r1.fq-ab_star && STAR --runThreadN 4"));
        assert!(cmd.contains("--readFilesIn r1.fq-ab r2.fq-ab"));
        assert!(cmd.contains("--outStd BAM_Unsorted | samtools sort -m 3500M -@ 4 -o r1.fq-ab.bam -"));
        assert!(cmd.ends_with("&& rm -r r1.fq-ab_star r1.fq-ab r2.fq-ab"));
    }
}
