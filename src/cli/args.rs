use clap::Parser;

use crate::pipelines::bwa::BwaAlgorithm;

#[derive(Parser, Debug, Clone)]
#[command(name = "splitalign-pipelines", version)]
pub struct Arguments {
    /// Pipeline module: bwa, tophat, star, merge or status.
    #[arg(short, long)]
    pub module: String,

    #[arg(short = 'v', long = "verbose", action)]
    pub verbose: bool,

    /// Reference genome (index prefix or directory, tool-dependent).
    #[arg(short = 'g', long)]
    pub genome: Option<String>,

    #[arg(short = 'i', long = "file1")]
    pub file1: Option<String>,

    #[arg(short = 'I', long = "file2")]
    pub file2: Option<String>,

    /// Number of reads per split chunk.
    #[arg(long, default_value_t = 1_000_000)]
    pub reads: usize,

    /// Sample name used to tag the output bam read group.
    #[arg(long)]
    pub sample: Option<String>,

    /// Remote copy target for the final bam (host:dir).
    #[arg(long)]
    pub rcp: Option<String>,

    /// User group for the produced files.
    #[arg(long)]
    pub group: Option<String>,

    /// Delete all temporary files.
    #[arg(long, action)]
    pub cleanup: bool,

    /// Align the input as a single chunk instead of splitting.
    #[arg(long, action)]
    pub no_split: bool,

    /// BWA algorithm; detected from the read length when omitted.
    #[arg(long, value_enum)]
    pub algorithm: Option<BwaAlgorithm>,

    /// Number of occurrences of non-unique reads to keep (bwa aln only).
    #[arg(long)]
    pub nocc: Option<u32>,

    /// Build all commands but never contact the scheduler.
    #[arg(long, action)]
    pub dry_run: bool,

    /// Output bam (merge module).
    #[arg(short = 'o', long)]
    pub outfile: Option<String>,

    /// Input bams to merge (merge module).
    pub infiles: Vec<String>,

    /// Merge program submitted as the dependent job; discovered on PATH
    /// when omitted.
    #[arg(long)]
    pub merge_prog: Option<String>,

    /// Cluster user to report on (status module).
    #[arg(long)]
    pub user: Option<String>,

    #[arg(long, default_value_t = 100)]
    pub maxjobs: u64,

    #[arg(long, default_value_t = 5)]
    pub maxpendjobs: u64,
}

pub fn parse() -> Arguments {
    Arguments::parse()
}
