use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use flate2::read::GzDecoder;
use lazy_static::lazy_static;
use log::warn;
use regex::Regex;
use seq_io::fastq::Reader;

use crate::config::defs::{GZ_SUFFIX, PipelineError};
use crate::utils::file::{is_bzipped, is_gzipped};

lazy_static! {
    // <libcode>_..._<FACILITY><lanenum>[p1|p2][_chr21][.ext]. with a
    // mandatory trailing dot; not anchored at the end so multi-suffix
    // names still match.
    static ref REPOSITORY_RE: Regex =
        Regex::new(r"^([a-zA-Z]+\d+)_.*_([A-Z]+)(\d+)(p[12])?(_chr21)?(\.[a-z]+)?\.").unwrap();
    static ref LANE_SUFFIX_RE: Regex = Regex::new(r"^(.*)p[12](@\d+)?$").unwrap();
    static ref SAMPLENAME_RE: Regex = Regex::new(r"[ /();&|]+").unwrap();
}

/// Read-group provenance parsed from a repository filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryFilename {
    pub libcode: String,
    pub facility: String,
    pub lanenum: u32,
    pub pipeline: String,
}

fn basename(fname: &str) -> &str {
    fname.rsplit('/').next().unwrap_or(fname)
}

fn strip_last_extension(fname: &str) -> &str {
    let base_start = fname.len() - basename(fname).len();
    match fname[base_start..].rfind('.') {
        Some(idx) => &fname[..base_start + idx],
        None => fname,
    }
}

/// Parses key information out of a repository filename, or None when the
/// name does not follow the convention.
pub fn parse_repository_filename(fname: &str) -> Option<RepositoryFilename> {
    let mut name = basename(fname).to_string();
    if name.ends_with(&format!(".{}", GZ_SUFFIX)) {
        name = strip_last_extension(&name).to_string();
    }
    let caps = REPOSITORY_RE.captures(&name)?;
    let lanenum = caps.get(3)?.as_str().parse::<u32>().ok()?;
    let pipeline = match caps.get(6) {
        Some(ext) => ext.as_str()[1..].to_string(),
        None => "chipseq".to_string(),
    };
    Some(RepositoryFilename {
        libcode: caps.get(1)?.as_str().to_string(),
        facility: caps.get(2)?.as_str().to_string(),
        lanenum,
        pipeline,
    })
}

/// Parses a repository filename, degrading to dummy read-group values
/// with a warning when the name does not match the convention. Never
/// fails.
pub fn repository_or_dummy(fname: &str) -> RepositoryFilename {
    match parse_repository_filename(fname) {
        Some(parsed) => parsed,
        None => {
            warn!(
                "Failed to parse repository filename '{}'; applying dummy read group.",
                fname
            );
            RepositoryFilename {
                libcode: basename(fname).to_string(),
                facility: "Unknown".to_string(),
                lanenum: 0,
                pipeline: "chipseq".to_string(),
            }
        }
    }
}

/// Creates the merged bam basename from a fastq filename: strips the
/// extension and any p1/p2 mate tag. '.bam' is not appended here so the
/// merge tooling can add it.
pub fn make_bam_name_without_extension(fqname: &str) -> String {
    let base = strip_last_extension(fqname);
    match LANE_SUFFIX_RE.captures(base) {
        Some(caps) => {
            let mut name = caps.get(1).map_or("", |m| m.as_str()).to_string();
            if let Some(tag) = caps.get(2) {
                name.push_str(tag.as_str());
            }
            name
        }
        None => base.to_string(),
    }
}

/// Removes characters that would be problematic in bam read groups or
/// file names.
pub fn sanitize_samplename(samplename: &str) -> String {
    SAMPLENAME_RE.replace_all(samplename, "_").into_owned()
}

pub enum FastqReader {
    Uncompressed(BufReader<File>),
    Gzipped(GzDecoder<File>),
}

impl Read for FastqReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            FastqReader::Uncompressed(r) => r.read(buf),
            FastqReader::Gzipped(r) => r.read(buf),
        }
    }
}

pub fn fastq_reader(path: &Path) -> Result<Reader<FastqReader>, PipelineError> {
    if is_bzipped(path)? {
        return Err(PipelineError::InvalidArgument(format!(
            "Bzipped fastq not supported for in-process reading: {}",
            path.display()
        )));
    }
    let file = File::open(path)?;
    let reader = if is_gzipped(path)? {
        Reader::new(FastqReader::Gzipped(GzDecoder::new(file)))
    } else {
        Reader::new(FastqReader::Uncompressed(BufReader::new(file)))
    };
    Ok(reader)
}

/// Guesses the read length from the first record of the fastq file,
/// assuming it is representative.
pub fn determine_read_length(path: &Path) -> Result<usize, PipelineError> {
    let mut reader = fastq_reader(path)?;
    match reader.next() {
        Some(record) => {
            let record =
                record.map_err(|e| anyhow::anyhow!("Invalid fastq {}: {}", path.display(), e))?;
            use seq_io::fastq::Record;
            Ok(record.seq().len())
        }
        None => Err(PipelineError::InvalidArgument(format!(
            "Empty fastq file: {}",
            path.display()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_repository_filename() {
        let parsed = parse_repository_filename("do123_mm10_CRI01p1.fq").unwrap();
        assert_eq!(parsed.libcode, "do123");
        assert_eq!(parsed.facility, "CRI");
        assert_eq!(parsed.lanenum, 1);
        assert_eq!(parsed.pipeline, "chipseq");
    }

    #[test]
    fn test_parse_repository_filename_gz_and_dirs() {
        let parsed = parse_repository_filename("/data/in/do500_hg38_SAN02p2.fq.gz").unwrap();
        assert_eq!(parsed.libcode, "do500");
        assert_eq!(parsed.facility, "SAN");
        assert_eq!(parsed.lanenum, 2);
    }

    #[test]
    fn test_parse_miss_returns_dummy() {
        assert!(parse_repository_filename("random_name.fq").is_none());
        let dummy = repository_or_dummy("random_name.fq");
        assert_eq!(dummy.facility, "Unknown");
        assert_eq!(dummy.lanenum, 0);
        assert_eq!(dummy.libcode, "random_name.fq");
    }

    #[test]
    fn test_make_bam_name_strips_mate_tag() {
        assert_eq!(
            make_bam_name_without_extension("do123_mm10_CRI01p1.fq"),
            "do123_mm10_CRI01"
        );
        assert_eq!(
            make_bam_name_without_extension("do123_mm10_CRI01p2@5.fq"),
            "do123_mm10_CRI01@5"
        );
        assert_eq!(
            make_bam_name_without_extension("do123_mm10_CRI01.fq"),
            "do123_mm10_CRI01"
        );
    }

    #[test]
    fn test_sanitize_samplename() {
        assert_eq!(sanitize_samplename("liver (rep 2)"), "liver_rep_2_");
        assert_eq!(sanitize_samplename("ok_name"), "ok_name");
    }

    #[test]
    fn test_determine_read_length() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let fq = dir.path().join("reads.fq");
        let mut file = std::fs::File::create(&fq)?;
        writeln!(file, "@r1\nACGTACGT\n+\nIIIIIIII")?;
        assert_eq!(determine_read_length(&fq)?, 8);
        Ok(())
    }
}
