// BLAST-related file functions and structures
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{anyhow, Result};

use crate::utils::file::prepend_line;

/// `-outfmt 6` fields requested from blastn, in output order.
pub const BLAST_OUTFMT_FIELDS: &[&str] = &[
    "qseqid", "sseqid", "sscinames", "scomnames", "qstart", "qend", "sstart", "send",
    "mismatch", "gaps", "gapopen", "length", "pident", "qcovs", "qcovhsp", "qcovus",
    "evalue", "bitscore",
];

/// Header written above the hit table; one name per requested field.
pub const BLAST_HEADER_COLUMNS: &[&str] = &[
    "query-id", "subject-id", "scientific-name", "common-name", "query-start", "query-end",
    "subject-start", "subject-end", "mismatches", "gaps", "gap-openings", "alignment-length",
    "percent-identity", "query-coverage-percent", "query-coverage-per-hsp",
    "query-coverage-unique-subject", "e-value", "bit-score",
];

pub fn outfmt_arg() -> String {
    format!("6 {}", BLAST_OUTFMT_FIELDS.join(" "))
}

pub fn header_line() -> String {
    BLAST_HEADER_COLUMNS.join("\t")
}

pub fn add_header(table: &Path) -> std::io::Result<()> {
    prepend_line(table, &header_line())
}


/// Single annotated hit line
#[derive(Debug, Clone)]
pub struct BlastHit {
    pub qseqid: String,
    pub sseqid: String,
    pub sscinames: String,
    pub scomnames: String,
    pub qstart: u64,
    pub qend: u64,
    pub sstart: u64,
    pub send: u64,
    pub mismatch: u64,
    pub gaps: u64,
    pub gapopen: u64,
    pub length: u64,
    pub pident: f64,
    pub qcovs: f64,
    pub qcovhsp: f64,
    pub qcovus: f64,
    pub evalue: f64,
    pub bitscore: f64,
}

impl BlastHit {
    pub fn parse_line(line: &str) -> Result<Self> {
        let mut fields = line.split('\t');
        macro_rules! next {
            () => {
                fields.next().ok_or_else(|| anyhow!("missing field in '{}'", line))?
            };
        }
        Ok(Self {
            qseqid: next!().to_string(),
            sseqid: next!().to_string(),
            sscinames: next!().to_string(),
            scomnames: next!().to_string(),
            qstart: next!().parse()?,
            qend: next!().parse()?,
            sstart: next!().parse()?,
            send: next!().parse()?,
            mismatch: next!().parse()?,
            gaps: next!().parse()?,
            gapopen: next!().parse()?,
            length: next!().parse()?,
            pident: next!().parse()?,
            qcovs: next!().parse()?,
            qcovhsp: next!().parse()?,
            qcovus: next!().parse()?,
            evalue: next!().parse()?,
            bitscore: next!().parse()?,
        })
    }
}

/// Reads a headed hit table back, skipping the header line.
pub fn read_hits(table: &Path) -> Result<Vec<BlastHit>> {
    let reader = BufReader::new(File::open(table)?);
    let mut hits = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.is_empty() || line == header_line() {
            continue;
        }
        hits.push(BlastHit::parse_line(&line)?);
    }
    Ok(hits)
}
