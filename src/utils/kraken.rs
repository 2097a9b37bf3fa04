//! Pulls reads out of a classified sample by taxid, using the kraken2
//! per-read output (`.k2`) and its report (`.k2report`).

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use lazy_static::lazy_static;
use log::{debug, info, warn};
use regex::Regex;

use crate::config::defs::{ExtractParams, PipelineError};
use crate::utils::fastx::{sniff_format, write_fasta_record, SequenceFormat};
use crate::utils::file::open_maybe_gzipped;
use crate::utils::taxonomy::Taxid;

lazy_static! {
    // Taxid column as written with --use-names: "Escherichia coli (taxid 562)"
    static ref NAMED_TAXID: Regex = Regex::new(r"\(taxid ([0-9]+)\)\s*$").unwrap();
}


/// One line of a kraken2 report. The name column is indented two spaces per
/// tree level.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportRow {
    pub clade_reads: u64,
    pub rank: String,
    pub taxid: Taxid,
    pub name: String,
    pub depth: usize,
    pub parent: Option<Taxid>,
}

/// Taxonomy tree rebuilt from report indentation.
#[derive(Debug, Default)]
pub struct KrakenReport {
    rows: Vec<ReportRow>,
    index: HashMap<Taxid, usize>,
    children: HashMap<Taxid, Vec<Taxid>>,
}

impl KrakenReport {
    /// Parses a report, skipping `#` comment lines. Reports with minimizer
    /// columns are read the same way; rank, taxid and name are always the
    /// last three columns.
    pub fn parse(path: &Path) -> Result<Self, PipelineError> {
        let reader = BufReader::new(File::open(path)?);
        let mut report = KrakenReport::default();
        let mut lineage: Vec<(usize, Taxid)> = Vec::new();

        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() || line.starts_with('#') {
                continue;
            }
            let invalid = || {
                PipelineError::IOError(format!(
                    "Invalid kraken2 report line {} in {}: '{}'",
                    line_no + 1,
                    path.display(),
                    line
                ))
            };
            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() < 6 {
                return Err(invalid());
            }
            let n = fields.len();
            let raw_name = fields[n - 1];
            let taxid: Taxid = fields[n - 2].trim().parse().map_err(|_| invalid())?;
            let clade_reads: u64 = fields[1].trim().parse().map_err(|_| invalid())?;
            let depth = (raw_name.len() - raw_name.trim_start_matches(' ').len()) / 2;

            while lineage.last().is_some_and(|(d, _)| *d >= depth) {
                lineage.pop();
            }
            let parent = lineage.last().map(|(_, id)| *id);
            if let Some(parent) = parent {
                report.children.entry(parent).or_default().push(taxid);
            }
            lineage.push((depth, taxid));

            report.index.insert(taxid, report.rows.len());
            report.rows.push(ReportRow {
                clade_reads,
                rank: fields[n - 3].trim().to_string(),
                taxid,
                name: raw_name.trim().to_string(),
                depth,
                parent,
            });
        }
        Ok(report)
    }

    pub fn rows(&self) -> &[ReportRow] {
        &self.rows
    }

    pub fn get(&self, taxid: Taxid) -> Option<&ReportRow> {
        self.index.get(&taxid).map(|&i| &self.rows[i])
    }

    /// Every taxon below `taxid`, depth first.
    pub fn descendants(&self, taxid: Taxid) -> Vec<Taxid> {
        let mut found = Vec::new();
        let mut pending = vec![taxid];
        while let Some(id) = pending.pop() {
            if let Some(children) = self.children.get(&id) {
                for child in children.iter().rev() {
                    found.push(*child);
                    pending.push(*child);
                }
            }
        }
        found
    }

    /// Taxa above `taxid`, nearest first.
    pub fn ancestors(&self, taxid: Taxid) -> Vec<Taxid> {
        let mut found = Vec::new();
        let mut current = self.get(taxid).and_then(|row| row.parent);
        while let Some(id) = current {
            found.push(id);
            current = self.get(id).and_then(|row| row.parent);
        }
        found
    }

    /// Requested taxids widened by the children/parents switches.
    pub fn expand(&self, params: &ExtractParams) -> HashSet<Taxid> {
        let mut selected = HashSet::new();
        for &taxid in &params.taxids {
            selected.insert(taxid);
            if self.get(taxid).is_none() {
                warn!("Taxid {} does not appear in the classification report", taxid);
                continue;
            }
            if params.include_children {
                selected.extend(self.descendants(taxid));
            }
            if params.include_parents {
                selected.extend(self.ancestors(taxid));
            }
        }
        selected
    }
}


fn parse_assigned_taxid(field: &str) -> Option<Taxid> {
    let field = field.trim();
    field
        .parse()
        .ok()
        .or_else(|| NAMED_TAXID.captures(field).and_then(|c| c[1].parse().ok()))
}

/// Read ids from a kraken2 per-read output whose assigned taxid is in
/// `taxids`, or is not in it when `exclude` is set.
pub fn select_read_ids(output: &Path, taxids: &HashSet<Taxid>, exclude: bool) -> Result<HashSet<String>, PipelineError> {
    let reader = BufReader::new(File::open(output)?);
    let mut selected = HashSet::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let mut fields = line.split('\t');
        let (Some(_status), Some(read_id), Some(taxid)) = (fields.next(), fields.next(), fields.next()) else {
            return Err(PipelineError::IOError(format!(
                "Invalid kraken2 output line {} in {}",
                line_no + 1,
                output.display()
            )));
        };
        let taxid = parse_assigned_taxid(taxid).ok_or_else(|| {
            PipelineError::IOError(format!(
                "Invalid taxid '{}' on kraken2 output line {} in {}",
                taxid,
                line_no + 1,
                output.display()
            ))
        })?;
        if taxids.contains(&taxid) != exclude {
            selected.insert(read_id.trim().to_string());
        }
    }
    Ok(selected)
}


fn record_id(head: &[u8]) -> String {
    let head = String::from_utf8_lossy(head);
    head.split_whitespace().next().unwrap_or_default().to_string()
}

/// Copies the records of `input` named in `read_ids` to `output`, as FASTQ
/// when asked and the input has qualities, else as FASTA.
///
/// # Returns
/// Number of records written.
pub fn write_selected_reads(
    input: &Path,
    read_ids: &HashSet<String>,
    output: &Path,
    fastq_output: bool,
) -> Result<u64, PipelineError> {
    let format = sniff_format(input)?;
    if fastq_output && format == Some(SequenceFormat::Fasta) {
        return Err(PipelineError::InvalidConfig(format!(
            "FASTQ extraction needs FASTQ input, {} is FASTA",
            input.display()
        )));
    }
    let mut writer = BufWriter::new(File::create(output)?);
    let mut written = 0u64;
    match format {
        None => {}
        Some(SequenceFormat::Fastq) => {
            use seq_io::fastq::{Reader, Record};
            let mut reader = Reader::new(open_maybe_gzipped(input)?);
            while let Some(record) = reader.next() {
                let record = record.map_err(|e| {
                    PipelineError::IOError(format!("Invalid FASTQ record in {}: {}", input.display(), e))
                })?;
                let id = record_id(record.head());
                if !read_ids.contains(&id) {
                    continue;
                }
                if fastq_output {
                    writer.write_all(b"@")?;
                    writer.write_all(record.head())?;
                    writer.write_all(b"\n")?;
                    writer.write_all(record.seq())?;
                    writer.write_all(b"\n+\n")?;
                    writer.write_all(record.qual())?;
                    writer.write_all(b"\n")?;
                } else {
                    let head = String::from_utf8_lossy(record.head());
                    let desc = head.split_once(char::is_whitespace).map(|(_, d)| d.trim()).filter(|d| !d.is_empty());
                    write_fasta_record(&mut writer, &id, desc, record.seq())?;
                }
                written += 1;
            }
        }
        Some(SequenceFormat::Fasta) => {
            use seq_io::fasta::{Reader, Record};
            let mut reader = Reader::new(open_maybe_gzipped(input)?);
            while let Some(record) = reader.next() {
                let record = record.map_err(|e| {
                    PipelineError::IOError(format!("Invalid FASTA record in {}: {}", input.display(), e))
                })?;
                let id = record_id(record.head());
                if !read_ids.contains(&id) {
                    continue;
                }
                let head = String::from_utf8_lossy(record.head());
                let desc = head.split_once(char::is_whitespace).map(|(_, d)| d.trim()).filter(|d| !d.is_empty());
                write_fasta_record(&mut writer, &id, desc, &record.full_seq())?;
                written += 1;
            }
        }
    }
    writer.flush()?;
    Ok(written)
}


/// Extracts the reads of one classified sample.
///
/// # Arguments
///
/// * `report` - The sample's `.k2report`.
/// * `classifications` - The sample's per-read `.k2` output.
/// * `reads` - The sequence file that was classified.
/// * `output` - Destination FASTA or FASTQ.
/// * `params` - Taxids and selection switches.
///
/// # Returns
/// Number of reads written.
pub fn extract_classified_reads(
    report: &Path,
    classifications: &Path,
    reads: &Path,
    output: &Path,
    params: &ExtractParams,
) -> Result<u64, PipelineError> {
    let report = KrakenReport::parse(report)?;
    let taxids = report.expand(params);
    debug!("Selecting reads for {} taxid(s) (exclude: {})", taxids.len(), params.exclude);
    let read_ids = select_read_ids(classifications, &taxids, params.exclude)?;
    let written = write_selected_reads(reads, &read_ids, output, params.fastq_output)?;
    info!("Extracted {} read(s) to {}", written, output.display());
    Ok(written)
}
