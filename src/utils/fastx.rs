use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::Path;

use seq_io::fastq::{Reader as FastqReader, Record};

use crate::config::defs::{PipelineError, Stage, FASTA_TAG, FASTQ_TAG};
use crate::utils::file::open_maybe_gzipped;

/// Line-oriented sequence formats told apart by their leading marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceFormat {
    Fasta,
    Fastq,
}

impl SequenceFormat {
    pub fn from_marker(marker: u8) -> Option<Self> {
        match marker {
            b'>' => Some(SequenceFormat::Fasta),
            b'@' => Some(SequenceFormat::Fastq),
            _ => None,
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            SequenceFormat::Fasta => FASTA_TAG,
            SequenceFormat::Fastq => FASTQ_TAG,
        }
    }
}


/// Inspects the first record of a (possibly gzipped) file.
///
/// # Arguments
///
/// * `path` - Sequence file to inspect.
///
/// # Returns
/// `Ok(None)` for a file with no records, the format for a known marker, and
/// `UnknownSequenceFormat` otherwise.
pub fn sniff_format(path: &Path) -> Result<Option<SequenceFormat>, PipelineError> {
    let mut reader = open_maybe_gzipped(path)?;
    let mut byte = [0u8; 1];
    loop {
        match reader.read(&mut byte) {
            Ok(0) => return Ok(None),
            Ok(_) if byte[0].is_ascii_whitespace() => continue,
            Ok(_) => break,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    SequenceFormat::from_marker(byte[0]).map(Some).ok_or_else(|| {
        PipelineError::UnknownSequenceFormat {
            stage: Stage::FormatConversion,
            path: path.display().to_string(),
            marker: Some(byte[0] as char),
        }
    })
}


/// Rewrites FASTQ records as FASTA.
///
/// # Arguments
///
/// * `input` - FASTQ file, gzipped or not.
/// * `output` - FASTA destination.
///
/// # Returns
/// Number of records converted.
pub fn fastq_to_fasta(input: &Path, output: &Path) -> Result<u64, PipelineError> {
    let mut reader = FastqReader::new(open_maybe_gzipped(input)?);
    let mut writer = BufWriter::new(File::create(output)?);
    let mut count = 0u64;
    while let Some(record) = reader.next() {
        let record = record.map_err(|e| {
            PipelineError::IOError(format!("Invalid FASTQ record in {}: {}", input.display(), e))
        })?;
        let head = String::from_utf8_lossy(record.head());
        let (id, desc) = match head.split_once(char::is_whitespace) {
            Some((id, desc)) if !desc.trim().is_empty() => (id, Some(desc.trim())),
            Some((id, _)) => (id, None),
            None => (&*head, None),
        };
        write_fasta_record(&mut writer, id, desc, record.seq())?;
        count += 1;
    }
    writer.flush()?;
    Ok(count)
}

pub fn write_fasta_record<W: Write>(
    writer: &mut W,
    id: &str,
    desc: Option<&str>,
    seq: &[u8],
) -> io::Result<()> {
    // Write header
    writer.write_all(b">")?;
    writer.write_all(id.as_bytes())?;
    if let Some(desc) = desc {
        writer.write_all(b" ")?;
        writer.write_all(desc.as_bytes())?;
    }
    writer.write_all(b"\n")?;

    // Write sequence (with line wrapping, e.g., 80 chars per line)
    for chunk in seq.chunks(80) {
        writer.write_all(chunk)?;
        writer.write_all(b"\n")?;
    }
    Ok(())
}
