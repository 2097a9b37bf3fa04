//! Splits a pod5 read summary into reads to basecall and reads that adaptive
//! sampling rejected.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use log::info;

use crate::config::defs::{PipelineError, ADAPTIVE_END_REASON};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReadIdSplit {
    pub basecall: usize,
    pub adaptive: usize,
}

fn write_ids(path: &Path, ids: &[String]) -> Result<(), PipelineError> {
    let mut writer = BufWriter::new(File::create(path)?);
    for id in ids {
        writeln!(writer, "{}", id)?;
    }
    writer.flush()?;
    Ok(())
}

/// Reads a tab-separated `pod5 view` table with `read_id` and `end_reason`
/// columns. A list file is only written when it has at least one id.
///
/// # Arguments
///
/// * `summary` - Table written by `pod5 view`.
/// * `basecall_out` - Destination for ids to basecall.
/// * `adaptive_out` - Destination for ids rejected by adaptive sampling.
///
/// # Returns
/// How many ids went to each list.
pub fn split_read_ids(summary: &Path, basecall_out: &Path, adaptive_out: &Path) -> Result<ReadIdSplit, PipelineError> {
    let mut lines = BufReader::new(File::open(summary)?).lines();
    let header = lines
        .next()
        .transpose()?
        .ok_or_else(|| PipelineError::IOError(format!("{} is empty", summary.display())))?;
    let columns: Vec<&str> = header.split('\t').map(str::trim).collect();
    let column = |name: &str| {
        columns.iter().position(|c| *c == name).ok_or_else(|| {
            PipelineError::IOError(format!(
                "'{}' column not found in {}; available: {:?}",
                name,
                summary.display(),
                columns
            ))
        })
    };
    let read_id_col = column("read_id")?;
    let end_reason_col = column("end_reason")?;

    let (mut basecall, mut adaptive) = (Vec::new(), Vec::new());
    for line in lines {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        let (Some(read_id), Some(end_reason)) = (fields.get(read_id_col), fields.get(end_reason_col)) else {
            return Err(PipelineError::IOError(format!("Short row in {}: '{}'", summary.display(), line)));
        };
        if end_reason.trim() == ADAPTIVE_END_REASON {
            adaptive.push(read_id.trim().to_string());
        } else {
            basecall.push(read_id.trim().to_string());
        }
    }

    if !basecall.is_empty() {
        write_ids(basecall_out, &basecall)?;
        info!("Read ids to be basecalled saved to {}", basecall_out.display());
    }
    if !adaptive.is_empty() {
        write_ids(adaptive_out, &adaptive)?;
        info!("Adaptive sampling read ids saved to {}", adaptive_out.display());
    }
    Ok(ReadIdSplit { basecall: basecall.len(), adaptive: adaptive.len() })
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_split_read_ids() -> Result<(), PipelineError> {
        let dir = tempdir()?;
        let summary = dir.path().join("summary.tsv");
        fs::write(
            &summary,
            "read_id\t end_reason \nr1\tsignal_positive\nr2\tdata_service_unblock_mux_change\nr3\tunblock_mux_change\n",
        )?;
        let (keep, adaptive) = (dir.path().join("keep.txt"), dir.path().join("adaptive.txt"));
        let split = split_read_ids(&summary, &keep, &adaptive)?;
        assert_eq!(split, ReadIdSplit { basecall: 2, adaptive: 1 });
        assert_eq!(fs::read_to_string(&keep)?, "r1\nr3\n");
        assert_eq!(fs::read_to_string(&adaptive)?, "r2\n");
        Ok(())
    }

    #[test]
    fn test_no_adaptive_reads_writes_no_list() -> Result<(), PipelineError> {
        let dir = tempdir()?;
        let summary = dir.path().join("summary.tsv");
        fs::write(&summary, "read_id\tend_reason\nr1\tsignal_positive\n")?;
        let adaptive = dir.path().join("adaptive.txt");
        split_read_ids(&summary, &dir.path().join("keep.txt"), &adaptive)?;
        assert!(!adaptive.exists());
        Ok(())
    }

    #[test]
    fn test_missing_column_is_error() -> Result<(), PipelineError> {
        let dir = tempdir()?;
        let summary = dir.path().join("summary.tsv");
        fs::write(&summary, "read_id\tchannel\nr1\t5\n")?;
        let result = split_read_ids(&summary, &dir.path().join("a"), &dir.path().join("b"));
        assert!(matches!(result, Err(PipelineError::IOError(_))));
        Ok(())
    }
}
