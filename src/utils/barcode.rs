//! Demultiplexed output discovery and per-sample reconciliation.
//!
//! Demultiplexers emit one of two shapes: one file per kit+barcode pair
//! (`SQK-RBK114-24_barcode02.fastq`), or one directory per barcode holding
//! run fragments (`barcode03/*.fastq`). Both are reduced to `BarcodeUnit`s
//! and treated identically afterwards.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use lazy_static::lazy_static;
use log::{debug, info};
use regex::Regex;

use crate::config::defs::{PipelineError, Stage};
use crate::utils::file::{
    concatenate_files, is_safe_sample_name, is_sequence_file, sample_name_from_path, sorted_dir_entries,
};

lazy_static! {
    static ref BARCODE_TOKEN: Regex = Regex::new(r"(?i)barcode0*([0-9]+)").unwrap();
    static ref BARCODE_DECLARATION: Regex = Regex::new(r"(?i)^(?:barcode|bc)?0*([0-9]+)$").unwrap();
}

const UNCLASSIFIED_TOKENS: &[&str] = &["none", "unclassified"];


/// Reads a declared barcode such as `barcode02`, `BC2` or `02` as its number.
pub fn parse_barcode_id(token: &str) -> Option<u32> {
    let caps = BARCODE_DECLARATION.captures(token.trim())?;
    caps.get(1)?.as_str().parse().ok()
}

/// Barcode number embedded in a demultiplexed file or directory name.
fn barcode_in_name(name: &str) -> Option<u32> {
    let caps = BARCODE_TOKEN.captures(name)?;
    caps.get(1)?.as_str().parse().ok()
}

fn is_unclassified_name(path: &Path) -> bool {
    let stem = sample_name_from_path(path).unwrap_or_default().to_ascii_lowercase();
    stem.split(['_', '.', '-'])
        .any(|token| UNCLASSIFIED_TOKENS.contains(&token))
}


/// Declared sample name to barcode id, in declaration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleBarcodeMap {
    entries: Vec<(String, u32)>,
}

impl SampleBarcodeMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses `name=barcodeNN` declarations.
    pub fn from_declarations<S: AsRef<str>>(declarations: &[S]) -> Result<Self, PipelineError> {
        let mut map = SampleBarcodeMap::new();
        for declaration in declarations {
            let declaration = declaration.as_ref().trim();
            let (sample, barcode) = declaration
                .split_once('=')
                .ok_or_else(|| PipelineError::InvalidBarcode(declaration.to_string()))?;
            let barcode = parse_barcode_id(barcode)
                .ok_or_else(|| PipelineError::InvalidBarcode(declaration.to_string()))?;
            map.insert(sample.trim(), barcode)?;
        }
        Ok(map)
    }

    /// Sample names must be unique and usable as a file name, and a barcode
    /// may back only one sample.
    pub fn insert(&mut self, sample: &str, barcode: u32) -> Result<(), PipelineError> {
        if !is_safe_sample_name(sample) {
            return Err(PipelineError::InvalidBarcode(format!(
                "sample name '{}' must be non-empty and use only letters, digits, '.', '_' or '-'",
                sample
            )));
        }
        if self.entries.iter().any(|(name, _)| name == sample) {
            return Err(PipelineError::InvalidBarcode(format!("sample name '{}' is declared twice", sample)));
        }
        if let Some((first, _)) = self.entries.iter().find(|(_, id)| *id == barcode) {
            return Err(PipelineError::ReusedBarcode {
                barcode,
                first: first.clone(),
                second: sample.to_string(),
            });
        }
        self.entries.push((sample.to_string(), barcode));
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.entries.iter().map(|(name, id)| (name.as_str(), *id))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}


#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket {
    Main,
    /// Reads that matched the barcode but failed stricter classification.
    Unclassified,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UnitSource {
    File(PathBuf),
    Directory { dir: PathBuf, fragments: Vec<PathBuf> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct BarcodeUnit {
    pub barcode: u32,
    pub bucket: Bucket,
    pub source: UnitSource,
}

impl BarcodeUnit {
    pub fn parts(&self) -> Vec<PathBuf> {
        match &self.source {
            UnitSource::File(path) => vec![path.clone()],
            UnitSource::Directory { fragments, .. } => fragments.clone(),
        }
    }
}


/// Lists the barcode units under a demultiplexing output directory, in
/// sorted listing order. Entries without a barcode in their name, such as the
/// run-wide `unclassified` output, are skipped.
///
/// # Arguments
///
/// * `demux_dir` - Directory the demultiplexer wrote into.
///
/// # Returns
/// Discovered units; a barcode directory yields one unit per bucket it holds.
pub fn discover_units(demux_dir: &Path) -> Result<Vec<BarcodeUnit>, PipelineError> {
    let mut units = Vec::new();
    for entry in sorted_dir_entries(demux_dir)? {
        let name = entry
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let Some(barcode) = barcode_in_name(&name) else {
            debug!("Skipping demultiplexed entry without barcode: {}", entry.display());
            continue;
        };

        if entry.is_dir() {
            let (mut main, mut unclassified) = (Vec::new(), Vec::new());
            for fragment in sorted_dir_entries(&entry)? {
                if !fragment.is_file() || !is_sequence_file(&fragment) {
                    continue;
                }
                if is_unclassified_name(&fragment) {
                    unclassified.push(fragment);
                } else {
                    main.push(fragment);
                }
            }
            for (bucket, fragments) in [(Bucket::Main, main), (Bucket::Unclassified, unclassified)] {
                if !fragments.is_empty() {
                    units.push(BarcodeUnit {
                        barcode,
                        bucket,
                        source: UnitSource::Directory { dir: entry.clone(), fragments },
                    });
                }
            }
        } else if entry.is_file() && is_sequence_file(&entry) {
            let bucket = if is_unclassified_name(&entry) { Bucket::Unclassified } else { Bucket::Main };
            units.push(BarcodeUnit { barcode, bucket, source: UnitSource::File(entry) });
        }
    }
    debug!("Discovered {} barcode units in {}", units.len(), demux_dir.display());
    Ok(units)
}


/// Groups barcode units into one file per declared sample.
///
/// Every declared barcode is checked before anything is written; a barcode
/// with no discovered unit fails the whole reconciliation. Source files are
/// left in place.
///
/// # Arguments
///
/// * `units` - Units from `discover_units`, in discovery order.
/// * `map` - Declared sample to barcode map.
/// * `output_for` - Destination path for a sample's consolidated file.
///
/// # Returns
/// Sample name to consolidated file.
pub fn reconcile<F>(
    units: &[BarcodeUnit],
    map: &SampleBarcodeMap,
    output_for: F,
) -> Result<BTreeMap<String, PathBuf>, PipelineError>
where
    F: Fn(&str) -> PathBuf,
{
    let mut plan: Vec<(&str, Vec<PathBuf>)> = Vec::with_capacity(map.len());
    for (sample, barcode) in map.iter() {
        let parts: Vec<PathBuf> = units
            .iter()
            .filter(|unit| unit.barcode == barcode)
            .flat_map(|unit| unit.parts())
            .collect();
        if parts.is_empty() {
            return Err(PipelineError::BarcodeNotFound {
                stage: Stage::Basecalling,
                sample: sample.to_string(),
                barcode,
            });
        }
        plan.push((sample, parts));
    }

    let mut reconciled = BTreeMap::new();
    for (sample, parts) in plan {
        let out = output_for(sample);
        let bytes = concatenate_files(&parts, &out)?;
        info!("Reconciled {} part(s) into {} for sample {} ({} bytes)", parts.len(), out.display(), sample, bytes);
        reconciled.insert(sample.to_string(), out);
    }
    Ok(reconciled)
}
