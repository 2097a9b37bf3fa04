//! Builds the immutable `PipelineConfig` from command-line arguments and the
//! persisted run settings record.

use std::path::{Path, PathBuf};

use chrono::Local;
use log::{info, warn};

use crate::cli::{Arguments, InputKind};
use crate::config::defs::{
    BasecallParams, EnabledStages, ExtractParams, PipelineConfig, PipelineError, SearchParams, SETTINGS_FILE,
};
use crate::config::settings::RunSettings;
use crate::utils::barcode::SampleBarcodeMap;
use crate::utils::file::sample_name_from_path;
use crate::utils::taxonomy::TaxonomicFilter;

fn absolute(path: &str, cwd: &Path) -> PathBuf {
    let path = PathBuf::from(path);
    if path.is_absolute() { path } else { cwd.join(path) }
}

fn required_path(value: &Option<String>, flag: &str, reason: &str, cwd: &Path) -> Result<PathBuf, PipelineError> {
    let path = value
        .as_deref()
        .map(|v| absolute(v, cwd))
        .ok_or_else(|| PipelineError::InvalidConfig(format!("{} requires {}", reason, flag)))?;
    if !path.exists() {
        return Err(PipelineError::InvalidConfig(format!("{} {} does not exist", flag, path.display())));
    }
    Ok(path)
}

/// Output directory from `--out`, else `<experiment or input stem>_YYYYMMDD`
/// under the working directory.
fn output_dir(args: &Arguments, settings: Option<&RunSettings>, input: &Path, cwd: &Path) -> PathBuf {
    if let Some(out) = &args.out_dir {
        return absolute(out, cwd);
    }
    let dir_base = match settings {
        Some(settings) => settings.experiment.clone(),
        None => {
            info!("No settings record. Using input stem as output directory base.");
            sample_name_from_path(input).unwrap_or_else(|| "nanotax_run".to_string())
        }
    };
    let timestamp = Local::now().format("%Y%m%d").to_string();
    cwd.join(format!("{}_{}", dir_base, timestamp))
}

/// Read extraction only applies to classified runs. Taxids keep first-seen
/// order without duplicates.
fn extract_params(args: &Arguments, classifies: bool) -> Option<ExtractParams> {
    if args.extract_taxids.is_empty() {
        if args.include_children || args.include_parents || args.extract_exclude || args.extract_fastq {
            warn!("Read extraction switches given without --extract-taxids; ignoring");
        }
        return None;
    }
    if !classifies {
        warn!("--extract-taxids needs classification (--kdb with human removal); ignoring");
        return None;
    }
    let mut taxids = Vec::new();
    for taxid in &args.extract_taxids {
        if !taxids.contains(taxid) {
            taxids.push(*taxid);
        }
    }
    Some(ExtractParams {
        taxids,
        include_children: args.include_children,
        include_parents: args.include_parents,
        exclude: args.extract_exclude,
        fastq_output: args.extract_fastq,
    })
}

impl PipelineConfig {
    /// Validates flags and merges them with the settings record. Every
    /// configuration error surfaces here, before any external process runs.
    ///
    /// # Arguments
    ///
    /// * `args` - Parsed command line.
    /// * `cwd` - Base for relative paths.
    /// * `threads` - Threads handed to each external tool.
    /// * `ram_temp_dir` - Root for memory-backed scratch space.
    ///
    /// # Returns
    /// The run's configuration.
    pub fn from_args(
        args: &Arguments,
        cwd: &Path,
        threads: usize,
        ram_temp_dir: PathBuf,
    ) -> Result<Self, PipelineError> {
        let input = absolute(&args.input, cwd);
        if !input.exists() {
            return Err(PipelineError::InvalidConfig(format!("Input {} does not exist", input.display())));
        }
        if args.input_kind == InputKind::Pod5 && !input.is_dir() {
            return Err(PipelineError::InvalidConfig(format!(
                "pod5 input must be a directory of signal files: {}",
                input.display()
            )));
        }

        let settings = match (&args.settings, args.input_kind) {
            (Some(path), _) => Some(RunSettings::load(&absolute(path, cwd))?),
            (None, InputKind::Pod5) => Some(RunSettings::load(&input.join(SETTINGS_FILE))?),
            (None, InputKind::File) => None,
        };

        let taxonomic_filter = TaxonomicFilter::from_answer(args.taxid_filter.as_deref())?;

        let barcoded = args.barcoded || settings.as_ref().is_some_and(|s| s.multiplexed);
        if barcoded && args.input_kind == InputKind::File {
            return Err(PipelineError::InvalidConfig(
                "barcoded runs must start from pod5 input".to_string(),
            ));
        }
        let barcode_map = if barcoded {
            let map = SampleBarcodeMap::from_declarations(&args.barcodes)?;
            if map.is_empty() {
                return Err(PipelineError::InvalidConfig(
                    "barcoded run requires --barcodes sample=barcodeNN,...".to_string(),
                ));
            }
            Some(map)
        } else {
            if !args.barcodes.is_empty() {
                warn!("--barcodes given for a run that is not multiplexed; ignoring");
            }
            None
        };

        let host_reference = if args.remove_host {
            if args.input_kind == InputKind::File {
                warn!("Host removal only runs on reads basecalled by this pipeline; skipping for file input");
            }
            Some(required_path(&args.host_reference, "--host-reference", "host removal", cwd)?)
        } else {
            None
        };
        let human_reference = if args.remove_human {
            Some(required_path(&args.human_reference, "--human-reference", "human removal", cwd)?)
        } else {
            None
        };
        let kraken_db = match &args.kraken_db {
            Some(_) if !args.remove_human => {
                warn!("--kdb only classifies reads after human removal; ignoring");
                None
            }
            Some(_) => Some(required_path(&args.kraken_db, "--kdb", "classification", cwd)?),
            None => None,
        };

        let extract = extract_params(args, kraken_db.is_some());

        if args.evalue <= 0.0 {
            return Err(PipelineError::InvalidConfig(format!("--evalue must be positive, got {}", args.evalue)));
        }
        for (flag, value) in [("--perc-identity", args.perc_identity), ("--qcov-hsp-perc", args.qcov_hsp_perc)] {
            if !(0.0..=100.0).contains(&value) {
                return Err(PipelineError::InvalidConfig(format!("{} must be within 0-100, got {}", flag, value)));
            }
        }
        if args.max_target_seqs == 0 || threads == 0 {
            return Err(PipelineError::InvalidConfig(
                "--max-target-seqs and thread count must be at least 1".to_string(),
            ));
        }
        if args.blast_db.trim().is_empty() {
            return Err(PipelineError::InvalidConfig("--blast-db is required".to_string()));
        }

        let kit = args.kit.clone().or_else(|| settings.as_ref().map(|s| s.kit.clone()));
        let out_dir = output_dir(args, settings.as_ref(), &input, cwd);

        Ok(PipelineConfig {
            input_kind: args.input_kind,
            input,
            out_dir,
            ram_temp_dir,
            threads,
            stages: EnabledStages {
                host_removal: args.remove_host,
                human_removal: args.remove_human,
                classification: kraken_db.is_some(),
                barcoded,
            },
            host_reference,
            human_reference,
            kraken_db,
            basecall: BasecallParams {
                model: args.model.clone(),
                kit,
                exclude_adaptive: args.exclude_adaptive,
                min_quality: args.quality,
            },
            search: SearchParams {
                db: absolute(&args.blast_db, cwd),
                task: args.task.clone(),
                evalue: args.evalue,
                max_target_seqs: args.max_target_seqs,
                perc_identity: args.perc_identity,
                qcov_hsp_perc: args.qcov_hsp_perc,
            },
            taxonomic_filter,
            extract,
            barcode_map,
            settings,
        })
    }
}
