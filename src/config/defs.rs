use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use lazy_static::lazy_static;
use thiserror::Error;

use crate::cli::InputKind;
use crate::config::settings::RunSettings;
use crate::utils::barcode::SampleBarcodeMap;
use crate::utils::taxonomy::{TaxonomicFilter, Taxid};

// External software
pub const GZIP_EXT: &str = "gz";
pub const DORADO_TAG: &str = "dorado";
pub const POD5_TAG: &str = "pod5";
pub const CHOPPER_TAG: &str = "chopper";
pub const SEQKIT_TAG: &str = "seqkit";
pub const MINIMAP2_TAG: &str = "minimap2";
pub const SAMTOOLS_TAG: &str = "samtools";
pub const KRAKEN2_TAG: &str = "kraken2";
pub const BLASTN_TAG: &str = "blastn";


lazy_static! {
    /// Oldest (major, minor) release of each tool known to work.
    pub static ref TOOL_VERSIONS: HashMap<&'static str, (u32, u32)> = {
        let mut m = HashMap::new();
        m.insert(SAMTOOLS_TAG, (1, 20));
        m.insert(MINIMAP2_TAG, (2, 24));
        m.insert(KRAKEN2_TAG, (2, 1));
        m.insert(SEQKIT_TAG, (2, 10));
        m.insert(CHOPPER_TAG, (0, 7));
        m.insert(DORADO_TAG, (0, 7));
        m.insert(POD5_TAG, (0, 3));
        m.insert(BLASTN_TAG, (2, 14));

        m
    };
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DoradoSubcommand {
    Basecaller,
    Demux,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SamtoolsSubcommand {
    Fastq,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SeqkitSubcommand {
    Stats,
}

// Directory layout
pub const BASECALL_DIR: &str = "basecall";
pub const DEMUX_DIR: &str = "demux";
pub const ANALYSIS_DIR: &str = "analysis";
pub const HOST_DIR: &str = "host";
pub const HUMAN_DIR: &str = "human";
pub const KRAKEN2_DIR: &str = "kraken2";
pub const BLAST_DIR: &str = "blast";

// Static filenames and suffixes
pub const SETTINGS_FILE: &str = "run_settings.txt";
pub const MULTIPLEXED_CALLS_FILE: &str = "calls.fastq";
pub const POD5_SUMMARY_FILE: &str = "pod5_summary.tsv";
pub const READ_IDS_FILE: &str = "read_ids.txt";
pub const ADAPTIVE_READ_IDS_FILE: &str = "adaptive_read_ids.txt";
pub const BASECALLED_SUFFIX: &str = "_basecalled.fastq";
pub const TRIM_STATS_SUFFIX: &str = "_stats.tsv";
pub const HOST_SAM_SUFFIX: &str = "_host.sam";
pub const NOT_HOST_SUFFIX: &str = "_notHost.fastq";
pub const HUMAN_SAM_SUFFIX: &str = "_human.sam";
pub const NOT_HUMAN_SUFFIX: &str = "_notHuman.fastq";
pub const K2_REPORT_EXT: &str = "k2report";
pub const K2_OUTPUT_EXT: &str = "k2";
pub const K2_UNCLASSIFIED_EXT: &str = "k2unc";
pub const KRAKEN2_DB_FILES: &[&str] = &["hash.k2d", "opts.k2d", "taxo.k2d"];
pub const BLAST_SUFFIX: &str = "_blast.tsv";
pub const EXTRACT_SUFFIX: &str = "extract";

pub const ADAPTIVE_END_REASON: &str = "data_service_unblock_mux_change";

pub const FASTA_TAG : &str = "fasta";
pub const FASTQ_TAG : &str = "fastq";
pub const FASTA_EXTS: &[&'static str] = &["fasta", "fa", "fna", "ffn", "frn"];
pub const FASTQ_EXTS: &[&'static str] = &["fastq", "fq"];

// Search defaults
pub const DEFAULT_BLAST_TASK: &str = "megablast";
pub const DEFAULT_EVALUE: f64 = 1e-5;
pub const DEFAULT_MAX_TARGET_SEQS: u32 = 5;
pub const DEFAULT_PERC_IDENTITY: f64 = 90.0;
pub const DEFAULT_QCOV_HSP_PERC: f64 = 50.0;


/// Pipeline stages, in execution order, plus the two terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    Init,
    Basecalling,
    HostFiltering,
    HumanFiltering,
    FormatConversion,
    Searching,
    Done,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            Stage::Init => "init",
            Stage::Basecalling => "basecalling",
            Stage::HostFiltering => "host_filtering",
            Stage::HumanFiltering => "human_filtering",
            Stage::FormatConversion => "format_conversion",
            Stage::Searching => "searching",
            Stage::Done => "done",
            Stage::Failed => "failed",
        };
        write!(f, "{}", tag)
    }
}

/// Which stage produced an artifact. Ordered from least to most refined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StageKind {
    Raw,
    HostFiltered,
    HumanFiltered,
    Classified,
    Converted,
    Searched,
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            StageKind::Raw => "raw",
            StageKind::HostFiltered => "host-filtered",
            StageKind::HumanFiltered => "human-filtered",
            StageKind::Classified => "classified",
            StageKind::Converted => "converted",
            StageKind::Searched => "searched",
        };
        write!(f, "{}", tag)
    }
}


#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Settings record {path}: missing required field '{field}'")]
    MissingSetting { path: String, field: String },

    #[error("[{stage}] unrecognized sequence format in {path}: first byte {marker:?}")]
    UnknownSequenceFormat { stage: Stage, path: String, marker: Option<char> },

    #[error("Invalid taxonomic filter '{answer}': {reason}")]
    InvalidTaxonomicFilter { answer: String, reason: String },

    #[error("Barcode {barcode} is declared for more than one sample ({first}, {second})")]
    ReusedBarcode { barcode: u32, first: String, second: String },

    #[error("Invalid barcode declaration '{0}'")]
    InvalidBarcode(String),

    #[error("[{stage}] no demultiplexed output found for barcode {barcode} (sample {sample})")]
    BarcodeNotFound { stage: Stage, sample: String, barcode: u32 },

    #[error("[{stage}] no input artifact found for sample {sample}; tried {tried:?}")]
    ArtifactNotFound { stage: Stage, sample: String, tried: Vec<PathBuf> },

    #[error("Tool execution failed: {tool}: {error}")]
    ToolExecution { tool: String, error: String },

    #[error("[{stage}] sample {sample}: {path} holds no reads")]
    EmptyArtifact { stage: Stage, sample: String, path: String },

    #[error("[{stage}] no samples left to process")]
    NoSamplesRemaining { stage: Stage },

    #[error("IO error: {0}")]
    IOError(String),

    #[error("Failed to clean scratch directory {path}: {error}")]
    ScratchCleanup { path: String, error: String },
}

impl From<std::io::Error> for PipelineError {
    fn from(e: std::io::Error) -> Self {
        PipelineError::IOError(e.to_string())
    }
}


/// Which optional stages this run performs.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EnabledStages {
    pub host_removal: bool,
    pub human_removal: bool,
    pub classification: bool,
    pub barcoded: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BasecallParams {
    pub model: String,
    pub kit: Option<String>,
    pub exclude_adaptive: bool,
    pub min_quality: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchParams {
    pub db: PathBuf,
    pub task: String,
    pub evalue: f64,
    pub max_target_seqs: u32,
    pub perc_identity: f64,
    pub qcov_hsp_perc: f64,
}

/// Reads to pull out of the classifier output by taxid.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractParams {
    pub taxids: Vec<Taxid>,
    /// Also take reads assigned anywhere below a requested taxon.
    pub include_children: bool,
    /// Also take reads assigned to the taxa above a requested taxon.
    pub include_parents: bool,
    /// Take every read whose taxid is NOT selected.
    pub exclude: bool,
    pub fastq_output: bool,
}

/// Immutable snapshot of one run. Built once, then shared read-only.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub input_kind: InputKind,
    pub input: PathBuf,
    pub out_dir: PathBuf,
    pub ram_temp_dir: PathBuf,
    pub threads: usize,
    pub stages: EnabledStages,
    pub host_reference: Option<PathBuf>,
    pub human_reference: Option<PathBuf>,
    pub kraken_db: Option<PathBuf>,
    pub basecall: BasecallParams,
    pub search: SearchParams,
    pub taxonomic_filter: TaxonomicFilter,
    pub extract: Option<ExtractParams>,
    pub barcode_map: Option<SampleBarcodeMap>,
    pub settings: Option<RunSettings>,
}

impl PipelineConfig {
    /// Host removal only applies to reads this pipeline basecalled itself.
    pub fn host_filtering_runs(&self) -> bool {
        self.stages.host_removal && self.input_kind == InputKind::Pod5
    }

    pub fn human_filtering_runs(&self) -> bool {
        self.stages.human_removal
    }

    pub fn classification_runs(&self) -> bool {
        self.stages.human_removal && self.stages.classification
    }
}
