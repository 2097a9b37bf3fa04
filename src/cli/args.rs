use clap::{Parser, ValueEnum};

use crate::config::defs::{DEFAULT_BLAST_TASK, DEFAULT_EVALUE, DEFAULT_MAX_TARGET_SEQS, DEFAULT_PERC_IDENTITY, DEFAULT_QCOV_HSP_PERC};

#[derive(Debug, Clone, Copy, ValueEnum, Default, PartialEq)]
pub enum InputKind {
    /// Directory of raw signal files; basecalled by this pipeline.
    #[default]
    Pod5,
    /// Already basecalled FASTQ/FASTA file, or a directory of them.
    File,
}

#[derive(Parser, Debug, Clone, Default)]
#[command(name = "nanotax-pipelines", version, about = "Long-read host removal, classification and BLAST search")]
pub struct Arguments {

    #[arg(short = 'v', long = "verbose", action)]
    pub verbose: bool,

    #[arg(short = 'i', long = "input", help = "pod5 directory, or a basecalled FASTQ/FASTA file or directory")]
    pub input: String,

    #[arg(long = "input-kind", default_value = "pod5", value_enum)]
    pub input_kind: InputKind,

    #[arg(short = 'o', long = "out", help = "Output directory for all generated files. If not specified, a directory named '<experiment>_YYYYMMDD' will be created in the current working directory.")]
    pub out_dir: Option<String>,

    #[arg(long, help = "Settings record for a pod5 run (defaults to <input>/run_settings.txt)")]
    pub settings: Option<String>,

    #[arg(long, default_value_t = 64)]
    pub threads: usize,

    #[arg(long, default_value = "hac", help = "Basecalling model name or path")]
    pub model: String,

    #[arg(long, help = "Barcoding kit; overrides the kit in the settings record")]
    pub kit: Option<String>,

    #[arg(long, default_value_t = false, help = "Treat the run as multiplexed even if the settings record does not say so")]
    pub barcoded: bool,

    #[arg(
        long,
        value_delimiter = ',',
        help = "Sample to barcode map, e.g. sampleA=barcode02,sampleB=barcode03"
    )]
    pub barcodes: Vec<String>,

    #[arg(long, default_value_t = false, help = "Skip reads rejected by adaptive sampling when basecalling")]
    pub exclude_adaptive: bool,

    #[arg(short = 'q', long = "quality", default_value_t = 10)]
    pub quality: u8,

    #[arg(long, default_value_t = false)]
    pub remove_host: bool,

    #[arg(short = 'a', long)]
    pub host_reference: Option<String>,

    #[arg(long, default_value_t = false)]
    pub remove_human: bool,

    #[arg(long)]
    pub human_reference: Option<String>,

    #[arg(short = 'k', long = "kdb", help = "Kraken2 database classifying reads left after human removal")]
    pub kraken_db: Option<String>,

    #[arg(short = 'd', long = "blast-db")]
    pub blast_db: String,

    #[arg(long, default_value = DEFAULT_BLAST_TASK)]
    pub task: String,

    #[arg(long, default_value_t = DEFAULT_EVALUE)]
    pub evalue: f64,

    #[arg(long, default_value_t = DEFAULT_MAX_TARGET_SEQS)]
    pub max_target_seqs: u32,

    #[arg(long, default_value_t = DEFAULT_PERC_IDENTITY)]
    pub perc_identity: f64,

    #[arg(long, default_value_t = DEFAULT_QCOV_HSP_PERC)]
    pub qcov_hsp_perc: f64,

    #[arg(
        long = "taxid-filter",
        help = "Restrict or exclude taxids in the search, e.g. 'restrict 620,561' or 'exclude 9606'"
    )]
    pub taxid_filter: Option<String>,

    #[arg(
        long = "extract-taxids",
        value_delimiter = ',',
        help = "After classification, write the reads assigned to these taxids (comma-separated)"
    )]
    pub extract_taxids: Vec<u32>,

    #[arg(long, help = "Also extract reads assigned below the given taxids")]
    pub include_children: bool,

    #[arg(long, help = "Also extract reads assigned above the given taxids")]
    pub include_parents: bool,

    #[arg(long = "extract-exclude", help = "Extract every read NOT assigned to the selected taxids")]
    pub extract_exclude: bool,

    #[arg(long = "extract-fastq", help = "Write extracted reads as FASTQ instead of FASTA")]
    pub extract_fastq: bool,
}
