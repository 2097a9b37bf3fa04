//! Artifact naming and input resolution between stages.
//!
//! A stage never checks the filesystem on its own; it asks the resolver for
//! the output of the nearest stage this run enabled ahead of it.

use std::path::{Path, PathBuf};

use log::debug;

use crate::config::defs::{
    ExtractParams, PipelineConfig, PipelineError, Stage, StageKind, ADAPTIVE_READ_IDS_FILE, ANALYSIS_DIR,
    BASECALLED_SUFFIX, BASECALL_DIR, BLAST_DIR, BLAST_SUFFIX, DEMUX_DIR, EXTRACT_SUFFIX, FASTA_TAG, FASTQ_TAG,
    HOST_DIR, HOST_SAM_SUFFIX, HUMAN_DIR, HUMAN_SAM_SUFFIX, K2_OUTPUT_EXT, K2_REPORT_EXT,
    K2_UNCLASSIFIED_EXT, KRAKEN2_DIR, MULTIPLEXED_CALLS_FILE, NOT_HOST_SUFFIX, NOT_HUMAN_SUFFIX,
    POD5_SUMMARY_FILE, READ_IDS_FILE, TRIM_STATS_SUFFIX,
};

/// A logical unit of sequencing data and the file it started from.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub name: String,
    pub raw: PathBuf,
}

/// A file one stage produced for one sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub sample: String,
    pub kind: StageKind,
    pub path: PathBuf,
}


/// Names every file the pipeline writes under the output directory.
#[derive(Debug, Clone)]
pub struct ArtifactLayout {
    out_dir: PathBuf,
}

impl ArtifactLayout {
    pub fn new(out_dir: &Path) -> Self {
        ArtifactLayout { out_dir: out_dir.to_path_buf() }
    }

    pub fn basecall_dir(&self) -> PathBuf {
        self.out_dir.join(BASECALL_DIR)
    }

    pub fn demux_dir(&self) -> PathBuf {
        self.basecall_dir().join(DEMUX_DIR)
    }

    pub fn host_dir(&self) -> PathBuf {
        self.out_dir.join(ANALYSIS_DIR).join(HOST_DIR)
    }

    pub fn human_dir(&self) -> PathBuf {
        self.out_dir.join(ANALYSIS_DIR).join(HUMAN_DIR)
    }

    pub fn kraken2_dir(&self) -> PathBuf {
        self.out_dir.join(ANALYSIS_DIR).join(KRAKEN2_DIR)
    }

    pub fn blast_dir(&self) -> PathBuf {
        self.out_dir.join(ANALYSIS_DIR).join(BLAST_DIR)
    }

    pub fn multiplexed_calls(&self) -> PathBuf {
        self.basecall_dir().join(MULTIPLEXED_CALLS_FILE)
    }

    pub fn pod5_summary(&self) -> PathBuf {
        self.basecall_dir().join(POD5_SUMMARY_FILE)
    }

    pub fn read_ids(&self) -> PathBuf {
        self.basecall_dir().join(READ_IDS_FILE)
    }

    pub fn adaptive_read_ids(&self) -> PathBuf {
        self.basecall_dir().join(ADAPTIVE_READ_IDS_FILE)
    }

    /// Trimmed basecalled reads; the raw artifact of a pod5 run.
    pub fn basecalled_raw(&self, sample: &str) -> PathBuf {
        self.basecall_dir().join(format!("{}.{}", sample, FASTQ_TAG))
    }

    pub fn untrimmed(&self, sample: &str) -> PathBuf {
        self.basecall_dir().join(format!("{}{}", sample, BASECALLED_SUFFIX))
    }

    pub fn trim_stats(&self, sample: &str) -> PathBuf {
        self.basecall_dir().join(format!("{}{}", sample, TRIM_STATS_SUFFIX))
    }

    pub fn host_sam(&self, sample: &str) -> PathBuf {
        self.host_dir().join(format!("{}{}", sample, HOST_SAM_SUFFIX))
    }

    pub fn not_host(&self, sample: &str) -> PathBuf {
        self.host_dir().join(format!("{}{}", sample, NOT_HOST_SUFFIX))
    }

    pub fn human_sam(&self, sample: &str) -> PathBuf {
        self.human_dir().join(format!("{}{}", sample, HUMAN_SAM_SUFFIX))
    }

    pub fn not_human(&self, sample: &str) -> PathBuf {
        self.human_dir().join(format!("{}{}", sample, NOT_HUMAN_SUFFIX))
    }

    pub fn k2_report(&self, sample: &str) -> PathBuf {
        self.kraken2_dir().join(format!("{}.{}", sample, K2_REPORT_EXT))
    }

    pub fn k2_output(&self, sample: &str) -> PathBuf {
        self.kraken2_dir().join(format!("{}.{}", sample, K2_OUTPUT_EXT))
    }

    pub fn k2_unclassified(&self, sample: &str) -> PathBuf {
        self.kraken2_dir().join(format!("{}.{}", sample, K2_UNCLASSIFIED_EXT))
    }

    /// `<sample>-<taxid>-...-extract.<fasta|fastq>` next to the classifier output.
    pub fn extracted_reads(&self, sample: &str, params: &ExtractParams) -> PathBuf {
        let taxids: Vec<String> = params.taxids.iter().map(|id| id.to_string()).collect();
        let ext = if params.fastq_output { FASTQ_TAG } else { FASTA_TAG };
        self.kraken2_dir()
            .join(format!("{}-{}-{}.{}", sample, taxids.join("-"), EXTRACT_SUFFIX, ext))
    }

    pub fn converted(&self, sample: &str) -> PathBuf {
        self.blast_dir().join(format!("{}.{}", sample, FASTA_TAG))
    }

    pub fn blast_table(&self, sample: &str) -> PathBuf {
        self.blast_dir().join(format!("{}{}", sample, BLAST_SUFFIX))
    }

    /// Where an artifact of `kind` for `sample` lives.
    pub fn artifact_path(&self, sample: &Sample, kind: StageKind) -> PathBuf {
        match kind {
            StageKind::Raw => sample.raw.clone(),
            StageKind::HostFiltered => self.not_host(&sample.name),
            StageKind::HumanFiltered => self.not_human(&sample.name),
            StageKind::Classified => self.k2_unclassified(&sample.name),
            StageKind::Converted => self.converted(&sample.name),
            StageKind::Searched => self.blast_table(&sample.name),
        }
    }
}


pub struct ArtifactResolver<'a> {
    config: &'a PipelineConfig,
    layout: &'a ArtifactLayout,
}

impl<'a> ArtifactResolver<'a> {
    pub fn new(config: &'a PipelineConfig, layout: &'a ArtifactLayout) -> Self {
        ArtifactResolver { config, layout }
    }

    /// The only artifact kind `stage` may consume: the output of the nearest
    /// enabled stage upstream of it. Rawer artifacts are never a fallback, so
    /// an enabled filter can't be bypassed; leftovers from runs with other
    /// flags are never picked up either.
    pub fn expected_kind(&self, stage: Stage) -> Option<StageKind> {
        match stage {
            Stage::HostFiltering => Some(StageKind::Raw),
            Stage::HumanFiltering if self.config.host_filtering_runs() => Some(StageKind::HostFiltered),
            Stage::HumanFiltering => Some(StageKind::Raw),
            Stage::FormatConversion | Stage::Searching => Some(if self.config.classification_runs() {
                StageKind::Classified
            } else if self.config.human_filtering_runs() {
                StageKind::HumanFiltered
            } else if self.config.host_filtering_runs() {
                StageKind::HostFiltered
            } else {
                StageKind::Raw
            }),
            Stage::Init | Stage::Basecalling | Stage::Done | Stage::Failed => None,
        }
    }

    /// Upstream artifact for `sample` ahead of `stage`.
    ///
    /// # Arguments
    ///
    /// * `sample` - Sample whose artifact is needed.
    /// * `stage` - Stage about to consume it.
    ///
    /// # Returns
    /// The artifact, or `ArtifactNotFound` naming the path that was expected.
    pub fn resolve(&self, sample: &Sample, stage: Stage) -> Result<Artifact, PipelineError> {
        let mut tried = Vec::new();
        if let Some(kind) = self.expected_kind(stage) {
            let path = self.layout.artifact_path(sample, kind);
            if path.is_file() {
                debug!("[{}] {}: using {} artifact {}", stage, sample.name, kind, path.display());
                return Ok(Artifact { sample: sample.name.clone(), kind, path });
            }
            tried.push(path);
        }
        Err(PipelineError::ArtifactNotFound {
            stage,
            sample: sample.name.clone(),
            tried,
        })
    }
}
