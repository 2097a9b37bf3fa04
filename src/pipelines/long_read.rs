//! Long-read pipeline: basecalling, optional host and human removal,
//! classification, format conversion and the final BLAST search.
//!
//! Stages run strictly one after another and samples within a stage one at a
//! time. A sample that fails is dropped from later stages; the run only fails
//! outright on configuration errors, stage-wide work (basecalling, database
//! staging, directory creation), or when no sample is left.

use std::any::Any;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, error, info, warn};

use crate::cli::InputKind;
use crate::config::defs::{
    DoradoSubcommand, PipelineConfig, PipelineError, SamtoolsSubcommand, SeqkitSubcommand, Stage,
    BLASTN_TAG, CHOPPER_TAG, DORADO_TAG, KRAKEN2_DB_FILES, KRAKEN2_TAG, MINIMAP2_TAG, POD5_TAG,
    SAMTOOLS_TAG, SEQKIT_TAG,
};
use crate::utils::barcode::{discover_units, reconcile};
use crate::utils::blast::{add_header, read_hits};
use crate::utils::command::blastn::BlastnConfig;
use crate::utils::command::dorado::DoradoConfig;
use crate::utils::command::generate_cli;
use crate::utils::command::kraken2::Kraken2Config;
use crate::utils::command::minimap2::Minimap2Config;
use crate::utils::command::pod5::Pod5ViewConfig;
use crate::utils::command::samtools::SamtoolsConfig;
use crate::utils::command::seqkit::SeqkitConfig;
use crate::utils::fastx::{fastq_to_fasta, sniff_format, SequenceFormat};
use crate::utils::file::{concatenate_files, is_gzipped, is_sequence_file, sample_name_from_path, sorted_dir_entries};
use crate::utils::kraken::extract_classified_reads;
use crate::utils::pod5::split_read_ids;
use crate::utils::resolver::{ArtifactLayout, ArtifactResolver, Sample};
use crate::utils::streams::{ToolInvocation, ToolRunner};
use crate::utils::system::ScratchDir;

#[derive(Debug, Clone, PartialEq)]
pub struct SampleFailure {
    pub sample: String,
    pub stage: Stage,
    pub error: String,
}

#[derive(Debug)]
pub struct RunSummary {
    pub state: Stage,
    /// Sample name to its headed hit table.
    pub tables: BTreeMap<String, PathBuf>,
    /// Sample name to the reads extracted by taxid, when asked for.
    pub extracts: BTreeMap<String, PathBuf>,
    pub failures: Vec<SampleFailure>,
}


/// One sample per sequence file: the file itself, or each sequence file in a
/// directory in sorted order.
pub fn discover_input_samples(input: &Path) -> Result<Vec<Sample>, PipelineError> {
    let files = if input.is_dir() {
        sorted_dir_entries(input)?
            .into_iter()
            .filter(|p| p.is_file() && is_sequence_file(p))
            .collect()
    } else {
        vec![input.to_path_buf()]
    };

    let mut samples: Vec<Sample> = Vec::new();
    for raw in files {
        let name = sample_name_from_path(&raw)
            .ok_or_else(|| PipelineError::InvalidConfig(format!("Cannot name sample for {}", raw.display())))?;
        if samples.iter().any(|s| s.name == name) {
            return Err(PipelineError::InvalidConfig(format!(
                "Two input files map to sample name '{}'",
                name
            )));
        }
        samples.push(Sample { name, raw });
    }
    Ok(samples)
}


pub struct Controller<'a, R: ToolRunner> {
    config: Arc<PipelineConfig>,
    layout: ArtifactLayout,
    runner: &'a R,
    state: Stage,
    samples: Vec<Sample>,
    extracts: BTreeMap<String, PathBuf>,
    failures: Vec<SampleFailure>,
}

impl<'a, R: ToolRunner> Controller<'a, R> {
    pub fn new(config: Arc<PipelineConfig>, runner: &'a R) -> Self {
        let layout = ArtifactLayout::new(&config.out_dir);
        Controller {
            config,
            layout,
            runner,
            state: Stage::Init,
            samples: Vec::new(),
            extracts: BTreeMap::new(),
            failures: Vec::new(),
        }
    }

    fn transition(&mut self, next: Stage) {
        info!("Stage {} -> {}", self.state, next);
        self.state = next;
    }

    fn resolver(&self) -> ArtifactResolver<'_> {
        ArtifactResolver::new(&self.config, &self.layout)
    }

    fn drop_sample(&mut self, sample: &str, stage: Stage, e: PipelineError) {
        error!("[{}] sample {} failed and is excluded from later stages: {}", stage, sample, e);
        self.failures.push(SampleFailure {
            sample: sample.to_string(),
            stage,
            error: e.to_string(),
        });
    }

    fn ensure_samples_remain(&self, stage: Stage) -> Result<(), PipelineError> {
        if self.samples.is_empty() {
            return Err(PipelineError::NoSamplesRemaining { stage });
        }
        Ok(())
    }

    fn invocation(&self, tool: &'static str, tool_config: Option<&dyn Any>) -> Result<ToolInvocation, PipelineError> {
        let args = generate_cli(tool, &self.config, tool_config).map_err(|e| PipelineError::ToolExecution {
            tool: tool.to_string(),
            error: e.to_string(),
        })?;
        Ok(ToolInvocation::new(tool, args))
    }

    /// Drives every enabled stage, then searches what is left.
    pub async fn run(mut self) -> Result<RunSummary, PipelineError> {
        match self.drive().await {
            Ok(tables) => {
                self.transition(Stage::Done);
                Ok(RunSummary { state: self.state, tables, extracts: self.extracts, failures: self.failures })
            }
            Err(e) => {
                let stage = self.state;
                self.transition(Stage::Failed);
                error!("Pipeline failed during {}: {}", stage, e);
                Err(e)
            }
        }
    }

    async fn drive(&mut self) -> Result<BTreeMap<String, PathBuf>, PipelineError> {
        self.create_dirs()?;

        self.samples = match self.config.input_kind {
            InputKind::Pod5 => {
                self.transition(Stage::Basecalling);
                self.basecall().await?
            }
            InputKind::File => discover_input_samples(&self.config.input)?,
        };
        self.ensure_samples_remain(self.state)?;
        info!("Samples: {:?}", self.samples.iter().map(|s| s.name.as_str()).collect::<Vec<_>>());

        if self.config.host_filtering_runs() {
            self.transition(Stage::HostFiltering);
            self.host_filtering().await?;
        }
        if self.config.human_filtering_runs() {
            self.transition(Stage::HumanFiltering);
            self.human_filtering().await?;
        }

        self.transition(Stage::FormatConversion);
        let queries = self.format_conversion()?;

        self.transition(Stage::Searching);
        self.search(queries).await
    }

    fn create_dirs(&self) -> Result<(), PipelineError> {
        let mut dirs = vec![self.layout.blast_dir()];
        if self.config.input_kind == InputKind::Pod5 {
            dirs.push(self.layout.basecall_dir());
        }
        if self.config.host_filtering_runs() {
            dirs.push(self.layout.host_dir());
        }
        if self.config.human_filtering_runs() {
            dirs.push(self.layout.human_dir());
        }
        if self.config.classification_runs() {
            dirs.push(self.layout.kraken2_dir());
        }
        for dir in dirs {
            fs::create_dir_all(&dir).map_err(|e| {
                PipelineError::IOError(format!("[{}] cannot create {}: {}", self.state, dir.display(), e))
            })?;
        }
        Ok(())
    }


    // *******************
    // Basecalling
    // *******************

    async fn basecall(&mut self) -> Result<Vec<Sample>, PipelineError> {
        let read_ids = if self.config.basecall.exclude_adaptive {
            Some(self.split_adaptive_reads().await?)
        } else {
            None
        };

        let untrimmed: Vec<(String, PathBuf)> = match &self.config.barcode_map {
            Some(map) => {
                let calls = self.layout.multiplexed_calls();
                self.basecall_to(&calls, read_ids.as_deref()).await?;

                let demux_dir = self.layout.demux_dir();
                fs::create_dir_all(&demux_dir)?;
                let demux_config = DoradoConfig {
                    subcommand: DoradoSubcommand::Demux,
                    input: calls,
                    output_dir: Some(demux_dir.clone()),
                    read_ids: None,
                };
                let invocation = self.invocation(DORADO_TAG, Some(&demux_config))?;
                self.runner.run(&invocation).await?;

                let units = discover_units(&demux_dir)?;
                let layout = &self.layout;
                reconcile(&units, map, |sample| layout.untrimmed(sample))?.into_iter().collect()
            }
            None => {
                let sample = self
                    .config
                    .settings
                    .as_ref()
                    .map(|s| s.sample.clone())
                    .ok_or_else(|| PipelineError::InvalidConfig("pod5 run without a settings record".to_string()))?;
                let untrimmed = self.layout.untrimmed(&sample);
                self.basecall_to(&untrimmed, read_ids.as_deref()).await?;
                vec![(sample, untrimmed)]
            }
        };

        let mut samples = Vec::new();
        for (name, untrimmed) in untrimmed {
            match self.trim(&name, &untrimmed).await {
                Ok(sample) => samples.push(sample),
                Err(e) => self.drop_sample(&name, Stage::Basecalling, e),
            }
        }
        Ok(samples)
    }

    async fn basecall_to(&self, output: &Path, read_ids: Option<&Path>) -> Result<(), PipelineError> {
        let dorado_config = DoradoConfig {
            subcommand: DoradoSubcommand::Basecaller,
            input: self.config.input.clone(),
            output_dir: None,
            read_ids: read_ids.map(Path::to_path_buf),
        };
        let invocation = self.invocation(DORADO_TAG, Some(&dorado_config))?.stdout_to(output);
        self.runner.run(&invocation).await
    }

    async fn split_adaptive_reads(&self) -> Result<PathBuf, PipelineError> {
        let summary = self.layout.pod5_summary();
        let view_config = Pod5ViewConfig { input: self.config.input.clone(), output: summary.clone() };
        let invocation = self.invocation(POD5_TAG, Some(&view_config))?;
        self.runner.run(&invocation).await?;

        let read_ids = self.layout.read_ids();
        let split = split_read_ids(&summary, &read_ids, &self.layout.adaptive_read_ids())?;
        info!("{} reads to basecall, {} rejected by adaptive sampling", split.basecall, split.adaptive);
        if split.basecall == 0 {
            return Err(PipelineError::EmptyArtifact {
                stage: Stage::Basecalling,
                sample: self.config.settings.as_ref().map(|s| s.experiment.clone()).unwrap_or_default(),
                path: summary.display().to_string(),
            });
        }
        Ok(read_ids)
    }

    async fn trim(&self, name: &str, untrimmed: &Path) -> Result<Sample, PipelineError> {
        let raw = self.layout.basecalled_raw(name);
        let invocation = self.invocation(CHOPPER_TAG, None)?
            .stdin_from(untrimmed)
            .stdout_to(&raw);
        self.runner.run(&invocation).await?;

        let stats_config = SeqkitConfig { subcommand: SeqkitSubcommand::Stats, input: raw.clone() };
        let invocation = self.invocation(SEQKIT_TAG, Some(&stats_config))?
            .stdout_to(&self.layout.trim_stats(name));
        self.runner.run(&invocation).await?;
        Ok(Sample { name: name.to_string(), raw })
    }


    // *******************
    // Host and human removal
    // *******************

    /// Aligns the resolved input to `reference` and keeps unmapped reads.
    async fn remove_mapped_reads(
        &self,
        sample: &Sample,
        stage: Stage,
        reference: &Path,
        sam: PathBuf,
        unmapped: &Path,
    ) -> Result<(), PipelineError> {
        let input = self.resolver().resolve(sample, stage)?;
        let mm2_config = Minimap2Config {
            reference: reference.to_path_buf(),
            query: input.path,
            output: sam.clone(),
        };
        let invocation = self.invocation(MINIMAP2_TAG, Some(&mm2_config))?;
        self.runner.run(&invocation).await?;

        let samtools_config = SamtoolsConfig {
            subcommand: SamtoolsSubcommand::Fastq,
            subcommand_fields: vec![
                ("-f".to_string(), Some("4".to_string())), // Unmapped only
                (sam.to_string_lossy().to_string(), None),
            ],
        };
        let invocation = self.invocation(SAMTOOLS_TAG, Some(&samtools_config))?.stdout_to(unmapped);
        self.runner.run(&invocation).await
    }

    async fn host_filtering(&mut self) -> Result<(), PipelineError> {
        let reference = self
            .config
            .host_reference
            .clone()
            .ok_or_else(|| PipelineError::InvalidConfig("host removal requires a host reference".to_string()))?;

        let mut kept = Vec::new();
        for sample in std::mem::take(&mut self.samples) {
            let sam = self.layout.host_sam(&sample.name);
            let unmapped = self.layout.not_host(&sample.name);
            match self.remove_mapped_reads(&sample, Stage::HostFiltering, &reference, sam, &unmapped).await {
                Ok(()) => kept.push(sample),
                Err(e) => self.drop_sample(&sample.name, Stage::HostFiltering, e),
            }
        }
        self.samples = kept;
        self.ensure_samples_remain(Stage::HostFiltering)
    }

    async fn human_filtering(&mut self) -> Result<(), PipelineError> {
        let reference = self
            .config
            .human_reference
            .clone()
            .ok_or_else(|| PipelineError::InvalidConfig("human removal requires a human reference".to_string()))?;

        // Staged once per stage; dropped (and removed) on any early return
        let scratch = match (&self.config.kraken_db, self.config.classification_runs()) {
            (Some(db), true) => {
                let scratch = ScratchDir::create(&self.config.ram_temp_dir, "k2db")?;
                scratch.stage_files(db, KRAKEN2_DB_FILES)?;
                info!("Staged kraken2 database in {}", scratch.path().display());
                Some(scratch)
            }
            _ => None,
        };
        let staged_db = scratch.as_ref().map(|s| s.path().to_path_buf());

        let mut kept = Vec::new();
        for sample in std::mem::take(&mut self.samples) {
            let sam = self.layout.human_sam(&sample.name);
            let unmapped = self.layout.not_human(&sample.name);
            let result = match self
                .remove_mapped_reads(&sample, Stage::HumanFiltering, &reference, sam, &unmapped)
                .await
            {
                Ok(()) => match &staged_db {
                    Some(db) => self.classify(&sample, db, &unmapped).await,
                    None => Ok(()),
                },
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => {
                    if staged_db.is_some() {
                        self.extract_reads(&sample, &unmapped);
                    }
                    kept.push(sample)
                }
                Err(e) => self.drop_sample(&sample.name, Stage::HumanFiltering, e),
            }
        }
        self.samples = kept;

        if let Some(scratch) = scratch {
            if let Err(e) = scratch.cleanup() {
                warn!("[{}] {}", Stage::HumanFiltering, e);
            }
        }
        self.ensure_samples_remain(Stage::HumanFiltering)
    }

    async fn classify(&self, sample: &Sample, db: &Path, input: &Path) -> Result<(), PipelineError> {
        let k2_config = Kraken2Config {
            db: db.to_path_buf(),
            report: self.layout.k2_report(&sample.name),
            output: self.layout.k2_output(&sample.name),
            unclassified_out: self.layout.k2_unclassified(&sample.name),
            input: input.to_path_buf(),
        };
        let invocation = self.invocation(KRAKEN2_TAG, Some(&k2_config))?;
        self.runner.run(&invocation).await?;
        info!("Classification report for {}: {}", sample.name, k2_config.report.display());
        Ok(())
    }

    /// Writes the reads assigned to the requested taxids. The extract is a side
    /// output, so a failure is logged and the sample keeps going.
    fn extract_reads(&mut self, sample: &Sample, classified_input: &Path) {
        let Some(params) = self.config.extract.as_ref() else {
            return;
        };
        let output = self.layout.extracted_reads(&sample.name, params);
        match extract_classified_reads(
            &self.layout.k2_report(&sample.name),
            &self.layout.k2_output(&sample.name),
            classified_input,
            &output,
            params,
        ) {
            Ok(_) => {
                self.extracts.insert(sample.name.clone(), output);
            }
            Err(e) => warn!("[{}] {}: read extraction failed: {}", Stage::HumanFiltering, sample.name, e),
        }
    }


    // *******************
    // Conversion and search
    // *******************

    /// FASTA query for one sample. An empty input drops the sample.
    fn convert(&self, sample: &Sample) -> Result<PathBuf, PipelineError> {
        let input = self.resolver().resolve(sample, Stage::FormatConversion)?;
        let converted = self.layout.converted(&sample.name);
        let format = sniff_format(&input.path)?;
        if let Some(format) = format {
            debug!("{}: {} artifact {} is {}", sample.name, input.kind, input.path.display(), format.tag());
        }
        match format {
            None => Err(PipelineError::EmptyArtifact {
                stage: Stage::FormatConversion,
                sample: sample.name.clone(),
                path: input.path.display().to_string(),
            }),
            Some(SequenceFormat::Fasta) if !is_gzipped(&input.path)? => Ok(input.path),
            Some(SequenceFormat::Fasta) => {
                concatenate_files(&[input.path], &converted)?;
                Ok(converted)
            }
            Some(SequenceFormat::Fastq) => {
                let count = fastq_to_fasta(&input.path, &converted)?;
                info!("Converted {} reads of {} ({}) to FASTA", count, sample.name, input.kind);
                Ok(converted)
            }
        }
    }

    fn format_conversion(&mut self) -> Result<Vec<(Sample, PathBuf)>, PipelineError> {
        let mut queries = Vec::new();
        for sample in std::mem::take(&mut self.samples) {
            match self.convert(&sample) {
                Ok(query) => queries.push((sample, query)),
                // An unrecognized format is a configuration problem, not a per-sample one
                Err(e @ PipelineError::UnknownSequenceFormat { .. }) => return Err(e),
                Err(e) => self.drop_sample(&sample.name, Stage::FormatConversion, e),
            }
        }
        self.samples = queries.iter().map(|(s, _)| s.clone()).collect();
        self.ensure_samples_remain(Stage::FormatConversion)?;
        Ok(queries)
    }

    async fn search_one(&self, sample: &Sample, query: &Path) -> Result<PathBuf, PipelineError> {
        let table = self.layout.blast_table(&sample.name);
        let blast_config = BlastnConfig { query: query.to_path_buf(), output: table.clone() };
        let invocation = self.invocation(BLASTN_TAG, Some(&blast_config))?;
        self.runner.run(&invocation).await?;
        if !table.is_file() {
            return Err(PipelineError::ToolExecution {
                tool: BLASTN_TAG.to_string(),
                error: format!("no output table at {}", table.display()),
            });
        }
        add_header(&table)?;
        match read_hits(&table) {
            Ok(hits) => info!("{}: {} hits ({} filter) in {}", sample.name, hits.len(), self.config.taxonomic_filter, table.display()),
            Err(e) => warn!("{}: could not parse {}: {}", sample.name, table.display(), e),
        }
        Ok(table)
    }

    async fn search(&mut self, queries: Vec<(Sample, PathBuf)>) -> Result<BTreeMap<String, PathBuf>, PipelineError> {
        let mut tables = BTreeMap::new();
        for (sample, query) in queries {
            match self.search_one(&sample, &query).await {
                Ok(table) => {
                    tables.insert(sample.name.clone(), table);
                }
                Err(e) => self.drop_sample(&sample.name, Stage::Searching, e),
            }
        }
        if tables.is_empty() {
            return Err(PipelineError::NoSamplesRemaining { stage: Stage::Searching });
        }
        Ok(tables)
    }
}


/// Runs the whole pipeline for one configuration.
pub async fn run<R: ToolRunner>(config: Arc<PipelineConfig>, runner: &R) -> Result<RunSummary, PipelineError> {
    Controller::new(config, runner).run().await
}
