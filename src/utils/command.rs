/// Functions and structs for creating external tool command lines

use std::any::Any;

use anyhow::{anyhow, Result};
use log::{info, warn};
use tokio::process::Command;

use crate::config::defs::{
    PipelineConfig, PipelineError, BLASTN_TAG, CHOPPER_TAG, DORADO_TAG, KRAKEN2_TAG,
    MINIMAP2_TAG, POD5_TAG, SAMTOOLS_TAG, SEQKIT_TAG, TOOL_VERSIONS,
};
use crate::cli::InputKind;


pub mod dorado {
    use std::path::PathBuf;
    use crate::config::defs::{DoradoSubcommand, PipelineConfig};

    #[derive(Debug)]
    pub struct DoradoConfig {
        pub subcommand: DoradoSubcommand,
        /// pod5 directory for basecalling, merged calls for demultiplexing.
        pub input: PathBuf,
        pub output_dir: Option<PathBuf>,
        pub read_ids: Option<PathBuf>,
    }

    pub fn arg_generator(config: &PipelineConfig, dorado_config: &DoradoConfig) -> Vec<String> {
        let mut args_vec: Vec<String> = Vec::new();
        match dorado_config.subcommand {
            DoradoSubcommand::Basecaller => {
                args_vec.push("basecaller".to_string());
                args_vec.push(config.basecall.model.clone());
                args_vec.push(dorado_config.input.to_string_lossy().to_string());
                args_vec.push("--emit-fastq".to_string());
                if config.stages.barcoded {
                    if let Some(kit) = &config.basecall.kit {
                        args_vec.push("--kit-name".to_string());
                        args_vec.push(kit.clone());
                    }
                }
                if let Some(read_ids) = &dorado_config.read_ids {
                    args_vec.push("--read-ids".to_string());
                    args_vec.push(read_ids.to_string_lossy().to_string());
                }
            }
            DoradoSubcommand::Demux => {
                args_vec.push("demux".to_string());
                if let Some(dir) = &dorado_config.output_dir {
                    args_vec.push("--output-dir".to_string());
                    args_vec.push(dir.to_string_lossy().to_string());
                }
                args_vec.push("--emit-fastq".to_string());
                // Barcodes were already classified during basecalling
                args_vec.push("--no-classify".to_string());
                args_vec.push("-t".to_string());
                args_vec.push(config.threads.to_string());
                args_vec.push(dorado_config.input.to_string_lossy().to_string());
            }
        }
        args_vec
    }
}

pub mod pod5 {
    use std::path::PathBuf;

    #[derive(Debug)]
    pub struct Pod5ViewConfig {
        pub input: PathBuf,
        pub output: PathBuf,
    }

    pub fn arg_generator(view_config: &Pod5ViewConfig) -> Vec<String> {
        vec![
            "view".to_string(),
            view_config.input.to_string_lossy().to_string(),
            "--recursive".to_string(),
            "--include".to_string(),
            "read_id,end_reason".to_string(),
            "--output".to_string(),
            view_config.output.to_string_lossy().to_string(),
            "--force-overwrite".to_string(),
        ]
    }
}

mod chopper {
    use crate::config::defs::PipelineConfig;

    pub fn arg_generator(config: &PipelineConfig) -> Vec<String> {
        let mut args_vec: Vec<String> = Vec::new();
        args_vec.push("-q".to_string());
        args_vec.push(config.basecall.min_quality.to_string());
        args_vec.push("-t".to_string());
        args_vec.push(config.threads.to_string());
        args_vec
    }
}

pub mod seqkit {
    use std::path::PathBuf;
    use crate::config::defs::{PipelineConfig, SeqkitSubcommand};

    #[derive(Debug)]
    pub struct SeqkitConfig {
        pub subcommand: SeqkitSubcommand,
        pub input: PathBuf,
    }

    pub fn arg_generator(config: &PipelineConfig, seqkit_config: &SeqkitConfig) -> Vec<String> {
        let mut args_vec: Vec<String> = Vec::new();
        match seqkit_config.subcommand {
            SeqkitSubcommand::Stats => {
                args_vec.push("stats".to_string());
                args_vec.push("-T".to_string());
                args_vec.push("-a".to_string());
            }
        }
        args_vec.push("-j".to_string());
        args_vec.push(config.threads.to_string());
        args_vec.push(seqkit_config.input.to_string_lossy().to_string());
        args_vec
    }
}

pub mod minimap2 {
    use std::path::PathBuf;
    use crate::config::defs::PipelineConfig;

    #[derive(Debug)]
    pub struct Minimap2Config {
        pub reference: PathBuf,
        pub query: PathBuf,
        pub output: PathBuf,
    }

    pub fn arg_generator(config: &PipelineConfig, mm2_config: &Minimap2Config) -> Vec<String> {
        let mut args_vec: Vec<String> = Vec::new();
        args_vec.push("-ax".to_string());
        args_vec.push("map-ont".to_string());
        args_vec.push("-t".to_string());
        args_vec.push(config.threads.to_string());
        args_vec.push("-o".to_string());
        args_vec.push(mm2_config.output.to_string_lossy().to_string());
        args_vec.push(mm2_config.reference.to_string_lossy().to_string());
        args_vec.push(mm2_config.query.to_string_lossy().to_string());
        args_vec
    }
}

pub mod samtools {
    use crate::config::defs::{PipelineConfig, SamtoolsSubcommand};

    #[derive(Debug)]
    pub struct SamtoolsConfig {
        pub subcommand: SamtoolsSubcommand,
        /// Flag/value pairs in order; a bare positional has no value.
        pub subcommand_fields: Vec<(String, Option<String>)>,
    }

    pub fn arg_generator(config: &PipelineConfig, samtools_config: &SamtoolsConfig) -> Vec<String> {
        let mut args_vec: Vec<String> = Vec::new();
        match samtools_config.subcommand {
            SamtoolsSubcommand::Fastq => args_vec.push("fastq".to_string()),
        }
        args_vec.push("-@".to_string());
        args_vec.push(config.threads.to_string());
        for (key, value) in &samtools_config.subcommand_fields {
            args_vec.push(key.clone());
            if let Some(v) = value {
                args_vec.push(v.clone());
            }
        }
        args_vec
    }
}

pub mod kraken2 {
    use std::path::PathBuf;
    use crate::config::defs::PipelineConfig;

    #[derive(Debug)]
    pub struct Kraken2Config {
        pub db: PathBuf,
        pub report: PathBuf,
        pub output: PathBuf,
        pub unclassified_out: PathBuf,
        pub input: PathBuf,
    }

    pub fn arg_generator(config: &PipelineConfig, k2_config: &Kraken2Config) -> Vec<String> {
        vec![
            "--db".to_string(),
            k2_config.db.to_string_lossy().to_string(),
            "--threads".to_string(),
            config.threads.to_string(),
            "--memory-mapping".to_string(),
            "--report".to_string(),
            k2_config.report.to_string_lossy().to_string(),
            "--output".to_string(),
            k2_config.output.to_string_lossy().to_string(),
            "--unclassified-out".to_string(),
            k2_config.unclassified_out.to_string_lossy().to_string(),
            k2_config.input.to_string_lossy().to_string(),
        ]
    }
}

pub mod blastn {
    use std::path::PathBuf;
    use crate::config::defs::PipelineConfig;
    use crate::utils::blast::outfmt_arg;

    #[derive(Debug)]
    pub struct BlastnConfig {
        pub query: PathBuf,
        pub output: PathBuf,
    }

    /// Exactly one of: no filter, `-taxids`, `-negative_taxids`.
    pub fn arg_generator(config: &PipelineConfig, blastn_config: &BlastnConfig) -> Vec<String> {
        let search = &config.search;
        let mut args_vec: Vec<String> = vec![
            "-task".to_string(),
            search.task.clone(),
            "-query".to_string(),
            blastn_config.query.to_string_lossy().to_string(),
            "-db".to_string(),
            search.db.to_string_lossy().to_string(),
            "-evalue".to_string(),
            search.evalue.to_string(),
            "-max_target_seqs".to_string(),
            search.max_target_seqs.to_string(),
            "-perc_identity".to_string(),
            search.perc_identity.to_string(),
            "-qcov_hsp_perc".to_string(),
            search.qcov_hsp_perc.to_string(),
            "-num_threads".to_string(),
            config.threads.to_string(),
            "-outfmt".to_string(),
            outfmt_arg(),
            "-out".to_string(),
            blastn_config.output.to_string_lossy().to_string(),
        ];
        if let Some((flag, ids)) = config.taxonomic_filter.blast_flag() {
            args_vec.push(flag.to_string());
            args_vec.push(ids);
        }
        args_vec
    }
}


/// Builds a tool's argument list. `tool_config` must be the tool's own config
/// struct where one exists.
pub fn generate_cli(tool: &str, config: &PipelineConfig, tool_config: Option<&dyn Any>) -> Result<Vec<String>> {
    macro_rules! downcast {
        ($ty:ty) => {
            tool_config
                .and_then(|c| c.downcast_ref::<$ty>())
                .ok_or_else(|| anyhow!("{} requires a {} config", tool, stringify!($ty)))?
        };
    }

    let cmd = match tool {
        DORADO_TAG => dorado::arg_generator(config, downcast!(dorado::DoradoConfig)),
        POD5_TAG => pod5::arg_generator(downcast!(pod5::Pod5ViewConfig)),
        CHOPPER_TAG => chopper::arg_generator(config),
        SEQKIT_TAG => seqkit::arg_generator(config, downcast!(seqkit::SeqkitConfig)),
        MINIMAP2_TAG => minimap2::arg_generator(config, downcast!(minimap2::Minimap2Config)),
        SAMTOOLS_TAG => samtools::arg_generator(config, downcast!(samtools::SamtoolsConfig)),
        KRAKEN2_TAG => kraken2::arg_generator(config, downcast!(kraken2::Kraken2Config)),
        BLASTN_TAG => blastn::arg_generator(config, downcast!(blastn::BlastnConfig)),
        _ => return Err(anyhow!("Unknown tool: {}", tool)),
    };

    Ok(cmd)
}


/// Tools the configured stages will call.
pub fn required_tools(config: &PipelineConfig) -> Vec<&'static str> {
    let mut tools = Vec::new();
    if config.input_kind == InputKind::Pod5 {
        if config.basecall.exclude_adaptive {
            tools.push(POD5_TAG);
        }
        tools.extend([DORADO_TAG, CHOPPER_TAG, SEQKIT_TAG]);
    }
    if config.host_filtering_runs() || config.human_filtering_runs() {
        tools.extend([MINIMAP2_TAG, SAMTOOLS_TAG]);
    }
    if config.classification_runs() {
        tools.push(KRAKEN2_TAG);
    }
    tools.push(BLASTN_TAG);
    tools
}

fn version_flag(tool: &str) -> &'static str {
    match tool {
        BLASTN_TAG => "-version",
        SEQKIT_TAG => "version",
        _ => "--version",
    }
}

/// First whitespace-separated token that looks like a version number.
pub fn parse_version(text: &str) -> Option<String> {
    text.split_whitespace()
        .map(|token| token.trim_start_matches('v').trim_end_matches(|c: char| !c.is_ascii_alphanumeric()))
        .find(|token| token.starts_with(|c: char| c.is_ascii_digit()) && token.contains('.'))
        .map(|token| token.to_string())
}

/// Leading `major.minor` of a version string.
pub fn major_minor(version: &str) -> Option<(u32, u32)> {
    let mut parts = version.split(|c: char| !c.is_ascii_digit());
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    Some((major, minor))
}

pub async fn check_version(tool: &str) -> Result<String> {
    let output = Command::new(tool)
        .arg(version_flag(tool))
        .output()
        .await
        .map_err(|e| anyhow!("Failed to spawn: {}. Is {} installed?", e, tool))?;
    // Some tools print their version on stderr
    let text = format!(
        "{}\n{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    parse_version(&text).ok_or_else(|| anyhow!("No version found in {} {} output", tool, version_flag(tool)))
}

/// Confirms every tool answers a version query; older releases only warn.
pub async fn check_versions(tools: &[&'static str]) -> Result<(), PipelineError> {
    for &tool in tools {
        let version = check_version(tool)
            .await
            .map_err(|e| PipelineError::InvalidConfig(e.to_string()))?;
        match (major_minor(&version), TOOL_VERSIONS.get(tool)) {
            (Some(found), Some(&minimum)) if found < minimum => {
                warn!("{} {} is older than the tested {}.{}", tool, version, minimum.0, minimum.1);
            }
            _ => info!("{} version {}", tool, version),
        }
    }
    Ok(())
}
