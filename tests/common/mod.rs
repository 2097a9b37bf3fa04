#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use nanotax_pipelines::cli::InputKind;
use nanotax_pipelines::config::defs::{
    BasecallParams, EnabledStages, PipelineConfig, PipelineError, SearchParams, KRAKEN2_DB_FILES,
};
use nanotax_pipelines::config::settings::RunSettings;
use nanotax_pipelines::utils::streams::{ToolInvocation, ToolRunner};
use nanotax_pipelines::utils::taxonomy::TaxonomicFilter;

pub const BASECALLED_READS: &str = "@read1 runid=abc\nACGTACGTAC\n+\nIIIIIIIIII\n@read2 runid=abc\nTTGGCCAATT\n+\nIIIIIIIIII\n";

pub const K2_REPORT: &str = "50.00\t1\t1\tU\t0\tunclassified\n50.00\t1\t0\tR\t1\troot\n50.00\t1\t1\tS\t562\t  Escherichia coli\n";

pub const K2_OUTPUT: &str = "C\tread1\t562\t10\t562:10\nU\tread2\t0\t10\t0:10\n";

pub const POD5_SUMMARY: &str = "read_id\tend_reason\nr1\tsignal_positive\nr2\tdata_service_unblock_mux_change\nr3\tsignal_positive\n";


/// Records every invocation and writes the files each tool would produce, so
/// that later stages find their inputs.
#[derive(Default)]
pub struct FakeRunner {
    pub calls: Mutex<Vec<ToolInvocation>>,
    /// Fails any call to the tool whose command line contains the text.
    pub fail_on: Option<(&'static str, String)>,
    /// Relative path and content written under the demux output directory.
    pub demux_fixture: Vec<(String, String)>,
}

impl FakeRunner {
    pub fn failing(tool: &'static str, text: &str) -> Self {
        FakeRunner { fail_on: Some((tool, text.to_string())), ..Default::default() }
    }

    pub fn with_demux(fixture: &[(&str, &str)]) -> Self {
        FakeRunner {
            demux_fixture: fixture.iter().map(|(p, c)| (p.to_string(), c.to_string())).collect(),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<ToolInvocation> {
        self.calls.lock().unwrap().clone()
    }

    pub fn tools(&self) -> Vec<&'static str> {
        self.calls().iter().map(|c| c.tool).collect()
    }

    pub fn calls_to(&self, tool: &str) -> Vec<ToolInvocation> {
        self.calls().into_iter().filter(|c| c.tool == tool).collect()
    }

    fn materialize(&self, inv: &ToolInvocation) -> Result<(), PipelineError> {
        let last_arg = || PathBuf::from(inv.args.last().cloned().unwrap_or_default());
        let stdout: Option<String> = match inv.tool {
            "dorado" if inv.args[0] == "basecaller" => Some(BASECALLED_READS.to_string()),
            "dorado" => {
                let out = PathBuf::from(inv.arg_value("--output-dir").unwrap());
                for (rel, content) in &self.demux_fixture {
                    write(&out.join(rel), content)?;
                }
                None
            }
            "pod5" => {
                write(Path::new(inv.arg_value("--output").unwrap()), POD5_SUMMARY)?;
                None
            }
            "chopper" => Some(fs::read_to_string(inv.stdin.as_ref().unwrap())?),
            "seqkit" => Some("file\tnum_seqs\tsum_len\nreads.fastq\t2\t20\n".to_string()),
            // Each filter tags the reads it keeps, so a file shows which stages it went through
            "minimap2" => {
                fs::copy(last_arg(), inv.arg_value("-o").unwrap())?;
                None
            }
            "samtools" => {
                let sam = last_arg();
                let stem = sam.file_stem().unwrap().to_string_lossy().to_string();
                let tag = stem.rsplit('_').next().unwrap_or_default().to_string();
                Some(tag_headers(&fs::read_to_string(&sam)?, &tag))
            }
            "kraken2" => {
                let reads = fs::read_to_string(last_arg())?;
                write(Path::new(inv.arg_value("--unclassified-out").unwrap()), &tag_headers(&reads, "unclassified"))?;
                write(Path::new(inv.arg_value("--report").unwrap()), K2_REPORT)?;
                write(Path::new(inv.arg_value("--output").unwrap()), K2_OUTPUT)?;
                None
            }
            "blastn" => {
                let query = fs::read_to_string(inv.arg_value("-query").unwrap())?;
                let mut table = String::new();
                for line in query.lines().filter(|l| l.starts_with('>')) {
                    let id = line[1..].split_whitespace().next().unwrap_or_default();
                    table.push_str(&format!(
                        "{}\tgi|1|ref|NC_000913.3|\tEscherichia coli\tE. coli\t1\t10\t1\t10\t0\t0\t0\t10\t100.0\t100\t100\t100\t1e-10\t20.0\n",
                        id
                    ));
                }
                write(Path::new(inv.arg_value("-out").unwrap()), &table)?;
                None
            }
            other => panic!("Unexpected tool {}", other),
        };
        if let (Some(path), Some(content)) = (&inv.stdout, stdout) {
            write(path, &content)?;
        }
        Ok(())
    }
}

impl ToolRunner for FakeRunner {
    async fn run(&self, invocation: &ToolInvocation) -> Result<(), PipelineError> {
        self.calls.lock().unwrap().push(invocation.clone());
        if let Some((tool, text)) = &self.fail_on {
            if invocation.tool == *tool && invocation.command_line().contains(text.as_str()) {
                return Err(PipelineError::ToolExecution {
                    tool: tool.to_string(),
                    error: "exited with exit status: 1".to_string(),
                });
            }
        }
        self.materialize(invocation)
    }
}


/// Appends `tag` to every FASTQ header line.
pub fn tag_headers(fastq: &str, tag: &str) -> String {
    fastq
        .lines()
        .enumerate()
        .map(|(i, line)| if i % 4 == 0 { format!("{} {}\n", line, tag) } else { format!("{}\n", line) })
        .collect()
}

pub fn write(path: &Path, content: &str) -> Result<(), PipelineError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content)?;
    Ok(())
}

pub fn settings(sample: &str, multiplexed: bool) -> RunSettings {
    RunSettings {
        experiment: "EXP01".to_string(),
        sample: sample.to_string(),
        chemistry: "R10.4.1".to_string(),
        kit: "SQK-RBK114-24".to_string(),
        multiplexed,
    }
}

/// Kraken2 database directory holding every file the pipeline stages.
pub fn kraken_db(root: &Path) -> Result<PathBuf, PipelineError> {
    let db = root.join("k2_human");
    for name in KRAKEN2_DB_FILES {
        write(&db.join(name), name)?;
    }
    Ok(db)
}

/// Configuration with every optional stage off.
pub fn base_config(input_kind: InputKind, input: &Path, root: &Path) -> PipelineConfig {
    fs::create_dir_all(root.join("ram")).unwrap();
    PipelineConfig {
        input_kind,
        input: input.to_path_buf(),
        out_dir: root.join("out"),
        ram_temp_dir: root.join("ram"),
        threads: 4,
        stages: EnabledStages::default(),
        host_reference: None,
        human_reference: None,
        kraken_db: None,
        basecall: BasecallParams {
            model: "hac".to_string(),
            kit: Some("SQK-RBK114-24".to_string()),
            exclude_adaptive: false,
            min_quality: 10,
        },
        search: SearchParams {
            db: root.join("blastdb/nt"),
            task: "megablast".to_string(),
            evalue: 1e-5,
            max_target_seqs: 5,
            perc_identity: 90.0,
            qcov_hsp_perc: 50.0,
        },
        taxonomic_filter: TaxonomicFilter::None,
        extract: None,
        barcode_map: None,
        settings: None,
    }
}
