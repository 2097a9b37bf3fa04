mod common;

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tempfile::tempdir;

use common::{base_config, kraken_db, settings, write, FakeRunner, BASECALLED_READS};
use nanotax_pipelines::cli::InputKind;
use nanotax_pipelines::config::defs::{ExtractParams, PipelineError, Stage};
use nanotax_pipelines::pipelines::long_read::run;
use nanotax_pipelines::utils::barcode::SampleBarcodeMap;
use nanotax_pipelines::utils::blast::read_hits;
use nanotax_pipelines::utils::taxonomy::TaxonomicFilter;

const FASTQ_S1: &str = "@s1_read\nACGTACGTAC\n+\nIIIIIIIIII\n";
const FASTQ_S2: &str = "@s2_read\nGGGGCCCCAA\n+\nIIIIIIIIII\n";


#[tokio::test]
async fn test_pod5_run_chains_every_enabled_stage() -> Result<()> {
    let dir = tempdir()?;
    let root = dir.path();
    let pod5 = root.join("pod5");
    fs::create_dir_all(&pod5)?;
    write(&root.join("refs/host.fa"), ">chr1\nACGT\n")?;
    write(&root.join("refs/human.fa"), ">chr1\nACGT\n")?;

    let mut config = base_config(InputKind::Pod5, &pod5, root);
    config.settings = Some(settings("S1", false));
    config.stages.host_removal = true;
    config.stages.human_removal = true;
    config.stages.classification = true;
    config.host_reference = Some(root.join("refs/host.fa"));
    config.human_reference = Some(root.join("refs/human.fa"));
    config.kraken_db = Some(kraken_db(root)?);
    let out = config.out_dir.clone();

    let runner = FakeRunner::default();
    let summary = run(Arc::new(config), &runner).await?;

    assert_eq!(summary.state, Stage::Done);
    assert!(summary.failures.is_empty());
    assert_eq!(
        runner.tools(),
        vec!["dorado", "chopper", "seqkit", "minimap2", "samtools", "minimap2", "samtools", "kraken2", "blastn"]
    );

    // Each stage consumes the previous stage's output
    let aligns = runner.calls_to("minimap2");
    assert_eq!(aligns[0].args.last().map(PathBuf::from), Some(out.join("basecall/S1.fastq")));
    assert_eq!(aligns[1].args.last().map(PathBuf::from), Some(out.join("analysis/host/S1_notHost.fastq")));
    let classify = &runner.calls_to("kraken2")[0];
    assert_eq!(classify.args.last().map(PathBuf::from), Some(out.join("analysis/human/S1_notHuman.fastq")));
    assert_eq!(classify.arg_value("--unclassified-out").map(PathBuf::from), Some(out.join("analysis/kraken2/S1.k2unc")));
    let search = &runner.calls_to("blastn")[0];
    assert_eq!(search.arg_value("-query").map(PathBuf::from), Some(out.join("analysis/blast/S1.fasta")));

    // Database is read from a scratch copy that is gone afterwards
    let staged = PathBuf::from(classify.arg_value("--db").unwrap());
    assert!(staged.starts_with(root.join("ram")));
    assert!(!staged.exists());

    assert!(out.join("analysis/host/S1_host.sam").is_file());
    assert!(out.join("analysis/human/S1_human.sam").is_file());

    // Search input comes from the classifier's unclassified reads, not an earlier filter
    let not_human = fs::read_to_string(out.join("analysis/human/S1_notHuman.fastq"))?;
    assert!(not_human.starts_with("@read1 runid=abc host human\n"));
    let fasta = fs::read_to_string(out.join("analysis/blast/S1.fasta"))?;
    assert_eq!(
        fasta,
        ">read1 runid=abc host human unclassified\nACGTACGTAC\n>read2 runid=abc host human unclassified\nTTGGCCAATT\n"
    );

    let table = fs::read_to_string(&summary.tables["S1"])?;
    assert!(table.starts_with("query-id\t"));
    let hits = read_hits(&summary.tables["S1"])?;
    assert_eq!(hits.iter().map(|h| h.qseqid.as_str()).collect::<Vec<_>>(), vec!["read1", "read2"]);
    assert_eq!(hits[0].sscinames, "Escherichia coli");
    assert_eq!(hits[0].qend, 10);
    assert!(out.join("basecall/S1_stats.tsv").is_file());
    Ok(())
}


#[tokio::test]
async fn test_barcoded_run_keeps_samples_apart() -> Result<()> {
    let dir = tempdir()?;
    let root = dir.path();
    let pod5 = root.join("pod5");
    fs::create_dir_all(&pod5)?;

    let mut config = base_config(InputKind::Pod5, &pod5, root);
    config.settings = Some(settings("pooled", true));
    config.stages.barcoded = true;
    config.barcode_map = Some(SampleBarcodeMap::from_declarations(&["alpha=barcode02", "beta=barcode03"])?);
    let out = config.out_dir.clone();

    let runner = FakeRunner::with_demux(&[
        ("SQK-RBK114-24_barcode02.fastq", "@a1\nAAAAAAAA\n+\nIIIIIIII\n"),
        ("barcode03/frag_0.fastq", "@b1\nCCCCCCCC\n+\nIIIIIIII\n"),
        ("barcode03/none_0.fastq", "@b2\nGGGGGGGG\n+\nIIIIIIII\n"),
        ("unclassified.fastq", "@u1\nTTTTTTTT\n+\nIIIIIIII\n"),
    ]);
    let summary = run(Arc::new(config), &runner).await?;

    assert_eq!(summary.tables.keys().collect::<Vec<_>>(), vec!["alpha", "beta"]);
    let dorado = runner.calls_to("dorado");
    assert_eq!(dorado[0].args[0], "basecaller");
    assert_eq!(dorado[0].arg_value("--kit-name"), Some("SQK-RBK114-24"));
    assert_eq!(dorado[0].stdout.as_ref(), Some(&out.join("basecall/calls.fastq")));
    assert_eq!(dorado[1].args[0], "demux");

    // Trimming reads each sample's reconciled file
    let trims = runner.calls_to("chopper");
    let trim_inputs: Vec<_> = trims.iter().map(|c| c.stdin.clone()).collect();
    assert_eq!(
        trim_inputs,
        vec![Some(out.join("basecall/alpha_basecalled.fastq")), Some(out.join("basecall/beta_basecalled.fastq"))]
    );
    assert_eq!(fs::read_to_string(out.join("basecall/beta_basecalled.fastq"))?, "@b1\nCCCCCCCC\n+\nIIIIIIII\n@b2\nGGGGGGGG\n+\nIIIIIIII\n");

    let alpha = fs::read_to_string(out.join("analysis/blast/alpha.fasta"))?;
    let beta = fs::read_to_string(out.join("analysis/blast/beta.fasta"))?;
    assert_eq!(alpha, ">a1\nAAAAAAAA\n");
    assert_eq!(beta, ">b1\nCCCCCCCC\n>b2\nGGGGGGGG\n");
    assert!(!alpha.contains("u1") && !beta.contains("u1"));
    Ok(())
}


#[tokio::test]
async fn test_missing_barcode_fails_before_writing() -> Result<()> {
    let dir = tempdir()?;
    let root = dir.path();
    let pod5 = root.join("pod5");
    fs::create_dir_all(&pod5)?;

    let mut config = base_config(InputKind::Pod5, &pod5, root);
    config.settings = Some(settings("pooled", true));
    config.stages.barcoded = true;
    config.barcode_map = Some(SampleBarcodeMap::from_declarations(&["alpha=barcode02", "gamma=barcode05"])?);
    let out = config.out_dir.clone();

    let runner = FakeRunner::with_demux(&[("SQK-RBK114-24_barcode02.fastq", "@a1\nAAAA\n+\nIIII\n")]);
    match run(Arc::new(config), &runner).await {
        Err(PipelineError::BarcodeNotFound { sample, barcode, .. }) => {
            assert_eq!(sample, "gamma");
            assert_eq!(barcode, 5);
        }
        other => panic!("Expected BarcodeNotFound, got {:?}", other),
    }
    assert!(!out.join("basecall/alpha_basecalled.fastq").exists());
    assert!(runner.calls_to("blastn").is_empty());
    Ok(())
}


#[tokio::test]
async fn test_adaptive_reads_are_not_basecalled() -> Result<()> {
    let dir = tempdir()?;
    let root = dir.path();
    let pod5 = root.join("pod5");
    fs::create_dir_all(&pod5)?;

    let mut config = base_config(InputKind::Pod5, &pod5, root);
    config.settings = Some(settings("S1", false));
    config.basecall.exclude_adaptive = true;
    let out = config.out_dir.clone();

    let runner = FakeRunner::default();
    run(Arc::new(config), &runner).await?;

    assert_eq!(runner.tools()[..2], ["pod5", "dorado"]);
    let read_ids = out.join("basecall/read_ids.txt");
    assert_eq!(runner.calls_to("dorado")[0].arg_value("--read-ids").map(PathBuf::from), Some(read_ids.clone()));
    assert_eq!(fs::read_to_string(read_ids)?, "r1\nr3\n");
    assert_eq!(fs::read_to_string(out.join("basecall/adaptive_read_ids.txt"))?, "r2\n");
    Ok(())
}


#[tokio::test]
async fn test_taxonomic_filter_reaches_search() -> Result<()> {
    for (answer, flag, other) in [
        ("restrict 620,561", "-taxids", "-negative_taxids"),
        ("exclude 620,561", "-negative_taxids", "-taxids"),
    ] {
        let dir = tempdir()?;
        let root = dir.path();
        let input = root.join("S1.fasta");
        write(&input, ">contig1\nACGTACGT\n")?;

        let mut config = base_config(InputKind::File, &input, root);
        config.taxonomic_filter = TaxonomicFilter::build(answer)?;

        let runner = FakeRunner::default();
        run(Arc::new(config), &runner).await?;

        let search = &runner.calls_to("blastn")[0];
        assert_eq!(search.arg_value(flag), Some("620,561"));
        assert_eq!(search.arg_value(other), None);
        // Plain FASTA is searched in place
        assert_eq!(search.arg_value("-query").map(PathBuf::from), Some(input));
    }
    Ok(())
}


#[tokio::test]
async fn test_classified_reads_are_extracted_by_taxid() -> Result<()> {
    let include_root = ExtractParams { taxids: vec![1], include_children: true, ..Default::default() };
    let exclude_root = ExtractParams { exclude: true, fastq_output: true, ..include_root.clone() };
    for (params, name, expected) in [
        (include_root, "S1-1-extract.fasta", ">read1 runid=abc human\nACGTACGTAC\n"),
        (exclude_root, "S1-1-extract.fastq", "@read2 runid=abc human\nTTGGCCAATT\n+\nIIIIIIIIII\n"),
    ] {
        let dir = tempdir()?;
        let root = dir.path();
        let input = root.join("S1.fastq");
        write(&input, BASECALLED_READS)?;
        write(&root.join("refs/human.fa"), ">chr1\nACGT\n")?;

        let mut config = base_config(InputKind::File, &input, root);
        config.stages.human_removal = true;
        config.stages.classification = true;
        config.human_reference = Some(root.join("refs/human.fa"));
        config.kraken_db = Some(kraken_db(root)?);
        config.extract = Some(params);
        let out = config.out_dir.clone();

        let runner = FakeRunner::default();
        let summary = run(Arc::new(config), &runner).await?;

        // Reads come from the file kraken2 classified
        let extract = out.join("analysis/kraken2").join(name);
        assert_eq!(summary.extracts.get("S1"), Some(&extract));
        assert_eq!(fs::read_to_string(&extract)?, expected);
        assert!(summary.tables.contains_key("S1"));
    }
    Ok(())
}


#[tokio::test]
async fn test_extraction_failure_keeps_the_sample() -> Result<()> {
    let dir = tempdir()?;
    let root = dir.path();
    let input = root.join("S1.fasta");
    write(&input, ">read1\nACGTACGTAC\n")?;
    write(&root.join("refs/human.fa"), ">chr1\nACGT\n")?;

    let mut config = base_config(InputKind::File, &input, root);
    config.stages.human_removal = true;
    config.stages.classification = true;
    config.human_reference = Some(root.join("refs/human.fa"));
    config.kraken_db = Some(kraken_db(root)?);
    // FASTQ output cannot be written from FASTA reads
    config.extract = Some(ExtractParams { taxids: vec![562], fastq_output: true, ..Default::default() });

    let runner = FakeRunner::default();
    let summary = run(Arc::new(config), &runner).await?;

    assert!(summary.extracts.is_empty());
    assert!(summary.failures.is_empty());
    assert!(summary.tables.contains_key("S1"));
    Ok(())
}


#[tokio::test]
async fn test_file_input_skips_host_removal() -> Result<()> {
    let dir = tempdir()?;
    let root = dir.path();
    let input = root.join("S1.fastq");
    write(&input, FASTQ_S1)?;
    write(&root.join("refs/host.fa"), ">chr1\nACGT\n")?;
    write(&root.join("refs/human.fa"), ">chr1\nACGT\n")?;

    let mut config = base_config(InputKind::File, &input, root);
    config.stages.host_removal = true;
    config.stages.human_removal = true;
    config.host_reference = Some(root.join("refs/host.fa"));
    config.human_reference = Some(root.join("refs/human.fa"));
    let out = config.out_dir.clone();

    let runner = FakeRunner::default();
    let summary = run(Arc::new(config), &runner).await?;

    assert_eq!(runner.tools(), vec!["minimap2", "samtools", "blastn"]);
    let align = &runner.calls_to("minimap2")[0];
    assert_eq!(align.args.last().map(PathBuf::from), Some(input));
    assert_eq!(align.arg_value("-o").map(PathBuf::from), Some(out.join("analysis/human/S1_human.sam")));
    assert!(!out.join("analysis/host").exists());
    assert_eq!(read_hits(&summary.tables["S1"])?.len(), 1);
    Ok(())
}


#[tokio::test]
async fn test_failed_sample_is_dropped() -> Result<()> {
    let dir = tempdir()?;
    let root = dir.path();
    let input = root.join("reads");
    write(&input.join("S1.fastq"), FASTQ_S1)?;
    write(&input.join("S2.fastq"), FASTQ_S2)?;
    write(&input.join("notes.txt"), "not a sequence file")?;
    write(&root.join("refs/human.fa"), ">chr1\nACGT\n")?;

    let mut config = base_config(InputKind::File, &input, root);
    config.stages.human_removal = true;
    config.human_reference = Some(root.join("refs/human.fa"));

    let runner = FakeRunner::failing("minimap2", "S2.fastq");
    let summary = run(Arc::new(config), &runner).await?;

    assert_eq!(summary.state, Stage::Done);
    assert_eq!(summary.tables.keys().collect::<Vec<_>>(), vec!["S1"]);
    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].sample, "S2");
    assert_eq!(summary.failures[0].stage, Stage::HumanFiltering);
    assert!(runner.calls_to("blastn").iter().all(|c| !c.command_line().contains("S2")));
    Ok(())
}


#[tokio::test]
async fn test_unknown_format_fails_run() -> Result<()> {
    let dir = tempdir()?;
    let root = dir.path();
    let input = root.join("S1.fastq");
    write(&input, "#not a sequence\nACGT\n")?;

    let runner = FakeRunner::default();
    let result = run(Arc::new(base_config(InputKind::File, &input, root)), &runner).await;

    match result {
        Err(PipelineError::UnknownSequenceFormat { marker, .. }) => assert_eq!(marker, Some('#')),
        other => panic!("Expected UnknownSequenceFormat, got {:?}", other),
    }
    assert!(runner.calls().is_empty());
    Ok(())
}


#[tokio::test]
async fn test_empty_input_leaves_no_samples() -> Result<()> {
    let dir = tempdir()?;
    let root = dir.path();
    let input = root.join("S1.fastq");
    write(&input, "\n\n")?;

    let runner = FakeRunner::default();
    let result = run(Arc::new(base_config(InputKind::File, &input, root)), &runner).await;

    assert!(matches!(result, Err(PipelineError::NoSamplesRemaining { stage: Stage::FormatConversion })));
    Ok(())
}


#[tokio::test]
async fn test_search_failure_for_every_sample_fails_run() -> Result<()> {
    let dir = tempdir()?;
    let root = dir.path();
    let input = root.join("S1.fastq");
    write(&input, FASTQ_S1)?;

    let runner = FakeRunner::failing("blastn", "S1");
    let result = run(Arc::new(base_config(InputKind::File, &input, root)), &runner).await;

    assert!(matches!(result, Err(PipelineError::NoSamplesRemaining { stage: Stage::Searching })));
    Ok(())
}
