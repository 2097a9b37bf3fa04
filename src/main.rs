use std::env;
use std::io::Write;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use env_logger::Builder;
use log::{self, LevelFilter, debug, error, info, warn};

use nanotax_pipelines::cli::parse;
use nanotax_pipelines::config::defs::PipelineConfig;
use nanotax_pipelines::pipelines::long_read;
use nanotax_pipelines::utils::command::{check_versions, required_tools};
use nanotax_pipelines::utils::streams::ProcessRunner;
use nanotax_pipelines::utils::system::{detect_cores_and_load, get_ram_temp_dir};


#[tokio::main]
async fn main() -> Result<()> {
    let run_start = Instant::now();

    let args = parse();

    let log_level = if args.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    Builder::new()
        .filter_level(log_level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] {}: {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .init();

    println!("\n-------------\n NanoTax\n-------------\n");

    let dir = env::current_dir()?;
    info!("The current directory is {:?}\n", dir);

    let ram_temp_dir = get_ram_temp_dir();
    info!("The RAM temp directory is {:?}\n", ram_temp_dir);

    let (max_cores, cpu_load) = detect_cores_and_load(args.threads).await?;
    debug!("Using {} threads for external tools; CPU load {}%", max_cores, cpu_load);

    let config = match PipelineConfig::from_args(&args, &dir, max_cores, ram_temp_dir) {
        Ok(config) => Arc::new(config),
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };
    info!("Output directory: {}", config.out_dir.display());

    if let Err(e) = check_versions(&required_tools(&config)).await {
        error!("Tool check failed: {}", e);
        std::process::exit(1);
    }

    let summary = match long_read::run(config, &ProcessRunner).await {
        Ok(summary) => summary,
        Err(e) => {
            error!("Pipeline failed: {} at {} milliseconds.", e, run_start.elapsed().as_millis());
            std::process::exit(1);
        }
    };

    for failure in &summary.failures {
        warn!("Sample {} dropped during {}: {}", failure.sample, failure.stage, failure.error);
    }
    for (sample, table) in &summary.tables {
        info!("{}: {}", sample, table.display());
    }
    for (sample, extract) in &summary.extracts {
        info!("{}: extracted reads in {}", sample, extract.display());
    }

    println!("Run complete: {} milliseconds.", run_start.elapsed().as_millis());
    Ok(())
}
