use clap::{Arg, ArgMatches, Command};
use std::process;
use std::sync::Arc;

use common::config::Settings;
use etl::backup::BackupUploader;
use etl::storage::{ObjectStorage, S3Storage};
use warehouse::{RawLoader, Warehouse};

#[tokio::main]
async fn main() {
    let matches = Command::new("CPI Pipeline Manager")
        .version("1.0")
        .about("Malaysian CPI extraction and warehouse pipeline")
        .subcommand(
            Command::new("run")
                .about("Run the full ETL pipeline")
                .arg(config_arg()),
        )
        .subcommand(
            Command::new("backup")
                .about("Upload the raw snapshots to object storage")
                .arg(config_arg()),
        )
        .subcommand(
            Command::new("history")
                .about("Show recent warehouse load activity")
                .arg(config_arg()),
        )
        .subcommand(
            Command::new("show")
                .about("Preview the mart tables")
                .arg(config_arg()),
        )
        .get_matches();

    let result = match matches.subcommand() {
        Some(("run", sub)) => run(config_path(sub)).await,
        Some(("backup", sub)) => backup(config_path(sub)).await,
        Some(("history", sub)) => history(config_path(sub)).await,
        Some(("show", sub)) => show(config_path(sub)).await,
        _ => {
            eprintln!("Please specify a valid subcommand");
            process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("Pipeline error: {}", e);
        process::exit(1);
    }
}

fn config_arg() -> Arg {
    Arg::new("config")
        .short('c')
        .long("config")
        .value_name("FILE")
        .help("Sets a custom config file")
}

fn config_path(matches: &ArgMatches) -> &str {
    matches
        .get_one::<String>("config")
        .map(|s| s.as_str())
        .unwrap_or("config/pipeline.toml")
}

async fn run(config_path: &str) -> common::Result<()> {
    let settings = Settings::new(config_path)?;
    let log_file = etl::logging::init_logging(&settings.paths.log_dir)?;
    println!("Logging to {}", log_file.display());

    etl::run_pipeline(&settings).await.map(|_| ())
}

async fn backup(config_path: &str) -> common::Result<()> {
    let settings = Settings::new(config_path)?;
    etl::logging::init_logging(&settings.paths.log_dir)?;

    let storage = Arc::new(S3Storage::new(&settings.s3));
    let uploader = BackupUploader::new(
        Arc::clone(&storage) as Arc<dyn ObjectStorage>,
        &settings.paths.raw_data_dir,
    );
    let report = uploader.upload_data_backup(None).await;
    println!("{}", serde_json::to_string_pretty(&report)?);

    match storage.list_objects("raw/").await {
        Ok(keys) => println!(
            "{} objects under raw/ in bucket {}",
            keys.len(),
            storage.bucket()
        ),
        Err(e) => eprintln!("Could not list bucket contents: {}", e),
    }
    Ok(())
}

async fn history(config_path: &str) -> common::Result<()> {
    let settings = Settings::new(config_path)?;
    let warehouse = Arc::new(Warehouse::open(&settings.paths.warehouse_dir)?);
    let loader = RawLoader::new(warehouse);
    loader.load_history(10).await?.show().await?;
    Ok(())
}

async fn show(config_path: &str) -> common::Result<()> {
    let settings = Settings::new(config_path)?;
    let warehouse = Warehouse::open(&settings.paths.warehouse_dir)?;
    for table in ["inflation_by_state", "inflation_by_category", "state_comparison"] {
        println!("\nmart.{}:", table);
        warehouse
            .sql(&format!("SELECT * FROM mart.{}", table))
            .await?
            .show_limit(20)
            .await?;
    }
    Ok(())
}
