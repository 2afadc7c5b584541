//! Runs every stage for sensors around Belgrade and prints the daily PM2.5
//! aggregates.
//!
//! Needs an OpenAQ API key in `OPENAQ_API_KEY`.

use openaq_medallion::{Pipeline, PipelineConfig, PipelineError, StorageConfig, YearRange};
use polars::prelude::{col, lit};
use std::env;

#[tokio::main]
async fn main() -> Result<(), PipelineError> {
    configure_polars_display();
    let config = PipelineConfig::builder()
        .radius_km(5.0)
        .parameters(vec!["pm25".to_string()])
        .years(YearRange::new(2023, 2023))
        .storage(StorageConfig::at("data"))
        .build();
    let pipeline = Pipeline::from_config(config)?;

    println!("{}", pipeline.run_discovery().call().await?);
    println!("{}", pipeline.run_ingestion().call().await?);
    println!("{}", pipeline.run_transform().call().await?);
    println!("{}", pipeline.run_aggregate().call().await?);

    let gold = pipeline
        .scan_gold()?
        .filter(col("parameter").eq(lit("pm25")))
        .sort(["group", "bucket_start"], Default::default())
        .collect()
        .map_err(openaq_medallion::GoldError::Frame)?;
    println!("{:#?}", gold);

    Ok(())
}

fn configure_polars_display() {
    // show every column
    env::set_var("POLARS_FMT_MAX_COLS", "-1");
    env::set_var("POLARS_FMT_MAX_ROWS", "20");
}
