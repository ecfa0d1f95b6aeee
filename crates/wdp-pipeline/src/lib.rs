//! WDP Pipeline Library
//!
//! Batch-correlated weather ETL: fetch current observations for a list of
//! subjects, stage them under one batch handle, derive analytic columns for
//! that batch only, and append the result to a CSV sink.
//!
//! # Stages
//!
//! - **Extract** ([`extract::Extractor`]): fetch every subject, skip failures,
//!   append one batch to the staging store
//! - **Transform** ([`transform::Transformer`]): read one batch back and derive
//!   the output columns
//! - **Load** ([`load::CsvSink`]): append rows to the sink and verify the write
//!
//! [`driver::PipelineDriver`] runs the three stages in order for one trigger.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use wdp_pipeline::config::PipelineConfig;
//! use wdp_pipeline::driver::PipelineDriver;
//! use wdp_pipeline::load::CsvSink;
//! use wdp_pipeline::source::OpenWeatherClient;
//! use wdp_pipeline::staging::PgStagingStore;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = PipelineConfig::load("config.yaml")?;
//!     let store = PgStagingStore::connect(&config.database).await?;
//!     store.migrate().await?;
//!
//!     let driver = PipelineDriver::new(
//!         config.subjects.clone(),
//!         Arc::new(OpenWeatherClient::new(&config.source)?),
//!         Arc::new(store),
//!         CsvSink::new(config.sink.location.clone()),
//!         config.rate_limit_delay(),
//!     );
//!     let report = driver.run_once().await?;
//!     println!("loaded {} rows for batch {}", report.rows_transformed, report.batch);
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod config;
pub mod driver;
pub mod error;
pub mod extract;
pub mod load;
pub mod source;
pub mod staging;
pub mod transform;

pub use error::{PipelineError, Result, Stage};
