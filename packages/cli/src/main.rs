#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI host for the GeoNames enrichment processors.
//!
//! Enriched records are written to stdout as one `GeoJSON` feature per
//! line; logging goes to stderr (`RUST_LOG=debug` for request URLs).

use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use geonames_enrichment::config::{load_properties, resolve_fetch_settings};
use geonames_enrichment::fetch::HttpFeatureService;
use geonames_enrichment::processor::Processor;
use geonames_enrichment::sink::{JsonLinesSink, OutputSink};
use geonames_enrichment::variant_registry::{Variant, all_variants};
use geonames_enrichment_models::{EventDestination, InputEvent};

#[derive(Parser)]
#[command(name = "geonames-enrich", about = "Enrich located events with nearby GeoNames features")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the available variants and their properties
    Variants,
    /// Enrich a single point
    Enrich {
        /// Variant identifier (e.g., "`osm_poi`", "`wikipedia`")
        variant: String,
        /// Longitude in decimal degrees
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,
        /// Latitude in decimal degrees
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        /// Track identifier copied onto every record
        #[arg(long, default_value = "cli")]
        track_id: String,
        /// Event type name; "incident" makes `--id` the incident id
        #[arg(long, default_value = "point")]
        event_type: String,
        /// Event `id` field
        #[arg(long)]
        id: Option<String>,
        /// TOML file with a `[properties]` table
        #[arg(long)]
        config: Option<PathBuf>,
        /// Processor instance id
        #[arg(long, default_value = "geonames-enrich")]
        instance_id: String,
    },
    /// Enrich `GeoJSON` point features read from stdin, one per line
    Stream {
        /// Variant identifier (e.g., "`osm_poi`", "`wikipedia`")
        variant: String,
        /// TOML file with a `[properties]` table
        #[arg(long)]
        config: Option<PathBuf>,
        /// Processor instance id
        #[arg(long, default_value = "geonames-enrich")]
        instance_id: String,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Variants => print_variants(),
        Commands::Enrich {
            variant,
            lon,
            lat,
            track_id,
            event_type,
            id,
            config,
            instance_id,
        } => {
            let processor = build_processor(&variant, config.as_deref(), &instance_id)?;

            let mut event =
                InputEvent::point(track_id, chrono::Utc::now(), event_type, lon, lat);
            event.id = id;

            let report = processor.process(&event);
            processor.disconnect();
            if let Some(failure) = report.failure {
                return Err(failure.into());
            }
            log::info!(
                "{} records published, {} dropped",
                report.published,
                report.dropped
            );
        }
        Commands::Stream {
            variant,
            config,
            instance_id,
        } => {
            let processor = build_processor(&variant, config.as_deref(), &instance_id)?;
            stream(&processor)?;
            processor.disconnect();
        }
    }

    Ok(())
}

fn print_variants() {
    println!("{:<12} {:<28} ENDPOINT", "ID", "NAME");
    println!("{}", "-".repeat(90));
    for descriptor in all_variants() {
        println!(
            "{:<12} {:<28} {}",
            descriptor.id, descriptor.name, descriptor.endpoint
        );
        for property in descriptor.properties.iter() {
            println!(
                "    {:<24} {:<8} default {:<6} {}",
                property.name, property.property_type, property.default, property.label
            );
        }
    }
}

fn build_processor(
    variant: &str,
    config: Option<&Path>,
    instance_id: &str,
) -> Result<Processor, Box<dyn std::error::Error>> {
    let variant: Variant = variant.parse().map_err(|_| {
        let known: Vec<String> = Variant::ALL.iter().map(ToString::to_string).collect();
        format!("Unknown variant '{variant}' (expected one of: {})", known.join(", "))
    })?;

    let properties = match config {
        Some(path) => load_properties(path)?,
        None => toml::Table::new(),
    };

    let service = HttpFeatureService::new(&resolve_fetch_settings(&properties)?)?;
    let sink: Arc<dyn OutputSink> = Arc::new(JsonLinesSink::new(
        EventDestination::for_instance(instance_id),
        std::io::stdout(),
    ));

    let processor = Processor::new(
        instance_id,
        Arc::new(variant.descriptor()),
        &properties,
        Arc::new(service),
        sink,
    )?;
    log::info!("Started {processor}");

    Ok(processor)
}

fn stream(processor: &Processor) -> Result<(), Box<dyn std::error::Error>> {
    let mut events = 0_usize;
    let mut failed = 0_usize;
    let mut published = 0_usize;

    for (index, line) in std::io::stdin().lock().lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let event = match serde_json::from_str::<geojson::Feature>(&line)
            .map_err(|e| e.to_string())
            .and_then(|feature| InputEvent::from_geojson_feature(feature).map_err(|e| e.to_string()))
        {
            Ok(event) => event,
            Err(e) => {
                log::warn!("Skipping line {}: {e}", index + 1);
                continue;
            }
        };

        events += 1;
        let report = processor.process(&event);
        published += report.published;
        if !report.is_success() {
            failed += 1;
        }
    }

    log::info!("{events} events processed ({failed} failed), {published} records published");
    Ok(())
}
