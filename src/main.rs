use anyhow::Result;
use clap::{Parser, Subcommand};
use neighborhood_choropleth::{config, data, processing, render, server};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Join projects to neighborhoods and write the choropleth outputs
    Generate {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
    },
    /// Run the pipeline and serve the results
    Serve {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
    },
    /// Print the neighborhood containing one coordinate
    Lookup {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
    },
}

fn run(app_config: &config::AppConfig) -> Result<(processing::PipelineOutput, render::Styles)> {
    // 1. Load layers
    let polygons = data::load_polygons(app_config)?;
    let records = data::load_points(app_config)?;

    // 2. Join, aggregate, enrich
    let output = processing::run_pipeline(
        records,
        app_config.input.point_crs,
        &polygons,
        &app_config.join,
    )?;

    // 3. Palettes and legends
    let styles = render::build_styles(app_config, &output)?;
    Ok((output, styles))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Generate { config } => {
            info!(config = ?config, "generating choropleth");
            let app_config = config::AppConfig::load_from_file(&config)?;
            let (output, styles) = run(&app_config)?;
            render::write_outputs(&app_config, &output, &styles)?;
            info!("Generation complete");
        }
        Commands::Serve { config } => {
            info!(config = ?config, "serving choropleth");
            let app_config = config::AppConfig::load_from_file(&config)?;
            let (output, styles) = run(&app_config)?;
            render::write_outputs(&app_config, &output, &styles)?;

            let state = server::AppState::new(output.enriched, &styles)?;
            server::start_server(&app_config, state).await?;
        }
        Commands::Lookup { config, lon, lat } => {
            let app_config = config::AppConfig::load_from_file(&config)?;
            let (output, styles) = run(&app_config)?;
            let state = server::AppState::new(output.enriched, &styles)?;

            match state.lookup(lon, lat) {
                Some(hit) => println!("{}", serde_json::to_string_pretty(&hit)?),
                None => println!("({}, {}) is outside every neighborhood", lon, lat),
            }
        }
    }

    Ok(())
}
