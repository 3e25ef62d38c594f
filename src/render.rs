use crate::config::AppConfig;
use crate::legend::Legend;
use crate::palette::{CategoricalPalette, NumericPalette};
use crate::processing::PipelineOutput;
use crate::types::{Aggregates, EnrichedPolygon, JoinedRecord};
use anyhow::{Context, Result};
use geojson::{feature::Id, Feature, FeatureCollection, JsonObject};
use serde::Serialize;
use serde_json::json;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::info;

// Qualitative fallback when the config names no status colours
const STATUS_COLORS: [&str; 6] = [
    "#1b9e77", "#d95f02", "#7570b3", "#e7298a", "#66a61e", "#e6ab02",
];

pub const NEIGHBORHOODS_FILE: &str = "neighborhoods.geojson";
pub const PROJECTS_FILE: &str = "projects.geojson";
pub const AGGREGATES_FILE: &str = "aggregates.csv";
pub const LEGEND_FILE: &str = "legend.json";

/// Palettes and legends for one pipeline run.
pub struct Styles {
    pub fill: NumericPalette,
    pub status: Option<CategoricalPalette>,
    pub legends: Vec<Legend>,
}

pub fn build_styles(config: &AppConfig, output: &PipelineOutput) -> Result<Styles> {
    let values: Vec<f64> = output.enriched.iter().filter_map(|e| e.value).collect();
    let fill = NumericPalette::from_config(&config.palette, &values)
        .context("Failed to build choropleth palette")?;

    let status = match &config.status_palette {
        Some(status_config) => Some(
            CategoricalPalette::from_config(status_config)
                .context("Failed to build status palette")?,
        ),
        None if output.outcome.joined.is_empty() => None,
        None => {
            let defaults: Vec<String> = STATUS_COLORS.iter().map(|c| c.to_string()).collect();
            Some(CategoricalPalette::from_observed(
                output.outcome.joined.iter().map(|j| j.record.status.as_str()),
                &defaults,
                &config.palette.na_color,
            )?)
        }
    };

    let mut legends = vec![Legend::numeric(
        &config.legend.title,
        config.legend.position,
        &fill,
        &config.legend.na_label,
    )];
    if let Some(status) = &status {
        legends.push(Legend::categorical(
            "Project status",
            config.legend.position,
            status,
            &config.legend.na_label,
        ));
    }

    Ok(Styles {
        fill,
        status,
        legends,
    })
}

fn feature(id: Option<String>, geometry: geojson::Value, properties: JsonObject) -> Feature {
    Feature {
        bbox: None,
        geometry: Some(geojson::Geometry::new(geometry)),
        id: id.map(Id::String),
        properties: Some(properties),
        foreign_members: None,
    }
}

fn collection(features: Vec<Feature>) -> FeatureCollection {
    FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    }
}

/// Enriched polygons as features carrying `value` (null when there is no
/// data) and a `fill` colour.
pub fn neighborhood_features(enriched: &[EnrichedPolygon], palette: &NumericPalette) -> FeatureCollection {
    let features = enriched
        .iter()
        .map(|e| {
            let mut props = JsonObject::new();
            props.insert("id".to_string(), json!(e.polygon.id));
            props.insert("value".to_string(), json!(e.value));
            props.insert("has_data".to_string(), json!(e.value.is_some()));
            props.insert("fill".to_string(), json!(palette.color(e.value).to_hex()));
            feature(
                Some(e.polygon.id.clone()),
                geojson::Value::from(&e.polygon.geometry),
                props,
            )
        })
        .collect();
    collection(features)
}

/// Joined projects as point features, coloured by status when a palette is given.
pub fn project_features(
    joined: &[JoinedRecord],
    status: Option<&CategoricalPalette>,
) -> FeatureCollection {
    let features = joined
        .iter()
        .map(|j| {
            let point = geo::Point::new(j.record.longitude, j.record.latitude);
            let mut props = JsonObject::new();
            props.insert("name".to_string(), json!(j.record.name));
            props.insert("units".to_string(), json!(j.record.units));
            props.insert("status".to_string(), json!(j.record.status));
            props.insert("neighborhood".to_string(), json!(j.neighborhood));
            if let Some(palette) = status {
                props.insert(
                    "marker_color".to_string(),
                    json!(palette.color(Some(j.record.status.as_str())).to_hex()),
                );
            }
            feature(None, geojson::Value::from(&point), props)
        })
        .collect();
    collection(features)
}

#[derive(Serialize)]
struct AggregateRow<'a> {
    // Empty for the unmatched group
    neighborhood: Option<&'a str>,
    total_units: f64,
    projects: usize,
}

pub fn write_aggregates_csv(path: &Path, aggregates: &Aggregates) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {:?}", path))?;

    for (id, group) in &aggregates.groups {
        writer.serialize(AggregateRow {
            neighborhood: Some(id.as_str()),
            total_units: group.sum,
            projects: group.count,
        })?;
    }
    if let Some(group) = &aggregates.null_group {
        writer.serialize(AggregateRow {
            neighborhood: None,
            total_units: group.sum,
            projects: group.count,
        })?;
    }
    writer.flush()?;
    Ok(())
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let file = File::create(path).with_context(|| format!("Failed to create {:?}", path))?;
    serde_json::to_writer(BufWriter::new(file), value)
        .with_context(|| format!("Failed to write {:?}", path))?;
    Ok(())
}

/// Write every output file into `config.output.dir`, returning the paths written.
pub fn write_outputs(config: &AppConfig, output: &PipelineOutput, styles: &Styles) -> Result<Vec<PathBuf>> {
    let dir = &config.output.dir;
    fs::create_dir_all(dir).with_context(|| format!("Failed to create output directory {:?}", dir))?;

    let neighborhoods = dir.join(NEIGHBORHOODS_FILE);
    write_json(&neighborhoods, &neighborhood_features(&output.enriched, &styles.fill))?;

    let projects = dir.join(PROJECTS_FILE);
    write_json(
        &projects,
        &project_features(&output.outcome.joined, styles.status.as_ref()),
    )?;

    let aggregates = dir.join(AGGREGATES_FILE);
    write_aggregates_csv(&aggregates, &output.aggregates)?;

    let legend = dir.join(LEGEND_FILE);
    write_json(&legend, &styles.legends)?;

    let written = vec![neighborhoods, projects, aggregates, legend];
    info!(dir = ?dir, files = written.len(), "wrote outputs");
    Ok(written)
}
