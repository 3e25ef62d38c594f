use crate::crs::Crs;
use crate::legend::LegendPosition;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub input: InputConfig,
    #[serde(default)]
    pub join: JoinConfig,
    #[serde(default)]
    pub palette: PaletteConfig,
    #[serde(default)]
    pub status_palette: Option<StatusPaletteConfig>,
    #[serde(default)]
    pub legend: LegendConfig,
    pub output: OutputConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct InputConfig {
    pub polygons: PathBuf, // GeoJSON or Shapefile
    pub points_csv: PathBuf,
    pub polygon_id_field: String,
    /// Overrides whatever the polygon source declares (or doesn't).
    pub polygon_crs: Option<Crs>,
    #[serde(default)]
    pub point_crs: Crs,
    #[serde(default)]
    pub point_columns: PointColumns,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PointColumns {
    pub name: String,
    pub longitude: String,
    pub latitude: String,
    pub value: String,
    pub status: String,
}

impl Default for PointColumns {
    fn default() -> Self {
        PointColumns {
            name: "project_name".to_string(),
            longitude: "longitude".to_string(),
            latitude: "latitude".to_string(),
            value: "affordable_units".to_string(),
            status: "status".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum JoinStrategy {
    Naive,
    #[default]
    Indexed,
}

/// What to do with points that fall outside every polygon.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum UnmatchedPolicy {
    Ignore,
    #[default]
    Warn,
    Error,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct JoinConfig {
    pub strategy: JoinStrategy,
    pub parallel: bool,
    pub unmatched: UnmatchedPolicy,
    pub keep_null_group: bool,
    pub fill_missing_with_zero: bool,
}

impl Default for JoinConfig {
    fn default() -> Self {
        JoinConfig {
            strategy: JoinStrategy::Indexed,
            parallel: false,
            unmatched: UnmatchedPolicy::Warn,
            keep_null_group: false,
            fill_missing_with_zero: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PaletteKind {
    Linear,
    Bin,
    #[default]
    Quantile,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PaletteConfig {
    pub kind: PaletteKind,
    pub colors: Vec<String>, // Hex codes, low to high
    /// Interval count for `bin` and `quantile`.
    pub bins: usize,
    /// Explicit bin edges; overrides `bins` for `bin`.
    pub edges: Option<Vec<f64>>,
    pub na_color: String,
}

impl Default for PaletteConfig {
    fn default() -> Self {
        PaletteConfig {
            kind: PaletteKind::Quantile,
            colors: vec![
                "#ffffcc".to_string(),
                "#a1dab4".to_string(),
                "#41b6c4".to_string(),
                "#2c7fb8".to_string(),
                "#253494".to_string(),
            ],
            bins: 5,
            edges: None,
            na_color: "#bdbdbd".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StatusPaletteConfig {
    pub levels: Vec<String>,
    pub colors: Vec<String>,
    #[serde(default = "default_na_color")]
    pub na_color: String,
}

fn default_na_color() -> String {
    "#bdbdbd".to_string()
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LegendConfig {
    pub title: String,
    pub position: LegendPosition,
    pub na_label: String,
}

impl Default for LegendConfig {
    fn default() -> Self {
        LegendConfig {
            title: "Affordable units".to_string(),
            position: LegendPosition::BottomRight,
            na_label: "No data".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct OutputConfig {
    pub dir: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig { port: 8080 }
    }
}

impl AppConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "Failed to parse TOML configuration")?;
        Ok(config)
    }
}
