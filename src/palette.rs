//! Value-to-colour mappings for choropleth fills and marker colours.
//!
//! Every palette carries an explicit "no data" colour: `None` inputs never
//! fall into the bottom bin of a numeric scale.

use crate::config::{PaletteConfig, PaletteKind, StatusPaletteConfig};
use crate::error::{PipelineError, PipelineResult};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color(pub [u8; 3]);

impl Color {
    pub fn from_hex(hex: &str) -> PipelineResult<Self> {
        let digits = hex.trim().trim_start_matches('#');
        if digits.len() != 6 || !digits.is_ascii() {
            return Err(PipelineError::InvalidColor(hex.to_string()));
        }
        let channel = |range: std::ops::Range<usize>| {
            u8::from_str_radix(&digits[range], 16)
                .map_err(|_| PipelineError::InvalidColor(hex.to_string()))
        };
        Ok(Color([channel(0..2)?, channel(2..4)?, channel(4..6)?]))
    }

    pub fn to_hex(&self) -> String {
        let [r, g, b] = self.0;
        format!("#{:02x}{:02x}{:02x}", r, g, b)
    }

    fn lerp(a: Color, b: Color, t: f64) -> Color {
        let mix = |x: u8, y: u8| (x as f64 + (y as f64 - x as f64) * t).round() as u8;
        Color([mix(a.0[0], b.0[0]), mix(a.0[1], b.0[1]), mix(a.0[2], b.0[2])])
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for Color {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

fn parse_colors(hexes: &[String]) -> PipelineResult<Vec<Color>> {
    if hexes.is_empty() {
        return Err(PipelineError::InvalidPalette("no colours given".to_string()));
    }
    hexes.iter().map(|h| Color::from_hex(h)).collect()
}

/// Colour at position `t` in [0, 1] along a multi-stop ramp.
fn sample_ramp(ramp: &[Color], t: f64) -> Color {
    if ramp.len() == 1 {
        return ramp[0];
    }
    let pos = t.clamp(0.0, 1.0) * (ramp.len() - 1) as f64;
    let lower = pos.floor() as usize;
    if lower >= ramp.len() - 1 {
        return ramp[ramp.len() - 1];
    }
    Color::lerp(ramp[lower], ramp[lower + 1], pos - lower as f64)
}

/// Stretch or squeeze a ramp to exactly `n` colours.
fn resample(ramp: &[Color], n: usize) -> Vec<Color> {
    if ramp.len() == n {
        return ramp.to_vec();
    }
    match n {
        0 => Vec::new(),
        1 => vec![ramp[0]],
        _ => (0..n)
            .map(|i| sample_ramp(ramp, i as f64 / (n - 1) as f64))
            .collect(),
    }
}

/// Index of the interval `[edges[i], edges[i+1])` holding `value`; the last
/// interval is closed on the right. Values beyond the edges clamp to the end
/// intervals, so real data never shares the no-data colour.
fn interval_index(edges: &[f64], value: f64) -> Option<usize> {
    if edges.is_empty() {
        return None;
    }
    let upper = edges.partition_point(|e| *e <= value);
    Some(upper.saturating_sub(1).min(edges.len().saturating_sub(2)))
}

/// Type-7 sample quantile (linear interpolation between order statistics).
fn sample_quantile(sorted: &[f64], p: f64) -> f64 {
    let h = (sorted.len() - 1) as f64 * p;
    let lo = h.floor() as usize;
    let hi = h.ceil() as usize;
    sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo])
}

#[derive(Debug, Clone, PartialEq)]
pub enum NumericScale {
    Linear { min: f64, max: f64, ramp: Vec<Color> },
    /// Equal-width (`Bin`) or equal-count (`Quantile`) intervals.
    Intervals { edges: Vec<f64>, colors: Vec<Color> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct NumericPalette {
    pub scale: NumericScale,
    pub na_color: Color,
}

impl NumericPalette {
    /// Continuous ramp over the observed range. Values outside the domain clamp.
    pub fn linear(colors: &[String], values: &[f64], na_color: &str) -> PipelineResult<Self> {
        let ramp = parse_colors(colors)?;
        let (min, max) = value_range(values).unwrap_or((0.0, 0.0));
        Ok(NumericPalette {
            scale: NumericScale::Linear { min, max, ramp },
            na_color: Color::from_hex(na_color)?,
        })
    }

    /// `bins` equal-width intervals over the observed range.
    pub fn bin(
        colors: &[String],
        values: &[f64],
        bins: usize,
        na_color: &str,
    ) -> PipelineResult<Self> {
        if bins == 0 {
            return Err(PipelineError::InvalidPalette("bin count must be positive".to_string()));
        }
        let edges = match value_range(values) {
            Some((min, max)) if max > min => {
                let width = (max - min) / bins as f64;
                let mut edges: Vec<f64> = (0..bins).map(|i| min + width * i as f64).collect();
                edges.push(max);
                edges
            }
            Some((min, _)) => vec![min, min],
            None => Vec::new(),
        };
        Self::intervals(colors, edges, na_color)
    }

    /// Caller-supplied bin edges, which must be strictly increasing.
    pub fn bin_edges(colors: &[String], edges: &[f64], na_color: &str) -> PipelineResult<Self> {
        if edges.len() < 2 {
            return Err(PipelineError::InvalidPalette(
                "at least two bin edges are required".to_string(),
            ));
        }
        if edges.iter().any(|e| !e.is_finite()) || edges.windows(2).any(|w| w[0] >= w[1]) {
            return Err(PipelineError::InvalidPalette(
                "bin edges must be finite and strictly increasing".to_string(),
            ));
        }
        Self::intervals(colors, edges.to_vec(), na_color)
    }

    /// `n` intervals holding (as near as ties allow) equal observation counts.
    pub fn quantile(
        colors: &[String],
        values: &[f64],
        n: usize,
        na_color: &str,
    ) -> PipelineResult<Self> {
        if n == 0 {
            return Err(PipelineError::InvalidPalette(
                "quantile count must be positive".to_string(),
            ));
        }
        let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
        sorted.sort_by(f64::total_cmp);

        let mut edges: Vec<f64> = Vec::new();
        if !sorted.is_empty() {
            for i in 0..=n {
                let q = sample_quantile(&sorted, i as f64 / n as f64);
                // Heavy ties collapse neighbouring breaks
                if edges.last() != Some(&q) {
                    edges.push(q);
                }
            }
        }
        Self::intervals(colors, edges, na_color)
    }

    fn intervals(colors: &[String], edges: Vec<f64>, na_color: &str) -> PipelineResult<Self> {
        let ramp = parse_colors(colors)?;
        let count = edges.len().saturating_sub(1).max(1);
        Ok(NumericPalette {
            scale: NumericScale::Intervals {
                edges,
                colors: resample(&ramp, count),
            },
            na_color: Color::from_hex(na_color)?,
        })
    }

    pub fn from_config(config: &PaletteConfig, values: &[f64]) -> PipelineResult<Self> {
        match config.kind {
            PaletteKind::Linear => Self::linear(&config.colors, values, &config.na_color),
            PaletteKind::Bin => match &config.edges {
                Some(edges) => Self::bin_edges(&config.colors, edges, &config.na_color),
                None => Self::bin(&config.colors, values, config.bins, &config.na_color),
            },
            PaletteKind::Quantile => {
                Self::quantile(&config.colors, values, config.bins, &config.na_color)
            }
        }
    }

    pub fn color(&self, value: Option<f64>) -> Color {
        let Some(v) = value.filter(|v| v.is_finite()) else {
            return self.na_color;
        };
        match &self.scale {
            NumericScale::Linear { min, max, ramp } => {
                let t = if max > min { (v - min) / (max - min) } else { 0.0 };
                sample_ramp(ramp, t)
            }
            NumericScale::Intervals { edges, colors } => interval_index(edges, v)
                .and_then(|i| colors.get(i).copied())
                .unwrap_or(self.na_color),
        }
    }
}

fn value_range(values: &[f64]) -> Option<(f64, f64)> {
    values
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(None, |acc, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
}

#[derive(Debug, Clone, PartialEq)]
pub struct CategoricalPalette {
    pub levels: Vec<String>,
    pub colors: Vec<Color>,
    pub na_color: Color,
}

impl CategoricalPalette {
    pub fn new(levels: &[String], colors: &[String], na_color: &str) -> PipelineResult<Self> {
        if levels.is_empty() {
            return Err(PipelineError::InvalidPalette("no categories given".to_string()));
        }
        let ramp = parse_colors(colors)?;
        Ok(CategoricalPalette {
            levels: levels.to_vec(),
            colors: resample(&ramp, levels.len()),
            na_color: Color::from_hex(na_color)?,
        })
    }

    pub fn from_config(config: &StatusPaletteConfig) -> PipelineResult<Self> {
        Self::new(&config.levels, &config.colors, &config.na_color)
    }

    /// Levels taken from the data in first-seen order.
    pub fn from_observed<'a, I>(values: I, colors: &[String], na_color: &str) -> PipelineResult<Self>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut levels: Vec<String> = Vec::new();
        for v in values {
            if !levels.iter().any(|l| l == v) {
                levels.push(v.to_string());
            }
        }
        Self::new(&levels, colors, na_color)
    }

    pub fn color(&self, value: Option<&str>) -> Color {
        value
            .and_then(|v| self.levels.iter().position(|l| l == v))
            .map(|i| self.colors[i])
            .unwrap_or(self.na_color)
    }
}
