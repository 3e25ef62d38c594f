use crate::palette::{CategoricalPalette, Color, NumericPalette, NumericScale};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LegendPosition {
    TopRight,
    TopLeft,
    #[default]
    BottomRight,
    BottomLeft,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LegendEntry {
    pub label: String,
    pub color: Color,
}

/// Legend metadata handed to whatever draws the map.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Legend {
    pub title: String,
    pub position: LegendPosition,
    /// Numeric value domain, absent for categorical legends.
    pub domain: Option<(f64, f64)>,
    pub entries: Vec<LegendEntry>,
}

const LINEAR_STOPS: usize = 5;

fn format_value(v: f64) -> String {
    if v.fract() == 0.0 {
        format!("{}", v as i64)
    } else {
        let s = format!("{:.2}", v);
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    }
}

impl Legend {
    pub fn numeric(
        title: &str,
        position: LegendPosition,
        palette: &NumericPalette,
        na_label: &str,
    ) -> Self {
        let (domain, mut entries) = match &palette.scale {
            NumericScale::Linear { min, max, .. } => {
                let entries = (0..LINEAR_STOPS)
                    .map(|i| {
                        let v = if max > min {
                            min + (max - min) * i as f64 / (LINEAR_STOPS - 1) as f64
                        } else {
                            *min
                        };
                        LegendEntry {
                            label: format_value(v),
                            color: palette.color(Some(v)),
                        }
                    })
                    .collect();
                (Some((*min, *max)), entries)
            }
            NumericScale::Intervals { edges, colors, .. } => {
                let entries = match edges.len() {
                    0 => Vec::new(),
                    1 => vec![LegendEntry {
                        label: format_value(edges[0]),
                        color: colors[0],
                    }],
                    _ => edges
                        .windows(2)
                        .zip(colors.iter())
                        .map(|(w, color)| LegendEntry {
                            label: format!("{} - {}", format_value(w[0]), format_value(w[1])),
                            color: *color,
                        })
                        .collect(),
                };
                let domain = edges.first().zip(edges.last()).map(|(a, b)| (*a, *b));
                (domain, entries)
            }
        };

        entries.push(LegendEntry {
            label: na_label.to_string(),
            color: palette.na_color,
        });

        Legend {
            title: title.to_string(),
            position,
            domain,
            entries,
        }
    }

    pub fn categorical(
        title: &str,
        position: LegendPosition,
        palette: &CategoricalPalette,
        na_label: &str,
    ) -> Self {
        let mut entries: Vec<LegendEntry> = palette
            .levels
            .iter()
            .zip(palette.colors.iter())
            .map(|(level, color)| LegendEntry {
                label: level.clone(),
                color: *color,
            })
            .collect();
        entries.push(LegendEntry {
            label: na_label.to_string(),
            color: palette.na_color,
        });

        Legend {
            title: title.to_string(),
            position,
            domain: None,
            entries,
        }
    }
}
