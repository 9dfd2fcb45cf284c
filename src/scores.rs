use std::{fmt, fs, path::Path};

use egui::{Color32, Pos2, pos2};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
    RidewatchError,
    records::{Row, coerce_f64},
};

pub const MAX_SCORE: f64 = 10.0;

pub const BLUE: Color32 = Color32::from_rgb(0x3b, 0x82, 0xf6);
pub const GREEN: Color32 = Color32::from_rgb(0x10, 0xb9, 0x81);
pub const AMBER: Color32 = Color32::from_rgb(0xf5, 0x9e, 0x0b);
pub const RED: Color32 = Color32::from_rgb(0xef, 0x44, 0x44);
pub const PURPLE: Color32 = Color32::from_rgb(0x8b, 0x5c, 0xf6);

/// Sub-metric colors, by position
pub const METRIC_PALETTE: [Color32; 5] = [BLUE, GREEN, AMBER, RED, PURPLE];

/// Pre-computed safety scores of a ride, each nominally in 0..=10.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyScoreInputs {
    pub overall: f64,
    pub acceleration: f64,
    pub gyroscope: f64,
    pub events: f64,
    pub potholes: f64,
    pub speed_consistency: f64,
}

impl SafetyScoreInputs {
    /// Reads scores from a loosely typed row. Missing or non-numeric values
    /// count as 0.
    pub fn from_row(row: &Row) -> Self {
        let value = |name: &str| row.get(name).and_then(coerce_f64).unwrap_or(0.0);
        Self {
            overall: value("overall"),
            acceleration: value("acceleration"),
            gyroscope: value("gyroscope"),
            events: value("events"),
            potholes: value("potholes"),
            speed_consistency: value("speed_consistency"),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, RidewatchError> {
        let invalid = || RidewatchError::InvalidScoreFile {
            path: path.display().to_string(),
        };
        let contents = fs::read_to_string(path).map_err(|_| invalid())?;
        let row: Row = serde_json::from_str(&contents).map_err(|_| invalid())?;
        if !row.is_object() {
            return Err(invalid());
        }
        debug!("Loaded scores from {}", path.display());
        Ok(Self::from_row(&row))
    }
}

/// Clamps a score into 0..=10. NaN becomes 0.
pub fn clamp_score(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, MAX_SCORE)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScoreTier {
    Excellent,
    Good,
    NeedsImprovement,
    Poor,
}

impl ScoreTier {
    pub fn for_score(score: f64) -> Self {
        if score >= 8.0 {
            ScoreTier::Excellent
        } else if score >= 6.0 {
            ScoreTier::Good
        } else if score >= 4.0 {
            ScoreTier::NeedsImprovement
        } else {
            ScoreTier::Poor
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ScoreTier::Excellent => "Excellent",
            ScoreTier::Good => "Good",
            ScoreTier::NeedsImprovement => "Needs Improvement",
            ScoreTier::Poor => "Poor",
        }
    }

    pub fn color(self) -> Color32 {
        match self {
            ScoreTier::Excellent => GREEN,
            ScoreTier::Good => BLUE,
            ScoreTier::NeedsImprovement => AMBER,
            ScoreTier::Poor => RED,
        }
    }
}

impl fmt::Display for ScoreTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct MetricBar {
    pub label: &'static str,
    pub value: f64,
    pub color: Color32,
}

/// One corner of the radar polygon. The first points straight up, the rest
/// follow clockwise.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RadarVertex {
    pub angle_degrees: f32,
    /// Distance from the center, 1.0 is the outer ring
    pub reach: f32,
}

impl RadarVertex {
    pub fn to_point(self, center: Pos2, radius: f32) -> Pos2 {
        let angle = self.angle_degrees.to_radians();
        pos2(
            center.x + angle.cos() * radius * self.reach,
            center.y + angle.sin() * radius * self.reach,
        )
    }
}

/// Everything needed to draw the score gauge and charts.
#[derive(Clone, Debug, PartialEq)]
pub struct ScoreCard {
    pub overall: f64,
    pub percentage: f64,
    pub tier: ScoreTier,
    pub metrics: Vec<MetricBar>,
}

impl ScoreCard {
    pub fn from_inputs(inputs: &SafetyScoreInputs) -> Self {
        let overall = clamp_score(inputs.overall);
        let values = [
            ("Acceleration", inputs.acceleration),
            ("Gyroscope", inputs.gyroscope),
            ("Events", inputs.events),
            ("Potholes", inputs.potholes),
            ("Speed Consistency", inputs.speed_consistency),
        ];
        let metrics = values
            .into_iter()
            .zip(METRIC_PALETTE)
            .map(|((label, value), color)| MetricBar {
                label,
                value: clamp_score(value),
                color,
            })
            .collect();

        Self {
            overall,
            percentage: overall / MAX_SCORE * 100.0,
            tier: ScoreTier::for_score(overall),
            metrics,
        }
    }

    pub fn radar_vertices(&self) -> Vec<RadarVertex> {
        let step = 360.0 / self.metrics.len().max(1) as f32;
        self.metrics
            .iter()
            .enumerate()
            .map(|(i, metric)| RadarVertex {
                angle_degrees: -90.0 + step * i as f32,
                reach: (metric.value / MAX_SCORE) as f32,
            })
            .collect()
    }
}
