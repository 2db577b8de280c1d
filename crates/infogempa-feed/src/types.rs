use serde::{Deserialize, Serialize};

/// One earthquake as reported by BMKG. All values arrive as strings.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct GempaItem {
    /// ISO timestamp, e.g. `2024-01-01T00:00:00+00:00`
    pub date_time: String,
    /// `"lat,lng"`
    pub coordinates: String,
    /// Latitude in BMKG notation, e.g. `7.42 LS`
    pub lintang: String,
    /// Longitude in BMKG notation, e.g. `106.86 BT`
    pub bujur: String,
    pub magnitude: String,
    /// Depth, e.g. `10 km`
    pub kedalaman: String,
    /// Region description
    pub wilayah: String,
    /// Tsunami potential
    pub potensi: String,

    // Only present on the latest-event endpoint
    #[serde(skip_serializing_if = "String::is_empty")]
    pub tanggal: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub jam: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub dirasakan: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub shakemap: String,
}

impl GempaItem {
    /// Magnitude as a number, if BMKG sent a parseable one
    pub fn magnitude_value(&self) -> Option<f64> {
        self.magnitude.trim().parse().ok()
    }

    pub fn intensity(&self) -> Option<Intensity> {
        self.magnitude_value().map(Intensity::from_magnitude)
    }
}

/// Rough severity class used for badges and map markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intensity {
    Light,
    Moderate,
    Strong,
}

impl Intensity {
    pub fn from_magnitude(magnitude: f64) -> Self {
        if magnitude < 3.0 {
            Self::Light
        } else if magnitude < 5.0 {
            Self::Moderate
        } else {
            Self::Strong
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Light => "Light",
            Self::Moderate => "Moderate",
            Self::Strong => "Strong",
        }
    }
}

/// Body of the recent-earthquakes endpoint.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GempaList {
    #[serde(rename = "Infogempa")]
    pub infogempa: GempaListBody,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GempaListBody {
    #[serde(default)]
    pub gempa: Vec<GempaItem>,
}

impl GempaList {
    pub fn items(&self) -> &[GempaItem] {
        &self.infogempa.gempa
    }

    pub fn len(&self) -> usize {
        self.infogempa.gempa.len()
    }

    pub fn is_empty(&self) -> bool {
        self.infogempa.gempa.is_empty()
    }

    /// Strongest event in the list
    pub fn strongest(&self) -> Option<&GempaItem> {
        self.items()
            .iter()
            .filter(|g| g.magnitude_value().is_some())
            .max_by(|a, b| {
                let a = a.magnitude_value().unwrap_or_default();
                let b = b.magnitude_value().unwrap_or_default();
                a.total_cmp(&b)
            })
    }
}

/// Body of the latest-event endpoint: a single object, not a list.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AutoGempa {
    #[serde(rename = "Infogempa")]
    pub infogempa: AutoGempaBody,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AutoGempaBody {
    pub gempa: GempaItem,
}

impl AutoGempa {
    pub fn event(&self) -> &GempaItem {
        &self.infogempa.gempa
    }
}
