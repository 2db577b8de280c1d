//! Map coordinates for earthquake events.
//!
//! BMKG's `Coordinates` field (`"-7.42,106.86"`) is the canonical format.
//! The older `"7.42 LS - 106.86 BT"` notation is still accepted.

use std::fmt;

use crate::types::GempaItem;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    /// Central Jakarta, used when nothing can be parsed
    pub const DEFAULT: LatLng = LatLng {
        lat: -6.2,
        lng: 106.816,
    };

    pub fn new(lat: f64, lng: f64) -> Option<Self> {
        ((-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lng))
            .then_some(Self { lat, lng })
    }

    /// Parse the canonical `"lat,lng"` form.
    pub fn parse(input: &str) -> Option<Self> {
        let (lat, lng) = input.split_once(',')?;
        Self::new(lat.trim().parse().ok()?, lng.trim().parse().ok()?)
    }

    /// Parse the legacy `"7.42 LS - 106.86 BT"` form.
    ///
    /// LS (south) and BB (west) are negative; LU (north) and BT (east) positive.
    pub fn parse_legacy(input: &str) -> Option<Self> {
        let (lat_part, lng_part) = input.split_once(" - ")?;
        let lat = signed_component(lat_part, "LS", "LU")?;
        let lng = signed_component(lng_part, "BB", "BT")?;
        Self::new(lat, lng)
    }

    /// Try the canonical form, then the legacy one.
    pub fn parse_any(input: &str) -> Option<Self> {
        Self::parse(input).or_else(|| Self::parse_legacy(input))
    }

    /// Parse, falling back to [`LatLng::DEFAULT`] with a warning.
    pub fn resolve_or_default(input: &str) -> Self {
        match Self::parse_any(input) {
            Some(position) => position,
            None => {
                tracing::warn!(
                    "Unparseable coordinates {:?}, using default location",
                    input
                );
                Self::DEFAULT
            }
        }
    }
}

fn signed_component(part: &str, negative: &str, positive: &str) -> Option<f64> {
    let mut tokens = part.split_whitespace();
    let value: f64 = tokens.next()?.parse().ok()?;
    match tokens.next() {
        Some(h) if h.eq_ignore_ascii_case(negative) => Some(-value.abs()),
        Some(h) if h.eq_ignore_ascii_case(positive) => Some(value.abs()),
        _ => None,
    }
}

impl fmt::Display for LatLng {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4}, {:.4}", self.lat, self.lng)
    }
}

impl GempaItem {
    /// Event position: `Coordinates`, else `Lintang`/`Bujur`, else the default.
    pub fn position(&self) -> LatLng {
        if let Some(position) = LatLng::parse(&self.coordinates) {
            return position;
        }
        let legacy = format!("{} - {}", self.lintang.trim(), self.bujur.trim());
        LatLng::resolve_or_default(&legacy)
    }
}
