//! Current and saved locations, kept in durable storage.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::FeedError;
use crate::storage::{keys, KeyValueStore};

const DEFAULT_TIMEZONE: &str = "Asia/Jakarta";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationRecord {
    pub city: String,
    pub province: String,
    pub country: String,
    pub latitude: f64,
    pub longitude: f64,
    pub timezone: String,
}

impl LocationRecord {
    fn from_catalog(city: &CatalogCity) -> Self {
        Self {
            city: city.city.to_string(),
            province: city.province.to_string(),
            country: "Indonesia".to_string(),
            latitude: city.latitude,
            longitude: city.longitude,
            timezone: DEFAULT_TIMEZONE.to_string(),
        }
    }

    /// Jakarta
    pub fn default_location() -> Self {
        Self::from_catalog(&CATALOG[0])
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CatalogCity {
    pub city: &'static str,
    pub province: &'static str,
    pub latitude: f64,
    pub longitude: f64,
}

impl CatalogCity {
    pub fn to_record(&self) -> LocationRecord {
        LocationRecord::from_catalog(self)
    }
}

const fn city(city: &'static str, province: &'static str, latitude: f64, longitude: f64) -> CatalogCity {
    CatalogCity {
        city,
        province,
        latitude,
        longitude,
    }
}

/// Major Indonesian cities offered for selection.
pub const CATALOG: &[CatalogCity] = &[
    city("Jakarta", "DKI Jakarta", -6.2088, 106.8456),
    city("Surabaya", "Jawa Timur", -7.2575, 112.7521),
    city("Bandung", "Jawa Barat", -6.9175, 107.6191),
    city("Medan", "Sumatera Utara", 3.5952, 98.6722),
    city("Semarang", "Jawa Tengah", -6.9667, 110.4167),
    city("Makassar", "Sulawesi Selatan", -5.1477, 119.4327),
    city("Palembang", "Sumatera Selatan", -2.9167, 104.7458),
    city("Tangerang", "Banten", -6.1783, 106.6319),
    city("Bekasi", "Jawa Barat", -6.2349, 106.9896),
    city("Depok", "Jawa Barat", -6.4025, 106.7942),
    city("Batam", "Kepulauan Riau", 1.1307, 104.0530),
    city("Balikpapan", "Kalimantan Timur", -1.2379, 116.8969),
    city("Bandar Lampung", "Lampung", -5.4292, 105.2610),
    city("Malang", "Jawa Timur", -7.9666, 112.6326),
    city("Yogyakarta", "DI Yogyakarta", -7.7956, 110.3695),
];

/// Case-insensitive search over city and province names.
pub fn search(query: &str) -> Vec<&'static CatalogCity> {
    let query = query.trim().to_lowercase();
    CATALOG
        .iter()
        .filter(|c| {
            query.is_empty()
                || c.city.to_lowercase().contains(&query)
                || c.province.to_lowercase().contains(&query)
        })
        .collect()
}

/// Current location and saved list.
#[derive(Clone)]
pub struct LocationBook {
    store: Arc<dyn KeyValueStore>,
}

impl LocationBook {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Current location if one was ever chosen.
    pub fn stored(&self) -> Result<Option<LocationRecord>, FeedError> {
        let Some(raw) = self.store.get(keys::CURRENT_LOCATION)? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(location) => Ok(Some(location)),
            Err(e) => {
                tracing::warn!("Stored current location unreadable: {}", e);
                Ok(None)
            }
        }
    }

    /// Current location; Jakarta on first use, which is then stored.
    pub fn current(&self) -> Result<LocationRecord, FeedError> {
        if let Some(location) = self.stored()? {
            return Ok(location);
        }

        let location = LocationRecord::default_location();
        self.set_current(&location)?;
        Ok(location)
    }

    pub fn set_current(&self, location: &LocationRecord) -> Result<(), FeedError> {
        let raw = serde_json::to_string(location)
            .map_err(|e| FeedError::parse("current location", e))?;
        self.store.set(keys::CURRENT_LOCATION, &raw)?;
        Ok(())
    }

    pub fn saved(&self) -> Result<Vec<LocationRecord>, FeedError> {
        match self.store.get(keys::SAVED_LOCATIONS)? {
            Some(raw) => {
                serde_json::from_str(&raw).map_err(|e| FeedError::parse("saved locations", e))
            }
            None => Ok(Vec::new()),
        }
    }

    pub fn is_saved(&self, city: &str) -> Result<bool, FeedError> {
        Ok(self.saved()?.iter().any(|l| l.city == city))
    }

    /// Add to the saved list, replacing any entry for the same city.
    pub fn save(&self, location: LocationRecord) -> Result<Vec<LocationRecord>, FeedError> {
        let mut saved = self.saved()?;
        saved.retain(|l| l.city != location.city);
        saved.push(location);
        self.write_saved(&saved)?;
        Ok(saved)
    }

    pub fn remove(&self, city: &str) -> Result<Vec<LocationRecord>, FeedError> {
        let mut saved = self.saved()?;
        saved.retain(|l| l.city != city);
        self.write_saved(&saved)?;
        Ok(saved)
    }

    fn write_saved(&self, saved: &[LocationRecord]) -> Result<(), FeedError> {
        let raw =
            serde_json::to_string(saved).map_err(|e| FeedError::parse("saved locations", e))?;
        self.store.set(keys::SAVED_LOCATIONS, &raw)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use crate::storage::SqliteKeyValueStore;

    fn book() -> (LocationBook, Arc<dyn KeyValueStore>) {
        let store: Arc<dyn KeyValueStore> = Arc::new(SqliteKeyValueStore::in_memory().unwrap());
        (LocationBook::new(Arc::clone(&store)), store)
    }

    #[test]
    fn test_current_defaults_to_jakarta_and_persists() {
        let (book, store) = book();
        let current = book.current().unwrap();
        assert_eq!(current.city, "Jakarta");
        assert_eq!(current.timezone, "Asia/Jakarta");
        assert!(store.get(keys::CURRENT_LOCATION).unwrap().is_some());
    }

    #[test]
    fn test_set_current() {
        let (book, _) = book();
        let bandung = search("bandung")[0].to_record();
        book.set_current(&bandung).unwrap();
        assert_eq!(book.current().unwrap(), bandung);
    }

    #[test]
    fn test_save_replaces_same_city() {
        let (book, _) = book();
        let mut malang = search("malang")[0].to_record();
        book.save(malang.clone()).unwrap();
        book.save(search("medan")[0].to_record()).unwrap();

        malang.latitude = -7.97;
        let saved = book.save(malang).unwrap();
        assert_eq!(saved.len(), 2);
        assert_eq!(saved[1].city, "Malang");
        assert_eq!(saved[1].latitude, -7.97);
        assert!(book.is_saved("Medan").unwrap());
    }

    #[test]
    fn test_remove() {
        let (book, _) = book();
        book.save(search("batam")[0].to_record()).unwrap();
        let saved = book.remove("Batam").unwrap();
        assert!(saved.is_empty());
        assert!(book.saved().unwrap().is_empty());
    }

    #[test]
    fn test_search_city_and_province() {
        let names: Vec<_> = search("jawa barat").iter().map(|c| c.city).collect();
        assert_eq!(names, vec!["Bandung", "Bekasi", "Depok"]);

        assert_eq!(search("YOGYA")[0].city, "Yogyakarta");
        assert_eq!(search("").len(), CATALOG.len());
        assert!(search("tokyo").is_empty());
    }

    #[test]
    fn test_corrupt_current_location_resets() {
        let (book, store) = book();
        store.set(keys::CURRENT_LOCATION, "not json").unwrap();
        assert_eq!(book.current().unwrap().city, "Jakarta");
    }
}
