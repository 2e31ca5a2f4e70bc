use crate::types::{normalize_plate, VehicleRecord};
use failure::Error;
use log::{info, warn};
use serde_json::Value;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// Anything that can answer "what do we know about this plate?".
pub trait VehicleLookup: Send + Sync {
    fn lookup(&self, plate: &str) -> Option<VehicleRecord>;
}

/// Read-only plate → record table loaded once at startup.
#[derive(Debug, Default, Clone)]
pub struct Registry {
    records: HashMap<String, VehicleRecord>,
}

impl Registry {
    /// Loads the registry from a JSON file. A missing or unreadable file
    /// yields an empty registry; the service still starts.
    pub fn load(path: &Path) -> Registry {
        match load_impl(path) {
            Ok(registry) => {
                info!(
                    "Loaded {} vehicle records from {:?}",
                    registry.len(),
                    path
                );
                registry
            }
            Err(e) => {
                warn!(
                    "Unable to load registry from {:?}, starting empty: {}",
                    path, e
                );
                Registry::default()
            }
        }
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Registry, Error> {
        let json: Value = serde_json::from_reader(reader)?;
        let entries = json
            .as_object()
            .ok_or_else(|| format_err!("Registry must be a JSON object keyed by plate"))?;

        let mut records = HashMap::with_capacity(entries.len());
        for (plate, value) in entries {
            let record = match serde_json::from_value::<VehicleRecord>(value.clone()) {
                Ok(r) => r,
                Err(e) => {
                    warn!("Skipping malformed registry entry {}: {}", plate, e);
                    continue;
                }
            };
            let key = normalize_plate(plate);
            if key.is_empty() {
                warn!("Skipping registry entry with blank plate {:?}", plate);
                continue;
            }
            if records.insert(key.clone(), record).is_some() {
                warn!("Duplicate registry entry for {}; keeping the last one", key);
            }
        }
        Ok(Registry { records })
    }

    pub fn from_records<I, S>(records: I) -> Registry
    where
        I: IntoIterator<Item = (S, VehicleRecord)>,
        S: AsRef<str>,
    {
        Registry {
            records: records
                .into_iter()
                .map(|(plate, record)| (normalize_plate(plate.as_ref()), record))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn load_impl(path: &Path) -> Result<Registry, Error> {
    let file = File::open(path)?;
    Registry::from_reader(BufReader::new(file))
}

impl VehicleLookup for Registry {
    // Exact match on the normalized key; OCR noise is a miss.
    fn lookup(&self, plate: &str) -> Option<VehicleRecord> {
        self.records.get(plate).copied()
    }
}
