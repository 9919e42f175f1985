//! Offering capability catalog and unit packing.
//!
//! The catalog is read from a CSV export with two header rows followed by one
//! row per offering: name, vCPU count, ECU rating, memory (GiB) and a free-form
//! storage description. The ECU column may hold non-numeric values such as
//! `Variable`, which are kept as `None`.

use std::cmp::Ordering;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    error::{Result, SpotError},
    types::OfferingType,
};

/// Number of header rows preceding the offering rows.
const HEADER_ROWS: usize = 2;

/// Capabilities of one offering.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OfferingSpec {
    /// Offering name.
    pub name: OfferingType,
    /// Virtual CPU count.
    pub vcpus: u32,
    /// Compute unit rating, if published.
    pub ecu: Option<f64>,
    /// Memory in GiB.
    pub memory_gib: f64,
    /// Storage description (EBS only, SSD count, ...).
    pub storage: String,
}

/// Resources constituting a single requested unit.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResourceRequest {
    /// vCPUs per unit.
    pub cpu: u32,
    /// Memory per unit, in GiB.
    pub memory_gib: f64,
}

impl ResourceRequest {
    /// Creates a request, rejecting zero CPUs or non-positive memory.
    ///
    /// # Errors
    /// Returns [`SpotError::InvalidParameter`] for an empty request.
    pub fn new(cpu: u32, memory_gib: f64) -> Result<Self> {
        if cpu == 0 || !memory_gib.is_finite() || memory_gib <= 0.0 {
            return Err(SpotError::InvalidParameter(format!(
                "resource request needs cpu > 0 and memory > 0, got cpu={cpu} memory={memory_gib}"
            )));
        }
        Ok(Self { cpu, memory_gib })
    }
}

/// How many request units one offering packs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferingUnits {
    /// Offering name.
    pub offering: OfferingType,
    /// Whole units that fit in one instance of the offering.
    pub units: u32,
}

/// Parsed offering catalog.
#[derive(Clone, Debug, Default)]
pub struct OfferingCatalog {
    offerings: Vec<OfferingSpec>,
}

impl OfferingCatalog {
    /// Builds a catalog from already parsed specs.
    #[must_use]
    pub const fn new(offerings: Vec<OfferingSpec>) -> Self {
        Self { offerings }
    }

    /// Reads a catalog CSV from any reader.
    ///
    /// # Errors
    /// Returns [`SpotError::Parse`] on malformed rows or numbers.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rows = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mut offerings = Vec::new();
        for (line, row) in rows.records().enumerate().skip(HEADER_ROWS) {
            let row = row.map_err(|e| SpotError::Parse(e.to_string()))?;
            if row.iter().all(str::is_empty) {
                continue;
            }
            offerings.push(Self::parse_row(line + 1, &row)?);
        }

        debug!("Loaded {} offerings from catalog", offerings.len());
        Ok(Self { offerings })
    }

    /// Reads a catalog CSV from a file.
    ///
    /// # Errors
    /// Returns [`SpotError::Config`] if the file cannot be opened, or
    /// [`SpotError::Parse`] on malformed content.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)
            .map_err(|e| SpotError::Config(format!("{}: {e}", path.display())))?;
        Self::from_reader(file)
    }

    fn parse_row(line: usize, row: &csv::StringRecord) -> Result<OfferingSpec> {
        let field = |i: usize, what: &str| {
            row.get(i)
                .ok_or_else(|| SpotError::Parse(format!("line {line}: missing {what}")))
        };

        let name = field(0, "name")?;
        let vcpus = field(1, "vcpu")?
            .parse::<u32>()
            .map_err(|e| SpotError::Parse(format!("line {line}: vcpu: {e}")))?;
        let ecu = field(2, "ecu")?.parse::<f64>().ok();
        let memory_gib = field(3, "memory")?
            .replace(',', "")
            .parse::<f64>()
            .map_err(|e| SpotError::Parse(format!("line {line}: memory: {e}")))?;
        let storage = row.get(4).unwrap_or_default().to_string();

        Ok(OfferingSpec {
            name: OfferingType::new(name),
            vcpus,
            ecu,
            memory_gib,
            storage,
        })
    }

    /// All offerings, in file order.
    #[must_use]
    pub fn offerings(&self) -> &[OfferingSpec] {
        &self.offerings
    }

    /// Looks up an offering by name.
    #[must_use]
    pub fn get(&self, name: &OfferingType) -> Option<&OfferingSpec> {
        self.offerings.iter().find(|o| &o.name == name)
    }

    /// Offerings packing at least one unit of `request`.
    ///
    /// Units are `min(floor(vcpus / cpu), floor(memory / memory_gib))`. Results
    /// are sorted by descending units, then by name. Packing efficiency is not
    /// considered; that is left to price per unit.
    #[must_use]
    pub fn units_for(&self, request: &ResourceRequest) -> Vec<OfferingUnits> {
        let mut units: Vec<OfferingUnits> = self
            .offerings
            .iter()
            .filter_map(|o| {
                let by_cpu = o.vcpus / request.cpu;
                let by_mem = (o.memory_gib / request.memory_gib).floor();
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let by_mem = by_mem.clamp(0.0, f64::from(u32::MAX)) as u32;
                let n = by_cpu.min(by_mem);
                (n >= 1).then(|| OfferingUnits {
                    offering: o.name.clone(),
                    units: n,
                })
            })
            .collect();

        units.sort_by(|a, b| match b.units.cmp(&a.units) {
            Ordering::Equal => a.offering.cmp(&b.offering),
            other => other,
        });
        units
    }
}
