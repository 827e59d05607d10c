//! Reference data: the customer, driver, product, truck and trailer lists that
//! creation-stage validation resolves against.

use serde::Serialize;
use std::fmt;

use crate::config::ReferenceConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    Customer,
    Driver,
    Product,
    Truck,
    Trailer,
}

impl ReferenceKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Customer => "customer",
            Self::Driver => "driver",
            Self::Product => "product",
            Self::Truck => "truck",
            Self::Trailer => "trailer",
        }
    }

    /// Plural list name as it appears in config.
    #[must_use]
    pub const fn list_name(self) -> &'static str {
        match self {
            Self::Customer => "customers",
            Self::Driver => "drivers",
            Self::Product => "products",
            Self::Truck => "trucks",
            Self::Trailer => "trailers",
        }
    }
}

impl fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of resolving a value against one reference list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Matched; carries the canonical spelling from the list.
    Found(String),
    NotFound,
    /// No entries configured for this kind.
    Unconfigured,
}

/// Injected provider of reference lists.
pub trait ReferenceData: Send + Sync {
    fn entries(&self, kind: ReferenceKind) -> &[String];

    /// Trimmed, case-insensitive lookup.
    fn resolve(&self, kind: ReferenceKind, value: &str) -> Resolution {
        let entries = self.entries(kind);
        if entries.is_empty() {
            return Resolution::Unconfigured;
        }
        entries
            .iter()
            .find(|entry| same_name(entry, value))
            .map_or(Resolution::NotFound, |entry| {
                Resolution::Found(entry.trim().to_string())
            })
    }
}

/// Trimmed, case-insensitive equality used for every reference comparison.
#[must_use]
pub fn same_name(a: &str, b: &str) -> bool {
    a.trim().to_lowercase() == b.trim().to_lowercase()
}

/// Reference lists held in memory, usually built from project config.
#[derive(Debug, Clone, Default)]
pub struct StaticReferenceData {
    customers: Vec<String>,
    drivers: Vec<String>,
    products: Vec<String>,
    trucks: Vec<String>,
    trailers: Vec<String>,
}

impl StaticReferenceData {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter for one list.
    #[must_use]
    pub fn with<I, S>(mut self, kind: ReferenceKind, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let list = values.into_iter().map(Into::into).collect();
        match kind {
            ReferenceKind::Customer => self.customers = list,
            ReferenceKind::Driver => self.drivers = list,
            ReferenceKind::Product => self.products = list,
            ReferenceKind::Truck => self.trucks = list,
            ReferenceKind::Trailer => self.trailers = list,
        }
        self
    }
}

impl From<&ReferenceConfig> for StaticReferenceData {
    fn from(config: &ReferenceConfig) -> Self {
        Self {
            customers: config.customers.clone(),
            drivers: config.drivers.clone(),
            products: config.products.clone(),
            trucks: config.trucks.clone(),
            trailers: config.trailers.clone(),
        }
    }
}

impl ReferenceData for StaticReferenceData {
    fn entries(&self, kind: ReferenceKind) -> &[String] {
        match kind {
            ReferenceKind::Customer => &self.customers,
            ReferenceKind::Driver => &self.drivers,
            ReferenceKind::Product => &self.products,
            ReferenceKind::Truck => &self.trucks,
            ReferenceKind::Trailer => &self.trailers,
        }
    }
}
