//! Datasets and their variations.

use crate::campaign::Campaign;
use crate::lazy::{materialize_field, LazyFields, LazySlot, LazyValue};
use crate::unique::{
    checked_identity, parse_raw, AddOptions, Handle, LazyUniqueObject, RawId, UniqueIndex,
    UniqueObject, WeakHandle,
};
use order_core::{FetchDescriptor, OrderResult, ValidationError};
use order_storage::DataProvider;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Index of datasets, e.g. the datasets of a campaign.
pub type DatasetIndex = UniqueIndex<Dataset>;

/// Name of the variation the dataset shortcuts read from.
pub const NOMINAL: &str = "nominal";

/// Perturbative order of the generator that produced a dataset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenOrder {
    #[default]
    Unknown,
    Lo,
    Nlo,
    Nnlo,
    N3lo,
}

impl fmt::Display for GenOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unknown => "unknown",
            Self::Lo => "lo",
            Self::Nlo => "nlo",
            Self::Nnlo => "nnlo",
            Self::N3lo => "n3lo",
        };
        write!(f, "{}", s)
    }
}

// ============================================================================
// DATASET VARIATION
// ============================================================================

/// One variation (nominal, systematic shift, ...) of a dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetVariation {
    pub keys: Vec<String>,
    #[serde(default)]
    pub gen_order: GenOrder,
    pub n_files: LazyValue<u64>,
    pub n_events: LazyValue<u64>,
    pub lfns: LazyValue<Vec<String>>,
}

impl DatasetVariation {
    pub fn new(
        keys: Vec<String>,
        n_files: impl Into<LazyValue<u64>>,
        n_events: impl Into<LazyValue<u64>>,
        lfns: impl Into<LazyValue<Vec<String>>>,
    ) -> OrderResult<Self> {
        let variation = Self {
            keys,
            gen_order: GenOrder::Unknown,
            n_files: n_files.into(),
            n_events: n_events.into(),
            lfns: lfns.into(),
        };
        variation.validate()?;
        Ok(variation)
    }

    /// Variation whose counts and LFNs are looked up in DAS by `keys`.
    /// Both counts come from the same `das_dataset` bundle.
    pub fn from_das(keys: Vec<String>) -> OrderResult<Self> {
        let dataset = FetchDescriptor::new("das_dataset", "n_files").with_argument("keys", keys.clone());
        let lfns = FetchDescriptor::new("das_lfns", "lfns").with_argument("keys", keys.clone());
        Self::new(keys, dataset.clone(), dataset.with_key("n_events"), lfns)
    }

    pub fn with_gen_order(mut self, gen_order: GenOrder) -> Self {
        self.gen_order = gen_order;
        self
    }

    /// Validates:
    /// - every key is non-empty
    /// - resolved file and event counts are positive
    /// - resolved LFNs are non-empty strings
    pub fn validate(&self) -> OrderResult<()> {
        if self.keys.iter().any(String::is_empty) {
            return Err(invalid("keys", "keys must not be empty strings"));
        }
        if self.n_files.value() == Some(&0) {
            return Err(invalid("n_files", "must be positive"));
        }
        if self.n_events.value() == Some(&0) {
            return Err(invalid("n_events", "must be positive"));
        }
        if self.lfns.value().map_or(false, |lfns| lfns.iter().any(String::is_empty)) {
            return Err(invalid("lfns", "LFNs must not be empty strings"));
        }
        Ok(())
    }

    pub fn n_files(&mut self, provider: &DataProvider) -> OrderResult<u64> {
        materialize_field(self, "n_files", provider)?;
        self.n_files.require("n_files").copied()
    }

    pub fn n_events(&mut self, provider: &DataProvider) -> OrderResult<u64> {
        materialize_field(self, "n_events", provider)?;
        self.n_events.require("n_events").copied()
    }

    pub fn lfns(&mut self, provider: &DataProvider) -> OrderResult<&[String]> {
        materialize_field(self, "lfns", provider)?;
        self.lfns.require("lfns").map(Vec::as_slice)
    }
}

impl LazyFields for DatasetVariation {
    fn lazy_fields_mut(&mut self) -> Vec<(&'static str, &mut dyn LazySlot)> {
        vec![
            ("n_files", &mut self.n_files as &mut dyn LazySlot),
            ("n_events", &mut self.n_events as &mut dyn LazySlot),
            ("lfns", &mut self.lfns as &mut dyn LazySlot),
        ]
    }

    fn validate(&self) -> OrderResult<()> {
        DatasetVariation::validate(self)
    }
}

fn invalid(field: &str, reason: &str) -> order_core::OrderError {
    ValidationError::InvalidValue {
        field: format!("DatasetVariation.{}", field),
        reason: reason.to_string(),
    }
    .into()
}

// ============================================================================
// DATASET
// ============================================================================

/// A dataset of a campaign, made of named variations.
#[derive(Debug)]
pub struct Dataset {
    id: u64,
    name: String,
    variations: BTreeMap<String, DatasetVariation>,
    campaign: Option<WeakHandle<Campaign>>,
}

#[derive(Deserialize)]
struct RawDataset {
    id: RawId,
    name: String,
    #[serde(default)]
    variations: BTreeMap<String, DatasetVariation>,
}

impl Dataset {
    pub fn new(
        id: impl Into<RawId>,
        name: impl Into<String>,
        variations: BTreeMap<String, DatasetVariation>,
    ) -> OrderResult<Self> {
        let (id, name) = checked_identity(Self::TYPE_NAME, id, name)?;
        for variation in variations.values() {
            variation.validate()?;
        }
        Ok(Self {
            id,
            name,
            variations,
            campaign: None,
        })
    }

    /// Placeholder for a dataset loaded through the `order_dataset` plugin.
    pub fn lazy(campaign_name: &str, name: &str, id: u64) -> LazyUniqueObject {
        LazyUniqueObject::new(
            Self::TYPE_NAME,
            id,
            name,
            FetchDescriptor::new("order_dataset", "dataset")
                .with_argument("campaign_name", campaign_name)
                .with_argument("dataset_name", name),
        )
    }

    pub fn variations(&self) -> &BTreeMap<String, DatasetVariation> {
        &self.variations
    }

    pub fn get_variation(&self, name: &str) -> Option<&DatasetVariation> {
        self.variations.get(name)
    }

    pub fn variation_mut(&mut self, name: &str) -> Option<&mut DatasetVariation> {
        self.variations.get_mut(name)
    }

    pub fn set_variation(&mut self, name: impl Into<String>, variation: DatasetVariation) -> OrderResult<()> {
        variation.validate()?;
        self.variations.insert(name.into(), variation);
        Ok(())
    }

    fn nominal(&self) -> OrderResult<&DatasetVariation> {
        self.variations.get(NOMINAL).ok_or_else(|| self.missing_nominal())
    }

    fn nominal_mut(&mut self) -> OrderResult<&mut DatasetVariation> {
        let missing = self.missing_nominal();
        self.variations.get_mut(NOMINAL).ok_or(missing)
    }

    fn missing_nominal(&self) -> order_core::OrderError {
        ValidationError::RequiredFieldMissing {
            field: format!("Dataset({}).variations.{}", self.name, NOMINAL),
        }
        .into()
    }

    pub fn keys(&self) -> OrderResult<&[String]> {
        self.nominal().map(|v| v.keys.as_slice())
    }

    pub fn gen_order(&self) -> OrderResult<GenOrder> {
        self.nominal().map(|v| v.gen_order)
    }

    pub fn n_files(&mut self, provider: &DataProvider) -> OrderResult<u64> {
        self.nominal_mut()?.n_files(provider)
    }

    pub fn n_events(&mut self, provider: &DataProvider) -> OrderResult<u64> {
        self.nominal_mut()?.n_events(provider)
    }

    pub fn lfns(&mut self, provider: &DataProvider) -> OrderResult<&[String]> {
        self.nominal_mut()?.lfns(provider)
    }

    /// The campaign this dataset belongs to, if it is still alive.
    pub fn campaign(&self) -> Option<Handle<Campaign>> {
        self.campaign.as_ref().and_then(WeakHandle::upgrade)
    }

    pub(crate) fn campaign_ref(&self) -> Option<&WeakHandle<Campaign>> {
        self.campaign.as_ref()
    }

    pub(crate) fn set_campaign_ref(&mut self, campaign: Option<WeakHandle<Campaign>>) {
        self.campaign = campaign;
    }

    /// Move `this` to another campaign (or none), keeping both campaigns'
    /// dataset indices in sync. The campaigns' own callbacks are skipped.
    ///
    /// Fails without changing anything if the next campaign already holds
    /// another dataset with the same name or id.
    pub fn set_campaign(this: &Handle<Dataset>, campaign: Option<&Handle<Campaign>>) -> OrderResult<()> {
        let previous = this.try_borrow()?.campaign();
        match (&previous, campaign) {
            (None, None) => return Ok(()),
            (Some(previous), Some(next)) if previous.ptr_eq(next) => return Ok(()),
            _ => {}
        }

        if let Some(next) = campaign {
            let next_campaign = next.try_borrow()?;
            if !next_campaign.datasets.has(this) {
                next_campaign.datasets.check_free(this.name(), this.id())?;
            }
        }

        if let Some(previous) = previous {
            previous.try_borrow_mut()?.datasets.remove_with(this, true)?;
        }
        if let Some(next) = campaign {
            let mut next_campaign = next.try_borrow_mut()?;
            if !next_campaign.datasets.has(this) {
                next_campaign
                    .datasets
                    .add_with(this.clone(), AddOptions::default().with_skip_callback(true))?;
            }
        }

        this.try_borrow_mut()?.campaign = campaign.map(Handle::downgrade);
        Ok(())
    }
}

impl UniqueObject for Dataset {
    const TYPE_NAME: &'static str = "Dataset";

    fn id(&self) -> u64 {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn from_bundle(raw: Value) -> OrderResult<Self> {
        let raw: RawDataset = parse_raw(Self::TYPE_NAME, raw)?;
        Self::new(raw.id, raw.name, raw.variations)
    }
}
