//! Campaigns: a data-taking or simulation period with its datasets.

use crate::dataset::{Dataset, DatasetIndex};
use crate::lazy::{materialize_field, LazyFields, LazySlot, LazyValue};
use crate::unique::{
    checked_identity, parse_raw, Handle, IndexEntry, IndexKey, LazyUniqueObject, RawId,
    UniqueObject, WeakHandle,
};
use order_core::{FetchDescriptor, OrderResult};
use order_storage::DataProvider;
use serde::Deserialize;
use serde_json::Value;

/// A campaign and the datasets recorded or simulated for it.
///
/// Datasets added to a campaign obtained through [`UniqueObject::into_handle`]
/// point back to it; removing them clears that reference.
#[derive(Debug)]
pub struct Campaign {
    id: u64,
    name: String,
    pub tier: LazyValue<String>,
    pub ecm: LazyValue<f64>,
    pub recommended_global_tag: Option<String>,
    pub datasets: DatasetIndex,
}

#[derive(Deserialize)]
struct RawCampaign {
    id: RawId,
    name: String,
    tier: LazyValue<String>,
    ecm: LazyValue<f64>,
    #[serde(default, alias = "recommended_gt")]
    recommended_global_tag: Option<String>,
    #[serde(default)]
    datasets: Vec<Value>,
}

impl Campaign {
    pub fn new(
        id: impl Into<RawId>,
        name: impl Into<String>,
        tier: impl Into<LazyValue<String>>,
        ecm: impl Into<LazyValue<f64>>,
    ) -> OrderResult<Self> {
        let (id, name) = checked_identity(Self::TYPE_NAME, id, name)?;
        Ok(Self {
            id,
            name,
            tier: tier.into(),
            ecm: ecm.into(),
            recommended_global_tag: None,
            datasets: DatasetIndex::new(),
        })
    }

    pub fn with_recommended_global_tag(mut self, tag: impl Into<String>) -> Self {
        self.recommended_global_tag = Some(tag.into());
        self
    }

    /// Placeholder for a campaign loaded through the `order_campaign` plugin.
    pub fn lazy(name: &str, id: u64) -> LazyUniqueObject {
        LazyUniqueObject::new(
            Self::TYPE_NAME,
            id,
            name,
            FetchDescriptor::new("order_campaign", "campaign").with_argument("campaign_name", name),
        )
    }

    pub fn tier(&mut self, provider: &DataProvider) -> OrderResult<&str> {
        materialize_field(self, "tier", provider)?;
        self.tier.require("tier").map(String::as_str)
    }

    pub fn set_tier(&mut self, tier: impl Into<LazyValue<String>>) {
        self.tier = tier.into();
    }

    /// Center-of-mass energy in TeV.
    pub fn ecm(&mut self, provider: &DataProvider) -> OrderResult<f64> {
        materialize_field(self, "ecm", provider)?;
        self.ecm.require("ecm").copied()
    }

    pub fn set_ecm(&mut self, ecm: impl Into<LazyValue<f64>>) {
        self.ecm = ecm.into();
    }

    /// Shorthand for looking up a dataset of this campaign.
    pub fn dataset(
        &mut self,
        key: impl Into<IndexKey>,
        provider: &DataProvider,
    ) -> OrderResult<Handle<Dataset>> {
        self.datasets.get(key, provider)
    }
}

impl LazyFields for Campaign {
    fn lazy_fields_mut(&mut self) -> Vec<(&'static str, &mut dyn LazySlot)> {
        vec![
            ("tier", &mut self.tier as &mut dyn LazySlot),
            ("ecm", &mut self.ecm as &mut dyn LazySlot),
        ]
    }
}

impl UniqueObject for Campaign {
    const TYPE_NAME: &'static str = "Campaign";

    fn id(&self) -> u64 {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    /// Dataset entries with only `name` and `id` become `order_dataset`
    /// placeholders of this campaign.
    fn from_bundle(raw: Value) -> OrderResult<Self> {
        let raw: RawCampaign = parse_raw(Self::TYPE_NAME, raw)?;
        let mut campaign = Self::new(raw.id, raw.name, raw.tier, raw.ecm)?;
        campaign.recommended_global_tag = raw.recommended_global_tag;

        let campaign_name = campaign.name.clone();
        let entries = raw
            .datasets
            .into_iter()
            .map(|entry| {
                IndexEntry::<Dataset>::from_raw(entry, |name, id| Dataset::lazy(&campaign_name, name, id))
            })
            .collect::<OrderResult<Vec<_>>>()?;
        campaign.datasets = DatasetIndex::from_entries(entries)?;
        Ok(campaign)
    }

    fn into_handle(self) -> OrderResult<Handle<Self>> {
        let handle = Handle::wrap(self);
        let this = handle.downgrade();

        let entries = {
            let mut campaign = handle.try_borrow_mut()?;

            let owner = this.clone();
            campaign.datasets.set_on_add(move |entry| match entry {
                IndexEntry::Object(dataset) => attach_dataset(&owner, dataset),
                IndexEntry::Lazy(_) => Ok(()),
            });

            let owner = this.clone();
            campaign
                .datasets
                .set_on_materialize(move |dataset| attach_dataset(&owner, dataset));

            let owner = this.clone();
            campaign.datasets.set_on_remove(move |entry| match entry {
                IndexEntry::Object(dataset) => detach_dataset(&owner, dataset),
                IndexEntry::Lazy(_) => Ok(()),
            });

            campaign.datasets.entries()
        };

        for entry in &entries {
            if let IndexEntry::Object(dataset) = entry {
                attach_dataset(&this, dataset)?;
            }
        }
        Ok(handle)
    }
}

/// Point `dataset` at `campaign`, leaving a previous campaign's index.
fn attach_dataset(campaign: &WeakHandle<Campaign>, dataset: &Handle<Dataset>) -> OrderResult<()> {
    let previous = dataset.try_borrow()?.campaign_ref().cloned();
    if let Some(previous) = previous {
        if previous.points_to_weak(campaign) {
            return Ok(());
        }
        if let Some(previous) = previous.upgrade() {
            previous.try_borrow_mut()?.datasets.remove_with(dataset, true)?;
        }
    }
    dataset.try_borrow_mut()?.set_campaign_ref(Some(campaign.clone()));
    Ok(())
}

fn detach_dataset(campaign: &WeakHandle<Campaign>, dataset: &Handle<Dataset>) -> OrderResult<()> {
    let mut dataset = dataset.try_borrow_mut()?;
    if dataset
        .campaign_ref()
        .map_or(false, |current| current.points_to_weak(campaign))
    {
        dataset.set_campaign_ref(None);
    }
    Ok(())
}
