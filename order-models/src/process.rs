//! Physics processes and their sub-process hierarchy.

use crate::unique::{
    checked_identity, parse_raw, AddOptions, Handle, IndexEntry, LazyUniqueObject, RawId,
    UniqueIndex, UniqueObject, WeakHandle,
};
use order_core::{FetchDescriptor, OrderResult, ValidationError};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Index of processes.
pub type ProcessIndex = UniqueIndex<Process>;

/// Cross sections per center-of-mass energy, each a map of named values
/// (nominal, uncertainties, ...).
pub type CrossSections = BTreeMap<String, BTreeMap<String, f64>>;

/// A physics process.
///
/// `processes` holds the sub-processes; `parent_processes` is a weak index
/// of the processes this one is a sub-process of. On handles obtained through
/// [`UniqueObject::into_handle`] both sides are kept in sync: adding `b` to
/// `a.processes` adds `a` to `b.parent_processes` and vice versa.
#[derive(Debug)]
pub struct Process {
    id: u64,
    name: String,
    cross_sections: CrossSections,
    pub processes: ProcessIndex,
    pub parent_processes: ProcessIndex,
}

#[derive(Deserialize)]
struct RawProcess {
    id: RawId,
    name: String,
    #[serde(default, alias = "cross_section")]
    cross_sections: BTreeMap<String, BTreeMap<String, f64>>,
    #[serde(default)]
    processes: Vec<Value>,
}

impl Process {
    pub fn new(id: impl Into<RawId>, name: impl Into<String>) -> OrderResult<Self> {
        let (id, name) = checked_identity(Self::TYPE_NAME, id, name)?;
        Ok(Self {
            id,
            name,
            cross_sections: CrossSections::new(),
            processes: ProcessIndex::new(),
            parent_processes: ProcessIndex::new_weak(),
        })
    }

    /// Placeholder for a process loaded through the `order_process` plugin.
    pub fn lazy(name: &str, id: u64) -> LazyUniqueObject {
        LazyUniqueObject::new(
            Self::TYPE_NAME,
            id,
            name,
            FetchDescriptor::new("order_process", "process").with_argument("process_name", name),
        )
    }

    pub fn cross_sections(&self) -> &CrossSections {
        &self.cross_sections
    }

    /// Cross section values at center-of-mass energy `ecm`.
    pub fn cross_section(&self, ecm: f64) -> Option<&BTreeMap<String, f64>> {
        self.cross_sections
            .iter()
            .find(|(key, _)| key.parse::<f64>().map_or(false, |k| k == ecm))
            .map(|(_, values)| values)
    }

    pub fn set_cross_section(&mut self, ecm: f64, values: BTreeMap<String, f64>) {
        self.cross_sections.retain(|key, _| key.parse::<f64>().map_or(true, |k| k != ecm));
        self.cross_sections.insert(ecm.to_string(), values);
    }
}

impl UniqueObject for Process {
    const TYPE_NAME: &'static str = "Process";

    fn id(&self) -> u64 {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn from_bundle(raw: Value) -> OrderResult<Self> {
        let raw: RawProcess = parse_raw(Self::TYPE_NAME, raw)?;
        let mut process = Self::new(raw.id, raw.name)?;

        for ecm in raw.cross_sections.keys() {
            if ecm.parse::<f64>().is_err() {
                return Err(ValidationError::InvalidValue {
                    field: format!("Process({}).cross_sections", process.name),
                    reason: format!("'{}' is not a center-of-mass energy", ecm),
                }
                .into());
            }
        }
        process.cross_sections = raw.cross_sections;

        let entries = raw
            .processes
            .into_iter()
            .map(|entry| IndexEntry::<Process>::from_raw(entry, |name, id| Process::lazy(name, id)))
            .collect::<OrderResult<Vec<_>>>()?;
        process.processes = ProcessIndex::from_entries(entries)?;
        Ok(process)
    }

    fn into_handle(self) -> OrderResult<Handle<Self>> {
        let handle = Handle::wrap(self);
        let this = handle.downgrade();

        let (children, parents) = {
            let mut process = handle.try_borrow_mut()?;

            let owner = this.clone();
            process.processes.set_on_add(move |entry| match entry {
                IndexEntry::Object(child) => link(&owner, child),
                IndexEntry::Lazy(_) => Ok(()),
            });
            let owner = this.clone();
            process
                .processes
                .set_on_materialize(move |child| link(&owner, child));
            let owner = this.clone();
            process.processes.set_on_remove(move |entry| match entry {
                IndexEntry::Object(child) => unlink(&owner, child),
                IndexEntry::Lazy(_) => Ok(()),
            });

            let owner = this.clone();
            process.parent_processes.set_on_add(move |entry| match entry {
                IndexEntry::Object(parent) => link_parent(&owner, parent),
                IndexEntry::Lazy(_) => Ok(()),
            });
            let owner = this.clone();
            process
                .parent_processes
                .set_on_materialize(move |parent| link_parent(&owner, parent));
            let owner = this.clone();
            process.parent_processes.set_on_remove(move |entry| match entry {
                IndexEntry::Object(parent) => unlink_parent(&owner, parent),
                IndexEntry::Lazy(_) => Ok(()),
            });

            (process.processes.entries(), process.parent_processes.entries())
        };

        for entry in &children {
            if let IndexEntry::Object(child) = entry {
                link(&this, child)?;
            }
        }
        for entry in &parents {
            if let IndexEntry::Object(parent) = entry {
                link_parent(&this, parent)?;
            }
        }
        Ok(handle)
    }
}

// Paired updates on the other side always skip callbacks, so one public
// mutation touches exactly two indices.

/// `child` became a sub-process of `owner`.
fn link(owner: &WeakHandle<Process>, child: &Handle<Process>) -> OrderResult<()> {
    let Some(owner) = owner.upgrade() else {
        return Ok(());
    };
    child
        .try_borrow_mut()?
        .parent_processes
        .add_with(owner, AddOptions::paired())
}

/// `child` is no longer a sub-process of `owner`.
fn unlink(owner: &WeakHandle<Process>, child: &Handle<Process>) -> OrderResult<()> {
    child
        .try_borrow_mut()?
        .parent_processes
        .remove_with(owner, true)
        .map(|_| ())
}

/// `parent` became a parent process of `owner`.
fn link_parent(owner: &WeakHandle<Process>, parent: &Handle<Process>) -> OrderResult<()> {
    let Some(owner) = owner.upgrade() else {
        return Ok(());
    };
    parent
        .try_borrow_mut()?
        .processes
        .add_with(owner, AddOptions::paired())
}

fn unlink_parent(owner: &WeakHandle<Process>, parent: &Handle<Process>) -> OrderResult<()> {
    parent
        .try_borrow_mut()?
        .processes
        .remove_with(owner, true)
        .map(|_| ())
}
