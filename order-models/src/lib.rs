//! ORDER Models - Lazy Objects and Unique Indices
//!
//! Fields and index entries of the analysis models may hold a
//! [`FetchDescriptor`](order_core::FetchDescriptor) instead of a value. They
//! are resolved through the [`DataProvider`](order_storage::DataProvider) the
//! first time they are read and keep the resolved value afterwards.
//!
//! - [`lazy`]: `LazyValue<T>` and object-level materialization
//! - [`unique`]: `UniqueObject`, `Handle`, `LazyUniqueObject`, `UniqueIndex`
//! - [`campaign`], [`dataset`], [`process`], [`uncertainty`]: the analysis
//!   models

pub mod campaign;
pub mod dataset;
pub mod lazy;
pub mod process;
pub mod uncertainty;
pub mod unique;

pub use campaign::Campaign;
pub use dataset::{Dataset, DatasetIndex, DatasetVariation, GenOrder, NOMINAL};
pub use lazy::{materialize_field, LazyFields, LazySlot, LazyValue};
pub use process::{CrossSections, Process, ProcessIndex};
pub use uncertainty::{Uncertainty, UncertaintyIndex, UncertaintyKind};
pub use unique::{
    AddOptions, Handle, IdAllocator, IndexEntry, IndexKey, LazyUniqueObject, RawId, UniqueIndex,
    UniqueObject, WeakHandle, AUTO_ID,
};
