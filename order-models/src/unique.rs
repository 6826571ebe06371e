//! Unique objects and the index that stores them.
//!
//! A unique object has a positive integer id and a non-empty name, both
//! unique within one [`UniqueIndex`]. The index holds fully built objects
//! next to [`LazyUniqueObject`] placeholders; looking up a placeholder
//! resolves it through the data provider and replaces it in place.
//!
//! Objects are shared through [`Handle`]s. A handle caches the object's name
//! and id so the index never has to borrow an object to find it, which keeps
//! relationship callbacks free to borrow other objects.

use once_cell::sync::Lazy;
use order_core::{
    FetchDescriptor, IndexError, MaterializeError, OrderResult, ValidationError,
};
use order_storage::{Consumed, DataProvider};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cell::{Ref, RefCell, RefMut};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::{Mutex, PoisonError};

/// Raw id value requesting the next free id of a type.
pub const AUTO_ID: &str = "+";

// ============================================================================
// IDS AND IDENTITY
// ============================================================================

static ID_ALLOCATOR: Lazy<IdAllocator> = Lazy::new(IdAllocator::default);

/// Remembers the largest id seen per object type and hands out the next one.
#[derive(Debug, Default)]
pub struct IdAllocator {
    max_ids: Mutex<HashMap<&'static str, u64>>,
}

impl IdAllocator {
    /// The process-wide allocator.
    pub fn global() -> &'static IdAllocator {
        &ID_ALLOCATOR
    }

    /// Next id for `type_name`.
    pub fn allocate(&self, type_name: &'static str) -> u64 {
        let mut max_ids = self.max_ids.lock().unwrap_or_else(PoisonError::into_inner);
        let max_id = max_ids.entry(type_name).or_insert(0);
        *max_id += 1;
        *max_id
    }

    /// Record an explicitly chosen id.
    pub fn observe(&self, type_name: &'static str, id: u64) {
        let mut max_ids = self.max_ids.lock().unwrap_or_else(PoisonError::into_inner);
        let max_id = max_ids.entry(type_name).or_insert(0);
        *max_id = (*max_id).max(id);
    }

    pub fn max_id(&self, type_name: &'static str) -> u64 {
        self.max_ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(type_name)
            .copied()
            .unwrap_or(0)
    }
}

/// An id as written in raw data: a number or [`AUTO_ID`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawId {
    Id(u64),
    Auto(String),
}

impl RawId {
    /// Turn the raw id into a positive id, allocating one for [`AUTO_ID`].
    pub fn resolve(self, type_name: &'static str) -> OrderResult<u64> {
        match self {
            Self::Id(0) => Err(ValidationError::InvalidValue {
                field: format!("{}.id", type_name),
                reason: "id must be positive".to_string(),
            }
            .into()),
            Self::Id(id) => {
                IdAllocator::global().observe(type_name, id);
                Ok(id)
            }
            Self::Auto(marker) if marker == AUTO_ID => Ok(IdAllocator::global().allocate(type_name)),
            Self::Auto(other) => Err(ValidationError::InvalidValue {
                field: format!("{}.id", type_name),
                reason: format!("expected a positive integer or '{}', got '{}'", AUTO_ID, other),
            }
            .into()),
        }
    }
}

impl From<u64> for RawId {
    fn from(id: u64) -> Self {
        Self::Id(id)
    }
}

impl From<&str> for RawId {
    fn from(marker: &str) -> Self {
        Self::Auto(marker.to_string())
    }
}

/// Validate the identity of a new object of `type_name`.
pub fn checked_identity(
    type_name: &'static str,
    id: impl Into<RawId>,
    name: impl Into<String>,
) -> OrderResult<(u64, String)> {
    let name = name.into();
    if name.is_empty() {
        return Err(ValidationError::InvalidValue {
            field: format!("{}.name", type_name),
            reason: "name must not be empty".to_string(),
        }
        .into());
    }
    Ok((id.into().resolve(type_name)?, name))
}

/// Deserialize a raw object representation, reporting failures as validation errors.
pub fn parse_raw<R: DeserializeOwned>(type_name: &'static str, raw: Value) -> OrderResult<R> {
    serde_json::from_value(raw).map_err(|e| {
        ValidationError::InvalidValue {
            field: type_name.to_string(),
            reason: e.to_string(),
        }
        .into()
    })
}

// ============================================================================
// UNIQUE OBJECT CONTRACT
// ============================================================================

/// An object with a unique id and name.
pub trait UniqueObject: Sized + 'static {
    /// Type name used in errors and in lazy placeholders' `target_type`.
    const TYPE_NAME: &'static str;

    fn id(&self) -> u64;

    fn name(&self) -> &str;

    /// Build the object from the raw value a plugin delivered for it.
    fn from_bundle(raw: Value) -> OrderResult<Self>;

    /// Wrap the object in a handle. Types whose indices keep
    /// back-references install their callbacks here.
    fn into_handle(self) -> OrderResult<Handle<Self>> {
        Ok(Handle::wrap(self))
    }
}

/// Shared, mutable reference to a unique object.
pub struct Handle<T> {
    id: u64,
    name: Rc<str>,
    inner: Rc<RefCell<T>>,
}

impl<T: UniqueObject> Handle<T> {
    /// Wrap an object without installing callbacks; see [`UniqueObject::into_handle`].
    pub fn wrap(object: T) -> Self {
        Self {
            id: object.id(),
            name: Rc::from(object.name()),
            inner: Rc::new(RefCell::new(object)),
        }
    }

    /// Immutable borrow, failing with `Busy` while the object is mutably borrowed.
    pub fn try_borrow(&self) -> OrderResult<Ref<'_, T>> {
        self.inner.try_borrow().map_err(|_| self.busy())
    }

    /// Mutable borrow, failing with `Busy` while the object is borrowed.
    pub fn try_borrow_mut(&self) -> OrderResult<RefMut<'_, T>> {
        self.inner.try_borrow_mut().map_err(|_| self.busy())
    }

    fn busy(&self) -> order_core::OrderError {
        IndexError::Busy {
            type_name: T::TYPE_NAME.to_string(),
            name: self.name.to_string(),
        }
        .into()
    }
}

impl<T> Handle<T> {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Panics if the object is mutably borrowed.
    pub fn borrow(&self) -> Ref<'_, T> {
        self.inner.borrow()
    }

    /// Panics if the object is borrowed.
    pub fn borrow_mut(&self) -> RefMut<'_, T> {
        self.inner.borrow_mut()
    }

    pub fn downgrade(&self) -> WeakHandle<T> {
        WeakHandle {
            id: self.id,
            name: Rc::clone(&self.name),
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// Whether both handles point at the same allocation.
    pub fn ptr_eq(&self, other: &Handle<T>) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            name: Rc::clone(&self.name),
            inner: Rc::clone(&self.inner),
        }
    }
}

/// Equal when name and id match.
impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.name == other.name
    }
}

impl<T> Eq for Handle<T> {}

/// Ordered by id.
impl<T> PartialOrd for Handle<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Handle<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id).then_with(|| self.name.cmp(&other.name))
    }
}

impl<T: UniqueObject> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({}, {})", T::TYPE_NAME, self.name, self.id)
    }
}

/// Non-owning counterpart of [`Handle`], used for back-references.
pub struct WeakHandle<T> {
    id: u64,
    name: Rc<str>,
    inner: Weak<RefCell<T>>,
}

impl<T> WeakHandle<T> {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn upgrade(&self) -> Option<Handle<T>> {
        self.inner.upgrade().map(|inner| Handle {
            id: self.id,
            name: Rc::clone(&self.name),
            inner,
        })
    }

    /// Whether this points at the object behind `handle`.
    pub fn points_to(&self, handle: &Handle<T>) -> bool {
        std::ptr::eq(self.inner.as_ptr(), Rc::as_ptr(&handle.inner))
    }

    pub fn points_to_weak(&self, other: &WeakHandle<T>) -> bool {
        Weak::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T> Clone for WeakHandle<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            name: Rc::clone(&self.name),
            inner: Weak::clone(&self.inner),
        }
    }
}

impl<T: UniqueObject> fmt::Debug for WeakHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Weak{}({}, {})", T::TYPE_NAME, self.name, self.id)
    }
}

// ============================================================================
// LAZY PLACEHOLDERS
// ============================================================================

/// Placeholder for a unique object that is fetched on first access.
///
/// Raw form: `{"class_name": ..., "id": ..., "name": ..., "adapter": <descriptor>}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LazyUniqueObject {
    #[serde(rename = "class_name", alias = "target_type")]
    pub target_type: String,
    pub id: u64,
    pub name: String,
    #[serde(rename = "adapter", alias = "descriptor")]
    pub descriptor: FetchDescriptor,
}

impl LazyUniqueObject {
    pub fn new(
        target_type: impl Into<String>,
        id: u64,
        name: impl Into<String>,
        descriptor: FetchDescriptor,
    ) -> Self {
        Self {
            target_type: target_type.into(),
            id,
            name: name.into(),
            descriptor,
        }
    }

    /// Fetch the bundle, build the object from the entry under the
    /// descriptor's key and check that its identity matches the placeholder.
    pub fn materialize<T: UniqueObject>(&self, provider: &DataProvider) -> OrderResult<Handle<T>> {
        if self.target_type != T::TYPE_NAME {
            return Err(IndexError::TypeMismatch {
                expected: T::TYPE_NAME.to_string(),
                found: self.target_type.clone(),
            }
            .into());
        }

        let object = provider.materialize(&self.descriptor, |bundle| {
            let raw = bundle
                .get(&self.descriptor.key)
                .cloned()
                .ok_or_else(|| MaterializeError::Incomplete {
                    plugin: self.descriptor.plugin.clone(),
                    key: self.descriptor.key.clone(),
                })?;
            let object = T::from_bundle(raw)?;
            if object.name() != self.name || object.id() != self.id {
                return Err(MaterializeError::IdentityMismatch {
                    type_name: T::TYPE_NAME.to_string(),
                    expected_name: self.name.clone(),
                    expected_id: self.id,
                    found_name: object.name().to_string(),
                    found_id: object.id(),
                }
                .into());
            }
            Ok(Consumed::Cache(object))
        })?;

        object.into_handle()
    }
}

// ============================================================================
// INDEX ENTRIES AND KEYS
// ============================================================================

/// What an index holds at one position.
pub enum IndexEntry<T> {
    Object(Handle<T>),
    Lazy(LazyUniqueObject),
}

impl<T> IndexEntry<T> {
    pub fn name(&self) -> &str {
        match self {
            Self::Object(handle) => handle.name(),
            Self::Lazy(lazy) => &lazy.name,
        }
    }

    pub fn id(&self) -> u64 {
        match self {
            Self::Object(handle) => handle.id(),
            Self::Lazy(lazy) => lazy.id,
        }
    }

    pub fn is_lazy(&self) -> bool {
        matches!(self, Self::Lazy(_))
    }

    pub fn as_object(&self) -> Option<&Handle<T>> {
        match self {
            Self::Object(handle) => Some(handle),
            Self::Lazy(_) => None,
        }
    }
}

impl<T: UniqueObject> IndexEntry<T> {
    /// Parse one raw index entry.
    ///
    /// Objects carrying an `adapter` (or `descriptor`) are explicit lazy
    /// placeholders, objects with only `name` and `id` are references turned
    /// into placeholders by `reference`, and anything else is a full object.
    pub fn from_raw<F>(raw: Value, reference: F) -> OrderResult<Self>
    where
        F: FnOnce(&str, u64) -> LazyUniqueObject,
    {
        let Value::Object(map) = &raw else {
            return Err(ValidationError::InvalidValue {
                field: T::TYPE_NAME.to_string(),
                reason: format!("expected an object, got {}", order_core::value_kind(&raw)),
            }
            .into());
        };

        if map.contains_key("adapter") || map.contains_key("descriptor") {
            return parse_raw(T::TYPE_NAME, raw).map(Self::Lazy);
        }

        if map.keys().all(|k| k == "name" || k == "id") {
            let name = map.get("name").and_then(Value::as_str).ok_or_else(|| {
                ValidationError::RequiredFieldMissing {
                    field: format!("{}.name", T::TYPE_NAME),
                }
            })?;
            let id = map.get("id").and_then(Value::as_u64).ok_or_else(|| {
                ValidationError::RequiredFieldMissing {
                    field: format!("{}.id", T::TYPE_NAME),
                }
            })?;
            return Ok(Self::Lazy(reference(name, id)));
        }

        Ok(Self::Object(T::from_bundle(raw)?.into_handle()?))
    }
}

impl<T> Clone for IndexEntry<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Object(handle) => Self::Object(handle.clone()),
            Self::Lazy(lazy) => Self::Lazy(lazy.clone()),
        }
    }
}

impl<T: UniqueObject> fmt::Debug for IndexEntry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Object(handle) => fmt::Debug::fmt(handle, f),
            Self::Lazy(lazy) => write!(f, "Lazy{}({}, {})", lazy.target_type, lazy.name, lazy.id),
        }
    }
}

impl<T> From<Handle<T>> for IndexEntry<T> {
    fn from(handle: Handle<T>) -> Self {
        Self::Object(handle)
    }
}

impl<T> From<LazyUniqueObject> for IndexEntry<T> {
    fn from(lazy: LazyUniqueObject) -> Self {
        Self::Lazy(lazy)
    }
}

/// Index lookup key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IndexKey {
    Name(String),
    Id(u64),
    /// Matches only an entry with both this name and this id.
    Object { name: String, id: u64 },
}

impl fmt::Display for IndexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => write!(f, "{}", name),
            Self::Id(id) => write!(f, "{}", id),
            Self::Object { name, id } => write!(f, "({}, {})", name, id),
        }
    }
}

impl From<&str> for IndexKey {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<String> for IndexKey {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

impl From<u64> for IndexKey {
    fn from(id: u64) -> Self {
        Self::Id(id)
    }
}

impl<T> From<&Handle<T>> for IndexKey {
    fn from(handle: &Handle<T>) -> Self {
        Self::Object {
            name: handle.name().to_string(),
            id: handle.id(),
        }
    }
}

impl<T> From<&WeakHandle<T>> for IndexKey {
    fn from(handle: &WeakHandle<T>) -> Self {
        Self::Object {
            name: handle.name().to_string(),
            id: handle.id(),
        }
    }
}

impl From<&LazyUniqueObject> for IndexKey {
    fn from(lazy: &LazyUniqueObject) -> Self {
        Self::Object {
            name: lazy.name.clone(),
            id: lazy.id,
        }
    }
}

impl<T> From<&IndexEntry<T>> for IndexKey {
    fn from(entry: &IndexEntry<T>) -> Self {
        Self::Object {
            name: entry.name().to_string(),
            id: entry.id(),
        }
    }
}

// ============================================================================
// UNIQUE INDEX
// ============================================================================

/// Called with the new object after a lazy entry was resolved.
pub type MaterializeCallback<T> = Rc<dyn Fn(&Handle<T>) -> OrderResult<()>>;

/// Called with the entry after it was added or removed.
pub type EntryCallback<T> = Rc<dyn Fn(&IndexEntry<T>) -> OrderResult<()>>;

/// Options of [`UniqueIndex::add_with`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AddOptions {
    /// Replace colliding entries instead of failing.
    pub overwrite: bool,
    /// Do not invoke `on_add` (nor `on_remove` for replaced entries).
    pub skip_callback: bool,
}

impl AddOptions {
    pub fn overwrite() -> Self {
        Self {
            overwrite: true,
            skip_callback: false,
        }
    }

    /// Options for the far side of a paired update: overwrite, no callbacks.
    pub fn paired() -> Self {
        Self {
            overwrite: true,
            skip_callback: true,
        }
    }

    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn with_skip_callback(mut self, skip_callback: bool) -> Self {
        self.skip_callback = skip_callback;
        self
    }
}

enum Slot<T> {
    Object(Handle<T>),
    Weak(WeakHandle<T>),
    Lazy(LazyUniqueObject),
}

impl<T> Slot<T> {
    fn name(&self) -> &str {
        match self {
            Self::Object(handle) => handle.name(),
            Self::Weak(handle) => handle.name(),
            Self::Lazy(lazy) => &lazy.name,
        }
    }

    fn id(&self) -> u64 {
        match self {
            Self::Object(handle) => handle.id(),
            Self::Weak(handle) => handle.id(),
            Self::Lazy(lazy) => lazy.id,
        }
    }

    /// False for a weak reference whose object was dropped.
    fn is_live(&self) -> bool {
        match self {
            Self::Weak(handle) => handle.upgrade().is_some(),
            Self::Object(_) | Self::Lazy(_) => true,
        }
    }

    /// Entry view of the slot, `None` for a dropped weak reference.
    fn to_entry(&self) -> Option<IndexEntry<T>> {
        match self {
            Self::Object(handle) => Some(IndexEntry::Object(handle.clone())),
            Self::Weak(handle) => handle.upgrade().map(IndexEntry::Object),
            Self::Lazy(lazy) => Some(IndexEntry::Lazy(lazy.clone())),
        }
    }
}

#[derive(Default)]
struct Lookup {
    by_name: HashMap<String, usize>,
    by_id: HashMap<u64, usize>,
}

struct Callbacks<T> {
    on_materialize: Option<MaterializeCallback<T>>,
    on_add: Option<EntryCallback<T>>,
    on_remove: Option<EntryCallback<T>>,
}

impl<T> Default for Callbacks<T> {
    fn default() -> Self {
        Self {
            on_materialize: None,
            on_add: None,
            on_remove: None,
        }
    }
}

/// Ordered collection of unique objects, addressable by name and by id.
///
/// No two entries share a name, no two entries share an id. Insertion order
/// is preserved and a resolved placeholder keeps its position.
///
/// A weak index holds its objects through [`WeakHandle`]s; it is used for
/// back-references such as parent processes. Resolving a placeholder in a
/// weak index returns the object but keeps only a weak reference to it.
/// Entries whose object was dropped are invisible to lookups and are
/// pruned on the next add or remove; `len` and the listing methods count
/// them until then.
pub struct UniqueIndex<T> {
    objects: Vec<Slot<T>>,
    lookup: RefCell<Lookup>,
    weak: bool,
    callbacks: Callbacks<T>,
}

impl<T: UniqueObject> Default for UniqueIndex<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: UniqueObject> UniqueIndex<T> {
    pub fn new() -> Self {
        Self {
            objects: Vec::new(),
            lookup: RefCell::new(Lookup::default()),
            weak: false,
            callbacks: Callbacks::default(),
        }
    }

    /// An index holding weak references only.
    pub fn new_weak() -> Self {
        Self {
            weak: true,
            ..Self::new()
        }
    }

    /// Build an index from seed entries. Duplicate names or ids among the
    /// seeds fail here. No callbacks are invoked.
    pub fn from_entries<I>(entries: I) -> OrderResult<Self>
    where
        I: IntoIterator<Item = IndexEntry<T>>,
    {
        let mut index = Self::new();
        let mut names = HashSet::new();
        let mut ids = HashSet::new();
        for entry in entries {
            index.check_type(&entry)?;
            if !names.insert(entry.name().to_string()) {
                return Err(index.duplicate_name(entry.name()));
            }
            if !ids.insert(entry.id()) {
                return Err(index.duplicate_id(entry.id()));
            }
            index.push(entry);
        }
        Ok(index)
    }

    pub fn is_weak(&self) -> bool {
        self.weak
    }

    pub fn set_on_materialize<F>(&mut self, callback: F)
    where
        F: Fn(&Handle<T>) -> OrderResult<()> + 'static,
    {
        self.callbacks.on_materialize = Some(Rc::new(callback));
    }

    pub fn set_on_add<F>(&mut self, callback: F)
    where
        F: Fn(&IndexEntry<T>) -> OrderResult<()> + 'static,
    {
        self.callbacks.on_add = Some(Rc::new(callback));
    }

    pub fn set_on_remove<F>(&mut self, callback: F)
    where
        F: Fn(&IndexEntry<T>) -> OrderResult<()> + 'static,
    {
        self.callbacks.on_remove = Some(Rc::new(callback));
    }

    // ------------------------------------------------------------------------
    // Lookup tables
    // ------------------------------------------------------------------------

    /// Rebuild the name and id tables when their sizes disagree with the
    /// number of entries, or always when `force` is set.
    fn sync_indices(&self, force: bool) {
        let mut lookup = self.lookup.borrow_mut();
        let n = self.objects.len();
        if !force && lookup.by_name.len() == n && lookup.by_id.len() == n {
            return;
        }
        lookup.by_name.clear();
        lookup.by_id.clear();
        for (position, slot) in self.objects.iter().enumerate() {
            lookup.by_name.insert(slot.name().to_string(), position);
            lookup.by_id.insert(slot.id(), position);
        }
    }

    fn invalidate_indices(&self) {
        let mut lookup = self.lookup.borrow_mut();
        lookup.by_name.clear();
        lookup.by_id.clear();
    }

    fn position_of(&self, key: &IndexKey) -> Option<usize> {
        self.sync_indices(false);
        let lookup = self.lookup.borrow();
        let position = match key {
            IndexKey::Name(name) => lookup.by_name.get(name).copied(),
            IndexKey::Id(id) => lookup.by_id.get(id).copied(),
            IndexKey::Object { name, id } => lookup
                .by_name
                .get(name)
                .copied()
                .filter(|&position| self.objects[position].id() == *id),
        };
        position.filter(|&position| self.objects[position].is_live())
    }

    fn push(&mut self, entry: IndexEntry<T>) {
        self.sync_indices(false);
        let slot = match entry {
            IndexEntry::Object(handle) if self.weak => Slot::Weak(handle.downgrade()),
            IndexEntry::Object(handle) => Slot::Object(handle),
            IndexEntry::Lazy(lazy) => Slot::Lazy(lazy),
        };
        let position = self.objects.len();
        let mut lookup = self.lookup.borrow_mut();
        lookup.by_name.insert(slot.name().to_string(), position);
        lookup.by_id.insert(slot.id(), position);
        drop(lookup);
        self.objects.push(slot);
    }

    // ------------------------------------------------------------------------
    // Read access
    // ------------------------------------------------------------------------

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Names in insertion order.
    pub fn names(&self) -> Vec<String> {
        self.objects.iter().map(|s| s.name().to_string()).collect()
    }

    /// Ids in insertion order.
    pub fn ids(&self) -> Vec<u64> {
        self.objects.iter().map(Slot::id).collect()
    }

    /// `(name, id)` pairs in insertion order.
    pub fn keys(&self) -> Vec<(String, u64)> {
        self.objects
            .iter()
            .map(|s| (s.name().to_string(), s.id()))
            .collect()
    }

    pub fn has(&self, key: impl Into<IndexKey>) -> bool {
        self.position_of(&key.into()).is_some()
    }

    /// Position of an entry in insertion order.
    pub fn position(&self, key: impl Into<IndexKey>) -> Option<usize> {
        self.position_of(&key.into())
    }

    /// The entry stored under `key`, without resolving placeholders.
    pub fn get_entry(&self, key: impl Into<IndexKey>) -> Option<IndexEntry<T>> {
        self.position_of(&key.into())
            .and_then(|position| self.objects[position].to_entry())
    }

    /// All live entries in order, without resolving placeholders.
    pub fn entries(&self) -> Vec<IndexEntry<T>> {
        self.objects.iter().filter_map(Slot::to_entry).collect()
    }

    /// Fail the way [`add`](Self::add) would if `name` or `id` is already
    /// taken, without changing the index.
    pub fn check_free(&self, name: &str, id: u64) -> OrderResult<()> {
        if self.has(IndexKey::Name(name.to_string())) {
            return Err(self.duplicate_name(name));
        }
        if self.has(IndexKey::Id(id)) {
            return Err(self.duplicate_id(id));
        }
        Ok(())
    }

    /// Number of unresolved placeholders.
    pub fn lazy_count(&self) -> usize {
        self.objects
            .iter()
            .filter(|s| matches!(s, Slot::Lazy(_)))
            .count()
    }

    // ------------------------------------------------------------------------
    // Resolving access
    // ------------------------------------------------------------------------

    /// The object stored under `key`, resolving a placeholder in place.
    pub fn get(&mut self, key: impl Into<IndexKey>, provider: &DataProvider) -> OrderResult<Handle<T>> {
        let key = key.into();
        match self.position_of(&key) {
            Some(position) => self.resolve_at(position, provider),
            None => Err(self.not_found(&key)),
        }
    }

    /// Like [`get`](Self::get), but a missing key yields `Ok(None)`.
    pub fn find(
        &mut self,
        key: impl Into<IndexKey>,
        provider: &DataProvider,
    ) -> OrderResult<Option<Handle<T>>> {
        match self.position_of(&key.into()) {
            Some(position) => self.resolve_at(position, provider).map(Some),
            None => Ok(None),
        }
    }

    /// Like [`get`](Self::get), but a missing key yields `default`.
    pub fn get_or(
        &mut self,
        key: impl Into<IndexKey>,
        provider: &DataProvider,
        default: Handle<T>,
    ) -> OrderResult<Handle<T>> {
        Ok(self.find(key, provider)?.unwrap_or(default))
    }

    pub fn get_first(&mut self, provider: &DataProvider) -> OrderResult<Handle<T>> {
        if self.objects.is_empty() {
            return Err(self.not_found(&IndexKey::Name("<first>".to_string())));
        }
        self.resolve_at(0, provider)
    }

    pub fn get_last(&mut self, provider: &DataProvider) -> OrderResult<Handle<T>> {
        match self.objects.len() {
            0 => Err(self.not_found(&IndexKey::Name("<last>".to_string()))),
            n => self.resolve_at(n - 1, provider),
        }
    }

    /// Every object in order, resolving all placeholders.
    pub fn objects(&mut self, provider: &DataProvider) -> OrderResult<Vec<Handle<T>>> {
        (0..self.objects.len())
            .map(|position| self.resolve_at(position, provider))
            .collect()
    }

    /// Iterate over [`objects`](Self::objects).
    pub fn iter(&mut self, provider: &DataProvider) -> OrderResult<std::vec::IntoIter<Handle<T>>> {
        self.objects(provider).map(Vec::into_iter)
    }

    fn resolve_at(&mut self, position: usize, provider: &DataProvider) -> OrderResult<Handle<T>> {
        let lazy = match &self.objects[position] {
            Slot::Object(handle) => return Ok(handle.clone()),
            Slot::Weak(handle) => {
                return handle.upgrade().ok_or_else(|| {
                    IndexError::ReferenceDropped {
                        type_name: T::TYPE_NAME.to_string(),
                        name: handle.name().to_string(),
                    }
                    .into()
                })
            }
            Slot::Lazy(lazy) => lazy.clone(),
        };

        let handle = lazy.materialize::<T>(provider)?;
        self.objects[position] = if self.weak {
            Slot::Weak(handle.downgrade())
        } else {
            Slot::Object(handle.clone())
        };
        tracing::debug!(
            type_name = T::TYPE_NAME,
            name = %handle.name(),
            id = handle.id(),
            position,
            "Replaced lazy index entry"
        );

        if let Some(callback) = self.callbacks.on_materialize.clone() {
            callback(&handle)?;
        }
        Ok(handle)
    }

    // ------------------------------------------------------------------------
    // Mutation
    // ------------------------------------------------------------------------

    /// Add an entry, failing on name or id collisions.
    pub fn add(&mut self, entry: impl Into<IndexEntry<T>>) -> OrderResult<()> {
        self.add_with(entry, AddOptions::default())
    }

    /// Add an entry. With `overwrite`, colliding entries are removed first.
    /// On failure the index is unchanged.
    pub fn add_with(
        &mut self,
        entry: impl Into<IndexEntry<T>>,
        options: AddOptions,
    ) -> OrderResult<()> {
        let entry = entry.into();
        self.check_type(&entry)?;
        if self.weak {
            self.prune_dropped();
        }

        let name_taken = self.has(IndexKey::Name(entry.name().to_string()));
        let id_taken = self.has(IndexKey::Id(entry.id()));
        if name_taken && !options.overwrite {
            return Err(self.duplicate_name(entry.name()));
        }
        if id_taken && !options.overwrite {
            return Err(self.duplicate_id(entry.id()));
        }
        if name_taken {
            self.remove_with(IndexKey::Name(entry.name().to_string()), options.skip_callback)?;
        }
        if self.has(IndexKey::Id(entry.id())) {
            self.remove_with(IndexKey::Id(entry.id()), options.skip_callback)?;
        }

        self.push(entry.clone());

        if !options.skip_callback {
            if let Some(callback) = self.callbacks.on_add.clone() {
                callback(&entry)?;
            }
        }
        Ok(())
    }

    /// Add several entries in order.
    pub fn extend<I>(&mut self, entries: I, options: AddOptions) -> OrderResult<()>
    where
        I: IntoIterator<Item = IndexEntry<T>>,
    {
        entries
            .into_iter()
            .try_for_each(|entry| self.add_with(entry, options))
    }

    /// Remove the entry under `key`. Returns whether one was removed.
    pub fn remove(&mut self, key: impl Into<IndexKey>) -> OrderResult<bool> {
        self.remove_with(key, false)
    }

    pub fn remove_with(&mut self, key: impl Into<IndexKey>, skip_callback: bool) -> OrderResult<bool> {
        if self.weak {
            self.prune_dropped();
        }
        let Some(position) = self.position_of(&key.into()) else {
            return Ok(false);
        };
        let slot = self.objects.remove(position);
        self.invalidate_indices();

        if !skip_callback {
            if let (Some(callback), Some(entry)) = (self.callbacks.on_remove.clone(), slot.to_entry()) {
                callback(&entry)?;
            }
        }
        Ok(true)
    }

    /// Drop weak entries whose object no longer exists, without invoking
    /// callbacks. Returns how many were dropped.
    pub fn prune_dropped(&mut self) -> usize {
        let before = self.objects.len();
        self.objects.retain(Slot::is_live);
        let pruned = before - self.objects.len();
        if pruned > 0 {
            self.invalidate_indices();
            tracing::debug!(type_name = T::TYPE_NAME, pruned, "Pruned dropped weak entries");
        }
        pruned
    }

    /// Drop every entry without invoking callbacks.
    pub fn clear(&mut self) {
        self.objects.clear();
        self.sync_indices(true);
    }

    // ------------------------------------------------------------------------
    // Errors
    // ------------------------------------------------------------------------

    fn check_type(&self, entry: &IndexEntry<T>) -> OrderResult<()> {
        match entry {
            IndexEntry::Lazy(lazy) if lazy.target_type != T::TYPE_NAME => {
                Err(IndexError::TypeMismatch {
                    expected: T::TYPE_NAME.to_string(),
                    found: lazy.target_type.clone(),
                }
                .into())
            }
            _ => Ok(()),
        }
    }

    fn not_found(&self, key: &IndexKey) -> order_core::OrderError {
        IndexError::NotFound {
            type_name: T::TYPE_NAME.to_string(),
            key: key.to_string(),
        }
        .into()
    }

    fn duplicate_name(&self, name: &str) -> order_core::OrderError {
        IndexError::DuplicateName {
            type_name: T::TYPE_NAME.to_string(),
            name: name.to_string(),
        }
        .into()
    }

    fn duplicate_id(&self, id: u64) -> order_core::OrderError {
        IndexError::DuplicateId {
            type_name: T::TYPE_NAME.to_string(),
            id,
        }
        .into()
    }
}

impl<T: UniqueObject> fmt::Debug for UniqueIndex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UniqueIndex")
            .field("type", &T::TYPE_NAME)
            .field("weak", &self.weak)
            .field("names", &self.names())
            .finish()
    }
}
