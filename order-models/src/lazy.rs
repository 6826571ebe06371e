//! Lazy field values.
//!
//! A [`LazyValue`] holds either a concrete value or the [`FetchDescriptor`]
//! that produces it. Objects expose their lazy fields through [`LazyFields`];
//! [`materialize_field`] resolves one field and, from the same result bundle,
//! every other pending field whose descriptor is signature-compatible.

use order_core::{FetchDescriptor, MaterializeError, OrderResult};
use order_storage::{Consumed, DataProvider};
use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::HashMap;

// ============================================================================
// LAZY VALUE
// ============================================================================

/// A field that is either still pending or already resolved.
///
/// Reading goes through [`materialize_field`]; once `Resolved`, a value is
/// never turned back into `Pending` by resolution. Assigning a new
/// descriptor is always allowed.
#[derive(Debug, Clone, PartialEq)]
pub enum LazyValue<T> {
    Pending(FetchDescriptor),
    Resolved(T),
}

impl<T> LazyValue<T> {
    pub fn resolved(value: T) -> Self {
        Self::Resolved(value)
    }

    pub fn pending(descriptor: FetchDescriptor) -> Self {
        Self::Pending(descriptor)
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved(_))
    }

    /// The descriptor of a pending value.
    pub fn descriptor(&self) -> Option<&FetchDescriptor> {
        match self {
            Self::Pending(descriptor) => Some(descriptor),
            Self::Resolved(_) => None,
        }
    }

    /// The value, if resolved.
    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Resolved(value) => Some(value),
            Self::Pending(_) => None,
        }
    }

    pub fn value_mut(&mut self) -> Option<&mut T> {
        match self {
            Self::Resolved(value) => Some(value),
            Self::Pending(_) => None,
        }
    }

    pub fn into_value(self) -> Option<T> {
        match self {
            Self::Resolved(value) => Some(value),
            Self::Pending(_) => None,
        }
    }

    /// Replace the stored state without resolving anything.
    pub fn set(&mut self, value: impl Into<LazyValue<T>>) {
        *self = value.into();
    }

    /// The resolved value of `field`, or `Incomplete` if it is still pending.
    pub fn require(&self, field: &str) -> OrderResult<&T> {
        match self {
            Self::Resolved(value) => Ok(value),
            Self::Pending(descriptor) => Err(MaterializeError::Incomplete {
                plugin: descriptor.plugin.clone(),
                key: field.to_string(),
            }
            .into()),
        }
    }
}

impl<T> From<FetchDescriptor> for LazyValue<T> {
    fn from(descriptor: FetchDescriptor) -> Self {
        Self::Pending(descriptor)
    }
}

impl<T: Default> Default for LazyValue<T> {
    fn default() -> Self {
        Self::Resolved(T::default())
    }
}

impl<T: Serialize> Serialize for LazyValue<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Pending(descriptor) => descriptor.serialize(serializer),
            Self::Resolved(value) => value.serialize(serializer),
        }
    }
}

/// Raw values shaped like a descriptor become `Pending`, anything else is
/// parsed as `T`.
impl<'de, T: DeserializeOwned> Deserialize<'de> for LazyValue<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Value::deserialize(deserializer)?;
        if let Some(descriptor) = FetchDescriptor::from_raw(&raw).map_err(D::Error::custom)? {
            return Ok(Self::Pending(descriptor));
        }
        T::deserialize(raw).map(Self::Resolved).map_err(D::Error::custom)
    }
}

// ============================================================================
// OBJECT-LEVEL MATERIALIZATION
// ============================================================================

/// Type-erased view of a lazy field, used to fill several fields of one
/// object from a single bundle.
pub trait LazySlot {
    fn descriptor(&self) -> Option<&FetchDescriptor>;

    /// Check that `raw` can be stored without storing it.
    fn check(&self, field: &str, raw: &Value) -> Result<(), MaterializeError>;

    /// Parse `raw` and transition to `Resolved`.
    fn fill(&mut self, field: &str, raw: Value) -> Result<(), MaterializeError>;

    /// Go back to `Pending` after a rejected fill.
    fn reset(&mut self, descriptor: FetchDescriptor);
}

impl<T: DeserializeOwned> LazySlot for LazyValue<T> {
    fn descriptor(&self) -> Option<&FetchDescriptor> {
        LazyValue::descriptor(self)
    }

    fn check(&self, field: &str, raw: &Value) -> Result<(), MaterializeError> {
        T::deserialize(raw)
            .map(|_| ())
            .map_err(|e| MaterializeError::InvalidValue {
                field: field.to_string(),
                reason: e.to_string(),
            })
    }

    fn fill(&mut self, field: &str, raw: Value) -> Result<(), MaterializeError> {
        let value = serde_json::from_value(raw).map_err(|e| MaterializeError::InvalidValue {
            field: field.to_string(),
            reason: e.to_string(),
        })?;
        *self = Self::Resolved(value);
        Ok(())
    }

    fn reset(&mut self, descriptor: FetchDescriptor) {
        *self = Self::Pending(descriptor);
    }
}

/// Objects with lazy fields list them here, by field name.
pub trait LazyFields {
    fn lazy_fields_mut(&mut self) -> Vec<(&'static str, &mut dyn LazySlot)>;

    /// Checked after fetched values were stored. An error puts the filled
    /// fields back to pending.
    fn validate(&self) -> OrderResult<()> {
        Ok(())
    }
}

/// Resolve the lazy field `field` of `owner`.
///
/// A resolved field returns immediately without touching the provider.
/// Otherwise the descriptor is resolved once and every pending field of
/// `owner` with a signature-compatible descriptor is filled from the same
/// bundle, after which `owner` is validated. Nothing is kept or cached
/// unless all of them can be filled and the owner stays valid, so a failure
/// leaves every field pending for the next attempt.
pub fn materialize_field<O>(owner: &mut O, field: &str, provider: &DataProvider) -> OrderResult<()>
where
    O: LazyFields + ?Sized,
{
    let descriptor = {
        let fields = owner.lazy_fields_mut();
        let (_, slot) = fields
            .into_iter()
            .find(|(name, _)| *name == field)
            .ok_or_else(|| MaterializeError::UnknownField {
                field: field.to_string(),
            })?;
        match slot.descriptor() {
            Some(descriptor) => descriptor.clone(),
            None => return Ok(()),
        }
    };

    let pending: Vec<(&'static str, FetchDescriptor)> = owner
        .lazy_fields_mut()
        .into_iter()
        .filter_map(|(name, slot)| {
            slot.descriptor()
                .filter(|d| d.is_signature_compatible(&descriptor))
                .map(|d| (name, d.clone()))
        })
        .collect();

    let filled = provider.materialize(&descriptor, |bundle| {
        let mut values: HashMap<&str, &Value> = HashMap::new();
        for (name, pending_descriptor) in &pending {
            let raw = bundle
                .get(&pending_descriptor.key)
                .ok_or_else(|| MaterializeError::Incomplete {
                    plugin: descriptor.plugin.clone(),
                    key: pending_descriptor.key.clone(),
                })?;
            values.insert(*name, raw);
        }

        let mut slots = owner.lazy_fields_mut();
        for (name, slot) in &slots {
            if let Some(raw) = values.get(*name) {
                slot.check(name, raw)?;
            }
        }
        let stored = slots.iter_mut().try_for_each(|(name, slot)| match values.get(*name) {
            Some(raw) => slot.fill(name, (*raw).clone()),
            None => Ok(()),
        });
        drop(slots);

        let result = stored.map_err(Into::into).and_then(|()| owner.validate());
        if let Err(e) = result {
            reset_fields(owner, &pending);
            return Err(e);
        }
        Ok(Consumed::Cache(pending.len()))
    })?;

    tracing::debug!(
        field = %field,
        plugin = %descriptor.plugin,
        filled,
        "Materialized lazy fields"
    );
    Ok(())
}

fn reset_fields<O>(owner: &mut O, pending: &[(&'static str, FetchDescriptor)])
where
    O: LazyFields + ?Sized,
{
    for (name, slot) in owner.lazy_fields_mut() {
        if let Some((_, descriptor)) = pending.iter().find(|(pending_name, _)| *pending_name == name) {
            slot.reset(descriptor.clone());
        }
    }
}
