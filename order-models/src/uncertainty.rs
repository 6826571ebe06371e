//! Uncertainties and their classes.
//!
//! The type label of an uncertainty (`syst_exp_jec`, `syst_theory_scale`,
//! ...) selects its class: the longest leading run of `_`-separated tokens
//! naming a known class wins.

use crate::unique::{
    checked_identity, parse_raw, LazyUniqueObject, RawId, UniqueIndex, UniqueObject,
};
use order_core::{FetchDescriptor, OrderResult, ValidationError};
use serde::Deserialize;
use serde_json::Value;

/// Index of uncertainties.
pub type UncertaintyIndex = UniqueIndex<Uncertainty>;

pub const SYSTEMATIC: &str = "syst";
pub const EXPERIMENTAL: &str = "syst_exp";
pub const THEORY: &str = "syst_theory";

const CLASS_LABELS: [&str; 3] = [SYSTEMATIC, EXPERIMENTAL, THEORY];

/// Class label an uncertainty type belongs to, `None` if no prefix of it
/// names a class.
pub fn class_label(uncertainty_type: &str) -> Option<&'static str> {
    let tokens: Vec<&str> = uncertainty_type.split('_').collect();
    (1..=tokens.len()).rev().find_map(|n| {
        let prefix = tokens[..n].join("_");
        CLASS_LABELS.iter().copied().find(|label| *label == prefix)
    })
}

/// Class-specific data of an uncertainty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UncertaintyKind {
    Systematic,
    /// Provided by a physics object group.
    Experimental { pog: String },
    /// Derived from the variations of an event generator.
    Theory { generator: String },
}

impl UncertaintyKind {
    pub fn class_label(&self) -> &'static str {
        match self {
            Self::Systematic => SYSTEMATIC,
            Self::Experimental { .. } => EXPERIMENTAL,
            Self::Theory { .. } => THEORY,
        }
    }
}

/// A named source of uncertainty.
#[derive(Debug, Clone, PartialEq)]
pub struct Uncertainty {
    id: u64,
    name: String,
    uncertainty_type: String,
    pub description: String,
    kind: UncertaintyKind,
}

#[derive(Deserialize)]
struct RawUncertainty {
    id: RawId,
    name: String,
    #[serde(default = "default_type", rename = "type", alias = "uncertainty_type")]
    uncertainty_type: String,
    #[serde(default)]
    description: String,
    pog: Option<String>,
    generator: Option<String>,
}

fn default_type() -> String {
    SYSTEMATIC.to_string()
}

impl Uncertainty {
    /// Fails unless `uncertainty_type` belongs to the class of `kind`.
    pub fn new(
        id: impl Into<RawId>,
        name: impl Into<String>,
        uncertainty_type: impl Into<String>,
        kind: UncertaintyKind,
    ) -> OrderResult<Self> {
        let (id, name) = checked_identity(Self::TYPE_NAME, id, name)?;
        let uncertainty_type = uncertainty_type.into();
        match class_label(&uncertainty_type) {
            Some(label) if label == kind.class_label() => {}
            Some(label) => {
                return Err(invalid(
                    &name,
                    "type",
                    format!(
                        "'{}' is a {} uncertainty, not {}",
                        uncertainty_type,
                        label,
                        kind.class_label()
                    ),
                ))
            }
            None => {
                return Err(invalid(
                    &name,
                    "type",
                    format!("no uncertainty class for type '{}'", uncertainty_type),
                ))
            }
        }
        Ok(Self {
            id,
            name,
            uncertainty_type,
            description: String::new(),
            kind,
        })
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Placeholder for an uncertainty loaded through the `order_uncertainty`
    /// plugin.
    pub fn lazy(name: &str, id: u64) -> LazyUniqueObject {
        LazyUniqueObject::new(
            Self::TYPE_NAME,
            id,
            name,
            FetchDescriptor::new("order_uncertainty", "uncertainty")
                .with_argument("uncertainty_name", name),
        )
    }

    pub fn uncertainty_type(&self) -> &str {
        &self.uncertainty_type
    }

    pub fn kind(&self) -> &UncertaintyKind {
        &self.kind
    }

    pub fn pog(&self) -> Option<&str> {
        match &self.kind {
            UncertaintyKind::Experimental { pog } => Some(pog),
            _ => None,
        }
    }

    pub fn generator(&self) -> Option<&str> {
        match &self.kind {
            UncertaintyKind::Theory { generator } => Some(generator),
            _ => None,
        }
    }
}

fn invalid(name: &str, field: &str, reason: String) -> order_core::OrderError {
    ValidationError::InvalidValue {
        field: format!("Uncertainty({}).{}", name, field),
        reason,
    }
    .into()
}

impl UniqueObject for Uncertainty {
    const TYPE_NAME: &'static str = "Uncertainty";

    fn id(&self) -> u64 {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn from_bundle(raw: Value) -> OrderResult<Self> {
        let raw: RawUncertainty = parse_raw(Self::TYPE_NAME, raw)?;
        let class = class_label(&raw.uncertainty_type);

        if raw.pog.is_some() && class != Some(EXPERIMENTAL) {
            return Err(invalid(
                &raw.name,
                "pog",
                "only experimental uncertainties have a POG".to_string(),
            ));
        }
        if raw.generator.is_some() && class != Some(THEORY) {
            return Err(invalid(
                &raw.name,
                "generator",
                "only theory uncertainties have a generator".to_string(),
            ));
        }
        let kind = match class {
            Some(EXPERIMENTAL) => UncertaintyKind::Experimental {
                pog: raw.pog.unwrap_or_default(),
            },
            Some(THEORY) => UncertaintyKind::Theory {
                generator: raw.generator.unwrap_or_default(),
            },
            _ => UncertaintyKind::Systematic,
        };

        Ok(Self::new(raw.id, raw.name, raw.uncertainty_type, kind)?.with_description(raw.description))
    }
}
