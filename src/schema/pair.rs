use std::collections::BTreeSet;

use tracing::debug;

use super::{RelationshipDefinition, SchemaService};
use crate::types::{CacheError, Result};

/// Whether a side holds one reference or many.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Cardinality {
    /// `belongsTo`-like.
    Singular,
    /// `hasMany`-like.
    Collection,
}

/// Which directional view of a pair a relationship maps to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Side {
    /// The side the pair was first described from.
    Lhs,
    /// The inverse side.
    Rhs,
}

impl Side {
    /// The opposite side.
    pub fn flip(self) -> Side {
        match self {
            Side::Lhs => Side::Rhs,
            Side::Rhs => Side::Lhs,
        }
    }
}

/// Owner type, field name and cardinality of one side of a pair.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SideInfo {
    /// Owning type; the abstract base for the polymorphic side.
    pub owner: String,
    /// Field name.
    pub name: String,
    /// Singular or collection.
    pub cardinality: Cardinality,
}

impl SideInfo {
    fn from_definition(definition: &RelationshipDefinition) -> Self {
        Self {
            owner: definition.owner.clone(),
            name: definition.name.clone(),
            cardinality: definition.kind.cardinality(),
        }
    }

    /// Returns `true` for collection sides.
    pub fn is_collection(&self) -> bool {
        self.cardinality == Cardinality::Collection
    }
}

/// Whether one side is filled by several concrete types.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Polymorphism {
    /// Both sides have a single concrete type.
    Simple,
    /// The rhs is an abstract `base` filled by the recorded concrete types.
    Polymorphic {
        /// Abstract base type.
        base: String,
        /// Concrete types seen so far.
        concrete: BTreeSet<String>,
    },
}

/// Whether both ends are the same type and field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reflexivity {
    /// Self-referential (for example `person.friends`).
    Reflexive,
    /// Two distinct fields.
    Normal,
}

/// Memoized description of one logical relationship edge.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelationshipPairInfo {
    /// Left-hand side.
    pub lhs: SideInfo,
    /// Right-hand side; `None` when the relationship declares no inverse.
    pub rhs: Option<SideInfo>,
    /// Polymorphism of the pair.
    pub polymorphism: Polymorphism,
    /// Reflexivity of the pair.
    pub reflexivity: Reflexivity,
}

/// Output of [`RelationshipPairInfo::resolve`].
#[derive(Clone, Debug)]
pub struct ResolvedPair {
    /// Pair description.
    pub info: RelationshipPairInfo,
    /// Side the requested relationship maps to.
    pub side: Side,
    /// Concrete type to adopt into a polymorphic pair, when the request came
    /// from a concrete subtype of the abstract side.
    pub adopt: Option<String>,
}

impl RelationshipPairInfo {
    /// Resolves the pair `ty.name` belongs to from schema definitions.
    pub fn resolve(schema: &dyn SchemaService, ty: &str, name: &str) -> Result<ResolvedPair> {
        let definition =
            schema
                .relationship(ty, name)
                .ok_or_else(|| CacheError::UnknownRelationship {
                    owner: ty.to_string(),
                    name: name.to_string(),
                })?;
        let requested = SideInfo {
            owner: ty.to_string(),
            ..SideInfo::from_definition(&definition)
        };

        let Some(inverse_name) = definition.inverse.as_deref() else {
            debug!(owner = ty, name, "relationship.pair.one_sided");
            return Ok(ResolvedPair {
                info: RelationshipPairInfo {
                    lhs: requested,
                    rhs: None,
                    polymorphism: Polymorphism::Simple,
                    reflexivity: Reflexivity::Normal,
                },
                side: Side::Lhs,
                adopt: None,
            });
        };

        let inverse = schema
            .relationship(&definition.target, inverse_name)
            .ok_or_else(|| CacheError::UnknownRelationship {
                owner: definition.target.clone(),
                name: inverse_name.to_string(),
            })?;
        if let Some(back) = inverse.inverse.as_deref() {
            if back != name {
                return Err(CacheError::NotInPair {
                    ty: ty.to_string(),
                    name: name.to_string(),
                });
            }
        }

        if definition.target == ty && inverse_name == name {
            return Ok(ResolvedPair {
                info: RelationshipPairInfo {
                    lhs: requested.clone(),
                    rhs: Some(requested),
                    polymorphism: Polymorphism::Simple,
                    reflexivity: Reflexivity::Reflexive,
                },
                side: Side::Lhs,
                adopt: None,
            });
        }

        if definition.polymorphic {
            let rhs = SideInfo {
                owner: definition.target.clone(),
                ..SideInfo::from_definition(&inverse)
            };
            return Ok(ResolvedPair {
                info: RelationshipPairInfo {
                    lhs: requested,
                    rhs: Some(rhs),
                    polymorphism: Polymorphism::Polymorphic {
                        base: definition.target.clone(),
                        concrete: BTreeSet::new(),
                    },
                    reflexivity: Reflexivity::Normal,
                },
                side: Side::Lhs,
                adopt: None,
            });
        }

        if inverse.polymorphic {
            // The inverse owner is the polymorphic side; this type is one of
            // the concrete types filling its abstract target.
            let base = inverse.target.clone();
            let lhs = SideInfo {
                owner: definition.target.clone(),
                ..SideInfo::from_definition(&inverse)
            };
            let rhs = SideInfo {
                owner: base.clone(),
                ..requested
            };
            let mut concrete = BTreeSet::new();
            concrete.insert(ty.to_string());
            return Ok(ResolvedPair {
                info: RelationshipPairInfo {
                    lhs,
                    rhs: Some(rhs),
                    polymorphism: Polymorphism::Polymorphic { base, concrete },
                    reflexivity: Reflexivity::Normal,
                },
                side: Side::Rhs,
                adopt: Some(ty.to_string()),
            });
        }

        let rhs = SideInfo {
            owner: definition.target.clone(),
            ..SideInfo::from_definition(&inverse)
        };
        Ok(ResolvedPair {
            info: RelationshipPairInfo {
                lhs: requested,
                rhs: Some(rhs),
                polymorphism: Polymorphism::Simple,
                reflexivity: Reflexivity::Normal,
            },
            side: Side::Lhs,
            adopt: None,
        })
    }

    /// Info for `side`. Reflexive and one-sided pairs only have an lhs.
    pub fn side(&self, side: Side) -> &SideInfo {
        match (side, &self.rhs) {
            (Side::Rhs, Some(rhs)) if !self.is_reflexive() => rhs,
            _ => &self.lhs,
        }
    }

    /// Side holding the inverse view of `side`, if the pair has one.
    pub fn inverse_side(&self, side: Side) -> Option<Side> {
        self.rhs.as_ref()?;
        if self.is_reflexive() {
            Some(Side::Lhs)
        } else {
            Some(side.flip())
        }
    }

    /// Returns `true` for self-referential pairs.
    pub fn is_reflexive(&self) -> bool {
        self.reflexivity == Reflexivity::Reflexive
    }

    /// Returns `true` when the rhs is filled by multiple concrete types.
    pub fn is_polymorphic(&self) -> bool {
        matches!(self.polymorphism, Polymorphism::Polymorphic { .. })
    }

    /// Records `ty` as a concrete participant of a polymorphic pair.
    ///
    /// Returns `true` when the type was not known before.
    pub fn adopt_concrete(&mut self, ty: &str) -> bool {
        match &mut self.polymorphism {
            Polymorphism::Polymorphic { concrete, .. } => concrete.insert(ty.to_string()),
            Polymorphism::Simple => false,
        }
    }
}
