//! Schema bundle and the reference type-graph provider built on it.

use std::collections::{HashMap, VecDeque};

use super::entity::{EntityDef, TypeInfo, TypeRef};
use super::field::{FieldDef, FieldShape};
use super::graph::{Link, TypeGraph, TypeGraphProvider};
use super::relation::RelationDef;
use crate::error::Error;

/// A versioned snapshot of the entity model.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    /// Schema version (monotonically increasing).
    pub version: u64,
    /// Entity definitions keyed by name.
    pub entities: HashMap<String, EntityDef>,
    /// Relation definitions keyed by `"{from_entity}.{name}"`.
    pub relations: HashMap<String, RelationDef>,
}

/// Result of looking up one path segment on a type.
enum Segment<'a> {
    Field(&'a FieldDef),
    Relation(&'a RelationDef),
}

impl Schema {
    /// Create an empty schema.
    pub fn new(version: u64) -> Self {
        Self {
            version,
            ..Default::default()
        }
    }

    /// Add an entity to the schema.
    pub fn with_entity(mut self, entity: EntityDef) -> Self {
        self.entities.insert(entity.name.clone(), entity);
        self
    }

    /// Add a relation to the schema.
    pub fn with_relation(mut self, relation: RelationDef) -> Self {
        self.relations.insert(
            format!("{}.{}", relation.from_entity, relation.name),
            relation,
        );
        self
    }

    /// Get an entity by name.
    pub fn get_entity(&self, name: &str) -> Option<&EntityDef> {
        self.entities.get(name)
    }

    /// Direct subtypes of an entity, sorted by name for deterministic plans.
    pub fn subtypes_of(&self, name: &str) -> Vec<&EntityDef> {
        let mut subs: Vec<&EntityDef> = self
            .entities
            .values()
            .filter(|e| e.supertype.as_deref() == Some(name))
            .collect();
        subs.sort_by(|a, b| a.name.cmp(&b.name));
        subs
    }

    /// Check whether `name` is `ancestor` or one of its (transitive) subtypes.
    pub fn is_a(&self, name: &str, ancestor: &str) -> bool {
        let mut current = Some(name);
        while let Some(n) = current {
            if n == ancestor {
                return true;
            }
            current = self.entities.get(n).and_then(|e| e.supertype.as_deref());
        }
        false
    }

    /// Root of the inheritance hierarchy containing `name`.
    pub fn family_of<'a>(&'a self, name: &'a str) -> &'a str {
        let mut current = name;
        while let Some(sup) = self.entities.get(current).and_then(|e| e.supertype.as_deref()) {
            current = sup;
        }
        current
    }

    /// Look up a segment on `entity` or any of its supertypes.
    fn lookup(&self, entity: &str, segment: &str) -> Option<Segment<'_>> {
        let mut current = Some(entity);
        while let Some(name) = current {
            let def = self.entities.get(name)?;
            if let Some(field) = def.get_field(segment) {
                return Some(Segment::Field(field));
            }
            if let Some(rel) = self.relations.get(&format!("{name}.{segment}")) {
                return Some(Segment::Relation(rel));
            }
            current = def.supertype.as_deref();
        }
        None
    }

    /// Find the nearest subtype chain of `entity` whose last element declares `segment`.
    fn subtype_chain(&self, entity: &str, segment: &str) -> Option<Vec<String>> {
        let mut queue: VecDeque<Vec<String>> = self
            .subtypes_of(entity)
            .into_iter()
            .map(|e| vec![e.name.clone()])
            .collect();

        while let Some(chain) = queue.pop_front() {
            let last = chain.last()?;
            let def = self.entities.get(last)?;
            if def.get_field(segment).is_some()
                || self.relations.contains_key(&format!("{last}.{segment}"))
            {
                return Some(chain);
            }
            for sub in self.subtypes_of(last) {
                let mut next = chain.clone();
                next.push(sub.name.clone());
                queue.push_back(next);
            }
        }
        None
    }
}

impl TypeGraphProvider for Schema {
    fn type_ref(&self, entity: &str) -> Result<TypeRef, Error> {
        let def = self
            .entities
            .get(entity)
            .ok_or_else(|| Error::UnknownEntity(entity.to_string()))?;
        let family = self.family_of(entity);
        let identity_field = self
            .entities
            .get(family)
            .map(|root| root.identity_field.clone())
            .unwrap_or_else(|| def.identity_field.clone());

        Ok(TypeRef::new(TypeInfo {
            name: def.name.clone(),
            identity_field,
            family: family.to_string(),
            has_subtypes: !self.subtypes_of(entity).is_empty(),
            open: def.open,
        }))
    }

    fn resolve(&self, root: &TypeRef, paths: &[String]) -> Result<TypeGraph, Error> {
        let mut graph = TypeGraph::new(root.clone());

        for path in paths {
            let segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
            let mut state = 0;
            let mut idx = 0;

            while idx < segments.len() {
                let segment = segments[idx];
                let entity = graph.states[state].entity.clone();
                let last = idx + 1 == segments.len();

                // Dynamic types accept any path; nothing below them is populated.
                if entity.is_open() {
                    break;
                }

                match self.lookup(entity.name(), segment) {
                    Some(Segment::Relation(rel)) => {
                        let target = self.type_ref(&rel.to_entity)?;
                        let child_path = join_path(&graph.states[state].path, segment);
                        state = graph.step(state, Link::Relation(rel.clone()), target, child_path);
                        idx += 1;
                    }
                    Some(Segment::Field(field)) => {
                        if !last {
                            return Err(Error::UnknownPath {
                                entity: root.name().to_string(),
                                path: path.clone(),
                            });
                        }
                        if field.name != entity.identity_field() {
                            let target = &mut graph.states[state];
                            let list = match field.shape {
                                FieldShape::Scalar => &mut target.fields,
                                FieldShape::Collection => &mut target.collections,
                            };
                            if !list.iter().any(|f| f == &field.name) {
                                list.push(field.name.clone());
                            }
                        }
                        idx += 1;
                    }
                    None => {
                        // Not on the type itself: refine into the subtype that declares it
                        // and retry the same segment there.
                        let chain = self.subtype_chain(entity.name(), segment).ok_or_else(|| {
                            Error::UnknownPath {
                                entity: root.name().to_string(),
                                path: path.clone(),
                            }
                        })?;
                        for sub in chain {
                            let sub_ref = self.type_ref(&sub)?;
                            let same_path = graph.states[state].path.clone();
                            state = graph.step(state, Link::Subtype, sub_ref, same_path);
                        }
                    }
                }
            }
        }

        Ok(graph)
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Append a segment to a dotted path.
pub(crate) fn join_path(prefix: &str, segment: &str) -> String {
    if prefix.is_empty() {
        segment.to_string()
    } else if segment.is_empty() {
        prefix.to_string()
    } else {
        format!("{prefix}.{segment}")
    }
}
