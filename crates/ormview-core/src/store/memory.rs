//! In-memory data store.
//!
//! Records are keyed by (hierarchy family, identifier), so a subtype record
//! is found by any query over one of its supertypes. Query trees execute by
//! walking fragments from each root record and taking the product of every
//! fragment's branches, which yields the same flat, outer-joined rows a
//! relational store would return for the generated query.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::catalog::{Link, RelationDef, Schema};
use crate::dispatch::{Correlation, Session, SessionFactory, SideTables};
use crate::error::Error;
use crate::plan::{ColumnKind, FragmentId, QueryTree, TreeId};
use crate::value::{Key, Row, Value};

/// A stored entity.
#[derive(Debug, Clone)]
pub struct Record {
    /// Concrete entity name.
    pub entity: String,
    /// Identifier.
    pub id: Key,
    /// Scalar field values.
    pub fields: HashMap<String, Value>,
    /// Primitive collection elements, in insertion order.
    pub collections: HashMap<String, Vec<Value>>,
}

/// A registered custom query: declared columns and the rows it returns.
#[derive(Debug, Clone)]
struct CustomSource {
    columns: Vec<String>,
    rows: Vec<Row>,
}

type RecordKey = (String, Key);
type LinkKey = (String, Key, String);

#[derive(Debug, Default)]
struct StoreInner {
    schema: Schema,
    records: RwLock<HashMap<RecordKey, Record>>,
    links: RwLock<HashMap<LinkKey, Vec<(Option<Value>, Key)>>>,
    side_tables: RwLock<HashMap<String, Vec<(u64, Key)>>>,
    custom: RwLock<HashMap<String, CustomSource>>,
    sessions_opened: AtomicUsize,
}

/// Thread-safe in-memory store. Cloning shares the underlying data.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<StoreInner>,
}

impl MemoryStore {
    /// Create an empty store for `schema`.
    pub fn new(schema: Schema) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                schema,
                ..Default::default()
            }),
        }
    }

    /// The schema records are validated against.
    pub fn schema(&self) -> &Schema {
        &self.inner.schema
    }

    fn family(&self, entity: &str) -> Result<String, Error> {
        if self.inner.schema.get_entity(entity).is_none() {
            return Err(Error::UnknownEntity(entity.to_string()));
        }
        Ok(self.inner.schema.family_of(entity).to_string())
    }

    /// Insert or replace a record. The identity field is set from `id`.
    pub fn insert<'a>(
        &self,
        entity: &str,
        id: impl Into<Key>,
        fields: impl IntoIterator<Item = (&'a str, Value)>,
    ) -> Result<(), Error> {
        let family = self.family(entity)?;
        let id = id.into();
        let identity_field = self
            .inner
            .schema
            .get_entity(&family)
            .map(|e| e.identity_field.clone())
            .unwrap_or_default();

        let mut values: HashMap<String, Value> = fields
            .into_iter()
            .map(|(name, value)| (name.to_string(), value))
            .collect();
        values.insert(identity_field, Value::from(id.clone()));

        let record = Record {
            entity: entity.to_string(),
            id: id.clone(),
            fields: values,
            collections: HashMap::new(),
        };
        self.inner.records.write().insert((family, id), record);
        Ok(())
    }

    /// Append an element to a primitive collection of a record.
    pub fn push_element(
        &self,
        entity: &str,
        id: impl Into<Key>,
        field: &str,
        value: impl Into<Value>,
    ) -> Result<(), Error> {
        let family = self.family(entity)?;
        let id = id.into();
        let mut records = self.inner.records.write();
        let record = records.get_mut(&(family, id.clone())).ok_or_else(|| {
            Error::Session(format!("no {} record with identifier {}", entity, id))
        })?;
        record
            .collections
            .entry(field.to_string())
            .or_default()
            .push(value.into());
        Ok(())
    }

    /// Link a record to a target through `relation`. To-one relations keep
    /// only the latest target.
    pub fn link(
        &self,
        entity: &str,
        id: impl Into<Key>,
        relation: &str,
        target: impl Into<Key>,
    ) -> Result<(), Error> {
        self.link_slot(entity, id.into(), relation, None, target.into())
    }

    /// Link a record to a target at a list index or map key.
    pub fn link_at(
        &self,
        entity: &str,
        id: impl Into<Key>,
        relation: &str,
        slot: impl Into<Value>,
        target: impl Into<Key>,
    ) -> Result<(), Error> {
        self.link_slot(entity, id.into(), relation, Some(slot.into()), target.into())
    }

    fn link_slot(
        &self,
        entity: &str,
        id: Key,
        relation: &str,
        slot: Option<Value>,
        target: Key,
    ) -> Result<(), Error> {
        let family = self.family(entity)?;
        let to_many = self
            .relation_of(entity, relation)
            .map(|rel| rel.is_to_many())
            .ok_or_else(|| Error::UnknownPath {
                entity: entity.to_string(),
                path: relation.to_string(),
            })?;

        let mut links = self.inner.links.write();
        let targets = links.entry((family, id, relation.to_string())).or_default();
        if !to_many {
            targets.clear();
        }
        targets.push((slot, target));
        Ok(())
    }

    fn relation_of(&self, entity: &str, relation: &str) -> Option<&RelationDef> {
        let schema = &self.inner.schema;
        let mut current = Some(entity);
        while let Some(name) = current {
            if let Some(rel) = schema.relations.get(&format!("{name}.{relation}")) {
                return Some(rel);
            }
            current = schema.get_entity(name).and_then(|e| e.supertype.as_deref());
        }
        None
    }

    /// Register the rows a named custom query returns.
    pub fn register_custom<'a>(
        &self,
        name: &str,
        columns: impl IntoIterator<Item = &'a str>,
        rows: Vec<Row>,
    ) {
        let source = CustomSource {
            columns: columns.into_iter().map(str::to_string).collect(),
            rows,
        };
        self.inner.custom.write().insert(name.to_string(), source);
    }

    /// Create an empty shared side table.
    pub fn create_side_table(&self, name: &str) {
        self.inner
            .side_tables
            .write()
            .entry(name.to_string())
            .or_default();
    }

    /// Rows of a side table as (invocation id, identifier) pairs.
    pub fn side_table_rows(&self, name: &str) -> Vec<(u64, Key)> {
        self.inner
            .side_tables
            .read()
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of sessions opened so far.
    pub fn sessions_opened(&self) -> usize {
        self.inner.sessions_opened.load(Ordering::Relaxed)
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.inner.records.read().len()
    }

    /// Check if the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SideTables for MemoryStore {
    fn has_side_table(&self, name: &str) -> bool {
        self.inner.side_tables.read().contains_key(name)
    }
}

impl SessionFactory for MemoryStore {
    type Session = MemorySession;

    fn open_session(&self) -> Result<Self::Session, Error> {
        self.inner.sessions_opened.fetch_add(1, Ordering::Relaxed);
        Ok(MemorySession {
            store: self.clone(),
            produced: HashMap::new(),
        })
    }
}

/// A partially filled row: (position, value) cells.
type Cells = Vec<(usize, Value)>;

/// One session over a [`MemoryStore`].
///
/// Rows produced by each tree are kept for the life of the session, so a
/// child tree can be correlated with a sub-query over its parent's results.
#[derive(Debug)]
pub struct MemorySession {
    store: MemoryStore,
    produced: HashMap<TreeId, Vec<Row>>,
}

impl MemorySession {
    fn correlation_keys(&self, correlation: &Correlation) -> Option<HashSet<Key>> {
        match correlation {
            Correlation::None => None,
            Correlation::InList(keys) => Some(keys.iter().cloned().collect()),
            Correlation::JoinTable {
                table,
                invocation_id,
            } => Some(
                self.store
                    .side_table_rows(table)
                    .into_iter()
                    .filter(|(invocation, _)| invocation == invocation_id)
                    .map(|(_, key)| key)
                    .collect(),
            ),
            Correlation::Subquery { parent, position } => Some(
                self.produced
                    .get(parent)
                    .map(|rows| {
                        rows.iter()
                            .filter_map(|row| row.get(*position).and_then(Value::as_key))
                            .collect()
                    })
                    .unwrap_or_default(),
            ),
        }
    }

    fn execute_custom(
        &self,
        tree: &QueryTree,
        name: &str,
        keys: Option<&HashSet<Key>>,
    ) -> Result<Vec<Row>, Error> {
        let custom = self.store.inner.custom.read();
        let source = custom
            .get(name)
            .ok_or_else(|| Error::Session(format!("custom query '{}' is not registered", name)))?;

        let mut mapping = Vec::with_capacity(tree.fields().len());
        for field in tree.fields() {
            let index = source
                .columns
                .iter()
                .position(|c| *c == field.name)
                .ok_or_else(|| {
                    Error::Session(format!(
                        "custom query '{}' does not return column '{}'",
                        name, field.name
                    ))
                })?;
            mapping.push(index);
        }
        let identifier = tree.identifier_position(tree.root());

        let mut rows: Vec<Row> = source
            .rows
            .iter()
            .map(|row| {
                mapping
                    .iter()
                    .map(|&i| row.get(i).cloned().unwrap_or(Value::Null))
                    .collect::<Row>()
            })
            .filter(|row| match (keys, identifier) {
                (Some(keys), Some(position)) => row
                    .get(position)
                    .and_then(Value::as_key)
                    .is_some_and(|k| keys.contains(&k)),
                _ => true,
            })
            .collect();

        if let Some(position) = identifier {
            rows.sort_by(|a, b| a[position].sort_cmp(&b[position]));
        }
        Ok(rows)
    }

    fn execute_graph(&self, tree: &QueryTree, keys: Option<&HashSet<Key>>) -> Vec<Row> {
        let root = tree.fragment(tree.root());
        let schema = self.store.schema();
        let family = schema.family_of(root.entity.name()).to_string();
        let width = tree.fields().len();

        let records = self.store.inner.records.read();
        let links = self.store.inner.links.read();
        let walker = Walker {
            schema,
            tree,
            records: &records,
            links: &links,
        };

        let mut roots: Vec<&Record> = records
            .iter()
            .filter(|((f, id), record)| {
                *f == family
                    && schema.is_a(&record.entity, root.entity.name())
                    && keys.map_or(true, |k| k.contains(id))
            })
            .map(|(_, record)| record)
            .collect();
        roots.sort_by(|a, b| a.id.cmp(&b.id));

        let mut rows = Vec::new();
        for record in roots {
            for cells in walker.expand(tree.root(), record, None, tree.is_inner()) {
                let mut row = vec![Value::Null; width];
                for (position, value) in cells {
                    row[position] = value;
                }
                rows.push(row);
            }
        }
        rows
    }
}

impl Session for MemorySession {
    fn execute(&mut self, id: TreeId, tree: &QueryTree, correlation: &Correlation) -> Result<Vec<Row>, Error> {
        let keys = self.correlation_keys(correlation);
        let rows = match tree.custom_query() {
            Some(custom) => self.execute_custom(tree, &custom.name, keys.as_ref())?,
            None => self.execute_graph(tree, keys.as_ref()),
        };
        debug!(tree = %id, rows = rows.len(), "Memory session executed query tree");

        self.produced.entry(id).or_default().extend(rows.iter().cloned());
        Ok(rows)
    }

    fn populate_join_table(&mut self, table: &str, invocation_id: u64, ids: &[Key]) -> Result<(), Error> {
        let mut tables = self.store.inner.side_tables.write();
        let rows = tables
            .get_mut(table)
            .ok_or_else(|| Error::MissingJoinTable(table.to_string()))?;
        rows.extend(ids.iter().map(|id| (invocation_id, id.clone())));
        Ok(())
    }
}

/// Walks the fragments of one tree over locked store data.
struct Walker<'a> {
    schema: &'a Schema,
    tree: &'a QueryTree,
    records: &'a HashMap<RecordKey, Record>,
    links: &'a HashMap<LinkKey, Vec<(Option<Value>, Key)>>,
}

impl<'a> Walker<'a> {
    /// Partial rows for the subtree of `id` bound to `record`. An empty branch
    /// leaves its columns null, unless `inner` requires every branch to match.
    fn expand(&self, id: FragmentId, record: &Record, slot: Option<&Value>, inner: bool) -> Vec<Cells> {
        let mut own = Cells::new();
        for field in self.tree.fields_of(id) {
            let value = match field.kind {
                ColumnKind::Identifier => Value::from(record.id.clone()),
                ColumnKind::Discriminator => Value::from(record.entity.as_str()),
                ColumnKind::ListIndex | ColumnKind::MapKey => slot.cloned().unwrap_or(Value::Null),
                ColumnKind::Scalar => record.fields.get(&field.name).cloned().unwrap_or(Value::Null),
                ColumnKind::Element | ColumnKind::Correlation => continue,
            };
            own.push((field.position, value));
        }

        let mut rows = vec![own];
        for branch in self.branches(id, record) {
            if branch.is_empty() {
                if inner {
                    return Vec::new();
                }
                continue;
            }
            rows = rows
                .iter()
                .flat_map(|row| {
                    branch.iter().map(move |cells| {
                        let mut combined = row.clone();
                        combined.extend(cells.iter().cloned());
                        combined
                    })
                })
                .collect();
        }
        rows
    }

    /// Alternatives of every branch below `id`: one branch per primitive
    /// collection, then one per child fragment.
    fn branches(&self, id: FragmentId, record: &Record) -> Vec<Vec<Cells>> {
        let mut branches = Vec::new();

        for field in self.tree.fields_of(id) {
            if field.kind != ColumnKind::Element {
                continue;
            }
            let elements = record
                .collections
                .get(&field.name)
                .map(|values| values.iter().map(|v| vec![(field.position, v.clone())]).collect())
                .unwrap_or_default();
            branches.push(elements);
        }

        for edge in self.tree.children(id) {
            let child = self.tree.fragment(edge.to);
            let branch = match &edge.link {
                Link::Subtype => {
                    if self.schema.is_a(&record.entity, child.entity.name()) {
                        self.expand(edge.to, record, None, false)
                    } else {
                        Vec::new()
                    }
                }
                Link::Relation(relation) => {
                    let key = (
                        self.schema.family_of(&record.entity).to_string(),
                        record.id.clone(),
                        relation.name.clone(),
                    );
                    let family = self.schema.family_of(&relation.to_entity).to_string();
                    let mut targets: Vec<(Option<&Value>, &Record)> = self
                        .links
                        .get(&key)
                        .into_iter()
                        .flatten()
                        .filter_map(|(slot, target)| {
                            self.records
                                .get(&(family.clone(), target.clone()))
                                .filter(|r| self.schema.is_a(&r.entity, child.entity.name()))
                                .map(|r| (slot.as_ref(), r))
                        })
                        .collect();
                    targets.sort_by(|a, b| a.1.id.cmp(&b.1.id));
                    targets
                        .into_iter()
                        .flat_map(|(slot, target)| self.expand(edge.to, target, slot, false))
                        .collect()
                }
            };
            branches.push(branch);
        }
        branches
    }
}
