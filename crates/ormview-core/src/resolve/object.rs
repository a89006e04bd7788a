//! Business-object factory contract and the built-in graph objects.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::value::{Key, Value};

/// Creates and populates the objects a fetch materializes.
///
/// Objects are handles (cheap to clone) with interior mutability: the
/// reconstitution stage only holds shared references.
pub trait ObjectFactory: Send + Sync {
    /// Object handle type.
    type Object: Clone + Send + Sync;

    /// Create an object of the concrete type `type_name`.
    fn create(&self, type_name: &str, id: &Key) -> Self::Object;

    /// Set a scalar field.
    fn apply_field(&self, object: &Self::Object, field: &str, value: &Value);

    /// Append one element to a primitive collection.
    fn append_element(&self, object: &Self::Object, collection: &str, value: &Value);

    /// Attach `child` to `parent` through `relation`. `slot` carries the list
    /// index or map key for ordered and keyed relations.
    fn link(
        &self,
        parent: &Self::Object,
        relation: &str,
        child: &Self::Object,
        slot: Option<&Value>,
        to_many: bool,
    );
}

/// Shared handle to a [`Node`].
pub type NodeRef = Arc<Node>;

#[derive(Debug, Clone)]
struct LinkEntry {
    slot: Option<Value>,
    node: NodeRef,
}

/// A materialized entity: scalar fields, primitive collections and links.
#[derive(Debug)]
pub struct Node {
    id: Key,
    type_name: String,
    fields: RwLock<BTreeMap<String, Value>>,
    collections: RwLock<BTreeMap<String, Vec<Value>>>,
    links: RwLock<BTreeMap<String, Vec<LinkEntry>>>,
}

impl Node {
    /// Create an empty node.
    pub fn new(type_name: impl Into<String>, id: Key) -> Self {
        Self {
            id,
            type_name: type_name.into(),
            fields: RwLock::new(BTreeMap::new()),
            collections: RwLock::new(BTreeMap::new()),
            links: RwLock::new(BTreeMap::new()),
        }
    }

    /// Identifier.
    pub fn id(&self) -> &Key {
        &self.id
    }

    /// Concrete type name.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Value of a scalar field, if it was applied.
    pub fn field(&self, name: &str) -> Option<Value> {
        self.fields.read().get(name).cloned()
    }

    /// Names of applied scalar fields.
    pub fn field_names(&self) -> Vec<String> {
        self.fields.read().keys().cloned().collect()
    }

    /// Elements of a primitive collection.
    pub fn collection(&self, name: &str) -> Vec<Value> {
        self.collections.read().get(name).cloned().unwrap_or_default()
    }

    /// Nodes linked through `relation`, ordered by slot when slots are present.
    pub fn linked(&self, relation: &str) -> Vec<NodeRef> {
        let links = self.links.read();
        let Some(entries) = links.get(relation) else {
            return Vec::new();
        };
        let mut entries = entries.clone();
        if entries.iter().any(|e| e.slot.is_some()) {
            entries.sort_by(|a, b| {
                let a = a.slot.as_ref().unwrap_or(&Value::Null);
                let b = b.slot.as_ref().unwrap_or(&Value::Null);
                a.sort_cmp(b)
            });
        }
        entries.into_iter().map(|e| e.node).collect()
    }

    /// The single node linked through a to-one `relation`.
    pub fn linked_one(&self, relation: &str) -> Option<NodeRef> {
        self.linked(relation).into_iter().next()
    }

    /// Key (or index) slots of nodes linked through `relation`, in link order.
    pub fn slots(&self, relation: &str) -> Vec<Option<Value>> {
        self.links
            .read()
            .get(relation)
            .map(|entries| entries.iter().map(|e| e.slot.clone()).collect())
            .unwrap_or_default()
    }

    /// Canonical JSON rendering of the graph reachable from this node.
    ///
    /// Nodes already rendered on the current path are emitted as a
    /// `{"$ref": "Type#id"}` stub, so cyclic graphs terminate.
    pub fn snapshot(&self) -> serde_json::Value {
        let mut on_path = HashSet::new();
        self.snapshot_inner(&mut on_path)
    }

    fn reference(&self) -> String {
        format!("{}#{}", self.type_name, self.id)
    }

    fn snapshot_inner(&self, on_path: &mut HashSet<String>) -> serde_json::Value {
        let reference = self.reference();
        if !on_path.insert(reference.clone()) {
            return serde_json::json!({ "$ref": reference });
        }

        let mut object = serde_json::Map::new();
        object.insert("$type".into(), serde_json::Value::String(self.type_name.clone()));
        object.insert("$id".into(), serde_json::Value::String(self.id.to_string()));
        for (name, value) in self.fields.read().iter() {
            object.insert(name.clone(), serde_json::to_value(value).unwrap_or_default());
        }
        for (name, values) in self.collections.read().iter() {
            object.insert(name.clone(), serde_json::to_value(values).unwrap_or_default());
        }
        let relations: Vec<String> = self.links.read().keys().cloned().collect();
        for relation in relations {
            let children: Vec<serde_json::Value> = self
                .linked(&relation)
                .iter()
                .map(|child| child.snapshot_inner(on_path))
                .collect();
            object.insert(relation, serde_json::Value::Array(children));
        }

        on_path.remove(&reference);
        serde_json::Value::Object(object)
    }
}

/// Factory producing [`NodeRef`] graphs.
#[derive(Debug, Clone, Copy, Default)]
pub struct GraphFactory;

impl ObjectFactory for GraphFactory {
    type Object = NodeRef;

    fn create(&self, type_name: &str, id: &Key) -> NodeRef {
        Arc::new(Node::new(type_name, id.clone()))
    }

    fn apply_field(&self, object: &NodeRef, field: &str, value: &Value) {
        object.fields.write().insert(field.to_string(), value.clone());
    }

    fn append_element(&self, object: &NodeRef, collection: &str, value: &Value) {
        object
            .collections
            .write()
            .entry(collection.to_string())
            .or_default()
            .push(value.clone());
    }

    fn link(&self, parent: &NodeRef, relation: &str, child: &NodeRef, slot: Option<&Value>, to_many: bool) {
        let mut links = parent.links.write();
        let entries = links.entry(relation.to_string()).or_default();
        if entries.iter().any(|e| Arc::ptr_eq(&e.node, child)) {
            return;
        }
        let entry = LinkEntry {
            slot: slot.cloned(),
            node: Arc::clone(child),
        };
        if to_many {
            entries.push(entry);
        } else {
            entries.clear();
            entries.push(entry);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fields_and_collections() {
        let factory = GraphFactory;
        let user = factory.create("User", &Key::Int(1));
        factory.apply_field(&user, "name", &Value::from("alice"));
        factory.append_element(&user, "tags", &Value::from("a"));
        factory.append_element(&user, "tags", &Value::from("b"));

        assert_eq!(user.field("name"), Some(Value::from("alice")));
        assert_eq!(user.collection("tags").len(), 2);
        assert_eq!(user.type_name(), "User");
    }

    #[test]
    fn test_link_dedup_and_slot_order() {
        let factory = GraphFactory;
        let user = factory.create("User", &Key::Int(1));
        let p1 = factory.create("Post", &Key::Int(10));
        let p2 = factory.create("Post", &Key::Int(11));

        factory.link(&user, "posts", &p2, Some(&Value::Int(1)), true);
        factory.link(&user, "posts", &p1, Some(&Value::Int(0)), true);
        factory.link(&user, "posts", &p1, Some(&Value::Int(0)), true);

        let posts = user.linked("posts");
        assert_eq!(posts.len(), 2);
        assert!(Arc::ptr_eq(&posts[0], &p1));
    }

    #[test]
    fn test_to_one_link_replaces() {
        let factory = GraphFactory;
        let post = factory.create("Post", &Key::Int(1));
        let a = factory.create("User", &Key::Int(1));
        let b = factory.create("User", &Key::Int(2));
        factory.link(&post, "author", &a, None, false);
        factory.link(&post, "author", &b, None, false);
        assert!(Arc::ptr_eq(&post.linked_one("author").unwrap(), &b));
    }

    #[test]
    fn test_snapshot_terminates_on_cycles() {
        let factory = GraphFactory;
        let user = factory.create("User", &Key::Int(1));
        let post = factory.create("Post", &Key::Int(2));
        factory.link(&user, "posts", &post, None, true);
        factory.link(&post, "author", &user, None, false);

        let snapshot = user.snapshot();
        assert_eq!(snapshot["posts"][0]["author"][0]["$ref"], "User#1");
    }
}
