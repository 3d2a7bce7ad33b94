use id_arena::{Arena, Id};

/// Identifier of a node within a [`MetaStruct`].
pub type MetaStructId = Id<MetaStructValue>;

/// A node in a [`MetaStruct`].
#[derive(Clone, Debug, PartialEq)]
pub enum MetaStructValue {
    /// A null value.
    Null,

    /// A boolean value.
    Bool(bool),

    /// A signed integer value.
    Int(i64),

    /// An unsigned integer value.
    UInt(u64),

    /// A floating-point value.
    Float(f64),

    /// A string value.
    String(String),

    /// An array of child nodes.
    Array(Vec<MetaStructId>),

    /// A map of keys to child nodes, in insertion order.
    Map(Vec<(String, MetaStructId)>),
}

/// Structured span metadata.
///
/// `MetaStruct` holds an arbitrary tree of values, such as stack traces attached by security products. Nodes live in an
/// arena and refer to their children by identifier, which allows the same node to be referenced from several places,
/// including from one of its own descendants. Encoders must therefore track the nodes they have already visited when
/// walking the structure.
#[derive(Clone, Debug)]
pub struct MetaStruct {
    nodes: Arena<MetaStructValue>,
    root: MetaStructId,
}

impl MetaStruct {
    /// Creates a new `MetaStruct` whose root is an empty map.
    pub fn new() -> Self {
        let mut nodes = Arena::new();
        let root = nodes.alloc(MetaStructValue::Map(Vec::new()));
        Self { nodes, root }
    }

    /// Returns the identifier of the root node.
    pub fn root(&self) -> MetaStructId {
        self.root
    }

    /// Returns the node with the given identifier.
    ///
    /// Returns `None` if the identifier does not belong to this structure.
    pub fn get(&self, id: MetaStructId) -> Option<&MetaStructValue> {
        self.nodes.get(id)
    }

    /// Allocates a new, unattached node and returns its identifier.
    pub fn alloc(&mut self, value: MetaStructValue) -> MetaStructId {
        self.nodes.alloc(value)
    }

    /// Replaces the root node.
    pub fn set_root(&mut self, id: MetaStructId) {
        self.root = id;
    }

    /// Appends `child` to the array node `array`.
    ///
    /// Returns `false`, and does nothing, if `array` is not an array node.
    pub fn push(&mut self, array: MetaStructId, child: MetaStructId) -> bool {
        match self.nodes.get_mut(array) {
            Some(MetaStructValue::Array(children)) => {
                children.push(child);
                true
            }
            _ => false,
        }
    }

    /// Inserts `child` under `key` in the map node `map`, replacing any existing entry with the same key.
    ///
    /// Returns `false`, and does nothing, if `map` is not a map node.
    pub fn insert(&mut self, map: MetaStructId, key: impl Into<String>, child: MetaStructId) -> bool {
        let key = key.into();
        match self.nodes.get_mut(map) {
            Some(MetaStructValue::Map(entries)) => {
                match entries.iter_mut().find(|(existing, _)| *existing == key) {
                    Some(entry) => entry.1 = child,
                    None => entries.push((key, child)),
                }
                true
            }
            _ => false,
        }
    }

    /// Allocates `value` and inserts it under `key` in the root map, returning the new node's identifier.
    pub fn insert_root(&mut self, key: impl Into<String>, value: MetaStructValue) -> MetaStructId {
        let id = self.alloc(value);
        self.insert(self.root, key, id);
        id
    }

    /// Builds a `MetaStruct` from a JSON value.
    ///
    /// The JSON value becomes the root node. JSON values are always trees, so the resulting structure has no shared or
    /// cyclic references.
    pub fn from_json(value: &serde_json::Value) -> Self {
        let mut nodes = Arena::new();
        let root = alloc_json(&mut nodes, value);
        Self { nodes, root }
    }
}

impl Default for MetaStruct {
    fn default() -> Self {
        Self::new()
    }
}

fn alloc_json(nodes: &mut Arena<MetaStructValue>, value: &serde_json::Value) -> MetaStructId {
    use serde_json::Value;

    let node = match value {
        Value::Null => MetaStructValue::Null,
        Value::Bool(b) => MetaStructValue::Bool(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                MetaStructValue::Int(i)
            } else if let Some(u) = n.as_u64() {
                MetaStructValue::UInt(u)
            } else {
                MetaStructValue::Float(n.as_f64().unwrap_or_default())
            }
        }
        Value::String(s) => MetaStructValue::String(s.clone()),
        Value::Array(values) => {
            let children = values.iter().map(|value| alloc_json(nodes, value)).collect();
            MetaStructValue::Array(children)
        }
        Value::Object(map) => {
            let entries = map
                .iter()
                .map(|(key, value)| (key.clone(), alloc_json(nodes, value)))
                .collect();
            MetaStructValue::Map(entries)
        }
    };

    nodes.alloc(node)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn new_has_empty_map_root() {
        let meta_struct = MetaStruct::new();
        assert_eq!(
            meta_struct.get(meta_struct.root()),
            Some(&MetaStructValue::Map(Vec::new()))
        );
    }

    #[test]
    fn insert_replaces_existing_key() {
        let mut meta_struct = MetaStruct::new();
        meta_struct.insert_root("foo", MetaStructValue::Int(1));
        let second = meta_struct.insert_root("foo", MetaStructValue::Int(2));

        match meta_struct.get(meta_struct.root()) {
            Some(MetaStructValue::Map(entries)) => {
                assert_eq!(entries.len(), 1);
                assert_eq!(entries[0].1, second);
            }
            other => panic!("unexpected root: {:?}", other),
        }
    }

    #[test]
    fn push_and_insert_reject_wrong_node_kind() {
        let mut meta_struct = MetaStruct::new();
        let scalar = meta_struct.alloc(MetaStructValue::String("x".to_string()));
        let array = meta_struct.alloc(MetaStructValue::Array(Vec::new()));

        assert!(!meta_struct.push(scalar, array));
        assert!(!meta_struct.insert(array, "key", scalar));
        assert!(!meta_struct.push(meta_struct.root(), scalar));
        assert!(meta_struct.push(array, scalar));
    }

    #[test]
    fn cycles_are_expressible() {
        let mut meta_struct = MetaStruct::new();
        let array = meta_struct.insert_root("foo", MetaStructValue::Array(Vec::new()));
        assert!(meta_struct.push(array, array));

        assert_eq!(meta_struct.get(array), Some(&MetaStructValue::Array(vec![array])));
    }

    #[test]
    fn from_json_preserves_structure() {
        let meta_struct = MetaStruct::from_json(&json!({
            "a": [1, -2, 18446744073709551615u64, 1.5],
            "b": { "c": null, "d": true, "e": "f" },
        }));

        let Some(MetaStructValue::Map(root)) = meta_struct.get(meta_struct.root()) else {
            panic!("root should be a map");
        };
        let keys = root.iter().map(|(key, _)| key.as_str()).collect::<Vec<_>>();
        assert_eq!(keys, vec!["a", "b"]);

        let Some(MetaStructValue::Array(values)) = meta_struct.get(root[0].1) else {
            panic!("`a` should be an array");
        };
        let values = values
            .iter()
            .map(|id| meta_struct.get(*id).cloned())
            .collect::<Option<Vec<_>>>()
            .unwrap();
        assert_eq!(
            values,
            vec![
                MetaStructValue::Int(1),
                MetaStructValue::Int(-2),
                MetaStructValue::UInt(u64::MAX),
                MetaStructValue::Float(1.5),
            ]
        );
    }

    #[test]
    fn from_json_scalar_root() {
        let meta_struct = MetaStruct::from_json(&json!("scalar"));
        assert_eq!(
            meta_struct.get(meta_struct.root()),
            Some(&MetaStructValue::String("scalar".to_string()))
        );
    }
}
