use super::{Debounce, Store};
use crate::constants::PERSIST_DEBOUNCE;
use crate::types::{Group, Node, Transform};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tokio::time::Instant;

const LAYOUT_PATH: &str = "layout";
const TRANSFORM_PATH: &str = "transform";

/// A pinned position remembered by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixedEntry {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fx: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fy: Option<f32>,
}

/// Fixed positions of one layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutRecord {
    pub nodes: Vec<FixedEntry>,
    pub groups: Vec<FixedEntry>,
}

impl LayoutRecord {
    /// Records every node and group with at least one pinned coordinate.
    pub fn capture(nodes: &[Node], groups: &[Group]) -> Self {
        let nodes = nodes
            .iter()
            .filter(|node| node.is_fixed())
            .map(|node| FixedEntry {
                name: node.name.clone(),
                fx: node.fx,
                fy: node.fy,
            })
            .collect();
        let groups = groups
            .iter()
            .filter(|group| group.is_pinned())
            .map(|group| FixedEntry {
                name: group.name.clone(),
                fx: group.fx,
                fy: group.fy,
            })
            .collect();
        Self { nodes, groups }
    }

    /// Copies stored pins onto live entities with the same name; returns how many matched.
    pub fn apply(&self, nodes: &mut [Node], groups: &mut [Group]) -> usize {
        let mut restored = 0;
        for entry in &self.nodes {
            for node in nodes.iter_mut().filter(|node| node.name == entry.name) {
                node.fx = entry.fx;
                node.fy = entry.fy;
                if let Some(pos) = node.fixed_pos() {
                    node.pos = pos;
                }
                restored += 1;
            }
        }
        for entry in &self.groups {
            for group in groups.iter_mut().filter(|group| group.name == entry.name) {
                group.fx = entry.fx;
                group.fy = entry.fy;
                restored += 1;
            }
        }
        restored
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.groups.is_empty()
    }
}

/// Debounced writer of layout and transform records.
///
/// A record is only written when its serialized form differs from the last value written or
/// read under the same key.
#[derive(Debug)]
pub struct LayoutStore {
    layouts: BTreeMap<String, Debounce<LayoutRecord>>,
    transform: Debounce<(String, Transform)>,
    written: HashMap<String, String>,
}

impl Default for LayoutStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LayoutStore {
    pub fn new() -> Self {
        Self {
            layouts: BTreeMap::new(),
            transform: Debounce::new(PERSIST_DEBOUNCE),
            written: HashMap::new(),
        }
    }

    /// Schedules the layout of `layer_id` for writing.
    pub fn save_layout(&mut self, layer_id: &str, record: LayoutRecord, now: Instant) {
        self.layouts
            .entry(layer_id.to_string())
            .or_insert_with(|| Debounce::new(PERSIST_DEBOUNCE))
            .schedule(record, now);
    }

    /// Schedules the viewport transform of `layer_id` for writing.
    pub fn save_transform(&mut self, layer_id: &str, transform: Transform, now: Instant) {
        self.transform.schedule((layer_id.to_string(), transform), now);
    }

    pub fn has_pending(&self) -> bool {
        self.transform.is_pending() || self.layouts.values().any(Debounce::is_pending)
    }

    pub fn has_pending_layout(&self, layer_id: &str) -> bool {
        self.layouts.get(layer_id).is_some_and(Debounce::is_pending)
    }

    /// Writes every record whose debounce delay has elapsed; returns the number of writes.
    pub fn flush_due(&mut self, store: &Store, now: Instant) -> usize {
        let mut due = Vec::new();
        for (layer_id, debounce) in &mut self.layouts {
            if let Some(record) = debounce.take_due(now) {
                due.push((layer_id.clone(), record));
            }
        }
        let transform = self.transform.take_due(now);
        self.write(store, due, transform)
    }

    /// Writes every pending record immediately.
    pub fn flush_all(&mut self, store: &Store) -> usize {
        let mut due = Vec::new();
        for (layer_id, debounce) in &mut self.layouts {
            if let Some(record) = debounce.flush() {
                due.push((layer_id.clone(), record));
            }
        }
        let transform = self.transform.flush();
        self.write(store, due, transform)
    }

    fn write(
        &mut self,
        store: &Store,
        layouts: Vec<(String, LayoutRecord)>,
        transform: Option<(String, Transform)>,
    ) -> usize {
        let mut writes = 0;
        for (layer_id, record) in layouts {
            let key = store.layer_key(&layer_id, LAYOUT_PATH);
            if self.write_json(store, key, &record) {
                writes += 1;
            }
        }
        if let Some((layer_id, transform)) = transform {
            let key = store.layer_key(&layer_id, TRANSFORM_PATH);
            if self.write_json(store, key, &transform) {
                writes += 1;
            }
        }
        writes
    }

    fn write_json<T: Serialize>(&mut self, store: &Store, key: String, value: &T) -> bool {
        let json = match serde_json::to_string(value) {
            Ok(json) => json,
            Err(err) => {
                log::error!("failed to serialize {key}: {err}");
                return false;
            }
        };
        if self.written.get(&key) == Some(&json) {
            return false;
        }
        if !store.set(&key, &json) {
            return false;
        }
        log::debug!("persisted {key}");
        self.written.insert(key, json);
        true
    }

    /// Reads the layout of `layer_id`, preferring an explicit override.
    pub fn load_layout(
        &mut self,
        store: &Store,
        overrides: Option<&BTreeMap<String, LayoutRecord>>,
        layer_id: &str,
    ) -> Option<LayoutRecord> {
        if let Some(record) = overrides.and_then(|layouts| layouts.get(layer_id)) {
            return Some(record.clone());
        }
        let key = store.layer_key(layer_id, LAYOUT_PATH);
        let raw = store.get(&key)?;
        match serde_json::from_str::<LayoutRecord>(&raw) {
            Ok(record) => {
                self.written.insert(key, raw);
                Some(record)
            }
            Err(err) => {
                log::error!("ignoring malformed layout {key}: {err}");
                None
            }
        }
    }

    /// Reads the stored transform of `layer_id`.
    pub fn load_transform(&self, store: &Store, layer_id: &str) -> Option<Transform> {
        store.get_json(&store.layer_key(layer_id, TRANSFORM_PATH))
    }

    /// Drops pending writes and removes every stored layout of the diagram plus the transform
    /// of `root_id`, including records written by earlier sessions.
    pub fn clear(&mut self, store: &Store, root_id: &str) {
        self.layouts.clear();
        self.transform.cancel();
        self.written.clear();
        for key in store.layer_keys(LAYOUT_PATH) {
            store.remove(&key);
        }
        store.remove(&store.layer_key(root_id, TRANSFORM_PATH));
        log::info!("cleared stored layout of diagram {}", store.diagram_id());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryStore;
    use crate::types::NodeKind;
    use eframe::egui::pos2;
    use std::time::Duration;

    fn store() -> (MemoryStore, Store) {
        let backend = MemoryStore::default();
        let store = Store::new("net", Some(Box::new(backend.clone())));
        (backend, store)
    }

    fn nodes() -> Vec<Node> {
        let mut a = Node::new("a", NodeKind::Device).at(pos2(10.0, 20.0));
        a.pin();
        let b = Node::new("b", NodeKind::Device).at(pos2(-5.0, 3.0));
        vec![a, b]
    }

    #[test]
    fn test_capture_skips_free_entities() {
        let mut groups = vec![Group::new(0, "core"), Group::new(1, "edge")];
        groups[1].fx = Some(1.0);
        groups[1].fy = Some(2.0);
        let record = LayoutRecord::capture(&nodes(), &groups);
        assert_eq!(record.nodes.len(), 1);
        assert_eq!(record.nodes[0].name, "a");
        assert_eq!(record.groups.len(), 1);
        assert_eq!(record.groups[0].name, "edge");
    }

    #[test]
    fn test_save_then_restore_reproduces_pins() {
        let (_, store) = store();
        let mut layouts = LayoutStore::new();
        let now = Instant::now();

        let saved = nodes();
        layouts.save_layout("main", LayoutRecord::capture(&saved, &[]), now);
        assert_eq!(layouts.flush_due(&store, now), 0);
        assert_eq!(layouts.flush_due(&store, now + Duration::from_millis(1000)), 1);

        let mut fresh: Vec<Node> = saved
            .iter()
            .map(|node| Node::new(node.name.clone(), NodeKind::Device))
            .collect();
        let record = layouts.load_layout(&store, None, "main").unwrap();
        assert_eq!(record.apply(&mut fresh, &mut []), 1);

        for (live, original) in fresh.iter().zip(&saved) {
            assert_eq!(live.fx, original.fx);
            assert_eq!(live.fy, original.fy);
        }
    }

    #[test]
    fn test_clear_removes_layouts_of_earlier_sessions() {
        let (backend, store) = store();
        let mut earlier = LayoutStore::new();
        let now = Instant::now();
        earlier.save_layout("Cloud-10.0.0.0", LayoutRecord::capture(&nodes(), &[]), now);
        earlier.save_layout("main", LayoutRecord::capture(&nodes(), &[]), now);
        earlier.save_transform("main", Transform::new(1.0, 2.0, 0.5), now);
        assert_eq!(earlier.flush_all(&store), 3);
        store.set_flag("grouping", "false");

        let mut layouts = LayoutStore::new();
        layouts.clear(&store, "main");

        let keys: Vec<String> = backend.entries().into_keys().collect();
        assert_eq!(keys, vec!["net.grouping".to_string()]);
    }

    #[test]
    fn test_unchanged_record_is_not_rewritten() {
        let (_, store) = store();
        let mut layouts = LayoutStore::new();
        let now = Instant::now();
        let record = LayoutRecord::capture(&nodes(), &[]);

        layouts.save_layout("main", record.clone(), now);
        assert_eq!(layouts.flush_all(&store), 1);
        layouts.save_layout("main", record, now);
        assert_eq!(layouts.flush_all(&store), 0);
    }

    #[test]
    fn test_mismatched_names_are_skipped() {
        let record = LayoutRecord {
            nodes: vec![FixedEntry {
                name: "gone".into(),
                fx: Some(1.0),
                fy: Some(1.0),
            }],
            groups: vec![],
        };
        let mut live = nodes();
        assert_eq!(record.apply(&mut live, &mut []), 0);
        assert!(!live[1].is_fixed());
    }

    #[test]
    fn test_override_wins_over_stored_record() {
        let (_, store) = store();
        let mut layouts = LayoutStore::new();
        layouts.save_layout("main", LayoutRecord::capture(&nodes(), &[]), Instant::now());
        layouts.flush_all(&store);

        let overrides = BTreeMap::from([("main".to_string(), LayoutRecord::default())]);
        let record = layouts.load_layout(&store, Some(&overrides), "main").unwrap();
        assert!(record.is_empty());
    }

    #[test]
    fn test_clear_removes_layout_and_transform() {
        let (backend, store) = store();
        let mut layouts = LayoutStore::new();
        layouts.save_layout("main", LayoutRecord::capture(&nodes(), &[]), Instant::now());
        layouts.save_transform("main", Transform::new(1.0, 2.0, 3.0), Instant::now());
        layouts.flush_all(&store);
        assert_eq!(backend.len(), 2);
        assert_eq!(
            layouts.load_transform(&store, "main"),
            Some(Transform::new(1.0, 2.0, 3.0))
        );

        layouts.clear(&store, "main");
        assert!(backend.is_empty());
        assert!(!layouts.has_pending());
    }

    #[test]
    fn test_unavailable_store_is_silent() {
        let store = Store::unavailable("net");
        let mut layouts = LayoutStore::new();
        layouts.save_layout("main", LayoutRecord::capture(&nodes(), &[]), Instant::now());
        layouts.flush_all(&store);
        assert!(layouts.load_layout(&store, None, "main").is_none());
        assert!(layouts.load_transform(&store, "main").is_none());
    }
}
