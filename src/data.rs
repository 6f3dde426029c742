//! Data sources: where layer payloads come from.

use crate::error::{DiagramError, Result};
use crate::types::{Node, NodeKind, RawGraph, RawLink, RawNode};
use futures::future::{self, FutureExt, LocalBoxFuture};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::PathBuf;

/// What a layer asks its data source for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Query {
    /// The whole topology
    Root,
    /// Links and neighbours of one device, by name
    Device(String),
    /// Devices inside one subnet, by network address
    Subnet(String),
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Query::Root => write!(f, "root"),
            Query::Device(name) => write!(f, "device {name}"),
            Query::Subnet(subnet) => write!(f, "subnet {subnet}"),
        }
    }
}

/// Resolves queries to raw payloads.
///
/// The returned future is polled on the diagram's thread; a rejection propagates to whoever
/// pushed the layer.
pub trait DataSource {
    fn fetch(&self, query: &Query) -> LocalBoxFuture<'static, Result<RawGraph>>;
}

/// In-memory source serving a fixed root topology.
///
/// Device and subnet queries are answered from explicitly registered payloads first, then
/// derived from the root topology.
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    root: RawGraph,
    devices: HashMap<String, RawGraph>,
    subnets: HashMap<String, RawGraph>,
}

impl StaticSource {
    pub fn new(root: RawGraph) -> Self {
        Self {
            root,
            ..Self::default()
        }
    }

    pub fn with_device(mut self, name: impl Into<String>, graph: RawGraph) -> Self {
        self.devices.insert(name.into(), graph);
        self
    }

    pub fn with_subnet(mut self, subnet: impl Into<String>, graph: RawGraph) -> Self {
        self.subnets.insert(subnet.into(), graph);
        self
    }

    fn resolve(&self, query: &Query) -> Result<RawGraph> {
        match query {
            Query::Root => Ok(self.root.clone()),
            Query::Device(name) => self
                .devices
                .get(name)
                .cloned()
                .or_else(|| device_neighbourhood(&self.root, name))
                .ok_or_else(|| DiagramError::data_source(query, "unknown device")),
            Query::Subnet(subnet) => self
                .subnets
                .get(subnet)
                .cloned()
                .or_else(|| subnet_members(&self.root, subnet))
                .ok_or_else(|| DiagramError::data_source(query, "unknown subnet")),
        }
    }
}

impl DataSource for StaticSource {
    fn fetch(&self, query: &Query) -> LocalBoxFuture<'static, Result<RawGraph>> {
        future::ready(self.resolve(query)).boxed_local()
    }
}

/// Source reading JSON payloads from a directory.
///
/// Layout: `root.json`, `device/{name}.json`, `subnet/{subnet}.json`.
#[derive(Debug, Clone)]
pub struct JsonDirectorySource {
    dir: PathBuf,
}

impl JsonDirectorySource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, query: &Query) -> PathBuf {
        let file = |name: &str| format!("{}.json", name.replace(['/', '\\'], "_"));
        match query {
            Query::Root => self.dir.join("root.json"),
            Query::Device(name) => self.dir.join("device").join(file(name)),
            Query::Subnet(subnet) => self.dir.join("subnet").join(file(subnet)),
        }
    }
}

impl DataSource for JsonDirectorySource {
    fn fetch(&self, query: &Query) -> LocalBoxFuture<'static, Result<RawGraph>> {
        let path = self.path(query);
        let query = query.clone();
        async move {
            log::debug!("reading {} from {}", query, path.display());
            let text = tokio::fs::read_to_string(&path)
                .await
                .map_err(|err| DiagramError::data_source(&query, err))?;
            RawGraph::from_json(&text).map_err(|err| DiagramError::data_source(&query, err))
        }
        .boxed_local()
    }
}

/// Raw record of a live node, ungrouped.
pub fn to_raw(node: &Node) -> RawNode {
    let mut raw = RawNode {
        name: node.name.clone(),
        image: node.image.clone(),
        ip_address: node.info.ip_address.clone(),
        url: node.info.url.clone(),
        manufacturer: node.info.manufacturer.clone(),
        model: node.info.model.clone(),
        software_os: node.info.software_os.clone(),
        location: node.info.location.clone(),
        ..RawNode::default()
    };
    match &node.kind {
        NodeKind::Device => {}
        NodeKind::Subnet {
            subnet,
            mask,
            is_private,
        } => {
            raw.subnet = Some(subnet.clone());
            raw.mask = Some(mask.clone());
            raw.is_private = *is_private;
        }
        NodeKind::Unmanaged => raw.is_unmanaged = true,
    }
    raw
}

/// Payload of a device layer: the device first, then every record the response names, then a
/// bare record for each link endpoint the response left out. Names are deduplicated and group
/// memberships dropped.
pub fn device_payload(device: RawNode, graph: RawGraph) -> RawGraph {
    let mut seen = HashSet::new();
    let mut devices = Vec::new();
    let mut subnets = Vec::new();

    for raw in std::iter::once(device).chain(graph.devices) {
        if seen.insert(raw.name.clone()) {
            devices.push(RawNode { group: None, ..raw });
        }
    }
    for raw in graph.subnets {
        if seen.insert(raw.name.clone()) {
            subnets.push(RawNode { group: None, ..raw });
        }
    }
    for link in &graph.links {
        for endpoint in [&link.source, &link.target] {
            if seen.insert(endpoint.clone()) {
                devices.push(RawNode::named(endpoint.clone()));
            }
        }
    }

    RawGraph {
        devices,
        groups: None,
        links: graph.links,
        subnets,
    }
}

/// Payload of a subnet layer.
///
/// Every record in the response becomes a member of a single group named after the subnet
/// (unless the response brings its own groups). Link endpoints outside the response become
/// external nodes.
pub fn subnet_payload(subnet: &str, graph: RawGraph) -> RawGraph {
    let own_groups = graph.groups.is_some();
    let groups = graph.groups.or_else(|| Some(vec![subnet.to_string()]));
    let assign = |raw: RawNode| {
        if own_groups {
            raw
        } else {
            RawNode {
                group: Some(0),
                ..raw
            }
        }
    };

    let mut seen = HashSet::new();
    let mut devices = Vec::new();
    let mut subnets = Vec::new();
    for raw in graph.devices {
        if seen.insert(raw.name.clone()) {
            devices.push(assign(raw));
        }
    }
    for raw in graph.subnets {
        if seen.insert(raw.name.clone()) {
            subnets.push(assign(raw));
        }
    }

    let mut externals = Vec::new();
    for link in &graph.links {
        for endpoint in [&link.source, &link.target] {
            if seen.insert(endpoint.clone()) {
                externals.push(RawNode {
                    external: true,
                    ..RawNode::named(endpoint.clone())
                });
            }
        }
    }
    devices.extend(externals);

    RawGraph {
        devices,
        groups,
        links: graph.links,
        subnets,
    }
}

fn find_record<'a>(graph: &'a RawGraph, name: &str) -> Option<&'a RawNode> {
    graph
        .devices
        .iter()
        .chain(&graph.subnets)
        .find(|raw| raw.name == name)
}

/// Links of `name` in the root topology together with the records of its neighbours.
fn device_neighbourhood(root: &RawGraph, name: &str) -> Option<RawGraph> {
    find_record(root, name)?;
    let links: Vec<RawLink> = root
        .links
        .iter()
        .filter(|link| link.source == name || link.target == name)
        .cloned()
        .collect();

    let mut devices = Vec::new();
    let mut subnets = Vec::new();
    for link in &links {
        let other = if link.source == name {
            &link.target
        } else {
            &link.source
        };
        if root.subnets.iter().any(|raw| &raw.name == other) {
            subnets.extend(find_record(root, other).cloned());
        } else {
            devices.extend(find_record(root, other).cloned());
        }
    }

    Some(RawGraph {
        devices,
        groups: None,
        links,
        subnets,
    })
}

/// Devices attached to the subnet `subnet` and their links, without the subnet cloud itself.
fn subnet_members(root: &RawGraph, subnet: &str) -> Option<RawGraph> {
    let cloud = root
        .subnets
        .iter()
        .find(|raw| raw.subnet.as_deref() == Some(subnet) || raw.name == subnet)?;

    let members: HashSet<&str> = root
        .links
        .iter()
        .filter_map(|link| {
            if link.source == cloud.name {
                Some(link.target.as_str())
            } else if link.target == cloud.name {
                Some(link.source.as_str())
            } else {
                None
            }
        })
        .collect();

    let devices = root
        .devices
        .iter()
        .filter(|raw| members.contains(raw.name.as_str()))
        .map(|raw| RawNode {
            group: None,
            ..raw.clone()
        })
        .collect();
    let links = root
        .links
        .iter()
        .filter(|link| link.source != cloud.name && link.target != cloud.name)
        .filter(|link| {
            members.contains(link.source.as_str()) || members.contains(link.target.as_str())
        })
        .cloned()
        .collect();

    Some(RawGraph {
        devices,
        groups: None,
        links,
        subnets: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root() -> RawGraph {
        let cloud = RawNode {
            subnet: Some("10.0.0.0".to_string()),
            mask: Some("255.255.255.0".to_string()),
            is_private: true,
            ..RawNode::named("Cloud-10.0.0.0")
        };
        RawGraph {
            devices: vec![
                RawNode::named("core"),
                RawNode::named("edge"),
                RawNode::named("fw"),
            ],
            groups: None,
            links: vec![
                RawLink::new("core", "edge"),
                RawLink::new("core", "Cloud-10.0.0.0"),
                RawLink::new("fw", "Cloud-10.0.0.0"),
                RawLink::new("fw", "edge"),
            ],
            subnets: vec![cloud],
        }
    }

    #[tokio::test]
    async fn test_static_source_derives_device_neighbourhood() {
        let source = StaticSource::new(root());
        let graph = source.fetch(&Query::Device("core".into())).await.unwrap();
        assert_eq!(graph.links.len(), 2);
        assert_eq!(graph.devices.len(), 1);
        assert_eq!(graph.subnets.len(), 1);
    }

    #[tokio::test]
    async fn test_static_source_rejects_unknown_queries() {
        let source = StaticSource::new(root());
        let err = source.fetch(&Query::Device("nope".into())).await.unwrap_err();
        assert!(matches!(err, DiagramError::DataSource { .. }));
        assert!(source.fetch(&Query::Subnet("1.2.3.0".into())).await.is_err());
    }

    #[tokio::test]
    async fn test_registered_payload_wins() {
        let custom = RawGraph {
            devices: vec![RawNode::named("x")],
            ..RawGraph::default()
        };
        let source = StaticSource::new(root()).with_device("core", custom.clone());
        assert_eq!(source.fetch(&Query::Device("core".into())).await.unwrap(), custom);
    }

    #[test]
    fn test_subnet_payload_marks_externals() {
        let members = subnet_members(&root(), "10.0.0.0").unwrap();
        let names: Vec<&str> = members.devices.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["core", "fw"]);

        let payload = subnet_payload("10.0.0.0", members);
        assert_eq!(payload.groups, Some(vec!["10.0.0.0".to_string()]));
        let externals: Vec<&str> = payload
            .devices
            .iter()
            .filter(|d| d.external)
            .map(|d| d.name.as_str())
            .collect();
        assert_eq!(externals, vec!["edge"]);
        assert!(payload
            .devices
            .iter()
            .filter(|d| !d.external)
            .all(|d| d.group == Some(0)));
    }

    #[test]
    fn test_device_payload_puts_device_first_and_dedupes() {
        let graph = RawGraph {
            devices: vec![RawNode::named("core"), RawNode::named("edge")],
            links: vec![RawLink::new("core", "edge"), RawLink::new("core", "isp")],
            ..RawGraph::default()
        };
        let payload = device_payload(RawNode::named("core"), graph);
        let names: Vec<&str> = payload.devices.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["core", "edge", "isp"]);
    }

    #[tokio::test]
    async fn test_json_directory_source_reads_files() {
        let dir = std::env::temp_dir().join(format!("topology-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(dir.join("device")).unwrap();
        std::fs::write(dir.join("root.json"), root().to_json().unwrap()).unwrap();

        let source = JsonDirectorySource::new(&dir);
        assert_eq!(source.fetch(&Query::Root).await.unwrap(), root());
        assert!(source.fetch(&Query::Device("core".into())).await.is_err());

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
