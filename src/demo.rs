//! Built-in sample topology shown when no payload directory is given.
//!
//! A small campus network: a core with two distribution switches, a data center, a DMZ behind
//! the firewall and a static WAN link to a branch office.

use crate::types::{RawGraph, RawLink, RawNode};

const GIGABIT: f64 = 1_000_000_000.0;

fn device(name: &str, group: usize, ip: &str, model: &str) -> RawNode {
    RawNode {
        group: Some(group),
        ip_address: Some(ip.to_string()),
        manufacturer: Some("Cisco".to_string()),
        model: Some(model.to_string()),
        location: Some("HQ".to_string()),
        ..RawNode::named(name)
    }
}

fn subnet(network: &str, mask: &str, group: Option<usize>) -> RawNode {
    RawNode {
        group,
        subnet: Some(network.to_string()),
        mask: Some(mask.to_string()),
        is_private: !crate::types::is_public_subnet(network),
        ..RawNode::named(format!("Cloud-{network}"))
    }
}

fn link(source: &str, target: &str, bandwidth: f64) -> RawLink {
    RawLink {
        bandwidth,
        ..RawLink::new(source, target)
    }
}

/// The sample root payload.
pub fn sample_topology() -> RawGraph {
    let devices = vec![
        device("core-1", 0, "10.0.0.1", "Catalyst 9500"),
        device("core-2", 0, "10.0.0.2", "Catalyst 9500"),
        device("dist-a", 0, "10.0.1.1", "Catalyst 9300"),
        device("dist-b", 0, "10.0.2.1", "Catalyst 9300"),
        device("dc-leaf-1", 1, "10.10.0.11", "Nexus 93180"),
        device("dc-leaf-2", 1, "10.10.0.12", "Nexus 93180"),
        device("fw-edge", 2, "192.168.100.1", "ASA 5516"),
        device("dmz-web", 2, "192.168.100.10", "UCS C220"),
        RawNode {
            location: Some("Branch".to_string()),
            ..device("branch-rtr", 3, "10.50.0.1", "ISR 4331")
        },
        RawNode {
            is_unmanaged: true,
            ..RawNode::named("printer-3f")
        },
    ];

    let subnets = vec![
        subnet("10.0.1.0", "255.255.255.0", Some(0)),
        subnet("10.0.2.0", "255.255.255.0", Some(0)),
        subnet("10.10.0.0", "255.255.255.0", Some(1)),
        subnet("203.0.113.0", "255.255.255.248", None),
    ];

    let mut links = vec![
        link("core-1", "core-2", 40.0 * GIGABIT),
        link("core-1", "dist-a", 10.0 * GIGABIT),
        link("core-2", "dist-b", 10.0 * GIGABIT),
        link("core-1", "dc-leaf-1", 40.0 * GIGABIT),
        link("core-2", "dc-leaf-2", 40.0 * GIGABIT),
        link("dc-leaf-1", "dc-leaf-2", 100.0 * GIGABIT),
        link("core-1", "fw-edge", GIGABIT),
        link("fw-edge", "dmz-web", GIGABIT),
        link("dist-a", "Cloud-10.0.1.0", GIGABIT),
        link("dist-b", "Cloud-10.0.2.0", GIGABIT),
        link("dist-b", "printer-3f", 100_000_000.0),
        link("dc-leaf-1", "Cloud-10.10.0.0", 10.0 * GIGABIT),
        link("fw-edge", "Cloud-203.0.113.0", GIGABIT),
    ];
    links.push(RawLink {
        is_static_wan: true,
        int_description: Some("MPLS to branch".to_string()),
        ..link("core-2", "branch-rtr", 50_000_000.0)
    });
    links.push(RawLink {
        warning: true,
        int_description: Some("CRC errors".to_string()),
        ..link("dist-a", "dist-b", GIGABIT)
    });

    RawGraph {
        devices,
        groups: Some(vec![
            "Campus".to_string(),
            "Data Center".to_string(),
            "DMZ".to_string(),
            "Branch".to_string(),
        ]),
        links,
        subnets,
    }
}
