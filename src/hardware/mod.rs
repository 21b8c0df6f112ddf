//! Simulated Hardware Hierarchy
//!
//! Arena of hardware units (datacenter → rack → machine → disk) addressed by
//! [`UnitId`] indices. The topology is built once per run and is read-only
//! afterwards; stripe placement lives in [`placement`].
//!
//! # Example
//!
//! ```
//! use durasim::hardware::{Topology, UnitKind};
//!
//! let topology = Topology::build(4, 2, 3);
//! assert_eq!(topology.racks().len(), 4);
//! assert_eq!(topology.disks().len(), 24);
//!
//! let disk = topology.disks()[5];
//! assert_eq!(topology.kind(disk), UnitKind::Disk);
//! assert_eq!(topology.name(disk), "rack0.machine1.disk2");
//! ```

pub mod placement;

use serde::{Deserialize, Serialize};

pub use placement::{Placement, PlacementStrategy, Slot};

// =============================================================================
// Unit Identity
// =============================================================================

/// Index of a unit in the topology arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UnitId(pub usize);

impl std::fmt::Display for UnitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Position of a unit in the hierarchy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    Datacenter,
    Rack,
    Machine,
    Disk,
}

impl std::fmt::Display for UnitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnitKind::Datacenter => write!(f, "datacenter"),
            UnitKind::Rack => write!(f, "rack"),
            UnitKind::Machine => write!(f, "machine"),
            UnitKind::Disk => write!(f, "disk"),
        }
    }
}

/// One node of the hierarchy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Unit {
    pub id: UnitId,
    pub kind: UnitKind,
    /// Local name, e.g. `machine3`
    pub name: String,
    pub parent: Option<UnitId>,
    pub children: Vec<UnitId>,
}

// =============================================================================
// Topology
// =============================================================================

/// Read-only hardware tree
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topology {
    units: Vec<Unit>,
    root: UnitId,
    racks: Vec<UnitId>,
    machines: Vec<UnitId>,
    disks: Vec<UnitId>,
}

impl Topology {
    /// Builds a single datacenter with a uniform rack/machine/disk fan-out
    pub fn build(rack_count: usize, machines_per_rack: usize, disks_per_machine: usize) -> Self {
        let mut topology = Topology {
            units: Vec::with_capacity(
                1 + rack_count * (1 + machines_per_rack * (1 + disks_per_machine)),
            ),
            root: UnitId(0),
            racks: Vec::with_capacity(rack_count),
            machines: Vec::with_capacity(rack_count * machines_per_rack),
            disks: Vec::with_capacity(rack_count * machines_per_rack * disks_per_machine),
        };

        let root = topology.push(UnitKind::Datacenter, "datacenter0".to_string(), None);
        topology.root = root;

        for r in 0..rack_count {
            let rack = topology.push(UnitKind::Rack, format!("rack{}", r), Some(root));
            topology.racks.push(rack);
            for m in 0..machines_per_rack {
                let machine =
                    topology.push(UnitKind::Machine, format!("machine{}", m), Some(rack));
                topology.machines.push(machine);
                for d in 0..disks_per_machine {
                    let disk = topology.push(UnitKind::Disk, format!("disk{}", d), Some(machine));
                    topology.disks.push(disk);
                }
            }
        }

        topology
    }

    fn push(&mut self, kind: UnitKind, name: String, parent: Option<UnitId>) -> UnitId {
        let id = UnitId(self.units.len());
        self.units.push(Unit {
            id,
            kind,
            name,
            parent,
            children: Vec::new(),
        });
        if let Some(p) = parent {
            self.units[p.0].children.push(id);
        }
        id
    }

    pub fn root(&self) -> UnitId {
        self.root
    }

    pub fn unit(&self, id: UnitId) -> &Unit {
        &self.units[id.0]
    }

    pub fn kind(&self, id: UnitId) -> UnitKind {
        self.units[id.0].kind
    }

    pub fn parent(&self, id: UnitId) -> Option<UnitId> {
        self.units[id.0].parent
    }

    pub fn children(&self, id: UnitId) -> &[UnitId] {
        &self.units[id.0].children
    }

    pub fn racks(&self) -> &[UnitId] {
        &self.racks
    }

    pub fn machines(&self) -> &[UnitId] {
        &self.machines
    }

    pub fn disks(&self) -> &[UnitId] {
        &self.disks
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Every disk at or below `id`, in arena order
    pub fn disks_under(&self, id: UnitId) -> Vec<UnitId> {
        let mut disks = Vec::new();
        let mut stack = vec![id];
        while let Some(u) = stack.pop() {
            let unit = &self.units[u.0];
            if unit.kind == UnitKind::Disk {
                disks.push(u);
            } else {
                stack.extend(unit.children.iter().rev().copied());
            }
        }
        disks
    }

    /// Nearest ancestor (or self) of the given kind
    pub fn ancestor(&self, id: UnitId, kind: UnitKind) -> Option<UnitId> {
        let mut current = Some(id);
        while let Some(u) = current {
            if self.units[u.0].kind == kind {
                return Some(u);
            }
            current = self.units[u.0].parent;
        }
        None
    }

    /// Dotted path below the datacenter, e.g. `rack2.machine0.disk5`
    pub fn name(&self, id: UnitId) -> String {
        let mut parts = Vec::new();
        let mut current = Some(id);
        while let Some(u) = current {
            let unit = &self.units[u.0];
            if unit.kind == UnitKind::Datacenter {
                break;
            }
            parts.push(unit.name.as_str());
            current = unit.parent;
        }
        if parts.is_empty() {
            return self.units[id.0].name.clone();
        }
        parts.reverse();
        parts.join(".")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_counts() {
        let t = Topology::build(3, 2, 4);
        assert_eq!(t.racks().len(), 3);
        assert_eq!(t.machines().len(), 6);
        assert_eq!(t.disks().len(), 24);
        assert_eq!(t.len(), 1 + 3 + 6 + 24);
        assert_eq!(t.kind(t.root()), UnitKind::Datacenter);
    }

    #[test]
    fn test_disks_under() {
        let t = Topology::build(2, 2, 2);
        let rack = t.racks()[1];
        let disks = t.disks_under(rack);
        assert_eq!(disks.len(), 4);
        assert_eq!(disks, t.disks()[4..8].to_vec());
        assert_eq!(t.disks_under(t.root()).len(), 8);
        let disk = t.disks()[0];
        assert_eq!(t.disks_under(disk), vec![disk]);
    }

    #[test]
    fn test_ancestor() {
        let t = Topology::build(2, 2, 2);
        let disk = t.disks()[7];
        assert_eq!(t.ancestor(disk, UnitKind::Rack), Some(t.racks()[1]));
        assert_eq!(t.ancestor(disk, UnitKind::Machine), Some(t.machines()[3]));
        assert_eq!(t.ancestor(t.racks()[0], UnitKind::Machine), None);
    }

    #[test]
    fn test_names() {
        let t = Topology::build(2, 2, 2);
        assert_eq!(t.name(t.disks()[3]), "rack0.machine1.disk1");
        assert_eq!(t.name(t.machines()[2]), "rack1.machine0");
        assert_eq!(t.name(t.root()), "datacenter0");
    }
}
