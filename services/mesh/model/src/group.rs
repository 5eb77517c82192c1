//! Groups and scenes.

use crate::address::MeshAddress;
use serde::{Deserialize, Serialize};

/// A named group or virtual address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    /// Human readable name
    pub name: String,
    /// Group or virtual address
    pub address: MeshAddress,
    /// Parent group, `Unassigned` for top-level groups
    pub parent: MeshAddress,
}

impl Group {
    /// A top-level group
    pub fn new(name: impl Into<String>, address: MeshAddress) -> Self {
        Self {
            name: name.into(),
            address,
            parent: MeshAddress::Unassigned,
        }
    }
}

/// A scene and the unicast addresses of the elements storing it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scene {
    /// Human readable name
    pub name: String,
    /// Scene number, never 0x0000
    pub number: u16,
    /// Element addresses that store the scene
    pub addresses: Vec<u16>,
}

impl Scene {
    /// A scene stored nowhere yet
    pub fn new(name: impl Into<String>, number: u16) -> Self {
        Self {
            name: name.into(),
            number,
            addresses: Vec::new(),
        }
    }
}
