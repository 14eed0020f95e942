//! Cluster member identity and failure-domain topology.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a cluster member within a partitioned service.
pub type MemberId = u32;

/// The reserved member id marking an unowned storage index.
pub const UNOWNED: MemberId = 0;

/// Identity and failure-domain placement of one ownership-enabled member.
///
/// The machine / rack / site axes drive the backup-strength classification:
/// two members sharing a machine id cannot back each other up at machine
/// safety, and so on. Rack and site names are optional; absent names compare
/// equal to each other, so members with no declared rack are conservatively
/// treated as co-located.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemberInfo {
    /// Member id, unique within the service. Never [`UNOWNED`].
    pub id: MemberId,
    /// Identifier of the physical machine hosting this member.
    pub machine_id: u32,
    /// Human-readable machine name, if known.
    pub machine_name: Option<String>,
    /// Rack the machine is mounted in, if known.
    pub rack: Option<String>,
    /// Site (data center) the rack belongs to, if known.
    pub site: Option<String>,
}

impl MemberInfo {
    /// Construct a member on the given machine with no rack or site names.
    ///
    /// # Panics
    ///
    /// Panics if `id` is the reserved [`UNOWNED`] id.
    pub fn new(id: MemberId, machine_id: u32) -> Self {
        assert!(id != UNOWNED, "member id 0 is reserved for unowned");
        MemberInfo {
            id,
            machine_id,
            machine_name: None,
            rack: None,
            site: None,
        }
    }

    /// Set the machine name.
    pub fn with_machine_name(mut self, name: impl Into<String>) -> Self {
        self.machine_name = Some(name.into());
        self
    }

    /// Set the rack name.
    pub fn with_rack(mut self, rack: impl Into<String>) -> Self {
        self.rack = Some(rack.into());
        self
    }

    /// Set the site name.
    pub fn with_site(mut self, site: impl Into<String>) -> Self {
        self.site = Some(site.into());
        self
    }

    /// The machine name, falling back to the machine id.
    pub fn machine_label(&self) -> String {
        self.machine_name
            .clone()
            .unwrap_or_else(|| self.machine_id.to_string())
    }
}

impl fmt::Display for MemberInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Member({}, machine={}", self.id, self.machine_label())?;
        if let Some(rack) = &self.rack {
            write!(f, ", rack={rack}")?;
        }
        if let Some(site) = &self.site {
            write!(f, ", site={site}")?;
        }
        write!(f, ")")
    }
}
