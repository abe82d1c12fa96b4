use crate::error::Error;
use crate::Result;
use std::collections::BTreeMap;

/// Roles a cluster node can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    NameNode,
    ResourceManager,
    SecondaryNameNode,
    DataNode,
    NodeManager,
}

impl NodeRole {
    pub fn display_name(&self) -> &'static str {
        match self {
            NodeRole::NameNode => "NameNode",
            NodeRole::ResourceManager => "ResourceManager",
            NodeRole::SecondaryNameNode => "SecondaryNameNode",
            NodeRole::DataNode => "DataNode",
            NodeRole::NodeManager => "NodeManager",
        }
    }
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Host index to role-set assignment. The singleton roles (NameNode,
/// ResourceManager, SecondaryNameNode) must each land on exactly one host,
/// and every host stores data.
#[derive(Debug, Clone, Default)]
pub struct RoleMap {
    assignments: BTreeMap<u8, Vec<NodeRole>>,
}

impl RoleMap {
    pub fn new() -> Self {
        RoleMap::default()
    }

    pub fn assign(&mut self, host_index: u8, roles: Vec<NodeRole>) {
        self.assignments.insert(host_index, roles);
    }

    pub fn roles_of(&self, host_index: u8) -> &[NodeRole] {
        self.assignments
            .get(&host_index)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Hosts carrying the given role, in index order.
    pub fn hosts_with(&self, role: NodeRole) -> Vec<u8> {
        self.assignments
            .iter()
            .filter(|(_, roles)| roles.contains(&role))
            .map(|(index, _)| *index)
            .collect()
    }

    pub fn namenode_host(&self) -> Option<u8> {
        self.hosts_with(NodeRole::NameNode).first().copied()
    }

    pub fn resourcemanager_host(&self) -> Option<u8> {
        self.hosts_with(NodeRole::ResourceManager).first().copied()
    }

    pub fn secondary_namenode_host(&self) -> Option<u8> {
        self.hosts_with(NodeRole::SecondaryNameNode).first().copied()
    }

    pub fn validate(&self) -> Result<()> {
        if self.assignments.is_empty() {
            return Err(Error::Role("role assignment must not be empty".into()));
        }

        if self.assignments.values().any(|roles| roles.is_empty()) {
            return Err(Error::Role("every host needs at least one role".into()));
        }

        for role in [
            NodeRole::NameNode,
            NodeRole::ResourceManager,
            NodeRole::SecondaryNameNode,
        ] {
            let holders = self.hosts_with(role);
            match holders.len() {
                0 => {
                    return Err(Error::Role(format!(
                        "exactly one host must carry {}, none does",
                        role
                    )))
                }
                1 => {}
                n => {
                    return Err(Error::Role(format!(
                        "exactly one host must carry {}, found {}",
                        role, n
                    )))
                }
            }
        }

        for (index, roles) in &self.assignments {
            if !roles.contains(&NodeRole::DataNode) {
                return Err(Error::Role(format!(
                    "host {} is missing the mandatory DataNode role",
                    index
                )));
            }
        }

        Ok(())
    }

    /// The classic 3-node layout: NameNode on the first host,
    /// ResourceManager on the second, SecondaryNameNode on the third,
    /// DataNode and NodeManager everywhere.
    pub fn default_three_node(indexes: [u8; 3]) -> Self {
        let mut map = RoleMap::new();
        map.assign(
            indexes[0],
            vec![NodeRole::NameNode, NodeRole::DataNode, NodeRole::NodeManager],
        );
        map.assign(
            indexes[1],
            vec![
                NodeRole::ResourceManager,
                NodeRole::DataNode,
                NodeRole::NodeManager,
            ],
        );
        map.assign(
            indexes[2],
            vec![
                NodeRole::SecondaryNameNode,
                NodeRole::DataNode,
                NodeRole::NodeManager,
            ],
        );
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_layout_validates() {
        let map = RoleMap::default_three_node([1, 2, 3]);
        assert!(map.validate().is_ok());
        assert_eq!(map.namenode_host(), Some(1));
        assert_eq!(map.resourcemanager_host(), Some(2));
        assert_eq!(map.secondary_namenode_host(), Some(3));
    }

    #[test]
    fn missing_singleton_role_is_rejected() {
        let mut map = RoleMap::new();
        map.assign(1, vec![NodeRole::DataNode]);
        map.assign(2, vec![NodeRole::ResourceManager, NodeRole::DataNode]);
        map.assign(3, vec![NodeRole::SecondaryNameNode, NodeRole::DataNode]);

        let err = map.validate().unwrap_err();
        assert!(err.to_string().contains("NameNode"));
    }

    #[test]
    fn duplicated_singleton_role_is_rejected() {
        let mut map = RoleMap::default_three_node([1, 2, 3]);
        map.assign(
            2,
            vec![NodeRole::NameNode, NodeRole::ResourceManager, NodeRole::DataNode],
        );

        assert!(map.validate().is_err());
    }

    #[test]
    fn every_host_must_store_data() {
        let mut map = RoleMap::default_three_node([1, 2, 3]);
        map.assign(3, vec![NodeRole::SecondaryNameNode]);

        let err = map.validate().unwrap_err();
        assert!(err.to_string().contains("DataNode"));
    }

    #[test]
    fn empty_map_is_rejected() {
        assert!(RoleMap::new().validate().is_err());
    }
}
