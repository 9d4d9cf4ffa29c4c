use crate::membership::{service::MembershipService, types::NodeId};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

pub const DEFAULT_PARTITIONS: u32 = 256;

/// Maps keys to partitions and partitions to owners (one primary, then backups).
pub struct PartitionManager {
    num_partitions: u32,
    backup_count: usize,
    membership: Arc<MembershipService>,
}

impl PartitionManager {
    pub fn new(membership: Arc<MembershipService>) -> Self {
        Self {
            num_partitions: DEFAULT_PARTITIONS,
            backup_count: 1,
            membership,
        }
    }

    pub fn num_partitions(&self) -> u32 {
        self.num_partitions
    }

    pub fn get_partition(&self, key: &str) -> u32 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as u32) % self.num_partitions
    }

    /// Owners of `partition`, primary first. Never lists the same node twice, so a
    /// single-member cluster has no backups.
    pub fn get_owners(&self, partition: u32) -> Vec<NodeId> {
        let mut node_ids: Vec<NodeId> = self
            .membership
            .get_alive_members()
            .into_iter()
            .map(|node| node.id)
            .collect();
        if node_ids.is_empty() {
            return vec![];
        }
        node_ids.sort_by(|a, b| a.0.cmp(&b.0));

        let replicas = (self.backup_count + 1).min(node_ids.len());
        (0..replicas)
            .map(|offset| node_ids[(partition as usize + offset) % node_ids.len()].clone())
            .collect()
    }

    /// True when this node is the primary of `partition`, or when no owner is known.
    pub fn is_local_primary(&self, partition: u32) -> bool {
        self.get_owners(partition)
            .first()
            .is_none_or(|primary| primary == &self.membership.local_node.id)
    }

    pub fn my_primary_partitions(&self) -> Vec<u32> {
        let my_id = &self.membership.local_node.id;
        (0..self.num_partitions)
            .filter(|&partition| self.get_owners(partition).first() == Some(my_id))
            .collect()
    }

    pub fn my_backup_partitions(&self) -> Vec<u32> {
        let my_id = &self.membership.local_node.id;
        (0..self.num_partitions)
            .filter(|&partition| self.get_owners(partition).iter().skip(1).any(|id| id == my_id))
            .collect()
    }
}
