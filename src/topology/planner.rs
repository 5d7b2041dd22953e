//! Phased reconciliation planning.
//!
//! [`TopologyDatabase::operations`] compares the merged actual topology
//! against the registered master groups and emits the minimal ordered set
//! of primitive operations. Phases are exclusive: as soon as one phase
//! produces work, later phases are not evaluated. Acting on mesh and
//! replication changes in the same tick would mean acting on a view that
//! the mesh changes already invalidated; the next tick re-plans from a
//! fresh database instead.
//!
//! Phase order: mesh (MEET/FORGET), replication (REPLICATE), slot
//! assignment (ADDSLOTS), then slot migration when enabled.

use std::collections::HashMap;

use crate::client::types::{ClusterNodeId, HashSlots};
use crate::topology::database::{Connection, TopologyDatabase};
use crate::topology::operations::Operation;
use crate::topology::spec::RedisInstance;

impl TopologyDatabase {
    /// The operations that advance the actual topology toward the desired
    /// one, in execution order.
    ///
    /// Planner output is deterministic: every iteration follows group
    /// registration order or sorted node-id order, never map order.
    pub fn operations(&self) -> Vec<Operation> {
        let operations = self.mesh_operations();
        if !operations.is_empty() {
            return operations;
        }

        let operations = self.replication_operations();
        if !operations.is_empty() {
            return operations;
        }

        let operations = self.assignment_operations();
        if !operations.is_empty() {
            return operations;
        }

        if self.migrations_enabled {
            return self.migration_operations();
        }

        Vec::new()
    }

    /// Phase 1: establish the mesh and drop extraneous nodes.
    ///
    /// The desired mesh is a directed clique over every master group plus a
    /// directed clique over the leader set (the first instance of each
    /// group), which gives inter-group connectivity with O(G) extra edges.
    fn mesh_operations(&self) -> Vec<Operation> {
        let mut operations = Vec::new();

        for group in &self.master_groups {
            let members: Vec<&RedisInstance> = group.iter().collect();
            self.missing_meets(&members, &mut operations);
        }

        let leaders: Vec<&RedisInstance> = self
            .master_groups
            .iter()
            .filter_map(|group| group.leader())
            .collect();
        self.missing_meets(&leaders, &mut operations);

        // Nodes reported by some instance but fed by none are not part of
        // the desired topology: every instance that still sees one must
        // forget it.
        for group in &self.master_groups {
            for target in group {
                let Some(self_id) = self.id_by_instance.get(target) else {
                    continue;
                };
                let Some(nodes) = self.nodes_by_id.get(self_id) else {
                    continue;
                };

                for node in nodes.iter() {
                    if node.id != *self_id && !self.nodes_by_id.contains_key(&node.id) {
                        operations.push(Operation::Forget {
                            target: target.clone(),
                            node_id: node.id.clone(),
                        });
                    }
                }
            }
        }

        operations
    }

    /// MEET ops for every edge of the clique over `members` that no report
    /// has confirmed yet.
    fn missing_meets(&self, members: &[&RedisInstance], operations: &mut Vec<Operation>) {
        for (i, target) in members.iter().enumerate() {
            for (j, other) in members.iter().enumerate() {
                if i == j {
                    continue;
                }

                let (Some(from), Some(to)) =
                    (self.id_by_instance.get(*target), self.id_by_instance.get(*other))
                else {
                    continue;
                };

                let connection = Connection {
                    from: from.clone(),
                    to: to.clone(),
                };

                if !self.connections.contains(&connection) {
                    operations.push(Operation::Meet {
                        target: (*target).clone(),
                        other: (*other).clone(),
                    });
                }
            }
        }
    }

    /// Phase 2: collapse each group onto a single master.
    ///
    /// When a group holds several masters, one is elected and the others
    /// are demoted. A replica that already follows a known master elects
    /// that master (re-replicating an established pair would drop its
    /// data); otherwise the first master in group order wins.
    fn replication_operations(&self) -> Vec<Operation> {
        let mut operations = Vec::new();

        for group in &self.master_groups {
            let members: Vec<(&RedisInstance, &ClusterNodeId)> = group
                .iter()
                .filter_map(|instance| {
                    self.id_by_instance.get(instance).map(|id| (instance, id))
                })
                .collect();

            let masters: Vec<&(&RedisInstance, &ClusterNodeId)> = members
                .iter()
                .filter(|(_, id)| self.is_master(id))
                .collect();

            // Zero masters: leave the group alone until it stabilizes.
            // One master: the desired state.
            if masters.len() < 2 {
                continue;
            }

            let elected = members
                .iter()
                .filter(|(_, id)| !self.is_master(id))
                .find_map(|(_, id)| {
                    let master_id = self.master_of(id)?;
                    let master = self.instance_by_id.get(master_id)?;
                    Some((master, master_id))
                })
                .or_else(|| masters.first().map(|(instance, id)| (*instance, *id)));

            let Some((elected_instance, elected_id)) = elected else {
                continue;
            };

            for (instance, id) in &members {
                if *id == elected_id {
                    continue;
                }

                if self.replica_of(id) == Some(elected_id) {
                    continue;
                }

                operations.push(Operation::Replicate {
                    target: (*instance).clone(),
                    master: elected_instance.clone(),
                    master_id: elected_id.clone(),
                });
            }
        }

        operations
    }

    /// Masters the engine can actually address: sorted master ids
    /// restricted to the ones fed from a registered instance.
    fn addressable_masters(&self) -> Vec<&ClusterNodeId> {
        self.masters
            .iter()
            .filter(|id| self.instance_by_id.contains_key(*id))
            .collect()
    }

    /// Reverse slot-ownership map over master self-reports.
    fn owner_by_slot(&self) -> HashMap<u16, &ClusterNodeId> {
        let mut owners = HashMap::new();

        for id in &self.masters {
            if let Some(slots) = self.slots_by_node.get(id) {
                for slot in slots.iter() {
                    owners.insert(slot, id);
                }
            }
        }

        owners
    }

    /// Phase 3: assign unowned managed slots.
    ///
    /// Managed slots are round-robined by position across the sorted
    /// master ids, which deterministically spreads ownership without ever
    /// touching a slot some master already owns.
    fn assignment_operations(&self) -> Vec<Operation> {
        let masters = self.addressable_masters();

        if masters.is_empty() {
            return Vec::new();
        }

        let owners = self.owner_by_slot();
        let mut additions: HashMap<&ClusterNodeId, HashSlots> = HashMap::new();

        for (index, slot) in self.managed_slots.iter().enumerate() {
            let expected = masters[index % masters.len()];

            match owners.get(&slot) {
                // Owned by someone else: migration territory (phase 4).
                Some(_) => {}
                None => additions.entry(expected).or_default().insert(slot),
            }
        }

        let mut operations = Vec::new();

        for id in &masters {
            let Some(slots) = additions.remove(id) else {
                continue;
            };
            let Some(target) = self.instance_by_id.get(*id) else {
                continue;
            };

            operations.push(Operation::AddSlots {
                target: target.clone(),
                slots,
            });
        }

        operations
    }

    /// Phase 4: move managed slots owned by the wrong master.
    ///
    /// Only reached when phases 1-3 are clean and migrations are enabled.
    fn migration_operations(&self) -> Vec<Operation> {
        let masters = self.addressable_masters();

        if masters.is_empty() {
            return Vec::new();
        }

        let owners = self.owner_by_slot();
        let mut operations = Vec::new();

        for (index, slot) in self.managed_slots.iter().enumerate() {
            let expected = masters[index % masters.len()];

            let Some(owner) = owners.get(&slot) else {
                continue;
            };

            if *owner == expected {
                continue;
            }

            let (Some(source), Some(destination)) = (
                self.instance_by_id.get(*owner),
                self.instance_by_id.get(expected),
            ) else {
                continue;
            };

            operations.push(Operation::MigrateSlot {
                source: source.clone(),
                source_id: (*owner).clone(),
                destination: destination.clone(),
                destination_id: expected.clone(),
                slot,
            });
        }

        operations
    }
}
