use std::collections::HashMap;
use std::sync::Arc;

use crate::errors::{EngineError, Result};
use crate::instance::ScriptInstance;
use crate::types::{InstanceId, ObjectId};

/// Every live instance, indexed by id and by host object, plus the link sets
/// used to fan out `attach`
#[derive(Debug, Default)]
pub(crate) struct Registry {
    instances: HashMap<InstanceId, Arc<ScriptInstance>>,
    by_object: HashMap<ObjectId, Vec<InstanceId>>,
    /// Object to the root of its link set
    roots: HashMap<ObjectId, ObjectId>,
    /// Root to every member, root first
    link_sets: HashMap<ObjectId, Vec<ObjectId>>,
}

impl Registry {
    pub fn insert(&mut self, instance: Arc<ScriptInstance>) -> Result<()> {
        if self.instances.contains_key(&instance.id) {
            return Err(EngineError::DuplicateInstance(instance.id));
        }
        self.by_object
            .entry(instance.object_id)
            .or_default()
            .push(instance.id);
        self.instances.insert(instance.id, instance);
        Ok(())
    }

    /// Live instance by id. Instances that disposed themselves are dropped here.
    pub fn get(&mut self, id: InstanceId) -> Option<Arc<ScriptInstance>> {
        let instance = self.instances.get(&id)?;
        if instance.is_disposed() {
            self.remove(id);
            return None;
        }
        Some(Arc::clone(instance))
    }

    pub fn remove(&mut self, id: InstanceId) -> Option<Arc<ScriptInstance>> {
        let instance = self.instances.remove(&id)?;
        if let Some(ids) = self.by_object.get_mut(&instance.object_id) {
            ids.retain(|i| *i != id);
            if ids.is_empty() {
                self.by_object.remove(&instance.object_id);
            }
        }
        Some(instance)
    }

    pub fn for_object(&self, object: ObjectId) -> Vec<Arc<ScriptInstance>> {
        self.by_object
            .get(&object)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.instances.get(id))
                    .filter(|i| !i.is_disposed())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn all(&self) -> impl Iterator<Item = &Arc<ScriptInstance>> {
        self.instances.values()
    }

    pub fn prune_disposed(&mut self) -> usize {
        let dead: Vec<InstanceId> = self
            .instances
            .values()
            .filter(|i| i.is_disposed())
            .map(|i| i.id)
            .collect();
        for id in &dead {
            self.remove(*id);
        }
        dead.len()
    }

    /// Put `child` in the link set rooted at `root`
    pub fn link(&mut self, root: ObjectId, child: ObjectId) {
        let root = self.roots.get(&root).copied().unwrap_or(root);
        if self.roots.get(&child) == Some(&root) {
            return;
        }
        self.unlink(child);
        let members = self.link_sets.entry(root).or_insert_with(|| vec![root]);
        if child != root {
            members.push(child);
        }
        self.roots.insert(root, root);
        self.roots.insert(child, root);
    }

    /// Remove `object` from its link set. Unlinking a root dissolves the set.
    pub fn unlink(&mut self, object: ObjectId) {
        let Some(root) = self.roots.remove(&object) else {
            return;
        };
        if root == object {
            if let Some(members) = self.link_sets.remove(&root) {
                for member in members {
                    self.roots.remove(&member);
                }
            }
            return;
        }
        if let Some(members) = self.link_sets.get_mut(&root) {
            members.retain(|m| *m != object);
            if members.len() <= 1 {
                self.link_sets.remove(&root);
                self.roots.remove(&root);
            }
        }
    }

    /// Every object linked with `object`, including itself
    pub fn linked_set(&self, object: ObjectId) -> Vec<ObjectId> {
        self.roots
            .get(&object)
            .and_then(|root| self.link_sets.get(root))
            .cloned()
            .unwrap_or_else(|| vec![object])
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_link_sets() {
        let mut reg = Registry::default();
        let (root, a, b) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        assert_eq!(reg.linked_set(a), vec![a]);

        reg.link(root, a);
        reg.link(a, b);
        assert_eq!(reg.linked_set(b), vec![root, a, b]);
        assert_eq!(reg.linked_set(root), vec![root, a, b]);

        reg.unlink(a);
        assert_eq!(reg.linked_set(a), vec![a]);
        assert_eq!(reg.linked_set(b), vec![root, b]);

        reg.unlink(root);
        assert_eq!(reg.linked_set(b), vec![b]);
    }

    #[test]
    fn test_relink_moves_between_sets() {
        let mut reg = Registry::default();
        let (r1, r2, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        reg.link(r1, c);
        reg.link(r2, c);
        assert_eq!(reg.linked_set(r1), vec![r1]);
        assert_eq!(reg.linked_set(c), vec![r2, c]);
    }
}
