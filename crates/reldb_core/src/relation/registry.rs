//! Relation registry.

use super::info::RelationInfo;
use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::keys::{last_relation_id_key, relation_name_key};
use crate::manipulator::RelationDbManipulator;
use crate::object::{KvObjectLayer, ObjectLayer};
use crate::schema::RelationDescriptor;
use crate::types::RelationId;
use parking_lot::RwLock;
use reldb_codec::{decode_vuint, encode_vuint};
use reldb_kv::KvTransaction;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Maps relation names to opened relations.
///
/// A registry is shared by every transaction of one database. Relation ids
/// are persisted the first time a name is registered and reused on later
/// opens, so a fresh registry over the same store resolves the same ids.
pub struct RelationRegistry {
    config: Config,
    objects: Arc<dyn ObjectLayer>,
    relations: RwLock<HashMap<String, Arc<RelationInfo>>>,
}

impl RelationRegistry {
    /// Creates a registry storing owned content through [`KvObjectLayer`].
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self::with_object_layer(config, Arc::new(KvObjectLayer::new()))
    }

    /// Creates a registry with a custom object layer.
    #[must_use]
    pub fn with_object_layer(config: Config, objects: Arc<dyn ObjectLayer>) -> Self {
        Self {
            config,
            objects,
            relations: RwLock::new(HashMap::new()),
        }
    }

    /// The configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The object layer.
    #[must_use]
    pub fn objects(&self) -> &Arc<dyn ObjectLayer> {
        &self.objects
    }

    /// Registers a relation, opening it on first use.
    ///
    /// Registering the same descriptor again returns the cached relation.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DuplicateRelation`] if the name is already
    /// registered with a different descriptor, and any error of
    /// [`RelationInfo::open`].
    pub fn register(
        &self,
        tx: &dyn KvTransaction,
        descriptor: RelationDescriptor,
    ) -> CoreResult<Arc<RelationInfo>> {
        if tx.is_disposed() {
            return Err(CoreError::TransactionClosed);
        }
        if let Some(existing) = self.relations.read().get(descriptor.name()) {
            if *existing.descriptor() == descriptor {
                return Ok(Arc::clone(existing));
            }
            return Err(CoreError::DuplicateRelation {
                relation: descriptor.name().to_string(),
            });
        }

        let mut relations = self.relations.write();
        if relations.contains_key(descriptor.name()) {
            return Err(CoreError::DuplicateRelation {
                relation: descriptor.name().to_string(),
            });
        }
        let id = resolve_relation_id(tx, descriptor.name())?;
        debug!(relation = %descriptor.name(), id = %id, "opening relation");
        let relation = Arc::new(RelationInfo::open(tx, id, descriptor, &self.config)?);
        relations.insert(relation.name().to_string(), Arc::clone(&relation));
        Ok(relation)
    }

    /// Returns a registered relation.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<RelationInfo>> {
        self.relations.read().get(name).map(Arc::clone)
    }

    /// Names of every registered relation, sorted.
    #[must_use]
    pub fn relation_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.relations.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Creates a manipulator of `relation` bound to `tx`.
    #[must_use]
    pub fn manipulator(
        &self,
        tx: Arc<dyn KvTransaction>,
        relation: &Arc<RelationInfo>,
    ) -> RelationDbManipulator {
        RelationDbManipulator::new(
            tx,
            Arc::clone(relation),
            Arc::clone(&self.objects),
            self.config.clone(),
        )
    }
}

impl std::fmt::Debug for RelationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelationRegistry")
            .field("config", &self.config)
            .field("relations", &self.relation_names())
            .finish_non_exhaustive()
    }
}

fn resolve_relation_id(tx: &dyn KvTransaction, name: &str) -> CoreResult<RelationId> {
    let name_key = relation_name_key(name);
    if let Some(bytes) = tx.get(&name_key)? {
        return Ok(RelationId::new(decode_vuint(&bytes)?.0));
    }
    let last = match tx.get(&last_relation_id_key())? {
        Some(bytes) => decode_vuint(&bytes)?.0,
        None => 0,
    };
    let id = last + 1;
    let encoded = encode_vuint(id);
    tx.create_or_update(&last_relation_id_key(), &encoded)?;
    tx.create_or_update(&name_key, &encoded)?;
    Ok(RelationId::new(id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reldb_codec::FieldCodec;
    use reldb_kv::MemoryKv;

    fn descriptor(name: &str) -> RelationDescriptor {
        RelationDescriptor::new(name)
            .primary_key("id", FieldCodec::Unsigned)
            .value("name", FieldCodec::String)
    }

    #[test]
    fn ids_are_allocated_and_reused_across_registries() {
        let store = MemoryKv::new();
        let tx = store.begin();
        let registry = RelationRegistry::new(Config::default());
        let a = registry.register(tx.as_ref(), descriptor("a")).unwrap();
        let b = registry.register(tx.as_ref(), descriptor("b")).unwrap();
        assert_eq!(a.id(), RelationId::new(1));
        assert_eq!(b.id(), RelationId::new(2));
        tx.commit().unwrap();

        let tx = store.begin();
        let reopened = RelationRegistry::new(Config::default());
        let b = reopened.register(tx.as_ref(), descriptor("b")).unwrap();
        assert_eq!(b.id(), RelationId::new(2));
        assert_eq!(reopened.relation_names(), vec!["b".to_string()]);
    }

    #[test]
    fn same_descriptor_returns_cached_relation() {
        let store = MemoryKv::new();
        let tx = store.begin();
        let registry = RelationRegistry::new(Config::default());
        let first = registry.register(tx.as_ref(), descriptor("a")).unwrap();
        let second = registry.register(tx.as_ref(), descriptor("a")).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(registry.get("a").is_some());
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn different_descriptor_is_duplicate() {
        let store = MemoryKv::new();
        let tx = store.begin();
        let registry = RelationRegistry::new(Config::default());
        registry.register(tx.as_ref(), descriptor("a")).unwrap();
        let err = registry
            .register(
                tx.as_ref(),
                descriptor("a").value("age", FieldCodec::Unsigned),
            )
            .unwrap_err();
        assert!(matches!(err, CoreError::DuplicateRelation { .. }));
    }

    #[test]
    fn disposed_transaction_is_rejected() {
        let store = MemoryKv::new();
        let tx = store.begin();
        tx.dispose();
        let registry = RelationRegistry::new(Config::default());
        let err = registry.register(tx.as_ref(), descriptor("a")).unwrap_err();
        assert!(matches!(err, CoreError::TransactionClosed));
    }
}
