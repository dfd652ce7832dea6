//! Per-relation schema registry and codec cache.

use super::codecs::{ContentFinder, KeyCodec, PkValueMerger, SkToPkMerger, ValueLoader, ValueSaver};
use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::keys::{relation_version_key, relation_versions_prefix, row_prefix, secondary_key_prefix};
use crate::schema::{FieldId, RelationDescriptor, RelationVersionInfo, Row, SecondaryKeyInfo, TableFieldInfo};
use crate::types::{RelationId, SchemaVersion};
use parking_lot::RwLock;
use reldb_codec::{decode_vuint, ContentRef, KeyReader, Value};
use reldb_kv::KvTransaction;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use tracing::{debug, info};

fn cached<K, V>(
    map: &RwLock<HashMap<K, Arc<V>>>,
    key: K,
    build: impl FnOnce() -> CoreResult<V>,
) -> CoreResult<Arc<V>>
where
    K: Eq + Hash,
{
    if let Some(found) = map.read().get(&key) {
        return Ok(Arc::clone(found));
    }
    let built = Arc::new(build()?);
    Ok(Arc::clone(map.write().entry(key).or_insert(built)))
}

/// Everything the relational layer knows about one relation.
///
/// `RelationInfo` owns every persisted schema version, decides the current
/// one, and hands out codec plans: value loaders per stored version,
/// secondary key mergers per `(version, index)`, index-to-row mergers and
/// content finders. Plans are built on first use and cached.
#[derive(Debug)]
pub struct RelationInfo {
    id: RelationId,
    descriptor: RelationDescriptor,
    current: Arc<RelationVersionInfo>,
    versions: HashMap<u64, Arc<RelationVersionInfo>>,
    row_prefix: Vec<u8>,
    key_codec: KeyCodec,
    value_saver: ValueSaver,
    loaders: RwLock<HashMap<u64, Arc<ValueLoader>>>,
    mergers: RwLock<HashMap<(u64, u8), Arc<PkValueMerger>>>,
    entry_mergers: RwLock<HashMap<u8, Arc<SkToPkMerger>>>,
    content_finders: RwLock<HashMap<u64, Option<Arc<ContentFinder>>>>,
}

impl RelationInfo {
    /// Opens a relation: loads its stored versions and settles the current one.
    ///
    /// When `descriptor` is byte-for-byte equivalent to the latest stored
    /// version, that version is reused. Otherwise the next version is
    /// persisted, and with [`Config::backfill_secondary_keys`] new secondary
    /// keys are filled from existing rows while removed ones are erased.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::PrimaryKeyChanged`] if the primary key differs
    /// from the latest stored version, [`CoreError::InvalidSchema`] if a
    /// value field changed to an incompatible codec, and any error of
    /// [`RelationDescriptor::to_version`].
    pub fn open(
        tx: &dyn KvTransaction,
        id: RelationId,
        descriptor: RelationDescriptor,
        config: &Config,
    ) -> CoreResult<Self> {
        let name = descriptor.name().to_string();
        let mut versions = load_versions(tx, id)?;
        let latest = versions
            .values()
            .max_by_key(|v| v.version())
            .map(Arc::clone);

        let reuse = match &latest {
            Some(latest) => {
                let candidate = descriptor.to_version(latest.version(), Some(latest))?;
                (candidate.save() == latest.save()).then_some(candidate)
            }
            None => None,
        };

        let (current, bumped) = match reuse {
            Some(current) => {
                debug!(relation = %name, version = %current.version(), "reusing schema version");
                (Arc::new(current), false)
            }
            None => {
                let version = latest
                    .as_ref()
                    .map_or(SchemaVersion::FIRST, |l| l.version().next());
                let current = descriptor.to_version(version, latest.as_deref())?;
                if let Some(latest) = &latest {
                    current.check_primary_key(latest, &name)?;
                }
                for stored in versions.values() {
                    ValueLoader::build(stored, &current)?;
                }
                tx.create_or_update(&relation_version_key(id, version), &current.save())?;
                info!(relation = %name, %version, "persisted new schema version");
                (Arc::new(current), true)
            }
        };
        versions.insert(current.version().as_u64(), Arc::clone(&current));

        let relation = Self {
            id,
            row_prefix: row_prefix(id),
            key_codec: KeyCodec::new(
                current.primary_fields().iter().map(|f| f.codec.clone()).collect(),
            ),
            value_saver: ValueSaver::new(&current),
            descriptor,
            current,
            versions,
            loaders: RwLock::default(),
            mergers: RwLock::default(),
            entry_mergers: RwLock::default(),
            content_finders: RwLock::default(),
        };

        if bumped && config.backfill_secondary_keys {
            if let Some(previous) = latest {
                relation.reconcile_secondary_keys(tx, &previous)?;
            }
        }
        Ok(relation)
    }

    fn reconcile_secondary_keys(
        &self,
        tx: &dyn KvTransaction,
        previous: &RelationVersionInfo,
    ) -> CoreResult<()> {
        for old in previous.secondary_keys() {
            if self.current.secondary_key_by_index(old.index).is_none() {
                let removed = tx.erase_range(&secondary_key_prefix(self.id, old.index))?;
                info!(
                    relation = %self.name(),
                    secondary_key = %old.name,
                    sk_index = old.index,
                    removed,
                    "dropped secondary key"
                );
            }
        }

        let added: Vec<&SecondaryKeyInfo> = self
            .current
            .secondary_keys()
            .iter()
            .filter(|sk| previous.secondary_key_by_index(sk.index).is_none())
            .collect();
        if added.is_empty() {
            return Ok(());
        }

        let mut entries = Vec::new();
        let mut rows = 0u64;
        let mut cursor = tx.create_cursor()?;
        let mut found = cursor.find_first_key(&self.row_prefix)?;
        while found {
            let key = cursor.key()?;
            let value = cursor.value()?;
            for sk in &added {
                entries.push(self.secondary_key_entry(sk, key, &value)?);
            }
            rows += 1;
            found = cursor.find_next_key(&self.row_prefix)?;
        }
        for entry in &entries {
            tx.create_or_update(entry, &[])?;
        }
        for sk in added {
            info!(
                relation = %self.name(),
                secondary_key = %sk.name,
                sk_index = sk.index,
                rows,
                "backfilled secondary key"
            );
        }
        Ok(())
    }

    /// Relation id.
    #[must_use]
    pub fn id(&self) -> RelationId {
        self.id
    }

    /// Relation name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.descriptor.name()
    }

    /// The descriptor the relation was opened with.
    #[must_use]
    pub fn descriptor(&self) -> &RelationDescriptor {
        &self.descriptor
    }

    /// The current schema version.
    #[must_use]
    pub fn current(&self) -> &RelationVersionInfo {
        &self.current
    }

    /// A stored schema version.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::MissingVersion`] if the version was never persisted.
    pub fn version(&self, version: u64) -> CoreResult<Arc<RelationVersionInfo>> {
        self.versions
            .get(&version)
            .map(Arc::clone)
            .ok_or_else(|| CoreError::MissingVersion {
                relation: self.name().to_string(),
                version,
            })
    }

    /// Every stored version number, ascending.
    #[must_use]
    pub fn version_numbers(&self) -> Vec<u64> {
        let mut numbers: Vec<u64> = self.versions.keys().copied().collect();
        numbers.sort_unstable();
        numbers
    }

    /// Prefix shared by every row key of the relation.
    #[must_use]
    pub fn row_prefix(&self) -> &[u8] {
        &self.row_prefix
    }

    /// Splits a row into primary key values and value field values of the
    /// current version. Missing value fields take their default.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::FieldMismatch`] for a missing key field, an
    /// unknown field, or a value the field's codec does not accept.
    pub fn split_row(&self, row: &Row) -> CoreResult<(Vec<Value>, Vec<Value>)> {
        for name in row.names() {
            if self.current.find_field(name).is_none() {
                return Err(CoreError::field_mismatch(format!(
                    "relation {} has no field {name}",
                    self.name()
                )));
            }
        }
        let coerce = |field: &TableFieldInfo, value: Value| {
            field.codec.coerce(value).map_err(|err| {
                CoreError::field_mismatch(format!("field {}: {err}", field.name))
            })
        };
        let key = self
            .current
            .primary_fields()
            .iter()
            .map(|f| coerce(f, row.require(&f.name)?.clone()))
            .collect::<CoreResult<Vec<_>>>()?;
        let values = self
            .current
            .value_fields()
            .iter()
            .map(|f| coerce(f, row.get(&f.name).cloned().unwrap_or_else(|| f.default_value())))
            .collect::<CoreResult<Vec<_>>>()?;
        Ok((key, values))
    }

    /// Encodes a row key, or a key prefix when fewer values than key
    /// fields are given.
    pub fn encode_key(&self, key: &[Value]) -> CoreResult<Vec<u8>> {
        let mut out = self.row_prefix.clone();
        self.key_codec.encode(key, &mut out)?;
        Ok(out)
    }

    /// Encodes value bytes with the current version.
    pub fn save_value(&self, values: &[Value]) -> CoreResult<Vec<u8>> {
        self.value_saver.save(values)
    }

    /// Decodes the primary key fields of a row key.
    pub fn decode_key(&self, key: &[u8]) -> CoreResult<Vec<Value>> {
        let mut reader = KeyReader::at(key, self.row_prefix.len());
        self.key_codec.decode(&mut reader)
    }

    /// Decodes value bytes of any stored version into the current layout.
    pub fn load_value(&self, value: &[u8]) -> CoreResult<Vec<Value>> {
        let (version, start) = decode_vuint(value)?;
        let loader = self.loader(version)?;
        loader.load(&mut KeyReader::at(value, start))
    }

    /// Builds a row from stored key and value bytes.
    pub fn materialize(&self, key: &[u8], value: &[u8]) -> CoreResult<Row> {
        let key_values = self.decode_key(key)?;
        let values = self.load_value(value)?;
        Ok(self
            .current
            .primary_fields()
            .iter()
            .zip(key_values)
            .chain(self.current.value_fields().iter().zip(values))
            .map(|(field, value)| (field.name.clone(), value))
            .collect())
    }

    fn loader(&self, version: u64) -> CoreResult<Arc<ValueLoader>> {
        cached(&self.loaders, version, || {
            let stored = self.version(version)?;
            ValueLoader::build(&stored, &self.current)
        })
    }

    /// Looks a secondary key of the current version up by name.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::FieldMismatch`] if there is no such key.
    pub fn require_secondary_key(&self, name: &str) -> CoreResult<&SecondaryKeyInfo> {
        self.current.secondary_key(name).ok_or_else(|| {
            CoreError::field_mismatch(format!(
                "relation {} has no secondary key {name}",
                self.name()
            ))
        })
    }

    /// Prefix of every entry of a secondary key.
    #[must_use]
    pub fn secondary_key_prefix(&self, sk: &SecondaryKeyInfo) -> Vec<u8> {
        secondary_key_prefix(self.id, sk.index)
    }

    /// Fields of an index entry in key order.
    #[must_use]
    pub fn secondary_key_fields(&self, sk: &SecondaryKeyInfo) -> Vec<TableFieldInfo> {
        self.current
            .secondary_key_layout(sk)
            .into_iter()
            .map(|id| self.current.field(id).clone())
            .collect()
    }

    /// Encodes a prefix of index entries from leading field values.
    pub fn encode_secondary_prefix(&self, sk: &SecondaryKeyInfo, values: &[Value]) -> CoreResult<Vec<u8>> {
        let fields = self.secondary_key_fields(sk);
        if values.len() > fields.len() {
            return Err(CoreError::field_mismatch(format!(
                "secondary key {} has {} fields, {} values given",
                sk.name,
                fields.len(),
                values.len()
            )));
        }
        let mut out = self.secondary_key_prefix(sk);
        KeyCodec::new(fields.into_iter().map(|f| f.codec).collect()).encode(values, &mut out)?;
        Ok(out)
    }

    /// Derives the index entry of a stored row.
    pub fn secondary_key_entry(&self, sk: &SecondaryKeyInfo, key: &[u8], value: &[u8]) -> CoreResult<Vec<u8>> {
        let (version, start) = decode_vuint(value)?;
        let merger = cached(&self.mergers, (version, sk.index), || {
            let stored = self.version(version)?;
            PkValueMerger::build(self.secondary_key_prefix(sk), &stored, &self.current, sk)
        })?;
        merger.merge(key, self.row_prefix.len(), value, start)
    }

    /// Rebuilds the row key an index entry points at.
    pub fn primary_key_from_entry(&self, sk: &SecondaryKeyInfo, entry: &[u8]) -> CoreResult<Vec<u8>> {
        let merger = cached(&self.entry_mergers, sk.index, || {
            Ok(SkToPkMerger::build(
                self.row_prefix.clone(),
                self.secondary_key_prefix(sk).len(),
                &self.current,
                sk,
            ))
        })?;
        merger.merge(entry)
    }

    /// Returns `true` if rows of some stored version can own content.
    #[must_use]
    pub fn has_content(&self) -> bool {
        self.versions.values().any(|v| v.has_content())
    }

    /// Collects the content owned by stored value bytes.
    pub fn find_content(&self, value: &[u8]) -> CoreResult<Vec<ContentRef>> {
        let (version, start) = decode_vuint(value)?;
        let cached_finder = self.content_finders.read().get(&version).cloned();
        let finder = match cached_finder {
            Some(finder) => finder,
            None => {
                let finder = ContentFinder::build(&*self.version(version)?).map(Arc::new);
                self.content_finders.write().insert(version, finder.clone());
                finder
            }
        };
        let mut found = Vec::new();
        if let Some(finder) = finder {
            finder.find(&mut KeyReader::at(value, start), &mut found)?;
        }
        Ok(found)
    }

    /// Identity fields of the primary key.
    #[must_use]
    pub fn identity_len(&self) -> usize {
        self.current.identity_len()
    }

    /// Resolves a field name against the current version.
    #[must_use]
    pub fn field_id(&self, name: &str) -> Option<FieldId> {
        self.current.find_field(name)
    }
}

fn load_versions(
    tx: &dyn KvTransaction,
    id: RelationId,
) -> CoreResult<HashMap<u64, Arc<RelationVersionInfo>>> {
    let prefix = relation_versions_prefix(id);
    let mut versions = HashMap::new();
    let mut cursor = tx.create_cursor()?;
    let mut found = cursor.find_first_key(&prefix)?;
    while found {
        let version = KeyReader::at(cursor.key()?, prefix.len()).read_vuint()?;
        let info = RelationVersionInfo::load(SchemaVersion::new(version), &cursor.value()?)?;
        versions.insert(version, Arc::new(info));
        found = cursor.find_next_key(&prefix)?;
    }
    Ok(versions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reldb_codec::FieldCodec;
    use reldb_kv::MemoryKv;

    fn users() -> RelationDescriptor {
        RelationDescriptor::new("users")
            .primary_key("tenant", FieldCodec::Unsigned)
            .primary_key("id", FieldCodec::Unsigned)
            .value("name", FieldCodec::String)
            .secondary_key("by_name", &["name"])
    }

    fn put(tx: &dyn KvTransaction, relation: &RelationInfo, row: Row) {
        let (key, values) = relation.split_row(&row).unwrap();
        let key = relation.encode_key(&key).unwrap();
        let value = relation.save_value(&values).unwrap();
        tx.create_or_update(&key, &value).unwrap();
        for sk in relation.current().secondary_keys() {
            let entry = relation.secondary_key_entry(sk, &key, &value).unwrap();
            tx.create_or_update(&entry, &[]).unwrap();
        }
    }

    #[test]
    fn reopening_reuses_version() {
        let store = MemoryKv::new();
        let tx = store.begin();
        let config = Config::default();
        let first = RelationInfo::open(tx.as_ref(), RelationId::new(1), users(), &config).unwrap();
        let again = RelationInfo::open(tx.as_ref(), RelationId::new(1), users(), &config).unwrap();
        assert_eq!(first.current().version(), SchemaVersion::FIRST);
        assert_eq!(again.current().version(), SchemaVersion::FIRST);
        assert_eq!(again.version_numbers(), vec![1]);
    }

    #[test]
    fn changed_layout_bumps_version_and_upgrades_rows() {
        let store = MemoryKv::new();
        let tx = store.begin();
        let config = Config::default();
        let v1 = RelationInfo::open(tx.as_ref(), RelationId::new(1), users(), &config).unwrap();
        put(
            tx.as_ref(),
            &v1,
            Row::new().with("tenant", 1u64).with("id", 1u64).with("name", "a"),
        );

        let v2 = RelationInfo::open(
            tx.as_ref(),
            RelationId::new(1),
            users().value_with_default("age", FieldCodec::Unsigned, 18u64),
            &config,
        )
        .unwrap();
        assert_eq!(v2.current().version(), SchemaVersion::new(2));

        let mut cursor = tx.create_cursor().unwrap();
        assert!(cursor.find_first_key(v2.row_prefix()).unwrap());
        let row = v2
            .materialize(cursor.key().unwrap(), &cursor.value().unwrap())
            .unwrap();
        assert_eq!(row.get("age"), Some(&Value::Unsigned(18)));
        assert_eq!(row.get("name"), Some(&Value::from("a")));
    }

    #[test]
    fn changed_primary_key_is_fatal() {
        let store = MemoryKv::new();
        let tx = store.begin();
        let config = Config::default();
        RelationInfo::open(tx.as_ref(), RelationId::new(1), users(), &config).unwrap();
        let changed = RelationDescriptor::new("users")
            .primary_key("tenant", FieldCodec::Unsigned)
            .value("name", FieldCodec::String);
        let err = RelationInfo::open(tx.as_ref(), RelationId::new(1), changed, &config).unwrap_err();
        assert!(matches!(err, CoreError::PrimaryKeyChanged { .. }));
    }

    #[test]
    fn added_secondary_key_is_backfilled_and_removed_one_erased() {
        let store = MemoryKv::new();
        let tx = store.begin();
        let config = Config::default();
        let v1 = RelationInfo::open(tx.as_ref(), RelationId::new(1), users(), &config).unwrap();
        for id in 1..=3u64 {
            put(
                tx.as_ref(),
                &v1,
                Row::new().with("tenant", 1u64).with("id", id).with("name", "n"),
            );
        }
        let by_name = v1.current().secondary_key("by_name").unwrap().clone();
        assert_eq!(tx.count_with_prefix(&v1.secondary_key_prefix(&by_name)).unwrap(), 3);

        let reindexed = RelationDescriptor::new("users")
            .primary_key("tenant", FieldCodec::Unsigned)
            .primary_key("id", FieldCodec::Unsigned)
            .value("name", FieldCodec::String)
            .secondary_key("by_id", &["id"]);
        let v2 = RelationInfo::open(tx.as_ref(), RelationId::new(1), reindexed, &config).unwrap();
        let by_id = v2.current().secondary_key("by_id").unwrap();
        assert_eq!(by_id.index, 1);
        assert_eq!(tx.count_with_prefix(&v1.secondary_key_prefix(&by_name)).unwrap(), 0);
        assert_eq!(tx.count_with_prefix(&v2.secondary_key_prefix(by_id)).unwrap(), 3);
    }

    #[test]
    fn unknown_version_is_reported() {
        let store = MemoryKv::new();
        let tx = store.begin();
        let relation =
            RelationInfo::open(tx.as_ref(), RelationId::new(1), users(), &Config::default()).unwrap();
        let err = relation.load_value(&[9, 0, 0]).unwrap_err();
        assert!(matches!(err, CoreError::MissingVersion { version: 9, .. }));
    }

    #[test]
    fn split_row_checks_fields() {
        let store = MemoryKv::new();
        let tx = store.begin();
        let relation =
            RelationInfo::open(tx.as_ref(), RelationId::new(1), users(), &Config::default()).unwrap();
        let (key, values) = relation
            .split_row(&Row::new().with("tenant", 1u64).with("id", 2i64))
            .unwrap();
        assert_eq!(key, vec![Value::Unsigned(1), Value::Unsigned(2)]);
        assert_eq!(values, vec![Value::from("")]);

        assert!(relation.split_row(&Row::new().with("tenant", 1u64)).is_err());
        assert!(relation
            .split_row(&Row::new().with("tenant", 1u64).with("id", 1u64).with("x", 1u64))
            .is_err());
        assert!(relation
            .split_row(&Row::new().with("tenant", 1u64).with("id", 1u64).with("name", 5u64))
            .is_err());
    }
}
