//! Per-version codec plans.
//!
//! Plans are built once per schema version (and per secondary key) and
//! cached by [`RelationInfo`](super::RelationInfo). Executing a plan never
//! looks fields up by name.

use crate::error::{CoreError, CoreResult};
use crate::schema::{FieldId, RelationVersionInfo, SecondaryKeyInfo};
use reldb_codec::{write_vuint, ContentRef, FieldCodec, KeyReader, Value};

/// Returns `(offset, len)` of `count` consecutive fields starting at `start`.
fn field_spans(
    codecs: &[FieldCodec],
    bytes: &[u8],
    start: usize,
    count: usize,
) -> CoreResult<Vec<(usize, usize)>> {
    let mut reader = KeyReader::at(bytes, start);
    let mut spans = Vec::with_capacity(count);
    for codec in codecs.iter().take(count) {
        let begin = reader.position();
        codec.skip(&mut reader)?;
        spans.push((begin, reader.position() - begin));
    }
    Ok(spans)
}

/// Encoder and decoder of a sequence of key fields.
#[derive(Debug, Clone)]
pub(crate) struct KeyCodec {
    codecs: Vec<FieldCodec>,
}

impl KeyCodec {
    pub(crate) fn new(codecs: Vec<FieldCodec>) -> Self {
        Self { codecs }
    }

    /// Encodes the leading `values.len()` fields.
    pub(crate) fn encode(&self, values: &[Value], out: &mut Vec<u8>) -> CoreResult<()> {
        if values.len() > self.codecs.len() {
            return Err(CoreError::field_mismatch(format!(
                "{} key values given, key has {} fields",
                values.len(),
                self.codecs.len()
            )));
        }
        for (codec, value) in self.codecs.iter().zip(values) {
            let value = codec.coerce(value.clone())?;
            codec.encode(&value, out)?;
        }
        Ok(())
    }

    pub(crate) fn decode(&self, reader: &mut KeyReader<'_>) -> CoreResult<Vec<Value>> {
        self.codecs
            .iter()
            .map(|codec| codec.decode(reader).map_err(CoreError::from))
            .collect()
    }
}

/// Writes value bytes of the current version.
#[derive(Debug, Clone)]
pub(crate) struct ValueSaver {
    version: u64,
    codecs: Vec<FieldCodec>,
}

impl ValueSaver {
    pub(crate) fn new(info: &RelationVersionInfo) -> Self {
        Self {
            version: info.version().as_u64(),
            codecs: info.value_fields().iter().map(|f| f.codec.clone()).collect(),
        }
    }

    pub(crate) fn save(&self, values: &[Value]) -> CoreResult<Vec<u8>> {
        let mut out = Vec::new();
        write_vuint(&mut out, self.version);
        for (codec, value) in self.codecs.iter().zip(values) {
            codec.encode(value, &mut out)?;
        }
        Ok(out)
    }
}

#[derive(Debug, Clone)]
enum LoadStep {
    Decode(usize),
    Convert { target: usize, from: FieldCodec },
    Skip(FieldCodec),
}

/// Loads value bytes written by one version into the current layout.
///
/// Fields the stored version lacks take their default; fields the current
/// version dropped are skipped.
#[derive(Debug, Clone)]
pub(crate) struct ValueLoader {
    steps: Vec<LoadStep>,
    targets: Vec<FieldCodec>,
    defaults: Vec<Value>,
}

impl ValueLoader {
    pub(crate) fn build(stored: &RelationVersionInfo, current: &RelationVersionInfo) -> CoreResult<Self> {
        let mut steps = Vec::new();
        for old in stored.value_fields() {
            let target = current
                .value_fields()
                .iter()
                .position(|f| f.name == old.name);
            steps.push(match target {
                Some(i) if current.value_fields()[i].codec == old.codec => LoadStep::Decode(i),
                Some(i) if current.value_fields()[i].codec.can_convert_from(&old.codec) => {
                    LoadStep::Convert {
                        target: i,
                        from: old.codec.clone(),
                    }
                }
                Some(i) => {
                    return Err(CoreError::invalid_schema(format!(
                        "field {} cannot change from {} to {}",
                        old.name,
                        old.codec.name(),
                        current.value_fields()[i].codec.name()
                    )))
                }
                None => LoadStep::Skip(old.codec.clone()),
            });
        }
        while matches!(steps.last(), Some(LoadStep::Skip(_))) {
            steps.pop();
        }
        Ok(Self {
            steps,
            targets: current.value_fields().iter().map(|f| f.codec.clone()).collect(),
            defaults: current
                .value_fields()
                .iter()
                .map(|f| f.codec.coerce(f.default_value()))
                .collect::<Result<_, _>>()?,
        })
    }

    pub(crate) fn load(&self, reader: &mut KeyReader<'_>) -> CoreResult<Vec<Value>> {
        let mut values = self.defaults.clone();
        for step in &self.steps {
            match step {
                LoadStep::Decode(target) => {
                    values[*target] = self.targets[*target].decode(reader)?;
                }
                LoadStep::Convert { target, from } => {
                    let old = from.decode(reader)?;
                    values[*target] = self.targets[*target].convert(from, old)?;
                }
                LoadStep::Skip(codec) => codec.skip(reader)?,
            }
        }
        Ok(values)
    }
}

/// Collects the content identifiers owned by value bytes of one version.
#[derive(Debug, Clone)]
pub(crate) struct ContentFinder {
    steps: Vec<(FieldCodec, bool)>,
}

impl ContentFinder {
    /// Returns `None` when the version cannot own content.
    pub(crate) fn build(info: &RelationVersionInfo) -> Option<Self> {
        let last = info
            .value_fields()
            .iter()
            .rposition(|f| f.codec.contains_content())?;
        Some(Self {
            steps: info.value_fields()[..=last]
                .iter()
                .map(|f| (f.codec.clone(), f.codec.contains_content()))
                .collect(),
        })
    }

    pub(crate) fn find(&self, reader: &mut KeyReader<'_>, out: &mut Vec<ContentRef>) -> CoreResult<()> {
        for (codec, collect) in &self.steps {
            if *collect {
                codec.collect_content(reader, out)?;
            } else {
                codec.skip(reader)?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
enum MergeSource {
    Key(usize),
    Value(usize),
    Converted {
        field: usize,
        from: FieldCodec,
        to: FieldCodec,
    },
    Default(Vec<u8>),
}

/// Builds a secondary index entry from row key and value bytes.
///
/// The plan records which byte span of the key or the value each index
/// field comes from, so most entries are assembled by copying spans.
#[derive(Debug, Clone)]
pub(crate) struct PkValueMerger {
    prefix: Vec<u8>,
    key_codecs: Vec<FieldCodec>,
    value_codecs: Vec<FieldCodec>,
    key_needed: usize,
    value_needed: usize,
    sources: Vec<MergeSource>,
}

impl PkValueMerger {
    /// Plans the entry of `sk` (current version) for rows stored with `stored`.
    pub(crate) fn build(
        prefix: Vec<u8>,
        stored: &RelationVersionInfo,
        current: &RelationVersionInfo,
        sk: &SecondaryKeyInfo,
    ) -> CoreResult<Self> {
        let mut sources = Vec::new();
        for id in current.secondary_key_layout(sk) {
            sources.push(match id {
                FieldId::Primary(k) => MergeSource::Key(k),
                FieldId::Value(k) => {
                    let field = &current.value_fields()[k];
                    match stored.value_fields().iter().position(|f| f.name == field.name) {
                        Some(j) if stored.value_fields()[j].codec == field.codec => MergeSource::Value(j),
                        Some(j) => MergeSource::Converted {
                            field: j,
                            from: stored.value_fields()[j].codec.clone(),
                            to: field.codec.clone(),
                        },
                        None => {
                            let default = field.codec.coerce(field.default_value())?;
                            MergeSource::Default(field.codec.encode_to_vec(&default)?)
                        }
                    }
                }
            });
        }
        let key_needed = sources
            .iter()
            .filter_map(|s| match s {
                MergeSource::Key(k) => Some(k + 1),
                _ => None,
            })
            .max()
            .unwrap_or(0);
        let value_needed = sources
            .iter()
            .filter_map(|s| match s {
                MergeSource::Value(j) | MergeSource::Converted { field: j, .. } => Some(j + 1),
                _ => None,
            })
            .max()
            .unwrap_or(0);
        Ok(Self {
            prefix,
            key_codecs: current.primary_fields().iter().map(|f| f.codec.clone()).collect(),
            value_codecs: stored.value_fields().iter().map(|f| f.codec.clone()).collect(),
            key_needed,
            value_needed,
            sources,
        })
    }

    /// Assembles the index entry.
    ///
    /// `key_start` is the offset of the first key field in `key`, and
    /// `value_start` the offset of the first value field in `value`.
    pub(crate) fn merge(
        &self,
        key: &[u8],
        key_start: usize,
        value: &[u8],
        value_start: usize,
    ) -> CoreResult<Vec<u8>> {
        let key_spans = field_spans(&self.key_codecs, key, key_start, self.key_needed)?;
        let value_spans = field_spans(&self.value_codecs, value, value_start, self.value_needed)?;
        let mut out = Vec::with_capacity(self.prefix.len() + key.len());
        out.extend_from_slice(&self.prefix);
        for source in &self.sources {
            match source {
                MergeSource::Key(k) => {
                    let (offset, len) = key_spans[*k];
                    out.extend_from_slice(&key[offset..offset + len]);
                }
                MergeSource::Value(j) => {
                    let (offset, len) = value_spans[*j];
                    out.extend_from_slice(&value[offset..offset + len]);
                }
                MergeSource::Converted { field, from, to } => {
                    let (offset, _) = value_spans[*field];
                    let old = from.decode(&mut KeyReader::at(value, offset))?;
                    to.encode(&to.convert(from, old)?, &mut out)?;
                }
                MergeSource::Default(bytes) => out.extend_from_slice(bytes),
            }
        }
        Ok(out)
    }
}

/// Rebuilds a row key from a secondary index entry.
#[derive(Debug, Clone)]
pub(crate) struct SkToPkMerger {
    row_prefix: Vec<u8>,
    entry_start: usize,
    layout_codecs: Vec<FieldCodec>,
    key_positions: Vec<usize>,
}

impl SkToPkMerger {
    pub(crate) fn build(
        row_prefix: Vec<u8>,
        entry_start: usize,
        current: &RelationVersionInfo,
        sk: &SecondaryKeyInfo,
    ) -> Self {
        let layout = current.secondary_key_layout(sk);
        let key_positions = (0..current.primary_fields().len())
            .map(|k| {
                layout
                    .iter()
                    .position(|id| *id == FieldId::Primary(k))
                    .unwrap_or(layout.len())
            })
            .collect();
        Self {
            row_prefix,
            entry_start,
            layout_codecs: layout.iter().map(|id| current.field(*id).codec.clone()).collect(),
            key_positions,
        }
    }

    pub(crate) fn merge(&self, entry: &[u8]) -> CoreResult<Vec<u8>> {
        let spans = field_spans(
            &self.layout_codecs,
            entry,
            self.entry_start,
            self.layout_codecs.len(),
        )?;
        let mut out = self.row_prefix.clone();
        for pos in &self.key_positions {
            let (offset, len) = *spans
                .get(*pos)
                .ok_or_else(|| CoreError::invalid_schema("secondary key lacks a primary key field"))?;
            out.extend_from_slice(&entry[offset..offset + len]);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::RelationDescriptor;
    use crate::types::SchemaVersion;

    fn v1() -> RelationVersionInfo {
        RelationDescriptor::new("t")
            .primary_key("tenant", FieldCodec::Unsigned)
            .primary_key("id", FieldCodec::Unsigned)
            .value("name", FieldCodec::String)
            .value("gone", FieldCodec::Bool)
            .value("count", FieldCodec::Unsigned)
            .secondary_key("by_name", &["name"])
            .to_version(SchemaVersion::FIRST, None)
            .unwrap()
    }

    fn v2(previous: &RelationVersionInfo) -> RelationVersionInfo {
        RelationDescriptor::new("t")
            .primary_key("tenant", FieldCodec::Unsigned)
            .primary_key("id", FieldCodec::Unsigned)
            .value("name", FieldCodec::String)
            .value("count", FieldCodec::Signed)
            .value_with_default("score", FieldCodec::Unsigned, 5u64)
            .secondary_key("by_name", &["name"])
            .secondary_key("by_score", &["score", "count"])
            .to_version(SchemaVersion::new(2), Some(previous))
            .unwrap()
    }

    fn row_bytes(info: &RelationVersionInfo, pk: &[Value], values: &[Value]) -> (Vec<u8>, Vec<u8>) {
        let mut key = vec![0x03, 1];
        let codecs = info.primary_fields().iter().map(|f| f.codec.clone()).collect();
        KeyCodec::new(codecs).encode(pk, &mut key).unwrap();
        (key, ValueSaver::new(info).save(values).unwrap())
    }

    #[test]
    fn loader_upgrades_old_rows() {
        let old = v1();
        let new = v2(&old);
        let (_, value) = row_bytes(
            &old,
            &[],
            &[Value::from("a"), Value::Bool(true), Value::Unsigned(3)],
        );
        let loader = ValueLoader::build(&old, &new).unwrap();
        let mut reader = KeyReader::at(&value, 1);
        assert_eq!(
            loader.load(&mut reader).unwrap(),
            vec![Value::from("a"), Value::Signed(3), Value::Unsigned(5)]
        );
    }

    #[test]
    fn loader_rejects_incompatible_change() {
        let old = v1();
        let new = RelationDescriptor::new("t")
            .primary_key("tenant", FieldCodec::Unsigned)
            .primary_key("id", FieldCodec::Unsigned)
            .value("name", FieldCodec::Unsigned)
            .to_version(SchemaVersion::new(2), Some(&old))
            .unwrap();
        assert!(ValueLoader::build(&old, &new).is_err());
    }

    #[test]
    fn merger_copies_spans_and_roundtrips() {
        let info = v1();
        let sk = info.secondary_key("by_name").unwrap().clone();
        let (key, value) = row_bytes(
            &info,
            &[Value::Unsigned(1), Value::Unsigned(300)],
            &[Value::from("bob"), Value::Bool(false), Value::Unsigned(0)],
        );
        let merger = PkValueMerger::build(vec![0x04, 1, 0], &info, &info, &sk).unwrap();
        let entry = merger.merge(&key, 2, &value, 1).unwrap();

        let mut expected = vec![0x04, 1, 0];
        FieldCodec::String
            .encode(&Value::from("bob"), &mut expected)
            .unwrap();
        expected.extend_from_slice(&key[2..]);
        assert_eq!(entry, expected);

        let back = SkToPkMerger::build(vec![0x03, 1], 3, &info, &sk);
        assert_eq!(back.merge(&entry).unwrap(), key);
    }

    #[test]
    fn merger_converts_and_defaults_for_old_rows() {
        let old = v1();
        let new = v2(&old);
        let sk = new.secondary_key("by_score").unwrap().clone();
        let (key, value) = row_bytes(
            &old,
            &[Value::Unsigned(1), Value::Unsigned(2)],
            &[Value::from("a"), Value::Bool(true), Value::Unsigned(9)],
        );
        let merger = PkValueMerger::build(vec![0x04, 1, 1], &old, &new, &sk).unwrap();
        let entry = merger.merge(&key, 2, &value, 1).unwrap();

        let mut expected = vec![0x04, 1, 1];
        FieldCodec::Unsigned
            .encode(&Value::Unsigned(5), &mut expected)
            .unwrap();
        FieldCodec::Signed
            .encode(&Value::Signed(9), &mut expected)
            .unwrap();
        expected.extend_from_slice(&key[2..]);
        assert_eq!(entry, expected);
    }

    #[test]
    fn content_finder_only_for_content_layouts() {
        assert!(ContentFinder::build(&v1()).is_none());
        let info = RelationDescriptor::new("t")
            .primary_key("id", FieldCodec::Unsigned)
            .value("name", FieldCodec::String)
            .value("attrs", FieldCodec::Dictionary)
            .value("tail", FieldCodec::Bool)
            .to_version(SchemaVersion::FIRST, None)
            .unwrap();
        let finder = ContentFinder::build(&info).unwrap();
        let (_, value) = row_bytes(
            &info,
            &[],
            &[Value::from("x"), Value::Dictionary(12), Value::Bool(true)],
        );
        let mut found = Vec::new();
        finder
            .find(&mut KeyReader::at(&value, 1), &mut found)
            .unwrap();
        assert_eq!(found, vec![ContentRef::Dictionary(12)]);
    }
}
