//! Manifest documents and ordered sets of them.
//!
//! A [`Manifest`] wraps one parsed YAML document. Two manifests are "the
//! same" when their [`ManifestKey`]s and digests agree; the digest hashes a
//! key-sorted JSON rendering, so reordering keys or reformatting a file
//! does not count as a change.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use sha2::{Digest, Sha256};

use keel_core::{Artifact, ImageRef};

use crate::error::DeployError;

// ---------------------------------------------------------------------------
// ManifestKey
// ---------------------------------------------------------------------------

/// Identity of a manifest: namespace, kind and name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ManifestKey {
    pub namespace: Option<String>,
    pub kind: String,
    pub name: String,
}

impl fmt::Display for ManifestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{ns}:{}/{}", self.kind, self.name),
            None => write!(f, "{}/{}", self.kind, self.name),
        }
    }
}

// ---------------------------------------------------------------------------
// Manifest
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    doc: Value,
}

impl Manifest {
    /// Wrap a document. Only mappings are accepted.
    pub fn from_value(doc: Value) -> Result<Self, DeployError> {
        if !doc.is_mapping() {
            return Err(DeployError::Manifest {
                key: "<document>".to_string(),
                reason: "top level is not a mapping".to_string(),
            });
        }
        Ok(Self { doc })
    }

    pub fn value(&self) -> &Value {
        &self.doc
    }

    pub fn value_mut(&mut self) -> &mut Value {
        &mut self.doc
    }

    pub fn kind(&self) -> &str {
        self.doc.get("kind").and_then(Value::as_str).unwrap_or_default()
    }

    pub fn name(&self) -> &str {
        self.metadata_str("name").unwrap_or_default()
    }

    pub fn namespace(&self) -> Option<&str> {
        self.metadata_str("namespace")
    }

    fn metadata_str(&self, field: &str) -> Option<&str> {
        self.doc
            .get("metadata")
            .and_then(|m| m.get(field))
            .and_then(Value::as_str)
    }

    pub fn key(&self) -> ManifestKey {
        ManifestKey {
            namespace: self.namespace().map(str::to_string),
            kind: self.kind().to_string(),
            name: self.name().to_string(),
        }
    }

    /// SHA-256 hex digest of the key-sorted JSON form.
    pub fn digest(&self) -> String {
        let canonical = canonical_json(&self.doc).to_string();
        let mut h = Sha256::new();
        h.update(canonical.as_bytes());
        hex::encode(h.finalize())
    }

    pub fn to_yaml(&self) -> Result<String, DeployError> {
        Ok(serde_yaml::to_string(&self.doc)?)
    }

    /// The `metadata` mapping, created when absent.
    pub fn metadata_mut(&mut self) -> Result<&mut Mapping, DeployError> {
        let key = self.key().to_string();
        let root = self
            .doc
            .as_mapping_mut()
            .ok_or_else(|| DeployError::Manifest {
                key: key.clone(),
                reason: "top level is not a mapping".to_string(),
            })?;
        child_mapping(root, "metadata").ok_or_else(|| DeployError::Manifest {
            key,
            reason: "metadata is not a mapping".to_string(),
        })
    }
}

fn child_mapping<'a>(parent: &'a mut Mapping, field: &str) -> Option<&'a mut Mapping> {
    let slot = parent
        .entry(Value::String(field.to_string()))
        .or_insert_with(|| Value::Mapping(Mapping::new()));
    if slot.is_null() {
        *slot = Value::Mapping(Mapping::new());
    }
    slot.as_mapping_mut()
}

fn canonical_json(value: &Value) -> serde_json::Value {
    use serde_json::Value as Json;
    match value {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Json::from(i)
            } else if let Some(u) = n.as_u64() {
                Json::from(u)
            } else {
                n.as_f64()
                    .and_then(serde_json::Number::from_f64)
                    .map(Json::Number)
                    .unwrap_or(Json::Null)
            }
        }
        Value::String(s) => Json::String(s.clone()),
        Value::Sequence(seq) => Json::Array(seq.iter().map(canonical_json).collect()),
        // serde_json's map is ordered by key.
        Value::Mapping(map) => Json::Object(
            map.iter()
                .map(|(k, v)| (key_string(k), canonical_json(v)))
                .collect(),
        ),
        Value::Tagged(tagged) => {
            let mut obj = serde_json::Map::new();
            obj.insert(tagged.tag.to_string(), canonical_json(&tagged.value));
            Json::Object(obj)
        }
    }
}

fn key_string(key: &Value) -> String {
    match key {
        Value::String(s) => s.clone(),
        other => canonical_json(other).to_string(),
    }
}

// ---------------------------------------------------------------------------
// ManifestSet
// ---------------------------------------------------------------------------

/// An ordered list of manifests.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ManifestSet {
    manifests: Vec<Manifest>,
}

impl ManifestSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse multi-document YAML. Empty documents are skipped.
    ///
    /// `origin` names the source in error messages (usually a file path).
    pub fn parse(text: &str, origin: &str) -> Result<Self, DeployError> {
        let mut manifests = Vec::new();
        for document in serde_yaml::Deserializer::from_str(text) {
            let doc = Value::deserialize(document).map_err(|source| DeployError::Parse {
                origin: origin.to_string(),
                source,
            })?;
            if doc.is_null() {
                continue;
            }
            manifests.push(Manifest::from_value(doc).map_err(|err| match err {
                DeployError::Manifest { reason, .. } => DeployError::Manifest {
                    key: origin.to_string(),
                    reason,
                },
                other => other,
            })?);
        }
        Ok(Self { manifests })
    }

    pub fn len(&self) -> usize {
        self.manifests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.manifests.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Manifest> {
        self.manifests.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Manifest> {
        self.manifests.iter_mut()
    }

    pub fn push(&mut self, manifest: Manifest) {
        self.manifests.push(manifest);
    }

    /// Append every manifest of `other`.
    pub fn extend(&mut self, other: ManifestSet) {
        self.manifests.extend(other.manifests);
    }

    /// Print back as multi-document YAML.
    pub fn to_yaml(&self) -> Result<String, DeployError> {
        let docs = self
            .manifests
            .iter()
            .map(Manifest::to_yaml)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(docs.join("---\n"))
    }

    /// Manifests of `latest` that are new or changed relative to `self`.
    pub fn diff(&self, latest: &ManifestSet) -> ManifestSet {
        let previous: HashMap<ManifestKey, String> = self
            .manifests
            .iter()
            .map(|m| (m.key(), m.digest()))
            .collect();
        let manifests = latest
            .manifests
            .iter()
            .filter(|m| previous.get(&m.key()) != Some(&m.digest()))
            .cloned()
            .collect();
        ManifestSet { manifests }
    }

    /// Point every `image:` field whose base name matches an artifact at
    /// the artifact's tag.
    ///
    /// Digest-pinned and unparseable references are left alone. Artifacts
    /// that match nothing are logged at debug level.
    pub fn replace_images(&mut self, artifacts: &[Artifact]) {
        let mut tags: HashMap<String, &str> = HashMap::new();
        for artifact in artifacts {
            match ImageRef::parse(&artifact.image_name) {
                Ok(parsed) => {
                    tags.insert(parsed.name, artifact.tag.as_str());
                }
                Err(err) => {
                    tracing::warn!(image = %artifact.image_name, "skipping artifact: {err}")
                }
            }
        }
        if tags.is_empty() {
            return;
        }

        let mut found = BTreeSet::new();
        for manifest in &mut self.manifests {
            replace_in(&mut manifest.doc, &tags, &mut found);
        }
        for name in tags.keys().filter(|name| !found.contains(*name)) {
            tracing::debug!(image = %name, "image not found in any manifest");
        }
    }

    /// Add `labels` to every manifest's `metadata.labels`.
    pub fn set_labels(&mut self, labels: &BTreeMap<String, String>) -> Result<(), DeployError> {
        if labels.is_empty() {
            return Ok(());
        }
        for manifest in &mut self.manifests {
            let key = manifest.key().to_string();
            let metadata = manifest.metadata_mut()?;
            let existing = child_mapping(metadata, "labels").ok_or_else(|| {
                DeployError::Manifest {
                    key,
                    reason: "metadata.labels is not a mapping".to_string(),
                }
            })?;
            for (k, v) in labels {
                existing.insert(Value::String(k.clone()), Value::String(v.clone()));
            }
        }
        Ok(())
    }

    /// Sorted, deduplicated `metadata.namespace` values.
    pub fn collect_namespaces(&self) -> Result<Vec<String>, DeployError> {
        let mut namespaces = BTreeSet::new();
        for manifest in &self.manifests {
            let Some(ns) = manifest.doc.get("metadata").and_then(|m| m.get("namespace")) else {
                continue;
            };
            match ns.as_str() {
                Some(ns) if !ns.is_empty() => {
                    namespaces.insert(ns.to_string());
                }
                Some(_) => {}
                None => {
                    return Err(DeployError::Manifest {
                        key: manifest.key().to_string(),
                        reason: "metadata.namespace is not a string".to_string(),
                    })
                }
            }
        }
        Ok(namespaces.into_iter().collect())
    }
}

impl IntoIterator for ManifestSet {
    type Item = Manifest;
    type IntoIter = std::vec::IntoIter<Manifest>;

    fn into_iter(self) -> Self::IntoIter {
        self.manifests.into_iter()
    }
}

impl<'a> IntoIterator for &'a ManifestSet {
    type Item = &'a Manifest;
    type IntoIter = std::slice::Iter<'a, Manifest>;

    fn into_iter(self) -> Self::IntoIter {
        self.manifests.iter()
    }
}

impl FromIterator<Manifest> for ManifestSet {
    fn from_iter<I: IntoIterator<Item = Manifest>>(iter: I) -> Self {
        Self {
            manifests: iter.into_iter().collect(),
        }
    }
}

fn replace_in(value: &mut Value, tags: &HashMap<String, &str>, found: &mut BTreeSet<String>) {
    match value {
        Value::Mapping(map) => {
            for (k, v) in map.iter_mut() {
                if k.as_str() == Some("image") {
                    if let Some(image) = v.as_str() {
                        if let Some(replacement) = replacement_for(image, tags, found) {
                            *v = Value::String(replacement);
                        }
                        continue;
                    }
                }
                replace_in(v, tags, found);
            }
        }
        Value::Sequence(seq) => {
            for item in seq {
                replace_in(item, tags, found);
            }
        }
        Value::Tagged(tagged) => replace_in(&mut tagged.value, tags, found),
        _ => {}
    }
}

fn replacement_for(
    image: &str,
    tags: &HashMap<String, &str>,
    found: &mut BTreeSet<String>,
) -> Option<String> {
    let parsed = match ImageRef::parse(image) {
        Ok(parsed) => parsed,
        Err(err) => {
            tracing::warn!(image, "couldn't parse image: {err}");
            return None;
        }
    };
    if parsed.digest.is_some() {
        return None;
    }
    let tag = tags.get(&parsed.name)?;
    found.insert(parsed.name);
    Some((*tag).to_string())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
