//! Ordered rewrites applied to rendered manifests before labelling.

use serde_yaml::Value;

use keel_core::Artifact;

use crate::error::DeployError;
use crate::manifest::ManifestSet;

/// A rewrite of a rendered manifest set.
///
/// Transforms run in configured order after image substitution; the first
/// failure aborts the render.
pub trait ManifestTransform: Send + Sync {
    fn name(&self) -> &'static str;

    fn transform(
        &self,
        manifests: &mut ManifestSet,
        artifacts: &[Artifact],
    ) -> Result<(), DeployError>;
}

/// Sets `metadata.namespace` on documents that have none.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefaultNamespace(pub String);

impl ManifestTransform for DefaultNamespace {
    fn name(&self) -> &'static str {
        "default-namespace"
    }

    fn transform(&self, manifests: &mut ManifestSet, _: &[Artifact]) -> Result<(), DeployError> {
        for manifest in manifests.iter_mut() {
            if manifest.namespace().is_some() {
                continue;
            }
            let metadata = manifest
                .metadata_mut()
                .map_err(|err| DeployError::Transform {
                    name: self.name(),
                    reason: err.to_string(),
                })?;
            metadata.insert(
                Value::String("namespace".to_string()),
                Value::String(self.0.clone()),
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fills_only_missing_namespaces() {
        let mut manifests = ManifestSet::parse(
            "kind: A\nmetadata: {name: a}\n---\nkind: B\nmetadata: {name: b, namespace: prod}\n---\nkind: C\n",
            "test",
        )
        .expect("parse");
        DefaultNamespace("dev".into())
            .transform(&mut manifests, &[])
            .expect("transform");
        let namespaces: Vec<_> = manifests.iter().map(|m| m.namespace()).collect();
        assert_eq!(namespaces, vec![Some("dev"), Some("prod"), Some("dev")]);
    }

    #[test]
    fn scalar_metadata_fails_with_transform_name() {
        let mut manifests = ManifestSet::parse("kind: A\nmetadata: 3\n", "test").expect("parse");
        let err = DefaultNamespace("dev".into())
            .transform(&mut manifests, &[])
            .unwrap_err();
        assert!(err.to_string().contains("default-namespace"), "got: {err}");
    }
}
