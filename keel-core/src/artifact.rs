//! Built artifacts and image references.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ImageRefError;

/// An image produced upstream: the configured image name and the fully
/// qualified reference it resolved to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Artifact {
    pub image_name: String,
    pub tag: String,
}

impl Artifact {
    pub fn new(image_name: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            image_name: image_name.into(),
            tag: tag.into(),
        }
    }
}

/// A parsed `[registry[:port]/]path[:tag][@digest]` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    /// Everything before the tag and digest, registry included.
    pub name: String,
    pub tag: Option<String>,
    pub digest: Option<String>,
}

impl ImageRef {
    pub fn parse(reference: &str) -> Result<Self, ImageRefError> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(ImageRefError::Empty);
        }

        let (rest, digest) = match reference.split_once('@') {
            Some((rest, digest)) if !digest.is_empty() => (rest, Some(digest.to_string())),
            Some(_) => {
                return Err(ImageRefError::Invalid {
                    reference: reference.to_string(),
                    reason: "empty digest",
                })
            }
            None => (reference, None),
        };

        // A ':' before the last '/' belongs to a registry port.
        let last_segment_start = rest.rfind('/').map(|i| i + 1).unwrap_or(0);
        let last_segment = &rest[last_segment_start..];
        let (name, tag) = match last_segment.matches(':').count() {
            0 => (rest.to_string(), None),
            1 => {
                let split = last_segment_start + last_segment.find(':').unwrap_or(0);
                let tag = &rest[split + 1..];
                if tag.is_empty() {
                    return Err(ImageRefError::Invalid {
                        reference: reference.to_string(),
                        reason: "empty tag",
                    });
                }
                (rest[..split].to_string(), Some(tag.to_string()))
            }
            _ => {
                return Err(ImageRefError::Invalid {
                    reference: reference.to_string(),
                    reason: "too many ':' separators",
                })
            }
        };

        if name.is_empty() {
            return Err(ImageRefError::Invalid {
                reference: reference.to_string(),
                reason: "empty repository name",
            });
        }

        Ok(Self { name, tag, digest })
    }

    /// The reference with `:latest` appended when neither tag nor digest
    /// is present.
    pub fn fully_qualified(&self) -> String {
        if self.tag.is_none() && self.digest.is_none() {
            return format!("{}:latest", self.name);
        }
        self.to_string()
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{tag}")?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{digest}")?;
        }
        Ok(())
    }
}
