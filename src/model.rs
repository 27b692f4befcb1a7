//! The serialized xref model: [XRefSpec], [XRefMapRedirection] and [XRefMap], plus
//! [ResolvedXRefMap], the immutable, href-resolved form that answers lookups.
//!
//! An `xrefmap.yml` document looks like:
//!
//! ```yaml
//! sorted: true
//! hrefUpdated: false
//! baseUrl: https://docs.example.org/api/
//! redirections:
//!   - uidPrefix: System.
//!     href: dotnet/xrefmap.yml
//!   - href: fallback/xrefmap.yml
//! references:
//!   - uid: Example.Widget
//!     href: Example.Widget.html
//!     name: Widget
//! ```
//!
//! Keys the model does not know about, at the top level and on each reference, are carried
//! through unchanged.
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use url::Url;

use crate::{
    error::BuildonomyError,
    reader::{XRefContainer, XRefReader},
};

pub use serde_yaml::Value;

/// Resolved record for one UID. `uid` and `href` are always present, every other key is opaque
/// display metadata (`name`, `fullName`, `commentId`, ...).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct XRefSpec {
    pub uid: String,
    #[serde(default)]
    pub href: String,
    #[serde(flatten)]
    pub properties: BTreeMap<String, Value>,
}

impl XRefSpec {
    pub fn new<U: Into<String>, H: Into<String>>(uid: U, href: H) -> XRefSpec {
        XRefSpec {
            uid: uid.into(),
            href: href.into(),
            properties: BTreeMap::new(),
        }
    }

    pub fn with_property<K: Into<String>, V: Into<Value>>(mut self, key: K, value: V) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// String valued display property, e.g. `spec.get_str("name")`.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(Value::as_str)
    }
}

/// Pointer from one map to another. `uid_prefix == None` is a catch-all.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct XRefMapRedirection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid_prefix: Option<String>,
    #[serde(default)]
    pub href: String,
}

impl XRefMapRedirection {
    pub fn new<H: Into<String>>(uid_prefix: Option<String>, href: H) -> Self {
        XRefMapRedirection {
            uid_prefix,
            href: href.into(),
        }
    }

    /// A redirection applies when it has no prefix or the uid starts with it.
    pub fn applies_to(&self, uid: &str) -> bool {
        self.uid_prefix
            .as_deref()
            .map(|prefix| uid.starts_with(prefix))
            .unwrap_or(true)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct XRefMap {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sorted: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub href_updated: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub redirections: Vec<XRefMapRedirection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub references: Option<Vec<XRefSpec>>,
    #[serde(flatten)]
    pub others: BTreeMap<String, Value>,
}

impl XRefMap {
    pub fn from_yaml(content: &str) -> Result<XRefMap, BuildonomyError> {
        // An empty document deserializes to unit, which is an empty map for our purposes.
        if content.trim().is_empty() {
            return Ok(XRefMap::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn to_yaml(&self) -> Result<String, BuildonomyError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Order references by ordinal uid comparison and mark the map as sorted. A map already
    /// marked sorted is trusted and left untouched.
    pub fn sort(&mut self) {
        if self.sorted == Some(true) {
            return;
        }
        if let Some(references) = self.references.as_mut() {
            references.sort_by(|a, b| a.uid.cmp(&b.uid));
        }
        self.sorted = Some(true);
    }

    /// Resolve every relative reference href against `base_uri`, or against the map's own
    /// `baseUrl` when one is set, then mark the map `hrefUpdated`. Does nothing on a map that is
    /// already `hrefUpdated`.
    pub fn update_href(&mut self, base_uri: &Url) -> Result<(), BuildonomyError> {
        if self.href_updated == Some(true) {
            return Ok(());
        }
        let base = match self.base_url.as_deref() {
            Some(explicit) => parse_base_url(explicit)?,
            None => base_uri.clone(),
        };
        if let Some(references) = self.references.as_mut() {
            for spec in references.iter_mut() {
                if is_relative_href(&spec.href) {
                    spec.href = base
                        .join(&spec.href)
                        .map_err(|e| {
                            BuildonomyError::Serialization(format!(
                                "Cannot resolve href '{}' of '{}' against {base}: {e}",
                                spec.href, spec.uid
                            ))
                        })?
                        .to_string();
                }
            }
        }
        self.href_updated = Some(true);
        Ok(())
    }

    fn find_sorted(&self, uid: &str) -> Option<&XRefSpec> {
        let references = self.references.as_ref()?;
        let idx = references.partition_point(|spec| spec.uid.as_str() < uid);
        references.get(idx).filter(|spec| spec.uid == uid)
    }

    fn find_linear(&self, uid: &str) -> Option<&XRefSpec> {
        self.references
            .as_ref()?
            .iter()
            .find(|spec| spec.uid == uid)
    }

    /// Binary search when the map is marked sorted, linear scan otherwise.
    pub fn find(&self, uid: &str) -> Option<&XRefSpec> {
        if self.sorted == Some(true) {
            self.find_sorted(uid)
        } else {
            self.find_linear(uid)
        }
    }
}

fn parse_base_url(base_url: &str) -> Result<Url, BuildonomyError> {
    match Url::parse(base_url) {
        Ok(url) if !url.cannot_be_a_base() => Ok(url),
        Ok(_) => Err(BuildonomyError::Serialization(format!(
            "baseUrl '{base_url}' cannot be used as a base for relative hrefs"
        ))),
        Err(e) => Err(BuildonomyError::Serialization(format!(
            "baseUrl '{base_url}' is not an absolute URL: {e}"
        ))),
    }
}

fn is_relative_href(href: &str) -> bool {
    !href.is_empty() && matches!(Url::parse(href), Err(url::ParseError::RelativeUrlWithoutBase))
}

/// An [XRefMap] whose relative hrefs have been resolved against its `baseUrl` (when it has one
/// and was not already `hrefUpdated`). Once built it is never mutated, so it can be shared
/// between threads and looked up concurrently.
///
/// This is the single map reader: [XRefReader::find] uses binary search when the map is
/// marked sorted and a linear scan otherwise.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResolvedXRefMap {
    map: XRefMap,
}

impl ResolvedXRefMap {
    pub fn new(mut map: XRefMap) -> Result<ResolvedXRefMap, BuildonomyError> {
        if map.href_updated != Some(true) {
            if let Some(base_url) = map.base_url.as_deref() {
                let base = parse_base_url(base_url)?;
                map.update_href(&base)?;
            }
        }
        Ok(ResolvedXRefMap { map })
    }

    pub fn map(&self) -> &XRefMap {
        &self.map
    }

    pub fn into_inner(self) -> XRefMap {
        self.map
    }
}

impl XRefReader for ResolvedXRefMap {
    fn find(&self, uid: &str) -> Option<XRefSpec> {
        self.map.find(uid).cloned()
    }
}

impl XRefContainer for ResolvedXRefMap {
    fn redirections(&self) -> &[XRefMapRedirection] {
        &self.map.redirections
    }

    fn reader(&self) -> &dyn XRefReader {
        self
    }

    fn as_map(&self) -> Option<&XRefMap> {
        Some(&self.map)
    }
}
