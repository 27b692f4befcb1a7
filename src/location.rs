//! [Location] is how xref maps are addressed: either an absolute URL (`file`, `http`, `https`,
//! `ftp`, `embedded`) or a path relative to the build's local folders.
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
};
use url::{ParseError, Url};

use crate::error::BuildonomyError;

/// Scheme for xref maps bundled into the running binary, addressed as
/// `embedded://{module}/{resource path}`.
pub const EMBEDDED_SCHEME: &str = "embedded";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Location {
    Absolute(Url),
    Relative(String),
}

impl Location {
    pub fn parse(s: &str) -> Result<Location, BuildonomyError> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(BuildonomyError::Config(
                "An xref map location cannot be empty".to_string(),
            ));
        }
        if is_rooted_path(trimmed) {
            return file_location(trimmed);
        }
        match Url::parse(trimmed) {
            // Single letter schemes are drive letters (`C:\docs\xrefmap.yml`), not URLs.
            Ok(url) if url.scheme().len() > 1 => Ok(Location::Absolute(url)),
            Ok(_) | Err(ParseError::RelativeUrlWithoutBase) => {
                let path = normalize_relative(trimmed);
                if path.is_empty() {
                    return Err(BuildonomyError::Config(format!(
                        "xref map location '{trimmed}' does not name a file"
                    )));
                }
                Ok(Location::Relative(path))
            }
            Err(e) => Err(BuildonomyError::Config(format!(
                "Invalid xref map location '{trimmed}': {e}"
            ))),
        }
    }

    /// The key used to de-duplicate locations across a federation or an archive export.
    pub fn key(&self) -> String {
        match self {
            Location::Absolute(url) => url.as_str().to_string(),
            Location::Relative(path) => path.clone(),
        }
    }

    pub fn is_absolute(&self) -> bool {
        matches!(self, Location::Absolute(_))
    }

    pub fn as_url(&self) -> Option<&Url> {
        match self {
            Location::Absolute(url) => Some(url),
            Location::Relative(_) => None,
        }
    }

    /// Resolve a redirection href found inside the map at `self`.
    ///
    /// Against an absolute location every non-URL href, rooted or not, is joined as a URL, so
    /// `/other.yml` in a remote map stays on the same host. Against a relative location a rooted
    /// path names a local file as-is.
    pub fn resolve(&self, href: &str) -> Result<Location, BuildonomyError> {
        let href = href.trim();
        let target = Location::parse(href)?;
        match (self, target) {
            (Location::Absolute(_), Location::Absolute(url)) if !is_rooted_path(href) => {
                Ok(Location::Absolute(url))
            }
            (Location::Absolute(base), _) => {
                let joined = base.join(href).map_err(|e| {
                    BuildonomyError::Config(format!("Cannot resolve '{href}' against {base}: {e}"))
                })?;
                Ok(Location::Absolute(joined))
            }
            (Location::Relative(_), Location::Absolute(url)) => Ok(Location::Absolute(url)),
            (Location::Relative(base), Location::Relative(rel)) => {
                if href.starts_with('\\') {
                    return Ok(Location::Relative(rel));
                }
                let parent = match base.rfind('/') {
                    Some(idx) => &base[..idx],
                    None => "",
                };
                Ok(Location::Relative(normalize_relative(&format!(
                    "{parent}/{rel}"
                ))))
            }
        }
    }

    /// The last path segment, if any (e.g. `xrefmap.yml` for `https://host/docs/xrefmap.yml`).
    pub fn file_name(&self) -> Option<&str> {
        let name = match self {
            Location::Absolute(url) => url.path_segments()?.next_back()?,
            Location::Relative(path) => path.rsplit('/').next()?,
        };
        if name.is_empty() {
            None
        } else {
            Some(name)
        }
    }

    /// True if the location names a zip-packed xref archive.
    pub fn is_archive(&self) -> bool {
        self.file_name()
            .map(|name| name.to_ascii_lowercase().ends_with(".zip"))
            .unwrap_or(false)
    }
}

/// True for absolute filesystem paths (`/srv/site/xrefmap.yml`, and `C:\\site\\xrefmap.yml` on
/// Windows).
fn is_rooted_path(s: &str) -> bool {
    s.starts_with('/') || Path::new(s).is_absolute()
}

/// `file://` location for an absolute filesystem path, with `.` and `..` collapsed.
fn file_location(path: &str) -> Result<Location, BuildonomyError> {
    let normalized = if path.starts_with('/') {
        PathBuf::from(format!("/{}", normalize_relative(path)))
    } else {
        PathBuf::from(path)
    };
    let url = Url::from_file_path(&normalized).map_err(|_| {
        BuildonomyError::Config(format!("'{path}' is not a valid absolute file path"))
    })?;
    Ok(Location::Absolute(url))
}

/// Everything up to and including the last `/` of the URL path, with query and fragment removed.
/// Relative hrefs inside a remotely fetched map are resolved against this.
pub fn implicit_base_url(url: &Url) -> Result<Url, BuildonomyError> {
    let mut base = url.clone();
    base.set_query(None);
    base.set_fragment(None);
    Ok(base.join("./")?)
}

/// Collapse `.` and `..` segments and unify separators. Leading `..` segments that cannot be
/// collapsed are kept.
pub fn normalize_relative(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => match segments.last() {
                Some(last) if *last != ".." => {
                    segments.pop();
                }
                _ => segments.push(".."),
            },
            other => segments.push(other),
        }
    }
    segments.join("/")
}

impl FromStr for Location {
    type Err = BuildonomyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Location::parse(s)
    }
}

impl TryFrom<String> for Location {
    type Error = BuildonomyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Location::parse(&value)
    }
}

impl From<Location> for String {
    fn from(value: Location) -> Self {
        value.key()
    }
}

impl From<Url> for Location {
    fn from(value: Url) -> Self {
        Location::Absolute(value)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Absolute(url) => write!(f, "{url}"),
            Location::Relative(path) => write!(f, "{path}"),
        }
    }
}
