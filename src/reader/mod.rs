//! Lookup strategies over xref maps.
//!
//! ## Key Components
//!
//! - [`XRefReader`] - anything that answers `find(uid)`
//! - [`XRefContainer`] - a single map or an archive of many maps: exposes its redirections and
//!   exactly one reader
//! - [`RedirectionReader`] - walks redirection chains across the containers of a
//!   [`RedirectionSource`], depth first, each container at most once per lookup
//! - [`LocalXRefReader`] - dictionary of locally authored specs
//! - [`XRefResolver`] - ordered composition of readers
//!
//! The archive reader ([`crate::archive::XRefArchiveReader`]) and the federation reader
//! ([`crate::collection::XRefFederationReader`]) are both [`RedirectionReader`]s; they differ
//! only in how [`RedirectionSource::get_map`] finds a container by name.
use std::{
    borrow::Cow,
    collections::{HashMap, HashSet},
    fmt,
    sync::Arc,
};

use crate::{
    error::BuildonomyError,
    model::{XRefMap, XRefMapRedirection, XRefSpec},
};

pub trait XRefReader: Send + Sync {
    fn find(&self, uid: &str) -> Option<XRefSpec>;
}

impl<T: XRefReader + ?Sized> XRefReader for &T {
    fn find(&self, uid: &str) -> Option<XRefSpec> {
        (**self).find(uid)
    }
}

impl<T: XRefReader + ?Sized> XRefReader for Box<T> {
    fn find(&self, uid: &str) -> Option<XRefSpec> {
        (**self).find(uid)
    }
}

impl<T: XRefReader + ?Sized> XRefReader for Arc<T> {
    fn find(&self, uid: &str) -> Option<XRefSpec> {
        (**self).find(uid)
    }
}

pub trait XRefContainer: Send + Sync {
    fn redirections(&self) -> &[XRefMapRedirection];

    /// True when the redirections point inside the container itself (archive entries) and are
    /// followed by the container's own reader, so a federation must not try to fetch them.
    fn is_embedded_redirections(&self) -> bool {
        false
    }

    fn reader(&self) -> &dyn XRefReader;

    /// The underlying map, for containers that are a single plain map.
    fn as_map(&self) -> Option<&XRefMap> {
        None
    }
}

impl fmt::Debug for dyn XRefContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("XRefContainer")
            .field("redirections", &self.redirections())
            .field("is_embedded_redirections", &self.is_embedded_redirections())
            .finish()
    }
}

/// Name-addressed set of containers that a [RedirectionReader] walks.
pub trait RedirectionSource: Send + Sync {
    /// Canonical form of a container name. Names are compared and de-duplicated in this form.
    fn normalize_key<'a>(&self, name: &'a str) -> Cow<'a, str> {
        Cow::Borrowed(name)
    }

    /// The container registered under `name`, `None` if there is none (or it cannot be loaded).
    fn get_map(&self, name: &str) -> Option<Arc<dyn XRefContainer>>;
}

impl<T: RedirectionSource + ?Sized> RedirectionSource for Arc<T> {
    fn normalize_key<'a>(&self, name: &'a str) -> Cow<'a, str> {
        (**self).normalize_key(name)
    }

    fn get_map(&self, name: &str) -> Option<Arc<dyn XRefContainer>> {
        (**self).get_map(name)
    }
}

impl RedirectionSource for HashMap<String, Arc<dyn XRefContainer>> {
    fn get_map(&self, name: &str) -> Option<Arc<dyn XRefContainer>> {
        self.get(name).cloned()
    }
}

/// Resolves a uid by walking redirections from a major (root) container.
///
/// ## Traversal
///
/// Depth first, using an explicit stack seeded with the major key and a visited set, so each
/// container is queried at most once per `find` and redirection cycles terminate. For every
/// container popped:
///
/// 1. Ask its reader; a hit ends the search.
/// 2. Otherwise push the hrefs of its redirections that apply to the uid (no prefix, or a prefix
///    the uid starts with) in reverse declaration order, so that the first declared redirection
///    is popped, and fully explored, first. Empty hrefs are dead redirections and are skipped.
///
/// The walk ends with `None` once the stack is empty.
pub struct RedirectionReader<S> {
    major: String,
    keys: HashSet<String>,
    source: S,
}

impl<S: RedirectionSource> RedirectionReader<S> {
    pub fn new<I, K>(major: &str, keys: I, source: S) -> Result<Self, BuildonomyError>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let keys = keys
            .into_iter()
            .map(|key| source.normalize_key(key.as_ref()).into_owned())
            .collect::<HashSet<String>>();
        let major = source.normalize_key(major).into_owned();
        if !keys.contains(&major) {
            return Err(BuildonomyError::NotFound(format!(
                "Major xref map '{major}' is not one of the {} known maps",
                keys.len()
            )));
        }
        Ok(RedirectionReader {
            major,
            keys,
            source,
        })
    }

    /// Like [Self::new], for callers that own the source and know `major` is in it. The major
    /// key is added to `keys` rather than checked.
    pub(crate) fn rooted<I, K>(major: &str, keys: I, source: S) -> Self
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let major = source.normalize_key(major).into_owned();
        let mut keys = keys
            .into_iter()
            .map(|key| source.normalize_key(key.as_ref()).into_owned())
            .collect::<HashSet<String>>();
        keys.insert(major.clone());
        RedirectionReader {
            major,
            keys,
            source,
        }
    }

    pub fn major(&self) -> &str {
        &self.major
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(String::as_str)
    }

    pub fn source(&self) -> &S {
        &self.source
    }
}

impl<S: RedirectionSource> XRefReader for RedirectionReader<S> {
    fn find(&self, uid: &str) -> Option<XRefSpec> {
        let mut visited: HashSet<String> = HashSet::new();
        let mut stack: Vec<String> = vec![self.major.clone()];
        while let Some(key) = stack.pop() {
            if visited.contains(&key) {
                continue;
            }
            let container = if self.keys.contains(&key) {
                self.source.get_map(&key)
            } else {
                tracing::debug!("[RedirectionReader] '{key}' is not a known xref map, skipping");
                None
            };
            if let Some(container) = container {
                if let Some(spec) = container.reader().find(uid) {
                    return Some(spec);
                }
                for redirection in container.redirections().iter().rev() {
                    if redirection.href.is_empty() || !redirection.applies_to(uid) {
                        continue;
                    }
                    let next = self.source.normalize_key(&redirection.href);
                    if !visited.contains(next.as_ref()) {
                        stack.push(next.into_owned());
                    }
                }
            }
            visited.insert(key);
        }
        None
    }
}

/// Dictionary of locally authored specs. Registering a uid twice keeps the last spec.
#[derive(Debug, Clone, Default)]
pub struct LocalXRefReader {
    specs: HashMap<String, XRefSpec>,
}

impl LocalXRefReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, spec: XRefSpec) -> Option<XRefSpec> {
        self.specs.insert(spec.uid.clone(), spec)
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

impl Extend<XRefSpec> for LocalXRefReader {
    fn extend<T: IntoIterator<Item = XRefSpec>>(&mut self, iter: T) {
        for spec in iter {
            self.insert(spec);
        }
    }
}

impl FromIterator<XRefSpec> for LocalXRefReader {
    fn from_iter<T: IntoIterator<Item = XRefSpec>>(iter: T) -> Self {
        let mut reader = LocalXRefReader::new();
        reader.extend(iter);
        reader
    }
}

impl XRefReader for LocalXRefReader {
    fn find(&self, uid: &str) -> Option<XRefSpec> {
        self.specs.get(uid).cloned()
    }
}

/// Ordered list of readers, queried in turn; the first hit wins. The build typically registers
/// its [LocalXRefReader] first and the federation reader after it.
#[derive(Default)]
pub struct XRefResolver {
    readers: Vec<Box<dyn XRefReader>>,
}

impl XRefResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push<R: XRefReader + 'static>(&mut self, reader: R) -> &mut Self {
        self.readers.push(Box::new(reader));
        self
    }

    pub fn with<R: XRefReader + 'static>(mut self, reader: R) -> Self {
        self.push(reader);
        self
    }
}

impl XRefReader for XRefResolver {
    fn find(&self, uid: &str) -> Option<XRefSpec> {
        self.readers.iter().find_map(|reader| reader.find(uid))
    }
}
