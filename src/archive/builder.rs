//! Packs an xref map, and every map reachable from it through redirections, into one archive.
//!
//! Packing runs in two phases. The collect phase downloads the root and follows redirections
//! breadth first, de-duplicating targets by location key. The pack phase reserves an entry name
//! for every collected map (in location key order) before any redirection is rewritten, so maps
//! that redirect to each other in a cycle still pack cleanly.
use futures::stream::{FuturesUnordered, StreamExt};
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    io::{Seek, Write},
    path::Path,
    sync::Arc,
};
use tokio_util::sync::CancellationToken;

use super::{is_valid_entry_name, XRefArchiveWriter, MAJOR_ENTRY_NAME};
use crate::{
    downloader::XRefMapDownloader,
    error::BuildonomyError,
    location::{implicit_base_url, Location},
    model::{XRefMap, XRefMapRedirection},
    reader::XRefContainer,
};

/// A collected map and the location it was fetched from.
struct Collected {
    location: Location,
    map: XRefMap,
}

pub struct XRefArchiveBuilder {
    downloader: Arc<XRefMapDownloader>,
}

impl XRefArchiveBuilder {
    pub fn new(downloader: Arc<XRefMapDownloader>) -> Self {
        XRefArchiveBuilder { downloader }
    }

    /// Download `root` and everything it redirects to, and write them to `output` as one
    /// self-contained archive with `root` as the major entry.
    ///
    /// Failing to fetch the root is an error. Failing to fetch a redirected map only drops the
    /// redirections pointing at it. On error no partial archive is left behind.
    #[tracing::instrument(skip(self, root, cancel), fields(root = %root))]
    pub async fn download(
        &self,
        root: &Location,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), BuildonomyError> {
        let (major, minors) = self.collect(root, cancel).await?;
        let count = minors.len() + 1;
        let writer = XRefArchiveWriter::create(output)?;
        let finished = pack(&writer, root, major, minors).and_then(|()| writer.finish().map(drop));
        if let Err(e) = finished {
            if let Err(cleanup) = std::fs::remove_file(output) {
                tracing::warn!(
                    "[XRefArchiveBuilder] could not remove incomplete archive {:?}: {cleanup}",
                    output
                );
            }
            return Err(e);
        }
        tracing::info!("[XRefArchiveBuilder] packed {count} xref maps into {:?}", output);
        Ok(())
    }

    async fn fetch(
        &self,
        location: Location,
        cancel: &CancellationToken,
    ) -> (Location, Result<Arc<dyn XRefContainer>, BuildonomyError>) {
        let result = self.downloader.download_cancellable(&location, cancel).await;
        (location, result)
    }

    async fn collect(
        &self,
        root: &Location,
        cancel: &CancellationToken,
    ) -> Result<(XRefMap, BTreeMap<String, Collected>), BuildonomyError> {
        let container = self.downloader.download_cancellable(root, cancel).await?;
        let Some(map) = container.as_map() else {
            return Err(BuildonomyError::Archive(format!(
                "{root} is already an archive and cannot be re-packed"
            )));
        };
        let major = prepare(root, map.clone())?;

        let mut seen = HashSet::from([root.key()]);
        let mut minors = BTreeMap::new();
        let mut in_flight = FuturesUnordered::new();
        for target in redirection_targets(root, &major) {
            if seen.insert(target.key()) {
                in_flight.push(self.fetch(target, cancel));
            }
        }

        while let Some((location, result)) = in_flight.next().await {
            let container = match result {
                Ok(container) => container,
                Err(e) => {
                    tracing::warn!("[XRefArchiveBuilder] dropping redirection to {location}: {e}");
                    continue;
                }
            };
            let Some(map) = container.as_map() else {
                tracing::warn!(
                    "[XRefArchiveBuilder] dropping redirection to {location}: nested archives are not packed"
                );
                continue;
            };
            let map = match prepare(&location, map.clone()) {
                Ok(map) => map,
                Err(e) => {
                    tracing::warn!("[XRefArchiveBuilder] dropping redirection to {location}: {e}");
                    continue;
                }
            };
            for target in redirection_targets(&location, &map) {
                if seen.insert(target.key()) {
                    tracing::debug!("[XRefArchiveBuilder] following redirection to {target}");
                    in_flight.push(self.fetch(target, cancel));
                }
            }
            minors.insert(location.key(), Collected { location, map });
        }
        Ok((major, minors))
    }
}

/// Make a fetched map archive-ready: hrefs of maps from absolute locations are resolved against
/// the location, and references are sorted for binary search.
fn prepare(location: &Location, mut map: XRefMap) -> Result<XRefMap, BuildonomyError> {
    if let Some(url) = location.as_url() {
        map.update_href(&implicit_base_url(url)?)?;
    }
    map.sort();
    Ok(map)
}

fn redirection_targets(location: &Location, map: &XRefMap) -> Vec<Location> {
    map.redirections
        .iter()
        .filter(|r| !r.href.is_empty())
        .filter_map(|r| match location.resolve(&r.href) {
            Ok(target) => Some(target),
            Err(e) => {
                tracing::warn!(
                    "[XRefArchiveBuilder] ignoring redirection '{}' in {location}: {e}",
                    r.href
                );
                None
            }
        })
        .collect()
}

/// Preferred entry names for a map: its file name, then its file name qualified by its parent
/// directory (or host), so `docs/dotnet/xrefmap.yml` can still land as `dotnet-xrefmap.yml`.
fn candidate_names(location: &Location) -> Vec<String> {
    let segments: Vec<&str> = match location {
        Location::Absolute(url) => url
            .host_str()
            .into_iter()
            .chain(url.path_segments().into_iter().flatten())
            .filter(|s| !s.is_empty())
            .collect(),
        Location::Relative(path) => path.split('/').filter(|s| !s.is_empty()).collect(),
    };
    let mut candidates = Vec::new();
    if let Some((file, parents)) = segments.split_last() {
        candidates.push(file.to_string());
        if let Some(parent) = parents.last() {
            candidates.push(format!("{parent}-{file}"));
        }
    }
    candidates.retain(|c| is_valid_entry_name(c));
    candidates
}

/// Rewrite redirections to the entry names their targets were packed under, dropping those whose
/// target was not packed.
fn rewrite_redirections(
    location: &Location,
    redirections: &[XRefMapRedirection],
    names: &HashMap<String, String>,
) -> Vec<XRefMapRedirection> {
    let mut rewritten = Vec::with_capacity(redirections.len());
    for redirection in redirections {
        if redirection.href.is_empty() {
            tracing::warn!("[XRefArchiveBuilder] dropping redirection with an empty href in {location}");
            continue;
        }
        let name = location
            .resolve(&redirection.href)
            .ok()
            .and_then(|target| names.get(&target.key()));
        match name {
            Some(name) => rewritten.push(XRefMapRedirection::new(
                redirection.uid_prefix.clone(),
                name.clone(),
            )),
            None => tracing::warn!(
                "[XRefArchiveBuilder] dropping redirection '{}' in {location}, its target was not packed",
                redirection.href
            ),
        }
    }
    rewritten
}

fn pack<W: Write + Seek>(
    writer: &XRefArchiveWriter<W>,
    root: &Location,
    mut major: XRefMap,
    minors: BTreeMap<String, Collected>,
) -> Result<(), BuildonomyError> {
    let mut names = HashMap::new();
    names.insert(root.key(), MAJOR_ENTRY_NAME.to_string());
    for (key, collected) in minors.iter() {
        let name = writer.reserve_minor(candidate_names(&collected.location))?;
        tracing::debug!("[XRefArchiveBuilder] {key} packs as {name}");
        names.insert(key.clone(), name);
    }

    for (key, mut collected) in minors {
        collected.map.redirections =
            rewrite_redirections(&collected.location, &collected.map.redirections, &names);
        let name = names.get(&key).ok_or_else(|| {
            BuildonomyError::Archive(format!("No entry name was reserved for {key}"))
        })?;
        writer.write_reserved(name, &collected.map)?;
    }

    major.redirections = rewrite_redirections(root, &major.redirections, &names);
    writer.create_major(&major)?;
    Ok(())
}

/// Archive export entry point: pack `root` and everything it redirects to into `output`.
pub async fn pack_to_archive(
    root: &Location,
    output: &Path,
    downloader: Arc<XRefMapDownloader>,
    cancel: &CancellationToken,
) -> Result<(), BuildonomyError> {
    XRefArchiveBuilder::new(downloader)
        .download(root, output, cancel)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_names() {
        let remote = Location::parse("https://docs.example.org/dotnet/xrefmap.yml").unwrap();
        assert_eq!(
            candidate_names(&remote),
            vec!["xrefmap.yml".to_string(), "dotnet-xrefmap.yml".to_string()]
        );
        let top = Location::parse("https://docs.example.org/xrefmap.yml").unwrap();
        assert_eq!(candidate_names(&top)[1], "docs.example.org-xrefmap.yml");
        let local = Location::parse("maps/core.yml").unwrap();
        assert_eq!(
            candidate_names(&local),
            vec!["core.yml".to_string(), "maps-core.yml".to_string()]
        );
        let bare = Location::parse("core.yml").unwrap();
        assert_eq!(candidate_names(&bare), vec!["core.yml".to_string()]);
    }

    #[test]
    fn test_rewrite_coalesces_and_drops() {
        let location = Location::parse("maps/root.yml").unwrap();
        let names = HashMap::from([
            ("maps/a.yml".to_string(), "a.yml".to_string()),
            ("maps/root.yml".to_string(), MAJOR_ENTRY_NAME.to_string()),
        ]);
        let redirections = vec![
            XRefMapRedirection::new(Some("A.".to_string()), "a.yml"),
            XRefMapRedirection::new(None, "./sub/../a.yml"),
            XRefMapRedirection::new(None, ""),
            XRefMapRedirection::new(None, "missing.yml"),
            XRefMapRedirection::new(None, "root.yml"),
        ];
        let rewritten = rewrite_redirections(&location, &redirections, &names);
        assert_eq!(
            rewritten,
            vec![
                XRefMapRedirection::new(Some("A.".to_string()), "a.yml"),
                XRefMapRedirection::new(None, "a.yml"),
                XRefMapRedirection::new(None, MAJOR_ENTRY_NAME),
            ]
        );
    }

    #[test]
    fn test_prepare_resolves_remote_hrefs_and_sorts() {
        let location = Location::parse("https://docs.example.org/api/xrefmap.yml").unwrap();
        let map = XRefMap::from_yaml(
            "references:\n  - uid: B\n    href: b.html\n  - uid: A\n    href: https://other.org/a.html\n",
        )
        .unwrap();
        let prepared = prepare(&location, map).unwrap();
        assert_eq!(prepared.sorted, Some(true));
        assert_eq!(prepared.href_updated, Some(true));
        let refs = prepared.references.as_ref().unwrap();
        assert_eq!(refs[0].uid, "A");
        assert_eq!(refs[1].href, "https://docs.example.org/api/b.html");

        let local = prepare(&Location::parse("maps/x.yml").unwrap(), prepared.clone()).unwrap();
        assert_eq!(local, prepared);
    }
}
