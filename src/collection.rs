//! Federation of xref maps: one reader over every configured map and every map those maps
//! redirect to.
//!
//! ## Building
//!
//! [XRefCollection::get_reader] downloads all configured locations concurrently and processes
//! them in completion order. Each fetched container is recorded under its location key, and
//! (unless its redirections are internal to it, as for archives) each of its redirections is
//! resolved against the container's own location and fetched too if its key has not been seen.
//! A location that fails to download is logged and dropped; it never fails the build.
//!
//! ## Resolving
//!
//! The resulting [XRefFederationReader] is rooted at a synthetic map holding one catch-all
//! redirection per recorded location, in recording order. Lookups therefore try every source in
//! discovery order, following each source's own (prefix scoped) redirections before moving on
//! to the next one. Since discovery order follows download completion, which source wins a uid
//! that several sources define is not specified beyond "first probed".
use futures::stream::{FuturesUnordered, StreamExt};
use std::{collections::HashMap, collections::HashSet, sync::Arc};
use tokio_util::sync::CancellationToken;

use crate::{
    downloader::XRefMapDownloader,
    error::BuildonomyError,
    location::Location,
    model::{XRefMap, XRefMapRedirection, XRefSpec},
    reader::{RedirectionReader, XRefContainer, XRefReader},
};

/// Key of the synthetic root map. Empty hrefs are never followed, so no redirection can reach it.
pub const FEDERATION_ROOT_KEY: &str = "";

pub type FederationTable = HashMap<String, Arc<dyn XRefContainer>>;

/// Reader over a whole federation, see the [module docs](self).
pub type XRefFederationReader = RedirectionReader<FederationTable>;

/// A fetched container whose redirection hrefs have been rewritten to federation keys.
struct FederatedContainer {
    inner: Arc<dyn XRefContainer>,
    redirections: Vec<XRefMapRedirection>,
}

impl XRefContainer for FederatedContainer {
    fn redirections(&self) -> &[XRefMapRedirection] {
        &self.redirections
    }

    fn is_embedded_redirections(&self) -> bool {
        self.inner.is_embedded_redirections()
    }

    fn reader(&self) -> &dyn XRefReader {
        self.inner.reader()
    }

    fn as_map(&self) -> Option<&XRefMap> {
        self.inner.as_map()
    }
}

pub struct XRefCollection {
    locations: Vec<Location>,
    downloader: Arc<XRefMapDownloader>,
}

impl XRefCollection {
    pub fn new(locations: Vec<Location>, downloader: Arc<XRefMapDownloader>) -> Self {
        XRefCollection {
            locations,
            downloader,
        }
    }

    pub fn locations(&self) -> &[Location] {
        &self.locations
    }

    async fn fetch(
        &self,
        location: Location,
        cancel: &CancellationToken,
    ) -> (Location, Result<Arc<dyn XRefContainer>, BuildonomyError>) {
        let result = self.downloader.download_cancellable(&location, cancel).await;
        (location, result)
    }

    #[tracing::instrument(skip_all, fields(locations = self.locations.len()))]
    pub async fn get_reader(&self, cancel: &CancellationToken) -> XRefFederationReader {
        let mut seen: HashSet<String> = HashSet::new();
        let mut order: Vec<String> = Vec::new();
        let mut table: FederationTable = HashMap::new();
        let mut in_flight = FuturesUnordered::new();

        for location in self.locations.iter() {
            if seen.insert(location.key()) {
                in_flight.push(self.fetch(location.clone(), cancel));
            }
        }

        let mut failed = 0usize;
        while let Some((location, result)) = in_flight.next().await {
            let container = match result {
                Ok(container) => container,
                Err(e) => {
                    failed += 1;
                    tracing::warn!("[XRefCollection] dropping xref map {location}: {e}");
                    continue;
                }
            };
            let mut redirections = Vec::new();
            if !container.is_embedded_redirections() {
                for redirection in container.redirections() {
                    if redirection.href.is_empty() {
                        continue;
                    }
                    let target = match location.resolve(&redirection.href) {
                        Ok(target) => target,
                        Err(e) => {
                            tracing::warn!(
                                "[XRefCollection] ignoring redirection '{}' in {location}: {e}",
                                redirection.href
                            );
                            continue;
                        }
                    };
                    let key = target.key();
                    redirections.push(XRefMapRedirection::new(
                        redirection.uid_prefix.clone(),
                        key.clone(),
                    ));
                    if seen.insert(key) {
                        tracing::debug!("[XRefCollection] following redirection to {target}");
                        in_flight.push(self.fetch(target, cancel));
                    }
                }
            }
            let key = location.key();
            order.push(key.clone());
            table.insert(
                key,
                Arc::new(FederatedContainer {
                    inner: container,
                    redirections,
                }),
            );
        }

        tracing::info!(
            "[XRefCollection] federation built from {} xref maps ({} unavailable)",
            order.len(),
            failed
        );
        federation_reader(order, table)
    }
}

/// Synthetic root of a federation: no references, one catch-all redirection per source.
struct FederationRoot {
    redirections: Vec<XRefMapRedirection>,
}

impl XRefReader for FederationRoot {
    fn find(&self, _uid: &str) -> Option<XRefSpec> {
        None
    }
}

impl XRefContainer for FederationRoot {
    fn redirections(&self) -> &[XRefMapRedirection] {
        &self.redirections
    }

    fn reader(&self) -> &dyn XRefReader {
        self
    }
}

/// Root the table at a synthetic map with one catch-all redirection per key, in `order`.
fn federation_reader(order: Vec<String>, mut table: FederationTable) -> XRefFederationReader {
    let root = FederationRoot {
        redirections: order
            .into_iter()
            .map(|key| XRefMapRedirection::new(None, key))
            .collect(),
    };
    table.insert(FEDERATION_ROOT_KEY.to_string(), Arc::new(root));
    let keys = table.keys().cloned().collect::<Vec<_>>();
    RedirectionReader::rooted(FEDERATION_ROOT_KEY, keys, table)
}

/// Build the federation reader for one build: fetch `locations` (and everything they redirect
/// to) with `downloader`.
pub async fn build_reader(
    locations: Vec<Location>,
    downloader: Arc<XRefMapDownloader>,
    cancel: &CancellationToken,
) -> XRefFederationReader {
    XRefCollection::new(locations, downloader)
        .get_reader(cancel)
        .await
}
