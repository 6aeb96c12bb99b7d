use std::{
    future::Future,
    io::{self, ErrorKind},
    path::PathBuf,
};

use derive_more::{AsRef, Display, From};
use log::{debug, info};
use scraper::Html;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::Config;

/// The path component identifying a page within the wiki, e.g. `Ammunition`
/// or `7.62x39mm`.  Used both as the cache key and as the URL suffix.
#[derive(Clone, PartialEq, Eq, Hash, Debug, From, AsRef, Display, Serialize, Deserialize)]
#[as_ref(forward)]
pub struct ResourcePath(String);

/// Issues the actual GET request.  Only [`PageCache`] talks to this.
pub trait Fetch {
    fn get(&self, url: Url) -> impl Future<Output = reqwest::Result<String>>;
}

pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .connection_verbose(true)
            .build()?;
        Ok(Self { client })
    }
}

impl Fetch for HttpFetcher {
    async fn get(&self, url: Url) -> reqwest::Result<String> {
        self.client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PageCacheError {
    #[error("Failed to fetch {url}: {source}")]
    Network {
        url: Url,
        #[source]
        source: reqwest::Error,
    },
    #[error("Cannot build a url for {path:?}: {source}")]
    Url {
        path: ResourcePath,
        #[source]
        source: url::ParseError,
    },
    #[error("An I/O error occurred on the page cache: {0}")]
    File(#[from] io::Error),
}

/// Serves pages from `cache_dir`, going to the network only for pages that
/// have never been stored.  Entries are never invalidated; delete the file to
/// force a refetch.
pub struct PageCache<F> {
    base_url: Url,
    cache_dir: PathBuf,
    fetcher: F,
}

impl<F: Fetch> PageCache<F> {
    pub fn new(config: &Config, fetcher: F) -> Self {
        Self {
            base_url: config.base_url.clone(),
            cache_dir: config.cache_dir.clone(),
            fetcher,
        }
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    pub fn cache_file(&self, path: &ResourcePath) -> PathBuf {
        self.cache_dir
            .join(format!("{}.html", urlencoding::encode(path.as_ref())))
    }

    pub fn url(&self, path: &ResourcePath) -> Result<Url, PageCacheError> {
        let base = self.base_url.as_str().trim_end_matches('/');
        Url::parse(&format!("{base}/{path}")).map_err(|source| PageCacheError::Url {
            path: path.clone(),
            source,
        })
    }

    /// Returns the parsed page for `path`.
    ///
    /// The returned document is always read back from the cache file, so the
    /// first call and every later call see exactly the same markup.
    pub async fn fetch(&self, path: &ResourcePath) -> Result<Html, PageCacheError> {
        let file = self.cache_file(path);
        match fs_err::read_to_string(&file) {
            Ok(markup) => {
                debug!("Cache hit for {path:?} at {file:?}");
                return Ok(Html::parse_document(&markup));
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let url = self.url(path)?;
        info!("Fetching {url}");
        let body = self
            .fetcher
            .get(url.clone())
            .await
            .map_err(|source| PageCacheError::Network { url, source })?;
        let markup = Html::parse_document(&body).html();
        fs_err::create_dir_all(&self.cache_dir)?;
        fs_err::write(&file, markup)?;
        debug!("Stored {path:?} to {file:?}");

        Ok(Html::parse_document(&fs_err::read_to_string(&file)?))
    }
}
