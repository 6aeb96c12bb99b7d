use std::{collections::BTreeSet, fmt::Debug, path::PathBuf};

use anyhow::Context;
use serde::Deserialize;
use typed_builder::TypedBuilder;
use url::Url;

use crate::{dataset::Category, page_cache::ResourcePath};

/// Everything the pipeline needs to know about where to read from and write to.
///
/// Every field has a default, so an empty (or absent) config file runs the
/// pipeline against the public wiki with the repository layout.
#[derive(Clone, Debug, TypedBuilder, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Root for all fetches; a resource path is appended after a `/`.
    #[builder(default = default_base_url())]
    pub base_url: Url,
    /// Filesystem root for persisted pages.
    #[builder(default = PathBuf::from("cache"))]
    pub cache_dir: PathBuf,
    /// Page listing every ammunition category.
    #[builder(default = ResourcePath::from("Ammunition".to_owned()))]
    pub index_path: ResourcePath,
    /// `title` attribute of the link naming the parent entity on a category page.
    #[builder(default = "Ammunition".to_owned())]
    pub parent_link_title: String,
    /// Categories whose stat tables do not fit the unified schema
    /// (heavy machine gun and grenade launcher rounds).
    #[builder(default = default_excluded_categories())]
    pub excluded_categories: BTreeSet<Category>,
    #[builder(default = PathBuf::from("data/ammo_names.csv"))]
    pub catalog_path: PathBuf,
    #[builder(default = PathBuf::from("data/ammo.csv"))]
    pub dataset_path: PathBuf,
    #[builder(default = PathBuf::from("templates/ammo_plot.html"))]
    pub plot_path: PathBuf,
    #[builder(default = PathBuf::from("templates/index.html"))]
    pub template_path: PathBuf,
    #[builder(default = PathBuf::from("docs/index.html"))]
    pub page_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Config {
    pub fn load<P: Into<PathBuf> + Debug>(path: P) -> anyhow::Result<Self> {
        let path = path.into();
        (|| toml::from_str(&fs_err::read_to_string(&path)?).map_err(anyhow::Error::new))()
            .with_context(|| format!("While trying to parse {path:?} as a config file"))
    }

    pub fn load_or_default(path: Option<PathBuf>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }
}

fn default_base_url() -> Url {
    Url::parse("https://escapefromtarkov.fandom.com/wiki").expect("the default base url is valid")
}

fn default_excluded_categories() -> BTreeSet<Category> {
    ["12.7x108mm", "30x29mm", "40x46 mm"]
        .into_iter()
        .map(Category::new)
        .collect()
}
