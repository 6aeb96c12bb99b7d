use chrono::Local;
use log::info;

use crate::{
    catalog::NameCatalog,
    chart::write_fragment,
    config::Config,
    dataset::{Dataset, DatasetBuilder},
    page_cache::{Fetch, PageCache},
    publish::publish,
};

/// Scrapes, charts and publishes.  Names seen in the dataset are added to
/// the catalog before charting so that every point has a catalog entry.
pub async fn run<F: Fetch>(config: &Config, cache: &PageCache<F>) -> anyhow::Result<Dataset> {
    let dataset = DatasetBuilder::new(cache, config)
        .build(&config.index_path)
        .await?;
    dataset.save_csv(&config.dataset_path)?;
    let (catalog, _) = NameCatalog::update_file(&config.catalog_path, dataset.names())?;
    write_fragment(&config.plot_path, &dataset, &catalog)?;
    publish(&config.template_path, &config.plot_path, &config.page_path)?;
    info!("Finished. {}", Local::now());
    Ok(dataset)
}

/// Adds every cartridge name listed on the wiki to the catalog.
pub async fn update_catalog<F: Fetch>(
    config: &Config,
    cache: &PageCache<F>,
) -> anyhow::Result<NameCatalog> {
    let builder = DatasetBuilder::new(cache, config);
    let categories = builder.discover_categories(&config.index_path).await?;
    let names = builder.collect_names(&categories).await?;
    info!("Output ammo names to {:?}", config.catalog_path);
    let (catalog, _) = NameCatalog::update_file(&config.catalog_path, &names)?;
    Ok(catalog)
}
