use std::path::PathBuf;

use clap::{Parser, Subcommand};
use eft_ammo_chart::{
    config::Config,
    page_cache::{HttpFetcher, PageCache},
    pipeline,
    publish::publish,
};

#[derive(Parser)]
struct Opts {
    /// TOML file overriding the default locations and exclusions.
    #[arg(long)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    sub: Option<Sub>,
}

#[derive(Clone, Default, Subcommand)]
enum Sub {
    /// Scrape the wiki, update the name catalog, draw the chart and publish the page.
    #[default]
    Run,
    /// Only add newly found cartridge names to the name catalog.
    Catalog,
    /// Embed the existing chart fragment into the page template.
    Publish,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    pretty_env_logger::init();

    let opts = Opts::parse();
    let config = Config::load_or_default(opts.config)?;
    match opts.sub.unwrap_or_default() {
        Sub::Run => {
            let cache = PageCache::new(&config, HttpFetcher::new()?);
            pipeline::run(&config, &cache).await?;
        }
        Sub::Catalog => {
            let cache = PageCache::new(&config, HttpFetcher::new()?);
            pipeline::update_catalog(&config, &cache).await?;
        }
        Sub::Publish => publish(&config.template_path, &config.plot_path, &config.page_path)?,
    }

    Ok(())
}
