use std::{
    collections::{BTreeSet, HashSet},
    io,
    path::Path,
    str::FromStr,
};

use anyhow::{anyhow, bail, Context};
use derive_more::{AsRef, Display, From};
use itertools::Itertools;
use log::info;
use scraper::Html;
use serde::{Deserialize, Serialize};
use strum::{EnumIter, IntoEnumIterator};

use crate::{
    config::Config,
    page_cache::{Fetch, PageCache, ResourcePath},
    regex, selector,
    table::{parse_table, CellValue, RawTable},
};

/// A caliber page on the wiki, by its display name (e.g. `9x19mm Parabellum`).
#[derive(
    Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Display, Serialize, Deserialize,
)]
#[serde(from = "String")]
pub struct Category(String);

impl Category {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into().trim().to_owned())
    }

    pub fn name(&self) -> &str {
        &self.0
    }

    /// Spaces are not part of wiki page paths; they become underscores.
    pub fn resource_path(&self) -> ResourcePath {
        self.0.replace(' ', "_").into()
    }
}

impl From<String> for Category {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

/// The exact name of a cartridge as scraped, used as the catalog key.
#[derive(
    Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, From, AsRef, Display, Serialize, Deserialize,
)]
#[as_ref(forward)]
pub struct AmmoName(String);

/// The overarching entity a category page belongs to.
#[derive(Clone, PartialEq, Eq, Debug, From, AsRef, Display, Serialize, Deserialize)]
#[as_ref(forward)]
pub struct ParentLabel(String);

/// Columns of the unified schema, in output order.
#[derive(Clone, Copy, PartialEq, Eq, Debug, EnumIter, strum::Display)]
pub enum Column {
    Icon,
    Name,
    Damage,
    PenetrationPower,
    #[strum(to_string = "ArmorDamage(%)")]
    ArmorDamage,
    #[strum(to_string = "Accuracy(%)")]
    Accuracy,
    #[strum(to_string = "Recoil(%)")]
    Recoil,
    FragmentationChance,
    RicochetChance,
    #[strum(to_string = "Speed(m/s)")]
    Speed,
    SpecialEffects,
    SoldBy,
    Ammunition,
    AmmoType,
}

impl Column {
    /// Number of columns a category's stat table must have.
    pub const STAT_COLUMNS: usize = 12;

    pub fn names() -> Vec<String> {
        Self::iter().map(|column| column.to_string()).collect()
    }
}

/// One cartridge.  Field order (and the serialized names) follow [`Column`].
#[derive(Clone, PartialEq, Debug, Serialize)]
pub struct AmmoRecord {
    #[serde(rename = "Icon")]
    pub icon: Option<CellValue>,
    #[serde(rename = "Name")]
    pub name: AmmoName,
    #[serde(rename = "Damage")]
    pub damage: Option<CellValue>,
    #[serde(rename = "PenetrationPower")]
    pub penetration_power: Option<CellValue>,
    #[serde(rename = "ArmorDamage(%)")]
    pub armor_damage: Option<CellValue>,
    #[serde(rename = "Accuracy(%)")]
    pub accuracy: Option<CellValue>,
    #[serde(rename = "Recoil(%)")]
    pub recoil: Option<CellValue>,
    #[serde(rename = "FragmentationChance")]
    pub fragmentation_chance: Option<CellValue>,
    #[serde(rename = "RicochetChance")]
    pub ricochet_chance: Option<CellValue>,
    #[serde(rename = "Speed(m/s)")]
    pub speed: Option<CellValue>,
    #[serde(rename = "SpecialEffects")]
    pub special_effects: Option<CellValue>,
    #[serde(rename = "SoldBy")]
    pub sold_by: Option<CellValue>,
    #[serde(rename = "Ammunition")]
    pub ammunition: ParentLabel,
    #[serde(rename = "AmmoType")]
    pub ammo_type: Category,
}

impl AmmoRecord {
    /// The value of `column` as shown to a reader; missing values become `-`.
    pub fn display(&self, column: Column) -> String {
        use Column::*;
        let cell = match column {
            Name => return self.name.to_string(),
            Ammunition => return self.ammunition.to_string(),
            AmmoType => return self.ammo_type.to_string(),
            Icon => &self.icon,
            Damage => &self.damage,
            PenetrationPower => &self.penetration_power,
            ArmorDamage => &self.armor_damage,
            Accuracy => &self.accuracy,
            Recoil => &self.recoil,
            FragmentationChance => &self.fragmentation_chance,
            RicochetChance => &self.ricochet_chance,
            Speed => &self.speed,
            SpecialEffects => &self.special_effects,
            SoldBy => &self.sold_by,
        };
        cell.as_ref()
            .map_or_else(|| "-".to_owned(), ToString::to_string)
    }

    /// Rewrites `<count>x<value>` stats into plain numbers.
    pub fn normalize_stats(&mut self) {
        for cell in [
            &mut self.damage,
            &mut self.penetration_power,
            &mut self.armor_damage,
            &mut self.accuracy,
            &mut self.recoil,
            &mut self.fragmentation_chance,
            &mut self.ricochet_chance,
            &mut self.speed,
        ] {
            normalize_stat(cell);
        }
    }

    /// Pages leave these cells blank when the value is "none".
    pub fn fill_missing(&mut self) {
        self.accuracy.get_or_insert(CellValue::Number(0.));
        self.recoil.get_or_insert(CellValue::Number(0.));
        self.special_effects
            .get_or_insert_with(|| CellValue::Text("-".to_owned()));
    }
}

/// A stat cell, which is either a plain number or, for shotgun-like rounds,
/// `<count>x<value>` meaning `value` applied `count` times.
#[derive(Clone, Copy, PartialEq, Debug)]
pub enum StatValue {
    Plain(f64),
    Repeated { count: u32, value: f64 },
}

impl StatValue {
    pub fn value(self) -> f64 {
        match self {
            Self::Plain(value) | Self::Repeated { value, .. } => value,
        }
    }

    pub fn from_cell(cell: &CellValue) -> Option<Self> {
        match cell {
            CellValue::Number(value) => Some(Self::Plain(*value)),
            CellValue::Text(text) => text.parse().ok(),
        }
    }
}

impl FromStr for StatValue {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        if let Some(captures) = regex!(r"^\s*(\d+)\s*[x×]\s*(\d+(?:\.\d+)?)\s*$").captures(s) {
            return Ok(Self::Repeated {
                count: captures[1].parse()?,
                value: captures[2].parse()?,
            });
        }
        match CellValue::parse(s) {
            Some(CellValue::Number(value)) => Ok(Self::Plain(value)),
            _ => bail!("Not a stat value: {s:?}"),
        }
    }
}

/// Replaces a parseable stat with its plain numeric value; leaves other
/// text (e.g. `20%`) untouched.
pub fn normalize_stat(cell: &mut Option<CellValue>) {
    if let Some(value) = cell.as_ref().and_then(StatValue::from_cell) {
        *cell = Some(CellValue::Number(value.value()));
    }
}

/// Maps a category's stat table positionally onto the unified schema.
pub fn rename_columns(
    table: RawTable,
    category: &Category,
    ammunition: &ParentLabel,
) -> anyhow::Result<Vec<AmmoRecord>> {
    if table.headers().len() != Column::STAT_COLUMNS {
        bail!(
            "The stat table of {category} has {} columns, expected {}: {:?}",
            table.headers().len(),
            Column::STAT_COLUMNS,
            table.headers()
        );
    }
    table
        .into_rows()
        .into_iter()
        .enumerate()
        .map(|(i, row)| {
            let cells: [Option<CellValue>; Column::STAT_COLUMNS] = row
                .try_into()
                .map_err(|row: Vec<_>| anyhow!("Row {i} of {category} has {} cells", row.len()))?;
            let [
                icon,
                name,
                damage,
                penetration_power,
                armor_damage,
                accuracy,
                recoil,
                fragmentation_chance,
                ricochet_chance,
                speed,
                special_effects,
                sold_by,
            ] = cells;
            let name = name
                .with_context(|| format!("Row {i} of {category} has no name"))?
                .to_string()
                .into();
            Ok(AmmoRecord {
                icon,
                name,
                damage,
                penetration_power,
                armor_damage,
                accuracy,
                recoil,
                fragmentation_chance,
                ricochet_chance,
                speed,
                special_effects,
                sold_by,
                ammunition: ammunition.clone(),
                ammo_type: category.clone(),
            })
        })
        .collect()
}

/// Category names from the `Name` column of every wikitable on the index page.
pub fn parse_categories(index: &Html) -> anyhow::Result<Vec<Category>> {
    let mut categories = vec![];
    for table in index.select(selector!("table.wikitable")) {
        let table = parse_table(table)?;
        for name in table.column("Name")?.flatten() {
            categories.push(Category::new(name.to_string()));
        }
    }
    Ok(categories)
}

pub fn parse_parent_label(page: &Html, link_title: &str) -> Option<ParentLabel> {
    page.select(selector!("a[title]"))
        .find(|a| a.value().attr("title") == Some(link_title))
        .map(|a| a.text().collect::<String>().split_whitespace().join(" ").into())
}

/// Records of one category page: the first table on the page, renamed,
/// tagged, normalized and with the known blanks filled.
pub fn parse_category_page(
    page: &Html,
    category: &Category,
    link_title: &str,
) -> anyhow::Result<Vec<AmmoRecord>> {
    let ammunition = parse_parent_label(page, link_title).with_context(|| {
        format!("Link titled {link_title:?} was not found on the page of {category}")
    })?;
    let table = page
        .select(selector!("table"))
        .next()
        .with_context(|| format!("No table was found on the page of {category}"))?;
    let table = parse_table(table)
        .with_context(|| format!("While reading the stat table of {category}"))?;
    let mut records = rename_columns(table, category, &ammunition)?;
    for record in &mut records {
        record.normalize_stats();
        record.fill_missing();
    }
    Ok(records)
}

/// Cartridge names from the first wikitable of a category page.
pub fn parse_ammo_names(page: &Html) -> anyhow::Result<Vec<AmmoName>> {
    let table = page
        .select(selector!("table.wikitable"))
        .next()
        .context("No wikitable was found")?;
    Ok(parse_table(table)?
        .column("Name")?
        .flatten()
        .map(|name| name.to_string().into())
        .collect())
}

#[derive(Clone, Default, PartialEq, Debug)]
pub struct Dataset {
    records: Vec<AmmoRecord>,
}

impl Dataset {
    pub fn records(&self) -> &[AmmoRecord] {
        &self.records
    }

    /// Categories in the order they were added.
    pub fn categories(&self) -> Vec<&Category> {
        self.records.iter().map(|r| &r.ammo_type).unique().collect()
    }

    pub fn by_category<'a>(
        &'a self,
        category: &'a Category,
    ) -> impl Iterator<Item = &'a AmmoRecord> + 'a {
        self.records.iter().filter(move |r| &r.ammo_type == category)
    }

    pub fn names(&self) -> impl Iterator<Item = &AmmoName> {
        self.records.iter().map(|r| &r.name)
    }

    pub fn extend(&mut self, records: impl IntoIterator<Item = AmmoRecord>) {
        self.records.extend(records);
    }

    pub fn write_csv<W: io::Write>(&self, writer: W) -> csv::Result<()> {
        let mut writer = csv::Writer::from_writer(writer);
        if self.records.is_empty() {
            writer.write_record(Column::names())?;
        }
        for record in &self.records {
            writer.serialize(record)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn save_csv(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs_err::create_dir_all(parent)?;
        }
        self.write_csv(io::BufWriter::new(fs_err::File::create(path)?))
            .with_context(|| format!("While writing the dataset to {path:?}"))?;
        info!("Wrote {} records to {path:?}", self.records.len());
        Ok(())
    }
}

pub struct DatasetBuilder<'a, F> {
    cache: &'a PageCache<F>,
    excluded: &'a BTreeSet<Category>,
    parent_link_title: &'a str,
}

impl<'a, F: Fetch> DatasetBuilder<'a, F> {
    pub fn new(cache: &'a PageCache<F>, config: &'a Config) -> Self {
        Self {
            cache,
            excluded: &config.excluded_categories,
            parent_link_title: &config.parent_link_title,
        }
    }

    pub async fn discover_categories(&self, index: &ResourcePath) -> anyhow::Result<Vec<Category>> {
        info!("Retrieve ammo types from {}", self.cache.url(index)?);
        let page = self.cache.fetch(index).await?;
        let categories = parse_categories(&page)
            .with_context(|| format!("While reading categories from {index:?}"))?;
        info!("{} categories found", categories.len());
        Ok(categories)
    }

    pub async fn category_records(&self, category: &Category) -> anyhow::Result<Vec<AmmoRecord>> {
        let page = self.cache.fetch(&category.resource_path()).await?;
        parse_category_page(&page, category, self.parent_link_title)
    }

    /// Fetches every non-excluded category listed on `index` and
    /// concatenates their records in discovery order.
    pub async fn build(&self, index: &ResourcePath) -> anyhow::Result<Dataset> {
        let mut dataset = Dataset::default();
        for category in self.discover_categories(index).await? {
            if self.excluded.contains(&category) {
                info!("Skipping {category}: its stat table has a different layout");
                continue;
            }
            let records = self.category_records(&category).await?;
            info!("{category}: {} records", records.len());
            dataset.extend(records);
        }
        Ok(dataset)
    }

    /// Names listed on every category page, excluded ones included.
    pub async fn collect_names(&self, categories: &[Category]) -> anyhow::Result<Vec<AmmoName>> {
        let mut seen = HashSet::new();
        let mut names = vec![];
        for category in categories {
            let page = self.cache.fetch(&category.resource_path()).await?;
            let found = parse_ammo_names(&page)
                .with_context(|| format!("While reading ammo names of {category}"))?;
            names.extend(found.into_iter().filter(|name| seen.insert(name.clone())));
        }
        info!("{} names extracted", names.len());
        Ok(names)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use itertools::Itertools;
    use scraper::Html;

    use super::{
        normalize_stat, parse_categories, parse_category_page, AmmoName, Category, Column,
        Dataset, DatasetBuilder, StatValue,
    };
    use crate::{
        page_cache::{
            tests::{config_in, FakeWiki},
            PageCache, ResourcePath,
        },
        table::CellValue,
    };

    pub const STAT_HEADER: &str = "<tr><th>Icon</th><th>Name</th><th>Damage</th>\
        <th>Penetration power</th><th>Armor damage %</th><th>Accuracy %</th>\
        <th>Recoil %</th><th>Fragmentation chance</th><th>Ricochet chance</th>\
        <th>Speed m/s</th><th>Special effects</th><th>Sold by</th></tr>";

    pub fn index_page(categories: &[&str]) -> String {
        let rows = categories
            .iter()
            .map(|c| format!("<tr><td></td><td><a>{c}</a></td></tr>"))
            .join("");
        format!(
            r#"<html><body><table class="wikitable"><tr><th>Icon</th><th>Name</th></tr>{rows}</table></body></html>"#
        )
    }

    /// `rows` are the cells after the icon column.
    pub fn category_page(parent: &str, rows: &[[&str; 11]]) -> String {
        let rows = rows
            .iter()
            .map(|cells| {
                let cells = cells.iter().map(|c| format!("<td>{c}</td>")).join("");
                format!("<tr><td><img src=\"icon.png\"></td>{cells}</tr>")
            })
            .join("");
        format!(
            r#"<html><body><p>Part of <a href="/wiki/Ammunition" title="Ammunition">{parent}</a></p>
            <table class="wikitable">{STAT_HEADER}{rows}</table></body></html>"#
        )
    }

    fn record_row<'a>(name: &'a str, damage: &'a str) -> [&'a str; 11] {
        [name, damage, "30", "40", "", "5", "20%", "10%", "900", "", "Prapor"]
    }

    #[test]
    fn test_stat_value() {
        assert_eq!(
            "8x22".parse::<StatValue>().unwrap(),
            StatValue::Repeated {
                count: 8,
                value: 22.
            }
        );
        assert_eq!("14".parse::<StatValue>().unwrap(), StatValue::Plain(14.));
        assert_eq!("8x22".parse::<StatValue>().unwrap().value(), 22.);
        assert!("Tracer".parse::<StatValue>().is_err());
    }

    #[test]
    fn test_normalize_stat() {
        let mut cell = Some(CellValue::Text("8x22".to_owned()));
        normalize_stat(&mut cell);
        assert_eq!(cell, Some(CellValue::Number(22.)));

        let mut cell = Some(CellValue::Text("14".to_owned()));
        normalize_stat(&mut cell);
        assert_eq!(cell, Some(CellValue::Number(14.)));

        let mut cell = Some(CellValue::Number(14.));
        normalize_stat(&mut cell);
        assert_eq!(cell, Some(CellValue::Number(14.)));

        let mut cell = Some(CellValue::Text("20%".to_owned()));
        normalize_stat(&mut cell);
        assert_eq!(cell, Some(CellValue::Text("20%".to_owned())));

        let mut cell = None;
        normalize_stat(&mut cell);
        assert_eq!(cell, None);
    }

    #[test]
    fn test_category_resource_path() {
        let category = Category::new(" 40x46 mm ");
        assert_eq!(category.name(), "40x46 mm");
        assert_eq!(
            category.resource_path(),
            ResourcePath::from("40x46_mm".to_owned())
        );
    }

    #[test]
    fn test_parse_categories() {
        let html = Html::parse_document(&index_page(&["Pistol ammo", "Rifle ammo"]));
        assert_eq!(
            parse_categories(&html).unwrap(),
            [Category::new("Pistol ammo"), Category::new("Rifle ammo")]
        );
    }

    #[test]
    fn test_parse_category_page() {
        let html = Html::parse_document(&category_page(
            "Pistol cartridges",
            &[record_row("9mm FMJ", "58"), record_row("9mm Buck", "8x22")],
        ));
        let category = Category::new("Pistol ammo");
        let records = parse_category_page(&html, &category, "Ammunition").unwrap();
        assert_eq!(records.len(), 2);

        let first = &records[0];
        assert_eq!(first.name, AmmoName::from("9mm FMJ".to_owned()));
        assert_eq!(first.icon, None);
        assert_eq!(first.damage, Some(CellValue::Number(58.)));
        assert_eq!(first.accuracy, Some(CellValue::Number(0.)));
        assert_eq!(first.recoil, Some(CellValue::Number(5.)));
        assert_eq!(first.special_effects, Some(CellValue::Text("-".to_owned())));
        assert_eq!(first.ammunition.to_string(), "Pistol cartridges");
        assert_eq!(first.ammo_type, category);

        assert_eq!(records[1].damage, Some(CellValue::Number(22.)));
        assert_eq!(records[1].display(Column::Damage), "22");
        assert_eq!(records[1].display(Column::SoldBy), "Prapor");
    }

    #[test]
    fn test_later_tables_do_not_affect_the_stat_table() {
        let page = category_page("Pistol cartridges", &[record_row("9mm FMJ", "58")]).replace(
            "</body>",
            r#"<table class="navbox"><tr><td>See also</td><td>links</td></tr></table></body>"#,
        );
        let records = parse_category_page(
            &Html::parse_document(&page),
            &Category::new("Pistol ammo"),
            "Ammunition",
        )
        .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, AmmoName::from("9mm FMJ".to_owned()));
    }

    #[test]
    fn test_missing_parent_link_is_an_error() {
        let page = category_page("Pistol cartridges", &[record_row("9mm FMJ", "58")])
            .replace("title=\"Ammunition\"", "title=\"Weapons\"");
        let err = parse_category_page(
            &Html::parse_document(&page),
            &Category::new("Pistol ammo"),
            "Ammunition",
        )
        .unwrap_err();
        assert!(err.to_string().contains("Pistol ammo"), "{err:#}");
    }

    #[test]
    fn test_wrong_column_count_is_an_error() {
        let page = r#"<a title="Ammunition">Ammo</a>
            <table><tr><th>Name</th><th>Damage</th></tr><tr><td>A</td><td>1</td></tr></table>"#;
        assert!(parse_category_page(
            &Html::parse_document(page),
            &Category::new("Flares"),
            "Ammunition"
        )
        .is_err());
    }

    fn two_category_wiki() -> FakeWiki {
        FakeWiki::default()
            .with_page(
                "Ammunition",
                &index_page(&["Pistol ammo", "40x46 mm", "Rifle ammo"]),
            )
            .with_page(
                "Pistol_ammo",
                &category_page("Pistol", &[record_row("9mm FMJ", "58")]),
            )
            .with_page(
                "Rifle_ammo",
                &category_page(
                    "Rifle",
                    &[record_row("5.56 FMJ", "54"), record_row("5.56 Buck", "3x40")],
                ),
            )
    }

    #[tokio::test]
    async fn test_build_skips_excluded_and_keeps_order() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let cache = PageCache::new(&config, two_category_wiki());
        let dataset = DatasetBuilder::new(&cache, &config)
            .build(&config.index_path)
            .await
            .unwrap();

        assert_eq!(
            dataset.names().map(ToString::to_string).collect_vec(),
            ["9mm FMJ", "5.56 FMJ", "5.56 Buck"]
        );
        assert_eq!(
            dataset.categories(),
            [&Category::new("Pistol ammo"), &Category::new("Rifle ammo")]
        );
        assert_eq!(dataset.by_category(&Category::new("Rifle ammo")).count(), 2);
        // The excluded category's page was never requested.
        assert!(cache
            .fetcher()
            .requests()
            .iter()
            .all(|url| !url.path().contains("40x46")));
    }

    #[tokio::test]
    async fn test_dataset_schema_is_uniform() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let cache = PageCache::new(&config, two_category_wiki());
        let dataset = DatasetBuilder::new(&cache, &config)
            .build(&config.index_path)
            .await
            .unwrap();

        let mut buffer = vec![];
        dataset.write_csv(&mut buffer).unwrap();
        let mut reader = csv::Reader::from_reader(&buffer[..]);
        let headers = reader.headers().unwrap().iter().map(str::to_owned).collect_vec();
        assert_eq!(headers, Column::names());
        let records = reader.records().map(Result::unwrap).collect_vec();
        assert_eq!(records.len(), 3);
        assert!(records.iter().all(|r| r.len() == headers.len()));
        assert_eq!(&records[2][2], "40");
        assert_eq!(&records[2][13], "Rifle ammo");
    }

    #[test]
    fn test_empty_dataset_still_has_header() {
        let mut buffer = vec![];
        Dataset::default().write_csv(&mut buffer).unwrap();
        assert_eq!(
            String::from_utf8(buffer).unwrap().trim_end(),
            Column::names().join(",")
        );
    }

    #[tokio::test]
    async fn test_collect_names_deduplicates() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let wiki = two_category_wiki().with_page(
            "Other",
            &category_page("Other", &[record_row("9mm FMJ", "58")]),
        );
        let cache = PageCache::new(&config, wiki);
        let names = DatasetBuilder::new(&cache, &config)
            .collect_names(&[
                Category::new("Pistol ammo"),
                Category::new("Rifle ammo"),
                Category::new("Other"),
            ])
            .await
            .unwrap();
        assert_eq!(
            names.iter().map(ToString::to_string).collect_vec(),
            ["9mm FMJ", "5.56 FMJ", "5.56 Buck"]
        );
    }
}
