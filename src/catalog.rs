//! The `origin,abbr` file mapping scraped cartridge names to the short
//! labels drawn next to chart markers.  Abbreviations are filled in by hand,
//! so the file is only ever appended to.

use std::{
    collections::HashSet,
    io::{self, ErrorKind, Write},
    path::Path,
};

use derive_more::{AsRef, Display, From};
use indexmap::IndexMap;
use log::info;
use serde::{Deserialize, Serialize};

use crate::dataset::AmmoName;

#[derive(Clone, Default, PartialEq, Eq, Debug, From, AsRef, Display, Serialize, Deserialize)]
#[as_ref(forward)]
pub struct Abbreviation(String);

impl Abbreviation {
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Entry {
    origin: AmmoName,
    #[serde(default)]
    abbr: Abbreviation,
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("An I/O error occurred on the name catalog: {0}")]
    File(#[from] io::Error),
    #[error("The name catalog could not be read or written: {0}")]
    Csv(#[from] csv::Error),
}

#[derive(Clone, Default, PartialEq, Eq, Debug)]
pub struct NameCatalog {
    entries: IndexMap<AmmoName, Abbreviation>,
}

/// Names in `discovered` that `existing` does not know yet, each once, in
/// discovery order.
pub fn new_names<'a>(
    existing: &NameCatalog,
    discovered: impl IntoIterator<Item = &'a AmmoName>,
) -> Vec<AmmoName> {
    let mut seen = HashSet::new();
    discovered
        .into_iter()
        .filter(|name| !existing.entries.contains_key(*name) && seen.insert(*name))
        .cloned()
        .collect()
}

impl NameCatalog {
    pub fn entries(&self) -> &IndexMap<AmmoName, Abbreviation> {
        &self.entries
    }

    /// The label for `name`, if one has been filled in.
    pub fn abbreviation(&self, name: &AmmoName) -> Option<&Abbreviation> {
        self.entries.get(name).filter(|abbr| !abbr.is_empty())
    }

    /// Adds the unknown names of `discovered` with an empty abbreviation and
    /// returns them.  Known entries are left as they are.
    pub fn reconcile<'a>(
        &mut self,
        discovered: impl IntoIterator<Item = &'a AmmoName>,
    ) -> Vec<AmmoName> {
        let added = new_names(self, discovered);
        for name in &added {
            self.entries.insert(name.clone(), Abbreviation::default());
        }
        added
    }

    pub fn read_from<R: io::Read>(reader: R) -> Result<Self, CatalogError> {
        let mut entries = IndexMap::new();
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);
        for entry in reader.deserialize() {
            let Entry { origin, abbr } = entry?;
            entries.entry(origin).or_insert(abbr);
        }
        Ok(Self { entries })
    }

    /// Loads the catalog; a missing file is an empty catalog.
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        match fs_err::File::open(path) {
            Ok(file) => Self::read_from(io::BufReader::new(file)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Reconciles the file at `path` with `discovered`, writing only when
    /// there is something new.  Returns the updated catalog and the names
    /// that were appended.
    pub fn update_file<'a>(
        path: &Path,
        discovered: impl IntoIterator<Item = &'a AmmoName>,
    ) -> Result<(Self, Vec<AmmoName>), CatalogError> {
        let existing = match fs_err::read(path) {
            // A blank file has no header yet; it is written from scratch.
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => None,
            Ok(bytes) => Some(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };
        let mut catalog = match &existing {
            Some(bytes) => Self::read_from(&bytes[..])?,
            None => Self::default(),
        };
        let added = catalog.reconcile(discovered);

        match existing {
            None => {
                info!("Creating the name catalog at {path:?}");
                if let Some(parent) = path.parent() {
                    fs_err::create_dir_all(parent)?;
                }
                let mut writer = csv::Writer::from_writer(fs_err::File::create(path)?);
                writer.write_record(["origin", "abbr"])?;
                append_entries(&mut writer, &added)?;
            }
            Some(_) if added.is_empty() => {}
            Some(bytes) => {
                let mut file = fs_err::OpenOptions::new().append(true).open(path)?;
                if bytes.last().is_some_and(|&b| b != b'\n') {
                    file.write_all(b"\n")?;
                }
                let mut writer = csv::WriterBuilder::new()
                    .has_headers(false)
                    .from_writer(file);
                append_entries(&mut writer, &added)?;
            }
        }
        info!("{} new names added to {path:?}", added.len());
        Ok((catalog, added))
    }
}

fn append_entries<W: Write>(
    writer: &mut csv::Writer<W>,
    names: &[AmmoName],
) -> Result<(), CatalogError> {
    for name in names {
        writer.write_record([name.to_string(), String::new()])?;
    }
    writer.flush()?;
    Ok(())
}
