//! CS2 `.cs2` config file adapter
//!
//! The files are line oriented: a bare section name (`lokomotive`, `artikel`)
//! opens a record, `.key=value` lines set fields on it, `..key=value` lines
//! belong to nested lists (function tables) and are skipped here.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::debug;

use super::{article_uid, CatalogSource, DecoderType, LocoEntry, SwitchArticle};
use crate::error::CatalogError;

/// `lokomotive.cs2` as a catalog source
#[derive(Debug, Clone)]
pub struct LocoFile {
    path: PathBuf,
}

impl LocoFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and parse the file
    pub fn read(&self) -> Result<Vec<LocoEntry>, CatalogError> {
        parse_locomotives(&read_lossy(&self.path)?)
    }
}

impl CatalogSource for LocoFile {
    fn marker(&self) -> Option<SystemTime> {
        let meta = fs::metadata(&self.path).ok()?;
        if !meta.is_file() {
            return None;
        }
        meta.modified().ok()
    }

    fn load(&self) -> anyhow::Result<Vec<LocoEntry>> {
        Ok(self.read()?)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// `magnetartikel.cs2`, the switch article list
#[derive(Debug, Clone)]
pub struct ArticleFile {
    path: PathBuf,
}

impl ArticleFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and parse the file
    pub fn read(&self) -> Result<Vec<SwitchArticle>, CatalogError> {
        Ok(parse_articles(&read_lossy(&self.path)?))
    }
}

fn read_lossy(path: &Path) -> Result<String, CatalogError> {
    let bytes = fs::read(path).map_err(|source| CatalogError::Io {
        path: path.display().to_string(),
        source,
    })?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Parse an integer field: `0x` prefix for hex, plain digits otherwise
fn parse_int(value: &str) -> Option<u32> {
    let value = value.trim();
    match value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
    {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => value.parse().ok(),
    }
}

/// Split a `.key=value` line; `None` for nested (`..`) lines and non-fields
fn field(line: &str) -> Option<(&str, &str)> {
    if line.starts_with("..") {
        return None;
    }
    let rest = line.strip_prefix('.')?;
    let (key, value) = rest.split_once('=')?;
    Some((key.trim(), value.trim()))
}

#[derive(Default)]
struct LocoDraft {
    line: usize,
    raw_uid: Option<String>,
    name: Option<String>,
    address: Option<u32>,
    icon: Option<String>,
}

impl LocoDraft {
    fn finish(self) -> Result<Option<LocoEntry>, CatalogError> {
        let Some(raw) = self.raw_uid else {
            debug!(line = self.line, "lokomotive without uid skipped");
            return Ok(None);
        };
        let uid = parse_int(&raw).ok_or_else(|| CatalogError::Parse {
            line: self.line,
            reason: format!("invalid uid '{}'", raw),
        })?;
        Ok(Some(LocoEntry {
            uid,
            name: self.name.unwrap_or_default(),
            address: self.address,
            icon: self.icon,
        }))
    }
}

/// Parse the contents of `lokomotive.cs2`
///
/// Records without a `.uid` are skipped; a `.uid` that is not an integer
/// fails the whole parse.
pub fn parse_locomotives(text: &str) -> Result<Vec<LocoEntry>, CatalogError> {
    let mut locos = Vec::new();
    let mut current: Option<LocoDraft> = None;

    for (n, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line == "lokomotive" {
            if let Some(draft) = current.take() {
                locos.extend(draft.finish()?);
            }
            current = Some(LocoDraft {
                line: n + 1,
                ..LocoDraft::default()
            });
            continue;
        }
        let Some(draft) = current.as_mut() else {
            continue;
        };
        let Some((key, value)) = field(line) else {
            continue;
        };
        match key {
            "uid" => {
                draft.line = n + 1;
                draft.raw_uid = Some(value.to_string());
            }
            "name" => draft.name = Some(value.to_string()),
            "adresse" | "address" => draft.address = parse_int(value),
            "icon" => draft.icon = Some(value.to_string()),
            _ => {}
        }
    }
    if let Some(draft) = current.take() {
        locos.extend(draft.finish()?);
    }

    Ok(locos)
}

/// Parse the contents of `magnetartikel.cs2`
///
/// Articles keep file order, so position in the result is the switch index.
/// Articles without a numeric `.id` keep their slot with no uid.
pub fn parse_articles(text: &str) -> Vec<SwitchArticle> {
    let mut articles = Vec::new();

    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        if !line.starts_with('.') {
            if line == "artikel" {
                articles.push(SwitchArticle {
                    id: 0,
                    dectyp: DecoderType::Other,
                    name: String::new(),
                    uid: None,
                });
            }
            continue;
        }
        let Some(article) = articles.last_mut() else {
            continue;
        };
        let Some((key, value)) = line.trim_start_matches('.').split_once('=') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "id" => article.id = parse_int(value).unwrap_or(0),
            "name" => article.name = value.to_string(),
            "dectyp" => article.dectyp = DecoderType::parse(value),
            _ => {}
        }
    }

    for article in &mut articles {
        article.uid = (article.id != 0).then(|| article_uid(article.id, article.dectyp));
    }
    articles
}
