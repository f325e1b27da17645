//! Destination workbook as an OOXML package
//!
//! The destination is held as its raw zip entries. Only the worksheet parts
//! being spliced (plus the calc chain bookkeeping) are rewritten; every other
//! entry is written back byte-for-byte, which keeps styles, charts, defined
//! names and the untouched sheets exactly as the user left them.

use std::collections::HashMap;
use std::fs;
use std::io::{Cursor, Read, Write};
use std::path::Path;

use anyhow::{Context, Result, bail};
use quick_xml::escape::unescape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::{Reader, Writer};
use tempfile::NamedTempFile;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const WORKBOOK_PART: &str = "xl/workbook.xml";
const WORKBOOK_RELS_PART: &str = "xl/_rels/workbook.xml.rels";
const CONTENT_TYPES_PART: &str = "[Content_Types].xml";
const CALC_CHAIN_PART: &str = "xl/calcChain.xml";

/// A sheet listed in xl/workbook.xml
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetEntry {
    pub name: String,
    /// Zip path of the worksheet part, e.g. "xl/worksheets/sheet2.xml"
    pub part: String,
}

/// Result of checking a workbook for required sheet names
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetValidation {
    pub is_valid: bool,
    pub missing_sheets: Vec<String>,
    pub available_sheets: Vec<String>,
    pub required_sheets: Vec<String>,
}

/// In-memory OOXML package (xlsx / xlsm)
#[derive(Debug, Clone)]
pub struct WorkbookPackage {
    entries: Vec<(String, Vec<u8>)>,
    sheets: Vec<SheetEntry>,
}

impl WorkbookPackage {
    /// Load a destination workbook from disk
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        check_extension(path)?;

        let bytes =
            fs::read(path).with_context(|| format!("Failed to read workbook: {}", path.display()))?;
        Self::from_bytes(bytes).with_context(|| format!("Failed to open workbook: {}", path.display()))
    }

    /// Load a workbook from raw xlsx bytes
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        let mut archive =
            ZipArchive::new(Cursor::new(bytes)).context("File is not an xlsx (zip) package")?;

        let mut entries = Vec::with_capacity(archive.len());
        for i in 0..archive.len() {
            let mut file = archive.by_index(i)?;
            if file.is_dir() {
                continue;
            }
            let name = file.name().to_string();
            let mut data = Vec::with_capacity(file.size() as usize);
            file.read_to_end(&mut data)
                .with_context(|| format!("Failed to read package entry: {}", name))?;
            entries.push((name, data));
        }

        let mut package = WorkbookPackage {
            entries,
            sheets: Vec::new(),
        };
        package.sheets = package.read_sheet_entries()?;

        log::debug!(
            "Opened workbook package with {} entries, sheets: {:?}",
            package.entries.len(),
            package.sheet_names()
        );
        Ok(package)
    }

    pub fn sheet_names(&self) -> Vec<String> {
        self.sheets.iter().map(|s| s.name.clone()).collect()
    }

    pub fn has_sheet(&self, name: &str) -> bool {
        self.sheets.iter().any(|s| s.name == name)
    }

    /// Zip path of the worksheet part backing `name`
    pub fn sheet_part(&self, name: &str) -> Option<&str> {
        self.sheets
            .iter()
            .find(|s| s.name == name)
            .map(|s| s.part.as_str())
    }

    pub fn part(&self, path: &str) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|(name, _)| name == path)
            .map(|(_, data)| data.as_slice())
    }

    /// Replace the contents of an existing part
    pub fn replace_part(&mut self, path: &str, data: Vec<u8>) -> Result<()> {
        match self.entries.iter_mut().find(|(name, _)| name == path) {
            Some(entry) => {
                entry.1 = data;
                Ok(())
            }
            None => bail!("Package part not found: {}", path),
        }
    }

    /// Check that every name in `required` exists as a sheet
    pub fn validate_required_sheets(&self, required: &[String]) -> SheetValidation {
        let available = self.sheet_names();
        let missing: Vec<String> = required
            .iter()
            .filter(|name| !available.contains(name))
            .cloned()
            .collect();

        SheetValidation {
            is_valid: missing.is_empty(),
            missing_sheets: missing,
            available_sheets: available,
            required_sheets: required.to_vec(),
        }
    }

    /// Remove the calculation chain so Excel rebuilds it on open.
    /// Returns whether a calc chain was present.
    pub fn drop_calc_chain(&mut self) -> Result<bool> {
        let before = self.entries.len();
        self.entries.retain(|(name, _)| name != CALC_CHAIN_PART);
        if self.entries.len() == before {
            return Ok(false);
        }

        if let Some(rels) = self.part(WORKBOOK_RELS_PART) {
            let rewritten = remove_elements(rels, b"Relationship", |e| {
                attr_value(e, b"Type").is_some_and(|t| t.ends_with("/calcChain"))
            })?;
            self.replace_part(WORKBOOK_RELS_PART, rewritten)?;
        }

        if let Some(types) = self.part(CONTENT_TYPES_PART) {
            let rewritten = remove_elements(types, b"Override", |e| {
                attr_value(e, b"PartName").as_deref() == Some("/xl/calcChain.xml")
            })?;
            self.replace_part(CONTENT_TYPES_PART, rewritten)?;
        }

        log::debug!("Dropped calculation chain from workbook package");
        Ok(true)
    }

    /// Serialize the package back into xlsx bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        for (name, data) in &self.entries {
            zip.start_file(name.as_str(), options)
                .with_context(|| format!("Failed to write package entry: {}", name))?;
            zip.write_all(data)?;
        }

        Ok(zip.finish()?.into_inner())
    }

    /// Write the package to `path` atomically (temp file in the same directory, then rename)
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        check_extension(path)?;

        let bytes = self.to_bytes()?;
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };

        let mut tmp = NamedTempFile::new_in(dir)
            .with_context(|| format!("Failed to create temp file in {}", dir.display()))?;
        tmp.write_all(&bytes)?;
        tmp.persist(path)
            .with_context(|| format!("Failed to save workbook: {}", path.display()))?;

        log::info!("Saved workbook to {} ({} bytes)", path.display(), bytes.len());
        Ok(())
    }

    fn read_sheet_entries(&self) -> Result<Vec<SheetEntry>> {
        let workbook = self
            .part(WORKBOOK_PART)
            .context("Workbook part xl/workbook.xml is missing")?;
        let rels = self
            .part(WORKBOOK_RELS_PART)
            .context("Workbook relationships xl/_rels/workbook.xml.rels are missing")?;

        let targets = read_relationship_targets(rels)?;

        let mut sheets = Vec::new();
        let mut reader = Reader::from_reader(workbook);
        let mut buf = Vec::new();
        loop {
            match reader.read_event_into(&mut buf)? {
                Event::Start(ref e) | Event::Empty(ref e) if e.local_name().as_ref() == b"sheet" => {
                    let name = attr_value(e, b"name").context("Sheet without a name")?;
                    let rel_id = e
                        .attributes()
                        .flatten()
                        .find(|a| a.key.local_name().as_ref() == b"id" && a.key.prefix().is_some())
                        .map(|a| String::from_utf8_lossy(&a.value).into_owned())
                        .with_context(|| format!("Sheet '{}' has no relationship id", name))?;
                    let part = targets
                        .get(&rel_id)
                        .with_context(|| format!("Sheet '{}' points at unknown part {}", name, rel_id))?;
                    sheets.push(SheetEntry {
                        name,
                        part: resolve_part_path(part),
                    });
                }
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }

        Ok(sheets)
    }
}

/// Only OOXML packages can be patched in place
fn check_extension(path: &Path) -> Result<()> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "xlsx" | "xlsm" => Ok(()),
        "xls" | "xlsb" => bail!(
            "{} is a binary .{} workbook; save it as .xlsx first",
            path.display(),
            ext
        ),
        _ => bail!("{} is not an .xlsx or .xlsm workbook", path.display()),
    }
}

/// Relationship Id -> Target
fn read_relationship_targets(rels: &[u8]) -> Result<HashMap<String, String>> {
    let mut targets = HashMap::new();
    let mut reader = Reader::from_reader(rels);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(ref e) | Event::Empty(ref e)
                if e.local_name().as_ref() == b"Relationship" =>
            {
                if let (Some(id), Some(target)) = (attr_value(e, b"Id"), attr_value(e, b"Target")) {
                    targets.insert(id, target);
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(targets)
}

/// Targets are relative to xl/ unless absolute within the package
fn resolve_part_path(target: &str) -> String {
    match target.strip_prefix('/') {
        Some(absolute) => absolute.to_string(),
        None => format!("xl/{}", target.trim_start_matches("./")),
    }
}

pub(crate) fn attr_value(e: &BytesStart, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == key)
        .map(|a| {
            let raw = String::from_utf8_lossy(&a.value);
            match unescape(&raw) {
                Ok(v) => v.into_owned(),
                Err(_) => raw.to_string(),
            }
        })
}

/// Stream `xml`, dropping every `tag` element for which `matches` is true
fn remove_elements(
    xml: &[u8],
    tag: &[u8],
    matches: impl Fn(&BytesStart) -> bool,
) -> Result<Vec<u8>> {
    let mut reader = Reader::from_reader(xml);
    let mut writer = Writer::new(Vec::with_capacity(xml.len()));
    let mut buf = Vec::new();
    let mut skip_depth = 0usize;

    loop {
        buf.clear();
        let event = reader.read_event_into(&mut buf)?;
        if skip_depth > 0 {
            match event {
                Event::Start(_) => skip_depth += 1,
                Event::End(_) => skip_depth -= 1,
                Event::Eof => break,
                _ => {}
            }
            continue;
        }

        match event {
            Event::Empty(ref e) if e.local_name().as_ref() == tag && matches(e) => {}
            Event::Start(ref e) if e.local_name().as_ref() == tag && matches(e) => {
                skip_depth = 1;
            }
            Event::Eof => break,
            other => writer.write_event(other)?,
        }
    }

    Ok(writer.into_inner())
}
