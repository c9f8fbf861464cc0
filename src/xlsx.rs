//! Minimal `.xlsx` package access: enough to read every sheet into a `Grid`
//! and to write edited cells back without disturbing anything else.
//!
//! Cell values are read with calamine. The package itself (sheet names to
//! worksheet parts, raw zip entries) is kept here so saving can patch parts.
//!
//! Saving rewrites only the worksheet parts that have edits. Inside those
//! parts only the edited `<c>` elements are replaced (keeping their style
//! index); new cells and rows are spliced in order. Every other zip entry is
//! copied through byte for byte.

use crate::grid::{Address, CellValue, Grid};
use anyhow::{anyhow, Context};
use calamine::{Data, Range, Reader, Xlsx};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader as XmlReader, Writer as XmlWriter};
use std::collections::{BTreeMap, HashMap};
use std::io::{Cursor, Read, Write};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const WORKBOOK_PART: &str = "xl/workbook.xml";
const WORKBOOK_RELS_PART: &str = "xl/_rels/workbook.xml.rels";

#[derive(Debug, Clone)]
struct Entry {
    name: String,
    data: Vec<u8>,
    is_dir: bool,
}

#[derive(Debug, Clone)]
pub struct Sheet {
    pub name: String,
    part: String,
    pub grid: Grid,
}

#[derive(Debug, Clone)]
pub struct Workbook {
    entries: Vec<Entry>,
    sheets: Vec<Sheet>,
}

impl Workbook {
    pub fn from_bytes(bytes: &[u8]) -> anyhow::Result<Self> {
        let mut archive = ZipArchive::new(Cursor::new(bytes)).context("not a zip package")?;
        let mut entries = Vec::with_capacity(archive.len());
        for i in 0..archive.len() {
            let mut file = archive
                .by_index(i)
                .with_context(|| format!("failed to read zip entry {i}"))?;
            let mut data = Vec::new();
            if !file.is_dir() {
                file.read_to_end(&mut data)
                    .with_context(|| format!("failed to read {}", file.name()))?;
            }
            entries.push(Entry {
                name: file.name().to_string(),
                data,
                is_dir: file.is_dir(),
            });
        }

        let find = |name: &str| entries.iter().find(|e| e.name == name).map(|e| &e.data);
        let workbook_xml = find(WORKBOOK_PART).ok_or_else(|| anyhow!("package has no {WORKBOOK_PART}"))?;
        let rels_xml =
            find(WORKBOOK_RELS_PART).ok_or_else(|| anyhow!("package has no {WORKBOOK_RELS_PART}"))?;

        let sheet_rids = parse_workbook_sheets(workbook_xml)?;
        let targets = parse_relationship_targets(rels_xml)?;
        let mut cells: Xlsx<_> = Xlsx::new(Cursor::new(bytes)).context("failed to open workbook")?;

        let mut sheets = Vec::with_capacity(sheet_rids.len());
        for (name, rid) in sheet_rids {
            let Some(target) = targets.get(&rid) else {
                continue;
            };
            let part = resolve_target(target);
            if find(&part).is_none() {
                return Err(anyhow!("sheet '{name}' points at missing part {part}"));
            }
            let range = cells
                .worksheet_range(&name)
                .with_context(|| format!("failed to read sheet '{name}'"))?;
            sheets.push(Sheet {
                name,
                part,
                grid: grid_from_range(&range),
            });
        }
        if sheets.is_empty() {
            return Err(anyhow!("workbook has no worksheets"));
        }

        Ok(Self { entries, sheets })
    }

    pub fn sheets(&self) -> &[Sheet] {
        &self.sheets
    }

    pub fn sheets_mut(&mut self) -> &mut [Sheet] {
        &mut self.sheets
    }

    /// Sheet by case-insensitive name, else by position.
    pub fn sheet_index(&self, name: &str, fallback: usize) -> Option<usize> {
        self.sheets
            .iter()
            .position(|s| s.name.trim().eq_ignore_ascii_case(name))
            .or_else(|| (fallback < self.sheets.len()).then_some(fallback))
    }

    pub fn grid(&self, name: &str, fallback: usize) -> Option<&Grid> {
        self.sheet_index(name, fallback).map(|i| &self.sheets[i].grid)
    }

    pub fn grid_mut(&mut self, name: &str, fallback: usize) -> Option<&mut Grid> {
        self.sheet_index(name, fallback)
            .map(move |i| &mut self.sheets[i].grid)
    }

    pub fn to_bytes(&self) -> anyhow::Result<Vec<u8>> {
        let mut patched: HashMap<&str, Vec<u8>> = HashMap::new();
        for sheet in &self.sheets {
            if !sheet.grid.has_edits() {
                continue;
            }
            let original = self
                .entries
                .iter()
                .find(|e| e.name == sheet.part)
                .ok_or_else(|| anyhow!("sheet part {} disappeared", sheet.part))?;
            let edits: BTreeMap<Address, String> = sheet
                .grid
                .edited()
                .map(|a| (a, sheet.grid.text(a)))
                .collect();
            let xml = patch_sheet_xml(&original.data, &edits)
                .with_context(|| format!("failed to patch sheet '{}'", sheet.name))?;
            patched.insert(sheet.part.as_str(), xml);
        }

        let mut out = ZipWriter::new(Cursor::new(Vec::new()));
        let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);
        for entry in &self.entries {
            if entry.is_dir {
                out.add_directory(entry.name.clone(), opts)
                    .with_context(|| format!("failed to add directory {}", entry.name))?;
                continue;
            }
            let data = patched
                .get(entry.name.as_str())
                .map(Vec::as_slice)
                .unwrap_or(&entry.data);
            out.start_file(entry.name.clone(), opts)
                .with_context(|| format!("failed to start entry {}", entry.name))?;
            out.write_all(data)
                .with_context(|| format!("failed to write entry {}", entry.name))?;
        }
        let cursor = out.finish().context("failed to finalize workbook")?;
        Ok(cursor.into_inner())
    }
}

fn attr(e: &BytesStart, key: &[u8]) -> anyhow::Result<Option<String>> {
    for a in e.attributes() {
        let a = a?;
        if a.key.as_ref() == key {
            return Ok(Some(a.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

fn parse_workbook_sheets(xml: &[u8]) -> anyhow::Result<Vec<(String, String)>> {
    let mut reader = XmlReader::from_reader(xml);
    let mut buf = Vec::new();
    let mut out = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"sheet" => {
                let name = attr(&e, b"name")?.unwrap_or_default();
                let mut rid = None;
                for a in e.attributes() {
                    let a = a?;
                    if a.key.local_name().as_ref() == b"id" && a.key.prefix().is_some() {
                        rid = Some(a.unescape_value()?.into_owned());
                    }
                }
                if let Some(rid) = rid {
                    out.push((name, rid));
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

fn parse_relationship_targets(xml: &[u8]) -> anyhow::Result<HashMap<String, String>> {
    let mut reader = XmlReader::from_reader(xml);
    let mut buf = Vec::new();
    let mut out = HashMap::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"Relationship" => {
                if let (Some(id), Some(target)) = (attr(&e, b"Id")?, attr(&e, b"Target")?) {
                    out.insert(id, target);
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

/// Relationship targets are relative to `xl/` unless absolute.
fn resolve_target(target: &str) -> String {
    let joined = match target.strip_prefix('/') {
        Some(abs) => abs.to_string(),
        None => format!("xl/{target}"),
    };
    let mut parts: Vec<&str> = Vec::new();
    for seg in joined.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }
    parts.join("/")
}

/// Cell values as calamine reports them; dates keep their serial number.
fn cell_value(data: &Data) -> Option<CellValue> {
    match data {
        Data::Empty => None,
        Data::String(s) | Data::DateTimeIso(s) | Data::DurationIso(s) => {
            Some(CellValue::Text(s.clone()))
        }
        Data::Float(n) => Some(CellValue::Number(*n)),
        Data::Int(n) => Some(CellValue::Number(*n as f64)),
        Data::Bool(b) => Some(CellValue::Bool(*b)),
        Data::DateTime(d) => Some(CellValue::Number(d.as_f64())),
        Data::Error(e) => Some(CellValue::Text(e.to_string())),
    }
}

fn grid_from_range(range: &Range<Data>) -> Grid {
    let mut grid = Grid::new();
    let Some((top, left)) = range.start() else {
        return grid;
    };
    for (row, col, data) in range.used_cells() {
        if let Some(v) = cell_value(data) {
            grid.load(Address::new(top + row as u32, left + col as u32), v);
        }
    }
    grid
}

/// Zero-based row index of a `<row>`; rows without `r` follow the previous.
fn row_number(e: &BytesStart, current: u32) -> anyhow::Result<u32> {
    match attr(e, b"r")? {
        Some(r) => {
            let n: u32 = r
                .trim()
                .parse()
                .map_err(|_| anyhow!("bad row number '{r}'"))?;
            n.checked_sub(1).ok_or_else(|| anyhow!("row number 0"))
        }
        None => Ok(current),
    }
}

fn cell_address(e: &BytesStart, row: u32, next_col: u32) -> anyhow::Result<Address> {
    match attr(e, b"r")? {
        Some(r) => Address::parse_a1(&r).ok_or_else(|| anyhow!("bad cell reference '{r}'")),
        None => Ok(Address::new(row, next_col)),
    }
}

struct SheetPatcher<'a> {
    writer: XmlWriter<Vec<u8>>,
    pending: BTreeMap<u32, BTreeMap<u32, &'a str>>,
    prefix: String,
}

impl<'a> SheetPatcher<'a> {
    fn name(&self, local: &str) -> String {
        format!("{}{}", self.prefix, local)
    }

    fn write_cell(&mut self, addr: Address, text: &str, style: Option<&str>) -> anyhow::Result<()> {
        let c_name = self.name("c");
        let mut c = BytesStart::new(c_name.as_str());
        let r = addr.to_string();
        c.push_attribute(("r", r.as_str()));
        if let Some(s) = style {
            c.push_attribute(("s", s));
        }
        if text.is_empty() {
            self.writer.write_event(Event::Empty(c))?;
            return Ok(());
        }
        c.push_attribute(("t", "inlineStr"));
        self.writer.write_event(Event::Start(c))?;
        let is_name = self.name("is");
        let t_name = self.name("t");
        self.writer
            .write_event(Event::Start(BytesStart::new(is_name.as_str())))?;
        let mut t = BytesStart::new(t_name.as_str());
        if text.trim() != text {
            t.push_attribute(("xml:space", "preserve"));
        }
        self.writer.write_event(Event::Start(t))?;
        self.writer.write_event(Event::Text(BytesText::new(text)))?;
        self.writer
            .write_event(Event::End(BytesEnd::new(t_name.as_str())))?;
        self.writer
            .write_event(Event::End(BytesEnd::new(is_name.as_str())))?;
        self.writer
            .write_event(Event::End(BytesEnd::new(c_name.as_str())))?;
        Ok(())
    }

    /// Emit pending cells of `row` with column < `before`.
    fn flush_cells(&mut self, row: u32, cells: &mut BTreeMap<u32, &'a str>, before: u32) -> anyhow::Result<()> {
        let cols: Vec<u32> = cells.range(..before).map(|(c, _)| *c).collect();
        for col in cols {
            if let Some(text) = cells.remove(&col) {
                self.write_cell(Address::new(row, col), text, None)?;
            }
        }
        Ok(())
    }

    /// Emit whole new rows for pending rows < `before`.
    fn flush_rows(&mut self, before: u32) -> anyhow::Result<()> {
        let rows: Vec<u32> = self.pending.range(..before).map(|(r, _)| *r).collect();
        for row in rows {
            let Some(mut cells) = self.pending.remove(&row) else {
                continue;
            };
            let row_name = self.name("row");
            let mut start = BytesStart::new(row_name.as_str());
            let r = (row + 1).to_string();
            start.push_attribute(("r", r.as_str()));
            self.writer.write_event(Event::Start(start))?;
            self.flush_cells(row, &mut cells, u32::MAX)?;
            self.writer
                .write_event(Event::End(BytesEnd::new(row_name.as_str())))?;
        }
        Ok(())
    }
}

/// `<row>` start tag without its `spans` hint, which new cells may invalidate.
fn row_without_spans(e: &BytesStart) -> anyhow::Result<BytesStart<'static>> {
    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    let mut out = BytesStart::new(name);
    for a in e.attributes() {
        let a = a?;
        if a.key.as_ref() != b"spans" {
            out.push_attribute(a);
        }
    }
    Ok(out)
}

fn patch_sheet_xml(xml: &[u8], edits: &BTreeMap<Address, String>) -> anyhow::Result<Vec<u8>> {
    let mut pending: BTreeMap<u32, BTreeMap<u32, &str>> = BTreeMap::new();
    for (addr, text) in edits {
        pending
            .entry(addr.row)
            .or_default()
            .insert(addr.col, text.as_str());
    }

    let mut reader = XmlReader::from_reader(xml);
    reader.config_mut().trim_text(false);
    let mut p = SheetPatcher {
        writer: XmlWriter::new(Vec::new()),
        pending,
        prefix: String::new(),
    };
    let mut buf = Vec::new();
    let mut in_sheet_data = false;
    let mut row: u32 = 0;
    let mut next_col: u32 = 0;
    let mut row_cells: BTreeMap<u32, &str> = BTreeMap::new();
    let mut skip_depth: usize = 0;

    loop {
        let event = reader.read_event_into(&mut buf)?;
        if skip_depth > 0 {
            match event {
                Event::Start(_) => skip_depth += 1,
                Event::End(_) => skip_depth -= 1,
                Event::Eof => return Err(anyhow!("unexpected end of worksheet")),
                _ => {}
            }
            buf.clear();
            continue;
        }
        match event {
            Event::Start(e) if e.local_name().as_ref() == b"sheetData" => {
                let full = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                p.prefix = full.trim_end_matches("sheetData").to_string();
                in_sheet_data = true;
                p.writer.write_event(Event::Start(e.into_owned()))?;
            }
            Event::Empty(e) if e.local_name().as_ref() == b"sheetData" => {
                let full = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                p.prefix = full.trim_end_matches("sheetData").to_string();
                p.writer.write_event(Event::Start(e.into_owned()))?;
                p.flush_rows(u32::MAX)?;
                p.writer.write_event(Event::End(BytesEnd::new(full)))?;
            }
            Event::End(e) if e.local_name().as_ref() == b"sheetData" => {
                p.flush_rows(u32::MAX)?;
                in_sheet_data = false;
                p.writer.write_event(Event::End(e.into_owned()))?;
            }
            Event::Start(e) if in_sheet_data && e.local_name().as_ref() == b"row" => {
                row = row_number(&e, row)?;
                next_col = 0;
                p.flush_rows(row)?;
                row_cells = p.pending.remove(&row).unwrap_or_default();
                if row_cells.is_empty() {
                    p.writer.write_event(Event::Start(e.into_owned()))?;
                } else {
                    p.writer.write_event(Event::Start(row_without_spans(&e)?))?;
                }
            }
            Event::Empty(e) if in_sheet_data && e.local_name().as_ref() == b"row" => {
                row = row_number(&e, row)?;
                p.flush_rows(row)?;
                match p.pending.remove(&row) {
                    Some(mut cells) => {
                        let start = row_without_spans(&e)?;
                        let end_name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                        p.writer.write_event(Event::Start(start))?;
                        p.flush_cells(row, &mut cells, u32::MAX)?;
                        p.writer.write_event(Event::End(BytesEnd::new(end_name)))?;
                    }
                    None => p.writer.write_event(Event::Empty(e.into_owned()))?,
                }
                row += 1;
            }
            Event::End(e) if in_sheet_data && e.local_name().as_ref() == b"row" => {
                let mut cells = std::mem::take(&mut row_cells);
                p.flush_cells(row, &mut cells, u32::MAX)?;
                p.writer.write_event(Event::End(e.into_owned()))?;
                row += 1;
            }
            Event::Start(e) if in_sheet_data && e.local_name().as_ref() == b"c" => {
                let addr = cell_address(&e, row, next_col)?;
                next_col = addr.col + 1;
                let mut cells = std::mem::take(&mut row_cells);
                p.flush_cells(row, &mut cells, addr.col)?;
                match cells.remove(&addr.col) {
                    Some(text) => {
                        p.write_cell(addr, text, attr(&e, b"s")?.as_deref())?;
                        skip_depth = 1;
                    }
                    None => p.writer.write_event(Event::Start(e.into_owned()))?,
                }
                row_cells = cells;
            }
            Event::Empty(e) if in_sheet_data && e.local_name().as_ref() == b"c" => {
                let addr = cell_address(&e, row, next_col)?;
                next_col = addr.col + 1;
                let mut cells = std::mem::take(&mut row_cells);
                p.flush_cells(row, &mut cells, addr.col)?;
                match cells.remove(&addr.col) {
                    Some(text) => p.write_cell(addr, text, attr(&e, b"s")?.as_deref())?,
                    None => p.writer.write_event(Event::Empty(e.into_owned()))?,
                }
                row_cells = cells;
            }
            Event::Eof => break,
            other => p.writer.write_event(other.into_owned())?,
        }
        buf.clear();
    }

    Ok(p.writer.into_inner())
}
