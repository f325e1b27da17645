//! Column range splice on raw worksheet XML
//!
//! The worksheet part is streamed through quick-xml. Inside `<sheetData>`
//! every cell whose column falls in the splice range is dropped and the
//! source cells for that range are written in their place; all other cells
//! and everything outside `<sheetData>` are re-emitted unchanged.
//!
//! Removing a shared formula's master cell would orphan its dependents, so
//! dependents outside the range are rewritten as explicit formulas.

use std::collections::{BTreeMap, HashMap};

use anyhow::{Context, Result, bail};
use quick_xml::escape::unescape;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use super::column::{ColumnRange, cell_ref, parse_cell_ref};
use super::formula::shift_formula;
use super::package::attr_value;
use super::source::{CellValue, SourceSheet};

/// Counters describing what a patch changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PatchStats {
    pub cells_removed: usize,
    pub cells_written: usize,
    pub rows_added: usize,
    /// Shared formula dependents rewritten as explicit formulas
    pub formulas_detached: usize,
}

/// An existing `<c>` element, buffered with all of its children
#[derive(Debug)]
struct ExistingCell {
    col: u32,
    has_ref: bool,
    events: Vec<Event<'static>>,
}

/// An existing `<row>` element
#[derive(Debug)]
struct ExistingRow {
    start: BytesStart<'static>,
    index: u32,
    has_ref: bool,
    cells: Vec<ExistingCell>,
    trailing: Vec<Event<'static>>,
}

type IncomingRows = BTreeMap<u32, Vec<(u32, CellValue)>>;

/// Shared formula master removed by the splice, keyed by `si`
#[derive(Debug)]
struct RemovedMaster {
    row: u32,
    col: u32,
    formula: String,
}

type RemovedMasters = HashMap<String, RemovedMaster>;

/// Replace the cells of `range` in a worksheet with the cells of `source`.
///
/// Source cells keep their absolute position: a value at C5 in the report
/// lands on C5 of the worksheet.
pub fn patch_sheet_xml(
    xml: &[u8],
    range: ColumnRange,
    source: &SourceSheet,
) -> Result<(Vec<u8>, PatchStats)> {
    let mut incoming = incoming_rows(source, range);
    let row_span = incoming
        .keys()
        .next()
        .copied()
        .zip(incoming.keys().next_back().copied());

    let mut reader = Reader::from_reader(xml);
    let mut writer = Writer::new(Vec::with_capacity(xml.len() + 64 * source.cells().count()));
    let mut buf = Vec::new();
    let mut stats = PatchStats::default();
    let mut prefix = String::new();
    let mut in_sheet_data = false;
    let mut saw_sheet_data = false;
    let mut implied_row = 0u32;
    let mut masters = RemovedMasters::new();

    loop {
        let event = reader.read_event_into(&mut buf)?.into_owned();
        buf.clear();

        match event {
            Event::Empty(ref e) if !in_sheet_data && e.local_name().as_ref() == b"dimension" => {
                writer.write_event(Event::Empty(extend_dimension(e, range, row_span)?))?;
            }
            Event::Start(ref e) if !in_sheet_data && e.local_name().as_ref() == b"sheetData" => {
                prefix = prefix_of(e);
                in_sheet_data = true;
                saw_sheet_data = true;
                writer.write_event(Event::Start(e.clone()))?;
            }
            Event::Empty(ref e) if !in_sheet_data && e.local_name().as_ref() == b"sheetData" => {
                prefix = prefix_of(e);
                saw_sheet_data = true;
                writer.write_event(Event::Start(e.clone()))?;
                write_new_rows(&mut writer, &prefix, std::mem::take(&mut incoming), &mut stats)?;
                writer.write_event(Event::End(BytesEnd::new(element_name(e))))?;
            }
            Event::End(ref e) if in_sheet_data && e.local_name().as_ref() == b"sheetData" => {
                write_new_rows(&mut writer, &prefix, std::mem::take(&mut incoming), &mut stats)?;
                in_sheet_data = false;
                writer.write_event(Event::End(e.clone()))?;
            }
            Event::Start(e) if in_sheet_data && e.local_name().as_ref() == b"row" => {
                let row = read_row(&mut reader, &mut buf, e, implied_row)?;
                implied_row = row.index + 1;
                flush_rows_before(&mut writer, &prefix, &mut incoming, row.index, &mut stats)?;
                let cells = incoming.remove(&row.index).unwrap_or_default();
                write_existing_row(&mut writer, &prefix, row, cells, range, &mut masters, &mut stats)?;
            }
            Event::Empty(e) if in_sheet_data && e.local_name().as_ref() == b"row" => {
                let index = row_index(&e, implied_row)?;
                implied_row = index + 1;
                flush_rows_before(&mut writer, &prefix, &mut incoming, index, &mut stats)?;
                let row = ExistingRow {
                    has_ref: attr_value(&e, b"r").is_some(),
                    start: e,
                    index,
                    cells: Vec::new(),
                    trailing: Vec::new(),
                };
                let cells = incoming.remove(&index).unwrap_or_default();
                write_existing_row(&mut writer, &prefix, row, cells, range, &mut masters, &mut stats)?;
            }
            Event::Eof => break,
            other => writer.write_event(other)?,
        }
    }

    if !saw_sheet_data {
        bail!("Worksheet has no <sheetData> element");
    }

    Ok((writer.into_inner(), stats))
}

/// Non-blank source cells inside `range`, grouped by row
fn incoming_rows(source: &SourceSheet, range: ColumnRange) -> IncomingRows {
    let mut rows: IncomingRows = BTreeMap::new();
    for (row, col, value) in source.cells() {
        if range.contains(col) {
            rows.entry(row).or_default().push((col, value.clone()));
        }
    }
    rows
}

/// Namespace prefix used by the sheet ("x:" in some generated files, usually empty)
fn prefix_of(e: &BytesStart) -> String {
    e.name()
        .prefix()
        .map(|p| format!("{}:", String::from_utf8_lossy(p.as_ref())))
        .unwrap_or_default()
}

fn element_name(e: &BytesStart) -> String {
    String::from_utf8_lossy(e.name().as_ref()).into_owned()
}

fn row_index(e: &BytesStart, implied: u32) -> Result<u32> {
    match attr_value(e, b"r") {
        Some(r) => {
            let n: u32 = r
                .parse()
                .with_context(|| format!("Invalid row number: '{}'", r))?;
            if n == 0 {
                bail!("Invalid row number: 0");
            }
            Ok(n - 1)
        }
        None => Ok(implied),
    }
}

fn read_row(
    reader: &mut Reader<&[u8]>,
    buf: &mut Vec<u8>,
    start: BytesStart<'static>,
    implied_row: u32,
) -> Result<ExistingRow> {
    let index = row_index(&start, implied_row)?;
    let mut row = ExistingRow {
        has_ref: attr_value(&start, b"r").is_some(),
        start,
        index,
        cells: Vec::new(),
        trailing: Vec::new(),
    };
    let mut next_col = 0u32;

    loop {
        let event = reader.read_event_into(buf)?.into_owned();
        buf.clear();

        match event {
            Event::Start(e) if e.local_name().as_ref() == b"c" => {
                let (col, has_ref) = cell_column(&e, next_col)?;
                let mut events = vec![Event::Start(e)];
                read_subtree(reader, buf, &mut events)?;
                row.cells.push(ExistingCell { col, has_ref, events });
                next_col = col + 1;
            }
            Event::Empty(e) if e.local_name().as_ref() == b"c" => {
                let (col, has_ref) = cell_column(&e, next_col)?;
                row.cells.push(ExistingCell {
                    col,
                    has_ref,
                    events: vec![Event::Empty(e)],
                });
                next_col = col + 1;
            }
            Event::End(e) if e.local_name().as_ref() == b"row" => break,
            Event::Start(e) => {
                let mut events = vec![Event::Start(e)];
                read_subtree(reader, buf, &mut events)?;
                row.trailing.extend(events);
            }
            Event::Text(ref t) if t.iter().all(|b| b.is_ascii_whitespace()) => {}
            Event::Eof => bail!("Unexpected end of worksheet inside row {}", index + 1),
            other => row.trailing.push(other),
        }
    }

    Ok(row)
}

/// Consume events up to and including the End matching an already-read Start
fn read_subtree(
    reader: &mut Reader<&[u8]>,
    buf: &mut Vec<u8>,
    events: &mut Vec<Event<'static>>,
) -> Result<()> {
    let mut depth = 1usize;
    while depth > 0 {
        let event = reader.read_event_into(buf)?.into_owned();
        buf.clear();
        match event {
            Event::Start(_) => depth += 1,
            Event::End(_) => depth -= 1,
            Event::Eof => bail!("Unexpected end of worksheet inside element"),
            _ => {}
        }
        events.push(event);
    }
    Ok(())
}

fn cell_column(e: &BytesStart, implied: u32) -> Result<(u32, bool)> {
    match attr_value(e, b"r") {
        Some(r) => Ok((parse_cell_ref(&r)?.1, true)),
        None => Ok((implied, false)),
    }
}

fn flush_rows_before(
    writer: &mut Writer<Vec<u8>>,
    prefix: &str,
    incoming: &mut IncomingRows,
    index: u32,
    stats: &mut PatchStats,
) -> Result<()> {
    let rest = incoming.split_off(&index);
    let before = std::mem::replace(incoming, rest);
    write_new_rows(writer, prefix, before, stats)
}

fn write_new_rows(
    writer: &mut Writer<Vec<u8>>,
    prefix: &str,
    rows: IncomingRows,
    stats: &mut PatchStats,
) -> Result<()> {
    for (index, cells) in rows {
        let name = format!("{}row", prefix);
        let mut start = BytesStart::new(name.clone());
        start.push_attribute(("r", (index + 1).to_string().as_str()));
        writer.write_event(Event::Start(start))?;
        for (col, value) in &cells {
            for event in cell_events(prefix, index, *col, value, None) {
                writer.write_event(event)?;
            }
        }
        writer.write_event(Event::End(BytesEnd::new(name)))?;
        stats.rows_added += 1;
        stats.cells_written += cells.len();
    }
    Ok(())
}

fn write_existing_row(
    writer: &mut Writer<Vec<u8>>,
    prefix: &str,
    mut row: ExistingRow,
    incoming: Vec<(u32, CellValue)>,
    range: ColumnRange,
    masters: &mut RemovedMasters,
    stats: &mut PatchStats,
) -> Result<()> {
    let touched = !incoming.is_empty() || row.cells.iter().any(|c| range.contains(c.col));
    let name = element_name(&row.start);

    if !touched {
        for cell in row.cells.iter_mut() {
            if detach_shared_formula(cell, row.index, masters) {
                stats.formulas_detached += 1;
            }
        }
        if row.cells.is_empty() && row.trailing.is_empty() {
            writer.write_event(Event::Empty(row.start))?;
        } else {
            writer.write_event(Event::Start(row.start))?;
            for event in row.cells.into_iter().flat_map(|c| c.events).chain(row.trailing) {
                writer.write_event(event)?;
            }
            writer.write_event(Event::End(BytesEnd::new(name)))?;
        }
        return Ok(());
    }

    // Style indexes of replaced cells are carried over to the new values
    let mut styles: HashMap<u32, String> = HashMap::new();
    let mut kept = Vec::new();
    for mut cell in row.cells {
        if range.contains(cell.col) {
            if let Some(Event::Start(e) | Event::Empty(e)) = cell.events.first() {
                if let Some(s) = attr_value(e, b"s") {
                    styles.insert(cell.col, s);
                }
            }
            if let Some((si, formula)) = shared_master(&cell.events) {
                log::debug!(
                    "Shared formula {} at {} is replaced; detaching its dependents",
                    si,
                    cell_ref(row.index, cell.col)
                );
                masters.insert(
                    si,
                    RemovedMaster {
                        row: row.index,
                        col: cell.col,
                        formula,
                    },
                );
            }
            stats.cells_removed += 1;
        } else {
            if detach_shared_formula(&mut cell, row.index, masters) {
                stats.formulas_detached += 1;
            }
            kept.push(cell);
        }
    }

    let mut start = BytesStart::new(name.clone());
    for attr in row.start.attributes().flatten() {
        if attr.key.as_ref() != b"spans" {
            start.push_attribute(attr);
        }
    }
    if !row.has_ref {
        start.push_attribute(("r", (row.index + 1).to_string().as_str()));
    }
    writer.write_event(Event::Start(start))?;

    let mut kept = kept.into_iter().peekable();
    for (col, value) in &incoming {
        while let Some(cell) = kept.next_if(|c| c.col < *col) {
            write_kept_cell(writer, row.index, cell)?;
        }
        for event in cell_events(prefix, row.index, *col, value, styles.get(col).map(String::as_str)) {
            writer.write_event(event)?;
        }
        stats.cells_written += 1;
    }
    for cell in kept {
        write_kept_cell(writer, row.index, cell)?;
    }
    for event in row.trailing {
        writer.write_event(event)?;
    }

    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

fn is_formula(event: &Event) -> bool {
    matches!(event, Event::Start(f) | Event::Empty(f) if f.local_name().as_ref() == b"f")
}

/// `(si, formula text)` when the cell is the master of a shared formula
fn shared_master(events: &[Event<'static>]) -> Option<(String, String)> {
    let pos = events.iter().position(is_formula)?;
    let Event::Start(f) = &events[pos] else {
        return None;
    };
    if attr_value(f, b"t").as_deref() != Some("shared") || attr_value(f, b"ref").is_none() {
        return None;
    }
    let si = attr_value(f, b"si")?;

    // Text and entity references arrive as separate events
    let mut raw = Vec::new();
    for event in &events[pos + 1..] {
        match event {
            Event::Text(t) => raw.extend_from_slice(t),
            Event::GeneralRef(r) => {
                raw.push(b'&');
                raw.extend_from_slice(r);
                raw.push(b';');
            }
            _ => break,
        }
    }
    let raw = String::from_utf8_lossy(&raw);
    let formula = match unescape(&raw) {
        Ok(f) => f.into_owned(),
        Err(_) => raw.to_string(),
    };
    Some((si, formula))
}

/// Replace a dependent of a removed master with its own explicit formula
fn detach_shared_formula(cell: &mut ExistingCell, row: u32, masters: &RemovedMasters) -> bool {
    if masters.is_empty() {
        return false;
    }
    let Some(pos) = cell.events.iter().position(is_formula) else {
        return false;
    };

    let (start, name, is_empty, formula) = {
        let (Event::Start(f) | Event::Empty(f)) = &cell.events[pos] else {
            return false;
        };
        if attr_value(f, b"t").as_deref() != Some("shared") || attr_value(f, b"ref").is_some() {
            return false;
        }
        let Some(master) = attr_value(f, b"si").and_then(|si| masters.get(&si)) else {
            return false;
        };

        let formula = shift_formula(
            &master.formula,
            row as i64 - master.row as i64,
            cell.col as i64 - master.col as i64,
        );
        let name = element_name(f);
        let mut start = BytesStart::new(name.clone());
        for attr in f.attributes().flatten() {
            if !matches!(attr.key.as_ref(), b"t" | b"si") {
                start.push_attribute(attr);
            }
        }
        (
            start.into_owned(),
            name,
            matches!(cell.events[pos], Event::Empty(_)),
            formula,
        )
    };

    let end = if is_empty {
        pos
    } else {
        match cell.events[pos + 1..]
            .iter()
            .position(|e| matches!(e, Event::End(f) if f.local_name().as_ref() == b"f"))
        {
            Some(offset) => pos + 1 + offset,
            None => return false,
        }
    };

    cell.events.splice(
        pos..=end,
        [
            Event::Start(start),
            Event::Text(BytesText::new(&formula).into_owned()),
            Event::End(BytesEnd::new(name)),
        ],
    );
    true
}

/// Kept cells get an explicit reference so inserted cells cannot shift them
fn write_kept_cell(writer: &mut Writer<Vec<u8>>, row: u32, cell: ExistingCell) -> Result<()> {
    let mut events = cell.events.into_iter();
    if let Some(first) = events.next() {
        let first = if cell.has_ref {
            first
        } else {
            match first {
                Event::Start(e) => Event::Start(with_ref(&e, row, cell.col)),
                Event::Empty(e) => Event::Empty(with_ref(&e, row, cell.col)),
                other => other,
            }
        };
        writer.write_event(first)?;
    }
    for event in events {
        writer.write_event(event)?;
    }
    Ok(())
}

fn with_ref(e: &BytesStart, row: u32, col: u32) -> BytesStart<'static> {
    let mut start = BytesStart::new(element_name(e));
    start.push_attribute(("r", cell_ref(row, col).as_str()));
    for attr in e.attributes().flatten() {
        start.push_attribute(attr);
    }
    start.into_owned()
}

/// Events for one new cell. Text is written as an inline string so the
/// shared string table does not need to change.
fn cell_events(
    prefix: &str,
    row: u32,
    col: u32,
    value: &CellValue,
    style: Option<&str>,
) -> Vec<Event<'static>> {
    let c = format!("{}c", prefix);
    let mut start = BytesStart::new(c.clone());
    start.push_attribute(("r", cell_ref(row, col).as_str()));
    if let Some(s) = style {
        start.push_attribute(("s", s));
    }

    let mut events = Vec::with_capacity(7);
    match value {
        CellValue::Number(n) | CellValue::DateTime(n) if n.is_finite() => {
            events.push(Event::Start(start));
            push_text_element(&mut events, &format!("{}v", prefix), &n.to_string(), false);
        }
        CellValue::Bool(b) => {
            start.push_attribute(("t", "b"));
            events.push(Event::Start(start));
            push_text_element(&mut events, &format!("{}v", prefix), if *b { "1" } else { "0" }, false);
        }
        CellValue::Number(n) | CellValue::DateTime(n) => {
            start.push_attribute(("t", "inlineStr"));
            events.push(Event::Start(start));
            push_inline_string(&mut events, prefix, &n.to_string());
        }
        CellValue::Text(s) => {
            start.push_attribute(("t", "inlineStr"));
            events.push(Event::Start(start));
            push_inline_string(&mut events, prefix, s);
        }
    }
    events.push(Event::End(BytesEnd::new(c)));
    events
}

fn push_inline_string(events: &mut Vec<Event<'static>>, prefix: &str, text: &str) {
    let is = format!("{}is", prefix);
    events.push(Event::Start(BytesStart::new(is.clone())));
    let preserve = text.trim() != text;
    push_text_element(events, &format!("{}t", prefix), text, preserve);
    events.push(Event::End(BytesEnd::new(is)));
}

fn push_text_element(events: &mut Vec<Event<'static>>, name: &str, text: &str, preserve: bool) {
    let mut start = BytesStart::new(name.to_string());
    if preserve {
        start.push_attribute(("xml:space", "preserve"));
    }
    events.push(Event::Start(start));
    events.push(Event::Text(BytesText::new(text).into_owned()));
    events.push(Event::End(BytesEnd::new(name.to_string())));
}

/// Grow `<dimension ref>` so it covers the spliced block; it never shrinks
fn extend_dimension(
    e: &BytesStart,
    range: ColumnRange,
    row_span: Option<(u32, u32)>,
) -> Result<BytesStart<'static>> {
    let Some((first_row, last_row)) = row_span else {
        return Ok(e.clone().into_owned());
    };
    let Some(current) = attr_value(e, b"ref") else {
        return Ok(e.clone().into_owned());
    };

    let (from, to) = match current.split_once(':') {
        Some((a, b)) => (parse_cell_ref(a)?, parse_cell_ref(b)?),
        None => {
            let cell = parse_cell_ref(&current)?;
            (cell, cell)
        }
    };

    let start = (from.0.min(first_row), from.1.min(range.start));
    let end = (to.0.max(last_row), to.1.max(range.end));
    let new_ref = if start == end {
        cell_ref(start.0, start.1)
    } else {
        format!("{}:{}", cell_ref(start.0, start.1), cell_ref(end.0, end.1))
    };

    let mut out = BytesStart::new(element_name(e));
    for attr in e.attributes().flatten() {
        if attr.key.as_ref() == b"ref" {
            out.push_attribute(("ref", new_ref.as_str()));
        } else {
            out.push_attribute(attr);
        }
    }
    Ok(out.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SHEET: &str = concat!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
        r#"<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">"#,
        r#"<dimension ref="A1:E3"/>"#,
        r#"<sheetData>"#,
        r#"<row r="1" spans="1:5"><c r="A1" t="s"><v>0</v></c><c r="B1" s="4" t="s"><v>1</v></c><c r="E1"><v>9</v></c></row>"#,
        r#"<row r="3" spans="1:5"><c r="A3"><v>1</v></c><c r="D3"><f>A3*2</f><v>2</v></c></row>"#,
        r#"</sheetData>"#,
        r#"<mergeCells count="1"><mergeCell ref="D1:E1"/></mergeCells>"#,
        r#"</worksheet>"#
    );

    fn text(s: &str) -> Option<CellValue> {
        Some(CellValue::Text(s.to_string()))
    }

    fn num(n: f64) -> Option<CellValue> {
        Some(CellValue::Number(n))
    }

    fn patch(xml: &str, range: ColumnRange, source: &SourceSheet) -> (String, PatchStats) {
        let (bytes, stats) = patch_sheet_xml(xml.as_bytes(), range, source).unwrap();
        (String::from_utf8(bytes).unwrap(), stats)
    }

    #[test]
    fn test_replaces_only_range_columns() {
        let source = SourceSheet::from_rows(
            "Export",
            vec![
                vec![text("Store"), text("Sales")],
                vec![text("WMP-01"), num(1200.5)],
            ],
        );

        let (xml, stats) = patch(SHEET, ColumnRange::new(0, 1), &source);

        assert_eq!(
            xml,
            concat!(
                r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
                r#"<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">"#,
                r#"<dimension ref="A1:E3"/>"#,
                r#"<sheetData>"#,
                r#"<row r="1"><c r="A1" t="inlineStr"><is><t>Store</t></is></c><c r="B1" s="4" t="inlineStr"><is><t>Sales</t></is></c><c r="E1"><v>9</v></c></row>"#,
                r#"<row r="2"><c r="A2" t="inlineStr"><is><t>WMP-01</t></is></c><c r="B2"><v>1200.5</v></c></row>"#,
                r#"<row r="3"><c r="D3"><f>A3*2</f><v>2</v></c></row>"#,
                r#"</sheetData>"#,
                r#"<mergeCells count="1"><mergeCell ref="D1:E1"/></mergeCells>"#,
                r#"</worksheet>"#
            )
        );
        assert_eq!(
            stats,
            PatchStats {
                cells_removed: 3,
                cells_written: 4,
                rows_added: 1,
                formulas_detached: 0,
            }
        );
    }

    #[test]
    fn test_rows_outside_source_keep_spans_when_untouched() {
        let source = SourceSheet::from_rows("Export", vec![vec![None, None, text("x")]]);
        let (xml, _) = patch(SHEET, ColumnRange::new(2, 2), &source);

        assert!(xml.contains(r#"<row r="1"><c r="A1" t="s">"#));
        assert!(xml.contains(r#"<c r="C1" t="inlineStr"><is><t>x</t></is></c><c r="E1">"#));
        assert!(xml.contains(r#"<row r="3" spans="1:5"><c r="A3"><v>1</v></c>"#));
    }

    #[test]
    fn test_dimension_grows_with_data() {
        let source = SourceSheet::from_rows(
            "Export",
            (0..10).map(|r| vec![None, None, None, None, None, None, num(r as f64)]),
        );
        let (xml, stats) = patch(SHEET, ColumnRange::new(6, 6), &source);

        assert!(xml.contains(r#"<dimension ref="A1:G10"/>"#));
        // rows 2 and 4..=10 are new
        assert_eq!(stats.rows_added, 8);
        assert!(xml.contains(r#"<row r="10"><c r="G10"><v>9</v></c></row></sheetData>"#));
    }

    #[test]
    fn test_empty_sheet_data() {
        let xml = r#"<worksheet><dimension ref="A1"/><sheetData/></worksheet>"#;
        let source = SourceSheet::from_rows(
            "Export",
            vec![vec![text(" padded "), Some(CellValue::Bool(true))]],
        );
        let (out, stats) = patch(xml, ColumnRange::new(0, 1), &source);

        assert_eq!(
            out,
            concat!(
                r#"<worksheet><dimension ref="A1:B1"/><sheetData>"#,
                r#"<row r="1"><c r="A1" t="inlineStr"><is><t xml:space="preserve"> padded </t></is></c>"#,
                r#"<c r="B1" t="b"><v>1</v></c></row>"#,
                r#"</sheetData></worksheet>"#
            )
        );
        assert_eq!(stats.rows_added, 1);
    }

    #[test]
    fn test_clears_range_beyond_source_rows() {
        let source = SourceSheet::from_rows("Export", vec![vec![None, None, None, text("new")]]);
        let (xml, stats) = patch(SHEET, ColumnRange::new(3, 3), &source);

        assert!(xml.contains(r#"<row r="3"><c r="A3"><v>1</v></c></row>"#));
        assert_eq!(stats.cells_removed, 1);
        assert_eq!(stats.cells_written, 1);
    }

    #[test]
    fn test_text_is_escaped() {
        let source = SourceSheet::from_rows("Export", vec![vec![text("A&B <c>")]]);
        let (xml, _) = patch(SHEET, ColumnRange::new(0, 0), &source);
        assert!(xml.contains("<t>A&amp;B &lt;c&gt;</t>"));
    }

    #[test]
    fn test_implicit_references_are_made_explicit() {
        let xml = r#"<worksheet><sheetData><row><c><v>1</v></c><c t="s"><v>0</v></c><c><v>3</v></c></row></sheetData></worksheet>"#;
        let source = SourceSheet::from_rows("Export", vec![vec![None, num(7.0)]]);
        let (out, _) = patch(xml, ColumnRange::new(1, 1), &source);

        assert_eq!(
            out,
            concat!(
                r#"<worksheet><sheetData><row r="1">"#,
                r#"<c r="A1"><v>1</v></c><c r="B1"><v>7</v></c><c r="C1"><v>3</v></c>"#,
                r#"</row></sheetData></worksheet>"#
            )
        );
    }

    #[test]
    fn test_prefixed_namespace() {
        let xml = r#"<x:worksheet xmlns:x="urn:x"><x:sheetData><x:row r="2"><x:c r="A2"><x:v>1</x:v></x:c></x:row></x:sheetData></x:worksheet>"#;
        let source = SourceSheet::from_rows("Export", vec![vec![num(5.0)]]);
        let (out, stats) = patch(xml, ColumnRange::new(0, 0), &source);

        assert!(out.contains(r#"<x:row r="1"><x:c r="A1"><x:v>5</x:v></x:c></x:row><x:row r="2"></x:row>"#));
        assert_eq!(stats.cells_removed, 1);
    }

    #[test]
    fn test_removed_shared_master_detaches_dependents() {
        let xml = concat!(
            r#"<worksheet><sheetData>"#,
            r#"<row r="5"><c r="A5"><f t="shared" ref="A5:D6" si="0">A4*2+A$1</f><v>1</v></c>"#,
            r#"<c r="B5"><f t="shared" si="0"/><v>1</v></c>"#,
            r#"<c r="C5"><f t="shared" si="0"/><v>1</v></c>"#,
            r#"<c r="D5"><f t="shared" si="0"/><v>1</v></c>"#,
            r#"<c r="E5" s="3"><f>SUM(A5:D5)</f><v>4</v></c></row>"#,
            r#"<row r="6"><c r="C6"><f t="shared" si="0"/><v>1</v></c></row>"#,
            r#"</sheetData></worksheet>"#
        );
        let source = SourceSheet::from_rows("Export", vec![vec![text("x")]]);
        let (out, stats) = patch(xml, ColumnRange::new(0, 1), &source);

        assert_eq!(
            out,
            concat!(
                r#"<worksheet><sheetData>"#,
                r#"<row r="1"><c r="A1" t="inlineStr"><is><t>x</t></is></c></row>"#,
                r#"<row r="5"><c r="C5"><f>C4*2+C$1</f><v>1</v></c>"#,
                r#"<c r="D5"><f>D4*2+D$1</f><v>1</v></c>"#,
                r#"<c r="E5" s="3"><f>SUM(A5:D5)</f><v>4</v></c></row>"#,
                r#"<row r="6"><c r="C6"><f>C5*2+C$1</f><v>1</v></c></row>"#,
                r#"</sheetData></worksheet>"#
            )
        );
        assert_eq!(stats.formulas_detached, 3);
        assert!(!out.contains(r#"si="0""#));
    }

    #[test]
    fn test_kept_shared_master_is_untouched() {
        let xml = concat!(
            r#"<worksheet><sheetData>"#,
            r#"<row r="1"><c r="C1"><f t="shared" ref="C1:D1" si="2">A1+1</f><v>1</v></c>"#,
            r#"<c r="D1"><f t="shared" si="2"/><v>1</v></c></row>"#,
            r#"</sheetData></worksheet>"#
        );
        let source = SourceSheet::from_rows("Export", vec![vec![num(1.0)]]);
        let (out, stats) = patch(xml, ColumnRange::new(0, 0), &source);

        assert!(out.contains(r#"<c r="D1"><f t="shared" si="2"/><v>1</v></c>"#));
        assert_eq!(stats.formulas_detached, 0);
    }

    #[test]
    fn test_shared_master_text_is_unescaped() {
        let mut reader = Reader::from_str(r#"<f t="shared" ref="A1:B1" si="3">IF(A4&gt;0,A4&amp;"x",0)</f>"#);
        let mut events = Vec::new();
        loop {
            match reader.read_event().unwrap() {
                Event::Eof => break,
                event => events.push(event.into_owned()),
            }
        }

        assert_eq!(
            shared_master(&events),
            Some(("3".to_string(), r#"IF(A4>0,A4&"x",0)"#.to_string()))
        );
    }

    #[test]
    fn test_dates_keep_replaced_style() {
        let xml = r#"<worksheet><sheetData><row r="1"><c r="A1" s="7"><v>1</v></c></row></sheetData></worksheet>"#;
        let source = SourceSheet::from_rows("Export", vec![vec![Some(CellValue::DateTime(45000.5))]]);
        let (out, _) = patch(xml, ColumnRange::new(0, 0), &source);

        assert!(out.contains(r#"<row r="1"><c r="A1" s="7"><v>45000.5</v></c></row>"#));
    }

    #[test]
    fn test_missing_sheet_data_is_error() {
        let source = SourceSheet::from_rows("Export", vec![vec![num(1.0)]]);
        assert!(patch_sheet_xml(b"<worksheet/>", ColumnRange::new(0, 0), &source).is_err());
    }
}
