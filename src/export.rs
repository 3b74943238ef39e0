use std::collections::BTreeMap;
use std::io::{Cursor, Write};
use chrono::{DateTime, Local};
use clap::ValueEnum;
use comfy_table::{ContentArrangement, Table};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use serde::Serialize;
use crate::record::{ApplicationRecord, Property};
use crate::search::SearchReport;

pub const DEFAULT_COLUMNS: [Property; 6] = [Property::Host, Property::Name, Property::Version, Property::Publisher, Property::Kind, Property::QuietUninstallString];

/// Everything a run produced, in the shape the file renderers consume.
#[derive(Clone, Debug, Serialize)]
pub struct UninstallReport {
    pub generated: DateTime<Local>,
    pub hosts: Vec<String>,
    pub unreachable: Vec<String>,
    pub failed: Vec<String>,
    pub mode: Option<String>,
    pub records: Vec<ApplicationRecord>,
}

impl UninstallReport {
    pub fn new(hosts: Vec<String>, search: SearchReport, mode: Option<String>) -> Self {
        Self { generated: Local::now(), hosts, unreachable: search.unreachable, failed: search.failed, mode, records: search.records }
    }

    pub fn by_kind(&self) -> Vec<(String, usize)> {
        let mut m: BTreeMap<&str, usize> = BTreeMap::new();
        for r in &self.records { *m.entry(r.command_kind.label()).or_default() += 1; }
        let mut v: Vec<(String, usize)> = m.into_iter().map(|(k, c)| (k.to_string(), c)).collect();
        v.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        v
    }

    pub fn msi_count(&self) -> usize { self.records.iter().filter(|r| r.is_msi).count() }

    /// (succeeded, failed) among records that were attempted. 3010 means success pending reboot.
    pub fn exit_tally(&self) -> (usize, usize) {
        self.records.iter().filter_map(|r| r.exit_code).fold((0, 0), |(ok, bad), c| if c == 0 || c == 3010 { (ok + 1, bad) } else { (ok, bad + 1) })
    }

    pub fn attempted(&self) -> bool { self.records.iter().any(|r| r.exit_code.is_some()) }
}

pub fn columns_or(cols: &[Property], default: &[Property]) -> Vec<Property> {
    if cols.is_empty() { default.to_vec() } else { cols.to_vec() }
}

pub fn all_columns() -> Vec<Property> { Property::value_variants().to_vec() }

pub fn truncate(s: &str, n: usize) -> String {
    let mut out: String = s.chars().take(n).collect();
    if s.chars().count() > n { out.push_str("..."); }
    out
}

pub fn render_table(records: &[ApplicationRecord], cols: &[Property], header: &dyn Fn(&str) -> String, width: Option<usize>) -> Table {
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(cols.iter().map(|c| header(c.header())).collect::<Vec<_>>());
    for r in records {
        table.add_row(cols.iter().map(|c| {
            let v = r.property(*c);
            match width { Some(w) => truncate(&v, w), None => v }
        }).collect::<Vec<_>>());
    }
    table
}

pub fn write_delimited<W: Write>(out: W, delimiter: u8, records: &[ApplicationRecord], cols: &[Property]) -> Result<(), std::io::Error> {
    let mut wtr = csv::WriterBuilder::new().delimiter(delimiter).from_writer(out);
    wtr.write_record(cols.iter().map(|c| c.header()))?;
    for r in records { wtr.write_record(cols.iter().map(|c| r.property(*c)))?; }
    wtr.flush()?;
    Ok(())
}

pub fn write_csv(path: &str, records: &[ApplicationRecord], cols: &[Property]) -> Result<(), std::io::Error> {
    write_delimited(std::fs::File::create(path)?, b',', records, cols)
}

pub fn write_tsv(path: &str, records: &[ApplicationRecord], cols: &[Property]) -> Result<(), std::io::Error> {
    write_delimited(std::fs::File::create(path)?, b'\t', records, cols)
}

pub fn write_ndjson(path: &str, records: &[ApplicationRecord]) -> Result<(), std::io::Error> {
    let mut file = std::fs::File::create(path)?;
    for r in records { writeln!(file, "{}", serde_json::to_string(r)?)?; }
    Ok(())
}

pub fn render_json(report: &UninstallReport) -> anyhow::Result<String> { Ok(serde_json::to_string_pretty(report)?) }

/// `<Applications><Application><Name>..</Name>..</Application></Applications>`
pub fn render_xml(records: &[ApplicationRecord], cols: &[Property]) -> anyhow::Result<String> {
    let mut w = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);
    w.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    w.write_event(Event::Start(BytesStart::new("Applications")))?;
    for r in records {
        w.write_event(Event::Start(BytesStart::new("Application")))?;
        for c in cols {
            let v = r.property(*c);
            if v.is_empty() {
                w.write_event(Event::Empty(BytesStart::new(c.header())))?;
            } else {
                w.write_event(Event::Start(BytesStart::new(c.header())))?;
                w.write_event(Event::Text(BytesText::new(&v)))?;
                w.write_event(Event::End(BytesEnd::new(c.header())))?;
            }
        }
        w.write_event(Event::End(BytesEnd::new("Application")))?;
    }
    w.write_event(Event::End(BytesEnd::new("Applications")))?;
    Ok(String::from_utf8(w.into_inner().into_inner())?)
}
