use crate::export::UninstallReport;
use crate::record::Property;

fn cell(s: &str) -> String { s.replace('|', "\\|").replace('\n', " ") }

pub fn render_markdown(rep: &UninstallReport, cols: &[Property]) -> String {
    let mut s = String::new();
    s.push_str("# WinUninstall Report\n\n");
    s.push_str(&format!("Generated: {}\n\n", rep.generated.format("%Y-%m-%d %H:%M")));
    if let Some(m) = rep.mode.as_ref() { s.push_str(&format!("Mode: {}\n\n", m)); }

    s.push_str("## Summary\n");
    s.push_str(&format!("- Hosts: {}\n", if rep.hosts.is_empty() { "None".to_string() } else { rep.hosts.join(", ") }));
    s.push_str(&format!("- Applications: {}\n", rep.records.len()));
    s.push_str(&format!("- MSI: {}\n", rep.msi_count()));
    if rep.attempted() {
        let (ok, bad) = rep.exit_tally();
        s.push_str(&format!("- Uninstalled: {}\n", ok));
        s.push_str(&format!("- Failed: {}\n", bad));
    }
    s.push('\n');

    let kinds = rep.by_kind();
    if !kinds.is_empty() {
        s.push_str("## Uninstaller Types\n");
        for (k, c) in &kinds { s.push_str(&format!("- {} ({})\n", k, c)); }
        s.push('\n');
    }

    if !rep.unreachable.is_empty() || !rep.failed.is_empty() {
        s.push_str("## Skipped Hosts\n");
        for h in &rep.unreachable { s.push_str(&format!("- {}: unreachable\n", h)); }
        for h in &rep.failed { s.push_str(&format!("- {}: registry error\n", h)); }
        s.push('\n');
    }

    s.push_str("## Applications\n");
    if rep.records.is_empty() { s.push_str("None\n"); return s; }
    s.push_str(&format!("| {} |\n", cols.iter().map(|c| c.header()).collect::<Vec<_>>().join(" | ")));
    s.push_str(&format!("|{}\n", "---|".repeat(cols.len())));
    for r in &rep.records {
        let row: Vec<String> = cols.iter().map(|c| {
            let v = cell(&r.property(*c));
            match c { Property::UninstallString | Property::QuietUninstallString if !v.is_empty() => format!("`{}`", v.replace('`', "'")), _ => v }
        }).collect();
        s.push_str(&format!("| {} |\n", row.join(" | ")));
    }
    s
}
