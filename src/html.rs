use crate::export::UninstallReport;
use crate::record::Property;

const BASE_CSS: &str = "body{margin:0;background:var(--bg);color:var(--fg);font-family:Segoe UI,system-ui,-apple-system,Arial,sans-serif} .container{max-width:1400px;margin:0 auto;padding:24px} .header{display:flex;align-items:center;justify-content:space-between;gap:12px;margin-bottom:16px} .title{font-size:20px;font-weight:600;letter-spacing:.2px} .sub{color:var(--muted);font-size:13px} .grid{display:grid;grid-template-columns:repeat(4,minmax(0,1fr));gap:12px} .card{background:var(--card);border:1px solid var(--border);border-radius:10px;padding:14px} .metric{display:flex;align-items:center;justify-content:space-between} .metric .label{color:var(--muted);font-size:12px} .metric .value{font-size:22px;font-weight:700} .value.err{color:var(--err)} .value.warn{color:var(--warn)} .value.ok{color:var(--ok)} .section{margin-top:18px} .section h3{margin:0 0 10px 0;font-size:16px;font-weight:600} .table{width:100%;border-collapse:separate;border-spacing:0;background:var(--card);border:1px solid var(--border);border-radius:10px;overflow:hidden} .table th{position:sticky;top:0;background:var(--head);text-align:left;font-weight:600;padding:10px;border-bottom:1px solid var(--border)} .table td{padding:10px;border-bottom:1px solid var(--border);vertical-align:top;word-break:break-all} .chip{display:inline-flex;align-items:center;background:var(--chip);border:1px solid var(--border);border-radius:999px;padding:4px 10px;font-size:12px} .pill{display:inline-block;background:var(--chip);color:var(--fg);padding:6px 10px;border-radius:999px;border:1px solid var(--border);font-size:12px;margin:4px 6px 0 0} .code{font-family:Consolas,Monaco,monospace;font-size:12px} .filter{width:100%;box-sizing:border-box;padding:8px 10px;border-radius:8px;border:1px solid var(--border);background:var(--card);color:var(--fg);margin-bottom:10px} .footer{margin-top:22px;color:var(--muted);font-size:12px} @media (max-width:900px){.grid{grid-template-columns:repeat(2,minmax(0,1fr))}} @media (max-width:600px){.grid{grid-template-columns:1fr}.header{flex-direction:column;align-items:flex-start}}";

const SCRIPT: &str = "<script>(function(){const light={bg:'#f7fafc',fg:'#111827',muted:'#6b7280',card:'#ffffff',border:'#e5e7eb',head:'#f3f4f6',ok:'#16a34a',warn:'#d97706',err:'#dc2626',chip:'#eef2f7'};const dark={bg:'#0a0e13',fg:'#ffffff',muted:'#c0c4cc',card:'#0d131a',border:'#243041',head:'#0c1118',ok:'#22c55e',warn:'#f59e0b',err:'#ef4444',chip:'#0f172a'};function apply(vars){const r=document.documentElement.style;Object.entries(vars).forEach(([k,v])=>r.setProperty('--'+k,v));}window.__wuTheme=window.__wuTheme||'';window.toggleTheme=function(){const curr=window.__wuTheme==='light'?'dark':'light';window.__wuTheme=curr;apply(curr==='light'?light:dark);const btn=document.getElementById('themeToggle');if(btn){btn.textContent=curr==='light'?'Dark Mode':'Light Mode';}};window.filterApps=function(q){q=(q||'').toLowerCase();document.querySelectorAll('#apps tbody tr').forEach(tr=>{tr.style.display=tr.textContent.toLowerCase().includes(q)?'':'none';});};})();</script>";

pub fn render_html(rep: &UninstallReport, theme: crate::Theme, cols: &[Property]) -> String {
    let mut s = String::new();
    s.push_str("<html lang=\"en\"><head><meta charset=\"utf-8\"><meta name=\"viewport\" content=\"width=device-width, initial-scale=1\"><title>WinUninstall Report</title><style>");
    match theme {
        crate::Theme::Dark => s.push_str(":root{--bg:#0a0e13;--fg:#ffffff;--muted:#c0c4cc;--card:#0d131a;--border:#243041;--head:#0c1118;--ok:#22c55e;--warn:#f59e0b;--err:#ef4444;--chip:#0f172a} "),
        crate::Theme::Light => s.push_str(":root{--bg:#f7fafc;--fg:#111827;--muted:#6b7280;--card:#ffffff;--border:#e5e7eb;--head:#f3f4f6;--ok:#16a34a;--warn:#d97706;--err:#dc2626;--chip:#eef2f7} "),
    }
    s.push_str(BASE_CSS);
    s.push_str("</style>");
    s.push_str(SCRIPT);
    s.push_str("</head><body><div class=\"container\">");
    s.push_str("<div class=\"header\"><div class=\"title\">WinUninstall Report</div>");
    s.push_str(&format!("<div class=\"sub\">{}{}</div>", rep.generated.format("%Y-%m-%d %H:%M"), match rep.mode.as_ref() { Some(m) => format!(" | {}", html_escape(m)), None => String::new() }));
    s.push_str(&format!("<button id=\"themeToggle\" class=\"pill\" onclick=\"toggleTheme()\">{}</button>", match theme { crate::Theme::Light => "Dark Mode", _ => "Light Mode" }));
    s.push_str("</div>");
    s.push_str("<div class=\"grid\">");
    s.push_str(&format!("<div class=\"card metric\"><div class=\"label\">Applications</div><div class=\"value\">{}</div></div>", rep.records.len()));
    s.push_str(&format!("<div class=\"card metric\"><div class=\"label\">Hosts</div><div class=\"value\">{}</div></div>", rep.hosts.len()));
    s.push_str(&format!("<div class=\"card metric\"><div class=\"label\">MSI</div><div class=\"value\">{}</div></div>", rep.msi_count()));
    let down = rep.unreachable.len() + rep.failed.len();
    s.push_str(&format!("<div class=\"card metric\"><div class=\"label\">Unavailable Hosts</div><div class=\"{}\">{}</div></div>", if down > 0 { "value warn" } else { "value ok" }, down));
    if rep.attempted() {
        let (ok, bad) = rep.exit_tally();
        s.push_str(&format!("<div class=\"card metric\"><div class=\"label\">Uninstalled</div><div class=\"value ok\">{}</div></div>", ok));
        s.push_str(&format!("<div class=\"card metric\"><div class=\"label\">Failed</div><div class=\"{}\">{}</div></div>", if bad > 0 { "value err" } else { "value ok" }, bad));
    }
    s.push_str("</div>");
    let kinds = rep.by_kind();
    if !kinds.is_empty() {
        s.push_str("<div class=\"section\"><h3>Uninstaller Types</h3><div class=\"card\">");
        for (k, c) in &kinds { s.push_str(&format!("<span class=\"pill\">{} · {}</span>", html_escape(k), c)); }
        s.push_str("</div></div>");
    }
    if down > 0 {
        s.push_str("<div class=\"section\"><h3>Skipped Hosts</h3><div class=\"card\">");
        for h in &rep.unreachable { s.push_str(&format!("<span class=\"pill\">{} · unreachable</span>", html_escape(h))); }
        for h in &rep.failed { s.push_str(&format!("<span class=\"pill\">{} · registry error</span>", html_escape(h))); }
        s.push_str("</div></div>");
    }
    s.push_str("<div class=\"section\"><h3>Applications</h3><input class=\"filter\" placeholder=\"Filter…\" oninput=\"filterApps(this.value)\">");
    s.push_str("<table id=\"apps\" class=\"table\"><thead><tr>");
    for c in cols { s.push_str(&format!("<th>{}</th>", c.header())); }
    s.push_str("</tr></thead><tbody>");
    for r in &rep.records {
        s.push_str("<tr>");
        for c in cols {
            let v = html_escape(&r.property(*c));
            match c {
                Property::Kind => s.push_str(&format!("<td><span class=\"chip\">{}</span></td>", v)),
                Property::UninstallString | Property::QuietUninstallString | Property::KeyPath | Property::InstallerCache => s.push_str(&format!("<td class=\"code\">{}</td>", v)),
                Property::ExitCode => {
                    let cls = match r.exit_code { Some(0) | Some(3010) => "value ok", Some(_) => "value err", None => "" };
                    s.push_str(&format!("<td class=\"{}\">{}</td>", cls, v));
                }
                _ => s.push_str(&format!("<td>{}</td>", v)),
            }
        }
        s.push_str("</tr>");
    }
    s.push_str("</tbody></table></div>");
    s.push_str(&format!("<div class=\"footer\">Scanned: {}</div>", html_escape(&rep.hosts.join(", "))));
    s.push_str("</div></body></html>");
    s
}

fn html_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}
