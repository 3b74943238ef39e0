use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;
use anyhow::Context;
use clap::{Parser, ValueEnum, ColorChoice, ArgAction, CommandFactory};
use clap_complete::Shell;
use serde::{Deserialize, Serialize};
use is_terminal::IsTerminal;
mod classifier;
mod rewriter;
mod record;
mod hosts;
mod registry;
mod search;
mod executor;
mod export;
mod rules;
mod html;
mod markdown;

use crate::executor::{ExecStatus, Executor, ProcessLauncher, Target};
use crate::export::UninstallReport;
use crate::record::{ApplicationRecord, BuilderOptions, Property, RecordBuilder, Version};
use crate::search::{Matcher, Predicate, SearchFilter};

static ENABLE_COLOR: OnceLock<bool> = OnceLock::new();

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum OutputFmt { Table, List, Json, Ndjson, Csv, Tsv, Xml, Markdown }

#[derive(Clone, Copy, Debug, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Theme { Dark, Light }

#[derive(Clone, Copy, Debug, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum LogLevel { Error, Warn, Info, Debug, Trace }

#[derive(Clone, Copy, Debug, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum LogFormat { Text, Json }

#[derive(Parser, Debug)]
#[command(
    name = "WinUninstall",
    about = "Find installed Windows applications and uninstall them silently",
    long_about = "Finds installed applications through the registry Uninstall keys of one or more hosts, derives a silent uninstall command for each, and can run those commands locally or remotely.",
    after_long_help = "Examples:\n  WinUninstall --name \"*Java*\"\n  WinUninstall --name \"^Microsoft Visual C\\+\\+\" --regex --min-version 14.0\n  WinUninstall --where publisher=Contoso --where kind!=MSI --output csv\n  WinUninstall --hosts srv01,srv02 --name 7-Zip --uninstall --dry-run\n  WinUninstall --command \"MsiExec.exe /X{11111111-2222-3333-4444-555555555555}\"\n  WinUninstall --exe C:\\Tools\\uninst.exe --args \"/S\" --hosts srv01",
    color = ColorChoice::Auto
)]
struct Args {
    #[arg(long, short = 'n', help = "Glob (* and ?) matched against --property; plain text matches as substring")]
    name: Option<String>,
    #[arg(long, default_value_t = false, help = "Treat --name as a regular expression")]
    regex: bool,
    #[arg(long, value_enum, default_value = "name")]
    property: Property,
    #[arg(long)]
    min_version: Option<String>,
    #[arg(long)]
    max_version: Option<String>,
    #[arg(long = "where", value_name = "FIELD=GLOB|FIELD!=GLOB|FIELD~REGEX")]
    filters: Vec<String>,
    #[arg(long, default_value_t = false)]
    include_system_components: bool,
    #[arg(long, num_args = 0.., value_delimiter = ',')]
    hosts: Vec<String>,
    #[arg(long, default_value_t = 1500, help = "Reachability probe timeout per host")]
    probe_timeout_ms: u64,
    #[arg(long, short = 'u', default_value_t = false, help = "Uninstall every matched application")]
    uninstall: bool,
    #[arg(long, short = 'y', default_value_t = false, help = "Skip the confirmation prompt")]
    yes: bool,
    #[arg(long, default_value_t = false, help = "Show what would run without launching anything")]
    dry_run: bool,
    #[arg(long, conflicts_with_all = ["exe", "uninstall"], help = "Run this raw uninstall command line")]
    command: Option<String>,
    #[arg(long, conflicts_with = "uninstall")]
    exe: Option<String>,
    #[arg(long = "args", requires = "exe")]
    exe_args: Option<String>,
    #[arg(long)]
    timeout_secs: Option<u64>,
    #[arg(long, short = 'o', value_enum, default_value = "table")]
    output: OutputFmt,
    #[arg(long, num_args = 0.., value_delimiter = ',', value_enum)]
    columns: Vec<Property>,
    #[arg(long, default_value_t = false)]
    no_truncate: bool,
    #[arg(long)]
    cell_width: Option<usize>,
    #[arg(long, default_value_t = false)]
    no_header: bool,
    #[arg(long, value_enum, default_value = "dark")]
    theme: Theme,
    #[arg(long)]
    html: Option<String>,
    #[arg(long, short = 'j')]
    json_path: Option<String>,
    #[arg(long)]
    csv_path: Option<String>,
    #[arg(long)]
    tsv_path: Option<String>,
    #[arg(long)]
    ndjson_path: Option<String>,
    #[arg(long)]
    xml_path: Option<String>,
    #[arg(long)]
    md_path: Option<String>,
    #[arg(long, help = "Export a bundled set of outputs to this directory")]
    export_dir: Option<String>,
    #[arg(long, default_value_t = false)]
    no_open: bool,
    #[arg(long, help = "Classifier rules JSON (package-cache roots, flag words)")]
    rules: Option<String>,
    #[arg(long)]
    config: Option<String>,
    #[arg(long, default_value_t = false)]
    no_color: bool,
    #[arg(long, default_value_t = false)]
    force_color: bool,
    #[arg(long, value_enum)]
    log_level: Option<LogLevel>,
    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,
    #[arg(long)]
    log_path: Option<String>,
    #[arg(short = 'v', long, action = ArgAction::Count)]
    verbose: u8,
    #[arg(short = 'q', long, default_value_t = false)]
    quiet: bool,
    #[arg(long, default_value_t = false)]
    progress: bool,
    #[arg(long, value_enum)]
    completions: Option<Shell>,
    #[arg(long)]
    completions_out: Option<String>,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            name: None,
            regex: false,
            property: Property::Name,
            min_version: None,
            max_version: None,
            filters: vec![],
            include_system_components: false,
            hosts: vec![],
            probe_timeout_ms: 1500,
            uninstall: false,
            yes: false,
            dry_run: false,
            command: None,
            exe: None,
            exe_args: None,
            timeout_secs: None,
            output: OutputFmt::Table,
            columns: vec![],
            no_truncate: false,
            cell_width: None,
            no_header: false,
            theme: Theme::Dark,
            html: None,
            json_path: None,
            csv_path: None,
            tsv_path: None,
            ndjson_path: None,
            xml_path: None,
            md_path: None,
            export_dir: None,
            no_open: false,
            rules: None,
            config: None,
            no_color: false,
            force_color: false,
            log_level: None,
            log_format: None,
            log_path: None,
            verbose: 0,
            quiet: false,
            progress: false,
            completions: None,
            completions_out: None,
        }
    }
}

#[derive(Deserialize, Default)]
struct AppConfig {
    hosts: Option<Vec<String>>,
    name: Option<String>,
    regex: Option<bool>,
    property: Option<Property>,
    filters: Option<Vec<String>>,
    include_system_components: Option<bool>,
    probe_timeout_ms: Option<u64>,
    timeout_secs: Option<u64>,
    dry_run: Option<bool>,
    output: Option<OutputFmt>,
    columns: Option<Vec<Property>>,
    no_truncate: Option<bool>,
    cell_width: Option<usize>,
    theme: Option<Theme>,
    rules: Option<String>,
    html: Option<String>,
    json_path: Option<String>,
    csv_path: Option<String>,
    tsv_path: Option<String>,
    ndjson_path: Option<String>,
    xml_path: Option<String>,
    md_path: Option<String>,
    export_dir: Option<String>,
    progress: Option<bool>,
    force_color: Option<bool>,
    log_format: Option<LogFormat>,
    log_path: Option<String>,
}

fn main() {
    let mut args = Args::parse();
    if let Some(sh) = args.completions {
        let mut cmd = Args::command();
        if let Some(path) = args.completions_out.as_ref() {
            if let Ok(mut f) = std::fs::File::create(path) { clap_complete::generate(sh, &mut cmd, "WinUninstall", &mut f); } else { clap_complete::generate(sh, &mut cmd, "WinUninstall", &mut std::io::stdout()); }
        } else {
            clap_complete::generate(sh, &mut cmd, "WinUninstall", &mut std::io::stdout());
        }
        return;
    }
    let cfg_path = args.config.clone().unwrap_or_else(|| "WinUninstall.toml".to_string());
    if let Ok(s) = std::fs::read_to_string(&cfg_path) {
        match toml::from_str::<AppConfig>(&s) {
            Ok(cfg) => apply_config(&mut args, cfg),
            Err(e) => eprintln!("Ignoring config {}: {}", cfg_path, e),
        }
    } else if args.config.is_some() {
        eprintln!("Config file {} not readable", cfg_path);
    }
    {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if args.quiet {
            builder.filter_level(log::LevelFilter::Error);
        } else if let Some(lvl) = args.log_level {
            let f = match lvl { LogLevel::Error => log::LevelFilter::Error, LogLevel::Warn => log::LevelFilter::Warn, LogLevel::Info => log::LevelFilter::Info, LogLevel::Debug => log::LevelFilter::Debug, LogLevel::Trace => log::LevelFilter::Trace };
            builder.filter_level(f);
        } else if args.verbose > 0 {
            let f = if args.verbose >= 3 { log::LevelFilter::Trace } else if args.verbose == 2 { log::LevelFilter::Debug } else { log::LevelFilter::Info };
            builder.filter_level(f);
        } else {
            builder.filter_level(log::LevelFilter::Warn);
        }
        if let Some(fmt) = args.log_format {
            match fmt {
                LogFormat::Json => {
                    builder.format(|buf, record| {
                        use std::io::Write;
                        let ts = chrono::Local::now().to_rfc3339();
                        let obj = serde_json::json!({
                            "ts": ts,
                            "level": record.level().to_string(),
                            "target": record.target(),
                            "msg": record.args().to_string(),
                        });
                        writeln!(buf, "{}", obj)
                    });
                }
                LogFormat::Text => {
                    builder.format(|buf, record| {
                        use std::io::Write;
                        let ts = chrono::Local::now().format("%H:%M:%S");
                        writeln!(buf, "[{:<5} {}] {}", record.level(), ts, record.args())
                    });
                }
            }
        }
        if let Some(path) = args.log_path.as_ref() {
            match std::fs::File::create(path) {
                Ok(f) => {
                    builder.target(env_logger::Target::Pipe(Box::new(f)));
                }
                Err(e) => {
                    eprintln!("Failed to open log file {}: {}", path, e);
                }
            }
        }
        builder.init();
    }
    let term = std::env::var("TERM").unwrap_or_default();
    let no_color_env = std::env::var_os("NO_COLOR").is_some();
    let color_default = std::io::stdout().is_terminal() && !no_color_env && term != "dumb";
    let enable_color = if args.force_color { true } else { color_default && !args.no_color };
    let _ = ENABLE_COLOR.set(enable_color);
    match run(&args) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            log::error!("{:#}", e);
            if !args.quiet { eprintln!("{}", paint(&format!("Error: {:#}", e), "1;31")); }
            std::process::exit(2);
        }
    }
}

/// Returns the process exit code: 0 when every attempted uninstall succeeded, 1 otherwise.
fn run(args: &Args) -> anyhow::Result<i32> {
    let rules_cfg = crate::rules::load_rules(args.rules.as_deref()).unwrap_or_default();
    let classifier = rules_cfg.classifier().context("compiling classifier rules")?;
    let executor = Executor::new(Box::new(ProcessLauncher), args.dry_run, args.timeout_secs.map(Duration::from_secs));
    if args.command.is_some() || args.exe.is_some() {
        let target = Target::for_host(args.hosts.first().map(String::as_str).unwrap_or(""));
        let outcome = match (args.command.as_ref(), args.exe.as_ref()) {
            (Some(raw), _) => executor.execute_raw(raw, &classifier, &target),
            (None, Some(exe)) => executor.execute(exe, args.exe_args.as_deref().unwrap_or(""), &target),
            (None, None) => unreachable!("checked above"),
        };
        let (msg, code) = match &outcome.status {
            ExecStatus::DryRun => ("Dry run: nothing launched".to_string(), "1;36"),
            ExecStatus::Exited if succeeded(outcome.exit_code) => (format!("Exit code: {}", outcome.exit_code), "1;32"),
            ExecStatus::Exited => (format!("Exit code: {}", outcome.exit_code), "1;31"),
            ExecStatus::TimedOut => (format!("Timed out (exit code {})", outcome.exit_code), "1;31"),
            ExecStatus::LaunchFailed(r) => (format!("Launch failed: {} (exit code {})", r, outcome.exit_code), "1;31"),
        };
        if !args.quiet { println!("{}", paint(&msg, code)); }
        return Ok(if succeeded(outcome.exit_code) { 0 } else { 1 });
    }

    let rewriter = rules_cfg.rewriter().context("compiling rewrite rules")?;
    let builder = RecordBuilder::new(classifier, rewriter, BuilderOptions { include_system_components: args.include_system_components });
    let filter = build_filter(args)?;
    let source = crate::registry::RegistrySource::new(Duration::from_millis(args.probe_timeout_ms));
    let host_list: Vec<String> = if args.hosts.is_empty() { vec![crate::hosts::local_host_name()] } else { args.hosts.clone() };
    let pb = if args.progress { Some(indicatif::ProgressBar::new_spinner()) } else { None };
    let mut found = crate::search::search(&source, &host_list, &builder, &filter, pb.as_ref());
    if let Some(pb) = pb { pb.finish_and_clear(); }
    log::info!("{} application(s) matched across {} host(s)", found.records.len(), host_list.len());

    let mut mode = None;
    if args.uninstall {
        if found.records.is_empty() {
            if !args.quiet { println!("{}", paint("Nothing matched; nothing to uninstall", "1;33")); }
        } else if args.dry_run || args.yes || confirm_uninstall(&found.records)? {
            mode = Some(if args.dry_run { "dry-run".to_string() } else { "uninstall".to_string() });
            executor.uninstall_records(&mut found.records);
        } else if !args.quiet {
            println!("{}", paint("Uninstall cancelled", "1;33"));
        }
    }
    let report = UninstallReport::new(host_list, found, mode);
    print_stdout(&report, args)?;
    write_outputs(&report, args);
    let (_, failed) = report.exit_tally();
    Ok(if failed > 0 { 1 } else { 0 })
}

fn succeeded(code: i32) -> bool { code == 0 || code == 3010 }

fn build_filter(args: &Args) -> anyhow::Result<SearchFilter> {
    let pattern = match args.name.as_deref() {
        Some(p) if args.regex => Some(Matcher::regex(p).with_context(|| format!("invalid --name regex {:?}", p))?),
        Some(p) => Some(Matcher::glob(p).with_context(|| format!("invalid --name pattern {:?}", p))?),
        None => None,
    };
    let version = |v: Option<&String>, flag: &str| -> anyhow::Result<Option<Version>> {
        v.map(|s| s.parse::<Version>().map_err(|e| anyhow::anyhow!("{}: {}", flag, e))).transpose()
    };
    let predicates = args.filters.iter().map(|w| Predicate::parse(w)).collect::<anyhow::Result<Vec<_>>>()?;
    Ok(SearchFilter {
        pattern,
        property: args.property,
        min_version: version(args.min_version.as_ref(), "--min-version")?,
        max_version: version(args.max_version.as_ref(), "--max-version")?,
        predicates,
        custom: None,
    })
}

fn confirm_uninstall(records: &[ApplicationRecord]) -> anyhow::Result<bool> {
    if !std::io::stdin().is_terminal() { anyhow::bail!("refusing to uninstall without confirmation; pass --yes or --dry-run"); }
    println!("\nThe following application(s) will be uninstalled:");
    for r in records { println!("  - {} {} on {}", r.name, r.version, r.host); }
    println!();
    let ok = inquire::Confirm::new("Proceed with uninstall?")
        .with_default(false)
        .with_help_message("Type 'y' to confirm, Enter to cancel")
        .prompt()?;
    Ok(ok)
}

fn print_stdout(rep: &UninstallReport, args: &Args) -> anyhow::Result<()> {
    match args.output {
        OutputFmt::Table => {
            let mut cols = crate::export::columns_or(&args.columns, &crate::export::DEFAULT_COLUMNS);
            if !args.no_header { println!("{}", paint(&format!("{} application(s) on {} host(s){}", rep.records.len(), rep.hosts.len(), match rep.mode.as_ref() { Some(m) => format!(" | {}", m), None => String::new() }), "1;36")); }
            let width = if args.no_truncate { None } else { Some(args.cell_width.unwrap_or(60)) };
            if rep.attempted() && !cols.contains(&Property::ExitCode) { cols.push(Property::ExitCode); }
            println!("{}", crate::export::render_table(&rep.records, &cols, &|h| paint(h, "1"), width));
        }
        OutputFmt::List => {
            let cols = crate::export::columns_or(&args.columns, &crate::export::all_columns());
            let w = cols.iter().map(|c| c.header().len()).max().unwrap_or(0);
            for r in &rep.records {
                for c in &cols { println!("{} : {}", paint(&format!("{:<w$}", c.header(), w = w), "1"), r.property(*c)); }
                println!();
            }
        }
        OutputFmt::Json => println!("{}", crate::export::render_json(rep)?),
        OutputFmt::Ndjson => { for r in &rep.records { println!("{}", serde_json::to_string(r)?); } }
        OutputFmt::Csv => crate::export::write_delimited(std::io::stdout().lock(), b',', &rep.records, &crate::export::columns_or(&args.columns, &crate::export::all_columns()))?,
        OutputFmt::Tsv => crate::export::write_delimited(std::io::stdout().lock(), b'\t', &rep.records, &crate::export::columns_or(&args.columns, &crate::export::all_columns()))?,
        OutputFmt::Xml => println!("{}", crate::export::render_xml(&rep.records, &crate::export::columns_or(&args.columns, &crate::export::all_columns()))?),
        OutputFmt::Markdown => print!("{}", crate::markdown::render_markdown(rep, &crate::export::columns_or(&args.columns, &crate::export::DEFAULT_COLUMNS))),
    }
    Ok(())
}

fn report_written(kind: &str, path: &str, res: Result<(), String>, quiet: bool) {
    match res {
        Ok(_) => { if !quiet { println!("{}", paint(&format!("{} written: {}", kind, path), "1;36")); } }
        Err(e) => log::error!("{} write failed for {}: {}", kind, path, e),
    }
}

fn write_outputs(rep: &UninstallReport, args: &Args) {
    let all = crate::export::columns_or(&args.columns, &crate::export::all_columns());
    let short = crate::export::columns_or(&args.columns, &crate::export::DEFAULT_COLUMNS);
    if let Some(p) = args.html.as_ref() {
        let html = crate::html::render_html(rep, args.theme, &short);
        match std::fs::write(p, html) {
            Ok(_) => {
                if !args.no_open { open_file_default(PathBuf::from(p)); }
                if !args.quiet { println!("{}", paint(&format!("HTML generated: {}", p), "1;36")); }
            }
            Err(e) => log::error!("HTML write failed for {}: {}", p, e),
        }
    }
    if let Some(p) = args.json_path.as_ref() {
        let res = crate::export::render_json(rep).map_err(|e| e.to_string()).and_then(|j| std::fs::write(p, j).map_err(|e| e.to_string()));
        report_written("JSON", p, res, args.quiet);
    }
    if let Some(p) = args.csv_path.as_ref() { report_written("CSV", p, crate::export::write_csv(p, &rep.records, &all).map_err(|e| e.to_string()), args.quiet); }
    if let Some(p) = args.tsv_path.as_ref() { report_written("TSV", p, crate::export::write_tsv(p, &rep.records, &all).map_err(|e| e.to_string()), args.quiet); }
    if let Some(p) = args.ndjson_path.as_ref() { report_written("NDJSON", p, crate::export::write_ndjson(p, &rep.records).map_err(|e| e.to_string()), args.quiet); }
    if let Some(p) = args.xml_path.as_ref() {
        let res = crate::export::render_xml(&rep.records, &all).map_err(|e| e.to_string()).and_then(|x| std::fs::write(p, x).map_err(|e| e.to_string()));
        report_written("XML", p, res, args.quiet);
    }
    if let Some(p) = args.md_path.as_ref() { report_written("Markdown", p, std::fs::write(p, crate::markdown::render_markdown(rep, &short)).map_err(|e| e.to_string()), args.quiet); }
    if let Some(dir) = args.export_dir.as_ref() {
        if let Err(e) = std::fs::create_dir_all(dir) { log::error!("Cannot create export dir {}: {}", dir, e); return; }
        let ts = chrono::Local::now().format("%Y%m%d-%H%M%S").to_string();
        let base = PathBuf::from(dir);
        let html_path = base.join(format!("report-{}.html", ts));
        match std::fs::write(&html_path, crate::html::render_html(rep, args.theme, &short)) {
            Ok(_) => { if !args.no_open { open_file_default(html_path.clone()); } if !args.quiet { println!("{}", paint(&format!("HTML generated: {}", html_path.to_string_lossy()), "1;36")); } }
            Err(e) => log::error!("HTML write failed for {}: {}", html_path.to_string_lossy(), e),
        }
        let json_path = base.join(format!("report-{}.json", ts)).to_string_lossy().into_owned();
        let res = crate::export::render_json(rep).map_err(|e| e.to_string()).and_then(|j| std::fs::write(&json_path, j).map_err(|e| e.to_string()));
        report_written("JSON", &json_path, res, args.quiet);
        let csv_path = base.join(format!("apps-{}.csv", ts)).to_string_lossy().into_owned();
        report_written("CSV", &csv_path, crate::export::write_csv(&csv_path, &rep.records, &all).map_err(|e| e.to_string()), args.quiet);
        let ndjson_path = base.join(format!("apps-{}.ndjson", ts)).to_string_lossy().into_owned();
        report_written("NDJSON", &ndjson_path, crate::export::write_ndjson(&ndjson_path, &rep.records).map_err(|e| e.to_string()), args.quiet);
        let md_path = base.join(format!("report-{}.md", ts)).to_string_lossy().into_owned();
        report_written("Markdown", &md_path, std::fs::write(&md_path, crate::markdown::render_markdown(rep, &short)).map_err(|e| e.to_string()), args.quiet);
    }
}

fn apply_config(args: &mut Args, cfg: AppConfig) {
    if args.hosts.is_empty() && let Some(v) = cfg.hosts { args.hosts = v; }
    if args.name.is_none() && let Some(v) = cfg.name { args.name = Some(v); }
    if let Some(v) = cfg.regex { args.regex = args.regex || v; }
    if args.property == Property::Name && let Some(v) = cfg.property { args.property = v; }
    if args.filters.is_empty() && let Some(v) = cfg.filters { args.filters = v; }
    if let Some(v) = cfg.include_system_components { args.include_system_components = args.include_system_components || v; }
    if args.probe_timeout_ms == 1500 && let Some(v) = cfg.probe_timeout_ms { args.probe_timeout_ms = v; }
    if args.timeout_secs.is_none() && let Some(v) = cfg.timeout_secs { args.timeout_secs = Some(v); }
    if let Some(v) = cfg.dry_run { args.dry_run = args.dry_run || v; }
    if args.output == OutputFmt::Table && let Some(v) = cfg.output { args.output = v; }
    if args.columns.is_empty() && let Some(v) = cfg.columns { args.columns = v; }
    if let Some(v) = cfg.no_truncate { args.no_truncate = args.no_truncate || v; }
    if args.cell_width.is_none() && let Some(v) = cfg.cell_width { args.cell_width = Some(v); }
    if let Some(v) = cfg.theme { args.theme = v; }
    if args.rules.is_none() && let Some(v) = cfg.rules { args.rules = Some(v); }
    if args.html.is_none() && let Some(v) = cfg.html { args.html = Some(v); }
    if args.json_path.is_none() && let Some(v) = cfg.json_path { args.json_path = Some(v); }
    if args.csv_path.is_none() && let Some(v) = cfg.csv_path { args.csv_path = Some(v); }
    if args.tsv_path.is_none() && let Some(v) = cfg.tsv_path { args.tsv_path = Some(v); }
    if args.ndjson_path.is_none() && let Some(v) = cfg.ndjson_path { args.ndjson_path = Some(v); }
    if args.xml_path.is_none() && let Some(v) = cfg.xml_path { args.xml_path = Some(v); }
    if args.md_path.is_none() && let Some(v) = cfg.md_path { args.md_path = Some(v); }
    if args.export_dir.is_none() && let Some(v) = cfg.export_dir { args.export_dir = Some(v); }
    if let Some(v) = cfg.progress { args.progress = args.progress || v; }
    if let Some(v) = cfg.force_color { args.force_color = args.force_color || v; }
    if args.log_format.is_none() && let Some(v) = cfg.log_format { args.log_format = Some(v); }
    if args.log_path.is_none() && let Some(v) = cfg.log_path { args.log_path = Some(v); }
}

fn paint(s: &str, code: &str) -> String {
    if *ENABLE_COLOR.get().unwrap_or(&true) { format!("\x1b[{}m{}\x1b[0m", code, s) } else { s.to_string() }
}

#[cfg(target_os = "windows")]
fn open_file_default(p: PathBuf) {
    let mut s = p.to_string_lossy().into_owned();
    if s.starts_with("\\\\?\\") { s = s.trim_start_matches("\\\\?\\").to_string(); }
    let _ = std::process::Command::new("explorer").arg(&s).spawn()
        .or_else(|_| std::process::Command::new("cmd").args(["/C", "start", "", &s]).spawn())
        .map_err(|e| log::error!("Failed to open file {}: {}", s, e));
}

#[cfg(not(target_os = "windows"))]
fn open_file_default(p: PathBuf) {
    let s = p.to_string_lossy().into_owned();
    let _ = std::process::Command::new("xdg-open").arg(&s).spawn().map_err(|e| log::error!("Failed to open file {}: {}", s, e));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{AppVersion, Arch, Hive};
    use crate::classifier::CommandKind;
    use crate::rewriter::SilentCommand;

    fn base_args() -> Args {
        Args { no_open: true, ..Default::default() }
    }

    fn rec(name: &str, version: &str, publisher: &str) -> ApplicationRecord {
        ApplicationRecord {
            host: "WS01".to_string(),
            name: name.to_string(),
            publisher: publisher.to_string(),
            version: AppVersion::parse(version),
            guid: None,
            hive: Hive::LocalMachine,
            user: None,
            key_path: String::new(),
            is_msi: false,
            system_component: false,
            command_kind: CommandKind::GenericExecutable,
            install_arch: Arch::X64,
            app_arch: Arch::Unknown,
            size_mb: 0.0,
            install_date: "N/A".to_string(),
            install_location: String::new(),
            install_source: String::new(),
            installer_cache: None,
            uninstall_string: String::new(),
            silent: SilentCommand::default(),
            exit_code: None,
        }
    }

    #[test]
    fn config_fills_only_unset_fields() {
        let mut args = Args { hosts: vec!["cli-host".to_string()], ..base_args() };
        let cfg: AppConfig = toml::from_str(r#"
            hosts = ["cfg-host"]
            name = "Java*"
            output = "csv"
            columns = ["name", "version", "size-mb"]
            timeout_secs = 900
            dry_run = true
        "#).unwrap();
        apply_config(&mut args, cfg);
        assert_eq!(args.hosts, vec!["cli-host"]);
        assert_eq!(args.name.as_deref(), Some("Java*"));
        assert_eq!(args.output, OutputFmt::Csv);
        assert_eq!(args.columns, vec![Property::Name, Property::Version, Property::SizeMb]);
        assert_eq!(args.timeout_secs, Some(900));
        assert!(args.dry_run);
    }

    #[test]
    fn empty_config_changes_nothing() {
        let mut args = base_args();
        apply_config(&mut args, AppConfig::default());
        assert!(args.hosts.is_empty() && args.name.is_none() && !args.dry_run);
        assert_eq!(args.output, OutputFmt::Table);
    }

    #[test]
    fn filter_from_flags() {
        let args = Args { name: Some("java".to_string()), min_version: Some("8.0".to_string()), filters: vec!["publisher=Oracle*".to_string()], ..base_args() };
        let f = build_filter(&args).unwrap();
        assert!(f.matches(&rec("Java 8 Update 401", "8.0.4010.7", "Oracle Corporation")));
        assert!(!f.matches(&rec("Java 8 Update 401", "8.0.4010.7", "Azul")));
        assert!(!f.matches(&rec("Java 7", "7.0.1", "Oracle Corporation")));
        assert!(!f.matches(&rec("Java Odd", "2023 43 06", "Oracle Corporation")));
    }

    #[test]
    fn regex_flag_switches_matcher() {
        let args = Args { name: Some("^7-zip".to_string()), regex: true, ..base_args() };
        let f = build_filter(&args).unwrap();
        assert!(f.matches(&rec("7-Zip 23.01 (x64)", "23.01", "Igor Pavlov")));
        assert!(!f.matches(&rec("Not 7-Zip", "1.0", "x")));
    }

    #[test]
    fn bad_flags_are_errors() {
        assert!(build_filter(&Args { min_version: Some("latest".to_string()), ..base_args() }).is_err());
        assert!(build_filter(&Args { name: Some("(".to_string()), regex: true, ..base_args() }).is_err());
        assert!(build_filter(&Args { filters: vec!["bogus=1".to_string()], ..base_args() }).is_err());
    }

    #[test]
    fn cli_parses_uninstall_flags() {
        let a = Args::try_parse_from(["WinUninstall", "--name", "7-Zip", "--hosts", "a,b", "--uninstall", "--dry-run", "--where", "kind!=MSI", "--timeout-secs", "60"]).unwrap();
        assert_eq!(a.hosts, vec!["a", "b"]);
        assert!(a.uninstall && a.dry_run);
        assert_eq!(a.filters, vec!["kind!=MSI"]);
        assert_eq!(a.timeout_secs, Some(60));
        assert!(Args::try_parse_from(["WinUninstall", "--command", "x.exe", "--uninstall"]).is_err());
        assert!(Args::try_parse_from(["WinUninstall", "--args", "/S"]).is_err());
    }

    #[test]
    fn dry_run_direct_command_exits_zero() {
        let _ = ENABLE_COLOR.set(false);
        let args = Args { command: Some(r#""C:\Apps\x\uninst.exe" /S"#.to_string()), dry_run: true, quiet: true, ..base_args() };
        assert_eq!(run(&args).unwrap(), 0);
        let args = Args { command: Some("msiexec /x {11111111-2222-3333-4444-555555555555} /qn".to_string()), dry_run: true, quiet: true, ..base_args() };
        assert_eq!(run(&args).unwrap(), 0);
        let args = Args { command: Some("no executable here".to_string()), dry_run: true, quiet: true, ..base_args() };
        assert_eq!(run(&args).unwrap(), 0);
    }
}
