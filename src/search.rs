use globset::{GlobBuilder, GlobMatcher};
use indicatif::ProgressBar;
use regex::Regex;
use crate::hosts;
use crate::record::{ApplicationRecord, HostContext, Property, RawUninstallEntry, RecordBuilder, Version};

/// Where raw uninstall entries come from. The registry in production, fixtures in tests.
pub trait UninstallSource {
    fn is_reachable(&self, host: &str) -> bool;
    fn entries(&self, host: &str) -> anyhow::Result<Vec<RawUninstallEntry>>;
}

#[derive(Clone, Debug)]
pub enum Matcher {
    Glob(GlobMatcher),
    Regex(Regex),
}

impl Matcher {
    /// Case-insensitive glob. A pattern without `*` or `?` matches as a substring.
    pub fn glob(pattern: &str) -> anyhow::Result<Self> {
        let p = pattern.trim();
        let p = if p.contains(['*', '?']) { p.to_string() } else { format!("*{}*", p) };
        let g = GlobBuilder::new(&p).case_insensitive(true).literal_separator(false).backslash_escape(false).build()?;
        Ok(Matcher::Glob(g.compile_matcher()))
    }

    pub fn regex(pattern: &str) -> anyhow::Result<Self> { Ok(Matcher::Regex(Regex::new(&format!("(?i){}", pattern))?)) }

    pub fn is_match(&self, value: &str) -> bool {
        match self {
            Matcher::Glob(g) => g.is_match(value),
            Matcher::Regex(r) => r.is_match(value),
        }
    }
}

/// `field=glob`, `field!=glob` or `field~regex`.
#[derive(Clone, Debug)]
pub struct Predicate {
    pub property: Property,
    pub matcher: Matcher,
    pub negate: bool,
}

impl Predicate {
    pub fn parse(expr: &str) -> anyhow::Result<Self> {
        let Some(i) = expr.find(['!', '~', '=']) else {
            anyhow::bail!("expected <field>=<glob>, <field>!=<glob> or <field>~<regex>, got {:?}", expr)
        };
        let (field, rest) = expr.split_at(i);
        let (value, negate, is_regex) = if let Some(v) = rest.strip_prefix("!=") {
            (v, true, false)
        } else if let Some(v) = rest.strip_prefix('~') {
            (v, false, true)
        } else if let Some(v) = rest.strip_prefix('=') {
            (v, false, false)
        } else {
            anyhow::bail!("unsupported operator in {:?}", expr)
        };
        let property = Property::parse_loose(field).ok_or_else(|| anyhow::anyhow!("unknown field {:?} in {:?}", field.trim(), expr))?;
        let matcher = if is_regex { Matcher::regex(value.trim())? } else { Matcher::glob(value)? };
        Ok(Predicate { property, matcher, negate })
    }

    pub fn matches(&self, r: &ApplicationRecord) -> bool { self.matcher.is_match(&r.property(self.property)) != self.negate }
}

pub struct SearchFilter {
    pub pattern: Option<Matcher>,
    pub property: Property,
    pub min_version: Option<Version>,
    pub max_version: Option<Version>,
    pub predicates: Vec<Predicate>,
    pub custom: Option<Box<dyn Fn(&ApplicationRecord) -> bool>>,
}

impl Default for SearchFilter {
    fn default() -> Self {
        Self { pattern: None, property: Property::Name, min_version: None, max_version: None, predicates: Vec::new(), custom: None }
    }
}

impl SearchFilter {
    pub fn matches(&self, r: &ApplicationRecord) -> bool {
        if let Some(m) = &self.pattern && !m.is_match(&r.property(self.property)) { return false; }
        if self.min_version.is_some() || self.max_version.is_some() {
            // unparseable versions never satisfy a range
            let Some(v) = r.version.parsed() else { return false };
            if self.min_version.as_ref().is_some_and(|min| v < min) { return false; }
            if self.max_version.as_ref().is_some_and(|max| v > max) { return false; }
        }
        if !self.predicates.iter().all(|p| p.matches(r)) { return false; }
        self.custom.as_ref().is_none_or(|f| f(r))
    }
}

#[derive(Debug, Default)]
pub struct SearchReport {
    pub records: Vec<ApplicationRecord>,
    pub unreachable: Vec<String>,
    pub failed: Vec<String>,
}

/// Scans hosts one after another. Unreachable hosts and registry failures are logged and skipped.
pub fn search(source: &dyn UninstallSource, hosts_list: &[String], builder: &RecordBuilder, filter: &SearchFilter, progress: Option<&ProgressBar>) -> SearchReport {
    let mut report = SearchReport::default();
    let local = hosts::local_host_name();
    let targets: Vec<String> = if hosts_list.is_empty() { vec![local.clone()] } else { hosts_list.to_vec() };
    for host in &targets {
        if let Some(pb) = progress { pb.set_message(format!("Scanning {}", host)); }
        if !source.is_reachable(host) {
            log::warn!("Host {} is unreachable; skipping", host);
            report.unreachable.push(host.clone());
            continue;
        }
        let ctx = HostContext { host: if hosts::is_local(host) { local.clone() } else { host.clone() } };
        let entries = match source.entries(host) {
            Ok(e) => e,
            Err(e) => {
                log::error!("Reading uninstall keys on {} failed: {:#}", host, e);
                report.failed.push(host.clone());
                continue;
            }
        };
        let before = report.records.len();
        report.records.extend(entries.iter().filter_map(|raw| builder.build(raw, &ctx)).filter(|r| filter.matches(r)));
        log::info!("{}: {} of {} entries matched", host, report.records.len() - before, entries.len());
        if let Some(pb) = progress { pb.tick(); }
    }
    if report.unreachable.len() == targets.len() { log::warn!("No reachable hosts; result is empty"); }
    report.records.sort_by(|a, b| a.host.to_lowercase().cmp(&b.host.to_lowercase()).then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase())));
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use crate::classifier::Classifier;
    use crate::record::BuilderOptions;
    use crate::rewriter::Rewriter;

    struct FakeSource {
        hosts: HashMap<String, Result<Vec<RawUninstallEntry>, String>>,
    }

    impl UninstallSource for FakeSource {
        fn is_reachable(&self, host: &str) -> bool { self.hosts.contains_key(host) }
        fn entries(&self, host: &str) -> anyhow::Result<Vec<RawUninstallEntry>> {
            match self.hosts.get(host) {
                Some(Ok(v)) => Ok(v.clone()),
                Some(Err(e)) => Err(anyhow::anyhow!(e.clone())),
                None => anyhow::bail!("not reachable"),
            }
        }
    }

    fn raw(name: &str, version: &str) -> RawUninstallEntry {
        RawUninstallEntry {
            key_name: name.replace(' ', ""),
            parent_path: r"HKLM\SOFTWARE\Microsoft\Windows\CurrentVersion\Uninstall".to_string(),
            display_name: Some(name.to_string()),
            display_version: Some(version.to_string()),
            publisher: Some("Contoso".to_string()),
            uninstall_string: Some(format!(r#""C:\Program Files\{}\uninst.exe" /uninstall"#, name)),
            ..Default::default()
        }
    }

    fn builder() -> RecordBuilder {
        RecordBuilder::new(Classifier::new(&[]).unwrap(), Rewriter::new("quiet", "norestart").unwrap(), BuilderOptions::default())
    }

    fn source() -> FakeSource {
        let mut hosts = HashMap::new();
        hosts.insert("srv-a".to_string(), Ok(vec![raw("Zeta Tool", "1.0"), raw("Alpha Agent", "10.5.2"), raw("Odd Thing", "2023 43 06")]));
        hosts.insert("srv-b".to_string(), Ok(vec![raw("Alpha Agent", "10.6.0")]));
        hosts.insert("srv-broken".to_string(), Err("access denied".to_string()));
        FakeSource { hosts }
    }

    fn names(r: &SearchReport) -> Vec<String> { r.records.iter().map(|x| format!("{}:{}", x.host, x.name)).collect() }

    #[test]
    fn results_sorted_by_host_then_name() {
        let hosts = vec!["srv-b".to_string(), "srv-a".to_string()];
        let r = search(&source(), &hosts, &builder(), &SearchFilter::default(), None);
        assert_eq!(names(&r), vec!["srv-a:Alpha Agent", "srv-a:Odd Thing", "srv-a:Zeta Tool", "srv-b:Alpha Agent"]);
    }

    #[test]
    fn glob_name_filter_is_case_insensitive() {
        let f = SearchFilter { pattern: Some(Matcher::glob("alpha*").unwrap()), ..Default::default() };
        let r = search(&source(), &["srv-a".to_string()], &builder(), &f, None);
        assert_eq!(names(&r), vec!["srv-a:Alpha Agent"]);
        let f = SearchFilter { pattern: Some(Matcher::glob("tool").unwrap()), ..Default::default() };
        assert_eq!(search(&source(), &["srv-a".to_string()], &builder(), &f, None).records.len(), 1);
    }

    #[test]
    fn regex_filter_on_other_property() {
        let f = SearchFilter { pattern: Some(Matcher::regex(r"^10\.6").unwrap()), property: Property::Version, ..Default::default() };
        let r = search(&source(), &["srv-a".to_string(), "srv-b".to_string()], &builder(), &f, None);
        assert_eq!(names(&r), vec!["srv-b:Alpha Agent"]);
    }

    #[test]
    fn version_range_excludes_raw_versions() {
        let f = SearchFilter { min_version: Some("1.0".parse().unwrap()), max_version: Some("10.5.9".parse().unwrap()), ..Default::default() };
        let r = search(&source(), &["srv-a".to_string(), "srv-b".to_string()], &builder(), &f, None);
        assert_eq!(names(&r), vec!["srv-a:Alpha Agent", "srv-a:Zeta Tool"]);
    }

    #[test]
    fn unreachable_and_failing_hosts_are_reported_not_fatal() {
        let hosts = vec!["ghost".to_string(), "srv-broken".to_string(), "srv-b".to_string()];
        let r = search(&source(), &hosts, &builder(), &SearchFilter::default(), None);
        assert_eq!(r.unreachable, vec!["ghost"]);
        assert_eq!(r.failed, vec!["srv-broken"]);
        assert_eq!(r.records.len(), 1);
    }

    #[test]
    fn no_reachable_hosts_gives_empty_result() {
        let r = search(&source(), &["ghost1".to_string(), "ghost2".to_string()], &builder(), &SearchFilter::default(), None);
        assert!(r.records.is_empty());
        assert_eq!(r.unreachable.len(), 2);
    }

    #[test]
    fn where_predicates_and_closure() {
        let p = Predicate::parse("name!=*odd*").unwrap();
        let q = Predicate::parse("publisher=contoso").unwrap();
        let f = SearchFilter { predicates: vec![p, q], custom: Some(Box::new(|r: &ApplicationRecord| r.name.len() > 9)), ..Default::default() };
        let r = search(&source(), &["srv-a".to_string()], &builder(), &f, None);
        assert_eq!(names(&r), vec!["srv-a:Alpha Agent"]);
    }

    #[test]
    fn predicate_syntax() {
        let p = Predicate::parse("Kind~^exec").unwrap();
        assert_eq!(p.property, Property::Kind);
        assert!(!p.negate);
        assert!(Predicate::parse("install-location!=C:\\Program Files*").unwrap().negate);
        assert!(Predicate::parse("nonsense=1").is_err());
        assert!(Predicate::parse("name").is_err());
        assert!(Predicate::parse("name!x").is_err());
        let p = Predicate::parse("name=a~b").unwrap();
        assert!(!p.negate);
        assert!(p.matcher.is_match("xa~by"));
    }

    #[test]
    fn backslashes_in_globs_are_literal() {
        let m = Matcher::glob(r"C:\Program Files\*").unwrap();
        assert!(m.is_match(r"C:\Program Files\Contoso\App"));
        assert!(!m.is_match(r"D:\Apps"));
    }
}
