use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use chrono::NaiveDate;
use clap::ValueEnum;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use crate::classifier::{is_guid, Classifier, CommandKind};
use crate::rewriter::{passthrough, Rewriter, SilentCommand};

pub const NOT_AVAILABLE: &str = "N/A";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Hive { #[default] LocalMachine, Users }

impl Hive {
    pub fn label(self) -> &'static str { match self { Hive::LocalMachine => "HKLM", Hive::Users => "HKU" } }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Arch {
    #[serde(rename = "x86")] X86,
    #[serde(rename = "x64")] X64,
    Unknown,
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(match self { Arch::X86 => "x86", Arch::X64 => "x64", Arch::Unknown => "Unknown" }) }
}

/// One uninstall subkey as read from the registry.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RawUninstallEntry {
    pub key_name: String,
    pub parent_path: String,
    pub hive: Hive,
    pub user_sid: Option<String>,
    pub user_name: Option<String>,
    pub display_name: Option<String>,
    pub display_version: Option<String>,
    pub publisher: Option<String>,
    pub install_date: Option<String>,
    pub uninstall_string: Option<String>,
    pub quiet_uninstall_string: Option<String>,
    pub install_location: Option<String>,
    pub install_source: Option<String>,
    pub estimated_size_kb: Option<u32>,
    pub system_component: bool,
    pub windows_installer: bool,
    pub installer_cache: Option<String>,
}

/// Strict `MAJOR.MINOR[.PATCH[.BUILD]]`. Missing trailing parts compare as zero.
#[derive(Clone, Copy, Debug)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: Option<u64>,
    pub build: Option<u64>,
}

impl Version {
    fn key(&self) -> (u64, u64, u64, u64) { (self.major, self.minor, self.patch.unwrap_or(0), self.build.unwrap_or(0)) }
}

impl PartialEq for Version { fn eq(&self, other: &Self) -> bool { self.key() == other.key() } }
impl Eq for Version {}
impl PartialOrd for Version { fn partial_cmp(&self, other: &Self) -> Option<Ordering> { Some(self.cmp(other)) } }
impl Ord for Version { fn cmp(&self, other: &Self) -> Ordering { self.key().cmp(&other.key()) } }

impl FromStr for Version {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split('.').collect();
        if !(2..=4).contains(&parts.len()) { return Err(format!("not a MAJOR.MINOR[.PATCH[.BUILD]] version: {}", s)); }
        let mut nums: Vec<u64> = Vec::with_capacity(4);
        for p in &parts {
            if p.is_empty() || !p.bytes().all(|b| b.is_ascii_digit()) { return Err(format!("non-numeric version component {:?} in {}", p, s)); }
            nums.push(p.parse::<u64>().map_err(|e| format!("{}: {}", s, e))?);
        }
        Ok(Version { major: nums[0], minor: nums[1], patch: nums.get(2).copied(), build: nums.get(3).copied() })
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)?;
        if let Some(p) = self.patch { write!(f, ".{}", p)?; }
        if let Some(b) = self.build { write!(f, ".{}", b)?; }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum AppVersion { Parsed(Version), Raw(String) }

impl AppVersion {
    pub fn parse(s: &str) -> Self {
        match s.parse::<Version>() {
            Ok(v) => AppVersion::Parsed(v),
            Err(e) => {
                if !s.trim().is_empty() { log::debug!("Keeping raw version: {}", e); }
                AppVersion::Raw(s.trim().to_string())
            }
        }
    }

    pub fn parsed(&self) -> Option<&Version> { match self { AppVersion::Parsed(v) => Some(v), AppVersion::Raw(_) => None } }
}

impl fmt::Display for AppVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { match self { AppVersion::Parsed(v) => v.fmt(f), AppVersion::Raw(s) => f.write_str(s) } }
}

impl Serialize for AppVersion {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> { s.collect_str(self) }
}

impl<'de> Deserialize<'de> for AppVersion {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> { Ok(AppVersion::parse(&String::deserialize(d)?)) }
}

/// Normalized, report-ready application entry.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApplicationRecord {
    pub host: String,
    pub name: String,
    pub publisher: String,
    pub version: AppVersion,
    pub guid: Option<String>,
    pub hive: Hive,
    pub user: Option<String>,
    pub key_path: String,
    pub is_msi: bool,
    pub system_component: bool,
    pub command_kind: CommandKind,
    pub install_arch: Arch,
    pub app_arch: Arch,
    pub size_mb: f64,
    pub install_date: String,
    pub install_location: String,
    pub install_source: String,
    pub installer_cache: Option<String>,
    pub uninstall_string: String,
    pub silent: SilentCommand,
    pub exit_code: Option<i32>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Property { Name, Publisher, Version, Guid, Host, Hive, User, KeyPath, Kind, InstallArch, AppArch, InstallDate, InstallLocation, InstallSource, UninstallString, QuietUninstallString, InstallerCache, SizeMb, Msi, ExitCode }

impl ApplicationRecord {
    pub fn property(&self, p: Property) -> String {
        match p {
            Property::Name => self.name.clone(),
            Property::Publisher => self.publisher.clone(),
            Property::Version => self.version.to_string(),
            Property::Guid => self.guid.clone().unwrap_or_default(),
            Property::Host => self.host.clone(),
            Property::Hive => self.hive.label().to_string(),
            Property::User => self.user.clone().unwrap_or_default(),
            Property::KeyPath => self.key_path.clone(),
            Property::Kind => self.command_kind.label().to_string(),
            Property::InstallArch => self.install_arch.to_string(),
            Property::AppArch => self.app_arch.to_string(),
            Property::InstallDate => self.install_date.clone(),
            Property::InstallLocation => self.install_location.clone(),
            Property::InstallSource => self.install_source.clone(),
            Property::UninstallString => self.uninstall_string.clone(),
            Property::QuietUninstallString => self.silent.command_line.clone(),
            Property::InstallerCache => self.installer_cache.clone().unwrap_or_default(),
            Property::SizeMb => format!("{:.2}", self.size_mb),
            Property::Msi => self.is_msi.to_string(),
            Property::ExitCode => self.exit_code.map(|c| c.to_string()).unwrap_or_default(),
        }
    }
}

impl Property {
    pub fn header(self) -> &'static str {
        match self {
            Property::Name => "Name",
            Property::Publisher => "Publisher",
            Property::Version => "Version",
            Property::Guid => "GUID",
            Property::Host => "Host",
            Property::Hive => "Hive",
            Property::User => "User",
            Property::KeyPath => "KeyPath",
            Property::Kind => "Kind",
            Property::InstallArch => "InstallArch",
            Property::AppArch => "AppArch",
            Property::InstallDate => "InstallDate",
            Property::InstallLocation => "InstallLocation",
            Property::InstallSource => "InstallSource",
            Property::UninstallString => "UninstallString",
            Property::QuietUninstallString => "QuietUninstallString",
            Property::InstallerCache => "InstallerCache",
            Property::SizeMb => "SizeMB",
            Property::Msi => "MSI",
            Property::ExitCode => "ExitCode",
        }
    }

    /// Accepts `install-location`, `InstallLocation`, `install_location` alike.
    pub fn parse_loose(s: &str) -> Option<Property> {
        let norm = |x: &str| x.chars().filter(|c| c.is_ascii_alphanumeric()).collect::<String>().to_ascii_lowercase();
        let want = norm(s);
        Property::value_variants().iter().copied().find(|p| norm(p.header()) == want || p.to_possible_value().is_some_and(|v| norm(v.get_name()) == want))
    }
}

#[derive(Clone, Debug)]
pub struct HostContext {
    pub host: String,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct BuilderOptions {
    pub include_system_components: bool,
}

pub fn normalize_install_date(raw: Option<&str>) -> String {
    let s = raw.map(str::trim).unwrap_or("");
    let parsed = NaiveDate::parse_from_str(s, "%Y%m%d")
        .or_else(|_| NaiveDate::parse_from_str(s, "%Y/%m/%d"))
        .or_else(|_| NaiveDate::parse_from_str(s, "%Y-%m-%d"));
    match parsed {
        Ok(d) => d.format("%Y-%m-%d").to_string(),
        Err(e) => {
            if !s.is_empty() { log::debug!("Unparseable InstallDate {:?}: {}", s, e); }
            NOT_AVAILABLE.to_string()
        }
    }
}

pub fn size_mb(kb: Option<u32>) -> f64 { kb.map(|k| (k as f64 / 1024.0 * 100.0).round() / 100.0).unwrap_or(0.0) }

pub fn registry_arch(parent_path: &str) -> Arch {
    if parent_path.to_ascii_lowercase().contains("wow6432node") { Arch::X86 } else { Arch::X64 }
}

pub fn app_arch(install_location: &str) -> Arch {
    let l = install_location.to_ascii_lowercase();
    if l.contains(r"\program files (x86)") { Arch::X86 } else if l.contains(r"\program files") { Arch::X64 } else { Arch::Unknown }
}

fn non_empty(s: Option<&str>) -> Option<&str> { s.map(str::trim).filter(|s| !s.is_empty()) }

pub struct RecordBuilder {
    classifier: Classifier,
    rewriter: Rewriter,
    options: BuilderOptions,
}

impl RecordBuilder {
    pub fn new(classifier: Classifier, rewriter: Rewriter, options: BuilderOptions) -> Self { Self { classifier, rewriter, options } }

    /// Returns `None` for entries that are not applications or are filtered system components.
    pub fn build(&self, raw: &RawUninstallEntry, ctx: &HostContext) -> Option<ApplicationRecord> {
        let Some(name) = non_empty(raw.display_name.as_deref()) else {
            log::trace!("Skipping {} without DisplayName", raw.key_name);
            return None;
        };
        if raw.system_component && !self.options.include_system_components {
            log::trace!("Skipping system component {}", name);
            return None;
        }
        let (silent, kind, cmd_guid) = self.silent_command(raw);
        let guid = if is_guid(&raw.key_name) { Some(raw.key_name.trim().to_uppercase()) } else { cmd_guid };
        let install_location = raw.install_location.as_deref().unwrap_or("").trim().to_string();
        Some(ApplicationRecord {
            host: ctx.host.clone(),
            name: name.to_string(),
            publisher: raw.publisher.as_deref().unwrap_or("").trim().to_string(),
            version: AppVersion::parse(raw.display_version.as_deref().unwrap_or("")),
            guid,
            hive: raw.hive,
            user: raw.user_name.clone().or_else(|| raw.user_sid.clone()),
            key_path: format!("{}\\{}", raw.parent_path, raw.key_name),
            is_msi: raw.windows_installer || kind == CommandKind::MsiInvocation,
            system_component: raw.system_component,
            command_kind: kind,
            install_arch: registry_arch(&raw.parent_path),
            app_arch: app_arch(&install_location),
            size_mb: size_mb(raw.estimated_size_kb),
            install_date: normalize_install_date(raw.install_date.as_deref()),
            install_location,
            install_source: raw.install_source.as_deref().unwrap_or("").trim().to_string(),
            installer_cache: raw.installer_cache.clone(),
            uninstall_string: raw.uninstall_string.as_deref().unwrap_or("").trim().to_string(),
            silent,
            exit_code: None,
        })
    }

    fn silent_command(&self, raw: &RawUninstallEntry) -> (SilentCommand, CommandKind, Option<String>) {
        // vendor-provided quiet strings are trusted as-is
        if let Some(q) = non_empty(raw.quiet_uninstall_string.as_deref()) {
            let split = self.classifier.split(q);
            return (SilentCommand { executable: split.executable, arguments: split.arguments, command_line: q.to_string() }, CommandKind::VendorQuiet, None);
        }
        let Some(us) = non_empty(raw.uninstall_string.as_deref()) else { return (SilentCommand::default(), CommandKind::Unclassified, None) };
        match self.classifier.classify(us) {
            Some(c) => (self.rewriter.rewrite(&c), c.kind(), c.guid().map(str::to_string)),
            None => (passthrough(&self.classifier.split(us)), CommandKind::Unclassified, None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder(include_system: bool) -> RecordBuilder {
        RecordBuilder::new(Classifier::new(&[]).unwrap(), Rewriter::new("quiet", "norestart").unwrap(), BuilderOptions { include_system_components: include_system })
    }

    fn ctx() -> HostContext { HostContext { host: "WS01".to_string() } }

    fn entry(name: &str) -> RawUninstallEntry {
        RawUninstallEntry {
            key_name: "{11111111-2222-3333-4444-555555555555}".to_string(),
            parent_path: r"HKLM\SOFTWARE\Microsoft\Windows\CurrentVersion\Uninstall".to_string(),
            display_name: Some(name.to_string()),
            display_version: Some("10.5.2".to_string()),
            publisher: Some("Contoso".to_string()),
            install_date: Some("20240115".to_string()),
            uninstall_string: Some("MsiExec.exe /X{11111111-2222-3333-4444-555555555555}".to_string()),
            install_location: Some(r"C:\Program Files\Contoso\App".to_string()),
            estimated_size_kb: Some(52_480),
            windows_installer: true,
            ..Default::default()
        }
    }

    #[test]
    fn dates_in_both_layouts_normalize_identically() {
        assert_eq!(normalize_install_date(Some("20240115")), normalize_install_date(Some("2024/01/15")));
        assert_eq!(normalize_install_date(Some("20240115")), "2024-01-15");
        assert_eq!(normalize_install_date(Some("15.01.2024")), NOT_AVAILABLE);
        assert_eq!(normalize_install_date(Some("20241345")), NOT_AVAILABLE);
        assert_eq!(normalize_install_date(None), NOT_AVAILABLE);
    }

    #[test]
    fn versions_order_and_raw_fallback() {
        let v = |s: &str| s.parse::<Version>().unwrap();
        assert!(v("10.5.2") > v("10.5.1"));
        assert!(v("10.5.2") < v("10.6.0"));
        assert_eq!(v("10.5"), v("10.5.0.0"));
        assert_eq!(AppVersion::parse("2023 43 06"), AppVersion::Raw("2023 43 06".to_string()));
        assert!(AppVersion::parse("1.2.3.4.5").parsed().is_none());
        assert!(AppVersion::parse("1.x").parsed().is_none());
        assert_eq!(AppVersion::parse("4.0.30319").to_string(), "4.0.30319");
    }

    #[test]
    fn version_serializes_as_string() {
        let j = serde_json::to_string(&AppVersion::parse("1.2.3")).unwrap();
        assert_eq!(j, "\"1.2.3\"");
        let back: AppVersion = serde_json::from_str("\"2023 43 06\"").unwrap();
        assert!(back.parsed().is_none());
    }

    #[test]
    fn size_is_megabytes_rounded() {
        assert_eq!(size_mb(Some(52_480)), 51.25);
        assert_eq!(size_mb(Some(1000)), 0.98);
        assert_eq!(size_mb(None), 0.0);
    }

    #[test]
    fn msi_entry_builds_full_record() {
        let r = builder(false).build(&entry("Contoso App"), &ctx()).unwrap();
        assert_eq!(r.host, "WS01");
        assert!(r.is_msi);
        assert_eq!(r.command_kind, CommandKind::MsiInvocation);
        assert_eq!(r.silent.command_line, "msiexec /qn /norestart /x \"{11111111-2222-3333-4444-555555555555}\"");
        assert_eq!(r.guid.as_deref(), Some("{11111111-2222-3333-4444-555555555555}"));
        assert_eq!(r.install_date, "2024-01-15");
        assert_eq!(r.size_mb, 51.25);
        assert!(r.key_path.ends_with(r"Uninstall\{11111111-2222-3333-4444-555555555555}"));
        assert_eq!(r.exit_code, None);
    }

    #[test]
    fn missing_display_name_is_skipped() {
        let mut e = entry("x");
        e.display_name = None;
        assert!(builder(true).build(&e, &ctx()).is_none());
        e.display_name = Some("   ".to_string());
        assert!(builder(true).build(&e, &ctx()).is_none());
    }

    #[test]
    fn system_components_need_opt_in() {
        let mut e = entry("Runtime Component");
        e.system_component = true;
        assert!(builder(false).build(&e, &ctx()).is_none());
        assert!(builder(true).build(&e, &ctx()).unwrap().system_component);
    }

    #[test]
    fn quiet_uninstall_string_is_used_verbatim() {
        let mut e = entry("Vendor Tool");
        e.quiet_uninstall_string = Some(r#""C:\Program Files\Vendor\uninst.exe" /S /modify"#.to_string());
        let r = builder(false).build(&e, &ctx()).unwrap();
        assert_eq!(r.command_kind, CommandKind::VendorQuiet);
        assert_eq!(r.silent.command_line, r#""C:\Program Files\Vendor\uninst.exe" /S /modify"#);
        assert_eq!(r.silent.executable, r"C:\Program Files\Vendor\uninst.exe");
        assert_eq!(r.silent.arguments, "/S /modify");
    }

    #[test]
    fn quiet_string_with_bare_msiexec_keeps_an_executable() {
        let mut e = entry("Contoso Agent");
        e.quiet_uninstall_string = Some("msiexec /x {11111111-2222-3333-4444-555555555555} /qn".to_string());
        let r = builder(false).build(&e, &ctx()).unwrap();
        assert_eq!(r.command_kind, CommandKind::VendorQuiet);
        assert_eq!(r.silent.executable, "msiexec");
        assert_eq!(r.silent.arguments, "/x {11111111-2222-3333-4444-555555555555} /qn");
        assert_eq!(r.silent.command_line, "msiexec /x {11111111-2222-3333-4444-555555555555} /qn");
    }

    #[test]
    fn unclassified_msi_with_trailing_flags_still_launchable() {
        let mut e = entry("Contoso Agent");
        e.uninstall_string = Some("MsiExec.exe /X{11111111-2222-3333-4444-555555555555} /qn".to_string());
        let r = builder(false).build(&e, &ctx()).unwrap();
        assert_eq!(r.command_kind, CommandKind::Unclassified);
        assert_eq!(r.silent.executable, "MsiExec.exe");
        assert_eq!(r.silent.command_line, "MsiExec.exe /X{11111111-2222-3333-4444-555555555555} /qn");
    }

    #[test]
    fn architectures_disagree_independently() {
        let mut e = entry("Mixed");
        e.install_location = Some(r"C:\Program Files (x86)\Mixed".to_string());
        let r = builder(false).build(&e, &ctx()).unwrap();
        assert_eq!(r.install_arch, Arch::X64);
        assert_eq!(r.app_arch, Arch::X86);
        e.parent_path = r"HKLM\SOFTWARE\WOW6432Node\Microsoft\Windows\CurrentVersion\Uninstall".to_string();
        e.install_location = Some(r"C:\Program Files\Mixed".to_string());
        let r = builder(false).build(&e, &ctx()).unwrap();
        assert_eq!(r.install_arch, Arch::X86);
        assert_eq!(r.app_arch, Arch::X64);
        e.install_location = Some(r"D:\Tools\Mixed".to_string());
        assert_eq!(builder(false).build(&e, &ctx()).unwrap().app_arch, Arch::Unknown);
    }

    #[test]
    fn malformed_fields_degrade_without_dropping() {
        let mut e = entry("Odd App");
        e.key_name = "OddApp".to_string();
        e.display_version = Some("2023 43 06".to_string());
        e.install_date = Some("yesterday".to_string());
        e.uninstall_string = Some("odd-uninstaller --now".to_string());
        e.estimated_size_kb = None;
        e.windows_installer = false;
        let r = builder(false).build(&e, &ctx()).unwrap();
        assert_eq!(r.version.to_string(), "2023 43 06");
        assert_eq!(r.install_date, NOT_AVAILABLE);
        assert_eq!(r.command_kind, CommandKind::Unclassified);
        assert_eq!(r.silent.command_line, "odd-uninstaller --now");
        assert_eq!(r.silent.executable, "");
        assert_eq!(r.size_mb, 0.0);
        assert!(r.guid.is_none());
        assert!(!r.is_msi);
    }

    #[test]
    fn property_lookup() {
        let r = builder(false).build(&entry("Contoso App"), &ctx()).unwrap();
        assert_eq!(r.property(Property::Publisher), "Contoso");
        assert_eq!(r.property(Property::Version), "10.5.2");
        assert_eq!(r.property(Property::Kind), "MSI");
        assert_eq!(r.property(Property::AppArch), "x64");
        assert_eq!(r.property(Property::SizeMb), "51.25");
        assert_eq!(r.property(Property::ExitCode), "");
    }

    #[test]
    fn property_names_parse_loosely() {
        assert_eq!(Property::parse_loose("InstallLocation"), Some(Property::InstallLocation));
        assert_eq!(Property::parse_loose("install-location"), Some(Property::InstallLocation));
        assert_eq!(Property::parse_loose("DisplayName"), None);
        assert_eq!(Property::parse_loose("guid"), Some(Property::Guid));
        assert_eq!(Property::parse_loose("sizemb"), Some(Property::SizeMb));
    }
}
