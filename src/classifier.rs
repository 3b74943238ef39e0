use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PACKAGE_CACHES: [&str; 2] = [r"C:\ProgramData\Package Cache", r"%ProgramData%\Package Cache"];

const GUID: &str = r"\{[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}\}";
// drive letter, UNC share or %VAR% rooted
const ROOT: &str = r"(?:[a-z]:\\|\\\\|%[a-z0-9_]+%)";
const DIR_PREFIX: &str = r#"(?:[a-z]:\\(?:[^"\\]+\\)*)?"#;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandKind { MsiInvocation, PackageCacheInstaller, ScriptInstaller, GenericExecutable, VendorQuiet, Unclassified }

impl CommandKind {
    pub fn label(self) -> &'static str {
        match self {
            CommandKind::MsiInvocation => "MSI",
            CommandKind::PackageCacheInstaller => "PackageCache",
            CommandKind::ScriptInstaller => "Script",
            CommandKind::GenericExecutable => "Executable",
            CommandKind::VendorQuiet => "VendorQuiet",
            CommandKind::Unclassified => "Unclassified",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ClassifiedCommand {
    MsiInvocation { executable: String, arguments: String, guid: String },
    PackageCacheInstaller { executable: String, arguments: String, guid: String },
    ScriptInstaller { executable: String, script: String, arguments: String },
    GenericExecutable { executable: String, arguments: String },
}

impl ClassifiedCommand {
    pub fn kind(&self) -> CommandKind {
        match self {
            ClassifiedCommand::MsiInvocation { .. } => CommandKind::MsiInvocation,
            ClassifiedCommand::PackageCacheInstaller { .. } => CommandKind::PackageCacheInstaller,
            ClassifiedCommand::ScriptInstaller { .. } => CommandKind::ScriptInstaller,
            ClassifiedCommand::GenericExecutable { .. } => CommandKind::GenericExecutable,
        }
    }

    pub fn executable(&self) -> &str {
        match self {
            ClassifiedCommand::MsiInvocation { executable, .. }
            | ClassifiedCommand::PackageCacheInstaller { executable, .. }
            | ClassifiedCommand::ScriptInstaller { executable, .. }
            | ClassifiedCommand::GenericExecutable { executable, .. } => executable,
        }
    }

    /// Raw argument string as found after the executable (for scripts: after the script path).
    pub fn arguments(&self) -> &str {
        match self {
            ClassifiedCommand::MsiInvocation { arguments, .. }
            | ClassifiedCommand::PackageCacheInstaller { arguments, .. }
            | ClassifiedCommand::ScriptInstaller { arguments, .. }
            | ClassifiedCommand::GenericExecutable { arguments, .. } => arguments,
        }
    }

    /// Executable plus the full argument string; scripts keep their script path as the first argument.
    pub fn split(&self) -> CommandSplit {
        let arguments = match self {
            ClassifiedCommand::ScriptInstaller { script, arguments, .. } if !arguments.is_empty() => format!("{} {}", script, arguments),
            ClassifiedCommand::ScriptInstaller { script, .. } => script.clone(),
            other => other.arguments().to_string(),
        };
        CommandSplit { executable: self.executable().to_string(), arguments }
    }

    pub fn guid(&self) -> Option<&str> {
        match self {
            ClassifiedCommand::MsiInvocation { guid, .. } | ClassifiedCommand::PackageCacheInstaller { guid, .. } => Some(guid),
            _ => None,
        }
    }
}

/// Best-effort executable/arguments split used for strings no rule recognizes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSplit {
    pub executable: String,
    pub arguments: String,
}

struct Rule {
    kind: CommandKind,
    re: Regex,
    extract: fn(&Captures) -> ClassifiedCommand,
}

pub struct Classifier {
    rules: Vec<Rule>,
    bare_tool: Regex,
}

fn group(c: &Captures, name: &str) -> String { c.name(name).map(|m| m.as_str().trim().to_string()).unwrap_or_default() }

fn extract_msi(c: &Captures) -> ClassifiedCommand {
    ClassifiedCommand::MsiInvocation { executable: group(c, "exe"), arguments: group(c, "args"), guid: group(c, "guid").to_uppercase() }
}

fn extract_package_cache(c: &Captures) -> ClassifiedCommand {
    ClassifiedCommand::PackageCacheInstaller { executable: group(c, "exe"), arguments: group(c, "args"), guid: group(c, "guid").to_uppercase() }
}

fn extract_script(c: &Captures) -> ClassifiedCommand {
    ClassifiedCommand::ScriptInstaller { executable: group(c, "exe"), script: group(c, "script"), arguments: group(c, "args") }
}

fn extract_generic(c: &Captures) -> ClassifiedCommand {
    let exe = c.name("qexe").or_else(|| c.name("exe")).map(|m| m.as_str().to_string()).unwrap_or_default();
    ClassifiedCommand::GenericExecutable { executable: exe, arguments: group(c, "args") }
}

impl Classifier {
    /// Builds the ordered rule list. `package_caches` extends the default package-cache roots.
    pub fn new(package_caches: &[String]) -> Result<Self, regex::Error> {
        let mut caches: Vec<String> = DEFAULT_PACKAGE_CACHES.iter().map(|s| s.to_string()).collect();
        for c in package_caches {
            if !caches.iter().any(|x| x.eq_ignore_ascii_case(c)) { caches.push(c.clone()); }
        }
        let cache_alt = caches.iter().map(|d| regex::escape(d.trim_end_matches('\\'))).collect::<Vec<_>>().join("|");
        let msi = format!(r#"(?i)^\s*"?(?P<exe>{DIR_PREFIX}msiexec(?:\.exe)?)"?(?P<args>(?:\s*/[a-z]+)*\s*(?P<guid>{GUID}))\s*$"#);
        let cache = format!(r#"(?i)^\s*"?(?P<exe>(?:{cache_alt})\\(?P<guid>{GUID})[^"\\]*\\(?:[^"\\]+\\)*[^"\\]+?\.exe)"?(?:\s+(?P<args>.*?))?\s*$"#);
        let script = format!(r#"(?i)^\s*"?(?P<exe>{DIR_PREFIX}(?:wscript|cscript|jscript)(?:\.exe)?)"?\s+(?P<script>"[^"]+\.(?:vbs|js)"|[^"\s]+\.(?:vbs|js))(?:\s+(?P<args>.*?))?\s*$"#);
        let generic = format!(r#"(?i)^\s*(?:"(?P<qexe>{ROOT}[^"]*?\.exe)"|(?P<exe>{ROOT}[^"]*?\.exe))(?:\s+(?P<args>.*?))?\s*$"#);
        let rules = vec![
            Rule { kind: CommandKind::MsiInvocation, re: Regex::new(&msi)?, extract: extract_msi },
            Rule { kind: CommandKind::PackageCacheInstaller, re: Regex::new(&cache)?, extract: extract_package_cache },
            Rule { kind: CommandKind::ScriptInstaller, re: Regex::new(&script)?, extract: extract_script },
            Rule { kind: CommandKind::GenericExecutable, re: Regex::new(&generic)?, extract: extract_generic },
        ];
        let bare_tool = Regex::new(&format!(r#"(?i)^\s*"?(?P<exe>{DIR_PREFIX}(?:msiexec|wscript|cscript|rundll32)(?:\.exe)?)"?(?:\s+(?P<args>.*?))?\s*$"#))?;
        Ok(Self { rules, bare_tool })
    }

    /// Executable/arguments split for launching a command verbatim. Unlike `classify` this also
    /// accepts system tools invoked without `.exe`, such as `msiexec /x {GUID} /qn`.
    pub fn split(&self, raw: &str) -> CommandSplit {
        if let Some(c) = self.classify(raw) { return c.split(); }
        if let Some(c) = self.bare_tool.captures(raw) {
            return CommandSplit { executable: group(&c, "exe"), arguments: group(&c, "args") };
        }
        fallback_split(raw)
    }

    /// First matching rule wins. Empty input never matches.
    pub fn classify(&self, raw: &str) -> Option<ClassifiedCommand> {
        if raw.trim().is_empty() { return None; }
        for rule in &self.rules {
            if let Some(c) = rule.re.captures(raw) {
                log::trace!("{} matched {:?}", rule.kind.label(), raw);
                return Some((rule.extract)(&c));
            }
        }
        log::debug!("Unclassified uninstall string: {}", raw);
        None
    }
}

/// Splits at the first `.exe`. Without one the whole string becomes the arguments.
pub fn fallback_split(raw: &str) -> CommandSplit {
    let lower = raw.to_ascii_lowercase();
    match lower.find(".exe") {
        Some(i) => {
            let end = i + 4;
            let exe = raw[..end].trim().trim_matches('"').to_string();
            let rest = raw[end..].strip_prefix('"').unwrap_or(&raw[end..]);
            CommandSplit { executable: exe, arguments: rest.trim().to_string() }
        }
        None => CommandSplit { executable: String::new(), arguments: raw.trim().to_string() },
    }
}

pub fn is_guid(s: &str) -> bool {
    let s = s.trim();
    if s.len() != 38 || !s.is_ascii() || !s.starts_with('{') || !s.ends_with('}') { return false; }
    s[1..37].char_indices().all(|(i, ch)| if [8, 13, 18, 23].contains(&i) { ch == '-' } else { ch.is_ascii_hexdigit() })
}
