use regex::Regex;
use serde::{Deserialize, Serialize};
use crate::classifier::{ClassifiedCommand, CommandSplit};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SilentCommand {
    pub executable: String,
    pub arguments: String,
    pub command_line: String,
}

pub struct Rewriter {
    token: Regex,
    quiet: Regex,
    norestart: Regex,
    quiet_flag: String,
    norestart_flag: String,
}

fn flag_re(word: &str) -> Result<Regex, regex::Error> { Regex::new(&format!(r"(?i)(?:^|\s)[-/]*{}(?:\s|$)", regex::escape(word))) }

fn inside_quotes(s: &str, pos: usize) -> bool { s[..pos].matches('"').count() % 2 == 1 }

/// Joins an executable and its arguments, quoting the executable when it contains whitespace.
pub fn command_line(exe: &str, args: &str) -> String {
    let exe_part = if exe.chars().any(char::is_whitespace) && !exe.starts_with('"') { format!("\"{}\"", exe) } else { exe.to_string() };
    if args.trim().is_empty() { exe_part } else { format!("{} {}", exe_part, args.trim()) }
}

/// No-op silent form for strings the classifier could not recognize.
pub fn passthrough(split: &CommandSplit) -> SilentCommand {
    SilentCommand { executable: split.executable.clone(), arguments: split.arguments.clone(), command_line: command_line(&split.executable, &split.arguments) }
}

impl Rewriter {
    pub fn new(quiet_flag: &str, norestart_flag: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            token: Regex::new(r"(?i)(?:^|\s)(?P<prefix>[-/]*)(?P<tok>modify|uninstall)(?:\s|$)")?,
            quiet: flag_re(quiet_flag)?,
            norestart: flag_re(norestart_flag)?,
            quiet_flag: quiet_flag.to_string(),
            norestart_flag: norestart_flag.to_string(),
        })
    }

    pub fn rewrite(&self, cmd: &ClassifiedCommand) -> SilentCommand {
        match cmd {
            ClassifiedCommand::MsiInvocation { executable, guid, .. } => {
                let arguments = format!("/qn /norestart /x \"{}\"", guid.to_uppercase());
                SilentCommand { executable: executable.clone(), command_line: format!("msiexec {}", arguments), arguments }
            }
            ClassifiedCommand::PackageCacheInstaller { executable, arguments, .. } | ClassifiedCommand::GenericExecutable { executable, arguments } => {
                let arguments = self.silence(arguments);
                SilentCommand { executable: executable.clone(), command_line: command_line(executable, &arguments), arguments }
            }
            ClassifiedCommand::ScriptInstaller { executable, script, arguments } => {
                let rest = self.silence(arguments);
                let arguments = if rest.is_empty() { script.clone() } else { format!("{} {}", script, rest) };
                SilentCommand { executable: executable.clone(), command_line: command_line(executable, &arguments), arguments }
            }
        }
    }

    fn extra_flags(&self, args: &str, prefix: &str) -> String {
        let mut out = String::new();
        if !self.quiet.is_match(args) { out.push_str(&format!(" {}{}", prefix, self.quiet_flag)); }
        if !self.norestart.is_match(args) { out.push_str(&format!(" {}{}", prefix, self.norestart_flag)); }
        out
    }

    /// Rewrites the first standalone `modify`/`uninstall` token outside quotes, keeping its prefix.
    pub fn silence(&self, args: &str) -> String {
        let hit = self.token.captures_iter(args).find(|c| c.name("tok").is_some_and(|t| !inside_quotes(args, t.start())));
        if let Some(c) = hit
            && let (Some(pre), Some(tok)) = (c.name("prefix"), c.name("tok")) {
            let prefix = pre.as_str();
            // bare tokens get slash-style companions
            let companion = if prefix.is_empty() { "/" } else { prefix };
            let repl = format!("{}uninstall{}", prefix, self.extra_flags(args, companion));
            return format!("{}{}{}", &args[..pre.start()], repl, &args[tok.end()..]).trim().to_string();
        }
        let lower = args.to_ascii_lowercase();
        if let Some(i) = lower.match_indices("/uninstall").map(|(i, _)| i).find(|&i| !inside_quotes(args, i)) {
            let end = args[i..].find(char::is_whitespace).map(|j| i + j).unwrap_or(args.len());
            log::debug!("Repairing embedded /uninstall in {:?}", args);
            return format!("{}{}{}", &args[..end], self.extra_flags(args, "/"), &args[end..]).trim().to_string();
        }
        args.trim().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{fallback_split, Classifier};

    const G: &str = "{11111111-2222-3333-4444-555555555555}";

    fn rw() -> Rewriter { Rewriter::new("quiet", "norestart").unwrap() }
    fn cls() -> Classifier { Classifier::new(&[]).unwrap() }

    #[test]
    fn msi_becomes_quiet_uninstall() {
        let c = cls().classify(&format!("msiexec /X {}", G)).unwrap();
        let s = rw().rewrite(&c);
        assert_eq!(s.command_line, format!("msiexec /qn /norestart /x \"{}\"", G));
        assert_eq!(s.executable, "msiexec");
    }

    #[test]
    fn msi_modify_is_turned_into_uninstall_and_guid_upper() {
        let c = cls().classify("MsiExec.exe /I{abcdefab-2222-3333-4444-555555555555}").unwrap();
        let s = rw().rewrite(&c);
        assert_eq!(s.command_line, "msiexec /qn /norestart /x \"{ABCDEFAB-2222-3333-4444-555555555555}\"");
        assert_eq!(s.executable, "MsiExec.exe");
    }

    #[test]
    fn dash_prefix_is_kept() {
        let c = cls().classify(r#""C:\Program Files\Foo\setup.exe" -uninstall"#).unwrap();
        let s = rw().rewrite(&c);
        assert_eq!(s.executable, r"C:\Program Files\Foo\setup.exe");
        assert_eq!(s.arguments, "-uninstall -quiet -norestart");
        assert_eq!(s.command_line, r#""C:\Program Files\Foo\setup.exe" -uninstall -quiet -norestart"#);
    }

    #[test]
    fn package_cache_modify_becomes_uninstall() {
        let raw = format!(r#""C:\ProgramData\Package Cache\{}\VC_redist.x64.exe"  /modify"#, G);
        let s = rw().rewrite(&cls().classify(&raw).unwrap());
        assert_eq!(s.arguments, "/uninstall /quiet /norestart");
        assert!(s.executable.ends_with("VC_redist.x64.exe"));
    }

    #[test]
    fn embedded_uninstall_inside_quotes_is_left_alone() {
        assert_eq!(rw().silence(r#"/x "C:\my/uninstall dir\a.txt""#), r#"/x "C:\my/uninstall dir\a.txt""#);
        assert_eq!(rw().silence(r#"/S /log "C:\logs/uninstall.log""#), r#"/S /log "C:\logs/uninstall.log""#);
        assert_eq!(rw().silence(r#"/log "C:\a/uninstall.log" x/uninstall"#), r#"/log "C:\a/uninstall.log" x/uninstall /quiet /norestart"#);
    }

    #[test]
    fn double_prefix_and_trailing_args() {
        assert_eq!(rw().silence("--uninstall --force"), "--uninstall --quiet --norestart --force");
    }

    #[test]
    fn existing_flags_not_duplicated() {
        assert_eq!(rw().silence("/uninstall /quiet"), "/uninstall /norestart /quiet");
        assert_eq!(rw().silence("-Uninstall -QUIET -NoRestart"), "-uninstall -QUIET -NoRestart");
    }

    #[test]
    fn bare_token_gets_slash_companions() {
        assert_eq!(rw().silence("uninstall"), "uninstall /quiet /norestart");
    }

    #[test]
    fn token_inside_path_is_left_alone() {
        assert_eq!(rw().silence(r"/log C:\uninstall\log.txt"), r"/log C:\uninstall\log.txt");
        assert_eq!(rw().silence(r#"/log "C:\my uninstall logs\a.txt""#), r#"/log "C:\my uninstall logs\a.txt""#);
    }

    #[test]
    fn embedded_uninstall_is_repaired() {
        assert_eq!(rw().silence("/uninstall:{ABC} /log"), "/uninstall:{ABC} /quiet /norestart /log");
    }

    #[test]
    fn no_token_is_noop() {
        assert_eq!(rw().silence("/SILENT"), "/SILENT");
        assert_eq!(rw().silence(""), "");
    }

    #[test]
    fn script_path_is_preserved() {
        let c = cls().classify(r#"cscript.exe "C:\Tool\uninstall.vbs" /uninstall"#).unwrap();
        let s = rw().rewrite(&c);
        assert_eq!(s.executable, "cscript.exe");
        assert_eq!(s.arguments, r#""C:\Tool\uninstall.vbs" /uninstall /quiet /norestart"#);
    }

    #[test]
    fn executable_preserved_for_every_shape() {
        let cases = [
            format!("msiexec /X{}", G),
            format!(r"C:\ProgramData\Package Cache\{}\setup.exe /uninstall", G),
            r"wscript C:\x\remove.vbs -modify".to_string(),
            r#""D:\Apps\Thing\uninst.exe" /modify"#.to_string(),
        ];
        for raw in cases {
            let c = cls().classify(&raw).unwrap();
            let s = rw().rewrite(&c);
            assert_eq!(s.executable, c.executable());
            assert!(raw.contains(&s.executable), "{} lost executable", raw);
        }
    }

    #[test]
    fn passthrough_keeps_original() {
        let s = passthrough(&fallback_split("rundll32.exe shell32.dll,Control_RunDLL"));
        assert_eq!(s.executable, "rundll32.exe");
        assert_eq!(s.command_line, "rundll32.exe shell32.dll,Control_RunDLL");
    }
}
