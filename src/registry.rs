use std::time::Duration;
use crate::hosts;
use crate::record::{Hive, RawUninstallEntry};
use crate::search::UninstallSource;

pub const UNINSTALL_KEY: &str = r"SOFTWARE\Microsoft\Windows\CurrentVersion\Uninstall";
pub const UNINSTALL_KEY_WOW: &str = r"SOFTWARE\WOW6432Node\Microsoft\Windows\CurrentVersion\Uninstall";
const USER_UNINSTALL_KEY: &str = r"Software\Microsoft\Windows\CurrentVersion\Uninstall";
const USER_UNINSTALL_KEY_WOW: &str = r"Software\WOW6432Node\Microsoft\Windows\CurrentVersion\Uninstall";
pub const PROFILE_LIST: &str = r"SOFTWARE\Microsoft\Windows NT\CurrentVersion\ProfileList";
pub const INSTALLER_PRODUCTS: &str = r"SOFTWARE\Microsoft\Windows\CurrentVersion\Installer\UserData\S-1-5-18\Products";

/// One uninstall key to enumerate, relative to its hive root.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Location {
    pub hive: Hive,
    pub sid: Option<String>,
    pub subkey: String,
}

impl Location {
    pub fn display_path(&self) -> String { format!("{}\\{}", self.hive.label(), self.subkey) }
}

/// Machine-wide pair first, then one pair per user SID.
pub fn uninstall_locations(user_sids: &[String]) -> Vec<Location> {
    let mut out = vec![
        Location { hive: Hive::LocalMachine, sid: None, subkey: UNINSTALL_KEY.to_string() },
        Location { hive: Hive::LocalMachine, sid: None, subkey: UNINSTALL_KEY_WOW.to_string() },
    ];
    for sid in user_sids {
        for key in [USER_UNINSTALL_KEY, USER_UNINSTALL_KEY_WOW] {
            out.push(Location { hive: Hive::Users, sid: Some(sid.clone()), subkey: format!("{}\\{}", sid, key) });
        }
    }
    out
}

/// Interactive user hives only; `_Classes` companions and service SIDs are skipped.
pub fn is_user_sid(name: &str) -> bool {
    (name.starts_with("S-1-5-21-") || name.starts_with("S-1-12-1-")) && !name.ends_with("_Classes")
}

pub fn well_known_sid(sid: &str) -> Option<&'static str> {
    match sid {
        "S-1-5-18" => Some("SYSTEM"),
        "S-1-5-19" => Some("LOCAL SERVICE"),
        "S-1-5-20" => Some("NETWORK SERVICE"),
        _ => None,
    }
}

/// Leaf of a ProfileImagePath such as `C:\Users\alice`.
pub fn profile_user_name(profile_path: &str) -> Option<String> {
    profile_path.trim().trim_end_matches('\\').rsplit('\\').next().map(str::trim).filter(|s| !s.is_empty() && !s.ends_with(':')).map(str::to_string)
}

/// Windows Installer "packed" product code: first three groups reversed, remaining bytes nibble-swapped.
pub fn pack_guid(guid: &str) -> Option<String> {
    if !crate::classifier::is_guid(guid) { return None; }
    let hex: Vec<char> = guid.trim().chars().filter(char::is_ascii_hexdigit).map(|c| c.to_ascii_uppercase()).collect();
    let mut out = String::with_capacity(32);
    for (start, end) in [(0, 8), (8, 12), (12, 16)] { out.extend(hex[start..end].iter().rev()); }
    for pair in hex[16..].chunks(2) { out.push(pair[1]); out.push(pair[0]); }
    Some(out)
}

/// Live registry, local or through the Remote Registry service.
pub struct RegistrySource {
    pub probe_timeout: Duration,
}

impl RegistrySource {
    pub fn new(probe_timeout: Duration) -> Self { Self { probe_timeout } }
}

impl UninstallSource for RegistrySource {
    fn is_reachable(&self, host: &str) -> bool { hosts::is_reachable(host, self.probe_timeout) }

    fn entries(&self, host: &str) -> anyhow::Result<Vec<RawUninstallEntry>> { read_host(host) }
}

#[cfg(not(windows))]
fn read_host(host: &str) -> anyhow::Result<Vec<RawUninstallEntry>> {
    anyhow::bail!("cannot read uninstall keys of {}: registry access requires Windows", host)
}

#[cfg(windows)]
use win::read_host;

#[cfg(windows)]
mod win {
    use std::ptr;
    use anyhow::Context;
    use windows_sys::Win32::Foundation::{ERROR_FILE_NOT_FOUND, ERROR_NO_MORE_ITEMS, ERROR_SUCCESS};
    use windows_sys::Win32::System::Registry::*;
    use super::*;

    struct Key(HKEY);
    impl Drop for Key { fn drop(&mut self) { unsafe { RegCloseKey(self.0); } } }

    fn w(s: &str) -> Vec<u16> { let mut v = s.encode_utf16().collect::<Vec<u16>>(); v.push(0); v }

    impl Key {
        fn connect(host: &str, root: HKEY) -> anyhow::Result<Key> {
            let machine = if hosts::is_local(host) { None } else { Some(w(&format!(r"\\{}", host.trim().trim_start_matches('\\')))) };
            let mut h: HKEY = ptr::null_mut();
            let rc = unsafe { RegConnectRegistryW(machine.as_ref().map_or(ptr::null(), |m| m.as_ptr()), root, &mut h) };
            if rc != ERROR_SUCCESS { anyhow::bail!("RegConnectRegistryW failed for {}: {}", host, rc); }
            Ok(Key(h))
        }

        /// `Ok(None)` when the key does not exist.
        fn open(&self, path: &str) -> anyhow::Result<Option<Key>> {
            let wp = w(path);
            let mut h: HKEY = ptr::null_mut();
            let rc = unsafe { RegOpenKeyExW(self.0, wp.as_ptr(), 0, KEY_READ | KEY_WOW64_64KEY, &mut h) };
            match rc {
                ERROR_SUCCESS => Ok(Some(Key(h))),
                ERROR_FILE_NOT_FOUND => Ok(None),
                code => anyhow::bail!("RegOpenKeyExW {} failed: {}", path, code),
            }
        }

        fn subkeys(&self) -> Vec<String> {
            let mut out = Vec::new();
            let mut index = 0u32;
            loop {
                // key names are limited to 255 characters
                let mut buf = [0u16; 256];
                let mut len = buf.len() as u32;
                let rc = unsafe { RegEnumKeyExW(self.0, index, buf.as_mut_ptr(), &mut len, ptr::null(), ptr::null_mut(), ptr::null_mut(), ptr::null_mut()) };
                if rc == ERROR_NO_MORE_ITEMS { break; }
                if rc == ERROR_SUCCESS { out.push(String::from_utf16_lossy(&buf[..len as usize])); } else { log::debug!("RegEnumKeyExW index {} failed: {}", index, rc); }
                index += 1;
            }
            out
        }

        fn string(&self, name: &str) -> Option<String> {
            let wn = w(name);
            let mut ty: REG_VALUE_TYPE = 0;
            let mut size: u32 = 0;
            let rc = unsafe { RegQueryValueExW(self.0, wn.as_ptr(), ptr::null(), &mut ty, ptr::null_mut(), &mut size) };
            if rc != ERROR_SUCCESS || (ty != REG_SZ && ty != REG_EXPAND_SZ) || size == 0 { return None; }
            let mut buf: Vec<u16> = vec![0u16; (size as usize).div_ceil(2) + 1];
            let mut cb = (buf.len() * 2) as u32;
            let rc = unsafe { RegQueryValueExW(self.0, wn.as_ptr(), ptr::null(), &mut ty, buf.as_mut_ptr() as *mut u8, &mut cb) };
            if rc != ERROR_SUCCESS { return None; }
            let n = (cb as usize / 2).min(buf.len());
            Some(String::from_utf16_lossy(&buf[..n]).trim_end_matches('\0').to_string())
        }

        fn dword(&self, name: &str) -> Option<u32> {
            let wn = w(name);
            let mut ty: REG_VALUE_TYPE = 0;
            let mut data: u32 = 0;
            let mut size = std::mem::size_of::<u32>() as u32;
            let rc = unsafe { RegQueryValueExW(self.0, wn.as_ptr(), ptr::null(), &mut ty, &mut data as *mut u32 as *mut u8, &mut size) };
            (rc == ERROR_SUCCESS && ty == REG_DWORD).then_some(data)
        }
    }

    fn user_name(hklm: &Key, sid: &str) -> Option<String> {
        if let Some(n) = well_known_sid(sid) { return Some(n.to_string()); }
        match hklm.open(&format!("{}\\{}", PROFILE_LIST, sid)) {
            Ok(Some(k)) => k.string("ProfileImagePath").and_then(|p| profile_user_name(&p)),
            Ok(None) => None,
            Err(e) => { log::debug!("ProfileList lookup for {} failed: {}", sid, e); None }
        }
    }

    fn installer_cache(hklm: &Key, guid: &str) -> Option<String> {
        let packed = pack_guid(guid)?;
        match hklm.open(&format!(r"{}\{}\InstallProperties", INSTALLER_PRODUCTS, packed)) {
            Ok(Some(k)) => k.string("LocalPackage"),
            Ok(None) => { log::debug!("No installer cache entry for {}", guid); None }
            Err(e) => { log::debug!("Installer cache lookup for {} failed: {}", guid, e); None }
        }
    }

    fn read_entry(key: &Key, name: &str, loc: &Location, user: Option<&String>, hklm: &Key) -> RawUninstallEntry {
        let windows_installer = key.dword("WindowsInstaller") == Some(1);
        let installer_cache = if windows_installer || crate::classifier::is_guid(name) { installer_cache(hklm, name) } else { None };
        RawUninstallEntry {
            key_name: name.to_string(),
            parent_path: loc.display_path(),
            hive: loc.hive,
            user_sid: loc.sid.clone(),
            user_name: user.cloned(),
            display_name: key.string("DisplayName"),
            display_version: key.string("DisplayVersion"),
            publisher: key.string("Publisher"),
            install_date: key.string("InstallDate"),
            uninstall_string: key.string("UninstallString"),
            quiet_uninstall_string: key.string("QuietUninstallString"),
            install_location: key.string("InstallLocation"),
            install_source: key.string("InstallSource"),
            estimated_size_kb: key.dword("EstimatedSize"),
            system_component: key.dword("SystemComponent") == Some(1),
            windows_installer,
            installer_cache,
        }
    }

    pub fn read_host(host: &str) -> anyhow::Result<Vec<RawUninstallEntry>> {
        let hklm = Key::connect(host, HKEY_LOCAL_MACHINE).with_context(|| format!("opening HKLM on {}", host))?;
        let hku = match Key::connect(host, HKEY_USERS) {
            Ok(k) => Some(k),
            Err(e) => { log::warn!("Per-user uninstall keys skipped on {}: {}", host, e); None }
        };
        let sids: Vec<String> = hku.as_ref().map(|k| k.subkeys().into_iter().filter(|s| is_user_sid(s)).collect()).unwrap_or_default();
        log::debug!("{}: {} user hive(s) loaded", host, sids.len());
        let mut out = Vec::new();
        for loc in uninstall_locations(&sids) {
            let root = match (loc.hive, hku.as_ref()) {
                (Hive::Users, Some(k)) => k,
                (Hive::Users, None) => continue,
                (Hive::LocalMachine, _) => &hklm,
            };
            let parent = match root.open(&loc.subkey) {
                Ok(Some(k)) => k,
                Ok(None) => { log::debug!("{} absent on {}", loc.display_path(), host); continue; }
                Err(e) if loc.hive == Hive::Users => { log::warn!("{} on {}: {}", loc.display_path(), host, e); continue; }
                Err(e) => return Err(e).with_context(|| format!("reading {} on {}", loc.display_path(), host)),
            };
            let user = loc.sid.as_deref().and_then(|s| user_name(&hklm, s));
            for name in parent.subkeys() {
                match parent.open(&name) {
                    Ok(Some(k)) => out.push(read_entry(&k, &name, &loc, user.as_ref(), &hklm)),
                    Ok(None) => {}
                    Err(e) => log::debug!("Skipping {}\\{}: {}", loc.display_path(), name, e),
                }
            }
        }
        log::info!("{}: {} uninstall key(s) read", host, out.len());
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locations_cover_both_views_per_hive() {
        let locs = uninstall_locations(&["S-1-5-21-1-2-3-1001".to_string()]);
        assert_eq!(locs.len(), 4);
        assert_eq!(locs[0].display_path(), r"HKLM\SOFTWARE\Microsoft\Windows\CurrentVersion\Uninstall");
        assert!(locs[1].subkey.contains("WOW6432Node"));
        assert_eq!(locs[2].hive, Hive::Users);
        assert_eq!(locs[3].display_path(), r"HKU\S-1-5-21-1-2-3-1001\Software\WOW6432Node\Microsoft\Windows\CurrentVersion\Uninstall");
        assert_eq!(locs[3].sid.as_deref(), Some("S-1-5-21-1-2-3-1001"));
    }

    #[test]
    fn only_interactive_sids_are_scanned() {
        assert!(is_user_sid("S-1-5-21-111-222-333-1001"));
        assert!(is_user_sid("S-1-12-1-4-5-6-7"));
        assert!(!is_user_sid("S-1-5-21-111-222-333-1001_Classes"));
        assert!(!is_user_sid("S-1-5-18"));
        assert!(!is_user_sid(".DEFAULT"));
    }

    #[test]
    fn well_known_and_profile_names() {
        assert_eq!(well_known_sid("S-1-5-18"), Some("SYSTEM"));
        assert_eq!(well_known_sid("S-1-5-21-1"), None);
        assert_eq!(profile_user_name(r"C:\Users\alice").as_deref(), Some("alice"));
        assert_eq!(profile_user_name(r"%SystemDrive%\Users\bob\").as_deref(), Some("bob"));
        assert_eq!(profile_user_name(r"C:\"), None);
    }

    #[test]
    fn product_code_packing() {
        assert_eq!(pack_guid("{12345678-ABCD-EF01-2345-6789ABCDEF01}").as_deref(), Some("87654321DCBA10FE32547698BADCFE10"));
        assert_eq!(pack_guid("{12345678-abcd-ef01-2345-6789abcdef01}").as_deref(), Some("87654321DCBA10FE32547698BADCFE10"));
        assert_eq!(pack_guid("not-a-guid"), None);
    }

    #[cfg(not(windows))]
    #[test]
    fn registry_source_errors_off_windows() {
        let src = RegistrySource::new(Duration::from_millis(10));
        assert!(src.is_reachable("localhost"));
        assert!(src.entries("localhost").is_err());
    }
}
