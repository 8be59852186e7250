/// NT device namespace → drive letter translation.
///
/// Kernel object names use device paths such as
/// `\Device\HarddiskVolume3\Users\me\file.txt`. Users expect `C:\Users\...`.
/// The map is built by asking `QueryDosDeviceW` what each drive letter points
/// at, and is rebuilt for every enumeration because drive letters can be
/// reassigned between runs.
use std::collections::HashMap;

/// Prefix of every local volume device.
pub const HARD_DISK_VOLUME_PREFIX: &str = r"\Device\HarddiskVolume";

/// Multiple UNC provider device. UNC paths are routed through it rather
/// than a per-letter device.
pub const NETWORK_REDIRECTOR_PREFIX: &str = r"\Device\Mup";

/// One device → drive letter mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceMapping {
    /// e.g. `\Device\HarddiskVolume3`.
    pub nt_device_prefix: String,
    /// e.g. `C:`, or `\` for the network redirector.
    pub drive_letter: String,
}

#[derive(Debug, Clone)]
pub struct DeviceNameMap {
    prefixes: HashMap<String, String>,
}

impl Default for DeviceNameMap {
    fn default() -> Self {
        Self::seeded()
    }
}

impl DeviceNameMap {
    /// A map holding only the network-redirector entry.
    pub fn seeded() -> Self {
        let mut prefixes = HashMap::with_capacity(27);
        prefixes.insert(NETWORK_REDIRECTOR_PREFIX.to_string(), "\\".to_string());
        Self { prefixes }
    }

    /// Seeded map plus explicit `(nt_device_prefix, drive_letter)` pairs.
    /// A prefix that is already mapped keeps its first drive letter.
    pub fn from_mappings<I, P, L>(mappings: I) -> Self
    where
        I: IntoIterator<Item = (P, L)>,
        P: Into<String>,
        L: Into<String>,
    {
        let mut map = Self::seeded();
        for (prefix, letter) in mappings {
            map.insert(prefix.into(), letter.into());
        }
        map
    }

    /// Query every drive letter A–Z. Unmapped letters are skipped.
    #[cfg(windows)]
    pub fn build() -> Self {
        use windows::core::PCWSTR;
        use windows::Win32::Storage::FileSystem::QueryDosDeviceW;

        let mut map = Self::seeded();
        let mut target = vec![0u16; 1024];

        for letter in b'A'..=b'Z' {
            let drive = format!("{}:", letter as char);
            let drive_wide: Vec<u16> = drive.encode_utf16().chain(std::iter::once(0)).collect();

            target.fill(0);
            // SAFETY: `drive_wide` is NUL-terminated and outlives the call;
            // the target slice length is passed by the binding.
            let len = unsafe { QueryDosDeviceW(PCWSTR(drive_wide.as_ptr()), Some(target.as_mut_slice())) };
            if len == 0 {
                continue;
            }

            map.insert_targets(&drive, &target[..len as usize]);
        }

        tracing::debug!("Device name map built: {} prefixes", map.len());
        map
    }

    /// Record the `QueryDosDeviceW` result for `drive_letter`: a list of
    /// NUL-separated device targets. Only the first non-empty target is used.
    pub fn insert_targets(&mut self, drive_letter: &str, targets: &[u16]) {
        let first = targets
            .split(|&unit| unit == 0)
            .find(|target| !target.is_empty())
            .map(String::from_utf16_lossy);

        if let Some(prefix) = first {
            self.insert(prefix, drive_letter.to_string());
        }
    }

    fn insert(&mut self, prefix: String, drive_letter: String) {
        self.prefixes.entry(prefix).or_insert(drive_letter);
    }

    /// Drive letter for an exact device prefix.
    pub fn drive_for(&self, nt_device_prefix: &str) -> Option<&str> {
        self.prefixes.get(nt_device_prefix).map(String::as_str)
    }

    /// Translate a kernel object name to its drive-letter form by replacing
    /// its leading two path components (`\Device\HarddiskVolume3`).
    ///
    /// `None` when the device is not mapped.
    pub fn translate(&self, nt_path: &str) -> Option<String> {
        let prefix = device_prefix(nt_path)?;
        let letter = self.drive_for(&prefix)?;
        let rest = nt_path.strip_prefix(prefix.as_str())?;
        Some(format!("{letter}{rest}"))
    }

    /// All mappings, sorted by device prefix.
    pub fn mappings(&self) -> Vec<DeviceMapping> {
        let mut mappings: Vec<DeviceMapping> = self
            .prefixes
            .iter()
            .map(|(prefix, letter)| DeviceMapping {
                nt_device_prefix: prefix.clone(),
                drive_letter: letter.clone(),
            })
            .collect();
        mappings.sort_unstable_by(|a, b| a.nt_device_prefix.cmp(&b.nt_device_prefix));
        mappings
    }

    pub fn len(&self) -> usize {
        self.prefixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }
}

/// `\` followed by the first two non-empty components of `nt_path`,
/// e.g. `\Device\HarddiskVolume3`. `None` if there are fewer than two.
pub fn device_prefix(nt_path: &str) -> Option<String> {
    let mut components = nt_path.split('\\').filter(|c| !c.is_empty());
    let first = components.next()?;
    let second = components.next()?;
    Some(format!("\\{first}\\{second}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wide(s: &str) -> Vec<u16> {
        s.encode_utf16().collect()
    }

    fn sample() -> DeviceNameMap {
        DeviceNameMap::from_mappings([
            (r"\Device\HarddiskVolume3", "C:"),
            (r"\Device\HarddiskVolume7", "D:"),
        ])
    }

    #[test]
    fn network_redirector_is_seeded() {
        let map = DeviceNameMap::seeded();
        assert_eq!(map.len(), 1);
        assert_eq!(map.drive_for(NETWORK_REDIRECTOR_PREFIX), Some("\\"));
    }

    #[test]
    fn network_redirector_round_trips() {
        let map = DeviceNameMap::seeded();
        let prefix = device_prefix(NETWORK_REDIRECTOR_PREFIX).unwrap();
        assert_eq!(prefix, NETWORK_REDIRECTOR_PREFIX);
        assert_eq!(map.drive_for(&prefix), Some("\\"));
        assert_eq!(
            map.translate(r"\Device\Mup\server\share\setup.msi").as_deref(),
            Some(r"\\server\share\setup.msi")
        );
    }

    #[test]
    fn translates_volume_paths() {
        let map = sample();
        assert_eq!(
            map.translate(r"\Device\HarddiskVolume3\Program Files\App\app.log").as_deref(),
            Some(r"C:\Program Files\App\app.log")
        );
        assert_eq!(
            map.translate(r"\Device\HarddiskVolume7\data").as_deref(),
            Some(r"D:\data")
        );
        assert_eq!(map.translate(r"\Device\HarddiskVolume3").as_deref(), Some("C:"));
    }

    #[test]
    fn volume_numbers_do_not_prefix_match() {
        // HarddiskVolume3 must not translate HarddiskVolume30.
        let map = sample();
        assert_eq!(map.translate(r"\Device\HarddiskVolume30\x.txt"), None);
    }

    #[test]
    fn unmapped_and_short_paths_yield_none() {
        let map = sample();
        assert_eq!(map.translate(r"\Device\HarddiskVolume9\x.txt"), None);
        assert_eq!(map.translate(r"\Device"), None);
        assert_eq!(map.translate(""), None);
    }

    #[test]
    fn insert_targets_keeps_first_non_empty_target() {
        let mut map = DeviceNameMap::seeded();
        let mut targets = wide("\0\\Device\\HarddiskVolume4\0\\Device\\HarddiskVolume5\0\0");
        targets.push(0);
        map.insert_targets("E:", &targets);

        assert_eq!(map.drive_for(r"\Device\HarddiskVolume4"), Some("E:"));
        assert_eq!(map.drive_for(r"\Device\HarddiskVolume5"), None);
    }

    #[test]
    fn first_letter_wins_for_shared_device() {
        let mut map = DeviceNameMap::seeded();
        map.insert_targets("F:", &wide("\\Device\\HarddiskVolume2\0"));
        map.insert_targets("G:", &wide("\\Device\\HarddiskVolume2\0"));
        assert_eq!(map.drive_for(r"\Device\HarddiskVolume2"), Some("F:"));
    }

    #[test]
    fn empty_target_list_is_ignored() {
        let mut map = DeviceNameMap::seeded();
        map.insert_targets("H:", &[0, 0]);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn device_prefix_skips_empty_components() {
        assert_eq!(
            device_prefix(r"\Device\HarddiskVolume3\Windows").as_deref(),
            Some(r"\Device\HarddiskVolume3")
        );
        assert_eq!(device_prefix(r"\\Device\\Mup").as_deref(), Some(r"\Device\Mup"));
        assert_eq!(device_prefix(r"\Device"), None);
    }

    #[test]
    fn mappings_are_sorted() {
        let prefixes: Vec<String> = sample()
            .mappings()
            .into_iter()
            .map(|m| m.nt_device_prefix)
            .collect();
        assert_eq!(
            prefixes,
            vec![
                r"\Device\HarddiskVolume3".to_string(),
                r"\Device\HarddiskVolume7".to_string(),
                r"\Device\Mup".to_string(),
            ]
        );
    }
}
