//! Mass-storage volume discovery
//!
//! The iCELink probe exposes a small FAT drive; copying a bitstream onto it
//! programs the FPGA. Finding that drive goes through three strategies in a
//! fixed order: the block device listing, well-known automount paths, and
//! finally mounting the device ourselves.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::cancel::CancellationToken;
use crate::error::DeviceError;
use crate::infra::filesystem::{expand_pattern, is_mount_point};
use crate::infra::process::{self, Invocation, ProcessError};

/// Filesystem types reported for FAT volumes
const FAT_TYPES: &[&str] = &["vfat", "fat", "fat12", "fat16", "fat32", "msdos"];

/// Something that can hand out the mount point of the volume
pub trait VolumeLocator {
    /// Resolve the mount point, freshly, every call
    fn locate(
        &self,
        token: &CancellationToken,
    ) -> impl Future<Output = Result<PathBuf, DeviceError>>;
}

/// The three discovery strategies, tried in order by [`find_mass_storage_mount`]
pub trait MountStrategies {
    /// Label lookup in the block device listing
    fn from_block_listing(
        &self,
        token: &CancellationToken,
    ) -> impl Future<Output = Result<Option<PathBuf>, DeviceError>>;

    /// First well-known automount path that is a mount point
    fn from_known_paths(&self) -> Option<PathBuf>;

    /// Find the unmounted device node and mount it
    fn mount_device(
        &self,
        token: &CancellationToken,
    ) -> impl Future<Output = Result<Option<PathBuf>, DeviceError>>;

    /// Volume label, for error messages
    fn label(&self) -> &str;
}

/// Locate the volume's mount point, trying each strategy only when the
/// previous one found nothing.
pub async fn find_mass_storage_mount<S: MountStrategies>(
    strategies: &S,
    token: &CancellationToken,
) -> Result<PathBuf, DeviceError> {
    if token.is_requested() {
        return Err(DeviceError::Cancelled);
    }
    if let Some(path) = strategies.from_block_listing(token).await? {
        tracing::debug!("{} mount point: {}", strategies.label(), path.display());
        return Ok(path);
    }

    if token.is_requested() {
        return Err(DeviceError::Cancelled);
    }
    if let Some(path) = strategies.from_known_paths() {
        tracing::debug!("{} found at {}", strategies.label(), path.display());
        return Ok(path);
    }

    if token.is_requested() {
        return Err(DeviceError::Cancelled);
    }
    tracing::info!("{} is not mounted, trying to mount it", strategies.label());
    match strategies.mount_device(token).await? {
        Some(path) => Ok(path),
        None => Err(DeviceError::Mount {
            label: strategies.label().to_string(),
            reason: "no device carrying the label was found".to_string(),
        }),
    }
}

/// One row of `lsblk -J`
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct BlockDevice {
    /// Device node (full path with `-p`)
    pub name: String,
    /// Filesystem label
    #[serde(default)]
    pub label: Option<String>,
    /// Filesystem type
    #[serde(default)]
    pub fstype: Option<String>,
    /// Current mount point
    #[serde(default)]
    pub mountpoint: Option<String>,
    /// Partitions
    #[serde(default)]
    pub children: Vec<BlockDevice>,
}

#[derive(Debug, Deserialize)]
struct BlockListing {
    blockdevices: Vec<BlockDevice>,
}

/// Parse `lsblk -J` output into a flat list of devices and partitions
pub fn parse_lsblk(json: &str) -> Result<Vec<BlockDevice>, serde_json::Error> {
    let listing: BlockListing = serde_json::from_str(json)?;
    let mut flat = Vec::new();
    let mut stack: Vec<BlockDevice> = listing.blockdevices.into_iter().rev().collect();
    while let Some(mut device) = stack.pop() {
        let children = std::mem::take(&mut device.children);
        stack.extend(children.into_iter().rev());
        flat.push(device);
    }
    Ok(flat)
}

/// Devices in `devices` whose label matches `label`, ignoring case
pub fn with_label<'a>(devices: &'a [BlockDevice], label: &str) -> Vec<&'a BlockDevice> {
    devices
        .iter()
        .filter(|device| {
            device
                .label
                .as_deref()
                .is_some_and(|l| l.eq_ignore_ascii_case(label))
        })
        .collect()
}

/// `-t` argument for `mount`, `None` meaning let `mount` detect it
pub fn mount_fs_type(fstype: Option<&str>) -> Option<&'static str> {
    let fstype = fstype?.to_ascii_lowercase();
    FAT_TYPES.contains(&fstype.as_str()).then_some("vfat")
}

/// Settings for host-side volume discovery
#[derive(Debug, Clone)]
pub struct MassStorageConfig {
    /// Volume label
    pub label: String,
    /// Automount patterns, `*` matching one component
    pub patterns: Vec<String>,
    /// Device nodes probed when the listing has no match
    pub device_candidates: Vec<PathBuf>,
    /// Directory the volume is mounted on by hand
    pub mount_point: PathBuf,
    /// Prefix for privileged commands, like `sudo`
    pub privilege_helper: Option<String>,
    /// Timeout for `lsblk` and `blkid`
    pub probe_timeout: Duration,
    /// Timeout for `mount`
    pub mount_timeout: Duration,
}

/// Volume discovery against the running host
#[derive(Debug)]
pub struct MassStorageDetector<'a> {
    config: MassStorageConfig,
    env: &'a BTreeMap<String, String>,
}

impl<'a> MassStorageDetector<'a> {
    /// Create a detector running host tools with `env`
    pub fn new(config: MassStorageConfig, env: &'a BTreeMap<String, String>) -> Self {
        Self { config, env }
    }

    async fn block_devices(&self, token: &CancellationToken) -> Result<Vec<BlockDevice>, DeviceError> {
        let invocation = Invocation::new("lsblk", self.config.probe_timeout)
            .args(["-J", "-p", "-o", "NAME,LABEL,FSTYPE,MOUNTPOINT"]);
        match process::run(&invocation, self.env, token).await {
            Ok(output) if output.success => parse_lsblk(&output.output).map_err(|e| {
                tracing::warn!("Unreadable lsblk output: {e}");
                DeviceError::Io {
                    path: PathBuf::from("lsblk"),
                    error: e.to_string(),
                }
            }),
            Ok(output) => Err(DeviceError::Io {
                path: PathBuf::from("lsblk"),
                error: format!("exited with {:?}: {}", output.code, output.output.trim()),
            }),
            Err(ProcessError::Cancelled { .. }) => Err(DeviceError::Cancelled),
            Err(e) => Err(DeviceError::Io {
                path: PathBuf::from("lsblk"),
                error: e.to_string(),
            }),
        }
    }

    async fn blkid_tag(&self, device: &Path, tag: &str, token: &CancellationToken) -> Result<Option<String>, DeviceError> {
        let invocation = Invocation::new("blkid", self.config.probe_timeout)
            .args(["-o", "value", "-s", tag])
            .arg(device);
        match process::run(&invocation, self.env, token).await {
            Ok(output) if output.success => {
                let value = output.output.trim();
                Ok((!value.is_empty()).then(|| value.to_string()))
            }
            Ok(_) => Ok(None),
            Err(ProcessError::Cancelled { .. }) => Err(DeviceError::Cancelled),
            Err(e) => {
                tracing::debug!("blkid failed for {}: {e}", device.display());
                Ok(None)
            }
        }
    }

    /// Unmounted device node carrying the label, with its filesystem type
    async fn find_device_node(
        &self,
        token: &CancellationToken,
    ) -> Result<Option<(PathBuf, Option<String>)>, DeviceError> {
        match self.block_devices(token).await {
            Ok(devices) => {
                if let Some(device) = with_label(&devices, &self.config.label)
                    .into_iter()
                    .find(|device| device.mountpoint.is_none())
                {
                    return Ok(Some((PathBuf::from(&device.name), device.fstype.clone())));
                }
            }
            Err(DeviceError::Cancelled) => return Err(DeviceError::Cancelled),
            Err(e) => tracing::debug!("Block listing unavailable: {e}"),
        }

        for candidate in &self.config.device_candidates {
            if token.is_requested() {
                return Err(DeviceError::Cancelled);
            }
            if !candidate.exists() {
                continue;
            }
            let label = self.blkid_tag(candidate, "LABEL", token).await?;
            if label.is_some_and(|l| l.eq_ignore_ascii_case(&self.config.label)) {
                let fstype = self.blkid_tag(candidate, "TYPE", token).await?;
                return Ok(Some((candidate.clone(), fstype)));
            }
        }
        Ok(None)
    }

    async fn run_mount(
        &self,
        device: &Path,
        fstype: Option<&str>,
        token: &CancellationToken,
    ) -> Result<bool, DeviceError> {
        let mut args: Vec<std::ffi::OsString> = Vec::new();
        let program = match &self.config.privilege_helper {
            Some(helper) => {
                args.push("mount".into());
                helper.clone()
            }
            None => "mount".to_string(),
        };
        if let Some(fstype) = fstype {
            args.push("-t".into());
            args.push(fstype.into());
        }
        args.push(device.into());
        args.push(self.config.mount_point.clone().into());

        let invocation = Invocation::new(program, self.config.mount_timeout).args(args);
        match process::run(&invocation, self.env, token).await {
            Ok(output) if output.success => Ok(true),
            Ok(output) => {
                tracing::warn!("{} failed: {}", invocation.display(), output.output.trim());
                Ok(false)
            }
            Err(ProcessError::Cancelled { .. }) => Err(DeviceError::Cancelled),
            Err(e) => {
                tracing::warn!("{e}");
                Ok(false)
            }
        }
    }
}

impl MountStrategies for MassStorageDetector<'_> {
    async fn from_block_listing(&self, token: &CancellationToken) -> Result<Option<PathBuf>, DeviceError> {
        let devices = match self.block_devices(token).await {
            Ok(devices) => devices,
            Err(DeviceError::Cancelled) => return Err(DeviceError::Cancelled),
            Err(e) => {
                tracing::warn!("Block device listing failed: {e}");
                return Ok(None);
            }
        };
        Ok(with_label(&devices, &self.config.label)
            .into_iter()
            .find_map(|device| device.mountpoint.as_ref().map(PathBuf::from)))
    }

    fn from_known_paths(&self) -> Option<PathBuf> {
        self.config
            .patterns
            .iter()
            .flat_map(|pattern| expand_pattern(pattern))
            .find(|path| is_mount_point(path))
    }

    async fn mount_device(&self, token: &CancellationToken) -> Result<Option<PathBuf>, DeviceError> {
        let Some((device, fstype)) = self.find_device_node(token).await? else {
            return Ok(None);
        };
        let mount_point = &self.config.mount_point;
        tracing::info!("Mounting {} on {}", device.display(), mount_point.display());

        if !mount_point.is_dir() {
            std::fs::create_dir_all(mount_point).map_err(|e| DeviceError::Mount {
                label: self.config.label.clone(),
                reason: format!("cannot create {}: {e}", mount_point.display()),
            })?;
        }

        let fs_type = mount_fs_type(fstype.as_deref());
        let mut mounted = self.run_mount(&device, fs_type, token).await?;
        if !mounted && fs_type.is_some() {
            tracing::info!("Retrying mount without an explicit filesystem type");
            mounted = self.run_mount(&device, None, token).await?;
        }

        if mounted && is_mount_point(mount_point) {
            Ok(Some(mount_point.clone()))
        } else {
            Err(DeviceError::Mount {
                label: self.config.label.clone(),
                reason: format!(
                    "mounting {} on {} did not succeed",
                    device.display(),
                    mount_point.display()
                ),
            })
        }
    }

    fn label(&self) -> &str {
        &self.config.label
    }
}

impl VolumeLocator for MassStorageDetector<'_> {
    async fn locate(&self, token: &CancellationToken) -> Result<PathBuf, DeviceError> {
        find_mass_storage_mount(self, token).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    const LSBLK: &str = r#"{
   "blockdevices": [
      {"name": "/dev/nvme0n1", "label": null, "fstype": null, "mountpoint": null,
         "children": [
            {"name": "/dev/nvme0n1p1", "label": "EFI", "fstype": "vfat", "mountpoint": "/boot"}
         ]
      },
      {"name": "/dev/sda", "label": "iCELink", "fstype": "vfat", "mountpoint": "/media/me/iCELink"}
   ]
}"#;

    /// Records which strategies ran, in order
    struct Recording {
        calls: RefCell<Vec<&'static str>>,
        listing: Option<PathBuf>,
        known: Option<PathBuf>,
        mounted: Option<PathBuf>,
    }

    impl Recording {
        fn new(listing: Option<&str>, known: Option<&str>, mounted: Option<&str>) -> Self {
            Self {
                calls: RefCell::new(Vec::new()),
                listing: listing.map(PathBuf::from),
                known: known.map(PathBuf::from),
                mounted: mounted.map(PathBuf::from),
            }
        }
    }

    impl MountStrategies for Recording {
        async fn from_block_listing(&self, _: &CancellationToken) -> Result<Option<PathBuf>, DeviceError> {
            self.calls.borrow_mut().push("listing");
            Ok(self.listing.clone())
        }

        fn from_known_paths(&self) -> Option<PathBuf> {
            self.calls.borrow_mut().push("glob");
            self.known.clone()
        }

        async fn mount_device(&self, _: &CancellationToken) -> Result<Option<PathBuf>, DeviceError> {
            self.calls.borrow_mut().push("mount");
            Ok(self.mounted.clone())
        }

        fn label(&self) -> &str {
            "iCELink"
        }
    }

    #[test]
    fn test_parse_lsblk_flattens_children() {
        let devices = parse_lsblk(LSBLK).unwrap();
        let names: Vec<_> = devices.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["/dev/nvme0n1", "/dev/nvme0n1p1", "/dev/sda"]);
    }

    #[test]
    fn test_label_match_ignores_case() {
        let devices = parse_lsblk(LSBLK).unwrap();
        let found = with_label(&devices, "icelink");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].mountpoint.as_deref(), Some("/media/me/iCELink"));
    }

    #[test]
    fn test_mount_fs_type_prefers_fat() {
        assert_eq!(mount_fs_type(Some("vfat")), Some("vfat"));
        assert_eq!(mount_fs_type(Some("FAT16")), Some("vfat"));
        assert_eq!(mount_fs_type(Some("ext4")), None);
        assert_eq!(mount_fs_type(None), None);
    }

    #[tokio::test]
    async fn test_listing_hit_skips_other_strategies() {
        let token = CancellationToken::new();
        let strategies = Recording::new(Some("/media/me/iCELink"), Some("/mnt/iCELink"), None);

        let found = find_mass_storage_mount(&strategies, &token).await.unwrap();

        assert_eq!(found, PathBuf::from("/media/me/iCELink"));
        assert_eq!(*strategies.calls.borrow(), vec!["listing"]);
    }

    #[tokio::test]
    async fn test_strategies_run_strictly_in_order() {
        let token = CancellationToken::new();
        let strategies = Recording::new(None, None, Some("/mnt/iCELink"));

        let found = find_mass_storage_mount(&strategies, &token).await.unwrap();

        assert_eq!(found, PathBuf::from("/mnt/iCELink"));
        assert_eq!(*strategies.calls.borrow(), vec!["listing", "glob", "mount"]);
    }

    #[tokio::test]
    async fn test_all_strategies_exhausted_is_mount_error() {
        let token = CancellationToken::new();
        let strategies = Recording::new(None, None, None);

        let result = find_mass_storage_mount(&strategies, &token).await;

        assert!(matches!(result, Err(DeviceError::Mount { .. })));
    }

    #[tokio::test]
    async fn test_cancelled_before_lookup() {
        let token = CancellationToken::new();
        token.request();
        let strategies = Recording::new(Some("/media/me/iCELink"), None, None);

        let result = find_mass_storage_mount(&strategies, &token).await;

        assert_eq!(result, Err(DeviceError::Cancelled));
        assert!(strategies.calls.borrow().is_empty());
    }
}
