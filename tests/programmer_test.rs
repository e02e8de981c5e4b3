//! Integration tests for bitstream delivery
//!
//! A fake `icesprog` records its invocations; a temporary directory stands in
//! for the iCELink volume.

#![cfg(unix)]

mod common;

use common::TestProject;
use icesugar_flash::core::cancel::CancellationToken;
use icesugar_flash::core::flash::{ClockSpeed, DeliveryConfig, DeliveryMethod, Programmer};
use icesugar_flash::core::retry::RetryPolicy;
use icesugar_flash::error::{DeliveryError, DeviceError};
use icesugar_flash::infra::mass_storage::VolumeLocator;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Volume that is always mounted at a fixed directory
struct TempVolume(PathBuf);

impl VolumeLocator for TempVolume {
    async fn locate(&self, token: &CancellationToken) -> Result<PathBuf, DeviceError> {
        if token.is_requested() {
            return Err(DeviceError::Cancelled);
        }
        Ok(self.0.clone())
    }
}

fn config(programmer: &Path) -> DeliveryConfig {
    DeliveryConfig {
        programmer: programmer.display().to_string(),
        direct_policy: RetryPolicy::new(3, Duration::from_millis(1)),
        mass_storage_policy: RetryPolicy::new(2, Duration::from_millis(1)),
        tool_timeout: Duration::from_secs(10),
        sync_timeout: Duration::from_secs(10),
        settle_delay: Duration::ZERO,
        verbose: false,
    }
}

fn env() -> BTreeMap<String, String> {
    std::env::vars().collect()
}

fn setup(icesprog: &str) -> (TestProject, PathBuf, PathBuf) {
    let project = TestProject::new();
    project.create_file("out/top.bin", "BITSTREAM");
    let programmer = project.write_tool("icesprog", icesprog);
    let volume = project.create_dir("iCELink");
    (project, programmer, volume)
}

#[tokio::test]
async fn test_direct_write_succeeds() {
    let (project, programmer, volume) = setup("#!/bin/sh\necho 'Program finished'\n");
    let token = CancellationToken::new();
    let env = env();
    let bitstream = project.join("out/top.bin");

    let method = Programmer::new(config(&programmer), TempVolume(volume.clone()), &env, &token)
        .deliver(&bitstream, false)
        .await
        .unwrap();

    assert_eq!(method, DeliveryMethod::DirectWrite);
    assert_eq!(
        project.calls("icesprog"),
        vec![format!("-w {}", bitstream.display())]
    );
    assert!(!volume.join("top.bin").exists());
}

#[tokio::test]
async fn test_forced_mass_storage_never_runs_programmer() {
    let (project, programmer, volume) = setup("#!/bin/sh\nexit 0\n");
    let token = CancellationToken::new();
    let env = env();

    let method = Programmer::new(config(&programmer), TempVolume(volume.clone()), &env, &token)
        .deliver(&project.join("out/top.bin"), true)
        .await
        .unwrap();

    assert_eq!(
        method,
        DeliveryMethod::MassStorage {
            mount_point: volume.clone()
        }
    );
    assert!(project.calls("icesprog").is_empty());
    assert_eq!(
        std::fs::read_to_string(volume.join("top.bin")).unwrap(),
        "BITSTREAM"
    );
}

#[tokio::test]
async fn test_direct_write_exhaustion_falls_back() {
    let (project, programmer, volume) = setup("#!/bin/sh\necho 'USB open failed' >&2\nexit 1\n");
    let token = CancellationToken::new();
    let env = env();

    let method = Programmer::new(config(&programmer), TempVolume(volume.clone()), &env, &token)
        .deliver(&project.join("out/top.bin"), false)
        .await
        .unwrap();

    assert!(matches!(method, DeliveryMethod::MassStorage { .. }));
    assert_eq!(project.calls("icesprog").len(), 3);
    assert!(volume.join("top.bin").is_file());
}

#[tokio::test]
async fn test_unwritable_volume_exhausts_delivery() {
    let (project, programmer, _volume) = setup("#!/bin/sh\nexit 1\n");
    let token = CancellationToken::new();
    let env = env();
    let missing = project.join("not-mounted");

    let result = Programmer::new(config(&programmer), TempVolume(missing), &env, &token)
        .deliver(&project.join("out/top.bin"), false)
        .await;

    match result {
        Err(DeliveryError::Exhausted { attempts, .. }) => assert_eq!(attempts, 2),
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
async fn test_clock_failure_only_warns() {
    let (project, programmer, volume) = setup("#!/bin/sh\nexit 1\n");
    let token = CancellationToken::new();
    let env = env();

    let result = Programmer::new(config(&programmer), TempVolume(volume), &env, &token)
        .set_clock(ClockSpeed::Mhz36)
        .await;

    assert!(result.is_ok());
    assert_eq!(project.calls("icesprog"), vec!["-c 3".to_string()]);
}
