//! Platform sampler backed by small helper processes.
//!
//! Linux (X11): `xprintidle` for idle time, `xdotool` plus `/proc/<pid>/comm`
//! for the foreground process. macOS: `ioreg` HIDIdleTime and `osascript`.
//! Anything else reports [`BehaviorError::Unsupported`].

use crate::error::{BehaviorError, Result};
use crate::signals::SignalSampler;
use async_trait::async_trait;
use tokio::process::Command;

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemSampler;

impl SystemSampler {
    pub fn new() -> Self {
        Self
    }
}

/// Run a helper and return its trimmed stdout.
#[cfg_attr(not(any(target_os = "linux", target_os = "macos")), allow(dead_code))]
async fn run(program: &str, args: &[&str]) -> Result<String> {
    let output = Command::new(program)
        .args(args)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| BehaviorError::sampler(format!("{} failed to start: {}", program, e)))?;
    if !output.status.success() {
        return Err(BehaviorError::sampler(format!(
            "{} exited with {}",
            program, output.status
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

// ── Parsers ────────────────────────────────────────────────

/// `xprintidle` prints milliseconds.
pub fn parse_xprintidle(stdout: &str) -> Result<u64> {
    stdout
        .trim()
        .parse::<u64>()
        .map_err(|_| BehaviorError::sampler(format!("unexpected xprintidle output: {:?}", stdout)))
}

/// Finds `"HIDIdleTime" = <nanoseconds>` in `ioreg -c IOHIDSystem` output.
pub fn parse_ioreg_idle(stdout: &str) -> Result<u64> {
    stdout
        .lines()
        .find(|line| line.contains("\"HIDIdleTime\""))
        .and_then(|line| line.rsplit('=').next())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(|ns| ns / 1_000_000)
        .ok_or_else(|| BehaviorError::sampler("HIDIdleTime not found in ioreg output"))
}

/// Empty output means no foreground app.
pub fn parse_app_name(stdout: &str) -> Option<String> {
    let name = stdout.trim();
    (!name.is_empty()).then(|| name.to_string())
}

// ── Platform lookups ───────────────────────────────────────

#[cfg(target_os = "linux")]
async fn idle_ms() -> Result<u64> {
    parse_xprintidle(&run("xprintidle", &[]).await?)
}

#[cfg(target_os = "linux")]
async fn foreground_app() -> Result<Option<String>> {
    let pid = run("xdotool", &["getactivewindow", "getwindowpid"]).await?;
    let pid: u32 = pid
        .parse()
        .map_err(|_| BehaviorError::sampler(format!("unexpected xdotool output: {:?}", pid)))?;
    let comm = tokio::fs::read_to_string(format!("/proc/{}/comm", pid)).await?;
    Ok(parse_app_name(&comm))
}

#[cfg(target_os = "macos")]
async fn idle_ms() -> Result<u64> {
    parse_ioreg_idle(&run("ioreg", &["-c", "IOHIDSystem", "-d", "4"]).await?)
}

#[cfg(target_os = "macos")]
async fn foreground_app() -> Result<Option<String>> {
    let out = run(
        "osascript",
        &[
            "-e",
            "tell application \"System Events\" to get name of first application process whose frontmost is true",
        ],
    )
    .await?;
    Ok(parse_app_name(&out))
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
async fn idle_ms() -> Result<u64> {
    Err(BehaviorError::Unsupported("idle duration"))
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
async fn foreground_app() -> Result<Option<String>> {
    Err(BehaviorError::Unsupported("foreground app"))
}

#[async_trait]
impl SignalSampler for SystemSampler {
    async fn sample_idle_duration(&self) -> Result<u64> {
        idle_ms().await
    }

    async fn sample_foreground_app(&self) -> Result<Option<String>> {
        foreground_app().await
    }
}
