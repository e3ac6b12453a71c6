//! Device bridge module.
//! Thin wrapper over the `adb` binary: screenshot capture via
//! `exec-out screencap -p` (PNG on stdout, no temp files) and tap injection
//! via `shell input tap`.
//! Requires adb on PATH and a device with USB debugging enabled.

use anyhow::{Context, Result, bail};
use image::DynamicImage;
use tokio::process::Command;

/// A connected Android device, addressed by serial so that multiple attached
/// devices do not race for the anonymous `adb` transport.
#[derive(Clone, Debug)]
pub struct Device {
    serial: Option<String>,
}

impl Device {
    /// Lists the serials of attached, authorized devices.
    pub async fn list() -> Result<Vec<String>> {
        let output = Command::new("adb")
            .arg("devices")
            .output()
            .await
            .context("failed to run `adb devices` (is adb on PATH?)")?;
        if !output.status.success() {
            bail!(
                "`adb devices` failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(parse_device_list(&String::from_utf8_lossy(&output.stdout)))
    }

    /// Resolves the device to drive: an explicit serial wins, a single
    /// attached device is used as-is, and several devices trigger an
    /// interactive selection.
    pub async fn pick(serial: Option<String>) -> Result<Device> {
        if serial.is_some() {
            return Ok(Device { serial });
        }
        let mut devices = Self::list().await?;
        match devices.len() {
            0 => bail!("no adb devices attached (check USB debugging authorization)"),
            1 => Ok(Device {
                serial: devices.pop(),
            }),
            _ => {
                let choice = dialoguer::Select::new()
                    .with_prompt("Several devices attached, pick one")
                    .items(&devices)
                    .default(0)
                    .interact()
                    .context("device selection cancelled")?;
                Ok(Device {
                    serial: Some(devices.swap_remove(choice)),
                })
            }
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new("adb");
        if let Some(serial) = &self.serial {
            cmd.arg("-s").arg(serial);
        }
        cmd
    }

    /// Captures the current screen and decodes it.
    /// `exec-out` keeps the PNG binary-clean (plain `shell` mangles \n on
    /// some devices).
    pub async fn screencap(&self) -> Result<DynamicImage> {
        let output = self
            .command()
            .args(["exec-out", "screencap", "-p"])
            .output()
            .await
            .context("failed to run adb screencap")?;
        if !output.status.success() {
            bail!(
                "adb screencap failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        image::load_from_memory(&output.stdout)
            .context("adb screencap returned data that is not a decodable image")
    }

    /// Injects a tap at the given screen coordinates.
    pub async fn tap(&self, x: u32, y: u32) -> Result<()> {
        let output = self
            .command()
            .args(["shell", "input", "tap"])
            .arg(x.to_string())
            .arg(y.to_string())
            .output()
            .await
            .context("failed to run adb input tap")?;
        if !output.status.success() {
            bail!(
                "adb input tap ({x}, {y}) failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}

/// Parses `adb devices` output, keeping only serials in the `device` state
/// (drops `unauthorized`, `offline` and the header line).
fn parse_device_list(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .skip(1)
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            match (parts.next(), parts.next()) {
                (Some(serial), Some("device")) => Some(serial.to_string()),
                _ => None,
            }
        })
        .collect()
}
