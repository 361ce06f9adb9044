use anyhow::{bail, ensure, Context, Result};
use log::debug;
use std::path::Path;

/// Formats an offset in seconds as `HH:MM:SS.mmm` for ffmpeg's `-ss`/`-t`.
pub fn format_timestamp(seconds: f64) -> String {
    let total_millis = (seconds.max(0.0) * 1000.0).round() as u64;
    let hours = total_millis / 3_600_000;
    let minutes = (total_millis % 3_600_000) / 60_000;
    let secs = (total_millis % 60_000) / 1000;
    let millis = total_millis % 1000;
    format!("{:02}:{:02}:{:02}.{:03}", hours, minutes, secs, millis)
}

/// Runs ffmpeg to completion, failing with the tail of stderr on a non-zero exit.
///
/// The child is killed if the returned future is dropped.
pub async fn run_ffmpeg(ffmpeg: &Path, args: &[String]) -> Result<()> {
    debug!("{} {}", ffmpeg.display(), args.join(" "));
    let output = tokio::process::Command::new(ffmpeg)
        .args(args)
        .kill_on_drop(true)
        .output()
        .await
        .context("failed to launch ffmpeg")?;

    let stderr = String::from_utf8_lossy(&output.stderr);
    debug!("ffmpeg stderr: {}", stderr);

    ensure!(
        output.status.success(),
        "ffmpeg exited with {}: {}",
        output.status,
        last_lines(&stderr, 3)
    );
    Ok(())
}

/// Duration in seconds of the media currently in `path`.
pub async fn probe_duration(ffprobe: &Path, path: &Path) -> Result<f64> {
    let output = tokio::process::Command::new(ffprobe)
        .args(["-v", "error", "-show_entries", "format=duration", "-of", "csv=p=0"])
        .arg(path)
        .kill_on_drop(true)
        .output()
        .await
        .context("failed to launch ffprobe")?;

    if !output.status.success() {
        bail!(
            "ffprobe failed on {}: {}",
            path.display(),
            last_lines(&String::from_utf8_lossy(&output.stderr), 3)
        );
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    stdout
        .trim()
        .parse::<f64>()
        .with_context(|| format!("unexpected ffprobe output: {:?}", stdout.trim()))
}

fn last_lines(text: &str, count: usize) -> String {
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    lines[lines.len().saturating_sub(count)..].join(" | ")
}

/// Writes an executable shell script standing in for ffmpeg or ffprobe.
#[cfg(all(test, unix))]
pub(crate) fn write_stub_tool(dir: &Path, name: &str, body: &str) -> std::path::PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}
