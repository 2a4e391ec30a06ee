//! Shared utility functions for the MCA supervisor.

use std::path::Path;
use std::time::Duration;
use tokio::process::Command;

/// Apply platform-specific flags to hide the console window on Windows.
/// On non-Windows platforms, this is a no-op.
#[cfg(target_os = "windows")]
pub fn apply_creation_flags(cmd: &mut Command) -> &mut Command {
    use std::os::windows::process::CommandExt;
    const CREATE_NO_WINDOW: u32 = 0x08000000;
    cmd.creation_flags(CREATE_NO_WINDOW)
}

#[cfg(not(target_os = "windows"))]
pub fn apply_creation_flags(cmd: &mut Command) -> &mut Command {
    cmd
}

/// Human readable duration, e.g. `1 Day 3 Hours 12 Seconds`.
/// Zero components are omitted; a zero duration renders as `0 Seconds`.
pub fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    let parts = [
        (total / 86_400, "Day", "Days"),
        ((total % 86_400) / 3_600, "Hour", "Hours"),
        ((total % 3_600) / 60, "Minute", "Minutes"),
        (total % 60, "Second", "Seconds"),
    ];

    let rendered: Vec<String> = parts
        .iter()
        .filter(|(value, _, _)| *value > 0)
        .map(|(value, one, many)| format!("{} {}", value, if *value == 1 { one } else { many }))
        .collect();

    if rendered.is_empty() {
        "0 Seconds".to_string()
    } else {
        rendered.join(" ")
    }
}

/// Recursively copy `src` into `dst`, creating directories as needed and
/// overwriting existing files.
pub fn copy_dir_recursive(src: &Path, dst: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let path = entry.path();
        let dest = dst.join(entry.file_name());
        if path.is_dir() {
            copy_dir_recursive(&path, &dest)?;
        } else {
            std::fs::copy(&path, &dest)?;
        }
    }
    Ok(())
}
