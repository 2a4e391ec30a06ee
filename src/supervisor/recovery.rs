//! Recovery file: pid + start time of the running game server.
//!
//! Written on start, deleted on clean shutdown. Finding one at startup means
//! the previous supervisor died with its child possibly still alive.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};
use std::path::Path;
use sysinfo::{Pid, System};

pub const RECOVERY_FILE: &str = "pid.bin";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryRecord {
    pub pid: u32,
    /// Process start time, Unix seconds
    pub started_at: u64,
}

impl RecoveryRecord {
    pub fn encode<W: Write>(&self, mut writer: W) -> std::io::Result<()> {
        writer.write_u32::<LittleEndian>(self.pid)?;
        writer.write_u64::<LittleEndian>(self.started_at)?;
        Ok(())
    }

    pub fn decode<R: Read>(mut reader: R) -> std::io::Result<Self> {
        let pid = reader.read_u32::<LittleEndian>()?;
        let started_at = reader.read_u64::<LittleEndian>()?;
        Ok(Self { pid, started_at })
    }
}

pub fn write(path: &Path, record: RecoveryRecord) -> std::io::Result<()> {
    let mut buf = Vec::with_capacity(12);
    record.encode(&mut buf)?;
    std::fs::write(path, buf)
}

/// `Ok(None)` if there is no recovery file.
pub fn read(path: &Path) -> std::io::Result<Option<RecoveryRecord>> {
    if !path.exists() {
        return Ok(None);
    }
    let data = std::fs::read(path)?;
    RecoveryRecord::decode(data.as_slice()).map(Some)
}

pub fn clear(path: &Path) {
    if path.exists() {
        if let Err(e) = std::fs::remove_file(path) {
            tracing::warn!("Failed to remove recovery file {}: {}", path.display(), e);
        }
    }
}

/// Start time (Unix seconds) of a live process, `None` if it is gone.
pub fn process_start_time(pid: u32) -> Option<u64> {
    let mut sys = System::new();
    let pid = Pid::from_u32(pid);
    if !sys.refresh_process(pid) {
        return None;
    }
    sys.process(pid).map(|p| p.start_time())
}

/// The previous run's child, if the recorded pid is alive *and* started at
/// the recorded time. A reused pid does not match.
pub fn find_orphan(path: &Path) -> Option<RecoveryRecord> {
    let record = match read(path) {
        Ok(Some(record)) => record,
        Ok(None) => return None,
        Err(e) => {
            tracing::warn!("Unreadable recovery file {}: {}", path.display(), e);
            return None;
        }
    };
    match process_start_time(record.pid) {
        Some(started_at) if started_at == record.started_at => Some(record),
        _ => None,
    }
}

/// 고아 프로세스 강제 종료
pub fn kill(pid: u32) -> anyhow::Result<()> {
    tracing::info!("Killing orphaned server process (pid: {})", pid);

    #[cfg(target_os = "windows")]
    {
        use winapi::um::handleapi::CloseHandle;
        use winapi::um::processthreadsapi::{OpenProcess, TerminateProcess};
        use winapi::um::winnt::PROCESS_TERMINATE;

        unsafe {
            let handle = OpenProcess(PROCESS_TERMINATE, 0, pid);
            if handle.is_null() {
                anyhow::bail!("Failed to open process {}", pid);
            }
            let result = TerminateProcess(handle, 1);
            CloseHandle(handle);
            if result == 0 {
                anyhow::bail!("TerminateProcess failed for {}", pid);
            }
        }
    }

    #[cfg(not(target_os = "windows"))]
    {
        use nix::sys::signal::{self, Signal};
        use nix::unistd::Pid as NixPid;

        signal::kill(NixPid::from_raw(pid as i32), Signal::SIGKILL)
            .map_err(|e| anyhow::anyhow!("Failed to send signal to {}: {}", pid, e))?;
    }

    Ok(())
}
