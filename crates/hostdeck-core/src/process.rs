//! Child process helpers shared by jobs and terminal sessions.
//!
//! On Unix every child is started in its own process group so that signals
//! reach the whole tree a script or shell line spawned (a `sleep` started by a
//! `.sh` script would otherwise keep the output pipes open after its parent
//! was killed).

use std::process::ExitStatus;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// How long to wait for output readers after the child exited.
pub(crate) const CAPTURE_DRAIN: Duration = Duration::from_secs(2);

/// Put the command in a fresh process group (Unix only).
pub(crate) fn isolate_process_group(command: &mut Command) {
    #[cfg(unix)]
    {
        command.process_group(0);
    }
    #[cfg(not(unix))]
    {
        let _ = command;
    }
}

/// Send `signal` to the process group led by `pid`.
///
/// Returns false when the group no longer exists.
#[cfg(unix)]
fn signal_group(pid: u32, signal: libc::c_int) -> bool {
    let Ok(pgid) = i32::try_from(pid) else {
        return false;
    };
    // SAFETY: kill(2) with a negative pid targets the process group; no memory is touched.
    let rc = unsafe { libc::kill(-pgid, signal) };
    if rc == -1 {
        let errno = std::io::Error::last_os_error();
        if errno.raw_os_error() != Some(libc::ESRCH) {
            warn!("signal {} to process group {} failed: {}", signal, pid, errno);
        }
        return false;
    }
    true
}

/// Kill the child and everything in its process group without waiting.
pub(crate) fn kill_tree(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        signal_group(pid, libc::SIGKILL);
    }
    if let Err(e) = child.start_kill() {
        debug!("start_kill failed (process likely gone): {:?}", e);
    }
}

/// Terminate gracefully: SIGTERM to the group, wait up to `grace`, then SIGKILL.
///
/// Always reaps the child so no zombie is left behind.
pub(crate) async fn terminate(child: &mut Child, grace: Duration) -> std::io::Result<ExitStatus> {
    #[cfg(unix)]
    if let Some(pid) = child.id()
        && signal_group(pid, libc::SIGTERM)
    {
        match tokio::time::timeout(grace, child.wait()).await {
            Ok(result) => return result,
            Err(_) => {
                warn!(
                    "Process {} didn't respond to SIGTERM within {:?}, sending SIGKILL",
                    pid, grace
                );
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = grace;
    }

    kill_tree(child);
    child.wait().await
}

/// Exit code for records: the process code, or -1 when killed by a signal.
pub(crate) fn exit_code(status: &ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

/// Human-readable description of an exit status.
pub(crate) fn describe_exit(status: &ExitStatus) -> String {
    #[cfg(unix)]
    let signal = {
        use std::os::unix::process::ExitStatusExt;
        status.signal()
    };
    #[cfg(not(unix))]
    let signal: Option<i32> = None;

    match (status.code(), signal) {
        (Some(code), _) => format!("exited with code {}", code),
        (None, Some(sig)) => {
            let sig_name = match sig {
                9 => "SIGKILL",
                15 => "SIGTERM",
                11 => "SIGSEGV",
                6 => "SIGABRT",
                _ => "",
            };
            if sig_name.is_empty() {
                format!("killed by signal {}", sig)
            } else {
                format!("killed by {} (signal {})", sig_name, sig)
            }
        }
        (None, None) => "exited (unknown status)".to_string(),
    }
}

/// Bytes read so far from one output stream.
pub(crate) type CaptureBuffer = Arc<Mutex<Vec<u8>>>;

fn lock_buffer(buffer: &CaptureBuffer) -> MutexGuard<'_, Vec<u8>> {
    buffer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Read a stream to the end into `buffer`, keeping at most the last `max_bytes`.
///
/// Every chunk lands in the shared buffer as soon as it is read, so whatever
/// was captured survives if the reader is cancelled. The buffer may grow to
/// twice the limit before it is trimmed.
pub(crate) async fn read_capped<R>(
    mut reader: R,
    max_bytes: usize,
    buffer: CaptureBuffer,
) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        let mut captured = lock_buffer(&buffer);
        captured.extend_from_slice(&chunk[..n]);
        if max_bytes > 0 && captured.len() > max_bytes * 2 {
            let keep_from = captured.len() - max_bytes;
            captured.drain(..keep_from);
        }
    }
}

/// A background reader draining one output stream.
#[derive(Debug)]
pub(crate) struct CaptureTask {
    buffer: CaptureBuffer,
    handle: JoinHandle<std::io::Result<()>>,
}

impl CaptureTask {
    /// Stop reading. Bytes already captured stay available.
    pub(crate) fn abort(&self) {
        self.handle.abort();
    }
}

/// What was collected from one stream.
#[derive(Debug, Default)]
pub(crate) struct Captured {
    pub text: String,
    /// Diagnostic line for the job or terminal output.
    pub note: Option<String>,
    /// The stream failed to read, as opposed to merely being held open.
    pub failed: bool,
}

/// Start draining a child's output stream in the background.
///
/// Streams must be drained while the child runs, otherwise a chatty process
/// blocks on a full pipe and never exits.
pub(crate) fn spawn_capture<R>(stream: Option<R>, max_bytes: usize) -> Option<CaptureTask>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    stream.map(|stream| {
        let buffer = CaptureBuffer::default();
        let handle = tokio::spawn(read_capped(stream, max_bytes, buffer.clone()));
        CaptureTask { buffer, handle }
    })
}

/// Collect a capture task once the child has exited.
///
/// A descendant that inherited the pipe can keep it open after the child
/// exits, so the wait is bounded. In that case the reader is cancelled and the
/// output captured up to that point is returned with a note.
pub(crate) async fn finish_capture(
    task: Option<CaptureTask>,
    wait: Duration,
    max_bytes: usize,
) -> Captured {
    let Some(CaptureTask { buffer, mut handle }) = task else {
        return Captured::default();
    };

    let (note, failed) = match tokio::time::timeout(wait, &mut handle).await {
        Ok(Ok(Ok(()))) => (None, false),
        Ok(Ok(Err(e))) => (Some(format!("failed to read output: {}", e)), true),
        Ok(Err(e)) => (Some(format!("output reader failed: {}", e)), true),
        Err(_) => {
            handle.abort();
            debug!("Output pipe still open after {:?}, keeping partial output", wait);
            (
                Some("output stream still held open by a background process".to_string()),
                false,
            )
        }
    };

    let text = tail_lossy(&lock_buffer(&buffer), max_bytes);
    Captured { text, note, failed }
}

/// Diagnostic lines from both streams, without repeating the same note.
pub(crate) fn capture_notes(stdout: Option<String>, stderr: Option<String>) -> Vec<String> {
    let mut notes: Vec<String> = [stdout, stderr].into_iter().flatten().collect();
    notes.dedup();
    notes
}

/// Decode captured bytes, keeping at most the last `max_bytes` and starting on
/// a UTF-8 character boundary.
pub(crate) fn tail_lossy(data: &[u8], max_bytes: usize) -> String {
    if max_bytes == 0 || data.len() <= max_bytes {
        return String::from_utf8_lossy(data).into_owned();
    }

    let keep_from = data.len() - max_bytes;
    // Skip UTF-8 continuation bytes (10xxxxxx) so we start on a char boundary.
    let start = (keep_from..data.len())
        .find(|&i| (data[i] & 0xC0) != 0x80)
        .unwrap_or(data.len());

    String::from_utf8_lossy(&data[start..]).into_owned()
}
