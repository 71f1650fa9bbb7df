use std::io::{Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct ProcessOutput {
    /// `None` when the child was killed at the deadline.
    pub status: Option<ExitStatus>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.status.is_some_and(|status| status.success())
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.status.and_then(|status| status.code())
    }
}

struct PipeCapture {
    handle: thread::JoinHandle<()>,
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl PipeCapture {
    fn spawn<R: Read + Send + 'static>(mut pipe: R) -> Self {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&buffer);
        let handle = thread::spawn(move || {
            let mut chunk = [0_u8; 8192];
            loop {
                match pipe.read(&mut chunk) {
                    Ok(0) | Err(_) => break,
                    Ok(read) => {
                        if let Ok(mut buf) = sink.lock() {
                            buf.extend_from_slice(&chunk[..read]);
                        }
                    }
                }
            }
        });
        Self { handle, buffer }
    }

    /// Waits for EOF. Only used once the child has exited normally.
    fn finish(self) -> String {
        let _ = self.handle.join();
        Self::snapshot(&self.buffer)
    }

    /// Takes what was captured so far without waiting: after a kill, descendants of
    /// the child may still hold the pipe open.
    fn abandon(self) -> String {
        Self::snapshot(&self.buffer)
    }

    fn snapshot(buffer: &Mutex<Vec<u8>>) -> String {
        match buffer.lock() {
            Ok(buf) => String::from_utf8_lossy(&buf).into_owned(),
            Err(poisoned) => String::from_utf8_lossy(&poisoned.into_inner()).into_owned(),
        }
    }
}

/// Spawns `command`, feeds `stdin` (if any), and waits at most `timeout`.
/// A child still running at the deadline is killed and reported with `timed_out`.
pub fn run_with_timeout(
    command: &mut Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
) -> std::io::Result<ProcessOutput> {
    command
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = command.spawn()?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| std::io::Error::other("missing stdout pipe"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| std::io::Error::other("missing stderr pipe"))?;
    let stdout_capture = PipeCapture::spawn(stdout);
    let stderr_capture = PipeCapture::spawn(stderr);

    // Written from its own thread so a child that never drains stdin cannot stall
    // the deadline loop below. A broken pipe means the child exited early, which
    // its exit status already reports.
    if let (Some(bytes), Some(mut pipe)) = (stdin, child.stdin.take()) {
        let bytes = bytes.to_vec();
        thread::spawn(move || {
            let _ = pipe.write_all(&bytes);
        });
    }

    match wait_with_deadline(&mut child, timeout)? {
        Some(status) => Ok(ProcessOutput {
            status: Some(status),
            stdout: stdout_capture.finish(),
            stderr: stderr_capture.finish(),
            timed_out: false,
        }),
        None => Ok(ProcessOutput {
            status: None,
            stdout: stdout_capture.abandon(),
            stderr: stderr_capture.abandon(),
            timed_out: true,
        }),
    }
}

fn wait_with_deadline(child: &mut Child, timeout: Duration) -> std::io::Result<Option<ExitStatus>> {
    let start = Instant::now();
    loop {
        match child.try_wait()? {
            Some(status) => return Ok(Some(status)),
            None if start.elapsed() > timeout => {
                let _ = child.kill();
                child.wait()?;
                return Ok(None);
            }
            None => thread::sleep(Duration::from_millis(10)),
        }
    }
}
