use std::io::ErrorKind;
use std::io::Read;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use portable_pty::ChildKiller;
use portable_pty::CommandBuilder;
use portable_pty::MasterPty;
use portable_pty::PtySize;
use portable_pty::native_pty_system;
use tokio::sync::mpsc;
use tracing::debug;
use tracing::info;

const READ_CHUNK_SIZE: usize = 1024;
const OUTPUT_CHANNEL_CAPACITY: usize = 256;

pub(crate) type PtyWriter = Arc<StdMutex<Box<dyn Write + Send>>>;

/// The child side of one run. Dropping it closes the master end.
pub(crate) struct PtyProcess {
    writer: PtyWriter,
    killer: StdMutex<Box<dyn ChildKiller + Send + Sync>>,
    exited: Arc<AtomicBool>,
    _master: StdMutex<Box<dyn MasterPty + Send>>,
}

impl PtyProcess {
    pub(crate) fn writer(&self) -> PtyWriter {
        Arc::clone(&self.writer)
    }

    pub(crate) fn has_exited(&self) -> bool {
        self.exited.load(Ordering::SeqCst)
    }

    pub(crate) fn kill(&self) -> std::io::Result<()> {
        let mut killer = self
            .killer
            .lock()
            .map_err(|_| std::io::Error::other("pty killer lock poisoned"))?;
        killer.kill()
    }
}

/// Runs `<shell> -c <command>` in `cwd` under a fresh pseudo-terminal.
///
/// Output arrives on the returned channel; the channel closes at
/// end-of-stream, and read errors are treated the same way.
pub(crate) fn spawn_pty(
    shell: &str,
    command: &str,
    cwd: &Path,
) -> anyhow::Result<(PtyProcess, mpsc::Receiver<Vec<u8>>)> {
    let pty_system = native_pty_system();
    let pair = pty_system.openpty(PtySize {
        rows: 24,
        cols: 120,
        pixel_width: 0,
        pixel_height: 0,
    })?;

    let mut command_builder = CommandBuilder::new(shell);
    command_builder.arg("-c");
    command_builder.arg(command);
    command_builder.cwd(cwd);
    if std::env::var_os("TERM").is_none() {
        command_builder.env("TERM", "xterm-256color");
    }

    let mut child = pair.slave.spawn_command(command_builder)?;
    // The slave must be closed on our side or the reader never sees EOF.
    drop(pair.slave);
    let killer = child.clone_killer();

    let (output_tx, output_rx) = mpsc::channel::<Vec<u8>>(OUTPUT_CHANNEL_CAPACITY);
    let mut reader = pair.master.try_clone_reader()?;
    tokio::task::spawn_blocking(move || {
        let mut buf = [0u8; READ_CHUNK_SIZE];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if output_tx.blocking_send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Err(ref err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    // Linux reports EIO once the child side is gone.
                    debug!(error = %err, "pty read ended");
                    break;
                }
            }
        }
    });

    let writer = pair.master.take_writer()?;

    let exited = Arc::new(AtomicBool::new(false));
    let wait_exited = Arc::clone(&exited);
    tokio::task::spawn_blocking(move || {
        let exit_code = match child.wait() {
            Ok(status) => status.exit_code() as i32,
            Err(_) => -1,
        };
        wait_exited.store(true, Ordering::SeqCst);
        info!(exit_code, "pty child exited");
    });

    Ok((
        PtyProcess {
            writer: Arc::new(StdMutex::new(writer)),
            killer: StdMutex::new(killer),
            exited,
            _master: StdMutex::new(pair.master),
        },
        output_rx,
    ))
}
