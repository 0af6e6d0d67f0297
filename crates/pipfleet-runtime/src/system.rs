use crate::backend::{Invocation, ProcessRunner, RunningProcess};
use crate::RuntimeError;
use std::io::{self, BufRead, BufReader, Read};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};
use tracing::debug;

/// Runs invocations as real child processes.
///
/// Standard output and standard error are each drained by a dedicated reader
/// thread into one channel, so lines arrive in the order the process wrote
/// them to either stream.
#[derive(Debug, Default)]
pub struct SystemRunner;

impl SystemRunner {
    pub fn new() -> Self {
        Self
    }
}

type LineResult = io::Result<String>;

fn pump<R: Read>(pipe: R, tx: &Sender<LineResult>) {
    let mut reader = BufReader::new(pipe);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => return,
            Ok(_) => {
                while matches!(buf.last(), Some(b'\n' | b'\r')) {
                    buf.pop();
                }
                let line = String::from_utf8_lossy(&buf).into_owned();
                if tx.send(Ok(line)).is_err() {
                    return;
                }
            }
            Err(e) => {
                let _ = tx.send(Err(e));
                return;
            }
        }
    }
}

struct SystemProcess {
    child: Child,
    lines: Receiver<LineResult>,
    readers: Vec<JoinHandle<()>>,
}

impl RunningProcess for SystemProcess {
    fn next_line(&mut self) -> Option<Result<String, RuntimeError>> {
        self.lines.recv().ok().map(|r| r.map_err(RuntimeError::Io))
    }

    fn wait(mut self: Box<Self>) -> Result<i32, RuntimeError> {
        let status = self.child.wait()?;
        for reader in self.readers.drain(..) {
            if reader.join().is_err() {
                return Err(RuntimeError::ExecFailed(
                    "output reader thread panicked".to_owned(),
                ));
            }
        }
        debug!("process {} exited: {status}", self.child.id());
        Ok(status.code().unwrap_or(-1))
    }
}

impl ProcessRunner for SystemRunner {
    fn name(&self) -> &'static str {
        "system"
    }

    fn spawn(&self, invocation: &Invocation) -> Result<Box<dyn RunningProcess>, RuntimeError> {
        debug!("spawning: {}", invocation.command_line());
        let mut child = Command::new(&invocation.program)
            .args(&invocation.args)
            .envs(&invocation.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| RuntimeError::SpawnFailed {
                program: invocation.program.clone(),
                source,
            })?;

        let (tx, rx) = mpsc::channel();
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            let tx = tx.clone();
            readers.push(thread::spawn(move || pump(stdout, &tx)));
        }
        if let Some(stderr) = child.stderr.take() {
            let tx = tx.clone();
            readers.push(thread::spawn(move || pump(stderr, &tx)));
        }
        drop(tx);

        Ok(Box::new(SystemProcess {
            child,
            lines: rx,
            readers,
        }))
    }
}
