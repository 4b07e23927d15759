//! NETCONF sessions over the system ssh client.
//!
//! The session runs `ssh -s netconf` (wrapped in `sshpass -e` when a password
//! is configured) and talks to it over pipes. A reader thread splits stdout
//! into messages so every wait can be bounded by a timeout.

use crate::error::{Error, Result};
use crate::framing::{self, Decoder};
use crate::reply::{self, Reply};
use crate::rpc;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// How long to wait for the ssh process to exit after the session ends
const EXIT_GRACE: Duration = Duration::from_millis(500);

/// Bound on the close-session exchange
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection parameters for one device.
#[derive(Clone)]
pub struct SshConfig {
    /// ssh client to run
    pub program: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    /// Passed to `sshpass` through the environment, never on the command line
    pub password: Option<String>,
    pub identity_file: Option<PathBuf>,
    /// Bound on connecting and on the hello exchange
    pub connect_timeout: Duration,
    /// Bound on each RPC
    pub rpc_timeout: Duration,
}

impl SshConfig {
    pub fn new(host: &str, port: u16, username: &str) -> Self {
        Self {
            program: "ssh".to_string(),
            host: host.to_string(),
            port,
            username: username.to_string(),
            password: None,
            identity_file: None,
            connect_timeout: Duration::from_secs(30),
            rpc_timeout: Duration::from_secs(30),
        }
    }

    /// Build the command that starts the NETCONF subsystem.
    pub fn command(&self) -> Command {
        let mut cmd = match &self.password {
            Some(password) => {
                let mut cmd = Command::new("sshpass");
                cmd.arg("-e").arg(&self.program).env("SSHPASS", password);
                cmd
            }
            None => Command::new(&self.program),
        };

        let batch = if self.password.is_some() { "no" } else { "yes" };
        cmd.arg("-o")
            .arg(format!("ConnectTimeout={}", self.connect_timeout.as_secs().max(1)))
            .arg("-o")
            .arg(format!("BatchMode={}", batch))
            .arg("-o")
            .arg("StrictHostKeyChecking=accept-new")
            .arg("-p")
            .arg(self.port.to_string())
            .arg("-l")
            .arg(&self.username);
        if let Some(identity) = &self.identity_file {
            cmd.arg("-i").arg(identity);
        }
        cmd.arg(&self.host)
            .arg("-s")
            .arg("netconf")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }
}

impl std::fmt::Debug for SshConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshConfig")
            .field("program", &self.program)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("identity_file", &self.identity_file)
            .finish_non_exhaustive()
    }
}

/// An open NETCONF session.
pub struct Session {
    writer: Box<dyn Write + Send>,
    incoming: Receiver<io::Result<String>>,
    child: Option<Child>,
    stderr: Arc<Mutex<String>>,
    stderr_reader: Option<JoinHandle<()>>,
    timeout: Duration,
    next_id: u64,
    session_id: Option<String>,
    closed: bool,
}

impl Session {
    /// Start ssh and complete the hello exchange.
    pub fn connect(config: &SshConfig) -> Result<Self> {
        let mut cmd = config.command();
        log::debug!(
            "{}: starting {} {:?}",
            config.host,
            cmd.get_program().to_string_lossy(),
            cmd.get_args().collect::<Vec<_>>()
        );

        let mut child = cmd.spawn().map_err(|source| Error::Spawn {
            program: cmd.get_program().to_string_lossy().to_string(),
            source,
        })?;
        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            let _ = child.kill();
            return Err(Error::Protocol("ssh pipes unavailable".to_string()));
        };

        let mut session = Self::from_streams(stdout, stdin, config.rpc_timeout);
        session.child = Some(child);
        session.stderr_reader = Some(collect_stderr(stderr, Arc::clone(&session.stderr)));
        let session = session.establish(config.connect_timeout)?;
        log::debug!(
            "{}: NETCONF session {} established",
            config.host,
            session.session_id.as_deref().unwrap_or("?")
        );
        Ok(session)
    }

    /// Complete the hello exchange, or tear the session down without a close-session.
    pub fn establish(mut self, timeout: Duration) -> Result<Self> {
        if let Err(e) = self.handshake(timeout) {
            self.abort();
            return Err(e);
        }
        Ok(self)
    }

    /// Build a session over arbitrary streams; no hello is exchanged yet.
    pub fn from_streams(
        reader: impl Read + Send + 'static,
        writer: impl Write + Send + 'static,
        timeout: Duration,
    ) -> Self {
        Self {
            writer: Box::new(writer),
            incoming: spawn_reader(reader),
            child: None,
            stderr: Arc::new(Mutex::new(String::new())),
            stderr_reader: None,
            timeout,
            next_id: 101,
            session_id: None,
            closed: false,
        }
    }

    /// Wait for the server hello and answer with ours.
    pub fn handshake(&mut self, timeout: Duration) -> Result<()> {
        let hello = self.receive("hello", timeout)?;
        if !hello.contains("hello") {
            return Err(Error::Protocol(format!(
                "expected <hello>, got: {}",
                truncate(&hello, 120)
            )));
        }
        self.session_id = reply::session_id(&hello);
        self.send(&rpc::hello())
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Send one RPC and wait for its reply.
    pub fn rpc(&mut self, operation: &str, body: &str) -> Result<Reply> {
        if self.closed {
            return Err(Error::Connection {
                message: "session is closed".to_string(),
            });
        }
        let id = self.next_id;
        self.next_id += 1;

        log::trace!("rpc {} ({}): {}", id, operation, body);
        self.send(&rpc::envelope(id, body))?;
        let deadline = Instant::now() + self.timeout;
        let raw = loop {
            let raw = self.receive_until(operation, deadline, self.timeout)?;
            // Replies to RPCs that already timed out may still arrive.
            match reply::message_id(&raw).and_then(|m| m.parse::<u64>().ok()) {
                Some(late) if late < id => {
                    log::debug!("{}: discarding late reply {}", operation, late);
                }
                _ => break raw,
            }
        };
        log::trace!("reply {}: {}", id, raw);

        let reply = Reply::parse(operation, &raw)?;
        if let Some(reply_id) = reply.message_id() {
            if reply_id != id.to_string() {
                return Err(Error::Protocol(format!(
                    "reply to {} carries message-id {} (expected {})",
                    operation, reply_id, id
                )));
            }
        }
        Ok(reply)
    }

    /// Configuration under `roots` as `set` statements.
    pub fn get_configuration(&mut self, roots: &[&str]) -> Result<String> {
        let reply = self.rpc("get-configuration", &rpc::get_configuration(roots))?;
        reply
            .configuration_set()
            .ok_or_else(|| Error::Protocol("reply has no <configuration-set>".to_string()))
    }

    pub fn lock(&mut self) -> Result<()> {
        self.rpc("lock", &rpc::lock_candidate()).map(drop)
    }

    pub fn unlock(&mut self) -> Result<()> {
        self.rpc("unlock", &rpc::unlock_candidate()).map(drop)
    }

    /// Stage `set`/`delete` statements in the candidate.
    pub fn load_set(&mut self, text: &str) -> Result<()> {
        self.rpc("load-configuration", &rpc::load_set(text)).map(drop)
    }

    /// Pending candidate changes; `None` when there are none.
    pub fn compare(&mut self) -> Result<Option<String>> {
        let reply = self.rpc("diff", &rpc::compare_rollback())?;
        Ok(reply.configuration_output())
    }

    /// Commit the candidate; false when the device reported no effect.
    pub fn commit(&mut self, comment: &str) -> Result<bool> {
        let reply = self.rpc("commit", &rpc::commit(comment))?;
        Ok(reply.commit_succeeded())
    }

    pub fn discard(&mut self) -> Result<()> {
        self.rpc("discard", &rpc::discard_changes()).map(drop)
    }

    /// End the session politely and reap the ssh process.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        let timeout = self.timeout;
        self.timeout = timeout.min(CLOSE_TIMEOUT);
        let result = self.rpc("close-session", &rpc::close_session()).map(drop);
        self.timeout = timeout;
        self.closed = true;
        self.reap();
        result
    }

    fn send(&mut self, message: &str) -> Result<()> {
        let framed = framing::frame(message);
        let written = self
            .writer
            .write_all(framed.as_bytes())
            .and_then(|()| self.writer.flush());
        match written {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                self.closed = true;
                Err(self.disconnect_error())
            }
            Err(e) => Err(Error::Io(e)),
        }
    }

    fn receive(&mut self, operation: &str, timeout: Duration) -> Result<String> {
        self.receive_until(operation, Instant::now() + timeout, timeout)
    }

    /// Next message before `deadline`; a timeout reports `timeout` as the bound.
    fn receive_until(
        &mut self,
        operation: &str,
        deadline: Instant,
        timeout: Duration,
    ) -> Result<String> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match self.incoming.recv_timeout(remaining) {
            Ok(Ok(message)) => Ok(message),
            Ok(Err(e)) => Err(Error::Io(e)),
            Err(RecvTimeoutError::Timeout) => Err(Error::Timeout {
                operation: operation.to_string(),
                timeout,
            }),
            Err(RecvTimeoutError::Disconnected) => {
                self.closed = true;
                Err(self.disconnect_error())
            }
        }
    }

    /// Classify a dropped session from whatever ssh printed.
    fn disconnect_error(&mut self) -> Error {
        self.wait_for_exit();
        let stderr = self
            .stderr
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default();
        Error::from_ssh_stderr(&stderr)
    }

    fn wait_for_exit(&mut self) -> bool {
        let Some(child) = self.child.as_mut() else {
            return true;
        };
        let deadline = Instant::now() + EXIT_GRACE;
        loop {
            match child.try_wait() {
                Ok(Some(_)) => break,
                Ok(None) if Instant::now() < deadline => thread::sleep(Duration::from_millis(20)),
                _ => return false,
            }
        }
        if let Some(handle) = self.stderr_reader.take() {
            let _ = handle.join();
        }
        true
    }

    /// Mark the session closed and kill ssh; no close-session is sent.
    fn abort(&mut self) {
        self.closed = true;
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }

    fn reap(&mut self) {
        if !self.wait_for_exit() {
            if let Some(child) = self.child.as_mut() {
                let _ = child.kill();
                let _ = child.wait();
            }
        }
        self.child = None;
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.close() {
                log::debug!("close-session failed: {}", e);
            }
        }
        self.reap();
    }
}

fn spawn_reader(mut reader: impl Read + Send + 'static) -> Receiver<io::Result<String>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut decoder = Decoder::new();
        let mut buf = [0u8; 8192];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    decoder.push(&buf[..n]);
                    while let Some(message) = decoder.next_message() {
                        if tx.send(Ok(message)).is_err() {
                            return;
                        }
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    let _ = tx.send(Err(e));
                    break;
                }
            }
        }
    });
    rx
}

fn collect_stderr(
    mut stderr: impl Read + Send + 'static,
    sink: Arc<Mutex<String>>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut buf = [0u8; 1024];
        while let Ok(n) = stderr.read(&mut buf) {
            if n == 0 {
                break;
            }
            if let Ok(mut s) = sink.lock() {
                s.push_str(&String::from_utf8_lossy(&buf[..n]));
            }
        }
    })
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((i, _)) => &text[..i],
        None => text,
    }
}
