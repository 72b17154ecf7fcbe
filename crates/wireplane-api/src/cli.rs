// Raw CLI session over an interactive SSH shell.
//
// There is no structured protocol here: the driver writes one command
// line, then reads until the platform's prompt pattern surfaces at the
// end of the output. Prompt regex and failure substrings come from the
// caller's CliPlatform; nothing is negotiated with the device.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::BytesMut;
use regex::Regex;
use tokio::sync::{Mutex, watch};
use tokio::time::timeout;
use tracing::{debug, info};

use crate::capabilities::{Capabilities, Encoding};
use crate::error::Error;
use crate::link::Link;
use crate::op::{Fetched, MergePolicy, Payload, Scope, SessionHealth};
use crate::path::Path;
use crate::ssh::{ChannelMode, SshLink};
use crate::target::{CliPlatform, Target};
use crate::value::Value;

/// How far back from the end of buffered output to search for a
/// prompt. Keeps the scan O(window) as output accumulates.
const PROMPT_WINDOW: usize = 256;

/// Prompt-driven session for devices that only speak their native CLI.
///
/// Commands run strictly one at a time behind a lock, since the shell
/// is a single serial conversation. Output comes back as raw text;
/// there is no schema to decode against.
pub struct CliSession {
    inner: Mutex<Shell>,
    prompt: Regex,
    failed_when: Vec<String>,
    caps: Capabilities,
    endpoint: String,
    request_timeout: Duration,
    health: Arc<watch::Sender<SessionHealth>>,
    closed: AtomicBool,
}

struct Shell {
    link: Box<dyn Link>,
    buf: BytesMut,
}

impl CliSession {
    /// Open an SSH shell channel to the target and wait out the login
    /// banner.
    pub async fn connect(target: &Target) -> Result<Self, Error> {
        let platform = target.cli_platform.clone().ok_or_else(|| {
            Error::unsupported(
                "CLI targets need a CliPlatform (prompt pattern and failure markers)",
            )
        })?;
        let link = SshLink::connect(target, ChannelMode::Shell).await?;
        Self::from_link(
            Box::new(link),
            &platform,
            target.endpoint(),
            target.request_timeout,
        )
        .await
    }

    /// Drive an already-open shell stream. Tests wire a duplex pipe in
    /// here.
    pub async fn from_link(
        link: Box<dyn Link>,
        platform: &CliPlatform,
        endpoint: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self, Error> {
        let endpoint = endpoint.into();
        let prompt = Regex::new(&platform.prompt).map_err(|e| {
            Error::negotiation(&endpoint, format!("prompt pattern does not compile: {e}"))
        })?;
        let (health, _) = watch::channel(SessionHealth::Ready);
        let session = Self {
            inner: Mutex::new(Shell { link, buf: BytesMut::new() }),
            prompt,
            failed_when: platform.failed_when_contains.clone(),
            caps: Capabilities::cli(),
            endpoint,
            request_timeout,
            health: Arc::new(health),
            closed: AtomicBool::new(false),
        };
        // Swallow the banner up to the first prompt so command output
        // starts clean.
        {
            let mut shell = session.inner.lock().await;
            session.read_to_prompt(&mut shell).await?;
        }
        info!(endpoint = %session.endpoint, "CLI session ready");
        Ok(session)
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.caps
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn health(&self) -> watch::Receiver<SessionHealth> {
        self.health.subscribe()
    }

    /// Send one command line and return its output with the echoed
    /// command and the trailing prompt stripped.
    pub async fn run(&self, command: &str) -> Result<String, Error> {
        self.ensure_open()?;
        let command = command.trim_end();
        let mut shell = self.inner.lock().await;
        // Anything buffered now is a leftover from a timed-out
        // command; drop it so output attribution starts clean.
        shell.buf.clear();
        let mut line = command.to_owned();
        line.push('\n');
        shell.link.send(line.as_bytes()).await?;
        let raw = self.read_to_prompt(&mut shell).await?;
        drop(shell);
        self.set_health(SessionHealth::Ready);

        let output = strip_echo(&raw, command);
        for marker in &self.failed_when {
            if output.contains(marker.as_str()) {
                let detail = output
                    .lines()
                    .find(|l| l.contains(marker.as_str()))
                    .unwrap_or(marker)
                    .trim();
                return Err(Error::Rejected {
                    message: detail.to_owned(),
                    severity: None,
                    tag: None,
                    atomic: false,
                });
            }
        }
        Ok(output)
    }

    /// Reads are command-driven: segment names and key values join
    /// into a word list, so `/show/interfaces[name=eth0]` runs
    /// `show interfaces eth0`. `scope` is recorded but cannot filter
    /// anything without a schema.
    pub async fn get(&self, path: &Path, scope: Scope) -> Result<Fetched, Error> {
        let command = path_to_command(path)?;
        let output = self.run(&command).await?;
        Ok(Fetched { origin: scope, root: Value::String(output) })
    }

    /// Run an ASCII payload of config lines, one at a time.
    ///
    /// Only `Merge` maps onto a line-based config; the payload itself
    /// must carry any mode changes (`configure terminal` .. `end`) the
    /// platform needs. A failed line aborts the rest, and whatever
    /// already ran stays applied, so rejections report `atomic: false`.
    pub async fn set(
        &self,
        _path: &Path,
        payload: Option<&Payload>,
        policy: MergePolicy,
    ) -> Result<(), Error> {
        if policy != MergePolicy::Merge {
            return Err(Error::unsupported(format!(
                "CLI writes are merge-only, got `{policy}`"
            )));
        }
        let payload =
            payload.ok_or_else(|| Error::unsupported("CLI writes need an ASCII payload"))?;
        if payload.encoding != Encoding::Ascii {
            return Err(Error::unsupported(format!(
                "CLI writes take ASCII payloads, got {}",
                payload.encoding
            )));
        }
        let script = std::str::from_utf8(&payload.bytes)
            .map_err(|_| Error::malformed("ASCII", "payload is not valid UTF-8"))?;
        for line in script.lines().map(str::trim).filter(|l| !l.is_empty()) {
            self.run(line).await?;
        }
        Ok(())
    }

    /// Polite exit, then drop the channel either way. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut shell = self.inner.lock().await;
        let _ = shell.link.send(b"exit\n").await;
        let _ = shell.link.shutdown().await;
        self.health.send_replace(SessionHealth::Closed);
        debug!(endpoint = %self.endpoint, "CLI session closed");
    }

    /// Read until the prompt pattern appears at the end of output and
    /// return everything before it.
    async fn read_to_prompt(&self, shell: &mut Shell) -> Result<String, Error> {
        loop {
            if let Some(output) = self.split_at_prompt(&mut shell.buf) {
                return Ok(output);
            }
            let chunk = match timeout(self.request_timeout, shell.link.recv()).await {
                Ok(Ok(Some(chunk))) => chunk,
                Ok(Ok(None)) => {
                    self.closed.store(true, Ordering::SeqCst);
                    self.health.send_replace(SessionHealth::Closed);
                    return Err(Error::Closed);
                }
                Ok(Err(e)) => {
                    self.closed.store(true, Ordering::SeqCst);
                    self.health.send_replace(SessionHealth::Closed);
                    return Err(e);
                }
                Err(_) => {
                    // No prompt within the deadline. The shell may
                    // still be alive behind a slow command, so flag
                    // Degraded instead of tearing down.
                    self.set_health(SessionHealth::Degraded);
                    return Err(Error::Timeout { after: self.request_timeout });
                }
            };
            shell.buf.extend_from_slice(&chunk);
        }
    }

    fn split_at_prompt(&self, buf: &mut BytesMut) -> Option<String> {
        let text = String::from_utf8_lossy(buf);
        let cut = prompt_cut(&self.prompt, &text)?;
        let output = text[..cut].to_owned();
        drop(text);
        buf.clear();
        Some(output)
    }

    fn ensure_open(&self) -> Result<(), Error> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }
        Ok(())
    }

    fn set_health(&self, health: SessionHealth) {
        self.health.send_if_modified(|current| {
            if *current == SessionHealth::Closed || *current == health {
                return false;
            }
            *current = health;
            true
        });
    }
}

impl fmt::Debug for CliSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CliSession")
            .field("endpoint", &self.endpoint)
            .field("prompt", &self.prompt.as_str())
            .finish_non_exhaustive()
    }
}

/// Offset of a prompt match that sits at the very end of `text`
/// (trailing whitespace tolerated). Matches further in are command
/// output that happens to look like a prompt.
fn prompt_cut(prompt: &Regex, text: &str) -> Option<usize> {
    let mut search = text.len().saturating_sub(PROMPT_WINDOW);
    while !text.is_char_boundary(search) {
        search -= 1;
    }
    while let Some(found) = prompt.find_at(text, search) {
        if text[found.end()..].trim().is_empty() {
            return Some(found.start());
        }
        let mut next = found.end().max(found.start() + 1);
        while next < text.len() && !text.is_char_boundary(next) {
            next += 1;
        }
        if next > text.len() {
            break;
        }
        search = next;
    }
    None
}

fn strip_echo(raw: &str, command: &str) -> String {
    let text = raw.trim_start_matches(['\r', '\n']);
    let body = match text.split_once('\n') {
        Some((first, rest)) if first.trim_end_matches('\r').trim() == command => rest,
        _ => text,
    };
    body.trim_start_matches(['\r', '\n']).trim_end().to_owned()
}

fn path_to_command(path: &Path) -> Result<String, Error> {
    if path.is_root() {
        return Err(Error::InvalidPath {
            path: path.to_string(),
            detail: "a CLI read needs at least one word".to_owned(),
        });
    }
    let mut words = Vec::new();
    for segment in &path.segments {
        words.push(segment.name.clone());
        words.extend(segment.keys.iter().map(|(_, value)| value.clone()));
    }
    Ok(words.join(" "))
}
