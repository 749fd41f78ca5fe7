use super::*;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Pause between polls of the inbound queue.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Upper bound on polls per read, shared by round pauses and queue drains,
/// so a device that never stops talking still ends the read after ~30 s.
const MAX_POLLS: usize = 300;

/// Capacity of both the inbound and outbound queues.
const QUEUE_CAPACITY: usize = 1024;

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Quiet budget of a liveness probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Prompt shown by devices whose login password has expired.
pub(crate) const PASSWORD_CHANGE_PROMPT: &str =
    "The password needs to be changed. Change now? [Y/N]";

/// The same prompt once the decline has been echoed back.
pub(crate) const PASSWORD_CHANGE_DECLINED: &str =
    "The password needs to be changed. Change now? [Y/N]:N";

/// Spaces advance a "--More--" pager, which is still active while the family is unknown.
const PAGER_ADVANCE: &str = "             ";

impl ShellSession {
    /// Connects to `target` and returns a session whose login banner has been drained.
    pub async fn open(
        connector: &dyn Connector,
        target: &Target,
        config: Arc<SshConfig>,
    ) -> Result<ShellSession, ConnectError> {
        let transport = connector.connect(target, &config).await?;
        let session = Self::attach(target.device_addr(), transport, config);
        session.start().await;
        Ok(session)
    }

    /// Wraps an already allocated shell and starts its reader and writer tasks.
    ///
    /// The session stays in [`SessionState::Connecting`] until [`ShellSession::start`]
    /// has drained the login banner. Must be called from within a tokio runtime.
    pub fn attach(label: String, transport: ShellTransport, config: Arc<SshConfig>) -> Self {
        let ShellTransport {
            reader,
            writer,
            handle,
        } = transport;

        let (outbound_tx, outbound_rx) = mpsc::channel::<String>(QUEUE_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::channel::<String>(QUEUE_CAPACITY);

        tokio::spawn(write_loop(label.clone(), writer, outbound_rx));
        tokio::spawn(read_loop(label.clone(), reader, inbound_tx));

        Self {
            label,
            config,
            handle,
            outbound: Mutex::new(Some(outbound_tx)),
            inbound: Mutex::new(inbound_rx),
            state: AtomicU8::new(SessionState::Connecting.as_u8()),
            family: OnceLock::new(),
            opened_at: Instant::now(),
            last_used_ms: AtomicU64::new(0),
        }
    }

    /// Drains the login banner and marks the session ready.
    pub async fn start(&self) {
        let expects = self.config.prompt_terminators();
        let banner = self.read_expect(self.config.banner_wait(), &expects).await;
        trace!("{} login banner: {:?}", self.label, banner);
        if self
            .state
            .compare_exchange(
                SessionState::Connecting.as_u8(),
                SessionState::Ready.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        {
            debug!("{} Session ready", self.label);
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// The memoized family, if it was declared or detected.
    pub fn family(&self) -> Option<DeviceFamily> {
        self.family.get().copied()
    }

    /// Records the last-use time as now.
    pub fn touch(&self) {
        let elapsed = self.opened_at.elapsed().as_millis() as u64;
        self.last_used_ms.store(elapsed, Ordering::Release);
    }

    /// Time since the session was last used.
    pub fn idle_for(&self) -> Duration {
        let last_used =
            self.opened_at + Duration::from_millis(self.last_used_ms.load(Ordering::Acquire));
        Instant::now().saturating_duration_since(last_used)
    }

    /// Queues commands in order; each is sent followed by a newline.
    ///
    /// Writes after close are logged and dropped.
    pub async fn write_commands<I, S>(&self, commands: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let Err(e) = self.enqueue(commands).await {
            debug!("{} Write dropped: {}", self.label, e);
        }
    }

    async fn enqueue<I, S>(&self, commands: I) -> Result<(), ConnectError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let sender = self
            .outbound
            .lock()
            .await
            .clone()
            .ok_or(ConnectError::ConnectClosedError)?;
        for command in commands {
            let command = command.into();
            trace!("{} -> {:?}", self.label, command);
            sender
                .send(command)
                .await
                .map_err(|_| ConnectError::ConnectClosedError)?;
        }
        Ok(())
    }

    /// Reads until the device has been silent for a full `timeout` after its last output.
    pub async fn read_quiet_period(&self, timeout: Duration) -> String {
        self.read_until(timeout, &[]).await
    }

    /// Like [`ShellSession::read_quiet_period`], but returns as soon as the captured
    /// output contains any of `expects`.
    ///
    /// An expired-password prompt is answered with `N` once per read.
    pub async fn read_expect(&self, timeout: Duration, expects: &[String]) -> String {
        self.read_until(timeout, expects).await
    }

    async fn read_until(&self, timeout: Duration, expects: &[String]) -> String {
        let mut output = String::new();
        let mut delayed = false;
        let mut declined = false;

        let mut polls_left = MAX_POLLS;
        while polls_left > 0 {
            polls_left -= 1;
            tokio::time::sleep(POLL_INTERVAL).await;
            let fresh = self.drain_available(&mut polls_left).await;
            let has_new = !fresh.is_empty();
            if has_new {
                trace!("{} <- {:?}", self.label, fresh);
                output.push_str(&fresh);
            }

            if !expects.is_empty() {
                if !declined && needs_password_decline(&output) {
                    debug!("{} Declining password change", self.label);
                    self.write_commands(["N"]).await;
                    declined = true;
                }
                if let Some(found) = expects.iter().find(|e| output.contains(e.as_str())) {
                    trace!("{} Matched expect {:?}", self.label, found);
                    return output;
                }
            }

            if has_new {
                delayed = false;
                continue;
            }
            if delayed {
                return output;
            }
            trace!("{} Quiet, waiting {:?} before finishing read", self.label, timeout);
            tokio::time::sleep(timeout).await;
            delayed = true;
        }

        debug!(
            "{} Gave up reading after {} polls",
            self.label, MAX_POLLS
        );
        output
    }

    /// Takes every chunk currently queued, pausing between non-blocking polls.
    ///
    /// Each poll is charged to `polls_left`; draining stops when it runs out.
    async fn drain_available(&self, polls_left: &mut usize) -> String {
        let mut inbound = self.inbound.lock().await;
        let mut output = String::new();
        while *polls_left > 0 {
            *polls_left -= 1;
            tokio::time::sleep(POLL_INTERVAL).await;
            match inbound.try_recv() {
                Ok(chunk) => output.push_str(&chunk),
                Err(_) => break,
            }
        }
        output
    }

    /// Identifies the device vendor from its version banner, memoizing a positive result.
    pub async fn detect_family(&self) -> DeviceFamily {
        if let Some(family) = self.family() {
            return family;
        }

        let mut probes: Vec<String> = DeviceFamily::probe_commands()
            .into_iter()
            .map(String::from)
            .collect();
        probes.push(PAGER_ADVANCE.to_string());
        probes.push(String::new());
        self.write_commands(probes).await;

        let transcript = self.read_quiet_period(self.config.banner_wait()).await;
        let family = DeviceFamily::detect(&transcript);
        if family.is_known() {
            debug!("{} The device family is <{}>", self.label, family);
            self.remember_family(family);
        } else {
            warn!("{} Could not identify device family", self.label);
        }
        family
    }

    /// Memoizes a declared family. The first family recorded wins.
    pub fn remember_family(&self, family: DeviceFamily) {
        if family.is_known() && self.family.set(family).is_err() {
            trace!("{} Family already recorded", self.label);
        }
    }

    /// Sends the family's pagination-disable command and waits for the prompt.
    pub async fn disable_paging(&self, family: DeviceFamily) {
        let Some(command) = family.pagination_command() else {
            debug!("{} No pagination command for {}", self.label, family);
            return;
        };
        self.write_commands([command]).await;
        let expects = self.config.prompt_terminators();
        self.read_expect(self.config.banner_wait(), &expects).await;
    }

    /// Resolves the family (declared, memoized or detected) and disables paging.
    pub async fn initialize(&self, declared: DeviceFamily) -> DeviceFamily {
        let family = if declared.is_known() {
            self.remember_family(declared);
            declared
        } else {
            self.detect_family().await
        };
        self.disable_paging(family).await;
        family
    }

    /// Writes a bare newline and reports whether a prompt terminator came back.
    pub async fn probe(&self) -> bool {
        if self.state() == SessionState::Closed {
            return false;
        }
        self.write_commands([""]).await;
        let expects = self.config.prompt_terminators();
        let output = self.read_expect(PROBE_TIMEOUT, &expects).await;
        expects.iter().any(|e| output.contains(e.as_str()))
    }

    /// Sends a command batch and returns the output framed by the first command.
    pub async fn execute(&self, commands: &[String]) -> String {
        self.write_commands(commands.iter().cloned()).await;
        let transcript = self
            .read_quiet_period(self.config.command_quiet_period())
            .await;
        match commands.first() {
            Some(first) => frame_output(&transcript, first),
            None => transcript,
        }
    }

    /// Closes the queues and the transport. Closing twice is a no-op.
    pub async fn close(&self) {
        let previous = self
            .state
            .swap(SessionState::Closed.as_u8(), Ordering::AcqRel);
        if SessionState::from_u8(previous) == SessionState::Closed {
            return;
        }
        debug!("{} Closing session", self.label);

        // Dropping the sender ends the writer task, which shuts down the write half.
        self.outbound.lock().await.take();
        self.inbound.lock().await.close();
        self.handle.close().await;
    }
}

pub(crate) fn needs_password_decline(output: &str) -> bool {
    output.contains(PASSWORD_CHANGE_PROMPT) && !output.contains(PASSWORD_CHANGE_DECLINED)
}

async fn write_loop<W>(label: String, mut writer: W, mut outbound: Receiver<String>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(command) = outbound.recv().await {
        let line = format!("{command}\n");
        if let Err(e) = writer.write_all(line.as_bytes()).await {
            debug!("{} Writer write err: {}", label, e);
            return;
        }
        if let Err(e) = writer.flush().await {
            debug!("{} Writer flush err: {}", label, e);
            return;
        }
    }
    let _ = writer.shutdown().await;
    debug!("{} Writer task ended", label);
}

async fn read_loop<R>(label: String, mut reader: R, inbound: Sender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    let mut pending: Vec<u8> = Vec::new();
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => {
                debug!("{} Shell sent EOF", label);
                break;
            }
            Ok(n) => {
                pending.extend_from_slice(&buf[..n]);
                let chunk = take_decoded(&mut pending);
                if chunk.is_empty() {
                    continue;
                }
                if inbound.send(chunk).await.is_err() {
                    debug!("{} Inbound queue closed, read after close dropped", label);
                    break;
                }
            }
            Err(e) => {
                debug!("{} Reader read err: {}", label, e);
                break;
            }
        }
    }
    debug!("{} Reader task ended", label);
}

/// Decodes the longest valid prefix of `pending`, keeping a trailing incomplete
/// UTF-8 sequence for the next read. Invalid bytes are replaced.
fn take_decoded(pending: &mut Vec<u8>) -> String {
    match std::str::from_utf8(&pending[..]) {
        Ok(text) => {
            let text = text.to_string();
            pending.clear();
            text
        }
        Err(e) if e.error_len().is_none() => {
            let tail = pending.split_off(e.valid_up_to());
            let text = String::from_utf8_lossy(&pending[..]).into_owned();
            *pending = tail;
            text
        }
        Err(_) => {
            let text = String::from_utf8_lossy(&pending[..]).into_owned();
            pending.clear();
            text
        }
    }
}
