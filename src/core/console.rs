//! Interactive process console
//!
//! Ties the process controller, the output relay and the input forwarder
//! together. [`Console::tick`] runs once per UI refresh: it drains what the
//! relay produced, coalesces equally tagged runs and renders them into a
//! [`DisplaySink`]. stderr is held back and flushed as one trailing block
//! once the process is gone and stdout is exhausted.

use std::path::Path;
use std::sync::mpsc::{Receiver, TryRecvError};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::ansi::{StyleTag, TextSegment};
use super::input::{InputAction, InputForwarder, KeyInput};
use super::process::{ProcessController, ProcessError, ProcessState, Result};
use super::relay::{OutputRelay, RelayEvent, RelayEventKind, RelayTimings};
use super::utf8::Utf8Accumulator;

/// Executable launched inside a program directory
pub const PROGRAM_ENTRY: &str = "run/main";

/// Where decoded output ends up; implemented by the UI layer
pub trait DisplaySink {
    fn append_styled(&mut self, text: &str, tag: StyleTag);
    fn clear(&mut self);
    fn scroll_to_end(&mut self);
}

/// Runtime settings of a console
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConsoleConfig {
    pub relay_poll: Duration,
    pub relay_idle: Duration,
    /// Time a stopped child gets before SIGKILL
    pub respawn_grace: Duration,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        let timings = RelayTimings::default();
        Self {
            relay_poll: timings.poll_interval,
            relay_idle: timings.idle_interval,
            respawn_grace: Duration::from_millis(500),
        }
    }
}

impl ConsoleConfig {
    fn relay_timings(&self) -> RelayTimings {
        RelayTimings {
            poll_interval: self.relay_poll,
            idle_interval: self.relay_idle,
        }
    }
}

/// Merge consecutive segments sharing a tag
pub fn coalesce(segments: impl IntoIterator<Item = TextSegment>) -> Vec<TextSegment> {
    let mut grouped: Vec<TextSegment> = Vec::new();
    for segment in segments {
        match grouped.last_mut() {
            Some(last) if last.tag == segment.tag => last.text.extend_from_slice(&segment.text),
            _ => grouped.push(segment),
        }
    }
    grouped
}

/// Take the error block out of `buffer` if it may be shown now
///
/// That is only the case once the process is gone, no stdout is pending or
/// still in flight, and the buffer ends on a complete message. The block
/// starts with a blank-line separator and has the sentinels removed.
fn take_error_block(
    buffer: &mut Vec<TextSegment>,
    running: bool,
    stdout_pending: bool,
    stdout_closed: bool,
) -> Option<Vec<TextSegment>> {
    let complete = buffer.last().map_or(false, TextSegment::is_sentinel);
    if running || stdout_pending || !stdout_closed || !complete {
        return None;
    }

    let separator = TextSegment::new(*b"\n", StyleTag::None);
    let body = buffer.drain(..).filter(|s| !s.is_sentinel());
    Some(coalesce(std::iter::once(separator).chain(body)))
}

pub struct Console {
    controller: ProcessController,
    relay: OutputRelay,
    events: Receiver<RelayEvent>,
    forwarder: InputForwarder,
    config: ConsoleConfig,
    /// Bumped on every spawn; older relay events are dropped
    generation: u64,
    error_buffer: Vec<TextSegment>,
    stdout_closed: bool,
    utf8: Utf8Accumulator,
    /// Tag of the bytes `utf8` holds back
    partial_tag: StyleTag,
}

impl Console {
    pub fn new(config: ConsoleConfig) -> Result<Self> {
        let (relay, events) =
            OutputRelay::start(config.relay_timings()).map_err(ProcessError::RelayStart)?;

        Ok(Self {
            controller: ProcessController::new(config.respawn_grace),
            relay,
            events,
            forwarder: InputForwarder::new(),
            config,
            generation: 0,
            error_buffer: Vec::new(),
            stdout_closed: false,
            utf8: Utf8Accumulator::new(),
            partial_tag: StyleTag::None,
        })
    }

    pub fn config(&self) -> &ConsoleConfig {
        &self.config
    }

    /// Apply changed settings to the running console
    pub fn apply_config(&mut self, config: ConsoleConfig) {
        if config == self.config {
            return;
        }
        info!("Applying console config: {:?}", config);
        self.controller.set_grace(config.respawn_grace);
        self.relay.configure(config.relay_timings());
        self.config = config;
    }

    pub fn state(&self) -> ProcessState {
        self.controller.state()
    }

    pub fn pid(&self) -> Option<u32> {
        self.controller.pid()
    }

    pub fn is_running(&self) -> bool {
        self.controller.state().is_alive()
    }

    /// Launch `<program_root>/run/main`
    pub fn start_program(&mut self, program_root: &Path, sink: &mut dyn DisplaySink) -> Result<()> {
        self.spawn(&program_root.join(PROGRAM_ENTRY), sink)
    }

    /// Launch the executable at `path`, replacing any current process
    ///
    /// Replacing a live process blocks the caller until it has been reaped:
    /// at most `respawn_grace` for SIGTERM to take effect, then SIGKILL.
    pub fn spawn(&mut self, path: &Path, sink: &mut dyn DisplaySink) -> Result<()> {
        self.relay.detach();
        self.generation += 1;
        self.error_buffer.clear();
        self.stdout_closed = false;
        self.utf8.clear();
        self.partial_tag = StyleTag::None;
        sink.clear();

        let pipes = match self.controller.spawn(path) {
            Ok(pipes) => pipes,
            Err(e) => {
                error!("{}", e);
                return Err(e);
            }
        };
        self.relay.attach(self.generation, pipes);
        Ok(())
    }

    /// Ask the process to stop gracefully
    pub fn kill(&mut self) -> Result<()> {
        self.controller.terminate()
    }

    /// Forward one key event to the process
    pub fn handle_key(&mut self, input: KeyInput, sink: &mut dyn DisplaySink) -> Result<()> {
        match self.forwarder.translate(input, self.is_running()) {
            InputAction::Ignore => Ok(()),
            InputAction::Write(bytes) => self.controller.write_input(&bytes),
            InputAction::Interrupt => self.controller.interrupt(),
            InputAction::ClearDisplay => {
                sink.clear();
                Ok(())
            }
        }
    }

    /// Render everything the relay produced since the last tick
    ///
    /// Returns whether anything was rendered.
    pub fn tick(&mut self, sink: &mut dyn DisplaySink) -> bool {
        let running = self.controller.poll();
        let pending = self.drain_events();
        let stdout_pending = !pending.is_empty();

        let mut rendered = false;
        for segment in coalesce(pending) {
            // A tag change cuts off any incomplete character
            if self.utf8.has_partial() && segment.tag != self.partial_tag {
                let rest = self.utf8.flush();
                sink.append_styled(&rest, self.partial_tag);
                rendered = true;
            }
            let text = self.utf8.push(&segment.text);
            if !text.is_empty() {
                sink.append_styled(&text, segment.tag);
                rendered = true;
            }
            self.partial_tag = segment.tag;
        }
        if self.stdout_closed && self.utf8.has_partial() {
            let rest = self.utf8.flush();
            sink.append_styled(&rest, self.partial_tag);
            rendered = true;
        }

        let running = running && self.is_running();
        if let Some(block) = take_error_block(
            &mut self.error_buffer,
            running,
            stdout_pending,
            self.stdout_closed,
        ) {
            for segment in block {
                sink.append_styled(&String::from_utf8_lossy(&segment.text), segment.tag);
            }
            rendered = true;
        }

        if rendered {
            sink.scroll_to_end();
        }
        rendered
    }

    /// Terminate the process, then stop the relay
    pub fn shutdown(&mut self) {
        self.controller.stop();
        self.relay.stop();
    }

    /// Move relay events of the current generation into local buffers
    fn drain_events(&mut self) -> Vec<TextSegment> {
        let mut pending = Vec::new();
        loop {
            match self.events.try_recv() {
                Ok(event) if event.generation != self.generation => {
                    debug!("Dropping stale relay event of generation {}", event.generation);
                }
                Ok(event) => match event.kind {
                    RelayEventKind::Stdout(segments) => pending.extend(segments),
                    RelayEventKind::Stderr(segments) => self.error_buffer.extend(segments),
                    RelayEventKind::StderrBoundary => self.error_buffer.push(TextSegment::sentinel()),
                    RelayEventKind::StdoutClosed => self.stdout_closed = true,
                    RelayEventKind::ReadFailed(reason) => {
                        self.controller.mark_dead(&reason);
                        self.stdout_closed = true;
                    }
                },
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if self.is_running() {
                        warn!("Output relay disconnected");
                    }
                    self.controller.mark_dead("output relay disconnected");
                    self.stdout_closed = true;
                    break;
                }
            }
        }
        pending
    }
}

impl Drop for Console {
    fn drop(&mut self) {
        self.shutdown();
    }
}
