//! Output relay
//!
//! One background thread per console moves bytes from the child's stdout and
//! stderr into decoded segments and hands them to the UI thread over a
//! channel. The UI thread is the only receiver.
//!
//! Ordering policy: stdout is always drained first. stderr is read only when
//! stdout has nothing available, and each stderr burst is closed by a
//! [`RelayEventKind::StderrBoundary`]. Output therefore arrives as
//! "stdout first, stderr trailing" rather than in wall-clock order.

use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::ansi::{AnsiDecoder, StyleTag, TextSegment};
use super::process::OutputPipes;

/// Bytes requested per read
const READ_CHUNK: usize = 4096;

/// Upper bound on stderr reads per burst so stdout is not starved
const MAX_STDERR_CHUNKS: usize = 64;

/// Sleep intervals of the relay loop
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RelayTimings {
    /// Between iterations while a process is attached
    pub poll_interval: Duration,
    /// Between iterations while nothing is attached
    pub idle_interval: Duration,
}

impl Default for RelayTimings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(5),
            idle_interval: Duration::from_millis(50),
        }
    }
}

pub enum RelayCommand {
    /// Start relaying a new child's output; events carry `generation`
    Attach { generation: u64, pipes: OutputPipes },
    /// Drop the current pipes
    Detach,
    Configure(RelayTimings),
}

#[derive(Debug, PartialEq, Eq)]
pub enum RelayEventKind {
    /// Decoded stdout segments, in order
    Stdout(Vec<TextSegment>),
    /// Raw stderr bytes, one red segment each
    Stderr(Vec<TextSegment>),
    /// End of one complete stderr burst
    StderrBoundary,
    /// stdout reached EOF
    StdoutClosed,
    /// A read failed with something other than EOF
    ReadFailed(String),
}

#[derive(Debug, PartialEq, Eq)]
pub struct RelayEvent {
    pub generation: u64,
    pub kind: RelayEventKind,
}

/// Handle to the relay thread
pub struct OutputRelay {
    alive: Arc<AtomicBool>,
    commands: Sender<RelayCommand>,
    thread: Option<JoinHandle<()>>,
}

impl OutputRelay {
    /// Start the relay thread; the returned receiver yields its events
    pub fn start(timings: RelayTimings) -> io::Result<(Self, Receiver<RelayEvent>)> {
        let alive = Arc::new(AtomicBool::new(true));
        let (command_tx, command_rx) = mpsc::channel();
        let (event_tx, event_rx) = mpsc::channel();

        let worker = RelayWorker {
            alive: alive.clone(),
            commands: command_rx,
            events: event_tx,
            timings,
            attached: None,
            decoder: AnsiDecoder::new(),
            buffer: vec![0u8; READ_CHUNK],
        };
        let thread = thread::Builder::new()
            .name("output-relay".to_string())
            .spawn(move || worker.run())?;

        info!("Output relay started");
        Ok((
            Self {
                alive,
                commands: command_tx,
                thread: Some(thread),
            },
            event_rx,
        ))
    }

    pub fn attach(&self, generation: u64, pipes: OutputPipes) {
        self.send(RelayCommand::Attach { generation, pipes });
    }

    pub fn detach(&self) {
        self.send(RelayCommand::Detach);
    }

    pub fn configure(&self, timings: RelayTimings) {
        self.send(RelayCommand::Configure(timings));
    }

    /// Stop the loop and wait for the thread
    ///
    /// Returns within one sleep interval of the loop.
    pub fn stop(&mut self) {
        self.alive.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                error!("Output relay thread panicked");
            } else {
                info!("Output relay stopped");
            }
        }
    }

    fn send(&self, command: RelayCommand) {
        if self.commands.send(command).is_err() {
            warn!("Output relay is not running, command dropped");
        }
    }
}

impl Drop for OutputRelay {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Attached {
    generation: u64,
    pipes: OutputPipes,
    stdout_open: bool,
    stderr_open: bool,
}

enum ReadOutcome {
    Data(usize),
    /// Nothing available right now
    Empty,
    Closed,
    Failed(io::Error),
}

fn read_available(reader: &mut impl Read, buffer: &mut [u8]) -> ReadOutcome {
    loop {
        match reader.read(buffer) {
            Ok(0) => return ReadOutcome::Closed,
            Ok(n) => return ReadOutcome::Data(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return ReadOutcome::Empty,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return ReadOutcome::Failed(e),
        }
    }
}

struct RelayWorker {
    alive: Arc<AtomicBool>,
    commands: Receiver<RelayCommand>,
    events: Sender<RelayEvent>,
    timings: RelayTimings,
    attached: Option<Attached>,
    decoder: AnsiDecoder,
    buffer: Vec<u8>,
}

impl RelayWorker {
    fn run(mut self) {
        while self.alive.load(Ordering::SeqCst) {
            if !self.process_commands() {
                break;
            }

            let Some(attached) = self.attached.take() else {
                thread::sleep(self.timings.idle_interval);
                continue;
            };

            let (attached, stdout_had_data) = self.step(attached);
            self.attached = attached;

            // Keep draining stdout without sleeping while it has data
            if !stdout_had_data {
                thread::sleep(self.timings.poll_interval);
            }
        }
        debug!("Output relay loop exited");
    }

    /// Apply pending commands; false once the console handle is gone
    fn process_commands(&mut self) -> bool {
        loop {
            match self.commands.try_recv() {
                Ok(RelayCommand::Attach { generation, pipes }) => {
                    debug!("Relay attached to generation {}", generation);
                    self.decoder.reset();
                    self.attached = Some(Attached {
                        generation,
                        pipes,
                        stdout_open: true,
                        stderr_open: true,
                    });
                }
                Ok(RelayCommand::Detach) => {
                    self.attached = None;
                }
                Ok(RelayCommand::Configure(timings)) => {
                    debug!("Relay timings updated: {:?}", timings);
                    self.timings = timings;
                }
                Err(TryRecvError::Empty) => return true,
                Err(TryRecvError::Disconnected) => return false,
            }
        }
    }

    /// One relay iteration
    ///
    /// Returns the attachment if it is still worth polling, and whether
    /// stdout produced data.
    fn step(&mut self, mut attached: Attached) -> (Option<Attached>, bool) {
        let generation = attached.generation;

        if attached.stdout_open {
            match read_available(&mut attached.pipes.stdout, &mut self.buffer) {
                ReadOutcome::Data(n) => {
                    let mut segments = Vec::with_capacity(n);
                    self.decoder.decode_into(&self.buffer[..n], &mut segments);
                    if !segments.is_empty() {
                        self.emit(generation, RelayEventKind::Stdout(segments));
                    }
                    return (Some(attached), true);
                }
                ReadOutcome::Empty => {}
                ReadOutcome::Closed => {
                    debug!("stdout closed (generation {})", generation);
                    attached.stdout_open = false;
                    self.emit(generation, RelayEventKind::StdoutClosed);
                }
                ReadOutcome::Failed(e) => {
                    warn!("stdout read failed: {}", e);
                    self.emit(generation, RelayEventKind::ReadFailed(e.to_string()));
                    return (None, false);
                }
            }
        }

        let mut burst = Vec::new();
        let mut failure = None;
        for _ in 0..MAX_STDERR_CHUNKS {
            if !attached.stderr_open {
                break;
            }
            match read_available(&mut attached.pipes.stderr, &mut self.buffer) {
                ReadOutcome::Data(n) => burst.extend(
                    self.buffer[..n]
                        .iter()
                        .map(|&byte| TextSegment::new(vec![byte], StyleTag::Red)),
                ),
                ReadOutcome::Empty => break,
                ReadOutcome::Closed => attached.stderr_open = false,
                ReadOutcome::Failed(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        if !burst.is_empty() {
            self.emit(generation, RelayEventKind::Stderr(burst));
            self.emit(generation, RelayEventKind::StderrBoundary);
        }

        if let Some(e) = failure {
            warn!("stderr read failed: {}", e);
            self.emit(generation, RelayEventKind::ReadFailed(e.to_string()));
            return (None, false);
        }

        if !attached.stdout_open && !attached.stderr_open {
            debug!("Both streams closed (generation {})", generation);
            return (None, false);
        }
        (Some(attached), false)
    }

    fn emit(&self, generation: u64, kind: RelayEventKind) {
        if self.events.send(RelayEvent { generation, kind }).is_err() {
            // Receiver dropped, nobody is listening anymore
            self.alive.store(false, Ordering::SeqCst);
        }
    }
}
