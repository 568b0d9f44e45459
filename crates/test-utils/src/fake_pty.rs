use std::sync::{Arc, Mutex};

use stackd::errors::{Result, StackdError};
use stackd::session::{PtyBackend, PtyEvent, PtyEventSink, PtyProcess, ShellSpec};

#[derive(Debug, Default)]
struct Recorded {
    spawns: usize,
    kills: usize,
    writes: Vec<String>,
    resizes: Vec<(u16, u16)>,
    sink: Option<PtyEventSink>,
    fail_spawn: bool,
}

/// A pty backend that records what the session does with its shell.
///
/// Fake shells report no pid, so stopping a session never signals a real
/// process. Output and exit are injected with [`FakePtyBackend::emit`] and
/// [`FakePtyBackend::exit`] on the most recently spawned shell.
#[derive(Debug, Clone, Default)]
pub struct FakePtyBackend {
    recorded: Arc<Mutex<Recorded>>,
}

impl FakePtyBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_spawns(&self) {
        self.recorded.lock().unwrap().fail_spawn = true;
    }

    pub fn spawns(&self) -> usize {
        self.recorded.lock().unwrap().spawns
    }

    pub fn kills(&self) -> usize {
        self.recorded.lock().unwrap().kills
    }

    pub fn writes(&self) -> Vec<String> {
        self.recorded.lock().unwrap().writes.clone()
    }

    pub fn resizes(&self) -> Vec<(u16, u16)> {
        self.recorded.lock().unwrap().resizes.clone()
    }

    /// Emit output from the current shell.
    pub fn emit(&self, text: &str) -> bool {
        self.emit_bytes(text.as_bytes())
    }

    /// Emit raw bytes, which need not be valid UTF-8 on their own.
    pub fn emit_bytes(&self, bytes: &[u8]) -> bool {
        self.send(PtyEvent::Output(bytes.to_vec()))
    }

    /// Report that the current shell exited.
    pub fn exit(&self, code: Option<u32>) -> bool {
        self.send(PtyEvent::Exited(code))
    }

    /// The sink of the current shell, e.g. to send events after a restart.
    pub fn sink(&self) -> Option<PtyEventSink> {
        self.recorded.lock().unwrap().sink.clone()
    }

    fn send(&self, event: PtyEvent) -> bool {
        match self.sink() {
            Some(sink) => sink.send(event),
            None => false,
        }
    }
}

impl PtyBackend for FakePtyBackend {
    fn spawn(&self, _spec: &ShellSpec, sink: PtyEventSink) -> Result<Box<dyn PtyProcess>> {
        let mut recorded = self.recorded.lock().unwrap();
        if recorded.fail_spawn {
            return Err(StackdError::Spawn("fake pty refused to spawn".to_string()));
        }
        recorded.spawns += 1;
        recorded.sink = Some(sink);
        Ok(Box::new(FakeShell {
            recorded: Arc::clone(&self.recorded),
        }))
    }
}

struct FakeShell {
    recorded: Arc<Mutex<Recorded>>,
}

impl PtyProcess for FakeShell {
    fn pid(&self) -> Option<u32> {
        None
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        let text = String::from_utf8_lossy(data).into_owned();
        self.recorded.lock().unwrap().writes.push(text);
        Ok(())
    }

    fn resize(&mut self, cols: u16, rows: u16) -> Result<()> {
        self.recorded.lock().unwrap().resizes.push((cols, rows));
        Ok(())
    }

    fn kill(&mut self) -> Result<()> {
        self.recorded.lock().unwrap().kills += 1;
        Ok(())
    }
}
