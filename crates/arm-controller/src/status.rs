use std::io::Write;
use std::sync::{Arc, Mutex};
use tracing::info;

/// Destination for human-readable status lines.
pub trait StatusSink: Send {
    fn line(&mut self, text: &str);
}

/// Emits status lines as `tracing` events under the `status` target.
#[derive(Debug, Default)]
pub struct LogSink;

impl StatusSink for LogSink {
    fn line(&mut self, text: &str) {
        info!(target: "status", "{text}");
    }
}

/// Writes one line per status message to any writer, typically stdout or stderr.
pub struct ConsoleSink<W: Write + Send> {
    out: W,
}

impl<W: Write + Send> ConsoleSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }
}

impl ConsoleSink<std::io::Stderr> {
    pub fn stderr() -> Self {
        Self::new(std::io::stderr())
    }
}

impl<W: Write + Send> StatusSink for ConsoleSink<W> {
    fn line(&mut self, text: &str) {
        // A closed console must not take the controller down with it.
        let _ = writeln!(self.out, "{text}");
        let _ = self.out.flush();
    }
}

/// Collects lines in memory; clones share the same buffer.
#[derive(Clone, Debug, Default)]
pub struct MemorySink {
    lines: Arc<Mutex<Vec<String>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .map(|l| l.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }
}

impl StatusSink for MemorySink {
    fn line(&mut self, text: &str) {
        let mut lines = self
            .lines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        lines.push(text.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_console_sink_writes_lines() {
        let mut sink = ConsoleSink::new(Vec::new());
        sink.line("ready");
        sink.line("Servo ID is 1");
        assert_eq!(
            String::from_utf8(sink.out).unwrap(),
            "ready\nServo ID is 1\n"
        );
    }

    #[test]
    fn test_memory_sink_shares_buffer() {
        let sink = MemorySink::new();
        let mut writer = sink.clone();
        writer.line("a");
        writer.line("b");
        assert_eq!(sink.lines(), vec!["a", "b"]);
    }
}
