//! Terminal rendering of execution events.

use std::io::{self, Write};

use exec_engine::protocol::{parse_line, LineDecoder};
use exec_engine::{DependencyReport, ExecutionEvent, OutputStream};

/// How events are printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    /// Program output as the program meant it; wire lines are hidden.
    Human,
    /// Every event as one JSON line.
    Json,
}

/// Turns the event stream into terminal output.
pub struct Renderer<O: Write, E: Write> {
    mode: RenderMode,
    out: O,
    err: E,
    stdout_lines: LineDecoder,
    stderr_lines: LineDecoder,
}

impl Renderer<io::Stdout, io::Stderr> {
    pub fn terminal(mode: RenderMode) -> Self {
        Self::new(mode, io::stdout(), io::stderr())
    }
}

impl<O: Write, E: Write> Renderer<O, E> {
    pub fn new(mode: RenderMode, out: O, err: E) -> Self {
        Self {
            mode,
            out,
            err,
            stdout_lines: LineDecoder::new(),
            stderr_lines: LineDecoder::new(),
        }
    }

    pub fn into_parts(self) -> (O, E) {
        (self.out, self.err)
    }

    /// Render one event. Returns `true` once the execution has settled.
    pub fn render(&mut self, event: &ExecutionEvent) -> io::Result<bool> {
        match self.mode {
            RenderMode::Json => {
                let line = serde_json::to_string(event).map_err(io::Error::other)?;
                writeln!(self.out, "{}", line)?;
            }
            RenderMode::Human => self.render_human(event)?,
        }
        self.out.flush()?;
        self.err.flush()?;
        Ok(matches!(event, ExecutionEvent::Completed { .. }))
    }

    fn render_human(&mut self, event: &ExecutionEvent) -> io::Result<()> {
        match event {
            ExecutionEvent::Output { stream, data, .. } => {
                let lines = match stream {
                    OutputStream::Stdout => self.stdout_lines.push(data.as_bytes()),
                    OutputStream::Stderr => self.stderr_lines.push(data.as_bytes()),
                };
                for line in lines.iter().filter(|line| parse_line(line).is_none()) {
                    match stream {
                        OutputStream::Stdout => writeln!(self.out, "{}", line)?,
                        OutputStream::Stderr => writeln!(self.err, "{}", line)?,
                    }
                }
            }
            ExecutionEvent::DependenciesMissing { missing, suggestions } => {
                let names: Vec<&str> = missing.iter().map(|m| m.name.as_str()).collect();
                writeln!(self.err, "warning: missing packages: {}", names.join(", "))?;
                for suggestion in suggestions {
                    writeln!(self.err, "  hint: {} ({})", suggestion.name, suggestion.reason)?;
                }
            }
            ExecutionEvent::Error { error } => writeln!(self.err, "error: {}", error)?,
            ExecutionEvent::Stopped { .. } => writeln!(self.err, "stopped")?,
            ExecutionEvent::Completed { result } => {
                for line in [self.stdout_lines.finish(), self.stderr_lines.finish()]
                    .into_iter()
                    .flatten()
                    .filter(|line| parse_line(line).is_none())
                {
                    writeln!(self.out, "{}", line)?;
                }
                if result.timeout {
                    writeln!(self.err, "timed out after {:.0}ms", result.execution_time_ms)?;
                }
                tracing::debug!(
                    exit_code = result.exit_code,
                    elapsed_ms = result.execution_time_ms,
                    "completed"
                );
            }
            ExecutionEvent::Started { .. } | ExecutionEvent::Structured { .. } => {}
        }
        Ok(())
    }
}

/// Human summary of a dependency report.
pub fn format_report(report: &DependencyReport) -> String {
    let mut out = String::new();
    let found: Vec<&str> = report.found.iter().map(String::as_str).collect();
    out.push_str(&format!("found: {}\n", found.join(", ")));
    if report.missing.is_empty() {
        out.push_str("missing: none\n");
    } else {
        for missing in &report.missing {
            let mark = if missing.suggested { " (install)" } else { "" };
            out.push_str(&format!("missing: {}{}\n", missing.name, mark));
        }
    }
    for conflict in &report.conflicts {
        out.push_str(&format!(
            "conflict ({}): {}\n",
            conflict.kind,
            conflict.packages.join(", ")
        ));
    }
    for suggestion in &report.suggestions {
        out.push_str(&format!("suggest: {} - {}\n", suggestion.name, suggestion.reason));
    }
    out
}
