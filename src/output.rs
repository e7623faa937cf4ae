use std::io::{self, Write};

use serde::Serialize;

use crate::app::{
    AcquireResult, ClearResult, FilterResult, InfoResult, ListResult, ProgressEvent, ProgressSink,
};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Json,
    Text,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_acquire(result: &AcquireResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_filter(result: &FilterResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_list(result: &ListResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_info(result: &InfoResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_clear(result: &ClearResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Prints progress lines to stderr so stdout stays clean for results.
pub struct StderrProgress;

impl ProgressSink for StderrProgress {
    fn event(&self, event: ProgressEvent) {
        let line = match event.elapsed {
            Some(elapsed) => format!("{} ({} ms)", event.message, elapsed.as_millis()),
            None => event.message,
        };
        let _ = writeln!(io::stderr(), "{line}");
    }
}
