//! Tracing initialization: `RUST_LOG` first, then a config-driven
//! fallback level, matching the split the core's log file sink
//! interface expects from its host binary. Every line written to the
//! file sink passes through `RedactingWriter` so a ticket, CSRF token,
//! or API token secret can never reach disk.

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::prelude::*;

const REDACTED_PATTERNS: &[&str] =
    &["PVEAuthCookie=", "CSRFPreventionToken:", "PVEAPIToken=", "password="];

/// Wraps any `Write` sink and scrubs known credential markers out of
/// each line before it is written through.
pub struct RedactingWriter<W> {
    inner: W,
}

impl<W> RedactingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }
}

impl<W: Write> Write for RedactingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let original_len = buf.len();
        match std::str::from_utf8(buf) {
            Ok(text) if REDACTED_PATTERNS.iter().any(|p| text.contains(p)) => {
                let scrubbed = scrub(text);
                self.inner.write_all(scrubbed.as_bytes())?;
                Ok(original_len)
            }
            _ => self.inner.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// `tracing_subscriber::fmt::MakeWriter` impl backing the file sink:
/// each call locks the shared file handle and scrubs through
/// `RedactingWriter` before bytes hit disk.
#[derive(Clone)]
struct RedactingFileMakeWriter {
    file: Arc<Mutex<File>>,
}

impl RedactingFileMakeWriter {
    fn new(file: File) -> Self {
        Self { file: Arc::new(Mutex::new(file)) }
    }
}

impl<'a> MakeWriter<'a> for RedactingFileMakeWriter {
    type Writer = RedactingWriter<LockedFile>;

    fn make_writer(&'a self) -> Self::Writer {
        RedactingWriter::new(LockedFile { file: Arc::clone(&self.file) })
    }
}

struct LockedFile {
    file: Arc<Mutex<File>>,
}

impl Write for LockedFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.lock().unwrap_or_else(|e| e.into_inner()).write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.lock().unwrap_or_else(|e| e.into_inner()).flush()
    }
}

fn scrub(text: &str) -> String {
    let mut out = text.to_string();
    for pattern in REDACTED_PATTERNS {
        if let Some(start) = out.find(pattern) {
            let value_start = start + pattern.len();
            let value_end = out[value_start..]
                .find(|c: char| c.is_whitespace() || c == ';' || c == '"')
                .map(|offset| value_start + offset)
                .unwrap_or(out.len());
            out.replace_range(value_start..value_end, "<redacted>");
        }
    }
    out
}

/// Initializes tracing from `RUST_LOG` when set, otherwise from
/// `fallback_level`. When `log_file` is given, output goes through
/// `RedactingWriter` to that file instead of stderr (an interactive
/// TUI cannot share stderr with its own display).
pub fn init(fallback_level: &str, log_file: Option<&Path>) -> anyhow::Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(fallback_level));

    let init_result = match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
            let writer = RedactingFileMakeWriter::new(file);
            let fmt_layer = tracing_subscriber::fmt::layer().with_writer(writer).with_ansi(false);
            tracing_subscriber::registry().with(env_filter).with(fmt_layer).try_init()
        }
        None => {
            let fmt_layer = tracing_subscriber::fmt::layer().with_writer(io::stderr);
            tracing_subscriber::registry().with(env_filter).with(fmt_layer).try_init()
        }
    };

    if let Err(err) = init_result {
        eprintln!("tracing already initialized, skipping: {err}");
    }
    Ok(())
}
