// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![allow(dead_code, reason = "not every test binary uses every helper")]

use std::io::Write;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use persevere::{Classify, FailureKind};
use tracing_subscriber::fmt::MakeWriter;

/// Failures of a pretend spreadsheet client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SheetError {
    /// Server error on the given attempt.
    Unavailable(u32),
    /// HTTP 429 on the given attempt.
    Quota(u32),
    /// The request itself is wrong.
    BadRange,
    /// The user closed the document.
    Closed,
}

impl Classify for SheetError {
    fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Unavailable(_) => FailureKind::Transient,
            Self::Quota(_) => FailureKind::RateLimited,
            Self::BadRange => FailureKind::Permanent,
            Self::Closed => FailureKind::Aborted,
        }
    }
}

/// Counts invocations of an operation.
#[derive(Debug, Clone, Default)]
pub struct Calls(Arc<AtomicU32>);

impl Calls {
    /// Records one call and returns its zero-based index.
    pub fn record(&self) -> u32 {
        self.0.fetch_add(1, Ordering::SeqCst)
    }

    pub fn count(&self) -> u32 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Captures formatted log output of the current thread.
#[derive(Debug, Clone, Default)]
pub struct LogCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl LogCapture {
    pub fn output(&self) -> String {
        String::from_utf8_lossy(&self.buffer.lock().unwrap()).to_string()
    }

    pub fn assert_contains(&self, expected: &str) {
        let output = self.output();
        assert!(output.contains(expected), "log output does not contain '{expected}', got:\n{output}");
    }

    /// Creates a subscriber writing to this buffer; install it with `set_default`.
    pub fn subscriber(&self) -> impl tracing::Subscriber + Send + Sync + use<> {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_writer(self.clone())
            .with_ansi(false)
            .finish()
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = LogCaptureWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogCaptureWriter {
            buffer: Arc::clone(&self.buffer),
        }
    }
}

pub struct LogCaptureWriter {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl Write for LogCaptureWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buffer.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
