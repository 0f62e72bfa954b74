// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 decdiff contributors
//
// Error taxonomy for the engine. Worker crashes are deliberately absent:
// they are recovered in-band by the crash monitor, never surfaced as errors.

use std::io;

use thiserror::Error;

/// Fatal engine errors. All of these terminate the run with exit code 1.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed command line, filter range, or worker-list file.
    #[error("usage: {0}")]
    Usage(String),

    /// File open/read or output-stream write failure.
    #[error("i/o error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    /// Decoder plug-in could not be loaded or lacks a mandatory symbol.
    #[error("plug-in {soname}: {reason}")]
    PluginLoad { soname: String, reason: String },

    /// Shared mapping, pipe, or fork failure.
    #[error("resource exhausted: {what}: {source}")]
    ResourceExhausted {
        what: &'static str,
        #[source]
        source: io::Error,
    },
}

impl Error {
    /// Attach a path to a bare `io::Error`.
    pub fn io(path: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
