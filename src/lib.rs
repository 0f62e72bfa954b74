// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 decdiff contributors
//
// Differential fuzzer for machine-code decoders. A single mutator streams
// candidate byte sequences through shared-memory chunk rings to N decoder
// plug-ins (threads, or crash-isolated child processes); candidates the
// decoders disagree on are serialized to the output stream for triage.

pub mod atomic_wait;
pub mod engine;
pub mod error;
pub mod monitor;
pub mod mutator;
pub mod plugin;
pub mod report;
pub mod rings;
pub mod slots;
pub mod worker;

pub use atomic_wait::WaitableU32;
pub use engine::{Engine, ExecMode, WorkerSpec};
pub use error::{Error, Result};
pub use plugin::{Decoder, DecoderFactory, PluginDecoder};
pub use report::FilterConfig;
pub use rings::{InputChunk, OutputChunk, SharedMap, NUM_CHUNKS, SLOTS_PER_CHUNK};
pub use slots::{
    DecodeStatus, InputSlot, OutputSlot, DEC_MAXLEN, INSN_MAXLEN, MAX_NWORKERS, OUTPUT_HEADER_LEN,
};
pub use worker::WorkerTask;
