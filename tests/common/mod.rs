// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 decdiff contributors
//
// Shared test fixtures: closure-backed mock decoders and a parser for the
// emitted record stream.

#![allow(dead_code)]

use std::sync::Arc;

use decdiff::{Decoder, DecoderFactory, OutputSlot};

struct FnDecoder<F> {
    name: String,
    f: F,
}

impl<F> Decoder for FnDecoder<F>
where
    F: Fn(&mut OutputSlot, &[u8]) + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn decode(&mut self, out: &mut OutputSlot, raw: &[u8]) {
        (self.f)(out, raw)
    }
}

/// A factory whose decoders run `f` on every candidate.
pub fn factory<F>(name: &str, f: F) -> DecoderFactory
where
    F: Fn(&mut OutputSlot, &[u8]) + Clone + Send + Sync + 'static,
{
    let name = name.to_string();
    Arc::new(move || {
        Ok(Box::new(FnDecoder {
            name: name.clone(),
            f: f.clone(),
        }) as Box<dyn Decoder>)
    })
}

/// Success with `ndecoded = len` and the candidate echoed into `result`.
pub fn echo_factory(name: &str) -> DecoderFactory {
    factory(name, |out, raw| {
        out.fill(decdiff::DecodeStatus::Success, raw.len() as u16, raw);
    })
}

// ---------------------------------------------------------------------------
// Record-stream parsing
// ---------------------------------------------------------------------------

pub struct EmittedOutput {
    pub name: String,
    pub status: u32,
    pub ndecoded: u16,
    pub len: u16,
    pub result: Vec<u8>,
}

pub struct EmittedRecord {
    pub nworkers: u32,
    pub input_len: u8,
    pub input_raw: Vec<u8>,
    pub outputs: Vec<EmittedOutput>,
}

impl EmittedRecord {
    /// The meaningful candidate bytes.
    pub fn input(&self) -> &[u8] {
        &self.input_raw[..self.input_len as usize]
    }
}

fn take<'a>(buf: &mut &'a [u8], n: usize) -> &'a [u8] {
    assert!(buf.len() >= n, "truncated record stream");
    let (head, tail) = buf.split_at(n);
    *buf = tail;
    head
}

fn take_u32(buf: &mut &[u8]) -> u32 {
    u32::from_le_bytes(take(buf, 4).try_into().unwrap())
}

fn take_u64(buf: &mut &[u8]) -> u64 {
    u64::from_le_bytes(take(buf, 8).try_into().unwrap())
}

fn take_u16(buf: &mut &[u8]) -> u16 {
    u16::from_le_bytes(take(buf, 2).try_into().unwrap())
}

/// Split a stream of concatenated records back into structured form.
/// Panics on any framing violation.
pub fn parse_records(mut buf: &[u8]) -> Vec<EmittedRecord> {
    let mut records = Vec::new();
    while !buf.is_empty() {
        let nworkers = take_u32(&mut buf);
        let input_len = take(&mut buf, 1)[0];
        let input_raw = take(&mut buf, decdiff::INSN_MAXLEN).to_vec();

        let mut outputs = Vec::new();
        for _ in 0..nworkers {
            let name_len = take_u64(&mut buf) as usize;
            let name = String::from_utf8(take(&mut buf, name_len).to_vec()).expect("name utf-8");
            let status = take_u32(&mut buf);
            let ndecoded = take_u16(&mut buf);
            let len = take_u16(&mut buf);
            let result = take(&mut buf, len as usize).to_vec();
            outputs.push(EmittedOutput {
                name,
                status,
                ndecoded,
                len,
                result,
            });
        }
        records.push(EmittedRecord {
            nworkers,
            input_len,
            input_raw,
            outputs,
        });
    }
    records
}
