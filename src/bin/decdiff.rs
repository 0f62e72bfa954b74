// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 decdiff contributors
//
// Engine front end.
//
// Usage:
//   decdiff [-t] [-m MUTATOR] [-s MIN[:MAX]] [-n] <workerfile>
//
// Records go to stdout (binary; pipe them to the triage tooling),
// diagnostics to stderr. Exit code 0 on clean end-of-stream, 1 on usage,
// i/o, plug-in load, or resource errors.

use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};

use clap::Parser;

use decdiff::{
    mutator, Engine, Error, ExecMode, FilterConfig, PluginDecoder, Result, WorkerSpec,
    MAX_NWORKERS,
};

#[derive(Parser, Debug)]
#[command(
    name = "decdiff",
    about = "Differential fuzzer for machine-code decoders"
)]
struct Args {
    /// Run decoders as sibling threads instead of isolated processes
    /// (faster, but a decoder crash takes the engine down).
    #[arg(short = 't', long = "threads")]
    threads: bool,

    /// Candidate generator: havoc, sliding.
    #[arg(short = 'm', long = "mutator", value_name = "NAME")]
    mutator: Option<String>,

    /// Keep samples whose success count lies in MIN[:MAX]. Negative values
    /// count down from the worker count: -1 = N, -2 = N-1. E.g. `1:-2`
    /// keeps split verdicts only; `1:0` keeps nothing (for use with -n).
    #[arg(short = 's', long = "success-filter", value_name = "MIN[:MAX]")]
    success_filter: Option<String>,

    /// Also keep samples where successful decoders disagree on the number
    /// of bytes consumed.
    #[arg(short = 'n', long = "ndecoded-differs")]
    ndecoded_differs: bool,

    /// File listing one decoder plug-in path per line; `#` starts a
    /// comment line. At most 32 workers.
    workerfile: PathBuf,
}

fn parse_success_filter(spec: &str, filter: &mut FilterConfig) -> Result<()> {
    let usage = || Error::Usage(format!("-s needs MIN or MIN:MAX, got '{spec}'"));
    match spec.split_once(':') {
        Some((min, max)) => {
            filter.min_success = min.parse().map_err(|_| usage())?;
            filter.max_success = max.parse().map_err(|_| usage())?;
        }
        None => {
            filter.min_success = spec.parse().map_err(|_| usage())?;
        }
    }
    Ok(())
}

/// Parse the worker-list file and probe every plug-in, so a broken entry
/// fails the run before anything is spawned.
fn read_worker_list(path: &Path) -> Result<Vec<WorkerSpec>> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| Error::io(path.display().to_string(), e))?;

    let mut specs = Vec::new();
    for line in text.lines() {
        let line = line.trim_end_matches('\r');
        if line.starts_with('#') {
            continue;
        }
        // A blank interior line is not a comment; let the probe reject it.
        PluginDecoder::probe(line)?;
        specs.push(WorkerSpec {
            soname: line.to_string(),
            factory: PluginDecoder::factory(line),
        });
        if specs.len() == MAX_NWORKERS {
            log::warn!("worker list truncated to {MAX_NWORKERS} entries");
            break;
        }
    }
    Ok(specs)
}

fn run(args: Args) -> Result<()> {
    let mut filter = FilterConfig::default();
    if let Some(spec) = &args.success_filter {
        parse_success_filter(spec, &mut filter)?;
    }
    filter.ndecoded_mismatch = args.ndecoded_differs;

    let specs = read_worker_list(&args.workerfile)?;
    let mut mutator = mutator::create(args.mutator.as_deref())?;
    let mode = if args.threads {
        ExecMode::Thread
    } else {
        ExecMode::Process
    };

    let mut engine = Engine::new(specs, mode, filter)?;
    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    engine.run(&mut *mutator, &mut out)
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            // clap exits 2 on bad usage and 0 on -h by default; the
            // engine's contract is 1 for the whole usage path, help
            // included.
            let _ = e.print();
            std::process::exit(1);
        }
    };

    if let Err(e) = run(args) {
        eprintln!("decdiff: {e}");
        std::process::exit(1);
    }
}
