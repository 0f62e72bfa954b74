// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 decdiff contributors
//
// Decoder plug-ins. The C ABI a module must export:
//
//   const char *worker_name;                                  (mandatory)
//   void try_decode(output_slot *, const uint8_t *, uint8_t); (mandatory)
//   void worker_ctor(void);                                   (optional)
//   void worker_dtor(void);                                   (optional)
//
// The Decoder trait is the seam between the engine and the loaded code;
// tests substitute in-process mock decoders through the same factory type.

use std::ffi::CStr;
use std::sync::Arc;

use libloading::Library;

use crate::error::{Error, Result};
use crate::slots::OutputSlot;

/// One decoder instance, bound to a single worker.
pub trait Decoder: Send {
    /// Human-readable identifier (the plug-in's `worker_name`).
    fn name(&self) -> &str;

    /// Populate `out` with the verdict for the candidate `raw`.
    /// May do arbitrary work; in process mode it may also crash.
    fn decode(&mut self, out: &mut OutputSlot, raw: &[u8]);
}

/// Builds a fresh decoder inside the worker (thread, or child process after
/// fork). Re-invoked for every restart after a crash.
pub type DecoderFactory = Arc<dyn Fn() -> Result<Box<dyn Decoder>> + Send + Sync>;

type TryDecodeFn = unsafe extern "C" fn(*mut OutputSlot, *const u8, u8);
type HookFn = unsafe extern "C" fn();

fn load_err(soname: &str, err: &libloading::Error) -> Error {
    Error::PluginLoad {
        soname: soname.to_string(),
        reason: err.to_string(),
    }
}

/// A decoder loaded from a shared object.
pub struct PluginDecoder {
    name: String,
    try_decode: libloading::os::unix::Symbol<TryDecodeFn>,
    dtor: Option<libloading::os::unix::Symbol<HookFn>>,
    // Declared last: the raw symbols above stay valid only while the
    // library is loaded.
    _lib: Library,
}

impl PluginDecoder {
    /// dlopen `soname`, resolve the ABI, and run `worker_ctor` if present.
    pub fn load(soname: &str) -> Result<Self> {
        let lib = unsafe { Library::new(soname) }.map_err(|e| load_err(soname, &e))?;

        let try_decode = unsafe {
            lib.get::<TryDecodeFn>(b"try_decode\0")
                .map_err(|e| load_err(soname, &e))?
                .into_raw()
        };
        let name = unsafe { resolve_name(&lib, soname)? };

        let ctor = unsafe { lib.get::<HookFn>(b"worker_ctor\0").ok() };
        if let Some(ctor) = &ctor {
            unsafe { (**ctor)() };
        }
        let dtor = unsafe { lib.get::<HookFn>(b"worker_dtor\0").ok().map(|s| s.into_raw()) };

        log::debug!("loaded {soname} ({name})");
        Ok(Self {
            name,
            try_decode,
            dtor,
            _lib: lib,
        })
    }

    /// Check that `soname` loads and exports the mandatory symbols, without
    /// running its constructor. The dispatcher probes every worker-list
    /// entry at startup so a broken plug-in fails the run before any worker
    /// is spawned.
    pub fn probe(soname: &str) -> Result<()> {
        let lib = unsafe { Library::new(soname) }.map_err(|e| load_err(soname, &e))?;
        unsafe {
            lib.get::<TryDecodeFn>(b"try_decode\0")
                .map_err(|e| load_err(soname, &e))?;
            resolve_name(&lib, soname)?;
        }
        Ok(())
    }

    /// Factory that loads `soname` anew in each worker incarnation.
    pub fn factory(soname: &str) -> DecoderFactory {
        let soname = soname.to_string();
        Arc::new(move || Ok(Box::new(Self::load(&soname)?) as Box<dyn Decoder>))
    }
}

/// # Safety
/// `lib` must stay loaded for the duration of the call.
unsafe fn resolve_name(lib: &Library, soname: &str) -> Result<String> {
    // `worker_name` is a `char *` variable; the symbol resolves to its
    // address.
    let sym = lib
        .get::<*const *const libc::c_char>(b"worker_name\0")
        .map_err(|e| load_err(soname, &e))?;
    let pp: *const *const libc::c_char = *sym;
    if pp.is_null() || (*pp).is_null() {
        return Err(Error::PluginLoad {
            soname: soname.to_string(),
            reason: "worker_name is null".to_string(),
        });
    }
    Ok(CStr::from_ptr(*pp).to_string_lossy().into_owned())
}

impl Decoder for PluginDecoder {
    fn name(&self) -> &str {
        &self.name
    }

    fn decode(&mut self, out: &mut OutputSlot, raw: &[u8]) {
        unsafe { (*self.try_decode)(out as *mut OutputSlot, raw.as_ptr(), raw.len() as u8) }
    }
}

impl Drop for PluginDecoder {
    fn drop(&mut self) {
        if let Some(dtor) = &self.dtor {
            unsafe { (**dtor)() };
        }
    }
}
