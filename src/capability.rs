//! Native audio-activity probe.
//!
//! The helper library exports `int is_audio_playing(void)`. It is resolved once
//! at load time; any failure yields `AudioCapability::Unavailable`, which
//! always answers "not playing" instead of failing the caller.

use std::os::raw::c_int;
use std::path::{Path, PathBuf};

use libloading::Library;
use thiserror::Error;

const PROBE_SYMBOL: &[u8] = b"is_audio_playing\0";

/// Injected into whatever needs to know if audio is playing (the inactivity monitor).
pub trait AudioActivityProbe: Send + Sync {
    fn is_audio_playing(&self) -> bool;
}

#[derive(Error, Debug)]
pub enum CapabilityError {
    #[error("native library not found at {0}")]
    NotFound(PathBuf),
    #[error("failed to load {path}: {reason}")]
    LoadFailed { path: PathBuf, reason: String },
    #[error("symbol `is_audio_playing` missing from {path}: {reason}")]
    SymbolMissing { path: PathBuf, reason: String },
}

/// A loaded helper library and its resolved entry point.
pub struct NativeAudioProbe {
    query: unsafe extern "C" fn() -> c_int,
    path: PathBuf,
    // keeps `query` valid; must outlive it
    _library: Library,
}

impl NativeAudioProbe {
    pub fn load(path: &Path) -> Result<Self, CapabilityError> {
        if !path.is_file() {
            return Err(CapabilityError::NotFound(path.to_path_buf()));
        }

        // SAFETY: the helper is a plain C library without initialisers that
        // depend on process state.
        let library = unsafe { Library::new(path) }.map_err(|e| CapabilityError::LoadFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        // SAFETY: signature matches the exported C function.
        let query = unsafe {
            let symbol = library
                .get::<unsafe extern "C" fn() -> c_int>(PROBE_SYMBOL)
                .map_err(|e| CapabilityError::SymbolMissing {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                })?;
            *symbol
        };

        Ok(Self {
            query,
            path: path.to_path_buf(),
            _library: library,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AudioActivityProbe for NativeAudioProbe {
    fn is_audio_playing(&self) -> bool {
        // SAFETY: `_library` is alive for as long as `self`.
        unsafe { (self.query)() != 0 }
    }
}

pub enum AudioCapability {
    Available(NativeAudioProbe),
    Unavailable { reason: String },
}

impl AudioCapability {
    pub fn load(path: &Path) -> Self {
        match NativeAudioProbe::load(path) {
            Ok(probe) => {
                tracing::info!("[Capability] Audio probe loaded from {}", path.display());
                AudioCapability::Available(probe)
            }
            Err(e) => {
                tracing::warn!("[Capability] Audio probe unavailable: {}", e);
                AudioCapability::Unavailable {
                    reason: e.to_string(),
                }
            }
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, AudioCapability::Available(_))
    }
}

impl AudioActivityProbe for AudioCapability {
    fn is_audio_playing(&self) -> bool {
        match self {
            AudioCapability::Available(probe) => probe.is_audio_playing(),
            AudioCapability::Unavailable { .. } => false,
        }
    }
}

impl std::fmt::Debug for AudioCapability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AudioCapability::Available(probe) => {
                f.debug_tuple("Available").field(&probe.path()).finish()
            }
            AudioCapability::Unavailable { reason } => f
                .debug_struct("Unavailable")
                .field("reason", reason)
                .finish(),
        }
    }
}
