//! Versioned on-disk cache for compiled modules.
//!
//! A `.qbc` file is the magic bytes followed by one postcard-encoded
//! [`CachePayload`]: crate version triple, source modification timestamp,
//! and the compiled module. Any mismatch on load reports a [`CacheError`]
//! and the caller recompiles; the format carries no backward compatibility.

use std::{
    fmt,
    fs,
    io,
    path::Path,
    time::{SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};

use crate::module::Module;

const MAGIC: &[u8; 4] = b"QLBC";

/// Why a cache file could not be used. Every variant means "recompile from
/// source"; they are distinguished for diagnostics only.
#[derive(Debug)]
pub enum CacheError {
    Io(io::Error),
    /// Not a cache file at all.
    BadMagic,
    /// Truncated or corrupted payload.
    Format(postcard::Error),
    /// Written by a different crate version.
    VersionMismatch { found: (u16, u16, u16) },
    /// The source file changed after the cache was written.
    Stale,
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "cache i/o error: {err}"),
            Self::BadMagic => write!(f, "not a bytecode cache file"),
            Self::Format(err) => write!(f, "cache payload is truncated or corrupted: {err}"),
            Self::VersionMismatch { found } => {
                let (major, minor, patch) = found;
                write!(f, "cache written by version {major}.{minor}.{patch}")
            }
            Self::Stale => write!(f, "source file is newer than its cache"),
        }
    }
}

impl std::error::Error for CacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Format(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for CacheError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

#[derive(Serialize, Deserialize)]
struct CachePayload {
    version: (u16, u16, u16),
    /// Source mtime as seconds since the Unix epoch.
    source_stamp: u64,
    module: Module,
}

fn crate_version() -> (u16, u16, u16) {
    let mut parts = env!("CARGO_PKG_VERSION").split('.').map(|p| p.parse().unwrap_or(0));
    let mut next = || parts.next().unwrap_or(0);
    (next(), next(), next())
}

fn stamp_of(mtime: SystemTime) -> u64 {
    mtime
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Writes a compiled module to its cache file.
pub fn save_module(path: &Path, module: &Module, source_mtime: SystemTime) -> Result<(), CacheError> {
    let payload = CachePayload {
        version: crate_version(),
        source_stamp: stamp_of(source_mtime),
        module: module.clone(),
    };
    let encoded = postcard::to_allocvec(&payload).map_err(CacheError::Format)?;
    let mut out = Vec::with_capacity(MAGIC.len() + encoded.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&encoded);
    fs::write(path, out)?;
    Ok(())
}

/// Loads a compiled module from its cache file, validating magic, version,
/// and source timestamp.
pub fn load_module(path: &Path, source_mtime: SystemTime) -> Result<Module, CacheError> {
    let data = fs::read(path)?;
    if data.len() < MAGIC.len() || data[..MAGIC.len()] != *MAGIC {
        return Err(CacheError::BadMagic);
    }
    let payload: CachePayload = postcard::from_bytes(&data[MAGIC.len()..]).map_err(CacheError::Format)?;
    if payload.version != crate_version() {
        return Err(CacheError::VersionMismatch {
            found: payload.version,
        });
    }
    if payload.source_stamp != stamp_of(source_mtime) {
        return Err(CacheError::Stale);
    }
    Ok(payload.module)
}

/// Loads a cached module without a source file to validate against, as when
/// running a `.qbc` directly.
pub fn load_module_unchecked(path: &Path) -> Result<Module, CacheError> {
    let data = fs::read(path)?;
    if data.len() < MAGIC.len() || data[..MAGIC.len()] != *MAGIC {
        return Err(CacheError::BadMagic);
    }
    let payload: CachePayload = postcard::from_bytes(&data[MAGIC.len()..]).map_err(CacheError::Format)?;
    if payload.version != crate_version() {
        return Err(CacheError::VersionMismatch {
            found: payload.version,
        });
    }
    Ok(payload.module)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        bytecode::{code::CodeObject, compile_module},
        intern::Interns,
    };

    fn sample_module() -> Module {
        let tree = crate::ast::Module::new(vec![
            crate::ast::Stmt::assign("answer", crate::ast::Expr::int(42)),
            crate::ast::Stmt::expr(crate::ast::Expr::name("answer")),
        ]);
        let mut interns = Interns::new();
        compile_module(&tree, "sample", &mut interns).expect("sample module compiles")
    }

    #[test]
    fn test_round_trip() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("quill-cache-test-{}.qbc", std::process::id()));
        let module = sample_module();
        let mtime = SystemTime::now();

        save_module(&path, &module, mtime).expect("save succeeds");
        let loaded = load_module(&path, mtime).expect("load succeeds");
        assert_eq!(loaded, module);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_stale_source_rejected() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("quill-cache-stale-{}.qbc", std::process::id()));
        let module = sample_module();
        let written = UNIX_EPOCH + std::time::Duration::from_secs(1_000);
        let changed = UNIX_EPOCH + std::time::Duration::from_secs(2_000);

        save_module(&path, &module, written).expect("save succeeds");
        assert!(matches!(load_module(&path, changed), Err(CacheError::Stale)));
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_bad_magic_rejected() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("quill-cache-magic-{}.qbc", std::process::id()));
        fs::write(&path, b"not a cache").expect("write succeeds");
        assert!(matches!(load_module_unchecked(&path), Err(CacheError::BadMagic)));
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_codeobject_survives_serialization() {
        let module = sample_module();
        let bytes = postcard::to_allocvec(&module).expect("module serializes");
        let restored: Module = postcard::from_bytes(&bytes).expect("module deserializes");
        let init_code = |m: &Module| -> CodeObject {
            match &m.pool[m.init as usize] {
                crate::module::Constant::Code(code) => code.clone(),
                other => panic!("initializer is not code: {other:?}"),
            }
        };
        assert_eq!(init_code(&restored), init_code(&module));
    }
}
