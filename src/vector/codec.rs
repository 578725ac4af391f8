//! Packed little-endian f32 vector encoding and the sqlite-vec extension hook
use crate::error::{KnowError, Result};
use std::sync::Once;

/// Encode a vector as D × 4 bytes of little-endian f32
pub fn encode(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Decode a packed little-endian f32 blob
pub fn decode(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(KnowError::InvalidVectorBlob(bytes.len()));
    }

    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

/// Register sqlite-vec as an auto-extension for every connection opened afterwards
///
/// Must run before the connection pool is built. Registration happens once per process.
pub fn register_extension() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        // SAFETY: `sqlite3_vec_init` is the extension entry point statically linked by
        // the sqlite-vec crate; the crate declares it without arguments, so it is cast
        // to the signature SQLite expects for auto-extensions.
        unsafe {
            type ExtEntryPoint = unsafe extern "C" fn(
                *mut rusqlite::ffi::sqlite3,
                *mut *const std::os::raw::c_char,
                *const rusqlite::ffi::sqlite3_api_routines,
            ) -> std::os::raw::c_int;

            rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute::<
                *const (),
                ExtEntryPoint,
            >(
                sqlite_vec::sqlite3_vec_init as *const ()
            )));
        }
    });
}
