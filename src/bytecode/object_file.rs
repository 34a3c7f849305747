use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Header bytes written in front of every serialized object file.
pub const MAGIC: [u8; 2] = *b"MJ";

/// A compiled program, ready to be loaded by a VM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectFile {
    /// Number of global data words.
    pub data_size: u16,
    /// Entry address of `main`.
    pub main_pc: u16,
    pub code: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum ObjectFileError {
    #[error("not an object file (bad magic)")]
    BadMagic,

    #[error("corrupt object file: {0}")]
    Encoding(#[from] postcard::Error),
}

impl ObjectFile {
    pub fn to_bytes(&self) -> Result<Vec<u8>, ObjectFileError> {
        let body = postcard::to_allocvec(self)?;
        let mut out = Vec::with_capacity(MAGIC.len() + body.len());
        out.extend_from_slice(&MAGIC);
        out.extend(body);
        Ok(out)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<ObjectFile, ObjectFileError> {
        let body = bytes.strip_prefix(&MAGIC).ok_or(ObjectFileError::BadMagic)?;
        Ok(postcard::from_bytes(body)?)
    }
}
