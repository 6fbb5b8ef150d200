//! Raw wire buffers as runtime bytes objects.

use bytes::Bytes;
use embedkern_runtime::{List, Object, RuntimeGuard};

use crate::error::{Result, WireError};

/// Converts between out-of-band wire buffers and a runtime list of bytes.
///
/// Buffers are passed through untouched: no copying beyond reference
/// counting, no re-encoding, order preserved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferCodec;

impl BufferCodec {
    pub fn new() -> Self {
        Self
    }

    /// Wrap wire buffers as a runtime list of bytes.
    pub fn encode(&self, _guard: &RuntimeGuard<'_>, buffers: &[Bytes]) -> Object {
        Object::List(List::from_vec(
            buffers.iter().cloned().map(Object::Bytes).collect(),
        ))
    }

    /// Read a runtime list of bytes back into wire buffers.
    pub fn decode(&self, _guard: &RuntimeGuard<'_>, value: &Object) -> Result<Vec<Bytes>> {
        let list = value.as_list().ok_or_else(|| WireError::TypeMismatch {
            expected: "list of bytes",
            found: value.type_name().to_string(),
        })?;
        list.snapshot()
            .into_iter()
            .map(|item| match item {
                Object::Bytes(b) => Ok(b),
                other => Err(WireError::TypeMismatch {
                    expected: "bytes",
                    found: other.type_name().to_string(),
                }),
            })
            .collect()
    }
}
