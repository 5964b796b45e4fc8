use super::feed::BlockLoader;
use crate::error::Error;
use bytes::Bytes;
use libipld::Cid;
use wnfs_common::utils::CondSend;

/// Captures the first error returned by an inner [`BlockLoader`].
///
/// Traversal layers that reinterpret nodes (such as UnixFS reification)
/// may swallow loader errors on their way up; installing this wrapper
/// beneath them keeps the first failure observable regardless of what the
/// layers above do with it.
#[derive(Debug)]
pub struct ErrorCapturingLoader<L> {
    inner: L,
    error: Option<Error>,
}

impl<L: BlockLoader + CondSend> ErrorCapturingLoader<L> {
    /// Wrap `inner`, with no error captured yet.
    pub fn new(inner: L) -> Self {
        Self { inner, error: None }
    }

    /// The first captured error, if any load failed.
    pub fn into_error(self) -> Option<Error> {
        self.error
    }
}

impl<L: BlockLoader + CondSend> BlockLoader for ErrorCapturingLoader<L> {
    async fn load(&mut self, cid: &Cid) -> Result<Bytes, Error> {
        match self.inner.load(cid).await {
            Ok(data) => Ok(data),
            Err(e) => {
                if self.error.is_none() {
                    self.error = Some(e.clone());
                }
                Err(e)
            }
        }
    }
}
