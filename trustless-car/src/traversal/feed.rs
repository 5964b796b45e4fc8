use super::stream::BlockStream;
use crate::error::Error;
use bytes::Bytes;
use futures::Future;
use libipld::Cid;
use std::collections::HashSet;
use std::sync::Arc;
use wnfs_common::{utils::CondSend, BlockStore, BlockStoreError};

/// The single point through which the traversal obtains block bytes.
///
/// Implemented by [`BlockFeed`] and by [`ErrorCapturingLoader`] wrapping
/// it.
///
/// [`ErrorCapturingLoader`]: super::ErrorCapturingLoader
pub trait BlockLoader {
    /// Load the bytes for `cid`, whatever that means for the
    /// implementation.
    fn load(&mut self, cid: &Cid) -> impl Future<Output = Result<Bytes, Error>> + CondSend;
}

impl<L: BlockLoader + CondSend> BlockLoader for &mut L {
    async fn load(&mut self, cid: &Cid) -> Result<Bytes, Error> {
        (**self).load(cid).await
    }
}

/// Feeds the traversal from an untrusted block stream, enforcing order,
/// the duplicate policy and the load budget, counting payload bytes in and
/// out, and writing verified blocks through to the store.
///
/// Each request for a link the traversal has not seen before consumes
/// exactly one block from the stream, which must carry the multihash the
/// traversal asked for. Requests for links seen before are served
/// according to the duplicate policy: replayed from the stream when
/// duplicates are expected in, or re-read from the store when not; and
/// written to the store a second time only when duplicates are written
/// out.
#[derive(Debug)]
pub(crate) struct BlockFeed<'a, B, S> {
    stream: &'a mut B,
    store: &'a S,
    expect_duplicates_in: bool,
    write_duplicates_out: bool,
    max_blocks: u64,
    loads: u64,
    seen: HashSet<Cid>,
    blocks_in: u64,
    bytes_in: u64,
    blocks_out: u64,
    bytes_out: u64,
}

impl<'a, B: BlockStream + CondSend, S: BlockStore> BlockFeed<'a, B, S> {
    pub(crate) fn new(
        stream: &'a mut B,
        store: &'a S,
        expect_duplicates_in: bool,
        write_duplicates_out: bool,
        max_blocks: u64,
    ) -> Self {
        Self {
            stream,
            store,
            expect_duplicates_in,
            write_duplicates_out,
            max_blocks,
            loads: 0,
            seen: HashSet::new(),
            blocks_in: 0,
            bytes_in: 0,
            blocks_out: 0,
            bytes_out: 0,
        }
    }

    /// The accumulated counters: blocks and payload bytes read from the
    /// stream, and written to the store.
    pub(crate) fn counters(&self) -> (u64, u64, u64, u64) {
        (self.blocks_in, self.bytes_in, self.blocks_out, self.bytes_out)
    }

    async fn read_next(&mut self, expected: &Cid) -> Result<Bytes, Error> {
        match self.stream.next_block().await? {
            None => Err(Error::MissingBlock(*expected)),
            Some((cid, data)) => {
                // compare by multihash only: the same content may arrive
                // under a different codec than the link that asked for it
                if cid.hash() != expected.hash() {
                    return Err(Error::UnexpectedBlock {
                        expected: *expected,
                        received: cid,
                    });
                }
                Ok(data)
            }
        }
    }

    fn record_in(&mut self, data: &Bytes) {
        self.blocks_in += 1;
        self.bytes_in += data.len() as u64;
    }

    fn record_out(&mut self, data: &Bytes) {
        self.blocks_out += 1;
        self.bytes_out += data.len() as u64;
    }
}

impl<B: BlockStream + CondSend, S: BlockStore> BlockLoader for BlockFeed<'_, B, S> {
    async fn load(&mut self, cid: &Cid) -> Result<Bytes, Error> {
        if self.max_blocks > 0 && self.loads >= self.max_blocks {
            return Err(Error::BudgetExceeded {
                max_blocks: self.max_blocks,
            });
        }
        self.loads += 1;

        let data = if self.seen.contains(cid) {
            if self.expect_duplicates_in {
                // the stream must replay the duplicate
                let data = self.read_next(cid).await?;
                self.record_in(&data);
                if !self.write_duplicates_out {
                    return Ok(data);
                }
                data
            } else {
                // the store has it from the first write
                let data = self
                    .store
                    .get_block(cid)
                    .await
                    .map_err(map_store_error)?;
                if !self.write_duplicates_out {
                    return Ok(data);
                }
                data
            }
        } else {
            self.seen.insert(*cid);
            let data = self.read_next(cid).await?;
            self.record_in(&data);
            data
        };

        tracing::trace!(%cid, len = data.len(), "verified block");
        self.record_out(&data);
        self.store
            .put_block_keyed(*cid, data.clone())
            .await
            .map_err(map_store_error)?;
        Ok(data)
    }
}

fn map_store_error(err: BlockStoreError) -> Error {
    match err {
        BlockStoreError::CIDNotFound(cid) => Error::MissingBlock(cid),
        other => Error::BlockStore(Arc::new(other)),
    }
}
