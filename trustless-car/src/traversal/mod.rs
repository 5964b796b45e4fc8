//! Verification of untrusted CAR streams against a request's selector.
//!
//! [`Config::verify_car`] consumes a CAR byte stream exactly once, drives
//! the selector traversal from the expected root, and enforces that the
//! stream contains precisely the blocks of the selector's depth-first walk
//! in order: no reordering, no gaps, no trailing data, and duplicates only
//! as the configured policy allows. Verified blocks are written through to
//! a caller-supplied block store as they arrive.

mod capture;
mod feed;
mod stream;
mod walk;

pub use capture::ErrorCapturingLoader;
pub use feed::BlockLoader;
pub use stream::{BlockStream, CarBlockStream};

use crate::{error::Error, path::Path, selector::compile};
use feed::BlockFeed;
use libipld::{Cid, Ipld};
use tokio::io::AsyncRead;
use tracing::instrument;
use wnfs_common::{utils::CondSend, BlockStore};

/// Configuration for one CAR verification.
#[derive(Debug, Clone)]
pub struct Config {
    /// The single root expected in the CAR header, and the origin of the
    /// traversal.
    pub root: Cid,
    /// Accept CARv2-framed payloads in addition to plain CARv1.
    pub allow_car_v2: bool,
    /// The selector to execute from `root`, as produced by
    /// [`Request::selector`](crate::Request::selector).
    pub selector: Ipld,
    /// Require the CAR header to list exactly `root`.
    pub check_roots_mismatch: bool,
    /// Whether the incoming stream replays duplicate blocks wherever the
    /// traversal revisits them.
    pub expect_duplicates_in: bool,
    /// Whether revisited blocks are written to the store a second time.
    pub write_duplicates_out: bool,
    /// A hard upper bound on block loads, zero meaning no bound.
    pub max_blocks: u64,
}

impl Config {
    /// A verification of the given selector from `root` with the strict
    /// defaults: CARv1 only, roots checked, no duplicates either way, no
    /// load budget.
    pub fn new(root: Cid, selector: Ipld) -> Self {
        Self {
            root,
            allow_car_v2: false,
            selector,
            check_roots_mismatch: true,
            expect_duplicates_in: false,
            write_duplicates_out: false,
            max_blocks: 0,
        }
    }
}

/// The outcome of a successful verification.
///
/// The `in` counters measure block payload bytes read from the stream, the
/// `out` counters bytes written to the store; they differ exactly when the
/// duplicate policies differ across a revisit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TraversalResult {
    /// The deepest path visited by the traversal, for checking against the
    /// request path with [`check_path`].
    pub last_path: Path,
    /// Blocks read from the stream.
    pub blocks_in: u64,
    /// Payload bytes read from the stream.
    pub bytes_in: u64,
    /// Blocks written to the store.
    pub blocks_out: u64,
    /// Payload bytes written to the store.
    pub bytes_out: u64,
}

impl Config {
    /// Read a CAR from `reader`, verify it delivers exactly the blocks
    /// this configuration demands, and write them to `store`.
    ///
    /// The stream is consumed once; the first failure aborts the call.
    #[instrument(level = "trace", skip_all, fields(root = %self.root))]
    pub async fn verify_car(
        &self,
        reader: impl AsyncRead + Send + Unpin,
        store: &impl BlockStore,
    ) -> Result<TraversalResult, Error> {
        let stream = CarBlockStream::new(reader).await?;
        match stream.version() {
            1 => {}
            2 if self.allow_car_v2 => {}
            version => return Err(Error::BadVersion(version)),
        }
        if self.check_roots_mismatch
            && (stream.roots().len() != 1 || stream.roots()[0] != self.root)
        {
            return Err(Error::BadRoots);
        }
        self.verify_block_stream(stream, store).await
    }

    /// Verify blocks from an already-framed stream, without CAR header
    /// checks. See [`Config::verify_car`].
    pub async fn verify_block_stream(
        &self,
        mut stream: impl BlockStream + CondSend,
        store: &impl BlockStore,
    ) -> Result<TraversalResult, Error> {
        let selector = compile(&self.selector)?;

        let mut feed = BlockFeed::new(
            &mut stream,
            store,
            self.expect_duplicates_in,
            self.write_duplicates_out,
            self.max_blocks,
        );
        // capture load failures beneath any layer that might swallow them
        let mut loader = ErrorCapturingLoader::new(&mut feed);
        let walked = walk::walk(&mut loader, self.root, &selector).await;
        let captured = loader.into_error();
        let last_path = match walked {
            Ok(last_path) => {
                if let Some(error) = captured {
                    return Err(error);
                }
                last_path
            }
            Err(error) => return Err(captured.unwrap_or(error)),
        };
        let (blocks_in, bytes_in, blocks_out, bytes_out) = feed.counters();
        drop(feed);

        // the traversal is done; anything left on the stream is extraneous
        match stream.next_block().await? {
            Some(_) => Err(Error::ExtraneousBlock),
            None => Ok(TraversalResult {
                last_path,
                blocks_in,
                bytes_in,
                blocks_out,
                bytes_out,
            }),
        }
    }
}

/// Check that the traversal's deepest path covers the expected request
/// path. A longer `last_path` is fine: an `all` or `entity` scope
/// legitimately explores past the path terminus.
pub fn check_path(expected: &Path, last_path: &Path) -> Result<(), Error> {
    let mut expected = expected.clone();
    let mut last_path = last_path.clone();
    while let Some((segment, rest)) = expected.shift() {
        let Some((last_segment, last_rest)) = last_path.shift() else {
            return Err(Error::PathNotTraversed { missed: expected });
        };
        if segment != last_segment {
            return Err(Error::UnexpectedPathSegment {
                got: last_segment,
                expected: segment,
            });
        }
        expected = rest;
        last_path = last_rest;
    }
    Ok(())
}
