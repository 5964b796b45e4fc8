use crate::path::{Path, PathSegment};
use libipld::Cid;
use std::sync::Arc;

/// Errors raised while parsing the HTTP parameter surface of the Trustless
/// Gateway protocol: query parameters, `Accept`/`Content-Type` headers and
/// the `/ipfs/<cid>[/path]` URL form.
///
/// All of these map to client errors (4xx) when surfaced from a server.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The "dag-scope" query parameter was not one of "all", "entity" or
    /// "block". Matching is case-sensitive.
    #[error("invalid dag-scope parameter: {0:?}")]
    InvalidDagScope(String),

    /// The "entity-bytes" query parameter did not match the
    /// `<int>:(<int>|*)` grammar.
    #[error("invalid byte range: {0:?}")]
    InvalidByteRange(String),

    /// The "filename" query parameter had no extension.
    #[error("invalid filename parameter; missing extension")]
    FilenameMissingExtension,

    /// The "filename" query parameter had an extension other than ".car" or
    /// ".bin".
    #[error("invalid filename parameter; unsupported extension: {0:?}")]
    FilenameUnsupportedExtension(String),

    /// A ".car" filename was requested but none of the accepted content
    /// types is a CAR type.
    #[error("invalid filename parameter; .car extension requires CAR response format")]
    CarFilenameMismatch,

    /// A ".bin" filename was requested but none of the accepted content
    /// types is the raw block type.
    #[error("invalid filename parameter; .bin extension requires raw response format")]
    RawFilenameMismatch,

    /// The "format" query parameter was not "car" or "raw".
    #[error("invalid format parameter; unsupported: {0:?}")]
    InvalidFormat(String),

    /// An `Accept` header was supplied but contained no acceptable content
    /// type, and no "format" parameter was available to fall back to.
    #[error("invalid Accept header; unsupported: {0:?}")]
    InvalidAccept(String),

    /// Neither an `Accept` header nor a "format" query parameter was
    /// provided.
    #[error("neither a valid Accept header nor format parameter were provided")]
    MissingFormat,

    /// The URL path did not have the `/ipfs/<cid>` form.
    #[error("not found")]
    PathNotFound,

    /// The URL path had the `/ipfs/<cid>` form but the CID segment did not
    /// parse.
    #[error("failed to parse root CID")]
    BadCid,
}

/// Errors raised while verifying a CAR stream against a request.
///
/// The first error aborts the verification; the stream is consumed once and
/// never retried.
#[derive(thiserror::Error, Debug, Clone)]
pub enum Error {
    /// The CAR container could not be decoded.
    #[error("malformed CAR: {0}")]
    MalformedCar(Arc<anyhow::Error>),

    /// The CAR version was not 1, or was 2 without `allow_car_v2`.
    #[error("bad CAR version: {0}")]
    BadVersion(u64),

    /// The CAR header roots were not exactly the single expected root.
    #[error("CAR root CID mismatch")]
    BadRoots,

    /// A block arrived out of the depth-first order demanded by the
    /// selector. CIDs are compared by multihash only, so this is raised when
    /// the digests differ, not merely the codecs.
    #[error("unexpected block in CAR: {received} != {expected}")]
    UnexpectedBlock {
        /// The CID the traversal asked for next.
        expected: Cid,
        /// The CID that actually arrived on the stream.
        received: Cid,
    },

    /// The stream continued past the end of the traversal.
    #[error("extraneous block in CAR")]
    ExtraneousBlock,

    /// The stream ended before delivering a block the traversal needs.
    /// "Not found" conditions from nested loaders are also folded into this
    /// kind so callers observe a single consistent error.
    #[error("missing block in CAR: {0}")]
    MissingBlock(Cid),

    /// More blocks were loaded than the configured `max_blocks` budget.
    #[error("traversal budget exceeded: maximum {max_blocks} block loads")]
    BudgetExceeded {
        /// The configured budget.
        max_blocks: u64,
    },

    /// A CID carried a codec outside the supported registry (dag-cbor,
    /// dag-json, dag-pb, raw).
    #[error("unsupported codec in CID: {cid}")]
    UnsupportedCodec {
        /// The CID with the unsupported codec.
        cid: Cid,
    },

    /// A CID carried a multihash code outside the supported set.
    #[error("unsupported hash code in CID: {cid}")]
    UnsupportedHashCode {
        /// The CID with the unsupported hash function.
        cid: Cid,
    },

    /// A block failed to decode under its CID's codec.
    #[error("error during block parsing: {0}")]
    ParsingError(Arc<anyhow::Error>),

    /// The selector node could not be compiled into an executable selector.
    #[error("invalid selector: {0}")]
    InvalidSelector(String),

    /// An error surfaced from the caller-supplied block store.
    #[error("block store error: {0}")]
    BlockStore(Arc<wnfs_common::BlockStoreError>),

    /// The traversal finished without visiting the full requested path.
    #[error("failed to traverse full path, missed: [{missed}]")]
    PathNotTraversed {
        /// The path suffix that was never visited.
        missed: Path,
    },

    /// The traversal visited a different segment than the requested path
    /// demanded.
    #[error("unexpected path segment visit, got [{got}], expected [{expected}]")]
    UnexpectedPathSegment {
        /// The segment that was visited.
        got: PathSegment,
        /// The segment the request path expects at this position.
        expected: PathSegment,
    },
}

impl Error {
    pub(crate) fn malformed(err: impl Into<anyhow::Error>) -> Self {
        Self::MalformedCar(Arc::new(err.into()))
    }

    pub(crate) fn parsing(err: impl Into<anyhow::Error>) -> Self {
        Self::ParsingError(Arc::new(err.into()))
    }
}
