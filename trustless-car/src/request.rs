use crate::{
    error::ParseError,
    path::Path,
    selector::{
        explore_all, explore_all_recursively, explore_interpret_as, explore_recursive,
        explore_recursive_edge, explore_union, match_unixfs_entity, matcher, matcher_subset,
        unixfs_path_selector,
    },
};
use libipld::{Cid, Ipld};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::{fmt, str::FromStr};
use xxhash_rust::xxh64::xxh64;

/// The "dag-scope" parameter of the IPFS Trustless Gateway protocol,
/// constraining how much of the DAG around the path terminus is returned.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DagScope {
    /// The entire DAG below the terminus.
    #[default]
    All,
    /// A single UnixFS entity at the terminus: the bytes of a file, or one
    /// level of a directory.
    Entity,
    /// The terminal block only.
    Block,
}

impl DagScope {
    /// The string form used in URLs.
    pub fn as_str(&self) -> &'static str {
        match self {
            DagScope::All => "all",
            DagScope::Entity => "entity",
            DagScope::Block => "block",
        }
    }

    /// The selector to run at the terminus of a request with this scope.
    pub fn terminal_selector(&self) -> Ipld {
        match self {
            DagScope::All => explore_all_recursively(),
            DagScope::Entity => match_unixfs_entity(),
            DagScope::Block => matcher(),
        }
    }
}

impl fmt::Display for DagScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DagScope {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(DagScope::All),
            "entity" => Ok(DagScope::Entity),
            "block" => Ok(DagScope::Block),
            _ => Err(ParseError::InvalidDagScope(s.to_string())),
        }
    }
}

/// The "entity-bytes" parameter of the IPFS Trustless Gateway protocol: a
/// byte range within the terminal UnixFS file entity.
///
/// `to == None` represents the open end (`*`). Negative values are permitted
/// and are interpreted by UnixFS as offsets from the end of the file; they
/// are propagated to the selector verbatim.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ByteRange {
    /// First byte of the range, inclusive.
    pub from: i64,
    /// Last byte of the range, inclusive, or `None` for the end of file.
    pub to: Option<i64>,
}

impl ByteRange {
    /// Whether this range covers the whole entity, i.e. is `0:*`.
    pub fn is_default(&self) -> bool {
        self.from == 0 && self.to.is_none()
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to {
            Some(to) => write!(f, "{}:{}", self.from, to),
            None => write!(f, "{}:*", self.from),
        }
    }
}

impl FromStr for ByteRange {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Ok(Self::default());
        }
        let err = || ParseError::InvalidByteRange(s.to_string());
        let (from, to) = s.split_once(':').ok_or_else(err)?;
        if to.contains(':') {
            return Err(err());
        }
        let from = from.parse::<i64>().map_err(|_| err())?;
        let to = match to {
            "*" => None,
            to => Some(to.parse::<i64>().map_err(|_| err())?),
        };
        Ok(Self { from, to })
    }
}

/// The parameters of an IPFS Trustless Gateway request. Immutable once
/// constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// The root CID to fetch.
    pub root: Cid,
    /// The optional path within the DAG to fetch.
    pub path: Path,
    /// The scope of the DAG to fetch around the path terminus.
    pub scope: DagScope,
    /// The optional byte range within the terminal entity.
    pub bytes: Option<ByteRange>,
    /// Whether duplicate blocks are expected in the response where they
    /// re-occur in the traversal.
    pub duplicates: bool,
}

/// Characters that may appear unescaped within a URL path segment, per the
/// RFC 3986 pchar set minus the sub-delims we must escape for IPLD paths.
const PATH_SEGMENT_ESCAPES: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'$')
    .remove(b'&')
    .remove(b'+')
    .remove(b':')
    .remove(b'=')
    .remove(b'@');

impl Request {
    /// A request for the full DAG below `root`.
    pub fn new(root: Cid) -> Self {
        Self {
            root,
            path: Path::default(),
            scope: DagScope::All,
            bytes: None,
            duplicates: false,
        }
    }

    /// Generate the IPLD selector for this request.
    ///
    /// Only `path`, `scope` and `bytes` contribute; the selector for equal
    /// requests is deterministic down to its DAG-JSON encoding.
    pub fn selector(&self) -> Ipld {
        let mut terminal = self.scope.terminal_selector();
        if self.scope == DagScope::Entity {
            if let Some(bytes) = &self.bytes {
                if !bytes.is_default() {
                    // The selector's subset matcher uses an exclusive end, so
                    // bump non-negative ends by one; negative ends are
                    // interpreted relative to the end of the file and pass
                    // through unchanged.
                    let to = match bytes.to {
                        None => i64::MAX,
                        Some(to) if to >= 0 => to + 1,
                        Some(to) => to,
                    };
                    // If the terminal turns out not to be a file, fall back
                    // to exploring one level of its children, as the plain
                    // entity selector would.
                    terminal = explore_interpret_as(
                        "unixfs",
                        explore_union(vec![
                            matcher_subset(bytes.from, to),
                            explore_recursive(Some(1), explore_all(explore_recursive_edge())),
                        ]),
                    );
                }
            }
        }
        unixfs_path_selector(&self.path, terminal)
    }

    /// The URL path and query string for this request, with each path
    /// segment percent-escaped.
    pub fn url_path(&self) -> String {
        let mut out = String::new();
        for seg in self.path.iter() {
            out.push('/');
            out.push_str(&utf8_percent_encode(seg.as_str(), PATH_SEGMENT_ESCAPES).to_string());
        }
        out.push_str("?dag-scope=");
        out.push_str(self.scope.as_str());
        if let Some(bytes) = &self.bytes {
            if !bytes.is_default() {
                out.push_str("&entity-bytes=");
                out.push_str(&bytes.to_string());
            }
        }
        out
    }

    /// A weak Etag for an HTTP response to this request.
    ///
    /// The tag is `W/"<root>.car.<suffix>"` where the suffix is the
    /// little-endian xxhash64 of the logical request (root, canonical path,
    /// non-default scope, non-default byte range, non-default block order
    /// and the duplicates flag), in lowercase base-32.
    pub fn etag(&self, order: &str) -> String {
        let mut preimage = String::from("/ipfs/");
        preimage.push_str(&self.root.to_string());
        if !self.path.is_empty() {
            preimage.push('/');
            preimage.push_str(&self.path.to_string());
        }
        if self.scope != DagScope::All {
            preimage.push('\0');
            preimage.push_str("scope=");
            preimage.push_str(self.scope.as_str());
        }
        if let Some(bytes) = &self.bytes {
            if !bytes.is_default() {
                preimage.push('\0');
                preimage.push_str("range=");
                preimage.push_str(&bytes.from.to_string());
                if let Some(to) = bytes.to {
                    preimage.push(',');
                    preimage.push_str(&to.to_string());
                }
            }
        }
        if !order.is_empty() && order != "dfs" {
            preimage.push('\0');
            preimage.push_str("order=");
            preimage.push_str(order);
        }
        if self.duplicates {
            preimage.push('\0');
            preimage.push_str("dups=y");
        }
        let suffix = base32(xxh64(preimage.as_bytes(), 0));
        format!("W/\"{}.car.{}\"", self.root, suffix)
    }

    /// The value for an `X-Ipfs-Roots` header: the root for path-less
    /// requests, empty otherwise since a streaming gateway cannot resolve
    /// the intermediate CIDs of a path up front.
    pub fn ipfs_roots(&self) -> String {
        if self.path.is_empty() {
            self.root.to_string()
        } else {
            String::new()
        }
    }
}

/// Lowercase base-32 (digits then a-v), matching Go's strconv.FormatUint.
fn base32(mut n: u64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuv";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 32) as usize]);
        n /= 32;
    }
    out.reverse();
    String::from_utf8(out).expect("base32 digits are ascii")
}


#[cfg(test)]
mod proptests {
    use super::*;
    use crate::path::Path;
    use proptest::prelude::*;
    use test_strategy::proptest;

    #[proptest]
    fn byte_range_roundtrips(from: i64, to: Option<i64>) {
        let br = ByteRange { from, to };
        prop_assert_eq!(br.to_string().parse::<ByteRange>().unwrap(), br);
    }

    #[proptest]
    fn etag_is_path_spelling_independent(
        #[strategy(proptest::collection::vec("[a-z0-9]{1,8}", 1..5))] segments: Vec<String>,
    ) {
        let root = Cid::try_from("bafybeigdyrzt5sfp7udm7hu76uh7y26nf3efuylqabf3oclgtqy55fbzdi")
            .unwrap();
        let joined = segments.join("/");
        let spellings = [
            joined.clone(),
            format!("/{joined}"),
            format!("//{}//", segments.join("//")),
        ];
        let etags: Vec<String> = spellings
            .iter()
            .map(|path| {
                Request {
                    path: Path::parse(path),
                    ..Request::new(root)
                }
                .etag("dfs")
            })
            .collect();
        prop_assert_eq!(&etags[0], &etags[1]);
        prop_assert_eq!(&etags[0], &etags[2]);
    }
}
