//! The minimal dag-pb and UnixFS views the verifying traversal needs:
//! entity classification (file, directory, sharded directory), the chunk
//! layout of files for ranged reads, and shard-link classification for
//! sharded directories.
//!
//! This intentionally stops well short of a full UnixFS implementation:
//! no mtime/mode, no symlink resolution, no hash-path shard navigation.

use crate::error::Error;
use anyhow::anyhow;
use libipld::Cid;

const WIRE_VARINT: u64 = 0;
const WIRE_FIXED64: u64 = 1;
const WIRE_LEN: u64 = 2;
const WIRE_FIXED32: u64 = 5;

const TYPE_RAW: u64 = 0;
const TYPE_DIRECTORY: u64 = 1;
const TYPE_FILE: u64 = 2;
const TYPE_HAMT_SHARD: u64 = 5;

/// A link out of a dag-pb node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PbLink {
    pub(crate) cid: Cid,
    pub(crate) name: Option<String>,
    pub(crate) tsize: Option<u64>,
}

/// A decoded dag-pb node.
#[derive(Debug, Clone, Default)]
pub(crate) struct PbNode {
    pub(crate) links: Vec<PbLink>,
    pub(crate) data: Option<Vec<u8>>,
}

/// The layout of a UnixFS file node: leading inline bytes followed by
/// linked chunks. `blocksizes` is empty when the node carries no per-chunk
/// sizes, in which case ranged reads degrade to full reads.
#[derive(Debug, Clone)]
pub(crate) struct FileNode {
    pub(crate) inline_len: u64,
    pub(crate) chunks: Vec<Cid>,
    pub(crate) blocksizes: Vec<u64>,
    pub(crate) filesize: Option<u64>,
}

impl FileNode {
    /// The total number of bytes this node spans.
    pub(crate) fn size(&self) -> u64 {
        self.filesize
            .unwrap_or_else(|| self.inline_len + self.blocksizes.iter().sum::<u64>())
    }

    /// Whether per-chunk spans are known.
    pub(crate) fn has_spans(&self) -> bool {
        self.blocksizes.len() == self.chunks.len()
    }
}

/// A UnixFS node as the traversal sees it after `interpret-as "unixfs"`.
#[derive(Debug, Clone)]
pub(crate) enum UnixFsView {
    File(FileNode),
    Directory(Vec<PbLink>),
    Shard {
        links: Vec<PbLink>,
        /// Length of the hex prefix on entry names; links whose name is
        /// exactly this long are sub-shards.
        pad: usize,
    },
}

impl UnixFsView {
    /// Classify a dag-pb block. Returns `None` for dag-pb nodes that carry
    /// no UnixFS envelope or a type the traversal treats as opaque
    /// (metadata, symlinks), in which case the plain IPLD form applies.
    pub(crate) fn classify(block: &[u8]) -> Result<Option<UnixFsView>, Error> {
        let node = PbNode::from_bytes(block)?;
        let Some(data) = &node.data else {
            return Ok(None);
        };
        let meta = UnixFsData::from_bytes(data)?;
        Ok(match meta.data_type {
            TYPE_FILE | TYPE_RAW => Some(UnixFsView::File(FileNode {
                inline_len: meta.data_len,
                chunks: node.links.iter().map(|link| link.cid).collect(),
                blocksizes: meta.blocksizes,
                filesize: meta.filesize,
            })),
            TYPE_DIRECTORY => Some(UnixFsView::Directory(node.links)),
            TYPE_HAMT_SHARD => {
                let fanout = meta.fanout.filter(|f| f.is_power_of_two()).unwrap_or(256);
                let pad = (fanout.trailing_zeros() as usize).div_ceil(4).max(1);
                Some(UnixFsView::Shard {
                    links: node.links,
                    pad,
                })
            }
            _ => None,
        })
    }
}

/// Whether a shard link points at a sub-shard rather than an entry.
pub(crate) fn is_sub_shard(link: &PbLink, pad: usize) -> bool {
    link.name.as_ref().map(|name| name.len() == pad).unwrap_or(false)
}

/// The entry name of a shard link, with the hex prefix stripped, or `None`
/// for sub-shard links.
pub(crate) fn shard_entry_name(link: &PbLink, pad: usize) -> Option<&str> {
    link.name
        .as_deref()
        .filter(|name| name.len() > pad)
        .map(|name| &name[pad..])
}

/// The decoded UnixFS `Data` message carried inside a dag-pb node.
#[derive(Debug, Clone, Default)]
struct UnixFsData {
    data_type: u64,
    data_len: u64,
    filesize: Option<u64>,
    blocksizes: Vec<u64>,
    fanout: Option<u64>,
}

impl PbNode {
    pub(crate) fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        let mut reader = WireReader::new(bytes);
        let mut node = PbNode::default();
        while let Some((field, wire)) = reader.next_key()? {
            match (field, wire) {
                (1, WIRE_LEN) => node.data = Some(reader.bytes()?.to_vec()),
                (2, WIRE_LEN) => node.links.push(PbLink::from_bytes(reader.bytes()?)?),
                _ => reader.skip(wire)?,
            }
        }
        Ok(node)
    }
}

impl PbLink {
    fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        let mut reader = WireReader::new(bytes);
        let mut cid = None;
        let mut name = None;
        let mut tsize = None;
        while let Some((field, wire)) = reader.next_key()? {
            match (field, wire) {
                (1, WIRE_LEN) => {
                    cid = Some(
                        Cid::try_from(reader.bytes()?)
                            .map_err(|e| Error::parsing(anyhow!("invalid link CID: {e}")))?,
                    )
                }
                (2, WIRE_LEN) => {
                    name = Some(
                        std::str::from_utf8(reader.bytes()?)
                            .map_err(|e| Error::parsing(anyhow!("invalid link name: {e}")))?
                            .to_string(),
                    )
                }
                (3, WIRE_VARINT) => tsize = Some(reader.varint()?),
                _ => reader.skip(wire)?,
            }
        }
        let cid = cid.ok_or_else(|| Error::parsing(anyhow!("dag-pb link without Hash")))?;
        Ok(PbLink { cid, name, tsize })
    }
}

impl UnixFsData {
    fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        let mut reader = WireReader::new(bytes);
        let mut data = UnixFsData::default();
        while let Some((field, wire)) = reader.next_key()? {
            match (field, wire) {
                (1, WIRE_VARINT) => data.data_type = reader.varint()?,
                (2, WIRE_LEN) => data.data_len = reader.bytes()?.len() as u64,
                (3, WIRE_VARINT) => data.filesize = Some(reader.varint()?),
                (4, WIRE_VARINT) => data.blocksizes.push(reader.varint()?),
                (4, WIRE_LEN) => {
                    // packed encoding
                    let mut packed = WireReader::new(reader.bytes()?);
                    while !packed.is_empty() {
                        data.blocksizes.push(packed.varint()?);
                    }
                }
                (6, WIRE_VARINT) => data.fanout = Some(reader.varint()?),
                _ => reader.skip(wire)?,
            }
        }
        Ok(data)
    }
}

/// A cursor over protobuf wire format.
struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn next_key(&mut self) -> Result<Option<(u64, u64)>, Error> {
        if self.is_empty() {
            return Ok(None);
        }
        let key = self.varint()?;
        Ok(Some((key >> 3, key & 7)))
    }

    fn varint(&mut self) -> Result<u64, Error> {
        let mut value: u64 = 0;
        let mut shift = 0;
        loop {
            let byte = *self
                .buf
                .get(self.pos)
                .ok_or_else(|| Error::parsing(anyhow!("truncated varint")))?;
            self.pos += 1;
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
            if shift >= 64 {
                return Err(Error::parsing(anyhow!("varint too long")));
            }
        }
    }

    fn bytes(&mut self) -> Result<&'a [u8], Error> {
        let len = self.varint()? as usize;
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| Error::parsing(anyhow!("truncated length-delimited field")))?;
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn skip(&mut self, wire: u64) -> Result<(), Error> {
        match wire {
            WIRE_VARINT => {
                self.varint()?;
            }
            WIRE_LEN => {
                self.bytes()?;
            }
            WIRE_FIXED64 => self.advance(8)?,
            WIRE_FIXED32 => self.advance(4)?,
            other => return Err(Error::parsing(anyhow!("unsupported wire type {other}"))),
        }
        Ok(())
    }

    fn advance(&mut self, n: usize) -> Result<(), Error> {
        if self.pos + n > self.buf.len() {
            return Err(Error::parsing(anyhow!("truncated fixed-width field")));
        }
        self.pos += n;
        Ok(())
    }
}
