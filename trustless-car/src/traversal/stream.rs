use crate::error::Error;
use anyhow::anyhow;
use bytes::Bytes;
use futures::Future;
use iroh_car::CarReader;
use libipld::{
    cbor::DagCborCodec,
    cid::Cid,
    Ipld,
};
use libipld_core::{
    codec::Decode,
    multihash::{Code, MultihashDigest},
};
use std::io::Cursor;
use tokio::io::{AsyncRead, AsyncReadExt, Chain, Take};
use wnfs_common::utils::CondSend;

/// The maximum CAR header size accepted before giving up on a stream as
/// malformed.
const MAX_HEADER_LENGTH: u64 = 32 * 1024 * 1024;

/// A source of `(cid, bytes)` pairs in stream order. `None` signals a clean
/// end of stream.
pub trait BlockStream {
    /// Pull the next block off the stream.
    fn next_block(
        &mut self,
    ) -> impl Future<Output = Result<Option<(Cid, Bytes)>, Error>> + CondSend;
}

impl<B: BlockStream + CondSend> BlockStream for &mut B {
    async fn next_block(&mut self) -> Result<Option<(Cid, Bytes)>, Error> {
        (**self).next_block().await
    }
}

/// A [`BlockStream`] over a CAR byte stream.
///
/// CARv1 payloads are consumed directly. CARv2 payloads are unwrapped by
/// reading the pragma and outer header, then streaming the embedded CARv1
/// data payload; the index, if any, is never read. Whether a v2 container
/// is acceptable is the caller's policy, via [`CarBlockStream::version`].
///
/// Every block is digest-checked against its own CID before being
/// surfaced, so downstream consumers can treat the stream as trusted
/// storage.
pub struct CarBlockStream<R> {
    reader: CarReader<Chain<Cursor<Vec<u8>>, Take<R>>>,
    version: u64,
    roots: Vec<Cid>,
}

impl<R> std::fmt::Debug for CarBlockStream<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CarBlockStream")
            .field("version", &self.version)
            .field("roots", &self.roots)
            .finish_non_exhaustive()
    }
}

impl<R: AsyncRead + Send + Unpin> CarBlockStream<R> {
    /// Read the container header(s) from `reader` and position the stream
    /// at the first block.
    pub async fn new(mut reader: R) -> Result<Self, Error> {
        let (header_prefix, header_length) = read_varint_prefix(&mut reader).await?;
        if header_length == 0 || header_length > MAX_HEADER_LENGTH {
            return Err(Error::malformed(anyhow!(
                "invalid CAR header length {header_length}"
            )));
        }
        let mut header = vec![0u8; header_length as usize];
        reader
            .read_exact(&mut header)
            .await
            .map_err(|e| Error::malformed(anyhow!("truncated CAR header: {e}")))?;
        let version = header_version(&header)?;

        match version {
            1 => {
                // hand the bytes we consumed back to the CAR reader
                let mut prefix = header_prefix;
                prefix.extend_from_slice(&header);
                let reader = Cursor::new(prefix).chain(reader.take(u64::MAX));
                let reader = CarReader::new(reader).await.map_err(Error::malformed)?;
                let roots = reader.header().roots().to_vec();
                Ok(Self {
                    reader,
                    version: 1,
                    roots,
                })
            }
            2 => {
                // the pragma is followed by a fixed-width outer header:
                // characteristics (16), data_offset (8), data_size (8),
                // index_offset (8), all little-endian
                let mut outer = [0u8; 40];
                reader
                    .read_exact(&mut outer)
                    .await
                    .map_err(|e| Error::malformed(anyhow!("truncated CARv2 header: {e}")))?;
                let data_offset = u64::from_le_bytes(outer[16..24].try_into().expect("8 bytes"));
                let data_size = u64::from_le_bytes(outer[24..32].try_into().expect("8 bytes"));
                let consumed = (header_prefix.len() + header.len() + outer.len()) as u64;
                if data_offset < consumed || data_size == 0 {
                    return Err(Error::malformed(anyhow!("invalid CARv2 data payload")));
                }
                discard(&mut reader, data_offset - consumed).await?;
                let reader = Cursor::new(Vec::new()).chain(reader.take(data_size));
                let reader = CarReader::new(reader).await.map_err(Error::malformed)?;
                if reader.header().version() != 1 {
                    return Err(Error::BadVersion(reader.header().version()));
                }
                let roots = reader.header().roots().to_vec();
                Ok(Self {
                    reader,
                    version: 2,
                    roots,
                })
            }
            other => Err(Error::BadVersion(other)),
        }
    }

    /// The container version, 1 or 2.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// The roots listed in the (inner, for v2) CAR header.
    pub fn roots(&self) -> &[Cid] {
        &self.roots
    }
}

impl<R: AsyncRead + Send + Unpin> BlockStream for CarBlockStream<R> {
    async fn next_block(&mut self) -> Result<Option<(Cid, Bytes)>, Error> {
        match self.reader.next_block().await {
            Ok(None) => Ok(None),
            Ok(Some((cid, data))) => {
                verify_block_digest(&cid, &data)?;
                Ok(Some((cid, Bytes::from(data))))
            }
            Err(e) => Err(Error::malformed(e)),
        }
    }
}

fn header_version(header: &[u8]) -> Result<u64, Error> {
    let ipld = <Ipld as Decode<DagCborCodec>>::decode(DagCborCodec, &mut Cursor::new(header))
        .map_err(|e| Error::malformed(anyhow!("undecodable CAR header: {e}")))?;
    match ipld {
        Ipld::Map(map) => match map.get("version") {
            Some(Ipld::Integer(version)) => Ok(*version as u64),
            _ => Err(Error::malformed(anyhow!("CAR header without version"))),
        },
        _ => Err(Error::malformed(anyhow!("CAR header is not a map"))),
    }
}

fn verify_block_digest(cid: &Cid, data: &[u8]) -> Result<(), Error> {
    let code = Code::try_from(cid.hash().code())
        .map_err(|_| Error::UnsupportedHashCode { cid: *cid })?;
    let digest = code.digest(data);
    if &digest != cid.hash() {
        return Err(Error::malformed(anyhow!(
            "block digest mismatch for CID {cid}"
        )));
    }
    Ok(())
}

async fn read_varint_prefix<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<(Vec<u8>, u64), Error> {
    let mut raw = Vec::new();
    let mut value: u64 = 0;
    let mut shift = 0;
    loop {
        let mut byte = [0u8; 1];
        reader
            .read_exact(&mut byte)
            .await
            .map_err(|e| Error::malformed(anyhow!("truncated CAR header varint: {e}")))?;
        raw.push(byte[0]);
        value |= u64::from(byte[0] & 0x7f) << shift;
        if byte[0] & 0x80 == 0 {
            return Ok((raw, value));
        }
        shift += 7;
        if shift >= 64 {
            return Err(Error::malformed(anyhow!("CAR header varint too long")));
        }
    }
}

async fn discard<R: AsyncRead + Unpin>(reader: &mut R, n: u64) -> Result<(), Error> {
    let mut limited = reader.take(n);
    let copied = tokio::io::copy(&mut limited, &mut tokio::io::sink())
        .await
        .map_err(|e| Error::malformed(anyhow!("truncated CARv2 padding: {e}")))?;
    if copied != n {
        return Err(Error::malformed(anyhow!("truncated CARv2 padding")));
    }
    Ok(())
}
