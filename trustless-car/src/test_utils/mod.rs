//! Fixture builders for tests: dag-cbor and raw blocks, minimal UnixFS
//! dag-pb nodes, and CAR containers in both framings.

use anyhow::Result;
use bytes::Bytes;
use iroh_car::{CarHeader, CarWriter};
use libipld::{Cid, Ipld, IpldCodec};
use libipld_core::{
    codec::Encode,
    multihash::{Code, MultihashDigest},
};

/// Encode some IPLD as dag-cbor.
pub fn encode(ipld: &Ipld) -> Bytes {
    let mut vec = Vec::new();
    ipld.encode(IpldCodec::DagCbor, &mut vec)
        .expect("dag-cbor encoding is infallible for fixture data");
    Bytes::from(vec)
}

/// Encode some IPLD as a dag-cbor block, returning its CID and bytes.
pub fn cbor_block(ipld: &Ipld) -> (Cid, Bytes) {
    let bytes = encode(ipld);
    let cid = Cid::new_v1(IpldCodec::DagCbor.into(), Code::Sha2_256.digest(&bytes));
    (cid, bytes)
}

/// A raw-codec block over the given bytes.
pub fn raw_block(data: &[u8]) -> (Cid, Bytes) {
    let cid = Cid::new_v1(IpldCodec::Raw.into(), Code::Sha2_256.digest(data));
    (cid, Bytes::copy_from_slice(data))
}

fn dag_pb_block(bytes: Vec<u8>) -> (Cid, Bytes) {
    let cid = Cid::new_v1(IpldCodec::DagPb.into(), Code::Sha2_256.digest(&bytes));
    (cid, Bytes::from(bytes))
}

fn varint(mut value: u64, out: &mut Vec<u8>) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

fn pb_len_field(field: u64, payload: &[u8], out: &mut Vec<u8>) {
    varint(field << 3 | 2, out);
    varint(payload.len() as u64, out);
    out.extend_from_slice(payload);
}

fn pb_varint_field(field: u64, value: u64, out: &mut Vec<u8>) {
    varint(field << 3, out);
    varint(value, out);
}

fn pb_link(cid: &Cid, name: &str, tsize: u64) -> Vec<u8> {
    let mut out = Vec::new();
    pb_len_field(1, &cid.to_bytes(), &mut out);
    pb_len_field(2, name.as_bytes(), &mut out);
    pb_varint_field(3, tsize, &mut out);
    out
}

/// Encode a dag-pb node: links in order, then the UnixFS data envelope.
fn pb_node(links: &[(Cid, &str, u64)], data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    for (cid, name, tsize) in links {
        pb_len_field(2, &pb_link(cid, name, *tsize), &mut out);
    }
    pb_len_field(1, data, &mut out);
    out
}

fn unixfs_data(
    data_type: u64,
    inline: &[u8],
    filesize: Option<u64>,
    blocksizes: &[u64],
    fanout: Option<u64>,
) -> Vec<u8> {
    let mut out = Vec::new();
    pb_varint_field(1, data_type, &mut out);
    if !inline.is_empty() {
        pb_len_field(2, inline, &mut out);
    }
    if let Some(filesize) = filesize {
        pb_varint_field(3, filesize, &mut out);
    }
    for size in blocksizes {
        pb_varint_field(4, *size, &mut out);
    }
    if let Some(fanout) = fanout {
        pb_varint_field(6, fanout, &mut out);
    }
    out
}

/// A UnixFS file node over the given `(chunk, size)` pairs.
pub fn unixfs_file_block(chunks: &[(Cid, u64)]) -> (Cid, Bytes) {
    let links: Vec<(Cid, &str, u64)> = chunks.iter().map(|(cid, size)| (*cid, "", *size)).collect();
    let sizes: Vec<u64> = chunks.iter().map(|(_, size)| *size).collect();
    let filesize = sizes.iter().sum();
    let data = unixfs_data(2, &[], Some(filesize), &sizes, None);
    dag_pb_block(pb_node(&links, &data))
}

/// A UnixFS directory node over the given `(name, target, tsize)` entries.
pub fn unixfs_directory_block(entries: &[(&str, Cid, u64)]) -> (Cid, Bytes) {
    let links: Vec<(Cid, &str, u64)> = entries
        .iter()
        .map(|(name, cid, tsize)| (*cid, *name, *tsize))
        .collect();
    let data = unixfs_data(1, &[], None, &[], None);
    dag_pb_block(pb_node(&links, &data))
}

/// A UnixFS HAMT shard node with fanout 256. Link names are given in full,
/// i.e. including their two-character prefix for entries.
pub fn unixfs_shard_block(links: &[(&str, Cid, u64)]) -> (Cid, Bytes) {
    let links: Vec<(Cid, &str, u64)> = links
        .iter()
        .map(|(name, cid, tsize)| (*cid, *name, *tsize))
        .collect();
    let data = unixfs_data(5, &[], None, &[], Some(256));
    dag_pb_block(pb_node(&links, &data))
}

/// Write a CARv1 with the given roots and blocks, in order.
pub async fn write_car(roots: &[Cid], blocks: &[(Cid, Bytes)]) -> Result<Vec<u8>> {
    let mut writer = CarWriter::new(CarHeader::new_v1(roots.to_vec()), Vec::new());
    writer.write_header().await?;
    for (cid, bytes) in blocks {
        writer.write(*cid, bytes).await?;
    }
    Ok(writer.finish().await?)
}

/// Wrap the given roots and blocks in a CARv2 frame: pragma, outer header,
/// then the CARv1 data payload and no index.
pub async fn write_car_v2(roots: &[Cid], blocks: &[(Cid, Bytes)]) -> Result<Vec<u8>> {
    let inner = write_car(roots, blocks).await?;
    // 11-byte pragma: varint(10) then the dag-cbor map {"version": 2}
    let mut out = vec![
        0x0a, 0xa1, 0x67, 0x76, 0x65, 0x72, 0x73, 0x69, 0x6f, 0x6e, 0x02,
    ];
    let data_offset = out.len() as u64 + 40;
    out.extend_from_slice(&[0u8; 16]); // characteristics
    out.extend_from_slice(&data_offset.to_le_bytes());
    out.extend_from_slice(&(inner.len() as u64).to_le_bytes());
    out.extend_from_slice(&0u64.to_le_bytes()); // no index
    out.extend_from_slice(&inner);
    Ok(out)
}
