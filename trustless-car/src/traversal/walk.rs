use super::feed::BlockLoader;
use crate::{
    error::Error,
    path::{Path, PathSegment},
    selector::Selector,
    unixfs::{is_sub_shard, shard_entry_name, FileNode, PbLink, UnixFsView},
};
use bytes::Bytes;
use libipld::{Cid, Ipld, IpldCodec};
use libipld_core::codec::Decode;
use std::io::Cursor;

/// One unit of pending traversal work.
///
/// The walk is an explicit-stack depth-first loop rather than a recursive
/// one: children are pushed in reverse so that popping yields them in
/// order, and every block load goes through the single [`BlockLoader`]
/// entry point, which is what pins the stream order.
enum Step {
    /// Load a linked block and evaluate a selector against it.
    Load { cid: Cid, sel: Selector, path: Path },
    /// Evaluate a selector against an in-memory node.
    Visit {
        node: Ipld,
        block: Option<Bytes>,
        codec: u64,
        sel: Selector,
        path: Path,
    },
    /// Read a span of a matched UnixFS file, `None` meaning all of it.
    FileChunk { cid: Cid, range: Option<(u64, u64)> },
    /// Enumerate a sharded-directory shard and its sub-shards.
    ShardBlock { cid: Cid },
    /// Search a sharded directory's substrate for a named entry.
    ShardLookup {
        cid: Cid,
        name: String,
        sel: Selector,
        path: Path,
    },
}

/// Drive `selector` from `root`, pulling every block through `loader`.
/// Returns the deepest path visited.
pub(crate) async fn walk<L: BlockLoader>(
    loader: &mut L,
    root: Cid,
    selector: &Selector,
) -> Result<Path, Error> {
    let mut last_path = Path::default();
    let mut stack = vec![Step::Load {
        cid: root,
        sel: selector.clone(),
        path: Path::default(),
    }];

    while let Some(step) = stack.pop() {
        let mut children = Vec::new();
        match step {
            Step::Load { cid, sel, path } => {
                let block = loader.load(&cid).await?;
                let node = decode_block(&cid, &block)?;
                last_path = path.clone();
                eval(&node, Some(&block), cid.codec(), &sel, &path, None, &mut children)?;
            }
            Step::Visit {
                node,
                block,
                codec,
                sel,
                path,
            } => {
                last_path = path.clone();
                eval(&node, block.as_ref(), codec, &sel, &path, None, &mut children)?;
            }
            Step::FileChunk { cid, range } => {
                let block = loader.load(&cid).await?;
                if cid.codec() == u64::from(IpldCodec::DagPb) {
                    if let Some(UnixFsView::File(file)) = UnixFsView::classify(&block)? {
                        push_file_chunks(&file, range, &mut children);
                    }
                }
                // raw leaves are fully consumed by the load itself
            }
            Step::ShardBlock { cid } => {
                let block = loader.load(&cid).await?;
                if let Some(UnixFsView::Shard { links, pad }) = UnixFsView::classify(&block)? {
                    for link in &links {
                        if is_sub_shard(link, pad) {
                            children.push(Step::ShardBlock { cid: link.cid });
                        }
                    }
                }
            }
            Step::ShardLookup {
                cid,
                name,
                sel,
                path,
            } => {
                let block = loader.load(&cid).await?;
                if let Some(UnixFsView::Shard { links, pad }) = UnixFsView::classify(&block)? {
                    shard_lookup(&links, pad, &name, &sel, &path, &mut children);
                }
            }
        }
        stack.extend(children.into_iter().rev());
    }

    Ok(last_path)
}

/// The enclosing explore-recursive, for resolving recursive edges.
struct Recursion<'a> {
    limit: Option<u64>,
    sequence: &'a Selector,
}

fn eval(
    node: &Ipld,
    block: Option<&Bytes>,
    codec: u64,
    sel: &Selector,
    path: &Path,
    recursion: Option<&Recursion<'_>>,
    out: &mut Vec<Step>,
) -> Result<(), Error> {
    match sel {
        // a bare matcher consumes nothing; byte consumption only happens
        // through a UnixFS view below
        Selector::Matcher { .. } => {}
        Selector::ExploreRecursiveEdge => {}
        Selector::ExploreUnion { members } => {
            for member in members {
                eval(node, block, codec, member, path, recursion, out)?;
            }
        }
        Selector::ExploreInterpretAs { adl, next } if adl == "unixfs" => {
            eval_unixfs(node, block, codec, next, path, out)?;
        }
        Selector::ExploreInterpretAs { next, .. } => {
            eval(node, block, codec, next, path, recursion, out)?;
        }
        Selector::ExploreRecursive { limit, sequence } => {
            let recursion = Recursion {
                limit: *limit,
                sequence: sequence.as_ref(),
            };
            eval(node, block, codec, sequence, path, Some(&recursion), out)?;
        }
        Selector::ExploreAll { next } => {
            for (segment, child) in children_of(node) {
                if let Some(interest) = resolve_interest(next, recursion) {
                    push_child(child, codec, interest, path.child(segment), out);
                }
            }
        }
        Selector::ExploreFields { fields } => {
            for (name, field_sel) in fields {
                if let Some((segment, child)) = lookup_field(node, name) {
                    if let Some(interest) = resolve_interest(field_sel, recursion) {
                        push_child(child, codec, interest, path.child(segment), out);
                    }
                }
            }
        }
    }
    Ok(())
}

/// Evaluate a selector against the UnixFS reinterpretation of a node.
fn eval_unixfs(
    node: &Ipld,
    block: Option<&Bytes>,
    codec: u64,
    inner: &Selector,
    path: &Path,
    out: &mut Vec<Step>,
) -> Result<(), Error> {
    let view = if codec == u64::from(IpldCodec::DagPb) {
        match block {
            Some(block) => UnixFsView::classify(block)?,
            None => None,
        }
    } else if codec == u64::from(IpldCodec::Raw) {
        // a raw leaf is a single-chunk file whose bytes are already here
        Some(UnixFsView::File(FileNode {
            inline_len: block.map(|b| b.len() as u64).unwrap_or(0),
            chunks: Vec::new(),
            blocksizes: Vec::new(),
            filesize: None,
        }))
    } else {
        None
    };

    let Some(view) = view else {
        // nothing to reinterpret; continue on the plain node
        return eval(node, block, codec, inner, path, None, out);
    };

    match view {
        UnixFsView::File(file) => {
            // a match against a file reads through its bytes, which is
            // what pulls the chunk blocks in depth-first order
            if let Some(subset) = find_matcher(inner) {
                let range = match subset {
                    None => None,
                    Some(_) => {
                        let (from, to) = resolve_range(subset, file.size());
                        if from >= to {
                            return Ok(());
                        }
                        Some((from, to))
                    }
                };
                push_file_chunks(&file, range, out);
            }
        }
        UnixFsView::Directory(links) => {
            for_each_arm(inner, &mut |arm| {
                if let Selector::ExploreFields { fields } = arm {
                    for (name, field_sel) in fields {
                        if let Some(link) = links
                            .iter()
                            .find(|link| link.name.as_deref() == Some(name.as_str()))
                        {
                            out.push(Step::Load {
                                cid: link.cid,
                                sel: field_sel.clone(),
                                path: path.child(name.as_str().into()),
                            });
                        }
                    }
                }
                // a matcher, or depth-limited recursion, covers the entry
                // enumeration only; entry targets are not loaded
            });
        }
        UnixFsView::Shard { links, pad } => {
            for_each_arm(inner, &mut |arm| match arm {
                Selector::ExploreFields { fields } => {
                    for (name, field_sel) in fields {
                        shard_lookup(&links, pad, name, field_sel, path, out);
                    }
                }
                Selector::ExploreRecursive { .. } | Selector::ExploreAll { .. } => {
                    // enumerating one level of a sharded directory means
                    // walking its whole shard substrate
                    for link in &links {
                        if is_sub_shard(link, pad) {
                            out.push(Step::ShardBlock { cid: link.cid });
                        }
                    }
                }
                _ => {}
            });
        }
    }
    Ok(())
}

/// Find an entry in a shard by name, descending into sub-shards in link
/// order when this shard does not hold it.
fn shard_lookup(
    links: &[PbLink],
    pad: usize,
    name: &str,
    sel: &Selector,
    path: &Path,
    out: &mut Vec<Step>,
) {
    if let Some(link) = links
        .iter()
        .find(|link| shard_entry_name(link, pad) == Some(name))
    {
        out.push(Step::Load {
            cid: link.cid,
            sel: sel.clone(),
            path: path.child(name.into()),
        });
        return;
    }
    for link in links {
        if is_sub_shard(link, pad) {
            out.push(Step::ShardLookup {
                cid: link.cid,
                name: name.to_string(),
                sel: sel.clone(),
                path: path.clone(),
            });
        }
    }
}

/// Push loads for the chunks of `file` overlapping `range`, child ranges
/// made relative. Without per-chunk spans a ranged read degrades to a full
/// read.
fn push_file_chunks(file: &FileNode, range: Option<(u64, u64)>, out: &mut Vec<Step>) {
    match range {
        Some((from, to)) if file.has_spans() => {
            let mut offset = file.inline_len;
            for (cid, size) in file.chunks.iter().zip(&file.blocksizes) {
                let (start, end) = (offset, offset + size);
                offset = end;
                if end <= from || start >= to {
                    continue;
                }
                let child_from = from.saturating_sub(start);
                let child_to = (to - start).min(*size);
                out.push(Step::FileChunk {
                    cid: *cid,
                    range: Some((child_from, child_to)),
                });
            }
        }
        _ => {
            for cid in &file.chunks {
                out.push(Step::FileChunk {
                    cid: *cid,
                    range: None,
                });
            }
        }
    }
}

/// Resolve a subset matcher against a file size: negative offsets count
/// from the end, ends clamp to the size, and the result never inverts.
fn resolve_range(subset: Option<(i64, i64)>, size: u64) -> (u64, u64) {
    let Some((from, to)) = subset else {
        return (0, size);
    };
    let size = size as i64;
    let from = if from < 0 {
        (size + from).max(0)
    } else {
        from.min(size)
    };
    let to = if to < 0 { (size + to).max(0) } else { to.min(size) };
    (from as u64, to.max(from) as u64)
}

fn resolve_interest(sel: &Selector, recursion: Option<&Recursion<'_>>) -> Option<Selector> {
    match sel {
        Selector::ExploreRecursiveEdge => {
            let recursion = recursion?;
            match recursion.limit {
                None => Some(Selector::ExploreRecursive {
                    limit: None,
                    sequence: Box::new(recursion.sequence.clone()),
                }),
                Some(depth) if depth >= 2 => Some(Selector::ExploreRecursive {
                    limit: Some(depth - 1),
                    sequence: Box::new(recursion.sequence.clone()),
                }),
                // the edge would recurse past the depth limit
                Some(_) => None,
            }
        }
        other => Some(other.clone()),
    }
}

fn push_child(child: &Ipld, parent_codec: u64, sel: Selector, path: Path, out: &mut Vec<Step>) {
    match child {
        Ipld::Link(cid) => out.push(Step::Load {
            cid: *cid,
            sel,
            path,
        }),
        node => out.push(Step::Visit {
            node: node.clone(),
            block: None,
            codec: parent_codec,
            sel,
            path,
        }),
    }
}

fn children_of(node: &Ipld) -> Vec<(PathSegment, &Ipld)> {
    match node {
        Ipld::Map(map) => map
            .iter()
            .map(|(key, value)| (PathSegment::from(key.as_str()), value))
            .collect(),
        Ipld::List(list) => list
            .iter()
            .enumerate()
            .map(|(index, value)| (PathSegment::from(index), value))
            .collect(),
        _ => Vec::new(),
    }
}

fn lookup_field<'a>(node: &'a Ipld, name: &str) -> Option<(PathSegment, &'a Ipld)> {
    match node {
        Ipld::Map(map) => map.get(name).map(|value| (PathSegment::from(name), value)),
        Ipld::List(list) => {
            let index: usize = name.parse().ok()?;
            list.get(index).map(|value| (PathSegment::from(index), value))
        }
        _ => None,
    }
}

fn for_each_arm<'s>(sel: &'s Selector, f: &mut impl FnMut(&'s Selector)) {
    match sel {
        Selector::ExploreUnion { members } => {
            for member in members {
                for_each_arm(member, f);
            }
        }
        other => f(other),
    }
}

fn find_matcher(sel: &Selector) -> Option<Option<(i64, i64)>> {
    let mut found = None;
    for_each_arm(sel, &mut |arm| {
        if found.is_none() {
            if let Selector::Matcher { subset } = arm {
                found = Some(*subset);
            }
        }
    });
    found
}

fn decode_block(cid: &Cid, data: &Bytes) -> Result<Ipld, Error> {
    let codec =
        IpldCodec::try_from(cid.codec()).map_err(|_| Error::UnsupportedCodec { cid: *cid })?;
    <Ipld as Decode<IpldCodec>>::decode(codec, &mut Cursor::new(data.as_ref()))
        .map_err(Error::parsing)
}
