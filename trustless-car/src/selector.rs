//! Construction of the IPLD selectors used by the Trustless Gateway
//! protocol.
//!
//! Selectors are data, not code: each builder returns an [`Ipld`] tree in
//! the canonical selector schema, so that the DAG-JSON encoding of a
//! request's selector is deterministic and comparable byte-for-byte.
//! [`compile`] turns such a tree into the executable form used by the CAR
//! verifier.

use crate::error::Error;
use crate::path::Path;
use libipld::Ipld;
use std::collections::BTreeMap;

fn single(key: &str, value: Ipld) -> Ipld {
    Ipld::Map(BTreeMap::from([(key.to_string(), value)]))
}

fn empty_map() -> Ipld {
    Ipld::Map(BTreeMap::new())
}

/// A matcher: match the node itself, no recursion.
pub fn matcher() -> Ipld {
    single(".", empty_map())
}

/// A matcher over a byte subset of the node, `from` inclusive to `to`
/// exclusive.
pub fn matcher_subset(from: i64, to: i64) -> Ipld {
    single(
        ".",
        single(
            "subset",
            Ipld::Map(BTreeMap::from([
                ("[".to_string(), Ipld::Integer(from as i128)),
                ("]".to_string(), Ipld::Integer(to as i128)),
            ])),
        ),
    )
}

/// The recursion point within an explore-recursive selector.
pub fn explore_recursive_edge() -> Ipld {
    single("@", empty_map())
}

/// Explore all children of the node with `next`.
pub fn explore_all(next: Ipld) -> Ipld {
    single("a", single(">", next))
}

/// Explore recursively with `sequence`, to `limit` depth or without limit
/// when `None`.
pub fn explore_recursive(limit: Option<u64>, sequence: Ipld) -> Ipld {
    let limit = match limit {
        None => single("none", empty_map()),
        Some(depth) => single("depth", Ipld::Integer(depth as i128)),
    };
    single(
        "R",
        Ipld::Map(BTreeMap::from([
            (":>".to_string(), sequence),
            ("l".to_string(), limit),
        ])),
    )
}

/// Explore the union of several selectors over the same node.
pub fn explore_union(members: Vec<Ipld>) -> Ipld {
    single("|", Ipld::List(members))
}

/// Reinterpret the node through the named ADL before exploring with `next`.
pub fn explore_interpret_as(adl: &str, next: Ipld) -> Ipld {
    single(
        "~",
        Ipld::Map(BTreeMap::from([
            (">".to_string(), next),
            ("as".to_string(), Ipld::String(adl.to_string())),
        ])),
    )
}

/// Explore the named fields of the node, each with its own selector.
pub fn explore_fields(fields: Vec<(String, Ipld)>) -> Ipld {
    single(
        "f",
        single("f>", Ipld::Map(fields.into_iter().collect())),
    )
}

/// Explore the entire DAG below the node, without depth limit.
pub fn explore_all_recursively() -> Ipld {
    explore_recursive(None, explore_all(explore_recursive_edge()))
}

/// Match a UnixFS entity: the bytes of a file, or one level of a directory
/// (including the full substrate of a sharded directory, but not the
/// entries' contents).
pub fn match_unixfs_entity() -> Ipld {
    explore_interpret_as(
        "unixfs",
        explore_union(vec![
            matcher(),
            explore_recursive(Some(1), explore_all(explore_recursive_edge())),
        ]),
    )
}

/// Wrap `terminal` in UnixFS field exploration for each segment of `path`,
/// innermost last. An empty path returns the terminal unchanged.
pub fn unixfs_path_selector(path: &Path, terminal: Ipld) -> Ipld {
    let mut selector = terminal;
    for segment in path.iter().rev() {
        selector = explore_interpret_as(
            "unixfs",
            explore_fields(vec![(segment.as_str().to_string(), selector)]),
        );
    }
    selector
}

/// The executable form of a selector tree, limited to the family of
/// selectors this protocol emits.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Selector {
    Matcher {
        subset: Option<(i64, i64)>,
    },
    ExploreAll {
        next: Box<Selector>,
    },
    ExploreRecursive {
        limit: Option<u64>,
        sequence: Box<Selector>,
    },
    ExploreRecursiveEdge,
    ExploreFields {
        fields: Vec<(String, Selector)>,
    },
    ExploreUnion {
        members: Vec<Selector>,
    },
    ExploreInterpretAs {
        adl: String,
        next: Box<Selector>,
    },
}

/// Compile a selector node into its executable form.
pub(crate) fn compile(node: &Ipld) -> Result<Selector, Error> {
    let invalid = |msg: &str| Error::InvalidSelector(msg.to_string());
    let Ipld::Map(map) = node else {
        return Err(invalid("selector must be a map"));
    };
    if map.len() != 1 {
        return Err(invalid("selector must have exactly one key"));
    }
    let (key, body) = map.iter().next().expect("len checked above");
    match key.as_str() {
        "." => {
            let subset = match body {
                Ipld::Map(m) => match m.get("subset") {
                    None => None,
                    Some(Ipld::Map(s)) => {
                        let from = int_field(s, "[").ok_or_else(|| invalid("subset needs [ and ]"))?;
                        let to = int_field(s, "]").ok_or_else(|| invalid("subset needs [ and ]"))?;
                        Some((from, to))
                    }
                    Some(_) => return Err(invalid("subset must be a map")),
                },
                _ => return Err(invalid("matcher body must be a map")),
            };
            Ok(Selector::Matcher { subset })
        }
        "a" => {
            let next = map_field(body, ">").ok_or_else(|| invalid("explore-all needs >"))?;
            Ok(Selector::ExploreAll {
                next: Box::new(compile(next)?),
            })
        }
        "R" => {
            let Ipld::Map(body) = body else {
                return Err(invalid("explore-recursive body must be a map"));
            };
            let sequence = body
                .get(":>")
                .ok_or_else(|| invalid("explore-recursive needs :>"))?;
            let limit = match body.get("l") {
                Some(Ipld::Map(l)) => {
                    if l.contains_key("none") {
                        None
                    } else if let Some(depth) = int_field(l, "depth") {
                        Some(depth as u64)
                    } else {
                        return Err(invalid("unknown recursion limit"));
                    }
                }
                _ => return Err(invalid("explore-recursive needs l")),
            };
            Ok(Selector::ExploreRecursive {
                limit,
                sequence: Box::new(compile(sequence)?),
            })
        }
        "@" => Ok(Selector::ExploreRecursiveEdge),
        "f" => {
            let fields = map_field(body, "f>").ok_or_else(|| invalid("explore-fields needs f>"))?;
            let Ipld::Map(fields) = fields else {
                return Err(invalid("f> must be a map"));
            };
            let fields = fields
                .iter()
                .map(|(name, sel)| Ok((name.clone(), compile(sel)?)))
                .collect::<Result<Vec<_>, Error>>()?;
            Ok(Selector::ExploreFields { fields })
        }
        "|" => {
            let Ipld::List(members) = body else {
                return Err(invalid("explore-union body must be a list"));
            };
            let members = members.iter().map(compile).collect::<Result<Vec<_>, _>>()?;
            Ok(Selector::ExploreUnion { members })
        }
        "~" => {
            let Ipld::Map(body) = body else {
                return Err(invalid("interpret-as body must be a map"));
            };
            let next = body.get(">").ok_or_else(|| invalid("interpret-as needs >"))?;
            let Some(Ipld::String(adl)) = body.get("as") else {
                return Err(invalid("interpret-as needs as"));
            };
            Ok(Selector::ExploreInterpretAs {
                adl: adl.clone(),
                next: Box::new(compile(next)?),
            })
        }
        other => Err(Error::InvalidSelector(format!(
            "unknown selector key {other:?}"
        ))),
    }
}

fn map_field<'a>(body: &'a Ipld, key: &str) -> Option<&'a Ipld> {
    match body {
        Ipld::Map(m) => m.get(key),
        _ => None,
    }
}

fn int_field(map: &BTreeMap<String, Ipld>, key: &str) -> Option<i64> {
    match map.get(key) {
        Some(Ipld::Integer(i)) => Some(*i as i64),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{ByteRange, DagScope, Request};
    use libipld::{cid::Cid, json::DagJsonCodec};
    use libipld_core::codec::Encode;

    fn to_dag_json(selector: &Ipld) -> String {
        let mut bytes = Vec::new();
        selector.encode(DagJsonCodec, &mut bytes).unwrap();
        String::from_utf8(bytes).unwrap()
    }

    const MATCH_UNIXFS_ENTITY: &str = r#"{"~":{">":{"|":[{".":{}},{"R":{":>":{"a":{">":{"@":{}}}},"l":{"depth":1}}}]},"as":"unixfs"}}"#;
    const EXPLORE_ALL: &str = r#"{"R":{":>":{"a":{">":{"@":{}}}},"l":{"none":{}}}}"#;
    const MATCH_POINT: &str = r#"{".":{}}"#;

    fn entity_slice(from: i64, to: i64) -> String {
        format!(
            r#"{{"~":{{">":{{"|":[{{".":{{"subset":{{"[":{from},"]":{to}}}}}}},{{"R":{{":>":{{"a":{{">":{{"@":{{}}}}}}}},"l":{{"depth":1}}}}}}]}},"as":"unixfs"}}}}"#
        )
    }

    fn json_fields(target: &str, fields: &[&str]) -> String {
        let mut out = String::new();
        for name in fields {
            out.push_str(&format!(r#"{{"~":{{">":{{"f":{{"f>":{{"{name}":"#));
        }
        out.push_str(target);
        out.push_str(&r#"}}},"as":"unixfs"}}"#.repeat(fields.len()));
        out
    }

    fn request(path: &str, scope: DagScope, bytes: Option<ByteRange>) -> Request {
        let root =
            Cid::try_from("bafybeigdyrzt5sfp7udm7hu76uh7y26nf3efuylqabf3oclgtqy55fbzdi").unwrap();
        Request {
            path: crate::path::Path::parse(path),
            scope,
            bytes,
            ..Request::new(root)
        }
    }

    #[test]
    fn scope_selectors() {
        let cases: &[(Request, String)] = &[
            (request("", DagScope::All, None), EXPLORE_ALL.to_string()),
            (
                request("", DagScope::Entity, None),
                MATCH_UNIXFS_ENTITY.to_string(),
            ),
            (request("", DagScope::Block, None), MATCH_POINT.to_string()),
            (
                request("foo/bar/baz", DagScope::All, None),
                json_fields(EXPLORE_ALL, &["foo", "bar", "baz"]),
            ),
            (
                request("foo/bar/baz", DagScope::Entity, None),
                json_fields(MATCH_UNIXFS_ENTITY, &["foo", "bar", "baz"]),
            ),
            (
                request("foo/bar/baz", DagScope::Block, None),
                json_fields(MATCH_POINT, &["foo", "bar", "baz"]),
            ),
        ];
        for (request, expected) in cases {
            assert_eq!(&to_dag_json(&request.selector()), expected);
        }
    }

    #[test]
    fn byte_range_selectors() {
        // inclusive end becomes exclusive
        let req = request(
            "",
            DagScope::Entity,
            Some(ByteRange { from: 100, to: Some(200) }),
        );
        assert_eq!(to_dag_json(&req.selector()), entity_slice(100, 201));

        // open end becomes i64::MAX
        let req = request("", DagScope::Entity, Some(ByteRange { from: 101, to: None }));
        assert_eq!(
            to_dag_json(&req.selector()),
            entity_slice(101, i64::MAX)
        );

        // negative end passes through unchanged
        let req = request(
            "foo/bar/baz",
            DagScope::Entity,
            Some(ByteRange { from: -100, to: Some(-200) }),
        );
        assert_eq!(
            to_dag_json(&req.selector()),
            json_fields(&entity_slice(-100, -200), &["foo", "bar", "baz"])
        );

        // a byte range is ignored for non-entity scopes
        let req = request("", DagScope::All, Some(ByteRange { from: 100, to: Some(200) }));
        assert_eq!(to_dag_json(&req.selector()), EXPLORE_ALL);
        let req = request(
            "",
            DagScope::Block,
            Some(ByteRange { from: 100, to: Some(200) }),
        );
        assert_eq!(to_dag_json(&req.selector()), MATCH_POINT);
    }

    #[test]
    fn selector_is_deterministic() {
        let a = request("foo/bar", DagScope::Entity, Some(ByteRange { from: 1, to: Some(2) }));
        let b = request("foo/bar", DagScope::Entity, Some(ByteRange { from: 1, to: Some(2) }));
        assert_eq!(to_dag_json(&a.selector()), to_dag_json(&b.selector()));
    }

    #[test]
    fn compile_roundtrips_the_protocol_family() {
        for selector in [
            explore_all_recursively(),
            match_unixfs_entity(),
            matcher(),
            matcher_subset(100, 201),
            request("foo/bar", DagScope::Entity, Some(ByteRange { from: 0, to: Some(1) }))
                .selector(),
        ] {
            compile(&selector).unwrap();
        }
    }

    #[test]
    fn compile_rejects_unknown_selectors() {
        assert!(matches!(
            compile(&single("x", empty_map())),
            Err(Error::InvalidSelector(_))
        ));
        assert!(matches!(
            compile(&Ipld::Integer(1)),
            Err(Error::InvalidSelector(_))
        ));
    }

    #[test]
    fn compiled_shape() {
        let sel = compile(&match_unixfs_entity()).unwrap();
        let Selector::ExploreInterpretAs { adl, next } = sel else {
            panic!("expected interpret-as, got {sel:?}");
        };
        assert_eq!(adl, "unixfs");
        let Selector::ExploreUnion { members } = *next else {
            panic!("expected union");
        };
        assert_eq!(members[0], Selector::Matcher { subset: None });
    }
}
