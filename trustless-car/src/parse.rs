//! Parsing of the HTTP surface of the Trustless Gateway protocol: the
//! `/ipfs/<cid>[/path]` URL form, the `dag-scope`, `entity-bytes`,
//! `format` and `filename` query parameters and the `Accept` and
//! `Content-Type` headers with their IPIP-412 parameters.

use crate::{
    content_type::{
        ContentType, ContentTypeOrder, FILENAME_EXT_CAR, FILENAME_EXT_RAW, FORMAT_PARAMETER_CAR,
        FORMAT_PARAMETER_RAW, MIME_TYPE_APPLICATION_WILDCARD, MIME_TYPE_CAR,
        MIME_TYPE_CAR_VERSION, MIME_TYPE_RAW, MIME_TYPE_WILDCARD,
    },
    error::ParseError,
    path::Path,
    request::{ByteRange, DagScope},
};
use libipld::Cid;
use std::cmp::Ordering;

fn query_param<B>(req: &http::Request<B>, name: &str) -> Option<String> {
    let query = req.uri().query()?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

/// Parse the "dag-scope" query parameter. A missing parameter is the
/// default scope, [`DagScope::All`].
pub fn parse_scope<B>(req: &http::Request<B>) -> Result<DagScope, ParseError> {
    match query_param(req, "dag-scope") {
        Some(scope) => scope.parse(),
        None => Ok(DagScope::All),
    }
}

/// Parse the "entity-bytes" query parameter, or `None` when absent.
pub fn parse_byte_range<B>(req: &http::Request<B>) -> Result<Option<ByteRange>, ParseError> {
    match query_param(req, "entity-bytes") {
        Some(range) => Ok(Some(range.parse()?)),
        None => Ok(None),
    }
}

/// Parse the "filename" query parameter, or `None` when absent.
///
/// The filename must carry an extension matching one of the accepted
/// response types: ".car" when a CAR content type is accepted, ".bin" when
/// the raw type is.
pub fn parse_filename<B>(
    req: &http::Request<B>,
    accepts: &[ContentType],
) -> Result<Option<String>, ParseError> {
    let Some(filename) = query_param(req, "filename") else {
        return Ok(None);
    };
    let ext = filename
        .rfind('.')
        .map(|at| &filename[at..])
        .unwrap_or_default();
    if ext.is_empty() {
        return Err(ParseError::FilenameMissingExtension);
    }
    match ext {
        FILENAME_EXT_CAR => {
            if !accepts.iter().any(ContentType::is_car) {
                return Err(ParseError::CarFilenameMismatch);
            }
        }
        FILENAME_EXT_RAW => {
            if !accepts.iter().any(ContentType::is_raw) {
                return Err(ParseError::RawFilenameMismatch);
            }
        }
        other => return Err(ParseError::FilenameUnsupportedExtension(other.to_string())),
    }
    Ok(Some(filename))
}

/// Decide the response content types for a request, in preference order.
///
/// The `Accept` header takes precedence over the "format" query parameter,
/// except that wildcard accepts (`*/*`, `application/*`) are treated as
/// carrying no preference and defer to "format". When "format" promotes a
/// wildcard accept to a CAR response, the wildcard's IPIP-412 parameters
/// are inherited.
pub fn check_format<B>(req: &http::Request<B>) -> Result<Vec<ContentType>, ParseError> {
    let format = query_param(req, "format").unwrap_or_default();
    match format.as_str() {
        "" | FORMAT_PARAMETER_CAR | FORMAT_PARAMETER_RAW => {}
        other => return Err(ParseError::InvalidFormat(other.to_string())),
    }

    let accept_header = req
        .headers()
        .get(http::header::ACCEPT)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    let mut accepts = Vec::new();
    if !accept_header.is_empty() {
        accepts = parse_accept(accept_header);
        if accepts.is_empty() {
            // An unusable Accept header can still be rescued by an explicit
            // format parameter.
            return match format.as_str() {
                FORMAT_PARAMETER_CAR => {
                    Ok(vec![ContentType::default().with_mime(MIME_TYPE_CAR)])
                }
                FORMAT_PARAMETER_RAW => {
                    Ok(vec![ContentType::default().with_mime(MIME_TYPE_RAW)])
                }
                _ => Err(ParseError::InvalidAccept(accept_header.to_string())),
            };
        }
    }

    let wildcard_preference = accepts
        .first()
        .map(|accept| {
            accept.mime == MIME_TYPE_WILDCARD || accept.mime == MIME_TYPE_APPLICATION_WILDCARD
        })
        .unwrap_or(false);

    if !accepts.is_empty() && !wildcard_preference {
        return Ok(accepts);
    }

    match format.as_str() {
        FORMAT_PARAMETER_CAR => {
            for accept in &accepts {
                if accept.is_car() {
                    return Ok(vec![accept.clone().with_mime(MIME_TYPE_CAR)]);
                }
            }
            return Ok(vec![ContentType::default().with_mime(MIME_TYPE_CAR)]);
        }
        FORMAT_PARAMETER_RAW => {
            return Ok(vec![ContentType::default().with_mime(MIME_TYPE_RAW)]);
        }
        _ => {}
    }

    if !accepts.is_empty() {
        return Ok(accepts);
    }

    Err(ParseError::MissingFormat)
}

/// Parse an `Accept` header into content types, invalid entries dropped,
/// sorted by descending quality. The sort is stable, so equal qualities
/// keep their header order.
pub fn parse_accept(accept_header: &str) -> Vec<ContentType> {
    let mut accepts: Vec<ContentType> = accept_header
        .split(',')
        .filter_map(|entry| parse_content_type_inner(entry, false))
        .collect();
    accepts.sort_by(|a, b| {
        b.quality
            .partial_cmp(&a.quality)
            .unwrap_or(Ordering::Equal)
    });
    accepts
}

/// Parse a `Content-Type` header strictly: only the CAR and raw media
/// types are accepted, with no wildcards and no comma-separated lists.
pub fn parse_content_type(header: &str) -> Option<ContentType> {
    parse_content_type_inner(header, true)
}

fn parse_content_type_inner(header: &str, strict: bool) -> Option<ContentType> {
    let mut parts = header.split(';');
    let mime = parts.next().unwrap_or_default().trim();
    let wildcard = mime == MIME_TYPE_WILDCARD || mime == MIME_TYPE_APPLICATION_WILDCARD;
    if !(mime == MIME_TYPE_CAR || mime == MIME_TYPE_RAW || (!strict && wildcard)) {
        return None;
    }
    let mut content_type = ContentType::default().with_mime(mime);
    for part in parts {
        let pair: Vec<&str> = part.split('=').collect();
        if pair.len() != 2 {
            continue;
        }
        let (attr, value) = (pair[0].trim(), pair[1].trim());
        if mime == MIME_TYPE_CAR {
            match attr {
                "dups" => match value {
                    "y" => content_type.duplicates = true,
                    "n" => content_type.duplicates = false,
                    _ => return None,
                },
                "version" => {
                    if value != MIME_TYPE_CAR_VERSION {
                        return None;
                    }
                }
                "order" => match value {
                    "dfs" => content_type.order = ContentTypeOrder::Dfs,
                    "unk" => content_type.order = ContentTypeOrder::Unk,
                    // only dfs is produced, and dfs also satisfies unk;
                    // anything else is from the future
                    _ => return None,
                },
                _ => {} // unknown keys are ignored
            }
        }
        if attr == "q" {
            let quality: f32 = value.parse().ok()?;
            if !(0.0..=1.0).contains(&quality) {
                return None;
            }
            content_type.quality = quality;
        }
    }
    Some(content_type)
}

/// Parse an incoming Trustless Gateway URL path of the form
/// `/ipfs/<cid>[/<path>]` into the root CID and the residual path.
pub fn parse_url_path(url_path: &str) -> Result<(Cid, Path), ParseError> {
    let path = Path::parse(url_path);
    let Some((prefix, path)) = path.shift() else {
        return Err(ParseError::PathNotFound);
    };
    if prefix.as_str() != "ipfs" {
        return Err(ParseError::PathNotFound);
    }
    let Some((cid_segment, path)) = path.shift() else {
        return Err(ParseError::PathNotFound);
    };
    let root = Cid::try_from(cid_segment.as_str()).map_err(|_| ParseError::BadCid)?;
    Ok((root, path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content_type::MIME_TYPE_RAW;

    fn request(query: &str, accept: Option<&str>) -> http::Request<()> {
        let uri = if query.is_empty() {
            "/".to_string()
        } else {
            format!("/?{query}")
        };
        let mut builder = http::Request::builder().uri(uri);
        if let Some(accept) = accept {
            builder = builder.header(http::header::ACCEPT, accept);
        }
        builder.body(()).unwrap()
    }

    fn test_cid_v1() -> Cid {
        Cid::try_from("bafybeigdyrzt5sfp7udm7hu76uh7y26nf3efuylqabf3oclgtqy55fbzdi").unwrap()
    }

    #[test]
    fn scope() {
        assert_eq!(parse_scope(&request("", None)).unwrap(), DagScope::All);
        assert_eq!(
            parse_scope(&request("dag-scope=all", None)).unwrap(),
            DagScope::All
        );
        assert_eq!(
            parse_scope(&request("dag-scope=entity", None)).unwrap(),
            DagScope::Entity
        );
        assert_eq!(
            parse_scope(&request("dag-scope=block", None)).unwrap(),
            DagScope::Block
        );
        assert_eq!(
            parse_scope(&request("dag-scope=bork", None)),
            Err(ParseError::InvalidDagScope("bork".to_string()))
        );
    }

    #[test]
    fn byte_range() {
        assert_eq!(parse_byte_range(&request("", None)).unwrap(), None);
        assert_eq!(
            parse_byte_range(&request("entity-bytes=0:0", None)).unwrap(),
            Some(ByteRange { from: 0, to: Some(0) })
        );
        assert_eq!(
            parse_byte_range(&request("entity-bytes=101:*", None)).unwrap(),
            Some(ByteRange { from: 101, to: None })
        );
        assert_eq!(
            parse_byte_range(&request("entity-bytes=-101:-202", None)).unwrap(),
            Some(ByteRange { from: -101, to: Some(-202) })
        );
        assert!(parse_byte_range(&request("entity-bytes=0", None)).is_err());
        assert!(parse_byte_range(&request("entity-bytes=bork", None)).is_err());
    }

    #[test]
    fn filename() {
        let car_accepts = vec![ContentType::default()];
        let raw_accepts = vec![ContentType::default().with_mime(MIME_TYPE_RAW)];
        let both = vec![
            ContentType::default(),
            ContentType::default().with_mime(MIME_TYPE_RAW),
        ];

        assert_eq!(parse_filename(&request("", None), &car_accepts).unwrap(), None);
        assert_eq!(
            parse_filename(&request("filename=boop.car", None), &car_accepts).unwrap(),
            Some("boop.car".to_string())
        );
        assert_eq!(
            parse_filename(&request("filename=boop.bin", None), &raw_accepts).unwrap(),
            Some("boop.bin".to_string())
        );
        assert_eq!(
            parse_filename(&request("filename=boop.car", None), &both).unwrap(),
            Some("boop.car".to_string())
        );
        assert_eq!(
            parse_filename(&request("filename=boop.bin", None), &both).unwrap(),
            Some("boop.bin".to_string())
        );
        assert_eq!(
            parse_filename(&request("filename=", None), &car_accepts),
            Err(ParseError::FilenameMissingExtension)
        );
        assert_eq!(
            parse_filename(&request("filename=bork", None), &car_accepts),
            Err(ParseError::FilenameMissingExtension)
        );
        assert_eq!(
            parse_filename(&request("filename=bork.exe", None), &car_accepts),
            Err(ParseError::FilenameUnsupportedExtension(".exe".to_string()))
        );
        assert_eq!(
            parse_filename(&request("filename=boop.car", None), &raw_accepts),
            Err(ParseError::CarFilenameMismatch)
        );
        assert_eq!(
            parse_filename(&request("filename=boop.bin", None), &car_accepts),
            Err(ParseError::RawFilenameMismatch)
        );
    }

    #[test]
    fn check_format_precedence() {
        let default_car = ContentType::default();
        let default_raw = ContentType::default().with_mime(MIME_TYPE_RAW);

        // neither provided
        assert_eq!(
            check_format(&request("", None)),
            Err(ParseError::MissingFormat)
        );
        // bad format parameter always fails
        assert_eq!(
            check_format(&request("format=bop", None)),
            Err(ParseError::InvalidFormat("bop".to_string()))
        );
        assert_eq!(
            check_format(&request(
                "format=bop",
                Some("application/vnd.ipld.car; dups=y")
            )),
            Err(ParseError::InvalidFormat("bop".to_string()))
        );
        // format alone
        assert_eq!(
            check_format(&request("format=car", None)).unwrap(),
            vec![default_car.clone()]
        );
        assert_eq!(
            check_format(&request("format=raw", None)).unwrap(),
            vec![default_raw.clone()]
        );
        // accept alone
        assert_eq!(
            check_format(&request("", Some("application/vnd.ipld.car"))).unwrap(),
            vec![default_car.clone()]
        );
        assert_eq!(
            check_format(&request("", Some("application/vnd.ipld.raw"))).unwrap(),
            vec![default_raw.clone()]
        );
        assert_eq!(
            check_format(&request("", Some("application/vnd.ipld.raw; ignore; this"))).unwrap(),
            vec![default_raw.clone()]
        );
        assert_eq!(
            check_format(&request("", Some("application/vnd.ipld.car; dups=n"))).unwrap(),
            vec![default_car.clone().with_duplicates(false)]
        );
        // specific accept wins over format
        assert_eq!(
            check_format(&request(
                "format=raw",
                Some("application/vnd.ipld.car; dups=n")
            ))
            .unwrap(),
            vec![default_car.clone().with_duplicates(false)]
        );
        assert_eq!(
            check_format(&request("format=car", Some("application/vnd.ipld.raw"))).unwrap(),
            vec![default_raw.clone()]
        );
        // invalid accept falls back to format
        assert_eq!(
            check_format(&request(
                "format=car",
                Some("application/vnd.ipld.car; dups=YES!")
            ))
            .unwrap(),
            vec![default_car.clone()]
        );
        assert_eq!(
            check_format(&request(
                "format=raw",
                Some("application/vnd.ipld.car; dups=YES!")
            ))
            .unwrap(),
            vec![default_raw.clone()]
        );
        // invalid accept without format is an error
        assert_eq!(
            check_format(&request("", Some("text/html"))),
            Err(ParseError::InvalidAccept("text/html".to_string()))
        );
        // wildcards defer to format
        assert_eq!(
            check_format(&request("format=raw", Some("*/*"))).unwrap(),
            vec![default_raw.clone()]
        );
        assert_eq!(
            check_format(&request("format=car", Some("*/*"))).unwrap(),
            vec![default_car.clone()]
        );
        assert_eq!(
            check_format(&request("format=car", Some("application/*"))).unwrap(),
            vec![default_car.clone()]
        );
        // a wildcard accept is promoted to the CAR type; IPIP-412
        // parameters only ever apply to the CAR media type itself
        assert_eq!(
            check_format(&request("format=car", Some("*/*; dups=n"))).unwrap(),
            vec![default_car.clone()]
        );
        // wildcard without format is returned for the caller to default
        assert_eq!(
            check_format(&request("", Some("*/*"))).unwrap(),
            vec![default_car.clone().with_mime(MIME_TYPE_WILDCARD)]
        );
        // ordered list is preserved
        assert_eq!(
            check_format(&request(
                "",
                Some("application/vnd.ipld.raw, application/*, application/vnd.ipld.car; dups=y")
            ))
            .unwrap(),
            vec![
                default_raw.clone(),
                default_car.clone().with_mime(MIME_TYPE_APPLICATION_WILDCARD),
                default_car.clone(),
            ]
        );
    }

    #[test]
    fn content_type_strict() {
        assert_eq!(parse_content_type(""), None);
        assert_eq!(
            parse_content_type("application/vnd.ipld.car"),
            Some(ContentType::default())
        );
        assert_eq!(
            parse_content_type("application/vnd.ipld.raw"),
            Some(ContentType::default().with_mime(MIME_TYPE_RAW))
        );
        assert_eq!(parse_content_type("*/*"), None);
        assert_eq!(parse_content_type("application/*"), None);
        assert_eq!(
            parse_content_type("application/vnd.ipld.car; dups=n"),
            Some(ContentType::default().with_duplicates(false))
        );
        assert_eq!(
            parse_content_type("application/vnd.ipld.car; dups=n; bip; bop"),
            Some(ContentType::default().with_duplicates(false))
        );
        assert_eq!(
            parse_content_type("application/vnd.ipld.car; version=1; dups=n"),
            Some(ContentType::default().with_duplicates(false))
        );
        assert_eq!(parse_content_type("application/vnd.ipld.car; version=2; dups=n"), None);
        assert_eq!(
            parse_content_type("application/vnd.ipld.car; order=unk; dups=n"),
            Some(
                ContentType::default()
                    .with_duplicates(false)
                    .with_order(ContentTypeOrder::Unk)
            )
        );
        assert_eq!(parse_content_type("application/vnd.ipld.car; order=bork; dups=y"), None);
        assert_eq!(
            parse_content_type("application/vnd.ipld.car;version=1;dups=y;order=dfs;"),
            Some(ContentType::default())
        );
        assert_eq!(
            parse_content_type("application/vnd.ipld.car;;version=1; bip ;   dups=n ;bop;order=dfs;--"),
            Some(ContentType::default().with_duplicates(false))
        );
    }

    #[test]
    fn content_type_roundtrip() {
        for content_type in [
            ContentType::default(),
            ContentType::default().with_duplicates(false),
            ContentType::default().with_order(ContentTypeOrder::Unk),
            ContentType::default().with_quality(0.8),
            ContentType::default().with_mime(MIME_TYPE_RAW),
            ContentType::default().with_mime(MIME_TYPE_RAW).with_quality(0.25),
        ] {
            assert_eq!(
                parse_content_type(&content_type.to_string()),
                Some(content_type.clone()),
                "{content_type}"
            );
        }
    }

    #[test]
    fn accept_quality_ordering() {
        let accepts = parse_accept(
            "application/vnd.ipld.car;dups=n;order=unk;q=0.8, \
             text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.1, \
             application/vnd.ipld.car;dups=y;order=dfs;q=0.9 , \
             application/vnd.ipld.car, application/vnd.ipld.raw,\
             application/vnd.ipld.raw;q=0.1, \
             application/vnd.ipld.car;dups=y;order=unk;q=0.7, \
             application/vnd.ipld.car;dups=y;order=dfs;q=0.7",
        );
        let expected = vec![
            ContentType::default(),
            ContentType::default().with_mime(MIME_TYPE_RAW),
            ContentType::default().with_quality(0.9),
            ContentType::default()
                .with_duplicates(false)
                .with_order(ContentTypeOrder::Unk)
                .with_quality(0.8),
            ContentType::default()
                .with_order(ContentTypeOrder::Unk)
                .with_quality(0.7),
            ContentType::default().with_quality(0.7),
            ContentType::default().with_mime(MIME_TYPE_WILDCARD).with_quality(0.1),
            ContentType::default().with_mime(MIME_TYPE_RAW).with_quality(0.1),
        ];
        assert_eq!(accepts, expected);
    }

    #[test]
    fn accept_invalid_entries_dropped() {
        assert_eq!(parse_accept(""), vec![]);
        assert_eq!(parse_accept("application/vnd.ipld.car; version=2"), vec![]);
        assert_eq!(parse_accept("application/vnd.ipld.car; q=bork"), vec![]);
        assert_eq!(parse_accept("application/vnd.ipld.car; q=-0.1"), vec![]);
        assert_eq!(parse_accept("application/vnd.ipld.car; q=1.1"), vec![]);
    }

    #[test]
    fn url_path() {
        let root = test_cid_v1();
        for (input, expected_path) in [
            (format!("/ipfs/{root}"), ""),
            (format!("/ipfs/{root}/"), ""),
            (format!("/ipfs/{root}///"), ""),
            (format!("/ipfs/{root}/foo/bar"), "foo/bar"),
            (format!("/ipfs/{root}//foo//bar///"), "foo/bar"),
        ] {
            let (cid, path) = parse_url_path(&input).unwrap();
            assert_eq!(cid, root, "{input}");
            assert_eq!(path.to_string(), expected_path, "{input}");
        }

        for input in ["", "/", "/ipld", "/ipfs", "/ipfs/"] {
            assert_eq!(parse_url_path(input), Err(ParseError::PathNotFound), "{input}");
        }
        for input in ["/ipfs/nope", "/ipfs/bafyfoo"] {
            assert_eq!(parse_url_path(input), Err(ParseError::BadCid), "{input}");
        }
    }
}
