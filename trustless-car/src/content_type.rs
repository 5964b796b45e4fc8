use std::fmt;
use url::Url;

/// The CAR media type.
pub const MIME_TYPE_CAR: &str = "application/vnd.ipld.car";
/// The raw block media type.
pub const MIME_TYPE_RAW: &str = "application/vnd.ipld.raw";
/// The full wildcard media type.
pub const MIME_TYPE_WILDCARD: &str = "*/*";
/// The application wildcard media type.
pub const MIME_TYPE_APPLICATION_WILDCARD: &str = "application/*";
/// The only accepted value for the CAR media type "version" parameter.
pub const MIME_TYPE_CAR_VERSION: &str = "1";
/// The "format" query parameter value selecting a CAR response.
pub const FORMAT_PARAMETER_CAR: &str = "car";
/// The "format" query parameter value selecting a raw block response.
pub const FORMAT_PARAMETER_RAW: &str = "raw";
/// The filename extension for CAR responses.
pub const FILENAME_EXT_CAR: &str = ".car";
/// The filename extension for raw block responses.
pub const FILENAME_EXT_RAW: &str = ".bin";
/// The default for an unspecified "dups" parameter, per IPIP-412.
pub const DEFAULT_INCLUDE_DUPES: bool = true;

/// The block order of a CAR response. Only depth-first order is produced;
/// "unk" is accepted from clients since depth-first also satisfies it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ContentTypeOrder {
    /// Depth-first order.
    #[default]
    Dfs,
    /// Unknown order.
    Unk,
}

impl ContentTypeOrder {
    /// The string form used in media type parameters.
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentTypeOrder::Dfs => "dfs",
            ContentTypeOrder::Unk => "unk",
        }
    }
}

impl fmt::Display for ContentTypeOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A content type descriptor for a Trustless Gateway request or response,
/// carrying the IPIP-412 CAR media type parameters.
///
/// The string form only carries `version`, `order` and `dups` for the CAR
/// media type; other media types carry at most a quality.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentType {
    /// The media type: CAR, raw, or (for `Accept` parsing only) a wildcard.
    pub mime: String,
    /// The block order of a CAR response.
    pub order: ContentTypeOrder,
    /// Whether duplicate blocks are included in a CAR response.
    pub duplicates: bool,
    /// The quality weight, in `[0, 1]`.
    pub quality: f32,
}

impl Default for ContentType {
    fn default() -> Self {
        Self {
            mime: MIME_TYPE_CAR.to_string(),
            order: ContentTypeOrder::Dfs,
            duplicates: DEFAULT_INCLUDE_DUPES,
            quality: 1.0,
        }
    }
}

impl ContentType {
    /// Whether this content type describes a CAR response. Wildcard accepts
    /// count as CAR here: a client that accepts anything can be served a
    /// CAR.
    pub fn is_car(&self) -> bool {
        self.mime == MIME_TYPE_CAR
            || self.mime == MIME_TYPE_WILDCARD
            || self.mime == MIME_TYPE_APPLICATION_WILDCARD
    }

    /// Whether this content type describes a raw block response.
    pub fn is_raw(&self) -> bool {
        self.mime == MIME_TYPE_RAW
    }

    /// This content type with a different media type.
    pub fn with_mime(mut self, mime: &str) -> Self {
        self.mime = mime.to_string();
        self
    }

    /// This content type with a different block order.
    pub fn with_order(mut self, order: ContentTypeOrder) -> Self {
        self.order = order;
        self
    }

    /// This content type with a different duplicates policy.
    pub fn with_duplicates(mut self, duplicates: bool) -> Self {
        self.duplicates = duplicates;
        self
    }

    /// This content type with a different quality weight.
    pub fn with_quality(mut self, quality: f32) -> Self {
        self.quality = quality;
        self
    }

    /// A `Content-Location` path and query for `request_url`, with a
    /// `format` query parameter appended when the URL does not already have
    /// one and this media type uniquely determines a format. Returns an
    /// empty string otherwise.
    pub fn content_location(&self, request_url: &str) -> String {
        let format = match self.mime.as_str() {
            MIME_TYPE_CAR => FORMAT_PARAMETER_CAR,
            MIME_TYPE_RAW => FORMAT_PARAMETER_RAW,
            _ => return String::new(),
        };
        let url = match Url::parse(request_url) {
            Ok(url) => url,
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                match Url::parse("http://localhost").and_then(|base| base.join(request_url)) {
                    Ok(url) => url,
                    Err(_) => return String::new(),
                }
            }
            Err(_) => return String::new(),
        };
        if url.query_pairs().any(|(key, _)| key == "format") {
            return String::new();
        }
        let mut out = url.path().to_string();
        match url.query() {
            Some(query) if !query.is_empty() => {
                out.push('?');
                out.push_str(query);
                out.push('&');
            }
            _ => out.push('?'),
        }
        out.push_str("format=");
        out.push_str(format);
        out
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.mime)?;
        if self.mime == MIME_TYPE_CAR {
            write!(
                f,
                ";version={};order={};dups={}",
                MIME_TYPE_CAR_VERSION,
                self.order,
                if self.duplicates { "y" } else { "n" }
            )?;
        }
        if self.quality >= 0.0 && self.quality < 1.0 {
            write!(f, ";q={}", format_quality(self.quality))?;
        }
        Ok(())
    }
}

/// The `Content-Type` header value for a Trustless Gateway CAR response
/// with the given duplicates policy.
pub fn response_content_type_header(duplicates: bool) -> String {
    ContentType {
        duplicates,
        ..Default::default()
    }
    .to_string()
}

/// The `Accept` header value for a Trustless Gateway CAR request with the
/// given duplicates policy.
pub fn request_accept_header(duplicates: bool) -> String {
    response_content_type_header(duplicates)
}

/// Format a quality weight with at most three decimals, trimming trailing
/// zeros.
fn format_quality(quality: f32) -> String {
    let s = format!("{quality:.3}");
    let s = s.trim_end_matches('0').trim_end_matches('.');
    if s.is_empty() {
        "0".to_string()
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_form() {
        assert_eq!(
            response_content_type_header(true),
            "application/vnd.ipld.car;version=1;order=dfs;dups=y"
        );
        assert_eq!(
            request_accept_header(false),
            "application/vnd.ipld.car;version=1;order=dfs;dups=n"
        );

        assert_eq!(
            ContentType::default().to_string(),
            "application/vnd.ipld.car;version=1;order=dfs;dups=y"
        );
        assert_eq!(
            ContentType::default().with_quality(0.8).to_string(),
            "application/vnd.ipld.car;version=1;order=dfs;dups=y;q=0.8"
        );
        assert_eq!(
            ContentType::default().with_quality(1.0 / 3.0).to_string(),
            "application/vnd.ipld.car;version=1;order=dfs;dups=y;q=0.333"
        );
        assert_eq!(
            ContentType::default().with_quality(-1.0).to_string(),
            "application/vnd.ipld.car;version=1;order=dfs;dups=y"
        );
        assert_eq!(
            ContentType::default().with_duplicates(false).to_string(),
            "application/vnd.ipld.car;version=1;order=dfs;dups=n"
        );
        assert_eq!(
            ContentType::default()
                .with_duplicates(false)
                .with_order(ContentTypeOrder::Unk)
                .to_string(),
            "application/vnd.ipld.car;version=1;order=unk;dups=n"
        );
    }

    #[test]
    fn non_car_mime_carries_only_quality() {
        assert_eq!(
            ContentType::default().with_mime(MIME_TYPE_RAW).to_string(),
            "application/vnd.ipld.raw"
        );
        assert_eq!(
            ContentType::default()
                .with_mime(MIME_TYPE_RAW)
                .with_quality(0.5)
                .to_string(),
            "application/vnd.ipld.raw;q=0.5"
        );
    }

    #[test]
    fn wildcards_are_car() {
        assert!(ContentType::default().is_car());
        assert!(ContentType::default().with_mime(MIME_TYPE_WILDCARD).is_car());
        assert!(ContentType::default()
            .with_mime(MIME_TYPE_APPLICATION_WILDCARD)
            .is_car());
        assert!(!ContentType::default().with_mime(MIME_TYPE_RAW).is_car());
        assert!(ContentType::default().with_mime(MIME_TYPE_RAW).is_raw());
    }

    #[test]
    fn content_location() {
        let car = ContentType::default();
        let raw = ContentType::default().with_mime(MIME_TYPE_RAW);
        let wildcard = ContentType::default().with_mime(MIME_TYPE_WILDCARD);

        assert_eq!(
            car.content_location("http://example.com/ipfs/bafy?dag-scope=entity"),
            "/ipfs/bafy?dag-scope=entity&format=car"
        );
        assert_eq!(
            raw.content_location("/ipfs/bafy"),
            "/ipfs/bafy?format=raw"
        );
        // an existing format parameter wins
        assert_eq!(car.content_location("/ipfs/bafy?format=raw"), "");
        // wildcards do not determine a format
        assert_eq!(wildcard.content_location("/ipfs/bafy"), "");
    }
}
