use std::fmt;

/// A single segment of an IPLD path.
///
/// Segments are stored as strings; list indices are interpreted on demand
/// via [`PathSegment::as_index`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathSegment(String);

impl PathSegment {
    /// The string form of this segment.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Interpret this segment as a list index, if it is one.
    pub fn as_index(&self) -> Option<usize> {
        self.0.parse().ok()
    }
}

impl From<&str> for PathSegment {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for PathSegment {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<usize> for PathSegment {
    fn from(i: usize) -> Self {
        Self(i.to_string())
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An ordered sequence of path segments within a DAG.
///
/// Parsing collapses repeated separators and trims leading and trailing
/// ones, so `/a/b`, `a/b` and `///a//b/` are all the same two-segment path.
/// The canonical string form joins segments with `/` and has no leading
/// separator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Path(Vec<PathSegment>);

impl Path {
    /// Parse a `/`-separated path into its segments.
    pub fn parse(s: &str) -> Self {
        Self(
            s.split('/')
                .filter(|seg| !seg.is_empty())
                .map(PathSegment::from)
                .collect(),
        )
    }

    /// Build a path from pre-split segments.
    pub fn from_segments(segments: impl IntoIterator<Item = PathSegment>) -> Self {
        Self(segments.into_iter().collect())
    }

    /// The number of segments.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether this path has no segments.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Split off the first segment, returning it along with the remainder
    /// of the path. Returns `None` for the empty path.
    pub fn shift(&self) -> Option<(PathSegment, Path)> {
        self.0
            .split_first()
            .map(|(head, tail)| (head.clone(), Path(tail.to_vec())))
    }

    /// A new path with `segment` appended.
    pub fn child(&self, segment: PathSegment) -> Path {
        let mut segments = self.0.clone();
        segments.push(segment);
        Path(segments)
    }

    /// Iterate over the segments in order.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &PathSegment> {
        self.0.iter()
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, seg) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            write!(f, "{seg}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_normalizes_separators() {
        for input in ["a/b", "/a/b", "///a//b/", "a/b/"] {
            let path = Path::parse(input);
            assert_eq!(path.len(), 2, "{input}");
            assert_eq!(path.to_string(), "a/b", "{input}");
        }
    }

    #[test]
    fn parse_empty() {
        assert!(Path::parse("").is_empty());
        assert!(Path::parse("///").is_empty());
        assert_eq!(Path::parse("").to_string(), "");
    }

    #[test]
    fn shift_walks_segments() {
        let path = Path::parse("foo/bar/baz");
        let (seg, rest) = path.shift().unwrap();
        assert_eq!(seg.as_str(), "foo");
        assert_eq!(rest.to_string(), "bar/baz");

        let (seg, rest) = rest.shift().unwrap();
        assert_eq!(seg.as_str(), "bar");

        let (seg, rest) = rest.shift().unwrap();
        assert_eq!(seg.as_str(), "baz");
        assert!(rest.shift().is_none());
    }

    #[test]
    fn segment_index() {
        assert_eq!(PathSegment::from("42").as_index(), Some(42));
        assert_eq!(PathSegment::from("foo").as_index(), None);
        assert_eq!(PathSegment::from("-1").as_index(), None);
    }

    #[test]
    fn child_appends() {
        let path = Path::parse("a").child("b".into());
        assert_eq!(path.to_string(), "a/b");
    }
}
