#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_debug_implementations, missing_docs, rust_2018_idioms)]
#![deny(unreachable_pub)]

//! Utilities for the IPFS Trustless Gateway protocol.
//!
//! A Trustless Gateway serves content-addressed IPLD data as a verifiable
//! CAR stream: the blocks of the requested DAG, in the depth-first order a
//! selector-driven walk from the root would visit them. This crate holds
//! the pieces shared between clients and servers of that protocol:
//!
//! * [`Request`] models a (root, path, scope, byte-range) request and
//!   derives its URL path, weak Etag and IPLD [selector](Request::selector);
//! * [`parse`] maps the HTTP surface (query parameters, `Accept` and
//!   `Content-Type` headers, `/ipfs/<cid>` paths) back into requests and
//!   [`ContentType`] descriptors, with IPIP-412 CAR parameters;
//! * [`traversal`] consumes an untrusted CAR stream and verifies it is
//!   exactly the answer to a request, writing the verified blocks into a
//!   caller-supplied [`BlockStore`](wnfs_common::BlockStore).

/// The [`ContentType`] model and its IPIP-412 media type parameters.
pub mod content_type;
/// Error types for the parsing and verification surfaces.
pub mod error;
/// Parsing of the protocol's HTTP surface.
pub mod parse;
/// The [`Path`] data model for addressing into a DAG.
pub mod path;
/// The [`Request`] model: scopes, byte ranges, URL paths and Etags.
pub mod request;
/// Selector construction and the selector family this protocol emits.
pub mod selector;
/// Verifying traversal of untrusted CAR streams.
pub mod traversal;

pub(crate) mod unixfs;

/// Test utilities: block, UnixFS and CAR fixture builders.
#[cfg(any(test, feature = "test_utils"))]
#[cfg_attr(docsrs, doc(cfg(feature = "test_utils")))]
pub mod test_utils;

pub use content_type::{ContentType, ContentTypeOrder};
pub use error::{Error, ParseError};
pub use path::{Path, PathSegment};
pub use request::{ByteRange, DagScope, Request};
pub use traversal::{Config, TraversalResult};
