//! Resource locator parsing.
//!
//! The resource vocabulary addresses blob content by URL-like locators:
//!
//! - `eagires:///zeroes?count=N`, `/ones`, `/random`, `/sequence`:
//!   synthesized streams of `N` bytes
//! - `file:PATH` (optionally `?offs=N&size=N`): bounded file access under
//!   a configured root directory
//! - `eagimbe:ID` / `eagimbh:HOSTNAME`: a specific resource server
//!   endpoint addressed by numeric id or host name

use std::path::Path;

use weft_core::{
    error::{Error, Result},
    message::EndpointId,
};

use crate::{
    file_io::FileSource,
    io::SourceBlobIo,
    streams::{ConstantSource, RandomSource, SequenceSource},
};

/// Address of a specific resource server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ServerAddress {
    /// Addressed by endpoint id.
    Endpoint(EndpointId),
    /// Addressed by host name.
    Host(String),
}

impl ServerAddress {
    /// Parses an `eagimbe:`/`eagimbh:` locator.
    pub fn parse(locator: &str) -> Result<Self> {
        if let Some(rest) = locator.strip_prefix("eagimbe:") {
            let id = trim_authority(rest)
                .parse::<EndpointId>()
                .map_err(|_| Error::UnsupportedResource(locator.to_string()))?;
            return Ok(ServerAddress::Endpoint(id));
        }
        if let Some(rest) = locator.strip_prefix("eagimbh:") {
            let host = trim_authority(rest);
            if host.is_empty() {
                return Err(Error::UnsupportedResource(locator.to_string()));
            }
            return Ok(ServerAddress::Host(host.to_string()));
        }
        Err(Error::UnsupportedResource(locator.to_string()))
    }
}

fn trim_authority(rest: &str) -> &str {
    rest.strip_prefix("//").unwrap_or(rest)
}

fn split_query(path_and_query: &str) -> (&str, &str) {
    match path_and_query.split_once('?') {
        Some((path, query)) => (path, query),
        None => (path_and_query, ""),
    }
}

fn query_argument<'a>(query: &'a str, name: &str) -> Option<&'a str> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value)
}

/// Opens a blob source for the given resource locator.
///
/// Synthesized `eagires:` streams need no root; `file:` locators are
/// resolved under `root` and rejected when no root is configured.
pub fn open_resource_source(
    locator: &str,
    root: Option<&Path>,
) -> Result<Box<dyn SourceBlobIo>> {
    if let Some(rest) = locator.strip_prefix("eagires:") {
        let (path, query) = split_query(trim_authority(rest));
        let count = query_argument(query, "count")
            .and_then(|v| v.parse::<u64>().ok())
            .ok_or_else(|| Error::UnsupportedResource(locator.to_string()))?;
        return match path {
            "/zeroes" => Ok(Box::new(ConstantSource::zeroes(count))),
            "/ones" => Ok(Box::new(ConstantSource::ones(count))),
            "/random" => Ok(Box::new(RandomSource::new(count))),
            "/sequence" => Ok(Box::new(SequenceSource::new(count))),
            _ => Err(Error::UnsupportedResource(locator.to_string())),
        };
    }
    if let Some(rest) = locator.strip_prefix("file:") {
        let root = root.ok_or_else(|| Error::UnsupportedResource(locator.to_string()))?;
        let (path, query) = split_query(trim_authority(rest));
        let offset = query_argument(query, "offs").and_then(|v| v.parse::<u64>().ok());
        let size = query_argument(query, "size").and_then(|v| v.parse::<u64>().ok());
        let source = FileSource::open(root, Path::new(path), offset, size)?;
        return Ok(Box::new(source));
    }
    Err(Error::UnsupportedResource(locator.to_string()))
}
