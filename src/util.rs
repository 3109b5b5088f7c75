//! RDF parsing and serialization helpers, plus remote retrieval for
//! importResources.

use std::io::BufReader;
use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use log::debug;
use oxigraph::io::{RdfFormat, RdfParser, RdfSerializer};
use oxigraph::model::vocab::xsd;
use oxigraph::model::{Literal, Quad, Triple};
use reqwest::header::CONTENT_TYPE;

use crate::errors::{Error, Result};

/// Maps a file extension to an RDF serialization.
pub fn format_from_extension(ext: &str) -> Option<RdfFormat> {
    match ext {
        "ttl" => Some(RdfFormat::Turtle),
        "n3" => Some(RdfFormat::Turtle),
        "nt" => Some(RdfFormat::NTriples),
        "nq" => Some(RdfFormat::NQuads),
        "trig" => Some(RdfFormat::TriG),
        "xml" | "rdf" => Some(RdfFormat::RdfXml),
        _ => None,
    }
}

fn format_from_content_type(ct: &str) -> Option<RdfFormat> {
    let ct = ct.split(';').next().unwrap_or(ct).trim();
    match ct {
        "text/turtle" | "application/x-turtle" => Some(RdfFormat::Turtle),
        "application/rdf+xml" => Some(RdfFormat::RdfXml),
        "application/n-triples" | "text/rdf+n3" => Some(RdfFormat::NTriples),
        "application/n-quads" => Some(RdfFormat::NQuads),
        "application/trig" => Some(RdfFormat::TriG),
        _ => {
            debug!("unknown content type: {ct}");
            None
        }
    }
}

/// Parses RDF bytes into quads. When no format is given, the supported
/// serializations are tried in turn.
pub fn parse_rdf(bytes: &[u8], format: Option<RdfFormat>) -> Result<Vec<Quad>> {
    let formats: Vec<RdfFormat> = match format {
        Some(f) => vec![f],
        None => vec![
            RdfFormat::Turtle,
            RdfFormat::TriG,
            RdfFormat::RdfXml,
            RdfFormat::NQuads,
            RdfFormat::NTriples,
        ],
    };
    let mut last_err = None;
    for fmt in formats {
        let parser = RdfParser::from_format(fmt);
        let reader = BufReader::new(std::io::Cursor::new(bytes));
        let mut quads = Vec::new();
        let mut ok = true;
        for quad in parser.for_reader(reader) {
            match quad {
                Ok(q) => quads.push(q),
                Err(e) => {
                    last_err = Some(Error::from(e));
                    ok = false;
                    break;
                }
            }
        }
        if ok {
            return Ok(quads);
        }
    }
    Err(last_err.unwrap_or_else(|| Error::internal("no RDF content")))
}

/// Reads an RDF file from disk, guessing the format from the extension.
pub fn read_rdf_file(path: &Path) -> Result<Vec<Quad>> {
    debug!("reading RDF file: {}", path.display());
    let format = path
        .extension()
        .and_then(|e| e.to_str())
        .and_then(format_from_extension);
    let bytes = std::fs::read(path)?;
    parse_rdf(&bytes, format)
}

/// Downloads an RDF document, guessing the format from the response
/// content type and falling back to the URL's extension.
pub fn fetch_rdf(url: &str) -> Result<Vec<Quad>> {
    debug!("fetching RDF from: {url}");
    let client = reqwest::blocking::Client::new();
    let resp = client
        .get(url)
        .header(CONTENT_TYPE, "text/turtle")
        .send()?;
    if !resp.status().is_success() {
        return Err(Error::internal(format!(
            "failed to fetch {url}: {}",
            resp.status()
        )));
    }
    let format = resp
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|ct| ct.to_str().ok())
        .and_then(format_from_content_type)
        .or_else(|| {
            url.rsplit('.')
                .next()
                .and_then(format_from_extension)
        });
    let bytes = resp.bytes()?;
    parse_rdf(&bytes, format)
}

/// Serializes triples into the requested syntax.
pub fn serialize_triples(triples: &[Triple], format: RdfFormat) -> Result<String> {
    let mut buf = Vec::new();
    let mut serializer = RdfSerializer::from_format(format).for_writer(&mut buf);
    for triple in triples {
        serializer.serialize_triple(triple.as_ref())?;
    }
    serializer.finish()?;
    String::from_utf8(buf).map_err(|e| Error::internal(format!("serializer output: {e}")))
}

/// Bumps a resource's modification timestamp in the system graph, creating
/// the creation timestamp alongside it if the resource never had one. The
/// new timestamp is strictly greater than the previous one even under clock
/// granularity collisions.
pub(crate) fn touch_resource(
    store: &oxigraph::store::Store,
    uri: oxigraph::model::NamedNodeRef<'_>,
    now: DateTime<Utc>,
) -> Result<()> {
    use oxigraph::model::QuadRef;

    let mut previous: Option<DateTime<Utc>> = None;
    let old: Vec<Quad> = store
        .quads_for_pattern(
            Some(uri.into()),
            Some(crate::consts::NAO_LAST_MODIFIED),
            None,
            None,
        )
        .collect::<std::result::Result<_, _>>()?;
    for quad in old {
        if let oxigraph::model::Term::Literal(lit) = &quad.object {
            if let Some(ts) = parse_datetime(lit) {
                previous = Some(previous.map_or(ts, |p| p.max(ts)));
            }
        }
        store.remove(quad.as_ref())?;
    }
    let mut effective = now;
    if let Some(prev) = previous {
        if effective <= prev {
            effective = prev + chrono::Duration::microseconds(1);
        }
    }
    let lit = datetime_literal(effective);
    store.insert(QuadRef::new(
        uri,
        crate::consts::NAO_LAST_MODIFIED,
        lit.as_ref(),
        crate::consts::SYSTEM_GRAPH,
    ))?;
    ensure_created(store, uri, effective)?;
    Ok(())
}

/// Writes the creation timestamp once, when the resource first materializes.
pub(crate) fn ensure_created(
    store: &oxigraph::store::Store,
    uri: oxigraph::model::NamedNodeRef<'_>,
    now: DateTime<Utc>,
) -> Result<()> {
    use oxigraph::model::QuadRef;

    let has_created = store
        .quads_for_pattern(
            Some(uri.into()),
            Some(crate::consts::NAO_CREATED),
            None,
            None,
        )
        .next()
        .transpose()?
        .is_some();
    if !has_created {
        let lit = datetime_literal(now);
        store.insert(QuadRef::new(
            uri,
            crate::consts::NAO_CREATED,
            lit.as_ref(),
            crate::consts::SYSTEM_GRAPH,
        ))?;
    }
    Ok(())
}

/// A timestamp literal in the form the store compares lexically.
pub fn datetime_literal(ts: DateTime<Utc>) -> Literal {
    Literal::new_typed_literal(ts.to_rfc3339_opts(SecondsFormat::Micros, true), xsd::DATE_TIME)
}

/// Parses a timestamp literal written by `datetime_literal`.
pub fn parse_datetime(lit: &Literal) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(lit.value())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_turtle_without_format_hint() {
        let ttl = b"<http://example.org/a> <http://example.org/p> \"v\" .";
        let quads = parse_rdf(ttl, None).unwrap();
        assert_eq!(quads.len(), 1);
    }

    #[test]
    fn garbage_fails_every_format() {
        assert!(parse_rdf(b"not rdf at all {{{", None).is_err());
    }

    #[test]
    fn datetime_round_trip() {
        let now = Utc::now();
        let lit = datetime_literal(now);
        let back = parse_datetime(&lit).unwrap();
        assert_eq!(
            now.timestamp_micros(),
            back.timestamp_micros()
        );
    }

    #[test]
    fn extension_mapping() {
        assert_eq!(format_from_extension("ttl"), Some(RdfFormat::Turtle));
        assert_eq!(format_from_extension("trig"), Some(RdfFormat::TriG));
        assert_eq!(format_from_extension("bin"), None);
    }
}
