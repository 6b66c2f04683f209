//! HTTP endpoints for Prometheus and scrape history.
//!
//! Uses `std::net::TcpListener`, one request per connection. Endpoints:
//!
//! - `GET /metrics` : Prometheus text exposition, one scrape per request
//! - `GET /health`  : liveness check
//! - `GET /history?start=<rfc3339>&stop=<rfc3339>&limit=<n>` : recorded scrapes (JSON)

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpListener;
use std::time::Duration;

use chrono::{DateTime, Utc};
use prometheus::TEXT_FORMAT;
use vmtrail::{Clock, DEFAULT_LIMIT};

use crate::collector::Collector;
use crate::error::ExporterError;
use crate::exporter::Exporter;

const JSON: &str = "application/json";

/// Serves requests from `listener` until it fails (blocking).
pub fn serve<C: Collector, K: Clock>(listener: &TcpListener, exporter: &mut Exporter<C, K>) {
    for stream in listener.incoming() {
        let mut stream = match stream {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!("accept error: {e}");
                continue;
            }
        };

        // Slow clients must not stall the scrape loop.
        let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));

        if let Err(e) = handle_request(&mut stream, exporter) {
            tracing::debug!("request error: {e}");
        }
    }
}

/// Parses one HTTP request from `stream` and writes the response back.
fn handle_request<S, C, K>(
    stream: &mut S,
    exporter: &mut Exporter<C, K>,
) -> Result<(), Box<dyn std::error::Error>>
where
    S: Read + Write,
    C: Collector,
    K: Clock,
{
    let request_line = {
        let mut reader = BufReader::new(&mut *stream);
        let mut request_line = String::new();
        reader.read_line(&mut request_line)?;

        // Drain remaining headers (we don't need them)
        loop {
            let mut line = String::new();
            if reader.read_line(&mut line)? == 0 || line.trim().is_empty() {
                break;
            }
        }
        request_line
    };

    // "GET /path?query HTTP/1.x"
    let parts: Vec<&str> = request_line.split_whitespace().collect();
    if parts.len() < 2 {
        return send_json(stream, 400, r#"{"error":"bad request"}"#);
    }
    let (method, target) = (parts[0], parts[1]);

    if method != "GET" {
        return send_json(stream, 405, r#"{"error":"method not allowed"}"#);
    }

    let (path, query) = target.split_once('?').unwrap_or((target, ""));
    match path {
        "/health" => send_json(stream, 200, r#"{"status":"ok"}"#),
        "/metrics" => handle_metrics(stream, exporter),
        "/history" => handle_history(stream, exporter, query),
        _ => send_json(stream, 404, r#"{"error":"not found"}"#),
    }
}

/// `GET /metrics`
fn handle_metrics<S: Write, C: Collector, K: Clock>(
    stream: &mut S,
    exporter: &mut Exporter<C, K>,
) -> Result<(), Box<dyn std::error::Error>> {
    match exporter.scrape().and_then(|set| set.render()) {
        Ok(body) => send_response(stream, 200, TEXT_FORMAT, &body),
        Err(e) => {
            tracing::warn!(error = %e, "scrape failed");
            send_error(stream, 500, &e)
        }
    }
}

/// `GET /history?start=<rfc3339>&stop=<rfc3339>&limit=<n>`
fn handle_history<S: Write, C: Collector, K: Clock>(
    stream: &mut S,
    exporter: &mut Exporter<C, K>,
    query: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let params = parse_query(query);

    let parsed = (|| {
        let start = params.get("start").map(|s| parse_time("start", s)).transpose()?;
        let stop = params.get("stop").map(|s| parse_time("stop", s)).transpose()?;
        let limit = match params.get("limit") {
            Some(s) => s.parse::<usize>().map_err(|e| ExporterError::InvalidParameter {
                name: "limit".to_string(),
                reason: e.to_string(),
            })?,
            None => DEFAULT_LIMIT,
        };
        Ok::<_, ExporterError>((start, stop, limit))
    })();

    let (start, stop, limit) = match parsed {
        Ok(p) => p,
        Err(e) => return send_error(stream, 400, &e),
    };

    match exporter.history(start, stop, limit) {
        Ok(events) => {
            let body = serde_json::json!({
                "count": events.len(),
                "events": events,
            });
            send_json(stream, 200, &body.to_string())
        }
        Err(e) => {
            tracing::warn!(error = %e, "history query failed");
            send_error(stream, 500, &e)
        }
    }
}

fn parse_time(name: &str, value: &str) -> Result<DateTime<Utc>, ExporterError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| ExporterError::InvalidParameter {
            name: name.to_string(),
            reason: e.to_string(),
        })
}

/// Sends an HTTP response with the given content type.
fn send_response<S: Write>(
    stream: &mut S,
    status: u16,
    content_type: &str,
    body: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let status_text = match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        500 => "Internal Server Error",
        _ => "Unknown",
    };

    write!(
        stream,
        "HTTP/1.1 {status} {status_text}\r\n\
         Content-Type: {content_type}\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {body}",
        body.len(),
    )?;
    stream.flush()?;

    Ok(())
}

/// Sends a JSON HTTP response.
fn send_json<S: Write>(
    stream: &mut S,
    status: u16,
    json: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    send_response(stream, status, JSON, json)
}

fn send_error<S: Write>(
    stream: &mut S,
    status: u16,
    error: &ExporterError,
) -> Result<(), Box<dyn std::error::Error>> {
    let body = serde_json::json!({ "error": error.to_string() });
    send_json(stream, status, &body.to_string())
}

/// Parses a query string into percent-decoded key-value pairs.
fn parse_query(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter(|s| !s.is_empty())
        .filter_map(|pair| {
            let (k, v) = pair.split_once('=')?;
            let v = urlencoding::decode(v).ok()?;
            Some((k.to_string(), v.into_owned()))
        })
        .collect()
}
