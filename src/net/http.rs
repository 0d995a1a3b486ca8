/* This file is part of DarkFi (https://dark.fi)
 *
 * Copyright (C) 2020-2026 Dyne.org foundation
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as
 * published by the Free Software Foundation, either version 3 of the
 * License, or (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! One-shot HTTP/1.0 exchanges over TLS.
//!
//! Requests are sent as HTTP/1.0 with `Connection: close`, so the
//! response body is simply everything after the headers and chunked
//! transfer encoding never shows up.

use std::{fs, io, io::BufReader, path::Path, sync::Arc, time::Duration};

use futures_rustls::{
    rustls::{self, pki_types::ServerName, ClientConfig, RootCertStore},
    TlsConnector,
};
use log::{debug, warn};
use smol::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
};
use url::{form_urlencoded, Url};

use crate::{system::timeout, Error, Result};

/// Largest accepted response, headers included.
pub const MAX_RESPONSE_SIZE: usize = 1024 * 1024 * 64; // 64M

const MAX_HEADERS: usize = 64;

#[derive(Clone, Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Body decoded as (lossy) UTF-8.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Build the trust anchors for controller connections.
///
/// A pinned CA certificate is preferred. Without a usable one, the
/// system trust store is used and a warning is logged: a self-signed
/// controller will then simply fail the handshake. Returns whether a pin
/// was loaded.
pub fn load_roots(ca_cert: &Path, trust_store: &Path) -> Result<(RootCertStore, bool)> {
    if ca_cert.exists() {
        match fs::read(ca_cert).map_err(Error::from).and_then(|pem| pem_roots(&pem)) {
            Ok(roots) => return Ok((roots, true)),
            Err(e) => warn!(
                target: "edgeboot::net::http",
                "Pinned CA certificate {} is unusable ({}), using system trust store",
                ca_cert.display(), e,
            ),
        }
    } else {
        warn!(
            target: "edgeboot::net::http",
            "No pinned CA certificate at {}, using system trust store", ca_cert.display(),
        );
    }

    let mut roots = RootCertStore::empty();
    match fs::read(trust_store) {
        Ok(pem) => match pem_certs(&pem) {
            Ok(certs) => {
                let (added, ignored) = roots.add_parsable_certificates(certs);
                debug!(target: "edgeboot::net::http", "Loaded {} system roots ({} ignored)", added, ignored);
            }
            Err(e) => {
                warn!(target: "edgeboot::net::http", "Trust store {} is corrupt: {}", trust_store.display(), e)
            }
        },
        Err(e) => {
            warn!(target: "edgeboot::net::http", "Trust store {} is unreadable: {}", trust_store.display(), e)
        }
    }

    Ok((roots, false))
}

/// Trust anchors from PEM text. Fails unless at least one certificate
/// is usable as an anchor.
pub fn pem_roots(pem: &[u8]) -> Result<RootCertStore> {
    let mut roots = RootCertStore::empty();
    let (added, _) = roots.add_parsable_certificates(pem_certs(pem)?);
    if added == 0 {
        return Err(Error::TlsError("no usable certificate".to_string()))
    }
    Ok(roots)
}

fn pem_certs(pem: &[u8]) -> Result<Vec<rustls::pki_types::CertificateDer<'static>>> {
    let mut reader = BufReader::new(pem);
    let certs = rustls_pemfile::certs(&mut reader).collect::<io::Result<Vec<_>>>()?;
    Ok(certs)
}

/// HTTP(S) client bound to one set of trust anchors.
pub struct HttpsClient {
    connector: TlsConnector,
    timeout: Duration,
}

impl HttpsClient {
    pub fn new(roots: RootCertStore, timeout: Duration) -> Result<Self> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let config = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()?
            .with_root_certificates(roots)
            .with_no_client_auth();

        Ok(Self { connector: TlsConnector::from(Arc::new(config)), timeout })
    }

    /// Same client with a different per-request deadline.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self { connector: self.connector.clone(), timeout }
    }

    pub async fn get(&self, url: &Url) -> Result<HttpResponse> {
        let req = encode_request("GET", url, None, &[])?;
        self.send(url, &req).await
    }

    /// POST `fields` as an `application/x-www-form-urlencoded` body.
    pub async fn post_form(&self, url: &Url, fields: &[(&str, &str)]) -> Result<HttpResponse> {
        let body = form_urlencoded::Serializer::new(String::new()).extend_pairs(fields).finish();
        let req = encode_request(
            "POST",
            url,
            Some("application/x-www-form-urlencoded"),
            body.as_bytes(),
        )?;
        self.send(url, &req).await
    }

    async fn send(&self, url: &Url, req: &[u8]) -> Result<HttpResponse> {
        debug!(target: "edgeboot::net::http", "--> {}", url);
        let raw = timeout(self.timeout, self.dial_and_exchange(url, req)).await??;
        let rep = parse_response(&raw)?;
        debug!(target: "edgeboot::net::http", "<-- {} ({} bytes)", rep.status, rep.body.len());
        Ok(rep)
    }

    async fn dial_and_exchange(&self, url: &Url, req: &[u8]) -> Result<Vec<u8>> {
        let host = host_of(url)?;
        let port = url.port_or_known_default().unwrap_or(443);

        let stream = match TcpStream::connect((host.as_str(), port)).await {
            Ok(s) => s,
            Err(e) => return Err(Error::ConnectFailed(format!("{}:{}: {}", host, port, e))),
        };

        match url.scheme() {
            "https" => {
                let name = ServerName::try_from(host.clone())
                    .map_err(|e| Error::TlsError(format!("{}: {}", host, e)))?;
                let stream = self
                    .connector
                    .connect(name, stream)
                    .await
                    .map_err(|e| Error::TlsError(format!("{}: {}", host, e)))?;
                exchange(stream, req).await
            }
            "http" => exchange(stream, req).await,
            scheme => Err(Error::UnsupportedScheme(scheme.to_string())),
        }
    }
}

fn host_of(url: &Url) -> Result<String> {
    let host = url.host_str().ok_or(Error::ParseFailed("URL has no host"))?;
    Ok(host.trim_start_matches('[').trim_end_matches(']').to_string())
}

/// Serialize an HTTP/1.0 request for `url`.
pub fn encode_request(
    method: &str,
    url: &Url,
    content_type: Option<&str>,
    body: &[u8],
) -> Result<Vec<u8>> {
    let host = url.host_str().ok_or(Error::ParseFailed("URL has no host"))?;
    let host = match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    };

    let mut target = url.path().to_string();
    if let Some(query) = url.query() {
        target.push('?');
        target.push_str(query);
    }

    let mut head = format!(
        "{} {} HTTP/1.0\r\nHost: {}\r\nUser-Agent: edgeboot/{}\r\nAccept: */*\r\nConnection: close\r\n",
        method,
        target,
        host,
        env!("CARGO_PKG_VERSION"),
    );

    if let Some(ct) = content_type {
        head.push_str(&format!("Content-Type: {}\r\n", ct));
    }
    if method == "POST" || !body.is_empty() {
        head.push_str(&format!("Content-Length: {}\r\n", body.len()));
    }
    head.push_str("\r\n");

    let mut req = head.into_bytes();
    req.extend_from_slice(body);
    Ok(req)
}

/// Write the request and read until the peer closes the connection.
async fn exchange<S>(mut stream: S, req: &[u8]) -> Result<Vec<u8>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(req).await?;
    stream.flush().await?;

    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        match stream.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                if buf.len() > MAX_RESPONSE_SIZE {
                    return Err(Error::MalformedHttpResponse("response too large".to_string()))
                }
            }
            // Peers that skip TLS close_notify end the stream like this.
            // Truncation is still caught through Content-Length.
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof && !buf.is_empty() => break,
            Err(e) => return Err(e.into()),
        }
    }

    Ok(buf)
}

/// Split a raw response into status and body.
pub fn parse_response(raw: &[u8]) -> Result<HttpResponse> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut rep = httparse::Response::new(&mut headers);

    let offset = match rep.parse(raw) {
        Ok(httparse::Status::Complete(v)) => v,
        Ok(httparse::Status::Partial) => {
            return Err(Error::MalformedHttpResponse("incomplete headers".to_string()))
        }
        Err(e) => return Err(Error::MalformedHttpResponse(e.to_string())),
    };

    let status = rep.code.ok_or(Error::MalformedHttpResponse("missing status".to_string()))?;
    let mut body = raw[offset..].to_vec();

    for header in rep.headers.iter() {
        if !header.name.eq_ignore_ascii_case("content-length") {
            continue
        }

        let len: usize = std::str::from_utf8(header.value)?.trim().parse()?;
        if body.len() < len {
            return Err(Error::MalformedHttpResponse(format!(
                "body truncated ({} of {} bytes)",
                body.len(),
                len
            )))
        }
        body.truncate(len);
    }

    Ok(HttpResponse { status, body })
}
