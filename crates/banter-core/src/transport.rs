use anyhow::Context;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use rustls_pemfile::certs;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::info;

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

#[derive(Debug, Clone)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub tls: bool,
    pub ca_file: Option<std::path::PathBuf>,
}

/// Open the socket (and TLS session if requested) and split it into halves.
pub async fn open(endpoint: &Endpoint) -> anyhow::Result<(BoxedReader, BoxedWriter)> {
    info!(host = %endpoint.host, port = endpoint.port, tls = endpoint.tls, "connecting");
    let tcp = TcpStream::connect((endpoint.host.as_str(), endpoint.port))
        .await
        .with_context(|| format!("connect to {}:{}", endpoint.host, endpoint.port))?;

    if !endpoint.tls {
        let (reader, writer) = tcp.into_split();
        return Ok((Box::new(reader), Box::new(writer)));
    }

    let root = build_root_store(endpoint.ca_file.as_deref())?;
    let config = ClientConfig::builder()
        .with_root_certificates(root)
        .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(config));

    let server_name = if let Ok(ip) = endpoint.host.parse::<std::net::IpAddr>() {
        ServerName::IpAddress(ip.into())
    } else {
        ServerName::try_from(endpoint.host.as_str())
            .context("invalid dns name")?
            .to_owned()
    };
    let tls = connector
        .connect(server_name, tcp)
        .await
        .context("tls handshake")?;
    let (reader, writer) = tokio::io::split(tls);
    Ok((Box::new(reader), Box::new(writer)))
}

fn build_root_store(ca: Option<&Path>) -> anyhow::Result<RootCertStore> {
    let mut root = RootCertStore::empty();
    let native = rustls_native_certs::load_native_certs().context("load native certs")?;
    for cert in native {
        root.add(cert).ok();
    }

    if let Some(path) = ca {
        let mut reader = BufReader::new(File::open(path).context("open ca file")?);
        let certs = certs(&mut reader)
            .collect::<Result<Vec<_>, _>>()
            .context("read ca certs")?;
        for cert in certs {
            root.add(cert).context("add cert")?;
        }
    }

    Ok(root)
}
