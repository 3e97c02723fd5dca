//! Origin downloaders
//!
//! Opens a byte stream for one origin URL. HTTP(S) goes through reqwest
//! (which honours the usual proxy environment variables), FTP uses a small
//! passive-mode client over tokio, and `file://` URLs read from disk.
//! Callers decide what to do with the stream; nothing here retries.

use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio_util::io::ReaderStream;

use crate::config::defaults;
use crate::core::package::{Origin, OriginKind};
use crate::error::DownloadError;

/// An opened download
pub struct Fetched {
    /// Body chunks in order
    pub stream: BoxStream<'static, Result<Bytes, DownloadError>>,
    /// Expected size, when the origin announces one
    pub size: Option<u64>,
}

impl std::fmt::Debug for Fetched {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fetched").field("size", &self.size).finish()
    }
}

/// Opens download streams for origins
pub trait Downloader {
    fn start<'a>(&'a self, origin: &'a Origin) -> BoxFuture<'a, Result<Fetched, DownloadError>>;
}

/// Downloader dispatching on the origin's URL scheme
#[derive(Debug, Clone)]
pub struct Downloaders {
    client: reqwest::Client,
}

impl Downloaders {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .connect_timeout(Duration::from_secs(defaults::CONNECT_TIMEOUT_SECS))
                .user_agent(concat!("incubator/", env!("CARGO_PKG_VERSION")))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }

    /// Get the HTTP client
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    async fn start_http(&self, origin: &Origin) -> Result<Fetched, DownloadError> {
        let url = origin.url().to_string();
        let network = |error: String| DownloadError::Network {
            url: url.clone(),
            error,
        };

        let response = self
            .client
            .get(origin.url().clone())
            .send()
            .await
            .map_err(|e| network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(network(format!("HTTP {}", response.status())));
        }

        let size = response.content_length();
        let stream_url = url.clone();
        let stream = response
            .bytes_stream()
            .map_err(move |e| DownloadError::Network {
                url: stream_url.clone(),
                error: e.to_string(),
            })
            .boxed();

        Ok(Fetched { stream, size })
    }
}

impl Default for Downloaders {
    fn default() -> Self {
        Self::new()
    }
}

impl Downloader for Downloaders {
    fn start<'a>(&'a self, origin: &'a Origin) -> BoxFuture<'a, Result<Fetched, DownloadError>> {
        match origin.kind() {
            OriginKind::Http => self.start_http(origin).boxed(),
            OriginKind::Ftp => start_ftp(origin).boxed(),
            OriginKind::File => start_file(origin).boxed(),
        }
    }
}

async fn start_file(origin: &Origin) -> Result<Fetched, DownloadError> {
    let path = origin
        .url()
        .to_file_path()
        .map_err(|()| DownloadError::Network {
            url: origin.to_string(),
            error: "not a local path".to_string(),
        })?;
    let io_error = |e: std::io::Error| DownloadError::Io {
        path: path.clone(),
        error: e.to_string(),
    };

    let file = tokio::fs::File::open(&path).await.map_err(io_error)?;
    let size = file.metadata().await.map_err(io_error)?.len();

    let stream_path = path.clone();
    let stream = ReaderStream::new(file)
        .map_err(move |e| DownloadError::Io {
            path: stream_path.clone(),
            error: e.to_string(),
        })
        .boxed();

    Ok(Fetched {
        stream,
        size: Some(size),
    })
}

// ============================================
// FTP (passive mode)
// ============================================

/// Control connection of an FTP session
struct FtpControl {
    url: String,
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

/// One server reply: status code and the text of its last line
#[derive(Debug, Clone, PartialEq, Eq)]
struct FtpReply {
    code: u16,
    text: String,
}

impl FtpControl {
    async fn connect(url: &reqwest::Url) -> Result<Self, DownloadError> {
        let host = url.host_str().unwrap_or_default();
        let port = url.port().unwrap_or(defaults::FTP_PORT);
        let stream = TcpStream::connect((host, port))
            .await
            .map_err(|e| DownloadError::Network {
                url: url.to_string(),
                error: e.to_string(),
            })?;
        let (reader, writer) = stream.into_split();

        let mut control = Self {
            url: url.to_string(),
            reader: BufReader::new(reader),
            writer,
        };
        control.expect(&[220]).await?;
        Ok(control)
    }

    fn error(&self, error: impl Into<String>) -> DownloadError {
        DownloadError::Network {
            url: self.url.clone(),
            error: error.into(),
        }
    }

    async fn read_reply(&mut self) -> Result<FtpReply, DownloadError> {
        let mut line = String::new();
        let mut code: Option<u16> = None;

        loop {
            line.clear();
            let read = self
                .reader
                .read_line(&mut line)
                .await
                .map_err(|e| self.error(e.to_string()))?;
            if read == 0 {
                return Err(self.error("connection closed"));
            }

            let Some(line_code) = line.get(..3).and_then(|c| c.parse::<u16>().ok()) else {
                continue;
            };
            let code = *code.get_or_insert(line_code);
            // "123-" opens a multi-line reply that ends with "123 "
            if line_code == code && line.as_bytes().get(3) != Some(&b'-') {
                return Ok(FtpReply {
                    code,
                    text: line.get(4..).unwrap_or_default().trim().to_string(),
                });
            }
        }
    }

    async fn expect(&mut self, codes: &[u16]) -> Result<FtpReply, DownloadError> {
        let reply = self.read_reply().await?;
        if codes.contains(&reply.code) {
            Ok(reply)
        } else {
            Err(self.error(format!("FTP {} {}", reply.code, reply.text)))
        }
    }

    async fn command(&mut self, command: &str) -> Result<FtpReply, DownloadError> {
        tracing::debug!("FTP > {}", command.split(' ').next().unwrap_or_default());
        self.writer
            .write_all(format!("{command}\r\n").as_bytes())
            .await
            .map_err(|e| self.error(e.to_string()))?;
        self.read_reply().await
    }

    async fn command_expect(
        &mut self,
        command: &str,
        codes: &[u16],
    ) -> Result<FtpReply, DownloadError> {
        let reply = self.command(command).await?;
        if codes.contains(&reply.code) {
            Ok(reply)
        } else {
            Err(self.error(format!("FTP {} {}", reply.code, reply.text)))
        }
    }
}

/// Address announced by a `227 Entering Passive Mode (h1,h2,h3,h4,p1,p2)` reply
fn parse_passive(text: &str) -> Option<(String, u16)> {
    let start = text.find('(')?;
    let end = text[start..].find(')')? + start;
    let numbers: Vec<u16> = text[start + 1..end]
        .split(',')
        .map(|n| n.trim().parse().ok())
        .collect::<Option<Vec<u16>>>()?;

    let [a, b, c, d, high, low] = numbers.as_slice() else {
        return None;
    };
    if [a, b, c, d, high, low].iter().any(|n| **n > 255) {
        return None;
    }
    Some((format!("{a}.{b}.{c}.{d}"), high * 256 + low))
}

async fn start_ftp(origin: &Origin) -> Result<Fetched, DownloadError> {
    let url = origin.url();
    let mut control = FtpControl::connect(url).await?;

    let user = match url.username() {
        "" => "anonymous",
        user => user,
    };
    let reply = control.command_expect(&format!("USER {user}"), &[230, 331]).await?;
    if reply.code == 331 {
        let password = url.password().unwrap_or("anonymous@");
        control
            .command_expect(&format!("PASS {password}"), &[230, 202])
            .await?;
    }
    control.command_expect("TYPE I", &[200]).await?;

    let path = url.path();
    let size = match control.command(&format!("SIZE {path}")).await? {
        reply if reply.code == 213 => reply.text.parse().ok(),
        _ => None,
    };

    let passive = control.command_expect("PASV", &[227]).await?;
    let (host, port) =
        parse_passive(&passive.text).ok_or_else(|| control.error("bad passive reply"))?;
    let data = TcpStream::connect((host.as_str(), port))
        .await
        .map_err(|e| control.error(e.to_string()))?;

    control
        .command_expect(&format!("RETR {path}"), &[125, 150])
        .await?;

    let body_url = control.url.clone();
    let body = ReaderStream::new(data).map_err(move |e| DownloadError::Network {
        url: body_url.clone(),
        error: e.to_string(),
    });
    // the transfer is only complete once the server confirms it
    let trailer = stream::once(async move {
        control.expect(&[226, 250]).await?;
        Ok::<_, DownloadError>(Bytes::new())
    });

    let stream = body
        .chain(trailer)
        .try_filter(|chunk| futures::future::ready(!chunk.is_empty()))
        .boxed();

    Ok(Fetched { stream, size })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn collect(fetched: Fetched) -> Result<Vec<u8>, DownloadError> {
        let chunks: Vec<Bytes> = fetched.stream.try_collect().await?;
        Ok(chunks.concat())
    }

    // ============================================
    // Unit Tests - Passive replies
    // ============================================

    #[test]
    fn test_parse_passive() {
        assert_eq!(
            parse_passive("Entering Passive Mode (127,0,0,1,195,80)."),
            Some(("127.0.0.1".to_string(), 50_000))
        );
    }

    #[test]
    fn test_parse_passive_rejects_garbage() {
        assert_eq!(parse_passive("Entering Passive Mode"), None);
        assert_eq!(parse_passive("(1,2,3)"), None);
        assert_eq!(parse_passive("(1,2,3,4,999,1)"), None);
    }

    // ============================================
    // Async Tests - HTTP
    // ============================================

    #[tokio::test]
    async fn test_http_download() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/test.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"test file content".to_vec()))
            .mount(&mock_server)
            .await;

        let origin: Origin = format!("{}/test.txt", mock_server.uri()).parse().unwrap();
        let fetched = Downloaders::new().start(&origin).await.unwrap();
        assert_eq!(fetched.size, Some(17));
        assert_eq!(collect(fetched).await.unwrap(), b"test file content");
    }

    #[tokio::test]
    async fn test_http_error_status() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing.txt"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let origin: Origin = format!("{}/missing.txt", mock_server.uri()).parse().unwrap();
        let err = Downloaders::new().start(&origin).await.unwrap_err();
        assert!(matches!(err, DownloadError::Network { .. }));
        assert!(err.to_string().contains("404"));
    }

    // ============================================
    // Async Tests - Local files
    // ============================================

    #[tokio::test]
    async fn test_file_download() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("source.bin");
        std::fs::write(&source, b"local bytes").unwrap();

        let origin: Origin = reqwest::Url::from_file_path(&source)
            .unwrap()
            .to_string()
            .parse()
            .unwrap();
        let fetched = Downloaders::new().start(&origin).await.unwrap();
        assert_eq!(fetched.size, Some(11));
        assert_eq!(collect(fetched).await.unwrap(), b"local bytes");
    }

    #[tokio::test]
    async fn test_file_download_missing() {
        let origin: Origin = "file:///nonexistent/incubator/file".parse().unwrap();
        assert!(Downloaders::new().start(&origin).await.is_err());
    }
}
