//! NUT protocol client
//!
//! The poller only talks to [`UpsClient`]; [`TcpUpsClient`] is the plain
//! TCP transport (default port 3493) used by the binary.

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use crate::error::UpsError;
use crate::models::{DeviceSettings, RawTelemetry};

/// Longest reply line accepted from a server, line ending included
pub const MAX_LINE_LEN: usize = 8192;

// ============================================================================
// Types
// ============================================================================

/// A UPS reported by `LIST UPS`
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct UpsEntry {
    pub name: String,
    pub description: String,
}

/// One connection to a NUT server. A new client is created for every poll.
#[async_trait]
pub trait UpsClient: Send {
    async fn connect(&mut self) -> Result<(), UpsError>;

    async fn authenticate(&mut self, username: &str, password: &str) -> Result<(), UpsError>;

    /// All variables of one UPS
    async fn fetch_variables(&mut self, ups_name: &str) -> Result<RawTelemetry, UpsError>;

    /// UPS names served by this server
    async fn list_devices(&mut self) -> Result<Vec<UpsEntry>, UpsError>;

    /// Best effort, never fails
    async fn close(&mut self);
}

/// Creates fresh clients for the configured endpoint
pub trait UpsConnector: Send + Sync {
    fn client(&self, settings: &DeviceSettings) -> Box<dyn UpsClient>;
}

// ============================================================================
// TCP Client
// ============================================================================

pub struct TcpConnector;

impl UpsConnector for TcpConnector {
    fn client(&self, settings: &DeviceSettings) -> Box<dyn UpsClient> {
        Box::new(TcpUpsClient::new(settings.ip.clone(), settings.port))
    }
}

pub struct TcpUpsClient {
    pub host: String,
    pub port: u16,
    reader: Option<BufReader<OwnedReadHalf>>,
    writer: Option<OwnedWriteHalf>,
}

impl TcpUpsClient {
    pub fn new(host: String, port: u16) -> Self {
        Self {
            host,
            port,
            reader: None,
            writer: None,
        }
    }

    async fn send(&mut self, command: &str) -> Result<(), UpsError> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| UpsError::Connection("not connected".to_string()))?;
        writer.write_all(command.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        Ok(())
    }

    async fn read_line(&mut self) -> Result<String, UpsError> {
        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| UpsError::Connection("not connected".to_string()))?;
        let mut line = String::new();
        let n = reader
            .take(MAX_LINE_LEN as u64 + 1)
            .read_line(&mut line)
            .await?;
        if n == 0 {
            return Err(UpsError::Connection(
                "connection closed by server".to_string(),
            ));
        }
        if n > MAX_LINE_LEN && !line.ends_with('\n') {
            return Err(UpsError::Protocol(format!(
                "reply line longer than {} bytes",
                MAX_LINE_LEN
            )));
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    /// Send a command that must be answered with `OK`
    async fn expect_ok(&mut self, command: &str) -> Result<(), String> {
        self.send(command).await.map_err(|e| e.to_string())?;
        let reply = self.read_line().await.map_err(|e| e.to_string())?;
        if reply.starts_with("OK") {
            Ok(())
        } else {
            Err(server_error(&reply).unwrap_or(reply))
        }
    }

    /// Run a `LIST` command and return the body lines
    async fn list(&mut self, query: &str) -> Result<Vec<String>, UpsError> {
        self.send(&format!("LIST {}", query)).await?;

        let first = self.read_line().await?;
        if let Some(err) = server_error(&first) {
            return Err(UpsError::Protocol(format!("LIST {}: {}", query, err)));
        }
        if first != format!("BEGIN LIST {}", query) {
            return Err(UpsError::Protocol(format!("unexpected reply: {}", first)));
        }

        let end = format!("END LIST {}", query);
        let mut lines = Vec::new();
        loop {
            let line = self.read_line().await?;
            if line == end {
                break;
            }
            lines.push(line);
        }
        Ok(lines)
    }
}

#[async_trait]
impl UpsClient for TcpUpsClient {
    async fn connect(&mut self) -> Result<(), UpsError> {
        let stream = TcpStream::connect((self.host.as_str(), self.port))
            .await
            .map_err(|e| {
                UpsError::Connection(format!("{}:{}: {}", self.host, self.port, e))
            })?;
        let (read, write) = stream.into_split();
        self.reader = Some(BufReader::new(read));
        self.writer = Some(write);
        Ok(())
    }

    async fn authenticate(&mut self, username: &str, password: &str) -> Result<(), UpsError> {
        if username.is_empty() {
            return Ok(());
        }
        self.expect_ok(&format!("USERNAME {}", username))
            .await
            .map_err(UpsError::Auth)?;
        self.expect_ok(&format!("PASSWORD {}", password))
            .await
            .map_err(UpsError::Auth)?;
        Ok(())
    }

    async fn fetch_variables(&mut self, ups_name: &str) -> Result<RawTelemetry, UpsError> {
        let lines = self.list(&format!("VAR {}", ups_name)).await?;
        let mut vars = RawTelemetry::new();
        for line in lines {
            let (name, value) = parse_var_line(&line, ups_name)
                .ok_or_else(|| UpsError::Protocol(format!("malformed line: {}", line)))?;
            vars.insert(name, value);
        }
        Ok(vars)
    }

    async fn list_devices(&mut self) -> Result<Vec<UpsEntry>, UpsError> {
        let lines = self.list("UPS").await?;
        lines
            .iter()
            .map(|line| {
                parse_ups_line(line)
                    .ok_or_else(|| UpsError::Protocol(format!("malformed line: {}", line)))
            })
            .collect()
    }

    async fn close(&mut self) {
        if self.writer.is_some() {
            // Server answers "OK Goodbye"; the reply is not needed
            let _ = self.send("LOGOUT").await;
        }
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.shutdown().await;
        }
        self.reader = None;
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// `ERR ACCESS-DENIED` → `ACCESS-DENIED`
fn server_error(line: &str) -> Option<String> {
    line.strip_prefix("ERR ").map(|e| e.trim().to_string())
}

/// `VAR <ups> <name> "<value>"` → `(name, value)`
pub fn parse_var_line(line: &str, ups_name: &str) -> Option<(String, String)> {
    let rest = line.strip_prefix("VAR ")?.strip_prefix(ups_name)?;
    let rest = rest.strip_prefix(' ')?;
    let (name, quoted) = rest.split_once(' ')?;
    Some((name.to_string(), unquote(quoted)?))
}

/// `UPS <name> "<description>"` → entry
pub fn parse_ups_line(line: &str) -> Option<UpsEntry> {
    let rest = line.strip_prefix("UPS ")?;
    let (name, quoted) = rest.split_once(' ')?;
    Some(UpsEntry {
        name: name.to_string(),
        description: unquote(quoted)?,
    })
}

/// Strip surrounding quotes and resolve `\"` / `\\` escapes
fn unquote(s: &str) -> Option<String> {
    let inner = s.trim().strip_prefix('"')?.strip_suffix('"')?;
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            out.push(chars.next()?);
        } else {
            out.push(c);
        }
    }
    Some(out)
}
