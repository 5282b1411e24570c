//! IMAP message source — raw IMAP over rustls, parsed with mail-parser.
//!
//! The session runs on a blocking thread. Messages are fetched with
//! `BODY.PEEK[]` so the mailbox's `\Seen` flags are left alone.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use mail_parser::MessageParser;
use secrecy::ExposeSecret;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ImapConfig;
use crate::error::SourceError;
use crate::pipeline::types::{MessageSource, RawMessage};

/// Snippet length in characters.
pub const SNIPPET_CHARS: usize = 200;

const IO_TIMEOUT: Duration = Duration::from_secs(30);

/// Fetches recent messages from one IMAP mailbox.
pub struct ImapSource {
    config: ImapConfig,
}

impl ImapSource {
    pub fn new(config: ImapConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl MessageSource for ImapSource {
    fn name(&self) -> &str {
        "imap"
    }

    async fn fetch_recent(
        &self,
        max_count: usize,
        window: Duration,
    ) -> Result<Vec<RawMessage>, SourceError> {
        let config = self.config.clone();
        let since = window_start(Utc::now(), window)?;

        let messages = tokio::task::spawn_blocking(move || {
            let stream = connect(&config)?;
            fetch_recent_over(stream, &config, max_count, since)
        })
        .await
        .map_err(|e| SourceError::Aborted(e.to_string()))??;

        info!(
            host = %self.config.host,
            mailbox = %self.config.mailbox,
            count = messages.len(),
            "Fetched recent messages"
        );
        Ok(messages)
    }
}

/// Start of the fetch window ending at `now`.
fn window_start(now: DateTime<Utc>, window: Duration) -> Result<DateTime<Utc>, SourceError> {
    chrono::Duration::from_std(window)
        .ok()
        .and_then(|w| now.checked_sub_signed(w))
        .ok_or(SourceError::WindowOutOfRange(window))
}

type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

fn connect(config: &ImapConfig) -> Result<TlsStream, SourceError> {
    let connect_err = |reason: String| SourceError::Connect {
        host: config.host.clone(),
        reason,
    };

    let tcp = TcpStream::connect((&*config.host, config.port))
        .map_err(|e| connect_err(e.to_string()))?;
    tcp.set_read_timeout(Some(IO_TIMEOUT))
        .map_err(|e| connect_err(e.to_string()))?;
    tcp.set_write_timeout(Some(IO_TIMEOUT))
        .map_err(|e| connect_err(e.to_string()))?;

    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let tls_config = Arc::new(
        rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth(),
    );
    let server_name = rustls_pki_types::ServerName::try_from(config.host.clone())
        .map_err(|e| connect_err(e.to_string()))?;
    let conn = rustls::ClientConnection::new(tls_config, server_name)
        .map_err(|e| connect_err(e.to_string()))?;

    Ok(rustls::StreamOwned::new(conn, tcp))
}

/// Run the whole search-and-fetch conversation over an established stream.
///
/// Returns at most `max_count` messages, newest first.
fn fetch_recent_over<S: Read + Write>(
    stream: S,
    config: &ImapConfig,
    max_count: usize,
    since: DateTime<Utc>,
) -> Result<Vec<RawMessage>, SourceError> {
    let mut session = ImapSession::new(stream, &config.host);
    session.greeting()?;

    let login = session.command(&format!(
        "LOGIN {} {}",
        quote(&config.username),
        quote(config.password.expose_secret())
    ))?;
    if !login.ok {
        return Err(SourceError::AuthFailed {
            host: config.host.clone(),
            user: config.username.clone(),
        });
    }

    session
        .command(&format!("SELECT {}", quote(&config.mailbox)))?
        .require_ok(&config.host, "SELECT")?;

    let search = session.command(&format!("SEARCH SINCE {}", imap_date(since.date_naive())))?;
    let search = search.require_ok(&config.host, "SEARCH")?;
    let ids = search_ids(&search.lines);
    debug!(matched = ids.len(), "IMAP search complete");

    let mut messages = Vec::new();
    for id in newest(&ids, max_count) {
        let reply = session
            .command(&format!("FETCH {id} BODY.PEEK[]"))?
            .require_ok(&config.host, "FETCH")?;
        let Some(raw) = reply.literals.first() else {
            warn!(seq = id, "FETCH returned no message body");
            continue;
        };
        match parse_message(raw) {
            Some(parsed) => {
                if parsed.date.is_some_and(|date| date < since) {
                    debug!(seq = id, "Skipping message older than the window");
                    continue;
                }
                messages.push(parsed.message);
            }
            None => warn!(seq = id, "Could not parse message"),
        }
    }

    // A failed LOGOUT does not invalidate what was fetched.
    if let Err(e) = session.command("LOGOUT") {
        debug!(error = %e, "IMAP logout failed");
    }

    Ok(messages)
}

/// Tagged reply to one command.
struct Reply {
    lines: Vec<String>,
    literals: Vec<Vec<u8>>,
    ok: bool,
    status: String,
}

impl Reply {
    fn require_ok(self, host: &str, command: &str) -> Result<Self, SourceError> {
        if self.ok {
            Ok(self)
        } else {
            Err(SourceError::Protocol {
                host: host.to_string(),
                reason: format!("{command} rejected: {}", self.status.trim()),
            })
        }
    }
}

struct ImapSession<S: Read + Write> {
    stream: BufReader<S>,
    host: String,
    next_tag: u32,
}

impl<S: Read + Write> ImapSession<S> {
    fn new(stream: S, host: &str) -> Self {
        Self {
            stream: BufReader::new(stream),
            host: host.to_string(),
            next_tag: 1,
        }
    }

    fn protocol(&self, reason: impl Into<String>) -> SourceError {
        SourceError::Protocol {
            host: self.host.clone(),
            reason: reason.into(),
        }
    }

    fn read_line(&mut self) -> Result<String, SourceError> {
        let mut buf = Vec::new();
        let n = self
            .stream
            .read_until(b'\n', &mut buf)
            .map_err(|e| self.protocol(e.to_string()))?;
        if n == 0 {
            return Err(self.protocol("connection closed"));
        }
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    fn greeting(&mut self) -> Result<(), SourceError> {
        let line = self.read_line()?;
        if line.starts_with("* OK") || line.starts_with("* PREAUTH") {
            Ok(())
        } else {
            Err(self.protocol(format!("unexpected greeting: {}", line.trim())))
        }
    }

    fn command(&mut self, command: &str) -> Result<Reply, SourceError> {
        let tag = format!("A{}", self.next_tag);
        self.next_tag += 1;

        let full = format!("{tag} {command}\r\n");
        let sent = {
            let writer = self.stream.get_mut();
            writer.write_all(full.as_bytes()).and_then(|()| writer.flush())
        };
        sent.map_err(|e| self.protocol(e.to_string()))?;

        let tagged = format!("{tag} ");
        let mut reply = Reply {
            lines: Vec::new(),
            literals: Vec::new(),
            ok: false,
            status: String::new(),
        };
        loop {
            let line = self.read_line()?;
            if let Some(status) = line.strip_prefix(&tagged) {
                reply.ok = status.starts_with("OK");
                reply.status = status.to_string();
                return Ok(reply);
            }
            if let Some(len) = literal_len(&line) {
                let mut literal = vec![0u8; len];
                self.stream
                    .read_exact(&mut literal)
                    .map_err(|e| self.protocol(e.to_string()))?;
                reply.literals.push(literal);
            }
            reply.lines.push(line);
        }
    }
}

/// Byte count of a `{N}` literal announced at the end of a line.
fn literal_len(line: &str) -> Option<usize> {
    let line = line.trim_end();
    let inner = line.strip_suffix('}')?;
    let open = inner.rfind('{')?;
    inner[open + 1..].parse().ok()
}

fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

/// IMAP search date, e.g. `05-Mar-2025`.
fn imap_date(date: NaiveDate) -> String {
    date.format("%d-%b-%Y").to_string()
}

fn search_ids(lines: &[String]) -> Vec<u32> {
    lines
        .iter()
        .filter_map(|line| line.strip_prefix("* SEARCH"))
        .flat_map(|rest| rest.split_whitespace())
        .filter_map(|id| id.parse().ok())
        .collect()
}

/// The last `max_count` ids, newest first.
fn newest(ids: &[u32], max_count: usize) -> Vec<u32> {
    ids.iter().rev().take(max_count).copied().collect()
}

struct ParsedMessage {
    message: RawMessage,
    date: Option<DateTime<Utc>>,
}

fn parse_message(raw: &[u8]) -> Option<ParsedMessage> {
    let parsed = MessageParser::default().parse(raw)?;

    let id = parsed
        .message_id()
        .map(str::to_string)
        .unwrap_or_else(|| format!("gen-{}", Uuid::new_v4()));
    let subject = parsed.subject().unwrap_or_default().trim().to_string();
    let body = extract_text(&parsed);
    let snippet = snippet(&body);

    Some(ParsedMessage {
        message: RawMessage::new(id, extract_sender(&parsed), subject)
            .with_snippet(snippet)
            .with_body(body),
        date: parsed.date().and_then(to_utc),
    })
}

/// `Name <address>` when a display name is present, otherwise the address.
fn extract_sender(parsed: &mail_parser::Message) -> String {
    let Some(addr) = parsed.from().and_then(|a| a.first()) else {
        return String::new();
    };
    match (addr.name(), addr.address()) {
        (Some(name), Some(address)) if !name.trim().is_empty() => {
            format!("{} <{}>", name.trim(), address)
        }
        (_, Some(address)) => address.to_string(),
        (Some(name), None) => name.to_string(),
        (None, None) => String::new(),
    }
}

/// Plain-text body, or the HTML body with tags stripped.
fn extract_text(parsed: &mail_parser::Message) -> String {
    if let Some(text) = parsed.body_text(0)
        && !text.trim().is_empty()
    {
        return text.into_owned();
    }
    parsed
        .body_html(0)
        .map(|html| strip_html(&html))
        .unwrap_or_default()
}

fn to_utc(date: &mail_parser::DateTime) -> Option<DateTime<Utc>> {
    let local = NaiveDate::from_ymd_opt(
        i32::from(date.year),
        u32::from(date.month),
        u32::from(date.day),
    )?
    .and_hms_opt(
        u32::from(date.hour),
        u32::from(date.minute),
        u32::from(date.second),
    )?
    .and_utc();
    let offset =
        chrono::Duration::seconds(i64::from(date.tz_hour) * 3600 + i64::from(date.tz_minute) * 60);
    // `-0500` means local time is behind UTC.
    Some(if date.tz_before_gmt {
        local + offset
    } else {
        local - offset
    })
}

/// First `SNIPPET_CHARS` characters of the body on a single line.
pub fn snippet(body: &str) -> String {
    let flat: String = body
        .chars()
        .take(SNIPPET_CHARS)
        .map(|c| if c == '\r' || c == '\n' { ' ' } else { c })
        .collect();
    flat.trim().to_string()
}

/// Strip HTML tags and collapse whitespace.
pub fn strip_html(html: &str) -> String {
    let mut result = String::with_capacity(html.len());
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => {
                in_tag = true;
                result.push(' ');
            }
            '>' => in_tag = false,
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }
    result.split_whitespace().collect::<Vec<_>>().join(" ")
}
