//! Outgoing mail.

use crate::error::{HostError, HostResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::{path::PathBuf, process::Stdio};
use tokio::io::AsyncWriteExt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMail {
    pub from: String,
    pub to: Vec<String>,
    pub message: Vec<u8>,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, from: &str, to: &[String], message: &[u8]) -> HostResult<()>;
}

/// Logs messages instead of delivering them; keeps them for inspection.
#[derive(Debug, Default)]
pub struct LogMailer {
    sent: Mutex<Vec<SentMail>>,
}

impl LogMailer {
    pub fn sent(&self) -> Vec<SentMail> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, from: &str, to: &[String], message: &[u8]) -> HostResult<()> {
        tracing::info!(
            from,
            to = ?to,
            "mail (debug mode, not sent):\n{}",
            String::from_utf8_lossy(message)
        );
        self.sent.lock().push(SentMail {
            from: from.to_string(),
            to: to.to_vec(),
            message: message.to_vec(),
        });
        Ok(())
    }
}

/// Hands messages to a local `sendmail` binary.
#[derive(Debug, Clone)]
pub struct SendmailMailer {
    pub program: PathBuf,
}

#[async_trait]
impl Mailer for SendmailMailer {
    async fn send(&self, from: &str, to: &[String], message: &[u8]) -> HostResult<()> {
        let mut child = tokio::process::Command::new(&self.program)
            .arg("-i")
            .arg("-f")
            .arg(from)
            .arg("--")
            .args(to)
            .stdin(Stdio::piped())
            .spawn()
            .map_err(|e| HostError::Mail(format!("could not start {}: {e}", self.program.display())))?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(message)
                .await
                .map_err(|e| HostError::Mail(format!("could not write message: {e}")))?;
        }
        let status = child
            .wait()
            .await
            .map_err(|e| HostError::Mail(e.to_string()))?;
        if !status.success() {
            return Err(HostError::Mail(format!("sendmail exited with {status}")));
        }
        Ok(())
    }
}

/// Whether `raw` looks like a bare `local@domain` address that can go into
/// a header as is.
pub fn is_address(raw: &str) -> bool {
    let Some((local, domain)) = raw.split_once('@') else {
        return false;
    };
    let plain = |part: &str| {
        !part.is_empty()
            && part
                .chars()
                .all(|c| !c.is_whitespace() && !c.is_control() && !"@<>(),;:\"[]\\".contains(c))
    };
    plain(local)
        && plain(domain)
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
}

fn header_value(raw: &str) -> String {
    raw.replace(['\r', '\n'], " ")
}

/// A plain text message with the usual headers.
pub fn compose(from_name: &str, from: &str, to: &str, subject: &str, body: &str) -> Vec<u8> {
    let from_header = if from_name.is_empty() {
        header_value(from)
    } else {
        format!("\"{}\" <{}>", header_value(from_name).replace('"', ""), header_value(from))
    };
    format!(
        "From: {from_header}\r\nTo: {}\r\nSubject: {}\r\nDate: {}\r\nMIME-Version: 1.0\r\nContent-Type: text/plain; charset=utf-8\r\n\r\n{}",
        header_value(to),
        header_value(subject),
        chrono::Utc::now().to_rfc2822(),
        body.replace("\r\n", "\n").replace('\n', "\r\n"),
    )
    .into_bytes()
}
