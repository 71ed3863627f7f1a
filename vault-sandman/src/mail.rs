// SPDX-FileCopyrightText: 2026 Jörg Thalheim
// SPDX-License-Identifier: MIT

//! Notification messages and their delivery boundary.
//!
//! The notifier assembles complete messages (subject, body, gzipped FOFN
//! attachments); delivery is behind the [`Postman`] trait. The shipped
//! transport pipes an RFC-822 rendering to a sendmail-compatible command,
//! keeping SMTP itself outside this system.

use std::io::Write as _;
use std::os::unix::ffi::OsStrExt as _;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use data_encoding::BASE64_MIME;
use flate2::write::GzEncoder;
use flate2::Compression;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MailError {
    #[error("Could not send e-mail: {0}")]
    Delivery(String),

    #[error("Could not build message: {0}")]
    Build(#[from] std::io::Error),
}

/// An attachment, fully rendered.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub filename: String,
    pub mime_type: &'static str,
    pub data: Vec<u8>,
}

/// A gzip-compressed, newline-delimited file-of-filenames attachment.
pub fn gzipped_fofn(filename: &str, files: &[PathBuf]) -> Result<Attachment, MailError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    for path in files {
        encoder.write_all(path.as_os_str().as_bytes())?;
        encoder.write_all(b"\n")?;
    }

    Ok(Attachment {
        filename: filename.to_string(),
        mime_type: "application/gzip",
        data: encoder.finish()?,
    })
}

/// A notification message.
#[derive(Debug, Clone, Default)]
pub struct Message {
    pub subject: String,
    pub body: String,
    pub attachments: Vec<Attachment>,
}

impl Message {
    pub fn new(subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            body: body.into(),
            attachments: Vec::new(),
        }
    }

    pub fn attach(&mut self, attachment: Attachment) {
        self.attachments.push(attachment);
    }

    /// Render to RFC-822 with MIME multipart attachments.
    pub fn to_rfc822(&self, sender: &str, recipient: &str) -> Vec<u8> {
        const BOUNDARY: &str = "=_vault-notification";

        let mut out = Vec::new();
        let _ = write!(
            out,
            "From: {sender}\r\nTo: {recipient}\r\nSubject: {}\r\n",
            self.subject
        );
        let _ = write!(out, "MIME-Version: 1.0\r\n");
        let _ = write!(
            out,
            "Content-Type: multipart/mixed; boundary=\"{BOUNDARY}\"\r\n\r\n"
        );

        let _ = write!(out, "--{BOUNDARY}\r\n");
        let _ = write!(out, "Content-Type: text/plain; charset=utf-8\r\n\r\n");
        let _ = write!(out, "{}\r\n", self.body);

        for attachment in &self.attachments {
            let _ = write!(out, "--{BOUNDARY}\r\n");
            let _ = write!(out, "Content-Type: {}\r\n", attachment.mime_type);
            let _ = write!(out, "Content-Transfer-Encoding: base64\r\n");
            let _ = write!(
                out,
                "Content-Disposition: attachment; filename=\"{}\"\r\n\r\n",
                attachment.filename
            );
            let _ = write!(out, "{}\r\n", BASE64_MIME.encode(&attachment.data));
        }
        let _ = write!(out, "--{BOUNDARY}--\r\n");

        out
    }
}

/// Delivery boundary.
pub trait Postman {
    fn send(&self, message: &Message, recipient: &str) -> Result<(), MailError>;
}

/// Pipes messages to a sendmail-compatible delivery command.
pub struct PipePostman {
    command: PathBuf,
    sender: String,
}

impl PipePostman {
    pub fn new(command: &Path, sender: &str) -> Self {
        Self {
            command: command.to_path_buf(),
            sender: sender.to_string(),
        }
    }
}

impl Postman for PipePostman {
    fn send(&self, message: &Message, recipient: &str) -> Result<(), MailError> {
        let mut child = Command::new(&self.command)
            .arg("-i")
            .arg(recipient)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| MailError::Delivery(format!("{}: {e}", self.command.display())))?;

        {
            let stdin = child
                .stdin
                .as_mut()
                .ok_or_else(|| MailError::Delivery("no stdin on delivery command".into()))?;
            stdin.write_all(&message.to_rfc822(&self.sender, recipient))?;
        }

        let status = child
            .wait()
            .map_err(|e| MailError::Delivery(format!("{}: {e}", self.command.display())))?;
        if !status.success() {
            return Err(MailError::Delivery(format!(
                "{} exited with {status}",
                self.command.display()
            )));
        }

        Ok(())
    }
}
