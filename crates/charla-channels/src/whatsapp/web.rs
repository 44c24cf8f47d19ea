use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use charla_common::{Error, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::traits::{Channel, ChannelStatus};

use super::{WhatsAppEvent, WhatsAppOnMessageFn};

/// How long the sidecar gets from spawn to `ready` (QR scans are slow).
const CONNECT_TIMEOUT: Duration = Duration::from_secs(300);

/// Connection state shared with the reader task and the admin API.
struct SharedState {
    status: RwLock<ChannelStatus>,
    qr_code: RwLock<Option<String>>,
}

impl SharedState {
    fn set_status(&self, status: ChannelStatus) {
        *self.status.write().expect("status lock poisoned") = status;
    }

    fn status(&self) -> ChannelStatus {
        self.status.read().expect("status lock poisoned").clone()
    }

    fn set_qr(&self, qr: Option<String>) {
        *self.qr_code.write().expect("qr lock poisoned") = qr;
    }

    fn qr(&self) -> Option<String> {
        self.qr_code.read().expect("qr lock poisoned").clone()
    }
}

/// Sidecar-driven WhatsApp Web channel (QR code pairing). A Node child
/// process owns the WhatsApp session and speaks JSON lines over stdio; this
/// side only forwards events and send commands.
pub struct WhatsAppWebChannel {
    child: Option<Child>,
    stdin_tx: Option<mpsc::Sender<String>>,
    shared: Arc<SharedState>,
    display: String,
    on_message: WhatsAppOnMessageFn,
    auth_dir: PathBuf,
    sidecar_dir: PathBuf,
}

impl WhatsAppWebChannel {
    pub fn new(on_message: WhatsAppOnMessageFn) -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        let config_dir = home.join(".charla");

        Self {
            child: None,
            stdin_tx: None,
            shared: Arc::new(SharedState {
                status: RwLock::new(ChannelStatus::Disconnected),
                qr_code: RwLock::new(None),
            }),
            display: "WhatsApp Web".to_string(),
            on_message,
            auth_dir: config_dir.join("whatsapp-auth"),
            sidecar_dir: config_dir.join("sidecar").join("whatsapp-web"),
        }
    }

    /// Latest QR code (a data URL) while pairing; cleared once connected.
    pub fn qr_code(&self) -> Option<String> {
        self.shared.qr()
    }

    // Embedded sidecar files - written to disk on first connect if not found elsewhere.
    const EMBEDDED_INDEX_MJS: &'static str =
        include_str!("../../../../sidecar/whatsapp-web/index.mjs");
    const EMBEDDED_PACKAGE_JSON: &'static str =
        include_str!("../../../../sidecar/whatsapp-web/package.json");

    /// Resolve the sidecar directory. Checks `~/.charla/sidecar/whatsapp-web/`
    /// first, then the path relative to the binary, then extracts the
    /// embedded files as a last resort.
    fn resolve_sidecar_dir(&self) -> Result<PathBuf> {
        if self.sidecar_dir.join("index.mjs").exists() {
            return Ok(self.sidecar_dir.clone());
        }

        if let Ok(exe) = std::env::current_exe()
            && let Some(parent) = exe.parent()
        {
            let bundled = parent.join("sidecar").join("whatsapp-web");
            if bundled.join("index.mjs").exists() {
                return Ok(bundled);
            }
            // Also check repo layout (binary in target/debug or target/release)
            let repo_sidecar = parent
                .parent()
                .and_then(|p| p.parent())
                .map(|p| p.join("sidecar").join("whatsapp-web"));
            if let Some(ref repo) = repo_sidecar
                && repo.join("index.mjs").exists()
            {
                return Ok(repo.clone());
            }
        }

        info!(
            "whatsapp-web: extracting embedded sidecar to {}",
            self.sidecar_dir.display()
        );
        std::fs::create_dir_all(&self.sidecar_dir).map_err(|e| {
            Error::Channel(format!(
                "failed to create sidecar dir {}: {e}",
                self.sidecar_dir.display()
            ))
        })?;
        std::fs::write(self.sidecar_dir.join("index.mjs"), Self::EMBEDDED_INDEX_MJS)
            .map_err(|e| Error::Channel(format!("failed to write index.mjs: {e}")))?;
        std::fs::write(
            self.sidecar_dir.join("package.json"),
            Self::EMBEDDED_PACKAGE_JSON,
        )
        .map_err(|e| Error::Channel(format!("failed to write package.json: {e}")))?;
        Ok(self.sidecar_dir.clone())
    }

    /// Ensure node_modules exist by running `npm install --omit=dev`.
    async fn ensure_npm_install(&self, sidecar_dir: &PathBuf) -> Result<()> {
        if sidecar_dir.join("node_modules").exists() {
            return Ok(());
        }

        info!("whatsapp-web: running npm install (first time setup)...");
        let status = Command::new("npm")
            .args(["install", "--omit=dev"])
            .current_dir(sidecar_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .status()
            .await
            .map_err(|e| {
                Error::Channel(format!(
                    "failed to run npm install: {e} (is Node.js installed?)"
                ))
            })?;

        if !status.success() {
            return Err(Error::Channel(
                "npm install failed for whatsapp-web sidecar".into(),
            ));
        }

        info!("whatsapp-web: npm install completed");
        Ok(())
    }

    async fn send_command(&self, json: &str) -> Result<()> {
        let Some(tx) = &self.stdin_tx else {
            return Err(Error::Channel("whatsapp channel is not connected".into()));
        };
        tx.send(json.to_string())
            .await
            .map_err(|e| Error::Channel(format!("failed to send to sidecar: {e}")))
    }
}

#[async_trait]
impl Channel for WhatsAppWebChannel {
    fn channel_type(&self) -> &str {
        "whatsapp-web"
    }

    fn display_name(&self) -> &str {
        &self.display
    }

    async fn connect(&mut self) -> Result<()> {
        self.shared.set_status(ChannelStatus::Connecting);
        self.shared.set_qr(None);

        let sidecar_dir = self.resolve_sidecar_dir()?;
        self.ensure_npm_install(&sidecar_dir).await?;

        if !self.auth_dir.exists() {
            std::fs::create_dir_all(&self.auth_dir).map_err(|e| {
                Error::Channel(format!(
                    "failed to create auth dir {}: {e}",
                    self.auth_dir.display()
                ))
            })?;
        }

        let mut child = Command::new("node")
            .arg("index.mjs")
            .current_dir(&sidecar_dir)
            .env("WHATSAPP_AUTH_DIR", &self.auth_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| {
                Error::Channel(format!(
                    "failed to spawn whatsapp-web sidecar: {e} (is Node.js installed?)"
                ))
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Channel("no stdout from sidecar".into()))?;

        let child_stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Channel("no stdin to sidecar".into()))?;

        self.child = Some(child);

        // Writer task: forward commands from channel to sidecar stdin
        let (stdin_tx, mut stdin_rx) = mpsc::channel::<String>(64);
        self.stdin_tx = Some(stdin_tx.clone());

        tokio::spawn(async move {
            let mut writer = child_stdin;
            while let Some(line) = stdin_rx.recv().await {
                let data = format!("{line}\n");
                if writer.write_all(data.as_bytes()).await.is_err() {
                    break;
                }
                if writer.flush().await.is_err() {
                    break;
                }
            }
        });

        // Reader task: parse events from sidecar stdout
        let on_message = Arc::clone(&self.on_message);
        let shared = Arc::clone(&self.shared);
        let reply_tx = stdin_tx;

        tokio::spawn(async move {
            let reader = BufReader::new(stdout);
            let mut lines = reader.lines();

            while let Ok(Some(line)) = lines.next_line().await {
                let Some(event) = parse_event(&line) else {
                    continue;
                };

                match event {
                    SidecarEvent::Qr(data) => {
                        info!("whatsapp-web: QR code generated, waiting for scan...");
                        shared.set_qr(Some(data));
                    }
                    SidecarEvent::Ready => {
                        info!("whatsapp-web: connected and ready");
                        shared.set_qr(None);
                        shared.set_status(ChannelStatus::Connected);
                    }
                    SidecarEvent::Message(message) => {
                        let reply_tx = reply_tx.clone();
                        let on_message = Arc::clone(&on_message);
                        let to = message.from.clone();

                        tokio::spawn(async move {
                            match (on_message)(message).await {
                                Ok(Some(response)) => {
                                    let cmd = serde_json::json!({
                                        "type": "send",
                                        "to": to,
                                        "text": response,
                                    });
                                    let _ = reply_tx
                                        .send(serde_json::to_string(&cmd).unwrap_or_default())
                                        .await;
                                }
                                Ok(None) => {}
                                Err(e) => {
                                    warn!("whatsapp-web: message handler error: {e}");
                                }
                            }
                        });
                    }
                    SidecarEvent::Disconnected(reason) => {
                        warn!("whatsapp-web: disconnected ({reason})");
                        shared.set_status(ChannelStatus::Error(reason));
                    }
                }
            }
            info!("whatsapp-web: sidecar stdout closed");
        });

        // Watchdog: pairing that never completes ends up visible in status.
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            tokio::time::sleep(CONNECT_TIMEOUT).await;
            if shared.status().is_connecting() {
                warn!(
                    "whatsapp-web: not ready after {}s, marking as failed",
                    CONNECT_TIMEOUT.as_secs()
                );
                shared.set_status(ChannelStatus::Error("connection timed out".into()));
            }
        });

        info!("whatsapp-web channel starting, waiting for sidecar ready");
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        // Drop stdin sender - sidecar detects stdin close and exits gracefully
        self.stdin_tx.take();

        if let Some(mut child) = self.child.take() {
            match tokio::time::timeout(Duration::from_secs(5), child.wait()).await {
                Ok(_) => {}
                Err(_) => {
                    warn!("whatsapp-web: sidecar did not exit in time, killing");
                    child.kill().await.ok();
                }
            }
        }

        self.shared.set_status(ChannelStatus::Disconnected);
        self.shared.set_qr(None);
        info!("whatsapp-web channel disconnected");
        Ok(())
    }

    async fn send_text(&self, to: &str, text: &str) -> Result<()> {
        if !self.status().is_ready() {
            return Err(Error::Channel("whatsapp channel is not ready".into()));
        }

        let cmd = serde_json::json!({
            "type": "send",
            "to": normalize_chat_id(to),
            "text": text,
        });
        self.send_command(&serde_json::to_string(&cmd).unwrap_or_default())
            .await
    }

    fn status(&self) -> ChannelStatus {
        self.shared.status()
    }
}

/// Bare phone numbers become direct-chat ids; full ids pass through.
fn normalize_chat_id(to: &str) -> String {
    if to.contains('@') {
        to.to_string()
    } else {
        format!("{to}@c.us")
    }
}

enum SidecarEvent {
    Qr(String),
    Ready,
    Message(WhatsAppEvent),
    Disconnected(String),
}

fn parse_event(line: &str) -> Option<SidecarEvent> {
    let event: serde_json::Value = serde_json::from_str(line).ok()?;
    let event_type = event.get("type").and_then(|v| v.as_str()).unwrap_or("");

    match event_type {
        "qr" => {
            let data = event.get("data").and_then(|v| v.as_str())?;
            Some(SidecarEvent::Qr(data.to_string()))
        }
        "ready" => Some(SidecarEvent::Ready),
        "message" => {
            let from = event.get("from").and_then(|v| v.as_str()).unwrap_or("");
            let text = event.get("text").and_then(|v| v.as_str()).unwrap_or("");
            if from.is_empty() || text.is_empty() {
                return None;
            }
            let get_str = |key: &str| {
                event
                    .get(key)
                    .and_then(|v| v.as_str())
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
            };
            Some(SidecarEvent::Message(WhatsAppEvent {
                from: from.to_string(),
                number: get_str("number"),
                name: get_str("name"),
                text: text.to_string(),
                is_group: event
                    .get("isGroup")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false),
                mentioned_me: event
                    .get("mentionedMe")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false),
                quoted_from_me: event
                    .get("quotedFromMe")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false),
            }))
        }
        "disconnected" => {
            let reason = event
                .get("reason")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown");
            Some(SidecarEvent::Disconnected(reason.to_string()))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_handler() -> WhatsAppOnMessageFn {
        Arc::new(|_event| Box::pin(async { Ok(None) }))
    }

    #[test]
    fn channel_starts_disconnected() {
        let channel = WhatsAppWebChannel::new(noop_handler());
        assert_eq!(channel.channel_type(), "whatsapp-web");
        assert_eq!(channel.display_name(), "WhatsApp Web");
        assert_eq!(channel.status(), ChannelStatus::Disconnected);
        assert!(channel.qr_code().is_none());
    }

    #[test]
    fn normalize_chat_id_appends_direct_suffix() {
        assert_eq!(normalize_chat_id("5215550001111"), "5215550001111@c.us");
        assert_eq!(normalize_chat_id("abc@g.us"), "abc@g.us");
    }

    #[test]
    fn parse_event_reads_message_fields() {
        let line = r#"{"type":"message","from":"521555@c.us","number":"521555","name":"Eva","text":"hola","isGroup":true,"mentionedMe":true,"quotedFromMe":false}"#;
        let Some(SidecarEvent::Message(event)) = parse_event(line) else {
            panic!("expected message event");
        };
        assert_eq!(event.from, "521555@c.us");
        assert_eq!(event.number.as_deref(), Some("521555"));
        assert_eq!(event.name.as_deref(), Some("Eva"));
        assert_eq!(event.text, "hola");
        assert!(event.is_group);
        assert!(event.mentioned_me);
        assert!(!event.quoted_from_me);
    }

    #[test]
    fn parse_event_drops_empty_messages() {
        assert!(parse_event(r#"{"type":"message","from":"x@c.us","text":""}"#).is_none());
        assert!(parse_event(r#"{"type":"message","from":"","text":"hola"}"#).is_none());
        assert!(parse_event("not json").is_none());
        assert!(parse_event(r#"{"type":"pong"}"#).is_none());
    }

    #[test]
    fn parse_event_reads_lifecycle_events() {
        assert!(matches!(
            parse_event(r#"{"type":"qr","data":"data:image/png;base64,AAA"}"#),
            Some(SidecarEvent::Qr(data)) if data.starts_with("data:image")
        ));
        assert!(matches!(
            parse_event(r#"{"type":"ready"}"#),
            Some(SidecarEvent::Ready)
        ));
        assert!(matches!(
            parse_event(r#"{"type":"disconnected","reason":"logged out"}"#),
            Some(SidecarEvent::Disconnected(reason)) if reason == "logged out"
        ));
    }
}
