//! XMPP transport: tunnels packets as base64 chat-message bodies over an
//! existing XMPP account, the way the original hid traffic inside a chat
//! stream to a fixed remote JID. This is a thin adapter over
//! [`tokio_xmpp`]'s client, kept only to the depth the non-goal it's
//! scoped under calls for: connect, send a stanza, receive a stanza.
//! Reconnection policy, presence handling, and the original's
//! rate-limit-message detection are not reimplemented.

use std::str::FromStr;

use async_trait::async_trait;
use base64::Engine;
use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::{mpsc, Mutex};
use tokio_xmpp::{AsyncClient, Event};
use xmpp_parsers::jid::Jid;
use xmpp_parsers::message::{Body, Message, MessageType};

use crate::{Gateway, Transport, TransportError};

const DEFAULT_MTU: usize = 1000;

#[derive(Debug, Deserialize)]
struct XmppOptions {
    mtu: Option<usize>,
    host: Option<String>,
    server_username: Option<String>,
    server_password: Option<String>,
    client_username: Option<String>,
    client_password: Option<String>,
}

impl XmppOptions {
    fn credentials(&self, is_server: bool) -> Result<(&str, &str), TransportError> {
        let (user, pass) = if is_server {
            (&self.server_username, &self.server_password)
        } else {
            (&self.client_username, &self.client_password)
        };
        let prefix = if is_server { "server_" } else { "client_" };
        Ok((
            user.as_deref()
                .ok_or(TransportError::MissingOption(err_field(prefix, "username")))?,
            pass.as_deref()
                .ok_or(TransportError::MissingOption(err_field(prefix, "password")))?,
        ))
    }

    fn remote_username(&self, is_server: bool) -> Result<&str, TransportError> {
        // The remote we talk to is the *other* role's account.
        if is_server {
            self.client_username
                .as_deref()
                .ok_or(TransportError::MissingOption("client_username"))
        } else {
            self.server_username
                .as_deref()
                .ok_or(TransportError::MissingOption("server_username"))
        }
    }
}

fn err_field(prefix: &'static str, field: &'static str) -> &'static str {
    match (prefix, field) {
        ("server_", "username") => "server_username",
        ("server_", "password") => "server_password",
        ("client_", "username") => "client_username",
        _ => "client_password",
    }
}

/// Carries tunnel packets as base64-encoded chat message bodies sent to a
/// single fixed remote JID.
pub struct XmppTransport {
    mtu: usize,
    remote: Jid,
    inbox: Mutex<mpsc::Receiver<Vec<u8>>>,
    outbox: mpsc::Sender<String>,
}

impl XmppTransport {
    pub async fn open(
        is_server: bool,
        options: &serde_json::value::RawValue,
    ) -> Result<Self, TransportError> {
        let options: XmppOptions =
            serde_json::from_str(options.get()).map_err(|source| TransportError::InvalidOptions {
                name: "xmpp",
                source,
            })?;

        let mtu = options.mtu.unwrap_or(DEFAULT_MTU);
        let host = options.host.clone();
        let (username, password) = options.credentials(is_server)?;
        let remote_username = options.remote_username(is_server)?.to_string();

        let jid_str = match &host {
            Some(host) => format!("{username}@{host}"),
            None => username.to_string(),
        };
        let remote_jid_str = match &host {
            Some(host) => format!("{remote_username}@{host}"),
            None => remote_username.clone(),
        };

        let remote = Jid::from_str(&remote_jid_str)
            .map_err(|_| TransportError::MissingOption("remote username is not a valid JID"))?;

        tracing::info!(server = %jid_str, remote_id = %remote_jid_str, "connecting to remote");

        let mut client = AsyncClient::new(&jid_str, password)
            .map_err(|err| TransportError::Io(std::io::Error::other(err.to_string())))?;

        let (inbox_tx, inbox_rx) = mpsc::channel::<Vec<u8>>(64);
        let (outbox_tx, mut outbox_rx) = mpsc::channel::<String>(64);
        let expected_remote = remote.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = client.next() => {
                        let Some(event) = event else { break };
                        handle_event(event, &expected_remote, &inbox_tx).await;
                    }
                    Some(text) = outbox_rx.recv() => {
                        let message = Message {
                            from: None,
                            to: Some(expected_remote.clone()),
                            id: None,
                            type_: MessageType::Chat,
                            bodies: [("".to_string(), Body(text))].into_iter().collect(),
                            subjects: Default::default(),
                            thread: None,
                            payloads: Vec::new(),
                        };
                        if let Err(err) = client.send_stanza(message.into()).await {
                            tracing::warn!(%err, "failed to send xmpp stanza");
                        }
                    }
                }
            }
        });

        Ok(Self {
            mtu,
            remote,
            inbox: Mutex::new(inbox_rx),
            outbox: outbox_tx,
        })
    }
}

async fn handle_event(event: Event, expected_remote: &Jid, inbox: &mpsc::Sender<Vec<u8>>) {
    let Event::Stanza(stanza) = event else {
        return;
    };
    let Ok(message) = Message::try_from(stanza) else {
        return;
    };
    let Some(from) = &message.from else { return };
    if from.clone().into_bare() != expected_remote.clone().into_bare() {
        tracing::warn!(%from, "remote id does not match, ignoring");
        return;
    }

    for (_, body) in &message.bodies {
        if body.0.is_empty() {
            continue;
        }
        match base64::engine::general_purpose::STANDARD.decode(&body.0) {
            Ok(bytes) => {
                let _ = inbox.send(bytes).await;
            }
            Err(_) => tracing::warn!(text = %body.0, "unable to decode xmpp payload"),
        }
    }
}

#[async_trait]
impl Transport for XmppTransport {
    fn mtu(&self) -> usize {
        self.mtu
    }

    fn gateways(&self) -> Vec<Gateway> {
        // The original left this unimplemented (`GetWireNetworks` is a
        // documented `// FIXME`); an XMPP server's address isn't something
        // this transport resolves to a single IP worth excluding from the
        // tunnel, so we report no gateways.
        Vec::new()
    }

    async fn recv(&self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let mut inbox = self.inbox.lock().await;
        match inbox.recv().await {
            Some(bytes) => {
                let n = bytes.len().min(buf.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                Ok(n)
            }
            None => Err(TransportError::Io(std::io::Error::other(
                "xmpp client task has stopped",
            ))),
        }
    }

    async fn send(&self, buf: &[u8]) -> Result<usize, TransportError> {
        let text = base64::engine::general_purpose::STANDARD.encode(buf);
        self.outbox
            .send(text)
            .await
            .map_err(|_| TransportError::Io(std::io::Error::other("xmpp client task has stopped")))?;
        Ok(buf.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_require_both_username_and_password() {
        let opts = XmppOptions {
            mtu: None,
            host: None,
            server_username: Some("server@example.com".to_string()),
            server_password: None,
            client_username: None,
            client_password: None,
        };

        assert!(matches!(
            opts.credentials(true),
            Err(TransportError::MissingOption("server_password"))
        ));
    }
}
