//! IMAP mailbox source.
//!
//! Unseen messages are fetched with `BODY.PEEK[]` so they stay unseen until
//! acknowledged; acknowledgement sets `\Seen` on the handled UIDs. The `imap`
//! crate is blocking, so every session runs on the blocking pool under an
//! overall timeout, with socket level connect/read timeouts underneath.

use super::{MessageSource, RawMessage, SourceError};
use crate::config::ImapConfig;
use std::net::{TcpStream, ToSocketAddrs};

type ImapSession = ::imap::Session<native_tls::TlsStream<TcpStream>>;

pub struct ImapMailbox {
    config: ImapConfig,
    name: String,
}

impl ImapMailbox {
    pub fn new(config: ImapConfig) -> Self {
        let name = format!("imap {}@{}/{}", config.username, config.host, config.mailbox);
        Self { config, name }
    }

    async fn run_blocking<T, F>(&self, operation: F) -> Result<T, SourceError>
    where
        T: Send + 'static,
        F: FnOnce(ImapConfig) -> Result<T, SourceError> + Send + 'static,
    {
        let config = self.config.clone();
        let timeout = self.config.timeout;
        let task = tokio::task::spawn_blocking(move || operation(config));

        match tokio::time::timeout(timeout, task).await {
            Ok(joined) => joined?,
            Err(_) => Err(SourceError::Timeout(timeout)),
        }
    }
}

fn open_session(config: &ImapConfig) -> Result<ImapSession, SourceError> {
    let endpoint = format!("{}:{}", config.host, config.port);
    let connect_error = |reason: String| SourceError::Connect {
        endpoint: endpoint.clone(),
        reason,
    };

    let addr = (config.host.as_str(), config.port)
        .to_socket_addrs()
        .map_err(|err| connect_error(err.to_string()))?
        .next()
        .ok_or_else(|| connect_error("no address resolved".to_string()))?;

    let tcp = TcpStream::connect_timeout(&addr, config.timeout)
        .map_err(|err| connect_error(err.to_string()))?;
    tcp.set_read_timeout(Some(config.timeout))
        .map_err(|err| connect_error(err.to_string()))?;
    tcp.set_write_timeout(Some(config.timeout))
        .map_err(|err| connect_error(err.to_string()))?;

    let tls = native_tls::TlsConnector::builder().build()?;
    let stream = tls
        .connect(config.host.as_str(), tcp)
        .map_err(|err| connect_error(err.to_string()))?;

    let mut client = ::imap::Client::new(stream);
    client.read_greeting()?;

    let mut session = client
        .login(config.username.as_str(), config.password.as_str())
        .map_err(|(err, _)| SourceError::Imap(err))?;
    session.select(&config.mailbox)?;

    Ok(session)
}

fn fetch_unseen(config: ImapConfig) -> Result<Vec<RawMessage>, SourceError> {
    let mut session = open_session(&config)?;

    let mut uids: Vec<u32> = session.uid_search("UNSEEN")?.into_iter().collect();
    uids.sort_unstable();

    let mut messages = Vec::with_capacity(uids.len());
    for uid in uids {
        let fetches = match session.uid_fetch(uid.to_string(), "(UID BODY.PEEK[])") {
            Ok(fetches) => fetches,
            Err(err) => {
                log::warn!("failed to fetch message {} from {}: {}", uid, config.mailbox, err);
                continue;
            }
        };

        for fetch in fetches.iter() {
            let Some(body) = fetch.body() else {
                log::warn!("message {} in {} has no body", uid, config.mailbox);
                continue;
            };
            messages.push(RawMessage {
                id: fetch.uid.unwrap_or(uid).to_string(),
                bytes: body.to_vec(),
            });
        }
    }

    if let Err(err) = session.logout() {
        log::debug!("imap logout failed: {}", err);
    }

    Ok(messages)
}

fn mark_seen(config: ImapConfig, uids: Vec<String>) -> Result<(), SourceError> {
    let mut session = open_session(&config)?;
    session.uid_store(uids.join(","), "+FLAGS (\\Seen)")?;

    if let Err(err) = session.logout() {
        log::debug!("imap logout failed: {}", err);
    }
    Ok(())
}

#[rocket::async_trait]
impl MessageSource for ImapMailbox {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> Result<Vec<RawMessage>, SourceError> {
        self.run_blocking(fetch_unseen).await
    }

    async fn acknowledge(&self, ids: &[String]) -> Result<(), SourceError> {
        if ids.is_empty() {
            return Ok(());
        }
        let uids = ids.to_vec();
        self.run_blocking(move |config| mark_seen(config, uids)).await
    }
}
