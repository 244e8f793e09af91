//! In-memory collaborators and a recording channel for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use secrecy::SecretString;
use uuid::Uuid;

use crate::bot::BotDeps;
use crate::channels::{
    Channel, EventStream, IncomingEvent, MessageHandle, OutgoingImage, OutgoingMessage,
};
use crate::error::{AgentError, ChannelError, ImageError, PinningError, StorageError, WalletError};
use crate::services::{
    Capability, CapabilitySet, ConversationalAgent, ImageFetcher, ImageGenerator, ImageRecord,
    ImageStore, MetadataPinner, WalletExport, WalletRecord, WalletService,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Everything a [`RecordingChannel`] was asked to do, in order.
#[derive(Debug, Clone)]
pub enum Sent {
    Message {
        conversation_id: String,
        handle: MessageHandle,
        message: OutgoingMessage,
    },
    Image {
        conversation_id: String,
        handle: MessageHandle,
        image: OutgoingImage,
    },
    Deleted {
        conversation_id: String,
        handle: MessageHandle,
    },
    Typing {
        conversation_id: String,
    },
    Acknowledged {
        event_id: Uuid,
        text: Option<String>,
    },
}

/// A channel that records outbound calls and replays scripted events.
#[derive(Default)]
pub struct RecordingChannel {
    inbound: Mutex<Vec<IncomingEvent>>,
    sent: Mutex<Vec<Sent>>,
    next_id: AtomicUsize,
    fail_deletes: bool,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events yielded by [`Channel::start`], after which the stream ends.
    pub fn with_events(events: Vec<IncomingEvent>) -> Self {
        Self {
            inbound: Mutex::new(events),
            ..Self::default()
        }
    }

    pub fn failing_deletes(mut self) -> Self {
        self.fail_deletes = true;
        self
    }

    fn next_handle(&self) -> MessageHandle {
        MessageHandle((self.next_id.fetch_add(1, Ordering::SeqCst) + 1).to_string())
    }

    pub fn events(&self) -> Vec<Sent> {
        lock(&self.sent).clone()
    }

    /// Text of every message sent, including ones deleted later.
    pub fn texts(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|sent| match sent {
                Sent::Message { message, .. } => Some(message.text),
                _ => None,
            })
            .collect()
    }

    /// Messages still visible: sent and never deleted.
    pub fn live_messages(&self) -> Vec<OutgoingMessage> {
        let deleted = self.deleted();
        self.events()
            .into_iter()
            .filter_map(|sent| match sent {
                Sent::Message {
                    handle, message, ..
                } if !deleted.contains(&handle) => Some(message),
                _ => None,
            })
            .collect()
    }

    pub fn live_texts(&self) -> Vec<String> {
        self.live_messages().into_iter().map(|m| m.text).collect()
    }

    pub fn last_message(&self) -> Option<OutgoingMessage> {
        self.live_messages().pop()
    }

    pub fn deleted(&self) -> Vec<MessageHandle> {
        self.events()
            .into_iter()
            .filter_map(|sent| match sent {
                Sent::Deleted { handle, .. } => Some(handle),
                _ => None,
            })
            .collect()
    }

    pub fn images(&self) -> Vec<OutgoingImage> {
        self.events()
            .into_iter()
            .filter_map(|sent| match sent {
                Sent::Image { image, .. } => Some(image),
                _ => None,
            })
            .collect()
    }

    pub fn typing_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|sent| matches!(sent, Sent::Typing { .. }))
            .count()
    }

    pub fn acknowledgements(&self) -> Vec<Option<String>> {
        self.events()
            .into_iter()
            .filter_map(|sent| match sent {
                Sent::Acknowledged { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl Channel for RecordingChannel {
    fn name(&self) -> &str {
        "recording"
    }

    async fn start(&self) -> Result<EventStream, ChannelError> {
        let events = std::mem::take(&mut *lock(&self.inbound));
        Ok(Box::pin(futures::stream::iter(events)))
    }

    async fn send_message(
        &self,
        conversation_id: &str,
        message: OutgoingMessage,
    ) -> Result<MessageHandle, ChannelError> {
        let handle = self.next_handle();
        lock(&self.sent).push(Sent::Message {
            conversation_id: conversation_id.to_string(),
            handle: handle.clone(),
            message,
        });
        Ok(handle)
    }

    async fn delete_message(
        &self,
        conversation_id: &str,
        handle: &MessageHandle,
    ) -> Result<(), ChannelError> {
        if self.fail_deletes {
            return Err(ChannelError::DeleteFailed {
                name: self.name().to_string(),
                message_id: handle.to_string(),
                reason: "message can't be deleted".to_string(),
            });
        }
        lock(&self.sent).push(Sent::Deleted {
            conversation_id: conversation_id.to_string(),
            handle: handle.clone(),
        });
        Ok(())
    }

    async fn send_image(
        &self,
        conversation_id: &str,
        image: OutgoingImage,
    ) -> Result<MessageHandle, ChannelError> {
        let handle = self.next_handle();
        lock(&self.sent).push(Sent::Image {
            conversation_id: conversation_id.to_string(),
            handle: handle.clone(),
            image,
        });
        Ok(handle)
    }

    async fn send_typing(&self, conversation_id: &str) -> Result<(), ChannelError> {
        lock(&self.sent).push(Sent::Typing {
            conversation_id: conversation_id.to_string(),
        });
        Ok(())
    }

    async fn acknowledge(
        &self,
        event: &IncomingEvent,
        text: Option<&str>,
    ) -> Result<(), ChannelError> {
        if event.is_button() {
            lock(&self.sent).push(Sent::Acknowledged {
                event_id: event.id,
                text: text.map(str::to_string),
            });
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<(), ChannelError> {
        Ok(())
    }
}

/// Returns fixed PNG-ish bytes.
#[derive(Default)]
pub struct FakeImageGenerator {
    calls: AtomicUsize,
    fail: bool,
}

impl FakeImageGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageGenerator for FakeImageGenerator {
    async fn generate(&self, prompt: &str, transparent: bool) -> Result<Vec<u8>, ImageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(ImageError::RequestFailed {
                provider: "fake".to_string(),
                reason: "generation failed".to_string(),
            });
        }
        Ok(format!("\u{89}PNG {prompt} transparent={transparent}").into_bytes())
    }
}

/// Image store over a `Vec`.
#[derive(Default)]
pub struct MemoryImageStore {
    images: Mutex<Vec<ImageRecord>>,
    fail: bool,
}

impl MemoryImageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_images(images: Vec<ImageRecord>) -> Self {
        Self {
            images: Mutex::new(images),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn records(&self) -> Vec<ImageRecord> {
        lock(&self.images).clone()
    }

    fn check(&self, table: &str) -> Result<(), StorageError> {
        if self.fail {
            return Err(StorageError::QueryFailed {
                table: table.to_string(),
                reason: "store unavailable".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ImageStore for MemoryImageStore {
    async fn store(
        &self,
        bytes: &[u8],
        filename: &str,
        user_id: &str,
        prompt: &str,
    ) -> Result<ImageRecord, StorageError> {
        self.check("images")?;
        let path = format!("{user_id}/{filename}");
        let record = ImageRecord {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            prompt: prompt.to_string(),
            filename: filename.to_string(),
            url: format!("https://storage.test/images/{path}?bytes={}", bytes.len()),
            path,
            created_at: Utc::now(),
        };
        lock(&self.images).push(record.clone());
        Ok(record)
    }

    async fn list_by_user(&self, user_id: &str) -> Result<Vec<ImageRecord>, StorageError> {
        self.check("images")?;
        let mut images: Vec<ImageRecord> = lock(&self.images)
            .iter()
            .filter(|image| image.user_id == user_id)
            .cloned()
            .collect();
        images.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(images)
    }
}

/// Wallets keyed by user id.
#[derive(Default)]
pub struct MemoryWalletService {
    wallets: Mutex<HashMap<String, WalletRecord>>,
    fail: bool,
}

impl MemoryWalletService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn wallet(&self, user_id: &str) -> Option<WalletRecord> {
        lock(&self.wallets).get(user_id).cloned()
    }

    fn check(&self) -> Result<(), WalletError> {
        if self.fail {
            return Err(WalletError::RequestFailed {
                reason: "wallet provider unavailable".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl WalletService for MemoryWalletService {
    async fn create_wallet(&self, user_id: &str) -> Result<WalletRecord, WalletError> {
        self.check()?;
        let now = Utc::now();
        let record = WalletRecord {
            user_id: user_id.to_string(),
            address: format!("Wa11et{user_id}"),
            wallet_id: Uuid::new_v4().to_string(),
            is_delegated: false,
            created_at: now,
            updated_at: now,
        };
        lock(&self.wallets).insert(user_id.to_string(), record.clone());
        Ok(record)
    }

    async fn get_wallet(&self, user_id: &str) -> Result<Option<WalletRecord>, WalletError> {
        self.check()?;
        Ok(self.wallet(user_id))
    }

    async fn get_or_create_wallet(&self, user_id: &str) -> Result<WalletRecord, WalletError> {
        match self.get_wallet(user_id).await? {
            Some(wallet) => Ok(wallet),
            None => self.create_wallet(user_id).await,
        }
    }

    async fn export_private_key(
        &self,
        user_id: &str,
    ) -> Result<Option<WalletExport>, WalletError> {
        Ok(self.get_wallet(user_id).await?.map(|wallet| WalletExport {
            address: wallet.address,
            private_key: SecretString::from(format!("secret-key-{user_id}")),
        }))
    }

    async fn set_delegation(&self, user_id: &str, delegated: bool) -> Result<bool, WalletError> {
        self.check()?;
        let mut wallets = lock(&self.wallets);
        match wallets.get_mut(user_id) {
            Some(wallet) => {
                wallet.is_delegated = delegated;
                wallet.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// Agent that answers every message with a fixed reply.
pub struct ScriptedAgent {
    capabilities: CapabilitySet,
    reply: String,
    delay: Option<Duration>,
    fail: bool,
    calls: Mutex<Vec<(String, String)>>,
}

impl ScriptedAgent {
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            capabilities: all_capabilities(),
            reply: reply.into(),
            delay: None,
            fail: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new("")
        }
    }

    pub fn with_capabilities(mut self, capabilities: CapabilitySet) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Sleep before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// `(user_id, message)` for each call, in order.
    pub fn calls(&self) -> Vec<(String, String)> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl ConversationalAgent for ScriptedAgent {
    fn capabilities(&self) -> CapabilitySet {
        self.capabilities.clone()
    }

    async fn respond(&self, user_id: &str, message: &str) -> Result<String, AgentError> {
        lock(&self.calls).push((user_id.to_string(), message.to_string()));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(AgentError::RequestFailed {
                reason: "model unavailable".to_string(),
            });
        }
        Ok(self.reply.clone())
    }
}

pub fn all_capabilities() -> CapabilitySet {
    [
        Capability::WalletAddress,
        Capability::SolBalance,
        Capability::CreateCollection,
        Capability::MintNft,
        Capability::Transfer,
        Capability::DeployToken,
    ]
    .into_iter()
    .collect()
}

/// Pins into a list and returns fake gateway URLs.
#[derive(Default)]
pub struct MemoryPinner {
    pinned: Mutex<Vec<String>>,
    fail: bool,
}

impl MemoryPinner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Names of pinned files and JSON documents.
    pub fn pinned(&self) -> Vec<String> {
        lock(&self.pinned).clone()
    }

    fn pin(&self, what: &str, name: &str) -> Result<String, PinningError> {
        if self.fail {
            return Err(PinningError::Failed {
                what: what.to_string(),
                reason: "pinning unavailable".to_string(),
            });
        }
        let mut pinned = lock(&self.pinned);
        pinned.push(name.to_string());
        Ok(format!("https://gateway.test/ipfs/Qm{}", pinned.len()))
    }
}

#[async_trait]
impl MetadataPinner for MemoryPinner {
    async fn pin_file(&self, _bytes: Bytes, filename: &str) -> Result<String, PinningError> {
        self.pin("file", filename)
    }

    async fn pin_json(
        &self,
        name: &str,
        _value: &serde_json::Value,
    ) -> Result<String, PinningError> {
        self.pin("metadata", name)
    }
}

/// Serves the same bytes for any URL.
#[derive(Default)]
pub struct StaticImageFetcher;

#[async_trait]
impl ImageFetcher for StaticImageFetcher {
    async fn fetch(&self, _url: &str) -> Result<Bytes, StorageError> {
        Ok(Bytes::from_static(b"\x89PNG stored"))
    }
}

/// Handles to the doubles behind a [`BotDeps`].
pub struct TestDeps {
    pub images: Arc<FakeImageGenerator>,
    pub store: Arc<MemoryImageStore>,
    pub wallets: Arc<MemoryWalletService>,
    pub agent: Arc<ScriptedAgent>,
    pub pinner: Arc<MemoryPinner>,
}

impl TestDeps {
    pub fn new(agent: ScriptedAgent) -> Self {
        Self {
            images: Arc::new(FakeImageGenerator::new()),
            store: Arc::new(MemoryImageStore::new()),
            wallets: Arc::new(MemoryWalletService::new()),
            agent: Arc::new(agent),
            pinner: Arc::new(MemoryPinner::new()),
        }
    }

    pub fn bot_deps(&self) -> BotDeps {
        BotDeps {
            images: self.images.clone(),
            store: self.store.clone(),
            wallets: self.wallets.clone(),
            agent: self.agent.clone(),
            fetcher: Arc::new(StaticImageFetcher),
            pinner: Some(self.pinner.clone()),
        }
    }
}
