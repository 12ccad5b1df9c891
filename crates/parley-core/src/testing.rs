//! In-memory fakes for the core ports, shared by unit tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use secrecy::{ExposeSecret, SecretString};

use parley_types::channel::ChannelConfig;
use parley_types::credential::GuildCredential;
use parley_types::error::{CredentialError, RepositoryError};
use parley_types::llm::{CompletionRequest, LlmError, StreamEvent, TokenUsage};
use parley_types::usage::{UsageRecord, UsageSummary};

use crate::chat::coordinator::{ChatCoordinator, ChatRequest, CoordinatorSettings};
use crate::llm::factory::ProviderFactory;
use crate::llm::provider::{BoxLlmProvider, CompletionStream, LlmProvider};
use crate::repository::channel::ChannelConfigRepository;
use crate::repository::credential::{CredentialCipher, CredentialRepository};
use crate::repository::usage::UsageRepository;
use crate::sink::{ChatSink, MessageHandle, SinkError};

pub const GUILD: u64 = 100;
pub const CHANNEL: u64 = 200;
pub const USER: u64 = 300;
pub const API_KEY: &str = "sk-test-0123456789abcdef";

/// Poll `cond` between scheduler yields. Does not advance paused time.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..10_000 {
        if cond() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not reached");
}

// ---------------------------------------------------------------------------
// Sink
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent {
    Sent {
        channel_id: u64,
        message_id: u64,
        text: String,
    },
    Edited {
        message_id: u64,
        text: String,
    },
    Reacted {
        message_id: u64,
        marker: String,
    },
}

#[derive(Clone, Default)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<SinkEvent>>>,
    next_id: Arc<AtomicU64>,
    unknown_emoji: Arc<Mutex<HashSet<String>>>,
}

impl RecordingSink {
    /// Make reactions with `marker` fail as an unknown emoji.
    pub fn reject_emoji(&self, marker: &str) {
        self.unknown_emoji.lock().unwrap().insert(marker.to_string());
    }

    pub fn events(&self) -> Vec<SinkEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn sent_texts(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SinkEvent::Sent { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn edits(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SinkEvent::Edited { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn last_edit(&self) -> Option<String> {
        self.edits().pop()
    }

    pub fn reactions(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SinkEvent::Reacted { marker, .. } => Some(marker),
                _ => None,
            })
            .collect()
    }
}

impl ChatSink for RecordingSink {
    async fn send_message(&self, channel_id: u64, text: &str) -> Result<MessageHandle, SinkError> {
        let message_id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.events.lock().unwrap().push(SinkEvent::Sent {
            channel_id,
            message_id,
            text: text.to_string(),
        });
        Ok(MessageHandle {
            channel_id,
            message_id,
        })
    }

    async fn edit_message(&self, handle: &MessageHandle, text: &str) -> Result<(), SinkError> {
        self.events.lock().unwrap().push(SinkEvent::Edited {
            message_id: handle.message_id,
            text: text.to_string(),
        });
        Ok(())
    }

    async fn add_reaction(&self, handle: &MessageHandle, marker: &str) -> Result<(), SinkError> {
        if self.unknown_emoji.lock().unwrap().contains(marker) {
            return Err(SinkError::UnknownEmoji(marker.to_string()));
        }
        self.events.lock().unwrap().push(SinkEvent::Reacted {
            message_id: handle.message_id,
            marker: marker.to_string(),
        });
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

/// One step of a scripted completion stream.
#[derive(Debug)]
pub enum Step {
    Wait(Duration),
    Text(&'static str),
    Usage(TokenUsage),
    /// Yield the error and end the stream.
    Fail(LlmError),
    /// Never yield again.
    Hang,
}

/// Provider factory that replays queued scripts, one per stream call.
///
/// An exhausted queue produces an empty stream.
#[derive(Clone, Default)]
pub struct ScriptedFactory {
    scripts: Arc<Mutex<VecDeque<Vec<Step>>>>,
    requests: Arc<Mutex<Vec<CompletionRequest>>>,
    keys: Arc<Mutex<Vec<String>>>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedFactory {
    pub fn push(&self, steps: Vec<Step>) {
        self.scripts.lock().unwrap().push_back(steps);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// API keys the factory was asked to build providers for.
    pub fn keys(&self) -> Vec<String> {
        self.keys.lock().unwrap().clone()
    }
}

impl ProviderFactory for ScriptedFactory {
    fn create(&self, api_key: &SecretString) -> Result<BoxLlmProvider, LlmError> {
        self.keys
            .lock()
            .unwrap()
            .push(api_key.expose_secret().to_string());
        Ok(Box::new(ScriptedProvider {
            factory: self.clone(),
        }))
    }
}

struct ScriptedProvider {
    factory: ScriptedFactory,
}

impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn stream(&self, request: CompletionRequest) -> CompletionStream {
        self.factory.calls.fetch_add(1, Ordering::SeqCst);
        self.factory.requests.lock().unwrap().push(request);
        let steps = self
            .factory
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default();

        Box::pin(async_stream::stream! {
            for step in steps {
                match step {
                    Step::Wait(delay) => tokio::time::sleep(delay).await,
                    Step::Text(text) => {
                        yield Ok(StreamEvent::TextDelta { text: text.to_string() });
                    }
                    Step::Usage(usage) => {
                        yield Ok(StreamEvent::Usage(usage));
                    }
                    Step::Fail(err) => {
                        yield Err(err);
                        break;
                    }
                    Step::Hang => std::future::pending::<()>().await,
                }
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Repositories
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct MemoryChannelRepo {
    configs: Arc<Mutex<HashMap<(u64, u64), ChannelConfig>>>,
}

impl MemoryChannelRepo {
    pub fn put(&self, config: ChannelConfig) {
        self.configs
            .lock()
            .unwrap()
            .insert((config.guild_id, config.channel_id), config);
    }

    pub fn get_config(&self, channel_id: u64) -> Option<ChannelConfig> {
        self.configs
            .lock()
            .unwrap()
            .values()
            .find(|c| c.channel_id == channel_id)
            .cloned()
    }
}

impl ChannelConfigRepository for MemoryChannelRepo {
    async fn list_all(&self) -> Result<Vec<ChannelConfig>, RepositoryError> {
        Ok(self.configs.lock().unwrap().values().cloned().collect())
    }

    async fn get(&self, guild_id: u64, channel_id: u64) -> Result<Option<ChannelConfig>, RepositoryError> {
        Ok(self.configs.lock().unwrap().get(&(guild_id, channel_id)).cloned())
    }

    async fn upsert(&self, config: &ChannelConfig) -> Result<(), RepositoryError> {
        self.put(config.clone());
        Ok(())
    }

    async fn delete(&self, guild_id: u64, channel_id: u64) -> Result<bool, RepositoryError> {
        Ok(self
            .configs
            .lock()
            .unwrap()
            .remove(&(guild_id, channel_id))
            .is_some())
    }

    async fn delete_guild(&self, guild_id: u64) -> Result<u64, RepositoryError> {
        let mut configs = self.configs.lock().unwrap();
        let before = configs.len();
        configs.retain(|(guild, _), _| *guild != guild_id);
        Ok((before - configs.len()) as u64)
    }
}

#[derive(Clone, Default)]
pub struct MemoryCredentialRepo {
    credentials: Arc<Mutex<HashMap<u64, GuildCredential>>>,
}

impl MemoryCredentialRepo {
    /// Store bytes as-is, bypassing the cipher.
    pub fn insert_raw(&self, guild_id: u64, encrypted_key: Vec<u8>) {
        self.credentials.lock().unwrap().insert(
            guild_id,
            GuildCredential {
                guild_id,
                encrypted_key,
                updated_at: Utc::now(),
            },
        );
    }

    pub fn clear(&self) {
        self.credentials.lock().unwrap().clear();
    }

    pub fn contains(&self, guild_id: u64) -> bool {
        self.credentials.lock().unwrap().contains_key(&guild_id)
    }
}

impl CredentialRepository for MemoryCredentialRepo {
    async fn list_all(&self) -> Result<Vec<GuildCredential>, RepositoryError> {
        Ok(self.credentials.lock().unwrap().values().cloned().collect())
    }

    async fn get(&self, guild_id: u64) -> Result<Option<GuildCredential>, RepositoryError> {
        Ok(self.credentials.lock().unwrap().get(&guild_id).cloned())
    }

    async fn set(&self, guild_id: u64, encrypted_key: &[u8]) -> Result<(), RepositoryError> {
        self.insert_raw(guild_id, encrypted_key.to_vec());
        Ok(())
    }

    async fn delete(&self, guild_id: u64) -> Result<bool, RepositoryError> {
        Ok(self.credentials.lock().unwrap().remove(&guild_id).is_some())
    }
}

#[derive(Clone, Default)]
pub struct MemoryUsageRepo {
    records: Arc<Mutex<Vec<UsageRecord>>>,
}

impl MemoryUsageRepo {
    pub fn records(&self) -> Vec<UsageRecord> {
        self.records.lock().unwrap().clone()
    }

    fn summarize<'a>(records: impl Iterator<Item = &'a UsageRecord>) -> UsageSummary {
        records.fold(UsageSummary::default(), |mut acc, r| {
            acc.exchanges += 1;
            acc.input_tokens += u64::from(r.input_tokens);
            acc.output_tokens += u64::from(r.output_tokens);
            acc.total_tokens += u64::from(r.total_tokens);
            acc
        })
    }
}

impl UsageRepository for MemoryUsageRepo {
    async fn record(&self, record: &UsageRecord) -> Result<(), RepositoryError> {
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }

    async fn guild_summary(&self, guild_id: u64) -> Result<UsageSummary, RepositoryError> {
        let records = self.records.lock().unwrap();
        Ok(Self::summarize(records.iter().filter(|r| r.guild_id == guild_id)))
    }

    async fn total_summary(&self) -> Result<UsageSummary, RepositoryError> {
        let records = self.records.lock().unwrap();
        Ok(Self::summarize(records.iter()))
    }
}

/// Reversible stand-in for the vault: prefixes the plaintext.
pub struct PlainCipher;

const PLAIN_PREFIX: &[u8] = b"enc:";

impl CredentialCipher for PlainCipher {
    fn encrypt(&self, plaintext: &str) -> Result<Vec<u8>, CredentialError> {
        let mut out = PLAIN_PREFIX.to_vec();
        out.extend_from_slice(plaintext.as_bytes());
        Ok(out)
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<SecretString, CredentialError> {
        let body = ciphertext
            .strip_prefix(PLAIN_PREFIX)
            .ok_or(CredentialError::DecryptionFailed)?;
        let text = String::from_utf8(body.to_vec()).map_err(|_| CredentialError::DecryptionFailed)?;
        Ok(SecretString::from(text))
    }
}

// ---------------------------------------------------------------------------
// Coordinator harness
// ---------------------------------------------------------------------------

pub type TestCoordinator = ChatCoordinator<
    RecordingSink,
    ScriptedFactory,
    MemoryChannelRepo,
    MemoryCredentialRepo,
    MemoryUsageRepo,
>;

pub fn test_settings() -> CoordinatorSettings {
    CoordinatorSettings {
        watchdog: Duration::from_secs(10),
        retry_pause: Duration::from_secs(3),
        max_stall_retries: 3,
        flush_fragment_threshold: 200,
        inherit_tail_turns: 6,
        default_completion_marker: "🆗".to_string(),
    }
}

/// A coordinator wired to fakes, with one channel and one guild key seeded.
pub struct Harness {
    pub coordinator: Arc<TestCoordinator>,
    pub sink: RecordingSink,
    pub factory: ScriptedFactory,
    pub channels: MemoryChannelRepo,
    pub credentials: MemoryCredentialRepo,
    pub usage: MemoryUsageRepo,
}

impl Harness {
    pub async fn new(config: ChannelConfig) -> Self {
        let sink = RecordingSink::default();
        let factory = ScriptedFactory::default();
        let channels = MemoryChannelRepo::default();
        let credentials = MemoryCredentialRepo::default();
        let usage = MemoryUsageRepo::default();

        let guild_id = config.guild_id;
        channels.put(config);
        let encrypted = PlainCipher.encrypt(API_KEY).unwrap();
        credentials.insert_raw(guild_id, encrypted);

        let coordinator = ChatCoordinator::new(
            sink.clone(),
            factory.clone(),
            channels.clone(),
            credentials.clone(),
            usage.clone(),
            Arc::new(PlainCipher),
            test_settings(),
        );
        coordinator.refresh_channel_config().await.unwrap();
        coordinator.refresh_credentials().await.unwrap();

        Self {
            coordinator: Arc::new(coordinator),
            sink,
            factory,
            channels,
            credentials,
            usage,
        }
    }

    pub fn script(&self, steps: Vec<Step>) {
        self.factory.push(steps);
    }

    pub fn request(&self, text: &str) -> ChatRequest {
        ChatRequest {
            guild_id: GUILD,
            channel_id: CHANNEL,
            user_id: USER,
            text: text.to_string(),
            attachments: Vec::new(),
        }
    }
}
