//! Streaming response coordinator.
//!
//! Drives one exchange per channel from the inbound message to the completion
//! marker:
//!
//! 1. Single-flight gate (busy channels are rejected, never queued)
//! 2. Precondition checks (active config, enabled, usable API key)
//! 3. Reset policy, with a notice when a reset happens
//! 4. Append the user turn and post the placeholder message
//! 5. Attempt loop: stream the completion, racing a first-fragment watchdog;
//!    a stalled attempt is cancelled and retried with a fresh handle
//! 6. Flush, commit the assistant turn, record usage
//! 7. Apply the completion marker and release the channel
//!
//! The watchdog bounds only the time to the first text fragment. Once text
//! flows, a slow stream runs to completion unless it is explicitly stopped.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::StreamExt;
use secrecy::{ExposeSecret, SecretString};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use parley_types::channel::ChannelConfig;
use parley_types::chat::{Attachment, Turn};
use parley_types::config::ChatSettings;
use parley_types::llm::{CompletionRequest, LlmError, StreamEvent, TokenUsage};
use parley_types::usage::UsageRecord;

use crate::llm::factory::ProviderFactory;
use crate::llm::provider::{BoxLlmProvider, CompletionStream};
use crate::repository::channel::ChannelConfigRepository;
use crate::repository::credential::{CredentialCipher, CredentialRepository, is_plausible_api_key};
use crate::repository::usage::UsageRepository;
use crate::sink::{ChatSink, MessageHandle, SinkError};

use super::ChatError;
use super::attachments;
use super::cancellation::{CancellationLease, CancellationRegistry};
use super::config_cache::{ChannelConfigCache, CredentialCache};
use super::inflight::{InFlightGuard, InFlightSet};
use super::notice;
use super::reset::{self, ResetDecision};
use super::session::{ConversationSession, SessionStore};
use super::stream_buffer::StreamBuffer;

/// Timings and limits for the attempt loop.
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    /// Longest wait for the first text fragment of an attempt.
    pub watchdog: Duration,
    /// Pause between a stalled attempt and the next one.
    pub retry_pause: Duration,
    /// Stalled attempts retried before the exchange is abandoned.
    pub max_stall_retries: u32,
    pub flush_fragment_threshold: usize,
    pub inherit_tail_turns: usize,
    pub default_completion_marker: String,
}

impl From<&ChatSettings> for CoordinatorSettings {
    fn from(settings: &ChatSettings) -> Self {
        Self {
            watchdog: Duration::from_secs(settings.watchdog_secs),
            retry_pause: Duration::from_secs(settings.retry_pause_secs),
            max_stall_retries: settings.max_stall_retries,
            flush_fragment_threshold: settings.flush_fragment_threshold,
            inherit_tail_turns: settings.inherit_tail_turns,
            default_completion_marker: settings.default_completion_marker.clone(),
        }
    }
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self::from(&ChatSettings::default())
    }
}

/// An inbound chat message.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub guild_id: u64,
    pub channel_id: u64,
    pub user_id: u64,
    pub text: String,
    pub attachments: Vec<Attachment>,
}

/// How an accepted (or rejected) exchange ended.
#[derive(Debug, Clone, PartialEq)]
pub enum ExchangeOutcome {
    /// Another exchange was running in the channel.
    Busy,
    Completed { reply: String },
    /// Explicitly stopped; `partial` is what had arrived by then.
    Stopped { partial: String },
    /// The provider failed; the user saw a classified notice.
    Failed { error: LlmError },
    /// Every attempt stalled before its first fragment.
    TimedOut { attempts: u32 },
}

enum AttemptEnd {
    Stalled,
    Finished,
    Stopped,
    Failed(LlmError),
}

/// Per-exchange values threaded through the completion helpers.
struct Exchange<'a> {
    config: &'a ChannelConfig,
    request: &'a ChatRequest,
    placeholder: &'a MessageHandle,
}

/// Coordinates chat exchanges for every channel.
///
/// Generic over the outward sink, provider factory, and repositories so the
/// application layer can pin concrete infra types while tests use fakes.
pub struct ChatCoordinator<S, P, C, K, U> {
    sink: S,
    providers: P,
    channel_repo: C,
    credential_repo: K,
    usage_repo: U,
    cipher: Arc<dyn CredentialCipher>,
    configs: Arc<ChannelConfigCache>,
    credentials: CredentialCache,
    sessions: SessionStore,
    cancellations: CancellationRegistry,
    in_flight: InFlightSet,
    settings: CoordinatorSettings,
}

impl<S, P, C, K, U> ChatCoordinator<S, P, C, K, U>
where
    S: ChatSink,
    P: ProviderFactory,
    C: ChannelConfigRepository,
    K: CredentialRepository,
    U: UsageRepository,
{
    pub fn new(
        sink: S,
        providers: P,
        channel_repo: C,
        credential_repo: K,
        usage_repo: U,
        cipher: Arc<dyn CredentialCipher>,
        settings: CoordinatorSettings,
    ) -> Self {
        let configs = Arc::new(ChannelConfigCache::new());
        Self {
            sink,
            providers,
            channel_repo,
            credential_repo,
            usage_repo,
            cipher,
            sessions: SessionStore::new(configs.clone()),
            configs,
            credentials: CredentialCache::new(),
            cancellations: CancellationRegistry::new(),
            in_flight: InFlightSet::new(),
            settings,
        }
    }

    /// Run one exchange for an inbound message.
    ///
    /// Returns `Err` only when the exchange could not start; everything that
    /// happens after the placeholder is posted is reported to the user and
    /// summarized in the returned [`ExchangeOutcome`]. The channel's
    /// single-flight membership is released on every path.
    pub async fn handle_chat(&self, request: ChatRequest) -> Result<ExchangeOutcome, ChatError> {
        let channel_id = request.channel_id;

        let Some(guard) = self.in_flight.try_acquire(channel_id) else {
            debug!(channel_id, "exchange already running, rejecting request");
            self.sink.send_message(channel_id, notice::BUSY).await?;
            return Ok(ExchangeOutcome::Busy);
        };

        let config = self
            .configs
            .lookup_in(request.guild_id, channel_id)
            .ok_or(ChatError::ConfigMissing { channel_id })?;
        if !config.enabled {
            return Err(ChatError::ChannelDisabled { channel_id });
        }
        let api_key = self.resolve_api_key(config.guild_id)?;
        let provider = self.providers.create(&api_key)?;

        info!(
            channel_id,
            user_id = request.user_id,
            model = %config.model,
            provider = provider.name(),
            "chat request accepted"
        );

        self.apply_reset_policy(&config).await?;

        let images = attachments::image_urls(&request.attachments);
        self.sessions.append_turn(
            channel_id,
            Turn::user_with_images(request.text.clone(), images),
        );

        let placeholder = self.sink.send_message(channel_id, notice::AWAITING).await?;
        let exchange = Exchange {
            config: &config,
            request: &request,
            placeholder: &placeholder,
        };

        let outcome = self.run_exchange(&guard, &provider, &exchange).await;

        self.finalize(&config, &placeholder).await;
        drop(guard);
        Ok(outcome)
    }

    /// Cancel the channel's in-flight stream. Returns whether anything was running.
    pub fn stop_chat(&self, channel_id: u64) -> bool {
        let stopped = self.cancellations.cancel(channel_id);
        if stopped {
            info!(channel_id, "stop requested for running exchange");
        }
        stopped
    }

    /// Clear the channel back to `[system]`, even while an exchange is running.
    ///
    /// A running exchange is cancelled and its single-flight membership
    /// dropped; whatever it produces afterwards is not written to the session.
    pub fn force_reset(&self, channel_id: u64) {
        let was_running = self.in_flight.force_remove(channel_id);
        let cancelled = self.cancellations.cancel(channel_id);
        self.sessions.reset(channel_id, false, 0);
        self.sessions.touch(channel_id);
        info!(channel_id, was_running, cancelled, "conversation force-reset");
    }

    pub fn is_running(&self, channel_id: u64) -> bool {
        self.in_flight.contains(channel_id)
    }

    /// Reload every channel configuration from storage.
    pub async fn refresh_channel_config(&self) -> Result<usize, ChatError> {
        let configs = self.channel_repo.list_all().await?;
        let count = configs.len();
        self.configs.replace(configs);
        info!(channels = count, "channel config cache refreshed");
        Ok(count)
    }

    /// Reload every guild credential from storage.
    pub async fn refresh_credentials(&self) -> Result<usize, ChatError> {
        let credentials = self.credential_repo.list_all().await?;
        let count = credentials.len();
        self.credentials.replace(credentials);
        info!(guilds = count, "credential cache refreshed");
        Ok(count)
    }

    /// Cached configuration for a channel.
    pub fn channel_config(&self, channel_id: u64) -> Option<ChannelConfig> {
        self.configs.lookup(channel_id)
    }

    pub fn session(&self, channel_id: u64) -> Option<ConversationSession> {
        self.sessions.snapshot(channel_id)
    }

    pub fn settings(&self) -> &CoordinatorSettings {
        &self.settings
    }

    fn resolve_api_key(&self, guild_id: u64) -> Result<SecretString, ChatError> {
        let encrypted = self
            .credentials
            .lookup(guild_id)
            .ok_or(ChatError::CredentialMissing { guild_id })?;

        let key = self.cipher.decrypt(&encrypted).map_err(|e| {
            warn!(guild_id, error = %e, "failed to decrypt guild API key");
            ChatError::CredentialInvalid { guild_id }
        })?;

        if !is_plausible_api_key(key.expose_secret()) {
            warn!(guild_id, "decrypted guild API key has an unexpected shape");
            return Err(ChatError::CredentialInvalid { guild_id });
        }
        Ok(key)
    }

    async fn apply_reset_policy(&self, config: &ChannelConfig) -> Result<(), ChatError> {
        let channel_id = config.channel_id;
        let session = self.sessions.get_or_create(channel_id)?;

        let decision = reset::evaluate(config, &session, Utc::now());
        if decision == ResetDecision::None {
            return Ok(());
        }

        let inherit = decision == ResetDecision::Inherited;
        self.sessions
            .reset(channel_id, inherit, self.settings.inherit_tail_turns);
        self.sessions.touch(channel_id);
        info!(
            channel_id,
            inherit,
            assistant_turns = session.assistant_turn_count(),
            "conversation reset by policy"
        );

        let text = if inherit {
            notice::RESET_INHERITED
        } else {
            notice::RESET
        };
        if let Err(e) = self.sink.send_message(channel_id, text).await {
            warn!(channel_id, error = %e, "failed to post reset notice");
        }
        Ok(())
    }

    async fn run_exchange(
        &self,
        guard: &InFlightGuard<'_>,
        provider: &BoxLlmProvider,
        exchange: &Exchange<'_>,
    ) -> ExchangeOutcome {
        let channel_id = exchange.config.channel_id;
        let placeholder = exchange.placeholder;
        let completion = CompletionRequest {
            model: exchange.config.model.api_name().to_string(),
            messages: self
                .sessions
                .snapshot(channel_id)
                .map(|s| s.turns)
                .unwrap_or_default(),
            end_user: Some(format!(
                "{}-{}-{}",
                exchange.request.guild_id, channel_id, exchange.request.user_id
            )),
        };

        let mut stalls = 0u32;
        loop {
            let lease = self.cancellations.acquire(channel_id);
            let mut buffer = StreamBuffer::new(self.settings.flush_fragment_threshold);
            let mut usage = TokenUsage::default();

            let end = self
                .run_attempt(
                    provider.stream(completion.clone()),
                    &lease,
                    placeholder,
                    &mut buffer,
                    &mut usage,
                )
                .await;

            match end {
                AttemptEnd::Stalled => {
                    lease.token().cancel();
                    stalls += 1;
                    warn!(channel_id, attempt = stalls, "no response before watchdog expired");

                    if stalls > self.settings.max_stall_retries {
                        self.edit_quietly(placeholder, &notice::timed_out(stalls)).await;
                        return ExchangeOutcome::TimedOut { attempts: stalls };
                    }

                    self.edit_quietly(placeholder, notice::RETRYING).await;
                    tokio::time::sleep(self.settings.retry_pause).await;

                    if !lease.is_current() {
                        info!(channel_id, "exchange stopped while waiting to retry");
                        self.edit_quietly(placeholder, notice::STOPPED_EMPTY).await;
                        return ExchangeOutcome::Stopped {
                            partial: String::new(),
                        };
                    }
                    self.edit_quietly(placeholder, notice::AWAITING).await;
                }
                AttemptEnd::Finished => {
                    return self.complete(guard, exchange, buffer, usage).await;
                }
                AttemptEnd::Stopped => {
                    return self.complete_stopped(guard, exchange, buffer, usage).await;
                }
                AttemptEnd::Failed(LlmError::StreamTruncated(detail)) => {
                    warn!(channel_id, detail = %detail, "stream ended before its terminator");
                    if buffer.is_empty() {
                        self.edit_quietly(placeholder, notice::TRUNCATED_EMPTY).await;
                        return ExchangeOutcome::Failed {
                            error: LlmError::StreamTruncated(detail),
                        };
                    }
                    return self.complete(guard, exchange, buffer, usage).await;
                }
                AttemptEnd::Failed(error) => {
                    error!(channel_id, error = %error, "completion request failed");
                    self.edit_quietly(placeholder, &notice::for_provider_error(&error))
                        .await;
                    return ExchangeOutcome::Failed { error };
                }
            }
        }
    }

    /// Consume one attempt's stream into `buffer`.
    ///
    /// Until the first text fragment arrives the read races the watchdog
    /// deadline; afterwards only cancellation can interrupt it.
    async fn run_attempt(
        &self,
        mut stream: CompletionStream,
        lease: &CancellationLease<'_>,
        placeholder: &MessageHandle,
        buffer: &mut StreamBuffer,
        usage: &mut TokenUsage,
    ) -> AttemptEnd {
        let token = lease.token();
        let deadline = Instant::now() + self.settings.watchdog;
        let mut first_byte = false;

        loop {
            let next = if first_byte {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => return AttemptEnd::Stopped,
                    next = stream.next() => next,
                }
            } else {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => return AttemptEnd::Stopped,
                    next = tokio::time::timeout_at(deadline, stream.next()) => match next {
                        Ok(next) => next,
                        Err(_) => return AttemptEnd::Stalled,
                    },
                }
            };

            match next {
                None => return AttemptEnd::Finished,
                Some(Ok(StreamEvent::TextDelta { text })) => {
                    first_byte = true;
                    if buffer.push(&text) {
                        self.edit_quietly(placeholder, buffer.text()).await;
                    }
                }
                Some(Ok(StreamEvent::Usage(summary))) => *usage = summary,
                Some(Ok(StreamEvent::Role { .. })) => {}
                Some(Err(e)) => return AttemptEnd::Failed(e),
            }
        }
    }

    async fn complete(
        &self,
        guard: &InFlightGuard<'_>,
        exchange: &Exchange<'_>,
        buffer: StreamBuffer,
        usage: TokenUsage,
    ) -> ExchangeOutcome {
        let channel_id = exchange.config.channel_id;
        let reply = buffer.into_text();

        if reply.is_empty() {
            self.edit_quietly(exchange.placeholder, notice::EMPTY_REPLY).await;
        } else {
            self.edit_quietly(exchange.placeholder, &reply).await;
            if self.commit_reply(guard, channel_id, &reply) {
                self.record_usage(exchange, usage).await;
            }
        }

        info!(
            channel_id,
            reply_chars = reply.chars().count(),
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            "exchange completed"
        );
        ExchangeOutcome::Completed { reply }
    }

    async fn complete_stopped(
        &self,
        guard: &InFlightGuard<'_>,
        exchange: &Exchange<'_>,
        buffer: StreamBuffer,
        usage: TokenUsage,
    ) -> ExchangeOutcome {
        let channel_id = exchange.config.channel_id;
        let partial = buffer.into_text();
        info!(channel_id, partial_chars = partial.chars().count(), "exchange stopped");

        if partial.is_empty() {
            self.edit_quietly(exchange.placeholder, notice::STOPPED_EMPTY).await;
        } else {
            self.edit_quietly(exchange.placeholder, &partial).await;
            if self.commit_reply(guard, channel_id, &partial) {
                self.record_usage(exchange, usage).await;
            }
        }
        ExchangeOutcome::Stopped { partial }
    }

    /// Append the assistant turn unless the channel was force-reset meanwhile.
    ///
    /// Returns whether the reply was kept; usage is only recorded for kept replies.
    fn commit_reply(&self, guard: &InFlightGuard<'_>, channel_id: u64, reply: &str) -> bool {
        if guard.is_current() {
            self.sessions.append_turn(channel_id, Turn::assistant(reply));
            true
        } else {
            debug!(channel_id, "channel was force-reset during the exchange, discarding reply");
            false
        }
    }

    async fn record_usage(&self, exchange: &Exchange<'_>, usage: TokenUsage) {
        let record = UsageRecord::new(
            exchange.config.guild_id,
            exchange.config.channel_id,
            exchange.request.user_id,
            &exchange.config.system_prompt,
            &exchange.request.text,
            usage,
        );
        if let Err(e) = self.usage_repo.record(&record).await {
            warn!(channel_id = record.channel_id, error = %e, "failed to record usage");
        }
    }

    async fn finalize(&self, config: &ChannelConfig, placeholder: &MessageHandle) {
        let channel_id = config.channel_id;
        match self
            .sink
            .add_reaction(placeholder, &config.completion_marker)
            .await
        {
            Ok(()) => {}
            Err(SinkError::UnknownEmoji(marker)) => {
                warn!(channel_id, marker = %marker, "completion marker cannot be resolved");
                if let Err(e) = self
                    .sink
                    .send_message(channel_id, &notice::marker_missing(&marker))
                    .await
                {
                    debug!(channel_id, error = %e, "failed to post marker notice");
                }
                if let Err(e) = self
                    .sink
                    .add_reaction(placeholder, &self.settings.default_completion_marker)
                    .await
                {
                    debug!(channel_id, error = %e, "failed to apply fallback marker");
                }
            }
            Err(e) => debug!(channel_id, error = %e, "failed to apply completion marker"),
        }
        self.sessions.touch(channel_id);
    }

    /// Edit the placeholder, ignoring failures.
    ///
    /// The message may have been deleted, or the channel force-reset; neither
    /// should abort the exchange.
    async fn edit_quietly(&self, handle: &MessageHandle, text: &str) {
        if let Err(e) = self.sink.edit_message(handle, text).await {
            debug!(channel_id = handle.channel_id, error = %e, "failed to edit reply message");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_types::chat::{ContentPart, Role, TurnContent};

    use crate::testing::{
        API_KEY, CHANNEL, GUILD, Harness, SinkEvent, Step, USER, wait_until,
    };

    fn usage(input: u32, output: u32) -> TokenUsage {
        TokenUsage {
            input_tokens: input,
            output_tokens: output,
            total_tokens: input + output,
        }
    }

    fn texts(turns: &[Turn]) -> Vec<(Role, String)> {
        turns.iter().map(|t| (t.role, t.content.text())).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_exchange_builds_session() {
        let h = Harness::new(ChannelConfig::new(GUILD, CHANNEL, "✅")).await;
        h.script(vec![
            Step::Text("Hel"),
            Step::Text("lo!"),
            Step::Usage(usage(12, 3)),
        ]);

        let outcome = h.coordinator.handle_chat(h.request("hello")).await.unwrap();
        assert_eq!(
            outcome,
            ExchangeOutcome::Completed {
                reply: "Hello!".to_string()
            }
        );

        let session = h.coordinator.session(CHANNEL).unwrap();
        assert_eq!(
            texts(&session.turns),
            vec![
                (Role::System, parley_types::channel::DEFAULT_SYSTEM_PROMPT.to_string()),
                (Role::User, "hello".to_string()),
                (Role::Assistant, "Hello!".to_string()),
            ]
        );

        let requests = h.factory.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].model, "gpt-4o-mini");
        assert_eq!(requests[0].end_user.as_deref(), Some("100-200-300"));
        assert_eq!(requests[0].messages.len(), 2);
        assert_eq!(h.factory.keys(), vec![API_KEY.to_string()]);

        let events = h.sink.events();
        assert!(matches!(&events[0], SinkEvent::Sent { text, .. } if text == notice::AWAITING));
        assert_eq!(h.sink.last_edit(), Some("Hello!".to_string()));
        assert_eq!(h.sink.reactions(), vec!["✅".to_string()]);

        let records = h.usage.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].user_prompt, "hello");
        assert_eq!(records[0].user_id, USER);
        assert_eq!(records[0].total_tokens, 15);

        assert!(!h.coordinator.is_running(CHANNEL));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_request_is_rejected_as_busy() {
        let h = Harness::new(ChannelConfig::new(GUILD, CHANNEL, "🆗")).await;
        h.script(vec![Step::Wait(Duration::from_secs(5)), Step::Text("done")]);

        let coordinator = h.coordinator.clone();
        let first_request = h.request("first");
        let first = tokio::spawn(async move { coordinator.handle_chat(first_request).await });
        wait_until(|| h.coordinator.is_running(CHANNEL)).await;

        let second = h.coordinator.handle_chat(h.request("second")).await.unwrap();
        assert_eq!(second, ExchangeOutcome::Busy);
        assert!(h.sink.sent_texts().contains(&notice::BUSY.to_string()));

        let first = first.await.unwrap().unwrap();
        assert!(matches!(first, ExchangeOutcome::Completed { .. }));

        let user_turns: Vec<String> = h
            .coordinator
            .session(CHANNEL)
            .unwrap()
            .turns
            .iter()
            .filter(|t| t.role == Role::User)
            .map(|t| t.content.text())
            .collect();
        assert_eq!(user_turns, vec!["first"]);
        assert_eq!(h.factory.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_attempt_is_retried() {
        let h = Harness::new(ChannelConfig::new(GUILD, CHANNEL, "🆗")).await;
        h.script(vec![Step::Hang]);
        h.script(vec![Step::Text("recovered")]);

        let outcome = h.coordinator.handle_chat(h.request("hi")).await.unwrap();

        assert_eq!(
            outcome,
            ExchangeOutcome::Completed {
                reply: "recovered".to_string()
            }
        );
        assert_eq!(h.factory.calls(), 2);
        let edits = h.sink.edits();
        let retry_at = edits.iter().position(|e| e == notice::RETRYING).unwrap();
        assert_eq!(edits[retry_at + 1], notice::AWAITING);
        assert_eq!(edits.last().unwrap(), "recovered");
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_fragment_inside_watchdog_is_not_retried() {
        let h = Harness::new(ChannelConfig::new(GUILD, CHANNEL, "🆗")).await;
        let half = h.coordinator.settings().watchdog / 2;
        h.script(vec![
            Step::Wait(half),
            Step::Text("slow"),
            // Far longer than the watchdog; only the first fragment is bounded.
            Step::Wait(Duration::from_secs(60)),
            Step::Text(" but steady"),
        ]);

        let outcome = h.coordinator.handle_chat(h.request("hi")).await.unwrap();

        assert_eq!(
            outcome,
            ExchangeOutcome::Completed {
                reply: "slow but steady".to_string()
            }
        );
        assert_eq!(h.factory.calls(), 1);
        assert!(!h.sink.edits().contains(&notice::RETRYING.to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stall_retries_are_bounded() {
        let h = Harness::new(ChannelConfig::new(GUILD, CHANNEL, "🆗")).await;
        let max = h.coordinator.settings().max_stall_retries;
        for _ in 0..=max {
            h.script(vec![Step::Hang]);
        }

        let outcome = h.coordinator.handle_chat(h.request("hi")).await.unwrap();

        assert_eq!(outcome, ExchangeOutcome::TimedOut { attempts: max + 1 });
        assert_eq!(h.factory.calls(), (max + 1) as usize);
        assert_eq!(h.sink.last_edit(), Some(notice::timed_out(max + 1)));
        assert!(!h.coordinator.is_running(CHANNEL));
        assert!(!h.coordinator.cancellations.is_registered(CHANNEL));

        let session = h.coordinator.session(CHANNEL).unwrap();
        assert!(session.turns.iter().all(|t| t.role != Role::Assistant));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_keeps_partial_reply() {
        let h = Harness::new(ChannelConfig::new(GUILD, CHANNEL, "🆗")).await;
        h.script(vec![
            Step::Text("partial "),
            Step::Text("answer\n"),
            Step::Hang,
        ]);

        let coordinator = h.coordinator.clone();
        let request = h.request("tell me");
        let task = tokio::spawn(async move { coordinator.handle_chat(request).await });
        wait_until(|| h.sink.last_edit().as_deref() == Some("partial answer\n")).await;

        assert!(h.coordinator.stop_chat(CHANNEL));
        let outcome = task.await.unwrap().unwrap();

        assert_eq!(
            outcome,
            ExchangeOutcome::Stopped {
                partial: "partial answer\n".to_string()
            }
        );
        let session = h.coordinator.session(CHANNEL).unwrap();
        assert_eq!(
            session.turns.last().unwrap(),
            &Turn::assistant("partial answer\n")
        );
        assert_eq!(h.usage.records().len(), 1);
        assert!(!h.coordinator.is_running(CHANNEL));
        assert!(!h.coordinator.stop_chat(CHANNEL));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_before_first_fragment() {
        let h = Harness::new(ChannelConfig::new(GUILD, CHANNEL, "🆗")).await;
        h.script(vec![Step::Hang]);

        let coordinator = h.coordinator.clone();
        let request = h.request("hi");
        let task = tokio::spawn(async move { coordinator.handle_chat(request).await });
        wait_until(|| h.coordinator.cancellations.is_registered(CHANNEL)).await;

        assert!(h.coordinator.stop_chat(CHANNEL));
        let outcome = task.await.unwrap().unwrap();

        assert_eq!(
            outcome,
            ExchangeOutcome::Stopped {
                partial: String::new()
            }
        );
        assert_eq!(h.sink.last_edit(), Some(notice::STOPPED_EMPTY.to_string()));
        assert!(h.usage.records().is_empty());
        assert_eq!(h.factory.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_targets_the_retry_attempt() {
        let h = Harness::new(ChannelConfig::new(GUILD, CHANNEL, "🆗")).await;
        h.script(vec![Step::Hang]);
        h.script(vec![Step::Hang]);

        let coordinator = h.coordinator.clone();
        let request = h.request("hi");
        let task = tokio::spawn(async move { coordinator.handle_chat(request).await });

        // Let the first attempt stall and the second one start.
        tokio::time::sleep(h.coordinator.settings().watchdog * 2).await;
        wait_until(|| h.factory.calls() == 2).await;

        assert!(h.coordinator.stop_chat(CHANNEL));
        let outcome = task.await.unwrap().unwrap();
        assert_eq!(
            outcome,
            ExchangeOutcome::Stopped {
                partial: String::new()
            }
        );
        assert_eq!(h.factory.calls(), 2);
    }

    #[tokio::test]
    async fn test_stop_without_exchange_is_noop() {
        let h = Harness::new(ChannelConfig::new(GUILD, CHANNEL, "🆗")).await;
        assert!(!h.coordinator.stop_chat(CHANNEL));
        assert!(h.sink.events().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_is_reported_with_detail() {
        let h = Harness::new(ChannelConfig::new(GUILD, CHANNEL, "🆗")).await;
        h.script(vec![Step::Fail(LlmError::RateLimited {
            message: "quota exceeded".to_string(),
        })]);

        let outcome = h.coordinator.handle_chat(h.request("hi")).await.unwrap();

        assert!(matches!(
            outcome,
            ExchangeOutcome::Failed {
                error: LlmError::RateLimited { .. }
            }
        ));
        let shown = h.sink.last_edit().unwrap();
        assert!(shown.contains("Request limit"));
        assert!(shown.contains("quota exceeded"));

        // The user turn stays; no reply and no usage are recorded.
        let session = h.coordinator.session(CHANNEL).unwrap();
        assert_eq!(session.turns.len(), 2);
        assert_eq!(session.turns[1].role, Role::User);
        assert!(h.usage.records().is_empty());

        // Terminal errors are not retried and still finalize.
        assert_eq!(h.factory.calls(), 1);
        assert_eq!(h.sink.reactions(), vec!["🆗".to_string()]);
        assert!(!h.coordinator.is_running(CHANNEL));
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_after_partial_text_replaces_it() {
        let h = Harness::new(ChannelConfig::new(GUILD, CHANNEL, "🆗")).await;
        h.script(vec![
            Step::Text("half an answer\n"),
            Step::Fail(LlmError::ServerError {
                message: "upstream 502".to_string(),
            }),
        ]);

        let outcome = h.coordinator.handle_chat(h.request("hi")).await.unwrap();

        assert!(matches!(outcome, ExchangeOutcome::Failed { .. }));
        let edited = h.sink.last_edit().unwrap();
        assert!(edited.contains("server problem"));
        assert!(edited.contains("upstream 502"));
        let session = h.coordinator.session(CHANNEL).unwrap();
        assert!(session.turns.iter().all(|t| t.role != Role::Assistant));
    }

    #[tokio::test(start_paused = true)]
    async fn test_truncated_stream_with_text_completes() {
        let h = Harness::new(ChannelConfig::new(GUILD, CHANNEL, "🆗")).await;
        h.script(vec![
            Step::Text("complete enough"),
            Step::Fail(LlmError::StreamTruncated(
                "response ended prematurely".to_string(),
            )),
        ]);

        let outcome = h.coordinator.handle_chat(h.request("hi")).await.unwrap();

        assert_eq!(
            outcome,
            ExchangeOutcome::Completed {
                reply: "complete enough".to_string()
            }
        );
        let session = h.coordinator.session(CHANNEL).unwrap();
        assert_eq!(session.turns.last().unwrap(), &Turn::assistant("complete enough"));
        assert_eq!(h.usage.records().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_truncated_stream_without_text_is_surfaced() {
        let h = Harness::new(ChannelConfig::new(GUILD, CHANNEL, "🆗")).await;
        h.script(vec![Step::Fail(LlmError::StreamTruncated("eof".to_string()))]);

        let outcome = h.coordinator.handle_chat(h.request("hi")).await.unwrap();

        assert_eq!(
            outcome,
            ExchangeOutcome::Failed {
                error: LlmError::StreamTruncated("eof".to_string())
            }
        );
        assert_eq!(h.sink.last_edit(), Some(notice::TRUNCATED_EMPTY.to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_turn_count_triggers_reset_before_user_turn() {
        let mut config = ChannelConfig::new(GUILD, CHANNEL, "🆗");
        config.max_turns = 2;
        let h = Harness::new(config).await;

        for reply in ["one", "two", "three"] {
            h.script(vec![Step::Text(reply)]);
        }
        h.coordinator.handle_chat(h.request("q1")).await.unwrap();
        h.coordinator.handle_chat(h.request("q2")).await.unwrap();
        assert!(!h.sink.sent_texts().contains(&notice::RESET.to_string()));

        h.coordinator.handle_chat(h.request("q3")).await.unwrap();

        assert!(h.sink.sent_texts().contains(&notice::RESET.to_string()));
        let session = h.coordinator.session(CHANNEL).unwrap();
        assert_eq!(
            texts(&session.turns)[1..],
            [
                (Role::User, "q3".to_string()),
                (Role::Assistant, "three".to_string()),
            ]
        );
        // The third request was sent with the reset history.
        assert_eq!(h.factory.requests()[2].messages.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inheriting_reset_keeps_recent_tail() {
        let mut config = ChannelConfig::new(GUILD, CHANNEL, "🆗");
        config.max_turns = 4;
        config.inherit_on_reset = true;
        let h = Harness::new(config).await;

        for i in 1..=5 {
            h.script(vec![Step::Text(["a1", "a2", "a3", "a4", "a5"][i - 1])]);
            h.coordinator
                .handle_chat(h.request(&format!("q{i}")))
                .await
                .unwrap();
        }

        assert!(h.sink.sent_texts().contains(&notice::RESET_INHERITED.to_string()));
        let session = h.coordinator.session(CHANNEL).unwrap();
        let bodies: Vec<String> = session.turns[1..].iter().map(|t| t.content.text()).collect();
        assert_eq!(
            bodies,
            vec!["q2", "a2", "q3", "a3", "q4", "a4", "q5", "a5"]
        );
        assert_eq!(session.turns.iter().filter(|t| t.is_system()).count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_session_is_reset() {
        let mut config = ChannelConfig::new(GUILD, CHANNEL, "🆗");
        config.reset_delta_secs = 5;
        let h = Harness::new(config).await;
        h.script(vec![Step::Text("first")]);
        h.script(vec![Step::Text("second")]);

        h.coordinator.handle_chat(h.request("q1")).await.unwrap();
        h.coordinator
            .sessions
            .set_last_activity(CHANNEL, Utc::now() - chrono::Duration::seconds(6));
        h.coordinator.handle_chat(h.request("q2")).await.unwrap();

        assert!(h.sink.sent_texts().contains(&notice::RESET.to_string()));
        assert_eq!(h.coordinator.session(CHANNEL).unwrap().turns.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_reset_is_idempotent() {
        let h = Harness::new(ChannelConfig::new(GUILD, CHANNEL, "🆗")).await;
        h.script(vec![Step::Text("reply")]);
        h.coordinator.handle_chat(h.request("hi")).await.unwrap();

        h.coordinator.force_reset(CHANNEL);
        let once = h.coordinator.session(CHANNEL).unwrap().turns;
        h.coordinator.force_reset(CHANNEL);
        let twice = h.coordinator.session(CHANNEL).unwrap().turns;

        assert_eq!(once, vec![Turn::system(parley_types::channel::DEFAULT_SYSTEM_PROMPT)]);
        assert_eq!(once, twice);
        assert!(!h.coordinator.is_running(CHANNEL));
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_reset_discards_running_exchange() {
        let h = Harness::new(ChannelConfig::new(GUILD, CHANNEL, "🆗")).await;
        h.script(vec![Step::Text("stale\n"), Step::Hang]);

        let coordinator = h.coordinator.clone();
        let request = h.request("hi");
        let task = tokio::spawn(async move { coordinator.handle_chat(request).await });
        wait_until(|| h.sink.last_edit().as_deref() == Some("stale\n")).await;

        h.coordinator.force_reset(CHANNEL);
        assert!(!h.coordinator.is_running(CHANNEL));

        let outcome = task.await.unwrap().unwrap();
        assert!(matches!(outcome, ExchangeOutcome::Stopped { .. }));
        assert_eq!(
            h.coordinator.session(CHANNEL).unwrap().turns,
            vec![Turn::system(parley_types::channel::DEFAULT_SYSTEM_PROMPT)]
        );
        assert!(h.usage.records().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_reply_records_nothing() {
        let h = Harness::new(ChannelConfig::new(GUILD, CHANNEL, "🆗")).await;
        h.script(vec![Step::Usage(usage(7, 0))]);

        let outcome = h.coordinator.handle_chat(h.request("hi")).await.unwrap();

        assert_eq!(
            outcome,
            ExchangeOutcome::Completed {
                reply: String::new()
            }
        );
        assert_eq!(h.sink.last_edit().as_deref(), Some(notice::EMPTY_REPLY));
        let session = h.coordinator.session(CHANNEL).unwrap();
        assert!(session.turns.iter().all(|t| t.role != Role::Assistant));
        assert!(h.usage.records().is_empty());
    }

    #[tokio::test]
    async fn test_inactive_channel_is_rejected_and_released() {
        let h = Harness::new(ChannelConfig::new(GUILD, CHANNEL, "🆗")).await;
        let mut request = h.request("hi");
        request.channel_id = CHANNEL + 1;

        let err = h.coordinator.handle_chat(request.clone()).await.unwrap_err();
        assert!(matches!(err, ChatError::ConfigMissing { .. }));
        assert!(!h.coordinator.is_running(CHANNEL + 1));
        assert!(h.sink.events().is_empty());
    }

    #[tokio::test]
    async fn test_channel_from_another_guild_is_rejected() {
        let h = Harness::new(ChannelConfig::new(GUILD, CHANNEL, "🆗")).await;
        let mut request = h.request("hi");
        request.guild_id = GUILD + 1;

        let err = h.coordinator.handle_chat(request).await.unwrap_err();
        assert!(matches!(err, ChatError::ConfigMissing { channel_id: CHANNEL }));
        assert!(!h.coordinator.is_running(CHANNEL));
        assert!(h.coordinator.session(CHANNEL).is_none());
        assert!(h.factory.requests().is_empty());
    }

    #[tokio::test]
    async fn test_disabled_channel_is_rejected() {
        let mut config = ChannelConfig::new(GUILD, CHANNEL, "🆗");
        config.enabled = false;
        let h = Harness::new(config).await;

        let err = h.coordinator.handle_chat(h.request("hi")).await.unwrap_err();
        assert!(matches!(err, ChatError::ChannelDisabled { .. }));
        assert!(h.coordinator.session(CHANNEL).is_none());
    }

    #[tokio::test]
    async fn test_missing_and_invalid_credentials() {
        let h = Harness::new(ChannelConfig::new(GUILD, CHANNEL, "🆗")).await;

        h.credentials.clear();
        h.coordinator.refresh_credentials().await.unwrap();
        let err = h.coordinator.handle_chat(h.request("hi")).await.unwrap_err();
        assert!(matches!(err, ChatError::CredentialMissing { guild_id: GUILD }));

        h.credentials.insert_raw(GUILD, b"not-encrypted".to_vec());
        h.coordinator.refresh_credentials().await.unwrap();
        let err = h.coordinator.handle_chat(h.request("hi")).await.unwrap_err();
        assert!(matches!(err, ChatError::CredentialInvalid { guild_id: GUILD }));

        assert!(!h.coordinator.is_running(CHANNEL));
        assert_eq!(h.factory.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_marker_falls_back_with_notice() {
        let h = Harness::new(ChannelConfig::new(GUILD, CHANNEL, "<:gone:42>")).await;
        h.sink.reject_emoji("<:gone:42>");
        h.script(vec![Step::Text("ok")]);

        h.coordinator.handle_chat(h.request("hi")).await.unwrap();

        assert!(h.sink.sent_texts().contains(&notice::marker_missing("<:gone:42>")));
        assert_eq!(h.sink.reactions(), vec!["🆗".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_image_attachments_become_parts() {
        let h = Harness::new(ChannelConfig::new(GUILD, CHANNEL, "🆗")).await;
        h.script(vec![Step::Text("a cat")]);
        let mut request = h.request("what is this?");
        request.attachments = vec![
            Attachment {
                filename: "cat.png".to_string(),
                url: "https://cdn.example/cat.png?ex=1".to_string(),
            },
            Attachment {
                filename: "notes.txt".to_string(),
                url: "https://cdn.example/notes.txt".to_string(),
            },
        ];

        h.coordinator.handle_chat(request).await.unwrap();

        let sent = &h.factory.requests()[0].messages[1];
        match &sent.content {
            TurnContent::Parts(parts) => {
                assert_eq!(parts.len(), 2);
                assert_eq!(
                    parts[1],
                    ContentPart::ImageUrl {
                        url: "https://cdn.example/cat.png?ex=1".to_string()
                    }
                );
            }
            other => panic!("expected multipart user turn, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_refreshed_prompt_applies_to_existing_session() {
        let h = Harness::new(ChannelConfig::new(GUILD, CHANNEL, "🆗")).await;
        h.script(vec![Step::Text("one")]);
        h.script(vec![Step::Text("two")]);
        h.coordinator.handle_chat(h.request("q1")).await.unwrap();

        let mut config = h.channels.get_config(CHANNEL).unwrap();
        config.system_prompt = "Answer like a pirate.".to_string();
        h.channels.put(config);
        h.coordinator.refresh_channel_config().await.unwrap();
        h.coordinator.handle_chat(h.request("q2")).await.unwrap();

        let sent = &h.factory.requests()[1];
        assert_eq!(sent.messages[0], Turn::system("Answer like a pirate."));
        assert_eq!(sent.messages.len(), 4);
    }
}
