//! Inbound pipeline: gate → policy → debounce → agent seam.
//!
//! One pipeline instance serves every channel account. Channel adapters
//! push raw payloads in via [`InboundPipeline::handle_raw`]; whatever
//! survives gating lands in the debouncer, and a drain task hands the
//! coalesced turns to the [`TurnHandler`] and routes its replies back out
//! through the [`ReplyDispatcher`].

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
    time::Duration,
};

use {
    async_trait::async_trait,
    tokio::{sync::mpsc, task::JoinHandle},
    tokio_util::sync::CancellationToken,
    tracing::{debug, warn},
    volery_channels::{
        ChannelAccountConfig, ChannelDock, ChannelEvent, ChannelEventSink, SharedChannels,
        gating::{self, AccessDenied, DmPolicy, MentionGate},
    },
    volery_common::types::{ChatType, ConversationKey, InboundMessage, ReplyPayload},
    volery_pairing::{PairingStatus, PairingStore},
};

#[cfg(feature = "metrics")]
use volery_metrics::{counter, definitions};

use crate::{
    debounce::{DebouncedTurn, Debouncer},
    dispatcher::{ReplyDispatcher, ReplyEvent},
    error::Result,
    normalize::normalize_inbound,
};

/// Reply produced by the agent seam for one conversation turn.
pub enum TurnReply {
    /// One complete reply.
    Final(ReplyPayload),
    /// An ordered stream of text blocks, delivered as they arrive.
    Stream(mpsc::Receiver<ReplyEvent>),
}

/// The agent seam: everything behind "a turn goes in, a reply comes out".
#[async_trait]
pub trait TurnHandler: Send + Sync {
    async fn handle_turn(&self, turn: DebouncedTurn) -> anyhow::Result<TurnReply>;
}

/// Stand-in handler that echoes the turn back, used until a real agent
/// is wired in.
pub struct EchoTurnHandler;

#[async_trait]
impl TurnHandler for EchoTurnHandler {
    async fn handle_turn(&self, turn: DebouncedTurn) -> anyhow::Result<TurnReply> {
        let joined = turn
            .messages
            .iter()
            .map(|m| m.body.as_str())
            .filter(|body| !body.is_empty())
            .collect::<Vec<_>>()
            .join("\n");
        Ok(TurnReply::Final(ReplyPayload::text(format!("Echo: {joined}"))))
    }
}

type AccountKey = (String, String);

/// Inbound message pipeline for all channel accounts.
pub struct InboundPipeline {
    channels: SharedChannels,
    pairing: Arc<dyn PairingStore>,
    dispatcher: Arc<ReplyDispatcher>,
    debouncer: Debouncer,
    sink: Arc<dyn ChannelEventSink>,
    configs: RwLock<HashMap<AccountKey, ChannelAccountConfig>>,
}

impl InboundPipeline {
    #[must_use]
    pub fn new(
        channels: SharedChannels,
        pairing: Arc<dyn PairingStore>,
        dispatcher: Arc<ReplyDispatcher>,
        debouncer: Debouncer,
        sink: Arc<dyn ChannelEventSink>,
    ) -> Self {
        Self {
            channels,
            pairing,
            dispatcher,
            debouncer,
            sink,
            configs: RwLock::new(HashMap::new()),
        }
    }

    /// Install (or replace) the policy config for one account.
    pub fn set_account_config(
        &self,
        channel_id: &str,
        account_id: &str,
        config: ChannelAccountConfig,
    ) {
        self.lock_configs_mut()
            .insert((channel_id.to_string(), account_id.to_string()), config);
    }

    fn account_config(&self, channel_id: &str, account_id: &str) -> ChannelAccountConfig {
        self.configs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(channel_id.to_string(), account_id.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    fn lock_configs_mut(
        &self,
    ) -> std::sync::RwLockWriteGuard<'_, HashMap<AccountKey, ChannelAccountConfig>> {
        self.configs.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Entry point for channel adapters: normalize and route one raw
    /// inbound payload. Never fails into the caller; problems are logged
    /// and the payload is dropped.
    pub async fn handle_raw(&self, channel_id: &str, account_id: &str, raw: &serde_json::Value) {
        let Some(message) = normalize_inbound(channel_id, account_id, raw) else {
            #[cfg(feature = "metrics")]
            counter!(definitions::INBOUND_DROPPED, definitions::LABEL_REASON => "malformed")
                .increment(1);
            return;
        };
        if let Err(err) = self.handle_message(message).await {
            warn!(
                channel = channel_id,
                account = account_id,
                %err,
                "inbound pipeline failed; message dropped"
            );
        }
    }

    /// Gate, policy-check, and enqueue one normalized message.
    pub async fn handle_message(&self, mut message: InboundMessage) -> Result<()> {
        let Some(dock) = self.channels.dock(&message.channel_id).await else {
            warn!(
                channel = %message.channel_id,
                "message for unregistered channel; dropping"
            );
            return Ok(());
        };
        let config = self.account_config(&message.channel_id, &message.account_id);

        match gating::mention_gate(
            &dock,
            message.chat_type,
            config.require_mention,
            &config.mention_patterns,
            &message.body,
        ) {
            MentionGate::Drop => {
                debug!(
                    conversation = %message.conversation_key(),
                    sender = %message.sender_id,
                    "group message without required mention; dropping"
                );
                #[cfg(feature = "metrics")]
                counter!(definitions::INBOUND_DROPPED, definitions::LABEL_REASON => "unmentioned")
                    .increment(1);
                return Ok(());
            },
            MentionGate::Pass { mentioned } => message.was_mentioned = mentioned,
        }

        let allowed = match message.chat_type {
            ChatType::Dm => self.check_dm(&message, &dock, &config).await?,
            ChatType::Group | ChatType::Channel => self.check_group(&message, &config),
        };

        self.sink.emit(ChannelEvent::InboundMessage {
            channel_id: message.channel_id.clone(),
            account_id: message.account_id.clone(),
            chat_id: message.chat_id.clone(),
            sender_id: message.sender_id.clone(),
            access_granted: allowed,
        });
        #[cfg(feature = "metrics")]
        counter!(definitions::INBOUND_MESSAGES).increment(1);

        if !allowed {
            #[cfg(feature = "metrics")]
            counter!(definitions::INBOUND_DROPPED, definitions::LABEL_REASON => "denied")
                .increment(1);
            return Ok(());
        }

        let key = message.conversation_key();
        let pending = match dock.resolve_debounce_window(config.debounce_ms) {
            Some(ms) => self
                .debouncer
                .enqueue_with_window(message, Duration::from_millis(ms)),
            None => self.debouncer.enqueue(message),
        };
        self.sink.emit(ChannelEvent::MessageQueued {
            channel_id: key.channel_id,
            account_id: key.account_id,
            chat_id: key.chat_id,
            pending,
        });
        Ok(())
    }

    async fn check_dm(
        &self,
        message: &InboundMessage,
        dock: &ChannelDock,
        config: &ChannelAccountConfig,
    ) -> Result<bool> {
        let status = self
            .pairing
            .resolve(&message.channel_id, &message.account_id, &message.sender_id)
            .await?;

        match gating::check_dm_access(config.dm_policy, &message.sender_id, &config.allow_from, status)
        {
            Ok(()) => {
                if config.dm_policy == DmPolicy::Pairing && status == PairingStatus::Paired {
                    self.deliver_approval_notice(message).await;
                }
                Ok(true)
            },
            Err(AccessDenied::NotPaired | AccessDenied::PairingPending) => {
                self.send_pairing_instructions(message, dock, config).await?;
                Ok(false)
            },
            Err(reason) => {
                debug!(
                    conversation = %message.conversation_key(),
                    sender = %message.sender_id,
                    %reason,
                    "direct message denied"
                );
                Ok(false)
            },
        }
    }

    fn check_group(&self, message: &InboundMessage, config: &ChannelAccountConfig) -> bool {
        match gating::check_group_access(
            config.group_policy,
            &message.chat_id,
            &config.group_allow_from,
        ) {
            Ok(()) => true,
            Err(reason) => {
                debug!(
                    conversation = %message.conversation_key(),
                    %reason,
                    "group message denied"
                );
                false
            },
        }
    }

    /// Open (or refresh) the sender's pairing request and answer with the
    /// approval instructions. The message itself goes no further.
    async fn send_pairing_instructions(
        &self,
        message: &InboundMessage,
        dock: &ChannelDock,
        config: &ChannelAccountConfig,
    ) -> Result<()> {
        let record = self
            .pairing
            .request(
                &message.channel_id,
                &message.account_id,
                &message.sender_id,
                message.sender_name.as_deref(),
            )
            .await?;

        self.sink.emit(ChannelEvent::PairingRequested {
            channel_id: message.channel_id.clone(),
            account_id: message.account_id.clone(),
            sender_id: message.sender_id.clone(),
            expires_at: record.expires_at,
        });
        #[cfg(feature = "metrics")]
        counter!(definitions::PAIRING_REQUESTS).increment(1);

        let text = format!(
            "This assistant only talks to paired senders. Your pairing code is {}. \
             Ask the operator to approve it; your messages will get through once \
             they do.",
            record.code
        );
        let target = message.conversation_key().reply_target();
        let limit = dock.resolve_chunk_limit(config.text_chunk_limit);
        if let Err(err) = self
            .dispatcher
            .send_final(&target, &ReplyPayload::text(text), limit)
            .await
        {
            debug!(
                conversation = %message.conversation_key(),
                %err,
                "could not deliver pairing instructions"
            );
        }
        Ok(())
    }

    /// Deliver the one-time "you're paired now" notice if it is still owed.
    async fn deliver_approval_notice(&self, message: &InboundMessage) {
        let owed = match self
            .pairing
            .list_paired(&message.channel_id, &message.account_id)
            .await
        {
            Ok(paired) => paired
                .into_iter()
                .any(|p| p.sender_id == message.sender_id && !p.notified),
            Err(err) => {
                debug!(%err, "could not read paired senders; skipping approval notice");
                return;
            },
        };
        if !owed {
            return;
        }

        if let Some(outbound) = self.channels.outbound(&message.channel_id).await {
            if let Err(err) = outbound
                .notify_approval(&message.account_id, &message.chat_id)
                .await
            {
                debug!(%err, "approval notice failed; will retry on next contact");
                return;
            }
        }
        if let Err(err) = self
            .pairing
            .mark_notified(&message.channel_id, &message.account_id, &message.sender_id)
            .await
        {
            debug!(%err, "could not record approval notice delivery");
            return;
        }
        self.sink.emit(ChannelEvent::PairingResolved {
            channel_id: message.channel_id.clone(),
            account_id: message.account_id.clone(),
            sender_id: message.sender_id.clone(),
            resolution: "approved".into(),
        });
    }

    /// Chunk limit for a conversation: account override clamped to the
    /// dock's hard limit.
    pub async fn chunk_limit_for(&self, key: &ConversationKey) -> usize {
        let config = self.account_config(&key.channel_id, &key.account_id);
        match self.channels.dock(&key.channel_id).await {
            Some(dock) => dock.resolve_chunk_limit(config.text_chunk_limit),
            None => config.text_chunk_limit.unwrap_or(0),
        }
    }

    /// Run one turn through the handler and deliver its reply.
    pub async fn dispatch_turn(&self, turn: DebouncedTurn, handler: &Arc<dyn TurnHandler>) {
        let key = turn.key.clone();
        let messages = turn.messages.len();
        self.sink.emit(ChannelEvent::TurnDispatched {
            channel_id: key.channel_id.clone(),
            account_id: key.account_id.clone(),
            chat_id: key.chat_id.clone(),
            messages,
        });
        #[cfg(feature = "metrics")]
        counter!(definitions::TURNS_DISPATCHED).increment(1);

        let target = key.reply_target();
        let limit = self.chunk_limit_for(&key).await;
        let outcome = match handler.handle_turn(turn).await {
            Ok(TurnReply::Final(payload)) => {
                self.dispatcher.send_final(&target, &payload, limit).await
            },
            Ok(TurnReply::Stream(events)) => {
                self.dispatcher.send_stream(&target, events, limit).await
            },
            Err(err) => {
                warn!(conversation = %key, %err, "turn handler failed");
                return;
            },
        };
        if let Err(err) = outcome {
            warn!(conversation = %key, %err, "reply delivery failed");
        }
    }
}

/// Spawn the drain task feeding debounced turns to the handler.
///
/// Cancelling the token stops the loop; turns already flushed by
/// [`Debouncer::shutdown`] are still processed before the task exits.
pub fn spawn_turn_drain(
    pipeline: Arc<InboundPipeline>,
    mut turns: mpsc::UnboundedReceiver<DebouncedTurn>,
    handler: Arc<dyn TurnHandler>,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = token.cancelled() => break,
                turn = turns.recv() => match turn {
                    Some(turn) => pipeline.dispatch_turn(turn, &handler).await,
                    None => return,
                },
            }
        }
        // The shutdown flush may have left turns in the channel.
        while let Ok(turn) = turns.try_recv() {
            pipeline.dispatch_turn(turn, &handler).await;
        }
        debug!("turn drain stopped");
    })
}
