//! In-process packet transport between the ingestion side and the modules.
//!
//! Every request crosses the channel as an encoded packet, so the module
//! side only ever sees bytes, the same way it would over a socket.

use crate::core::codec::ReplyStatus;
use crate::core::packets::{
    decode_reply, decode_request, encode_reply, encode_request, ModuleReply, ModuleRequest,
    ModuleType, PacketIds,
};
use crate::domain::ports::{ModuleGateway, ModuleHandler};
use crate::utils::error::{IngestError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// 一個封包及回覆用的通道
#[derive(Debug)]
pub struct ModulePacket {
    pub data: Vec<u8>,
    pub reply_to: oneshot::Sender<Vec<u8>>,
}

/// 啟動模組工作：解碼請求、交給處理器、回傳編碼後的回覆
pub fn spawn_module<H>(
    module: ModuleType,
    handler: Arc<H>,
    capacity: usize,
) -> (mpsc::Sender<ModulePacket>, JoinHandle<()>)
where
    H: ModuleHandler + 'static,
{
    let (tx, mut rx) = mpsc::channel::<ModulePacket>(capacity.max(1));
    let task = tokio::spawn(async move {
        tracing::debug!("{} module started", module);
        while let Some(packet) = rx.recv().await {
            let (ids, reply) = match decode_request(&packet.data) {
                Ok((ids, request)) => {
                    tracing::trace!("{} module handling {}", module, request.name());
                    (ids, handler.handle(request).await)
                }
                Err(e) => {
                    tracing::warn!("{} module got a malformed packet: {}", module, e);
                    (PacketIds::default(), ModuleReply::status(ReplyStatus::NotOk))
                }
            };
            if packet.reply_to.send(encode_reply(ids, &reply)).is_err() {
                tracing::debug!("{} module: requester went away", module);
            }
        }
        tracing::debug!("{} module stopped", module);
    });
    (tx, task)
}

pub struct ChannelGateway {
    request_id: u16,
    next_packet_id: AtomicU16,
    modules: HashMap<ModuleType, mpsc::Sender<ModulePacket>>,
}

impl ChannelGateway {
    pub fn new(request_id: u16) -> Self {
        Self {
            request_id,
            next_packet_id: AtomicU16::new(0),
            modules: HashMap::new(),
        }
    }

    pub fn with_module(mut self, module: ModuleType, sender: mpsc::Sender<ModulePacket>) -> Self {
        self.modules.insert(module, sender);
        self
    }

    /// 所有模組類型都由同一個處理器回答
    pub fn spawn_all<H>(request_id: u16, handler: Arc<H>, capacity: usize) -> (Self, Vec<JoinHandle<()>>)
    where
        H: ModuleHandler + 'static,
    {
        let mut gateway = ChannelGateway::new(request_id);
        let mut tasks = Vec::with_capacity(ModuleType::ALL.len());
        for module in ModuleType::ALL {
            let (sender, task) = spawn_module(module, Arc::clone(&handler), capacity);
            gateway = gateway.with_module(module, sender);
            tasks.push(task);
        }
        (gateway, tasks)
    }
}

#[async_trait]
impl ModuleGateway for ChannelGateway {
    async fn send(&self, request: ModuleRequest) -> Result<ModuleReply> {
        let module = request.module();
        let sender = self.modules.get(&module).ok_or_else(|| IngestError::TransportError {
            module: module.to_string(),
        })?;

        let ids = PacketIds {
            request_id: self.request_id,
            packet_id: self.next_packet_id.fetch_add(1, Ordering::Relaxed),
        };
        let (reply_to, reply_rx) = oneshot::channel();
        let packet = ModulePacket {
            data: encode_request(ids, &request),
            reply_to,
        };

        let closed = || IngestError::TransportError {
            module: module.to_string(),
        };
        sender.send(packet).await.map_err(|_| closed())?;
        let data = reply_rx.await.map_err(|_| closed())?;

        let (reply_ids, reply) = decode_reply(&data)?;
        if reply_ids != ids {
            return Err(IngestError::ModuleReplyError {
                module: module.to_string(),
                status: reply.status.to_string(),
                message: format!(
                    "reply for packet {}:{} while waiting for {}:{}",
                    reply_ids.request_id, reply_ids.packet_id, ids.request_id, ids.packet_id
                ),
            });
        }
        Ok(reply)
    }
}
