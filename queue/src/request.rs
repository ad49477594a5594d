// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Request/response template
//!
//! Correlates an outbound request with a future response over two topics. The
//! correlation key is the request id, echoed back by the responder in the
//! `request-id` header. Every pending exchange is time-boxed: on timeout the
//! entry is removed from the pending table, so a lost response can never leak
//! memory.

use crate::{
    Error, QueueMsg,
    transport::{QueueConsumer, QueueProducer},
};

use tokio::sync::oneshot;
use tracing::{debug, warn};
use uuid::Uuid;

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

/// Header carrying the correlation key on response messages.
pub const REQUEST_ID_HEADER: &str = "request-id";

/// Pending exchanges by request id.
type PendingMap = Arc<Mutex<HashMap<Uuid, oneshot::Sender<QueueMsg>>>>;

/// Request side of a request/response exchange over the queue transport.
pub struct RequestTemplate {
    producer: Arc<dyn QueueProducer>,
    pending: PendingMap,
    timeout: Duration,
}

impl Clone for RequestTemplate {
    fn clone(&self) -> Self {
        Self {
            producer: self.producer.clone(),
            pending: self.pending.clone(),
            timeout: self.timeout,
        }
    }
}

impl RequestTemplate {
    pub fn new(producer: Arc<dyn QueueProducer>, timeout: Duration) -> Self {
        Self {
            producer,
            pending: Arc::new(Mutex::new(HashMap::new())),
            timeout,
        }
    }

    /// Sends `request` and waits for the correlated response, up to the
    /// configured timeout.
    pub async fn request(&self, request: QueueMsg) -> Result<QueueMsg, Error> {
        let id = request.id;
        let (sender, receiver) = oneshot::channel();
        self.lock_pending().insert(id, sender);

        if let Err(err) = self.producer.send(request).await {
            self.lock_pending().remove(&id);
            return Err(err);
        }

        match tokio::time::timeout(self.timeout, receiver).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(Error::Closed),
            Err(_) => {
                // No response in time: forget the exchange so the table stays
                // bounded. A late response will be logged and discarded.
                self.lock_pending().remove(&id);
                Err(Error::Timeout(self.timeout.as_millis() as u64))
            }
        }
    }

    /// Completes the pending exchange this response correlates to. Responses
    /// with no pending request (late, duplicate or foreign) are discarded.
    pub fn handle_response(&self, response: QueueMsg) {
        let Some(id) = correlation_id(&response) else {
            warn!("Response {} carries no correlation id.", response.id);
            return;
        };
        let sender = self.lock_pending().remove(&id);
        match sender {
            Some(sender) => {
                if sender.send(response).is_err() {
                    debug!("Requester for {} is gone.", id);
                }
            }
            None => debug!("No pending request for response {}.", id),
        }
    }

    /// Number of exchanges still waiting for a response.
    pub fn pending(&self) -> usize {
        self.lock_pending().len()
    }

    /// Spawns a task draining `consumer` into this template until the consumer
    /// errors out.
    pub fn attach_response_consumer<C>(&self, mut consumer: C)
    where
        C: QueueConsumer + 'static,
    {
        let template = self.clone();
        tokio::spawn(async move {
            loop {
                let batch = match consumer.poll(Duration::from_millis(100)).await {
                    Ok(batch) => batch,
                    Err(err) => {
                        warn!("Response consumer failed: {}", err);
                        break;
                    }
                };
                for msg in batch {
                    template.handle_response(msg);
                }
                if let Err(err) = consumer.commit().await {
                    warn!("Response commit failed: {}", err);
                    break;
                }
            }
        });
    }

    fn lock_pending(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<Uuid, oneshot::Sender<QueueMsg>>> {
        match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Builds a response to `request`, echoing its id in the correlation header.
pub fn response_to(request: &QueueMsg, payload: Vec<u8>) -> QueueMsg {
    QueueMsg::new(request.key, payload)
        .with_header(REQUEST_ID_HEADER, request.id.as_bytes().to_vec())
}

fn correlation_id(response: &QueueMsg) -> Option<Uuid> {
    let bytes = response.header(REQUEST_ID_HEADER)?;
    Uuid::from_slice(bytes).ok()
}

#[cfg(test)]
mod tests {

    use super::*;

    use crate::memory::MemoryQueue;

    use runtime::{EntityId, EntityType};

    fn msg(payload: &[u8]) -> QueueMsg {
        let key = EntityId::new(EntityType::Device, Uuid::new_v4());
        QueueMsg::new(key, payload.to_vec())
    }

    #[tokio::test]
    async fn test_request_response_round_trip() {
        let queue = MemoryQueue::new();
        let template = RequestTemplate::new(
            Arc::new(queue.producer("requests")),
            Duration::from_secs(1),
        );

        let mut responses = queue.consumer("responses");
        responses.subscribe().await.unwrap();
        template.attach_response_consumer(responses);

        // Echo responder.
        let responder_queue = queue.clone();
        tokio::spawn(async move {
            let mut requests = responder_queue.consumer("requests");
            requests.subscribe().await.unwrap();
            let producer = responder_queue.producer("responses");
            loop {
                let batch =
                    requests.poll(Duration::from_millis(100)).await.unwrap();
                for request in &batch {
                    let response = response_to(request, request.payload.clone());
                    producer.send(response).await.unwrap();
                }
                requests.commit().await.unwrap();
            }
        });

        let response = template.request(msg(b"ping")).await.unwrap();
        assert_eq!(response.payload, b"ping");
        assert_eq!(template.pending(), 0);
    }

    #[tokio::test]
    async fn test_request_times_out_and_clears_pending() {
        let queue = MemoryQueue::new();
        let template = RequestTemplate::new(
            Arc::new(queue.producer("requests")),
            Duration::from_millis(50),
        );

        // Nobody responds.
        let result = template.request(msg(b"ping")).await;
        assert_eq!(result, Err(Error::Timeout(50)));
        assert_eq!(template.pending(), 0);
    }

    #[tokio::test]
    async fn test_late_response_is_discarded() {
        let queue = MemoryQueue::new();
        let template = RequestTemplate::new(
            Arc::new(queue.producer("requests")),
            Duration::from_millis(10),
        );

        let request = msg(b"ping");
        let late = response_to(&request, b"pong".to_vec());
        let _ = template.request(request).await;

        // Arrives after the timeout already cleared the exchange.
        template.handle_response(late);
        assert_eq!(template.pending(), 0);
    }
}
