//! Client for the broker daemon.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::broker::{Broker, BrokerError, ChannelId, Delivery, DeliveryTag, QueueStats};
use crate::broker_api::{
    AckRequest, ApiError, CountResponse, NackRequest, OpenChannelRequest, OpenChannelResponse,
    PublishRequest, QueuesResponse, ReceiveRequest, ReceiveResponse, StatusResponse,
    MAX_RECEIVE_WAIT_MS,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// [`Broker`] over HTTP. Each call is one request; a receive is a long poll.
#[derive(Clone)]
pub struct HttpBroker {
    client: reqwest::Client,
    base: String,
}

impl HttpBroker {
    /// `url` is the daemon's root, e.g. `http://127.0.0.1:9100`.
    pub fn new(url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base: format!("{}/api", url.trim_end_matches('/')),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn get<R: DeserializeOwned>(&self, path: &str) -> Result<R, BrokerError> {
        let resp = self
            .client
            .get(self.url(path))
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(transport_error)?;
        decode(resp).await
    }

    async fn post<T, R>(&self, path: &str, body: &T, timeout: Duration) -> Result<R, BrokerError>
    where
        T: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let resp = self
            .client
            .post(self.url(path))
            .json(body)
            .timeout(timeout)
            .send()
            .await
            .map_err(transport_error)?;
        decode(resp).await
    }

    async fn delete<R: DeserializeOwned>(&self, path: &str) -> Result<R, BrokerError> {
        let resp = self
            .client
            .delete(self.url(path))
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(transport_error)?;
        decode(resp).await
    }
}

fn transport_error(e: reqwest::Error) -> BrokerError {
    if e.is_connect() || e.is_timeout() || e.is_request() {
        BrokerError::Unreachable(e.to_string())
    } else {
        BrokerError::Protocol(e.to_string())
    }
}

async fn decode<R: DeserializeOwned>(resp: reqwest::Response) -> Result<R, BrokerError> {
    let status = resp.status();
    if status.is_success() {
        return resp
            .json::<R>()
            .await
            .map_err(|e| BrokerError::Protocol(format!("failed to parse response: {e}")));
    }
    let text = resp.text().await.unwrap_or_default();
    match serde_json::from_str::<ApiError>(&text) {
        Ok(api) => Err(api.into()),
        Err(_) => Err(BrokerError::Protocol(format!("{status}: {text}"))),
    }
}

#[async_trait]
impl Broker for HttpBroker {
    async fn ping(&self) -> Result<(), BrokerError> {
        let _: StatusResponse = self.get("/health").await?;
        Ok(())
    }

    async fn declare_queue(&self, queue: &str) -> Result<(), BrokerError> {
        let _: StatusResponse = self
            .post(&format!("/queues/{queue}"), &(), REQUEST_TIMEOUT)
            .await?;
        Ok(())
    }

    async fn publish(&self, queue: &str, body: Bytes) -> Result<(), BrokerError> {
        let req = PublishRequest {
            body: hex::encode(&body),
        };
        let _: StatusResponse = self
            .post(&format!("/queues/{queue}/publish"), &req, REQUEST_TIMEOUT)
            .await?;
        Ok(())
    }

    async fn open_channel(&self, prefetch: u16) -> Result<ChannelId, BrokerError> {
        let resp: OpenChannelResponse = self
            .post("/channels", &OpenChannelRequest { prefetch }, REQUEST_TIMEOUT)
            .await?;
        Ok(resp.channel)
    }

    async fn receive(
        &self,
        channel: ChannelId,
        queues: &[&str],
        wait: Duration,
    ) -> Result<Option<Delivery>, BrokerError> {
        let wait_ms = (wait.as_millis() as u64).min(MAX_RECEIVE_WAIT_MS);
        let req = ReceiveRequest {
            queues: queues.iter().map(|q| q.to_string()).collect(),
            wait_ms,
        };
        let timeout = Duration::from_millis(wait_ms) + REQUEST_TIMEOUT;
        let resp: ReceiveResponse = self
            .post(&format!("/channels/{channel}/receive"), &req, timeout)
            .await?;
        resp.delivery.map(Delivery::try_from).transpose()
    }

    async fn ack(&self, channel: ChannelId, tag: DeliveryTag) -> Result<(), BrokerError> {
        let _: StatusResponse = self
            .post(
                &format!("/channels/{channel}/ack"),
                &AckRequest { tag },
                REQUEST_TIMEOUT,
            )
            .await?;
        Ok(())
    }

    async fn nack(
        &self,
        channel: ChannelId,
        tag: DeliveryTag,
        requeue: bool,
    ) -> Result<(), BrokerError> {
        let _: StatusResponse = self
            .post(
                &format!("/channels/{channel}/nack"),
                &NackRequest { tag, requeue },
                REQUEST_TIMEOUT,
            )
            .await?;
        Ok(())
    }

    async fn close_channel(&self, channel: ChannelId) -> Result<(), BrokerError> {
        let _: StatusResponse = self.delete(&format!("/channels/{channel}")).await?;
        Ok(())
    }

    async fn queue_stats(&self) -> Result<Vec<QueueStats>, BrokerError> {
        let resp: QueuesResponse = self.get("/queues").await?;
        Ok(resp.queues)
    }

    async fn replay_dead_letters(&self, queue: &str) -> Result<usize, BrokerError> {
        let resp: CountResponse = self
            .post(&format!("/queues/{queue}/replay"), &(), REQUEST_TIMEOUT)
            .await?;
        Ok(resp.count)
    }

    async fn purge(&self, queue: &str) -> Result<usize, BrokerError> {
        let resp: CountResponse = self
            .post(&format!("/queues/{queue}/purge"), &(), REQUEST_TIMEOUT)
            .await?;
        Ok(resp.count)
    }

    async fn terminate(&self) -> Result<(), BrokerError> {
        let _: StatusResponse = self
            .post("/broker/shutdown", &(), REQUEST_TIMEOUT)
            .await?;
        Ok(())
    }
}
