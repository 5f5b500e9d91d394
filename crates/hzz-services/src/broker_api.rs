//! JSON bodies exchanged with the broker daemon's `/api` routes.
//!
//! Message bodies travel hex-encoded so arbitrary bytes survive JSON.

use serde::{Deserialize, Serialize};

use crate::broker::{BrokerError, ChannelId, Delivery, DeliveryTag, QueueStats};

/// Server-side cap on a single long-poll receive.
pub const MAX_RECEIVE_WAIT_MS: u64 = 30_000;

#[derive(Debug, Serialize, Deserialize)]
pub struct PublishRequest {
    pub body: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OpenChannelRequest {
    #[serde(default)]
    pub prefetch: u16,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OpenChannelResponse {
    pub channel: ChannelId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReceiveRequest {
    pub queues: Vec<String>,
    #[serde(default)]
    pub wait_ms: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReceiveResponse {
    pub delivery: Option<DeliveryBody>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeliveryBody {
    pub tag: DeliveryTag,
    pub queue: String,
    pub body: String,
    pub redelivered: bool,
}

impl From<Delivery> for DeliveryBody {
    fn from(d: Delivery) -> Self {
        Self {
            tag: d.tag,
            queue: d.queue,
            body: hex::encode(&d.body),
            redelivered: d.redelivered,
        }
    }
}

impl TryFrom<DeliveryBody> for Delivery {
    type Error = BrokerError;

    fn try_from(d: DeliveryBody) -> Result<Self, Self::Error> {
        let body = hex::decode(&d.body)
            .map_err(|e| BrokerError::Protocol(format!("delivery body is not hex: {e}")))?;
        Ok(Self {
            tag: d.tag,
            queue: d.queue,
            body: body.into(),
            redelivered: d.redelivered,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AckRequest {
    pub tag: DeliveryTag,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NackRequest {
    pub tag: DeliveryTag,
    #[serde(default)]
    pub requeue: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QueuesResponse {
    pub queues: Vec<QueueStats>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CountResponse {
    pub count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
}

/// Error body returned with every non-2xx status. Carries enough to rebuild
/// the [`BrokerError`] on the client side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    pub kind: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<ChannelId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<DeliveryTag>,
}

impl From<&BrokerError> for ApiError {
    fn from(e: &BrokerError) -> Self {
        let (kind, channel, tag) = match e {
            BrokerError::Unreachable(_) => ("unreachable", None, None),
            BrokerError::UnknownChannel(c) => ("unknown_channel", Some(*c), None),
            BrokerError::UnknownDelivery { channel, tag } => {
                ("unknown_delivery", Some(*channel), Some(*tag))
            }
            BrokerError::Closed => ("closed", None, None),
            BrokerError::Journal(_) => ("journal", None, None),
            BrokerError::Protocol(_) => ("protocol", None, None),
        };
        Self {
            kind: kind.to_string(),
            message: e.to_string(),
            channel,
            tag,
        }
    }
}

impl From<ApiError> for BrokerError {
    fn from(e: ApiError) -> Self {
        match (e.kind.as_str(), e.channel, e.tag) {
            ("unknown_channel", Some(c), _) => BrokerError::UnknownChannel(c),
            ("unknown_delivery", Some(channel), Some(tag)) => {
                BrokerError::UnknownDelivery { channel, tag }
            }
            ("closed", _, _) => BrokerError::Closed,
            ("journal", _, _) => BrokerError::Journal(e.message),
            ("unreachable", _, _) => BrokerError::Unreachable(e.message),
            _ => BrokerError::Protocol(e.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_survive_the_api_boundary() {
        for err in [
            BrokerError::UnknownChannel(7),
            BrokerError::UnknownDelivery { channel: 2, tag: 9 },
            BrokerError::Closed,
            BrokerError::Journal("disk full".into()),
        ] {
            let api = ApiError::from(&err);
            let json = serde_json::to_string(&api).unwrap();
            let back: ApiError = serde_json::from_str(&json).unwrap();
            let rebuilt = BrokerError::from(back);
            match (&err, &rebuilt) {
                (BrokerError::Journal(_), BrokerError::Journal(m)) => {
                    assert!(m.contains("disk full"))
                }
                _ => assert_eq!(rebuilt, err),
            }
        }
    }

    #[test]
    fn delivery_body_rejects_non_hex() {
        let body = DeliveryBody {
            tag: 1,
            queue: "q".into(),
            body: "zz".into(),
            redelivered: false,
        };
        assert!(matches!(
            Delivery::try_from(body),
            Err(BrokerError::Protocol(_))
        ));
    }
}
