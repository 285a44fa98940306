use std::{collections::BTreeMap, fmt::Display, str::FromStr};

#[cfg(test)]
use quickcheck::Arbitrary;
use serde::{Deserialize, Serialize};

use crate::{node::NodeId, topology::ClusterId};

pub mod codec;

pub const TYPE_KEY: &str = "Type";
pub const ROUND_KEY: &str = "Round";
pub const SENDER_KEY: &str = "senderID";
pub const RECEIVER_KEY: &str = "receiverID";
pub const SENDING_CLUSTER_KEY: &str = "SendingCluster";

/// The tag carried by every [Message] under the `Type` key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Sent by the cluster coordinator to each local node to open round 0
    Start,
    /// Algorithm traffic between nodes
    Response,
    /// Exchanged between clusters during the startup barrier
    Ready,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Start => "Start",
            MessageKind::Response => "Response",
            MessageKind::Ready => "Ready",
        }
    }
}

impl Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Start" => Ok(MessageKind::Start),
            "Response" => Ok(MessageKind::Response),
            "Ready" => Ok(MessageKind::Ready),
            _ => Err(()),
        }
    }
}

/// A [Message] is a flat mapping of string keys to string values.
///
/// Control keys (`Type`, `Round`, `senderID`, `receiverID`, `SendingCluster`) live
/// in the same map as algorithm-specific keys. Nested structures are not supported:
/// the same flat encoding is used for local queues and cross-cluster frames.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Message {
    fields: BTreeMap<String, String>,
}

impl Message {
    pub fn new(kind: MessageKind) -> Self {
        let mut message = Self::default();
        message.insert(TYPE_KEY, kind);
        message
    }

    pub fn start() -> Self {
        Self::new(MessageKind::Start).with(ROUND_KEY, 0)
    }

    pub fn response(sender: NodeId, round: u32) -> Self {
        Self::new(MessageKind::Response)
            .with(SENDER_KEY, sender)
            .with(ROUND_KEY, round)
    }

    pub fn ready(cluster: &ClusterId) -> Self {
        Self::new(MessageKind::Ready).with(SENDING_CLUSTER_KEY, cluster)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl ToString) -> &mut Self {
        self.fields.insert(key.into(), value.to_string());
        self
    }

    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    /// Parses the value stored under `key`, returning `None` when it is absent or unparseable
    pub fn parse<T: FromStr>(&self, key: &str) -> Option<T> {
        self.get(key).and_then(|v| v.parse().ok())
    }

    pub fn kind(&self) -> Option<MessageKind> {
        self.parse(TYPE_KEY)
    }

    pub fn round(&self) -> Option<u32> {
        self.parse(ROUND_KEY)
    }

    pub fn sender(&self) -> Option<NodeId> {
        self.parse(SENDER_KEY)
    }

    pub fn receiver(&self) -> Option<NodeId> {
        self.parse(RECEIVER_KEY)
    }

    pub fn sending_cluster(&self) -> Option<ClusterId> {
        self.get(SENDING_CLUSTER_KEY).map(ClusterId::new)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<K: Into<String>, V: ToString> FromIterator<(K, V)> for Message {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            fields: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.to_string()))
                .collect(),
        }
    }
}

#[cfg(test)]
impl Arbitrary for Message {
    fn arbitrary(g: &mut quickcheck::Gen) -> Self {
        Self {
            fields: BTreeMap::<String, String>::arbitrary(g),
        }
    }

    fn shrink(&self) -> Box<dyn Iterator<Item = Self>> {
        Box::new(self.fields.shrink().map(|fields| Self { fields }))
    }
}
