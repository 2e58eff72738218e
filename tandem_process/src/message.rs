//! Inter-process messages.
//!
//! Messages travel as JSON objects, one per line:
//!
//! ```text
//! {"command":"AcknProcessStarted","payload":{"pid":4711}}
//! {"command":"TerminationRequest"}
//! {"command":"EffectiveCycletime","payload":{"seconds":0.0101}}
//! {"command":"User","payload":{"topic":"echo","body":[1,2,3]}}
//! ```

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tandem_image::{BoxId, Value, ValueBox};

/// Message exchanged between the app and a worker process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", content = "payload")]
pub enum Message {
    /// Worker → app: the worker loop is up.
    AcknProcessStarted {
        /// Worker process id.
        pid: u32,
    },
    /// App → worker: leave the loop after the current cycle.
    TerminationRequest,
    /// App → worker: report the measured cycle time.
    EffectiveCycletimeRequest,
    /// Worker → app: reply to [`Message::EffectiveCycletimeRequest`].
    EffectiveCycletime {
        /// Mean cycle period in seconds, once measured.
        seconds: Option<f64>,
    },
    /// Bulk box state, applied to the worker's registered boxes.
    BoxesDict(Vec<BoxEntry>),
    /// Application-defined message.
    User(UserMessage),
}

impl Message {
    /// Effective cycle time reply.
    pub fn effective_cycletime(cycle_time: Option<Duration>) -> Self {
        Self::EffectiveCycletime {
            seconds: cycle_time.map(|d| d.as_secs_f64()),
        }
    }

    /// Snapshot of `boxes` as a [`Message::BoxesDict`].
    ///
    /// Opaque values cannot cross a process boundary and are skipped.
    pub fn boxes<'a>(boxes: impl IntoIterator<Item = &'a ValueBox>) -> Self {
        Self::BoxesDict(
            boxes
                .into_iter()
                .filter_map(|b| {
                    let value = b.read();
                    (!matches!(value, Value::Opaque(_))).then(|| BoxEntry {
                        id: b.id().clone(),
                        value,
                    })
                })
                .collect(),
        )
    }

    /// Short name for logs.
    pub fn command(&self) -> &'static str {
        match self {
            Self::AcknProcessStarted { .. } => "AcknProcessStarted",
            Self::TerminationRequest => "TerminationRequest",
            Self::EffectiveCycletimeRequest => "EffectiveCycletimeRequest",
            Self::EffectiveCycletime { .. } => "EffectiveCycletime",
            Self::BoxesDict(_) => "BoxesDict",
            Self::User(_) => "User",
        }
    }
}

/// One box value in a [`Message::BoxesDict`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoxEntry {
    /// Box id on the receiving side.
    pub id: BoxId,
    /// Value to write.
    pub value: Value,
}

/// Application payload: a topic and a JSON body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserMessage {
    /// Routing key chosen by the application.
    pub topic: String,
    /// Message body.
    #[serde(default)]
    pub body: serde_json::Value,
}

impl UserMessage {
    /// Encode `body` under `topic`.
    pub fn new<T: Serialize>(topic: impl Into<String>, body: &T) -> serde_json::Result<Self> {
        Ok(Self {
            topic: topic.into(),
            body: serde_json::to_value(body)?,
        })
    }

    /// Decode the body.
    pub fn decode<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        T::deserialize(&self.body)
    }
}

impl From<UserMessage> for Message {
    fn from(message: UserMessage) -> Self {
        Self::User(message)
    }
}
