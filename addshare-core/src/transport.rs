//! Message delivery.
//!
//! The engines never talk to the network directly: they hold a boxed
//! [`Transport`] and stay oblivious to whether messages travel over HTTP, an
//! in-memory router in tests, or anything else. [`Retrying`] wraps any
//! transport with a bounded retry budget.

use async_trait::async_trait;
use thiserror::Error;

use crate::message::{CodecError, Message, Source};

/// Errors returned by a transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// the message could not be encoded
    #[error("the message could not be encoded: {0}")]
    Codec(#[from] CodecError),
    /// no route to the destination
    #[error("no route to {0}")]
    UnknownDestination(Source),
    /// the request failed
    #[error("the request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// the destination answered with an unexpected status
    #[error("the destination answered with status {0}")]
    UnexpectedResponse(u16),
    /// the retry budget is exhausted
    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: usize,
        #[source]
        last: Box<TransportError>,
    },
}

/// The capability to deliver a message to a protocol peer.
#[async_trait]
pub trait Transport: Send {
    async fn send(&mut self, dest: Source, message: &Message) -> Result<(), TransportError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Box<T> {
    async fn send(&mut self, dest: Source, message: &Message) -> Result<(), TransportError> {
        self.as_mut().send(dest, message).await
    }
}

/// A transport decorator that retries failed sends up to a fixed number of
/// attempts and surfaces the last error once the budget is spent.
#[derive(Debug)]
pub struct Retrying<T> {
    inner: T,
    attempts: usize,
}

impl<T> Retrying<T> {
    /// Wraps `inner` with a budget of `attempts` total tries.
    ///
    /// # Panics
    /// Panics if `attempts == 0`.
    pub fn new(inner: T, attempts: usize) -> Self {
        assert!(attempts >= 1, "the retry budget must allow at least one attempt");
        Retrying { inner, attempts }
    }
}

#[async_trait]
impl<T: Transport> Transport for Retrying<T> {
    async fn send(&mut self, dest: Source, message: &Message) -> Result<(), TransportError> {
        let mut last = None;
        for attempt in 1..=self.attempts {
            match self.inner.send(dest, message).await {
                Ok(()) => return Ok(()),
                Err(err) => {
                    tracing::warn!(
                        "send of `{}` to {} failed (attempt {}/{}): {}",
                        message.payload.kind(),
                        dest,
                        attempt,
                        self.attempts,
                        err
                    );
                    last = Some(err);
                }
            }
        }
        Err(TransportError::RetriesExhausted {
            attempts: self.attempts,
            // Safe unwrap: attempts >= 1, so the loop ran at least once.
            last: Box::new(last.unwrap()),
        })
    }
}

/// HTTP delivery: every node exposes `POST /message` on its own port, and a
/// participant's id is the port it listens on.
pub struct HttpTransport {
    client: reqwest::Client,
    host: String,
    coordinator_port: u16,
}

impl HttpTransport {
    pub fn new(host: impl Into<String>, coordinator_port: u16) -> Self {
        HttpTransport {
            client: reqwest::Client::new(),
            host: host.into(),
            coordinator_port,
        }
    }

    fn url(&self, dest: Source) -> String {
        let port = match dest {
            Source::Coordinator => self.coordinator_port,
            Source::Participant(id) => id.into(),
        };
        format!("http://{}:{}/message", self.host, port)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&mut self, dest: Source, message: &Message) -> Result<(), TransportError> {
        let response = self
            .client
            .post(&self.url(dest))
            .header("content-type", "application/json")
            .body(message.to_bytes()?)
            .send()
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(TransportError::UnexpectedResponse(response.status().as_u16()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Payload;

    /// Fails the first `failures` sends, then succeeds, counting every call.
    struct Flaky {
        failures: usize,
        calls: usize,
    }

    #[async_trait]
    impl Transport for Flaky {
        async fn send(&mut self, dest: Source, _: &Message) -> Result<(), TransportError> {
            self.calls += 1;
            if self.calls <= self.failures {
                Err(TransportError::UnknownDestination(dest))
            } else {
                Ok(())
            }
        }
    }

    fn message() -> Message {
        Message::new(Source::Coordinator, Payload::StartSecretSharing)
    }

    #[tokio::test]
    async fn test_retrying_stops_after_the_first_success() {
        let mut transport = Retrying::new(
            Flaky {
                failures: 2,
                calls: 0,
            },
            3,
        );
        transport.send(Source::Coordinator, &message()).await.unwrap();
        assert_eq!(transport.inner.calls, 3);
    }

    #[tokio::test]
    async fn test_retrying_gives_up_after_the_budget() {
        let mut transport = Retrying::new(
            Flaky {
                failures: usize::MAX,
                calls: 0,
            },
            3,
        );
        let err = transport
            .send(Source::Coordinator, &message())
            .await
            .unwrap_err();
        assert_eq!(transport.inner.calls, 3);
        match err {
            TransportError::RetriesExhausted { attempts, last } => {
                assert_eq!(attempts, 3);
                assert!(matches!(*last, TransportError::UnknownDestination(_)));
            }
            err => panic!("expected an exhausted retry budget, got {}", err),
        }
    }
}
