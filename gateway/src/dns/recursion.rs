//! External recursion pipeline (spec.md §4.9): a small exchanger
//! abstraction, composed with decorators for protocol fallback, bounded
//! SOA-referral recursion, error logging and instrumentation.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::TryStreamExt;
use hickory_client::client::AsyncClient;
use hickory_proto::op::{Message, ResponseCode};
use hickory_proto::rr::RecordType;
use hickory_proto::tcp::TcpClientStream;
use hickory_proto::udp::UdpClientStream;
use hickory_proto::xfer::DnsRequest;
use tokio::net::TcpStream;

use crate::error::dns::DnsError;

/// A single exchange with an upstream server: send `query`, return its
/// reply or a [`DnsError`].
#[async_trait]
pub trait Exchanger: Send + Sync {
    async fn exchange(&self, query: &Message) -> Result<Message, DnsError>;
}

/// Base UDP exchanger: one connection per exchange, bounded by `timeout`.
pub struct UdpExchanger {
    pub server: SocketAddr,
    pub timeout: Duration,
}

#[async_trait]
impl Exchanger for UdpExchanger {
    async fn exchange(&self, query: &Message) -> Result<Message, DnsError> {
        let conn = UdpClientStream::<tokio::net::UdpSocket>::with_timeout(self.server, self.timeout);
        let (client, bg) = AsyncClient::connect(conn)
            .await
            .map_err(|e| DnsError::HandlerPanicked(format!("udp connect: {}", e)))?;
        tokio::spawn(bg);
        exchange_via_client(client, query).await
    }
}

/// Base TCP exchanger, used as the RFC 5966 fallback when a UDP reply is
/// truncated.
pub struct TcpExchanger {
    pub server: SocketAddr,
    pub timeout: Duration,
}

#[async_trait]
impl Exchanger for TcpExchanger {
    async fn exchange(&self, query: &Message) -> Result<Message, DnsError> {
        let (stream, sender) = TcpClientStream::<TcpStream>::with_timeout(self.server, self.timeout);
        let (client, bg) = AsyncClient::new(stream, sender, None)
            .await
            .map_err(|e| DnsError::HandlerPanicked(format!("tcp connect: {}", e)))?;
        tokio::spawn(bg);
        exchange_via_client(client, query).await
    }
}

async fn exchange_via_client(client: AsyncClient, query: &Message) -> Result<Message, DnsError> {
    let request = DnsRequest::new(query.clone(), Default::default());
    let mut stream = client.send(request);
    match stream.try_next().await {
        Ok(Some(response)) => Ok(response.into_message()),
        Ok(None) => Err(DnsError::RecursionExhausted),
        Err(e) => Err(DnsError::HandlerPanicked(format!("exchange failed: {}", e))),
    }
}

/// `while(pred, ex1, ex2, ...)`: try each exchanger in sequence. An error
/// stops the chain immediately. Otherwise, `pred(response)` decides whether
/// to keep going: `true` tries the next exchanger, `false` stops and
/// returns the current response.
pub struct WhilePredicate {
    pub exchangers: Vec<Box<dyn Exchanger>>,
    pub keep_going: fn(&Message) -> bool,
}

#[async_trait]
impl Exchanger for WhilePredicate {
    async fn exchange(&self, query: &Message) -> Result<Message, DnsError> {
        let mut last = None;
        for exchanger in &self.exchangers {
            let response = exchanger.exchange(query).await?;
            let should_continue = (self.keep_going)(&response);
            if !should_continue {
                return Ok(response);
            }
            last = Some(response);
        }
        last.ok_or(DnsError::RecursionExhausted)
    }
}

/// Predicate for [`WhilePredicate`]: true when the reply's TC bit is set,
/// i.e. the reply was truncated and a larger-MTU transport should be tried.
pub fn was_truncated(message: &Message) -> bool {
    message.truncated()
}

/// Decides the next server to query during SOA-referral recursion. Returns
/// `None` to end recursion.
pub trait Recurser: Send + Sync {
    fn next_server(&self, response: &Message) -> Option<String>;
}

/// Default recurser (spec.md §4.9): stop if the reply is authoritative
/// with answers; otherwise scan the authority section for an SOA record
/// and recurse into `soa.ns:53`.
pub struct DefaultRecurser;

impl Recurser for DefaultRecurser {
    fn next_server(&self, response: &Message) -> Option<String> {
        if response.authoritative() && !response.answers().is_empty() {
            return None;
        }
        response
            .name_servers()
            .iter()
            .find(|rr| rr.record_type() == RecordType::SOA)
            .and_then(|rr| rr.data().as_soa())
            .map(|soa| format!("{}:53", soa.mname()))
    }
}

/// `recursion(max, recurser)`: after the inner exchange, asks `recurser`
/// for a next server up to `max` additional times, re-querying each via
/// `build_exchanger`.
pub struct Recursion {
    pub inner: Box<dyn Exchanger>,
    pub max_rounds: usize,
    pub recurser: Box<dyn Recurser>,
    pub build_exchanger: Box<dyn Fn(SocketAddr) -> Box<dyn Exchanger> + Send + Sync>,
    pub timeout: Duration,
}

#[async_trait]
impl Exchanger for Recursion {
    async fn exchange(&self, query: &Message) -> Result<Message, DnsError> {
        let mut response = self.inner.exchange(query).await?;

        for _ in 0..self.max_rounds {
            let Some(next) = self.recurser.next_server(&response) else {
                break;
            };
            let Ok(addr) = next.parse::<SocketAddr>() else {
                log::warn!("recursion: could not parse next server '{}'", next);
                break;
            };
            let exchanger = (self.build_exchanger)(addr);
            response = exchanger.exchange(query).await?;
        }

        Ok(response)
    }
}

/// Logs every exchange error from the wrapped exchanger, then re-raises it.
pub struct ErrorLogging {
    pub inner: Box<dyn Exchanger>,
}

#[async_trait]
impl Exchanger for ErrorLogging {
    async fn exchange(&self, query: &Message) -> Result<Message, DnsError> {
        match self.inner.exchange(query).await {
            Ok(response) => Ok(response),
            Err(err) => {
                log::error!("recursion pipeline exchange failed: {}", err);
                Err(err)
            }
        }
    }
}

/// Counts successful recursions into the external pipeline (the
/// "non-mesos-recursed" counter from spec.md §4.8).
#[derive(Default)]
pub struct Instrumentation {
    pub inner: Option<Box<dyn Exchanger>>,
    pub recursed: AtomicU64,
}

impl Instrumentation {
    pub fn wrap(inner: Box<dyn Exchanger>) -> Self {
        Instrumentation {
            inner: Some(inner),
            recursed: AtomicU64::new(0),
        }
    }

    pub fn count(&self) -> u64 {
        self.recursed.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Exchanger for Instrumentation {
    async fn exchange(&self, query: &Message) -> Result<Message, DnsError> {
        let response = self
            .inner
            .as_ref()
            .expect("Instrumentation constructed via wrap()")
            .exchange(query)
            .await?;
        self.recursed.fetch_add(1, Ordering::Relaxed);
        Ok(response)
    }
}

/// Outcome bucket for the external handler's per-response counters
/// (spec.md §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalOutcome {
    Success,
    NxDomain,
    Failed,
}

pub fn classify(result: &Result<Message, DnsError>) -> ExternalOutcome {
    match result {
        Ok(message) if message.response_code() == ResponseCode::NXDomain => {
            ExternalOutcome::NxDomain
        }
        Ok(_) => ExternalOutcome::Success,
        Err(_) => ExternalOutcome::Failed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hickory_proto::op::{Message, MessageType};

    struct FakeExchanger {
        truncated: bool,
        fail: bool,
    }

    #[async_trait]
    impl Exchanger for FakeExchanger {
        async fn exchange(&self, _query: &Message) -> Result<Message, DnsError> {
            if self.fail {
                return Err(DnsError::RecursionExhausted);
            }
            let mut msg = Message::new();
            msg.set_message_type(MessageType::Response);
            msg.set_truncated(self.truncated);
            Ok(msg)
        }
    }

    #[tokio::test]
    async fn while_predicate_falls_through_to_next_when_truncated() {
        let chain = WhilePredicate {
            exchangers: vec![
                Box::new(FakeExchanger {
                    truncated: true,
                    fail: false,
                }),
                Box::new(FakeExchanger {
                    truncated: false,
                    fail: false,
                }),
            ],
            keep_going: was_truncated,
        };
        let query = Message::new();
        let response = chain.exchange(&query).await.unwrap();
        assert!(!response.truncated());
    }

    #[tokio::test]
    async fn while_predicate_stops_on_first_error() {
        let chain = WhilePredicate {
            exchangers: vec![
                Box::new(FakeExchanger {
                    truncated: false,
                    fail: true,
                }),
                Box::new(FakeExchanger {
                    truncated: false,
                    fail: false,
                }),
            ],
            keep_going: was_truncated,
        };
        let query = Message::new();
        assert!(chain.exchange(&query).await.is_err());
    }

    #[tokio::test]
    async fn instrumentation_counts_successful_exchanges() {
        let instrumentation = Instrumentation::wrap(Box::new(FakeExchanger {
            truncated: false,
            fail: false,
        }));
        let query = Message::new();
        instrumentation.exchange(&query).await.unwrap();
        instrumentation.exchange(&query).await.unwrap();
        assert_eq!(instrumentation.count(), 2);
    }

    #[test]
    fn classify_maps_outcomes() {
        let mut nx = Message::new();
        nx.set_response_code(ResponseCode::NXDomain);
        assert_eq!(classify(&Ok(nx)), ExternalOutcome::NxDomain);
        assert_eq!(classify(&Ok(Message::new())), ExternalOutcome::Success);
        assert_eq!(
            classify(&Err(DnsError::RecursionExhausted)),
            ExternalOutcome::Failed
        );
    }
}
