//! The authoritative DNS server (spec.md §4.8): dispatches managed-zone
//! queries against the live [`RecordSet`], forwards everything else through
//! the recursion pipeline, and enforces shuffling/truncation policy.
//!
//! Structurally this generalizes `DNSHandler` from the single fixed-zone
//! acknowledgement responder it started as into full record lookups across
//! every question type the managed zone serves.

use std::net::{IpAddr, Ipv4Addr};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use hickory_resolver::Name;
use hickory_server::authority::MessageResponseBuilder;
use hickory_server::proto::op::{Header, Message, MessageType, OpCode, ResponseCode};
use hickory_server::proto::rr::{rdata, RData, Record, RecordType};
use hickory_server::proto::rr::{LowerName, LowerQuery};
use hickory_server::server::{Request, RequestHandler, ResponseHandler, ResponseInfo};
use rand::seq::SliceRandom;

use crate::config::Config;
use crate::dns::recursion::{self, Exchanger};
use crate::records::RecordSet;

/// Per-outcome counters for the external (non-managed) path, per spec.md
/// §4.8's "response counters incremented per outcome".
#[derive(Default)]
pub struct ExternalCounters {
    pub success: AtomicU64,
    pub nxdomain: AtomicU64,
    pub failed: AtomicU64,
    pub recursed: AtomicU64,
}

impl ExternalCounters {
    fn record(&self, outcome: recursion::ExternalOutcome) {
        match outcome {
            recursion::ExternalOutcome::Success => self.success.fetch_add(1, Ordering::Relaxed),
            recursion::ExternalOutcome::NxDomain => self.nxdomain.fetch_add(1, Ordering::Relaxed),
            recursion::ExternalOutcome::Failed => self.failed.fetch_add(1, Ordering::Relaxed),
        };
    }
}

/// The gateway's `hickory_server::server::RequestHandler`: authoritative
/// for `domain`, recursive (when enabled) for everything else.
pub struct GatewayHandler {
    domain: LowerName,
    live: Arc<ArcSwap<RecordSet>>,
    config: Arc<Config>,
    recursion: Option<Arc<dyn Exchanger>>,
    counters: ExternalCounters,
}

impl GatewayHandler {
    pub fn new(
        config: Arc<Config>,
        live: Arc<ArcSwap<RecordSet>>,
        recursion: Option<Arc<dyn Exchanger>>,
    ) -> Self {
        let domain = LowerName::from(Name::from_str(&format!("{}.", config.domain)).unwrap());
        GatewayHandler {
            domain,
            live,
            config,
            recursion,
            counters: ExternalCounters::default(),
        }
    }

    pub fn counters(&self) -> &ExternalCounters {
        &self.counters
    }

    /// Strip a leading `*.` wildcard subcomponent and lowercase, matching
    /// the name-normalization step in spec.md §4.8.
    fn normalize_query_name(query: &LowerQuery) -> String {
        let raw = query.name().to_string().to_ascii_lowercase();
        raw.strip_prefix("*.").unwrap_or(&raw).to_string()
    }

    async fn handle_managed<R: ResponseHandler>(
        &self,
        request: &Request,
        mut response_handle: R,
    ) -> ResponseInfo {
        let query = &request.queries()[0];
        let qname = Self::normalize_query_name(query);
        let qtype = query.query_type();
        let live = self.live.load();

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            build_managed_answer(&live, &self.config, &qname, qtype)
        }));

        let answer = match outcome {
            Ok(answer) => answer,
            Err(_) => {
                log::error!("managed handler panicked for query '{}'", qname);
                return servfail(request, response_handle).await;
            }
        };

        let builder = MessageResponseBuilder::from_message_request(request);
        let mut header = Header::response_from_request(request.header());
        header.set_authoritative(true);
        header.set_recursion_available(self.config.recurse_on);
        header.set_response_code(answer.rcode);

        let mut answers = answer.answers;
        shuffle(&mut answers);

        let max_size = response_size_limit(request, self.config.dns_port);
        let truncated = enforce_truncation(&mut answers, max_size);
        header.set_truncated(truncated);

        let response = builder.build(
            header,
            answers.iter(),
            answer.name_servers.iter(),
            answer.soa.iter(),
            answer.additionals.iter(),
        );

        match response_handle.send_response(response).await {
            Ok(info) => info,
            Err(e) => {
                log::error!("failed to send managed response: {}", e);
                let mut header = Header::new();
                header.set_response_code(ResponseCode::ServFail);
                header.into()
            }
        }
    }

    async fn handle_external<R: ResponseHandler>(
        &self,
        request: &Request,
        mut response_handle: R,
    ) -> ResponseInfo {
        if !self.config.external_on || self.recursion.is_none() {
            return refused(request, response_handle).await;
        }
        let exchanger = self.recursion.clone().expect("checked above");

        let forwarded = build_forward_message(request);
        let handle = tokio::spawn(async move { exchanger.exchange(&forwarded).await });
        let result = match handle.await {
            Ok(result) => result,
            Err(_) => Err(crate::error::dns::DnsError::HandlerPanicked(
                "external exchange panicked".into(),
            )),
        };

        self.counters.recursed.fetch_add(1, Ordering::Relaxed);
        self.counters.record(recursion::classify(&result));

        match result {
            Ok(message) => {
                let mut header = Header::response_from_request(request.header());
                header.set_response_code(message.response_code());
                header.set_recursion_available(true);
                let answers: Vec<Record> = message.answers().to_vec();
                let response = MessageResponseBuilder::from_message_request(request).build(
                    header,
                    answers.iter(),
                    EMPTY_RECORDS.iter(),
                    EMPTY_RECORDS.iter(),
                    EMPTY_RECORDS.iter(),
                );
                response_handle
                    .send_response(response)
                    .await
                    .unwrap_or_else(|_| header.into())
            }
            Err(_) => servfail(request, response_handle).await,
        }
    }
}

/// Shared empty-section value for `MessageResponseBuilder::build` calls.
const EMPTY_RECORDS: [Record; 0] = [];

async fn refused<R: ResponseHandler>(request: &Request, mut response_handle: R) -> ResponseInfo {
    let mut header = Header::response_from_request(request.header());
    header.set_response_code(ResponseCode::Refused);
    let response = MessageResponseBuilder::from_message_request(request).build(
        header,
        EMPTY_RECORDS.iter(),
        EMPTY_RECORDS.iter(),
        EMPTY_RECORDS.iter(),
        EMPTY_RECORDS.iter(),
    );
    response_handle
        .send_response(response)
        .await
        .unwrap_or_else(|_| header.into())
}

async fn servfail<R: ResponseHandler>(request: &Request, mut response_handle: R) -> ResponseInfo {
    let mut header = Header::response_from_request(request.header());
    header.set_response_code(ResponseCode::ServFail);
    let response = MessageResponseBuilder::from_message_request(request).build(
        header,
        EMPTY_RECORDS.iter(),
        EMPTY_RECORDS.iter(),
        EMPTY_RECORDS.iter(),
        EMPTY_RECORDS.iter(),
    );
    response_handle
        .send_response(response)
        .await
        .unwrap_or_else(|_| header.into())
}

fn build_forward_message(request: &Request) -> Message {
    let mut forwarded = Message::new();
    forwarded.set_id(request.header().id());
    forwarded.set_message_type(MessageType::Query);
    forwarded.set_op_code(OpCode::Query);
    forwarded.set_recursion_desired(true);
    for query in request.queries() {
        forwarded.add_query(query.original().clone());
    }
    forwarded
}

#[async_trait]
impl RequestHandler for GatewayHandler {
    async fn handle_request<R: ResponseHandler>(
        &self,
        request: &Request,
        response_handle: R,
    ) -> ResponseInfo
    where
        R: ResponseHandler + Send,
    {
        if request.op_code() != OpCode::Query || request.message_type() != MessageType::Query {
            let mut header = Header::response_from_request(request.header());
            header.set_response_code(ResponseCode::ServFail);
            return header.into();
        }

        if request.queries().is_empty() {
            let mut header = Header::response_from_request(request.header());
            header.set_response_code(ResponseCode::FormErr);
            return header.into();
        }

        let qname = Self::normalize_query_name(&request.queries()[0]);
        let query_name = match Name::from_str(&qname) {
            Ok(name) => LowerName::from(name),
            Err(_) => {
                let mut header = Header::response_from_request(request.header());
                header.set_response_code(ResponseCode::FormErr);
                return header.into();
            }
        };

        if self.domain.zone_of(&query_name) {
            self.handle_managed(request, response_handle).await
        } else {
            self.handle_external(request, response_handle).await
        }
    }
}

/// The assembled pieces of a managed-zone response, before shuffling and
/// truncation are applied.
struct ManagedAnswer {
    rcode: ResponseCode,
    answers: Vec<Record>,
    name_servers: Vec<Record>,
    soa: Vec<Record>,
    additionals: Vec<Record>,
}

fn build_managed_answer(
    live: &RecordSet,
    config: &Config,
    qname: &str,
    qtype: RecordType,
) -> ManagedAnswer {
    let ttl = config.ttl;
    let name = match Name::from_str(qname) {
        Ok(n) => n,
        Err(_) => {
            return ManagedAnswer {
                rcode: ResponseCode::FormErr,
                answers: vec![],
                name_servers: vec![],
                soa: vec![],
                additionals: vec![],
            }
        }
    };

    let soa_record = || soa_record(config, &name, ttl);
    let ns_record = || ns_record(config, &name, ttl);

    let a_records = a_records_for(live, qname, &name, ttl);
    let srv_records = srv_records_for(live, qname, &name, ttl);
    let has_any_record = !a_records.is_empty() || !srv_records.is_empty();

    match qtype {
        RecordType::A => negative_or_positive(a_records, soa_record()),
        RecordType::AAAA => {
            if has_any_record {
                ManagedAnswer {
                    rcode: ResponseCode::NoError,
                    answers: vec![],
                    name_servers: vec![],
                    soa: vec![soa_record()],
                    additionals: vec![],
                }
            } else {
                ManagedAnswer {
                    rcode: ResponseCode::NXDomain,
                    answers: vec![],
                    name_servers: vec![],
                    soa: vec![soa_record()],
                    additionals: vec![],
                }
            }
        }
        RecordType::SRV => {
            let additionals = srv_glue(live, qname, ttl);
            if srv_records.is_empty() {
                ManagedAnswer {
                    rcode: ResponseCode::NoError,
                    answers: vec![],
                    name_servers: vec![],
                    soa: vec![],
                    additionals: vec![],
                }
            } else {
                ManagedAnswer {
                    rcode: ResponseCode::NoError,
                    answers: srv_records,
                    name_servers: vec![],
                    soa: vec![],
                    additionals,
                }
            }
        }
        RecordType::SOA => ManagedAnswer {
            rcode: ResponseCode::NoError,
            answers: vec![soa_record()],
            name_servers: vec![],
            soa: vec![],
            additionals: vec![],
        },
        RecordType::NS => ManagedAnswer {
            rcode: ResponseCode::NoError,
            answers: vec![ns_record()],
            name_servers: vec![],
            soa: vec![],
            additionals: vec![],
        },
        RecordType::ANY => {
            if !has_any_record {
                return ManagedAnswer {
                    rcode: ResponseCode::NXDomain,
                    answers: vec![],
                    name_servers: vec![],
                    soa: vec![soa_record()],
                    additionals: vec![],
                };
            }
            let mut answers = a_records;
            answers.extend(srv_records);
            answers.push(soa_record());
            answers.push(ns_record());
            ManagedAnswer {
                rcode: ResponseCode::NoError,
                answers,
                name_servers: vec![],
                soa: vec![],
                additionals: vec![],
            }
        }
        _ => ManagedAnswer {
            rcode: ResponseCode::NoError,
            answers: vec![],
            name_servers: vec![],
            soa: vec![],
            additionals: vec![],
        },
    }
}

fn negative_or_positive(answers: Vec<Record>, soa: Record) -> ManagedAnswer {
    if answers.is_empty() {
        ManagedAnswer {
            rcode: ResponseCode::NXDomain,
            answers: vec![],
            name_servers: vec![],
            soa: vec![soa],
            additionals: vec![],
        }
    } else {
        ManagedAnswer {
            rcode: ResponseCode::NoError,
            answers,
            name_servers: vec![],
            soa: vec![],
            additionals: vec![],
        }
    }
}

fn a_records_for(live: &RecordSet, qname: &str, name: &Name, ttl: u32) -> Vec<Record> {
    let Some(answer) = live.a.get(qname) else {
        return Vec::new();
    };
    answer
        .iter()
        .filter_map(|ip| ip.parse::<IpAddr>().ok())
        .filter_map(|ip| match ip {
            IpAddr::V4(v4) => Some(Record::from_rdata(
                name.clone(),
                ttl,
                RData::A(rdata::A(v4)),
            )),
            IpAddr::V6(_) => None,
        })
        .collect()
}

fn srv_records_for(live: &RecordSet, qname: &str, name: &Name, ttl: u32) -> Vec<Record> {
    let Some(answer) = live.srv.get(qname) else {
        return Vec::new();
    };
    answer
        .iter()
        .filter_map(|target| {
            let (host, port) = target.rsplit_once(':')?;
            let port: u16 = port.parse().ok()?;
            let target_name = Name::from_str(host).ok()?;
            Some(Record::from_rdata(
                name.clone(),
                ttl,
                RData::SRV(rdata::SRV::new(0, 0, port, target_name)),
            ))
        })
        .collect()
}

/// Exactly the first A record for each SRV target host, per spec.md §4.8's
/// "include exactly the first A record as additional/glue".
fn srv_glue(live: &RecordSet, qname: &str, ttl: u32) -> Vec<Record> {
    let Some(answer) = live.srv.get(qname) else {
        return Vec::new();
    };
    let mut glue = Vec::new();
    for target in answer.iter() {
        let Some((host, _)) = target.rsplit_once(':') else {
            continue;
        };
        if let Some(first_ip) = live.a.get(host).and_then(|a| a.first()) {
            if let (Ok(name), Ok(IpAddr::V4(v4))) =
                (Name::from_str(host), first_ip.parse::<IpAddr>())
            {
                glue.push(Record::from_rdata(name, ttl, RData::A(rdata::A(v4))));
            }
        }
    }
    glue
}

fn soa_record(config: &Config, name: &Name, ttl: u32) -> Record {
    let mname = Name::from_str(&config.soa.mname).unwrap_or_else(|_| name.clone());
    let rname = Name::from_str(&config.soa.rname).unwrap_or_else(|_| name.clone());
    Record::from_rdata(
        name.clone(),
        ttl,
        RData::SOA(rdata::SOA::new(
            mname,
            rname,
            config.current_serial(),
            config.soa.refresh as i32,
            config.soa.retry as i32,
            config.soa.expire as i32,
            config.soa.minttl,
        )),
    )
}

fn ns_record(config: &Config, name: &Name, ttl: u32) -> Record {
    let mname = Name::from_str(&config.soa.mname).unwrap_or_else(|_| name.clone());
    Record::from_rdata(name.clone(), ttl, RData::NS(rdata::NS(mname)))
}

fn shuffle(records: &mut [Record]) {
    records.shuffle(&mut rand::thread_rng());
}

/// The response byte budget for this request: the TCP protocol max, or for
/// UDP either 512 bytes or the EDNS0-advertised payload size (§4.8).
fn response_size_limit(request: &Request, _port: u16) -> usize {
    const UDP_DEFAULT: usize = 512;
    const TCP_MAX: usize = 65_535;

    match request.protocol() {
        hickory_server::server::Protocol::Tcp => TCP_MAX,
        _ => request
            .edns()
            .map(|edns| edns.max_payload() as usize)
            .unwrap_or(UDP_DEFAULT),
    }
}

/// Trim answers from the tail until the (rough) serialized size fits
/// `max_size`, returning whether truncation occurred.
fn enforce_truncation(answers: &mut Vec<Record>, max_size: usize) -> bool {
    const HEADER_BUDGET: usize = 64;
    const ESTIMATED_RECORD_SIZE: usize = 48;

    let mut truncated = false;
    while HEADER_BUDGET + answers.len() * ESTIMATED_RECORD_SIZE > max_size && !answers.is_empty() {
        answers.pop();
        truncated = true;
    }
    truncated
}

/// Listens on UDP and TCP for `handler` until the process shuts down.
pub async fn serve(
    handler: GatewayHandler,
    listener: IpAddr,
    port: u16,
    tcp_timeout: Duration,
) -> std::io::Result<()> {
    let mut server = hickory_server::server::ServerFuture::new(handler);
    let addr = std::net::SocketAddr::new(listener, port);
    server.register_socket(tokio::net::UdpSocket::bind(addr).await?);
    server.register_listener(tokio::net::TcpListener::bind(addr).await?, tcp_timeout);
    server.block_until_done().await
}
