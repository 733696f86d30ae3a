//! Shared test infrastructure for resolution integration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use hickory_proto::op::{Message, MessageType, OpCode, Query, ResponseCode};
use hickory_proto::rr::rdata::A;
use hickory_proto::rr::{DNSClass, Name, RData, RecordType};
use hickory_proto::serialize::binary::{BinDecodable, BinDecoder, BinEncoder};
use hickory_server::authority::{MessageRequest, MessageResponse};
use hickory_server::proto::rr::Record;
use hickory_server::proto::xfer::Protocol;
use hickory_server::server::{Request, RequestHandler, ResponseHandler, ResponseInfo};

use dns_sync::container::ContainerRecord;
use dns_sync::engine::{EngineOptions, QueryEngine};
use dns_sync::error::DnsError;
use dns_sync::forwarder::Upstream;
use dns_sync::handler::SyncRequestHandler;
use dns_sync::records::{fqdn, DuplicatePolicy};
use dns_sync::rewrite::RewriteMatcher;
use dns_sync::state::DnsState;

use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;

// --- TestResponseHandler ---

/// Captures the serialized DNS response for inspection in tests.
///
/// The response is serialized via `MessageResponse::destructive_emit()` and stored
/// as raw wire-format bytes, which can then be parsed with `Message::from_vec()`.
#[derive(Clone)]
pub struct TestResponseHandler {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl TestResponseHandler {
    pub fn new() -> Self {
        Self {
            buf: Arc::new(Mutex::new(Vec::with_capacity(512))),
        }
    }

    /// Parse the captured wire bytes into a `Message` for assertions.
    pub fn into_message(self) -> Message {
        let buf = self.buf.lock().unwrap();
        assert!(!buf.is_empty(), "no response was captured");
        Message::from_vec(&buf).expect("failed to parse captured DNS response")
    }
}

#[async_trait]
impl ResponseHandler for TestResponseHandler {
    async fn send_response<'a>(
        &mut self,
        response: MessageResponse<
            '_,
            'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
        >,
    ) -> io::Result<ResponseInfo> {
        let mut buf = self.buf.lock().unwrap();
        buf.clear();
        let mut encoder = BinEncoder::new(&mut *buf);
        encoder.set_max_size(u16::MAX);
        let info = response
            .destructive_emit(&mut encoder)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        Ok(info)
    }
}

// --- Scripted upstream ---

/// Upstream resolver answering from a fixed map.
///
/// Unknown questions get an empty answer; `failing()` turns every question
/// into a transport error.
#[derive(Default)]
pub struct ScriptedUpstream {
    answers: HashMap<(String, RecordType), Vec<Record>>,
    fail: bool,
    asked: Mutex<Vec<(String, RecordType)>>,
}

impl ScriptedUpstream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Answer `name A?` with `ip`.
    pub fn with_a(mut self, name: &str, ip: Ipv4Addr, ttl: u32) -> Self {
        let owner = fqdn(name).unwrap();
        let mut record = Record::from_rdata(owner.clone(), ttl, RData::A(A::from(ip)));
        record.set_dns_class(DNSClass::IN);
        self.answers
            .entry((owner.to_ascii().to_ascii_lowercase(), RecordType::A))
            .or_default()
            .push(record);
        self
    }

    /// Answer `name rtype?` with a prepared record.
    pub fn with_record(mut self, name: &str, rtype: RecordType, record: Record) -> Self {
        self.answers
            .entry((fqdn(name).unwrap().to_ascii().to_ascii_lowercase(), rtype))
            .or_default()
            .push(record);
        self
    }

    /// Every question asked so far, lowercased.
    pub fn asked(&self) -> Vec<(String, RecordType)> {
        self.asked.lock().unwrap().clone()
    }
}

#[async_trait]
impl Upstream for ScriptedUpstream {
    async fn query(&self, name: &Name, rtype: RecordType) -> Result<Vec<Record>, DnsError> {
        let key = (name.to_ascii().to_ascii_lowercase(), rtype);
        self.asked.lock().unwrap().push(key.clone());

        if self.fail {
            return Err(DnsError::Upstream("scripted failure".into()));
        }

        Ok(self.answers.get(&key).cloned().unwrap_or_default())
    }
}

// --- Container builders ---

/// Active container whose domains resolve to an IPv4 address.
pub fn address_container(name: &str, domains: &str, ip: &str) -> ContainerRecord {
    container(name, domains, ip, true)
}

/// Active container whose domains alias a hostname.
pub fn alias_container(name: &str, domains: &str, hostname: &str) -> ContainerRecord {
    container(name, domains, hostname, false)
}

fn container(name: &str, domains: &str, target: &str, use_address_records: bool) -> ContainerRecord {
    let mut tags = BTreeMap::new();
    tags.insert("domains".to_string(), domains.to_string());
    tags.insert("enable".to_string(), "true".to_string());

    ContainerRecord {
        container_name: format!("nas/{}", name),
        host: "nas".to_string(),
        hostname: target.to_string(),
        is_active: true,
        use_address_records,
        tags,
    }
}

// --- Engine builders ---

pub struct TestEngineBuilder {
    containers: Vec<ContainerRecord>,
    rewrites: BTreeMap<String, String>,
    upstream: Option<Arc<dyn Upstream>>,
    options: EngineOptions,
    policy: DuplicatePolicy,
}

impl TestEngineBuilder {
    pub fn new() -> Self {
        Self {
            containers: Vec::new(),
            rewrites: BTreeMap::new(),
            upstream: None,
            options: EngineOptions::default(),
            policy: DuplicatePolicy::KeepAll,
        }
    }

    pub fn container(mut self, container: ContainerRecord) -> Self {
        self.containers.push(container);
        self
    }

    pub fn rewrite(mut self, from: &str, to: &str) -> Self {
        self.rewrites.insert(from.to_string(), to.to_string());
        self
    }

    pub fn upstream(mut self, upstream: Arc<dyn Upstream>) -> Self {
        self.upstream = Some(upstream);
        self
    }

    pub fn forward_unmatched(mut self, enabled: bool) -> Self {
        self.options.forward_unmatched = enabled;
        self
    }

    pub fn flatten_cnames(mut self, enabled: bool) -> Self {
        self.options.flatten_cnames = enabled;
        self
    }

    pub fn policy(mut self, policy: DuplicatePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn build(self) -> Arc<QueryEngine> {
        let state = DnsState::new(self.policy);
        state.update(&self.containers);
        let rewrites = RewriteMatcher::new(&self.rewrites).expect("invalid rewrite rules");
        Arc::new(QueryEngine::new(state, rewrites, self.upstream, self.options))
    }

    pub fn build_handler(self) -> SyncRequestHandler {
        SyncRequestHandler::new(self.build(), false)
    }

    pub fn build_verbose_handler(self) -> SyncRequestHandler {
        SyncRequestHandler::new(self.build(), true)
    }
}

// --- Query/Request construction ---

/// Build a query message with one question per `(name, type)` pair.
pub fn build_query_message(questions: &[(&str, RecordType)], id: u16) -> Message {
    let mut msg = Message::new();
    msg.set_id(id);
    msg.set_message_type(MessageType::Query);
    msg.set_op_code(OpCode::Query);
    msg.set_recursion_desired(true);
    for (name, record_type) in questions {
        let mut query = Query::new();
        query.set_name(Name::from_ascii(name).unwrap());
        query.set_query_type(*record_type);
        query.set_query_class(DNSClass::IN);
        msg.add_query(query);
    }
    msg
}

/// Build wire-format bytes for a DNS query.
pub fn build_query_bytes(name: &str, record_type: RecordType, id: u16) -> Vec<u8> {
    build_query_message(&[(name, record_type)], id)
        .to_vec()
        .unwrap()
}

/// Parse wire bytes into a MessageRequest.
pub fn parse_message_request(bytes: &[u8]) -> MessageRequest {
    let mut decoder = BinDecoder::new(bytes);
    MessageRequest::read(&mut decoder).expect("failed to parse MessageRequest")
}

pub fn client_src() -> SocketAddr {
    "10.0.0.1:12345".parse().unwrap()
}

/// Build a full single-question `Request`.
pub fn build_request(name: &str, record_type: RecordType, id: u16) -> Request {
    let bytes = build_query_bytes(name, record_type, id);
    let msg = parse_message_request(&bytes);
    Request::new(msg, client_src(), Protocol::Udp)
}

/// Build a `Request` carrying several questions.
pub fn build_multi_request(questions: &[(&str, RecordType)], id: u16) -> Request {
    let bytes = build_query_message(questions, id).to_vec().unwrap();
    let msg = parse_message_request(&bytes);
    Request::new(msg, client_src(), Protocol::Udp)
}

// --- Response helpers ---

/// Execute a query through the handler and return the parsed response.
pub async fn execute_query(
    handler: &SyncRequestHandler,
    name: &str,
    record_type: RecordType,
    id: u16,
) -> Message {
    let request = build_request(name, record_type, id);
    execute_request(handler, &request).await
}

pub async fn execute_request(handler: &SyncRequestHandler, request: &Request) -> Message {
    let response = TestResponseHandler::new();
    handler.handle_request(request, response.clone()).await;
    response.into_message()
}

/// Extract A addresses from a response.
pub fn extract_a_ips(msg: &Message) -> Vec<Ipv4Addr> {
    msg.answers()
        .iter()
        .filter_map(|r| match r.data() {
            RData::A(a) => Some(Ipv4Addr::from(*a)),
            _ => None,
        })
        .collect()
}

/// Assert response code.
pub fn assert_response_code(msg: &Message, expected: ResponseCode) {
    assert_eq!(
        msg.response_code(),
        expected,
        "expected {:?}, got {:?}",
        expected,
        msg.response_code()
    );
}

// --- Log capture ---

/// One captured log event with the fields of every span it ran inside.
#[derive(Debug, Clone, Default)]
pub struct CapturedEvent {
    pub message: String,
    pub fields: HashMap<String, String>,
    pub span_fields: HashMap<String, String>,
}

struct FieldMap(HashMap<String, String>);

impl Visit for FieldMap {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.0.insert(field.name().to_string(), value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.0.insert(field.name().to_string(), format!("{:?}", value));
    }
}

/// Layer recording every event; install it with [`LogCapture::subscriber`].
#[derive(Clone, Default)]
pub struct LogCapture {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
}

impl LogCapture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscriber(&self) -> impl Subscriber + Send + Sync {
        tracing_subscriber::registry().with(self.clone())
    }

    pub fn events(&self) -> Vec<CapturedEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Events whose message is exactly `message`.
    pub fn with_message(&self, message: &str) -> Vec<CapturedEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.message == message)
            .collect()
    }
}

impl<S> Layer<S> for LogCapture
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        let mut fields = FieldMap(HashMap::new());
        attrs.record(&mut fields);
        if let Some(span) = ctx.span(id) {
            span.extensions_mut().insert(fields);
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let mut fields = FieldMap(HashMap::new());
        event.record(&mut fields);
        let mut fields = fields.0;
        let message = fields.remove("message").unwrap_or_default();

        let mut span_fields = HashMap::new();
        if let Some(scope) = ctx.event_scope(event) {
            for span in scope.from_root() {
                if let Some(map) = span.extensions().get::<FieldMap>() {
                    span_fields.extend(map.0.clone());
                }
            }
        }

        self.events.lock().unwrap().push(CapturedEvent {
            message,
            fields,
            span_fields,
        });
    }
}
