//! Query resolution engine.
//!
//! Resolution of a single question:
//!
//! ```text
//! AAAA                  → NoError, no answers
//! not A / CNAME         → rewrite + forward, answers verbatim
//! A / CNAME, local hit  → A answers, CNAME targets resolved upstream
//!                         (flattened onto the queried name if enabled)
//! A / CNAME, no hit     → rewrite + forward if forward_unmatched
//! ```
//!
//! Whatever path was taken, an empty answer set becomes NXDOMAIN.

use hickory_proto::op::{LowerQuery, ResponseCode};
use hickory_proto::rr::rdata::{A, CNAME};
use hickory_proto::rr::{DNSClass, Name, RData, Record, RecordType};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::forwarder::Upstream;
use crate::metrics::{self, ForwardResult};
use crate::records::{RecordTable, RecordTarget, ResolvedRecord};
use crate::rewrite::RewriteMatcher;
use crate::state::DnsState;

/// TTL for answers sourced from the local record table.
pub const LOCAL_TTL: u32 = 60;

/// TTL for CNAME records that point at a resolved chain.
pub const CNAME_CHAIN_TTL: u32 = 0;

/// Behaviour switches for the engine.
#[derive(Debug, Clone, Copy)]
pub struct EngineOptions {
    /// Forward questions that match no local record.
    pub forward_unmatched: bool,
    /// Collapse CNAME chains into A records on the queried name.
    pub flatten_cnames: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            forward_unmatched: true,
            flatten_cnames: true,
        }
    }
}

/// How a question was answered, for logs and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Multi-question request.
    Unsupported,
    /// AAAA short-circuit.
    Ipv6Suppressed,
    /// At least one local record matched.
    Local,
    /// Answered (or not) by the upstream resolver.
    Forwarded,
    /// No local record and forwarding disabled.
    Unmatched,
}

/// Final result of resolving a request.
#[derive(Debug, Clone)]
pub struct Resolution {
    /// Response code to send.
    pub response_code: ResponseCode,
    /// Answer section.
    pub answers: Vec<Record>,
    /// Path the resolution took.
    pub outcome: Outcome,
}

impl Resolution {
    fn servfail() -> Self {
        Self {
            response_code: ResponseCode::ServFail,
            answers: Vec::new(),
            outcome: Outcome::Unsupported,
        }
    }

    fn from_answers(answers: Vec<Record>, outcome: Outcome) -> Self {
        let response_code = if answers.is_empty() {
            ResponseCode::NXDomain
        } else {
            ResponseCode::NoError
        };
        Self {
            response_code,
            answers,
            outcome,
        }
    }
}

/// Resolves questions against the record table, rewrite rules and upstream.
pub struct QueryEngine {
    state: DnsState,
    rewrites: RewriteMatcher,
    upstream: Option<Arc<dyn Upstream>>,
    options: EngineOptions,
}

impl QueryEngine {
    /// Create an engine reading from `state`.
    pub fn new(
        state: DnsState,
        rewrites: RewriteMatcher,
        upstream: Option<Arc<dyn Upstream>>,
        options: EngineOptions,
    ) -> Self {
        Self {
            state,
            rewrites,
            upstream,
            options,
        }
    }

    /// Shared state this engine reads from.
    pub fn state(&self) -> &DnsState {
        &self.state
    }

    /// Resolve every question of a request.
    ///
    /// Only single-question requests are supported; anything else is a
    /// server failure.
    pub async fn resolve_request(&self, queries: &[LowerQuery]) -> Resolution {
        match queries {
            [query] => self.resolve(query).await,
            _ => {
                warn!(questions = queries.len(), "unsupported number of questions");
                Resolution::servfail()
            }
        }
    }

    /// Resolve a single question.
    pub async fn resolve(&self, query: &LowerQuery) -> Resolution {
        let name = Name::from(query.name().clone());
        let rtype = query.query_type();

        match rtype {
            RecordType::AAAA => {
                debug!("IPv6 query, answering empty");
                Resolution {
                    response_code: ResponseCode::NoError,
                    answers: Vec::new(),
                    outcome: Outcome::Ipv6Suppressed,
                }
            }
            RecordType::A | RecordType::CNAME => {
                // One snapshot per query; a concurrent swap does not affect it.
                let table = self.state.snapshot();
                self.resolve_primary(&table, query, &name, rtype).await
            }
            _ => {
                debug!(rtype = ?rtype, "non-primary type, forwarding");
                let answers = self.forward(&name, rtype).await;
                Resolution::from_answers(answers, Outcome::Forwarded)
            }
        }
    }

    async fn resolve_primary(
        &self,
        table: &RecordTable,
        query: &LowerQuery,
        name: &Name,
        rtype: RecordType,
    ) -> Resolution {
        let records = table.lookup(query.name());

        if records.is_empty() {
            if self.options.forward_unmatched {
                debug!(generation = table.generation(), "no local record, forwarding");
                let answers = self.forward(name, rtype).await;
                return Resolution::from_answers(answers, Outcome::Forwarded);
            }
            debug!(generation = table.generation(), "no local record");
            return Resolution::from_answers(Vec::new(), Outcome::Unmatched);
        }

        let mut answers = Vec::new();
        for record in records {
            debug!(
                generation = table.generation(),
                target = ?record.target,
                container = %record.container.container_name,
                "answering from local record"
            );
            self.answer_local(name, record, &mut answers).await;
        }

        Resolution::from_answers(answers, Outcome::Local)
    }

    async fn answer_local(&self, name: &Name, record: &ResolvedRecord, answers: &mut Vec<Record>) {
        match &record.target {
            RecordTarget::Address(ip) => {
                answers.push(in_record(name.clone(), LOCAL_TTL, RData::A(A::from(*ip))));
            }
            RecordTarget::Alias(target) => {
                answers.extend(self.resolve_cname(name, target).await);
            }
        }
    }

    /// Resolve a local CNAME whose target lives outside the local records.
    ///
    /// The target's address always comes from the forwarding path.
    pub async fn resolve_cname(&self, original: &Name, target: &Name) -> Vec<Record> {
        let upstream_answers = self.forward(target, RecordType::A).await;

        if self.options.flatten_cnames {
            return upstream_answers
                .into_iter()
                .filter(|r| r.record_type() == RecordType::A)
                .map(|mut r| {
                    r.set_name(original.clone());
                    r
                })
                .collect();
        }

        let mut answers = Vec::with_capacity(upstream_answers.len() + 1);
        answers.push(in_record(
            original.clone(),
            CNAME_CHAIN_TTL,
            RData::CNAME(CNAME(target.clone())),
        ));
        answers.extend(upstream_answers);
        answers
    }

    /// Forward a question, trying the matching rewrite rule first.
    ///
    /// Never fails: transport errors and timeouts yield no answers.
    pub async fn forward(&self, name: &Name, rtype: RecordType) -> Vec<Record> {
        if let Some(rewritten) = self.rewrites.rewrite(name) {
            match rewritten {
                Ok(rewritten) => {
                    debug!(from = %name, to = %rewritten, "rewriting before forwarding");
                    let answers = self.forward_direct(&rewritten, rtype).await;
                    if !answers.is_empty() {
                        return answers;
                    }
                }
                Err(e) => {
                    warn!(name = %name, error = %e, "rewrite produced an invalid name");
                }
            }
        }

        self.forward_direct(name, rtype).await
    }

    async fn forward_direct(&self, name: &Name, rtype: RecordType) -> Vec<Record> {
        let Some(upstream) = &self.upstream else {
            debug!(name = %name, "no upstream configured");
            return Vec::new();
        };

        match upstream.query(name, rtype).await {
            Ok(answers) => {
                let result = if answers.is_empty() {
                    ForwardResult::Empty
                } else {
                    ForwardResult::Answered
                };
                metrics::record_forward(result);
                answers
            }
            Err(e) => {
                warn!(name = %name, rtype = ?rtype, error = %e, "forwarding failed");
                metrics::record_forward(ForwardResult::Error);
                Vec::new()
            }
        }
    }
}

fn in_record(name: Name, ttl: u32, rdata: RData) -> Record {
    let mut record = Record::from_rdata(name, ttl, rdata);
    record.set_dns_class(DNSClass::IN);
    record
}
