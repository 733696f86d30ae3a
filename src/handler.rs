//! Hickory request handler dispatching each inbound query to the engine.

use async_trait::async_trait;
use hickory_proto::op::{Header, ResponseCode};
use hickory_server::authority::MessageResponseBuilder;
use hickory_server::server::{Request, RequestHandler, ResponseHandler, ResponseInfo};
use std::sync::Arc;
use tracing::{debug, error, info, info_span, Instrument, Span};
use uuid::Uuid;

use crate::engine::{QueryEngine, Resolution};
use crate::metrics::{self, Timer};

/// Answers every request through a shared [`QueryEngine`].
#[derive(Clone)]
pub struct SyncRequestHandler {
    engine: Arc<QueryEngine>,
    verbose: bool,
}

impl SyncRequestHandler {
    /// Create a handler; `verbose` adds a correlation span to every query.
    pub fn new(engine: Arc<QueryEngine>, verbose: bool) -> Self {
        Self { engine, verbose }
    }

    /// Engine behind this handler.
    pub fn engine(&self) -> &Arc<QueryEngine> {
        &self.engine
    }

    fn query_span(&self, request: &Request) -> Span {
        if !self.verbose {
            return Span::none();
        }

        let (domain, rtype) = match request.queries().first() {
            Some(q) => (q.name().to_string(), format!("{:?}", q.query_type())),
            None => (String::new(), String::new()),
        };

        info_span!("query", id = %Uuid::new_v4(), domain = %domain, rtype = %rtype)
    }

    async fn respond<R: ResponseHandler>(
        &self,
        request: &Request,
        mut response_handle: R,
    ) -> ResponseInfo {
        let timer = Timer::start();
        let rtype = request
            .queries()
            .first()
            .map(|q| format!("{:?}", q.query_type()))
            .unwrap_or_else(|| "NONE".to_string());

        if self.verbose {
            info!(src = %request.src(), protocol = ?request.protocol(), "query received");
        } else {
            debug!(src = %request.src(), queries = ?request.queries(), "query received");
        }

        let resolution = self.engine.resolve_request(request.queries()).await;

        metrics::record_query(
            &rtype,
            resolution.outcome,
            resolution.response_code,
            timer.elapsed(),
        );

        if self.verbose {
            info!(
                rcode = ?resolution.response_code,
                answers = resolution.answers.len(),
                outcome = ?resolution.outcome,
                "responding"
            );
        } else {
            debug!(
                rcode = ?resolution.response_code,
                answers = resolution.answers.len(),
                outcome = ?resolution.outcome,
                "responding"
            );
        }

        send_resolution(request, &mut response_handle, resolution).await
    }
}

#[async_trait]
impl RequestHandler for SyncRequestHandler {
    async fn handle_request<R: ResponseHandler>(
        &self,
        request: &Request,
        response_handle: R,
    ) -> ResponseInfo {
        let span = self.query_span(request);
        self.respond(request, response_handle).instrument(span).await
    }
}

/// Build the response header: recursion is always advertised as available.
fn response_header(request: &Request, code: ResponseCode) -> Header {
    let mut header = Header::response_from_request(request.header());
    header.set_recursion_available(true);
    header.set_response_code(code);
    header
}

async fn send_resolution<R: ResponseHandler>(
    request: &Request,
    response_handle: &mut R,
    resolution: Resolution,
) -> ResponseInfo {
    let header = response_header(request, resolution.response_code);
    let builder = MessageResponseBuilder::from_message_request(request);
    let response = builder.build(
        header,
        resolution.answers.iter(),
        std::iter::empty(),
        std::iter::empty(),
        std::iter::empty(),
    );

    match response_handle.send_response(response).await {
        Ok(info) => info,
        Err(e) => {
            error!(error = %e, "failed to send response");
            ResponseInfo::from(header)
        }
    }
}
