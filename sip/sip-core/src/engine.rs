use crate::error::Error;
use crate::transaction::{
    consts, generate_branch, Transaction, TsxEvent, TsxId, TsxRole, TsxTimers,
};
use crate::transport::{Transmit, Transport};
use crate::Result;
use parking_lot::Mutex;
use sip_types::{Method, Request, Response, SipMessage, StatusCode};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Tunables of the transaction engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub t1: Duration,
    pub t2: Duration,
    pub t6: Duration,
    pub max_ring_time: Duration,

    /// Upper bound on concurrently stored transactions
    pub max_pending_transactions: usize,

    /// Debug aid: tick the state machines without touching the socket
    pub disable_retransmit_sending: bool,

    /// Match ACKs only on branch/tags. Disabling this enables a heuristic
    /// fallback matching on a unique (Call-ID, CSeq) pair.
    pub strict_ack_matching: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            t1: consts::T1,
            t2: consts::T2,
            t6: consts::T6,
            max_ring_time: consts::MAX_RING_TIME,
            max_pending_transactions: 5000,
            disable_retransmit_sending: false,
            strict_ack_matching: true,
        }
    }
}

/// Poll period of the driver while any transaction has pending work
const DRIVER_PERIOD_ACTIVE: Duration = Duration::from_millis(50);

/// Poll period of the driver while idle
const DRIVER_PERIOD_IDLE: Duration = Duration::from_millis(200);

type TsxSlot = Arc<Mutex<Transaction>>;

/// The transaction engine.
///
/// Cheap to clone; all clones share the transaction map and the driver
/// task spawned by [`Engine::new`]. Events of individual transactions are
/// delivered through the channels handed out on creation, new incoming
/// calls/requests through [`Engine::incoming_calls`] and
/// [`Engine::incoming_requests`].
#[derive(Clone)]
pub struct Engine {
    inner: Arc<Inner>,
}

struct Inner {
    config: EngineConfig,
    timers: TsxTimers,

    transport: Arc<dyn Transport>,

    transactions: Mutex<HashMap<TsxId, TsxSlot>>,

    incoming_calls: Mutex<Option<mpsc::UnboundedSender<IncomingCall>>>,
    incoming_requests: Mutex<Option<mpsc::UnboundedSender<IncomingCall>>>,

    parse_errors: AtomicU64,

    shutdown: CancellationToken,
}

/// A transaction created by this endpoint, observed through its events
#[derive(Debug)]
pub struct TsxHandle {
    id: TsxId,
    request: Request,
    events: mpsc::UnboundedReceiver<TsxEvent>,
}

impl TsxHandle {
    pub fn id(&self) -> TsxId {
        self.id
    }

    /// The request this transaction was created from, with the engine's
    /// Via already pushed
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Receive the next transaction event. `None` once the engine dropped
    /// the transaction and all buffered events were drained.
    pub async fn event(&mut self) -> Option<TsxEvent> {
        self.events.recv().await
    }
}

/// An INVITE (or other request) received from a peer, paired with the
/// server transaction answering it
pub struct IncomingCall {
    pub request: Request,
    pub tsx: ServerTsxHandle,
    pub events: mpsc::UnboundedReceiver<TsxEvent>,
}

/// Handle to respond on a server transaction
#[derive(Clone)]
pub struct ServerTsxHandle {
    id: TsxId,
    engine: Engine,
}

impl ServerTsxHandle {
    pub fn id(&self) -> TsxId {
        self.id
    }

    /// Send a provisional response. With `reliable` set (and 100rel
    /// negotiated by the caller) the response is retransmitted until a
    /// matching PRACK arrives.
    pub async fn respond_provisional(&self, response: Response, reliable: bool) -> Result<()> {
        let transmits = self
            .engine
            .with_transaction(self.id, |tsx| {
                tsx.respond_provisional(response, reliable, Instant::now())
            })
            .ok_or(Error::TransactionGone)?;

        self.engine.send_all(self.id, transmits).await
    }

    /// Send the final response
    pub async fn respond(&self, response: Response) -> Result<()> {
        let transmits = self
            .engine
            .with_transaction(self.id, |tsx| tsx.respond_final(response, Instant::now()))
            .ok_or(Error::TransactionGone)?;

        self.engine.send_all(self.id, transmits).await
    }
}

impl Engine {
    /// Create an engine above `transport` and spawn its driver task
    pub fn new(transport: Arc<dyn Transport>, config: EngineConfig) -> Self {
        let timers = TsxTimers {
            t1: config.t1,
            t2: config.t2,
            t6: config.t6,
            max_ring_time: config.max_ring_time,
        };

        let engine = Self {
            inner: Arc::new(Inner {
                config,
                timers,
                transport,
                transactions: Mutex::new(HashMap::new()),
                incoming_calls: Mutex::new(None),
                incoming_requests: Mutex::new(None),
                parse_errors: AtomicU64::new(0),
                shutdown: CancellationToken::new(),
            }),
        };

        tokio::spawn(engine.clone().drive());

        engine
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Number of transactions currently stored
    pub fn pending_transactions(&self) -> usize {
        self.inner.transactions.lock().len()
    }

    /// Record a message the codec collaborator could not parse
    pub fn note_parse_error(&self) {
        self.inner.parse_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn parse_errors(&self) -> u64 {
        self.inner.parse_errors.load(Ordering::Relaxed)
    }

    /// Stop the driver. In-flight callbacks complete, no further
    /// retransmits happen and all transactions are dropped.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    /// Subscribe to incoming INVITEs. Without a subscriber new calls are
    /// declined with `603`.
    pub fn incoming_calls(&self) -> mpsc::UnboundedReceiver<IncomingCall> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.inner.incoming_calls.lock() = Some(tx);
        rx
    }

    /// Subscribe to incoming non-INVITE requests (BYE, OPTIONS, ...).
    /// Without a subscriber they are answered with `481`.
    pub fn incoming_requests(&self) -> mpsc::UnboundedReceiver<IncomingCall> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.inner.incoming_requests.lock() = Some(tx);
        rx
    }

    // === UAC surface ===

    /// Send an INVITE and return the client transaction driving it
    #[tracing::instrument(level = "debug", skip(self, request), fields(%request))]
    pub async fn send_invite(
        &self,
        request: Request,
        destination: Option<SocketAddr>,
    ) -> Result<TsxHandle> {
        assert_eq!(request.method, Method::INVITE);

        self.send_client_request(request, destination).await
    }

    /// Send a non-INVITE request and return the client transaction
    #[tracing::instrument(level = "debug", skip(self, request), fields(%request))]
    pub async fn send_request(
        &self,
        request: Request,
        destination: Option<SocketAddr>,
    ) -> Result<TsxHandle> {
        assert_ne!(request.method, Method::INVITE);
        assert_ne!(request.method, Method::ACK);

        self.send_client_request(request, destination).await
    }

    async fn send_client_request(
        &self,
        mut request: Request,
        destination: Option<SocketAddr>,
    ) -> Result<TsxHandle> {
        let branch = generate_branch();

        let mut via = self.inner.transport.via_template();
        via.branch = branch.clone();
        request.via.insert(0, via);

        let id = TsxId::compute(&branch, &request.cseq.method);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let now = Instant::now();
        let (tsx, transmit) = if request.method == Method::INVITE {
            Transaction::invite_client(id, request.clone(), destination, events_tx, now)
        } else {
            Transaction::non_invite_client(id, request.clone(), destination, events_tx, now)
        };

        self.insert(id, tsx)?;
        self.send_all(id, vec![transmit]).await?;

        Ok(TsxHandle {
            id,
            request,
            events: events_rx,
        })
    }

    // === inbound dispatch ===

    /// Entry point for requests delivered by the transport dispatcher.
    ///
    /// Awaited by the caller so transport backpressure propagates.
    #[tracing::instrument(level = "debug", skip(self, request), fields(%request, %local, %source))]
    pub async fn on_request(&self, local: SocketAddr, source: SocketAddr, request: Request) {
        let Some(id) = TsxId::of_request(&request) else {
            log::warn!("request without via branch, unmatchable");
            return;
        };

        if request.method == Method::ACK {
            self.handle_ack(id, request).await;
        } else if request.method == Method::PRACK {
            self.handle_prack(request).await;
        } else if request.method == Method::CANCEL {
            self.handle_cancel(id, request).await;
        } else {
            if let Some(transmits) = self.with_transaction(id, |tsx| tsx.on_duplicate_request()) {
                let _ = self.send_all(id, transmits).await;
                return;
            }

            if request.method == Method::INVITE {
                self.handle_new_invite(id, request).await;
            } else {
                self.handle_new_request(id, request).await;
            }
        }
    }

    /// Entry point for responses delivered by the transport dispatcher
    #[tracing::instrument(level = "debug", skip(self, response), fields(%response, %local, %source))]
    pub async fn on_response(&self, local: SocketAddr, source: SocketAddr, response: Response) {
        let Some(id) = TsxId::of_response(&response) else {
            log::warn!("response without via branch, unmatchable");
            return;
        };

        match self.with_transaction(id, |tsx| tsx.on_response(response, Instant::now())) {
            Some(transmits) => {
                let _ = self.send_all(id, transmits).await;
            }
            None => log::debug!("orphaned response, no transaction {id}"),
        }
    }

    async fn handle_ack(&self, id: TsxId, ack: Request) {
        if self.with_transaction(id, |tsx| tsx.on_ack()).is_some() {
            return;
        }

        // 2xx ACKs carry a fresh branch and need header based matching
        if let Some(slot) = self.match_ack(&ack) {
            slot.lock().on_ack();
        } else {
            log::debug!("ACK matched no transaction, dropping");
        }
    }

    /// Walk INVITE transactions that reached a final response and match
    /// the ACK by its dialog headers
    fn match_ack(&self, ack: &Request) -> Option<TsxSlot> {
        let transactions = self.inner.transactions.lock();

        let mut by_call_id = vec![];

        for slot in transactions.values() {
            let tsx = slot.lock();

            if tsx.role() == TsxRole::NonInvite {
                continue;
            }

            let Some(final_response) = tsx.final_response() else {
                continue;
            };

            let request = tsx.request();

            if request.call_id != ack.call_id || request.cseq.cseq != ack.cseq.cseq {
                continue;
            }

            by_call_id.push(slot.clone());

            if final_response.to.tag == ack.to.tag && request.from.tag == ack.from.tag {
                return Some(slot.clone());
            }
        }

        if self.inner.config.strict_ack_matching {
            return None;
        }

        // opt-in heuristic: accept on (Call-ID, CSeq) when unambiguous
        if let [only] = by_call_id.as_slice() {
            return Some(only.clone());
        }

        None
    }

    async fn handle_prack(&self, prack: Request) {
        let transmit = {
            let transactions = self.inner.transactions.lock();

            transactions.values().find_map(|slot| {
                let mut tsx = slot.lock();

                if tsx.role() != TsxRole::InviteServer
                    || !tsx.has_reliable_provisional_outstanding()
                {
                    return None;
                }

                tsx.try_prack(&prack).map(|transmit| (tsx.id(), transmit))
            })
        };

        match transmit {
            Some((id, transmit)) => {
                let _ = self.send_all(id, vec![transmit]).await;
            }
            None => {
                log::warn!("PRACK with no matching reliable provisional, ignoring");
            }
        }
    }

    async fn handle_cancel(&self, id: TsxId, cancel: Request) {
        // retransmitted CANCEL: replay the stored response
        if let Some(transmits) = self.with_transaction(id, |tsx| tsx.on_duplicate_request()) {
            let _ = self.send_all(id, transmits).await;
            return;
        }

        // the CANCEL targets the INVITE transaction with the same branch
        let invite_id = cancel
            .top_via_branch()
            .map(|branch| TsxId::compute(branch, &Method::INVITE));

        let cancelled = match invite_id {
            Some(invite_id) => self
                .with_transaction(invite_id, |tsx| tsx.cancel_call(Instant::now()))
                .map(|transmits| (invite_id, transmits)),
            None => None,
        };

        // the CANCEL itself is answered by its own transaction
        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let mut cancel_tsx =
            Transaction::non_invite_server(id, cancel.clone(), events_tx, Instant::now());

        let code = if cancelled.is_some() {
            StatusCode::OK
        } else {
            StatusCode::CALL_OR_TRANSACTION_DOES_NOT_EXIST
        };

        let response = Response::to_request(&cancel, code);
        let cancel_transmits = cancel_tsx.respond_final(response, Instant::now());

        if let Err(e) = self.insert(id, cancel_tsx) {
            log::warn!("dropping CANCEL transaction: {e}");
        }

        if let Some((invite_id, transmits)) = cancelled {
            let _ = self.send_all(invite_id, transmits).await;
        }

        let _ = self.send_all(id, cancel_transmits).await;
    }

    async fn handle_new_invite(&self, id: TsxId, request: Request) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let (tsx, trying) =
            Transaction::invite_server(id, request.clone(), events_tx, Instant::now());

        if let Err(e) = self.insert(id, tsx) {
            log::warn!("rejecting INVITE: {e}");
            return;
        }

        let _ = self.send_all(id, vec![trying]).await;

        let call = IncomingCall {
            request: request.clone(),
            tsx: ServerTsxHandle {
                id,
                engine: self.clone(),
            },
            events: events_rx,
        };

        if !self.deliver_call(call, &self.inner.incoming_calls) {
            // nobody is taking calls
            let decline = Response::to_request(&request, StatusCode::DECLINE);

            let transmits = self
                .with_transaction(id, |tsx| tsx.respond_final(decline, Instant::now()))
                .unwrap_or_default();

            let _ = self.send_all(id, transmits).await;
        }
    }

    async fn handle_new_request(&self, id: TsxId, request: Request) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let tsx = Transaction::non_invite_server(id, request.clone(), events_tx, Instant::now());

        if let Err(e) = self.insert(id, tsx) {
            log::warn!("rejecting {} request: {e}", request.method);
            return;
        }

        let call = IncomingCall {
            request: request.clone(),
            tsx: ServerTsxHandle {
                id,
                engine: self.clone(),
            },
            events: events_rx,
        };

        if !self.deliver_call(call, &self.inner.incoming_requests) {
            let response =
                Response::to_request(&request, StatusCode::CALL_OR_TRANSACTION_DOES_NOT_EXIST);

            let transmits = self
                .with_transaction(id, |tsx| tsx.respond_final(response, Instant::now()))
                .unwrap_or_default();

            let _ = self.send_all(id, transmits).await;
        }
    }

    fn deliver_call(
        &self,
        call: IncomingCall,
        slot: &Mutex<Option<mpsc::UnboundedSender<IncomingCall>>>,
    ) -> bool {
        let mut guard = slot.lock();

        match guard.as_ref() {
            Some(sender) => match sender.send(call) {
                Ok(()) => true,
                Err(_) => {
                    // receiver is gone
                    *guard = None;
                    false
                }
            },
            None => false,
        }
    }

    // === internals ===

    fn insert(&self, id: TsxId, tsx: Transaction) -> Result<()> {
        let mut transactions = self.inner.transactions.lock();

        if transactions.len() >= self.inner.config.max_pending_transactions {
            return Err(Error::CapacityExceeded);
        }

        transactions.insert(id, Arc::new(Mutex::new(tsx)));
        Ok(())
    }

    fn with_transaction<R>(&self, id: TsxId, f: impl FnOnce(&mut Transaction) -> R) -> Option<R> {
        let slot = self.inner.transactions.lock().get(&id).cloned()?;
        let mut tsx = slot.lock();
        Some(f(&mut tsx))
    }

    async fn send_all(&self, id: TsxId, transmits: Vec<Transmit>) -> Result<()> {
        for transmit in transmits {
            let result = match &transmit.message {
                SipMessage::Request(request) => {
                    self.inner
                        .transport
                        .send_request(request, transmit.destination)
                        .await
                }
                SipMessage::Response(response) => {
                    self.inner.transport.send_response(response).await
                }
            };

            if let Err(e) = result {
                log::warn!("transport failed for transaction {id}: {e}");

                self.with_transaction(id, |tsx| tsx.transport_failed(e));
                return Err(Error::TransportFailed);
            }
        }

        Ok(())
    }

    // === driver ===

    async fn drive(self) {
        loop {
            let any_pending = self.tick().await;

            let period = if any_pending {
                DRIVER_PERIOD_ACTIVE
            } else {
                DRIVER_PERIOD_IDLE
            };

            tokio::select! {
                _ = self.inner.shutdown.cancelled() => break,
                _ = tokio::time::sleep(period) => {}
            }
        }

        self.inner.transactions.lock().clear();
        log::debug!("transaction engine driver stopped");
    }

    /// One driver pass: pace retransmits, then sweep expired transactions.
    /// Returns whether any transaction still has pending work.
    async fn tick(&self) -> bool {
        let now = Instant::now();
        let timers = self.inner.timers;

        let snapshot: Vec<(TsxId, TsxSlot)> = {
            let transactions = self.inner.transactions.lock();
            transactions
                .iter()
                .map(|(id, slot)| (*id, slot.clone()))
                .collect()
        };

        let mut any_pending = false;

        for (id, slot) in &snapshot {
            let transmits = {
                let mut tsx = slot.lock();
                let transmits = tsx.poll_delivery(now, &timers);
                any_pending |= tsx.delivery_pending();
                transmits
            };

            if transmits.is_empty() || self.inner.config.disable_retransmit_sending {
                continue;
            }

            let _ = self.send_all(*id, transmits).await;
        }

        let removed: Vec<TsxId> = snapshot
            .iter()
            .filter(|(_, slot)| slot.lock().sweep(now, &timers))
            .map(|(id, _)| *id)
            .collect();

        if !removed.is_empty() {
            let mut transactions = self.inner.transactions.lock();

            for id in removed {
                log::debug!("removing transaction {id}");
                transactions.remove(&id);
            }
        }

        any_pending
    }
}
