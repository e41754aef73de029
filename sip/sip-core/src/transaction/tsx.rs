use super::{generate_branch, TsxEvent, TsxId};
use crate::error::{FailureReason, TransportError};
use crate::transport::Transmit;
use bytesstr::BytesStr;
use sip_types::{CodeKind, Method, RAck, Request, Response, Route, StatusCode};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Option tag negotiating reliable provisional responses (RFC 3262)
const RELIABLE_PROVISIONALS: &str = "100rel";

/// The three transaction variants of RFC 3261
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TsxRole {
    InviteClient,
    InviteServer,
    NonInvite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TsxState {
    Calling,
    Trying,
    Proceeding,
    Completed,
    Confirmed,
    Cancelled,
    Terminated,
}

/// Timer knobs the engine hands to every per-tick call
#[derive(Debug, Clone, Copy)]
pub(crate) struct TsxTimers {
    pub(crate) t1: Duration,
    pub(crate) t2: Duration,
    pub(crate) t6: Duration,
    pub(crate) max_ring_time: Duration,
}

/// A single SIP transaction.
///
/// Common state lives here; variant behaviour dispatches on [`TsxRole`].
/// All methods are synchronous and called under the engine's lock, any
/// wire traffic they cause is returned as [`Transmit`] values.
pub struct Transaction {
    id: TsxId,
    role: TsxRole,
    state: TsxState,

    /// Locally created (client) or received (server) request
    request: Request,
    /// True when the request was created locally
    uac: bool,

    final_response: Option<Response>,
    provisional_response: Option<Response>,
    reliable_provisional: Option<Response>,

    /// Current RSeq value, seeded from a random 31 bit value
    rseq: u32,

    ack: Option<Request>,
    prack: Option<Request>,
    /// Distinct PRACKs sent, keeps their CSeq unique within the call
    pracks_sent: u32,

    created_at: Instant,
    first_transmit_at: Option<Instant>,
    last_transmit_at: Option<Instant>,
    completed_at: Option<Instant>,
    timed_out_at: Option<Instant>,

    /// Transmissions of the currently armed deliverable (initial send included)
    retransmits: u32,
    ack_retransmits: u32,
    prack_retransmits: u32,

    delivery_pending: bool,
    delivery_failed: bool,
    has_timed_out: bool,

    prack_supported: bool,

    /// Outbound proxy / fixed destination for requests of this transaction
    destination: Option<SocketAddr>,

    events: mpsc::UnboundedSender<TsxEvent>,
}

impl Transaction {
    fn new(
        id: TsxId,
        role: TsxRole,
        state: TsxState,
        request: Request,
        uac: bool,
        destination: Option<SocketAddr>,
        events: mpsc::UnboundedSender<TsxEvent>,
        now: Instant,
    ) -> Self {
        let prack_supported = request.supports(RELIABLE_PROVISIONALS)
            || request.requires(RELIABLE_PROVISIONALS);

        Self {
            id,
            role,
            state,
            request,
            uac,
            final_response: None,
            provisional_response: None,
            reliable_provisional: None,
            rseq: rand::random::<u32>() & 0x7FFF_FFFF,
            ack: None,
            prack: None,
            pracks_sent: 0,
            created_at: now,
            first_transmit_at: None,
            last_transmit_at: None,
            completed_at: None,
            timed_out_at: None,
            retransmits: 0,
            ack_retransmits: 0,
            prack_retransmits: 0,
            delivery_pending: false,
            delivery_failed: false,
            has_timed_out: false,
            prack_supported,
            destination,
            events,
        }
    }

    /// Client INVITE transaction, armed for sending the request
    pub(crate) fn invite_client(
        id: TsxId,
        request: Request,
        destination: Option<SocketAddr>,
        events: mpsc::UnboundedSender<TsxEvent>,
        now: Instant,
    ) -> (Self, Transmit) {
        let mut tsx = Self::new(
            id,
            TsxRole::InviteClient,
            TsxState::Calling,
            request,
            true,
            destination,
            events,
            now,
        );

        tsx.arm_delivery(now);
        let transmit = Transmit::request(tsx.request.clone(), tsx.destination);

        (tsx, transmit)
    }

    /// Non-INVITE client transaction, armed for sending the request
    pub(crate) fn non_invite_client(
        id: TsxId,
        request: Request,
        destination: Option<SocketAddr>,
        events: mpsc::UnboundedSender<TsxEvent>,
        now: Instant,
    ) -> (Self, Transmit) {
        let mut tsx = Self::new(
            id,
            TsxRole::NonInvite,
            TsxState::Trying,
            request,
            true,
            destination,
            events,
            now,
        );

        tsx.arm_delivery(now);
        let transmit = Transmit::request(tsx.request.clone(), tsx.destination);

        (tsx, transmit)
    }

    /// Server INVITE transaction. Emits `100 Trying` right away so
    /// retransmissions of the INVITE are quenched while the consumer
    /// decides what to do with the call.
    pub(crate) fn invite_server(
        id: TsxId,
        request: Request,
        events: mpsc::UnboundedSender<TsxEvent>,
        now: Instant,
    ) -> (Self, Transmit) {
        let mut tsx = Self::new(
            id,
            TsxRole::InviteServer,
            TsxState::Trying,
            request,
            false,
            None,
            events,
            now,
        );

        let mut trying = Response::to_request(&tsx.request, StatusCode::TRYING);
        // a 100 never establishes a dialog
        trying.to.tag = None;

        tsx.provisional_response = Some(trying.clone());

        (tsx, Transmit::response(trying))
    }

    /// Non-INVITE server transaction
    pub(crate) fn non_invite_server(
        id: TsxId,
        request: Request,
        events: mpsc::UnboundedSender<TsxEvent>,
        now: Instant,
    ) -> Self {
        Self::new(
            id,
            TsxRole::NonInvite,
            TsxState::Trying,
            request,
            false,
            None,
            events,
            now,
        )
    }

    pub(crate) fn id(&self) -> TsxId {
        self.id
    }

    pub(crate) fn role(&self) -> TsxRole {
        self.role
    }

    pub(crate) fn state(&self) -> TsxState {
        self.state
    }

    pub(crate) fn request(&self) -> &Request {
        &self.request
    }

    pub(crate) fn final_response(&self) -> Option<&Response> {
        self.final_response.as_ref()
    }

    pub(crate) fn delivery_pending(&self) -> bool {
        self.delivery_pending
    }

    pub(crate) fn has_reliable_provisional_outstanding(&self) -> bool {
        self.delivery_pending
            && self.state == TsxState::Proceeding
            && self.reliable_provisional.is_some()
    }

    fn set_state(&mut self, state: TsxState) {
        if self.state == state {
            return;
        }

        log::debug!("transaction {} {:?} -> {:?}", self.id, self.state, state);

        self.state = state;
        let _ = self.events.send(TsxEvent::StateChanged(state));
    }

    fn emit(&self, event: TsxEvent) {
        let _ = self.events.send(event);
    }

    /// Arm retransmission of a freshly (re)stored deliverable
    fn arm_delivery(&mut self, now: Instant) {
        self.delivery_pending = true;
        self.retransmits = 1;
        self.first_transmit_at = Some(now);
        self.last_transmit_at = Some(now);
    }

    /// Give up on the transaction, no response will ever complete it
    pub(crate) fn expire(&mut self, now: Instant) {
        self.has_timed_out = true;
        self.timed_out_at = Some(now);
        self.delivery_pending = false;

        self.set_state(TsxState::Terminated);
        self.emit(TsxEvent::Failed(FailureReason::TimedOut));
    }

    /// The transport refused to deliver for this transaction
    pub(crate) fn transport_failed(&mut self, error: TransportError) {
        self.delivery_failed = true;
        self.delivery_pending = false;

        self.set_state(TsxState::Terminated);
        self.emit(TsxEvent::Failed(FailureReason::Transport(error)));
    }

    // === client side ===

    /// Route a matched response into the transaction
    pub(crate) fn on_response(&mut self, response: Response, now: Instant) -> Vec<Transmit> {
        match self.role {
            TsxRole::InviteClient => self.invite_client_response(response, now),
            TsxRole::NonInvite => self.non_invite_response(response, now),
            TsxRole::InviteServer => {
                log::warn!(
                    "transaction {} is a UAS but received a response, ignoring",
                    self.id
                );
                vec![]
            }
        }
    }

    fn invite_client_response(&mut self, response: Response, now: Instant) -> Vec<Transmit> {
        match response.code.kind() {
            CodeKind::Provisional => {
                if self.state == TsxState::Calling {
                    self.set_state(TsxState::Proceeding);
                }

                if let TsxState::Proceeding = self.state {
                    if let Some(rseq) = response.rseq {
                        return self.handle_reliable_provisional(response, rseq);
                    }

                    self.provisional_response = Some(response.clone());
                    self.emit(TsxEvent::Provisional(response));
                }

                vec![]
            }
            CodeKind::Success => {
                if self.final_response.is_none() {
                    self.complete_invite_client(response, now, true)
                } else {
                    self.retransmit_ack()
                }
            }
            _ => {
                if self.final_response.is_none() {
                    self.complete_invite_client(response, now, false)
                } else {
                    self.retransmit_ack()
                }
            }
        }
    }

    fn complete_invite_client(
        &mut self,
        response: Response,
        now: Instant,
        success: bool,
    ) -> Vec<Transmit> {
        self.final_response = Some(response.clone());
        self.completed_at = Some(now);
        self.set_state(TsxState::Completed);

        let ack = if success {
            // a 2xx is acknowledged outside the transaction with a new branch,
            // aimed at the peer's contact
            self.create_ack(&response, generate_branch(), true)
        } else {
            // a non-2xx ACK reuses the branch and target of the INVITE
            self.create_ack(&response, self.request.via[0].branch.clone(), false)
        };

        self.ack = Some(ack.clone());

        self.set_state(TsxState::Confirmed);
        self.delivery_pending = false;

        self.emit(TsxEvent::Final(response));

        vec![Transmit::request(ack, self.destination)]
    }

    fn create_ack(
        &self,
        response: &Response,
        branch: BytesStr,
        to_contact: bool,
    ) -> Request {
        let uri = if to_contact {
            response
                .contact
                .as_ref()
                .map(|contact| contact.uri.clone())
                .unwrap_or_else(|| self.request.uri.clone())
        } else {
            self.request.uri.clone()
        };

        let mut via = self.request.via[0].clone();
        via.branch = branch;

        let mut ack = Request::new(
            Method::ACK,
            uri,
            self.request.from.clone(),
            response.to.clone(),
            self.request.call_id.clone(),
            self.request.cseq.cseq,
        );

        ack.via = vec![via];
        ack.route = self.request.route.clone();

        ack
    }

    fn retransmit_ack(&mut self) -> Vec<Transmit> {
        match &self.ack {
            Some(ack) => {
                self.ack_retransmits += 1;
                vec![Transmit::request(ack.clone(), self.destination)]
            }
            None => vec![],
        }
    }

    fn handle_reliable_provisional(&mut self, response: Response, rseq: u32) -> Vec<Transmit> {
        if let Some(previous) = &self.reliable_provisional {
            if previous.rseq == Some(rseq) {
                // retransmission of the provisional, answer with the stored PRACK
                if let Some(prack) = &self.prack {
                    self.prack_retransmits += 1;
                    return vec![Transmit::request(prack.clone(), self.destination)];
                }

                return vec![];
            }
        }

        self.pracks_sent += 1;
        let prack = self.create_prack(&response, rseq);

        self.reliable_provisional = Some(response.clone());
        self.prack = Some(prack.clone());

        self.emit(TsxEvent::Provisional(response));

        vec![Transmit::request(prack, self.destination)]
    }

    fn create_prack(&self, response: &Response, rseq: u32) -> Request {
        let uri = response
            .contact
            .as_ref()
            .map(|contact| contact.uri.clone())
            .unwrap_or_else(|| self.request.uri.clone());

        let mut via = self.request.via[0].clone();
        via.branch = generate_branch();

        let mut prack = Request::new(
            Method::PRACK,
            uri,
            self.request.from.clone(),
            response.to.clone(),
            self.request.call_id.clone(),
            self.request.cseq.cseq.wrapping_add(self.pracks_sent),
        );

        prack.via = vec![via];
        prack.route = response
            .record_route
            .iter()
            .rev()
            .map(|rr| Route(rr.0.clone()))
            .collect();
        prack.rack = Some(RAck::new(rseq, self.request.cseq.cseq, Method::INVITE));

        prack
    }

    fn non_invite_response(&mut self, response: Response, now: Instant) -> Vec<Transmit> {
        match response.code.kind() {
            CodeKind::Provisional => {
                if self.state == TsxState::Trying {
                    self.set_state(TsxState::Proceeding);
                }

                self.provisional_response = Some(response.clone());
                self.emit(TsxEvent::Provisional(response));
            }
            _ => {
                if self.final_response.is_none() {
                    self.final_response = Some(response.clone());
                    self.completed_at = Some(now);
                    self.delivery_pending = false;

                    // non-INVITE transactions have no ACK, a final response
                    // confirms them right away
                    self.set_state(TsxState::Confirmed);
                    self.emit(TsxEvent::Final(response));
                }
            }
        }

        vec![]
    }

    // === server side ===

    /// Retransmission of the transaction's request arrived
    pub(crate) fn on_duplicate_request(&mut self) -> Vec<Transmit> {
        match self.state {
            TsxState::Trying | TsxState::Proceeding => {
                let provisional = self
                    .reliable_provisional
                    .as_ref()
                    .or(self.provisional_response.as_ref());

                match provisional {
                    Some(response) => vec![Transmit::response(response.clone())],
                    None => vec![],
                }
            }
            TsxState::Completed | TsxState::Cancelled => match &self.final_response {
                Some(response) => vec![Transmit::response(response.clone())],
                None => vec![],
            },
            _ => vec![],
        }
    }

    /// ACK matched to this (INVITE server) transaction
    pub(crate) fn on_ack(&mut self) {
        if let TsxState::Completed | TsxState::Cancelled = self.state {
            self.delivery_pending = false;
            self.set_state(TsxState::Confirmed);
        }
    }

    /// Try to accept `prack` as the acknowledgement of the outstanding
    /// reliable provisional response. Returns the `200 OK` answering the
    /// PRACK on a match.
    pub(crate) fn try_prack(&mut self, prack: &Request) -> Option<Transmit> {
        let outstanding = self.reliable_provisional.as_ref()?;
        let rack = prack.rack.as_ref()?;

        let matches = prack.call_id == self.request.call_id
            && prack.from.tag == self.request.from.tag
            && Some(rack.rseq) == outstanding.rseq
            && rack.cseq == self.request.cseq.cseq
            && rack.method == Method::INVITE;

        if !matches {
            return None;
        }

        self.delivery_pending = false;

        Some(Transmit::response(Response::to_request(
            prack,
            StatusCode::OK,
        )))
    }

    /// Send a provisional response on a server INVITE transaction.
    ///
    /// With `reliable` set (and 100rel negotiated by the peer) the response
    /// is assigned the next RSeq and retransmitted until PRACKed.
    pub(crate) fn respond_provisional(
        &mut self,
        mut response: Response,
        reliable: bool,
        now: Instant,
    ) -> Vec<Transmit> {
        debug_assert_eq!(response.code.kind(), CodeKind::Provisional);

        if reliable && self.prack_supported {
            self.rseq = self.rseq.wrapping_add(1);

            response.rseq = Some(self.rseq);
            response.require.push(RELIABLE_PROVISIONALS.into());

            self.reliable_provisional = Some(response.clone());
            self.arm_delivery(now);
        } else {
            self.provisional_response = Some(response.clone());
        }

        if response.code != StatusCode::TRYING {
            self.set_state(TsxState::Proceeding);
        }

        vec![Transmit::response(response)]
    }

    /// Send the final response
    pub(crate) fn respond_final(&mut self, response: Response, now: Instant) -> Vec<Transmit> {
        debug_assert_ne!(response.code.kind(), CodeKind::Provisional);

        self.final_response = Some(response.clone());
        self.completed_at = Some(now);

        match self.role {
            TsxRole::InviteServer => {
                // retransmit until the ACK arrives
                self.set_state(TsxState::Completed);
                self.arm_delivery(now);
            }
            _ => {
                // sent once; duplicates of the request are answered with
                // the stored response by the engine
                self.set_state(TsxState::Completed);
                self.delivery_pending = false;
            }
        }

        vec![Transmit::response(response)]
    }

    /// A CANCEL matched this server INVITE transaction
    pub(crate) fn cancel_call(&mut self, now: Instant) -> Vec<Transmit> {
        match self.state {
            TsxState::Trying | TsxState::Proceeding => {
                let mut response =
                    Response::to_request(&self.request, StatusCode::REQUEST_TERMINATED);
                response.to.tag = self
                    .reliable_provisional
                    .as_ref()
                    .or(self.provisional_response.as_ref())
                    .and_then(|r| r.to.tag.clone());

                self.final_response = Some(response.clone());
                self.completed_at = Some(now);

                self.set_state(TsxState::Cancelled);
                self.arm_delivery(now);

                self.emit(TsxEvent::Cancelled);

                vec![Transmit::response(response)]
            }
            _ => vec![],
        }
    }

    // === driver ===

    /// One driver tick for this transaction. Returns messages to put on
    /// the wire, `delivery_pending` may be cleared as a side effect.
    pub(crate) fn poll_delivery(
        &mut self,
        now: Instant,
        timers: &TsxTimers,
    ) -> Vec<Transmit> {
        if !self.delivery_pending {
            return vec![];
        }

        if matches!(self.state, TsxState::Terminated | TsxState::Confirmed) || self.has_timed_out {
            self.delivery_pending = false;
            return vec![];
        }

        let first = match self.first_transmit_at {
            Some(first) => first,
            None => {
                self.delivery_pending = false;
                return vec![];
            }
        };

        if now >= first + timers.t6 {
            if self.role == TsxRole::InviteServer
                && self.state == TsxState::Proceeding
                && self.reliable_provisional.is_some()
            {
                // the provisional was never PRACKed, the call itself is
                // still alive and may be answered
                self.delivery_pending = false;
                self.emit(TsxEvent::ProvisionalTimedOut);
            } else {
                self.expire(now);
            }

            return vec![];
        }

        let last = self.last_transmit_at.unwrap_or(first);
        let exponent = self.retransmits.saturating_sub(1).min(16);
        let interval = timers.t1.saturating_mul(1 << exponent).min(timers.t2);

        if now.saturating_duration_since(last) < interval {
            return vec![];
        }

        let transmit = match (self.role, self.state) {
            (TsxRole::InviteClient, TsxState::Calling) => {
                Some(Transmit::request(self.request.clone(), self.destination))
            }
            (TsxRole::NonInvite, TsxState::Trying | TsxState::Proceeding) if self.uac => {
                Some(Transmit::request(self.request.clone(), self.destination))
            }
            (TsxRole::InviteServer, TsxState::Proceeding) => self
                .reliable_provisional
                .clone()
                .map(Transmit::response),
            (TsxRole::InviteServer, TsxState::Completed | TsxState::Cancelled) => {
                self.final_response.clone().map(Transmit::response)
            }
            _ => None,
        };

        match transmit {
            Some(transmit) => {
                self.retransmits += 1;
                self.last_transmit_at = Some(now);
                vec![transmit]
            }
            None => {
                self.delivery_pending = false;
                vec![]
            }
        }
    }

    /// Expiry sweep. Returns true when the engine should drop the
    /// transaction from its map.
    pub(crate) fn sweep(&mut self, now: Instant, timers: &TsxTimers) -> bool {
        if self.delivery_failed && self.final_response.is_none() {
            return true;
        }

        if self.state == TsxState::Terminated {
            return true;
        }

        match self.role {
            TsxRole::InviteClient | TsxRole::InviteServer => match self.state {
                TsxState::Confirmed => self
                    .completed_at
                    .is_some_and(|at| now >= at + timers.t6),
                TsxState::Completed | TsxState::Cancelled => {
                    let done = self
                        .completed_at
                        .is_some_and(|at| now >= at + timers.t6);

                    if done {
                        // no ACK ever arrived, tell the user agent so it
                        // can release whatever the call holds
                        self.expire(now);
                    }

                    done
                }
                TsxState::Proceeding => {
                    let rang_out = now >= self.created_at + timers.max_ring_time;

                    if rang_out {
                        self.expire(now);
                    }

                    rang_out
                }
                TsxState::Calling | TsxState::Trying => {
                    let over = now >= self.created_at + timers.t6;

                    if over {
                        self.expire(now);
                    }

                    over
                }
                TsxState::Terminated => true,
            },
            TsxRole::NonInvite => match self.state {
                TsxState::Confirmed | TsxState::Completed => {
                    let reference = self.completed_at.unwrap_or(self.created_at);
                    now >= reference + timers.t6
                }
                _ => {
                    let over = now >= self.created_at + timers.t6;

                    if over {
                        self.expire(now);
                    }

                    over
                }
            },
        }
    }
}
