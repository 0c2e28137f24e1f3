//! Signaling-driven direct sessions.
//!
//! A [P2pSession] drives one relay session end to end: the explicit state
//! machine, the poll loop against `GET /api/v1/p2p/session/{id}`, the offer or
//! answer exchange depending on role, candidate dedup for the relay's
//! at-least-once delivery, and the encrypted channel once the connection is up.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::Weak;
use std::time::Duration;

use async_trait::async_trait;
use talka_core::DirectFrame;
use talka_transport::ConnectionInterface;
use talka_transport::ConnectionRole;
use talka_transport::DirectTransport;
use talka_transport::IceCandidate;
use talka_transport::TransportCallback;
use talka_transport::TransportInterface;
use talka_transport::WebrtcConnectionState;
use tokio_util::sync::CancellationToken;

use talka_transport::connection_ref::ConnectionRef;
use talka_transport::DirectConnection;

use crate::api::ApiClient;
use crate::api::IceCandidateRecord;
use crate::api::SessionStatus;
use crate::error::Error;
use crate::error::Result;
use crate::session::EncryptedChannel;

/// States of one signaling session, client side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Requested, not yet accepted by the target.
    Pending,
    /// Accepted; SDP exchange may begin.
    Accepted,
    /// Initiator has published its offer.
    OfferSent,
    /// Answer applied (initiator) or published (responder).
    Answered,
    /// Direct channel established.
    Connected,
    /// Torn down, terminal.
    Closed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Pending => "pending",
            SessionState::Accepted => "accepted",
            SessionState::OfferSent => "offer_sent",
            SessionState::Answered => "answered",
            SessionState::Connected => "connected",
            SessionState::Closed => "closed",
        }
    }

    /// Legal forward edges of the session lifecycle. `Closed` is reachable
    /// from everywhere and terminal.
    pub fn can_transition(&self, to: SessionState) -> bool {
        if to == SessionState::Closed {
            return *self != SessionState::Closed;
        }
        matches!(
            (self, to),
            (SessionState::Pending, SessionState::Accepted)
                | (SessionState::Accepted, SessionState::OfferSent)
                | (SessionState::Accepted, SessionState::Answered)
                | (SessionState::OfferSent, SessionState::Answered)
                | (SessionState::Answered, SessionState::Connected)
        )
    }
}

/// Mutable bookkeeping of one session: the state machine plus the two dedup
/// guards the relay's at-least-once delivery requires.
#[derive(Debug)]
pub struct SessionTracker {
    state: SessionState,
    applied_answer: bool,
    seen_candidates: HashSet<String>,
}

impl SessionTracker {
    pub fn new(initial: SessionState) -> Self {
        Self {
            state: initial,
            applied_answer: false,
            seen_candidates: HashSet::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Move to `to`, or error if the edge is not part of the lifecycle.
    pub fn transition(&mut self, to: SessionState) -> Result<()> {
        if !self.state.can_transition(to) {
            return Err(Error::InvalidTransition {
                from: self.state.as_str(),
                to: to.as_str(),
            });
        }
        self.state = to;
        Ok(())
    }

    /// Returns true exactly once; replayed answers are dropped by the caller.
    pub fn note_answer(&mut self) -> bool {
        if self.applied_answer {
            return false;
        }
        self.applied_answer = true;
        true
    }

    /// Returns true for a candidate not seen before.
    pub fn note_candidate(&mut self, fingerprint: String) -> bool {
        self.seen_candidates.insert(fingerprint)
    }

    /// Whether `fingerprint` has already been applied to the transport.
    pub fn has_candidate(&self, fingerprint: &str) -> bool {
        self.seen_candidates.contains(fingerprint)
    }
}

/// Poll pacing for session status.
#[derive(Debug, Clone, Copy)]
pub struct PollPolicy {
    /// Steady-state poll period.
    pub period: Duration,
    /// Consecutive failures tolerated before the session is abandoned.
    pub max_failures: u32,
    /// Ceiling for the failure backoff.
    pub max_backoff: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(2),
            max_failures: 8,
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl PollPolicy {
    /// Delay before the next poll after `failures` consecutive failures.
    /// Zero failures polls at the steady period; each failure doubles it,
    /// capped at `max_backoff`.
    pub fn backoff_after(&self, failures: u32) -> Duration {
        let factor = 2u32.saturating_pow(failures);
        self.period.saturating_mul(factor).min(self.max_backoff)
    }
}

/// Events surfaced by a direct session.
#[async_trait]
pub trait P2pEvents: Send + Sync {
    /// The direct channel is open and key exchange has started.
    async fn on_ready(&self, sid: &str);
    /// A decrypted message arrived from the peer.
    async fn on_message(&self, sid: &str, text: String);
    /// The session ended.
    async fn on_closed(&self, sid: &str);
}

/// Shared boxed event sink.
pub type BoxedP2pEvents = Arc<dyn P2pEvents>;

/// One direct session, either role.
pub struct P2pSession {
    sid: String,
    api: Arc<ApiClient>,
    transport: Arc<DirectTransport>,
    tracker: Arc<Mutex<SessionTracker>>,
    crypto: Arc<EncryptedChannel>,
    events: BoxedP2pEvents,
    cancel_token: CancellationToken,
    policy: PollPolicy,
}

impl P2pSession {
    pub fn new(
        sid: &str,
        api: Arc<ApiClient>,
        transport: Arc<DirectTransport>,
        events: BoxedP2pEvents,
        initial: SessionState,
    ) -> Self {
        Self {
            sid: sid.to_string(),
            api,
            transport,
            tracker: Arc::new(Mutex::new(SessionTracker::new(initial))),
            crypto: Arc::new(EncryptedChannel::new()),
            events,
            cancel_token: CancellationToken::new(),
            policy: PollPolicy::default(),
        }
    }

    /// Session id on the relay.
    pub fn sid(&self) -> &str {
        &self.sid
    }

    /// Current client-side state.
    pub fn state(&self) -> SessionState {
        self.tracker
            .lock()
            .map(|t| t.state())
            .unwrap_or(SessionState::Closed)
    }

    /// Whether key exchange has completed.
    pub fn is_encrypted(&self) -> bool {
        self.crypto.is_ready()
    }

    fn callback(&self) -> SessionCallback {
        SessionCallback {
            api: self.api.clone(),
            transport: Arc::downgrade(&self.transport),
            tracker: self.tracker.clone(),
            crypto: self.crypto.clone(),
            events: self.events.clone(),
        }
    }

    fn transition(&self, to: SessionState) -> Result<()> {
        let Ok(mut tracker) = self.tracker.lock() else {
            return Err(Error::SessionNotFound(self.sid.clone()));
        };
        tracker.transition(to)
    }

    /// Drive the initiator side to a connected channel.
    ///
    /// Waits for the target to accept, creates the connection and the offer,
    /// publishes the offer, then polls for the answer and remote candidates
    /// until the channel connects.
    pub async fn connect_as_initiator(&self) -> Result<()> {
        self.wait_for_accept().await?;
        self.transition(SessionState::Accepted)?;

        self.transport
            .new_connection(&self.sid, ConnectionRole::Offerer, self.callback().boxed())
            .await?;
        let conn = self.transport.connection(&self.sid)?;

        let offer = conn.webrtc_create_offer().await?;
        self.api.send_offer(&self.sid, &offer).await?;
        self.transition(SessionState::OfferSent)?;

        self.poll_until_connected(true).await?;
        conn.webrtc_wait_for_data_channel_open().await?;
        Ok(())
    }

    /// Drive the responder side to a connected channel.
    ///
    /// Accepts the request (optionally hinting a directly reachable local
    /// address), waits for the offer, publishes the answer, then polls for
    /// remote candidates until the channel connects.
    pub async fn connect_as_responder(&self, local_ip: Option<&str>) -> Result<()> {
        self.api.accept_session(&self.sid, local_ip).await?;
        self.transition(SessionState::Accepted)?;

        self.transport
            .new_connection(&self.sid, ConnectionRole::Answerer, self.callback().boxed())
            .await?;
        let conn = self.transport.connection(&self.sid)?;

        let offer = self.wait_for_offer().await?;
        let answer = conn.webrtc_answer_offer(offer).await?;
        self.api.send_answer(&self.sid, &answer).await?;
        self.transition(SessionState::Answered)?;

        self.poll_until_connected(false).await?;
        conn.webrtc_wait_for_data_channel_open().await?;
        Ok(())
    }

    /// Seal and send one message over the direct channel.
    pub async fn send_text(&self, text: &str) -> Result<()> {
        let frame = self.crypto.seal(text)?;
        let payload = serde_json::to_vec(&frame)?;
        let conn = self.transport.connection(&self.sid)?;
        conn.send_message(&payload).await?;
        Ok(())
    }

    /// Tear the session down on both the relay and the transport.
    pub async fn close(&self) {
        self.cancel_token.cancel();
        if let Err(e) = self.api.close_session(&self.sid).await {
            tracing::debug!("Relay close for session {} failed: {}", self.sid, e);
        }
        if let Err(e) = self.transport.close_connection(&self.sid).await {
            tracing::debug!("Transport close for session {} failed: {}", self.sid, e);
        }
        let newly_closed = self
            .tracker
            .lock()
            .map(|mut t| t.transition(SessionState::Closed).is_ok())
            .unwrap_or(false);
        if newly_closed {
            self.events.on_closed(&self.sid).await;
        }
    }

    async fn wait_for_accept(&self) -> Result<()> {
        self.poll(|status| {
            matches!(status.state.as_str(), "accepted" | "answered" | "connected")
        })
        .await
        .map(|_| ())
    }

    async fn wait_for_offer(&self) -> Result<String> {
        let status = self.poll(|status| status.offer_sdp.is_some()).await?;
        status
            .offer_sdp
            .ok_or_else(|| Error::SessionNotFound(self.sid.clone()))
    }

    /// Poll session status until `done` is satisfied, respecting the failure
    /// budget and cancellation.
    async fn poll<F>(&self, done: F) -> Result<SessionStatus>
    where F: Fn(&SessionStatus) -> bool {
        let mut failures: u32 = 0;
        loop {
            if self.cancel_token.is_cancelled() {
                return Err(Error::Cancelled(self.sid.clone()));
            }

            match self.api.session_status(&self.sid).await {
                Ok(status) => {
                    failures = 0;
                    if status.state == "closed" {
                        return Err(Error::SessionClosed(self.sid.clone()));
                    }
                    if done(&status) {
                        return Ok(status);
                    }
                }
                Err(e) => {
                    failures += 1;
                    tracing::warn!(
                        "Status poll for session {} failed ({}/{}): {}",
                        self.sid,
                        failures,
                        self.policy.max_failures,
                        e
                    );
                    if failures >= self.policy.max_failures {
                        return Err(Error::PollBudgetExhausted(self.sid.clone()));
                    }
                }
            }

            let delay = self.policy.backoff_after(failures);
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    return Err(Error::Cancelled(self.sid.clone()));
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Poll loop after the local description is published: absorb the answer
    /// (initiator only, exactly once) and any new remote candidates until the
    /// peer connection reports connected.
    async fn poll_until_connected(&self, expect_answer: bool) -> Result<()> {
        let conn = self.transport.connection(&self.sid)?;
        let mut failures: u32 = 0;

        loop {
            if self.cancel_token.is_cancelled() {
                return Err(Error::Cancelled(self.sid.clone()));
            }
            if conn.webrtc_connection_state() == WebrtcConnectionState::Connected {
                return Ok(());
            }

            match self.api.session_status(&self.sid).await {
                Ok(status) => {
                    failures = 0;
                    if status.state == "closed" {
                        return Err(Error::SessionClosed(self.sid.clone()));
                    }

                    if expect_answer {
                        if let Some(answer) = status.answer_sdp.as_deref() {
                            let fresh = self
                                .tracker
                                .lock()
                                .map(|mut t| t.note_answer())
                                .unwrap_or(false);
                            if fresh {
                                conn.webrtc_accept_answer(answer.to_string()).await?;
                                // the state callback may have advanced the tracker already
                                if let Err(e) = self.transition(SessionState::Answered) {
                                    tracing::debug!("Session {} already advanced: {}", self.sid, e);
                                }
                            }
                        }
                    }

                    self.apply_remote_candidates(&conn, status.ice).await;
                }
                Err(e) => {
                    failures += 1;
                    tracing::warn!(
                        "Status poll for session {} failed ({}/{}): {}",
                        self.sid,
                        failures,
                        self.policy.max_failures,
                        e
                    );
                    if failures >= self.policy.max_failures {
                        return Err(Error::PollBudgetExhausted(self.sid.clone()));
                    }
                }
            }

            let delay = self.policy.backoff_after(failures);
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    return Err(Error::Cancelled(self.sid.clone()));
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Feed remote candidates to the transport.
    ///
    /// A fingerprint is recorded only once the stack accepts the candidate. A
    /// candidate that trickles in before the remote description is rejected
    /// now, stays unseen, and is retried on a later poll.
    async fn apply_remote_candidates(
        &self,
        conn: &ConnectionRef<DirectConnection>,
        records: Vec<IceCandidateRecord>,
    ) {
        for record in records {
            let candidate: IceCandidate = record.into();
            let fingerprint = candidate.fingerprint();
            let seen = self
                .tracker
                .lock()
                .map(|t| t.has_candidate(&fingerprint))
                .unwrap_or(true);
            if seen {
                continue;
            }

            match conn.add_remote_candidate(candidate).await {
                Ok(()) => {
                    if let Ok(mut tracker) = self.tracker.lock() {
                        tracker.note_candidate(fingerprint);
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        "Remote candidate on session {} not applied yet, retrying later: {}",
                        self.sid,
                        e
                    );
                }
            }
        }
    }
}

/// Transport callback of one session. Holds the transport weakly; a dropped
/// transport ends event delivery instead of keeping the pool alive.
struct SessionCallback {
    api: Arc<ApiClient>,
    transport: Weak<DirectTransport>,
    tracker: Arc<Mutex<SessionTracker>>,
    crypto: Arc<EncryptedChannel>,
    events: BoxedP2pEvents,
}

#[async_trait]
impl TransportCallback for SessionCallback {
    async fn on_message(
        &self,
        sid: &str,
        msg: &[u8],
    ) -> std::result::Result<(), talka_transport::CallbackError> {
        let frame: DirectFrame = serde_json::from_slice(msg)?;
        match self.crypto.open(frame) {
            Ok(Some(text)) => self.events.on_message(sid, text).await,
            Ok(None) => {
                tracing::debug!("Session {} absorbed peer public key", sid);
            }
            Err(e) => {
                tracing::warn!("Discarding undecryptable frame on session {}: {}", sid, e);
            }
        }
        Ok(())
    }

    async fn on_local_candidate(
        &self,
        sid: &str,
        candidate: IceCandidate,
    ) -> std::result::Result<(), talka_transport::CallbackError> {
        if let Err(e) = self.api.send_ice_candidate(sid, &candidate).await {
            tracing::warn!("Publishing local candidate for {} failed: {}", sid, e);
        }
        Ok(())
    }

    async fn on_peer_connection_state_change(
        &self,
        sid: &str,
        state: WebrtcConnectionState,
    ) -> std::result::Result<(), talka_transport::CallbackError> {
        tracing::debug!("Session {} peer connection state: {:?}", sid, state);
        match state {
            WebrtcConnectionState::Connected => {
                if let Ok(mut tracker) = self.tracker.lock() {
                    if let Err(e) = tracker.transition(SessionState::Connected) {
                        tracing::debug!("Ignoring late connected event: {}", e);
                    }
                }
            }
            WebrtcConnectionState::Failed
            | WebrtcConnectionState::Disconnected
            | WebrtcConnectionState::Closed => {
                let was_closed = self
                    .tracker
                    .lock()
                    .map(|t| t.state() == SessionState::Closed)
                    .unwrap_or(true);
                if let Ok(mut tracker) = self.tracker.lock() {
                    let _ = tracker.transition(SessionState::Closed);
                }
                if !was_closed {
                    self.events.on_closed(sid).await;
                }
            }
            _ => {}
        }
        Ok(())
    }

    async fn on_data_channel_open(
        &self,
        sid: &str,
    ) -> std::result::Result<(), talka_transport::CallbackError> {
        let Some(transport) = self.transport.upgrade() else {
            return Ok(());
        };
        let conn = transport.connection(sid)?;
        let payload = serde_json::to_vec(&self.crypto.pubkey_frame())?;
        conn.send_message(&payload).await?;
        self.events.on_ready(sid).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_happy_path_initiator() {
        let mut tracker = SessionTracker::new(SessionState::Pending);
        tracker.transition(SessionState::Accepted).unwrap();
        tracker.transition(SessionState::OfferSent).unwrap();
        tracker.transition(SessionState::Answered).unwrap();
        tracker.transition(SessionState::Connected).unwrap();
        tracker.transition(SessionState::Closed).unwrap();
    }

    #[test]
    fn test_lifecycle_happy_path_responder() {
        let mut tracker = SessionTracker::new(SessionState::Pending);
        tracker.transition(SessionState::Accepted).unwrap();
        tracker.transition(SessionState::Answered).unwrap();
        tracker.transition(SessionState::Connected).unwrap();
    }

    #[test]
    fn test_illegal_transitions_rejected() {
        let mut tracker = SessionTracker::new(SessionState::Pending);
        assert!(matches!(
            tracker.transition(SessionState::Connected),
            Err(Error::InvalidTransition { .. })
        ));
        assert!(tracker.transition(SessionState::OfferSent).is_err());

        let mut closed = SessionTracker::new(SessionState::Pending);
        closed.transition(SessionState::Closed).unwrap();
        assert!(closed.transition(SessionState::Accepted).is_err());
        assert!(closed.transition(SessionState::Closed).is_err());
    }

    #[test]
    fn test_closed_reachable_from_everywhere_else() {
        for from in [
            SessionState::Pending,
            SessionState::Accepted,
            SessionState::OfferSent,
            SessionState::Answered,
            SessionState::Connected,
        ] {
            assert!(from.can_transition(SessionState::Closed));
        }
    }

    #[test]
    fn test_answer_applied_once() {
        let mut tracker = SessionTracker::new(SessionState::Pending);
        assert!(tracker.note_answer());
        assert!(!tracker.note_answer());
        assert!(!tracker.note_answer());
    }

    #[test]
    fn test_candidate_dedup() {
        let mut tracker = SessionTracker::new(SessionState::Pending);
        let c = IceCandidate {
            candidate: "candidate:1 1 udp 1 10.0.0.1 5000 typ host".to_string(),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
        };
        assert!(tracker.note_candidate(c.fingerprint()));
        assert!(!tracker.note_candidate(c.fingerprint()));

        let mut other = c.clone();
        other.candidate = "candidate:2 1 udp 1 10.0.0.2 5001 typ host".to_string();
        assert!(tracker.note_candidate(other.fingerprint()));
    }

    #[test]
    fn test_late_answered_transition_leaves_connected_state() {
        let mut tracker = SessionTracker::new(SessionState::Pending);
        tracker.transition(SessionState::Accepted).unwrap();
        tracker.transition(SessionState::OfferSent).unwrap();
        tracker.transition(SessionState::Answered).unwrap();
        tracker.transition(SessionState::Connected).unwrap();

        // the poll loop treats this as benign bookkeeping, not a failure
        assert!(matches!(
            tracker.transition(SessionState::Answered),
            Err(Error::InvalidTransition {
                from: "connected",
                to: "answered",
            })
        ));
        assert_eq!(tracker.state(), SessionState::Connected);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = PollPolicy::default();
        assert_eq!(policy.backoff_after(0), Duration::from_secs(2));
        assert_eq!(policy.backoff_after(1), Duration::from_secs(4));
        assert_eq!(policy.backoff_after(2), Duration::from_secs(8));
        assert_eq!(policy.backoff_after(3), Duration::from_secs(16));
        assert_eq!(policy.backoff_after(4), Duration::from_secs(30));
        assert_eq!(policy.backoff_after(10), Duration::from_secs(30));
    }

    struct NoopEvents;

    #[async_trait]
    impl P2pEvents for NoopEvents {
        async fn on_ready(&self, _sid: &str) {}
        async fn on_message(&self, _sid: &str, _text: String) {}
        async fn on_closed(&self, _sid: &str) {}
    }

    fn test_session(sid: &str) -> (Arc<DirectTransport>, P2pSession) {
        let transport =
            Arc::new(DirectTransport::new("stun://stun.l.google.com:19302", None).unwrap());
        let api = Arc::new(
            ApiClient::new("http://127.0.0.1:9", talka_core::Identity::generate()).unwrap(),
        );
        let session = P2pSession::new(
            sid,
            api,
            transport.clone(),
            Arc::new(NoopEvents),
            SessionState::Pending,
        );
        (transport, session)
    }

    #[tokio::test]
    async fn test_rejected_candidate_stays_unseen_for_retry() {
        let (transport, session) = test_session("sess-retry");
        transport
            .new_connection("sess-retry", ConnectionRole::Offerer, session.callback().boxed())
            .await
            .unwrap();
        let conn = transport.connection("sess-retry").unwrap();

        let record = IceCandidateRecord {
            candidate: "candidate:1 1 udp 2130706431 127.0.0.1 5000 typ host".to_string(),
            sdp_mid: Some("0".to_string()),
            sdp_m_line_index: Some(0),
        };
        let fingerprint = IceCandidate::from(record.clone()).fingerprint();

        // no remote description yet, so the stack rejects the candidate
        session.apply_remote_candidates(&conn, vec![record]).await;

        // it stays unseen and a later poll attempts it again
        let seen = session.tracker.lock().unwrap().has_candidate(&fingerprint);
        assert!(!seen);
    }

    #[tokio::test]
    async fn test_connect_after_close_reports_cancelled() {
        let (_transport, session) = test_session("sess-cancel");
        session.close().await;
        assert!(matches!(
            session.connect_as_initiator().await,
            Err(Error::Cancelled(_))
        ));
    }
}
