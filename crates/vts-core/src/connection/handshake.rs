//! Authentication state machine and liveness checker.
//!
//! After the transport opens, the connection asks the API whether it is
//! active, then authenticates with the stored token or obtains a new one.
//! Every (re)entry into the flow starts a new epoch; results and retries of
//! older epochs are ignored, so at most one flow is ever in progress.

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, error, info, trace, warn};
use vts_rpc::{
    API_NOT_ACTIVE, API_STATE_REQUEST, AUTHENTICATION_REQUEST, AUTHENTICATION_TOKEN_REQUEST,
    ApiStateData, AuthenticationData, AuthenticationTokenData, CallError, Connector,
    INVALID_TOKEN, ResponseEnvelope,
};

use super::actor::{ConnectionActor, Responder};
use crate::status::StatusText;
use crate::store::{StoreError, TOKEN_KEY, TokenStore};
use crate::timers::TimerKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HandshakePhase {
    #[default]
    Idle,
    CheckingActive,
    Authenticating,
    Ready,
}

/// Which handshake request a response belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HandshakeStep {
    ApiState,
    Authenticate,
    RequestToken,
}

#[derive(Debug, Default)]
pub(crate) struct Handshake {
    phase: HandshakePhase,
    epoch: u64,
}

impl Handshake {
    /// Enter `phase` as a new flow, invalidating everything in flight.
    fn restart(&mut self, phase: HandshakePhase) -> u64 {
        self.epoch += 1;
        self.phase = phase;
        self.epoch
    }

    fn reset(&mut self) {
        self.restart(HandshakePhase::Idle);
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.epoch == epoch
    }

    pub(crate) fn phase(&self) -> HandshakePhase {
        self.phase
    }
}

fn decode<T: DeserializeOwned>(
    outcome: vts_rpc::Result<ResponseEnvelope>,
) -> vts_rpc::Result<T> {
    outcome.and_then(|response| response.data_as::<T>().map_err(CallError::from))
}

impl<C: Connector, S: TokenStore> ConnectionActor<C, S> {
    /// Ask the API whether it is active; authenticate if it is.
    pub(super) fn check_active_state(&mut self) {
        self.timers.cancel_where(TimerKind::is_handshake);
        let epoch = self.handshake.restart(HandshakePhase::CheckingActive);
        debug!(epoch, "Checking API state");

        let step = HandshakeStep::ApiState;
        self.dispatch(
            API_STATE_REQUEST,
            None,
            self.request_timeout,
            Responder::Handshake { step, epoch },
        );
    }

    /// Authenticate with the stored token, or request a new one.
    pub(super) fn try_auth(&mut self) {
        self.timers.cancel_where(TimerKind::is_handshake);
        let epoch = self.handshake.restart(HandshakePhase::Authenticating);
        self.report(StatusText::Authenticating);

        let token = match self.store.get(TOKEN_KEY, &self.config.store) {
            Ok(token) => token.filter(|token| !token.is_empty()),
            Err(e) => {
                self.store_failed(&e);
                return;
            }
        };

        let (step, message_type) = if token.is_some() {
            (HandshakeStep::Authenticate, AUTHENTICATION_REQUEST)
        } else {
            (HandshakeStep::RequestToken, AUTHENTICATION_TOKEN_REQUEST)
        };
        debug!(epoch, message_type, "Authenticating");

        let data = match serde_json::to_value(self.config.authentication_params(token)) {
            Ok(data) => data,
            Err(e) => {
                self.auth_failed(&e);
                return;
            }
        };
        self.dispatch(
            message_type,
            Some(data),
            self.request_timeout,
            Responder::Handshake { step, epoch },
        );
    }

    pub(super) fn handshake_result(
        &mut self,
        step: HandshakeStep,
        epoch: u64,
        outcome: vts_rpc::Result<ResponseEnvelope>,
    ) {
        if !self.handshake.is_current(epoch) {
            trace!(?step, epoch, "Ignoring result of superseded handshake");
            // A token granted to an older flow is still stored
            if step == HandshakeStep::RequestToken
                && let Ok(grant) = decode::<AuthenticationTokenData>(outcome)
            {
                self.keep_superseded_grant(grant);
            }
            return;
        }

        match step {
            HandshakeStep::ApiState => self.on_api_state(decode(outcome)),
            HandshakeStep::Authenticate => self.on_authenticated(decode(outcome)),
            HandshakeStep::RequestToken => self.on_token_granted(decode(outcome)),
        }
    }

    fn on_api_state(&mut self, state: vts_rpc::Result<ApiStateData>) {
        match state {
            Ok(state) if state.active => self.try_auth(),
            Ok(_) => {
                info!("VTube Studio API is not active");
                self.report(StatusText::Inactive);
                self.timers
                    .schedule(TimerKind::CheckActive, self.timings.liveness_retry());
            }
            Err(e) => {
                warn!(error = %e, "API state check failed");
                self.report(StatusText::Error);
                self.timers
                    .schedule(TimerKind::CheckActive, self.timings.liveness_retry());
            }
        }
    }

    fn on_authenticated(&mut self, auth: vts_rpc::Result<AuthenticationData>) {
        match auth {
            Ok(auth) if auth.authenticated => {
                self.handshake.phase = HandshakePhase::Ready;
                info!(plugin = %self.config.plugin_name, "Authenticated");
                self.report(StatusText::Ready);
            }
            Ok(auth) => {
                info!(reason = auth.reason.as_deref().unwrap_or(""), "Token rejected");
                if let Err(e) = self.store.set(TOKEN_KEY, None, &self.config.store) {
                    self.store_failed(&e);
                    return;
                }
                self.timers
                    .schedule(TimerKind::Authenticate, self.timings.requeue());
            }
            Err(e) => self.auth_failed(&e),
        }
    }

    fn on_token_granted(&mut self, grant: vts_rpc::Result<AuthenticationTokenData>) {
        match grant {
            Ok(grant) => {
                debug!(granted = grant.authentication_token.is_some(), "Token request answered");
                let token = grant.authentication_token.as_deref();
                if let Err(e) = self.store.set(TOKEN_KEY, token, &self.config.store) {
                    self.store_failed(&e);
                    return;
                }
                self.timers
                    .schedule(TimerKind::Authenticate, self.timings.requeue());
            }
            Err(e) => self.auth_failed(&e),
        }
    }

    /// Persist a token granted to an older flow without advancing it.
    fn keep_superseded_grant(&self, grant: AuthenticationTokenData) {
        let Some(token) = grant.authentication_token.filter(|token| !token.is_empty()) else {
            return;
        };
        match self.store.set(TOKEN_KEY, Some(&token), &self.config.store) {
            Ok(()) => debug!("Stored token granted to a superseded request"),
            Err(e) => error!(error = %e, store = %self.config.store, "Token store failed"),
        }
    }

    fn store_failed(&mut self, e: &StoreError) {
        error!(error = %e, store = %self.config.store, "Token store failed");
        self.auth_failed(e);
    }

    fn auth_failed(&mut self, error: &dyn std::fmt::Display) {
        warn!(error = %error, "Authentication failed");
        self.report(StatusText::Unauthenticated);
        self.timers
            .schedule(TimerKind::Authenticate, self.timings.auth_retry());
    }

    /// React to error codes that say the session itself is no longer valid.
    pub(super) fn handle_error_code(&mut self, code: i32) {
        match code {
            INVALID_TOKEN => {
                info!("Token invalidated by user");
                self.report(StatusText::Invalidated);
                self.try_auth();
            }
            API_NOT_ACTIVE => {
                info!("API reported inactive");
                self.check_active_state();
            }
            _ => {}
        }
    }

    /// Abandon any in-progress flow and its pending retries.
    pub(super) fn reset_handshake(&mut self) {
        self.timers.cancel_where(TimerKind::is_handshake);
        self.handshake.reset();
    }
}
