//! Voter-facing HTTP API
//!
//! Two endpoints: vote submission and the public tally. Domain errors map
//! onto HTTP statuses; the body shapes stay thin.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use ballot_core::{extract_public_key_hash, hashed_public_key, pkh_address};
use ballot_ledger::{Ledger, LedgerError, find_block};
use ballot_net::{Envelope, Hub, Message, TransactionReceivedBody};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

pub struct ApiState<L> {
    pub db: Arc<L>,
    pub hub: Arc<Hub>,
}

impl<L> Clone for ApiState<L> {
    fn clone(&self) -> Self {
        ApiState {
            db: self.db.clone(),
            hub: self.hub.clone(),
        }
    }
}

pub fn router<L: Ledger + 'static>(state: ApiState<L>) -> axum::Router {
    axum::Router::new()
        .route("/vote", post(vote::<L>))
        .route("/parties", get(parties::<L>))
        .with_state(state)
}

/// `from` is the voter's base64 public key, `to` a party address,
/// `signature` the base64 DER signature over the vote payload.
#[derive(Debug, Deserialize)]
struct VoteRequest {
    from: String,
    to: String,
    signature: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VoteResponse {
    transaction_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PartyTally {
    name: String,
    address: String,
    votes: u64,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl ToString) -> ApiError {
        ApiError {
            status: StatusCode::BAD_REQUEST,
            message: message.to_string(),
        }
    }

    fn unauthorized(message: impl ToString) -> ApiError {
        ApiError {
            status: StatusCode::UNAUTHORIZED,
            message: message.to_string(),
        }
    }

    fn internal(message: impl ToString) -> ApiError {
        ApiError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.to_string(),
        }
    }
}

impl From<LedgerError> for ApiError {
    fn from(e: LedgerError) -> ApiError {
        match e {
            LedgerError::InsufficientVotes => ApiError::unauthorized(e),
            LedgerError::WalletError(_) => ApiError::bad_request(e),
            other => ApiError::internal(other),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({ "error": self.message }));
        (self.status, body).into_response()
    }
}

async fn vote<L: Ledger>(
    State(state): State<ApiState<L>>,
    Json(raw): Json<serde_json::Value>,
) -> Result<Json<VoteResponse>, ApiError> {
    let request: VoteRequest = serde_json::from_value(raw).map_err(ApiError::bad_request)?;
    let verifier = BASE64
        .decode(request.from.as_bytes())
        .map_err(ApiError::bad_request)?;
    let from = hashed_public_key(&verifier);
    let to = extract_public_key_hash(&request.to).map_err(ApiError::bad_request)?;
    let signature = BASE64
        .decode(request.signature.as_bytes())
        .map_err(ApiError::bad_request)?;

    // only wallets provisioned at genesis may vote
    let provisioned = find_block(&*state.db, |block| block.pays_to(&from))?;
    if provisioned.is_none() {
        warn!(from = %request.from, "vote from unknown wallet");
        return Err(ApiError::unauthorized("unknown voter"));
    }

    let transaction = state.db.cast_vote(&from, &to, &signature, &verifier)?;
    info!(transaction = %hex::encode(&transaction.id), "vote accepted");
    match Envelope::request(
        Message::TransactionReceived,
        &TransactionReceivedBody {
            transaction: transaction.clone(),
        },
    ) {
        Ok(envelope) => state.hub.broadcast(envelope),
        Err(e) => warn!(error = %e, "failed to announce vote"),
    }
    Ok(Json(VoteResponse {
        transaction_id: BASE64.encode(&transaction.id),
    }))
}

async fn parties<L: Ledger>(
    State(state): State<ApiState<L>>,
) -> Result<Json<Vec<PartyTally>>, ApiError> {
    let mut tallies = Vec::new();
    for party in state.db.parties()? {
        let votes = state
            .db
            .utxos_by_public_key(&party.public_key_hash)?
            .iter()
            .map(|u| u.value)
            .sum();
        tallies.push(PartyTally {
            name: party.name,
            address: pkh_address(&party.public_key_hash),
            votes,
        });
    }
    Ok(Json(tallies))
}
