use std::sync::Arc;

use rocket::{get, post, routes, serde::json::Json, Route, State};

use crate::{
    coordinator::{CastVote, Coordinator, Origin},
    error::{Error, Result},
    logging::RequestId,
    model::{
        api::vote::{LedgerVoteDesc, VoteReceipt, VoteRequest},
        auth::{AuthToken, VoterAccess},
        mongodb::Id,
    },
    store::VoteStore,
};

pub fn routes() -> Vec<Route> {
    routes![cast_vote, vote_history]
}

/// Cast the caller's vote for a candidate.
#[post("/candidates/<candidate_id>/vote", data = "<request>", format = "json")]
async fn cast_vote(
    token: Result<AuthToken<VoterAccess>>,
    candidate_id: &str,
    request: Json<VoteRequest>,
    request_id: &RequestId,
    coordinator: &State<Arc<Coordinator>>,
) -> Result<Json<VoteReceipt>> {
    let token = token?;
    let vote = CastVote {
        voter: token.id(),
        election: Id::parse_arg(&request.election, "Election")?,
        candidate: Id::parse_arg(candidate_id, "Candidate")?,
    };
    let receipt = coordinator
        .cast_vote(Origin::Request(*request_id), vote)
        .await?;
    Ok(Json(receipt))
}

/// A voter's ledger vote history. Voters may only read their own.
#[get("/voters/<voter_id>/votes")]
async fn vote_history(
    token: Result<AuthToken<VoterAccess>>,
    voter_id: &str,
    store: &State<Arc<dyn VoteStore>>,
) -> Result<Json<Vec<LedgerVoteDesc>>> {
    let token = token?;
    let voter_id = Id::parse_arg(voter_id, "Voter")?;
    if !token.may_act_for(voter_id) {
        return Err(Error::Forbidden(format!(
            "user {} may not read the votes of voter {voter_id}",
            token.id()
        )));
    }

    let voter = store
        .voter(voter_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("voter {voter_id}")))?;
    let history = voter
        .voter
        .ledger_votes
        .into_iter()
        .map(LedgerVoteDesc::from)
        .collect();
    Ok(Json(history))
}
