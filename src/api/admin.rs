use std::sync::Arc;

use rocket::{delete, get, http::Status, post, routes, serde::json::Json, Route, State};

use crate::{
    coordinator::{Coordinator, SweepReport},
    error::Result,
    model::{
        api::compensation::CompensationDesc,
        auth::{AdminAccess, AuthToken},
        mongodb::Id,
    },
    store::VoteStore,
};

pub fn routes() -> Vec<Route> {
    routes![
        get_compensations,
        resolve_compensation,
        reconcile,
        delete_election
    ]
}

#[get("/compensations?<resolved>")]
async fn get_compensations(
    token: Result<AuthToken<AdminAccess>>,
    resolved: Option<bool>,
    store: &State<Arc<dyn VoteStore>>,
) -> Result<Json<Vec<CompensationDesc>>> {
    token?;
    let compensations = store
        .compensations(resolved)
        .await?
        .into_iter()
        .map(CompensationDesc::from)
        .collect();
    Ok(Json(compensations))
}

#[post("/compensations/<compensation_id>/resolve")]
async fn resolve_compensation(
    token: Result<AuthToken<AdminAccess>>,
    compensation_id: &str,
    store: &State<Arc<dyn VoteStore>>,
) -> Result<Json<CompensationDesc>> {
    let token = token?;
    let id = Id::parse_arg(compensation_id, "Compensation")?;
    let compensation = store.resolve_compensation(id).await?;
    info!("Compensation {id} resolved by {}", token.id());
    Ok(Json(compensation.into()))
}

/// Run a reconciliation sweep now instead of waiting for the next scheduled one.
#[post("/reconcile")]
async fn reconcile(
    token: Result<AuthToken<AdminAccess>>,
    coordinator: &State<Arc<Coordinator>>,
) -> Result<Json<SweepReport>> {
    token?;
    let report = coordinator.sweep().await?;
    Ok(Json(report))
}

/// Delete an election and its candidates. Voters keep their accounts but lose
/// the election from their history.
#[delete("/elections/<election_id>")]
async fn delete_election(
    token: Result<AuthToken<AdminAccess>>,
    election_id: &str,
    store: &State<Arc<dyn VoteStore>>,
) -> Result<Status> {
    let token = token?;
    let id = Id::parse_arg(election_id, "Election")?;
    store.delete_election(id).await?;
    info!("Election {id} deleted by {}", token.id());
    Ok(Status::Ok)
}
