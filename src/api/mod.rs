use rocket::{
    catch, catchers,
    http::Status,
    serde::json::{json, Json, Value},
    Catcher, Request, Route,
};

mod admin;
mod voting;

pub fn routes() -> Vec<Route> {
    let mut routes = Vec::new();
    routes.extend(voting::routes());
    routes.extend(admin::routes());
    routes
}

pub fn catchers() -> Vec<Catcher> {
    catchers![default_catcher]
}

/// Render errors that never reached a handler (unknown route, malformed body)
/// in the same JSON shape as handler errors.
#[catch(default)]
fn default_catcher(status: Status, req: &Request<'_>) -> (Status, Json<Value>) {
    let message = format!("{} {} failed: {status}", req.method(), req.uri());
    (
        status,
        Json(json!({
            "error": status.reason().unwrap_or("Unknown"),
            "message": message,
        })),
    )
}
