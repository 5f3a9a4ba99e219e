use rocket::Route;

mod credentials;
mod follow_up;
mod index;
mod voting;

/// Credential relay routes, mounted at `/`.
pub fn routes() -> Vec<Route> {
    let mut routes = Vec::new();
    routes.extend(index::routes());
    routes.extend(credentials::routes());
    routes.extend(follow_up::routes());
    routes
}

/// Voting app routes, mounted at `/voting`.
pub fn voting_routes() -> Vec<Route> {
    voting::routes()
}
