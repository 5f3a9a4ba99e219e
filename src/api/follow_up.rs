use log::debug;
use rocket::{
    form::{Form, FromForm},
    response::content::RawHtml,
    serde::json::Json,
    Route,
};
use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    model::oauth::AsanaSession,
};

pub fn routes() -> Vec<Route> {
    routes![show, create]
}

const FORM: &str = r#"<!doctype html>
<html>
  <head><title>Quick follow-up</title></head>
  <body>
    <form method="post" action="/follow_up">
      <label>Asana task URL <input name="task_url" type="url" required></label>
      <button type="submit">Follow up</button>
    </form>
  </body>
</html>
"#;

#[derive(Debug, FromForm)]
struct FollowUpRequest {
    task_url: String,
}

/// The task a follow-up was requested for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowUp {
    pub source_task_url: String,
    pub task_id: String,
    pub requested_by: String,
}

/// Pull the task id out of an Asana task link,
/// `https://app.asana.com/0/<project>/<task>[/f]`. Project links have no task.
fn task_id_from_url(url: &str) -> Option<&str> {
    let is_id = |segment: &str| !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit());
    let path = url.split(['?', '#']).next()?;
    let mut segments = path.split('/').skip_while(|segment| *segment != "0").skip(1);
    let project = segments.next()?;
    let task = segments.next()?;
    (is_id(project) && is_id(task)).then_some(task)
}

#[get("/follow_up")]
fn show() -> RawHtml<&'static str> {
    RawHtml(FORM)
}

#[post("/follow_up", data = "<request>")]
fn create(session: AsanaSession, request: Form<FollowUpRequest>) -> Result<Json<FollowUp>> {
    let task_url = request.into_inner().task_url;
    let task_id = task_id_from_url(&task_url)
        .ok_or_else(|| Error::bad_request(format!("Not an Asana task link: {task_url}")))?
        .to_string();
    debug!("{} asked to follow up on task {task_id}", session.user_id);
    Ok(Json(FollowUp {
        source_task_url: task_url,
        task_id,
        requested_by: session.user_id,
    }))
}
