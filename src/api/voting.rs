use chrono::{SecondsFormat, Utc};
use log::info;
use mongodb::{Client, Database};
use rocket::{response::content::RawHtml, serde::json::Json, Route, State};
use serde::Serialize;

use crate::{
    environment::utc_from_epoch_ms,
    error::{Error, Result},
    model::{
        document::{Model, Record, RecordDescription},
        mongodb::ensure_indexes_exist,
        voting::{
            cast_vote, tally, trash_filter, Ballot, Candidate, CandidateCategory,
            CandidateElection, CandidateTally, CandidateUpdate, CategoryUpdate, Election,
            ElectionUpdate, NewCandidate, NewCategory, NewElection, Trashable, Vote,
        },
    },
};

pub fn routes() -> Vec<Route> {
    routes![
        serve_app,
        hello,
        init_db,
        list_candidates,
        create_candidate,
        get_candidate,
        update_candidate,
        trash_candidate,
        restore_candidate,
        list_categories,
        create_category,
        get_category,
        update_category,
        trash_category,
        restore_category,
        list_elections,
        create_election,
        get_election,
        update_election,
        trash_election,
        restore_election,
        join_election,
        vote,
        results,
    ]
}

type Described<M> = Json<RecordDescription<M>>;

#[get("/")]
fn serve_app() -> RawHtml<String> {
    let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    RawHtml(format!(
        "<!doctype html>\n<html>\n  <head><title>Voting</title></head>\n  \
         <body><h1>Voting</h1><p>Server time (UTC): {now}</p></body>\n</html>\n"
    ))
}

#[get("/hello")]
fn hello() -> &'static str {
    "Hello, World!"
}

#[post("/init_db")]
async fn init_db(db: &State<Database>) -> Result<&'static str> {
    ensure_indexes_exist(db).await?;
    Ok("Done!")
}

#[get("/candidates?<include_trashed>")]
async fn list_candidates(
    include_trashed: Option<bool>,
    db: &State<Database>,
) -> Result<Json<Vec<RecordDescription<Candidate>>>> {
    list(db, include_trashed.unwrap_or(false)).await
}

#[post("/candidates", data = "<new_candidate>", format = "json")]
async fn create_candidate(
    new_candidate: Json<NewCandidate>,
    client: &State<Client>,
    db: &State<Database>,
) -> Result<Described<Candidate>> {
    let NewCandidate { name, category } = new_candidate.into_inner();
    if name.trim().is_empty() {
        return Err(Error::bad_request("Candidate name must not be empty"));
    }
    if let Some(category) = &category {
        expect_live::<CandidateCategory>(db, category).await?;
    }
    let candidate = Candidate {
        num_votes: 0,
        category,
        trashed: false,
    };
    create(client, db, name, candidate).await
}

#[get("/candidates/<id>")]
async fn get_candidate(id: &str, db: &State<Database>) -> Result<Described<Candidate>> {
    Ok(Json(Record::<Candidate>::get(db, id).await?.into()))
}

#[put("/candidates/<id>", data = "<update>", format = "json")]
async fn update_candidate(
    id: &str,
    update: Json<CandidateUpdate>,
    client: &State<Client>,
    db: &State<Database>,
) -> Result<Described<Candidate>> {
    let CandidateUpdate {
        category,
        modified_at,
    } = update.into_inner();

    let mut candidate = fetch_for_update::<Candidate>(db, id, modified_at).await?;
    if let Some(category) = &category {
        expect_live::<CandidateCategory>(db, category).await?;
    }
    candidate.category = category;
    candidate.save(client, db).await?;
    Ok(Json(candidate.into()))
}

#[delete("/candidates/<id>")]
async fn trash_candidate(
    id: &str,
    client: &State<Client>,
    db: &State<Database>,
) -> Result<Described<Candidate>> {
    set_trashed(client, db, id, true).await
}

#[post("/candidates/<id>/restore")]
async fn restore_candidate(
    id: &str,
    client: &State<Client>,
    db: &State<Database>,
) -> Result<Described<Candidate>> {
    set_trashed(client, db, id, false).await
}

#[get("/categories?<include_trashed>")]
async fn list_categories(
    include_trashed: Option<bool>,
    db: &State<Database>,
) -> Result<Json<Vec<RecordDescription<CandidateCategory>>>> {
    list(db, include_trashed.unwrap_or(false)).await
}

#[post("/categories", data = "<new_category>", format = "json")]
async fn create_category(
    new_category: Json<NewCategory>,
    client: &State<Client>,
    db: &State<Database>,
) -> Result<Described<CandidateCategory>> {
    let NewCategory { name, description } = new_category.into_inner();
    if name.trim().is_empty() {
        return Err(Error::bad_request("Category name must not be empty"));
    }
    let category = CandidateCategory {
        description,
        trashed: false,
    };
    create(client, db, name, category).await
}

#[get("/categories/<id>")]
async fn get_category(id: &str, db: &State<Database>) -> Result<Described<CandidateCategory>> {
    Ok(Json(Record::<CandidateCategory>::get(db, id).await?.into()))
}

#[put("/categories/<id>", data = "<update>", format = "json")]
async fn update_category(
    id: &str,
    update: Json<CategoryUpdate>,
    client: &State<Client>,
    db: &State<Database>,
) -> Result<Described<CandidateCategory>> {
    let CategoryUpdate {
        description,
        modified_at,
    } = update.into_inner();

    let mut category = fetch_for_update::<CandidateCategory>(db, id, modified_at).await?;
    if let Some(description) = description {
        category.description = description;
    }
    category.save(client, db).await?;
    Ok(Json(category.into()))
}

#[delete("/categories/<id>")]
async fn trash_category(
    id: &str,
    client: &State<Client>,
    db: &State<Database>,
) -> Result<Described<CandidateCategory>> {
    set_trashed(client, db, id, true).await
}

#[post("/categories/<id>/restore")]
async fn restore_category(
    id: &str,
    client: &State<Client>,
    db: &State<Database>,
) -> Result<Described<CandidateCategory>> {
    set_trashed(client, db, id, false).await
}

#[get("/elections?<include_trashed>")]
async fn list_elections(
    include_trashed: Option<bool>,
    db: &State<Database>,
) -> Result<Json<Vec<RecordDescription<Election>>>> {
    list(db, include_trashed.unwrap_or(false)).await
}

#[post("/elections", data = "<new_election>", format = "json")]
async fn create_election(
    new_election: Json<NewElection>,
    client: &State<Client>,
    db: &State<Database>,
) -> Result<Described<Election>> {
    let new_election = new_election.into_inner();
    new_election.validate()?;
    let id = new_election.id.clone();
    create(client, db, id, Election::from(new_election)).await
}

#[get("/elections/<id>")]
async fn get_election(id: &str, db: &State<Database>) -> Result<Described<Election>> {
    Ok(Json(Record::<Election>::get(db, id).await?.into()))
}

#[put("/elections/<id>", data = "<update>", format = "json")]
async fn update_election(
    id: &str,
    update: Json<ElectionUpdate>,
    client: &State<Client>,
    db: &State<Database>,
) -> Result<Described<Election>> {
    let update = update.into_inner();
    let mut election = fetch_for_update::<Election>(db, id, update.modified_at).await?;
    update.apply(&mut election)?;
    election.save(client, db).await?;
    Ok(Json(election.into()))
}

#[delete("/elections/<id>")]
async fn trash_election(
    id: &str,
    client: &State<Client>,
    db: &State<Database>,
) -> Result<Described<Election>> {
    set_trashed(client, db, id, true).await
}

#[post("/elections/<id>/restore")]
async fn restore_election(
    id: &str,
    client: &State<Client>,
    db: &State<Database>,
) -> Result<Described<Election>> {
    set_trashed(client, db, id, false).await
}

/// Enter a candidate into an election. Re-entering a withdrawn candidate
/// restores their entry; entering twice is a conflict.
#[post("/elections/<id>/candidates/<candidate>")]
async fn join_election(
    id: &str,
    candidate: &str,
    client: &State<Client>,
    db: &State<Database>,
) -> Result<Described<CandidateElection>> {
    expect_live::<Election>(db, id).await?;
    expect_live::<Candidate>(db, candidate).await?;

    let key = CandidateElection::key(id, candidate);
    let mut entry = match Record::<CandidateElection>::find(db, &key).await? {
        Some(entry) if entry.is_trashed() => entry,
        Some(_) => {
            return Err(Error::conflict(format!(
                "{candidate} is already standing in {id}"
            )))
        }
        None => Record::new(key, CandidateElection::new(id, candidate)),
    };
    entry.set_trashed(false);
    entry.save(client, db).await?;
    info!("{candidate} entered election {id}");
    Ok(Json(entry.into()))
}

#[post("/elections/<id>/votes", data = "<ballot>", format = "json")]
async fn vote(
    id: &str,
    ballot: Json<Ballot>,
    client: &State<Client>,
    db: &State<Database>,
) -> Result<Described<Vote>> {
    let vote = cast_vote(client, db, id, ballot.into_inner()).await?;
    Ok(Json(vote.into()))
}

#[get("/elections/<id>/results")]
async fn results(id: &str, db: &State<Database>) -> Result<Json<Vec<CandidateTally>>> {
    Record::<Election>::get(db, id).await?;
    Ok(Json(tally(db, id).await?))
}

async fn list<M>(db: &Database, include_trashed: bool) -> Result<Json<Vec<RecordDescription<M>>>>
where
    M: Model + Default + Serialize,
{
    let mut records = Record::<M>::find_many(db, trash_filter(include_trashed)).await?;
    records.sort_by(|a, b| a.id().cmp(b.id()));
    Ok(Json(records.into_iter().map(RecordDescription::from).collect()))
}

async fn create<M>(client: &Client, db: &Database, id: String, model: M) -> Result<Described<M>>
where
    M: Model + Serialize,
{
    let mut record = Record::new(id, model);
    record.save(client, db).await?;
    info!("Created {}/{}", M::NAME, record.id());
    Ok(Json(record.into()))
}

async fn set_trashed<M>(
    client: &Client,
    db: &Database,
    id: &str,
    trashed: bool,
) -> Result<Described<M>>
where
    M: Model + Default + Serialize + Trashable,
{
    let mut record = Record::<M>::get(db, id).await?;
    if record.is_trashed() != trashed {
        record.set_trashed(trashed);
        record.save(client, db).await?;
    }
    Ok(Json(record.into()))
}

/// Fetch a record to modify. When the client says which version it last saw,
/// the record must not have changed since.
async fn fetch_for_update<M>(db: &Database, id: &str, modified_at: Option<i64>) -> Result<Record<M>>
where
    M: Model + Default,
{
    let record = Record::<M>::get(db, id).await?;
    if let Some(modified_at) = modified_at {
        record.expect_unmodified_since(utc_from_epoch_ms(modified_at)?)?;
    }
    Ok(record)
}

/// Fail unless the record exists and is not trashed.
async fn expect_live<M>(db: &Database, id: &str) -> Result<()>
where
    M: Model + Default + Trashable,
{
    let record = Record::<M>::get(db, id).await?;
    if record.is_trashed() {
        return Err(Error::bad_request(format!("{}/{id} is trashed", M::NAME)));
    }
    Ok(())
}
