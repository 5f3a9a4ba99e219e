use rocket::{http::Header, Route};

use crate::{environment::Environment, error::Error, model::credentials::BasicAuth};

pub fn routes() -> Vec<Route> {
    routes![index, ping]
}

/// Response to the basic-auth protected index.
#[derive(Responder)]
enum Greeting {
    Hello(String),
    /// Ask the browser to prompt for credentials.
    #[response(status = 401)]
    Challenge(String, Header<'static>),
    Failed(Error),
}

#[get("/")]
fn index(auth: Result<BasicAuth, Error>) -> Greeting {
    match auth {
        Ok(BasicAuth { username }) => Greeting::Hello(format!("Hello, {username}!")),
        Err(e) if e.status().code == 401 => Greeting::Challenge(
            e.to_string(),
            Header::new("WWW-Authenticate", r#"Basic realm="workabout", charset="UTF-8""#),
        ),
        Err(e) => Greeting::Failed(e),
    }
}

#[get("/ping")]
fn ping(environment: Environment) -> String {
    environment.to_string()
}

#[cfg(test)]
mod tests {
    use rocket::{
        http::{Header, Status},
        local::asynchronous::Client,
    };

    use crate::model::credentials::{example_authorization, EXAMPLE_USERNAME};

    use super::*;

    #[backend_test(basic_auth)]
    async fn greets_authenticated_user(client: Client) {
        let response = client
            .get(uri!(index))
            .header(Header::new("Authorization", example_authorization()))
            .dispatch()
            .await;

        assert_eq!(Status::Ok, response.status());
        assert_eq!(
            response.into_string().await.unwrap(),
            format!("Hello, {EXAMPLE_USERNAME}!")
        );
    }

    #[backend_test(basic_auth)]
    async fn challenges_missing_or_wrong_credentials(client: Client) {
        let response = client.get(uri!(index)).dispatch().await;
        assert_eq!(Status::Unauthorized, response.status());
        assert!(response.headers().get_one("WWW-Authenticate").is_some());

        let response = client
            .get(uri!(index))
            .header(Header::new("Authorization", "Basic dGVzdGVyOndyb25n"))
            .dispatch()
            .await;
        assert_eq!(Status::Unauthorized, response.status());
    }

    #[backend_test]
    async fn ping_reports_environment(client: Client) {
        let response = client
            .get(uri!(ping))
            .header(Header::new("Host", "localhost:8080"))
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        assert_eq!(response.into_string().await.unwrap(), "Development");

        let response = client
            .get(uri!(ping))
            .header(Header::new("Host", "work-about-work.appspot.com"))
            .dispatch()
            .await;
        assert_eq!(response.into_string().await.unwrap(), "Production");
    }
}
