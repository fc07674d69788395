pub mod models;

use super::filter::MonthFilter;
use super::Event;
use crate::FirebaseConfig;
use indexmap::IndexMap;
use reqwest::{Request, Response, Url};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware, Middleware, Next};
use std::time::Duration;
use task_local_extensions::Extensions;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Error while making a http request.
    #[error("failure requesting remote resource: {0}")]
    Request(#[from] reqwest::Error),

    /// Error while executing some middleware code.
    #[error("request middleware failed with: {0}")]
    RequestMiddleware(#[from] reqwest_middleware::Error),

    /// Error when the configured database URL cannot be used as a base URL.
    #[error("invalid database URL: {0}")]
    InvalidUrl(String),
}

/// Appends the `auth` query parameter the REST interface expects for authenticated access.
struct AuthMiddleware {
    token: String,
}

impl AuthMiddleware {
    fn new(token: String) -> AuthMiddleware {
        AuthMiddleware { token }
    }
}

#[async_trait::async_trait]
impl Middleware for AuthMiddleware {
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut Extensions,
        next: Next<'_>,
    ) -> reqwest_middleware::Result<Response> {
        req.url_mut()
            .query_pairs_mut()
            .append_pair("auth", &self.token);
        next.run(req, extensions).await
    }
}

impl From<(String, models::EventRecord)> for Event {
    fn from((id, record): (String, models::EventRecord)) -> Self {
        Self {
            id,
            title: record.title,
            description: record.description,
            location: record.location,
            date: record.date,
            image: record.image,
            is_featured: record.is_featured,
        }
    }
}

/// Client for reading event records from a Firebase Realtime Database via its REST interface.
#[derive(Debug)]
pub struct FirebaseClient {
    client: ClientWithMiddleware,
    database_url: Url,
    collection: Vec<String>,
}

impl FirebaseClient {
    /// Creates a new client for the collection configured in `config`. If an auth token is
    /// configured, it is attached to every request.
    pub fn new(config: &FirebaseConfig) -> Result<FirebaseClient, ClientError> {
        let database_url = Url::parse(&config.database_url)
            .map_err(|err| ClientError::InvalidUrl(format!("{}: {err}", config.database_url)))?;

        if database_url.cannot_be_a_base() {
            return Err(ClientError::InvalidUrl(config.database_url.clone()));
        }

        let collection = config
            .collection
            .split('/')
            .filter(|segment| !segment.is_empty())
            .map(ToOwned::to_owned)
            .collect();

        let mut builder = ClientBuilder::new(
            reqwest::Client::builder()
                .timeout(Duration::from_secs(config.timeout_secs))
                .build()?,
        );

        if let Some(token) = &config.auth_token {
            builder = builder.with(AuthMiddleware::new(token.clone()));
        }

        Ok(FirebaseClient {
            client: builder.build(),
            database_url,
            collection,
        })
    }

    /// Fetches the events of the collection in response order. If a filter is given, the
    /// database only returns events whose date starts with the filtered `YYYY-MM`. This requires
    /// an `.indexOn` rule for `date` on the collection.
    pub async fn get_events(&self, filter: Option<MonthFilter>) -> Result<Vec<Event>, ClientError> {
        let url = json_url(&self.database_url, &self.collection, None)?;
        let query = build_query_parameters(&filter);

        let records = self
            .client
            .get(url)
            .query(&query)
            .send()
            .await?
            .error_for_status()?
            .json::<Option<models::Records>>()
            .await?;

        let events: Vec<Event> = records
            .map(models::Records::into_keyed)
            .unwrap_or_default()
            .into_iter()
            .map(Into::into)
            // The range query compares strings, so values like `2021-05-TBD` get through.
            .filter(|event| filter.map_or(true, |filter| filter.matches(event)))
            .collect();

        log::debug!("fetched {} events from Firebase", events.len());

        Ok(events)
    }

    /// Fetches a single event by id. Returns `None` if no record exists under that id.
    pub async fn get_event(&self, id: &str) -> Result<Option<Event>, ClientError> {
        // Keys can't be empty or contain any of `.#$[]`, the database answers 400 for those.
        if id.is_empty() || id.contains(['.', '#', '$', '[', ']']) {
            return Ok(None);
        }

        let url = json_url(&self.database_url, &self.collection, Some(id))?;

        let record = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json::<Option<models::EventRecord>>()
            .await?;

        Ok(record.map(|record| (id.to_owned(), record).into()))
    }
}

/// Builds the URL of the JSON resource for a collection or, given an id, for one of its records.
fn json_url(base: &Url, collection: &[String], id: Option<&str>) -> Result<Url, ClientError> {
    let mut segments: Vec<&str> = collection.iter().map(String::as_str).collect();
    segments.extend(id);

    let (last, parents) = segments
        .split_last()
        .ok_or_else(|| ClientError::InvalidUrl(format!("{base}: empty collection path")))?;

    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| ClientError::InvalidUrl(base.to_string()))?
        .pop_if_empty()
        .extend(parents)
        .push(&format!("{last}.json"));

    Ok(url)
}

fn build_query_parameters(filter: &Option<MonthFilter>) -> IndexMap<&'static str, String> {
    // Query values are JSON encoded, see:
    // https://firebase.google.com/docs/database/rest/retrieve-data#section-rest-filtering
    let mut query_parameters = IndexMap::new();

    if let Some(filter) = filter {
        // order by the date child, then limit to dates starting with `YYYY-MM`
        query_parameters.insert("orderBy", "\"date\"".to_owned());
        query_parameters.insert("startAt", format!("\"{filter}\""));
        query_parameters.insert("endAt", format!("\"{filter}\u{f8ff}\""));
    }

    query_parameters
}
