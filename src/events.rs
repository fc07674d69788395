pub mod filter;
pub mod firebase;
pub mod templating;

use super::Result;
use crate::EventsConfig;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate};
use filter::MonthFilter;
use firebase::FirebaseClient;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Represents a single event.
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Opaque identifier of the event. In the remote store this is the record key.
    #[serde(default)]
    pub id: String,
    /// The event title.
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub location: String,
    /// The event date as stored, usually `YYYY-MM-DD`.
    #[serde(default)]
    pub date: String,
    /// Image path relative to the static directory, or an absolute URL.
    #[serde(default)]
    pub image: String,
    /// Whether the event is shown on the home page.
    #[serde(default, alias = "is_featured")]
    pub is_featured: bool,
}

impl Event {
    /// Returns the calendar date of the event.
    ///
    /// Accepts plain `YYYY-MM-DD` dates and RFC 3339 timestamps, the latter in their own offset.
    /// Returns `None` if the date cannot be parsed.
    pub fn calendar_date(&self) -> Option<NaiveDate> {
        let date = self.date.trim();

        NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .ok()
            .or_else(|| DateTime::parse_from_rfc3339(date).ok().map(|dt| dt.date_naive()))
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.title.fmt(f)
    }
}

/// Represents sources of events.
#[derive(Deserialize, Serialize, Debug, Clone, Copy)]
#[serde(rename_all = "kebab-case")]
pub enum EventSourceKind {
    /// Use static events from the application configuration.
    Static,
    /// Load events from a Firebase Realtime Database.
    Firebase,
}

/// Represents where year/month filtering takes place.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, Default)]
#[serde(rename_all = "kebab-case")]
pub enum FilterStrategyKind {
    /// Fetch all events and filter them in this process.
    #[default]
    Local,
    /// Let the event source filter, e.g. by a query against the remote store.
    Remote,
}

/// Trait that needs to be implemented by a source of events.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Fetches all events from the source.
    async fn fetch_events(&self) -> Result<Vec<Event>>;

    /// Fetches a single event by its id.
    async fn fetch_event(&self, id: &str) -> Result<Option<Event>>;

    /// Fetches the events of a single month.
    ///
    /// Sources that cannot filter on their own fetch everything and select locally.
    async fn fetch_events_in_month(&self, filter: MonthFilter) -> Result<Vec<Event>> {
        let events = self.fetch_events().await?;
        Ok(filter::select(&events, filter))
    }
}

/// An `EventSource` that returns events from a static list.
pub struct StaticEventSource {
    events: Vec<Event>,
}

impl StaticEventSource {
    /// Creates a new `StaticEventSource` from an iterator.
    pub fn new<I>(iter: I) -> StaticEventSource
    where
        I: IntoIterator,
        I::Item: Into<Event>,
    {
        StaticEventSource {
            events: iter.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl EventSource for StaticEventSource {
    async fn fetch_events(&self) -> Result<Vec<Event>> {
        Ok(self.events.clone())
    }

    async fn fetch_event(&self, id: &str) -> Result<Option<Event>> {
        Ok(self.events.iter().find(|event| event.id == id).cloned())
    }
}

/// An `EventSource` backed by a Firebase Realtime Database collection.
#[derive(Debug)]
pub struct FirebaseEventSource {
    client: FirebaseClient,
}

impl FirebaseEventSource {
    pub fn new(config: &crate::FirebaseConfig) -> Result<FirebaseEventSource> {
        Ok(FirebaseEventSource {
            client: FirebaseClient::new(config)?,
        })
    }
}

#[async_trait]
impl EventSource for FirebaseEventSource {
    async fn fetch_events(&self) -> Result<Vec<Event>> {
        Ok(self.client.get_events(None).await?)
    }

    async fn fetch_event(&self, id: &str) -> Result<Option<Event>> {
        Ok(self.client.get_event(id).await?)
    }

    async fn fetch_events_in_month(&self, filter: MonthFilter) -> Result<Vec<Event>> {
        Ok(self.client.get_events(Some(filter)).await?)
    }
}

#[async_trait]
impl<T> EventSource for Box<T>
where
    T: EventSource + ?Sized,
{
    async fn fetch_events(&self) -> Result<Vec<Event>> {
        (**self).fetch_events().await
    }

    async fn fetch_event(&self, id: &str) -> Result<Option<Event>> {
        (**self).fetch_event(id).await
    }

    async fn fetch_events_in_month(&self, filter: MonthFilter) -> Result<Vec<Event>> {
        (**self).fetch_events_in_month(filter).await
    }
}

#[async_trait]
impl<T> EventSource for Arc<T>
where
    T: EventSource + ?Sized,
{
    async fn fetch_events(&self) -> Result<Vec<Event>> {
        (**self).fetch_events().await
    }

    async fn fetch_event(&self, id: &str) -> Result<Option<Event>> {
        (**self).fetch_event(id).await
    }

    async fn fetch_events_in_month(&self, filter: MonthFilter) -> Result<Vec<Event>> {
        (**self).fetch_events_in_month(filter).await
    }
}

/// Decides how the events of a month are obtained from an `EventSource`.
#[async_trait]
pub trait FilterStrategy: Send + Sync {
    /// Returns the events of the month described by `filter`, in source order.
    async fn events_in_month(
        &self,
        source: &dyn EventSource,
        filter: MonthFilter,
    ) -> Result<Vec<Event>>;
}

/// Fetches the whole collection and selects matching events in this process.
pub struct LocalFilter;

#[async_trait]
impl FilterStrategy for LocalFilter {
    async fn events_in_month(
        &self,
        source: &dyn EventSource,
        filter: MonthFilter,
    ) -> Result<Vec<Event>> {
        let events = source.fetch_events().await?;
        Ok(filter::select(&events, filter))
    }
}

/// Passes the filter on to the source. Events the source lets through without a matching
/// calendar date are dropped.
pub struct RemoteFilter;

#[async_trait]
impl FilterStrategy for RemoteFilter {
    async fn events_in_month(
        &self,
        source: &dyn EventSource,
        filter: MonthFilter,
    ) -> Result<Vec<Event>> {
        let events = source.fetch_events_in_month(filter).await?;
        Ok(events
            .into_iter()
            .filter(|event| filter.matches(event))
            .collect())
    }
}

/// The `Events` type wraps an event source and a filter strategy.
#[derive(Clone)]
pub struct Events {
    source: Arc<dyn EventSource>,
    strategy: Arc<dyn FilterStrategy>,
}

impl Events {
    /// Creates new `Events` from an event source and a filter strategy.
    pub fn new<S, F>(source: S, strategy: F) -> Events
    where
        S: EventSource + 'static,
        F: FilterStrategy + 'static,
    {
        Events {
            source: Arc::new(source),
            strategy: Arc::new(strategy),
        }
    }

    /// Creates new `Events` from configuration.
    pub fn from_config(config: &EventsConfig) -> Result<Events> {
        let source: Box<dyn EventSource> = match config.source {
            EventSourceKind::Static => Box::new(StaticEventSource::new(config.events.clone())),
            EventSourceKind::Firebase => {
                let firebase = config.firebase.as_ref().ok_or_else(|| {
                    config::ConfigError::NotFound("events.firebase".into())
                })?;
                Box::new(FirebaseEventSource::new(firebase)?)
            }
        };

        log::info!(
            "using {:?} event source with {:?} filtering",
            config.source,
            config.filter
        );

        let events = match config.filter {
            FilterStrategyKind::Local => Events::new(source, LocalFilter),
            FilterStrategyKind::Remote => Events::new(source, RemoteFilter),
        };

        Ok(events)
    }

    /// Returns all events.
    pub async fn all(&self) -> Result<Vec<Event>> {
        self.source.fetch_events().await
    }

    /// Returns the events flagged as featured.
    pub async fn featured(&self) -> Result<Vec<Event>> {
        let events = self.source.fetch_events().await?;
        Ok(events.into_iter().filter(|event| event.is_featured).collect())
    }

    /// Returns a single event.
    pub async fn get(&self, id: &str) -> Result<Option<Event>> {
        self.source.fetch_event(id).await
    }

    /// Returns the events of a single month.
    pub async fn in_month(&self, filter: MonthFilter) -> Result<Vec<Event>> {
        self.strategy
            .events_in_month(self.source.as_ref(), filter)
            .await
    }
}
