use actix_files::Files;
use actix_utils::future::{ready, Ready};
use actix_web::{
    dev::{self, ServiceResponse},
    error,
    http::{
        header::{CacheControl, CacheDirective, ContentType},
        StatusCode,
    },
    middleware::{Compress, ErrorHandlerResponse, ErrorHandlers, Logger},
    route,
    web::{self, Data, Path, Query, Redirect},
    App, FromRequest, HttpRequest, HttpResponse, HttpServer, Responder, Result,
};
use actix_web_lab::respond::Html;
use chrono::NaiveDate;
use dotenv::dotenv;
use eventsite::events::filter::{self, FilterOutcome, MonthFilter};
use eventsite::events::{templating, Events};
use eventsite::{AppConfig, CacheConfig, SiteConfig};
use minijinja::value::Value;
use minijinja_autoreload::AutoReloader;
use reqwest::Url;
use serde::Deserialize;
use std::path::PathBuf;

struct MiniJinjaRenderer {
    tmpl_env: Data<AutoReloader>,
}

impl MiniJinjaRenderer {
    fn render(&self, tmpl: &str, ctx: impl Into<minijinja::value::Value>) -> Result<Html> {
        self.tmpl_env
            .acquire_env()
            .map_err(|_| error::ErrorInternalServerError("could not acquire template env"))?
            .get_template(tmpl)
            .map_err(|_| error::ErrorInternalServerError("could not find template"))?
            .render(ctx.into())
            .map(Html)
            .map_err(|err| {
                log::error!("{err}");
                error::ErrorInternalServerError("template error")
            })
    }
}

impl FromRequest for MiniJinjaRenderer {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _pl: &mut dev::Payload) -> Self::Future {
        let tmpl_env = <Data<AutoReloader>>::extract(req).into_inner();

        ready(tmpl_env.map(|tmpl_env| Self { tmpl_env }))
    }
}

/// Staleness hint for downstream caches.
fn max_age(seconds: u32) -> CacheControl {
    CacheControl(vec![CacheDirective::Public, CacheDirective::MaxAge(seconds)])
}

#[route("/", method = "GET", method = "HEAD")]
async fn index(
    tmpl_env: MiniJinjaRenderer,
    events: Data<Events>,
    cache: Data<CacheConfig>,
) -> Result<impl Responder> {
    let (events, unavailable) = match events.featured().await {
        Ok(events) => (events, false),
        Err(err) => {
            // Handle this error gracefully by just displaying no events instead of sending a 500
            // response.
            log::error!("failed to fetch featured events: {err}");
            (Vec::new(), true)
        }
    };

    let ctx = minijinja::context! {
        events => templating::to_values(events),
        unavailable,
    };

    Ok(tmpl_env
        .render("index.html", ctx)?
        .customize()
        .insert_header(max_age(cache.featured_max_age)))
}

#[route("/events", method = "GET", method = "HEAD")]
async fn all_events(
    tmpl_env: MiniJinjaRenderer,
    events: Data<Events>,
    cache: Data<CacheConfig>,
) -> Result<impl Responder> {
    let (events, unavailable) = match events.all().await {
        Ok(events) => (events, false),
        Err(err) => {
            log::error!("failed to fetch events: {err}");
            (Vec::new(), true)
        }
    };

    let years: Vec<i32> = filter::YEARS.collect();
    let months: Vec<(u32, String)> = filter::MONTHS
        .filter_map(|month| {
            let name = NaiveDate::from_ymd_opt(2021, month, 1)?.format("%B");
            Some((month, name.to_string()))
        })
        .collect();

    let ctx = minijinja::context! {
        events => templating::to_values(events),
        unavailable,
        years,
        months,
    };

    Ok(tmpl_env
        .render("events.html", ctx)?
        .customize()
        .insert_header(max_age(cache.events_max_age)))
}

#[derive(Deserialize)]
struct SearchQuery {
    #[serde(default)]
    year: String,
    #[serde(default)]
    month: String,
}

/// Builds the path of the filtered events page, encoding both tokens as path segments.
fn filter_path(year: &str, month: &str) -> Option<String> {
    let mut url = Url::parse("http://localhost/events").ok()?;
    url.path_segments_mut().ok()?.push(year).push(month);
    Some(url.path().to_owned())
}

/// Target of the search form. The filtered events page validates the values.
#[route("/events/find", method = "GET", method = "HEAD")]
async fn find_events(query: Query<SearchQuery>) -> Result<Redirect> {
    let path = filter_path(&query.year, &query.month)
        .ok_or_else(|| error::ErrorInternalServerError("could not build filter path"))?;

    Ok(Redirect::to(path).see_other())
}

#[route("/events/{year}/{month}", method = "GET", method = "HEAD")]
async fn filtered_events(
    tmpl_env: MiniJinjaRenderer,
    events: Data<Events>,
    cache: Data<CacheConfig>,
    path: Path<(String, String)>,
) -> Result<impl Responder> {
    let (year, month) = path.into_inner();

    let (filter, outcome) = match MonthFilter::from_tokens(&year, &month) {
        Ok(filter) => (
            Some(filter),
            FilterOutcome::from_events(events.in_month(filter).await),
        ),
        Err(err) => {
            log::debug!("rejecting filter {year}/{month}: {err}");
            (None, FilterOutcome::InvalidInput(err))
        }
    };

    let status = match outcome {
        FilterOutcome::InvalidInput(_) => StatusCode::BAD_REQUEST,
        FilterOutcome::RetrievalFailed => StatusCode::BAD_GATEWAY,
        FilterOutcome::NoResults | FilterOutcome::Found(_) => StatusCode::OK,
    };

    let invalid = outcome.is_invalid();
    let events = match outcome {
        FilterOutcome::Found(events) => templating::to_values(events),
        _ => Vec::new(),
    };

    let ctx = minijinja::context! {
        year,
        month,
        filter => filter.map(Value::from_struct_object),
        invalid,
        events,
    };

    let mut res = tmpl_env
        .render("filtered_events.html", ctx)?
        .customize()
        .with_status(status);

    if status == StatusCode::OK {
        res = res.insert_header(max_age(cache.events_max_age));
    }

    Ok(res)
}

#[route("/events/{id}", method = "GET", method = "HEAD")]
async fn event_detail(
    tmpl_env: MiniJinjaRenderer,
    events: Data<Events>,
    cache: Data<CacheConfig>,
    id: Path<String>,
) -> Result<impl Responder> {
    let event = events
        .get(&id)
        .await
        .map_err(|err| {
            log::error!("failed to fetch event {id}: {err}");
            error::ErrorBadGateway("could not fetch event")
        })?
        .ok_or_else(|| error::ErrorNotFound("event not found"))?;

    let ctx = minijinja::context! {
        event => Value::from_struct_object(event),
    };

    Ok(tmpl_env
        .render("event.html", ctx)?
        .customize()
        .insert_header(max_age(cache.events_max_age)))
}

/// Registers all page routes. `/events/find` must come before `/events/{id}`.
fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(index)
        .service(all_events)
        .service(find_events)
        .service(filtered_events)
        .service(event_detail);
}

/// Creates the template environment. Templates are reloaded on change if `autoreload` is set.
fn template_reloader(template_dir: PathBuf, autoreload: bool, site: SiteConfig) -> AutoReloader {
    // The closure is invoked every time the environment is outdated to recreate it.
    AutoReloader::new(move |notifier| {
        let mut env: minijinja::Environment<'static> = minijinja::Environment::new();

        // if watch_path is never called, no fs watcher is created
        if autoreload {
            notifier.watch_path(&template_dir, true);
        }

        env.set_source(minijinja::Source::from_path(&template_dir));
        env.add_global("site", Value::from_serializable(&site));

        Ok(env)
    })
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = AppConfig::load()?;
    let events = Events::from_config(&config.events)?;

    if config.server.template_autoreload {
        log::info!("template auto-reloading is enabled");
    } else {
        log::info!(
            "template auto-reloading is disabled; run with EVENTSITE_SERVER__TEMPLATE_AUTORELOAD=true to enable"
        );
    }

    let tmpl_reloader = Data::new(template_reloader(
        config.server.template_dir.clone(),
        config.server.template_autoreload,
        config.site.clone(),
    ));
    let events = Data::new(events);
    let cache = Data::new(config.site.cache.clone());
    let static_dir = config.server.static_dir.clone();

    log::info!("starting HTTP server at {}", config.server.listen_addr);

    HttpServer::new(move || {
        App::new()
            .app_data(events.clone())
            .app_data(cache.clone())
            .app_data(tmpl_reloader.clone())
            .configure(routes)
            .service(Files::new("/static", &static_dir))
            .wrap(
                ErrorHandlers::new()
                    .handler(StatusCode::NOT_FOUND, not_found)
                    .handler(StatusCode::INTERNAL_SERVER_ERROR, internal_server_error),
            )
            .wrap(Compress::default())
            // Don't log things that could identify the user, e.g. omit client IP, referrer and
            // user agent.
            .wrap(Logger::new(r#""%r" %s %b %T"#))
    })
    .workers(2)
    .bind(config.server.listen_addr)?
    .run()
    .await?;

    Ok(())
}

/// Error handler for a 404 Page not found error.
fn not_found<B>(svc_res: ServiceResponse<B>) -> Result<ErrorHandlerResponse<B>> {
    error_handler(svc_res, "not_found.html")
}

/// Error handler for a 500 Internal server error.
fn internal_server_error<B>(svc_res: ServiceResponse<B>) -> Result<ErrorHandlerResponse<B>> {
    error_handler(svc_res, "error.html")
}

/// Generic error handler.
fn error_handler<B>(svc_res: ServiceResponse<B>, tmpl: &str) -> Result<ErrorHandlerResponse<B>> {
    let req = svc_res.request();

    let reason = svc_res
        .status()
        .canonical_reason()
        .unwrap_or("Unknown error");

    // Provide a fallback to a simple plain text response in case an error occurs during the
    // rendering of the error page.
    let fallback = |err: &str| {
        HttpResponse::build(svc_res.status())
            .content_type(ContentType::plaintext())
            .body(err.to_string())
    };

    let ctx = minijinja::context! {
        status_code => svc_res.status().as_str(),
        reason => reason,
    };

    let rendered = MiniJinjaRenderer::extract(req)
        .into_inner()
        .and_then(|tmpl_env| tmpl_env.render(tmpl, ctx));

    let res = match rendered {
        Ok(body) => body
            .customize()
            .with_status(svc_res.status())
            .respond_to(req)
            .map_into_boxed_body(),
        Err(_) => fallback(reason),
    };

    Ok(ErrorHandlerResponse::Response(ServiceResponse::new(
        svc_res.into_parts().0,
        res.map_into_right_body(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{http::header, test as actix_test};
    use async_trait::async_trait;
    use eventsite::events::{
        Event, EventSource, LocalFilter, RemoteFilter, StaticEventSource,
    };
    use std::io;

    fn event(id: &str, title: &str, date: &str, is_featured: bool) -> Event {
        Event {
            id: id.into(),
            title: title.into(),
            description: "Everyone can learn something".into(),
            location: "Somestreet 25, 12345 San Somewhereo".into(),
            date: date.into(),
            image: "images/event.jpg".into(),
            is_featured,
        }
    }

    fn sample_source() -> StaticEventSource {
        StaticEventSource::new([
            event("e1", "Programming for everyone", "2021-05-12", true),
            event("e2", "Networking for introverts", "2021-05-30", false),
            event("e3", "Networking for extroverts", "2022-04-10", true),
        ])
    }

    struct FailingSource;

    #[async_trait]
    impl EventSource for FailingSource {
        async fn fetch_events(&self) -> eventsite::Result<Vec<Event>> {
            Err(io::Error::new(io::ErrorKind::TimedOut, "timed out").into())
        }

        async fn fetch_event(&self, _id: &str) -> eventsite::Result<Option<Event>> {
            Err(io::Error::new(io::ErrorKind::TimedOut, "timed out").into())
        }
    }

    fn site() -> SiteConfig {
        SiteConfig {
            title: "NextEvents".into(),
            description: None,
            canonical_url: None,
            cache: CacheConfig::default(),
        }
    }

    macro_rules! init_app {
        ($events:expr) => {
            actix_test::init_service(
                App::new()
                    .app_data(Data::new($events))
                    .app_data(Data::new(CacheConfig::default()))
                    .app_data(Data::new(template_reloader(
                        "templates".into(),
                        false,
                        site(),
                    )))
                    .configure(routes)
                    .wrap(
                        ErrorHandlers::new()
                            .handler(StatusCode::NOT_FOUND, not_found)
                            .handler(StatusCode::INTERNAL_SERVER_ERROR, internal_server_error),
                    ),
            )
            .await
        };
    }

    macro_rules! get {
        ($app:expr, $uri:expr) => {{
            let req = actix_test::TestRequest::get().uri($uri).to_request();
            let res = actix_test::call_service(&$app, req).await;
            let status = res.status();
            let headers = res.headers().clone();
            let body = actix_test::read_body(res).await;
            (status, headers, String::from_utf8(body.to_vec()).unwrap())
        }};
    }

    #[test]
    fn filter_paths() {
        assert_eq!(filter_path("2021", "5").unwrap(), "/events/2021/5");
        assert_eq!(filter_path("20 21", "a/b").unwrap(), "/events/20%2021/a%2Fb");
    }

    #[actix_rt::test]
    async fn featured_events_page() {
        let app = init_app!(Events::new(sample_source(), LocalFilter));

        let (status, headers, body) = get!(app, "/");

        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("Programming for everyone"));
        assert!(body.contains("Networking for extroverts"));
        assert!(!body.contains("Networking for introverts"));
        assert_eq!(
            headers.get(header::CACHE_CONTROL).unwrap(),
            "public, max-age=1800"
        );
    }

    #[actix_rt::test]
    async fn all_events_page() {
        let app = init_app!(Events::new(sample_source(), LocalFilter));

        let (status, headers, body) = get!(app, "/events");

        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("Programming for everyone"));
        assert!(body.contains("Networking for introverts"));
        assert!(body.contains("Networking for extroverts"));
        assert!(body.contains("<option value=\"2030\">2030</option>"));
        assert!(body.contains("<option value=\"12\">December</option>"));
        assert_eq!(
            headers.get(header::CACHE_CONTROL).unwrap(),
            "public, max-age=60"
        );
    }

    #[actix_rt::test]
    async fn search_redirects_to_filtered_page() {
        let app = init_app!(Events::new(sample_source(), LocalFilter));

        let (status, headers, _) = get!(app, "/events/find?year=2021&month=5");

        assert_eq!(status, StatusCode::SEE_OTHER);
        assert_eq!(headers.get(header::LOCATION).unwrap(), "/events/2021/5");
    }

    #[actix_rt::test]
    async fn filtered_events_page() {
        for events in [
            Events::new(sample_source(), LocalFilter),
            Events::new(sample_source(), RemoteFilter),
        ] {
            let app = init_app!(events);

            let (status, _, body) = get!(app, "/events/2021/5");

            assert_eq!(status, StatusCode::OK);
            assert!(body.contains("Events in May 2021"));
            assert!(body.contains("Filtered events for 5/2021"));
            assert!(body.contains("Programming for everyone"));
            assert!(body.contains("Networking for introverts"));
            assert!(!body.contains("Networking for extroverts"));
            assert!(
                body.find("Programming for everyone") < body.find("Networking for introverts")
            );
        }
    }

    #[actix_rt::test]
    async fn filtered_events_without_results() {
        let app = init_app!(Events::new(sample_source(), LocalFilter));

        let (status, _, body) = get!(app, "/events/2022/1");

        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("No events found for the chosen filter!"));
        assert!(body.contains("Show All Events"));
    }

    #[actix_rt::test]
    async fn filtered_events_with_invalid_filter() {
        let app = init_app!(Events::new(sample_source(), LocalFilter));

        for uri in ["/events/2021/13", "/events/2031/5", "/events/abc/5"] {
            let (status, headers, body) = get!(app, uri);

            assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
            assert!(body.contains("Invalid filters. Please adjust your values!"));
            assert!(body.contains("Show All Events"));
            assert!(headers.get(header::CACHE_CONTROL).is_none());
        }
    }

    #[actix_rt::test]
    async fn filtered_events_with_failing_source() {
        let app = init_app!(Events::new(FailingSource, LocalFilter));

        let (status, _, body) = get!(app, "/events/2021/5");

        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(body.contains("Invalid filters. Please adjust your values!"));
    }

    #[actix_rt::test]
    async fn listings_with_failing_source() {
        let app = init_app!(Events::new(FailingSource, LocalFilter));

        let (status, _, body) = get!(app, "/events");

        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("Events could not be loaded."));
    }

    #[actix_rt::test]
    async fn event_detail_page() {
        let app = init_app!(Events::new(sample_source(), LocalFilter));

        let (status, _, body) = get!(app, "/events/e2");

        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("Networking for introverts"));
        assert!(body.contains("May 30, 2021"));

        let (status, _, body) = get!(app, "/events/unknown");

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body.contains("404"));
    }
}
