use rocket::fairing::{Fairing, Info, Kind};
use rocket::http::Header;
use rocket::{Data, Request, Response};
use std::time::Instant;

/// Version of the response schemas served under `/api`.
pub const SCHEMA_VERSION: &str = "1";
pub const SCHEMA_HEADER: &str = "X-LifeOS-Schema";

/// Fairing to log one line per HTTP request with timing
pub struct RequestLogger;

#[rocket::async_trait]
impl Fairing for RequestLogger {
    fn info(&self) -> Info {
        Info {
            name: "Request Logger",
            kind: Kind::Request | Kind::Response,
        }
    }

    async fn on_request(&self, request: &mut Request<'_>, _: &mut Data<'_>) {
        request.local_cache(Instant::now);
    }

    async fn on_response<'r>(&self, request: &'r Request<'_>, response: &mut Response<'r>) {
        let start_time = request.local_cache(Instant::now);
        let duration = start_time.elapsed();

        // Query strings are never logged.
        log::info!(
            "{} {} -> {} ({:.2}ms)",
            request.method(),
            request.uri().path(),
            response.status().code,
            duration.as_secs_f64() * 1000.0
        );
    }
}

/// Stamps every response with the schema version header.
pub struct SchemaVersion;

#[rocket::async_trait]
impl Fairing for SchemaVersion {
    fn info(&self) -> Info {
        Info {
            name: "Schema Version Header",
            kind: Kind::Response,
        }
    }

    async fn on_response<'r>(&self, _request: &'r Request<'_>, response: &mut Response<'r>) {
        response.set_header(Header::new(SCHEMA_HEADER, SCHEMA_VERSION));
    }
}
