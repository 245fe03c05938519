use log::Level;
use rocket::fairing::{Fairing, Info, Kind};
use rocket::{Data, Request, Response};
use std::time::Instant;

/// Logs one line per HTTP request with its duration; server errors at
/// `warn`.
pub struct RequestLogger;

struct RequestStart(Instant);

#[rocket::async_trait]
impl Fairing for RequestLogger {
    fn info(&self) -> Info {
        Info {
            name: "Request Logger",
            kind: Kind::Request | Kind::Response,
        }
    }

    async fn on_request(&self, request: &mut Request<'_>, _: &mut Data<'_>) {
        request.local_cache(|| RequestStart(Instant::now()));
    }

    async fn on_response<'r>(&self, request: &'r Request<'_>, response: &mut Response<'r>) {
        let RequestStart(started) = request.local_cache(|| RequestStart(Instant::now()));
        let status = response.status();
        let level = if status.code >= 500 {
            Level::Warn
        } else {
            Level::Info
        };

        log::log!(
            level,
            "{} {} -> {} ({:.2}ms)",
            request.method(),
            request.uri(),
            status.code,
            started.elapsed().as_secs_f64() * 1000.0
        );
    }
}
