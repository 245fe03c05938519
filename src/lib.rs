#[macro_use]
extern crate rocket;

pub mod codec;
pub mod contacts;
pub mod crm;
pub mod error;
pub mod jobs;
pub mod request_logger;
pub mod routes;

use crate::crm::{BatchClient, CodecConfig, CrmConfig};
use crate::jobs::JobRegistry;
use crate::request_logger::RequestLogger;
use env_logger::Env;
use rocket::fairing::AdHoc;
use rocket::http::Method;
use rocket::{Build, Rocket, Route};
use rocket_cors::{AllowedOrigins, CorsOptions};
use rocket_okapi::{
    openapi_get_routes,
    rapidoc::{GeneralConfig, HideShowConfig, RapiDocConfig, make_rapidoc},
    settings::UrlObject,
    swagger_ui::{SwaggerUIConfig, make_swagger_ui},
};
use std::sync::Once;

static LOGGER: Once = Once::new();

fn init_logger() {
    LOGGER.call_once(|| {
        env_logger::Builder::from_env(
            Env::default().default_filter_or("info,rocket::server=warn,rocket::request=warn"),
        )
        .init();
    });
}

/// Every API route, plus the generated `openapi.json`.
pub fn api_routes() -> Vec<Route> {
    openapi_get_routes![
        // Health routes
        routes::health::health_check,
        // Contact routes
        routes::contacts::import_contacts,
        routes::contacts::export_contacts,
        routes::contacts::delete_all_contacts,
        // Job routes
        routes::jobs::get_job,
        routes::jobs::cancel_job,
    ]
}

pub fn rocket() -> Rocket<Build> {
    init_logger();

    let cors = CorsOptions::default()
        .allowed_origins(AllowedOrigins::all())
        .allowed_methods(
            vec![Method::Get, Method::Post]
                .into_iter()
                .map(From::from)
                .collect(),
        )
        .allow_credentials(true)
        .to_cors();

    let mut rocket = rocket::build().attach(RequestLogger);
    match cors {
        Ok(cors) => rocket = rocket.attach(cors),
        Err(err) => log::error!("invalid CORS configuration, CORS disabled: {}", err),
    }

    rocket
        .manage(JobRegistry::new())
        .manage(CodecConfig::from_env())
        .attach(AdHoc::try_on_ignite(
            "CRM Client",
            |rocket| async move {
                let config = CrmConfig::from_env();
                log::info!(
                    "crm client: batch size {}, {} chunk(s) in flight, timeout {:?}",
                    config.batch_size,
                    config.max_concurrent_chunks,
                    config.request_timeout
                );
                match BatchClient::from_config(config) {
                    Ok(client) => Ok(rocket.manage(client)),
                    Err(err) => {
                        log::error!("failed to initialize crm client: {}", err);
                        Err(rocket)
                    }
                }
            },
        ))
        .mount("/api/v1", api_routes())
        .mount(
            "/api/docs/swagger/",
            make_swagger_ui(&SwaggerUIConfig {
                url: "../../v1/openapi.json".to_owned(),
                ..Default::default()
            }),
        )
        .mount(
            "/api/docs/rapidoc/",
            make_rapidoc(&RapiDocConfig {
                general: GeneralConfig {
                    spec_urls: vec![UrlObject::new("CRM Sync API", "../../v1/openapi.json")],
                    ..Default::default()
                },
                hide_show: HideShowConfig {
                    allow_spec_url_load: false,
                    allow_spec_file_load: false,
                    ..Default::default()
                },
                ..Default::default()
            }),
        )
}

#[cfg_attr(not(test), allow(dead_code))]
pub mod test_support;
