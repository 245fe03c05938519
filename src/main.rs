#[macro_use]
extern crate rocket;

#[launch]
fn rocket() -> _ {
    let rocket = crm_sync::rocket();
    log::info!("starting CRM sync API server");
    rocket
}
