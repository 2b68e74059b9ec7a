#[macro_use]
extern crate rocket;

#[launch]
fn rocket() -> _ {
    log::info!("starting LifeOS API server");
    lifeos_server::rocket()
}
