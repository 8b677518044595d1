#[macro_use]
extern crate rocket;

#[launch]
fn rocket() -> _ {
    let rocket = kernelci_reports::rocket();
    log::info!("starting kernelci reports service");
    rocket
}
