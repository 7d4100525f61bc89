#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

#[cfg(feature = "desktop")]
fn main() {
    hassbeam_connect_lib::run();
}

#[cfg(not(feature = "desktop"))]
fn main() {
    eprintln!("HassBeam Connect desktop runtime disabled (built without 'desktop' feature).");
}
