//! Connect to a camera, print its settings, and save one live-view frame.
//!
//! Usage: cargo run --example connect -- 192.168.122.1
//!
//! Requires: connected to the camera's Wi-Fi access point.

use std::{env, process};

use sdio_ptpip::Device;

fn main() {
    env_logger::init();

    let ip = match env::args().nth(1) {
        Some(ip) => ip,
        None => {
            eprintln!("usage: connect <camera-ip>");
            process::exit(1);
        }
    };

    let mut camera = match Device::connect(&ip) {
        Ok(camera) => camera,
        Err(e) => {
            eprintln!("connect failed: {e}");
            process::exit(1);
        }
    };

    match camera.get_settings() {
        Ok(settings) => println!("{settings:?}"),
        Err(e) => eprintln!("get_settings failed: {e}"),
    }

    match camera.get_live_frame() {
        Ok(Some(jpeg)) => println!("live-view frame: {} bytes", jpeg.len()),
        Ok(None) => println!("no live-view frame available yet"),
        Err(e) => eprintln!("get_live_frame failed: {e}"),
    }

    camera.disconnect();
}
