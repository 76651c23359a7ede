use std::fs;
use std::path::PathBuf;

use log::info;

use secboot_sign::image::{sign_app_image, AppMetadata};
use secboot_sign::signature::load_signing_key;
use secboot_sign::FirmwareVersion;

/// Sign the application binary `image` with private key `key` and save the signed image as `signed`
fn main() {
    let key = PathBuf::from("/home/foo/private_key.pem");
    let image = PathBuf::from("/home/foo/app.bin");
    let signed = PathBuf::from("/home/foo/app_signed.bin");

    let priv_key = load_signing_key(&fs::read_to_string(&key).unwrap()).unwrap();

    let metadata = AppMetadata {
        version: FirmwareVersion::new(1, 2, 0, 0),
        ..Default::default()
    };

    info!("Signing image `{}`...", image.display());

    let output = sign_app_image(fs::read(&image).unwrap(), &metadata, &priv_key).unwrap();

    fs::write(&signed, output).unwrap();

    info!("Image signed and saved to `{}`", signed.display());
}
