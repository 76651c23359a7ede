use std::fs;
use std::path::PathBuf;

use log::info;

use secboot_sign::image::{secure_bootloader, BootloaderLayout};
use secboot_sign::secrets::{fetch_key_material, FileSecrets, SERVICE};
use secboot_sign::EcPublicKey;

/// Embed the security block into the bootloader binary `image` and save the result as `secured`.
/// The key material is taken from the TOML secret store `secrets`
fn main() {
    let key = PathBuf::from("/home/foo/private_key.pem");
    let secrets = PathBuf::from("/home/foo/secrets.toml");
    let image = PathBuf::from("/home/foo/bootloader.bin");
    let secured = PathBuf::from("/home/foo/bootloader_secured.bin");

    let public_key = EcPublicKey::from_private_pem(&fs::read_to_string(&key).unwrap()).unwrap();

    let keys = fetch_key_material(&FileSecrets::new(secrets, SERVICE), None).unwrap();

    let layout = BootloaderLayout::default();

    info!("Securing bootloader `{}`...", image.display());

    let output = secure_bootloader(fs::read(&image).unwrap(), &layout, &keys, &public_key).unwrap();

    fs::write(&secured, output).unwrap();

    info!("Bootloader secured and saved to `{}`", secured.display());
}
