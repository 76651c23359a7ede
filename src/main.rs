//! A command-line interface to the `secboot_sign` crate.

use std::io::Write as _;
use std::path::{self, Path, PathBuf};

use anyhow::{bail, Context};

use clap::{ColorChoice, Parser, Subcommand, ValueEnum};

use log::{debug, info, LevelFilter};

use secboot_sign::config::Profile;
use secboot_sign::image::{AppMetadata, BootloaderLayout};
use secboot_sign::p256::ecdsa::SigningKey;
use secboot_sign::secrets::{CommandProvisioner, EnvSecrets, FileSecrets, SecretProvider};
use secboot_sign::signature::load_signing_key;
use secboot_sign::{EcPublicKey, FirmwareVersion, ImageHeader};

/// Sign STM32 application images and secure the bootloader image for the STM32 secure bootloader
#[derive(Parser, Debug)]
#[command(version, about, long_about = None, arg_required_else_help = true, color = ColorChoice::Auto)]
struct Cli {
    /// Verbosity
    #[arg(short = 'l', long, default_value = "regular")]
    verbosity: Verbosity,

    /// Image profile (TOML) overriding the built-in defaults
    #[arg(short = 'c', long)]
    profile: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

/// Command
#[derive(Subcommand, Debug)]
enum Command {
    /// Sign an application image and prepend the 256-byte header
    SignApp {
        /// Signing key (P-256 private key, PEM) input file
        #[arg(short, long)]
        key: PathBuf,

        /// Header magic number
        #[arg(long, value_parser = parse_u32)]
        magic: Option<u32>,

        /// Firmware version (major.minor.patch.build)
        #[arg(short = 'v', long = "fw-version")]
        fw_version: Option<FirmwareVersion>,

        /// Application entry point address
        #[arg(short, long, value_parser = parse_u32)]
        entry_point: Option<u32>,

        /// The input file of the application binary to sign
        image: PathBuf,

        /// Signed image output file
        signed: PathBuf,
    },
    /// Embed the security block (encrypted key, IV, public key, CRC) into the bootloader image
    SecureBootloader {
        /// Signing key (P-256 private key, PEM) input file; its public key is embedded
        #[arg(short, long)]
        key: PathBuf,

        /// TOML secret store (optional, if not specified secrets are taken from the environment)
        #[arg(short, long)]
        secrets: Option<PathBuf>,

        /// Secret service namespace
        #[arg(long)]
        service: Option<String>,


        /// Security block offset
        #[arg(short, long, value_parser = parse_usize)]
        offset: Option<usize>,

        /// Exact size of the bootloader image
        #[arg(short, long, value_parser = parse_usize)]
        final_size: Option<usize>,

        /// The input file of the bootloader binary
        image: PathBuf,

        /// Secured image output file
        secured: PathBuf,

        /// Command run once when secrets are missing, after `--` (e.g. `-- python3 ./store_keys.py`)
        #[arg(last = true)]
        provision: Vec<String>,
    },
    /// Print the public key (Qx, Qy) of the supplied signing key
    PublicKey {
        /// Signing key (P-256 private key, PEM) input file
        #[arg(short, long)]
        key: PathBuf,
    },
    /// Check and print the header of a signed application image
    Inspect {
        /// The signed image to inspect
        image: PathBuf,
    },
}

/// Verbosity
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum Verbosity {
    Silent,
    #[default]
    Regular,
    Verbose,
}

impl Verbosity {
    fn log_level(&self) -> LevelFilter {
        match self {
            Self::Silent => LevelFilter::Off,
            Self::Regular => LevelFilter::Info,
            Self::Verbose => LevelFilter::Debug,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    env_logger::builder()
        .format(|buf, record| writeln!(buf, "{}", record.args()))
        .filter_level(args.verbosity.log_level())
        .init();

    if let Some(command) = args.command {
        let result = load_profile(args.profile.as_deref()).and_then(|profile| match command {
            Command::SignApp {
                key,
                magic,
                fw_version,
                entry_point,
                image,
                signed,
            } => {
                let mut metadata = profile.app_metadata()?;

                metadata.magic = magic.unwrap_or(metadata.magic);
                metadata.version = fw_version.unwrap_or(metadata.version);
                metadata.entry_point = entry_point.unwrap_or(metadata.entry_point);

                sign_app(key, metadata, image, signed)
            }
            Command::SecureBootloader {
                key,
                secrets: store,
                service,
                provision,
                offset,
                final_size,
                image,
                secured,
            } => {
                let mut layout = profile.bootloader_layout();

                layout.block_offset = offset.unwrap_or(layout.block_offset);
                layout.final_size = final_size.unwrap_or(layout.final_size);

                let store = store.or(profile.secrets.store.clone());
                let service = service.unwrap_or_else(|| profile.service());
                let provision = if provision.is_empty() {
                    profile.secrets.provision.clone().unwrap_or_default()
                } else {
                    provision
                };

                secure_bootloader(key, store, &service, &provision, layout, image, secured)
            }
            Command::PublicKey { key } => public_key(key),
            Command::Inspect { image } => inspect(profile.app_metadata()?, image),
        });

        if let Err(err) = result {
            log::error!("{:#}", err);
            std::process::exit(1);
        }
    }

    Ok(())
}

fn load_profile(path: Option<&Path>) -> anyhow::Result<Profile> {
    let Some(path) = path else {
        return Ok(Profile::default());
    };

    let path = path::absolute(path)
        .with_context(|| format!("Parsing profile path `{}` failed", path.display()))?;

    debug!("Loading profile from `{}`...", path.display());

    Profile::load(&path).context("Loading profile failed")
}

fn load_key(path: &Path) -> anyhow::Result<SigningKey> {
    let path = path::absolute(path)
        .with_context(|| format!("Parsing key path `{}` failed", path.display()))?;

    debug!("Loading signing key from `{}`...", path.display());

    let key = load_signing_key(&std::fs::read_to_string(&path).context("Loading key failed")?)
        .context("Parsing PEM signing key failed")?;

    debug!("Signing key loaded");

    Ok(key)
}

fn read_image(path: &Path) -> anyhow::Result<(PathBuf, Vec<u8>)> {
    let path = path::absolute(path)
        .with_context(|| format!("Parsing image path `{}` failed", path.display()))?;

    let data = std::fs::read(&path)
        .with_context(|| format!("Loading image `{}` failed", path.display()))?;

    Ok((path, data))
}

fn write_image(path: &Path, data: &[u8]) -> anyhow::Result<PathBuf> {
    let path = path::absolute(path)
        .with_context(|| format!("Parsing output path `{}` failed", path.display()))?;

    std::fs::write(&path, data)
        .with_context(|| format!("Saving image `{}` failed", path.display()))?;

    Ok(path)
}

fn sign_app(
    key: PathBuf,
    metadata: AppMetadata,
    image: PathBuf,
    signed: PathBuf,
) -> anyhow::Result<()> {
    let priv_key = load_key(&key)?;

    let (image, payload) = read_image(&image)?;

    info!("Signing image `{}`...", image.display());

    let output = secboot_sign::image::sign_app_image(payload, &metadata, &priv_key)
        .context("Signing application image failed")?;

    let signed = write_image(&signed, &output)?;

    info!("Image signed and saved to `{}`", signed.display());

    Ok(())
}

fn secure_bootloader(
    key: PathBuf,
    store: Option<PathBuf>,
    service: &str,
    provision: &[String],
    layout: BootloaderLayout,
    image: PathBuf,
    secured: PathBuf,
) -> anyhow::Result<()> {
    let public_key = EcPublicKey::extract(&load_key(&key)?).context("Extracting public key failed")?;

    let provider: Box<dyn SecretProvider> = match store {
        Some(store) => {
            let store = FileSecrets::new(
                path::absolute(&store).with_context(|| {
                    format!("Parsing secret store path `{}` failed", store.display())
                })?,
                service,
            );

            debug!("Using secret store `{}`", store.path().display());

            Box::new(store)
        }
        None => {
            debug!("Using secrets from the environment");

            Box::new(EnvSecrets::new(service))
        }
    };

    let keys = match CommandProvisioner::new(provision) {
        Some(provisioner) => secboot_sign::secrets::fetch_key_material(
            &*provider,
            Some(&mut || provisioner.run()),
        ),
        None => secboot_sign::secrets::fetch_key_material(&*provider, None),
    }
    .context("Retrieving key material failed")?;

    let (image, firmware) = read_image(&image)?;

    info!("Securing bootloader `{}`...", image.display());

    let output = secboot_sign::image::secure_bootloader(firmware, &layout, &keys, &public_key)
        .context("Securing bootloader image failed")?;

    let secured = write_image(&secured, &output)?;

    info!(
        "Bootloader secured and saved to `{}` ({}B, security block at 0x{:X})",
        secured.display(),
        output.len(),
        layout.block_offset
    );

    Ok(())
}

fn public_key(key: PathBuf) -> anyhow::Result<()> {
    let public_key =
        EcPublicKey::extract(&load_key(&key)?).context("Extracting public key failed")?;

    info!("Qx: {}", hex::encode_upper(public_key.qx));
    info!("Qy: {}", hex::encode_upper(public_key.qy));

    Ok(())
}

fn inspect(metadata: AppMetadata, image: PathBuf) -> anyhow::Result<()> {
    let (image, data) = read_image(&image)?;

    info!("Inspecting image `{}`...", image.display());

    let header = ImageHeader::parse(&data).context("Parsing header failed")?;
    header
        .check_magic(metadata.magic)
        .context("Checking header failed")?;

    let payload = &data[ImageHeader::SIZE..];

    info!("Magic:       0x{:08X}", header.magic);
    info!("Image size:  {}B", header.image_size);
    info!("Version:     {}", header.version);
    info!("Entry point: 0x{:08X}", header.entry_point);
    info!("SHA-256:     {}", hex::encode_upper(header.digest));
    info!("Signature R: {}", hex::encode_upper(header.signature.r()));
    info!("Signature S: {}", hex::encode_upper(header.signature.s()));

    if header.image_size as usize != payload.len() {
        bail!(
            "Header declares {}B, but the payload is {}B",
            header.image_size,
            payload.len()
        );
    }

    if secboot_sign::digest(payload) != header.digest {
        bail!("Payload SHA-256 does not match the header");
    }

    info!("Header and payload are consistent");

    Ok(())
}

fn parse_u32(s: &str) -> Result<u32, String> {
    parse_int(s).and_then(|v| u32::try_from(v).map_err(|e| e.to_string()))
}

fn parse_usize(s: &str) -> Result<usize, String> {
    parse_int(s).and_then(|v| usize::try_from(v).map_err(|e| e.to_string()))
}

/// Parse a decimal or `0x`-prefixed hexadecimal integer
fn parse_int(s: &str) -> Result<u64, String> {
    let s = s.trim().replace('_', "");

    let result = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    };

    result.map_err(|e| format!("Invalid number `{s}`: {e}"))
}

#[cfg(test)]
mod test {
    use clap::Parser;

    use super::{Cli, Command};

    #[test]
    fn provision_command_keeps_its_arguments() {
        let cli = Cli::try_parse_from([
            "secboot-sign",
            "secure-bootloader",
            "-k",
            "key.pem",
            "bootloader.bin",
            "secured.bin",
            "--",
            "python3",
            "./store keys.py",
            "--force",
        ])
        .unwrap();

        let Some(Command::SecureBootloader {
            image,
            secured,
            provision,
            ..
        }) = cli.command
        else {
            panic!("Expected the secure-bootloader command");
        };

        assert_eq!(image.to_str(), Some("bootloader.bin"));
        assert_eq!(secured.to_str(), Some("secured.bin"));
        assert_eq!(provision, ["python3", "./store keys.py", "--force"]);
    }

    #[test]
    fn provision_command_is_optional() {
        let cli = Cli::try_parse_from([
            "secboot-sign",
            "secure-bootloader",
            "-k",
            "key.pem",
            "bootloader.bin",
            "secured.bin",
        ])
        .unwrap();

        assert!(matches!(
            cli.command,
            Some(Command::SecureBootloader { provision, .. }) if provision.is_empty()
        ));
    }
}
