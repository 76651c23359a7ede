//! Secret providers for the key material
//!
//! The three secrets are looked up by name under a service namespace, each as a hex
//! string of 16 bytes. When any is missing, an optional provisioning hook gets one
//! chance to create them before the lookup is retried.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::string::{String, ToString};
use std::vec::Vec;
use std::{env, fs, io};

use log::{debug, info, warn};

use crate::keys::{Iv, KeyEncryptionKey, KeyMaterial, PayloadDecryptionKey};
use crate::Error;

/// Default service namespace
pub const SERVICE: &str = "secboot_secrets";

/// Name of the payload-decryption key (`AES_KEY1`)
pub const AES_KEY_1: &str = "aes_key_1";
/// Name of the key-encryption key (`AES_KEY2`)
pub const AES_KEY_2: &str = "aes_key_2";
/// Name of the IV
pub const AES_IV: &str = "aes_iv";

const NAMES: [&str; 3] = [AES_KEY_1, AES_KEY_2, AES_IV];

/// A store the key material is retrieved from
pub trait SecretProvider {
    /// Get the secret `name`, or `None` if the store does not have it
    fn get(&self, name: &str) -> Result<Option<String>, Error>;
}

/// Secrets held in memory
#[derive(Default, Clone)]
pub struct MemorySecrets(HashMap<String, String>);

impl MemorySecrets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, value: &str) {
        self.0.insert(name.to_string(), value.to_string());
    }
}

impl SecretProvider for MemorySecrets {
    fn get(&self, name: &str) -> Result<Option<String>, Error> {
        Ok(self.0.get(name).cloned())
    }
}

/// Secrets taken from the environment, as `<SERVICE>_<NAME>` in upper case
/// (e.g. `SECBOOT_SECRETS_AES_KEY_1`)
pub struct EnvSecrets {
    service: String,
}

impl EnvSecrets {
    pub fn new(service: &str) -> Self {
        Self {
            service: service.to_string(),
        }
    }

    fn var(&self, name: &str) -> String {
        std::format!("{}_{}", self.service, name).to_uppercase()
    }
}

impl SecretProvider for EnvSecrets {
    fn get(&self, name: &str) -> Result<Option<String>, Error> {
        Ok(env::var(self.var(name)).ok())
    }
}

/// Secrets stored in a TOML file, one table per service namespace:
///
/// ```toml
/// [secboot_secrets]
/// aes_key_1 = "000102030405060708090a0b0c0d0e0f"
/// aes_key_2 = "00240028323650032034354edeadbeef"
/// aes_iv = "0f0e0d0c0b0a09080706050403020100"
/// ```
///
/// The file is read on every lookup, so that secrets written by a provisioning step are seen.
/// A missing file is an empty store.
pub struct FileSecrets {
    path: PathBuf,
    service: String,
}

impl FileSecrets {
    pub fn new(path: impl Into<PathBuf>, service: &str) -> Self {
        Self {
            path: path.into(),
            service: service.to_string(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<HashMap<String, HashMap<String, String>>, Error> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(e) => return Err(e.into()),
        };

        toml::from_str(&text).map_err(|e| {
            Error::SecretStore(std::format!("Parsing `{}` failed: {}", self.path.display(), e))
        })
    }
}

impl SecretProvider for FileSecrets {
    fn get(&self, name: &str) -> Result<Option<String>, Error> {
        Ok(self
            .load()?
            .remove(&self.service)
            .and_then(|mut table| table.remove(name)))
    }
}

/// Provision missing secrets by running an external command (e.g. a key-generation script)
pub struct CommandProvisioner {
    program: String,
    args: Vec<String>,
}

impl CommandProvisioner {
    /// Create a provisioner from a command line split into words; `None` if `command` is empty
    pub fn new(command: &[String]) -> Option<Self> {
        let (program, args) = command.split_first()?;

        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }

    pub fn run(&self) -> Result<(), Error> {
        info!(
            "Missing secrets detected, running `{} {}`...",
            self.program,
            self.args.join(" ")
        );

        let status = Command::new(&self.program).args(&self.args).status()?;

        if !status.success() {
            Err(Error::SecretStore(std::format!(
                "Provisioning command `{}` failed ({})",
                self.program,
                status
            )))?;
        }

        Ok(())
    }
}

/// Retrieve and decode the key material
///
/// # Arguments
/// * `provider` - The store to read the secrets from
/// * `provision` - Called once if any secret is missing; the lookup is then retried
pub fn fetch_key_material<P>(
    provider: &P,
    provision: Option<&mut dyn FnMut() -> Result<(), Error>>,
) -> Result<KeyMaterial, Error>
where
    P: SecretProvider + ?Sized,
{
    let mut values = lookup(provider)?;

    if values.iter().any(Option::is_none) {
        if let Some(provision) = provision {
            provision()?;
            values = lookup(provider)?;
        } else {
            warn!("Missing secrets and no provisioning configured");
        }
    }

    let [key_1, key_2, iv] = values;

    let key_1 = key_1.ok_or(Error::SecretUnavailable(AES_KEY_1))?;
    let key_2 = key_2.ok_or(Error::SecretUnavailable(AES_KEY_2))?;
    let iv = iv.ok_or(Error::SecretUnavailable(AES_IV))?;

    debug!("Key material retrieved");

    Ok(KeyMaterial {
        payload_key: PayloadDecryptionKey::from_hex(AES_KEY_1, &key_1)?,
        kek: KeyEncryptionKey::from_hex(AES_KEY_2, &key_2)?,
        iv: Iv::from_hex(AES_IV, &iv)?,
    })
}

fn lookup<P>(provider: &P) -> Result<[Option<String>; 3], Error>
where
    P: SecretProvider + ?Sized,
{
    let mut values: [Option<String>; 3] = Default::default();

    for (value, name) in values.iter_mut().zip(NAMES) {
        *value = provider.get(name)?;
    }

    Ok(values)
}
