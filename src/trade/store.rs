//! The Trade Store.
//!
//! Checkpoints every trade's `Trade` + `ProcessModel` pair to a single CBOR
//! file using atomic writes (write-to-tmp then rename), so the engine can
//! resume every trade from its last committed step after a crash. With a
//! passphrase the store is serialized first, then encrypted with
//! [AES-GCM](https://en.wikipedia.org/wiki/Galois/Counter_Mode) under a
//! PBKDF2-SHA256-derived key; the salt and nonce ride along in the file
//! wrapper.

use std::{
    collections::HashMap,
    fs,
    io::BufWriter,
    path::{Path, PathBuf},
};

use aes_gcm::{
    aead::{rand_core::RngCore, Aead, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use pbkdf2::pbkdf2_hmac;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use super::{process_model::ProcessModel, Trade};

const PBKDF2_ROUNDS: u32 = 100_000;
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;

/// Errors raised by the trade store.
#[derive(Debug)]
pub enum StoreError {
    /// Standard I/O error while reading or writing the store file.
    IO(std::io::Error),
    /// CBOR serialization or deserialization error.
    Cbor(serde_cbor::Error),
    /// Encryption or decryption failed (wrong passphrase, corrupt file).
    Crypto(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(value: std::io::Error) -> Self {
        Self::IO(value)
    }
}

impl From<serde_cbor::Error> for StoreError {
    fn from(value: serde_cbor::Error) -> Self {
        Self::Cbor(value)
    }
}

/// One checkpointed trade: the aggregate plus its scratch state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeRecord {
    /// The trade aggregate.
    pub trade: Trade,
    /// The trade's scratch state.
    pub model: ProcessModel,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    records: HashMap<String, TradeRecord>,
}

/// Wrapper struct for the encrypted store on disk.
///
/// The plain [`StoreFile`] is serialized to CBOR, encrypted, and packaged
/// here together with the PBKDF2 salt and the AES-GCM nonce used for this
/// particular write.
#[derive(Debug, Serialize, Deserialize)]
struct EncryptedStoreFile {
    salt: Vec<u8>,
    nonce: Vec<u8>,
    ciphertext: Vec<u8>,
}

/// Persistent checkpoint store for all of the engine's trades.
#[derive(Debug)]
pub struct TradeStore {
    path: PathBuf,
    key: Option<([u8; 32], Vec<u8>)>,
}

fn derive_key(passphrase: &str, salt: &[u8]) -> [u8; 32] {
    let mut key = [0u8; 32];
    pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), salt, PBKDF2_ROUNDS, &mut key);
    key
}

impl TradeStore {
    /// Opens (or creates) the store at `path`. With a passphrase the file
    /// is kept encrypted; opening an existing encrypted store re-derives
    /// the key from the salt in the file and fails on a wrong passphrase.
    pub fn init(path: &Path, passphrase: Option<&str>) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let exists = path.exists() && fs::metadata(path)?.len() > 0;

        let key = match passphrase {
            None => None,
            Some(pass) => {
                let salt = if exists {
                    let wrapper: EncryptedStoreFile = serde_cbor::from_slice(&fs::read(path)?)?;
                    wrapper.salt
                } else {
                    let mut salt = vec![0u8; SALT_LEN];
                    OsRng.fill_bytes(&mut salt);
                    salt
                };
                Some((derive_key(pass, &salt), salt))
            }
        };

        let store = Self {
            path: path.to_path_buf(),
            key,
        };
        if exists {
            // Fails fast on a wrong passphrase or a corrupt file.
            store.read_file()?;
        } else {
            store.write_file(&StoreFile::default())?;
            log::info!("Created fresh trade store at {}", path.display());
        }
        Ok(store)
    }

    /// Checkpoints one trade, replacing its previous record.
    pub fn checkpoint(&self, trade: &Trade, model: &ProcessModel) -> Result<(), StoreError> {
        let mut file = self.read_file()?;
        file.records.insert(
            trade.id.clone(),
            TradeRecord {
                trade: trade.clone(),
                model: model.clone(),
            },
        );
        self.write_file(&file)
    }

    /// All checkpointed trades, keyed by trade id.
    pub fn load_all(&self) -> Result<HashMap<String, TradeRecord>, StoreError> {
        Ok(self.read_file()?.records)
    }

    /// Drops a finished trade's checkpoint.
    pub fn remove(&self, trade_id: &str) -> Result<(), StoreError> {
        let mut file = self.read_file()?;
        if file.records.remove(trade_id).is_some() {
            self.write_file(&file)?;
        }
        Ok(())
    }

    fn read_file(&self) -> Result<StoreFile, StoreError> {
        let bytes = fs::read(&self.path)?;
        match &self.key {
            None => Ok(serde_cbor::from_slice(&bytes)?),
            Some((key, _)) => {
                let wrapper: EncryptedStoreFile = serde_cbor::from_slice(&bytes)?;
                let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
                if wrapper.nonce.len() != NONCE_LEN {
                    return Err(StoreError::Crypto("malformed nonce".to_string()));
                }
                let plaintext = cipher
                    .decrypt(Nonce::from_slice(&wrapper.nonce), wrapper.ciphertext.as_ref())
                    .map_err(|_| {
                        StoreError::Crypto("decryption failed, wrong passphrase?".to_string())
                    })?;
                Ok(serde_cbor::from_slice(&plaintext)?)
            }
        }
    }

    /// Serializes the store, writing to a temp file first and renaming so a
    /// crash mid-write can never corrupt the last good checkpoint.
    fn write_file(&self, file: &StoreFile) -> Result<(), StoreError> {
        let tmp_path = self.path.with_extension("tmp");
        {
            let tmp = fs::File::create(&tmp_path)?;
            let writer = BufWriter::new(tmp);
            match &self.key {
                None => serde_cbor::to_writer(writer, file)?,
                Some((key, salt)) => {
                    let plaintext = serde_cbor::ser::to_vec(file)?;
                    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
                    let mut nonce = [0u8; NONCE_LEN];
                    OsRng.fill_bytes(&mut nonce);
                    let ciphertext = cipher
                        .encrypt(Nonce::from_slice(&nonce), plaintext.as_ref())
                        .map_err(|_| StoreError::Crypto("encryption failed".to_string()))?;
                    let wrapper = EncryptedStoreFile {
                        salt: salt.clone(),
                        nonce: nonce.to_vec(),
                        ciphertext,
                    };
                    serde_cbor::to_writer(writer, &wrapper)?;
                }
            }
        }
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}
