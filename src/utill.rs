//! Various utility and helper functions for both Maker and Taker sides of a trade.
//!
//! Includes logging setup, data directory resolution, TOML config parsing
//! helpers and the length-prefixed CBOR message framing used to move typed
//! protocol messages over any byte stream.

use std::{
    collections::HashMap,
    fs,
    io::{Read, Write},
    path::{Path, PathBuf},
    str::FromStr,
    sync::Once,
};

use log::LevelFilter;
use serde::Serialize;

use crate::error::NetError;

/// Upper bound for a single framed protocol message.
///
/// A deposit transaction with a few dozen inputs stays well below this;
/// anything larger is a framing error or a hostile peer.
pub const MAX_MESSAGE_LEN: usize = 1024 * 1024;

/// Root data directory. Defaults to `~/.escrowtrade`.
pub fn get_data_dir() -> PathBuf {
    std::env::var("HOME")
        .map(|home| PathBuf::from(home).join(".escrowtrade"))
        .unwrap_or_else(|_| PathBuf::from(".escrowtrade"))
}

/// Data directory for the trade engine (config + trade store).
pub fn get_engine_dir() -> PathBuf {
    get_data_dir().join("engine")
}

/// Initializes the global logger once. Subsequent calls are no-ops.
///
/// Respects `RUST_LOG` if set, otherwise uses the given level.
pub fn setup_logger(filter: LevelFilter) {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        env_logger::Builder::from_env(
            env_logger::Env::default().default_filter_or(filter.to_string()),
        )
        .init();
    });
}

/// Sends a length-prefixed CBOR message over the given writer.
///
/// Wire format: 4-byte big-endian length, followed by the CBOR body.
pub fn send_message(writer: &mut impl Write, message: &impl Serialize) -> Result<(), NetError> {
    let body = serde_cbor::ser::to_vec(message)?;
    let len = (body.len() as u32).to_be_bytes();
    writer.write_all(&len)?;
    writer.write_all(&body)?;
    writer.flush()?;
    Ok(())
}

/// Reads one length-prefixed message body from the given reader.
///
/// Returns the raw CBOR bytes; the caller picks the concrete message type
/// to deserialize into.
pub fn read_message(reader: &mut impl Read) -> Result<Vec<u8>, NetError> {
    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            NetError::ReachedEOF
        } else {
            NetError::IO(e)
        }
    })?;
    let len = u32::from_be_bytes(len_bytes) as usize;
    if len > MAX_MESSAGE_LEN {
        return Err(NetError::MessageTooLong(len));
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            NetError::ReachedEOF
        } else {
            NetError::IO(e)
        }
    })?;
    Ok(body)
}

/// Parses a flat `key = value` TOML file into a string map.
///
/// Section headers and comment lines are skipped. Good enough for the flat
/// config files this crate writes; not a general TOML parser.
pub fn parse_toml(path: &Path) -> std::io::Result<HashMap<String, String>> {
    let content = fs::read_to_string(path)?;
    let mut map = HashMap::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with('[') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            map.insert(
                key.trim().to_string(),
                value.trim().trim_matches('"').to_string(),
            );
        }
    }
    Ok(map)
}

/// Parses a config field into its target type, falling back to `default`
/// when the field is missing or malformed.
pub fn parse_field<T: FromStr>(value: Option<&String>, default: T) -> T {
    value
        .and_then(|s| s.parse::<T>().ok())
        .unwrap_or(default)
}
