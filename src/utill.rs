//! Various utility and helper functions shared by the trade stages.

use std::{
    collections::HashMap,
    fs::File,
    io::{self, BufRead, Read, Write},
    path::{Path, PathBuf},
    str::FromStr,
    sync::Once,
    time::{SystemTime, UNIX_EPOCH},
};

use log::LevelFilter;
use log4rs::{
    append::{console::ConsoleAppender, file::FileAppender},
    config::{Appender, Config, Root},
    encode::pattern::PatternEncoder,
};
use serde::{de::DeserializeOwned, Serialize};

use crate::error::NetError;

/// Largest message frame accepted from a counterparty.
pub const MAX_MESSAGE_LEN: u32 = 1 << 20;

const LOG_PATTERN: &str = "{d(%Y-%m-%d %H:%M:%S)} {h({l})} {M}: {m}{n}";

static LOGGER: Once = Once::new();

/// Setup function that will only run once, even if called multiple times.
///
/// Logs go to stdout and, with a data directory, to `<data_dir>/debug.log` too.
pub fn setup_logger(level: LevelFilter, data_dir: Option<&Path>) {
    LOGGER.call_once(|| {
        let stdout = ConsoleAppender::builder()
            .encoder(Box::new(PatternEncoder::new(LOG_PATTERN)))
            .build();
        let mut config =
            Config::builder().appender(Appender::builder().build("stdout", Box::new(stdout)));
        let mut root = Root::builder().appender("stdout");

        if let Some(dir) = data_dir {
            match FileAppender::builder()
                .encoder(Box::new(PatternEncoder::new(LOG_PATTERN)))
                .build(dir.join("debug.log"))
            {
                Ok(file) => {
                    config = config.appender(Appender::builder().build("file", Box::new(file)));
                    root = root.appender("file");
                }
                Err(e) => eprintln!("Cannot log to {}: {}", dir.display(), e),
            }
        }

        match config.build(root.build(level)) {
            Ok(config) => {
                if let Err(e) = log4rs::init_config(config) {
                    eprintln!("Logger already set: {}", e);
                }
            }
            Err(e) => eprintln!("Invalid logger config: {}", e),
        }
    });
}

/// Get the default data directory. `~/.atomicswap` on Linux.
pub fn get_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".atomicswap")
}

/// Read `key = value` lines of a flat toml file. Section headers and comments are skipped.
pub fn parse_toml(file_path: &Path) -> io::Result<HashMap<String, String>> {
    let file = File::open(file_path)?;
    let reader = io::BufReader::new(file);
    let mut fields = HashMap::new();

    for line in reader.lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with('[') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            let value = value.trim().trim_matches('"');
            fields.insert(key.trim().to_string(), value.to_string());
        }
    }
    Ok(fields)
}

/// Parse a config value, falling back to `default` when missing or invalid.
pub fn parse_field<T: FromStr>(value: Option<&String>, default: T) -> T {
    value
        .and_then(|value| value.parse::<T>().ok())
        .unwrap_or(default)
}

/// Seconds since the unix epoch.
pub fn unix_time() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Write one length-prefixed CBOR frame.
pub fn send_message(writer: &mut impl Write, message: &impl Serialize) -> Result<(), NetError> {
    let message_cbor = serde_cbor::to_vec(message)?;
    let length = (message_cbor.len() as u32).to_be_bytes();
    writer.write_all(&length)?;
    writer.write_all(&message_cbor)?;
    writer.flush()?;
    Ok(())
}

/// Read one length-prefixed CBOR frame.
pub fn read_message<T: DeserializeOwned>(reader: &mut impl Read) -> Result<T, NetError> {
    let mut length_buf = [0u8; 4];
    reader.read_exact(&mut length_buf)?;
    let length = u32::from_be_bytes(length_buf);
    if length == 0 || length > MAX_MESSAGE_LEN {
        return Err(NetError::IO(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("invalid message length {}", length),
        )));
    }
    let mut buffer = vec![0; length as usize];
    reader.read_exact(&mut buffer)?;
    Ok(serde_cbor::from_slice(&buffer)?)
}

/// Serde adapter storing a [std::time::Duration] as whole seconds.
pub mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}
