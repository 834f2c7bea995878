#![cfg(feature = "cli")]
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use clap::{ArgAction, Parser, Subcommand};
use tracing::{info, warn, Level};

use clearkey_cdm::buffer::{DecryptConfig, EncryptedBuffer, SubsampleEntry};
use clearkey_cdm::cdm::{CdmKeyInformation, DecryptResult, StreamType};
use clearkey_cdm::config::CdmConfig;
use clearkey_cdm::init_data::{self, InitDataType, PsshBox, COMMON_SYSTEM_ID, PSSH_KEY_ID_SIZE};
use clearkey_cdm::jwk;
use clearkey_cdm::promise::{CdmPromise, PromiseValue};
use clearkey_cdm::session::SessionType;
use clearkey_cdm::{ClearKeyCdm, Decryptor, SessionEventHandler, SessionManager};

#[derive(Parser)]
#[command(name = "clearkey", version, disable_version_flag = true, about = "ClearKey CDM CLI")]
struct Cli {
    #[arg(short = 'v', long = "version", action = ArgAction::SetTrue)]
    version: bool,

    #[arg(short = 'd', long = "debug", action = ArgAction::SetTrue)]
    debug: bool,

    /// YAML file with CDM settings.
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// CLI subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Print a JSON Web Key Set for `kid:key` hex pairs.
    Jwk {
        #[arg(short = 'k', long = "key", required = true)]
        keys: Vec<String>,
        #[arg(short = 't', long = "type", default_value = "temporary")]
        session_type: String,
    },
    /// Print the license request for base64 init data.
    LicenseRequest {
        init_data_type: String,
        init_data: String,
        #[arg(short = 't', long = "type", default_value = "temporary")]
        session_type: String,
    },
    /// Decrypt a file with keys from a JSON Web Key Set.
    ///
    /// Runs a full session: create, update with the key set, decrypt, release.
    Decrypt {
        jwk_path: PathBuf,
        input: PathBuf,
        #[arg(long = "kid")]
        kid: String,
        #[arg(long = "iv")]
        iv: String,
        /// `clear:cipher` byte counts, in order.
        #[arg(short = 's', long = "subsample")]
        subsamples: Vec<String>,
        #[arg(short = 'o', long = "output")]
        output: Option<PathBuf>,
    },
    /// Build a Common-system v1 PSSH box for hex key ids.
    Pssh {
        #[arg(short = 'k', long = "kid", required = true)]
        kids: Vec<String>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.debug {
        Level::DEBUG
    } else {
        Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    info!("clearkey version {}", env!("CARGO_PKG_VERSION"));

    if cli.version {
        return Ok(());
    }

    let config = match &cli.config {
        Some(path) => CdmConfig::from_path(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => CdmConfig::default(),
    };

    match cli.command {
        Some(Commands::Jwk { keys, session_type }) => run_jwk(&keys, &session_type),
        Some(Commands::LicenseRequest {
            init_data_type,
            init_data,
            session_type,
        }) => run_license_request(&config, &init_data_type, &init_data, &session_type),
        Some(Commands::Decrypt {
            jwk_path,
            input,
            kid,
            iv,
            subsamples,
            output,
        }) => run_decrypt(
            config,
            &jwk_path,
            &input,
            &kid,
            &iv,
            &subsamples,
            output.as_deref(),
        ),
        Some(Commands::Pssh { kids }) => run_pssh(&kids),
        None => Ok(()),
    }
}

fn run_jwk(keys: &[String], session_type: &str) -> anyhow::Result<()> {
    let session_type = parse_session_type(session_type)?;
    let pairs = keys
        .iter()
        .map(|pair| {
            let (kid, key) = pair
                .split_once(':')
                .with_context(|| format!("Expected kid:key, got '{}'", pair))?;
            Ok((decode_hex(kid, "kid")?, decode_hex(key, "key")?))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    println!("{}", jwk::serialize_with_type(&pairs, session_type));
    Ok(())
}

fn run_license_request(
    config: &CdmConfig,
    init_data_type: &str,
    init_data: &str,
    session_type: &str,
) -> anyhow::Result<()> {
    let init_data_type: InitDataType = init_data_type.parse()?;
    let session_type = parse_session_type(session_type)?;
    let init_data = STANDARD
        .decode(init_data.trim())
        .context("Init data is not valid base64")?;

    let key_ids = init_data::extract_key_ids(init_data_type, &init_data, config)?;
    for kid in &key_ids {
        info!("[+] Key ID: {}", hex::encode(kid));
    }

    let request = jwk::create_license_request(&key_ids, session_type);
    println!("{}", String::from_utf8_lossy(&request));
    Ok(())
}

fn run_decrypt(
    config: CdmConfig,
    jwk_path: &Path,
    input: &Path,
    kid: &str,
    iv: &str,
    subsamples: &[String],
    output: Option<&Path>,
) -> anyhow::Result<()> {
    let key_set = std::fs::read(jwk_path).context("Failed to read key set")?;
    let data = std::fs::read(input).context("Failed to read input")?;
    let kid = decode_hex(kid, "kid")?;
    let iv = decode_hex(iv, "iv")?;
    let subsamples = subsamples
        .iter()
        .map(|entry| parse_subsample(entry))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let mut cdm = ClearKeyCdm::with_config(config, LoggingEvents);
    info!("[+] Loaded CDM");

    let session_id = match run_promise(|p| {
        cdm.create_session(SessionType::Temporary, &[], p);
    })? {
        PromiseValue::SessionId(id) => id,
        PromiseValue::Void => anyhow::bail!("CDM did not return a session id"),
    };
    info!("[+] Opened Session: {}", session_id);

    run_promise(|p| {
        cdm.update_session(&session_id, &key_set, p);
    })
    .context("Failed to apply key set")?;
    info!("[+] Key Set Applied");

    let buffer = EncryptedBuffer::new(data, DecryptConfig::new(kid, iv, subsamples));
    let result = cdm.decrypt(StreamType::Video, &buffer);

    run_promise(|p| {
        cdm.release_session(&session_id, p);
    })?;

    let decrypted = match result {
        DecryptResult::Success(buffer) => buffer,
        other => anyhow::bail!("Decryption failed: {:?}", other.status()),
    };
    info!("[+] Decrypted {} bytes", decrypted.data.len());

    match output {
        Some(path) => std::fs::write(path, &decrypted.data)
            .with_context(|| format!("Failed to write {}", path.display()))?,
        None => println!("{}", hex::encode(&decrypted.data)),
    }
    Ok(())
}

fn run_pssh(kids: &[String]) -> anyhow::Result<()> {
    let key_ids = kids
        .iter()
        .map(|kid| {
            let bytes = decode_hex(kid, "kid")?;
            <[u8; PSSH_KEY_ID_SIZE]>::try_from(bytes.as_slice()).map_err(|_| {
                anyhow::anyhow!("Key id must be {} bytes, got {}", PSSH_KEY_ID_SIZE, bytes.len())
            })
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let pssh = PsshBox::new(COMMON_SYSTEM_ID, key_ids, Vec::new());
    println!("{}", STANDARD.encode(pssh.to_bytes()));
    Ok(())
}

/// Run a session operation and wait for its promise.
fn run_promise<F>(op: F) -> anyhow::Result<PromiseValue>
where
    F: FnOnce(CdmPromise),
{
    let slot = Arc::new(Mutex::new(None));
    let completion = Arc::clone(&slot);
    op(CdmPromise::from_fn(move |result| {
        if let Ok(mut completion) = completion.lock() {
            *completion = Some(result);
        }
    }));

    let result = slot
        .lock()
        .map_err(|_| anyhow::anyhow!("Promise state poisoned"))?
        .take()
        .context("Promise was not settled")?;
    Ok(result?)
}

struct LoggingEvents;

impl SessionEventHandler for LoggingEvents {
    fn on_session_message(&self, session_id: &str, message: &[u8]) {
        info!("[{}] message ({} bytes)", session_id, message.len());
    }

    fn on_session_keys_change(
        &self,
        session_id: &str,
        has_additional_usable_key: bool,
        keys_info: &[CdmKeyInformation],
    ) {
        for key in keys_info {
            info!("[{}] {} {:?}", session_id, hex::encode(&key.key_id), key.status);
        }
        if !has_additional_usable_key && keys_info.is_empty() {
            warn!("[{}] no usable keys", session_id);
        }
    }

    fn on_session_closed(&self, session_id: &str) {
        info!("[{}] closed", session_id);
    }
}

fn parse_session_type(value: &str) -> anyhow::Result<SessionType> {
    Ok(value.parse()?)
}

fn parse_subsample(entry: &str) -> anyhow::Result<SubsampleEntry> {
    let (clear, cipher) = entry
        .split_once(':')
        .with_context(|| format!("Expected clear:cipher, got '{}'", entry))?;
    Ok(SubsampleEntry::new(
        clear.trim().parse().context("Invalid clear byte count")?,
        cipher.trim().parse().context("Invalid cipher byte count")?,
    ))
}

fn decode_hex(value: &str, what: &str) -> anyhow::Result<Vec<u8>> {
    hex::decode(value.trim()).with_context(|| format!("Invalid {} hex", what))
}
