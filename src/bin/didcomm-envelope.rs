//! didcomm-envelope CLI: keyring management and pack/unpack of JWE envelopes
//!
//! Usage:
//!   didcomm-envelope keygen  --keyring <FILE> --kid <KID> [--alg x25519|p256]
//!   didcomm-envelope import  --keyring <FILE> --kid <KID> --jwk <FILE>
//!   didcomm-envelope export  --keyring <FILE> --kid <KID>
//!   didcomm-envelope pack    --keyring <FILE> --to <KID>... [--from <KID>] --output <FILE>
//!   didcomm-envelope unpack  --keyring <FILE> [--input <FILE>] [--output <FILE>]
//!   didcomm-envelope inspect <FILE>

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use didcomm_envelope::{
    inspect, ContentEncryption, EnvelopeKey, FileKeyStore, Jwk, KeyAlg, KeyStore, KeyWrap,
    LocalKey, PackConfig, Packer,
};

#[derive(Parser)]
#[command(name = "didcomm-envelope", version, about = "Agent-to-agent JWE envelopes")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate a key pair and store it in the keyring
    Keygen {
        #[arg(long)]
        keyring: PathBuf,
        #[arg(long)]
        kid: String,
        #[arg(long, value_enum, default_value_t = Curve::X25519)]
        alg: Curve,
    },
    /// Import a JWK (private if it carries `d`, otherwise a peer key)
    Import {
        #[arg(long)]
        keyring: PathBuf,
        #[arg(long)]
        kid: String,
        #[arg(long)]
        jwk: PathBuf,
    },
    /// Print the public JWK for a kid
    Export {
        #[arg(long)]
        keyring: PathBuf,
        #[arg(long)]
        kid: String,
    },
    /// Encrypt stdin or a file to one or more recipients
    Pack {
        #[arg(long)]
        keyring: PathBuf,
        #[arg(long = "to", required = true, num_args = 1..)]
        to: Vec<String>,
        /// Sender kid; authenticated (ECDH-1PU) when given
        #[arg(long)]
        from: Option<String>,
        /// Content encryption (defaults depend on the mode)
        #[arg(long)]
        enc: Option<String>,
        #[arg(long, default_value = "A256KW")]
        wrap: String,
        #[arg(long)]
        flatten: bool,
        #[arg(long)]
        input: Option<PathBuf>,
        #[arg(long)]
        output: PathBuf,
    },
    /// Decrypt an envelope with the keyring's private keys
    Unpack {
        #[arg(long)]
        keyring: PathBuf,
        #[arg(long)]
        input: Option<PathBuf>,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Show envelope metadata (no decryption)
    Inspect { file: PathBuf },
}

#[derive(Clone, Copy, ValueEnum)]
enum Curve {
    X25519,
    P256,
}

impl From<Curve> for KeyAlg {
    fn from(c: Curve) -> Self {
        match c {
            Curve::X25519 => KeyAlg::X25519,
            Curve::P256 => KeyAlg::P256,
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .context("start runtime")?;
    runtime.block_on(run(cli.command))
}

async fn run(command: Command) -> Result<()> {
    match command {
        Command::Keygen { keyring, kid, alg } => {
            let store = FileKeyStore::open(&keyring)?;
            let key = LocalKey::generate(alg.into()).map_err(|e| anyhow!("keygen: {e}"))?;
            store.insert_local(&kid, &key)?;
            println!("{}", serde_json::to_string_pretty(&store.export_public(&kid)?)?);
            eprintln!("✓ {} key {} added to {}", KeyAlg::from(alg), kid, keyring.display());
        }
        Command::Import { keyring, kid, jwk } => {
            let store = FileKeyStore::open(&keyring)?;
            let jwk: Jwk = serde_json::from_str(
                &fs::read_to_string(&jwk).with_context(|| format!("read {}", jwk.display()))?,
            )?;
            let key = LocalKey::from_jwk(&jwk).map_err(|e| anyhow!("import {kid}: {e}"))?;
            if key.has_secret() {
                store.insert_local(&kid, &key)?;
            } else {
                store.insert_public(&kid, &key)?;
            }
            eprintln!(
                "✓ imported {} key {}",
                if key.has_secret() { "private" } else { "public" },
                kid
            );
        }
        Command::Export { keyring, kid } => {
            let store = FileKeyStore::open(&keyring)?;
            println!("{}", serde_json::to_string_pretty(&store.export_public(&kid)?)?);
        }
        Command::Pack {
            keyring,
            to,
            from,
            enc,
            wrap,
            flatten,
            input,
            output,
        } => {
            let store = FileKeyStore::open(&keyring)?;
            let mut config = PackConfig {
                key_wrap: wrap.parse::<KeyWrap>()?,
                flatten,
                ..PackConfig::default()
            };
            if let Some(enc) = enc {
                let enc: ContentEncryption = enc.parse()?;
                if from.is_some() {
                    config.auth_enc = enc;
                } else {
                    config.anon_enc = enc;
                }
            }

            let mut recipients = BTreeMap::new();
            for kid in to {
                let key = store
                    .fetch_public_key(&kid)
                    .await?
                    .ok_or_else(|| anyhow!("unknown recipient {kid}"))?;
                recipients.insert(kid, key);
            }
            let sender = match &from {
                Some(kid) => {
                    let mut found = store.fetch_local_keys(&[kid.clone()]).await?;
                    let (_, key) = found
                        .pop()
                        .ok_or_else(|| anyhow!("no private key for sender {kid}"))?;
                    Some((kid.as_str(), key))
                }
                None => None,
            };

            let plaintext = read_input(input.as_deref())?;
            let packed = Packer::new(config).pack(
                &recipients,
                sender.as_ref().map(|(kid, key)| (*kid, key)),
                &plaintext,
            )?;
            fs::write(&output, &packed).with_context(|| format!("write {}", output.display()))?;
            eprintln!(
                "✓ packed {} bytes → {} ({} bytes, {} recipient(s))",
                plaintext.len(),
                output.display(),
                packed.len(),
                recipients.len()
            );
        }
        Command::Unpack {
            keyring,
            input,
            output,
        } => {
            let store = FileKeyStore::open(&keyring)?;
            let envelope = read_input(input.as_deref())?;
            let opened = Packer::default().unpack(&store, &envelope).await?;
            match &output {
                Some(path) => fs::write(path, &opened.plaintext)
                    .with_context(|| format!("write {}", path.display()))?,
                None => io::stdout().write_all(&opened.plaintext)?,
            }
            match &opened.sender_kid {
                Some(sender) => eprintln!("✓ from {} to {}", sender, opened.recipient_kid),
                None => eprintln!("✓ anonymous, to {}", opened.recipient_kid),
            }
        }
        Command::Inspect { file } => {
            let data = fs::read(&file).with_context(|| format!("read {}", file.display()))?;
            let info = inspect(&data)?;
            println!("{}", info);
            println!("  alg:           {}", info.alg);
            println!("  enc:           {}", info.enc);
            println!("  serialization: {}", info.serialization);
            if let Some(sender) = &info.sender_kid {
                println!("  sender:        {}", sender);
            }
            for kid in &info.recipients {
                println!("  recipient:     {}", kid);
            }
        }
    }
    Ok(())
}

fn read_input(path: Option<&Path>) -> Result<Vec<u8>> {
    match path {
        Some(path) => fs::read(path).with_context(|| format!("read {}", path.display())),
        None => {
            let mut buf = Vec::new();
            io::stdin().read_to_end(&mut buf)?;
            if buf.is_empty() {
                bail!("no input on stdin");
            }
            Ok(buf)
        }
    }
}
