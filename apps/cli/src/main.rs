use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, info};

use secboot_core::cert::{CertificateChain, ChainKeyIds, ContentImage, LocalRsaSigner};
use secboot_core::crypto::{OsRandom, RandomSource};
use secboot_core::image::{
    AuthAlgo, AuthPolicy, AuthScope, EncryptionAlgo, EncryptionPolicy, ImageKind, ImagePackager,
    PackagingPolicy, WiredOptions, split_for_wired,
};
use secboot_core::keys::KeyBank;
use secboot_core::session::{RecoveryImages, SessionConfig, SessionOutcome, WiredSession};
use secboot_core::transport::SerialTransport;
use secboot_core::{KeyLookup, TracingObserver};

#[derive(Parser, Debug)]
#[command(name = "secboot", version, about = "Secure-boot image packaging and wired recovery", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Package a payload into a secure-boot image blob
    Package(PackageArgs),
    /// Build a certificate chain and wrap it in a container blob
    CertChain(CertChainArgs),
    /// Drive a wired recovery session over a serial port
    Recover(RecoverArgs),
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum KindArg {
    Main,
    Child,
    Nonsecure,
    SecureFirmware,
    CustomerOta,
    Info0,
    KeyRevoke,
    OemRecovery,
}

#[derive(Parser, Debug)]
struct PackageArgs {
    /// Payload file
    #[arg(short, long)]
    input: String,

    /// Output blob file
    #[arg(short, long, default_value = "image.bin")]
    output: String,

    /// Image kind
    #[arg(long, value_enum, default_value = "nonsecure")]
    kind: KindArg,

    /// Load address (hex accepted)
    #[arg(long, default_value = "0x410000", value_parser = parse_u32)]
    load_address: u32,

    /// Key bank TOML (needed for --encrypt / --auth)
    #[arg(long)]
    keys: Option<String>,

    /// Encrypt the payload (AES-128-CTR)
    #[arg(long)]
    encrypt: bool,

    /// Key-encryption-key index
    #[arg(long, default_value_t = 8)]
    enc_key_idx: u8,

    /// Add an HMAC signature checked at install or boot time
    #[arg(long, value_parser = ["install", "boot"])]
    auth: Option<String>,

    /// Authentication key index
    #[arg(long, default_value_t = 8)]
    auth_key_idx: u8,

    /// Skip the header CRC
    #[arg(long)]
    no_crc: bool,

    /// INFO0 word offset (info0 kind only)
    #[arg(long, default_value = "0", value_parser = parse_u32)]
    info0_offset: u32,

    /// INFO0 size in words (info0 kind only)
    #[arg(long, default_value = "0", value_parser = parse_u32)]
    info0_size: u32,

    /// INFO0 programming destination selector (info0 kind only)
    #[arg(long, default_value_t = 1)]
    info0_dest: u8,

    /// Wrap the result into wired-download blobs for UART delivery
    #[arg(long)]
    wired: bool,

    /// Largest content piece per wired blob (hex accepted)
    #[arg(long, default_value = "0x48000", value_parser = parse_usize)]
    split: usize,

    /// Request an OTA handoff once the wired download completes
    #[arg(long)]
    ota: bool,
}

#[derive(Parser, Debug)]
struct CertChainArgs {
    /// Root private key, PKCS#8 PEM
    #[arg(long)]
    root_key: String,

    /// Intermediate private key, PKCS#8 PEM
    #[arg(long)]
    signing_key: String,

    /// Content private key, PKCS#8 PEM
    #[arg(long)]
    content_key: String,

    /// Image spec `path,loadAddr,storeAddr,maxSize[,enc]`; repeatable
    #[arg(long = "image", required = true)]
    images: Vec<String>,

    /// Software version recorded in every certificate
    #[arg(long, default_value = "0", value_parser = parse_u32)]
    sw_version: u32,

    /// Output container blob
    #[arg(short, long, default_value = "chain.bin")]
    output: String,
}

#[derive(Parser, Debug)]
struct RecoverArgs {
    /// Config TOML; CLI flags override its values
    #[arg(long)]
    config: Option<String>,

    /// Serial port path
    #[arg(short, long)]
    port: Option<String>,

    /// Baud rate
    #[arg(long)]
    baud: Option<u32>,

    /// Per-step response timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Transfer file offered for Ambiq recovery
    #[arg(long)]
    ambiq: Option<String>,

    /// Transfer file offered for OEM recovery
    #[arg(long)]
    oem: Option<String>,
}

fn parse_u32(s: &str) -> Result<u32, String> {
    let (digits, radix) = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => (hex, 16),
        None => (s, 10),
    };
    u32::from_str_radix(digits, radix).map_err(|e| e.to_string())
}

fn parse_usize(s: &str) -> Result<usize, String> {
    parse_u32(s).map(|v| v as usize)
}

fn run_package(args: &PackageArgs) -> Result<()> {
    let payload = std::fs::read(&args.input)
        .with_context(|| format!("reading payload {}", args.input))?;

    let kind = match args.kind {
        KindArg::Main => ImageKind::Main { load_address: args.load_address },
        KindArg::Child => ImageKind::Child { load_address: args.load_address },
        KindArg::Nonsecure => ImageKind::NonSecure { load_address: args.load_address },
        KindArg::SecureFirmware => ImageKind::SecureFirmware { load_address: args.load_address },
        KindArg::CustomerOta => ImageKind::CustomerOta { load_address: args.load_address },
        KindArg::Info0 => ImageKind::Info0 {
            offset_words: args.info0_offset,
            size_words: args.info0_size,
            program_dest: args.info0_dest,
        },
        KindArg::KeyRevoke => ImageKind::KeyRevoke,
        KindArg::OemRecovery => ImageKind::OemRecovery,
    };

    let policy = PackagingPolicy {
        encryption: args.encrypt.then_some(EncryptionPolicy {
            algo: EncryptionAlgo::Aes128Ctr,
            key_index: args.enc_key_idx,
        }),
        auth: args.auth.as_deref().map(|when| AuthPolicy {
            algo: AuthAlgo::HmacSha256,
            key_index: args.auth_key_idx,
            scope: if when == "boot" { AuthScope::Boot } else { AuthScope::Install },
        }),
        crc: !args.no_crc,
    };

    let bank = match &args.keys {
        Some(path) => KeyBank::load_from_file(path)?,
        None => KeyBank::default(),
    };
    let keys: &dyn KeyLookup = &bank;
    let packager = ImagePackager::new(keys);
    let mut rng = OsRandom;

    let blob = packager.build(&kind, &payload, &policy, &mut rng)?;
    let output = if args.wired {
        let opts = WiredOptions {
            max_piece: args.split,
            ota: args.ota,
            ..WiredOptions::new(args.load_address)
        };
        split_for_wired(&packager, &blob, &opts, &mut rng)?
    } else {
        blob
    };

    std::fs::write(&args.output, &output)
        .with_context(|| format!("writing {}", args.output))?;
    info!(path = %args.output, bytes = output.len(), "image written");
    Ok(())
}

fn parse_image_spec(spec: &str) -> Result<ContentImage> {
    let parts: Vec<&str> = spec.split(',').collect();
    if parts.len() < 4 {
        bail!("image spec {spec:?} needs path,loadAddr,storeAddr,maxSize[,enc]");
    }
    let data = std::fs::read(parts[0]).with_context(|| format!("reading image {}", parts[0]))?;
    Ok(ContentImage {
        data,
        load_address: parse_u32(parts[1]).map_err(|e| anyhow::anyhow!("loadAddr: {e}"))?,
        store_address: parse_u32(parts[2]).map_err(|e| anyhow::anyhow!("storeAddr: {e}"))?,
        max_size: parse_u32(parts[3]).map_err(|e| anyhow::anyhow!("maxSize: {e}"))?,
        encrypted: parts.get(4).is_some_and(|p| *p == "enc"),
    })
}

fn run_cert_chain(args: &CertChainArgs) -> Result<()> {
    let mut signer = LocalRsaSigner::new();
    signer.load_pem("root", &args.root_key)?;
    signer.load_pem("key", &args.signing_key)?;
    signer.load_pem("content", &args.content_key)?;
    let ids = ChainKeyIds {
        root: "root".into(),
        key: "key".into(),
        content: "content".into(),
    };

    let images: Vec<ContentImage> = args
        .images
        .iter()
        .map(|s| parse_image_spec(s))
        .collect::<Result<_>>()?;

    let mut nonce = [0u8; 8];
    OsRandom.fill(&mut nonce);
    let chain = CertificateChain::build(&signer, &ids, args.sw_version, nonce, &images)?;
    chain.verify()?;

    // Ship the chain inside a container image so downstream tooling
    // can treat it like any other blob.
    let bank = KeyBank::default();
    let packager = ImagePackager::new(&bank);
    let blob = packager.build(
        &ImageKind::Container,
        &chain.to_bytes(),
        &PackagingPolicy::crc_only(),
        &mut OsRandom,
    )?;

    std::fs::write(&args.output, &blob)
        .with_context(|| format!("writing {}", args.output))?;
    info!(path = %args.output, bytes = blob.len(), "certificate container written");
    Ok(())
}

fn run_recover(args: &RecoverArgs) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => SessionConfig::load_from_file(path)?,
        None => SessionConfig::default(),
    };
    if let Some(port) = &args.port {
        config.port = Some(port.clone());
    }
    if let Some(baud) = args.baud {
        config.baud = baud;
    }
    if let Some(timeout) = args.timeout {
        config.timeout_secs = timeout;
    }
    if let Some(path) = &args.ambiq {
        config.ambiq_image_path = Some(path.clone());
    }
    if let Some(path) = &args.oem {
        config.oem_image_path = Some(path.clone());
    }

    let Some(port) = &config.port else {
        bail!("no serial port given (use --port or the config file)");
    };
    if config.ambiq_image_path.is_none() && config.oem_image_path.is_none() {
        bail!("no transfer file given (use --ambiq and/or --oem)");
    }

    let mut images = RecoveryImages::default();
    if let Some(path) = &config.ambiq_image_path {
        images.ambiq = Some(std::fs::read(path).with_context(|| format!("reading {path}"))?);
    }
    if let Some(path) = &config.oem_image_path {
        images.oem = Some(std::fs::read(path).with_context(|| format!("reading {path}"))?);
    }

    info!(port = %port, baud = config.baud, "opening serial port");
    let mut channel = SerialTransport::open(port, config.baud)?;
    let observer = TracingObserver;
    let mut session = WiredSession::new(
        &mut channel,
        &observer,
        std::time::Duration::from_secs(config.timeout_secs),
        config.max_message,
    );

    match session.run(&images)? {
        SessionOutcome::Completed => info!("recovery complete"),
        SessionOutcome::NoMatchingImage(kind) => {
            info!(recovery = kind.name(), "device wanted an image we do not have; aborted cleanly");
        }
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if cli.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let result = match &cli.command {
        Commands::Package(args) => run_package(args),
        Commands::CertChain(args) => run_cert_chain(args),
        Commands::Recover(args) => run_recover(args),
    };

    if let Err(e) = result {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}
