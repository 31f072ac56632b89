use std::process::ExitCode;

use keyseal::prelude::*;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Console logging filtered by `RUST_LOG`; `log` records from the library
/// are forwarded to the subscriber.
fn init_logging(default_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true))
        .init();
}

fn main() -> ExitCode {
    init_logging("info");

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {}", err);
            if let Some((message, remediation)) = explain(err.as_ref()) {
                eprintln!("{}", message);
                if let Some(remediation) = remediation {
                    eprintln!("Suggestion: {}", remediation);
                }
            }
            ExitCode::FAILURE
        }
    }
}

/// Friendly message and remediation for the error types the demo can hit
fn explain(err: &(dyn std::error::Error + 'static)) -> Option<(String, Option<String>)> {
    if let Some(err) = err.downcast_ref::<ConfigError>() {
        return Some((err.user_friendly_message(), err.suggested_remediation()));
    }
    if let Some(err) = err.downcast_ref::<InitError>() {
        return Some((err.user_friendly_message(), err.suggested_remediation()));
    }
    if let Some(err) = err.downcast_ref::<SecretError>() {
        return Some((err.user_friendly_message(), err.suggested_remediation()));
    }
    None
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    println!("Keyseal credential store demo");

    let config = StoreConfig::from_env()?;
    println!("Alias: {}", config.alias);

    let store = config.open_store()?;
    store.init()?;

    if let Some(report) = store.last_report() {
        println!("\n=== Key ===");
        println!("Status: {:?}", report.status);
        println!("Backend: {}", report.backend);
        println!("Hardware isolated: {}", report.isolation);
        if let Some(validity) = report.validity {
            println!("Valid: {} .. {}", validity.not_before, validity.not_after);
        }
        if let Some(fingerprint) = report.fingerprint {
            println!("Fingerprint (SHA-256): {}", fingerprint);
        }
    }

    println!("\n=== Round trip ===");
    let secret = b"secret1";
    let ciphertext = store.put("pwd", secret)?;
    println!("Ciphertext ({} bytes): {}", ciphertext.len(), base64::encode(&ciphertext));

    let plaintext = store.get("pwd")?;
    if plaintext.as_bytes() == secret {
        println!("✓ Decrypted secret matches");
    } else {
        println!("✗ Decrypted secret does not match");
        return Err("round trip mismatch".into());
    }

    store.remove("pwd")?;
    println!("Stored secrets: {:?}", store.keys()?);

    Ok(())
}
