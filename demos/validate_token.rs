// demos/validate_token.rs
//
// Validates a token passed as the first argument, using settings from
// `TOKEN_VALIDATOR_*` environment variables and an optional settings file
// named by `TOKEN_VALIDATOR_CONFIG`.
//
//   TOKEN_VALIDATOR_ISSUER=https://accounts.google.com \
//   TOKEN_VALIDATOR_AUDIENCE=my-client-id \
//   RUST_LOG=oidc_token_validator=debug \
//   cargo run --example validate_token -- "$TOKEN"

use oidc_token_validator::prelude::*;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let Some(token) = std::env::args().nth(1) else {
        eprintln!("usage: validate_token <token>");
        return ExitCode::from(2);
    };

    let file = std::env::var_os("TOKEN_VALIDATOR_CONFIG").map(PathBuf::from);
    let validator = match load_validator(file).await {
        Ok(validator) => validator,
        Err(e) => {
            error!("Failed to configure validator: {}", e);
            return ExitCode::from(2);
        }
    };
    info!("Validator ready: {:?}", validator);

    match validator.validate(&token).await {
        Ok(claims) => {
            match serde_json::to_string_pretty(&claims) {
                Ok(json) => println!("{json}"),
                Err(e) => error!("Failed to print claims: {}", e),
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(kind = ?e.kind(), "Token rejected: {}", e.detail());
            ExitCode::FAILURE
        }
    }
}

async fn load_validator(file: Option<PathBuf>) -> Result<TokenValidator, ConfigError> {
    let settings = ValidatorSettings::load(file.as_deref(), None)?;
    settings.into_validator().await
}
