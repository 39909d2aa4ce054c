//! tdbridge-app: interactive login + echo demo.
//!
//! Supports both user accounts and bot tokens. Credentials come from the
//! environment:
//!
//! ```text
//! TDBRIDGE_API_ID=...  TDBRIDGE_API_HASH=...  \
//! TDBRIDGE_BOT_TOKEN=... (or TDBRIDGE_PHONE=..., or neither to be asked) \
//! TDBRIDGE_DATA_DIR=./tdlib \
//!   cargo run -p tdbridge-app --features tdjson
//! ```

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tdbridge_client::{Authenticator, Client, Config, Credential, HandlerResult, InvocationError, Subscription};
use tdbridge_types::functions::{GetMe, SendMessage, SetTdlibParameters};
use tdbridge_types::{AuthorizationState, TdError, Update, types};

#[tokio::main]
async fn main() {
    // Enable logging: RUST_LOG=tdbridge_client=debug cargo run -p tdbridge-app
    if std::env::var("RUST_LOG").is_err() {
        // SAFETY: single-threaded at this point, no other threads reading env
        unsafe { std::env::set_var("RUST_LOG", "tdbridge_client=info,tdbridge_app=info"); }
    }
    env_logger::init();

    if let Err(e) = run().await {
        eprintln!("\n✗ {e}");
        std::process::exit(1);
    }
}

// ─── Settings ─────────────────────────────────────────────────────────────────

struct Settings {
    api_id:    i32,
    api_hash:  String,
    bot_token: Option<String>,
    phone:     Option<String>,
    data_dir:  String,
}

impl Settings {
    fn from_env() -> Result<Self, String> {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        let api_id = var("TDBRIDGE_API_ID")
            .ok_or("TDBRIDGE_API_ID is not set (get one at https://my.telegram.org)")?
            .parse()
            .map_err(|e| format!("TDBRIDGE_API_ID: {e}"))?;
        Ok(Self {
            api_id,
            api_hash:  var("TDBRIDGE_API_HASH").ok_or("TDBRIDGE_API_HASH is not set")?,
            bot_token: var("TDBRIDGE_BOT_TOKEN"),
            phone:     var("TDBRIDGE_PHONE"),
            data_dir:  var("TDBRIDGE_DATA_DIR").unwrap_or_else(|| "tdlib".into()),
        })
    }
}

// ─── Login prompts ────────────────────────────────────────────────────────────

struct Console {
    settings: Settings,
}

#[async_trait]
impl Authenticator for Console {
    async fn tdlib_parameters(&self) -> Result<SetTdlibParameters, InvocationError> {
        let s = &self.settings;
        let mut params = SetTdlibParameters::new(s.api_id, s.api_hash.clone(), s.data_dir.clone());
        params.device_model = "tdbridge-app".into();
        Ok(params)
    }

    async fn credential(&self) -> Result<Credential, InvocationError> {
        if let Some(token) = &self.settings.bot_token {
            println!("🤖 Signing in as bot …");
            return Ok(Credential::BotToken(token.clone()));
        }
        let phone = match &self.settings.phone {
            Some(phone) => phone.clone(),
            None => prompt("Phone number (international format): ").await?,
        };
        println!("📱 Sending login code to {phone} …");
        Ok(Credential::PhoneNumber(phone))
    }

    async fn code(&self, code_info: &Value) -> Result<String, InvocationError> {
        let via = code_info["type"]["@type"].as_str().unwrap_or("unknown channel");
        prompt(&format!("Enter the code you received ({via}): ")).await
    }

    async fn password(&self, hint: &str) -> Result<String, InvocationError> {
        let hint = if hint.is_empty() { "(no hint)" } else { hint };
        prompt(&format!("2FA password (hint: {hint}): ")).await
    }

    async fn registration(&self, _terms: &Value) -> Result<(String, String), InvocationError> {
        println!("This number is not registered yet.");
        let first = prompt("First name: ").await?;
        let last  = prompt("Last name (optional): ").await?;
        Ok((first, last))
    }

    async fn rejected(&self, state: &AuthorizationState, error: &TdError) {
        eprintln!("✗ {state}: {}", error.message);
    }
}

async fn prompt(msg: &str) -> Result<String, InvocationError> {
    let msg = msg.to_string();
    tokio::task::spawn_blocking(move || -> io::Result<String> {
        print!("{msg}");
        io::stdout().flush()?;
        let mut line = String::new();
        io::stdin().lock().read_line(&mut line)?;
        Ok(line.trim().to_string())
    })
    .await
    .map_err(|e| InvocationError::Initialization(format!("prompt task failed: {e}")))?
    .map_err(|e| InvocationError::Initialization(format!("cannot read stdin: {e}")))
}

// ─── Main flow ────────────────────────────────────────────────────────────────

#[cfg(feature = "tdjson")]
fn make_client(config: Config) -> Result<Client, InvocationError> {
    Client::create(config)
}

#[cfg(not(feature = "tdjson"))]
fn make_client(_config: Config) -> Result<Client, InvocationError> {
    Err(InvocationError::Initialization(
        "built without libtdjson; rerun with `--features tdjson`".into(),
    ))
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::from_env()?;

    let client = make_client(Config {
        authenticator: Some(Arc::new(Console { settings })),
        ..Default::default()
    })?;

    client.add_handler(Subscription::on("updateNewMessage"), echo);

    client.start().await?;
    client.wait_until_ready().await?;

    let me = client.invoke(&GetMe {}).await?;
    println!("✅ Logged in as {} (id={})", me.full_name(), me.id);
    println!("\n👂 Listening for messages (Ctrl+C to quit) …\n");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => println!("\n👋 Shutting down …"),
        _ = client.wait_stopped()   => println!("\nTDLib closed the session."),
    }
    client.stop().await;
    Ok(())
}

// ─── Echo handler ─────────────────────────────────────────────────────────────

async fn echo(client: Client, update: Arc<Update>) -> HandlerResult {
    let Some(raw) = update.get("message") else { return Ok(()) };
    let msg: types::Message = serde_json::from_value(raw.clone())?;
    if msg.is_outgoing {
        return Ok(());
    }
    let Some(text) = msg.text() else { return Ok(()) };

    let when = DateTime::<Utc>::from_timestamp(i64::from(msg.date), 0)
        .map(|t| t.format("%H:%M:%S").to_string())
        .unwrap_or_default();
    println!("📨 [{when}] chat {}: {text}", msg.chat_id);

    let reply = match text {
        "/time" => Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        _       => format!("Echo: {text}"),
    };
    client.invoke(&SendMessage::text(msg.chat_id, reply)).await?;
    Ok(())
}
