use clap::{Parser, Subcommand, ValueEnum};
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::json;
use std::fs;
use std::io;
use std::path::Path;

const TOKEN_FILE: &str = ".portal_token";

#[derive(Parser)]
#[command(name = "portal-cli")]
#[command(about = "CLI for the building portal API", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, env = "PORTAL_URL", default_value = "http://localhost:5000")]
    url: String,
}

#[derive(Subcommand)]
enum Commands {
    AdminSignUp {
        #[arg(short, long)]
        username: String,
        #[arg(short, long)]
        email: String,
        #[arg(short, long)]
        password: String,
    },
    AdminSignIn {
        #[arg(short, long)]
        email: String,
        #[arg(short, long)]
        password: String,
    },
    FlatSignIn {
        #[arg(short, long)]
        flat_number: String,
        #[arg(short, long)]
        phone: String,
    },
    /// Check the saved session against the admin or flat gate
    Verify {
        #[arg(value_enum)]
        kind: Principal,
    },
    SignOut,
    Buildings,
    Flats,
    Contributions {
        #[arg(short, long, default_value_t = 1)]
        page: usize,
        #[arg(short, long, default_value_t = 15)]
        limit: usize,
    },
}

#[derive(ValueEnum, Clone, Copy)]
enum Principal {
    Admin,
    Flat,
}

#[derive(Deserialize)]
struct Message {
    message: String,
}

/// The API only hands out tokens as a `token` cookie; read it back from Set-Cookie.
fn session_token(res: &Response) -> Option<String> {
    res.headers()
        .get_all(reqwest::header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find_map(|v| v.strip_prefix("token="))
        .and_then(|v| v.split(';').next())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn authorized(req: RequestBuilder) -> RequestBuilder {
    let token = fs::read_to_string(TOKEN_FILE).unwrap_or_default();
    req.header("Authorization", format!("Bearer {}", token.trim()))
}

/// Remove the saved token. `Ok(false)` when there was none to remove.
fn forget_token(path: &Path) -> anyhow::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(anyhow::Error::new(e).context(format!("failed to remove {}", path.display()))),
    }
}

async fn sign_in(res: Response) -> anyhow::Result<()> {
    if !res.status().is_success() {
        let body: Message = res.json().await?;
        println!("Sign-in failed: {}", body.message);
        return Ok(());
    }
    match session_token(&res) {
        Some(token) => {
            fs::write(TOKEN_FILE, token)?;
            println!("Signed in. Token saved to {}", TOKEN_FILE);
            println!("Response: {}", res.text().await?);
        }
        None => println!("Signed in, but the response carried no session cookie"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let client = Client::new();
    let api = format!("{}/api", cli.url.trim_end_matches('/'));

    match cli.command {
        Commands::AdminSignUp { username, email, password } => {
            let res = client
                .post(format!("{}/auth/admin-sign-up", api))
                .json(&json!({ "username": username, "email": email, "password": password }))
                .send()
                .await?;
            sign_in(res).await?;
        }
        Commands::AdminSignIn { email, password } => {
            let res = client
                .post(format!("{}/auth/admin-sign-in", api))
                .json(&json!({ "email": email, "password": password }))
                .send()
                .await?;
            sign_in(res).await?;
        }
        Commands::FlatSignIn { flat_number, phone } => {
            let res = client
                .post(format!("{}/auth/flat-sign-in", api))
                .json(&json!({ "flatNumber": flat_number, "phone": phone }))
                .send()
                .await?;
            sign_in(res).await?;
        }
        Commands::Verify { kind } => {
            let path = match kind {
                Principal::Admin => "admin-auth-verify",
                Principal::Flat => "flat-auth-verify",
            };
            let res = authorized(client.get(format!("{}/auth/{}", api, path))).send().await?;
            println!("{}: {}", res.status(), res.text().await?);
        }
        Commands::SignOut => {
            // Tokens stay valid until expiry; dropping the local copy is all sign-out does.
            if forget_token(Path::new(TOKEN_FILE))? {
                println!("Signed out (token removed).");
            } else {
                println!("Not signed in.");
            }
        }
        Commands::Buildings => {
            let res = authorized(client.get(format!("{}/buildings", api))).send().await?;
            println!("Response: {}", res.text().await?);
        }
        Commands::Flats => {
            let res = authorized(client.get(format!("{}/flats", api))).send().await?;
            println!("Response: {}", res.text().await?);
        }
        Commands::Contributions { page, limit } => {
            let res = authorized(client.get(format!("{}/contributions", api)))
                .query(&[("page", page), ("limit", limit)])
                .send()
                .await?;
            println!("Response: {}", res.text().await?);
        }
    }

    Ok(())
}
