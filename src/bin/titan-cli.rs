use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde_json::Value;

use titan::client::Client;
use titan::net::tls::client_config;

#[derive(Parser)]
#[command(name = "titan-cli")]
#[command(about = "Command line client for the titan gateway", long_about = None)]
struct Cli {
    /// Server address.
    #[arg(short, long, default_value = "127.0.0.1:3001")]
    addr: String,

    /// Name the server certificate must be valid for.
    #[arg(long, default_value = "localhost")]
    server_name: String,

    /// CA bundle (PEM) used to verify the server.
    #[arg(long, default_value = "ca.pem")]
    ca: PathBuf,

    /// Client certificate (PEM) for mutual TLS.
    #[arg(long, requires = "key")]
    cert: Option<PathBuf>,

    /// Client private key (PEM) for mutual TLS.
    #[arg(long, requires = "cert")]
    key: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a keepalive frame
    Ping,
    /// Send the close frame and wait for the server to hang up
    Close,
    /// Authenticate with a bearer token
    Token { token: String },
    /// Log in with a Google token and print the issued bearer token
    Google { token: String },
    /// Authenticate with the client certificate
    Cert,
    /// Authenticate, then call a method
    Call {
        method: String,
        /// JSON params.
        params: Option<String>,
        /// Bearer token; the client certificate is used when omitted.
        #[arg(long)]
        token: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let ca = std::fs::read(&cli.ca)?;
    let identity = match (&cli.cert, &cli.key) {
        (Some(cert), Some(key)) => Some((std::fs::read(cert)?, std::fs::read(key)?)),
        _ => None,
    };
    let tls = client_config(
        &ca,
        identity.as_ref().map(|(cert, key)| (cert.as_slice(), key.as_slice())),
    )?;

    let mut client = Client::connect(cli.addr.as_str(), &cli.server_name, tls).await?;

    match cli.command {
        Commands::Ping => {
            client.ping().await?;
            println!("ping sent");
        }
        Commands::Close => {
            client.close().await?;
            println!("closed");
        }
        Commands::Token { token } => print_json(&client.auth_token(&token).await?)?,
        Commands::Google { token } => println!("{}", client.auth_google(&token).await?),
        Commands::Cert => print_json(&client.auth_cert().await?)?,
        Commands::Call { method, params, token } => {
            match token {
                Some(token) => client.auth_token(&token).await?,
                None => client.auth_cert().await?,
            };
            let params = params.map(|p| serde_json::from_str::<Value>(&p)).transpose()?;
            print_json(&client.call(&method, params).await?)?;
        }
    }

    Ok(())
}

fn print_json(value: &Value) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
