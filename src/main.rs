use rpassword::read_password;
use std::io;
use std::io::Write;
use std::path::PathBuf;
use structopt::StructOpt;
use wangov_sso::citizens::hash_password;
use wangov_sso::errors::SsoError;
use wangov_sso::sign::generate_rsa_pkcs8_pair;

fn get_password(prompt: &str) -> io::Result<String> {
    // Print the prompt without a newline and flush stdout
    print!("{}", prompt);
    io::stdout().flush()?;

    // Read password from stdin without echo
    let password = read_password()?;
    Ok(password)
}

fn read_password_from_file(path: &PathBuf) -> io::Result<String> {
    let contents = std::fs::read_to_string(path)?;
    Ok(contents.trim_end_matches(['\r', '\n']).to_string())
}

#[derive(Debug, Clone, StructOpt)]
#[structopt(name = "wangov-sso", about = "WanGov single sign-on broker")]
pub enum Command {
    /// Run the broker
    ///
    /// Release builds need ROCKET_SECRET_KEY (or `secret_key` in Rocket.toml)
    /// to encrypt session cookies.
    Serve {
        /// Issuer url advertised in discovery and ID tokens
        #[structopt(long)]
        issuer: Option<String>,
        /// Port to listen on
        #[structopt(short, long)]
        port: Option<u16>,
    },
    /// Print an argon2 hash for seeding the citizen registry
    HashPassword {
        /// Read the password from this file instead of prompting
        #[structopt(short, long)]
        password_file: Option<PathBuf>,
    },
    /// Write a fresh RSA signing key (PKCS#8 PEM)
    GenKey {
        #[structopt(short, long)]
        output: PathBuf,
    },
}

async fn serve(issuer: Option<String>, port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let mut figment = rocket::Config::figment();
    if let Some(port) = port {
        figment = figment.merge(("port", port));
    }
    let rocket = rocket::custom(figment);
    let mut config = wangov_sso::load_config(&rocket)?;
    if let Some(issuer) = issuer {
        config.issuer = issuer;
        config.validate()?;
    }
    wangov_sso::setup(rocket, config)?.launch().await?;
    Ok(())
}

fn hash(password_file: Option<PathBuf>) -> Result<(), SsoError> {
    let password = match password_file {
        Some(path) => read_password_from_file(&path)?,
        None => get_password("password: ")?,
    };
    if password.is_empty() {
        return Err(SsoError::InvalidRequest("password must not be empty".into()));
    }
    println!("{}", hash_password(&password)?);
    Ok(())
}

fn gen_key(output: PathBuf) -> Result<(), SsoError> {
    let (private_pem, _) = generate_rsa_pkcs8_pair()?;
    std::fs::write(&output, private_pem)?;
    println!("wrote signing key to {}", output.display());
    Ok(())
}

#[rocket::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    match Command::from_args() {
        Command::Serve { issuer, port } => serve(issuer, port).await?,
        Command::HashPassword { password_file } => hash(password_file)?,
        Command::GenKey { output } => gen_key(output)?,
    }
    Ok(())
}
