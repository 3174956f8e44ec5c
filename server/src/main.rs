use clap::Parser;
use log::{error, info};
use server::network::{Server, ServerConfig, DEFAULT_MOTD};
use server::storage::SnapshotStorage;

/// Parses command-line arguments, seeds any requested logins and serves
/// clients until Ctrl-C.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Command line arguments
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// Server IP address to bind to
        #[clap(short = 'H', long, default_value = "0.0.0.0")]
        host: String,
        /// Server port to listen on
        #[clap(short, long, default_value = "14902")]
        port: u16,
        /// Snapshot file holding logins and the persisted world
        #[clap(short, long, default_value = "server.db")]
        database: String,
        /// Log level (error, warn, info, debug, trace)
        #[clap(short, long, default_value = "info")]
        log_level: String,
        /// Launcher banner text
        #[clap(long, default_value = DEFAULT_MOTD)]
        motd: String,
        /// Login to create or replace, as NAME:PASSWORD (repeatable)
        #[clap(short, long = "user", value_name = "NAME:PASSWORD")]
        users: Vec<String>,
    }

    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.log_level.parse()?)
        .parse_default_env()
        .init();

    let mut storage = SnapshotStorage::open(&args.database)?;
    for user in &args.users {
        let Some((name, password)) = user.split_once(':') else {
            return Err(format!("--user expects NAME:PASSWORD, got {user:?}").into());
        };
        storage.add_login(name, password)?;
        info!("Stored login for {}", name);
    }

    let config = ServerConfig {
        bind_addr: format!("{}:{}", args.host, args.port),
        motd: args.motd,
    };
    let server = match Server::bind(config, Box::new(storage)).await {
        Ok(server) => server,
        Err(e) => {
            error!("Failed to start server: {}", e);
            return Err(e);
        }
    };

    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl+C: {}", e);
            }
        })
        .await;

    Ok(())
}
