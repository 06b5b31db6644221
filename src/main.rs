use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use clap::Parser;
use clap_derive::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, Level};
use udpshell::client::Client;
use udpshell::config::{ClientConfig, ServerConfig};
use udpshell::progress::ProgressListener;
use udpshell::server::Server;
use udpshell::shell::GOODBYE;

#[derive(Parser)]
struct Args {
    #[clap(subcommand)]
    mode: Mode,

    #[clap(short, long, default_value_t = false, global = true)]
    verbose: bool,

    #[clap(long, default_value_t = false, global = true)]
    very_verbose: bool,
}

#[derive(Subcommand)]
enum Mode {
    /// Serve the shell on a UDP port
    Server {
        #[clap(long, default_value_t = ServerConfig::default_addr())]
        addr: SocketAddr,

        /// initial working directory for every peer, defaults to the current directory
        #[clap(long)]
        root: Option<PathBuf>,
    },
    /// Connect to a server and run commands from stdin
    Client {
        #[clap(long, default_value_t = ClientConfig::default_server_addr())]
        server: SocketAddr,
    },
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match (args.verbose, args.very_verbose) {
        (_, true) => Level::TRACE,
        (true, _) => Level::DEBUG,
        (false, false) => Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .try_init()
        .ok();

    match args.mode {
        Mode::Server { addr, root } => {
            let root = match root {
                Some(root) => root,
                None => std::env::current_dir()?,
            };
            let (mut server, local_addr) = Server::bind(ServerConfig::new(addr, root)).await?;
            info!("server listening on {:?}", local_addr);
            server.run().await
        }
        Mode::Client { server } => {
            let config = ClientConfig::new(server, std::env::current_dir()?);
            let client = Client::connect(config).await?
                .with_progress(Arc::new(BarProgress::default()));
            run_client(client).await
        }
    }
}

async fn run_client(client: Client) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("[server] >> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            return Ok(());
        };

        match client.execute(&line).await {
            Ok(Some(response)) => {
                println!("{}", response);
                if response == GOODBYE {
                    return Ok(());
                }
            }
            Ok(None) => {}
            Err(e) => {
                error!("{:#}", e);
                println!("error: {:#}", e);
            }
        }
    }
}

/// Shows a transfer's progress on the terminal. The bar is created on the first notification
///  because only then the total size is known (or known to be unknown).
#[derive(Default)]
struct BarProgress {
    bar: Mutex<Option<ProgressBar>>,
}

impl BarProgress {
    fn new_bar(total: Option<u64>) -> ProgressBar {
        match total {
            Some(total) => {
                let bar = ProgressBar::new(total);
                let style = ProgressStyle::default_bar()
                    .template("[{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("#>-");
                bar.set_style(style);
                bar
            }
            None => ProgressBar::new_spinner(),
        }
    }
}

impl ProgressListener for BarProgress {
    fn on_progress(&self, done: u64, total: Option<u64>) {
        if let Ok(mut bar) = self.bar.lock() {
            bar.get_or_insert_with(|| Self::new_bar(total))
                .set_position(done);
        }
    }

    fn on_finished(&self, _done: u64) {
        if let Ok(mut bar) = self.bar.lock() {
            if let Some(bar) = bar.take() {
                bar.finish_and_clear();
            }
        }
    }
}
