//! Talka command-line client.

use std::sync::Arc;

use async_trait::async_trait;
use clap::Args;
use clap::Parser;
use clap::Subcommand;
use talka_client::config;
use talka_client::logging::init_logging;
use talka_client::logging::LogLevel;
use talka_client::processor::Processor;
use talka_client::processor::ProcessorBuilder;
use talka_client::processor::ProcessorConfig;
use talka_client::room::RoomCallback;
use talka_client::signaling::P2pEvents;
use talka_client::util;
use talka_core::ChatMessage;
use talka_core::FileTag;
use talka_core::PresenceEvent;
use talka_core::RoomMember;
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;

#[derive(Parser, Debug)]
#[command(about, version = util::build_version(), author)]
struct Cli {
    #[arg(long, value_enum, default_value = "info", env = "TALKA_LOG_LEVEL")]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct ConfigArgs {
    #[arg(long, short = 'c', env = "TALKA_CONFIG", default_value = config::DEFAULT_CONFIG_PATH)]
    config: String,
}

impl ConfigArgs {
    fn load_processor(&self) -> anyhow::Result<Processor> {
        let cfg = config::Config::read_fs(&self.config)?;
        let cfg: ProcessorConfig = cfg.try_into()?;
        Ok(ProcessorBuilder::from_config(&cfg).build()?)
    }
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
enum Command {
    /// Write a fresh config file with a generated identity.
    Init(InitCommand),
    #[command(subcommand)]
    Rooms(RoomsCommand),
    /// Join a room and chat interactively.
    Chat(ChatCommand),
    #[command(subcommand)]
    P2p(P2pCommand),
    #[command(subcommand)]
    Auth(AuthCommand),
}

#[derive(Args, Debug)]
struct InitCommand {
    /// Location of the config file.
    #[arg(long, short = 'l', default_value = config::DEFAULT_CONFIG_PATH)]
    location: String,
    /// Display name shown to other users.
    #[arg(long)]
    name: Option<String>,
    /// Base URL of the chat backend.
    #[arg(long, default_value = config::DEFAULT_ENDPOINT_URL)]
    endpoint: String,
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
enum RoomsCommand {
    /// List all rooms.
    List(ConfigArgs),
    /// Create a room.
    Create {
        #[command(flatten)]
        config_args: ConfigArgs,
        name: String,
        #[arg(long, default_value = "")]
        code: String,
    },
}

#[derive(Args, Debug)]
struct ChatCommand {
    #[command(flatten)]
    config_args: ConfigArgs,
    /// Room id to join; defaults to the general room.
    #[arg(long)]
    room: Option<String>,
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
enum P2pCommand {
    /// Request a direct session and chat once the peer accepts.
    Request {
        #[command(flatten)]
        config_args: ConfigArgs,
        target_user_id: String,
    },
    /// List requests waiting for you.
    Pending(ConfigArgs),
    /// Accept a pending request and chat.
    Accept {
        #[command(flatten)]
        config_args: ConfigArgs,
        session_id: String,
        /// Directly reachable address to hint to the peer.
        #[arg(long)]
        local_ip: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
enum AuthCommand {
    /// Create an account.
    Signup {
        #[command(flatten)]
        config_args: ConfigArgs,
        email: String,
        password: String,
        #[arg(long)]
        name: Option<String>,
    },
    /// Log in and persist the token in the config file.
    Login {
        #[command(flatten)]
        config_args: ConfigArgs,
        email: String,
        password: String,
    },
    /// Show the logged-in profile.
    Me(ConfigArgs),
    /// Start a password reset.
    Forgot {
        #[command(flatten)]
        config_args: ConfigArgs,
        email: String,
    },
}

/// Prints room traffic to stdout.
struct PrintRoomEvents;

#[async_trait]
impl RoomCallback for PrintRoomEvents {
    async fn on_message(&self, message: ChatMessage) {
        let stamp = chrono::Local::now().format("%H:%M:%S");
        match FileTag::parse(&message.text) {
            Some(tag) => {
                println!(
                    "[{}] {}: shared {} ({})",
                    stamp,
                    message.user_name,
                    tag.filename,
                    tag.download_path()
                );
            }
            None => println!("[{}] {}: {}", stamp, message.user_name, message.text),
        }
    }

    async fn on_room_users(&self, users: Vec<RoomMember>) {
        let names: Vec<String> = users
            .iter()
            .map(|u| u.user_name.clone().unwrap_or_else(|| u.user_id.clone()))
            .collect();
        println!("* online: {}", names.join(", "));
    }

    async fn on_presence(&self, event: PresenceEvent, user_id: String, user_name: Option<String>) {
        let name = user_name.unwrap_or(user_id);
        match event {
            PresenceEvent::Join => println!("* {} joined", name),
            PresenceEvent::Leave => println!("* {} left", name),
        }
    }

    async fn on_closed(&self) {
        println!("* room channel closed");
    }
}

/// Prints direct-session traffic to stdout.
struct PrintP2pEvents {
    closed: mpsc::Sender<()>,
}

#[async_trait]
impl P2pEvents for PrintP2pEvents {
    async fn on_ready(&self, sid: &str) {
        println!("* session {} ready, messages are end-to-end encrypted", sid);
    }

    async fn on_message(&self, _sid: &str, text: String) {
        println!("peer: {}", text);
    }

    async fn on_closed(&self, sid: &str) {
        println!("* session {} closed", sid);
        let _ = self.closed.send(()).await;
    }
}

fn init_command(args: InitCommand) -> anyhow::Result<()> {
    let mut cfg = config::Config::new();
    cfg.endpoint_url = args.endpoint;
    cfg.user_name = args.name;
    let path = cfg.write_fs(&args.location)?;
    println!("Your config file: {}", path);
    println!("Your user id: {}", cfg.user_id);
    Ok(())
}

async fn chat_repl(processor: &Processor, room_id: &str) -> anyhow::Result<()> {
    processor
        .switch_room(room_id, Arc::new(PrintRoomEvents))
        .await?;
    println!("Joined room {}. Type messages, or /quit to leave.", room_id);

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();
                if line == "/quit" {
                    break;
                }
                if line.is_empty() {
                    continue;
                }
                if let Err(e) = processor.send_text(line).await {
                    eprintln!("send failed: {}", e);
                }
            }
        }
    }

    processor.shutdown().await;
    Ok(())
}

async fn p2p_repl(
    processor: &Processor,
    session: Arc<talka_client::signaling::P2pSession>,
    mut closed: mpsc::Receiver<()>,
) -> anyhow::Result<()> {
    println!("Type messages, or /quit to end the session.");
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = closed.recv() => break,
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();
                if line == "/quit" {
                    break;
                }
                if line.is_empty() {
                    continue;
                }
                if let Err(e) = session.send_text(line).await {
                    eprintln!("send failed: {}", e);
                }
            }
        }
    }

    let _ = processor.close_p2p(session.sid()).await;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.log_level);

    match cli.command {
        Command::Init(args) => init_command(args),

        Command::Rooms(RoomsCommand::List(config_args)) => {
            let processor = config_args.load_processor()?;
            for room in processor.list_rooms().await? {
                println!("{}  {}", room.id, room.name);
            }
            Ok(())
        }

        Command::Rooms(RoomsCommand::Create {
            config_args,
            name,
            code,
        }) => {
            let processor = config_args.load_processor()?;
            let room = processor.create_room(&name, &code).await?;
            println!("Created room {} ({})", room.name, room.id);
            Ok(())
        }

        Command::Chat(args) => {
            let processor = args.config_args.load_processor()?;
            let room_id = match args.room {
                Some(room) => room,
                None => processor.ensure_general_room().await?.id,
            };
            chat_repl(&processor, &room_id).await
        }

        Command::P2p(P2pCommand::Pending(config_args)) => {
            let processor = config_args.load_processor()?;
            for pending in processor.pending_p2p().await? {
                println!(
                    "{}  from {}",
                    pending.session_id,
                    pending.user_name.or(pending.user_id).unwrap_or_default()
                );
            }
            Ok(())
        }

        Command::P2p(P2pCommand::Request {
            config_args,
            target_user_id,
        }) => {
            let (closed_tx, closed_rx) = mpsc::channel(1);
            let cfg = config::Config::read_fs(&config_args.config)?;
            let cfg: ProcessorConfig = cfg.try_into()?;
            let processor = ProcessorBuilder::from_config(&cfg)
                .p2p_events(Arc::new(PrintP2pEvents { closed: closed_tx }))
                .build()?;

            let session = processor.request_p2p(&target_user_id).await?;
            println!("Requested session {}. Waiting for accept.", session.sid());
            session.connect_as_initiator().await?;
            p2p_repl(&processor, session, closed_rx).await
        }

        Command::P2p(P2pCommand::Accept {
            config_args,
            session_id,
            local_ip,
        }) => {
            let (closed_tx, closed_rx) = mpsc::channel(1);
            let cfg = config::Config::read_fs(&config_args.config)?;
            let cfg: ProcessorConfig = cfg.try_into()?;
            let processor = ProcessorBuilder::from_config(&cfg)
                .p2p_events(Arc::new(PrintP2pEvents { closed: closed_tx }))
                .build()?;

            let session = processor.adopt_p2p(&session_id);
            session.connect_as_responder(local_ip.as_deref()).await?;
            p2p_repl(&processor, session, closed_rx).await
        }

        Command::Auth(AuthCommand::Signup {
            config_args,
            email,
            password,
            name,
        }) => {
            let processor = config_args.load_processor()?;
            processor.signup(&email, &password, name.as_deref()).await?;
            println!("Account created. Check your inbox for a confirmation mail.");
            Ok(())
        }

        Command::Auth(AuthCommand::Login {
            config_args,
            email,
            password,
        }) => {
            let processor = config_args.load_processor()?;
            let token = processor.login(&email, &password).await?;

            let mut cfg = config::Config::read_fs(&config_args.config)?;
            cfg.token = Some(token.access_token);
            cfg.write_fs(&config_args.config)?;
            println!("Logged in.");
            Ok(())
        }

        Command::Auth(AuthCommand::Me(config_args)) => {
            let processor = config_args.load_processor()?;
            let profile = processor.me().await?;
            println!(
                "{}  {}",
                profile.id,
                profile.display_name.or(profile.email).unwrap_or_default()
            );
            Ok(())
        }

        Command::Auth(AuthCommand::Forgot { config_args, email }) => {
            let processor = config_args.load_processor()?;
            processor.forgot_password(&email).await?;
            println!("Reset mail sent if the address exists.");
            Ok(())
        }
    }
}
