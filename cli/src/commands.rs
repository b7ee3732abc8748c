use anyhow::Result;
use clap::ArgAction;
use clap::Args;
use clap::Parser;
use clap::Subcommand;
use covhub_hub::HubClient;
use covhub_hub::HubOptions;
use covhub_hub::ProfileRequest;
use covhub_hub::run_hub;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "covhub", about = "Distributed code coverage collection")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the central coverage hub.
    Server(ServerArgs),
    /// Register one (service, address) pair by hand.
    Register(RegisterArgs),
    /// List every registered service and its agent addresses.
    List(CenterArgs),
    /// Fetch and merge the selected agents' profiles.
    Profile(ProfileArgs),
    /// Zero the counters of the selected agents.
    Clear(SelectArgs),
    /// Wipe the whole service registry.
    Init(CenterArgs),
    /// Deregister agent addresses from every service.
    Remove(RemoveArgs),
}

#[derive(Debug, Args)]
pub struct ServerArgs {
    /// Listen port.
    #[arg(long, default_value_t = 7777)]
    pub port: u16,

    /// Persist the registry to this file; in-memory when omitted.
    #[arg(long = "store")]
    pub store: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct CenterArgs {
    /// Base URL of the coverage hub.
    #[arg(long, default_value = "http://127.0.0.1:7777")]
    pub center: String,
}

#[derive(Debug, Args)]
pub struct RegisterArgs {
    #[command(flatten)]
    pub center: CenterArgs,

    /// Service name to register.
    #[arg(long)]
    pub name: String,

    /// Agent address, e.g. http://10.0.0.1:8000.
    #[arg(long)]
    pub address: String,
}

#[derive(Debug, Args)]
pub struct SelectArgs {
    #[command(flatten)]
    pub center: CenterArgs,

    /// Continue past unknown services and unreachable agents.
    #[arg(long)]
    pub force: bool,

    /// Select by service name (repeatable).
    #[arg(long = "service", action = ArgAction::Append)]
    pub service: Vec<String>,

    /// Select by agent address (repeatable).
    #[arg(long = "address", action = ArgAction::Append)]
    pub address: Vec<String>,
}

#[derive(Debug, Args)]
pub struct ProfileArgs {
    #[command(flatten)]
    pub select: SelectArgs,

    /// Keep only files matching this pattern (repeatable).
    #[arg(long = "coverfile", action = ArgAction::Append)]
    pub coverfile: Vec<String>,

    /// Drop files matching this pattern (repeatable).
    #[arg(long = "skipfile", action = ArgAction::Append)]
    pub skipfile: Vec<String>,

    /// Write the merged profile here instead of stdout.
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct RemoveArgs {
    #[command(flatten)]
    pub center: CenterArgs,

    /// Agent address to deregister (repeatable).
    #[arg(long = "address", action = ArgAction::Append, required = true)]
    pub address: Vec<String>,
}

impl SelectArgs {
    fn request(&self) -> ProfileRequest {
        ProfileRequest {
            force: self.force,
            service: self.service.clone(),
            address: self.address.clone(),
            ..ProfileRequest::default()
        }
    }
}

pub async fn run_command(command: Command) -> Result<()> {
    match command {
        Command::Server(args) => {
            run_hub(HubOptions {
                port: args.port,
                store_path: args.store,
            })
            .await
        }
        Command::Register(args) => {
            let reply = HubClient::new(&args.center.center)?
                .register_service(&args.name, &args.address)
                .await?;
            println!("{reply}");
            Ok(())
        }
        Command::List(args) => {
            let services = HubClient::new(&args.center)?.list_services().await?;
            let mut names: Vec<&String> = services.keys().collect();
            names.sort();
            for name in names {
                println!("{name}: {}", services[name].join(", "));
            }
            Ok(())
        }
        Command::Profile(args) => {
            let mut request = args.select.request();
            request.coverfile = args.coverfile;
            request.skipfile = args.skipfile;
            let profile = HubClient::new(&args.select.center.center)?
                .profile(&request)
                .await?;
            match args.output {
                Some(path) => std::fs::write(path, profile)?,
                None => print!("{profile}"),
            }
            Ok(())
        }
        Command::Clear(args) => {
            let reply = HubClient::new(&args.center.center)?
                .clear(&args.request())
                .await?;
            println!("{reply}");
            Ok(())
        }
        Command::Init(args) => {
            HubClient::new(&args.center)?.init_system().await?;
            println!("init success");
            Ok(())
        }
        Command::Remove(args) => {
            let reply = HubClient::new(&args.center.center)?
                .remove_services(&args.address)
                .await?;
            println!("{reply}");
            Ok(())
        }
    }
}
