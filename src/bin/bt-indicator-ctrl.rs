use anyhow::{bail, Result};
use bt_indicator::ipc::{IpcClient, IpcReply, IpcRequest};
use clap::{Parser, Subcommand};

/// Control utility for bt-indicator
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Open the Bluetooth menu
    Show,
    /// Close the Bluetooth menu
    Hide,
    /// Print the indicator state as JSON
    Status,
    /// Connect or disconnect a device
    Toggle {
        /// BlueZ object path, e.g. /org/bluez/hci0/dev_AA_BB_CC_DD_EE_FF
        path: String,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let request = match args.command {
        Commands::Show => IpcRequest::Show,
        Commands::Hide => IpcRequest::Hide,
        Commands::Status => IpcRequest::Status,
        Commands::Toggle { path } => IpcRequest::Toggle(path),
    };

    match IpcClient::send(&request)? {
        IpcReply::Ok => println!("OK"),
        IpcReply::Json(json) => println!("{}", json),
        IpcReply::Error(message) => bail!("{}", message),
    }

    Ok(())
}
