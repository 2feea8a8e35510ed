use std::error::Error;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use kv_ring_core::config::RingConfig;
use kv_ring_core::log::init_logging;
use kv_ring_core::{FileNodeStore, NodeSettings, RingNode, ShutdownCoordinator, TcpTransport};

use protocol::{Command, RespValue};

mod client;
mod protocol;

#[cfg(test)]
mod protocol_tests;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args: Vec<String> = std::env::args().collect();

    let mut config_path = None;
    let mut node_id = None;
    let mut address = None;
    let mut client_address = None;
    let mut contact = None;
    let mut data_dir = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "client" => {
                return client::run_client(args.get(i + 1).cloned()).await;
            }
            "--help" => {
                print_usage();
                return Ok(());
            }
            flag @ ("--config" | "--id" | "--address" | "--client-address" | "--join" | "--data-dir") => {
                let Some(value) = args.get(i + 1).cloned() else {
                    eprintln!("Error: {} requires a value", flag);
                    return Err(format!("Missing value for {}", flag).into());
                };
                match flag {
                    "--config" => config_path = Some(value),
                    "--id" => {
                        node_id = Some(value.parse::<u64>().map_err(|_| format!("Invalid node id '{}'", value))?)
                    }
                    "--address" => address = Some(value),
                    "--client-address" => client_address = Some(value),
                    "--join" => contact = Some(value),
                    _ => data_dir = Some(value),
                }
                i += 1;
            }
            other => {
                eprintln!("Unknown argument: {}", other);
                print_usage();
                return Err("Invalid arguments".into());
            }
        }
        i += 1;
    }

    let mut config = load_config(config_path.as_deref())?;
    if let Some(id) = node_id {
        config.node.id = id;
    }
    if let Some(address) = address {
        config.node.address = address;
    }
    if let Some(client_address) = client_address {
        config.node.client_address = client_address;
    }
    if let Some(data_dir) = data_dir {
        config.node.data_dir = data_dir;
    }
    if contact.is_some() {
        config.node.contact = contact;
    }

    if let Err(errors) = config.validate() {
        for error in &errors {
            eprintln!("Configuration error: {}", error);
        }
        return Err("Invalid configuration".into());
    }

    init_logging(&config.logging);
    run_node(config).await
}

fn load_config(path: Option<&str>) -> Result<RingConfig, Box<dyn Error>> {
    match path {
        Some(path) if path.ends_with(".yaml") || path.ends_with(".yml") => RingConfig::from_yaml_file(path),
        Some(path) => RingConfig::from_file(path),
        None => Ok(RingConfig::default()),
    }
}

async fn run_node(config: RingConfig) -> Result<(), Box<dyn Error>> {
    let node = RingNode::new(
        NodeSettings::from_config(&config),
        Arc::new(TcpTransport::new()),
        Arc::new(FileNodeStore::new(&config.node.data_dir)),
    );

    match &config.node.contact {
        Some(contact) => node.join(contact).await?,
        None => node.join_first().await?,
    }

    let listener = TcpListener::bind(&config.node.client_address).await?;
    tracing::info!(
        node_id = node.id(),
        address = %node.address(),
        client_address = %config.node.client_address,
        "Ring node ready"
    );

    let shutdown = ShutdownCoordinator::new(config.timeout_duration() * 4);
    shutdown.start();

    tokio::select! {
        result = handle_client_connections(listener, Arc::clone(&node)) => result.map_err(|e| e as Box<dyn Error>)?,
        outcome = shutdown.leave_on_shutdown(Arc::clone(&node)) => {
            tracing::info!(node_id = node.id(), outcome = ?outcome, "Node stopped");
        }
    }

    Ok(())
}

async fn handle_client_connections(
    listener: TcpListener,
    node: Arc<RingNode>,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    loop {
        let (socket, peer) = listener.accept().await?;
        tracing::debug!(peer = %peer, "Client connected");

        let node = Arc::clone(&node);
        tokio::spawn(async move {
            if let Err(e) = handle_client(socket, node).await {
                tracing::warn!(peer = %peer, error = %e, "Client connection failed");
            }
        });
    }
}

async fn handle_client(mut socket: TcpStream, node: Arc<RingNode>) -> Result<(), Box<dyn Error + Send + Sync>> {
    let (reader, mut writer) = socket.split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        let bytes_read = reader.read_line(&mut line).await?;
        if bytes_read == 0 {
            break;
        }
        if line.trim().is_empty() {
            continue;
        }

        let (response, quit) = match Command::parse(&line) {
            Ok(Command::Quit) => (RespValue::SimpleString("BYE".to_string()), true),
            Ok(command) => (process_command(command, &node).await, false),
            Err(message) => (RespValue::Error(message), false),
        };

        writer.write_all(response.encode().as_bytes()).await?;
        writer.flush().await?;

        if quit {
            break;
        }
    }

    Ok(())
}

pub(crate) async fn process_command(command: Command, node: &RingNode) -> RespValue {
    match command {
        Command::Get(key) => match node.get(key).await {
            Ok(value) => RespValue::BulkString(value),
            Err(e) => RespValue::from_error(&e),
        },
        Command::Put(key, value) => match node.put(key, value).await {
            Ok(_) => RespValue::ok(),
            Err(e) => RespValue::from_error(&e),
        },
        Command::Del(key) => match node.delete(key).await {
            Ok(removed) => RespValue::Integer(i64::from(removed)),
            Err(e) => RespValue::from_error(&e),
        },
        Command::Peers => {
            let view = node.view().await;
            RespValue::Array(
                view.peers
                    .iter()
                    .map(|(id, address)| RespValue::BulkString(Some(format!("{} {}", id, address))))
                    .collect(),
            )
        }
        Command::Status => match node.status().await.to_json() {
            Ok(json) => RespValue::BulkString(Some(json)),
            Err(e) => RespValue::from_error(&e),
        },
        Command::Quit => RespValue::SimpleString("BYE".to_string()),
    }
}

fn print_usage() {
    println!("Ring KV Store Node");
    println!();
    println!("Usage:");
    println!("  kv_ring_server [OPTIONS]            Start a ring node");
    println!("  kv_ring_server client [ADDRESS]     Start the interactive client");
    println!();
    println!("Options:");
    println!("  --config <PATH>              Configuration file (.toml, .yaml or .yml)");
    println!("  --id <ID>                    Ring position of this node");
    println!("  --address <HOST:PORT>        Inter-node RPC address");
    println!("  --client-address <HOST:PORT> Client command address");
    println!("  --join <HOST:PORT>           Join the ring through an existing member");
    println!("  --data-dir <PATH>            Directory for the node's record files");
    println!("  --help                       Show this help message");
    println!();
    println!("Client commands:");
    println!("  GET <key>, PUT <key> <value>, DEL <key>, PEERS, STATUS, QUIT");
}
