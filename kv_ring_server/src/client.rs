use std::error::Error;
use std::io::{self, Write};
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_util::codec::FramedRead;

use crate::protocol::{RespCodec, RespValue};

pub const DEFAULT_CLIENT_ADDRESS: &str = "127.0.0.1:6100";

pub async fn run_client(address: Option<String>) -> Result<(), Box<dyn Error>> {
    let address = address.unwrap_or_else(|| DEFAULT_CLIENT_ADDRESS.to_string());
    println!("Connecting to ring node at {}...", address);

    let mut stream = TcpStream::connect(&address).await?;
    println!("Connected! Type commands (GET k, PUT k v, DEL k, PEERS, STATUS, QUIT):");

    let (reader, mut writer) = stream.split();
    let mut replies = FramedRead::new(reader, RespCodec);
    let mut line = String::new();

    loop {
        print!("ring> ");
        io::stdout().flush()?;

        line.clear();
        let bytes_read = std::io::stdin().read_line(&mut line)?;
        if bytes_read == 0 {
            break;
        }

        let command = line.trim();
        if command.is_empty() {
            continue;
        }

        writer.write_all(format!("{}\r\n", command).as_bytes()).await?;
        writer.flush().await?;

        match replies.next().await {
            Some(reply) => display_response(&reply?),
            None => {
                println!("Connection closed by server");
                break;
            }
        }

        if command.eq_ignore_ascii_case("QUIT") {
            break;
        }
    }

    println!("Goodbye!");
    Ok(())
}

pub fn render_response(response: &RespValue) -> String {
    match response {
        RespValue::SimpleString(s) => s.clone(),
        RespValue::Error(e) => format!("ERROR: {}", e),
        RespValue::Integer(i) => format!("(integer) {}", i),
        RespValue::BulkString(Some(s)) => s.clone(),
        RespValue::BulkString(None) => "(nil)".to_string(),
        RespValue::Array(items) if items.is_empty() => "(empty array)".to_string(),
        RespValue::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, item)| format!("{}) {}", i + 1, render_response(item)))
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

fn display_response(response: &RespValue) {
    println!("{}", render_response(response));
}
