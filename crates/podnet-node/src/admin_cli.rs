//! pod-admin CLI tool
//!
//! Talks to a running pod node over its peer channel.
//!
//! Usage:
//!   pod-admin ping
//!   pod-admin peers
//!   pod-admin balance <address>
//!   pod-admin send <address> <amount>
//!   pod-admin wipe

use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::time::Duration;

use podnet_ledger::Address;
use podnet_protocols::Message;

/// Submissions wait for the full validation round trip.
const READ_TIMEOUT: Duration = Duration::from_secs(120);

fn print_usage() {
    eprintln!("pod-admin - Inspect and drive a pod node");
    eprintln!();
    eprintln!("Usage:");
    eprintln!("  pod-admin ping                      Check if the node is running");
    eprintln!("  pod-admin peers                     List known pods");
    eprintln!("  pod-admin balance <address>         Show an account balance");
    eprintln!("  pod-admin send <address> <amount>   Send from the node's wallet");
    eprintln!("  pod-admin wipe                      Clear ledgers and peers");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  POD_ADMIN_ADDR  Node to talk to (default: 127.0.0.1:6001)");
}

fn node_addr() -> String {
    std::env::var("POD_ADMIN_ADDR").unwrap_or_else(|_| "127.0.0.1:6001".to_string())
}

fn send_command(message: &Message) -> Result<Message, String> {
    let addr = node_addr();

    let mut stream = TcpStream::connect(&addr).map_err(|e| {
        format!(
            "Failed to connect to pod-node at {}: {}\n\
             Is the pod-node running?",
            addr, e
        )
    })?;
    stream
        .set_read_timeout(Some(READ_TIMEOUT))
        .map_err(|e| e.to_string())?;

    let json = serde_json::to_string(message).map_err(|e| e.to_string())?;
    writeln!(stream, "{}", json).map_err(|e| e.to_string())?;

    let mut reader = BufReader::new(&stream);
    let mut response_line = String::new();
    reader
        .read_line(&mut response_line)
        .map_err(|e| e.to_string())?;

    serde_json::from_str(&response_line).map_err(|e| format!("Invalid response: {}", e))
}

fn parse_address(arg: &str) -> Address {
    match Address::parse(arg) {
        Ok(address) => address,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

fn main() {
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        print_usage();
        std::process::exit(1);
    }

    let message = match args[1].as_str() {
        "ping" => Message::Ping,
        "peers" => Message::QueryPeers,
        "balance" => {
            if args.len() < 3 {
                eprintln!("Error: balance requires an address argument");
                std::process::exit(1);
            }
            Message::QueryBalance {
                address: parse_address(&args[2]),
            }
        }
        "send" => {
            if args.len() < 4 {
                eprintln!("Error: send requires an address and an amount");
                std::process::exit(1);
            }
            let amount = match args[3].parse::<u64>() {
                Ok(amount) => amount,
                Err(_) => {
                    eprintln!("Error: amount must be a non-negative integer");
                    std::process::exit(1);
                }
            };
            Message::SubmitTransaction {
                address: parse_address(&args[2]),
                amount,
            }
        }
        "wipe" => Message::Wipe,
        "-h" | "--help" | "help" => {
            print_usage();
            std::process::exit(0);
        }
        other => {
            eprintln!("Unknown command: {}", other);
            print_usage();
            std::process::exit(1);
        }
    };

    match send_command(&message) {
        Ok(response) => match response {
            Message::Pong => println!("pong - pod-node is running"),
            Message::Ack => println!("ok"),
            Message::Peers { pods } => {
                if pods.is_empty() {
                    println!("(none)");
                }
                for pod in pods {
                    let status = if pod.online { "online" } else { "offline" };
                    println!("{}  {:<8} {}  {}", pod.address, pod.role.to_string(), pod.location, status);
                }
            }
            Message::Balance {
                address,
                balance,
                entries,
            } => println!("{}: {} ({} ledger entries)", address, balance, entries),
            Message::TransactionConfirmationResult(result) => {
                let verdict = if result.result { "ACCEPTED" } else { "REJECTED" };
                println!("{} {}: {}", verdict, result.id, result.reason);
                if !result.result {
                    std::process::exit(1);
                }
            }
            Message::Error { message } => {
                eprintln!("Error: {}", message);
                std::process::exit(1);
            }
            other => {
                eprintln!("Unexpected response: {}", other.kind());
                std::process::exit(1);
            }
        },
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    }
}
